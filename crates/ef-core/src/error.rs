//! Unified error type for encodeforge.
//!
//! Every crate funnels its failures into [`Error`]. The variants follow the
//! job failure taxonomy: configuration, connectivity, filesystem, execution
//! and validation problems each have their own variant so the orchestrator
//! can decide which phase they resolve and how they are logged. Cancellation
//! is deliberately absent: it is an outcome, not an error.

use std::fmt;
use std::path::Path;

/// Unified error type covering all failure modes in encodeforge.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A preset, filter, or option reference is missing or malformed.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// An external catalog service could not be reached or refused a call.
    #[error("Connectivity error [{service}]: {message}")]
    Connectivity {
        /// The service that failed (e.g. "radarr", "folder").
        service: String,
        /// Human-readable error description.
        message: String,
    },

    /// A source file is missing or a destination could not be written.
    #[error("Filesystem error [{path}]: {message}")]
    Filesystem {
        /// The path involved.
        path: String,
        /// Human-readable error description.
        message: String,
    },

    /// An I/O operation failed.
    #[error("IO error: {source}")]
    Io {
        /// The underlying I/O error.
        #[from]
        source: std::io::Error,
    },

    /// An external encode or metric process failed.
    #[error("Execution error [{tool}]: {message}")]
    Execution {
        /// Name of the tool that failed.
        tool: String,
        /// Human-readable error description.
        message: String,
    },

    /// A post-encode correctness check did not pass.
    #[error("Validation error: {0}")]
    Validation(String),

    /// The requested entity could not be found.
    #[error("{entity} not found: {id}")]
    NotFound {
        /// The kind of entity (e.g. "job", "preset").
        entity: String,
        /// The identifier that was looked up.
        id: String,
    },

    /// Probed metadata contained no streams to build arguments from.
    #[error("No streams found in media: {0}")]
    NoStreams(String),

    /// Media probing failed.
    #[error("Probe error: {0}")]
    Probe(String),

    /// A phase tracker was driven through an illegal transition.
    #[error("Invalid transition for phase {phase} from {from}")]
    InvalidTransition {
        /// The phase being transitioned.
        phase: String,
        /// The state the phase was in.
        from: String,
    },

    /// Catch-all for unexpected internal errors.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Taxonomy name for structured logging.
    pub fn category(&self) -> &'static str {
        match self {
            Error::Configuration(_) | Error::NotFound { .. } => "configuration",
            Error::Connectivity { .. } => "connectivity",
            Error::Filesystem { .. } | Error::Io { .. } => "filesystem",
            Error::Execution { .. } => "execution",
            Error::Validation(_) => "validation",
            Error::NoStreams(_) | Error::Probe(_) => "probe",
            Error::InvalidTransition { .. } | Error::Internal(_) => "internal",
        }
    }

    /// Convenience constructor for [`Error::NotFound`].
    pub fn not_found(entity: impl Into<String>, id: impl fmt::Display) -> Self {
        Error::NotFound {
            entity: entity.into(),
            id: id.to_string(),
        }
    }

    /// Convenience constructor for [`Error::Connectivity`].
    pub fn connectivity(service: impl Into<String>, message: impl Into<String>) -> Self {
        Error::Connectivity {
            service: service.into(),
            message: message.into(),
        }
    }

    /// Convenience constructor for [`Error::Filesystem`].
    pub fn filesystem(path: &Path, message: impl Into<String>) -> Self {
        Error::Filesystem {
            path: path.display().to_string(),
            message: message.into(),
        }
    }

    /// Convenience constructor for [`Error::Execution`].
    pub fn execution(tool: impl Into<String>, message: impl Into<String>) -> Self {
        Error::Execution {
            tool: tool.into(),
            message: message.into(),
        }
    }
}

/// Result alias using the crate-level [`Error`].
pub type Result<T> = std::result::Result<T, Error>;
