//! The [`AudioStreamRule`] struct binds a set of conditions to an action.

use ef_core::MediaStream;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::condition::StreamCondition;

/// What to do with an audio stream governed by a rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AudioAction {
    /// Pass the stream through unchanged.
    Copy,
    /// Drop the stream.
    Delete,
    /// Drop the stream, unless this is the last rule and no audio has been
    /// emitted yet, in which case pass it through.
    DeleteUnlessOnly,
    /// Pass the stream through and also emit an encoded copy.
    Clone,
    /// Emit an encoded version of the stream.
    Encode,
}

impl fmt::Display for AudioAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Copy => write!(f, "copy"),
            Self::Delete => write!(f, "delete"),
            Self::DeleteUnlessOnly => write!(f, "delete_unless_only"),
            Self::Clone => write!(f, "clone"),
            Self::Encode => write!(f, "encode"),
        }
    }
}

/// One entry in a preset's ordered audio rule list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AudioStreamRule {
    /// Predicates combined by AND. An empty list matches every stream.
    #[serde(default)]
    pub conditions: Vec<StreamCondition>,
    pub action: AudioAction,
    /// Target encoder for `Clone` and `Encode`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub encoder: Option<String>,
    /// Target bitrate (e.g. "192k") for `Clone` and `Encode`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bitrate: Option<String>,
}

impl AudioStreamRule {
    pub fn new(conditions: Vec<StreamCondition>, action: AudioAction) -> Self {
        Self {
            conditions,
            action,
            encoder: None,
            bitrate: None,
        }
    }

    /// Builder: set the target encoder and optional bitrate.
    pub fn with_encoder(mut self, encoder: &str, bitrate: Option<&str>) -> Self {
        self.encoder = Some(encoder.to_string());
        self.bitrate = bitrate.map(str::to_string);
        self
    }

    /// Whether every condition holds for the stream.
    pub fn matches(&self, stream: &MediaStream) -> bool {
        self.conditions.iter().all(|c| c.evaluate(stream))
    }
}
