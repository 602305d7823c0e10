//! Seams to the services the orchestrator depends on.
//!
//! Each trait is held as an `Arc<dyn ..>` in [`JobContext`](crate::JobContext)
//! so tests can substitute in-memory fakes.

use std::path::Path;

use async_trait::async_trait;
use ef_core::{MediaInfo, MediaSource, Result};
use ef_rules::Preset;
use serde::{Deserialize, Serialize};

use crate::job::JobDefinition;
use crate::work_item::WorkItem;

// ---------------------------------------------------------------------------
// Catalog
// ---------------------------------------------------------------------------

/// What the orchestrator needs to know about a catalogued media file.
pub trait MediaEntry: Send + Sync {
    /// Identifies the file's contents; changes when the file changes.
    fn stable_hash(&self) -> String;
    fn path(&self) -> &Path;
    /// Metadata the catalog already knows, if any.
    fn media_info(&self) -> Option<&MediaInfo> {
        None
    }
}

/// A catalog of media files (a library manager or a plain folder).
#[async_trait]
pub trait CatalogService: Send + Sync {
    fn source(&self) -> MediaSource;

    /// Check the catalog is reachable.
    ///
    /// # Errors
    ///
    /// [`Error::Connectivity`](ef_core::Error::Connectivity) when it is not.
    async fn test_connection(&self) -> Result<()>;

    /// List the files selected by `filter`, in catalog order.
    async fn list_files(&self, filter: &FilterDefinition) -> Result<Vec<Box<dyn MediaEntry>>>;

    /// Hand a finished file back to the catalog.
    async fn import(&self, item: &WorkItem) -> Result<()>;
}

// ---------------------------------------------------------------------------
// Filters and presets
// ---------------------------------------------------------------------------

/// A saved selection of media files.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FilterDefinition {
    pub name: String,
    pub media_source: MediaSource,
    /// Catalog-specific selection expression; a path regex for folders.
    #[serde(default)]
    pub query: String,
}

impl FilterDefinition {
    pub fn new(name: &str, media_source: MediaSource, query: &str) -> Self {
        Self {
            name: name.to_string(),
            media_source,
            query: query.to_string(),
        }
    }
}

pub trait FilterRegistry: Send + Sync {
    fn filter(&self, name: &str) -> Option<FilterDefinition>;
}

pub trait PresetRegistry: Send + Sync {
    fn preset(&self, name: &str) -> Option<Preset>;
}

// ---------------------------------------------------------------------------
// Results and persistence
// ---------------------------------------------------------------------------

/// Post-encode check of a work item's output.
#[async_trait]
pub trait ResultValidator: Send + Sync {
    /// Returns a short description of what passed.
    ///
    /// # Errors
    ///
    /// [`Error::Validation`](ef_core::Error::Validation) when the output is
    /// not acceptable.
    async fn validate(&self, item: &WorkItem) -> Result<String>;
}

/// Load and save of the job set.
#[async_trait]
pub trait JobStore: Send + Sync {
    async fn load_jobs(&self) -> Result<Vec<JobDefinition>>;
    async fn save_jobs(&self, jobs: &[JobDefinition]) -> Result<()>;
}
