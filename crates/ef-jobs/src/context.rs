//! Shared orchestration context.

use std::collections::HashMap;
use std::sync::Arc;

use ef_av::{AutoTuner, EncoderRunner, MediaProber};
use ef_core::config::Config;
use ef_core::events::EventBus;
use ef_core::{Error, MediaSource, Result};

use crate::collaborators::{
    CatalogService, FilterRegistry, JobStore, PresetRegistry, ResultValidator,
};

/// Everything the [`JobManager`](crate::JobManager) works with.
///
/// Created once at start-up and handed to the manager; collaborators never
/// reach for global state.
#[derive(Clone)]
pub struct JobContext {
    /// Immutable application configuration snapshot.
    pub config: Arc<Config>,
    /// Best-effort notification channel.
    pub event_bus: Arc<EventBus>,
    /// Catalogs by the media source they serve.
    pub catalogs: HashMap<MediaSource, Arc<dyn CatalogService>>,
    pub filters: Arc<dyn FilterRegistry>,
    pub presets: Arc<dyn PresetRegistry>,
    /// Media-metadata prober, normally a caching one.
    pub prober: Arc<dyn MediaProber>,
    /// Encoder and similarity runner.
    pub runner: Arc<dyn EncoderRunner>,
    pub validator: Arc<dyn ResultValidator>,
    pub store: Arc<dyn JobStore>,
}

impl JobContext {
    /// Builder: register a catalog under its own media source.
    pub fn with_catalog(mut self, catalog: Arc<dyn CatalogService>) -> Self {
        self.catalogs.insert(catalog.source(), catalog);
        self
    }

    /// # Errors
    ///
    /// [`Error::Configuration`] if no catalog serves `source`.
    pub fn catalog(&self, source: MediaSource) -> Result<Arc<dyn CatalogService>> {
        self.catalogs
            .get(&source)
            .cloned()
            .ok_or_else(|| Error::Configuration(format!("no catalog configured for {source}")))
    }

    /// Auto-tune engine bound to this context's runner and settings.
    pub fn tuner(&self) -> AutoTuner {
        AutoTuner::new(self.runner.clone(), self.config.auto_tune.clone())
    }
}

impl std::fmt::Debug for JobContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobContext")
            .field("config", &self.config)
            .field("catalogs", &self.catalogs.keys().collect::<Vec<_>>())
            .finish_non_exhaustive()
    }
}
