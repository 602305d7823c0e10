//! Wiring of the job context from configuration and the library file.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use ef_av::{CachingProber, EncoderRunner, FfmpegRunner, FfprobeProber, MediaProber, ToolRegistry};
use ef_core::config::Config;
use ef_core::events::EventBus;
use ef_core::Result;
use ef_jobs::{FolderCatalog, JobContext, JobManager, JsonLibraryStore, OutputValidator};

/// Broadcast channel buffer for the event bus.
const EVENT_CAPACITY: usize = 1024;

/// A fully wired application: configuration, library and job manager.
pub struct App {
    pub config: Arc<Config>,
    pub library: Arc<JsonLibraryStore>,
    pub manager: JobManager,
}

impl App {
    /// Discover ffmpeg and ffprobe, open the library and wire the manager.
    ///
    /// `library_path` overrides `jobs.library_path` from the config.
    ///
    /// # Errors
    ///
    /// [`Error::Configuration`](ef_core::Error::Configuration) if a tool is
    /// missing or the library file is invalid.
    pub fn open(config: Config, library_path: Option<&Path>) -> Result<Self> {
        let tools = ToolRegistry::discover(&config.tools);
        let runner = FfmpegRunner::from_registry(&tools)?.with_timeout(config.jobs.encode_timeout());
        let prober = FfprobeProber::new(tools.ffprobe()?.to_path_buf());

        let library = JsonLibraryStore::open(resolve_library_path(&config, library_path))?;
        Ok(Self::with_collaborators(
            config,
            Arc::new(library),
            Arc::new(runner),
            Arc::new(prober),
        ))
    }

    /// Wire the manager around explicit encoder and prober implementations.
    ///
    /// The prober is wrapped in a [`CachingProber`]. A folder catalog is
    /// registered when `catalog.folder_root` is set.
    pub fn with_collaborators(
        config: Config,
        library: Arc<JsonLibraryStore>,
        runner: Arc<dyn EncoderRunner>,
        prober: Arc<dyn MediaProber>,
    ) -> Self {
        let config = Arc::new(config);
        let prober: Arc<dyn MediaProber> = Arc::new(CachingProber::new(prober));

        let mut ctx = JobContext {
            config: config.clone(),
            event_bus: Arc::new(EventBus::new(EVENT_CAPACITY)),
            catalogs: HashMap::new(),
            filters: library.clone(),
            presets: library.clone(),
            prober: prober.clone(),
            runner,
            validator: Arc::new(OutputValidator::new(prober)),
            store: library.clone(),
        };
        if let Some(root) = &config.catalog.folder_root {
            tracing::debug!(root = %root.display(), "folder catalog enabled");
            ctx = ctx.with_catalog(Arc::new(FolderCatalog::new(root)));
        }

        Self {
            config,
            library,
            manager: JobManager::new(ctx),
        }
    }
}

fn resolve_library_path(config: &Config, explicit: Option<&Path>) -> PathBuf {
    explicit
        .map(Path::to_path_buf)
        .unwrap_or_else(|| config.jobs.library_path.clone())
}
