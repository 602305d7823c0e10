//! The job orchestrator.
//!
//! [`JobManager`] owns the job set and drives each job through
//! Initialise -> Test -> BuildWorkLoad -> (background) LoadMediaInfo ->
//! Process. Every phase body runs inside a [`PhaseScope`], so any error
//! returned with `?` leaves that phase failed. One job's failure is logged on
//! the job and never propagates to other jobs.
//!
//! The manager is cheap to clone; clones share the same job set.

use std::collections::{BTreeSet, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use ef_av::{
    synthesize, BuildOutcome, EncodeOutcome, EncoderArguments, OptionTrials, ProgressSender,
    TrialObserver,
};
use ef_core::events::EventPayload;
use ef_core::{Error, MediaInfo, MediaSource, Result, WorkItemId};
use ef_rules::Preset;
use parking_lot::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::collaborators::MediaEntry;
use crate::context::JobContext;
use crate::job::{Job, JobDefinition};
use crate::log::LogLevel;
use crate::phase::{Phase, PhaseScope, PhaseState, ProcessStart};
use crate::work_item::WorkItem;

/// File written and removed in each destination directory to prove write
/// access.
const WRITE_PROBE_FILE: &str = "Test.txt";
const WRITE_PROBE_CONTENTS: &str = "This is a write test";

/// Sample container used for auto-tune clips when the preset names none and
/// the source has no extension.
const DEFAULT_SAMPLE_EXTENSION: &str = "mkv";

/// How an initialisation attempt ended.
#[derive(Debug)]
pub enum InitialiseReport {
    /// An initialisation, test or run was already in flight.
    Skipped,
    /// Cancelled while the work load was being built.
    Cancelled,
    /// A phase failed; the job's condition shows which.
    Failed(Error),
    /// Test and Initialise succeeded. Media info is loading in `background`,
    /// which also runs the job when AutoRun is set.
    Initialised { background: JoinHandle<()> },
}

impl InitialiseReport {
    pub fn is_initialised(&self) -> bool {
        matches!(self, Self::Initialised { .. })
    }

    /// Wait for the background continuation, if one was started.
    pub async fn settle(self) {
        if let Self::Initialised { background } = self {
            if let Err(e) = background.await {
                tracing::error!(error = %e, "media info loader panicked");
            }
        }
    }
}

/// How a run request ended.
#[derive(Debug)]
pub enum RunOutcome {
    /// Media info is still loading; the run starts when it finishes.
    Deferred,
    /// The job has not passed its test or is already running.
    NotReady,
    Completed,
    Cancelled,
    /// Processing stopped at an error; later items were not attempted.
    Failed(Error),
}

/// Result of preparing a job up to a successful test.
enum Prepared {
    Ready {
        load: PhaseScope,
        preset: Preset,
        extension: Option<String>,
    },
    Cancelled,
}

/// Drives jobs through their lifecycle.
#[derive(Clone)]
pub struct JobManager {
    ctx: Arc<JobContext>,
    jobs: Arc<RwLock<Vec<Arc<Job>>>>,
}

impl JobManager {
    pub fn new(ctx: JobContext) -> Self {
        Self {
            ctx: Arc::new(ctx),
            jobs: Arc::new(RwLock::new(Vec::new())),
        }
    }

    pub fn context(&self) -> &JobContext {
        &self.ctx
    }

    // -----------------------------------------------------------------------
    // Job set
    // -----------------------------------------------------------------------

    /// Snapshot of the job set.
    pub fn jobs(&self) -> Vec<Arc<Job>> {
        self.jobs.read().clone()
    }

    pub fn job(&self, name: &str) -> Option<Arc<Job>> {
        self.jobs.read().iter().find(|j| j.name() == name).cloned()
    }

    /// Add persisted jobs that are not in the set yet. Returns how many were
    /// added. Nothing is initialised.
    pub async fn load_jobs(&self) -> Result<usize> {
        let definitions = self.ctx.store.load_jobs().await?;
        let capacity = self.ctx.config.jobs.log_capacity;

        let mut jobs = self.jobs.write();
        let mut added = 0;
        for definition in &definitions {
            if jobs.iter().any(|j| j.name() == definition.name) {
                tracing::warn!(job = %definition.name, "duplicate job name in store, skipping");
                continue;
            }
            jobs.push(Arc::new(
                Job::from_definition(definition).with_log_capacity(capacity),
            ));
            added += 1;
        }
        Ok(added)
    }

    pub fn filter_in_use(&self, filter: &str) -> bool {
        self.jobs.read().iter().any(|j| j.filter_name() == filter)
    }

    pub fn preset_in_use(&self, preset: &str) -> bool {
        self.jobs.read().iter().any(|j| j.preset_name() == preset)
    }

    /// Initialise `job` and, if its test passes, add it to the set (a job of
    /// the same name already present is kept) and save.
    ///
    /// Returns whether the job was accepted.
    pub async fn add_job(&self, job: Arc<Job>) -> Result<bool> {
        tracing::info!(job = %job.name(), "adding job");

        // The background continuation outlives this call.
        let _report = self.initialise_job(&job).await;
        if job.phase_state(Phase::Test) != PhaseState::Succeeded {
            tracing::info!(job = %job.name(), "job failed its test; not added");
            return Ok(false);
        }

        {
            let mut jobs = self.jobs.write();
            if jobs
                .iter()
                .any(|j| Arc::ptr_eq(j, &job) || j.name() == job.name())
            {
                tracing::debug!(job = %job.name(), "updating existing job");
            } else {
                jobs.push(job.clone());
            }
        }

        self.save().await?;
        Ok(true)
    }

    /// Remove `job` from the set and save.
    ///
    /// # Errors
    ///
    /// [`Error::InvalidTransition`] while the job is processing; cancel it
    /// first.
    pub async fn delete_job(&self, job: &Arc<Job>) -> Result<()> {
        refuse_while_processing(job, "delete")?;

        let removed = {
            let mut jobs = self.jobs.write();
            let before = jobs.len();
            jobs.retain(|j| !Arc::ptr_eq(j, job));
            jobs.len() != before
        };
        if removed {
            tracing::info!(job = %job.name(), "job deleted");
        } else {
            tracing::warn!(job = %job.name(), "job not found");
        }

        job.cancel_generation();
        self.save().await
    }

    /// Replace `job` with its persisted definition (matched by identifier)
    /// and initialise the result. A job with no persisted counterpart is
    /// initialised in place.
    ///
    /// # Errors
    ///
    /// [`Error::InvalidTransition`] while the job is processing.
    pub async fn reload_job(&self, job: &Arc<Job>) -> Result<(Arc<Job>, InitialiseReport)> {
        refuse_while_processing(job, "reload")?;
        tracing::info!(job = %job.name(), id = ?job.id(), "reloading job");

        let persisted = match job.id() {
            Some(id) => self
                .ctx
                .store
                .load_jobs()
                .await?
                .into_iter()
                .find(|d| d.id == Some(id)),
            None => None,
        };

        let target = match persisted {
            Some(definition) => {
                let fresh = Arc::new(
                    Job::from_definition(&definition)
                        .with_log_capacity(self.ctx.config.jobs.log_capacity),
                );
                job.cancel_generation();
                if let Some(slot) = self.jobs.write().iter_mut().find(|j| Arc::ptr_eq(j, job)) {
                    *slot = fresh.clone();
                }
                fresh
            }
            None => {
                tracing::warn!(job = %job.name(), "job not found in store");
                job.clone()
            }
        };

        let report = self.initialise_job(&target).await;
        Ok((target, report))
    }

    async fn save(&self) -> Result<()> {
        let definitions: Vec<JobDefinition> =
            self.jobs.read().iter().map(|j| j.to_definition()).collect();
        self.ctx.store.save_jobs(&definitions).await
    }

    // -----------------------------------------------------------------------
    // Initialisation
    // -----------------------------------------------------------------------

    /// Initialise every job whose Initialise phase has not succeeded, one at
    /// a time. Returns how many initialised.
    pub async fn initialise_all(&self) -> usize {
        let pending: Vec<Arc<Job>> = self
            .jobs()
            .into_iter()
            .filter(|j| j.phase_state(Phase::Initialise) != PhaseState::Succeeded)
            .collect();
        if pending.is_empty() {
            return 0;
        }

        let bus = &self.ctx.event_bus;
        bus.status("Initialising jobs");
        let total = pending.len();
        let mut initialised = 0;
        for (i, job) in pending.iter().enumerate() {
            bus.status(format!("Initialising job {} ({}/{total})", job.name(), i + 1));
            if self.initialise_job(job).await.is_initialised() {
                initialised += 1;
            }
        }
        bus.status("Job initialisation complete");
        initialised
    }

    /// Fire off initialisation of every idle job using `filter`.
    ///
    /// Must be called within a Tokio runtime.
    pub fn initialise_jobs_using_filter(&self, filter: &str) -> Vec<JoinHandle<InitialiseReport>> {
        self.initialise_matching(|job| job.filter_name() == filter)
    }

    /// Fire off initialisation of every idle job using `preset`.
    pub fn initialise_jobs_using_preset(&self, preset: &str) -> Vec<JoinHandle<InitialiseReport>> {
        self.initialise_matching(|job| job.preset_name() == preset)
    }

    /// Fire off initialisation of every idle job listing from `source`.
    pub fn initialise_jobs_for_source(
        &self,
        source: MediaSource,
    ) -> Vec<JoinHandle<InitialiseReport>> {
        self.initialise_matching(|job| self.job_source(job) == Some(source))
    }

    fn job_source(&self, job: &Job) -> Option<MediaSource> {
        job.media_source().or_else(|| {
            self.ctx
                .filters
                .filter(job.filter_name())
                .map(|f| f.media_source)
        })
    }

    fn initialise_matching(
        &self,
        matches: impl Fn(&Job) -> bool,
    ) -> Vec<JoinHandle<InitialiseReport>> {
        self.jobs()
            .into_iter()
            .filter(|job| job.condition().safe_to_initialise() && matches(job))
            .map(|job| {
                let manager = self.clone();
                tokio::spawn(async move { manager.initialise_job(&job).await })
            })
            .collect()
    }

    /// Initialise `job`: resolve its filter and preset, test the catalog,
    /// build the work load, check the destinations and start loading media
    /// info in the background.
    ///
    /// Returns [`InitialiseReport::Skipped`] without touching the job while
    /// another initialisation, test or run is in flight. The job is not ready to
    /// run when this returns; see [`InitialiseReport::Initialised`].
    pub async fn initialise_job(&self, job: &Arc<Job>) -> InitialiseReport {
        self.observe(job);
        let Some(init) = job.condition().begin_initialise() else {
            tracing::debug!(job = %job.name(), "initialisation already in progress");
            return InitialiseReport::Skipped;
        };
        self.log(job, LogLevel::Info, "Begin initialisation");
        let generation = job.next_generation();

        match self.prepare(job, &generation).await {
            Ok(Prepared::Ready {
                load,
                preset,
                extension,
            }) => {
                job.ensure_id();
                if let Err(e) = init.succeed(true) {
                    self.log(job, LogLevel::Error, format!("Initialisation interrupted: {e}"));
                    return InitialiseReport::Failed(e);
                }
                self.log(job, LogLevel::Info, "Initialisation succeeded");

                let manager = self.clone();
                let job = job.clone();
                let background = tokio::spawn(async move {
                    manager
                        .load_media_info(&job, load, &preset, extension.as_deref(), &generation)
                        .await;
                });
                InitialiseReport::Initialised { background }
            }
            Ok(Prepared::Cancelled) => {
                // A concurrent clear makes this stale, which is fine.
                let _ = init.succeed(false);
                self.log(job, LogLevel::Info, "Initialisation cancelled");
                InitialiseReport::Cancelled
            }
            Err(e) => {
                self.log(job, LogLevel::Warn, format!("Initialisation failed: {e}"));
                tracing::debug!(job = %job.name(), category = e.category(), "initialisation error");
                InitialiseReport::Failed(e)
            }
        }
    }

    async fn prepare(&self, job: &Arc<Job>, generation: &CancellationToken) -> Result<Prepared> {
        let filter = self.ctx.filters.filter(job.filter_name()).ok_or_else(|| {
            Error::Configuration(format!("filter '{}' does not exist", job.filter_name()))
        })?;
        let preset = self.ctx.presets.preset(job.preset_name()).ok_or_else(|| {
            Error::Configuration(format!("preset '{}' does not exist", job.preset_name()))
        })?;
        self.log(
            job,
            LogLevel::Debug,
            format!("Using filter '{}' and preset '{}'", filter.name, preset.name),
        );

        let extension = match preset.container.as_deref().map(str::trim) {
            Some(container) if !container.is_empty() => {
                let ext = self.ctx.runner.container_extension(container).await?;
                self.log(job, LogLevel::Debug, format!("Container extension set to {ext}"));
                Some(ext)
            }
            _ => None,
        };

        let test = job.condition().enter(Phase::Test)?;
        job.set_cancel(false);
        self.log(job, LogLevel::Debug, "Begin testing");

        let source = filter.media_source;
        let catalog = self.ctx.catalog(source)?;
        job.set_media_source(source);
        if let Err(e) = catalog.test_connection().await {
            self.log(job, LogLevel::Warn, format!("Failed to connect to {source}: {e}"));
            return Err(e);
        }
        self.log(job, LogLevel::Debug, format!("Connected to {source}, fetching files"));

        let entries = match catalog.list_files(&filter).await {
            Ok(entries) => entries,
            Err(e) => {
                self.log(job, LogLevel::Warn, format!("Failed to list files from {source}: {e}"));
                return Err(e);
            }
        };
        self.log(
            job,
            LogLevel::Debug,
            format!("{} files returned, building work load", entries.len()),
        );

        let build = job.condition().enter(Phase::BuildWorkLoad)?;
        let Some(items) = self
            .build_work_load(job, &preset, extension.as_deref(), &entries, generation)
            .await?
        else {
            build.succeed(false)?;
            return Ok(Prepared::Cancelled);
        };
        let directories = destination_directories(job.destination(), &items);
        job.set_work_items(items);
        build.succeed(true)?;
        self.log(job, LogLevel::Debug, "Work load compiled, checking destination folders");

        for dir in &directories {
            if let Err(e) = write_probe(dir).await {
                self.log(
                    job,
                    LogLevel::Error,
                    format!("Cannot write to {}: {e}", dir.display()),
                );
                return Err(Error::filesystem(dir, format!("write test failed: {e}")));
            }
        }

        test.succeed(true)?;
        self.log(job, LogLevel::Info, "Test succeeded");

        // Entered before the background task starts so a run requested right
        // after initialisation is deferred rather than refused.
        let load = job.condition().enter(Phase::LoadMediaInfo)?;
        Ok(Prepared::Ready {
            load,
            preset,
            extension,
        })
    }

    /// Build one work item per catalog entry. Returns `None` on cancellation.
    async fn build_work_load(
        &self,
        job: &Arc<Job>,
        preset: &Preset,
        extension: Option<&str>,
        entries: &[Box<dyn MediaEntry>],
        cancel: &CancellationToken,
    ) -> Result<Option<Vec<WorkItem>>> {
        let total = entries.len();
        let mut items = Vec::with_capacity(total);

        for (i, entry) in entries.iter().enumerate() {
            if cancel.is_cancelled() || job.is_cancelled() {
                return Ok(None);
            }

            let source = self.source_path(entry.path());
            match tokio::fs::metadata(&source).await {
                Ok(meta) if meta.is_file() => {}
                _ => {
                    self.log(
                        job,
                        LogLevel::Warn,
                        format!("This file was not found: {}", source.display()),
                    );
                    return Err(Error::filesystem(&source, "source file not found"));
                }
            }

            let destination = destination_for(&source, job.destination(), extension)?;
            if let Some(dir) = destination.parent() {
                if let Err(e) = tokio::fs::create_dir_all(dir).await {
                    self.log(job, LogLevel::Error, e.to_string());
                    return Err(Error::filesystem(
                        dir,
                        format!("failed to create destination directory: {e}"),
                    ));
                }
            }

            let mut item = WorkItem::new(source, entry.stable_hash(), destination);
            item.media_info = entry.media_info().cloned();
            if let Some(info) = &item.media_info {
                match self
                    .synthesize_item(preset, extension, &item.source_path, info, cancel)
                    .await?
                {
                    Some((arguments, trials)) => {
                        item.arguments = Some(arguments);
                        item.trials = trials;
                    }
                    None => return Ok(None),
                }
            }
            items.push(item);

            self.report_initialisation(job, (i + 1) as f32 / total as f32 * 100.0);
        }

        Ok(Some(items))
    }

    /// Background continuation: probe what the catalog did not describe,
    /// synthesize the remaining arguments, then run if AutoRun is set.
    async fn load_media_info(
        &self,
        job: &Arc<Job>,
        load: PhaseScope,
        preset: &Preset,
        extension: Option<&str>,
        cancel: &CancellationToken,
    ) {
        match self.probe_work_items(job, preset, extension, cancel).await {
            Ok(true) => {
                if let Err(e) = load.succeed(true) {
                    tracing::debug!(job = %job.name(), error = %e, "media info loader is stale");
                    return;
                }
                self.log(job, LogLevel::Info, "Media info loaded");
            }
            Ok(false) => {
                let _ = load.succeed(false);
                self.log(job, LogLevel::Info, "Media info loading cancelled");
                return;
            }
            Err(e) => {
                self.log(job, LogLevel::Error, format!("Failed to load media info: {e}"));
                return;
            }
        }

        if job.auto_run() {
            let outcome = self.run_job(job).await;
            tracing::debug!(job = %job.name(), ?outcome, "automatic run finished");
        }
    }

    /// Returns `false` when cancelled.
    async fn probe_work_items(
        &self,
        job: &Arc<Job>,
        preset: &Preset,
        extension: Option<&str>,
        cancel: &CancellationToken,
    ) -> Result<bool> {
        let pending: Vec<WorkItem> = job
            .work_items()
            .into_iter()
            .filter(|item| !item.is_ready())
            .collect();
        let total = job.work_item_count().max(1);

        for (i, item) in pending.into_iter().enumerate() {
            if cancel.is_cancelled() {
                return Ok(false);
            }

            let info = match item.media_info {
                Some(info) => info,
                None => {
                    self.ctx
                        .prober
                        .probe(&item.source_path, &item.content_hash)
                        .await?
                }
            };
            let Some((arguments, trials)) = self
                .synthesize_item(preset, extension, &item.source_path, &info, cancel)
                .await?
            else {
                return Ok(false);
            };

            if cancel.is_cancelled() {
                return Ok(false);
            }
            job.update_work_item(item.id, |wi| {
                wi.media_info = Some(info);
                wi.arguments = Some(arguments);
                wi.trials = trials;
            });
            self.report_initialisation(job, (i + 1) as f32 / total as f32 * 100.0);
        }
        Ok(true)
    }

    /// Synthesize arguments for one source, auto-tuning against it when the
    /// preset asks for it. Returns `None` on cancellation.
    async fn synthesize_item(
        &self,
        preset: &Preset,
        extension: Option<&str>,
        source: &Path,
        info: &MediaInfo,
        cancel: &CancellationToken,
    ) -> Result<Option<(EncoderArguments, Vec<OptionTrials>)>> {
        let sample_extension = extension
            .map(str::to_string)
            .or_else(|| {
                source
                    .extension()
                    .map(|e| e.to_string_lossy().into_owned())
            })
            .unwrap_or_else(|| DEFAULT_SAMPLE_EXTENSION.to_string());

        let trials: Arc<Mutex<Vec<OptionTrials>>> = Arc::default();
        let session = self
            .ctx
            .tuner()
            .session(source, info.duration, &sample_extension)
            .with_observer(self.trial_observer(source, trials.clone()));

        match synthesize(preset, info, &session, cancel).await? {
            BuildOutcome::Built(arguments) => {
                let trials = std::mem::take(&mut *trials.lock());
                Ok(Some((arguments, trials)))
            }
            BuildOutcome::Cancelled => Ok(None),
        }
    }

    /// Keeps the latest trial tables in `sink` and broadcasts each measured
    /// trial once.
    fn trial_observer(&self, source: &Path, sink: Arc<Mutex<Vec<OptionTrials>>>) -> TrialObserver {
        let bus = self.ctx.event_bus.clone();
        let source = source.display().to_string();
        let reported: Mutex<HashSet<(String, String)>> = Mutex::default();

        Arc::new(move |tables: &[OptionTrials]| {
            for table in tables {
                for result in &table.results {
                    if result.processing || result.size.is_none() {
                        continue;
                    }
                    if reported
                        .lock()
                        .insert((table.option.clone(), result.value.clone()))
                    {
                        bus.broadcast(EventPayload::AutoTuneTrial {
                            source: source.clone(),
                            option: table.option.clone(),
                            value: result.value.clone(),
                            size: result.size,
                            similarity: result.similarity,
                        });
                    }
                }
            }
            *sink.lock() = tables.to_vec();
        })
    }

    // -----------------------------------------------------------------------
    // Processing
    // -----------------------------------------------------------------------

    /// Encode the work list, one item after another.
    ///
    /// While media info is still loading this only sets AutoRun and returns
    /// [`RunOutcome::Deferred`].
    pub async fn run_job(&self, job: &Arc<Job>) -> RunOutcome {
        self.observe(job);
        let process = match job.condition().begin_process(job.auto_run_flag()) {
            Ok(ProcessStart::Started(scope)) => scope,
            Ok(ProcessStart::Deferred) => {
                self.log(
                    job,
                    LogLevel::Info,
                    "Media info is still loading; the job will start when it is ready",
                );
                return RunOutcome::Deferred;
            }
            Ok(ProcessStart::NotReady) => {
                tracing::debug!(job = %job.name(), "job is not ready to run");
                return RunOutcome::NotReady;
            }
            Err(e) => {
                self.log(job, LogLevel::Warn, format!("Cannot start job: {e}"));
                return RunOutcome::Failed(e);
            }
        };

        self.log(
            job,
            LogLevel::Info,
            format!("Started job at {}", chrono::Local::now().format("%Y-%m-%d %H:%M:%S")),
        );

        match self.process_work_items(job).await {
            Ok(()) => {
                let cancelled = job.is_cancelled();
                if let Err(e) = process.succeed(!cancelled) {
                    self.log(job, LogLevel::Error, format!("Process interrupted: {e}"));
                    return RunOutcome::Failed(e);
                }
                if cancelled {
                    self.log(job, LogLevel::Info, "Job cancelled");
                    RunOutcome::Cancelled
                } else {
                    let items = job.work_items();
                    let succeeded = items.iter().filter(|i| i.success).count();
                    self.log(
                        job,
                        LogLevel::Info,
                        format!("Job finished: {succeeded}/{} succeeded", items.len()),
                    );
                    RunOutcome::Completed
                }
            }
            Err(e) => {
                self.log(job, LogLevel::Error, format!("Job failed: {e}"));
                drop(process);
                RunOutcome::Failed(e)
            }
        }
    }

    async fn process_work_items(&self, job: &Arc<Job>) -> Result<()> {
        for index in 0..job.work_item_count() {
            if job.is_cancelled() {
                break;
            }
            let Some(item) = job.work_item(index) else {
                break;
            };

            job.update_work_item(item.id, |wi| {
                wi.success = false;
                wi.progress = 0.0;
            });
            self.log(job, LogLevel::Debug, format!("Now processing: {}", item.file_name()));

            let mut success = self.encode_item(job, &item).await?;
            if job.is_cancelled() {
                break;
            }

            match self.ctx.validator.validate(&item).await {
                Ok(summary) => self.log(job, LogLevel::Debug, summary),
                Err(e) => {
                    self.log(job, LogLevel::Warn, format!("{}: {e}", item.file_name()));
                    success = false;
                }
            }
            job.update_work_item(item.id, |wi| wi.success = success);

            if success && job.auto_import() {
                self.import(job, &item).await;
            }
        }
        Ok(())
    }

    /// Run every pass of one item. Returns whether all passes completed.
    async fn encode_item(&self, job: &Arc<Job>, item: &WorkItem) -> Result<bool> {
        let arguments = item.arguments.as_ref().ok_or_else(|| {
            Error::Configuration(format!(
                "no arguments were built for {}",
                item.source_path.display()
            ))
        })?;
        let duration = item.media_info.as_ref().and_then(|m| m.duration);
        let passes = arguments.render(&item.source_path, &item.destination);

        let token = CancellationToken::new();
        job.attach_process(token.clone());
        // Covers a cancel that landed between the loop check and attaching.
        if job.is_cancelled() {
            token.cancel();
        }

        let mut completed = true;
        let mut result = Ok(());
        for (pass, args) in passes.iter().enumerate() {
            let step = (passes.len() > 1).then(|| format!("pass {}/{}", pass + 1, passes.len()));
            let progress = self.item_progress(job, item.id, step);
            match self.ctx.runner.encode(args, duration, &progress, &token).await {
                Ok(EncodeOutcome::Completed) => {}
                Ok(EncodeOutcome::Cancelled) => {
                    self.log(job, LogLevel::Info, format!("Stopped {}", item.file_name()));
                    completed = false;
                    break;
                }
                Err(e) => {
                    result = Err(e);
                    break;
                }
            }
        }

        job.detach_process();
        result.map(|()| completed)
    }

    fn item_progress(&self, job: &Arc<Job>, item: WorkItemId, pass: Option<String>) -> ProgressSender {
        let job = job.clone();
        let bus = self.ctx.event_bus.clone();
        ProgressSender::new(move |progress, step| {
            job.update_work_item(item, |wi| wi.progress = progress);
            bus.broadcast(EventPayload::WorkItemProgress {
                job: job.name().to_string(),
                item,
                progress,
                step: pass.clone().unwrap_or_else(|| step.to_string()),
            });
        })
    }

    /// Failures are logged on the job only.
    async fn import(&self, job: &Job, item: &WorkItem) {
        let Some(source) = job.media_source() else {
            self.log(job, LogLevel::Warn, "Import skipped: job has no media source");
            return;
        };
        self.log(job, LogLevel::Info, format!("Auto import - importing into {source}"));
        let result = match self.ctx.catalog(source) {
            Ok(catalog) => catalog.import(item).await,
            Err(e) => Err(e),
        };
        match result {
            Ok(()) => self.log(job, LogLevel::Info, format!("Imported {}", item.file_name())),
            Err(e) => self.log(job, LogLevel::Warn, format!("Import failed: {e}")),
        }
    }

    /// Set the cancel flag, stop the encode in flight and any synthesis or
    /// media-info loading of the current initialisation.
    pub fn cancel_job(&self, job: &Job) {
        self.log(job, LogLevel::Info, "Cancel requested");
        job.set_cancel(true);
        job.cancel_generation();
        if job.stop_process() {
            self.log(job, LogLevel::Info, "Job stop requested");
        }
    }

    // -----------------------------------------------------------------------
    // Helpers
    // -----------------------------------------------------------------------

    fn source_path(&self, path: &Path) -> PathBuf {
        match &self.ctx.config.catalog.base_path {
            Some(base) if path.is_relative() => base.join(path),
            _ => path.to_path_buf(),
        }
    }

    fn observe(&self, job: &Job) {
        let bus = self.ctx.event_bus.clone();
        let name = job.name().to_string();
        job.condition().set_observer(Arc::new(move |phase, state| {
            tracing::debug!(job = %name, phase = %phase, state = %state, "phase changed");
            bus.broadcast(EventPayload::PhaseChanged {
                job: name.clone(),
                phase: phase.to_string(),
                state: state.to_string(),
            });
        }));
    }

    fn log(&self, job: &Job, level: LogLevel, message: impl Into<String>) {
        let entry = job.log().push(level, message);
        self.ctx.event_bus.broadcast(EventPayload::JobLog {
            job: job.name().to_string(),
            level: level.to_string(),
            message: entry.message,
        });
    }

    fn report_initialisation(&self, job: &Job, progress: f32) {
        self.ctx
            .event_bus
            .broadcast(EventPayload::InitialisationProgress {
                job: job.name().to_string(),
                progress,
            });
    }
}

impl std::fmt::Debug for JobManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobManager")
            .field("jobs", &self.jobs.read().len())
            .finish_non_exhaustive()
    }
}

fn refuse_while_processing(job: &Job, action: &str) -> Result<()> {
    if job.phase_state(Phase::Process) != PhaseState::Processing {
        return Ok(());
    }
    tracing::warn!(job = %job.name(), "refusing to {action} a job that is processing");
    Err(Error::InvalidTransition {
        phase: Phase::Process.to_string(),
        from: PhaseState::Processing.to_string(),
    })
}

/// Destination for `source`: `<root>/<source parent dir name>/<file name>`,
/// or next to the source when there is no root, with the extension replaced
/// when the preset names a container.
fn destination_for(source: &Path, root: Option<&Path>, extension: Option<&str>) -> Result<PathBuf> {
    let file_name = source
        .file_name()
        .ok_or_else(|| Error::filesystem(source, "source has no file name"))?;
    let source_dir = source.parent().unwrap_or_else(|| Path::new(""));

    let dir = match root.filter(|r| !r.as_os_str().is_empty()) {
        None => source_dir.to_path_buf(),
        Some(root) => match source_dir.file_name() {
            Some(parent) => root.join(parent),
            None => root.to_path_buf(),
        },
    };

    let mut destination = dir.join(file_name);
    if let Some(ext) = extension
        .map(|e| e.trim_start_matches('.'))
        .filter(|e| !e.is_empty())
    {
        destination.set_extension(ext);
    }

    if destination == source {
        return Err(Error::filesystem(
            source,
            "destination would overwrite the source; set a destination folder",
        ));
    }
    Ok(destination)
}

/// Every distinct directory the job writes into, plus its root.
fn destination_directories(root: Option<&Path>, items: &[WorkItem]) -> BTreeSet<PathBuf> {
    let mut dirs: BTreeSet<PathBuf> = items
        .iter()
        .filter_map(|i| i.destination_dir().map(Path::to_path_buf))
        .collect();
    if let Some(root) = root.filter(|r| !r.as_os_str().is_empty()) {
        dirs.insert(root.to_path_buf());
    }
    dirs
}

async fn write_probe(dir: &Path) -> std::io::Result<()> {
    tokio::fs::create_dir_all(dir).await?;
    let probe = dir.join(WRITE_PROBE_FILE);
    tokio::fs::write(&probe, WRITE_PROBE_CONTENTS).await?;
    tokio::fs::remove_file(&probe).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use assert_matches::assert_matches;
    use async_trait::async_trait;
    use ef_av::{EncoderRunner, MediaProber};
    use ef_core::config::Config;
    use ef_core::events::EventBus;
    use ef_core::MediaStream;
    use ef_rules::{AudioAction, AudioRuleSet, AudioStreamRule, StreamCondition};
    use tokio::sync::{Notify, Semaphore};

    use crate::collaborators::{
        CatalogService, FilterDefinition, FilterRegistry, JobStore, PresetRegistry,
        ResultValidator,
    };

    // -- Fakes ---------------------------------------------------------------

    fn sample_info() -> MediaInfo {
        MediaInfo {
            streams: vec![
                MediaStream::video(0, "h264"),
                MediaStream::audio(1, "aac", 2, Some("eng")),
            ],
            duration: Some(Duration::from_secs(60)),
            ..MediaInfo::default()
        }
    }

    struct Entry {
        path: PathBuf,
        info: Option<MediaInfo>,
    }

    impl MediaEntry for Entry {
        fn stable_hash(&self) -> String {
            self.path.display().to_string()
        }
        fn path(&self) -> &Path {
            &self.path
        }
        fn media_info(&self) -> Option<&MediaInfo> {
            self.info.as_ref()
        }
    }

    struct FakeCatalog {
        files: Vec<PathBuf>,
        with_info: bool,
        reachable: bool,
        imports: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl CatalogService for FakeCatalog {
        fn source(&self) -> MediaSource {
            MediaSource::Folder
        }
        async fn test_connection(&self) -> Result<()> {
            if self.reachable {
                Ok(())
            } else {
                Err(Error::connectivity("folder", "unreachable"))
            }
        }
        async fn list_files(&self, _filter: &FilterDefinition) -> Result<Vec<Box<dyn MediaEntry>>> {
            Ok(self
                .files
                .iter()
                .map(|path| {
                    Box::new(Entry {
                        path: path.clone(),
                        info: self.with_info.then(sample_info),
                    }) as Box<dyn MediaEntry>
                })
                .collect())
        }
        async fn import(&self, _item: &WorkItem) -> Result<()> {
            self.imports.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    struct Registry {
        presets: Vec<Preset>,
    }

    impl FilterRegistry for Registry {
        fn filter(&self, name: &str) -> Option<FilterDefinition> {
            (name == "all").then(|| FilterDefinition::new("all", MediaSource::Folder, ""))
        }
    }

    impl PresetRegistry for Registry {
        fn preset(&self, name: &str) -> Option<Preset> {
            self.presets.iter().find(|p| p.name == name).cloned()
        }
    }

    struct FakeProber {
        calls: Arc<AtomicUsize>,
        gate: Option<Arc<Semaphore>>,
    }

    #[async_trait]
    impl MediaProber for FakeProber {
        async fn probe(&self, _path: &Path, _hash: &str) -> Result<MediaInfo> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if let Some(gate) = &self.gate {
                let _permit = gate.acquire().await.unwrap();
            }
            Ok(sample_info())
        }
    }

    struct FakeRunner {
        encodes: Arc<AtomicUsize>,
        fail_at: Option<usize>,
        block_at: Option<usize>,
        started: Arc<Notify>,
    }

    #[async_trait]
    impl EncoderRunner for FakeRunner {
        async fn encode(
            &self,
            _args: &str,
            _duration: Option<Duration>,
            progress: &ProgressSender,
            cancel: &CancellationToken,
        ) -> Result<EncodeOutcome> {
            let n = self.encodes.fetch_add(1, Ordering::SeqCst) + 1;
            if self.fail_at == Some(n) {
                return Err(Error::execution("ffmpeg", "exit status 1"));
            }
            if self.block_at == Some(n) {
                self.started.notify_one();
                cancel.cancelled().await;
                return Ok(EncodeOutcome::Cancelled);
            }
            progress.send(100.0, "encoding");
            Ok(EncodeOutcome::Completed)
        }

        async fn similarity(
            &self,
            _reference: &Path,
            _encoded: &Path,
            _hardware_prefix: &str,
            _duration: Option<Duration>,
            _progress: &ProgressSender,
            _cancel: &CancellationToken,
        ) -> Result<Option<f64>> {
            Ok(Some(100.0))
        }

        async fn container_extension(&self, _container: &str) -> Result<String> {
            Ok("mkv".into())
        }
    }

    struct FakeValidator {
        reject: Option<&'static str>,
    }

    #[async_trait]
    impl ResultValidator for FakeValidator {
        async fn validate(&self, item: &WorkItem) -> Result<String> {
            match self.reject {
                Some(name) if item.file_name() == name => {
                    Err(Error::Validation("output too short".into()))
                }
                _ => Ok("output ok".into()),
            }
        }
    }

    #[derive(Default)]
    struct MemoryStore {
        jobs: Mutex<Vec<JobDefinition>>,
        saves: AtomicUsize,
    }

    #[async_trait]
    impl JobStore for MemoryStore {
        async fn load_jobs(&self) -> Result<Vec<JobDefinition>> {
            Ok(self.jobs.lock().clone())
        }
        async fn save_jobs(&self, jobs: &[JobDefinition]) -> Result<()> {
            *self.jobs.lock() = jobs.to_vec();
            self.saves.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    // -- Harness -------------------------------------------------------------

    #[derive(Default)]
    struct Options {
        unreachable: bool,
        missing_file: bool,
        catalog_info: bool,
        gate_probes: bool,
        fail_encode_at: Option<usize>,
        block_encode_at: Option<usize>,
        reject: Option<&'static str>,
    }

    struct Harness {
        manager: JobManager,
        _dir: tempfile::TempDir,
        output: PathBuf,
        probes: Arc<AtomicUsize>,
        encodes: Arc<AtomicUsize>,
        imports: Arc<AtomicUsize>,
        started: Arc<Notify>,
        gate: Arc<Semaphore>,
        store: Arc<MemoryStore>,
    }

    impl Harness {
        fn job(&self) -> Arc<Job> {
            Arc::new(Job::new("movies", "all", "x265").with_destination(&self.output))
        }

        fn definition(&self, name: &str, preset: &str) -> JobDefinition {
            JobDefinition {
                id: Some(ef_core::JobId::new()),
                name: name.into(),
                filter: "all".into(),
                preset: preset.into(),
                destination: Some(self.output.clone()),
                auto_import: false,
                auto_run: false,
            }
        }

        /// Initialise and wait for media info.
        async fn ready(&self, job: &Arc<Job>) {
            let report = self.manager.initialise_job(job).await;
            assert!(report.is_initialised(), "{report:?}");
            report.settle().await;
            assert_eq!(job.phase_state(Phase::LoadMediaInfo), PhaseState::Succeeded);
        }
    }

    fn preset(name: &str) -> Preset {
        let mut preset = Preset::new(name, "libx265");
        preset.container = Some("matroska".into());
        preset.audio_rules = AudioRuleSet::new(vec![AudioStreamRule::new(
            vec![StreamCondition::Any],
            AudioAction::Copy,
        )]);
        preset
    }

    fn harness(options: Options) -> Harness {
        let dir = tempfile::tempdir().unwrap();
        let library = dir.path().join("library").join("Movie");
        std::fs::create_dir_all(&library).unwrap();
        let mut files = Vec::new();
        for name in ["a.mkv", "b.mkv", "c.mkv"] {
            let path = library.join(name);
            if !(options.missing_file && name == "b.mkv") {
                std::fs::write(&path, b"source").unwrap();
            }
            files.push(path);
        }
        let output = dir.path().join("output");

        let probes = Arc::new(AtomicUsize::new(0));
        let encodes = Arc::new(AtomicUsize::new(0));
        let imports = Arc::new(AtomicUsize::new(0));
        let started = Arc::new(Notify::new());
        let gate = Arc::new(Semaphore::new(0));
        let store = Arc::new(MemoryStore::default());
        let registry = Arc::new(Registry {
            presets: vec![preset("x265"), preset("other")],
        });

        let ctx = JobContext {
            config: Arc::new(Config::default()),
            event_bus: Arc::new(EventBus::new(256)),
            catalogs: HashMap::new(),
            filters: registry.clone(),
            presets: registry,
            prober: Arc::new(FakeProber {
                calls: probes.clone(),
                gate: options.gate_probes.then(|| gate.clone()),
            }),
            runner: Arc::new(FakeRunner {
                encodes: encodes.clone(),
                fail_at: options.fail_encode_at,
                block_at: options.block_encode_at,
                started: started.clone(),
            }),
            validator: Arc::new(FakeValidator {
                reject: options.reject,
            }),
            store: store.clone(),
        }
        .with_catalog(Arc::new(FakeCatalog {
            files,
            with_info: options.catalog_info,
            reachable: !options.unreachable,
            imports: imports.clone(),
        }));

        Harness {
            manager: JobManager::new(ctx),
            _dir: dir,
            output,
            probes,
            encodes,
            imports,
            started,
            gate,
            store,
        }
    }

    fn successes(job: &Job) -> Vec<bool> {
        job.work_items().iter().map(|i| i.success).collect()
    }

    // -- Initialisation ------------------------------------------------------

    #[tokio::test]
    async fn initialise_builds_work_load_then_loads_media_info() {
        let h = harness(Options::default());
        let job = h.job();

        let report = h.manager.initialise_job(&job).await;
        let background = assert_matches!(report, InitialiseReport::Initialised { background } => background);
        assert_eq!(job.phase_state(Phase::Initialise), PhaseState::Succeeded);
        assert_eq!(job.phase_state(Phase::Test), PhaseState::Succeeded);
        assert_eq!(job.phase_state(Phase::BuildWorkLoad), PhaseState::Succeeded);
        assert!(job.id().is_some());

        background.await.unwrap();
        assert_eq!(job.phase_state(Phase::LoadMediaInfo), PhaseState::Succeeded);
        assert_eq!(h.probes.load(Ordering::SeqCst), 3);
        assert_eq!(h.encodes.load(Ordering::SeqCst), 0);

        let items = job.work_items();
        let destinations: Vec<_> = items.iter().map(|i| i.destination.clone()).collect();
        let movie_dir = h.output.join("Movie");
        assert_eq!(
            destinations,
            [movie_dir.join("a.mkv"), movie_dir.join("b.mkv"), movie_dir.join("c.mkv")]
        );
        assert!(items.iter().all(WorkItem::is_ready));
        assert!(items[0].arguments.as_ref().unwrap().passes()[0].contains("-c:v:0 libx265"));
        assert!(movie_dir.is_dir());
        assert!(!movie_dir.join(WRITE_PROBE_FILE).exists());
    }

    #[tokio::test]
    async fn catalog_metadata_is_used_without_probing() {
        let h = harness(Options {
            catalog_info: true,
            ..Options::default()
        });
        let job = h.job();

        let report = h.manager.initialise_job(&job).await;
        assert!(job.work_items().iter().all(WorkItem::is_ready));
        report.settle().await;
        assert_eq!(h.probes.load(Ordering::SeqCst), 0);
        assert_eq!(job.phase_state(Phase::LoadMediaInfo), PhaseState::Succeeded);
    }

    #[tokio::test]
    async fn connectivity_failure_fails_test() {
        let h = harness(Options {
            unreachable: true,
            ..Options::default()
        });
        let job = h.job();

        let report = h.manager.initialise_job(&job).await;
        assert_matches!(report, InitialiseReport::Failed(Error::Connectivity { .. }));
        assert_eq!(job.phase_state(Phase::Test), PhaseState::Failed);
        assert_eq!(job.phase_state(Phase::Initialise), PhaseState::Failed);
        assert_eq!(job.phase_state(Phase::BuildWorkLoad), PhaseState::NotStarted);
        assert!(job.condition().safe_to_initialise());
        assert!(job
            .log()
            .entries()
            .iter()
            .any(|e| e.level == LogLevel::Warn && e.message.contains("Failed to connect")));
    }

    #[tokio::test]
    async fn missing_source_file_fails_build() {
        let h = harness(Options {
            missing_file: true,
            ..Options::default()
        });
        let job = h.job();

        let report = h.manager.initialise_job(&job).await;
        assert_matches!(report, InitialiseReport::Failed(Error::Filesystem { .. }));
        assert_eq!(job.phase_state(Phase::BuildWorkLoad), PhaseState::Failed);
        assert_eq!(job.phase_state(Phase::Test), PhaseState::Failed);
        assert_eq!(job.work_item_count(), 0);
    }

    #[tokio::test]
    async fn unknown_preset_is_a_configuration_error() {
        let h = harness(Options::default());
        let job = Arc::new(Job::new("movies", "all", "missing").with_destination(&h.output));

        let report = h.manager.initialise_job(&job).await;
        assert_matches!(report, InitialiseReport::Failed(Error::Configuration(_)));
        assert_eq!(job.phase_state(Phase::Initialise), PhaseState::Failed);
        assert_eq!(job.phase_state(Phase::Test), PhaseState::NotStarted);
    }

    #[tokio::test]
    async fn phase_changes_are_broadcast() {
        let h = harness(Options::default());
        let job = h.job();
        h.ready(&job).await;

        let events = h.manager.context().event_bus.recent_events(100);
        assert!(events.iter().any(|e| matches!(
            &e.payload,
            EventPayload::PhaseChanged { phase, state, .. } if phase == "test" && state == "succeeded"
        )));
        assert!(events
            .iter()
            .any(|e| matches!(&e.payload, EventPayload::InitialisationProgress { progress, .. } if *progress == 100.0)));
    }

    // -- Running -------------------------------------------------------------

    #[tokio::test]
    async fn run_processes_items_in_order_and_imports() {
        let h = harness(Options::default());
        let job = h.job();
        job.set_auto_import(true);
        h.ready(&job).await;

        assert_matches!(h.manager.run_job(&job).await, RunOutcome::Completed);
        assert_eq!(job.phase_state(Phase::Process), PhaseState::Succeeded);
        assert_eq!(h.encodes.load(Ordering::SeqCst), 3);
        assert_eq!(h.imports.load(Ordering::SeqCst), 3);
        assert_eq!(successes(&job), [true, true, true]);
        assert!(job.work_items().iter().all(|i| i.progress == 100.0));
        assert!(!job.is_encoding());
    }

    #[tokio::test]
    async fn run_before_initialisation_is_not_ready() {
        let h = harness(Options::default());
        let job = h.job();
        assert_matches!(h.manager.run_job(&job).await, RunOutcome::NotReady);
        assert!(!job.auto_run());
    }

    #[tokio::test]
    async fn run_while_loading_is_deferred_until_loaded() {
        let h = harness(Options {
            gate_probes: true,
            ..Options::default()
        });
        let job = h.job();

        let report = h.manager.initialise_job(&job).await;
        assert!(report.is_initialised());
        assert_matches!(h.manager.run_job(&job).await, RunOutcome::Deferred);
        assert!(job.auto_run());
        assert_eq!(h.encodes.load(Ordering::SeqCst), 0);

        h.gate.add_permits(1);
        report.settle().await;
        assert_eq!(job.phase_state(Phase::Process), PhaseState::Succeeded);
        assert_eq!(h.encodes.load(Ordering::SeqCst), 3);
        assert!(!job.auto_run());
    }

    #[tokio::test]
    async fn validation_failure_does_not_abort_remaining_items() {
        let h = harness(Options {
            reject: Some("b.mkv"),
            ..Options::default()
        });
        let job = h.job();
        job.set_auto_import(true);
        h.ready(&job).await;

        assert_matches!(h.manager.run_job(&job).await, RunOutcome::Completed);
        assert_eq!(successes(&job), [true, false, true]);
        assert_eq!(h.encodes.load(Ordering::SeqCst), 3);
        assert_eq!(h.imports.load(Ordering::SeqCst), 2);
        assert_eq!(job.phase_state(Phase::Process), PhaseState::Succeeded);
    }

    #[tokio::test]
    async fn execution_error_aborts_remaining_items() {
        let h = harness(Options {
            fail_encode_at: Some(2),
            ..Options::default()
        });
        let job = h.job();
        h.ready(&job).await;

        assert_matches!(
            h.manager.run_job(&job).await,
            RunOutcome::Failed(Error::Execution { .. })
        );
        assert_eq!(h.encodes.load(Ordering::SeqCst), 2);
        assert_eq!(successes(&job), [true, false, false]);
        assert_eq!(job.phase_state(Phase::Process), PhaseState::Failed);
        assert!(!job.is_encoding());
    }

    #[tokio::test]
    async fn cancellation_mid_process_keeps_completed_items() {
        let h = harness(Options {
            block_encode_at: Some(2),
            ..Options::default()
        });
        let job = h.job();
        h.ready(&job).await;

        let manager = h.manager.clone();
        let running = job.clone();
        let run = tokio::spawn(async move { manager.run_job(&running).await });

        h.started.notified().await;
        assert!(job.is_encoding());
        h.manager.cancel_job(&job);

        assert_matches!(run.await.unwrap(), RunOutcome::Cancelled);
        assert_eq!(h.encodes.load(Ordering::SeqCst), 2);
        assert_eq!(successes(&job), [true, false, false]);
        assert_eq!(job.phase_state(Phase::Process), PhaseState::Failed);
        assert!(job.condition().safe_to_run());
    }

    #[tokio::test]
    async fn initialise_is_skipped_while_a_run_is_in_flight() {
        let h = harness(Options {
            block_encode_at: Some(1),
            ..Options::default()
        });
        h.store.jobs.lock().push(h.definition("movies", "x265"));
        h.manager.load_jobs().await.unwrap();
        let job = h.manager.job("movies").unwrap();
        h.ready(&job).await;

        let manager = h.manager.clone();
        let running = job.clone();
        let run = tokio::spawn(async move { manager.run_job(&running).await });
        h.started.notified().await;

        assert_matches!(h.manager.initialise_job(&job).await, InitialiseReport::Skipped);
        assert_eq!(h.manager.initialise_jobs_using_preset("x265").len(), 0);
        assert_eq!(job.phase_state(Phase::Process), PhaseState::Processing);
        assert_eq!(job.phase_state(Phase::Test), PhaseState::Succeeded);
        assert_eq!(job.work_item_count(), 3);

        assert_matches!(h.manager.run_job(&job).await, RunOutcome::NotReady);
        assert_matches!(
            h.manager.reload_job(&job).await,
            Err(Error::InvalidTransition { .. })
        );
        assert_eq!(h.encodes.load(Ordering::SeqCst), 1);

        h.manager.cancel_job(&job);
        let outcome = tokio::time::timeout(Duration::from_secs(3), run)
            .await
            .expect("cancel_job did not reach the running encode")
            .unwrap();
        assert_matches!(outcome, RunOutcome::Cancelled);
        assert!(!job.is_encoding());
        assert!(job.condition().safe_to_initialise());
    }

    // -- Registry ------------------------------------------------------------

    #[tokio::test]
    async fn add_job_accepts_only_tested_jobs() {
        let h = harness(Options::default());
        let job = h.job();

        assert!(h.manager.add_job(job.clone()).await.unwrap());
        assert!(h.manager.add_job(job.clone()).await.unwrap());
        assert_eq!(h.manager.jobs().len(), 1);
        assert_eq!(h.store.saves.load(Ordering::SeqCst), 2);
        assert_eq!(h.store.jobs.lock()[0].name, "movies");

        assert!(h.manager.filter_in_use("all"));
        assert!(h.manager.preset_in_use("x265"));
        assert!(!h.manager.preset_in_use("other"));

        let broken = Arc::new(Job::new("broken", "all", "missing"));
        assert!(!h.manager.add_job(broken).await.unwrap());
        assert_eq!(h.manager.jobs().len(), 1);
    }

    #[tokio::test]
    async fn delete_is_refused_while_processing() {
        let h = harness(Options {
            block_encode_at: Some(1),
            ..Options::default()
        });
        let definition = h.definition("movies", "x265");
        h.store.jobs.lock().push(definition);
        assert_eq!(h.manager.load_jobs().await.unwrap(), 1);
        let job = h.manager.job("movies").unwrap();
        h.ready(&job).await;

        let manager = h.manager.clone();
        let running = job.clone();
        let run = tokio::spawn(async move { manager.run_job(&running).await });
        h.started.notified().await;

        assert_matches!(
            h.manager.delete_job(&job).await,
            Err(Error::InvalidTransition { .. })
        );
        assert_eq!(h.manager.jobs().len(), 1);

        h.manager.cancel_job(&job);
        assert_matches!(run.await.unwrap(), RunOutcome::Cancelled);
        h.manager.delete_job(&job).await.unwrap();
        assert!(h.manager.jobs().is_empty());
        assert!(h.store.jobs.lock().is_empty());
    }

    #[tokio::test]
    async fn reload_replaces_job_with_persisted_definition() {
        let h = harness(Options::default());
        let definition = h.definition("movies", "x265");
        h.store.jobs.lock().push(definition.clone());
        h.manager.load_jobs().await.unwrap();
        let job = h.manager.job("movies").unwrap();

        h.store.jobs.lock()[0].auto_import = true;
        let (reloaded, report) = h.manager.reload_job(&job).await.unwrap();
        assert!(!Arc::ptr_eq(&reloaded, &job));
        assert!(reloaded.auto_import());
        assert_eq!(reloaded.id(), definition.id);
        assert!(Arc::ptr_eq(&h.manager.jobs()[0], &reloaded));
        assert!(report.is_initialised());
        assert_eq!(reloaded.phase_state(Phase::Initialise), PhaseState::Succeeded);
        report.settle().await;
    }

    #[tokio::test]
    async fn reload_without_persisted_counterpart_initialises_in_place() {
        let h = harness(Options::default());
        let job = h.job();

        let (reloaded, report) = h.manager.reload_job(&job).await.unwrap();
        assert!(Arc::ptr_eq(&reloaded, &job));
        assert!(report.is_initialised());
        report.settle().await;
    }

    #[tokio::test]
    async fn bulk_initialise_by_preset_only_touches_matching_jobs() {
        let h = harness(Options::default());
        h.store.jobs.lock().extend([
            h.definition("movies", "x265"),
            h.definition("other", "other"),
        ]);
        h.manager.load_jobs().await.unwrap();

        let handles = h.manager.initialise_jobs_using_preset("x265");
        assert_eq!(handles.len(), 1);
        for handle in handles {
            let report = handle.await.unwrap();
            assert!(report.is_initialised());
            report.settle().await;
        }

        let movies = h.manager.job("movies").unwrap();
        let other = h.manager.job("other").unwrap();
        assert_eq!(movies.phase_state(Phase::Initialise), PhaseState::Succeeded);
        assert_eq!(other.phase_state(Phase::Initialise), PhaseState::NotStarted);

        assert_eq!(h.manager.initialise_jobs_for_source(MediaSource::Radarr).len(), 0);
        assert_eq!(h.manager.initialise_jobs_using_filter("all").len(), 2);
    }

    #[tokio::test]
    async fn initialise_all_skips_initialised_jobs() {
        let h = harness(Options::default());
        h.store.jobs.lock().extend([
            h.definition("movies", "x265"),
            h.definition("other", "other"),
        ]);
        h.manager.load_jobs().await.unwrap();

        assert_eq!(h.manager.initialise_all().await, 2);
        assert_eq!(h.manager.initialise_all().await, 0);

        let statuses: Vec<String> = h
            .manager
            .context()
            .event_bus
            .recent_events(100)
            .into_iter()
            .filter_map(|e| match e.payload {
                EventPayload::Status { message } => Some(message),
                _ => None,
            })
            .collect();
        assert!(statuses.iter().any(|s| s == "Job initialisation complete"));
    }

    // -- Helpers -------------------------------------------------------------

    #[test]
    fn destination_rules() {
        let source = Path::new("/library/Movie (2020)/movie.avi");
        assert_eq!(
            destination_for(source, Some(Path::new("/out")), Some("mkv")).unwrap(),
            PathBuf::from("/out/Movie (2020)/movie.mkv")
        );
        assert_eq!(
            destination_for(source, None, Some(".mkv")).unwrap(),
            PathBuf::from("/library/Movie (2020)/movie.mkv")
        );
        assert_eq!(
            destination_for(source, Some(Path::new("/out")), None).unwrap(),
            PathBuf::from("/out/Movie (2020)/movie.avi")
        );
        assert_matches!(
            destination_for(source, None, None),
            Err(Error::Filesystem { .. })
        );
    }
}
