//! Jobs and their persisted definitions.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use ef_core::{JobId, MediaSource, WorkItemId};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::log::{JobLog, DEFAULT_LOG_CAPACITY};
use crate::phase::{JobCondition, Phase, PhaseState};
use crate::work_item::WorkItem;

/// The persisted shape of a job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobDefinition {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<JobId>,
    pub name: String,
    pub filter: String,
    pub preset: String,
    /// Output root; `None` writes next to each source.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub destination: Option<PathBuf>,
    #[serde(default)]
    pub auto_import: bool,
    /// Start processing as soon as media info is loaded. Cleared when a run
    /// starts.
    #[serde(default)]
    pub auto_run: bool,
}

/// A transcoding job: a filter selecting sources, a preset to encode them
/// with and the runtime state of its lifecycle.
pub struct Job {
    name: String,
    filter: String,
    preset: String,
    destination: Option<PathBuf>,
    id: Mutex<Option<JobId>>,
    auto_run: AtomicBool,
    auto_import: AtomicBool,
    cancel: AtomicBool,
    condition: Arc<JobCondition>,
    work_items: Mutex<Vec<WorkItem>>,
    media_source: Mutex<Option<MediaSource>>,
    /// Token of the encode in flight, if any.
    process: Mutex<Option<CancellationToken>>,
    /// Token of the current initialisation and its background loader.
    generation: Mutex<CancellationToken>,
    log: JobLog,
}

impl Job {
    pub fn new(name: &str, filter: &str, preset: &str) -> Self {
        Self {
            name: name.to_string(),
            filter: filter.to_string(),
            preset: preset.to_string(),
            destination: None,
            id: Mutex::new(None),
            auto_run: AtomicBool::new(false),
            auto_import: AtomicBool::new(false),
            cancel: AtomicBool::new(false),
            condition: Arc::new(JobCondition::new()),
            work_items: Mutex::new(Vec::new()),
            media_source: Mutex::new(None),
            process: Mutex::new(None),
            generation: Mutex::new(CancellationToken::new()),
            log: JobLog::new(name, DEFAULT_LOG_CAPACITY),
        }
    }

    pub fn from_definition(definition: &JobDefinition) -> Self {
        let mut job = Self::new(&definition.name, &definition.filter, &definition.preset);
        job.destination = definition.destination.clone();
        *job.id.get_mut() = definition.id;
        *job.auto_import.get_mut() = definition.auto_import;
        *job.auto_run.get_mut() = definition.auto_run;
        job
    }

    pub fn to_definition(&self) -> JobDefinition {
        JobDefinition {
            id: self.id(),
            name: self.name.clone(),
            filter: self.filter.clone(),
            preset: self.preset.clone(),
            destination: self.destination.clone(),
            auto_import: self.auto_import(),
            auto_run: self.auto_run(),
        }
    }

    /// Builder: write outputs under `destination`.
    pub fn with_destination(mut self, destination: impl Into<PathBuf>) -> Self {
        self.destination = Some(destination.into());
        self
    }

    /// Builder: import finished files back into the catalog.
    pub fn with_auto_import(mut self, auto_import: bool) -> Self {
        *self.auto_import.get_mut() = auto_import;
        self
    }

    /// Builder: start processing as soon as media info is loaded.
    pub fn with_auto_run(mut self, auto_run: bool) -> Self {
        *self.auto_run.get_mut() = auto_run;
        self
    }

    pub fn with_log_capacity(mut self, capacity: usize) -> Self {
        self.log = JobLog::new(&self.name, capacity);
        self
    }

    // -- Identity --------------------------------------------------------------

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn filter_name(&self) -> &str {
        &self.filter
    }

    pub fn preset_name(&self) -> &str {
        &self.preset
    }

    pub fn destination(&self) -> Option<&Path> {
        self.destination.as_deref()
    }

    pub fn id(&self) -> Option<JobId> {
        *self.id.lock()
    }

    /// Assign an identifier unless one exists.
    pub(crate) fn ensure_id(&self) -> JobId {
        *self.id.lock().get_or_insert_with(JobId::new)
    }

    /// Catalog the work list was last built from.
    pub fn media_source(&self) -> Option<MediaSource> {
        *self.media_source.lock()
    }

    pub(crate) fn set_media_source(&self, source: MediaSource) {
        *self.media_source.lock() = Some(source);
    }

    // -- Flags -----------------------------------------------------------------

    pub fn auto_run(&self) -> bool {
        self.auto_run.load(Ordering::SeqCst)
    }

    pub fn set_auto_run(&self, value: bool) {
        self.auto_run.store(value, Ordering::SeqCst);
    }

    pub(crate) fn auto_run_flag(&self) -> &AtomicBool {
        &self.auto_run
    }

    pub fn auto_import(&self) -> bool {
        self.auto_import.load(Ordering::SeqCst)
    }

    pub fn set_auto_import(&self, value: bool) {
        self.auto_import.store(value, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.load(Ordering::SeqCst)
    }

    pub(crate) fn set_cancel(&self, value: bool) {
        self.cancel.store(value, Ordering::SeqCst);
    }

    // -- State -----------------------------------------------------------------

    pub fn condition(&self) -> &Arc<JobCondition> {
        &self.condition
    }

    pub fn phase_state(&self, phase: Phase) -> PhaseState {
        self.condition.state(phase)
    }

    pub fn log(&self) -> &JobLog {
        &self.log
    }

    /// Snapshot of the work list.
    pub fn work_items(&self) -> Vec<WorkItem> {
        self.work_items.lock().clone()
    }

    pub fn work_item_count(&self) -> usize {
        self.work_items.lock().len()
    }

    pub(crate) fn work_item(&self, index: usize) -> Option<WorkItem> {
        self.work_items.lock().get(index).cloned()
    }

    pub(crate) fn set_work_items(&self, items: Vec<WorkItem>) {
        *self.work_items.lock() = items;
    }

    /// Apply `f` to the item with `id`, if it is still in the work list.
    pub(crate) fn update_work_item(&self, id: WorkItemId, f: impl FnOnce(&mut WorkItem)) -> bool {
        match self.work_items.lock().iter_mut().find(|item| item.id == id) {
            Some(item) => {
                f(item);
                true
            }
            None => false,
        }
    }

    // -- Cancellation ----------------------------------------------------------

    /// Whether an encode is attached.
    pub fn is_encoding(&self) -> bool {
        self.process.lock().is_some()
    }

    pub(crate) fn attach_process(&self, token: CancellationToken) {
        *self.process.lock() = Some(token);
    }

    pub(crate) fn detach_process(&self) {
        self.process.lock().take();
    }

    /// Cancel the attached encode. Returns whether one was attached.
    pub(crate) fn stop_process(&self) -> bool {
        match self.process.lock().as_ref() {
            Some(token) => {
                token.cancel();
                true
            }
            None => false,
        }
    }

    /// Cancel the previous initialisation's background work and hand out a
    /// fresh token for the next one.
    pub(crate) fn next_generation(&self) -> CancellationToken {
        let mut generation = self.generation.lock();
        generation.cancel();
        *generation = CancellationToken::new();
        generation.clone()
    }

    pub(crate) fn cancel_generation(&self) {
        self.generation.lock().cancel();
    }
}

impl std::fmt::Debug for Job {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Job")
            .field("name", &self.name)
            .field("filter", &self.filter)
            .field("preset", &self.preset)
            .field("id", &self.id())
            .field("condition", &self.condition)
            .field("work_items", &self.work_item_count())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn definition_round_trip() {
        let definition = JobDefinition {
            id: Some(JobId::new()),
            name: "Movies".into(),
            filter: "all-movies".into(),
            preset: "HEVC".into(),
            destination: Some(PathBuf::from("/out")),
            auto_import: true,
            auto_run: true,
        };
        let job = Job::from_definition(&definition);
        assert!(job.auto_import());
        assert!(job.auto_run());
        assert_eq!(job.to_definition(), definition);
    }

    #[test]
    fn definition_defaults() {
        let definition: JobDefinition =
            serde_json::from_str(r#"{ "name": "a", "filter": "f", "preset": "p" }"#).unwrap();
        assert_eq!(definition.id, None);
        assert_eq!(definition.destination, None);
        assert!(!definition.auto_import);
        assert!(!definition.auto_run);
    }

    #[test]
    fn id_is_assigned_once() {
        let job = Job::new("a", "f", "p");
        assert_eq!(job.id(), None);
        let first = job.ensure_id();
        assert_eq!(job.ensure_id(), first);
        assert_eq!(job.id(), Some(first));
    }

    #[test]
    fn new_generation_cancels_the_previous_one() {
        let job = Job::new("a", "f", "p");
        let first = job.next_generation();
        let second = job.next_generation();
        assert!(first.is_cancelled());
        assert!(!second.is_cancelled());
        job.cancel_generation();
        assert!(second.is_cancelled());
    }

    #[test]
    fn stop_process_cancels_attached_token() {
        let job = Job::new("a", "f", "p");
        assert!(!job.stop_process());
        let token = CancellationToken::new();
        job.attach_process(token.clone());
        assert!(job.is_encoding());
        assert!(job.stop_process());
        assert!(token.is_cancelled());
        job.detach_process();
        assert!(!job.is_encoding());
    }
}
