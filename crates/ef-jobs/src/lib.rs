//! # ef-jobs
//!
//! Job lifecycle for encodeforge.
//!
//! - **Phase tracking** ([`JobCondition`], [`PhaseScope`]) -- per-job state
//!   machine whose scopes fail their phase unless explicitly resolved.
//! - **Orchestration** ([`JobManager`]) -- initialise, test, build work
//!   loads, load media info in the background, process, cancel.
//! - **Collaborator seams** ([`CatalogService`], [`ResultValidator`],
//!   [`JobStore`], registries) plus the built-in [`FolderCatalog`],
//!   [`OutputValidator`] and [`JsonLibraryStore`].

pub mod catalog;
pub mod collaborators;
pub mod context;
pub mod job;
pub mod log;
pub mod manager;
pub mod phase;
pub mod store;
pub mod validator;
pub mod work_item;

pub use catalog::{FolderCatalog, FolderEntry};
pub use collaborators::{
    CatalogService, FilterDefinition, FilterRegistry, JobStore, MediaEntry, PresetRegistry,
    ResultValidator,
};
pub use context::JobContext;
pub use job::{Job, JobDefinition};
pub use log::{JobLog, LogEntry, LogLevel};
pub use manager::{InitialiseReport, JobManager, RunOutcome};
pub use phase::{JobCondition, Phase, PhaseObserver, PhaseScope, PhaseState, ProcessStart};
pub use store::{JsonLibraryStore, Library};
pub use validator::OutputValidator;
pub use work_item::WorkItem;
