//! Phase tracking for the job lifecycle.
//!
//! A [`JobCondition`] holds the state of the five [`Phase`]s a job moves
//! through. Entering a phase returns a [`PhaseScope`]; the scope resolves the
//! phase to [`PhaseState::Failed`] when it is dropped without an explicit
//! [`PhaseScope::succeed`], so an early return, a `?` or a panic inside a
//! phase body always leaves the phase failed.
//!
//! All states live behind one lock, which lets the readiness checks and the
//! transition they guard happen atomically.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use ef_core::{Error, Result};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};

/// State of one phase.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PhaseState {
    #[default]
    NotStarted,
    Processing,
    Succeeded,
    Failed,
}

impl fmt::Display for PhaseState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotStarted => write!(f, "not_started"),
            Self::Processing => write!(f, "processing"),
            Self::Succeeded => write!(f, "succeeded"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

/// The named stages of a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Initialise,
    Test,
    BuildWorkLoad,
    LoadMediaInfo,
    Process,
}

impl Phase {
    pub const ALL: [Phase; 5] = [
        Phase::Initialise,
        Phase::Test,
        Phase::BuildWorkLoad,
        Phase::LoadMediaInfo,
        Phase::Process,
    ];

    fn slot(self) -> usize {
        self as usize
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Initialise => write!(f, "initialise"),
            Self::Test => write!(f, "test"),
            Self::BuildWorkLoad => write!(f, "build_work_load"),
            Self::LoadMediaInfo => write!(f, "load_media_info"),
            Self::Process => write!(f, "process"),
        }
    }
}

/// Called after every state change, outside the condition's lock.
pub type PhaseObserver = Arc<dyn Fn(Phase, PhaseState) + Send + Sync>;

#[derive(Debug, Clone, Copy, Default)]
struct Slot {
    state: PhaseState,
    /// Bumped on every entry and on clear; a scope only resolves the slot
    /// while its epoch still matches.
    epoch: u64,
}

/// Result of [`JobCondition::begin_process`].
#[derive(Debug)]
pub enum ProcessStart {
    /// Process was entered; the caller owns the scope.
    Started(PhaseScope),
    /// Media info is still loading; AutoRun was set so the loader starts the
    /// run when it finishes.
    Deferred,
    /// The job is not in a runnable state.
    NotReady,
}

/// The state machine of one job.
#[derive(Default)]
pub struct JobCondition {
    slots: Mutex<[Slot; 5]>,
    observer: RwLock<Option<PhaseObserver>>,
}

impl JobCondition {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a callback for state changes, replacing any previous one.
    pub fn set_observer(&self, observer: PhaseObserver) {
        *self.observer.write() = Some(observer);
    }

    pub fn state(&self, phase: Phase) -> PhaseState {
        self.slots.lock()[phase.slot()].state
    }

    /// States of all phases in lifecycle order.
    pub fn snapshot(&self) -> Vec<(Phase, PhaseState)> {
        let slots = *self.slots.lock();
        Phase::ALL
            .iter()
            .map(|&phase| (phase, slots[phase.slot()].state))
            .collect()
    }

    /// False while Initialise, Test or Process is processing.
    pub fn safe_to_initialise(&self) -> bool {
        Self::initialisable(&self.slots.lock())
    }

    /// Test succeeded and Process is not already running.
    pub fn safe_to_run(&self) -> bool {
        Self::runnable(&self.slots.lock())
    }

    /// Reset every phase to [`PhaseState::NotStarted`].
    ///
    /// Scopes issued before the clear become stale and no longer resolve
    /// their phase.
    pub fn clear(&self) {
        {
            let mut slots = self.slots.lock();
            for slot in slots.iter_mut() {
                slot.state = PhaseState::NotStarted;
                slot.epoch += 1;
            }
        }
        for phase in Phase::ALL {
            self.notify(phase, PhaseState::NotStarted);
        }
    }

    /// Enter `phase`.
    ///
    /// # Errors
    ///
    /// [`Error::InvalidTransition`] unless the phase is not started or failed.
    pub fn enter(self: &Arc<Self>, phase: Phase) -> Result<PhaseScope> {
        let scope = {
            let mut slots = self.slots.lock();
            self.enter_locked(&mut slots, phase)?
        };
        self.notify(phase, PhaseState::Processing);
        Ok(scope)
    }

    /// Atomically check [`safe_to_initialise`](Self::safe_to_initialise),
    /// clear the condition and enter Initialise.
    ///
    /// Returns `None` when an initialisation, test or run is in flight. A
    /// running Process is never cleared out from under its scope.
    pub fn begin_initialise(self: &Arc<Self>) -> Option<PhaseScope> {
        let scope = {
            let mut slots = self.slots.lock();
            if !Self::initialisable(&slots) {
                return None;
            }
            for slot in slots.iter_mut() {
                slot.state = PhaseState::NotStarted;
                slot.epoch += 1;
            }
            // Every slot is NotStarted here, so entry cannot be refused.
            self.enter_locked(&mut slots, Phase::Initialise).ok()?
        };
        for phase in Phase::ALL {
            let state = if phase == Phase::Initialise {
                PhaseState::Processing
            } else {
                PhaseState::NotStarted
            };
            self.notify(phase, state);
        }
        Some(scope)
    }

    /// Atomically decide whether a run can start now.
    ///
    /// Requires [`safe_to_run`](Self::safe_to_run) and a loaded work list.
    /// While media info is still loading, `auto_run` is set under the same
    /// lock the loader resolves its phase with, so the loader cannot miss it.
    ///
    /// # Errors
    ///
    /// [`Error::InvalidTransition`] if Process already succeeded for this
    /// initialisation.
    pub fn begin_process(self: &Arc<Self>, auto_run: &AtomicBool) -> Result<ProcessStart> {
        let scope = {
            let mut slots = self.slots.lock();
            let load = slots[Phase::LoadMediaInfo.slot()].state;
            if Self::runnable(&slots) && load == PhaseState::Succeeded {
                auto_run.store(false, Ordering::SeqCst);
                self.enter_locked(&mut slots, Phase::Process)?
            } else if load == PhaseState::Processing {
                auto_run.store(true, Ordering::SeqCst);
                return Ok(ProcessStart::Deferred);
            } else {
                return Ok(ProcessStart::NotReady);
            }
        };
        self.notify(Phase::Process, PhaseState::Processing);
        Ok(ProcessStart::Started(scope))
    }

    fn initialisable(slots: &[Slot; 5]) -> bool {
        [Phase::Initialise, Phase::Test, Phase::Process]
            .iter()
            .all(|phase| slots[phase.slot()].state != PhaseState::Processing)
    }

    fn runnable(slots: &[Slot; 5]) -> bool {
        slots[Phase::Test.slot()].state == PhaseState::Succeeded
            && slots[Phase::Process.slot()].state != PhaseState::Processing
    }

    fn enter_locked(self: &Arc<Self>, slots: &mut [Slot; 5], phase: Phase) -> Result<PhaseScope> {
        let slot = &mut slots[phase.slot()];
        match slot.state {
            PhaseState::NotStarted | PhaseState::Failed => {
                slot.state = PhaseState::Processing;
                slot.epoch += 1;
                Ok(PhaseScope {
                    condition: Arc::clone(self),
                    phase,
                    epoch: slot.epoch,
                    resolved: false,
                })
            }
            from => Err(Error::InvalidTransition {
                phase: phase.to_string(),
                from: from.to_string(),
            }),
        }
    }

    /// Resolve a phase if the scope is still current.
    fn resolve(&self, phase: Phase, epoch: u64, state: PhaseState) -> Result<()> {
        {
            let mut slots = self.slots.lock();
            let slot = &mut slots[phase.slot()];
            if slot.epoch != epoch || slot.state != PhaseState::Processing {
                return Err(Error::InvalidTransition {
                    phase: phase.to_string(),
                    from: if slot.epoch != epoch {
                        "a cleared condition".to_string()
                    } else {
                        slot.state.to_string()
                    },
                });
            }
            slot.state = state;
        }
        self.notify(phase, state);
        Ok(())
    }

    fn notify(&self, phase: Phase, state: PhaseState) {
        let observer = self.observer.read().clone();
        if let Some(observer) = observer {
            observer(phase, state);
        }
    }
}

impl fmt::Debug for JobCondition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut map = f.debug_map();
        for (phase, state) in self.snapshot() {
            map.entry(&phase, &state);
        }
        map.finish()
    }
}

/// An entered phase. Resolves to failed on drop unless
/// [`succeed`](Self::succeed) was called.
#[must_use = "dropping a phase scope fails the phase"]
pub struct PhaseScope {
    condition: Arc<JobCondition>,
    phase: Phase,
    epoch: u64,
    resolved: bool,
}

impl PhaseScope {
    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// Resolve the phase: `true` marks it succeeded, `false` marks it as an
    /// explicit non-success.
    ///
    /// # Errors
    ///
    /// [`Error::InvalidTransition`] if the condition was cleared or the phase
    /// was otherwise resolved since this scope entered it.
    pub fn succeed(mut self, ok: bool) -> Result<()> {
        self.resolved = true;
        let state = if ok {
            PhaseState::Succeeded
        } else {
            PhaseState::Failed
        };
        self.condition.resolve(self.phase, self.epoch, state)
    }
}

impl Drop for PhaseScope {
    fn drop(&mut self) {
        if self.resolved {
            return;
        }
        if self
            .condition
            .resolve(self.phase, self.epoch, PhaseState::Failed)
            .is_ok()
        {
            tracing::debug!(phase = %self.phase, "phase scope ended without success");
        }
    }
}

impl fmt::Debug for PhaseScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PhaseScope")
            .field("phase", &self.phase)
            .field("epoch", &self.epoch)
            .finish()
    }
}
