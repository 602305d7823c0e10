//! Progress and status notifications.
//!
//! Jobs report phase changes, initialisation progress, per-item encode
//! progress, auto-tune trials and log lines through an [`EventBus`]. Emitting
//! never fails the caller, whether or not anyone is subscribed.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::broadcast;

use crate::ids::WorkItemId;

/// Events retained for late listeners.
pub const RECENT_EVENTS: usize = 100;

// ---------------------------------------------------------------------------
// EventPayload
// ---------------------------------------------------------------------------

/// Payload describing what happened.
///
/// Jobs are referred to by name because a job only receives its identifier
/// on its first successful initialisation.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EventPayload {
    // -- Application ---------------------------------------------------------
    Status {
        message: String,
    },

    // -- Job lifecycle -------------------------------------------------------
    PhaseChanged {
        job: String,
        phase: String,
        state: String,
    },
    InitialisationProgress {
        job: String,
        progress: f32,
    },
    JobLog {
        job: String,
        level: String,
        message: String,
    },

    // -- Work items ----------------------------------------------------------
    WorkItemProgress {
        job: String,
        item: WorkItemId,
        progress: f32,
        step: String,
    },
    AutoTuneTrial {
        source: String,
        option: String,
        value: String,
        size: Option<u64>,
        similarity: Option<f64>,
    },
}

/// One broadcast notification.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    /// Position in the bus's emission order, starting at 1.
    pub seq: u64,
    pub timestamp: DateTime<Utc>,
    pub payload: EventPayload,
}

/// The notification collaborator shared by every job.
///
/// Holds the last [`RECENT_EVENTS`] events so a listener that attaches late
/// can render current state before following the live stream.
pub struct EventBus {
    tx: broadcast::Sender<Event>,
    next_seq: AtomicU64,
    recent: Mutex<VecDeque<Event>>,
}

impl EventBus {
    /// `capacity` bounds how far a slow subscriber may lag before it starts
    /// missing events.
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self {
            tx,
            next_seq: AtomicU64::new(1),
            recent: Mutex::new(VecDeque::with_capacity(RECENT_EVENTS)),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.tx.subscribe()
    }

    pub fn broadcast(&self, payload: EventPayload) {
        let event = Event {
            seq: self.next_seq.fetch_add(1, Ordering::Relaxed),
            timestamp: Utc::now(),
            payload,
        };

        let mut recent = self.recent.lock();
        if recent.len() == RECENT_EVENTS {
            recent.pop_front();
        }
        recent.push_back(event.clone());
        drop(recent);

        // Err only means nobody is listening.
        let _ = self.tx.send(event);
    }

    /// Broadcast a free-form status line.
    pub fn status(&self, message: impl Into<String>) {
        self.broadcast(EventPayload::Status {
            message: message.into(),
        });
    }

    /// Up to `n` retained events, newest first.
    pub fn recent_events(&self, n: usize) -> Vec<Event> {
        self.recent.lock().iter().rev().take(n).cloned().collect()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("subscribers", &self.tx.receiver_count())
            .field("emitted", &(self.next_seq.load(Ordering::Relaxed) - 1))
            .finish()
    }
}
