//! Per-job log.
//!
//! Each job keeps a bounded ring of timestamped entries for display. Every
//! entry is mirrored to `tracing` with the job name attached.

use std::collections::VecDeque;
use std::fmt;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

/// Default number of entries retained.
pub const DEFAULT_LOG_CAPACITY: usize = 500;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Debug => write!(f, "debug"),
            Self::Info => write!(f, "info"),
            Self::Warn => write!(f, "warn"),
            Self::Error => write!(f, "error"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogEntry {
    pub timestamp: DateTime<Utc>,
    pub level: LogLevel,
    pub message: String,
}

/// Bounded, thread-safe job log.
#[derive(Debug)]
pub struct JobLog {
    job: String,
    capacity: usize,
    entries: Mutex<VecDeque<LogEntry>>,
}

impl JobLog {
    pub fn new(job: &str, capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            job: job.to_string(),
            capacity,
            entries: Mutex::new(VecDeque::with_capacity(capacity.min(64))),
        }
    }

    /// Append an entry, dropping the oldest one when full.
    pub fn push(&self, level: LogLevel, message: impl Into<String>) -> LogEntry {
        let entry = LogEntry {
            timestamp: Utc::now(),
            level,
            message: message.into(),
        };

        match level {
            LogLevel::Debug => tracing::debug!(job = %self.job, "{}", entry.message),
            LogLevel::Info => tracing::info!(job = %self.job, "{}", entry.message),
            LogLevel::Warn => tracing::warn!(job = %self.job, "{}", entry.message),
            LogLevel::Error => tracing::error!(job = %self.job, "{}", entry.message),
        }

        let mut entries = self.entries.lock();
        if entries.len() >= self.capacity {
            entries.pop_front();
        }
        entries.push_back(entry.clone());
        entry
    }

    /// All retained entries, oldest first.
    pub fn entries(&self) -> Vec<LogEntry> {
        self.entries.lock().iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}
