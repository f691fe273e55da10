use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard};
use tracing::debug;

/// Default number of errors kept before the oldest are dropped
pub const DEFAULT_JOURNAL_CAPACITY: usize = 500;

/// Component an error was reported by
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorSource {
    Task,
    Hook,
    Batch,
    Probe,
    Persistence,
    Recovery,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordedError {
    pub source: ErrorSource,
    pub message: String,
    pub recorded_at: DateTime<Utc>,
}

/// Bounded record of errors accumulated since the last successful remediation
pub struct ErrorJournal {
    capacity: usize,
    entries: Mutex<VecDeque<RecordedError>>,
}

impl ErrorJournal {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            entries: Mutex::new(VecDeque::new()),
        }
    }

    fn entries(&self) -> MutexGuard<'_, VecDeque<RecordedError>> {
        self.entries.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn record(&self, source: ErrorSource, message: impl Into<String>) {
        let message = message.into();
        debug!("Recording {:?} error: {}", source, message);

        let mut entries = self.entries();
        entries.push_back(RecordedError {
            source,
            message,
            recorded_at: Utc::now(),
        });
        while entries.len() > self.capacity {
            entries.pop_front();
        }
    }

    pub fn len(&self) -> usize {
        self.entries().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries().is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Oldest first
    pub fn snapshot(&self) -> Vec<RecordedError> {
        self.entries().iter().cloned().collect()
    }

    pub fn messages(&self) -> Vec<String> {
        self.entries().iter().map(|entry| entry.message.clone()).collect()
    }

    /// Drop every entry, returning how many there were
    pub fn clear(&self) -> usize {
        let mut entries = self.entries();
        let cleared = entries.len();
        entries.clear();
        cleared
    }
}

impl Default for ErrorJournal {
    fn default() -> Self {
        Self::new(DEFAULT_JOURNAL_CAPACITY)
    }
}

impl std::fmt::Debug for ErrorJournal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ErrorJournal")
            .field("capacity", &self.capacity)
            .field("len", &self.len())
            .finish()
    }
}
