//! In-memory log of delivered private messages.
//!
//! The log is a debug aid exposed over HTTP, not a store. It is capped and
//! evicts the oldest entries first.

use courier_protocol::Identity;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

/// Default maximum number of retained entries.
pub const DEFAULT_LOG_CAPACITY: usize = 10_000;

/// A delivered private message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageLogEntry {
    pub from: Identity,
    pub to: Identity,
    pub message: String,
}

impl MessageLogEntry {
    /// Create a new log entry.
    #[must_use]
    pub fn new(
        from: impl Into<Identity>,
        to: impl Into<Identity>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            from: from.into(),
            to: to.into(),
            message: message.into(),
        }
    }
}

/// Append-only message log with oldest-first eviction.
#[derive(Debug)]
pub struct MessageLog {
    entries: VecDeque<MessageLogEntry>,
    /// Maximum retained entries, `0` for unbounded.
    capacity: usize,
    evicted: u64,
}

impl MessageLog {
    /// Create a log retaining at most `capacity` entries (`0` = unbounded).
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            entries: VecDeque::new(),
            capacity,
            evicted: 0,
        }
    }

    /// Append an entry, returning the evicted entry if the log was full.
    pub fn push(&mut self, entry: MessageLogEntry) -> Option<MessageLogEntry> {
        let evicted = if self.capacity > 0 && self.entries.len() >= self.capacity {
            self.evicted += 1;
            self.entries.pop_front()
        } else {
            None
        };
        self.entries.push_back(entry);
        evicted
    }

    /// Snapshot of retained entries, oldest first.
    #[must_use]
    pub fn entries(&self) -> Vec<MessageLogEntry> {
        self.entries.iter().cloned().collect()
    }

    /// Number of retained entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Total entries evicted since creation.
    #[must_use]
    pub fn evicted(&self) -> u64 {
        self.evicted
    }
}

impl Default for MessageLog {
    fn default() -> Self {
        Self::with_capacity(DEFAULT_LOG_CAPACITY)
    }
}
