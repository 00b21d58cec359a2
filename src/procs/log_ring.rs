//! Bounded log ring.
//!
//! Fixed-capacity, overwrite-oldest buffer for process output lines. The
//! ring never holds more than its configured capacity: pushing to a full
//! ring evicts the oldest entry first.

use std::collections::VecDeque;

use crate::models::process::LogEntry;

/// Fixed-capacity ring of [`LogEntry`] values in arrival order.
#[derive(Debug)]
pub struct LogRing {
    entries: VecDeque<LogEntry>,
    capacity: usize,
}

impl LogRing {
    /// Create an empty ring.
    ///
    /// # Panics
    ///
    /// Panics if `capacity` is zero; configuration validation rejects a
    /// zero capacity before a ring is ever built.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "log ring capacity must be non-zero");
        Self {
            entries: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Append an entry, evicting the oldest when full.
    pub fn push(&mut self, entry: LogEntry) {
        if self.entries.len() == self.capacity {
            self.entries.pop_front();
        }
        self.entries.push_back(entry);
    }

    /// The retained entries, oldest first.
    #[must_use]
    pub fn to_vec(&self) -> Vec<LogEntry> {
        self.entries.iter().cloned().collect()
    }

    /// Number of retained entries; never exceeds the capacity.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the ring holds no entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Configured capacity.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Drop all retained entries, keeping the capacity.
    pub fn clear(&mut self) {
        self.entries.clear();
    }
}
