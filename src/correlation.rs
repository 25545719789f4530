//! Pending secure-mode entries awaiting their stack walk
//!
//! Entries are keyed by the transition's raw timestamp, which the stack-walk
//! provider echoes back in its payload. An entry lives until a stack walk with
//! the same timestamp consumes it; entries that never match stay for the rest
//! of the session.

use std::collections::HashMap;

/// A secure-mode entry waiting for its call stack
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PendingEntry {
    pub timestamp: i64,
    pub process_id: u32,
    pub thread_id: u32,
    pub call_number: u16,
}

/// Join table between transition records and stack-walk records
#[derive(Debug, Default)]
pub struct CorrelationStore {
    pending: HashMap<i64, PendingEntry>,
}

impl CorrelationStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a pending entry keyed by `timestamp`
    ///
    /// Timestamps are assumed unique per tick. If two entries share one, the
    /// later entry replaces the earlier and the displaced entry is returned so
    /// the caller can account for the collision.
    pub fn record_entry(
        &mut self,
        timestamp: i64,
        process_id: u32,
        thread_id: u32,
        call_number: u16,
    ) -> Option<PendingEntry> {
        self.pending.insert(
            timestamp,
            PendingEntry {
                timestamp,
                process_id,
                thread_id,
                call_number,
            },
        )
    }

    /// Remove and return the entry for `timestamp` in one step
    pub fn take_matching(&mut self, timestamp: i64) -> Option<PendingEntry> {
        self.pending.remove(&timestamp)
    }

    /// Number of entries still waiting for a stack walk
    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}
