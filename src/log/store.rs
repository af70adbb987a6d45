//! Thread-safe log store shared by the dispatcher and replication clients.

use parking_lot::Mutex;

use super::entry::{LogEntry, LogId};
use crate::error::{Error, Result};

/// Ordered, append-only collection of log entries.
///
/// Every operation takes the single lock for the duration of the mutation
/// or copy only; nothing here performs I/O.
#[derive(Debug, Default)]
pub struct LogStore {
    entries: Mutex<Vec<LogEntry>>,
}

impl LogStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a replicated entry (secondary path)
    pub fn append(&self, data: String) -> LogId {
        self.push(LogEntry::replicated(data))
    }

    /// Append an entry that expects `expected_write_concern` secondary acknowledgments (root path)
    pub fn append_with_concern(&self, data: String, expected_write_concern: usize) -> LogId {
        self.push(LogEntry::with_write_concern(data, expected_write_concern))
    }

    fn push(&self, entry: LogEntry) -> LogId {
        let mut entries = self.entries.lock();
        let id = entries.len();
        entries.push(entry);
        id
    }

    /// Record one secondary acknowledgment for `id`, returning the new count.
    ///
    /// `id` must come from a prior append on this store.
    pub fn increment_ack(&self, id: LogId) -> Result<usize> {
        let mut entries = self.entries.lock();
        entries
            .get_mut(id)
            .map(LogEntry::acknowledge)
            .ok_or(Error::UnknownEntry(id))
    }

    /// Point-in-time copy of all entries, in append order
    pub fn snapshot(&self) -> Vec<LogEntry> {
        self.entries.lock().clone()
    }

    /// Copy of a single entry
    pub fn get(&self, id: LogId) -> Option<LogEntry> {
        self.entries.lock().get(id).cloned()
    }

    /// Number of stored entries
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
