//! Log Entry Types

use std::fmt;

/// Dense, zero-based position of an entry in its store
pub type LogId = usize;

/// A single stored log record
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogEntry {
    /// Opaque payload, never modified after append
    data: String,
    /// Number of secondaries the client asked to acknowledge this entry
    expected_write_concern: usize,
    /// Local write (root only) plus one per acknowledging secondary
    actual_write_concern: usize,
}

impl LogEntry {
    /// Entry written on the root: the local write counts as the first acknowledgment
    pub fn with_write_concern(data: String, expected_write_concern: usize) -> Self {
        Self {
            data,
            expected_write_concern,
            actual_write_concern: 1,
        }
    }

    /// Entry written on a secondary, without write-concern tracking
    pub fn replicated(data: String) -> Self {
        Self {
            data,
            expected_write_concern: 0,
            actual_write_concern: 0,
        }
    }

    pub fn data(&self) -> &str {
        &self.data
    }

    pub fn expected_write_concern(&self) -> usize {
        self.expected_write_concern
    }

    pub fn actual_write_concern(&self) -> usize {
        self.actual_write_concern
    }

    pub(super) fn acknowledge(&mut self) -> usize {
        self.actual_write_concern += 1;
        self.actual_write_concern
    }

    /// Line rendered by the root's `/getlog`: `<data> [<actual>/<expected>]`
    pub fn with_concern(&self) -> WithConcern<'_> {
        WithConcern(self)
    }
}

/// Display adapter for the root's rendering of an entry
pub struct WithConcern<'a>(&'a LogEntry);

impl fmt::Display for WithConcern<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} [{}/{}]",
            self.0.data, self.0.actual_write_concern, self.0.expected_write_concern
        )
    }
}

impl fmt::Display for LogEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.data)
    }
}
