//! Log Module
//!
//! In-memory, append-only log with per-entry write-concern counters.

pub mod entry;
mod store;

pub use entry::{LogEntry, LogId};
pub use store::LogStore;
