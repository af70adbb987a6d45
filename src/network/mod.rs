//! Network Module
//!
//! Inbound side of a node: the listening socket and the per-connection
//! HTTP sessions it spawns.

mod listener;
mod session;
mod timed;

pub use listener::ListenerService;
pub use session::ConnectionSession;
pub use timed::{DeadlineControl, StageTimeout, SuspendedReads, TimedStream};
