//! Replico - Minimal Root/Secondary Log Replication
//!
//! An in-memory, append-only log replicated from a single root node to a
//! fixed set of secondaries over plain HTTP/1.1.
//!
//! # Architecture
//!
//! The root accepts client writes on `POST /addlog`, stores them, and
//! pushes each entry to as many secondaries as the client's write concern
//! asks for. Every successful secondary response bumps the entry's
//! acknowledgment counter. Secondaries accept writes only from the root
//! and store them after a random delay. Both roles serve `GET /getlog`.
//!
//! # Features
//!
//! - Per-entry write-concern tracking (`[actual/expected]`)
//! - Fire-and-forget replication, one attempt per target
//! - Keep-alive HTTP/1.1 sessions with per-stage timeouts
//! - Configurable runtime worker count

pub mod api;
pub mod config;
pub mod error;
pub mod log;
pub mod network;
pub mod node;
pub mod replication;

pub use config::{NodeConfig, NodeTopology};
pub use error::{Error, Result};
pub use node::{NodeContext, ReplicaNode};

/// Re-export commonly used types
pub mod prelude {
    pub use crate::config::{Endpoint, JitterConfig, NodeConfig, NodeRole, NodeTopology};
    pub use crate::error::{Error, Result};
    pub use crate::log::{LogEntry, LogId, LogStore};
    pub use crate::node::{NodeContext, ReplicaNode};
    pub use crate::replication::ReplicationClient;
}
