//! Replication Module
//!
//! Fan-out of accepted root writes to secondaries.
//!
//! Each targeted secondary gets its own [`ReplicationClient`]: at most one
//! attempt per target, no retry, and no ordering between targets.

mod client;
mod jitter;

pub use client::{PendingReplication, ReplicationClient};
pub use jitter::Jitter;

use crate::config::Endpoint;

/// Secondaries that receive an entry written with `write_concern`.
///
/// The first `min(write_concern, secondaries.len())`, in configured order.
pub fn targets(secondaries: &[Endpoint], write_concern: usize) -> &[Endpoint] {
    &secondaries[..write_concern.min(secondaries.len())]
}

#[cfg(test)]
mod tests {
    use super::*;

    fn endpoints(n: u16) -> Vec<Endpoint> {
        (0..n)
            .map(|i| Endpoint {
                host: "127.0.0.1".into(),
                port: 9000 + i,
            })
            .collect()
    }

    #[test]
    fn test_targets_follow_configured_order() {
        let secondaries = endpoints(3);
        assert!(targets(&secondaries, 0).is_empty());
        assert_eq!(targets(&secondaries, 2), &secondaries[..2]);
        assert_eq!(targets(&secondaries, 2)[0].port, 9000);
    }

    #[test]
    fn test_targets_capped_by_cluster_size() {
        let secondaries = endpoints(2);
        assert_eq!(targets(&secondaries, 10).len(), 2);
        assert!(targets(&[], 5).is_empty());
    }
}
