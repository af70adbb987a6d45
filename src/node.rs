//! Replica Node
//!
//! Shared per-node state ([`NodeContext`]) and the process-level node that
//! owns the listener and the runtime ([`ReplicaNode`]).

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tokio::task::JoinHandle;

use crate::config::{NodeConfig, NodeRole, NodeTopology};
use crate::error::{Error, Result};
use crate::log::{LogEntry, LogId, LogStore};
use crate::network::ListenerService;
use crate::replication::{self, Jitter, PendingReplication, ReplicationClient};

/// State shared by every connection and replication task of one node
#[derive(Debug)]
pub struct NodeContext {
    topology: NodeTopology,
    store: Arc<LogStore>,
    jitter: Jitter,
    connect_timeout: Duration,
    io_timeout: Duration,
}

impl NodeContext {
    /// Create a context with an empty log
    pub fn new(config: NodeConfig) -> Self {
        Self {
            jitter: Jitter::new(config.jitter),
            topology: config.topology,
            store: Arc::new(LogStore::new()),
            connect_timeout: config.connect_timeout,
            io_timeout: config.io_timeout,
        }
    }

    pub fn topology(&self) -> &NodeTopology {
        &self.topology
    }

    pub fn store(&self) -> &Arc<LogStore> {
        &self.store
    }

    /// Per-stage deadline for inbound reads and writes
    pub fn io_timeout(&self) -> Duration {
        self.io_timeout
    }

    /// Append a client write on the root and launch its replication.
    ///
    /// The entry is stored before any replication starts, so the returned
    /// handles only ever raise its acknowledgment count.
    pub fn add_log(&self, data: String, write_concern: usize) -> (LogId, Vec<JoinHandle<()>>) {
        let payload = Bytes::from(data.clone());
        let id = self.store.append_with_concern(data, write_concern);

        let handles = replication::targets(self.topology.secondaries(), write_concern)
            .iter()
            .map(|target| {
                let pending = PendingReplication {
                    entry_id: id,
                    target: target.clone(),
                };
                ReplicationClient::new(pending, payload.clone(), Arc::clone(&self.store))
                    .with_timeouts(self.connect_timeout, self.io_timeout)
                    .spawn()
            })
            .collect();

        (id, handles)
    }

    /// Store an entry replicated from the root, after the jitter delay
    pub async fn add_replicated(&self, data: String) -> LogId {
        let delay = self.jitter.wait().await;
        let id = self.store.append(data);
        tracing::trace!(id, delay_ms = delay.as_millis() as u64, "Stored replicated entry");
        id
    }

    /// Point-in-time copy of the whole log
    pub fn read_logs(&self) -> Vec<LogEntry> {
        self.store.snapshot()
    }
}

/// A bound node, ready to serve
pub struct ReplicaNode {
    context: Arc<NodeContext>,
    listener: ListenerService,
}

impl ReplicaNode {
    /// Validate `config` and bind its listen address
    pub async fn bind(config: NodeConfig) -> Result<Self> {
        config.validate()?;
        let listener = ListenerService::bind(config.topology.listen).await?;
        Ok(Self::with_listener(config, listener))
    }

    /// Build a node around an already bound listener
    pub fn with_listener(mut config: NodeConfig, listener: ListenerService) -> Self {
        config.topology.listen = listener.local_addr();
        Self {
            context: Arc::new(NodeContext::new(config)),
            listener,
        }
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.listener.local_addr()
    }

    pub fn context(&self) -> &Arc<NodeContext> {
        &self.context
    }

    /// Serve until `shutdown` resolves
    pub async fn serve_until<F>(self, shutdown: F)
    where
        F: Future<Output = ()> + Send,
    {
        let topology = self.context.topology();
        match &topology.role {
            NodeRole::Root { secondaries } => tracing::info!(
                "Starting as ROOT on {} with {} secondaries",
                self.listener.local_addr(),
                secondaries.len()
            ),
            NodeRole::Secondary { root } => tracing::info!(
                "Starting as NODE on {} replicating from {}",
                self.listener.local_addr(),
                root
            ),
        }

        self.listener.run_until(self.context, shutdown).await;
    }

    /// Serve until Ctrl-C
    pub async fn serve(self) {
        self.serve_until(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!("Failed to listen for shutdown signal: {}", e);
                std::future::pending::<()>().await;
            }
            tracing::info!("Received shutdown signal");
        })
        .await;
    }

    /// Build a runtime with `worker_count` threads, bind, and serve until Ctrl-C.
    ///
    /// Returns once the node has shut down, or with the startup error.
    pub fn run_blocking(config: NodeConfig) -> Result<()> {
        config.validate()?;

        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(config.topology.worker_count)
            .enable_all()
            .build()
            .map_err(|e| Error::Config(format!("failed to build runtime: {}", e)))?;

        runtime.block_on(async move {
            let node = Self::bind(config).await?;
            node.serve().await;
            tracing::info!("Replico shutdown complete");
            Ok(())
        })
    }
}
