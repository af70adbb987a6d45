//! Replication Client
//!
//! One-shot outbound session that delivers a single log entry to a single
//! secondary and records the acknowledgment on the root's store.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use hyper::header::{CONNECTION, HOST, USER_AGENT};
use hyper::{Method, Request, StatusCode};
use hyper_util::rt::TokioIo;
use tokio::net::TcpStream;
use tokio::task::JoinHandle;
use tokio::time::timeout;

use crate::api::{ADDLOG_TARGET, SERVER_NAME};
use crate::config::{Endpoint, DEFAULT_CONNECT_TIMEOUT, DEFAULT_IO_TIMEOUT};
use crate::error::{Error, Result, Stage};
use crate::log::{LogId, LogStore};

/// An in-flight replication of one entry to one secondary
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingReplication {
    /// Root-side id whose counter is incremented on success
    pub entry_id: LogId,
    /// Secondary receiving the entry
    pub target: Endpoint,
}

/// Outbound replication session.
///
/// resolve -> connect -> `POST /addlog` -> read response -> acknowledge.
/// Any failure ends the session without retry, leaving the entry's
/// write-concern counter where it was.
pub struct ReplicationClient {
    pending: PendingReplication,
    payload: Bytes,
    store: Arc<LogStore>,
    connect_timeout: Duration,
    io_timeout: Duration,
}

impl ReplicationClient {
    /// Create a client with default timeouts
    pub fn new(pending: PendingReplication, payload: Bytes, store: Arc<LogStore>) -> Self {
        Self {
            pending,
            payload,
            store,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            io_timeout: DEFAULT_IO_TIMEOUT,
        }
    }

    /// Override the connect and round-trip timeouts
    pub fn with_timeouts(mut self, connect: Duration, io: Duration) -> Self {
        self.connect_timeout = connect;
        self.io_timeout = io;
        self
    }

    /// Run the session on its own task, logging the outcome
    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(async move {
            let PendingReplication { entry_id, target } = self.pending.clone();
            match self.run().await {
                Ok(acks) => {
                    tracing::debug!(entry_id, %target, acks, "Replication acknowledged");
                }
                Err(e) => {
                    let stage = e.stage().map(|s| s.as_str()).unwrap_or("ack");
                    tracing::warn!(entry_id, %target, stage, "Replication failed: {}", e);
                }
            }
        })
    }

    /// Deliver the entry and, on a successful response, bump its write concern.
    ///
    /// Returns the entry's new acknowledgment count.
    pub async fn run(self) -> Result<usize> {
        let addrs = self.resolve().await?;
        let stream = self.connect(&addrs).await?;

        let address = self.pending.target.to_string();
        let status = match timeout(self.io_timeout, self.exchange(stream)).await {
            Ok(result) => result?,
            Err(_) => return Err(Error::timeout(Stage::Read, address)),
        };

        if !status.is_success() {
            return Err(Error::Rejected {
                address,
                status: status.as_u16(),
            });
        }

        self.store.increment_ack(self.pending.entry_id)
    }

    /// Look up the target's addresses
    async fn resolve(&self) -> Result<Vec<SocketAddr>> {
        let target = &self.pending.target;
        let lookup = tokio::net::lookup_host((target.host.as_str(), target.port));

        let addrs: Vec<SocketAddr> = match timeout(self.connect_timeout, lookup).await {
            Ok(Ok(addrs)) => addrs.collect(),
            Ok(Err(e)) => return Err(Error::transport(Stage::Resolve, target.to_string(), e)),
            Err(_) => return Err(Error::timeout(Stage::Resolve, target.to_string())),
        };

        if addrs.is_empty() {
            return Err(Error::transport(
                Stage::Resolve,
                target.to_string(),
                "no addresses found",
            ));
        }

        Ok(addrs)
    }

    /// Connect to the first reachable address
    async fn connect(&self, addrs: &[SocketAddr]) -> Result<TcpStream> {
        let target = self.pending.target.to_string();

        let attempt = async {
            let mut last_error = None;
            for addr in addrs {
                match TcpStream::connect(addr).await {
                    Ok(stream) => return Ok(stream),
                    Err(e) => {
                        tracing::trace!("Connect to {} failed: {}", addr, e);
                        last_error = Some(e);
                    }
                }
            }
            Err(last_error)
        };

        match timeout(self.connect_timeout, attempt).await {
            Ok(Ok(stream)) => {
                if let Err(e) = stream.set_nodelay(true) {
                    tracing::trace!("Failed to set TCP_NODELAY for {}: {}", target, e);
                }
                Ok(stream)
            }
            Ok(Err(Some(e))) => Err(Error::transport(Stage::Connect, target, e)),
            Ok(Err(None)) => Err(Error::transport(Stage::Connect, target, "no addresses")),
            Err(_) => Err(Error::timeout(Stage::Connect, target)),
        }
    }

    /// Send the entry and read the full response
    async fn exchange(&self, stream: TcpStream) -> Result<StatusCode> {
        let target = &self.pending.target;
        let address = target.to_string();

        let (mut sender, connection) =
            hyper::client::conn::http1::handshake(TokioIo::new(stream))
                .await
                .map_err(|e| Error::transport(Stage::Write, &address, e))?;

        let driver = tokio::spawn(async move {
            if let Err(e) = connection.await {
                tracing::trace!("Replication connection ended: {}", e);
            }
        });

        let request = Request::builder()
            .method(Method::POST)
            .uri(ADDLOG_TARGET)
            .header(HOST, target.authority())
            .header(USER_AGENT, SERVER_NAME)
            .header(CONNECTION, "close")
            .body(Full::new(self.payload.clone()))
            .map_err(|e| Error::transport(Stage::Write, &address, e))?;

        let result: Result<StatusCode> = async {
            let response = sender
                .send_request(request)
                .await
                .map_err(|e| Error::transport(Stage::of_http(&e), &address, e))?;

            let status = response.status();
            response
                .into_body()
                .collect()
                .await
                .map_err(|e| Error::transport(Stage::Read, &address, e))?;

            Ok(status)
        }
        .await;

        // Done with the connection either way
        drop(sender);
        driver.abort();

        result
    }
}
