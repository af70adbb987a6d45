//! Listener Service
//!
//! Accepts inbound TCP connections and hands each one to its own
//! [`ConnectionSession`] task.

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::{TcpListener, TcpSocket};

use super::session::ConnectionSession;
use crate::error::{Error, Result, Stage};
use crate::node::NodeContext;

const BACKLOG: u32 = 1024;

/// Bound listening socket of a node
pub struct ListenerService {
    listener: TcpListener,
    local_addr: SocketAddr,
}

impl ListenerService {
    /// Bind `address` with address reuse enabled and start listening.
    ///
    /// Any failure here is a startup error.
    pub async fn bind(address: SocketAddr) -> Result<Self> {
        let bind_error = |e: std::io::Error| Error::Bind {
            address: address.to_string(),
            reason: e.to_string(),
        };

        let socket = if address.is_ipv4() {
            TcpSocket::new_v4()
        } else {
            TcpSocket::new_v6()
        }
        .map_err(bind_error)?;

        socket.set_reuseaddr(true).map_err(bind_error)?;
        socket.bind(address).map_err(bind_error)?;
        let listener = socket.listen(BACKLOG).map_err(bind_error)?;
        let local_addr = listener.local_addr().map_err(bind_error)?;

        tracing::info!("Listening on {}", local_addr);
        Ok(Self {
            listener,
            local_addr,
        })
    }

    /// Address actually bound, with the real port when `0` was requested
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Accept connections until `shutdown` resolves.
    ///
    /// Accept failures are logged and do not stop the loop.
    pub async fn run_until<F>(self, node: Arc<NodeContext>, shutdown: F)
    where
        F: Future<Output = ()> + Send,
    {
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    tracing::info!("Listener on {} stopped", self.local_addr);
                    break;
                }
                result = self.listener.accept() => {
                    match result {
                        Ok((stream, peer)) => {
                            tracing::trace!("Accepted connection from {}", peer);
                            ConnectionSession::new(stream, peer, Arc::clone(&node)).spawn();
                        }
                        Err(e) => {
                            tracing::warn!(stage = Stage::Accept.as_str(), "Accept error: {}", e);
                        }
                    }
                }
            }
        }
    }
}
