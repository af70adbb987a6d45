//! Inbound connection session.
//!
//! One session per accepted socket, serving any number of sequential
//! requests:
//!
//! ```text
//! AwaitRequest -> Dispatch -> WriteResponse -> AwaitRequest (keep-alive)
//!                                           -> Closed       (Connection: close)
//! ```
//!
//! HTTP/1 framing and keep-alive negotiation come from hyper; the idle and
//! write deadlines come from [`TimedStream`]. The read deadline is suspended
//! while a request is dispatched, so a slow dispatch (the secondary's
//! replication delay) never aborts the connection. Requests on one
//! connection are handled strictly in order.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use hyper::body::Incoming;
use hyper::header::{HeaderValue, CONTENT_TYPE, SERVER};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Request, Response};
use hyper_util::rt::TokioIo;
use tokio::net::TcpStream;
use tokio::task::JoinHandle;

use super::timed::{DeadlineControl, StageTimeout, TimedStream};
use crate::api::{dispatch, InboundRequest, Reply, SERVER_NAME};
use crate::error::{Error, Result, Stage};
use crate::node::NodeContext;

/// A single accepted connection and the node it serves
pub struct ConnectionSession {
    stream: TcpStream,
    peer: SocketAddr,
    node: Arc<NodeContext>,
}

impl ConnectionSession {
    pub fn new(stream: TcpStream, peer: SocketAddr, node: Arc<NodeContext>) -> Self {
        Self { stream, peer, node }
    }

    /// Run the session on its own task, logging how it ended
    pub fn spawn(self) -> JoinHandle<()> {
        let peer = self.peer;
        tokio::spawn(async move {
            match self.run().await {
                Ok(served) => tracing::debug!(%peer, served, "Connection closed"),
                Err(e) => {
                    let stage = session_stage(&e);
                    tracing::warn!(%peer, stage = stage.as_str(), "Connection aborted: {}", e);
                }
            }
        })
    }

    /// Serve requests until the peer closes, asks to close, or a stage fails.
    ///
    /// Returns the number of requests served.
    pub async fn run(self) -> Result<usize> {
        let Self { stream, peer, node } = self;
        if let Err(e) = stream.set_nodelay(true) {
            tracing::trace!(%peer, "Failed to set TCP_NODELAY: {}", e);
        }

        let timed = TimedStream::new(stream, node.io_timeout());
        let control = timed.control();
        let io = TokioIo::new(timed);
        let served = Arc::new(AtomicUsize::new(0));

        let counter = Arc::clone(&served);
        let service = service_fn(move |request: Request<Incoming>| {
            let node = Arc::clone(&node);
            let control = control.clone();
            let counter = Arc::clone(&counter);
            async move {
                let response = handle(&node, &control, peer, request).await;
                counter.fetch_add(1, Ordering::Relaxed);
                response
            }
        });

        http1::Builder::new()
            .keep_alive(true)
            .serve_connection(io, service)
            .await?;

        Ok(served.load(Ordering::Relaxed))
    }
}

/// Read the full request, dispatch it, and build the response
async fn handle(
    node: &NodeContext,
    control: &DeadlineControl,
    peer: SocketAddr,
    request: Request<Incoming>,
) -> Result<Response<Full<Bytes>>> {
    let (parts, body) = request.into_parts();
    let body = body.collect().await?.to_bytes();

    let target = parts
        .uri
        .path_and_query()
        .map(|pq| pq.as_str())
        .unwrap_or_else(|| parts.uri.path())
        .to_string();

    let _suspended = control.suspend_reads();
    let reply = dispatch(
        node,
        InboundRequest {
            method: parts.method,
            target,
            body,
            sender: peer,
        },
    )
    .await;

    Ok(into_response(reply))
}

fn into_response(reply: Reply) -> Response<Full<Bytes>> {
    let mut response = Response::new(Full::new(Bytes::from(reply.body)));
    *response.status_mut() = reply.status;

    let headers = response.headers_mut();
    headers.insert(SERVER, HeaderValue::from_static(SERVER_NAME));
    headers.insert(
        CONTENT_TYPE,
        HeaderValue::from_static("text/plain; charset=utf-8"),
    );

    response
}

/// Which stage a session failure happened in
fn session_stage(err: &Error) -> Stage {
    match err {
        Error::Http(e) => StageTimeout::find(e).unwrap_or_else(|| Stage::of_http(e)),
        other => other.stage().unwrap_or(Stage::Read),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    use crate::config::{JitterConfig, NodeConfig, NodeTopology};

    async fn session_pair(node: Arc<NodeContext>) -> (TcpStream, JoinHandle<Result<usize>>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let server = tokio::spawn(async move {
            let (stream, peer) = listener.accept().await.unwrap();
            ConnectionSession::new(stream, peer, node).run().await
        });

        (TcpStream::connect(addr).await.unwrap(), server)
    }

    fn root_node(io_timeout: Duration) -> Arc<NodeContext> {
        let topology = NodeTopology::root("127.0.0.1:8080", "", 1).unwrap();
        Arc::new(NodeContext::new(
            NodeConfig::new(topology)
                .with_jitter(JitterConfig::none())
                .with_timeouts(Duration::from_secs(1), io_timeout),
        ))
    }

    /// Read exactly one response: headers, then `Content-Length` bytes of body
    async fn read_response(client: &mut TcpStream) -> String {
        let mut received = Vec::new();
        let mut buf = [0u8; 1024];
        loop {
            let text = String::from_utf8_lossy(&received).into_owned();
            if let Some(head_end) = text.find("\r\n\r\n") {
                let length = text[..head_end]
                    .lines()
                    .find_map(|line| {
                        let (name, value) = line.split_once(':')?;
                        name.eq_ignore_ascii_case("content-length")
                            .then(|| value.trim().parse::<usize>().ok())
                            .flatten()
                    })
                    .unwrap_or(0);
                if received.len() >= head_end + 4 + length {
                    return text;
                }
            }

            let n = client.read(&mut buf).await.unwrap();
            assert!(n > 0, "connection closed mid-response");
            received.extend_from_slice(&buf[..n]);
        }
    }

    #[tokio::test]
    async fn test_keep_alive_serves_sequential_requests() {
        let (mut client, server) = session_pair(root_node(Duration::from_secs(5))).await;

        let body = r#"{"data":"x","wc":0}"#;
        let add = format!(
            "POST /addlog HTTP/1.1\r\nHost: root\r\nContent-Length: {}\r\n\r\n{}",
            body.len(),
            body
        );
        client.write_all(add.as_bytes()).await.unwrap();
        let first = read_response(&mut client).await;
        assert!(first.starts_with("HTTP/1.1 200 OK"));
        assert!(first.ends_with("CONGRATS!"));

        client
            .write_all(b"GET /getlog HTTP/1.1\r\nHost: root\r\nConnection: close\r\n\r\n")
            .await
            .unwrap();
        let second = read_response(&mut client).await;
        assert!(second.starts_with("HTTP/1.1 200 OK"));
        assert!(second.to_ascii_lowercase().contains("server: replico/"));
        assert!(second.ends_with("x [1/0]\n"));

        // Server closed its side after the close request
        let mut rest = Vec::new();
        client.read_to_end(&mut rest).await.unwrap();
        assert!(rest.is_empty());
        assert_eq!(server.await.unwrap().unwrap(), 2);
    }

    #[tokio::test]
    async fn test_illegal_target_keeps_connection() {
        let (mut client, server) = session_pair(root_node(Duration::from_secs(5))).await;

        client
            .write_all(b"DELETE /addlog HTTP/1.1\r\nHost: root\r\n\r\n")
            .await
            .unwrap();
        let reply = read_response(&mut client).await;
        assert!(reply.starts_with("HTTP/1.1 400 Bad Request"));
        assert!(reply.ends_with("Illegal request-target"));

        drop(client);
        assert_eq!(server.await.unwrap().unwrap(), 1);
    }

    #[tokio::test]
    async fn test_idle_connection_is_closed() {
        let io_timeout = Duration::from_millis(200);
        let (mut client, server) = session_pair(root_node(io_timeout)).await;

        let result = tokio::time::timeout(io_timeout + Duration::from_secs(2), server)
            .await
            .expect("idle session outlived its read deadline")
            .unwrap();

        let mut rest = Vec::new();
        let _ = client.read_to_end(&mut rest).await;
        assert!(rest.is_empty());

        // hyper reports an idle timeout before any request as a read failure or a clean close
        match result {
            Ok(served) => assert_eq!(served, 0),
            Err(e) => assert_eq!(session_stage(&e), Stage::Read),
        }
    }

    #[tokio::test]
    async fn test_short_idle_is_still_served() {
        let (mut client, server) = session_pair(root_node(Duration::from_millis(500))).await;

        tokio::time::sleep(Duration::from_millis(150)).await;
        client
            .write_all(b"GET /getlog HTTP/1.1\r\nHost: root\r\n\r\n")
            .await
            .unwrap();
        assert!(read_response(&mut client).await.starts_with("HTTP/1.1 200 OK"));

        // Idle again between requests, still under the deadline
        tokio::time::sleep(Duration::from_millis(150)).await;
        client
            .write_all(b"GET /getlog HTTP/1.1\r\nHost: root\r\nConnection: close\r\n\r\n")
            .await
            .unwrap();
        assert!(read_response(&mut client).await.starts_with("HTTP/1.1 200 OK"));

        assert_eq!(server.await.unwrap().unwrap(), 2);
    }

    #[tokio::test]
    async fn test_slow_dispatch_outlasts_read_deadline() {
        // Replication delay well beyond the read deadline
        let topology = NodeTopology::secondary("127.0.0.1:8082", "127.0.0.1:8080", 1).unwrap();
        let delay = Duration::from_millis(600);
        let node = Arc::new(NodeContext::new(
            NodeConfig::new(topology)
                .with_jitter(JitterConfig { min: delay, max: delay })
                .with_timeouts(Duration::from_secs(1), Duration::from_millis(200)),
        ));
        let (mut client, server) = session_pair(Arc::clone(&node)).await;

        client
            .write_all(
                b"POST /addlog HTTP/1.1\r\nHost: node\r\nContent-Length: 4\r\nConnection: close\r\n\r\nslow",
            )
            .await
            .unwrap();
        let reply = read_response(&mut client).await;
        assert!(reply.starts_with("HTTP/1.1 200 OK"), "{}", reply);

        assert_eq!(server.await.unwrap().unwrap(), 1);
        assert_eq!(node.read_logs().len(), 1);
        assert_eq!(node.read_logs()[0].data(), "slow");
    }
}
