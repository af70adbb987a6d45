//! Request Dispatcher
//!
//! Maps one inbound request to a reply, mutating the node's log and
//! launching replication as side effects. Nothing here touches sockets.

use std::net::SocketAddr;
use std::time::Instant;

use bytes::Bytes;
use hyper::{Method, StatusCode};
use serde::Deserialize;

use crate::config::NodeRole;
use crate::error::Error;
use crate::log::LogEntry;
use crate::node::NodeContext;

/// Append endpoint
pub const ADDLOG_TARGET: &str = "/addlog";
/// Read endpoint
pub const GETLOG_TARGET: &str = "/getlog";
/// Body of every 400 caused by an unknown target, a wrong method or an unauthorized sender
pub const ILLEGAL_TARGET: &str = "Illegal request-target";
/// Body of a successful root append
pub const ACCEPTED: &str = "CONGRATS!";

/// Client append request accepted by the root
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct AddLogRequest {
    /// Log payload
    pub data: String,
    /// Number of secondaries that should acknowledge the write
    #[serde(default)]
    pub wc: usize,
}

/// The parts of an HTTP request the dispatcher looks at
#[derive(Debug, Clone)]
pub struct InboundRequest {
    pub method: Method,
    /// Full request-target, path plus query
    pub target: String,
    pub body: Bytes,
    /// Peer address of the connection the request arrived on
    pub sender: SocketAddr,
}

/// Status and plain-text body to send back
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reply {
    pub status: StatusCode,
    pub body: String,
}

impl Reply {
    pub fn ok(body: impl Into<String>) -> Self {
        Self {
            status: StatusCode::OK,
            body: body.into(),
        }
    }

    pub fn bad_request(body: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            body: body.into(),
        }
    }

    fn illegal_target() -> Self {
        Self::bad_request(ILLEGAL_TARGET)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Route {
    AddLog,
    GetLog,
}

fn route(method: &Method, target: &str) -> Option<Route> {
    match (method, target) {
        (&Method::POST, ADDLOG_TARGET) => Some(Route::AddLog),
        (&Method::GET, GETLOG_TARGET) => Some(Route::GetLog),
        _ => None,
    }
}

/// Resolve a request against this node's role and log
pub async fn dispatch(node: &NodeContext, request: InboundRequest) -> Reply {
    let started = Instant::now();
    let role = node.topology().role.tag();
    let method = request.method.clone();
    let target = request.target.clone();

    let reply = match (route(&request.method, &request.target), &node.topology().role) {
        (Some(Route::AddLog), NodeRole::Root { .. }) => add_log_on_root(node, &request.body),
        (Some(Route::AddLog), NodeRole::Secondary { .. }) => {
            add_log_on_secondary(node, request).await
        }
        (Some(Route::GetLog), NodeRole::Root { .. }) => Reply::ok(render_root(&node.read_logs())),
        (Some(Route::GetLog), NodeRole::Secondary { .. }) => {
            Reply::ok(render_secondary(&node.read_logs()))
        }
        (None, _) => {
            tracing::debug!(%method, %target, "Illegal request-target");
            Reply::illegal_target()
        }
    };

    tracing::info!(
        "[{}] Executing {} {} -> {} : {:.3} ms",
        role,
        method,
        target,
        reply.status.as_u16(),
        started.elapsed().as_secs_f64() * 1000.0
    );

    reply
}

fn add_log_on_root(node: &NodeContext, body: &Bytes) -> Reply {
    let request: AddLogRequest = match serde_json::from_slice(body) {
        Ok(request) => request,
        Err(e) => {
            let err = Error::Malformed(e.to_string());
            tracing::debug!("{}", err);
            return Reply::bad_request(err.to_string());
        }
    };

    let (id, replications) = node.add_log(request.data, request.wc);
    tracing::debug!(id, wc = request.wc, fanned_out = replications.len(), "Log appended");

    Reply::ok(ACCEPTED)
}

async fn add_log_on_secondary(node: &NodeContext, request: InboundRequest) -> Reply {
    if !node.topology().is_root_peer(&request.sender) {
        tracing::debug!(sender = %request.sender, "Rejected append from a non-root sender");
        return Reply::illegal_target();
    }

    let data = match String::from_utf8(request.body.to_vec()) {
        Ok(data) => data,
        Err(e) => {
            let err = Error::Malformed(e.to_string());
            tracing::debug!(sender = %request.sender, "{}", err);
            return Reply::bad_request(err.to_string());
        }
    };

    let id = node.add_replicated(data).await;
    tracing::debug!(id, "Replicated log stored");

    Reply::ok("")
}

/// Root rendering: one `<data> [<actual>/<expected>]` line per entry
pub fn render_root(entries: &[LogEntry]) -> String {
    entries
        .iter()
        .map(|e| format!("{}\n", e.with_concern()))
        .collect()
}

/// Secondary rendering: one `<data>` line per entry
pub fn render_secondary(entries: &[LogEntry]) -> String {
    entries.iter().map(|e| format!("{}\n", e)).collect()
}
