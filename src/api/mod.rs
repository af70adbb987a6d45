//! HTTP API Module
//!
//! Routing and rendering of the two client-facing endpoints.

mod dispatcher;

pub use dispatcher::{
    dispatch, render_root, render_secondary, AddLogRequest, InboundRequest, Reply, ACCEPTED,
    ADDLOG_TARGET, GETLOG_TARGET, ILLEGAL_TARGET,
};

/// Value of the `Server` and `User-Agent` headers
pub const SERVER_NAME: &str = concat!("replico/", env!("CARGO_PKG_VERSION"));
