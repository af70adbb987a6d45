//! Replico Error Types

use std::fmt;

use thiserror::Error;

use crate::log::LogId;

/// Result type alias for Replico operations
pub type Result<T> = std::result::Result<T, Error>;

/// I/O stage an operation was in when it failed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Resolve,
    Connect,
    Write,
    Read,
    Accept,
    Bind,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Resolve => "resolve",
            Stage::Connect => "connect",
            Stage::Write => "write",
            Stage::Read => "read",
            Stage::Accept => "accept",
            Stage::Bind => "bind",
        }
    }

    /// Classify a hyper error by the side of the exchange it happened on
    pub fn of_http(err: &hyper::Error) -> Self {
        if err.is_parse() || err.is_incomplete_message() || err.is_timeout() {
            Stage::Read
        } else {
            Stage::Write
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Replico error types
#[derive(Error, Debug)]
pub enum Error {
    // Startup errors
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid endpoint '{0}': expected <host>:<port>")]
    InvalidEndpoint(String),

    #[error("Usage error: {0}")]
    Usage(String),

    #[error("Failed to bind {address}: {reason}")]
    Bind { address: String, reason: String },

    // Transport errors
    #[error("{stage} failed for {address}: {reason}")]
    Transport {
        stage: Stage,
        address: String,
        reason: String,
    },

    #[error("{stage} timed out for {address}")]
    Timeout { stage: Stage, address: String },

    #[error("{address} rejected the request with status {status}")]
    Rejected { address: String, status: u16 },

    #[error("HTTP error: {0}")]
    Http(#[from] hyper::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    // Protocol errors
    #[error("Malformed log request: {0}")]
    Malformed(String),

    // Store errors
    #[error("Log entry {0} does not exist")]
    UnknownEntry(LogId),
}

impl Error {
    /// Create a transport error for the given stage
    pub fn transport(stage: Stage, address: impl Into<String>, reason: impl fmt::Display) -> Self {
        Error::Transport {
            stage,
            address: address.into(),
            reason: reason.to_string(),
        }
    }

    /// Create a timeout error for the given stage
    pub fn timeout(stage: Stage, address: impl Into<String>) -> Self {
        Error::Timeout {
            stage,
            address: address.into(),
        }
    }

    /// The I/O stage this error belongs to, if it is a transport error
    pub fn stage(&self) -> Option<Stage> {
        match self {
            Error::Transport { stage, .. } | Error::Timeout { stage, .. } => Some(*stage),
            Error::Http(e) => Some(Stage::of_http(e)),
            Error::Io(_) | Error::Rejected { .. } => Some(Stage::Read),
            _ => None,
        }
    }

    /// Check if this error is local to a single session or replication attempt
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            Error::Transport { .. }
                | Error::Timeout { .. }
                | Error::Rejected { .. }
                | Error::Http(_)
                | Error::Io(_)
        )
    }

    /// Check if this error prevents the node from starting
    pub fn is_startup(&self) -> bool {
        matches!(
            self,
            Error::Config(_) | Error::InvalidEndpoint(_) | Error::Usage(_) | Error::Bind { .. }
        )
    }
}
