//! Replico Configuration
//!
//! Node topology and runtime tunables. Everything here is derived from the
//! command line once at startup and is read-only afterwards.

use std::fmt;
use std::net::{IpAddr, SocketAddr};
use std::time::Duration;

use crate::error::{Error, Result};

/// Default timeout for establishing an outbound connection
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

/// Default timeout for a single read or write stage, and for a replication round trip
pub const DEFAULT_IO_TIMEOUT: Duration = Duration::from_secs(30);

/// A `host:port` pair as given on the command line
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    pub host: String,
    pub port: u16,
}

impl Endpoint {
    /// Parse a `host:port` string. IPv6 hosts must be bracketed.
    pub fn parse(s: &str) -> Result<Self> {
        let s = s.trim();
        let (host, port) = s
            .rsplit_once(':')
            .ok_or_else(|| Error::InvalidEndpoint(s.to_string()))?;

        let host = host.trim_start_matches('[').trim_end_matches(']');
        if host.is_empty() {
            return Err(Error::InvalidEndpoint(s.to_string()));
        }

        let port = port
            .parse::<u16>()
            .map_err(|_| Error::InvalidEndpoint(s.to_string()))?;

        Ok(Self {
            host: host.to_string(),
            port,
        })
    }

    /// Interpret the host as an IP literal
    pub fn socket_addr(&self) -> Result<SocketAddr> {
        let ip: IpAddr = self
            .host
            .parse()
            .map_err(|_| Error::InvalidEndpoint(self.to_string()))?;
        Ok(SocketAddr::new(ip, self.port))
    }

    /// Value for the HTTP `Host` header
    pub fn authority(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.host.contains(':') {
            write!(f, "[{}]:{}", self.host, self.port)
        } else {
            write!(f, "{}:{}", self.host, self.port)
        }
    }
}

/// Role-specific part of the topology
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NodeRole {
    /// Accepts client writes and fans them out, in this order, to the secondaries
    Root { secondaries: Vec<Endpoint> },
    /// Accepts replicated writes from the root only
    Secondary { root: SocketAddr },
}

impl NodeRole {
    pub fn is_root(&self) -> bool {
        matches!(self, NodeRole::Root { .. })
    }

    /// Short tag used in log lines
    pub fn tag(&self) -> &'static str {
        match self {
            NodeRole::Root { .. } => "ROOT",
            NodeRole::Secondary { .. } => "NODE",
        }
    }
}

/// Static shape of the cluster as seen by this node
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeTopology {
    /// Address this node listens on
    pub listen: SocketAddr,
    /// Role and its peers
    pub role: NodeRole,
    /// Number of runtime worker threads (at least 1)
    pub worker_count: usize,
}

impl NodeTopology {
    /// Root topology from `<listen>` and `<host:port>;<host:port>;...`
    pub fn root(listen: &str, secondaries: &str, worker_count: i64) -> Result<Self> {
        let listen = Endpoint::parse(listen)?.socket_addr()?;
        let secondaries = parse_endpoint_list(secondaries)?;

        Ok(Self {
            listen,
            role: NodeRole::Root { secondaries },
            worker_count: clamp_workers(worker_count),
        })
    }

    /// Secondary topology from `<listen>` and `<root host:port>`
    pub fn secondary(listen: &str, root: &str, worker_count: i64) -> Result<Self> {
        let listen = Endpoint::parse(listen)?.socket_addr()?;
        let root = Endpoint::parse(root)?.socket_addr()?;

        Ok(Self {
            listen,
            role: NodeRole::Secondary { root },
            worker_count: clamp_workers(worker_count),
        })
    }

    /// Configured secondaries, empty on a secondary
    pub fn secondaries(&self) -> &[Endpoint] {
        match &self.role {
            NodeRole::Root { secondaries } => secondaries,
            NodeRole::Secondary { .. } => &[],
        }
    }

    /// Whether `peer` is the configured root.
    ///
    /// Only the IP is compared: the root connects from an ephemeral port.
    /// An unspecified root address stands for this host and matches loopback peers.
    pub fn is_root_peer(&self, peer: &SocketAddr) -> bool {
        let NodeRole::Secondary { root } = &self.role else {
            return false;
        };

        let root_ip = root.ip().to_canonical();
        let peer_ip = peer.ip().to_canonical();

        if root_ip.is_unspecified() {
            return peer_ip.is_loopback();
        }
        root_ip == peer_ip
    }
}

fn parse_endpoint_list(list: &str) -> Result<Vec<Endpoint>> {
    list.split(';')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(Endpoint::parse)
        .collect()
}

fn clamp_workers(requested: i64) -> usize {
    usize::try_from(requested.max(1)).unwrap_or(1)
}

/// Bounds of the randomized delay a secondary waits before storing a replicated entry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JitterConfig {
    pub min: Duration,
    pub max: Duration,
}

impl JitterConfig {
    /// No delay at all
    pub fn none() -> Self {
        Self {
            min: Duration::ZERO,
            max: Duration::ZERO,
        }
    }
}

impl Default for JitterConfig {
    fn default() -> Self {
        Self {
            min: Duration::from_secs(1),
            max: Duration::from_secs(10),
        }
    }
}

/// Full node configuration
#[derive(Debug, Clone)]
pub struct NodeConfig {
    /// Cluster topology
    pub topology: NodeTopology,
    /// Timeout for resolving and connecting to a secondary
    pub connect_timeout: Duration,
    /// Timeout for each inbound read/write stage and for a replication round trip
    pub io_timeout: Duration,
    /// Replication delay on secondaries
    pub jitter: JitterConfig,
}

impl NodeConfig {
    /// Configuration with default timeouts and jitter
    pub fn new(topology: NodeTopology) -> Self {
        Self {
            topology,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            io_timeout: DEFAULT_IO_TIMEOUT,
            jitter: JitterConfig::default(),
        }
    }

    /// Replace the replication jitter
    pub fn with_jitter(mut self, jitter: JitterConfig) -> Self {
        self.jitter = jitter;
        self
    }

    /// Replace both timeouts
    pub fn with_timeouts(mut self, connect: Duration, io: Duration) -> Self {
        self.connect_timeout = connect;
        self.io_timeout = io;
        self
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.topology.worker_count == 0 {
            return Err(Error::Config("worker_count must be at least 1".into()));
        }

        if self.connect_timeout.is_zero() || self.io_timeout.is_zero() {
            return Err(Error::Config("timeouts must be non-zero".into()));
        }

        if self.jitter.min > self.jitter.max {
            return Err(Error::Config(format!(
                "jitter minimum {:?} exceeds maximum {:?}",
                self.jitter.min, self.jitter.max
            )));
        }

        // A replication round trip includes the secondary's delay
        if self.jitter.max >= self.io_timeout {
            return Err(Error::Config(format!(
                "jitter maximum {:?} must be below the I/O timeout {:?}",
                self.jitter.max, self.io_timeout
            )));
        }

        Ok(())
    }
}
