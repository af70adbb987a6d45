//! Replico - Minimal Root/Secondary Log Replication
//!
//! Starts a single root or secondary node and serves until Ctrl-C.

use std::process::ExitCode;

use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use replico::config::{NodeConfig, NodeTopology};
use replico::error::{Error, Result};
use replico::node::ReplicaNode;

const USAGE_EXAMPLES: &str = "\
Examples:
  replico root 127.0.0.1:8080 \"127.0.0.1:8081;127.0.0.1:8082\" 4
  replico node 127.0.0.1:8081 127.0.0.1:8080 2";

/// Replico - Minimal Root/Secondary Log Replication
#[derive(Parser)]
#[command(name = "replico")]
#[command(author, version, about, long_about = None, after_help = USAGE_EXAMPLES)]
struct Cli {
    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, global = true, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the root node
    Root {
        /// Address to listen on (ip:port)
        listen: String,

        /// Secondaries to replicate to, separated by ';' (host:port;host:port)
        secondaries: String,

        /// Runtime worker threads (values below 1 mean 1)
        #[arg(allow_negative_numbers = true)]
        workers: i64,
    },

    /// Start a secondary node
    Node {
        /// Address to listen on (ip:port)
        listen: String,

        /// Address of the root node (ip:port)
        root: String,

        /// Runtime worker threads (values below 1 mean 1)
        #[arg(allow_negative_numbers = true)]
        workers: i64,
    },
}

fn main() -> ExitCode {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) => {
            let failed = e.use_stderr();
            let _ = e.print();
            return if failed {
                ExitCode::FAILURE
            } else {
                ExitCode::SUCCESS
            };
        }
    };

    init_logging(&cli.log_level);

    match run(cli.command) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("{}", e);
            eprintln!("Error: {}", e);
            if matches!(e, Error::Usage(_)) {
                eprintln!("\n{}", USAGE_EXAMPLES);
            }
            ExitCode::FAILURE
        }
    }
}

/// Initialize logging
fn init_logging(level: &str) {
    let env_filter = tracing_subscriber::EnvFilter::try_new(level)
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
}

fn run(command: Commands) -> Result<()> {
    let topology = match command {
        Commands::Root {
            listen,
            secondaries,
            workers,
        } => NodeTopology::root(&listen, &secondaries, workers),
        Commands::Node {
            listen,
            root,
            workers,
        } => NodeTopology::secondary(&listen, &root, workers),
    }
    .map_err(|e| Error::Usage(e.to_string()))?;

    tracing::info!(
        "Starting Replico {} with {} worker(s)",
        env!("CARGO_PKG_VERSION"),
        topology.worker_count
    );

    ReplicaNode::run_blocking(NodeConfig::new(topology))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_root() {
        let cli = Cli::try_parse_from([
            "replico",
            "root",
            "127.0.0.1:8080",
            "127.0.0.1:8081;127.0.0.1:8082",
            "4",
        ])
        .unwrap();
        assert_eq!(cli.log_level, "info");
        assert!(matches!(cli.command, Commands::Root { workers: 4, .. }));
    }

    #[test]
    fn test_parse_node_with_negative_workers() {
        let cli = Cli::try_parse_from([
            "replico",
            "node",
            "127.0.0.1:8081",
            "127.0.0.1:8080",
            "-3",
            "--log-level",
            "debug",
        ])
        .unwrap();
        assert_eq!(cli.log_level, "debug");
        assert!(matches!(cli.command, Commands::Node { workers: -3, .. }));
    }

    #[test]
    fn test_usage_errors() {
        assert!(Cli::try_parse_from(["replico"]).is_err());
        assert!(Cli::try_parse_from(["replico", "root", "127.0.0.1:8080"]).is_err());
        assert!(Cli::try_parse_from(["replico", "leader", "a", "b", "1"]).is_err());
        assert!(Cli::try_parse_from(["replico", "node", "a", "b", "many"]).is_err());
    }

    #[test]
    fn test_invalid_endpoint_is_usage_error() {
        let err = run(Commands::Node {
            listen: "localhost".into(),
            root: "127.0.0.1:8080".into(),
            workers: 1,
        })
        .unwrap_err();
        assert!(matches!(err, Error::Usage(_)));
        assert!(err.is_startup());
    }
}
