//! callstate daemon and operator CLI.
//!
//! # Quick Start
//!
//! ```bash
//! # Start a node (reads ./callstate.toml and CST_* variables)
//! callstate start
//!
//! # Push every active session of a node to a standby
//! callstate replicate --node 127.0.0.1:2012 10.0.0.3:2012
//!
//! # Promote mirrors after the master is confirmed dead
//! callstate activate --node 10.0.0.3:2012
//! ```

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use callstate_config::{CallstateConfig, ConfigLoader};
use callstate_server::{Node, RequestHandler, Server, TcpTransport, wire::methods};
use callstate_sessions::{ActivateSessionsArgs, ReplicateSessionsArgs};
use callstate_types::{ReplicationTarget, SessionKey, TransportKind};
use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::EnvFilter;

/// Charging session registry with replication and failover.
#[derive(Parser)]
#[command(name = "callstate")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start a node.
    Start {
        /// Directory holding callstate.toml.
        #[arg(short, long)]
        config_dir: Option<PathBuf>,

        /// Override the configured listen address.
        #[arg(short, long)]
        listen: Option<SocketAddr>,
    },

    /// Push a node's sessions to other nodes as passive mirrors.
    Replicate {
        /// Node to replicate from.
        #[arg(short, long, default_value = "127.0.0.1:2012")]
        node: String,

        /// Receiving nodes (host:port).
        #[arg(required = true)]
        targets: Vec<String>,

        /// Push the node's passive table instead of its active one.
        #[arg(long)]
        passive: bool,

        /// Request timeout in milliseconds.
        #[arg(long, default_value = "10000")]
        timeout_ms: u64,
    },

    /// Promote passive mirrors on a node to active.
    Activate {
        /// Node to promote on.
        #[arg(short, long, default_value = "127.0.0.1:2012")]
        node: String,

        /// Session keys; every mirror when omitted.
        keys: Vec<SessionKey>,

        /// Request timeout in milliseconds.
        #[arg(long, default_value = "10000")]
        timeout_ms: u64,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Start { config_dir, listen } => {
            let loader = match config_dir {
                Some(dir) => ConfigLoader::new().with_base_dir(dir),
                None => ConfigLoader::new(),
            };
            let config = loader.load()?;
            init_tracing(&config.logging.level);
            start(&config, listen)
        }
        Commands::Replicate {
            node,
            targets,
            passive,
            timeout_ms,
        } => {
            init_tracing("warn");
            let args = ReplicateSessionsArgs {
                targets: targets
                    .into_iter()
                    .map(|address| ReplicationTarget::new(address, TransportKind::Json))
                    .collect(),
                passive,
            };
            call(&node, methods::REPLICATE_SESSIONS, &args, timeout_ms)
        }
        Commands::Activate {
            node,
            keys,
            timeout_ms,
        } => {
            init_tracing("warn");
            let args = ActivateSessionsArgs {
                keys: (!keys.is_empty()).then_some(keys),
            };
            call(&node, methods::ACTIVATE_SESSIONS, &args, timeout_ms)
        }
    }
}

fn init_tracing(default_level: &str) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

fn start(config: &CallstateConfig, listen: Option<SocketAddr>) -> Result<()> {
    let addr = match listen {
        Some(addr) => addr,
        None => config
            .node
            .listen
            .parse()
            .with_context(|| format!("invalid listen address '{}'", config.node.listen))?,
    };

    let node = Node::from_config(config).context("Failed to build session service")?;
    let service = node.service.clone();

    let runtime = tokio::runtime::Runtime::new().context("Failed to start runtime")?;
    runtime.block_on(async {
        let server = Server::bind(addr, RequestHandler::new(node.service)).await?;
        server
            .run_until(async {
                if let Err(e) = tokio::signal::ctrl_c().await {
                    tracing::error!(error = %e, "failed to listen for Ctrl+C");
                }
            })
            .await
    })?;

    if !service.flush(Duration::from_secs(5)) {
        tracing::warn!("pending replication or notifications were not delivered");
    }
    info!("server stopped");
    Ok(())
}

fn call<T: serde::Serialize>(node: &str, method: &str, args: &T, timeout_ms: u64) -> Result<()> {
    let params = serde_json::to_value(args)?;
    let result = TcpTransport::new()
        .request(node, method, params, Duration::from_millis(timeout_ms))
        .with_context(|| format!("{method} on {node} failed"))?;
    println!("{}", serde_json::to_string_pretty(&result)?);
    Ok(())
}
