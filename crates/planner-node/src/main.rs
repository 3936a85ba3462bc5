use anyhow::{Context, Result};
use clap::Parser;
use planner::client::default_socket_path;
use planner_node::config::NodeConfig;
use planner_node::handler::NodeState;
use planner_node::socket;
use planner_realtime::MemoryBackend;
use planner_realtime::config::{parse_coalesce_policy, parse_refresh_error_policy};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(author, version, about = "planner realtime daemon")]
struct Args {
    /// Path to the Unix socket.
    #[arg(long)]
    socket: Option<PathBuf>,

    /// Path to config.toml (default: $XDG_CONFIG_HOME/planner/config.toml).
    #[arg(long)]
    config: Option<PathBuf>,

    /// Change-event coalescing: "none" or "latest".
    #[arg(long)]
    coalesce: Option<String>,

    /// Refresh failure handling: "swallow" or "propagate".
    #[arg(long)]
    refresh_errors: Option<String>,

    /// Abandon refreshes that take longer than this many milliseconds.
    #[arg(long)]
    refresh_timeout_ms: Option<u64>,

    /// Refresh once as soon as a channel opens.
    #[arg(long)]
    initial_fetch: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "planner_node=info,planner_realtime=info".into()),
        )
        .init();

    let args = Args::parse();

    let config_path = args.config.clone().unwrap_or_else(NodeConfig::default_path);
    let mut config = NodeConfig::load(&config_path)?;

    // Command-line flags win over the config file.
    if let Some(ref policy) = args.coalesce {
        config.registry.coalesce = parse_coalesce_policy(policy)?;
    }
    if let Some(ref policy) = args.refresh_errors {
        config.registry.refresh_errors = parse_refresh_error_policy(policy)?;
    }
    if args.refresh_timeout_ms.is_some() {
        config.registry.refresh_timeout_ms = args.refresh_timeout_ms;
    }
    if args.initial_fetch {
        config.registry.initial_fetch = true;
    }

    let socket_path = args
        .socket
        .or(config.socket_path.clone())
        .unwrap_or_else(default_socket_path);

    tracing::info!(
        coalesce = ?config.registry.coalesce,
        refresh_errors = ?config.registry.refresh_errors,
        refresh_timeout_ms = ?config.registry.refresh_timeout_ms,
        initial_fetch = config.registry.initial_fetch,
        "registry configured"
    );

    let state = NodeState::new(MemoryBackend::new(), config.registry);

    // Run Unix socket server (blocks until shutdown signal)
    tokio::select! {
        result = socket::serve(state.clone(), &socket_path) => {
            result.context("socket server failed")?;
        }
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("received ctrl-c, shutting down");
        }
        _ = state.shutdown.cancelled() => {
            tracing::info!("shutdown requested, shutting down");
        }
    }

    let closed = state.hub.dispose();
    tracing::debug!(closed, "registries disposed");

    // Cleanup socket file
    std::fs::remove_file(&socket_path).ok();
    tracing::info!("planner-node shut down");
    Ok(())
}
