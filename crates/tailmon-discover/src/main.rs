//! tailmon-discover - Prometheus HTTP SD over an overlay network.
//!
//! Registers a node on the overlay, listens on port 80, and returns a
//! Prometheus HTTP SD response containing all `tailmon` nodes. Run a
//! single `tailmon-discover` along with many `tailmon` nodes to
//! automatically discover and monitor metrics endpoints over the overlay.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::{ArgAction, Parser};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use tailmon_discover::handle_discovery;
use tailmon_presence::{NodeIdentity, PresenceServer};

const NODE_NAME: &str = "tailmon-discover";

#[derive(Parser)]
#[command(name = "tailmon-discover")]
#[command(about = "Prometheus HTTP SD for exporters registered on an overlay network")]
#[command(version)]
#[command(after_help = "Run one tailmon-discover alongside many tailmon nodes, then point
a Prometheus http_sd_config at http://<discovery-node>/ to scrape them all.

Custom control servers may be set with TS_CONTROL_URL or --control-url")]
struct Cli {
    /// Path to store overlay state
    #[arg(long)]
    state: PathBuf,

    /// Print debug logs
    #[arg(long)]
    debug: bool,

    /// URL of custom overlay control server
    #[arg(long, env = "TS_CONTROL_URL")]
    control_url: Option<String>,

    /// Disable log uploading by the overlay daemon
    #[arg(long, default_value_t = true, action = ArgAction::Set)]
    no_logs_no_support: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let level = if cli.debug { "debug" } else { "info" };
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::from_default_env().add_directive(level.parse()?))
        .init();

    let identity = NodeIdentity {
        name: NODE_NAME.to_string(),
        control_url: cli.control_url,
        state_dir: cli.state,
        debug: cli.debug,
        no_logs: cli.no_logs_no_support,
    };

    let server = PresenceServer::new(identity);

    // The handler queries the overlay's peer list, so it needs the handle
    // before the listener comes up.
    let overlay = server.acquire_handle().await?;
    server
        .start(move |req| {
            let overlay = Arc::clone(&overlay);
            async move { handle_discovery(overlay.as_ref(), req.uri().path()).await }
        })
        .await
        .context("unable to start discovery node")?;

    wait_for_signal().await;
    server.shutdown().await;
    Ok(())
}

/// Block until SIGINT or SIGTERM.
async fn wait_for_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut term) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {}
                    _ = term.recv() => {}
                }
            }
            Err(_) => {
                let _ = tokio::signal::ctrl_c().await;
            }
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}
