//! tailmon - register prometheus exporters on an overlay network.
//!
//! Requests to port 80 on each registered overlay node are proxied to a
//! prometheus exporter on localhost. Pair with `tailmon-discover` to
//! scrape every registered exporter automatically.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::{ArgAction, Parser};
use futures_util::future::join_all;
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use tailmon::{ExporterSpec, MetricsProxy};
use tailmon_presence::{NodeIdentity, PresenceServer};

#[derive(Parser)]
#[command(name = "tailmon")]
#[command(about = "Register one or more prometheus exporters on an overlay network")]
#[command(version)]
#[command(after_help = "Example:
    tailmon --state /var/lib/tailmon node-exporter:9100 postgres-exporter:9187

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

    /// Exporters to announce, as NAME:PORT
    #[arg(required = true, value_name = "NAME:PORT")]
    exporters: Vec<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let level = if cli.debug { "debug" } else { "info" };
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::from_default_env().add_directive(level.parse()?))
        .init();

    // Reject malformed registrations before any overlay identity exists.
    let specs = cli
        .exporters
        .iter()
        .map(|value| ExporterSpec::parse(value))
        .collect::<Result<Vec<_>, _>>()?;

    let servers: Vec<PresenceServer> = specs
        .iter()
        .map(|spec| {
            let name = spec.overlay_hostname();
            PresenceServer::new(NodeIdentity {
                name,
                control_url: cli.control_url.clone(),
                state_dir: cli.state.clone(),
                debug: cli.debug,
                no_logs: cli.no_logs_no_support,
            })
        })
        .collect();

    // Each identity blocks in start until its overlay address is assigned,
    // so bring them all up together rather than one at a time.
    let results = join_all(specs.iter().zip(&servers).map(|(spec, server)| {
        let proxy = Arc::new(MetricsProxy::new(spec.upstream_url(), spec.overlay_hostname()));
        async move {
            server
                .start(move |req| {
                    let proxy = Arc::clone(&proxy);
                    async move { proxy.handle(req).await }
                })
                .await
                .with_context(|| format!("unable to start {}", spec.name()))
        }
    }))
    .await;

    if let Some(failed) = results.into_iter().find_map(Result::err) {
        // Stop whatever did come up before reporting the failure.
        join_all(servers.iter().map(PresenceServer::shutdown)).await;
        return Err(failed);
    }

    info!(count = servers.len(), "exporters announced");
    wait_for_signal().await;

    join_all(servers.iter().map(PresenceServer::shutdown)).await;
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
