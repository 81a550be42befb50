//! # mcpgate
//!
//! MCP WebSocket gateway binary: loads settings, builds the upstream session
//! factory and relay, and serves until Ctrl-C or SIGTERM.

#![deny(unsafe_code)]

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use mcpgate_relay::{Gateway, Relay, RelayOptions, UpstreamOptions, UpstreamSessionFactory};
use mcpgate_server::config::ServerConfig;
use mcpgate_server::server::GatewayServer;
use mcpgate_settings::{GatewaySettings, UpstreamServer};

/// How often shutdown re-checks for connections still relaying.
const DRAIN_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// MCP WebSocket gateway.
#[derive(Parser, Debug)]
#[command(name = "mcpgate", version, about = "MCP WebSocket gateway")]
struct Cli {
    /// Settings file (JSON). Without it, `$MCPGATE_CONFIG` and `configs/` are searched.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Host to bind (overrides settings).
    #[arg(long)]
    host: Option<String>,

    /// Port to bind (overrides settings).
    #[arg(long)]
    port: Option<u16>,

    /// Upstream `ws://` or `wss://` URL (overrides the first configured server).
    #[arg(long)]
    upstream: Option<String>,

    /// Log filter used when `RUST_LOG` is unset (overrides settings).
    #[arg(long)]
    log_level: Option<String>,
}

impl Cli {
    /// Load settings from `--config` or the default candidates, then apply
    /// command-line overrides on top.
    fn settings(&self) -> Result<(GatewaySettings, Option<PathBuf>)> {
        let (mut settings, source) = match &self.config {
            Some(path) => {
                let settings = mcpgate_settings::load_settings_from_path(path)
                    .with_context(|| format!("Failed to load settings from {}", path.display()))?;
                (settings, Some(path.clone()))
            }
            None => mcpgate_settings::load_settings().context("Failed to load settings")?,
        };
        self.apply_overrides(&mut settings);
        Ok((settings, source))
    }

    fn apply_overrides(&self, settings: &mut GatewaySettings) {
        if let Some(host) = &self.host {
            settings.server.host.clone_from(host);
        }
        if let Some(port) = self.port {
            settings.server.port = port;
        }
        if let Some(upstream) = &self.upstream {
            match settings.servers.first_mut() {
                Some(first) => first.address.clone_from(upstream),
                None => settings
                    .servers
                    .push(UpstreamServer::with_address(upstream.clone())),
            }
        }
        if let Some(level) = &self.log_level {
            settings.logging.level.clone_from(level);
        }
    }
}

/// Per-session upstream options from settings.
fn upstream_options(settings: &GatewaySettings, upstream: &UpstreamServer) -> UpstreamOptions {
    UpstreamOptions {
        subprotocol: upstream.protocol.clone(),
        dial_timeout: settings.relay.dial_timeout(),
        headers: settings
            .relay
            .headers
            .iter()
            .map(|(name, value)| (name.clone(), value.clone()))
            .collect(),
        max_message_size: Some(settings.server.max_message_size),
    }
}

/// Validate the upstream and build the gateway every connection goes through.
fn build_gateway(settings: &GatewaySettings) -> Result<Gateway> {
    let upstream = settings
        .default_server()
        .context("No upstream configured (set servers[0].address, MCPGATE_UPSTREAM_URL or --upstream)")?;
    let factory =
        UpstreamSessionFactory::new(&upstream.address, upstream_options(settings, upstream))
            .with_context(|| format!("Invalid upstream '{}' ({})", upstream.address, upstream.id))?;
    let relay = Relay::new(RelayOptions {
        idle_timeout: settings.relay.idle_timeout(),
        close_timeout: settings.relay.close_timeout(),
    });
    Ok(Gateway::new(factory, relay))
}

/// Resolves on Ctrl-C, or SIGTERM on Unix.
async fn shutdown_signal() -> Result<()> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};

        let mut terminate =
            signal(SignalKind::terminate()).context("Failed to install SIGTERM handler")?;
        tokio::select! {
            res = tokio::signal::ctrl_c() => res.context("Failed to listen for ctrl-c")?,
            _ = terminate.recv() => {}
        }
    }
    #[cfg(not(unix))]
    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for ctrl-c")?;
    Ok(())
}

/// Wait until no connection is relaying, or `timeout` passes.
async fn drain_connections(server: &GatewayServer, timeout: Duration) {
    let drained = tokio::time::timeout(timeout, async {
        while server.connections().active() > 0 {
            tokio::time::sleep(DRAIN_POLL_INTERVAL).await;
        }
    })
    .await;
    if drained.is_err() {
        tracing::warn!(
            remaining = server.connections().active(),
            "connections still open after shutdown timeout"
        );
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Cli::parse();

    // Settings first: they carry the log level.
    let (settings, source) = args.settings()?;
    mcpgate_core::logging::init_subscriber(&settings.logging.level, settings.logging.json);
    tracing::info!(
        version = mcpgate_core::constants::VERSION,
        config = ?source,
        "starting mcpgate"
    );

    let gateway = build_gateway(&settings)?;
    let config = ServerConfig::from_settings(&settings.server);
    let shutdown_timeout = config.shutdown_timeout();

    let mut server = GatewayServer::new(config, gateway);
    match mcpgate_server::metrics::install_recorder() {
        Ok(handle) => server = server.with_metrics(handle),
        Err(e) => tracing::warn!(error = %e, "metrics recorder not installed, /metrics disabled"),
    }

    let (addr, handle) = server.listen().await.context("Failed to bind server")?;
    tracing::info!(
        "mcpgate listening on ws://{addr}{} -> {}",
        server.config().path,
        server.gateway().upstream()
    );

    shutdown_signal().await?;

    tracing::info!("Shutting down...");
    server
        .shutdown()
        .graceful_shutdown(vec![handle], Some(shutdown_timeout))
        .await;
    drain_connections(&server, shutdown_timeout).await;

    tracing::info!("Shutdown complete");
    Ok(())
}
