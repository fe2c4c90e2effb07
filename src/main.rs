//! WebSocket reverse proxy binary.
//!
//! ```text
//!   client ──HTTP upgrade──▶ ┌──────────────────────────────┐
//!                            │ listener → head → WsProxy    │
//!                            │   detect → rewrite → dial    │──▶ backend (ws / wss)
//!   client ◀──raw bytes────▶ │   hijack → replay → splice   │◀─▶
//!                            └──────────────────────────────┘
//! ```

use std::path::PathBuf;

use clap::Parser;

use ws_proxy::config::{self, read_config, ServerConfig};
use ws_proxy::http::HttpServer;
use ws_proxy::lifecycle::{wait_for_signal, Shutdown};
use ws_proxy::net::listener::Listener;
use ws_proxy::observability::{logging, metrics};

#[derive(Parser, Debug)]
#[command(name = "ws-proxy")]
#[command(about = "Reverse proxy for WebSocket upgrade connections", long_about = None)]
struct Cli {
    /// TOML configuration file.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Listen address, overrides `listener.bind_address`.
    #[arg(short, long)]
    listen: Option<String>,

    /// Backend URL (ws:// or wss://), overrides `upstream.target`.
    #[arg(short, long)]
    target: Option<String>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => read_config(path)?,
        None => ServerConfig::default(),
    };
    if let Some(listen) = cli.listen {
        config.listener.bind_address = listen;
    }
    if let Some(target) = cli.target {
        config.upstream.target = target;
    }
    config::validate_config(&config).map_err(config::ConfigError::Validation)?;

    logging::init(config.observability.log_format)?;
    tracing::info!("ws-proxy v{} starting", env!("CARGO_PKG_VERSION"));

    tracing::info!(
        bind_address = %config.listener.bind_address,
        target = %config.upstream.target,
        max_connections = config.listener.max_connections,
        header_read_secs = config.timeouts.header_read_secs,
        "Configuration loaded"
    );

    if config.observability.metrics_enabled {
        // Validation guarantees the address parses.
        if let Ok(addr) = config.observability.metrics_address.parse() {
            metrics::init_metrics(addr);
        }
    }

    let listener = Listener::bind(&config.listener).await?;
    let server = HttpServer::new(config)?;

    let shutdown = Shutdown::new();
    let server_shutdown = shutdown.subscribe();
    let server_task = tokio::spawn(server.run(listener, server_shutdown));

    wait_for_signal().await;
    shutdown.trigger();

    server_task.await??;
    tracing::info!("Shutdown complete");
    Ok(())
}
