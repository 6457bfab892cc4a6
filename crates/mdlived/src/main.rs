//! mdlive Daemon (mdlived)
//!
//! Live markdown preview server: renders documents sent over WebSocket, diffs them
//! block by block and fans the changes out to every subscriber of the document.
//!
//! # Usage
//!
//! ```bash
//! # Start with defaults (WebSocket on 0.0.0.0:8080)
//! mdlived
//!
//! # Custom port
//! mdlived --port 9000
//!
//! # With Prometheus metrics
//! mdlived --metrics-port 9100
//!
//! # With configuration file
//! mdlived --config /etc/mdlive/mdlive.toml
//! ```

mod config;

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{debug, error, info};
use tracing_subscriber::EnvFilter;

use mdlive_core::{MarkdownRenderer, SessionManager};
use mdlive_transport::{Hub, HubHandle, Metrics, MetricsServer, WebSocketServer};

use crate::config::Config;

/// mdlive Daemon - live markdown preview server
#[derive(Parser, Debug)]
#[command(name = "mdlived")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Configuration file path
    #[arg(short, long, env = "MDLIVE_CONFIG")]
    config: Option<PathBuf>,

    /// Bind address (overrides the config file)
    #[arg(long, env = "MDLIVE_BIND")]
    bind: Option<String>,

    /// WebSocket port (overrides the config file)
    #[arg(long, env = "MDLIVE_PORT")]
    port: Option<u16>,

    /// Log level (trace, debug, info, warn, error); RUST_LOG takes precedence
    #[arg(long, env = "MDLIVE_LOG_LEVEL", default_value = "info")]
    log_level: String,

    /// Serve Prometheus metrics on this port
    #[arg(long, env = "MDLIVE_METRICS_PORT")]
    metrics_port: Option<u16>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&args.log_level))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .init();

    // Print banner
    print_banner();

    let mut config = match &args.config {
        Some(path) => {
            info!(path = %path.display(), "Loading configuration");
            Config::load_from_path(path)?
        }
        None => Config::default(),
    };
    if let Some(bind) = args.bind {
        config.server.bind = bind;
    }
    if let Some(port) = args.port {
        config.server.port = port;
    }
    if let Some(port) = args.metrics_port {
        config.metrics.port = Some(port);
    }

    let ws_addr: SocketAddr = format!("{}:{}", config.server.bind, config.server.port)
        .parse()
        .with_context(|| format!("Invalid bind address {}:{}", config.server.bind, config.server.port))?;

    // Shared renderer and per-document sessions
    let renderer = Arc::new(MarkdownRenderer::new(config.render_options()));
    let sessions = Arc::new(
        SessionManager::new(renderer).with_max_diff_cells(config.parser.max_diff_cells),
    );

    let (hub, hub_handle) = Hub::new(config.websocket.max_connections);

    info!(
        addr = %ws_addr,
        max_connections = config.websocket.max_connections,
        max_content_size = config.parser.max_content_size,
        metrics = config.metrics.port.is_some(),
        "Starting mdlive daemon"
    );

    let mut handles = Vec::new();
    handles.push(tokio::spawn(hub.run()));

    let metrics = match config.metrics.port {
        Some(port) => {
            let metrics = Arc::new(Metrics::new().context("Failed to create metrics registry")?);
            let metrics_addr: SocketAddr = format!("{}:{}", config.server.bind, port).parse()?;
            let server = MetricsServer::new(metrics.clone(), metrics_addr);
            handles.push(tokio::spawn(async move {
                if let Err(e) = server.run().await {
                    error!(error = %e, "Metrics server error");
                }
            }));
            Some(metrics)
        }
        None => None,
    };

    let mut ws_server = WebSocketServer::new(
        hub_handle.clone(),
        sessions.clone(),
        ws_addr,
        config.transport(),
    );
    if let Some(ref m) = metrics {
        ws_server = ws_server.with_metrics(m.clone());
    }
    handles.push(tokio::spawn(async move {
        if let Err(e) = ws_server.run().await {
            error!(error = %e, "WebSocket server error");
        }
    }));

    // Start background GC task
    handles.push(tokio::spawn(session_gc(
        sessions.clone(),
        hub_handle,
        metrics,
        config.clone(),
    )));

    // Wait for shutdown signal
    tokio::signal::ctrl_c().await?;
    info!("Shutting down...");

    for handle in handles {
        handle.abort();
    }

    Ok(())
}

/// Evict idle document sessions and sample hub statistics
async fn session_gc(
    sessions: Arc<SessionManager>,
    hub: HubHandle,
    metrics: Option<Arc<Metrics>>,
    config: Config,
) {
    let idle_timeout = config.idle_timeout();
    let mut interval = tokio::time::interval(config.gc_interval());
    loop {
        interval.tick().await;
        let removed = sessions.gc(idle_timeout);
        if removed > 0 {
            info!(removed = removed, "GC: removed idle document sessions");
        }

        let Some(stats) = hub.stats().await else {
            break;
        };
        debug!(
            connections = stats.connections,
            documents = stats.documents,
            subscriptions = stats.subscriptions,
            dropped = stats.consumers_dropped,
            "Hub stats"
        );
        if let Some(m) = &metrics {
            m.observe_hub(&stats);
            m.set_session_count(sessions.stats().document_count);
        }
    }
}

fn print_banner() {
    println!(
        r#"
  ┌┬┐┌┬┐┬  ┬┬  ┬┌─┐
  │││ ││   │└┐┌┘├┤
  ┴ ┴─┴┘┴─┘┴ └┘ └─┘
  Live markdown preview server
  Version {}
"#,
        env!("CARGO_PKG_VERSION")
    );
}
