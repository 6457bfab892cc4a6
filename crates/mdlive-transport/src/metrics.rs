//! Prometheus metrics for mdlive
//!
//! Metrics are exposed in Prometheus text format via HTTP.

use prometheus::{
    Encoder, HistogramOpts, HistogramVec, IntCounter, IntCounterVec, IntGauge, Opts, Registry,
    TextEncoder,
};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, error, info};

use crate::hub::HubStats;

/// mdlive metrics collector
#[derive(Clone)]
pub struct Metrics {
    registry: Registry,

    // Connection metrics
    pub connections_total: IntCounter,
    pub connections_active: IntGauge,

    // Request metrics
    pub requests_total: IntCounterVec,
    pub request_errors: IntCounterVec,
    pub request_duration_seconds: HistogramVec,

    // Hub metrics, sampled from the coordinator
    pub hub_connections: IntGauge,
    pub hub_documents: IntGauge,
    pub hub_subscriptions: IntGauge,
    pub hub_consumers_dropped: IntGauge,
    pub hub_connections_rejected: IntGauge,

    // Session metrics
    pub sessions_active: IntGauge,
}

impl Metrics {
    /// Create a new metrics collector
    pub fn new() -> prometheus::Result<Self> {
        let registry = Registry::new();

        let connections_total =
            IntCounter::new("mdlive_connections_total", "Total number of connections")?;
        let connections_active =
            IntGauge::new("mdlive_connections_active", "Number of open WebSocket connections")?;

        let requests_total = IntCounterVec::new(
            Opts::new("mdlive_requests_total", "Total number of requests processed"),
            &["request"],
        )?;
        let request_errors = IntCounterVec::new(
            Opts::new("mdlive_request_errors_total", "Total number of failed requests"),
            &["error_type"],
        )?;
        let request_duration_seconds = HistogramVec::new(
            HistogramOpts::new("mdlive_request_duration_seconds", "Request processing duration")
                .buckets(vec![0.0001, 0.0005, 0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0]),
            &["request"],
        )?;

        let hub_connections =
            IntGauge::new("mdlive_hub_connections", "Connections registered with the hub")?;
        let hub_documents =
            IntGauge::new("mdlive_hub_documents", "Documents with at least one subscriber")?;
        let hub_subscriptions =
            IntGauge::new("mdlive_hub_subscriptions", "Total document subscriptions")?;
        let hub_consumers_dropped = IntGauge::new(
            "mdlive_hub_consumers_dropped",
            "Connections dropped because their send buffer was full",
        )?;
        let hub_connections_rejected = IntGauge::new(
            "mdlive_hub_connections_rejected",
            "Connections refused at the connection limit",
        )?;

        let sessions_active =
            IntGauge::new("mdlive_sessions_active", "Document edit sessions in memory")?;

        registry.register(Box::new(connections_total.clone()))?;
        registry.register(Box::new(connections_active.clone()))?;
        registry.register(Box::new(requests_total.clone()))?;
        registry.register(Box::new(request_errors.clone()))?;
        registry.register(Box::new(request_duration_seconds.clone()))?;
        registry.register(Box::new(hub_connections.clone()))?;
        registry.register(Box::new(hub_documents.clone()))?;
        registry.register(Box::new(hub_subscriptions.clone()))?;
        registry.register(Box::new(hub_consumers_dropped.clone()))?;
        registry.register(Box::new(hub_connections_rejected.clone()))?;
        registry.register(Box::new(sessions_active.clone()))?;

        Ok(Self {
            registry,
            connections_total,
            connections_active,
            requests_total,
            request_errors,
            request_duration_seconds,
            hub_connections,
            hub_documents,
            hub_subscriptions,
            hub_consumers_dropped,
            hub_connections_rejected,
            sessions_active,
        })
    }

    /// Record a new connection
    pub fn record_connection(&self) {
        self.connections_total.inc();
        self.connections_active.inc();
    }

    /// Record a connection closed
    pub fn record_disconnection(&self) {
        self.connections_active.dec();
    }

    /// Record a processed request
    pub fn record_request(&self, request: &str, duration_secs: f64) {
        self.requests_total.with_label_values(&[request]).inc();
        self.request_duration_seconds
            .with_label_values(&[request])
            .observe(duration_secs);
    }

    /// Record a failed request
    pub fn record_error(&self, error_type: &str) {
        self.request_errors.with_label_values(&[error_type]).inc();
    }

    /// Copy a hub statistics sample into the gauges
    pub fn observe_hub(&self, stats: &HubStats) {
        self.hub_connections.set(stats.connections as i64);
        self.hub_documents.set(stats.documents as i64);
        self.hub_subscriptions.set(stats.subscriptions as i64);
        self.hub_consumers_dropped.set(stats.consumers_dropped as i64);
        self.hub_connections_rejected
            .set(stats.connections_rejected as i64);
    }

    pub fn set_session_count(&self, count: usize) {
        self.sessions_active.set(count as i64);
    }

    /// Export metrics in Prometheus text format
    pub fn export(&self) -> String {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();
        if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
            error!(error = %e, "Failed to encode metrics");
        }
        String::from_utf8(buffer).unwrap_or_default()
    }
}

/// HTTP server for metrics endpoint
pub struct MetricsServer {
    metrics: Arc<Metrics>,
    addr: SocketAddr,
}

impl MetricsServer {
    pub fn new(metrics: Arc<Metrics>, addr: SocketAddr) -> Self {
        Self { metrics, addr }
    }

    /// Bind the configured address and serve metrics
    pub async fn run(&self) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        let listener = TcpListener::bind(self.addr).await?;
        self.serve(listener).await
    }

    /// Serve metrics from an already bound listener
    pub async fn serve(
        &self,
        listener: TcpListener,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        info!(addr = %listener.local_addr()?, "Metrics endpoint listening");

        loop {
            match listener.accept().await {
                Ok((stream, _)) => {
                    tokio::spawn(respond(stream, self.metrics.clone()));
                }
                Err(e) => error!(error = %e, "Failed to accept metrics connection"),
            }
        }
    }
}

/// Answer one request; the first read is taken as the whole request line
async fn respond(mut stream: TcpStream, metrics: Arc<Metrics>) {
    let mut buf = [0u8; 1024];
    match stream.read(&mut buf).await {
        Ok(0) => {}
        Ok(n) => {
            let response = route(&String::from_utf8_lossy(&buf[..n]), &metrics);
            if let Err(e) = stream.write_all(response.as_bytes()).await {
                debug!(error = %e, "Failed to write metrics response");
            }
        }
        Err(e) => debug!(error = %e, "Failed to read metrics request"),
    }
}

/// Minimal HTTP routing for `/metrics` and `/health`
fn route(request: &str, metrics: &Metrics) -> String {
    if request.starts_with("GET /metrics") || request.starts_with("GET / ") {
        let body = metrics.export();
        format!(
            "HTTP/1.1 200 OK\r\n\
             Content-Type: text/plain; version=0.0.4; charset=utf-8\r\n\
             Content-Length: {}\r\n\
             \r\n\
             {}",
            body.len(),
            body
        )
    } else if request.starts_with("GET /health") {
        "HTTP/1.1 200 OK\r\n\
         Content-Type: text/plain\r\n\
         Content-Length: 2\r\n\
         \r\n\
         OK"
        .to_string()
    } else {
        "HTTP/1.1 404 Not Found\r\n\
         Content-Length: 0\r\n\
         \r\n"
            .to_string()
    }
}
