//! WebSocket transport for mdlive

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures_util::{Sink, SinkExt, StreamExt};
use mdlive_core::SessionManager;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::time::{interval_at, timeout, Instant};
use tokio_tungstenite::accept_async_with_config;
use tokio_tungstenite::tungstenite::protocol::WebSocketConfig;
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tracing::{debug, error, info, warn};

use crate::handler::ConnectionHandler;
use crate::hub::{ConnectionHandle, ConnectionId, Frame, HubHandle};
#[cfg(feature = "metrics")]
use crate::metrics::Metrics;

/// Per-connection limits and keep-alive timing
#[derive(Debug, Clone)]
pub struct TransportConfig {
    /// Largest inbound message accepted, in bytes
    pub max_message_size: usize,
    /// Outbound frames buffered per connection before it counts as a slow consumer
    pub send_buffer: usize,
    /// Interval between pings sent by the writer
    pub ping_period: Duration,
    /// Maximum silence from the peer before the connection is dropped
    pub pong_wait: Duration,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            max_message_size: 512 * 1024,
            send_buffer: 256,
            ping_period: Duration::from_secs(54),
            pong_wait: Duration::from_secs(60),
        }
    }
}

/// WebSocket Server for mdlive
pub struct WebSocketServer {
    hub: HubHandle,
    sessions: Arc<SessionManager>,
    addr: SocketAddr,
    config: TransportConfig,
    client_counter: AtomicU64,
    #[cfg(feature = "metrics")]
    metrics: Option<Arc<Metrics>>,
}

impl WebSocketServer {
    pub fn new(
        hub: HubHandle,
        sessions: Arc<SessionManager>,
        addr: SocketAddr,
        config: TransportConfig,
    ) -> Self {
        Self {
            hub,
            sessions,
            addr,
            config,
            client_counter: AtomicU64::new(0),
            #[cfg(feature = "metrics")]
            metrics: None,
        }
    }

    /// Record connection and request metrics
    #[cfg(feature = "metrics")]
    pub fn with_metrics(mut self, metrics: Arc<Metrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Bind the configured address and start the WebSocket server
    pub async fn run(&self) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        let listener = TcpListener::bind(self.addr).await?;
        self.serve(listener).await
    }

    /// Accept connections from an already bound listener
    pub async fn serve(
        &self,
        listener: TcpListener,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        info!(addr = %listener.local_addr()?, "mdlive WebSocket server listening");

        loop {
            match listener.accept().await {
                Ok((stream, peer_addr)) => {
                    let id = self.client_counter.fetch_add(1, Ordering::Relaxed);
                    let label = format!("ws:{}:{}", peer_addr, id);
                    let connection = Connection {
                        id,
                        label: label.clone(),
                        hub: self.hub.clone(),
                        sessions: self.sessions.clone(),
                        config: self.config.clone(),
                        #[cfg(feature = "metrics")]
                        metrics: self.metrics.clone(),
                    };

                    tokio::spawn(async move {
                        if let Err(e) = connection.handle(stream).await {
                            error!(client = %label, error = %e, "WebSocket connection error");
                        }
                    });
                }
                Err(e) => {
                    error!(error = %e, "Failed to accept connection");
                }
            }
        }
    }
}

/// Everything one connection task needs
struct Connection {
    id: ConnectionId,
    label: String,
    hub: HubHandle,
    sessions: Arc<SessionManager>,
    config: TransportConfig,
    #[cfg(feature = "metrics")]
    metrics: Option<Arc<Metrics>>,
}

impl Connection {
    async fn handle(
        self,
        stream: TcpStream,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        let mut ws_config = WebSocketConfig::default();
        ws_config.max_message_size = Some(self.config.max_message_size);
        ws_config.max_frame_size = Some(self.config.max_message_size);

        let ws_stream = accept_async_with_config(stream, Some(ws_config)).await?;
        let (write, mut read) = ws_stream.split();

        info!(client = %self.label, "WebSocket client connected");
        #[cfg(feature = "metrics")]
        if let Some(metrics) = &self.metrics {
            metrics.record_connection();
        }

        let (handle, outbound) =
            ConnectionHandle::new(self.id, self.label.clone(), self.config.send_buffer);
        if !self.hub.register(handle) {
            warn!(client = %self.label, "Hub is not running");
            return Ok(());
        }
        let mut handler =
            ConnectionHandler::new(self.id, self.label.clone(), self.hub.clone(), self.sessions.clone());

        let mut writer = tokio::spawn(write_loop(write, outbound, self.config.ping_period));

        // Reader: any inbound message, pongs included, resets the silence window
        let writer_finished = loop {
            tokio::select! {
                msg = timeout(self.config.pong_wait, read.next()) => match msg {
                    Ok(Some(Ok(Message::Text(text)))) => self.process(&mut handler, &text),
                    Ok(Some(Ok(Message::Binary(data)))) => match std::str::from_utf8(&data) {
                        Ok(text) => self.process(&mut handler, text),
                        Err(_) => debug!(client = %self.label, "Ignoring non UTF-8 binary frame"),
                    },
                    Ok(Some(Ok(Message::Close(_)))) | Ok(None) => {
                        info!(client = %self.label, "WebSocket client disconnected");
                        break false;
                    }
                    Ok(Some(Ok(_))) => {}
                    Ok(Some(Err(e))) => {
                        warn!(client = %self.label, error = %e, "WebSocket read error");
                        break false;
                    }
                    Err(_) => {
                        warn!(client = %self.label, wait = ?self.config.pong_wait, "Peer silent too long");
                        break false;
                    }
                },
                result = &mut writer => {
                    match result {
                        Ok(Ok(())) => debug!(client = %self.label, "Writer closed by hub"),
                        Ok(Err(e)) => warn!(client = %self.label, error = %e, "WebSocket write error"),
                        Err(e) => error!(client = %self.label, error = %e, "Writer task failed"),
                    }
                    break true;
                }
            }
        };

        self.hub.unregister(self.id);
        if !writer_finished {
            writer.abort();
        }

        #[cfg(feature = "metrics")]
        if let Some(metrics) = &self.metrics {
            metrics.record_disconnection();
        }
        Ok(())
    }

    fn process(&self, handler: &mut ConnectionHandler, text: &str) {
        #[cfg(feature = "metrics")]
        let started = std::time::Instant::now();

        let result = handler.process(text);

        #[cfg(feature = "metrics")]
        if let Some(metrics) = &self.metrics {
            match &result {
                Ok(kind) => metrics.record_request(kind, started.elapsed().as_secs_f64()),
                Err(e) => metrics.record_error(e.code()),
            }
        }
        #[cfg(not(feature = "metrics"))]
        let _ = result;
    }
}

/// Writer: drains the hub-fed buffer and keeps the peer alive.
/// Returns once the hub closes the buffer.
async fn write_loop<S>(
    mut write: S,
    mut outbound: mpsc::Receiver<Frame>,
    ping_period: Duration,
) -> Result<(), WsError>
where
    S: Sink<Message, Error = WsError> + Unpin,
{
    let mut ticker = interval_at(Instant::now() + ping_period, ping_period);
    loop {
        tokio::select! {
            frame = outbound.recv() => match frame {
                Some(frame) => write.send(Message::Text(frame.to_string())).await?,
                None => {
                    let _ = write.send(Message::Close(None)).await;
                    return Ok(());
                }
            },
            _ = ticker.tick() => write.send(Message::Ping(Vec::new())).await?,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hub::Hub;
    use mdlive_core::MarkdownRenderer;
    use mdlive_protocol::{ResponseKind, ServerResponse};
    use futures_util::Stream;
    use tokio_tungstenite::connect_async;

    async fn start(max_connections: usize) -> SocketAddr {
        start_with(max_connections, TransportConfig::default()).await.0
    }

    async fn start_with(max_connections: usize, config: TransportConfig) -> (SocketAddr, HubHandle) {
        let (hub, handle) = Hub::new(max_connections);
        tokio::spawn(hub.run());

        let sessions = Arc::new(SessionManager::new(Arc::new(MarkdownRenderer::default())));
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let server = WebSocketServer::new(handle.clone(), sessions, addr, config);
        tokio::spawn(async move { server.serve(listener).await });
        (addr, handle)
    }

    /// Poll hub stats until the live connection count reaches `expected`
    async fn wait_for_connections(hub: &HubHandle, expected: usize) {
        let reached = timeout(Duration::from_secs(5), async {
            loop {
                if hub.stats().await.unwrap().connections == expected {
                    return;
                }
                tokio::time::sleep(Duration::from_millis(20)).await;
            }
        })
        .await;
        assert!(reached.is_ok(), "hub never reached {} connections", expected);
    }

    async fn next_response<S>(read: &mut S) -> ServerResponse
    where
        S: Stream<Item = Result<Message, WsError>> + Unpin,
    {
        loop {
            match read.next().await.unwrap().unwrap() {
                Message::Text(text) => return serde_json::from_str(&text).unwrap(),
                _ => continue,
            }
        }
    }

    #[tokio::test]
    async fn test_round_trip_over_websocket() {
        let addr = start(8).await;
        let (ws, _) = connect_async(format!("ws://{}", addr)).await.unwrap();
        let (mut write, mut read) = ws.split();

        assert_eq!(next_response(&mut read).await.kind, ResponseKind::Connected);

        write
            .send(Message::Text(r##"{"type":"parse","content":"# Live"}"##.into()))
            .await
            .unwrap();
        let response = next_response(&mut read).await;
        assert_eq!(response.kind, ResponseKind::Parsed);
        assert!(response.data.unwrap()["html"]
            .as_str()
            .unwrap()
            .contains("<h1>Live</h1>"));
    }

    #[tokio::test]
    async fn test_connection_over_capacity_is_refused() {
        let addr = start(1).await;
        let (first, _) = connect_async(format!("ws://{}", addr)).await.unwrap();
        let (_first_write, mut first_read) = first.split();
        assert_eq!(next_response(&mut first_read).await.kind, ResponseKind::Connected);

        let (second, _) = connect_async(format!("ws://{}", addr)).await.unwrap();
        let (_second_write, mut second_read) = second.split();
        let response = next_response(&mut second_read).await;
        assert_eq!(response.kind, ResponseKind::Error);
        assert_eq!(response.error.as_deref(), Some(crate::hub::CAPACITY_ERROR));
    }

    #[tokio::test]
    async fn test_silent_peer_is_unregistered() {
        let config = TransportConfig {
            ping_period: Duration::from_millis(100),
            pong_wait: Duration::from_millis(300),
            ..TransportConfig::default()
        };
        let (addr, hub) = start_with(8, config).await;

        // Never polled again, so pings go unanswered
        let (ws, _) = connect_async(format!("ws://{}", addr)).await.unwrap();
        wait_for_connections(&hub, 1).await;
        wait_for_connections(&hub, 0).await;
        drop(ws);
    }

    #[tokio::test]
    async fn test_oversized_message_closes_connection() {
        let config = TransportConfig {
            max_message_size: 1024,
            ..TransportConfig::default()
        };
        let (addr, hub) = start_with(8, config).await;

        let (ws, _) = connect_async(format!("ws://{}", addr)).await.unwrap();
        let (mut write, mut read) = ws.split();
        assert_eq!(next_response(&mut read).await.kind, ResponseKind::Connected);

        let content = "x".repeat(4096);
        let message = serde_json::json!({"type": "parse", "content": content}).to_string();
        write.send(Message::Text(message)).await.unwrap();

        let closed = timeout(Duration::from_secs(5), async {
            loop {
                match read.next().await {
                    Some(Ok(Message::Text(text))) => {
                        let response: ServerResponse = serde_json::from_str(&text).unwrap();
                        assert_ne!(response.kind, ResponseKind::Parsed);
                    }
                    Some(Ok(Message::Close(_))) | Some(Err(_)) | None => return,
                    Some(Ok(_)) => {}
                }
            }
        })
        .await;
        assert!(closed.is_ok(), "connection stayed open");
        wait_for_connections(&hub, 0).await;
    }
}
