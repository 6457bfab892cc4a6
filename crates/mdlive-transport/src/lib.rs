//! mdlive Transport Layer
//!
//! Provides the live-preview fan-out:
//! - Hub: single coordinator owning connections and document subscriptions
//! - Handler: turns inbound frames into edit-session calls
//! - WebSocket: browser transport with keep-alive (default feature)
//! - Metrics: Prometheus metrics (optional feature)

pub mod handler;
pub mod hub;
#[cfg(feature = "metrics")]
pub mod metrics;
#[cfg(feature = "websocket")]
pub mod websocket;

pub use handler::ConnectionHandler;
pub use hub::{ConnectionHandle, ConnectionId, Frame, Hub, HubCommand, HubHandle, HubStats};
#[cfg(feature = "metrics")]
pub use metrics::{Metrics, MetricsServer};
#[cfg(feature = "websocket")]
pub use websocket::{TransportConfig, WebSocketServer};
