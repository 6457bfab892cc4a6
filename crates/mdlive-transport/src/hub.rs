//! Connection Hub - the single coordinator owning membership and subscriptions
//!
//! ```text
//! reader tasks --[HubCommand]--> Hub::run --[try_send Frame]--> per-connection buffer --> writer task
//! ```
//!
//! Every mutation of the live set and the subscription index happens inside
//! [`Hub::run`], one command at a time. Delivery never blocks: a connection whose
//! buffer is full is closed and unregistered on the spot.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use mdlive_core::DocumentId;
use mdlive_protocol::ServerResponse;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

/// Hub-assigned connection identifier
pub type ConnectionId = u64;

/// An encoded JSON text frame, shared between all recipients of a fan-out
pub type Frame = Arc<str>;

/// Error text sent to a connection refused because the hub is full
pub const CAPACITY_ERROR: &str = "server at capacity";

/// The hub's end of one connection
pub struct ConnectionHandle {
    id: ConnectionId,
    label: String,
    /// `None` once closed; taking it is the only way to close
    sender: Option<mpsc::Sender<Frame>>,
    /// Documents this connection is subscribed to
    documents: HashSet<String>,
}

impl ConnectionHandle {
    /// Create a handle and the receiving end its writer drains.
    /// `capacity` is clamped to at least one frame.
    pub fn new(
        id: ConnectionId,
        label: impl Into<String>,
        capacity: usize,
    ) -> (Self, mpsc::Receiver<Frame>) {
        let (sender, receiver) = mpsc::channel(capacity.max(1));
        let handle = Self {
            id,
            label: label.into(),
            sender: Some(sender),
            documents: HashSet::new(),
        };
        (handle, receiver)
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    fn try_send(&self, frame: Frame) -> Result<(), TrySendError<Frame>> {
        match &self.sender {
            Some(sender) => sender.try_send(frame),
            None => Err(TrySendError::Closed(frame)),
        }
    }

    fn close(&mut self) {
        self.sender.take();
    }
}

/// Requests processed by the coordinator
pub enum HubCommand {
    Register(ConnectionHandle),
    Unregister(ConnectionId),
    Subscribe {
        connection: ConnectionId,
        document_id: DocumentId,
    },
    Unsubscribe {
        connection: ConnectionId,
        document_id: DocumentId,
    },
    /// Deliver to a single connection
    Reply {
        connection: ConnectionId,
        frame: Frame,
    },
    /// Deliver to every subscriber of a document, optionally skipping one
    Dispatch {
        document_id: DocumentId,
        frame: Frame,
        exclude: Option<ConnectionId>,
    },
    BroadcastAll(Frame),
    Stats(oneshot::Sender<HubStats>),
}

/// Point-in-time hub counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HubStats {
    pub connections: usize,
    pub documents: usize,
    pub subscriptions: usize,
    pub frames_delivered: u64,
    pub consumers_dropped: u64,
    pub connections_rejected: u64,
}

/// Hub state; owned by the coordinator task once [`run`](Hub::run) starts
pub struct Hub {
    rx: mpsc::UnboundedReceiver<HubCommand>,
    connections: HashMap<ConnectionId, ConnectionHandle>,
    documents: HashMap<String, HashSet<ConnectionId>>,
    max_connections: usize,
    frames_delivered: u64,
    consumers_dropped: u64,
    connections_rejected: u64,
}

impl Hub {
    /// Create a hub and the handle used to submit commands to it
    pub fn new(max_connections: usize) -> (Self, HubHandle) {
        let (tx, rx) = mpsc::unbounded_channel();
        let hub = Self {
            rx,
            connections: HashMap::new(),
            documents: HashMap::new(),
            max_connections: max_connections.max(1),
            frames_delivered: 0,
            consumers_dropped: 0,
            connections_rejected: 0,
        };
        (hub, HubHandle { tx })
    }

    /// Process commands until every [`HubHandle`] is dropped
    pub async fn run(mut self) {
        info!(max_connections = self.max_connections, "Hub coordinator started");

        while let Some(command) = self.rx.recv().await {
            self.handle(command);
        }

        let ids: Vec<ConnectionId> = self.connections.keys().copied().collect();
        for id in ids {
            self.unregister(id);
        }
        info!("Hub coordinator stopped");
    }

    pub fn handle(&mut self, command: HubCommand) {
        match command {
            HubCommand::Register(handle) => self.register(handle),
            HubCommand::Unregister(id) => {
                self.unregister(id);
            }
            HubCommand::Subscribe {
                connection,
                document_id,
            } => self.subscribe(connection, &document_id),
            HubCommand::Unsubscribe {
                connection,
                document_id,
            } => self.unsubscribe(connection, &document_id),
            HubCommand::Reply { connection, frame } => {
                self.deliver(connection, &frame);
            }
            HubCommand::Dispatch {
                document_id,
                frame,
                exclude,
            } => {
                self.dispatch(&document_id, &frame, exclude);
            }
            HubCommand::BroadcastAll(frame) => {
                self.broadcast_all(&frame);
            }
            HubCommand::Stats(reply) => {
                let _ = reply.send(self.stats());
            }
        }
    }

    /// Add a connection and acknowledge it. A connection over the limit gets an
    /// error frame instead and is closed; one whose buffer cannot take the
    /// acknowledgement is closed without being added.
    pub fn register(&mut self, mut handle: ConnectionHandle) {
        if self.connections.len() >= self.max_connections {
            self.connections_rejected += 1;
            warn!(client = %handle.label, limit = self.max_connections, "Rejecting connection, hub at capacity");
            let _ = handle.try_send(Frame::from(ServerResponse::error(CAPACITY_ERROR).to_json()));
            handle.close();
            return;
        }

        if let Err(e) = handle.try_send(Frame::from(ServerResponse::connected().to_json())) {
            if matches!(e, TrySendError::Full(_)) {
                self.consumers_dropped += 1;
            }
            debug!(client = %handle.label, "Connection gone before acknowledgement");
            handle.close();
            return;
        }

        self.frames_delivered += 1;
        info!(client = %handle.label, connections = self.connections.len() + 1, "Client registered");
        self.connections.insert(handle.id, handle);
    }

    /// Remove a connection and all its subscriptions, closing its buffer.
    /// Returns false when the connection was not registered.
    pub fn unregister(&mut self, id: ConnectionId) -> bool {
        let Some(mut handle) = self.connections.remove(&id) else {
            return false;
        };

        for document in handle.documents.drain() {
            if let Some(subscribers) = self.documents.get_mut(&document) {
                subscribers.remove(&id);
                if subscribers.is_empty() {
                    self.documents.remove(&document);
                }
            }
        }
        handle.close();

        info!(client = %handle.label, connections = self.connections.len(), "Client unregistered");
        true
    }

    pub fn subscribe(&mut self, id: ConnectionId, document_id: &DocumentId) {
        let Some(handle) = self.connections.get_mut(&id) else {
            return;
        };
        let key = document_id.as_str();
        handle.documents.insert(key.to_string());
        self.documents.entry(key.to_string()).or_default().insert(id);
        debug!(client = %handle.label, document = %document_id, "Subscribed");
    }

    pub fn unsubscribe(&mut self, id: ConnectionId, document_id: &DocumentId) {
        let Some(handle) = self.connections.get_mut(&id) else {
            return;
        };
        let key = document_id.as_str();
        handle.documents.remove(key);
        if let Some(subscribers) = self.documents.get_mut(key) {
            subscribers.remove(&id);
            if subscribers.is_empty() {
                self.documents.remove(key);
            }
        }
        debug!(client = %handle.label, document = %document_id, "Unsubscribed");
    }

    /// Fan a frame out to every subscriber of `document_id` except `exclude`.
    /// Returns the number of connections that accepted it.
    pub fn dispatch(
        &mut self,
        document_id: &DocumentId,
        frame: &Frame,
        exclude: Option<ConnectionId>,
    ) -> usize {
        let targets: Vec<ConnectionId> = match self.documents.get(document_id.as_str()) {
            Some(subscribers) => subscribers
                .iter()
                .copied()
                .filter(|id| Some(*id) != exclude)
                .collect(),
            None => return 0,
        };

        let delivered = targets.into_iter().filter(|id| self.deliver(*id, frame)).count();
        debug!(document = %document_id, subscribers = delivered, "Dispatched");
        delivered
    }

    /// Send a frame to every live connection
    pub fn broadcast_all(&mut self, frame: &Frame) -> usize {
        let targets: Vec<ConnectionId> = self.connections.keys().copied().collect();
        targets.into_iter().filter(|id| self.deliver(*id, frame)).count()
    }

    pub fn stats(&self) -> HubStats {
        HubStats {
            connections: self.connections.len(),
            documents: self.documents.len(),
            subscriptions: self.documents.values().map(HashSet::len).sum(),
            frames_delivered: self.frames_delivered,
            consumers_dropped: self.consumers_dropped,
            connections_rejected: self.connections_rejected,
        }
    }

    pub fn is_registered(&self, id: ConnectionId) -> bool {
        self.connections.contains_key(&id)
    }

    /// Non-blocking enqueue; a full or closed buffer unregisters the connection
    fn deliver(&mut self, id: ConnectionId, frame: &Frame) -> bool {
        let Some(handle) = self.connections.get(&id) else {
            return false;
        };

        match handle.try_send(frame.clone()) {
            Ok(()) => {
                self.frames_delivered += 1;
                return true;
            }
            Err(TrySendError::Full(_)) => {
                self.consumers_dropped += 1;
                warn!(client = %handle.label, "Dropping slow consumer, send buffer full");
            }
            Err(TrySendError::Closed(_)) => {
                debug!(client = %handle.label, "Writer already gone");
            }
        }

        self.unregister(id);
        false
    }
}

/// Cloneable submission side of the hub
#[derive(Clone)]
pub struct HubHandle {
    tx: mpsc::UnboundedSender<HubCommand>,
}

impl HubHandle {
    /// Submit a command; false when the coordinator has stopped
    pub fn send(&self, command: HubCommand) -> bool {
        self.tx.send(command).is_ok()
    }

    pub fn register(&self, handle: ConnectionHandle) -> bool {
        self.send(HubCommand::Register(handle))
    }

    pub fn unregister(&self, connection: ConnectionId) -> bool {
        self.send(HubCommand::Unregister(connection))
    }

    pub fn subscribe(&self, connection: ConnectionId, document_id: DocumentId) -> bool {
        self.send(HubCommand::Subscribe {
            connection,
            document_id,
        })
    }

    pub fn unsubscribe(&self, connection: ConnectionId, document_id: DocumentId) -> bool {
        self.send(HubCommand::Unsubscribe {
            connection,
            document_id,
        })
    }

    pub fn reply(&self, connection: ConnectionId, response: &ServerResponse) -> bool {
        self.send(HubCommand::Reply {
            connection,
            frame: Frame::from(response.to_json()),
        })
    }

    pub fn dispatch(
        &self,
        document_id: DocumentId,
        response: &ServerResponse,
        exclude: Option<ConnectionId>,
    ) -> bool {
        self.send(HubCommand::Dispatch {
            document_id,
            frame: Frame::from(response.to_json()),
            exclude,
        })
    }

    pub fn broadcast_all(&self, response: &ServerResponse) -> bool {
        self.send(HubCommand::BroadcastAll(Frame::from(response.to_json())))
    }

    /// Query counters; `None` when the coordinator has stopped.
    ///
    /// The answer reflects every command this handle submitted before the call.
    pub async fn stats(&self) -> Option<HubStats> {
        let (reply, rx) = oneshot::channel();
        if !self.send(HubCommand::Stats(reply)) {
            return None;
        }
        rx.await.ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mdlive_protocol::ResponseKind;
    use tokio::sync::mpsc::error::TryRecvError;

    fn doc(id: &str) -> DocumentId {
        DocumentId::new(id).unwrap()
    }

    fn frame(text: &str) -> Frame {
        Frame::from(text)
    }

    fn kind_of(frame: &Frame) -> ResponseKind {
        serde_json::from_str::<ServerResponse>(frame).unwrap().kind
    }

    #[test]
    fn test_register_sends_connected() {
        let (mut hub, _handle) = Hub::new(10);
        let (conn, mut rx) = ConnectionHandle::new(1, "test:1", 4);
        hub.register(conn);

        assert!(hub.is_registered(1));
        assert_eq!(kind_of(&rx.try_recv().unwrap()), ResponseKind::Connected);
    }

    #[test]
    fn test_capacity_rejects_with_error() {
        let (mut hub, _handle) = Hub::new(1);
        let (first, _rx1) = ConnectionHandle::new(1, "first", 4);
        let (second, mut rx2) = ConnectionHandle::new(2, "second", 4);
        hub.register(first);
        hub.register(second);

        assert!(!hub.is_registered(2));
        let response: ServerResponse = serde_json::from_str(&rx2.try_recv().unwrap()).unwrap();
        assert_eq!(response.kind, ResponseKind::Error);
        assert_eq!(response.error.as_deref(), Some(CAPACITY_ERROR));
        // Closed after the error frame
        assert_eq!(rx2.try_recv(), Err(TryRecvError::Disconnected));
        assert_eq!(hub.stats().connections_rejected, 1);
    }

    #[test]
    fn test_backpressure_drops_only_slow_consumer() {
        let (mut hub, _handle) = Hub::new(10);
        let (slow, mut slow_rx) = ConnectionHandle::new(1, "slow", 1);
        let (fast, mut fast_rx) = ConnectionHandle::new(2, "fast", 8);
        hub.register(slow);
        hub.register(fast);
        slow_rx.try_recv().unwrap();
        fast_rx.try_recv().unwrap();

        let id = doc("doc:1");
        hub.subscribe(1, &id);
        hub.subscribe(2, &id);

        // First dispatch fills the slow buffer, second overflows it
        assert_eq!(hub.dispatch(&id, &frame("one"), None), 2);
        assert_eq!(hub.dispatch(&id, &frame("two"), None), 1);

        assert!(!hub.is_registered(1));
        assert!(hub.is_registered(2));
        let stats = hub.stats();
        assert_eq!(stats.connections, 1);
        assert_eq!(stats.subscriptions, 1);
        assert_eq!(stats.consumers_dropped, 1);

        assert_eq!(&*fast_rx.try_recv().unwrap(), "one");
        assert_eq!(&*fast_rx.try_recv().unwrap(), "two");

        // The slow consumer keeps what it had, then sees its buffer closed
        assert_eq!(&*slow_rx.try_recv().unwrap(), "one");
        assert_eq!(slow_rx.try_recv(), Err(TryRecvError::Disconnected));
    }

    #[test]
    fn test_dispatch_without_subscribers_is_noop() {
        let (mut hub, _handle) = Hub::new(10);
        let (conn, mut rx) = ConnectionHandle::new(1, "lonely", 4);
        hub.register(conn);
        rx.try_recv().unwrap();

        assert_eq!(hub.dispatch(&doc("nobody"), &frame("x"), None), 0);
        assert_eq!(rx.try_recv(), Err(TryRecvError::Empty));
        assert!(hub.is_registered(1));
    }

    #[test]
    fn test_dispatch_excludes_sender() {
        let (mut hub, _handle) = Hub::new(10);
        let (a, mut rx_a) = ConnectionHandle::new(1, "a", 4);
        let (b, mut rx_b) = ConnectionHandle::new(2, "b", 4);
        hub.register(a);
        hub.register(b);
        rx_a.try_recv().unwrap();
        rx_b.try_recv().unwrap();

        let id = doc("shared");
        hub.subscribe(1, &id);
        hub.subscribe(2, &id);
        assert_eq!(hub.dispatch(&id, &frame("edit"), Some(1)), 1);

        assert!(rx_a.try_recv().is_err());
        assert_eq!(&*rx_b.try_recv().unwrap(), "edit");
    }

    #[test]
    fn test_subscriptions_are_idempotent() {
        let (mut hub, _handle) = Hub::new(10);
        let (conn, _rx) = ConnectionHandle::new(1, "c", 4);
        hub.register(conn);

        let id = doc("d");
        hub.subscribe(1, &id);
        hub.subscribe(1, &id);
        assert_eq!(hub.stats().subscriptions, 1);

        hub.unsubscribe(1, &id);
        hub.unsubscribe(1, &id);
        let stats = hub.stats();
        assert_eq!(stats.subscriptions, 0);
        assert_eq!(stats.documents, 0);
        assert!(hub.is_registered(1));

        // Unknown connections are ignored
        hub.subscribe(99, &id);
        assert_eq!(hub.stats().documents, 0);
    }

    #[test]
    fn test_unregister_purges_and_is_idempotent() {
        let (mut hub, _handle) = Hub::new(10);
        let (conn, mut rx) = ConnectionHandle::new(1, "c", 4);
        hub.register(conn);
        hub.subscribe(1, &doc("x"));
        hub.subscribe(1, &doc("y"));

        assert!(hub.unregister(1));
        assert!(!hub.unregister(1));
        assert_eq!(hub.stats(), HubStats {
            frames_delivered: 1,
            ..HubStats::default()
        });

        rx.try_recv().unwrap();
        assert_eq!(rx.try_recv(), Err(TryRecvError::Disconnected));
    }

    #[test]
    fn test_broadcast_all_ignores_subscriptions() {
        let (mut hub, _handle) = Hub::new(10);
        let (a, mut rx_a) = ConnectionHandle::new(1, "a", 4);
        let (b, mut rx_b) = ConnectionHandle::new(2, "b", 4);
        hub.register(a);
        hub.register(b);
        rx_a.try_recv().unwrap();
        rx_b.try_recv().unwrap();

        assert_eq!(hub.broadcast_all(&frame("all")), 2);
        assert_eq!(&*rx_a.try_recv().unwrap(), "all");
        assert_eq!(&*rx_b.try_recv().unwrap(), "all");
    }

    #[test]
    fn test_closed_writer_is_unregistered() {
        let (mut hub, _handle) = Hub::new(10);
        let (conn, rx) = ConnectionHandle::new(1, "gone", 4);
        hub.register(conn);
        drop(rx);

        assert_eq!(hub.broadcast_all(&frame("x")), 0);
        assert!(!hub.is_registered(1));
        assert_eq!(hub.stats().consumers_dropped, 0);
    }

    #[tokio::test]
    async fn test_coordinator_processes_in_order() {
        let (hub, handle) = Hub::new(10);
        let task = tokio::spawn(hub.run());

        let (conn, mut rx) = ConnectionHandle::new(7, "async", 8);
        handle.register(conn);
        handle.subscribe(7, doc("live"));
        handle.dispatch(doc("live"), &ServerResponse::connected(), None);

        let stats = handle.stats().await.unwrap();
        assert_eq!(stats.connections, 1);
        assert_eq!(stats.subscriptions, 1);

        assert_eq!(kind_of(&rx.recv().await.unwrap()), ResponseKind::Connected);
        assert_eq!(kind_of(&rx.recv().await.unwrap()), ResponseKind::Connected);

        handle.unregister(7);
        assert!(rx.recv().await.is_none());

        drop(handle);
        task.await.unwrap();
    }
}
