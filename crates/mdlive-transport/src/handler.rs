//! Connection handler - turns inbound frames into session calls and hub commands

use std::sync::Arc;

use mdlive_core::{EditSession, SessionManager};
use mdlive_protocol::{ProtocolError, ProtocolResult, Request, ServerResponse};
use tracing::debug;

use crate::hub::{ConnectionId, HubHandle};

/// Handles the inbound side of a single client connection
pub struct ConnectionHandler {
    connection: ConnectionId,
    /// Human-readable client label for logs
    label: String,
    hub: HubHandle,
    sessions: Arc<SessionManager>,
    /// Used for requests that name no document
    private: EditSession,
}

impl ConnectionHandler {
    pub fn new(
        connection: ConnectionId,
        label: impl Into<String>,
        hub: HubHandle,
        sessions: Arc<SessionManager>,
    ) -> Self {
        let private = sessions.new_private_session();
        Self {
            connection,
            label: label.into(),
            hub,
            sessions,
            private,
        }
    }

    pub fn connection(&self) -> ConnectionId {
        self.connection
    }

    /// Process one text frame. Every outcome, including failures, is answered
    /// through the hub; the returned value is the request type on success.
    pub fn process(&mut self, text: &str) -> ProtocolResult<&'static str> {
        let result = Request::decode(text).and_then(|request| {
            let kind = request.kind();
            self.handle(request).map(|()| kind)
        });

        if let Err(e) = &result {
            debug!(client = %self.label, error = %e, "Request failed");
            self.hub
                .reply(self.connection, &ServerResponse::error(e.to_string()));
        }
        result
    }

    fn handle(&mut self, request: Request) -> ProtocolResult<()> {
        match request {
            Request::Parse {
                content,
                document_id: Some(id),
            } => {
                let session = self.sessions.get_or_create(&id);
                // Replies are queued under the session lock so they leave in parse order
                let mut session = session.lock();
                let outcome = session.parse(&content).map_err(ProtocolError::Render)?;
                self.hub
                    .reply(self.connection, &ServerResponse::parsed(&outcome));
            }
            Request::Parse {
                content,
                document_id: None,
            } => {
                let outcome = self.private.parse(&content).map_err(ProtocolError::Render)?;
                self.hub
                    .reply(self.connection, &ServerResponse::parsed(&outcome));
            }
            Request::ParseIncremental {
                content,
                block_id,
                document_id: Some(id),
            } => {
                let session = self.sessions.get_or_create(&id);
                // Held until the fan-out is queued so deltas reach subscribers in diff order
                let mut session = session.lock();
                let outcome = session
                    .parse_incremental(&content, block_id.as_deref())
                    .map_err(ProtocolError::Render)?;

                let response = ServerResponse::parsed_incremental(&outcome);
                self.hub.reply(self.connection, &response);
                debug!(client = %self.label, document = %id, changes = outcome.parse.changes.len(), "Sharing incremental parse");
                self.hub.dispatch(id, &response, Some(self.connection));
            }
            Request::ParseIncremental {
                content,
                block_id,
                document_id: None,
            } => {
                let outcome = self
                    .private
                    .parse_incremental(&content, block_id.as_deref())
                    .map_err(ProtocolError::Render)?;
                self.hub
                    .reply(self.connection, &ServerResponse::parsed_incremental(&outcome));
            }
            Request::Subscribe { document_id } => {
                let response = ServerResponse::subscribed(&document_id);
                self.hub.subscribe(self.connection, document_id);
                self.hub.reply(self.connection, &response);
            }
            Request::Unsubscribe { document_id } => {
                let response = ServerResponse::unsubscribed(&document_id);
                self.hub.unsubscribe(self.connection, document_id);
                self.hub.reply(self.connection, &response);
            }
        }
        Ok(())
    }
}
