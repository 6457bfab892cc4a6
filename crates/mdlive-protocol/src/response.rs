//! Outbound responses

use std::time::{SystemTime, UNIX_EPOCH};

use mdlive_core::DocumentId;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseKind {
    Connected,
    Parsed,
    ParsedIncremental,
    Subscribed,
    Unsubscribed,
    Error,
}

/// A message sent to a client
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerResponse {
    #[serde(rename = "type")]
    pub kind: ResponseKind,
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Unix milliseconds
    pub timestamp: u64,
}

impl ServerResponse {
    fn new(kind: ResponseKind, success: bool) -> Self {
        Self {
            kind,
            success,
            data: None,
            error: None,
            timestamp: now_millis(),
        }
    }

    pub fn connected() -> Self {
        Self::new(ResponseKind::Connected, true)
    }

    /// `parsed` carrying a serialized session outcome
    pub fn parsed(outcome: &impl Serialize) -> Self {
        Self::new(ResponseKind::Parsed, true).with_data(outcome)
    }

    pub fn parsed_incremental(outcome: &impl Serialize) -> Self {
        Self::new(ResponseKind::ParsedIncremental, true).with_data(outcome)
    }

    pub fn subscribed(document_id: &DocumentId) -> Self {
        Self::new(ResponseKind::Subscribed, true).with_value(json!({ "documentId": document_id }))
    }

    pub fn unsubscribed(document_id: &DocumentId) -> Self {
        Self::new(ResponseKind::Unsubscribed, true)
            .with_value(json!({ "documentId": document_id }))
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            error: Some(message.into()),
            ..Self::new(ResponseKind::Error, false)
        }
    }

    /// Attach a payload; a payload that fails to serialize becomes an error response
    pub fn with_data(self, data: &impl Serialize) -> Self {
        match serde_json::to_value(data) {
            Ok(value) => self.with_value(value),
            Err(e) => Self::error(format!("Failed to encode response: {}", e)),
        }
    }

    pub fn with_value(mut self, value: Value) -> Self {
        self.data = Some(value);
        self
    }

    /// Encode as a JSON text frame
    pub fn to_json(&self) -> String {
        // Only string-keyed maps and plain values are ever stored, which always serialize
        serde_json::to_string(self).unwrap_or_else(|_| {
            format!(
                "{{\"type\":\"error\",\"success\":false,\"timestamp\":{}}}",
                self.timestamp
            )
        })
    }
}

fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
