//! Inbound messages

use mdlive_core::DocumentId;
use serde::{Deserialize, Serialize};
use tracing::trace;

use crate::error::{ProtocolError, ProtocolResult};

/// A decoded but unvalidated inbound frame
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Envelope {
    #[serde(rename = "type")]
    pub kind: String,
    pub document_id: Option<String>,
    pub content: Option<String>,
    pub block_id: Option<String>,
    /// Client clock, either unix millis or an RFC 3339 string; never interpreted
    pub timestamp: Option<serde_json::Value>,
    pub data: Option<serde_json::Value>,
}

/// Wire names of every request type
const REQUEST_TYPES: [&str; 4] = ["parse", "parse_incremental", "subscribe", "unsubscribe"];

/// A validated request from a client
#[derive(Debug, Clone, PartialEq)]
pub enum Request {
    /// Render and diff `content`
    Parse {
        content: String,
        document_id: Option<DocumentId>,
    },

    /// Render, diff and line-diff `content`; shared with other subscribers of the document
    ParseIncremental {
        content: String,
        block_id: Option<String>,
        document_id: Option<DocumentId>,
    },

    Subscribe {
        document_id: DocumentId,
    },

    Unsubscribe {
        document_id: DocumentId,
    },
}

impl Request {
    /// Decode and validate one text frame
    pub fn decode(text: &str) -> ProtocolResult<Self> {
        let envelope: Envelope =
            serde_json::from_str(text).map_err(|e| ProtocolError::Malformed(e.to_string()))?;
        trace!(kind = %envelope.kind, "Decoded envelope");
        Self::from_envelope(envelope)
    }

    pub fn from_envelope(envelope: Envelope) -> ProtocolResult<Self> {
        let Envelope {
            kind,
            document_id,
            content,
            block_id,
            ..
        } = envelope;

        if !REQUEST_TYPES.contains(&kind.as_str()) {
            return Err(ProtocolError::UnknownType(kind));
        }

        let document_id = non_empty(document_id).map(DocumentId::new).transpose()?;
        let content = non_empty(content);
        let block_id = non_empty(block_id);

        match kind.as_str() {
            "parse" => Ok(Request::Parse {
                content: content.ok_or(ProtocolError::MissingField {
                    field: "content",
                    request: "parse",
                })?,
                document_id,
            }),
            "parse_incremental" => Ok(Request::ParseIncremental {
                content: content.ok_or(ProtocolError::MissingField {
                    field: "content",
                    request: "parse_incremental",
                })?,
                block_id,
                document_id,
            }),
            "subscribe" => Ok(Request::Subscribe {
                document_id: document_id.ok_or(ProtocolError::MissingField {
                    field: "documentId",
                    request: "subscribe",
                })?,
            }),
            "unsubscribe" => Ok(Request::Unsubscribe {
                document_id: document_id.ok_or(ProtocolError::MissingField {
                    field: "documentId",
                    request: "unsubscribe",
                })?,
            }),
            other => Err(ProtocolError::UnknownType(other.to_string())),
        }
    }

    /// Wire name of the request type
    pub fn kind(&self) -> &'static str {
        match self {
            Request::Parse { .. } => "parse",
            Request::ParseIncremental { .. } => "parse_incremental",
            Request::Subscribe { .. } => "subscribe",
            Request::Unsubscribe { .. } => "unsubscribe",
        }
    }

    /// The document the request is about, if any
    pub fn document_id(&self) -> Option<&DocumentId> {
        match self {
            Request::Parse { document_id, .. } | Request::ParseIncremental { document_id, .. } => {
                document_id.as_ref()
            }
            Request::Subscribe { document_id } | Request::Unsubscribe { document_id } => {
                Some(document_id)
            }
        }
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|s| !s.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_parse() {
        let req = Request::decode(r##"{"type":"parse","content":"# Hi"}"##).unwrap();
        assert_eq!(
            req,
            Request::Parse {
                content: "# Hi".into(),
                document_id: None,
            }
        );
        assert_eq!(req.kind(), "parse");
    }

    #[test]
    fn test_decode_parse_incremental() {
        let req = Request::decode(
            r#"{"type":"parse_incremental","content":"text","blockId":"abc","documentId":"doc:1","timestamp":1700000000000,"extra":true}"#,
        )
        .unwrap();

        match req {
            Request::ParseIncremental {
                content,
                block_id,
                document_id,
            } => {
                assert_eq!(content, "text");
                assert_eq!(block_id.as_deref(), Some("abc"));
                assert_eq!(document_id.unwrap().as_str(), "doc:1");
            }
            other => panic!("unexpected request: {:?}", other),
        }
    }

    #[test]
    fn test_decode_subscribe() {
        let req = Request::decode(r#"{"type":"subscribe","documentId":"notes"}"#).unwrap();
        assert_eq!(req.document_id().map(|id| id.as_str()), Some("notes"));

        let req = Request::decode(r#"{"type":"unsubscribe","documentId":"notes"}"#).unwrap();
        assert_eq!(req.kind(), "unsubscribe");
    }

    #[test]
    fn test_missing_fields() {
        let err = Request::decode(r#"{"type":"parse"}"#).unwrap_err();
        assert_eq!(err.to_string(), "content is required for parse");

        // Empty strings count as absent
        let err = Request::decode(r#"{"type":"parse","content":""}"#).unwrap_err();
        assert_eq!(err.to_string(), "content is required for parse");

        let err = Request::decode(r#"{"type":"subscribe","documentId":""}"#).unwrap_err();
        assert_eq!(err.to_string(), "documentId is required for subscribe");

        let err = Request::decode(r#"{"type":"unsubscribe"}"#).unwrap_err();
        assert_eq!(err.to_string(), "documentId is required for unsubscribe");
    }

    #[test]
    fn test_malformed_and_unknown() {
        let err = Request::decode("not json").unwrap_err();
        assert!(matches!(err, ProtocolError::Malformed(_)));
        assert!(err.to_string().starts_with("Invalid message format: "));

        let err = Request::decode(r#"{"type":"explode"}"#).unwrap_err();
        assert_eq!(err.to_string(), "Unknown message type: explode");

        let err = Request::decode(r#"{"content":"x"}"#).unwrap_err();
        assert!(matches!(err, ProtocolError::UnknownType(ref kind) if kind.is_empty()));
    }

    #[test]
    fn test_invalid_document_id() {
        let err = Request::decode(r#"{"type":"subscribe","documentId":"a b"}"#).unwrap_err();
        assert!(matches!(err, ProtocolError::Core(_)));

        // The type is checked before the document id
        let err = Request::decode(r#"{"type":"explode","documentId":"a b"}"#).unwrap_err();
        assert_eq!(err.to_string(), "Unknown message type: explode");
    }

    #[test]
    fn test_timestamp_is_ignored_in_any_form() {
        let req =
            Request::decode(r#"{"type":"subscribe","documentId":"doc","timestamp":"2024-01-01T00:00:00Z"}"#)
                .unwrap();
        assert_eq!(req.kind(), "subscribe");

        let envelope: Envelope =
            serde_json::from_str(r#"{"type":"parse","content":"x","timestamp":1700000000000}"#).unwrap();
        assert_eq!(envelope.timestamp, Some(serde_json::json!(1700000000000u64)));
    }
}
