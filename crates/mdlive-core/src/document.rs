//! Document identifiers and shared per-document sessions

use std::time::{Duration, Instant};

use parking_lot::{Mutex, MutexGuard};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::session::EditSession;

/// Maximum document ID length in bytes
pub const MAX_DOCUMENT_ID_LEN: usize = 512;

/// Document identifier - UTF-8 string, max 512 bytes
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct DocumentId(String);

impl DocumentId {
    /// Create a new document ID, validating the format
    pub fn new(id: impl Into<String>) -> Result<Self> {
        let id = id.into();

        if id.is_empty() {
            return Err(Error::InvalidDocumentId("Document ID cannot be empty".into()));
        }

        if id.len() > MAX_DOCUMENT_ID_LEN {
            return Err(Error::InvalidDocumentId("Document ID exceeds 512 bytes".into()));
        }

        // Validate pattern: [a-zA-Z0-9:_.-]+
        if !id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, ':' | '_' | '.' | '-'))
        {
            return Err(Error::InvalidDocumentId(
                "Document ID must match pattern [a-zA-Z0-9:_.-]+".into(),
            ));
        }

        Ok(Self(id))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for DocumentId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl TryFrom<String> for DocumentId {
    type Error = Error;

    fn try_from(value: String) -> Result<Self> {
        Self::new(value)
    }
}

impl From<DocumentId> for String {
    fn from(id: DocumentId) -> Self {
        id.0
    }
}

/// An edit session shared by everyone editing one document.
///
/// The mutex serializes diff calls for the document.
pub struct DocumentSession {
    id: DocumentId,
    session: Mutex<EditSession>,
    last_used: Mutex<Instant>,
}

impl DocumentSession {
    pub fn new(id: DocumentId, session: EditSession) -> Self {
        Self {
            id,
            session: Mutex::new(session),
            last_used: Mutex::new(Instant::now()),
        }
    }

    pub fn id(&self) -> &DocumentId {
        &self.id
    }

    /// Lock the session for one parse, refreshing its last-use time
    pub fn lock(&self) -> MutexGuard<'_, EditSession> {
        *self.last_used.lock() = Instant::now();
        self.session.lock()
    }

    /// Time since the session was last locked
    pub fn idle_for(&self) -> Duration {
        self.last_used.lock().elapsed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_document_id_validation() {
        assert!(DocumentId::new("notes:2024-01.md").is_ok());
        assert!(DocumentId::new("doc_1").is_ok());

        assert!(DocumentId::new("").is_err());
        assert!(DocumentId::new("has space").is_err());
        assert!(DocumentId::new("slash/path").is_err());
        assert!(DocumentId::new("x".repeat(513)).is_err());
    }

    #[test]
    fn test_document_id_serde() {
        let id: DocumentId = serde_json::from_str("\"doc-1\"").unwrap();
        assert_eq!(id.as_str(), "doc-1");
        assert_eq!(serde_json::to_string(&id).unwrap(), "\"doc-1\"");
        assert!(serde_json::from_str::<DocumentId>("\"bad id\"").is_err());
    }
}
