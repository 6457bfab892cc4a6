//! Session Manager - one shared edit session per document

use crate::document::{DocumentId, DocumentSession};
use crate::line_diff::DEFAULT_MAX_DIFF_CELLS;
use crate::render::Renderer;
use crate::session::EditSession;
use dashmap::DashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Session manager maps document IDs to their edit sessions
pub struct SessionManager {
    /// All live sessions indexed by document ID
    sessions: DashMap<String, Arc<DocumentSession>>,
    /// Renderer shared by every session
    renderer: Arc<dyn Renderer>,
    /// Line diff budget handed to every session
    max_diff_cells: usize,
}

impl SessionManager {
    /// Create a new session manager around a renderer
    pub fn new(renderer: Arc<dyn Renderer>) -> Self {
        Self {
            sessions: DashMap::new(),
            renderer,
            max_diff_cells: DEFAULT_MAX_DIFF_CELLS,
        }
    }

    /// Cap the LCS table of line diffs run by sessions created from now on
    pub fn with_max_diff_cells(mut self, max_diff_cells: usize) -> Self {
        self.max_diff_cells = max_diff_cells;
        self
    }

    pub fn renderer(&self) -> Arc<dyn Renderer> {
        self.renderer.clone()
    }

    /// A session that belongs to nobody but its caller (not registered)
    pub fn new_private_session(&self) -> EditSession {
        EditSession::new(self.renderer.clone()).with_max_diff_cells(self.max_diff_cells)
    }

    /// Get an existing session
    pub fn get(&self, id: &DocumentId) -> Option<Arc<DocumentSession>> {
        self.sessions.get(id.as_str()).map(|r| r.value().clone())
    }

    /// Get or create the session for a document
    pub fn get_or_create(&self, id: &DocumentId) -> Arc<DocumentSession> {
        self.sessions
            .entry(id.as_str().to_string())
            .or_insert_with(|| {
                debug!(document = %id, "Created edit session");
                Arc::new(DocumentSession::new(id.clone(), self.new_private_session()))
            })
            .value()
            .clone()
    }

    /// Drop a session, returns whether it existed
    pub fn remove(&self, id: &DocumentId) -> bool {
        self.sessions.remove(id.as_str()).is_some()
    }

    /// Run garbage collection - evicts sessions idle for at least `max_idle`
    /// that nobody is holding. Returns the number of sessions removed
    pub fn gc(&self, max_idle: Duration) -> usize {
        let before = self.sessions.len();
        self.sessions.retain(|_, session| {
            Arc::strong_count(session) > 1 || session.idle_for() < max_idle
        });
        before.saturating_sub(self.sessions.len())
    }

    /// Get statistics
    pub fn stats(&self) -> SessionStats {
        SessionStats {
            document_count: self.sessions.len(),
        }
    }
}

/// Session manager statistics
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionStats {
    pub document_count: usize,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::line_diff::LineChangeKind;
    use crate::render::MarkdownRenderer;

    fn manager() -> SessionManager {
        SessionManager::new(Arc::new(MarkdownRenderer::default()))
    }

    #[test]
    fn test_get_or_create_shares_session() {
        let manager = manager();
        let id = DocumentId::new("notes:1").unwrap();

        let first = manager.get_or_create(&id);
        first.lock().parse("# Title").unwrap();

        let second = manager.get_or_create(&id);
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(second.lock().previous_text(), "# Title");
        assert_eq!(manager.stats().document_count, 1);
    }

    #[test]
    fn test_sessions_are_independent() {
        let manager = manager();
        let a = manager.get_or_create(&DocumentId::new("a").unwrap());
        let b = manager.get_or_create(&DocumentId::new("b").unwrap());

        a.lock().parse("# Same").unwrap();
        // b has its own detector, so the same content is still all new
        let outcome = b.lock().parse("# Same").unwrap();
        assert_eq!(outcome.changes.len(), 1);
    }

    #[test]
    fn test_remove() {
        let manager = manager();
        let id = DocumentId::new("gone").unwrap();

        manager.get_or_create(&id);
        assert!(manager.remove(&id));
        assert!(!manager.remove(&id));
        assert!(manager.get(&id).is_none());
    }

    #[test]
    fn test_gc_removes_idle() {
        let manager = manager();
        let idle = DocumentId::new("gc:1").unwrap();
        let held = DocumentId::new("gc:2").unwrap();

        manager.get_or_create(&idle);
        let in_use = manager.get_or_create(&held);

        std::thread::sleep(Duration::from_millis(10));

        // Nothing is idle for an hour yet
        assert_eq!(manager.gc(Duration::from_secs(3600)), 0);

        // Only the session nobody holds is evicted
        assert_eq!(manager.gc(Duration::from_millis(1)), 1);
        assert!(manager.get(&idle).is_none());
        assert!(manager.get(&held).is_some());
        drop(in_use);
    }

    #[test]
    fn test_private_session_is_not_registered() {
        let manager = manager();
        let mut session = manager.new_private_session();
        session.parse("text").unwrap();
        assert_eq!(manager.stats().document_count, 0);
    }

    #[test]
    fn test_diff_budget_reaches_sessions() {
        let manager = manager().with_max_diff_cells(0);
        let id = DocumentId::new("budget").unwrap();

        let session = manager.get_or_create(&id);
        session.lock().parse("same").unwrap();
        let outcome = session.lock().parse_incremental("same", None).unwrap();
        let kinds: Vec<LineChangeKind> = outcome.line_changes.iter().map(|c| c.kind).collect();
        assert_eq!(kinds, vec![LineChangeKind::Removed, LineChangeKind::Added]);

        let mut private = manager.new_private_session();
        private.parse("same").unwrap();
        let outcome = private.parse_incremental("same", None).unwrap();
        assert_eq!(outcome.line_changes.len(), 2);
    }
}
