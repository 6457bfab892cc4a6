//! Block-level change detection between consecutive snapshots

use crate::block::{BlockChange, ChangeKind, Snapshot};
use tracing::trace;

/// Compares each new snapshot of a document against the one before it.
///
/// Holds the previous snapshot as its baseline, so one detector serves exactly one
/// document or session. `compute_diff` takes `&mut self`; concurrent use of one
/// detector has to be serialized by the owner.
#[derive(Debug, Default)]
pub struct BlockChangeDetector {
    previous: Snapshot,
}

impl BlockChangeDetector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start from an existing baseline instead of an empty one
    pub fn with_baseline(previous: Snapshot) -> Self {
        Self { previous }
    }

    /// The snapshot the next call will be compared against
    pub fn baseline(&self) -> &Snapshot {
        &self.previous
    }

    /// Forget the baseline; the next diff reports every block as added
    pub fn reset(&mut self) {
        self.previous = Snapshot::new();
    }

    /// Diff `next` against the stored baseline, then make a copy of `next` the new
    /// baseline.
    ///
    /// New ids are `Added`, known ids whose content hash moved are `Modified`, ids that
    /// disappeared are `Removed` (carrying the previous block). Added and modified
    /// entries follow `next`'s order, removals follow the baseline's order.
    pub fn compute_diff(&mut self, next: &Snapshot) -> Vec<BlockChange> {
        let mut changes = Vec::new();

        for (id, block) in next.iter() {
            let kind = match self.previous.get(id) {
                None => ChangeKind::Added,
                Some(old) if old.content_hash() != block.content_hash() => ChangeKind::Modified,
                Some(_) => continue,
            };
            changes.push(BlockChange {
                kind,
                block_id: id.clone(),
                block: block.clone(),
            });
        }

        for (id, old) in self.previous.iter() {
            if !next.contains(id) {
                changes.push(BlockChange {
                    kind: ChangeKind::Removed,
                    block_id: id.clone(),
                    block: old.clone(),
                });
            }
        }

        trace!(
            blocks = next.len(),
            changes = changes.len(),
            "Computed block diff"
        );

        self.previous = next.clone();
        changes
    }
}
