//! mdlive Core - Block Model, Diff Engines and Edit Sessions
//!
//! This crate provides the change-detection half of mdlive:
//! - Content-addressed block snapshots produced by a [`Renderer`]
//! - Block-level change detection between consecutive snapshots
//! - LCS line diffs and a single-line syntax classifier for instant feedback
//! - Per-document edit sessions and their registry

pub mod block;
pub mod classify;
pub mod detector;
pub mod document;
pub mod error;
pub mod line_diff;
pub mod manager;
pub mod render;
pub mod session;

pub use block::{Block, BlockChange, BlockType, ChangeKind, Position, Snapshot};
pub use classify::{classify, LineKind};
pub use detector::BlockChangeDetector;
pub use document::{DocumentId, DocumentSession};
pub use error::{Error, Result};
pub use line_diff::{
    compute_line_diff, compute_line_diff_bounded, LineChange, LineChangeKind, DEFAULT_MAX_DIFF_CELLS,
};
pub use manager::{SessionManager, SessionStats};
pub use render::{MarkdownRenderer, RenderOptions, Rendered, Renderer};
pub use session::{EditSession, IncrementalOutcome, ParseOutcome};
