//! Line-level diff based on the longest common subsequence
//!
//! The LCS table is `(old + 1) x (new + 1)` cells, so time and memory are
//! O(old_lines * new_lines). That is fine for editor-sized documents. Inputs whose
//! table would exceed the cell budget are reported as a wholesale replacement
//! instead; very large documents need to be chunked or windowed by the caller to
//! get a finer script.

use serde::{Deserialize, Serialize};
use tracing::debug;

/// Default LCS table budget, in cells (4 bytes each)
pub const DEFAULT_MAX_DIFF_CELLS: usize = 4 * 1024 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LineChangeKind {
    Added,
    Removed,
    Unchanged,
}

/// One line of an edit script
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LineChange {
    #[serde(rename = "type")]
    pub kind: LineChangeKind,
    /// 1-based; counts new lines for added/unchanged, old lines for removed
    #[serde(rename = "lineNum")]
    pub line_number: usize,
    pub content: String,
}

fn split_lines(text: &str) -> Vec<&str> {
    if text.is_empty() {
        Vec::new()
    } else {
        text.split('\n').collect()
    }
}

/// Compute the edit script turning `old` into `new`.
///
/// Added and unchanged entries read in order reproduce `new`; removed and unchanged
/// entries read in order reproduce `old` (lines joined with `\n`). When both
/// directions are equally good the new-side line is taken first, so the output is
/// deterministic.
pub fn compute_line_diff(old: &str, new: &str) -> Vec<LineChange> {
    compute_line_diff_bounded(old, new, DEFAULT_MAX_DIFF_CELLS)
}

/// [`compute_line_diff`] with an explicit LCS table budget.
///
/// When the table would need more than `max_cells` cells, every old line is
/// reported removed and every new line added. The script still reproduces both
/// texts.
pub fn compute_line_diff_bounded(old: &str, new: &str, max_cells: usize) -> Vec<LineChange> {
    let old_lines = split_lines(old);
    let new_lines = split_lines(new);
    let (old_len, new_len) = (old_lines.len(), new_lines.len());

    let width = new_len + 1;
    let cells = match (old_len + 1).checked_mul(width) {
        Some(cells) if cells <= max_cells => cells,
        _ => {
            debug!(old_lines = old_len, new_lines = new_len, max_cells, "Line diff over budget, replacing wholesale");
            return replace_all(&old_lines, &new_lines);
        }
    };

    // table[i * width + j] = LCS length of old[..i] and new[..j]
    let mut table = vec![0u32; cells];
    for i in 1..=old_len {
        for j in 1..=new_len {
            table[i * width + j] = if old_lines[i - 1] == new_lines[j - 1] {
                table[(i - 1) * width + (j - 1)] + 1
            } else {
                table[(i - 1) * width + j].max(table[i * width + (j - 1)])
            };
        }
    }

    // Walk back from the bottom-right corner; entries come out in reverse
    let mut changes = Vec::with_capacity(old_len.max(new_len));
    let (mut i, mut j) = (old_len, new_len);
    while i > 0 || j > 0 {
        if i > 0 && j > 0 && old_lines[i - 1] == new_lines[j - 1] {
            changes.push(LineChange {
                kind: LineChangeKind::Unchanged,
                line_number: j,
                content: new_lines[j - 1].to_string(),
            });
            i -= 1;
            j -= 1;
        } else if j > 0 && (i == 0 || table[i * width + (j - 1)] >= table[(i - 1) * width + j]) {
            changes.push(LineChange {
                kind: LineChangeKind::Added,
                line_number: j,
                content: new_lines[j - 1].to_string(),
            });
            j -= 1;
        } else {
            changes.push(LineChange {
                kind: LineChangeKind::Removed,
                line_number: i,
                content: old_lines[i - 1].to_string(),
            });
            i -= 1;
        }
    }

    changes.reverse();
    changes
}

fn replace_all(old_lines: &[&str], new_lines: &[&str]) -> Vec<LineChange> {
    let removed = old_lines.iter().enumerate().map(|(i, line)| LineChange {
        kind: LineChangeKind::Removed,
        line_number: i + 1,
        content: line.to_string(),
    });
    let added = new_lines.iter().enumerate().map(|(j, line)| LineChange {
        kind: LineChangeKind::Added,
        line_number: j + 1,
        content: line.to_string(),
    });
    removed.chain(added).collect()
}
