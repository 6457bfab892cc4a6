//! Edit sessions - render, diff and per-line previews for one document

use std::sync::Arc;

use serde::Serialize;
use tracing::debug;

use crate::block::{Block, BlockChange, BlockType, Position, Snapshot};
use crate::classify::{classify, LineKind};
use crate::detector::BlockChangeDetector;
use crate::error::Result;
use crate::line_diff::{compute_line_diff_bounded, LineChange, LineChangeKind, DEFAULT_MAX_DIFF_CELLS};
use crate::render::Renderer;

/// Result of a full render + block diff
#[derive(Debug, Clone, Serialize)]
pub struct ParseOutcome {
    pub html: String,
    pub blocks: Snapshot,
    pub changes: Vec<BlockChange>,
}

/// Result of an incremental parse: the full outcome plus line-level feedback
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IncrementalOutcome {
    #[serde(flatten)]
    pub parse: ParseOutcome,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub block_id: Option<String>,
    /// The block named by `block_id`, when it exists in the new snapshot
    #[serde(skip_serializing_if = "Option::is_none")]
    pub block: Option<Block>,
    pub line_changes: Vec<LineChange>,
    /// Instant previews for every added line
    pub line_blocks: Vec<Block>,
}

/// Render/diff state for one document or one connection.
///
/// Owns its own [`BlockChangeDetector`]; the renderer is shared.
pub struct EditSession {
    renderer: Arc<dyn Renderer>,
    detector: BlockChangeDetector,
    previous_text: String,
    /// LCS table budget for the line diff
    max_diff_cells: usize,
}

impl EditSession {
    pub fn new(renderer: Arc<dyn Renderer>) -> Self {
        Self {
            renderer,
            detector: BlockChangeDetector::new(),
            previous_text: String::new(),
            max_diff_cells: DEFAULT_MAX_DIFF_CELLS,
        }
    }

    pub fn with_max_diff_cells(mut self, max_diff_cells: usize) -> Self {
        self.max_diff_cells = max_diff_cells;
        self
    }

    /// Raw text of the last successful parse
    pub fn previous_text(&self) -> &str {
        &self.previous_text
    }

    /// Render `content` and diff it against the previous version.
    ///
    /// A render failure leaves the session untouched.
    pub fn parse(&mut self, content: &str) -> Result<ParseOutcome> {
        let rendered = self.renderer.render(content)?;
        let changes = self.detector.compute_diff(&rendered.blocks);
        self.previous_text = content.to_string();

        debug!(
            blocks = rendered.blocks.len(),
            changes = changes.len(),
            "Parsed document"
        );

        Ok(ParseOutcome {
            html: rendered.markup,
            blocks: rendered.blocks,
            changes,
        })
    }

    /// Like [`parse`](Self::parse), plus a line diff against the previous text and
    /// per-line previews of the added lines.
    pub fn parse_incremental(
        &mut self,
        content: &str,
        block_id: Option<&str>,
    ) -> Result<IncrementalOutcome> {
        let line_changes =
            compute_line_diff_bounded(&self.previous_text, content, self.max_diff_cells);
        let parse = self.parse(content)?;

        let line_blocks = line_changes
            .iter()
            .filter(|change| change.kind == LineChangeKind::Added)
            .filter_map(|change| self.parse_line(&change.content, change.line_number))
            .collect();

        let block = block_id.and_then(|id| parse.blocks.find(id).cloned());

        Ok(IncrementalOutcome {
            parse,
            block_id: block_id.map(str::to_string),
            block,
            line_changes,
            line_blocks,
        })
    }

    /// Quick block for a single line, `None` when the line is blank.
    ///
    /// The type comes from the line classifier. Its markup is replaced by the full
    /// renderer's output when the renderer agrees on the type, or adopted together with
    /// the renderer's type when the classifier only saw a paragraph.
    pub fn parse_line(&self, line: &str, line_number: usize) -> Option<Block> {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            return None;
        }

        let kind = classify(line);
        let mut block = Block {
            id: line_id(trimmed, line_number),
            kind: kind.block_type(),
            level: line_level(kind),
            content: line.to_string(),
            markup: line_markup(trimmed, kind),
            position: Position {
                start: 0,
                end: line.len(),
                line: line_number,
            },
            children: Vec::new(),
        };

        if let Ok(rendered) = self.renderer.render(line) {
            let refined = rendered.blocks.blocks().find(|candidate| {
                candidate.kind != BlockType::Unknown
                    && !candidate.markup.is_empty()
                    && (block.kind == BlockType::Paragraph || candidate.kind == block.kind)
            });
            if let Some(candidate) = refined {
                block.markup = candidate.markup.clone();
                if block.kind == BlockType::Paragraph {
                    block.kind = candidate.kind;
                    block.level = candidate.level;
                }
            }
        }

        Some(block)
    }
}

fn line_id(trimmed: &str, line_number: usize) -> String {
    let hash = blake3::hash(trimmed.as_bytes());
    format!("line-{}-{}", line_number, &hash.to_hex()[..8])
}

fn line_level(kind: LineKind) -> usize {
    match kind {
        LineKind::Heading(level) => level,
        LineKind::Checkbox { .. } | LineKind::UnorderedList | LineKind::OrderedList => 1,
        _ => 0,
    }
}

/// Markup for a line based on its category alone
fn line_markup(trimmed: &str, kind: LineKind) -> String {
    let escape = |text: &str| html_escape::encode_text(text).into_owned();

    match kind {
        LineKind::Heading(level) => {
            let text = &trimmed[level + 1..];
            format!("<h{level}>{}</h{level}>", escape(text))
        }
        LineKind::UnorderedList => {
            format!("<ul><li>{}</li></ul>", escape(&trimmed[2..]))
        }
        LineKind::OrderedList => match trimmed.split_once(". ") {
            Some((_, text)) => format!("<ol><li>{}</li></ol>", escape(text)),
            None => format!("<p>{}</p>", escape(trimmed)),
        },
        LineKind::Blockquote => {
            format!("<blockquote><p>{}</p></blockquote>", escape(&trimmed[2..]))
        }
        LineKind::CodeFence => {
            let lang = trimmed.trim_start_matches('`').trim();
            if lang.is_empty() {
                "<pre><code>".to_string()
            } else {
                format!(
                    "<pre><code class=\"language-{}\">",
                    html_escape::encode_double_quoted_attribute(lang)
                )
            }
        }
        LineKind::Checkbox { checked } => {
            let text = trimmed[5..].trim();
            let state = if checked { " checked" } else { "" };
            format!(
                "<ul><li><input type=\"checkbox\"{} disabled>{}</li></ul>",
                state,
                escape(text)
            )
        }
        LineKind::Paragraph => format!("<p>{}</p>", escape(trimmed)),
    }
}
