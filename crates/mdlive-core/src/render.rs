//! Renderer contract and the pulldown-cmark implementation
//!
//! A renderer turns raw markdown into HTML plus a snapshot of its top-level blocks.
//! Nested block elements (list items, quoted paragraphs, ...) are attached as
//! children of their enclosing block.

use std::ops::Range;

use pulldown_cmark::{html, CodeBlockKind, Event, Options, Parser, Tag};
use serde::Serialize;
use tracing::trace;

use crate::block::{Block, BlockType, Position, Snapshot};
use crate::error::{Error, Result};

/// Default maximum content size (1MB)
pub const DEFAULT_MAX_CONTENT_SIZE: usize = 1024 * 1024;

/// Output of one render call
#[derive(Debug, Clone, Default, Serialize)]
pub struct Rendered {
    pub markup: String,
    pub blocks: Snapshot,
}

/// Converts raw text into markup and a block snapshot
pub trait Renderer: Send + Sync {
    fn render(&self, text: &str) -> Result<Rendered>;
}

/// Renderer configuration
#[derive(Debug, Clone)]
pub struct RenderOptions {
    /// Inputs larger than this many bytes are rejected
    pub max_content_size: usize,
    /// Tables, strikethrough, task lists and footnotes
    pub gfm: bool,
}

impl Default for RenderOptions {
    fn default() -> Self {
        Self {
            max_content_size: DEFAULT_MAX_CONTENT_SIZE,
            gfm: true,
        }
    }
}

/// Block being collected while its element is open
struct PendingBlock {
    kind: BlockType,
    level: usize,
    range: Range<usize>,
    children: Vec<Block>,
}

enum Frame {
    Block(PendingBlock),
    Inline,
}

/// CommonMark renderer backed by pulldown-cmark
#[derive(Debug, Clone)]
pub struct MarkdownRenderer {
    options: RenderOptions,
    parser_options: Options,
}

impl MarkdownRenderer {
    pub fn new(options: RenderOptions) -> Self {
        let mut parser_options = Options::empty();
        if options.gfm {
            parser_options.insert(Options::ENABLE_TABLES);
            parser_options.insert(Options::ENABLE_STRIKETHROUGH);
            parser_options.insert(Options::ENABLE_TASKLISTS);
            parser_options.insert(Options::ENABLE_FOOTNOTES);
        }

        Self {
            options,
            parser_options,
        }
    }

    pub fn options(&self) -> &RenderOptions {
        &self.options
    }

    /// Render a fragment of markdown to HTML
    pub fn render_html(&self, text: &str) -> String {
        let mut out = String::with_capacity(text.len() * 3 / 2);
        html::push_html(&mut out, Parser::new_ext(text, self.parser_options));
        out
    }

    fn finish(&self, source: &str, line_starts: &[usize], pending: PendingBlock) -> Block {
        let Range { start, end } = pending.range;
        let content = source.get(start..end).unwrap_or_default().to_string();
        let line = line_starts.partition_point(|&offset| offset <= start);

        Block {
            id: Block::content_id(pending.kind, start, end, &content),
            kind: pending.kind,
            level: pending.level,
            markup: self.render_html(&content),
            content,
            position: Position { start, end, line },
            children: pending.children,
        }
    }
}

impl Default for MarkdownRenderer {
    fn default() -> Self {
        Self::new(RenderOptions::default())
    }
}

/// Block category for an opening tag, `None` for inline and table-internal tags
fn block_kind(tag: &Tag, list_depth: usize) -> Option<(BlockType, usize)> {
    match tag {
        Tag::Paragraph => Some((BlockType::Paragraph, 0)),
        Tag::Heading { level, .. } => {
            let level = *level as usize;
            Some((BlockType::heading(level), level))
        }
        Tag::BlockQuote(_) => Some((BlockType::Blockquote, 0)),
        Tag::CodeBlock(CodeBlockKind::Fenced(_)) => Some((BlockType::FencedCodeBlock, 0)),
        Tag::CodeBlock(CodeBlockKind::Indented) => Some((BlockType::CodeBlock, 0)),
        Tag::List(Some(_)) => Some((BlockType::OrderedList, list_depth + 1)),
        Tag::List(None) => Some((BlockType::UnorderedList, list_depth + 1)),
        Tag::Item => Some((BlockType::ListItem, list_depth)),
        Tag::Table(_) | Tag::HtmlBlock | Tag::FootnoteDefinition(_) => {
            Some((BlockType::Unknown, 0))
        }
        _ => None,
    }
}

fn is_list(kind: BlockType) -> bool {
    matches!(kind, BlockType::OrderedList | BlockType::UnorderedList)
}

/// Hand a finished block to the innermost open block, or to the top level
fn attach(stack: &mut [Frame], top: &mut Vec<Block>, block: Block) {
    let parent = stack.iter_mut().rev().find_map(|frame| match frame {
        Frame::Block(pending) => Some(pending),
        Frame::Inline => None,
    });
    match parent {
        Some(pending) => pending.children.push(block),
        None => top.push(block),
    }
}

impl Renderer for MarkdownRenderer {
    fn render(&self, text: &str) -> Result<Rendered> {
        if text.len() > self.options.max_content_size {
            return Err(Error::ContentTooLarge {
                size: text.len(),
                limit: self.options.max_content_size,
            });
        }
        if text.is_empty() {
            return Ok(Rendered::default());
        }

        let line_starts: Vec<usize> = std::iter::once(0)
            .chain(text.match_indices('\n').map(|(i, _)| i + 1))
            .collect();

        let mut stack: Vec<Frame> = Vec::new();
        let mut top: Vec<Block> = Vec::new();
        let mut list_depth = 0usize;

        for (event, range) in Parser::new_ext(text, self.parser_options).into_offset_iter() {
            match event {
                Event::Start(tag) => match block_kind(&tag, list_depth) {
                    Some((kind, level)) => {
                        if is_list(kind) {
                            list_depth += 1;
                        }
                        stack.push(Frame::Block(PendingBlock {
                            kind,
                            level,
                            range,
                            children: Vec::new(),
                        }));
                    }
                    None => stack.push(Frame::Inline),
                },
                Event::End(_) => {
                    if let Some(Frame::Block(pending)) = stack.pop() {
                        if is_list(pending.kind) {
                            list_depth = list_depth.saturating_sub(1);
                        }
                        let block = self.finish(text, &line_starts, pending);
                        attach(&mut stack, &mut top, block);
                    }
                }
                Event::Rule => {
                    let pending = PendingBlock {
                        kind: BlockType::ThematicBreak,
                        level: 0,
                        range,
                        children: Vec::new(),
                    };
                    let block = self.finish(text, &line_starts, pending);
                    attach(&mut stack, &mut top, block);
                }
                Event::TaskListMarker(_) => {
                    let item = stack.iter_mut().rev().find_map(|frame| match frame {
                        Frame::Block(pending) if pending.kind == BlockType::ListItem => {
                            Some(pending)
                        }
                        _ => None,
                    });
                    if let Some(item) = item {
                        item.kind = BlockType::Checkbox;
                    }
                }
                _ => {}
            }
        }

        trace!(bytes = text.len(), blocks = top.len(), "Rendered markdown");

        Ok(Rendered {
            markup: self.render_html(text),
            blocks: top.into_iter().collect(),
        })
    }
}
