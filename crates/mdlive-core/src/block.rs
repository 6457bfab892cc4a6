//! Block model: typed blocks, content-addressed snapshots and change records

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Closed set of block categories
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BlockType {
    H1,
    H2,
    H3,
    H4,
    H5,
    H6,
    UnorderedList,
    OrderedList,
    ListItem,
    CodeBlock,
    FencedCodeBlock,
    Blockquote,
    ThematicBreak,
    Checkbox,
    Paragraph,
    #[default]
    #[serde(other)]
    Unknown,
}

impl BlockType {
    /// Heading type for a level in 1..=6, `Unknown` otherwise
    pub fn heading(level: usize) -> Self {
        match level {
            1 => BlockType::H1,
            2 => BlockType::H2,
            3 => BlockType::H3,
            4 => BlockType::H4,
            5 => BlockType::H5,
            6 => BlockType::H6,
            _ => BlockType::Unknown,
        }
    }

    /// Heading level, if this is a heading
    pub fn heading_level(self) -> Option<usize> {
        match self {
            BlockType::H1 => Some(1),
            BlockType::H2 => Some(2),
            BlockType::H3 => Some(3),
            BlockType::H4 => Some(4),
            BlockType::H5 => Some(5),
            BlockType::H6 => Some(6),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            BlockType::H1 => "h1",
            BlockType::H2 => "h2",
            BlockType::H3 => "h3",
            BlockType::H4 => "h4",
            BlockType::H5 => "h5",
            BlockType::H6 => "h6",
            BlockType::UnorderedList => "unordered_list",
            BlockType::OrderedList => "ordered_list",
            BlockType::ListItem => "list_item",
            BlockType::CodeBlock => "code_block",
            BlockType::FencedCodeBlock => "fenced_code_block",
            BlockType::Blockquote => "blockquote",
            BlockType::ThematicBreak => "thematic_break",
            BlockType::Checkbox => "checkbox",
            BlockType::Paragraph => "paragraph",
            BlockType::Unknown => "unknown",
        }
    }
}

impl fmt::Display for BlockType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Byte span and starting line of a block in its source text
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Position {
    pub start: usize,
    pub end: usize,
    /// 1-based line of `start`
    pub line: usize,
}

/// A rendered markdown block
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Block {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: BlockType,
    /// Heading level or list nesting depth, 0 when not applicable
    pub level: usize,
    /// Raw source slice
    pub content: String,
    /// Rendered output
    #[serde(rename = "html")]
    pub markup: String,
    pub position: Position,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<Block>,
}

impl Block {
    /// Derive the id for a block from what it is and where it sits.
    ///
    /// The same content at the same span always yields the same id.
    pub fn content_id(kind: BlockType, start: usize, end: usize, content: &str) -> String {
        let mut hasher = blake3::Hasher::new();
        hasher.update(kind.as_str().as_bytes());
        hasher.update(&[0]);
        hasher.update(&(start as u64).to_le_bytes());
        hasher.update(&(end as u64).to_le_bytes());
        hasher.update(content.as_bytes());
        hasher.finalize().to_hex()[..16].to_string()
    }

    /// Hash over `(type, content, level, markup)`.
    ///
    /// Position is excluded: the same block re-rendered at a new offset hashes equal.
    pub fn content_hash(&self) -> blake3::Hash {
        let mut hasher = blake3::Hasher::new();
        hasher.update(self.kind.as_str().as_bytes());
        hasher.update(&[0]);
        hasher.update(&(self.content.len() as u64).to_le_bytes());
        hasher.update(self.content.as_bytes());
        hasher.update(&(self.level as u64).to_le_bytes());
        hasher.update(self.markup.as_bytes());
        hasher.finalize()
    }

    /// Depth-first search of this block and its descendants
    pub fn find(&self, id: &str) -> Option<&Block> {
        if self.id == id {
            return Some(self);
        }
        self.children.iter().find_map(|child| child.find(id))
    }
}

/// All top-level blocks of one document version, keyed by id.
///
/// Iteration follows insertion (source) order; diffing relies on ids only.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Snapshot(IndexMap<String, Block>);

impl Snapshot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a block under its own id, replacing any block with the same id
    pub fn insert(&mut self, block: Block) -> Option<Block> {
        self.0.insert(block.id.clone(), block)
    }

    pub fn get(&self, id: &str) -> Option<&Block> {
        self.0.get(id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.0.contains_key(id)
    }

    /// Look a block up by id among top-level blocks and all their children
    pub fn find(&self, id: &str) -> Option<&Block> {
        self.get(id)
            .or_else(|| self.0.values().find_map(|block| block.find(id)))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Block)> {
        self.0.iter()
    }

    pub fn blocks(&self) -> impl Iterator<Item = &Block> {
        self.0.values()
    }
}

impl FromIterator<Block> for Snapshot {
    fn from_iter<I: IntoIterator<Item = Block>>(iter: I) -> Self {
        let mut snapshot = Snapshot::new();
        for block in iter {
            snapshot.insert(block);
        }
        snapshot
    }
}

/// Kind of block-level change
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeKind {
    Added,
    Modified,
    Removed,
}

/// One entry of a block change list
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BlockChange {
    #[serde(rename = "type")]
    pub kind: ChangeKind,
    pub block_id: String,
    /// Block as it was at change time: the new block, or the previous one for removals
    pub block: Block,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn block(kind: BlockType, content: &str, start: usize) -> Block {
        Block {
            id: Block::content_id(kind, start, start + content.len(), content),
            kind,
            level: 0,
            content: content.to_string(),
            markup: format!("<p>{}</p>", content),
            position: Position { start, end: start + content.len(), line: 1 },
            children: Vec::new(),
        }
    }

    #[test]
    fn test_content_id_is_deterministic() {
        let a = Block::content_id(BlockType::Paragraph, 0, 4, "body");
        let b = Block::content_id(BlockType::Paragraph, 0, 4, "body");
        assert_eq!(a, b);
        assert_eq!(a.len(), 16);

        assert_ne!(a, Block::content_id(BlockType::Paragraph, 1, 5, "body"));
        assert_ne!(a, Block::content_id(BlockType::ListItem, 0, 4, "body"));
    }

    #[test]
    fn test_hash_ignores_position() {
        let a = block(BlockType::Paragraph, "same", 0);
        let mut b = block(BlockType::Paragraph, "same", 40);
        assert_eq!(a.content_hash(), b.content_hash());

        b.level = 2;
        assert_ne!(a.content_hash(), b.content_hash());
    }

    #[test]
    fn test_block_type_wire_names() {
        assert_eq!(serde_json::to_string(&BlockType::H3).unwrap(), "\"h3\"");
        assert_eq!(
            serde_json::to_string(&BlockType::FencedCodeBlock).unwrap(),
            "\"fenced_code_block\""
        );
        let parsed: BlockType = serde_json::from_str("\"table\"").unwrap();
        assert_eq!(parsed, BlockType::Unknown);
    }

    #[test]
    fn test_snapshot_find_nested() {
        let mut parent = block(BlockType::UnorderedList, "- a", 0);
        let child = block(BlockType::ListItem, "a", 2);
        let child_id = child.id.clone();
        parent.children.push(child);

        let snapshot: Snapshot = vec![parent].into_iter().collect();
        assert!(snapshot.get(&child_id).is_none());
        assert_eq!(snapshot.find(&child_id).map(|b| b.kind), Some(BlockType::ListItem));
    }
}
