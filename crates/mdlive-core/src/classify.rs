//! Single-line syntax classifier
//!
//! Gives an instant guess at what a line will render as, before a full render of the
//! document is available. Rules are tried in a fixed order and the first match wins.

use crate::block::BlockType;

/// Heading prefixes, indexed by level - 1
const HEADING_PREFIXES: [&str; 6] = ["# ", "## ", "### ", "#### ", "##### ", "###### "];

const UNCHECKED_BOX: &str = "- [ ]";
const CHECKED_BOX: &str = "- [x]";

/// Category of a single line of markdown source
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineKind {
    /// `#` to `######` followed by one space
    Heading(usize),
    /// `- [ ]` or `- [x]`
    Checkbox { checked: bool },
    /// `- `, `* ` or `+ `
    UnorderedList,
    /// Leading digit with a later `". "`
    OrderedList,
    /// Opening or closing code fence
    CodeFence,
    /// `> `
    Blockquote,
    Paragraph,
}

impl LineKind {
    pub fn block_type(self) -> BlockType {
        match self {
            LineKind::Heading(level) => BlockType::heading(level),
            LineKind::Checkbox { .. } => BlockType::Checkbox,
            LineKind::UnorderedList => BlockType::UnorderedList,
            LineKind::OrderedList => BlockType::OrderedList,
            LineKind::CodeFence => BlockType::CodeBlock,
            LineKind::Blockquote => BlockType::Blockquote,
            LineKind::Paragraph => BlockType::Paragraph,
        }
    }
}

/// Classify one line of text.
///
/// Surrounding whitespace is trimmed before matching. A blank line has no category;
/// callers treat it as "no block" instead of classifying it (it would come back as
/// `Paragraph`).
///
/// The ordered-list rule also matches prose such as `3.14 is pi. Really`; that is the
/// heuristic's known ambiguity and is left as is.
pub fn classify(line: &str) -> LineKind {
    let trimmed = line.trim();

    if let Some(level) = HEADING_PREFIXES
        .iter()
        .position(|prefix| trimmed.starts_with(prefix))
    {
        return LineKind::Heading(level + 1);
    }

    // Checkbox before unordered list: both start with "- "
    if trimmed.starts_with(UNCHECKED_BOX) {
        return LineKind::Checkbox { checked: false };
    }
    if trimmed.starts_with(CHECKED_BOX) {
        return LineKind::Checkbox { checked: true };
    }

    if ["- ", "* ", "+ "].iter().any(|prefix| trimmed.starts_with(prefix)) {
        return LineKind::UnorderedList;
    }

    if trimmed.starts_with(|c: char| c.is_ascii_digit()) && trimmed.contains(". ") {
        return LineKind::OrderedList;
    }

    if trimmed.starts_with("```") {
        return LineKind::CodeFence;
    }

    if trimmed.starts_with("> ") {
        return LineKind::Blockquote;
    }

    LineKind::Paragraph
}
