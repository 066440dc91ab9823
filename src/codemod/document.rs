//! Parsed source with query and mutation primitives.
//!
//! tree-sitter trees are read-only, so mutation is expressed as a batch of
//! byte-range edits. Applying a batch splices the text and re-parses the whole
//! document; node handles from before the batch are gone afterwards, and
//! anything that must survive (matched test calls) is tracked as an [`Anchor`]
//! remapped through the returned [`OffsetMap`].

use std::ops::Range;

use tracing::trace;
use tree_sitter::{Node, Parser, Tree};

use crate::codemod::error::{MigrateError, Result};
use crate::codemod::Dialect;

// ============ Document ============

pub struct Document {
    source: String,
    tree: Tree,
    parser: Parser,
}

impl Document {
    /// Parse `source`, failing on any syntax error in the input
    pub fn parse(source: &str, dialect: Dialect) -> Result<Self> {
        let mut parser = Parser::new();
        parser
            .set_language(&dialect.tree_sitter_language())
            .map_err(|e| MigrateError::Language(e.to_string()))?;

        let tree = parser
            .parse(source, None)
            .ok_or(MigrateError::Parse { line: 1, column: 1 })?;

        if let Some((line, column)) = first_error(tree.root_node()) {
            return Err(MigrateError::Parse { line, column });
        }

        Ok(Self {
            source: source.to_string(),
            tree,
            parser,
        })
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn bytes(&self) -> &[u8] {
        self.source.as_bytes()
    }

    pub fn root(&self) -> Node<'_> {
        self.tree.root_node()
    }

    pub fn into_source(self) -> String {
        self.source
    }

    /// Splice `edits` into the source and re-parse.
    ///
    /// A rewrite that leaves the document unparseable aborts the transform;
    /// the document is left as it was before the call.
    pub fn apply(&mut self, edits: EditSet) -> Result<OffsetMap> {
        if edits.is_empty() {
            return Ok(OffsetMap::default());
        }

        let (source, map) = edits.splice(&self.source);
        let tree = self
            .parser
            .parse(&source, None)
            .ok_or(MigrateError::InvalidRewrite { line: 1, column: 1 })?;

        if let Some((line, column)) = first_error(tree.root_node()) {
            return Err(MigrateError::InvalidRewrite { line, column });
        }

        trace!(edits = edits.len(), bytes = source.len(), "applied edit batch");
        self.source = source;
        self.tree = tree;
        Ok(map)
    }

    /// Resolve an anchor to the innermost call expression starting at it
    pub fn call_at(&self, anchor: Anchor) -> Option<Node<'_>> {
        let start = anchor.offset();
        let mut node = self
            .root()
            .descendant_for_byte_range(start, start.saturating_add(1))?;
        loop {
            if node.start_byte() != start {
                return None;
            }
            if node.kind() == "call_expression" {
                return Some(node);
            }
            node = node.parent()?;
        }
    }
}

/// 1-based position of the first ERROR or MISSING node, if any
fn first_error(root: Node) -> Option<(usize, usize)> {
    if !root.has_error() {
        return None;
    }

    let mut stack = vec![root];
    while let Some(node) = stack.pop() {
        if node.is_error() || node.is_missing() {
            let pos = node.start_position();
            return Some((pos.row + 1, pos.column + 1));
        }
        if !node.has_error() {
            continue;
        }
        // Push in reverse so the leftmost error is found first
        let mut cursor = node.walk();
        let children: Vec<Node> = node.children(&mut cursor).collect();
        stack.extend(children.into_iter().rev());
    }

    let pos = root.start_position();
    Some((pos.row + 1, pos.column + 1))
}

// ============ Anchors ============

/// Stable handle on a node across re-parses: the node's start byte
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Anchor(usize);

impl Anchor {
    pub fn of(node: Node) -> Self {
        Self(node.start_byte())
    }

    pub fn offset(&self) -> usize {
        self.0
    }

    pub fn remap(self, map: &OffsetMap) -> Self {
        Self(map.map(self.0))
    }
}

// ============ Edits ============

/// A single text edit: replace `range` with `new_text` (empty range inserts)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Edit {
    pub range: Range<usize>,
    pub new_text: String,
}

impl Edit {
    fn is_insert(&self) -> bool {
        self.range.start == self.range.end
    }

    fn overlaps(&self, other: &Edit) -> bool {
        match (self.is_insert(), other.is_insert()) {
            (true, true) => false,
            (true, false) => other.range.start < self.range.start && self.range.start < other.range.end,
            (false, true) => self.range.start < other.range.start && other.range.start < self.range.end,
            (false, false) => self.range.start < other.range.end && other.range.start < self.range.end,
        }
    }
}

/// Ordered set of non-overlapping edits against one source text
#[derive(Debug, Default)]
pub struct EditSet {
    edits: Vec<Edit>,
}

impl EditSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.edits.len()
    }

    pub fn is_empty(&self) -> bool {
        self.edits.is_empty()
    }

    pub fn replace(&mut self, range: Range<usize>, new_text: impl Into<String>) -> bool {
        self.push(Edit {
            range,
            new_text: new_text.into(),
        })
    }

    pub fn remove(&mut self, range: Range<usize>) -> bool {
        self.replace(range, String::new())
    }

    pub fn insert(&mut self, at: usize, text: impl Into<String>) -> bool {
        self.replace(at..at, text)
    }

    /// Queue an edit. Returns false (and drops it) when it overlaps a queued edit.
    fn push(&mut self, edit: Edit) -> bool {
        if self.edits.iter().any(|e| e.overlaps(&edit) || (!edit.is_insert() && *e == edit)) {
            return false;
        }
        let key = (edit.range.start, edit.range.end);
        let idx = self
            .edits
            .partition_point(|e| (e.range.start, e.range.end) <= key);
        self.edits.insert(idx, edit);
        true
    }

    /// Apply every edit to `source`, returning the new text and the offset map
    pub fn splice(&self, source: &str) -> (String, OffsetMap) {
        let mut out = String::with_capacity(source.len());
        let mut cursor = 0;
        let mut spans = Vec::with_capacity(self.edits.len());

        for edit in &self.edits {
            out.push_str(&source[cursor..edit.range.start]);
            out.push_str(&edit.new_text);
            cursor = edit.range.end;
            spans.push((edit.range.clone(), edit.new_text.len()));
        }
        out.push_str(&source[cursor..]);

        (out, OffsetMap { spans })
    }
}

/// Translates byte offsets from before an edit batch to after it
#[derive(Debug, Default)]
pub struct OffsetMap {
    spans: Vec<(Range<usize>, usize)>,
}

impl OffsetMap {
    pub fn map(&self, pos: usize) -> usize {
        let mut delta: isize = 0;
        for (range, new_len) in &self.spans {
            let old_len = range.end - range.start;
            if range.start == range.end {
                if range.start <= pos {
                    delta += *new_len as isize;
                    continue;
                }
                break;
            }
            if range.end <= pos {
                delta += *new_len as isize - old_len as isize;
            } else if range.start < pos {
                // Offset fell inside replaced text; pin it to the replacement start
                return (range.start as isize + delta) as usize;
            } else {
                break;
            }
        }
        (pos as isize + delta) as usize
    }
}
