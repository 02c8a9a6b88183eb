/// The AST: an arena of nodes linked by parent/child/sibling indices
use serde::{Deserialize, Serialize};

use crate::span::SourceSpan;

/// Index of a node in its [`Tree`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NodeId(u32);

impl NodeId {
    fn index(self) -> usize {
        self.0 as usize
    }
}

/// The discriminant and payload of a node.
///
/// Block kinds and inline kinds are closed sets; extensions contribute
/// `CustomBlock`/`CustomInline` nodes carrying a name and an arbitrary
/// JSON payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum NodeKind {
    // Block-level nodes
    Document,
    BlockQuote,
    BulletList {
        marker: char,
        tight: bool,
    },
    OrderedList {
        start: u32,
        delimiter: char,
        tight: bool,
    },
    ListItem,
    Paragraph,
    Heading {
        level: u8,
    },
    CodeBlock {
        info: String,
        literal: String,
    },
    HtmlBlock {
        literal: String,
    },
    ThematicBreak,
    // Inline nodes
    Text {
        literal: String,
    },
    Code {
        literal: String,
    },
    Emphasis,
    Strong,
    Link {
        destination: String,
        title: Option<String>,
    },
    Image {
        destination: String,
        title: Option<String>,
    },
    HtmlInline {
        literal: String,
    },
    SoftBreak,
    HardBreak,
    // Extension nodes
    CustomBlock {
        name: String,
        data: serde_json::Value,
    },
    CustomInline {
        name: String,
        data: serde_json::Value,
    },
}

impl NodeKind {
    pub fn is_block(&self) -> bool {
        matches!(
            self,
            NodeKind::Document
                | NodeKind::BlockQuote
                | NodeKind::BulletList { .. }
                | NodeKind::OrderedList { .. }
                | NodeKind::ListItem
                | NodeKind::Paragraph
                | NodeKind::Heading { .. }
                | NodeKind::CodeBlock { .. }
                | NodeKind::HtmlBlock { .. }
                | NodeKind::ThematicBreak
                | NodeKind::CustomBlock { .. }
        )
    }

    pub fn is_inline(&self) -> bool {
        !self.is_block()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Node {
    kind: NodeKind,
    spans: Vec<SourceSpan>,
    parent: Option<NodeId>,
    first_child: Option<NodeId>,
    last_child: Option<NodeId>,
    previous_sibling: Option<NodeId>,
    next_sibling: Option<NodeId>,
}

/// The document tree. Node 0 is always the `Document` root.
///
/// All structural mutation goes through the methods here, which keep the
/// parent/child/sibling links consistent: after any operation, following
/// links in either direction never reaches a detached node.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Tree {
    nodes: Vec<Node>,
}

impl Tree {
    pub fn new() -> Self {
        let mut tree = Tree { nodes: Vec::new() };
        tree.create(NodeKind::Document);
        tree
    }

    pub fn root(&self) -> NodeId {
        NodeId(0)
    }

    /// Allocate a new detached node.
    pub fn create(&mut self, kind: NodeKind) -> NodeId {
        let id = NodeId(self.nodes.len() as u32);
        self.nodes.push(Node {
            kind,
            spans: Vec::new(),
            parent: None,
            first_child: None,
            last_child: None,
            previous_sibling: None,
            next_sibling: None,
        });
        id
    }

    pub fn kind(&self, id: NodeId) -> &NodeKind {
        &self.nodes[id.index()].kind
    }

    pub fn kind_mut(&mut self, id: NodeId) -> &mut NodeKind {
        &mut self.nodes[id.index()].kind
    }

    pub fn parent(&self, id: NodeId) -> Option<NodeId> {
        self.nodes[id.index()].parent
    }

    pub fn first_child(&self, id: NodeId) -> Option<NodeId> {
        self.nodes[id.index()].first_child
    }

    pub fn last_child(&self, id: NodeId) -> Option<NodeId> {
        self.nodes[id.index()].last_child
    }

    pub fn previous_sibling(&self, id: NodeId) -> Option<NodeId> {
        self.nodes[id.index()].previous_sibling
    }

    pub fn next_sibling(&self, id: NodeId) -> Option<NodeId> {
        self.nodes[id.index()].next_sibling
    }

    pub fn spans(&self, id: NodeId) -> &[SourceSpan] {
        &self.nodes[id.index()].spans
    }

    /// Add a span, merging with the previous one when contiguous.
    pub fn add_span(&mut self, id: NodeId, span: SourceSpan) {
        if span.length == 0 {
            return;
        }
        let spans = &mut self.nodes[id.index()].spans;
        if let Some(last) = spans.last_mut()
            && last.is_adjacent_to(&span)
        {
            last.length += span.length;
            return;
        }
        spans.push(span);
    }

    pub fn set_spans(&mut self, id: NodeId, spans: Vec<SourceSpan>) {
        self.nodes[id.index()].spans = spans;
    }

    /// Append `child` as the last child of `parent`. `child` must be detached.
    pub fn append_child(&mut self, parent: NodeId, child: NodeId) {
        self.assert_detached(child);
        self.assert_can_attach(parent, child);
        let old_last = self.nodes[parent.index()].last_child;
        self.nodes[child.index()].parent = Some(parent);
        self.nodes[child.index()].previous_sibling = old_last;
        match old_last {
            Some(last) => self.nodes[last.index()].next_sibling = Some(child),
            None => self.nodes[parent.index()].first_child = Some(child),
        }
        self.nodes[parent.index()].last_child = Some(child);
    }

    /// Prepend `child` as the first child of `parent`. `child` must be detached.
    pub fn prepend_child(&mut self, parent: NodeId, child: NodeId) {
        self.assert_detached(child);
        self.assert_can_attach(parent, child);
        let old_first = self.nodes[parent.index()].first_child;
        self.nodes[child.index()].parent = Some(parent);
        self.nodes[child.index()].next_sibling = old_first;
        match old_first {
            Some(first) => self.nodes[first.index()].previous_sibling = Some(child),
            None => self.nodes[parent.index()].last_child = Some(child),
        }
        self.nodes[parent.index()].first_child = Some(child);
    }

    /// Insert `node` as the next sibling of `sibling`. `node` must be detached.
    pub fn insert_after(&mut self, sibling: NodeId, node: NodeId) {
        self.assert_detached(node);
        let parent = self.nodes[sibling.index()].parent;
        if let Some(parent) = parent {
            self.assert_can_attach(parent, node);
        }
        let old_next = self.nodes[sibling.index()].next_sibling;
        self.nodes[node.index()].parent = parent;
        self.nodes[node.index()].previous_sibling = Some(sibling);
        self.nodes[node.index()].next_sibling = old_next;
        self.nodes[sibling.index()].next_sibling = Some(node);
        match old_next {
            Some(next) => self.nodes[next.index()].previous_sibling = Some(node),
            None => {
                if let Some(parent) = parent {
                    self.nodes[parent.index()].last_child = Some(node);
                }
            }
        }
    }

    /// Insert `node` as the previous sibling of `sibling`. `node` must be detached.
    pub fn insert_before(&mut self, sibling: NodeId, node: NodeId) {
        let parent = self.nodes[sibling.index()].parent;
        match self.nodes[sibling.index()].previous_sibling {
            Some(prev) => self.insert_after(prev, node),
            None => {
                if let Some(parent) = parent {
                    self.prepend_child(parent, node);
                }
            }
        }
    }

    /// Detach a node from the tree, repairing the links of its former parent
    /// and siblings. The node keeps its own children.
    pub fn unlink(&mut self, id: NodeId) {
        let node = &self.nodes[id.index()];
        let (parent, prev, next) = (node.parent, node.previous_sibling, node.next_sibling);
        match prev {
            Some(prev) => self.nodes[prev.index()].next_sibling = next,
            None => {
                if let Some(parent) = parent {
                    self.nodes[parent.index()].first_child = next;
                }
            }
        }
        match next {
            Some(next) => self.nodes[next.index()].previous_sibling = prev,
            None => {
                if let Some(parent) = parent {
                    self.nodes[parent.index()].last_child = prev;
                }
            }
        }
        let node = &mut self.nodes[id.index()];
        node.parent = None;
        node.previous_sibling = None;
        node.next_sibling = None;
    }

    pub fn children(&self, id: NodeId) -> Children<'_> {
        Children {
            tree: self,
            next: self.first_child(id),
        }
    }

    fn assert_detached(&self, id: NodeId) {
        let node = &self.nodes[id.index()];
        debug_assert!(
            node.parent.is_none() && node.previous_sibling.is_none() && node.next_sibling.is_none(),
            "node must be detached before it can be attached"
        );
    }

    fn assert_can_attach(&self, parent: NodeId, child: NodeId) {
        // Blocks may only live under blocks; inlines may live anywhere.
        debug_assert!(
            !self.kind(child).is_block() || self.kind(parent).is_block(),
            "a block node cannot be the child of an inline node"
        );
        let _ = (parent, child);
    }
}

impl Default for Tree {
    fn default() -> Self {
        Self::new()
    }
}

pub struct Children<'a> {
    tree: &'a Tree,
    next: Option<NodeId>,
}

impl Iterator for Children<'_> {
    type Item = NodeId;

    fn next(&mut self) -> Option<NodeId> {
        let current = self.next?;
        self.next = self.tree.next_sibling(current);
        Some(current)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn text(tree: &mut Tree, s: &str) -> NodeId {
        tree.create(NodeKind::Text {
            literal: s.to_string(),
        })
    }

    #[test]
    fn test_append_and_iterate() {
        let mut tree = Tree::new();
        let para = tree.create(NodeKind::Paragraph);
        tree.append_child(tree.root(), para);
        let a = text(&mut tree, "a");
        let b = text(&mut tree, "b");
        tree.append_child(para, a);
        tree.append_child(para, b);

        assert_eq!(tree.children(para).collect::<Vec<_>>(), vec![a, b]);
        assert_eq!(tree.parent(a), Some(para));
        assert_eq!(tree.previous_sibling(b), Some(a));
        assert_eq!(tree.next_sibling(a), Some(b));
    }

    #[test]
    fn test_unlink_middle_repairs_links() {
        let mut tree = Tree::new();
        let para = tree.create(NodeKind::Paragraph);
        tree.append_child(tree.root(), para);
        let a = text(&mut tree, "a");
        let b = text(&mut tree, "b");
        let c = text(&mut tree, "c");
        for n in [a, b, c] {
            tree.append_child(para, n);
        }

        tree.unlink(b);
        assert_eq!(tree.children(para).collect::<Vec<_>>(), vec![a, c]);
        assert_eq!(tree.next_sibling(a), Some(c));
        assert_eq!(tree.previous_sibling(c), Some(a));
        assert_eq!(tree.parent(b), None);
        assert_eq!(tree.previous_sibling(b), None);
        assert_eq!(tree.next_sibling(b), None);
    }

    #[test]
    fn test_unlink_first_and_last() {
        let mut tree = Tree::new();
        let para = tree.create(NodeKind::Paragraph);
        tree.append_child(tree.root(), para);
        let a = text(&mut tree, "a");
        let b = text(&mut tree, "b");
        tree.append_child(para, a);
        tree.append_child(para, b);

        tree.unlink(a);
        assert_eq!(tree.first_child(para), Some(b));
        tree.unlink(b);
        assert_eq!(tree.first_child(para), None);
        assert_eq!(tree.last_child(para), None);
    }

    #[test]
    fn test_insert_after_and_before() {
        let mut tree = Tree::new();
        let para = tree.create(NodeKind::Paragraph);
        tree.append_child(tree.root(), para);
        let a = text(&mut tree, "a");
        tree.append_child(para, a);
        let b = text(&mut tree, "b");
        tree.insert_after(a, b);
        let zero = text(&mut tree, "0");
        tree.insert_before(a, zero);

        assert_eq!(tree.children(para).collect::<Vec<_>>(), vec![zero, a, b]);
        assert_eq!(tree.last_child(para), Some(b));
        assert_eq!(tree.first_child(para), Some(zero));
    }

    #[test]
    fn test_span_merging_on_node() {
        let mut tree = Tree::new();
        let para = tree.create(NodeKind::Paragraph);
        tree.add_span(para, SourceSpan::of(0, 0, 0, 4));
        tree.add_span(para, SourceSpan::of(0, 4, 4, 2));
        tree.add_span(para, SourceSpan::of(1, 0, 7, 3));
        assert_eq!(
            tree.spans(para),
            &[SourceSpan::of(0, 0, 0, 6), SourceSpan::of(1, 0, 7, 3)]
        );
    }
}
