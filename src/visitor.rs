/// Visiting the finished tree, one method per node kind
use crate::tree::{NodeId, NodeKind, Tree};

/// A visitor over the node tree. Every method defaults to walking the node's
/// children, so implementations only override what they care about. Custom
/// (extension-defined) kinds get their own generic hooks.
pub trait Visitor {
    fn visit(&mut self, tree: &Tree, node: NodeId) {
        match tree.kind(node) {
            NodeKind::Document => self.visit_document(tree, node),
            NodeKind::BlockQuote => self.visit_block_quote(tree, node),
            NodeKind::BulletList { .. } => self.visit_bullet_list(tree, node),
            NodeKind::OrderedList { .. } => self.visit_ordered_list(tree, node),
            NodeKind::ListItem => self.visit_list_item(tree, node),
            NodeKind::Paragraph => self.visit_paragraph(tree, node),
            NodeKind::Heading { .. } => self.visit_heading(tree, node),
            NodeKind::CodeBlock { .. } => self.visit_code_block(tree, node),
            NodeKind::HtmlBlock { .. } => self.visit_html_block(tree, node),
            NodeKind::ThematicBreak => self.visit_thematic_break(tree, node),
            NodeKind::Text { .. } => self.visit_text(tree, node),
            NodeKind::Code { .. } => self.visit_code(tree, node),
            NodeKind::Emphasis => self.visit_emphasis(tree, node),
            NodeKind::Strong => self.visit_strong(tree, node),
            NodeKind::Link { .. } => self.visit_link(tree, node),
            NodeKind::Image { .. } => self.visit_image(tree, node),
            NodeKind::HtmlInline { .. } => self.visit_html_inline(tree, node),
            NodeKind::SoftBreak => self.visit_soft_break(tree, node),
            NodeKind::HardBreak => self.visit_hard_break(tree, node),
            NodeKind::CustomBlock { .. } => self.visit_custom_block(tree, node),
            NodeKind::CustomInline { .. } => self.visit_custom_inline(tree, node),
        }
    }

    fn visit_children(&mut self, tree: &Tree, node: NodeId) {
        let mut child = tree.first_child(node);
        while let Some(id) = child {
            let next = tree.next_sibling(id);
            self.visit(tree, id);
            child = next;
        }
    }

    fn visit_document(&mut self, tree: &Tree, node: NodeId) {
        self.visit_children(tree, node);
    }

    fn visit_block_quote(&mut self, tree: &Tree, node: NodeId) {
        self.visit_children(tree, node);
    }

    fn visit_bullet_list(&mut self, tree: &Tree, node: NodeId) {
        self.visit_children(tree, node);
    }

    fn visit_ordered_list(&mut self, tree: &Tree, node: NodeId) {
        self.visit_children(tree, node);
    }

    fn visit_list_item(&mut self, tree: &Tree, node: NodeId) {
        self.visit_children(tree, node);
    }

    fn visit_paragraph(&mut self, tree: &Tree, node: NodeId) {
        self.visit_children(tree, node);
    }

    fn visit_heading(&mut self, tree: &Tree, node: NodeId) {
        self.visit_children(tree, node);
    }

    fn visit_code_block(&mut self, tree: &Tree, node: NodeId) {
        self.visit_children(tree, node);
    }

    fn visit_html_block(&mut self, tree: &Tree, node: NodeId) {
        self.visit_children(tree, node);
    }

    fn visit_thematic_break(&mut self, tree: &Tree, node: NodeId) {
        self.visit_children(tree, node);
    }

    fn visit_text(&mut self, tree: &Tree, node: NodeId) {
        self.visit_children(tree, node);
    }

    fn visit_code(&mut self, tree: &Tree, node: NodeId) {
        self.visit_children(tree, node);
    }

    fn visit_emphasis(&mut self, tree: &Tree, node: NodeId) {
        self.visit_children(tree, node);
    }

    fn visit_strong(&mut self, tree: &Tree, node: NodeId) {
        self.visit_children(tree, node);
    }

    fn visit_link(&mut self, tree: &Tree, node: NodeId) {
        self.visit_children(tree, node);
    }

    fn visit_image(&mut self, tree: &Tree, node: NodeId) {
        self.visit_children(tree, node);
    }

    fn visit_html_inline(&mut self, tree: &Tree, node: NodeId) {
        self.visit_children(tree, node);
    }

    fn visit_soft_break(&mut self, tree: &Tree, node: NodeId) {
        self.visit_children(tree, node);
    }

    fn visit_hard_break(&mut self, tree: &Tree, node: NodeId) {
        self.visit_children(tree, node);
    }

    fn visit_custom_block(&mut self, tree: &Tree, node: NodeId) {
        self.visit_children(tree, node);
    }

    fn visit_custom_inline(&mut self, tree: &Tree, node: NodeId) {
        self.visit_children(tree, node);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_visitor_walks_whole_tree() {
        struct TextCollector {
            collected: Vec<String>,
        }
        impl Visitor for TextCollector {
            fn visit_text(&mut self, tree: &Tree, node: NodeId) {
                if let NodeKind::Text { literal } = tree.kind(node) {
                    self.collected.push(literal.clone());
                }
            }
        }

        let mut tree = Tree::new();
        let paragraph = tree.create(NodeKind::Paragraph);
        tree.append_child(tree.root(), paragraph);
        let emphasis = tree.create(NodeKind::Emphasis);
        let a = tree.create(NodeKind::Text {
            literal: "a".to_string(),
        });
        let b = tree.create(NodeKind::Text {
            literal: "b".to_string(),
        });
        tree.append_child(paragraph, a);
        tree.append_child(paragraph, emphasis);
        tree.append_child(emphasis, b);

        let mut collector = TextCollector {
            collected: Vec::new(),
        };
        collector.visit(&tree, tree.root());
        assert_eq!(collector.collected, vec!["a", "b"]);
    }
}
