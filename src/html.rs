/// HTML renderer for the node tree
use std::collections::HashMap;

use crate::tree::{NodeId, NodeKind, Tree};
use crate::visitor::Visitor;

/// Output buffer that collapses consecutive line requests into a single
/// newline, which is what keeps block output in the reference shape.
pub struct HtmlWriter {
    buffer: String,
}

impl HtmlWriter {
    fn new() -> Self {
        HtmlWriter {
            buffer: String::new(),
        }
    }

    pub fn raw(&mut self, s: &str) {
        self.buffer.push_str(s);
    }

    pub fn text(&mut self, s: &str) {
        self.buffer.push_str(&escape_html(s));
    }

    /// Make sure the output is at a line start.
    pub fn line(&mut self) {
        if !self.buffer.is_empty() && !self.buffer.ends_with('\n') {
            self.buffer.push('\n');
        }
    }

    fn into_string(self) -> String {
        self.buffer
    }
}

/// Renders the HTML for one custom node kind, registered by kind name.
pub trait NodeHtmlRenderer: Send + Sync {
    fn render(&self, renderer: &HtmlRenderer, tree: &Tree, node: NodeId, out: &mut HtmlWriter);
}

pub struct HtmlRenderer {
    custom_renderers: HashMap<String, Box<dyn NodeHtmlRenderer>>,
}

impl HtmlRenderer {
    pub fn new() -> Self {
        HtmlRenderer {
            custom_renderers: HashMap::new(),
        }
    }

    pub fn builder() -> HtmlRendererBuilder {
        HtmlRendererBuilder {
            custom_renderers: HashMap::new(),
        }
    }

    pub fn render(&self, tree: &Tree) -> String {
        let mut out = HtmlWriter::new();
        self.render_node(tree, tree.root(), &mut out);
        out.into_string()
    }

    pub fn render_children(&self, tree: &Tree, node: NodeId, out: &mut HtmlWriter) {
        let mut child = tree.first_child(node);
        while let Some(id) = child {
            let next = tree.next_sibling(id);
            self.render_node(tree, id, out);
            child = next;
        }
    }

    pub fn render_node(&self, tree: &Tree, node: NodeId, out: &mut HtmlWriter) {
        match tree.kind(node) {
            NodeKind::Document => self.render_children(tree, node, out),
            NodeKind::Paragraph => {
                if in_tight_list(tree, node) {
                    self.render_children(tree, node, out);
                } else {
                    out.line();
                    out.raw("<p>");
                    self.render_children(tree, node, out);
                    out.raw("</p>");
                    out.line();
                }
            }
            NodeKind::Heading { level } => {
                let level = *level;
                out.line();
                out.raw(&format!("<h{}>", level));
                self.render_children(tree, node, out);
                out.raw(&format!("</h{}>", level));
                out.line();
            }
            NodeKind::BlockQuote => {
                out.line();
                out.raw("<blockquote>");
                out.line();
                self.render_children(tree, node, out);
                out.line();
                out.raw("</blockquote>");
                out.line();
            }
            NodeKind::BulletList { .. } => {
                out.line();
                out.raw("<ul>");
                out.line();
                self.render_children(tree, node, out);
                out.raw("</ul>");
                out.line();
            }
            NodeKind::OrderedList { start, .. } => {
                let start = *start;
                out.line();
                if start == 1 {
                    out.raw("<ol>");
                } else {
                    out.raw(&format!("<ol start=\"{}\">", start));
                }
                out.line();
                self.render_children(tree, node, out);
                out.raw("</ol>");
                out.line();
            }
            NodeKind::ListItem => {
                out.raw("<li>");
                self.render_children(tree, node, out);
                out.raw("</li>");
                out.line();
            }
            NodeKind::CodeBlock { info, literal, .. } => {
                out.line();
                out.raw("<pre><code");
                // The first word of the info string is the language
                if let Some(language) = info.split_whitespace().next() {
                    out.raw(" class=\"language-");
                    out.text(language);
                    out.raw("\"");
                }
                out.raw(">");
                out.text(literal);
                out.raw("</code></pre>");
                out.line();
            }
            NodeKind::HtmlBlock { literal } => {
                out.line();
                out.raw(literal);
                out.line();
            }
            NodeKind::ThematicBreak => {
                out.line();
                out.raw("<hr />");
                out.line();
            }
            NodeKind::Text { literal } => out.text(literal),
            NodeKind::Code { literal } => {
                out.raw("<code>");
                out.text(literal);
                out.raw("</code>");
            }
            NodeKind::Emphasis => {
                out.raw("<em>");
                self.render_children(tree, node, out);
                out.raw("</em>");
            }
            NodeKind::Strong => {
                out.raw("<strong>");
                self.render_children(tree, node, out);
                out.raw("</strong>");
            }
            NodeKind::Link { destination, title } => {
                out.raw("<a href=\"");
                out.text(&url_encode(destination));
                out.raw("\"");
                if let Some(title) = title {
                    out.raw(" title=\"");
                    out.text(title);
                    out.raw("\"");
                }
                out.raw(">");
                self.render_children(tree, node, out);
                out.raw("</a>");
            }
            NodeKind::Image { destination, title } => {
                out.raw("<img src=\"");
                out.text(&url_encode(destination));
                out.raw("\" alt=\"");
                out.text(&alt_text(tree, node));
                out.raw("\"");
                if let Some(title) = title {
                    out.raw(" title=\"");
                    out.text(title);
                    out.raw("\"");
                }
                out.raw(" />");
            }
            NodeKind::HtmlInline { literal } => out.raw(literal),
            NodeKind::SoftBreak => out.raw("\n"),
            NodeKind::HardBreak => {
                out.raw("<br />");
                out.line();
            }
            NodeKind::CustomBlock { name, .. } | NodeKind::CustomInline { name, .. } => {
                if let Some(renderer) = self.custom_renderers.get(name) {
                    renderer.render(self, tree, node, out);
                } else {
                    self.render_children(tree, node, out);
                }
            }
        }
    }
}

impl Default for HtmlRenderer {
    fn default() -> Self {
        Self::new()
    }
}

pub struct HtmlRendererBuilder {
    custom_renderers: HashMap<String, Box<dyn NodeHtmlRenderer>>,
}

impl HtmlRendererBuilder {
    /// Register a renderer for a custom node kind by its name.
    pub fn node_renderer(mut self, name: impl Into<String>, r: Box<dyn NodeHtmlRenderer>) -> Self {
        self.custom_renderers.insert(name.into(), r);
        self
    }

    pub fn build(self) -> HtmlRenderer {
        HtmlRenderer {
            custom_renderers: self.custom_renderers,
        }
    }
}

/// Paragraphs directly inside a tight list item render without `<p>` tags.
fn in_tight_list(tree: &Tree, paragraph: NodeId) -> bool {
    let Some(item) = tree.parent(paragraph) else {
        return false;
    };
    if !matches!(tree.kind(item), NodeKind::ListItem) {
        return false;
    }
    match tree.parent(item).map(|list| tree.kind(list)) {
        Some(NodeKind::BulletList { tight, .. }) | Some(NodeKind::OrderedList { tight, .. }) => {
            *tight
        }
        _ => false,
    }
}

/// The plain text of an image's description, for the `alt` attribute.
fn alt_text(tree: &Tree, image: NodeId) -> String {
    struct AltTextVisitor {
        text: String,
    }
    impl Visitor for AltTextVisitor {
        fn visit_text(&mut self, tree: &Tree, node: NodeId) {
            if let NodeKind::Text { literal } = tree.kind(node) {
                self.text.push_str(literal);
            }
        }
        fn visit_code(&mut self, tree: &Tree, node: NodeId) {
            if let NodeKind::Code { literal } = tree.kind(node) {
                self.text.push_str(literal);
            }
        }
        fn visit_soft_break(&mut self, _tree: &Tree, _node: NodeId) {
            self.text.push('\n');
        }
        fn visit_hard_break(&mut self, _tree: &Tree, _node: NodeId) {
            self.text.push('\n');
        }
    }
    let mut visitor = AltTextVisitor {
        text: String::new(),
    };
    visitor.visit_children(tree, image);
    visitor.text
}

fn escape_html(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '&' => out.push_str("&amp;"),
            '"' => out.push_str("&quot;"),
            _ => out.push(c),
        }
    }
    out
}

/// Percent-encode non-ASCII and unsafe characters for href/src attributes.
fn url_encode(text: &str) -> String {
    let mut result = String::with_capacity(text.len());
    for c in text.chars() {
        if c.is_ascii_alphanumeric()
            || matches!(
                c,
                '-' | '_'
                    | '.'
                    | '~'
                    | '!'
                    | '*'
                    | '\''
                    | '('
                    | ')'
                    | ';'
                    | ':'
                    | '@'
                    | '&'
                    | '='
                    | '+'
                    | '$'
                    | ','
                    | '/'
                    | '?'
                    | '#'
                    | '['
                    | ']'
                    | '%'
            )
        {
            result.push(c);
        } else {
            for byte in c.to_string().as_bytes() {
                result.push_str(&format!("%{:02X}", byte));
            }
        }
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_escape_html() {
        assert_eq!(escape_html("a<b>&\"c\""), "a&lt;b&gt;&amp;&quot;c&quot;");
    }

    #[test]
    fn test_url_encode() {
        assert_eq!(url_encode("/url?a=b#frag"), "/url?a=b#frag");
        assert_eq!(url_encode("/föö"), "/f%C3%B6%C3%B6");
        assert_eq!(url_encode("/url with space"), "/url%20with%20space");
    }

    #[test]
    fn test_custom_node_renderer() {
        struct Mark;
        impl NodeHtmlRenderer for Mark {
            fn render(
                &self,
                renderer: &HtmlRenderer,
                tree: &Tree,
                node: NodeId,
                out: &mut HtmlWriter,
            ) {
                out.raw("<mark>");
                renderer.render_children(tree, node, out);
                out.raw("</mark>");
            }
        }

        let mut tree = Tree::new();
        let paragraph = tree.create(NodeKind::Paragraph);
        tree.append_child(tree.root(), paragraph);
        let custom = tree.create(NodeKind::CustomInline {
            name: "highlight".to_string(),
            data: serde_json::Value::Null,
        });
        tree.append_child(paragraph, custom);
        let text = tree.create(NodeKind::Text {
            literal: "x".to_string(),
        });
        tree.append_child(custom, text);

        let renderer = HtmlRenderer::builder()
            .node_renderer("highlight", Box::new(Mark))
            .build();
        assert_eq!(renderer.render(&tree), "<p><mark>x</mark></p>\n");
    }
}
