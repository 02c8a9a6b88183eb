/// A CommonMark parser producing a position-tracked AST, with pluggable
/// block, inline and link syntax, and an HTML renderer over the tree
pub mod block_parsers;
pub mod definitions;
pub mod html;
pub mod inline_content;
pub mod inline_parser;
pub mod parser;
pub mod scanner;
pub mod span;
pub mod tree;
pub mod visitor;

mod document_parser;
mod link_scanner;

pub use definitions::LinkReferenceDefinition;
pub use html::HtmlRenderer;
pub use parser::{CoreBlockType, Parser, ParserBuilder, PostProcessor};
pub use span::{IncludeSourceSpans, SourceSpan};
pub use tree::{NodeId, NodeKind, Tree};
pub use visitor::Visitor;

/// Parse markdown text and render it to HTML
pub fn markdown_to_html(markdown: &str) -> String {
    let parser = Parser::new();
    let tree = parser.parse(markdown);
    let renderer = HtmlRenderer::new();
    renderer.render(&tree)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_input() {
        assert_eq!(markdown_to_html(""), "");
    }

    #[test]
    fn test_basic_image() {
        let result = markdown_to_html("![foo](/url \"title\")\n");
        assert_eq!(
            result,
            "<p><img src=\"/url\" alt=\"foo\" title=\"title\" /></p>\n"
        );
    }

    #[test]
    fn test_image_without_title() {
        let result = markdown_to_html("![bar](/path)\n");
        assert_eq!(result, "<p><img src=\"/path\" alt=\"bar\" /></p>\n");
    }
}
