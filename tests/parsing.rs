//! End-to-end parsing behavior: totality, reference resolution, emphasis
//! pairing, lazy continuation and the extension surface.

use std::sync::Arc;

use treemark::html::{HtmlRenderer, HtmlWriter, NodeHtmlRenderer};
use treemark::inline_parser::{
    DelimiterProcessor, DelimiterRun, DelimiterUse, LinkContext, LinkInfo, LinkProcessor,
    LinkResult,
};
use treemark::scanner::Scanner;
use treemark::span::IncludeSourceSpans;
use treemark::{NodeId, NodeKind, Parser, PostProcessor, SourceSpan, Tree, markdown_to_html};

#[test]
fn parsing_is_total() {
    let inputs = [
        "",
        "\n",
        "\r\n\r\n",
        "a\0b",
        "\0",
        "*[`\\",
        "[[[[[[",
        "******",
        "> > > deep",
        "- - \t-",
        "[x]: <",
        "衣桁 *強調* 終わり",
        "\u{FFFF}\u{10FFFF}",
    ];
    for input in inputs {
        let tree = Parser::new().parse(input);
        assert!(matches!(tree.kind(tree.root()), NodeKind::Document));
        // Rendering must not panic either
        let _ = markdown_to_html(input);
    }
}

#[test]
fn nul_bytes_become_replacement_characters() {
    assert_eq!(markdown_to_html("a\0b"), "<p>a\u{FFFD}b</p>\n");
}

#[test]
fn parsing_twice_yields_identical_trees() {
    let input = "# heading\n\n> quote *em*\nlazy\n\n- a\n- b\n\n[ref]\n\n[ref]: /url\n";
    let parser = Parser::new();
    let first = parser.parse(input);
    let second = parser.parse(input);
    assert_eq!(
        serde_json::to_string(&first).unwrap(),
        serde_json::to_string(&second).unwrap()
    );
}

#[test]
fn multiple_of_three_rule() {
    assert_eq!(
        markdown_to_html("*foo**bar***"),
        "<p><em>foo<strong>bar</strong></em></p>\n"
    );
    assert_eq!(markdown_to_html("*foo**bar*"), "<p><em>foo**bar</em></p>\n");
    assert_eq!(
        markdown_to_html("**foo*bar**baz*"),
        "<p><strong>foo*bar</strong>baz*</p>\n"
    );
}

fn assert_no_link_inside_link(tree: &Tree, node: NodeId, inside_link: bool) {
    let is_link = matches!(tree.kind(node), NodeKind::Link { .. });
    assert!(
        !(is_link && inside_link),
        "found a Link nested inside another Link"
    );
    for child in tree.children(node) {
        assert_no_link_inside_link(tree, child, inside_link || is_link);
    }
}

#[test]
fn no_nested_links() {
    let tree = Parser::new().parse("[a [b](/b) c](/a)");
    assert_no_link_inside_link(&tree, tree.root(), false);
    // The inner link still resolves
    assert_eq!(
        markdown_to_html("[a [b](/b) c](/a)"),
        "<p>[a <a href=\"/b\">b</a> c](/a)</p>\n"
    );
}

#[test]
fn reference_labels_are_normalized() {
    assert_eq!(
        markdown_to_html("[Foo Bar]: /url\n\n[foo   bar]"),
        "<p><a href=\"/url\">foo   bar</a></p>\n"
    );
    // Unicode case folding, not just ASCII
    assert_eq!(
        markdown_to_html("[ΑΓΩ]: /φου\n\n[αγω]"),
        "<p><a href=\"/%CF%86%CE%BF%CF%85\">αγω</a></p>\n"
    );
}

#[test]
fn first_definition_wins() {
    assert_eq!(
        markdown_to_html("[foo]: /first\n[foo]: /second\n\n[foo]"),
        "<p><a href=\"/first\">foo</a></p>\n"
    );
}

#[test]
fn overlong_reference_labels_are_plain_text() {
    let label = "x".repeat(1000);
    let input = format!("[{}]: /url\n", label);
    let html = markdown_to_html(&input);
    assert!(html.starts_with("<p>["));
}

#[test]
fn lazy_continuation() {
    assert_eq!(
        markdown_to_html("> foo\nbar"),
        "<blockquote>\n<p>foo\nbar</p>\n</blockquote>\n"
    );
    // A thematic break is never lazy
    assert_eq!(
        markdown_to_html("> Foo\n---"),
        "<blockquote>\n<p>Foo</p>\n</blockquote>\n<hr />\n"
    );
}

#[test]
fn tab_counts_as_four_columns() {
    assert_eq!(markdown_to_html("\tfoo"), "<pre><code>foo\n</code></pre>\n");
    assert_eq!(
        markdown_to_html("  \tfoo"),
        "<pre><code>foo\n</code></pre>\n"
    );
}

#[test]
fn forward_references_resolve() {
    assert_eq!(
        markdown_to_html("[ref]\n\n[ref]: /target"),
        "<p><a href=\"/target\">ref</a></p>\n"
    );
}

#[test]
fn unmatched_delimiters_are_literal() {
    assert_eq!(markdown_to_html("a*b"), "<p>a*b</p>\n");
    assert_eq!(markdown_to_html("*a"), "<p>*a</p>\n");
    assert_eq!(markdown_to_html("`unclosed"), "<p>`unclosed</p>\n");
}

#[test]
fn unterminated_inline_link_falls_back_to_reference() {
    assert_eq!(
        markdown_to_html("[foo]: /url\n\n[foo](not closed"),
        "<p><a href=\"/url\">foo</a>(not closed</p>\n"
    );
}

// ── Extension surface ────────────────────────────────────────────────

struct StrikethroughProcessor;

impl DelimiterProcessor for StrikethroughProcessor {
    fn opening_character(&self) -> char {
        '~'
    }

    fn closing_character(&self) -> char {
        '~'
    }

    fn min_length(&self) -> usize {
        2
    }

    fn process(&self, opening: &DelimiterRun, closing: &DelimiterRun) -> DelimiterUse {
        if opening.length >= 2 && closing.length >= 2 {
            DelimiterUse::Wrap {
                consume: 2,
                kind: NodeKind::CustomInline {
                    name: "strikethrough".to_string(),
                    data: serde_json::Value::Null,
                },
            }
        } else {
            DelimiterUse::None
        }
    }
}

struct DelRenderer;

impl NodeHtmlRenderer for DelRenderer {
    fn render(&self, renderer: &HtmlRenderer, tree: &Tree, node: NodeId, out: &mut HtmlWriter) {
        out.raw("<del>");
        renderer.render_children(tree, node, out);
        out.raw("</del>");
    }
}

#[test]
fn custom_delimiter_processor_end_to_end() {
    let parser = Parser::builder()
        .custom_delimiter_processor(Arc::new(StrikethroughProcessor))
        .build();
    let renderer = HtmlRenderer::builder()
        .node_renderer("strikethrough", Box::new(DelRenderer))
        .build();
    let tree = parser.parse("~~hi~~ there, ~single~ stays");
    assert_eq!(
        renderer.render(&tree),
        "<p><del>hi</del> there, ~single~ stays</p>\n"
    );
}

struct FootnoteLinkProcessor;

impl LinkProcessor for FootnoteLinkProcessor {
    fn process(
        &self,
        info: &LinkInfo,
        _scanner: &mut Scanner,
        context: &mut LinkContext,
    ) -> LinkResult {
        let Some(marker) = info.marker else {
            return LinkResult::None;
        };
        let is_footnote =
            matches!(context.tree.kind(marker), NodeKind::Text { literal } if literal == "^");
        if !is_footnote {
            return LinkResult::None;
        }
        let node = context.tree.create(NodeKind::CustomInline {
            name: "footnote-ref".to_string(),
            data: serde_json::json!({ "label": info.text }),
        });
        LinkResult::ReplaceWith {
            node,
            position: info.after_text_bracket,
        }
    }
}

#[test]
fn custom_link_marker_and_processor() {
    let parser = Parser::builder()
        .link_marker('^')
        .custom_link_processor(Arc::new(FootnoteLinkProcessor))
        .build();
    let tree = parser.parse("see ^[the note] here");

    let paragraph = tree.first_child(tree.root()).unwrap();
    let kinds: Vec<&NodeKind> = tree
        .children(paragraph)
        .map(|child| tree.kind(child))
        .collect();
    assert_eq!(kinds.len(), 3);
    assert!(matches!(kinds[0], NodeKind::Text { literal } if literal == "see "));
    assert!(
        matches!(kinds[1], NodeKind::CustomInline { name, data }
            if name == "footnote-ref" && data["label"] == "the note")
    );
    assert!(matches!(kinds[2], NodeKind::Text { literal } if literal == " here"));
}

struct UppercaseText;

impl PostProcessor for UppercaseText {
    fn process(&self, tree: &mut Tree) {
        fn walk(tree: &mut Tree, node: NodeId) {
            let mut child = tree.first_child(node);
            while let Some(id) = child {
                let next = tree.next_sibling(id);
                if let NodeKind::Text { literal } = tree.kind_mut(id) {
                    *literal = literal.to_uppercase();
                }
                walk(tree, id);
                child = next;
            }
        }
        walk(tree, tree.root());
    }
}

#[test]
fn post_processors_run_over_the_finished_tree() {
    let parser = Parser::builder()
        .post_processor(Box::new(UppercaseText))
        .build();
    let tree = parser.parse("hello *world*");
    assert_eq!(
        HtmlRenderer::new().render(&tree),
        "<p>HELLO <em>WORLD</em></p>\n"
    );
}

// ── Source spans ─────────────────────────────────────────────────────

#[test]
fn block_source_spans() {
    let parser = Parser::builder()
        .include_source_spans(IncludeSourceSpans::Blocks)
        .build();
    let tree = parser.parse("> foo\n> bar");
    let quote = tree.first_child(tree.root()).unwrap();
    assert_eq!(
        tree.spans(quote),
        &[SourceSpan::of(0, 0, 0, 5), SourceSpan::of(1, 0, 6, 5)]
    );
    let paragraph = tree.first_child(quote).unwrap();
    assert_eq!(
        tree.spans(paragraph),
        &[SourceSpan::of(0, 2, 2, 3), SourceSpan::of(1, 2, 8, 3)]
    );
}

#[test]
fn inline_source_spans() {
    let parser = Parser::builder()
        .include_source_spans(IncludeSourceSpans::BlocksAndInlines)
        .build();
    let tree = parser.parse("foo\nbar");
    let paragraph = tree.first_child(tree.root()).unwrap();
    let children: Vec<NodeId> = tree.children(paragraph).collect();
    assert_eq!(children.len(), 3);
    assert_eq!(tree.spans(children[0]), &[SourceSpan::of(0, 0, 0, 3)]);
    assert!(matches!(tree.kind(children[1]), NodeKind::SoftBreak));
    assert_eq!(tree.spans(children[2]), &[SourceSpan::of(1, 0, 4, 3)]);
}
