/// Parser configuration and the public parse entry point
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use crate::block_parsers::{
    BlockParserFactory, BlockQuoteParserFactory, FencedCodeBlockParserFactory,
    HeadingParserFactory, HtmlBlockParserFactory, IndentedCodeBlockParserFactory,
    ListBlockParserFactory, ThematicBreakParserFactory,
};
use crate::document_parser;
use crate::inline_content::{
    AutolinkInlineParserFactory, BackslashInlineParserFactory, BackticksInlineParserFactory,
    EntityInlineParserFactory, HtmlInlineParserFactory, InlineContentParserFactory,
};
use crate::inline_parser::{
    CoreLinkProcessor, DelimiterProcessor, EmphasisDelimiterProcessor, LinkProcessor,
    StaggeredDelimiterProcessor,
};
use crate::span::IncludeSourceSpans;
use crate::tree::Tree;

/// The core block types that can be switched off individually. Paragraphs
/// and the document root are always enabled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CoreBlockType {
    BlockQuote,
    Heading,
    FencedCodeBlock,
    HtmlBlock,
    ThematicBreak,
    List,
    IndentedCodeBlock,
}

impl CoreBlockType {
    pub fn all() -> Vec<CoreBlockType> {
        vec![
            CoreBlockType::BlockQuote,
            CoreBlockType::Heading,
            CoreBlockType::FencedCodeBlock,
            CoreBlockType::HtmlBlock,
            CoreBlockType::ThematicBreak,
            CoreBlockType::List,
            CoreBlockType::IndentedCodeBlock,
        ]
    }
}

/// Runs once over the finished tree before `parse` returns it.
pub trait PostProcessor: Send + Sync {
    fn process(&self, tree: &mut Tree);
}

/// Per-character dispatch tables for the inline engine, resolved once when
/// the parser is built.
pub(crate) struct InlineConfig {
    pub(crate) content_factories: HashMap<char, Vec<Arc<dyn InlineContentParserFactory>>>,
    pub(crate) delimiter_processors: HashMap<char, Arc<dyn DelimiterProcessor>>,
    pub(crate) link_processors: Vec<Arc<dyn LinkProcessor>>,
    pub(crate) link_markers: HashSet<char>,
    pub(crate) special_characters: HashSet<char>,
}

pub(crate) struct ParserConfig {
    pub(crate) block_parser_factories: Vec<Box<dyn BlockParserFactory>>,
    pub(crate) inline: InlineConfig,
    pub(crate) include_source_spans: IncludeSourceSpans,
    pub(crate) post_processors: Vec<Box<dyn PostProcessor>>,
}

/// A configured CommonMark parser.
///
/// Building one resolves all dispatch tables, so build once and reuse:
/// `parse` takes `&self` and allocates its working state per call, which
/// makes a `Parser` safe to share across threads.
pub struct Parser {
    config: ParserConfig,
}

impl Parser {
    pub fn new() -> Self {
        Parser::builder().build()
    }

    pub fn builder() -> ParserBuilder {
        ParserBuilder::default()
    }

    /// Parse `input` into a document tree. Never fails: every input has a
    /// parse.
    pub fn parse(&self, input: &str) -> Tree {
        let mut tree = document_parser::parse_document(&self.config, input);
        for post_processor in &self.config.post_processors {
            post_processor.process(&mut tree);
        }
        tree
    }
}

impl Default for Parser {
    fn default() -> Self {
        Self::new()
    }
}

pub struct ParserBuilder {
    enabled_block_types: Vec<CoreBlockType>,
    block_parser_factories: Vec<Box<dyn BlockParserFactory>>,
    inline_content_parser_factories: Vec<Arc<dyn InlineContentParserFactory>>,
    delimiter_processors: Vec<Arc<dyn DelimiterProcessor>>,
    link_processors: Vec<Arc<dyn LinkProcessor>>,
    link_markers: HashSet<char>,
    post_processors: Vec<Box<dyn PostProcessor>>,
    include_source_spans: IncludeSourceSpans,
}

impl Default for ParserBuilder {
    fn default() -> Self {
        ParserBuilder {
            enabled_block_types: CoreBlockType::all(),
            block_parser_factories: Vec::new(),
            inline_content_parser_factories: Vec::new(),
            delimiter_processors: Vec::new(),
            link_processors: Vec::new(),
            link_markers: HashSet::new(),
            post_processors: Vec::new(),
            include_source_spans: IncludeSourceSpans::None,
        }
    }
}

impl ParserBuilder {
    /// Restrict parsing to a subset of the core block types. Must not be
    /// empty.
    pub fn enabled_block_types(mut self, types: Vec<CoreBlockType>) -> Self {
        self.enabled_block_types = types;
        self
    }

    /// Register a custom block parser factory, tried before the built-ins.
    pub fn custom_block_parser_factory(mut self, factory: Box<dyn BlockParserFactory>) -> Self {
        self.block_parser_factories.push(factory);
        self
    }

    /// Register a custom inline content parser factory, tried before the
    /// built-ins for its trigger characters.
    pub fn custom_inline_content_parser_factory(
        mut self,
        factory: Arc<dyn InlineContentParserFactory>,
    ) -> Self {
        self.inline_content_parser_factories.push(factory);
        self
    }

    /// Register a custom delimiter processor. Registering two processors for
    /// the same character and minimum length panics in `build`.
    pub fn custom_delimiter_processor(mut self, processor: Arc<dyn DelimiterProcessor>) -> Self {
        self.delimiter_processors.push(processor);
        self
    }

    /// Register a custom link processor, tried before the built-in one.
    pub fn custom_link_processor(mut self, processor: Arc<dyn LinkProcessor>) -> Self {
        self.link_processors.push(processor);
        self
    }

    /// Register an additional link marker character (like `^`), treated like
    /// the `!` of images.
    pub fn link_marker(mut self, marker: char) -> Self {
        self.link_markers.insert(marker);
        self
    }

    pub fn post_processor(mut self, post_processor: Box<dyn PostProcessor>) -> Self {
        self.post_processors.push(post_processor);
        self
    }

    pub fn include_source_spans(mut self, include: IncludeSourceSpans) -> Self {
        self.include_source_spans = include;
        self
    }

    /// Build the parser. Panics on configuration errors (empty block-type
    /// set, conflicting delimiter processors) so mistakes surface at
    /// startup, never mid-parse.
    pub fn build(self) -> Parser {
        assert!(
            !self.enabled_block_types.is_empty(),
            "at least one core block type must be enabled"
        );

        let mut block_parser_factories = self.block_parser_factories;
        for block_type in CoreBlockType::all() {
            if !self.enabled_block_types.contains(&block_type) {
                continue;
            }
            let factory: Box<dyn BlockParserFactory> = match block_type {
                CoreBlockType::BlockQuote => Box::new(BlockQuoteParserFactory),
                CoreBlockType::Heading => Box::new(HeadingParserFactory),
                CoreBlockType::FencedCodeBlock => Box::new(FencedCodeBlockParserFactory),
                CoreBlockType::HtmlBlock => Box::new(HtmlBlockParserFactory),
                CoreBlockType::ThematicBreak => Box::new(ThematicBreakParserFactory),
                CoreBlockType::List => Box::new(ListBlockParserFactory),
                CoreBlockType::IndentedCodeBlock => Box::new(IndentedCodeBlockParserFactory),
            };
            block_parser_factories.push(factory);
        }

        let mut processors: Vec<Arc<dyn DelimiterProcessor>> = vec![
            Arc::new(EmphasisDelimiterProcessor::new('*')),
            Arc::new(EmphasisDelimiterProcessor::new('_')),
        ];
        processors.extend(self.delimiter_processors);
        let delimiter_processors = resolve_delimiter_processors(processors);

        let built_in_content_factories: Vec<Arc<dyn InlineContentParserFactory>> = vec![
            Arc::new(BackslashInlineParserFactory),
            Arc::new(BackticksInlineParserFactory),
            Arc::new(EntityInlineParserFactory),
            Arc::new(AutolinkInlineParserFactory),
            Arc::new(HtmlInlineParserFactory),
        ];
        let mut content_factories: HashMap<char, Vec<Arc<dyn InlineContentParserFactory>>> =
            HashMap::new();
        for factory in self
            .inline_content_parser_factories
            .iter()
            .chain(built_in_content_factories.iter())
        {
            for c in factory.trigger_characters() {
                content_factories.entry(c).or_default().push(factory.clone());
            }
        }

        let mut link_processors = self.link_processors;
        link_processors.push(Arc::new(CoreLinkProcessor));

        let mut link_markers = self.link_markers;
        link_markers.insert('!');

        let mut special_characters: HashSet<char> = HashSet::from(['[', ']', '\n']);
        special_characters.extend(content_factories.keys());
        special_characters.extend(delimiter_processors.keys());
        special_characters.extend(link_markers.iter());

        Parser {
            config: ParserConfig {
                block_parser_factories,
                inline: InlineConfig {
                    content_factories,
                    delimiter_processors,
                    link_processors,
                    link_markers,
                    special_characters,
                },
                include_source_spans: self.include_source_spans,
                post_processors: self.post_processors,
            },
        }
    }
}

/// Resolve the registered processors into one dispatch entry per character.
/// Processors sharing a character with different minimum lengths go through a
/// staggered dispatcher; real conflicts are fatal.
fn resolve_delimiter_processors(
    processors: Vec<Arc<dyn DelimiterProcessor>>,
) -> HashMap<char, Arc<dyn DelimiterProcessor>> {
    let mut symmetric: HashMap<char, Vec<Arc<dyn DelimiterProcessor>>> = HashMap::new();
    let mut symmetric_order: Vec<char> = Vec::new();
    let mut map: HashMap<char, Arc<dyn DelimiterProcessor>> = HashMap::new();

    for processor in processors {
        let opening = processor.opening_character();
        let closing = processor.closing_character();
        if opening == closing {
            let group = symmetric.entry(opening).or_default();
            if group.is_empty() {
                symmetric_order.push(opening);
            }
            group.push(processor);
        } else {
            for c in [opening, closing] {
                if map.insert(c, processor.clone()).is_some() {
                    panic!("delimiter processor conflict for char '{}'", c);
                }
            }
        }
    }
    for c in symmetric_order {
        let mut group = symmetric.remove(&c).unwrap();
        let processor: Arc<dyn DelimiterProcessor> = if group.len() == 1 {
            group.pop().unwrap()
        } else {
            let mut staggered = StaggeredDelimiterProcessor::new(c);
            for p in group {
                staggered.add(p);
            }
            Arc::new(staggered)
        };
        if map.insert(c, processor).is_some() {
            panic!("delimiter processor conflict for char '{}'", c);
        }
    }
    map
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::inline_parser::{DelimiterRun, DelimiterUse};
    use crate::tree::NodeKind;

    #[test]
    #[should_panic(expected = "at least one core block type")]
    fn test_empty_block_types_panics() {
        let _ = Parser::builder().enabled_block_types(vec![]).build();
    }

    #[test]
    #[should_panic(expected = "minimum length")]
    fn test_conflicting_delimiter_processor_panics() {
        let _ = Parser::builder()
            .custom_delimiter_processor(Arc::new(EmphasisDelimiterProcessor::new('*')))
            .build();
    }

    #[test]
    fn test_custom_delimiter_char_becomes_special() {
        struct Tilde;
        impl DelimiterProcessor for Tilde {
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
        let parser = Parser::builder()
            .custom_delimiter_processor(Arc::new(Tilde))
            .build();
        assert!(parser.config.inline.special_characters.contains(&'~'));
        assert!(parser.config.inline.delimiter_processors.contains_key(&'~'));
    }

    #[test]
    fn test_disabled_block_types() {
        let parser = Parser::builder()
            .enabled_block_types(vec![CoreBlockType::Heading])
            .build();
        let tree = parser.parse("> not a quote");
        // With block quotes disabled the marker is literal paragraph text
        let paragraph = tree.first_child(tree.root()).unwrap();
        assert!(matches!(tree.kind(paragraph), NodeKind::Paragraph));
    }
}
