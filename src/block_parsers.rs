/// Block parsers: one per block type, plus the start factories and the
/// link-reference-definition sub-parser embedded in paragraph parsing
use crate::definitions::{Definitions, LinkReferenceDefinition, normalize_label};
use crate::inline_content::{scan_closing_tag, scan_open_tag, unescape_string};
use crate::link_scanner;
use crate::scanner::{Scanner, SourceLine, SourceLines};
use crate::span::SourceSpans;
use crate::tree::{NodeId, NodeKind, Tree};

/// What a block parser decided about the current line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockContinue {
    /// Continue this block; content resumes at the given index into the line.
    AtIndex(usize),
    /// Continue this block; content resumes at the given column (tab-aware).
    AtColumn(usize),
    /// The line finishes this block (e.g. a closing code fence).
    Finished,
}

/// Snapshot of the engine's per-line state, as seen by block parsers.
pub struct ParserState<'a> {
    pub line: &'a SourceLine,
    pub line_index: usize,
    /// Byte index of the current parse position within the line.
    pub index: usize,
    /// Column of the current parse position; tabs advance to the next
    /// multiple of 4.
    pub column: usize,
    /// Byte index of the next non-space character (or end of line).
    pub next_non_space: usize,
    pub next_non_space_column: usize,
    /// Columns of indentation from `column` to the next non-space character.
    pub indent: usize,
    pub blank: bool,
    /// Whether the innermost open block is a paragraph. Several blocks are
    /// not allowed to interrupt one.
    pub active_is_paragraph: bool,
    /// Whether the innermost open block is a list item.
    pub active_is_list_item: bool,
}

/// Mutable parse-wide state handed to `close_block`.
pub struct BlockContext<'a> {
    pub tree: &'a mut Tree,
    pub definitions: &'a mut Definitions,
}

/// One open block during parsing. Created by a factory when a block starts,
/// fed lines while it stays open, closed when a line fails to continue it or
/// the input ends.
pub trait BlockParser {
    fn node(&self) -> NodeId;

    fn is_container(&self) -> bool {
        false
    }

    /// Whether a new child block of the given kind may be attached. Takes
    /// `&mut self` and the tree because list parsers piggyback their
    /// looseness bookkeeping on this call.
    fn can_contain(&mut self, _tree: &mut Tree, _kind: &NodeKind) -> bool {
        false
    }

    fn can_have_lazy_continuation_lines(&self) -> bool {
        false
    }

    fn try_continue(&mut self, state: &ParserState, tree: &Tree) -> Option<BlockContinue>;

    fn add_line(&mut self, _line: SourceLine) {}

    /// The buffered raw lines of an open paragraph. Factories use this to
    /// reclassify paragraph content (Setext headings). Empty for all other
    /// blocks.
    fn paragraph_lines(&self) -> SourceLines {
        SourceLines::empty()
    }

    /// Remove the last `count` buffered paragraph lines (claimed by a new
    /// block via [`BlockStart::replacing_paragraph_lines`]).
    fn remove_paragraph_lines(&mut self, _count: usize) {}

    /// Close this block: finalize its node, hand definitions to the registry.
    /// Returns the raw content to parse as inlines into this node once the
    /// whole block tree exists.
    fn close_block(&mut self, _cx: &mut BlockContext) -> Option<SourceLines> {
        None
    }
}

/// The deepest matched block parser, as offered to start factories.
pub struct MatchedBlockParser<'a> {
    parser: &'a dyn BlockParser,
}

impl<'a> MatchedBlockParser<'a> {
    pub fn new(parser: &'a dyn BlockParser) -> Self {
        MatchedBlockParser { parser }
    }

    pub fn parser(&self) -> &dyn BlockParser {
        self.parser
    }

    pub fn paragraph_lines(&self) -> SourceLines {
        self.parser.paragraph_lines()
    }
}

/// Result of a factory recognizing the start of a new block.
pub struct BlockStart {
    pub(crate) parsers: Vec<Box<dyn BlockParser>>,
    pub(crate) new_index: Option<usize>,
    pub(crate) new_column: Option<usize>,
    pub(crate) replace_paragraph_lines: usize,
}

impl BlockStart {
    pub fn of(parsers: Vec<Box<dyn BlockParser>>) -> Self {
        BlockStart {
            parsers,
            new_index: None,
            new_column: None,
            replace_paragraph_lines: 0,
        }
    }

    pub fn at_index(mut self, index: usize) -> Self {
        self.new_index = Some(index);
        self
    }

    pub fn at_column(mut self, column: usize) -> Self {
        self.new_column = Some(column);
        self
    }

    /// Claim the last `count` buffered lines of the active paragraph for the
    /// new block. The paragraph is closed with whatever lines remain.
    pub fn replacing_paragraph_lines(mut self, count: usize) -> Self {
        self.replace_paragraph_lines = count;
        self
    }
}

/// Recognizes the start of one block type. Custom factories run before the
/// built-in ones, in registration order.
pub trait BlockParserFactory: Send + Sync {
    fn try_start(
        &self,
        state: &ParserState,
        matched: &MatchedBlockParser,
        tree: &mut Tree,
    ) -> Option<BlockStart>;
}

// ── Document ─────────────────────────────────────────────────────────

pub(crate) struct DocumentBlockParser {
    node: NodeId,
}

impl DocumentBlockParser {
    pub(crate) fn new(tree: &Tree) -> Self {
        DocumentBlockParser { node: tree.root() }
    }
}

impl BlockParser for DocumentBlockParser {
    fn node(&self) -> NodeId {
        self.node
    }

    fn is_container(&self) -> bool {
        true
    }

    fn can_contain(&mut self, _tree: &mut Tree, _kind: &NodeKind) -> bool {
        true
    }

    fn try_continue(&mut self, state: &ParserState, _tree: &Tree) -> Option<BlockContinue> {
        Some(BlockContinue::AtIndex(state.index))
    }
}

// ── Paragraph ────────────────────────────────────────────────────────

pub(crate) struct ParagraphParser {
    node: NodeId,
    definition_parser: LinkReferenceDefinitionParser,
}

impl ParagraphParser {
    pub(crate) fn new(tree: &mut Tree) -> Self {
        ParagraphParser {
            node: tree.create(NodeKind::Paragraph),
            definition_parser: LinkReferenceDefinitionParser::new(),
        }
    }
}

impl BlockParser for ParagraphParser {
    fn node(&self) -> NodeId {
        self.node
    }

    fn can_have_lazy_continuation_lines(&self) -> bool {
        true
    }

    fn try_continue(&mut self, state: &ParserState, _tree: &Tree) -> Option<BlockContinue> {
        if state.blank {
            None
        } else {
            Some(BlockContinue::AtIndex(state.index))
        }
    }

    fn add_line(&mut self, line: SourceLine) {
        self.definition_parser.parse_line(line);
    }

    fn paragraph_lines(&self) -> SourceLines {
        self.definition_parser.paragraph_lines()
    }

    fn remove_paragraph_lines(&mut self, count: usize) {
        self.definition_parser.remove_lines(count);
    }

    fn close_block(&mut self, cx: &mut BlockContext) -> Option<SourceLines> {
        for definition in self.definition_parser.take_definitions() {
            let label = definition.label.clone();
            cx.definitions.register(&label, definition);
        }
        let lines = self.definition_parser.paragraph_lines();
        if lines.is_empty() {
            // The "paragraph" held only definitions
            cx.tree.unlink(self.node);
            return None;
        }
        let spans = lines.source_spans();
        if !spans.is_empty() {
            // Definition lines no longer belong to this node
            let mut merged = SourceSpans::new();
            merged.add_all(spans);
            cx.tree.set_spans(self.node, merged.into_vec());
        }
        Some(lines)
    }
}

// ── Headings (ATX and Setext) ────────────────────────────────────────

pub(crate) struct HeadingParser {
    node: NodeId,
    content: SourceLines,
}

impl HeadingParser {
    fn new(tree: &mut Tree, level: u8, content: SourceLines) -> Self {
        HeadingParser {
            node: tree.create(NodeKind::Heading { level }),
            content,
        }
    }
}

impl BlockParser for HeadingParser {
    fn node(&self) -> NodeId {
        self.node
    }

    fn try_continue(&mut self, _state: &ParserState, _tree: &Tree) -> Option<BlockContinue> {
        // Headings are always a single construct
        None
    }

    fn close_block(&mut self, _cx: &mut BlockContext) -> Option<SourceLines> {
        Some(std::mem::take(&mut self.content))
    }
}

pub(crate) struct HeadingParserFactory;

impl BlockParserFactory for HeadingParserFactory {
    fn try_start(
        &self,
        state: &ParserState,
        matched: &MatchedBlockParser,
        tree: &mut Tree,
    ) -> Option<BlockStart> {
        if state.indent >= 4 {
            return None;
        }
        let content = state.line.content();
        let next_non_space = state.next_non_space;

        if content[next_non_space..].starts_with('#')
            && let Some((level, start, end)) = atx_heading(content, next_non_space)
        {
            let heading_content = if start < end {
                SourceLines::of(vec![state.line.substring(start, end)])
            } else {
                SourceLines::empty()
            };
            let parser: Box<dyn BlockParser> =
                Box::new(HeadingParser::new(tree, level, heading_content));
            return Some(BlockStart::of(vec![parser]).at_index(content.len()));
        }

        let paragraph_lines = matched.paragraph_lines();
        if !paragraph_lines.is_empty()
            && let Some(level) = setext_heading_level(content, next_non_space)
        {
            let count = paragraph_lines.lines().len();
            let parser: Box<dyn BlockParser> =
                Box::new(HeadingParser::new(tree, level, paragraph_lines));
            return Some(
                BlockStart::of(vec![parser])
                    .at_index(content.len())
                    .replacing_paragraph_lines(count),
            );
        }
        None
    }
}

/// Parse an ATX heading at `next_non_space`. Returns the level and the byte
/// range of the heading content (with the optional closing sequence removed).
fn atx_heading(content: &str, next_non_space: usize) -> Option<(u8, usize, usize)> {
    let rest = &content[next_non_space..];
    let level = rest.chars().take_while(|&c| c == '#').count();
    if level == 0 || level > 6 {
        return None;
    }
    let after_hashes = &rest[level..];
    // The opening sequence must be followed by a space, a tab or the end
    if !(after_hashes.is_empty()
        || after_hashes.starts_with(' ')
        || after_hashes.starts_with('\t'))
    {
        return None;
    }

    let mut start = next_non_space + level;
    while content[start..].starts_with([' ', '\t']) {
        start += 1;
    }
    let mut end = content.trim_end_matches([' ', '\t']).len();
    if start >= end {
        return Some((level as u8, end, end));
    }

    let text = &content[start..end];
    if text.chars().all(|c| c == '#') {
        // Only a closing sequence, no content
        return Some((level as u8, start, start));
    }
    // The closing sequence of #s must be preceded by a space or tab
    let without_hashes = text.trim_end_matches('#');
    if without_hashes.len() < text.len() && without_hashes.ends_with([' ', '\t']) {
        end = start + without_hashes.trim_end_matches([' ', '\t']).len();
    }
    Some((level as u8, start, end))
}

/// `=` underlines make a level 1 heading, `-` underlines level 2.
fn setext_heading_level(content: &str, next_non_space: usize) -> Option<u8> {
    let rest = content[next_non_space..].trim_end_matches([' ', '\t']);
    let first = rest.chars().next()?;
    let level = match first {
        '=' => 1,
        '-' => 2,
        _ => return None,
    };
    if rest.chars().all(|c| c == first) {
        Some(level)
    } else {
        None
    }
}

// ── Thematic break ───────────────────────────────────────────────────

pub(crate) struct ThematicBreakParser {
    node: NodeId,
}

impl BlockParser for ThematicBreakParser {
    fn node(&self) -> NodeId {
        self.node
    }

    fn try_continue(&mut self, _state: &ParserState, _tree: &Tree) -> Option<BlockContinue> {
        None
    }
}

pub(crate) struct ThematicBreakParserFactory;

impl BlockParserFactory for ThematicBreakParserFactory {
    fn try_start(
        &self,
        state: &ParserState,
        _matched: &MatchedBlockParser,
        tree: &mut Tree,
    ) -> Option<BlockStart> {
        if state.indent >= 4 {
            return None;
        }
        let content = state.line.content();
        let rest = &content[state.next_non_space..];
        let mut marker = None;
        let mut count = 0;
        for c in rest.chars() {
            match c {
                ' ' | '\t' => continue,
                '-' | '_' | '*' => {
                    if marker.is_none() {
                        marker = Some(c);
                    } else if marker != Some(c) {
                        return None;
                    }
                    count += 1;
                }
                _ => return None,
            }
        }
        if count < 3 {
            return None;
        }
        let node = tree.create(NodeKind::ThematicBreak);
        let parser: Box<dyn BlockParser> = Box::new(ThematicBreakParser { node });
        Some(BlockStart::of(vec![parser]).at_index(content.len()))
    }
}

// ── Block quote ──────────────────────────────────────────────────────

pub(crate) struct BlockQuoteParser {
    node: NodeId,
}

fn block_quote_marker(state: &ParserState) -> Option<usize> {
    let content = state.line.content();
    if state.indent <= 3 && content[state.next_non_space..].starts_with('>') {
        // The column after the marker and its optional following space/tab
        let mut column = state.column + state.indent + 1;
        if content[state.next_non_space + 1..].starts_with([' ', '\t']) {
            column += 1;
        }
        Some(column)
    } else {
        None
    }
}

impl BlockParser for BlockQuoteParser {
    fn node(&self) -> NodeId {
        self.node
    }

    fn is_container(&self) -> bool {
        true
    }

    fn can_contain(&mut self, _tree: &mut Tree, kind: &NodeKind) -> bool {
        kind.is_block()
    }

    fn try_continue(&mut self, state: &ParserState, _tree: &Tree) -> Option<BlockContinue> {
        block_quote_marker(state).map(BlockContinue::AtColumn)
    }
}

pub(crate) struct BlockQuoteParserFactory;

impl BlockParserFactory for BlockQuoteParserFactory {
    fn try_start(
        &self,
        state: &ParserState,
        _matched: &MatchedBlockParser,
        tree: &mut Tree,
    ) -> Option<BlockStart> {
        let column = block_quote_marker(state)?;
        let node = tree.create(NodeKind::BlockQuote);
        let parser: Box<dyn BlockParser> = Box::new(BlockQuoteParser { node });
        Some(BlockStart::of(vec![parser]).at_column(column))
    }
}

// ── Fenced code blocks ───────────────────────────────────────────────

pub(crate) struct FencedCodeBlockParser {
    node: NodeId,
    fence_char: char,
    fence_length: usize,
    fence_indent: usize,
    first_line: Option<SourceLine>,
    lines: Vec<SourceLine>,
}

impl BlockParser for FencedCodeBlockParser {
    fn node(&self) -> NodeId {
        self.node
    }

    fn try_continue(&mut self, state: &ParserState, _tree: &Tree) -> Option<BlockContinue> {
        let content = state.line.content();
        let next_non_space = state.next_non_space;
        if state.indent < 4 && content[next_non_space..].starts_with(self.fence_char) {
            let count = content[next_non_space..]
                .chars()
                .take_while(|&c| c == self.fence_char)
                .count();
            let after = &content[next_non_space + count..];
            if count >= self.fence_length && after.trim_matches([' ', '\t']).is_empty() {
                return Some(BlockContinue::Finished);
            }
        }
        // Skip up to the opening fence's indentation
        let bytes = content.as_bytes();
        let mut new_index = state.index;
        let mut remaining = self.fence_indent;
        while remaining > 0 && new_index < bytes.len() && bytes[new_index] == b' ' {
            new_index += 1;
            remaining -= 1;
        }
        Some(BlockContinue::AtIndex(new_index))
    }

    fn add_line(&mut self, line: SourceLine) {
        if self.first_line.is_none() {
            self.first_line = Some(line);
        } else {
            self.lines.push(line);
        }
    }

    fn close_block(&mut self, cx: &mut BlockContext) -> Option<SourceLines> {
        let info_raw = self
            .first_line
            .as_ref()
            .map(|l| l.content().trim())
            .unwrap_or("");
        let info = if info_raw.is_empty() {
            String::new()
        } else {
            unescape_string(info_raw)
        };
        let mut literal = String::new();
        for line in &self.lines {
            literal.push_str(line.content());
            literal.push('\n');
        }
        if let NodeKind::CodeBlock {
            info: i,
            literal: l,
            ..
        } = cx.tree.kind_mut(self.node)
        {
            *i = info;
            *l = literal;
        }
        None
    }
}

pub(crate) struct FencedCodeBlockParserFactory;

impl BlockParserFactory for FencedCodeBlockParserFactory {
    fn try_start(
        &self,
        state: &ParserState,
        _matched: &MatchedBlockParser,
        tree: &mut Tree,
    ) -> Option<BlockStart> {
        if state.indent >= 4 {
            return None;
        }
        let content = state.line.content();
        let rest = &content[state.next_non_space..];
        let fence_char = match rest.chars().next() {
            Some(c @ ('`' | '~')) => c,
            _ => return None,
        };
        let fence_length = rest.chars().take_while(|&c| c == fence_char).count();
        if fence_length < 3 {
            return None;
        }
        // An info string for a backtick fence cannot contain backticks
        if fence_char == '`' && rest[fence_length..].contains('`') {
            return None;
        }
        let node = tree.create(NodeKind::CodeBlock {
            info: String::new(),
            literal: String::new(),
        });
        let parser: Box<dyn BlockParser> = Box::new(FencedCodeBlockParser {
            node,
            fence_char,
            fence_length,
            fence_indent: state.indent,
            first_line: None,
            lines: Vec::new(),
        });
        Some(BlockStart::of(vec![parser]).at_index(state.next_non_space + fence_length))
    }
}

// ── Indented code blocks ─────────────────────────────────────────────

pub(crate) struct IndentedCodeBlockParser {
    node: NodeId,
    lines: Vec<SourceLine>,
}

impl BlockParser for IndentedCodeBlockParser {
    fn node(&self) -> NodeId {
        self.node
    }

    fn try_continue(&mut self, state: &ParserState, _tree: &Tree) -> Option<BlockContinue> {
        if state.indent >= 4 {
            Some(BlockContinue::AtColumn(state.column + 4))
        } else if state.blank {
            Some(BlockContinue::AtIndex(state.next_non_space))
        } else {
            None
        }
    }

    fn add_line(&mut self, line: SourceLine) {
        self.lines.push(line);
    }

    fn close_block(&mut self, cx: &mut BlockContext) -> Option<SourceLines> {
        // Trailing blank lines belong to whatever comes after the block
        while self
            .lines
            .last()
            .is_some_and(|l| l.content().trim_matches([' ', '\t']).is_empty())
        {
            self.lines.pop();
        }
        let mut literal = String::new();
        for line in &self.lines {
            literal.push_str(line.content());
            literal.push('\n');
        }
        if let NodeKind::CodeBlock { literal: l, .. } = cx.tree.kind_mut(self.node) {
            *l = literal;
        }
        None
    }
}

pub(crate) struct IndentedCodeBlockParserFactory;

impl BlockParserFactory for IndentedCodeBlockParserFactory {
    fn try_start(
        &self,
        state: &ParserState,
        _matched: &MatchedBlockParser,
        tree: &mut Tree,
    ) -> Option<BlockStart> {
        // Indented code cannot interrupt a paragraph
        if state.indent < 4 || state.blank || state.active_is_paragraph {
            return None;
        }
        let node = tree.create(NodeKind::CodeBlock {
            info: String::new(),
            literal: String::new(),
        });
        let parser: Box<dyn BlockParser> = Box::new(IndentedCodeBlockParser {
            node,
            lines: Vec::new(),
        });
        Some(BlockStart::of(vec![parser]).at_column(state.column + 4))
    }
}

// ── HTML blocks ──────────────────────────────────────────────────────

pub(crate) struct HtmlBlockParser {
    node: NodeId,
    block_type: u8,
    finished: bool,
    lines: Vec<SourceLine>,
}

impl BlockParser for HtmlBlockParser {
    fn node(&self) -> NodeId {
        self.node
    }

    fn try_continue(&mut self, state: &ParserState, _tree: &Tree) -> Option<BlockContinue> {
        if self.finished {
            return None;
        }
        if state.blank && matches!(self.block_type, 6 | 7) {
            return None;
        }
        Some(BlockContinue::AtIndex(state.index))
    }

    fn add_line(&mut self, line: SourceLine) {
        if (1..=5).contains(&self.block_type) && html_block_end(line.content(), self.block_type) {
            self.finished = true;
        }
        self.lines.push(line);
    }

    fn close_block(&mut self, cx: &mut BlockContext) -> Option<SourceLines> {
        let mut literal = String::new();
        for (i, line) in self.lines.iter().enumerate() {
            if i > 0 {
                literal.push('\n');
            }
            literal.push_str(line.content());
        }
        literal.push('\n');
        if let NodeKind::HtmlBlock { literal: l } = cx.tree.kind_mut(self.node) {
            *l = literal;
        }
        None
    }
}

pub(crate) struct HtmlBlockParserFactory;

impl BlockParserFactory for HtmlBlockParserFactory {
    fn try_start(
        &self,
        state: &ParserState,
        _matched: &MatchedBlockParser,
        tree: &mut Tree,
    ) -> Option<BlockStart> {
        if state.indent >= 4 {
            return None;
        }
        let rest = &state.line.content()[state.next_non_space..];
        if !rest.starts_with('<') {
            return None;
        }
        let block_type = html_block_type(rest, state.active_is_paragraph)?;
        let node = tree.create(NodeKind::HtmlBlock {
            literal: String::new(),
        });
        let parser: Box<dyn BlockParser> = Box::new(HtmlBlockParser {
            node,
            block_type,
            finished: false,
            lines: Vec::new(),
        });
        Some(BlockStart::of(vec![parser]).at_index(state.index))
    }
}

/// Tag names that open an HTML block of type 6.
const HTML_BLOCK_TAGS: &[&str] = &[
    "address",
    "article",
    "aside",
    "base",
    "basefont",
    "blockquote",
    "body",
    "caption",
    "center",
    "col",
    "colgroup",
    "dd",
    "details",
    "dialog",
    "dir",
    "div",
    "dl",
    "dt",
    "fieldset",
    "figcaption",
    "figure",
    "footer",
    "form",
    "frame",
    "frameset",
    "h1",
    "h2",
    "h3",
    "h4",
    "h5",
    "h6",
    "head",
    "header",
    "hr",
    "html",
    "iframe",
    "legend",
    "li",
    "link",
    "main",
    "menu",
    "menuitem",
    "nav",
    "noframes",
    "ol",
    "optgroup",
    "option",
    "p",
    "param",
    "search",
    "section",
    "summary",
    "table",
    "tbody",
    "td",
    "tfoot",
    "th",
    "thead",
    "title",
    "tr",
    "track",
    "ul",
];

/// Case-insensitive ASCII prefix check that never slices mid-character.
fn starts_with_ignore_case(s: &str, prefix: &str) -> bool {
    s.len() >= prefix.len()
        && s.is_char_boundary(prefix.len())
        && s[..prefix.len()].eq_ignore_ascii_case(prefix)
}

/// Determine the HTML block type (1-7) a line starting with `<` opens, if any.
fn html_block_type(rest: &str, active_is_paragraph: bool) -> Option<u8> {
    for tag in ["<pre", "<script", "<style", "<textarea"] {
        if starts_with_ignore_case(rest, tag) {
            let after = &rest[tag.len()..];
            if after.is_empty() || after.starts_with(['>', ' ', '\t']) {
                return Some(1);
            }
        }
    }
    if rest.starts_with("<!--") {
        return Some(2);
    }
    if rest.starts_with("<?") {
        return Some(3);
    }
    if rest.starts_with("<![CDATA[") {
        return Some(5);
    }
    if rest.starts_with("<!")
        && rest[2..]
            .chars()
            .next()
            .is_some_and(|c| c.is_ascii_uppercase())
    {
        return Some(4);
    }

    for tag in HTML_BLOCK_TAGS {
        // "<tag" opens, "</tag" closes
        for prefix in ["<", "</"] {
            let full = format!("{}{}", prefix, tag);
            if starts_with_ignore_case(rest, &full) {
                let after = &rest[full.len()..];
                if after.is_empty()
                    || after.starts_with(['>', ' ', '\t'])
                    || (prefix == "<" && after.starts_with("/>"))
                {
                    return Some(6);
                }
            }
        }
    }

    // Type 7: a single complete open or closing tag with nothing else after it.
    // It cannot interrupt a paragraph.
    if !active_is_paragraph && is_complete_tag_line(rest) {
        return Some(7);
    }
    None
}

/// Whether a line holds one complete, grammatically valid HTML tag followed
/// only by whitespace. Autolinks like `<http://x>` have invalid tag names and
/// fall through to inline parsing.
fn is_complete_tag_line(rest: &str) -> bool {
    let source = SourceLines::of(vec![SourceLine::of(rest, None)]);
    let mut scanner = Scanner::of(&source);
    scanner.next();
    let ok = match scanner.peek() {
        '/' => scan_closing_tag(&mut scanner),
        c if c.is_ascii_alphabetic() => scan_open_tag(&mut scanner),
        _ => false,
    };
    if !ok {
        return false;
    }
    scanner.match_while(|c| c == ' ' || c == '\t');
    !scanner.has_next()
}

/// Whether a line meets the end condition for HTML block types 1-5.
fn html_block_end(content: &str, block_type: u8) -> bool {
    match block_type {
        1 => {
            let lower = content.to_lowercase();
            lower.contains("</pre>")
                || lower.contains("</script>")
                || lower.contains("</style>")
                || lower.contains("</textarea>")
        }
        2 => content.contains("-->"),
        3 => content.contains("?>"),
        4 => content.contains('>'),
        5 => content.contains("]]>"),
        _ => false,
    }
}

// ── Lists ────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ListMarker {
    Bullet(char),
    Ordered(u32, char),
}

pub(crate) struct ListBlockParser {
    node: NodeId,
    had_blank_line: bool,
    lines_after_blank: usize,
}

fn set_list_tight(tree: &mut Tree, list: NodeId, tight: bool) {
    match tree.kind_mut(list) {
        NodeKind::BulletList { tight: t, .. } | NodeKind::OrderedList { tight: t, .. } => {
            *t = tight;
        }
        _ => {}
    }
}

impl BlockParser for ListBlockParser {
    fn node(&self) -> NodeId {
        self.node
    }

    fn is_container(&self) -> bool {
        true
    }

    fn can_contain(&mut self, tree: &mut Tree, kind: &NodeKind) -> bool {
        if matches!(kind, NodeKind::ListItem) {
            // A new item follows; if the line before it was blank, the list
            // is loose
            if self.had_blank_line && self.lines_after_blank == 1 {
                set_list_tight(tree, self.node, false);
                self.had_blank_line = false;
            }
            true
        } else {
            false
        }
    }

    fn try_continue(&mut self, state: &ParserState, _tree: &Tree) -> Option<BlockContinue> {
        if state.blank {
            self.had_blank_line = true;
            self.lines_after_blank = 0;
        } else if self.had_blank_line {
            self.lines_after_blank += 1;
        }
        // Lists have no markers of their own; they stay open until a
        // non-item block start closes them through can_contain
        Some(BlockContinue::AtIndex(state.index))
    }
}

pub(crate) struct ListItemParser {
    node: NodeId,
    content_indent: usize,
    had_blank_line: bool,
}

impl BlockParser for ListItemParser {
    fn node(&self) -> NodeId {
        self.node
    }

    fn is_container(&self) -> bool {
        true
    }

    fn can_contain(&mut self, tree: &mut Tree, kind: &NodeKind) -> bool {
        if self.had_blank_line {
            // Two blocks in this item with a blank line between them make the
            // containing list loose
            if let Some(parent) = tree.parent(self.node) {
                set_list_tight(tree, parent, false);
            }
        }
        kind.is_block() && !matches!(kind, NodeKind::ListItem)
    }

    fn try_continue(&mut self, state: &ParserState, tree: &Tree) -> Option<BlockContinue> {
        if state.blank {
            if tree.first_child(self.node).is_none() {
                // Blank line right after an empty list item closes it
                return None;
            }
            // Blank lines inside code blocks don't affect looseness
            self.had_blank_line = state.active_is_paragraph || state.active_is_list_item;
            return Some(BlockContinue::AtIndex(state.next_non_space));
        }
        if state.indent >= self.content_indent {
            Some(BlockContinue::AtColumn(state.column + self.content_indent))
        } else {
            None
        }
    }
}

pub(crate) struct ListBlockParserFactory;

impl BlockParserFactory for ListBlockParserFactory {
    fn try_start(
        &self,
        state: &ParserState,
        matched: &MatchedBlockParser,
        tree: &mut Tree,
    ) -> Option<BlockStart> {
        let matched_kind = tree.kind(matched.parser().node()).clone();
        let matched_is_list = matches!(
            matched_kind,
            NodeKind::BulletList { .. } | NodeKind::OrderedList { .. }
        );
        if state.indent >= 4 && !matched_is_list {
            return None;
        }
        let content = state.line.content();
        let (marker, marker_length) = parse_list_marker(content, state.next_non_space)?;

        let in_paragraph = !matched.paragraph_lines().is_empty();
        let marker_end_column = state.column + state.indent + marker_length;
        let mut content_column = marker_end_column;
        let mut has_content = false;
        for c in content[state.next_non_space + marker_length..].chars() {
            match c {
                ' ' => content_column += 1,
                '\t' => content_column += 4 - (content_column % 4),
                _ => {
                    has_content = true;
                    break;
                }
            }
        }
        if in_paragraph {
            // An empty item cannot interrupt a paragraph, and an ordered list
            // can only interrupt one when it starts at 1
            if !has_content {
                return None;
            }
            if let ListMarker::Ordered(start, _) = marker
                && start != 1
            {
                return None;
            }
        }
        let spaces_after_marker = content_column - marker_end_column;
        if !has_content || spaces_after_marker > 4 {
            // Content indented more than 4 columns past the marker starts an
            // indented code block; only one column counts as spacing
            content_column = marker_end_column + 1;
        }
        let content_indent = content_column - state.column;

        let item_node = tree.create(NodeKind::ListItem);
        let item: Box<dyn BlockParser> = Box::new(ListItemParser {
            node: item_node,
            content_indent,
            had_blank_line: false,
        });

        if matched_is_list && lists_match(&matched_kind, marker) {
            return Some(BlockStart::of(vec![item]).at_column(content_column));
        }
        let list_kind = match marker {
            ListMarker::Bullet(c) => NodeKind::BulletList {
                marker: c,
                tight: true,
            },
            ListMarker::Ordered(start, delimiter) => NodeKind::OrderedList {
                start,
                delimiter,
                tight: true,
            },
        };
        let list_node = tree.create(list_kind);
        let list: Box<dyn BlockParser> = Box::new(ListBlockParser {
            node: list_node,
            had_blank_line: false,
            lines_after_blank: 0,
        });
        Some(BlockStart::of(vec![list, item]).at_column(content_column))
    }
}

fn parse_list_marker(content: &str, next_non_space: usize) -> Option<(ListMarker, usize)> {
    let rest = &content[next_non_space..];
    let first = rest.chars().next()?;
    if matches!(first, '-' | '+' | '*') {
        if space_tab_or_end(rest, 1) {
            return Some((ListMarker::Bullet(first), 1));
        }
        return None;
    }
    if first.is_ascii_digit() {
        let digits = rest.chars().take_while(|c| c.is_ascii_digit()).count();
        if digits > 9 {
            return None;
        }
        let delimiter = rest[digits..].chars().next()?;
        if !matches!(delimiter, '.' | ')') {
            return None;
        }
        if space_tab_or_end(rest, digits + 1) {
            let start: u32 = rest[..digits].parse().ok()?;
            return Some((ListMarker::Ordered(start, delimiter), digits + 1));
        }
    }
    None
}

fn space_tab_or_end(s: &str, index: usize) -> bool {
    match s[index..].chars().next() {
        None => true,
        Some(' ') | Some('\t') => true,
        _ => false,
    }
}

fn lists_match(kind: &NodeKind, marker: ListMarker) -> bool {
    match (kind, marker) {
        (NodeKind::BulletList { marker: m, .. }, ListMarker::Bullet(c)) => *m == c,
        (NodeKind::OrderedList { delimiter: d, .. }, ListMarker::Ordered(_, c)) => *d == c,
        _ => false,
    }
}

// ── Link reference definitions ───────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DefinitionState {
    /// Looking for the start of a definition (a `[`)
    StartDefinition,
    /// Inside the label, up to `]:`
    Label,
    /// Looking for or inside the destination
    Destination,
    /// After a confirmed destination, looking for an optional title
    StartTitle,
    /// Inside a title
    Title,
    /// Regular paragraph content; no further definitions can start
    Paragraph,
}

/// Consumes link reference definitions from the front of a paragraph's raw
/// lines. Any remaining lines are the actual paragraph content.
///
/// A definition becomes referenceable the moment its destination is confirmed
/// at the end of a line; a failed title attempt afterwards rolls the title
/// back without invalidating the definition.
pub(crate) struct LinkReferenceDefinitionParser {
    state: DefinitionState,
    lines: Vec<SourceLine>,
    definitions: Vec<LinkReferenceDefinition>,
    label: String,
    destination: String,
    title_delimiter: char,
    title: String,
    title_complete: bool,
    reference_valid: bool,
    /// How many buffered lines the pending reference consumes if it finishes.
    valid_lines: usize,
}

impl LinkReferenceDefinitionParser {
    pub(crate) fn new() -> Self {
        LinkReferenceDefinitionParser {
            state: DefinitionState::StartDefinition,
            lines: Vec::new(),
            definitions: Vec::new(),
            label: String::new(),
            destination: String::new(),
            title_delimiter: '\0',
            title: String::new(),
            title_complete: false,
            reference_valid: false,
            valid_lines: 0,
        }
    }

    pub(crate) fn parse_line(&mut self, line: SourceLine) {
        self.lines.push(line.clone());
        if self.state == DefinitionState::Paragraph {
            return;
        }
        let source = SourceLines::of(vec![line]);
        let mut scanner = Scanner::of(&source);
        while scanner.has_next() {
            let success = match self.state {
                DefinitionState::StartDefinition => self.start_definition(&mut scanner),
                DefinitionState::Label => self.label(&mut scanner),
                DefinitionState::Destination => self.destination(&mut scanner),
                DefinitionState::StartTitle => self.start_title(&mut scanner),
                DefinitionState::Title => self.title(&mut scanner),
                DefinitionState::Paragraph => unreachable!(),
            };
            if !success {
                self.state = DefinitionState::Paragraph;
                // A failed title attempt still leaves a confirmed destination
                // referenceable
                self.finish_reference();
                return;
            }
        }
    }

    /// The lines that are (or would become) paragraph content.
    pub(crate) fn paragraph_lines(&self) -> SourceLines {
        let from = if self.reference_valid {
            self.valid_lines.min(self.lines.len())
        } else {
            0
        };
        SourceLines::of(self.lines[from..].to_vec())
    }

    pub(crate) fn remove_lines(&mut self, count: usize) {
        let new_len = self.lines.len().saturating_sub(count);
        self.lines.truncate(new_len);
    }

    pub(crate) fn take_definitions(&mut self) -> Vec<LinkReferenceDefinition> {
        self.finish_reference();
        std::mem::take(&mut self.definitions)
    }

    fn start_definition(&mut self, scanner: &mut Scanner) -> bool {
        scanner.whitespace();
        if !scanner.next_ch('[') {
            return false;
        }
        self.state = DefinitionState::Label;
        self.label.clear();
        if !scanner.has_next() {
            self.label.push('\n');
        }
        true
    }

    fn label(&mut self, scanner: &mut Scanner) -> bool {
        let start = scanner.position();
        if !link_scanner::scan_link_label_content(scanner) {
            return false;
        }
        self.label
            .push_str(&scanner.get_source(start, scanner.position()).content());
        if !scanner.has_next() {
            // Label continues on the next line
            self.label.push('\n');
            return true;
        }
        if !scanner.next_ch(']') {
            return false;
        }
        if !scanner.next_ch(':') {
            return false;
        }
        // Labels over 999 characters or without any non-whitespace are invalid
        if self.label.chars().count() > 999 || normalize_label(&self.label).is_empty() {
            return false;
        }
        self.state = DefinitionState::Destination;
        self.destination.clear();
        true
    }

    fn destination(&mut self, scanner: &mut Scanner) -> bool {
        scanner.whitespace();
        if !scanner.has_next() {
            // Destination may be on a later line
            return true;
        }
        let start = scanner.position();
        if !link_scanner::scan_link_destination(scanner) {
            return false;
        }
        let raw = scanner.get_source(start, scanner.position()).content();
        self.destination = if raw.starts_with('<') {
            raw[1..raw.len() - 1].to_string()
        } else {
            raw
        };
        let whitespace = scanner.whitespace();
        if !scanner.has_next() {
            // A destination ending the line is already a valid reference;
            // any title on the following lines is optional
            self.reference_valid = true;
            self.valid_lines = self.lines.len();
        } else if whitespace == 0 {
            return false;
        }
        self.state = DefinitionState::StartTitle;
        self.title.clear();
        self.title_complete = false;
        true
    }

    fn start_title(&mut self, scanner: &mut Scanner) -> bool {
        scanner.whitespace();
        if !scanner.has_next() {
            return true;
        }
        self.title_delimiter = match scanner.peek() {
            '"' => '"',
            '\'' => '\'',
            '(' => ')',
            _ => {
                // No title. If the reference is already valid, the rest of
                // the line may start another definition.
                if self.reference_valid {
                    self.finish_reference();
                    self.state = DefinitionState::StartDefinition;
                    return true;
                }
                return false;
            }
        };
        scanner.next();
        self.state = DefinitionState::Title;
        if !scanner.has_next() {
            self.title.push('\n');
        }
        true
    }

    fn title(&mut self, scanner: &mut Scanner) -> bool {
        let start = scanner.position();
        if !link_scanner::scan_link_title_content(scanner, self.title_delimiter)
            && scanner.has_next()
        {
            return false;
        }
        self.title
            .push_str(&scanner.get_source(start, scanner.position()).content());
        if !scanner.has_next() {
            // Title continues on the next line
            self.title.push('\n');
            return true;
        }
        // Skip the closing delimiter
        scanner.next();
        scanner.whitespace();
        if scanner.has_next() {
            // Content after a closed title invalidates the whole definition
            return false;
        }
        self.title_complete = true;
        self.reference_valid = true;
        self.valid_lines = self.lines.len();
        self.finish_reference();
        self.state = DefinitionState::StartDefinition;
        true
    }

    fn finish_reference(&mut self) {
        if !self.reference_valid {
            return;
        }
        let destination = unescape_string(&self.destination);
        let title = if self.title_complete {
            Some(unescape_string(&self.title))
        } else {
            None
        };
        self.definitions.push(LinkReferenceDefinition {
            label: std::mem::take(&mut self.label),
            destination,
            title,
        });
        let consumed = self.valid_lines.min(self.lines.len());
        self.lines.drain(..consumed);
        self.valid_lines = 0;
        self.reference_valid = false;
        self.title_complete = false;
        self.title.clear();
        self.destination.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse_definition_lines(texts: &[&str]) -> (Vec<LinkReferenceDefinition>, String) {
        let mut parser = LinkReferenceDefinitionParser::new();
        for text in texts {
            parser.parse_line(SourceLine::of(*text, None));
        }
        let definitions = parser.take_definitions();
        (definitions, parser.paragraph_lines().content())
    }

    #[test]
    fn test_definition_with_title() {
        let (defs, rest) = parse_definition_lines(&["[foo]: /url \"title\""]);
        assert_eq!(defs.len(), 1);
        assert_eq!(defs[0].destination, "/url");
        assert_eq!(defs[0].title.as_deref(), Some("title"));
        assert_eq!(rest, "");
    }

    #[test]
    fn test_definition_then_paragraph_content() {
        let (defs, rest) = parse_definition_lines(&["[foo]: /url", "bar"]);
        assert_eq!(defs.len(), 1);
        assert_eq!(defs[0].destination, "/url");
        assert_eq!(rest, "bar");
    }

    #[test]
    fn test_failed_title_keeps_destination() {
        let (defs, rest) = parse_definition_lines(&["[foo]: /url", "\"title\" extra"]);
        assert_eq!(defs.len(), 1);
        assert_eq!(defs[0].title, None);
        assert_eq!(rest, "\"title\" extra");
    }

    #[test]
    fn test_title_with_junk_on_same_line_invalidates() {
        let (defs, rest) = parse_definition_lines(&["[foo]: /url \"title\" extra"]);
        assert!(defs.is_empty());
        assert_eq!(rest, "[foo]: /url \"title\" extra");
    }

    #[test]
    fn test_multiple_consecutive_definitions() {
        let (defs, rest) = parse_definition_lines(&["[a]: /a", "[b]: /b", "text"]);
        assert_eq!(defs.len(), 2);
        assert_eq!(defs[0].label, "a");
        assert_eq!(defs[1].label, "b");
        assert_eq!(rest, "text");
    }

    #[test]
    fn test_multiline_label_and_destination() {
        let (defs, rest) = parse_definition_lines(&["[foo", "bar]:", "/url"]);
        assert_eq!(defs.len(), 1);
        assert_eq!(defs[0].label, "foo\nbar");
        assert_eq!(defs[0].destination, "/url");
        assert_eq!(rest, "");
    }

    #[test]
    fn test_paragraph_sink_is_irrevocable() {
        let (defs, rest) = parse_definition_lines(&["not a definition", "[foo]: /url"]);
        assert!(defs.is_empty());
        assert_eq!(rest, "not a definition\n[foo]: /url");
    }

    #[test]
    fn test_overlong_label_is_rejected() {
        let long_label = "x".repeat(1000);
        let line = format!("[{}]: /url", long_label);
        let (defs, _) = parse_definition_lines(&[&line]);
        assert!(defs.is_empty());
    }

    #[test]
    fn test_escaped_destination() {
        let (defs, _) = parse_definition_lines(&["[foo]: /url\\*end"]);
        assert_eq!(defs[0].destination, "/url*end");
    }

    #[test]
    fn test_atx_heading_extraction() {
        assert_eq!(atx_heading("## Heading ##", 0), Some((2, 3, 10)));
        assert_eq!(atx_heading("# foo#", 0), Some((1, 2, 6)));
        assert_eq!(atx_heading("###", 0), Some((3, 3, 3)));
        assert_eq!(atx_heading("#hashtag", 0), None);
        assert_eq!(atx_heading("####### seven", 0), None);
    }

    #[test]
    fn test_setext_underline() {
        assert_eq!(setext_heading_level("===", 0), Some(1));
        assert_eq!(setext_heading_level("--  ", 0), Some(2));
        assert_eq!(setext_heading_level("= =", 0), None);
        assert_eq!(setext_heading_level("", 0), None);
    }

    #[test]
    fn test_list_marker_parsing() {
        assert_eq!(
            parse_list_marker("- foo", 0),
            Some((ListMarker::Bullet('-'), 1))
        );
        assert_eq!(parse_list_marker("-foo", 0), None);
        assert_eq!(
            parse_list_marker("12. foo", 0),
            Some((ListMarker::Ordered(12, '.'), 3))
        );
        assert_eq!(
            parse_list_marker("3)", 0),
            Some((ListMarker::Ordered(3, ')'), 2))
        );
        assert_eq!(parse_list_marker("1234567890. x", 0), None);
    }

    #[test]
    fn test_html_block_types() {
        assert_eq!(html_block_type("<pre>", false), Some(1));
        assert_eq!(html_block_type("<!-- comment", false), Some(2));
        assert_eq!(html_block_type("<?php", false), Some(3));
        assert_eq!(html_block_type("<!DOCTYPE html>", false), Some(4));
        assert_eq!(html_block_type("<![CDATA[", false), Some(5));
        assert_eq!(html_block_type("<div class=\"x\">", false), Some(6));
        assert_eq!(html_block_type("</table>", false), Some(6));
        assert_eq!(html_block_type("<custom-tag attr='1'>", false), Some(7));
        assert_eq!(html_block_type("<custom-tag attr='1'>", true), None);
        assert_eq!(html_block_type("<custom-tag> text", false), None);
    }
}
