/// The inline engine: per-character dispatch, delimiter and bracket stacks,
/// emphasis resolution and link/image resolution
use std::collections::HashMap;
use std::sync::Arc;

use crate::definitions::{Definitions, LinkReferenceDefinition};
use crate::inline_content::{InlineContentParser, InlineParserState, unescape_string};
use crate::link_scanner;
use crate::parser::InlineConfig;
use crate::scanner::{END, Position, Scanner, SourceLine, SourceLines};
use crate::span::SourceSpans;
use crate::tree::{NodeId, NodeKind, Tree};

// ── Delimiter processors ─────────────────────────────────────────────

/// One side of a potential delimiter pairing, as offered to processors.
#[derive(Debug, Clone, Copy)]
pub struct DelimiterRun {
    /// Remaining (unconsumed) length of the run.
    pub length: usize,
    /// Length of the run as it appeared in the source.
    pub original_length: usize,
    pub can_open: bool,
    pub can_close: bool,
}

/// A delimiter processor's verdict on an opener/closer pairing.
pub enum DelimiterUse {
    /// These two runs don't pair.
    None,
    /// Consume `consume` delimiters from each run and wrap everything between
    /// them in a node of the given kind.
    Wrap { consume: usize, kind: NodeKind },
}

/// Handles one delimiter character (like `*` for emphasis). Custom processors
/// can bring their own characters; the engine owns all tree mutation.
pub trait DelimiterProcessor: Send + Sync {
    fn opening_character(&self) -> char;
    fn closing_character(&self) -> char;
    fn min_length(&self) -> usize;
    fn process(&self, opening: &DelimiterRun, closing: &DelimiterRun) -> DelimiterUse;
}

/// `*` and `_` emphasis / strong emphasis.
pub(crate) struct EmphasisDelimiterProcessor {
    delimiter_char: char,
}

impl EmphasisDelimiterProcessor {
    pub(crate) fn new(delimiter_char: char) -> Self {
        EmphasisDelimiterProcessor { delimiter_char }
    }
}

impl DelimiterProcessor for EmphasisDelimiterProcessor {
    fn opening_character(&self) -> char {
        self.delimiter_char
    }

    fn closing_character(&self) -> char {
        self.delimiter_char
    }

    fn min_length(&self) -> usize {
        1
    }

    fn process(&self, opening: &DelimiterRun, closing: &DelimiterRun) -> DelimiterUse {
        // "Multiple of 3" rule: when one of the runs could both open and
        // close, the pairing is rejected if the combined original length is a
        // multiple of 3 but the individual lengths aren't both
        if (opening.can_close || closing.can_open)
            && (opening.original_length + closing.original_length) % 3 == 0
            && !(opening.original_length % 3 == 0 && closing.original_length % 3 == 0)
        {
            return DelimiterUse::None;
        }
        if opening.length >= 2 && closing.length >= 2 {
            DelimiterUse::Wrap {
                consume: 2,
                kind: NodeKind::Strong,
            }
        } else {
            DelimiterUse::Wrap {
                consume: 1,
                kind: NodeKind::Emphasis,
            }
        }
    }
}

/// Dispatches between processors registered for the same character with
/// different minimum lengths.
pub(crate) struct StaggeredDelimiterProcessor {
    delimiter_char: char,
    /// Sorted by minimum length, longest first.
    processors: Vec<Arc<dyn DelimiterProcessor>>,
}

impl StaggeredDelimiterProcessor {
    pub(crate) fn new(delimiter_char: char) -> Self {
        StaggeredDelimiterProcessor {
            delimiter_char,
            processors: Vec::new(),
        }
    }

    pub(crate) fn add(&mut self, processor: Arc<dyn DelimiterProcessor>) {
        let length = processor.min_length();
        for (i, existing) in self.processors.iter().enumerate() {
            match existing.min_length().cmp(&length) {
                std::cmp::Ordering::Greater => continue,
                std::cmp::Ordering::Equal => panic!(
                    "cannot register two delimiter processors for char '{}' and minimum length {}",
                    self.delimiter_char, length
                ),
                std::cmp::Ordering::Less => {
                    self.processors.insert(i, processor);
                    return;
                }
            }
        }
        self.processors.push(processor);
    }

    fn find_processor(&self, length: usize) -> &dyn DelimiterProcessor {
        self.processors
            .iter()
            .find(|p| p.min_length() <= length)
            .unwrap_or_else(|| self.processors.first().unwrap())
            .as_ref()
    }
}

impl DelimiterProcessor for StaggeredDelimiterProcessor {
    fn opening_character(&self) -> char {
        self.delimiter_char
    }

    fn closing_character(&self) -> char {
        self.delimiter_char
    }

    fn min_length(&self) -> usize {
        self.processors.last().map(|p| p.min_length()).unwrap_or(1)
    }

    fn process(&self, opening: &DelimiterRun, closing: &DelimiterRun) -> DelimiterUse {
        self.find_processor(opening.length).process(opening, closing)
    }
}

// ── Link processors ──────────────────────────────────────────────────

/// Everything the engine learned about a `[...]` span and what follows it.
pub struct LinkInfo {
    /// The marker text node (`!` or a custom link marker), if any.
    pub marker: Option<NodeId>,
    /// The `[` text node.
    pub opener: NodeId,
    /// Raw source between the brackets.
    pub text: String,
    /// A `[label]` following the closing bracket, if present (may be empty
    /// for collapsed references).
    pub label: Option<String>,
    /// An inline destination in parentheses, if present (already unescaped).
    pub destination: Option<String>,
    pub title: Option<String>,
    /// Position right after the closing `]` of the text.
    pub after_text_bracket: Position,
}

pub enum LinkResult {
    /// Not a link; let the next processor decide.
    None,
    /// Wrap everything since the opening bracket into a node of this kind and
    /// continue scanning from `position`.
    WrapTextIn {
        kind: NodeKind,
        position: Position,
        include_marker: bool,
    },
    /// Throw away the bracketed text and append `node` instead.
    ReplaceWith { node: NodeId, position: Position },
}

pub struct LinkContext<'a> {
    pub tree: &'a mut Tree,
    pub definitions: &'a Definitions,
}

/// Resolves a bracketed span into a link-like node. Custom processors run
/// before the built-in one.
pub trait LinkProcessor: Send + Sync {
    fn process(
        &self,
        info: &LinkInfo,
        scanner: &mut Scanner,
        context: &mut LinkContext,
    ) -> LinkResult;
}

/// Inline, full, collapsed and shortcut links and images.
pub(crate) struct CoreLinkProcessor;

impl LinkProcessor for CoreLinkProcessor {
    fn process(
        &self,
        info: &LinkInfo,
        scanner: &mut Scanner,
        context: &mut LinkContext,
    ) -> LinkResult {
        if let Some(destination) = &info.destination {
            // Inline link
            return wrap_in_link(info, context, destination.clone(), info.title.clone(), scanner);
        }
        let reference = match &info.label {
            Some(label) if !label.is_empty() => label.as_str(),
            _ => info.text.as_str(),
        };
        if let Some(definition) = context
            .definitions
            .lookup::<LinkReferenceDefinition>(reference)
        {
            let (destination, title) = (definition.destination.clone(), definition.title.clone());
            return wrap_in_link(info, context, destination, title, scanner);
        }
        LinkResult::None
    }
}

fn wrap_in_link(
    info: &LinkInfo,
    context: &mut LinkContext,
    destination: String,
    title: Option<String>,
    scanner: &Scanner,
) -> LinkResult {
    let image = info.marker.is_some_and(
        |marker| matches!(context.tree.kind(marker), NodeKind::Text { literal } if literal == "!"),
    );
    let kind = if image {
        NodeKind::Image { destination, title }
    } else {
        NodeKind::Link { destination, title }
    };
    LinkResult::WrapTextIn {
        kind,
        position: scanner.position(),
        include_marker: image,
    }
}

// ── Engine internals ─────────────────────────────────────────────────

/// One maximal run of a delimiter character, one text node per character.
struct Delimiter {
    text_nodes: Vec<NodeId>,
    delimiter_char: char,
    original_length: usize,
    can_open: bool,
    can_close: bool,
    previous: Option<usize>,
    next: Option<usize>,
}

impl Delimiter {
    fn run(&self) -> DelimiterRun {
        DelimiterRun {
            length: self.text_nodes.len(),
            original_length: self.original_length,
            can_open: self.can_open,
            can_close: self.can_close,
        }
    }
}

/// Doubly-linked delimiter stack backed by an arena; removal tombstones the
/// entry so indices stay stable.
#[derive(Default)]
struct DelimiterList {
    arena: Vec<Delimiter>,
    first: Option<usize>,
    last: Option<usize>,
}

impl DelimiterList {
    fn push(&mut self, mut delimiter: Delimiter) -> usize {
        let index = self.arena.len();
        delimiter.previous = self.last;
        delimiter.next = None;
        match self.last {
            Some(last) => self.arena[last].next = Some(index),
            None => self.first = Some(index),
        }
        self.last = Some(index);
        self.arena.push(delimiter);
        index
    }

    fn remove(&mut self, index: usize) {
        let (previous, next) = (self.arena[index].previous, self.arena[index].next);
        match previous {
            Some(p) => self.arena[p].next = next,
            None => self.first = next,
        }
        match next {
            Some(n) => self.arena[n].previous = previous,
            None => self.last = previous,
        }
        self.arena[index].previous = None;
        self.arena[index].next = None;
    }
}

/// A pending `[` or `![`.
#[derive(Clone)]
struct Bracket {
    marker_node: Option<NodeId>,
    marker_position: Option<Position>,
    bracket_node: NodeId,
    bracket_position: Position,
    /// Where the bracketed text starts (after `[`).
    content_position: Position,
    /// Delimiter stack top when this bracket was opened; emphasis inside the
    /// eventual link text is resolved only above this.
    previous_delimiter: Option<usize>,
    /// Cleared once an enclosing link succeeds: no links inside links.
    allowed: bool,
    /// Whether another bracket opened after this one (shortcut references
    /// can't contain brackets, so lookups are skipped).
    bracket_after: bool,
}

pub(crate) struct InlineParser<'a> {
    config: &'a InlineConfig,
    definitions: &'a Definitions,
    include_spans: bool,
}

impl<'a> InlineParser<'a> {
    pub(crate) fn new(
        config: &'a InlineConfig,
        definitions: &'a Definitions,
        include_spans: bool,
    ) -> Self {
        InlineParser {
            config,
            definitions,
            include_spans,
        }
    }

    /// Parse `lines` into inline nodes appended to `block`.
    pub(crate) fn parse(&self, tree: &mut Tree, block: NodeId, lines: &SourceLines) {
        let trimmed = trim_trailing_whitespace(lines);
        let mut content_parsers: HashMap<char, Vec<Box<dyn InlineContentParser>>> = HashMap::new();
        for (c, factories) in &self.config.content_factories {
            content_parsers.insert(*c, factories.iter().map(|f| f.create()).collect());
        }
        let scanner = Scanner::of(&trimmed);
        let mut run = InlineRun {
            config: self.config,
            definitions: self.definitions,
            include_spans: self.include_spans,
            tree,
            scanner,
            block,
            delimiters: DelimiterList::default(),
            brackets: Vec::new(),
            content_parsers,
        };
        run.parse_all();
    }
}

/// The paragraph's final line loses its trailing spaces and tabs before
/// inline parsing (they would otherwise read as a line break).
fn trim_trailing_whitespace(lines: &SourceLines) -> SourceLines {
    let mut lines: Vec<SourceLine> = lines.lines().to_vec();
    if let Some(last) = lines.last_mut() {
        let content = last.content();
        let trimmed_len = content.trim_end_matches([' ', '\t']).len();
        if trimmed_len < content.len() {
            *last = last.substring(0, trimmed_len);
        }
    }
    SourceLines::of(lines)
}

struct InlineRun<'a, 'l> {
    config: &'a InlineConfig,
    definitions: &'a Definitions,
    include_spans: bool,
    tree: &'a mut Tree,
    scanner: Scanner<'l>,
    block: NodeId,
    delimiters: DelimiterList,
    brackets: Vec<Bracket>,
    content_parsers: HashMap<char, Vec<Box<dyn InlineContentParser>>>,
}

impl InlineRun<'_, '_> {
    fn parse_all(&mut self) {
        loop {
            let c = self.scanner.peek();
            match c {
                END => break,
                '[' => self.open_bracket(),
                ']' => self.close_bracket(),
                '\n' => self.line_break(),
                c if self.config.link_markers.contains(&c) => self.link_marker(c),
                c if self.config.special_characters.contains(&c) => self.special(c),
                _ => self.text_run(),
            }
        }
        self.process_delimiters(None);
        self.merge_text_nodes(self.block);
    }

    fn append(&mut self, node: NodeId) {
        self.tree.append_child(self.block, node);
    }

    fn make_text(&mut self, literal: impl Into<String>, from: Position, to: Position) -> NodeId {
        let node = self.tree.create(NodeKind::Text {
            literal: literal.into(),
        });
        if self.include_spans {
            for span in self.scanner.get_source(from, to).source_spans() {
                self.tree.add_span(node, span);
            }
        }
        node
    }

    // ── Text and breaks ──────────────────────────────────────────────

    fn text_run(&mut self) {
        let start = self.scanner.position();
        let config = self.config;
        self.scanner.next();
        self.scanner.match_while(|c| {
            c != '\n' && !config.special_characters.contains(&c) && !config.link_markers.contains(&c)
        });
        let literal = self.scanner.get_source(start, self.scanner.position()).content();
        let node = self.make_text(literal, start, self.scanner.position());
        self.append(node);
    }

    fn line_break(&mut self) {
        self.scanner.next();
        // Trailing spaces before the line ending decide hard vs soft break
        let mut hard = false;
        if let Some(last) = self.tree.last_child(self.block)
            && let NodeKind::Text { literal } = self.tree.kind(last)
        {
            let trimmed_len = literal.trim_end_matches(' ').len();
            let spaces = literal.len() - trimmed_len;
            if spaces > 0 {
                hard = spaces >= 2;
                if trimmed_len == 0 {
                    self.tree.unlink(last);
                } else {
                    if let NodeKind::Text { literal } = self.tree.kind_mut(last) {
                        literal.truncate(trimmed_len);
                    }
                    self.shrink_spans(last, spaces);
                }
            }
        }
        let node = self.tree.create(if hard {
            NodeKind::HardBreak
        } else {
            NodeKind::SoftBreak
        });
        self.append(node);
        // Leading spaces of the next line are not content
        self.scanner.match_while(|c| c == ' ');
    }

    fn shrink_spans(&mut self, node: NodeId, mut by: usize) {
        if !self.include_spans || by == 0 {
            return;
        }
        let mut spans = self.tree.spans(node).to_vec();
        while by > 0 {
            let Some(last) = spans.last_mut() else {
                break;
            };
            if last.length <= by {
                by -= last.length;
                spans.pop();
            } else {
                last.length -= by;
                by = 0;
            }
        }
        self.tree.set_spans(node, spans);
    }

    // ── Dispatch for special characters ──────────────────────────────

    fn special(&mut self, c: char) {
        let start = self.scanner.position();
        let include_spans = self.include_spans;
        let mut parsed = None;
        if let Some(parsers) = self.content_parsers.get_mut(&c) {
            for parser in parsers {
                let mut state = InlineParserState {
                    scanner: &mut self.scanner,
                    tree: &mut *self.tree,
                    include_spans,
                };
                if let Some(result) = parser.try_parse(&mut state) {
                    parsed = Some(result);
                    break;
                }
                self.scanner.set_position(start);
            }
        }
        if let Some(parsed) = parsed {
            self.scanner.set_position(parsed.position);
            self.append(parsed.node);
            return;
        }

        let processor = self.config.delimiter_processors.get(&c).cloned();
        if let Some(processor) = processor
            && self.scan_delimiters(processor, c)
        {
            return;
        }
        self.text_run();
    }

    fn link_marker(&mut self, c: char) {
        let start = self.scanner.position();
        self.scanner.next();
        if self.scanner.peek() != '[' {
            self.scanner.set_position(start);
            self.special(c);
            return;
        }
        let marker_node = self.make_text(c.to_string(), start, self.scanner.position());
        self.append(marker_node);
        let bracket_position = self.scanner.position();
        self.scanner.next();
        let bracket_node = self.make_text("[", bracket_position, self.scanner.position());
        self.append(bracket_node);
        self.push_bracket(Bracket {
            marker_node: Some(marker_node),
            marker_position: Some(start),
            bracket_node,
            bracket_position,
            content_position: self.scanner.position(),
            previous_delimiter: self.delimiters.last,
            allowed: true,
            bracket_after: false,
        });
    }

    fn open_bracket(&mut self) {
        let start = self.scanner.position();
        self.scanner.next();
        let bracket_node = self.make_text("[", start, self.scanner.position());
        self.append(bracket_node);
        self.push_bracket(Bracket {
            marker_node: None,
            marker_position: None,
            bracket_node,
            bracket_position: start,
            content_position: self.scanner.position(),
            previous_delimiter: self.delimiters.last,
            allowed: true,
            bracket_after: false,
        });
    }

    fn push_bracket(&mut self, bracket: Bracket) {
        if let Some(last) = self.brackets.last_mut() {
            last.bracket_after = true;
        }
        self.brackets.push(bracket);
    }

    // ── Delimiter runs ───────────────────────────────────────────────

    fn scan_delimiters(&mut self, processor: Arc<dyn DelimiterProcessor>, c: char) -> bool {
        let before = self.scanner.peek_previous();
        let start = self.scanner.position();
        let count = self.scanner.match_multiple(c);
        if count < processor.min_length() {
            self.scanner.set_position(start);
            return false;
        }
        let after = self.scanner.peek();

        // One text node per delimiter character, so pairings can consume
        // parts of a run
        self.scanner.set_position(start);
        let mut text_nodes = Vec::with_capacity(count);
        for _ in 0..count {
            let char_start = self.scanner.position();
            self.scanner.next();
            let node = self.make_text(c.to_string(), char_start, self.scanner.position());
            self.append(node);
            text_nodes.push(node);
        }

        let before_is_punctuation = before == END || is_punctuation(before);
        let before_is_whitespace = before == END || before.is_whitespace();
        let after_is_punctuation = after == END || is_punctuation(after);
        let after_is_whitespace = after == END || after.is_whitespace();

        let left_flanking = !after_is_whitespace
            && (!after_is_punctuation || before_is_whitespace || before_is_punctuation);
        let right_flanking = !before_is_whitespace
            && (!before_is_punctuation || after_is_whitespace || after_is_punctuation);

        let (can_open, can_close) = if c == '_' {
            // Underscore has the additional intraword restriction
            (
                left_flanking && (!right_flanking || before_is_punctuation),
                right_flanking && (!left_flanking || after_is_punctuation),
            )
        } else {
            (
                left_flanking && c == processor.opening_character(),
                right_flanking && c == processor.closing_character(),
            )
        };

        self.delimiters.push(Delimiter {
            text_nodes,
            delimiter_char: c,
            original_length: count,
            can_open,
            can_close,
            previous: None,
            next: None,
        });
        true
    }

    // ── Brackets and links ───────────────────────────────────────────

    fn close_bracket(&mut self) {
        let before_close = self.scanner.position();
        self.scanner.next();
        let after_close = self.scanner.position();

        let Some(opener) = self.brackets.last().cloned() else {
            let node = self.make_text("]", before_close, after_close);
            self.append(node);
            return;
        };
        if !opener.allowed {
            self.brackets.pop();
            let node = self.make_text("]", before_close, after_close);
            self.append(node);
            return;
        }

        let info = self.parse_link_info(&opener, before_close, after_close);
        let result = match info {
            None => LinkResult::None,
            Some(info) => {
                let mut context = LinkContext {
                    tree: &mut *self.tree,
                    definitions: self.definitions,
                };
                let mut result = LinkResult::None;
                for processor in &self.config.link_processors {
                    match processor.process(&info, &mut self.scanner, &mut context) {
                        LinkResult::None => continue,
                        other => {
                            result = other;
                            break;
                        }
                    }
                }
                result
            }
        };

        match result {
            LinkResult::WrapTextIn {
                kind,
                position,
                include_marker,
            } => self.wrap_bracket(&opener, kind, position, include_marker),
            LinkResult::ReplaceWith { node, position } => {
                self.replace_bracket(&opener, node, position)
            }
            LinkResult::None => {
                // Not a link after all; the brackets stay as literal text
                self.brackets.pop();
                self.scanner.set_position(after_close);
                let node = self.make_text("]", before_close, after_close);
                self.append(node);
            }
        }
    }

    fn parse_link_info(
        &mut self,
        opener: &Bracket,
        before_close: Position,
        after_close: Position,
    ) -> Option<LinkInfo> {
        let text = self
            .scanner
            .get_source(opener.content_position, before_close)
            .content();

        // Inline link like `[text](/dest "title")`?
        if self.scanner.peek() == '('
            && let Some((destination, title)) = self.parse_inline_destination_title()
        {
            return Some(LinkInfo {
                marker: opener.marker_node,
                opener: opener.bracket_node,
                text,
                label: None,
                destination: Some(destination),
                title,
                after_text_bracket: after_close,
            });
        }
        self.scanner.set_position(after_close);

        // Full/collapsed reference like `[text][label]` / `[text][]`, or a
        // shortcut like `[text]`. Note that `[text](` can still be a valid
        // shortcut reference when the inline parse above fails.
        let label = self.parse_link_label();
        if label.is_none() {
            self.scanner.set_position(after_close);
        }
        let text_is_reference = label.as_deref().is_none_or(|l| l.is_empty());
        if opener.bracket_after && text_is_reference && opener.marker_node.is_none() {
            // The text would be the reference, but it contains brackets, so a
            // lookup can never succeed
            return None;
        }
        Some(LinkInfo {
            marker: opener.marker_node,
            opener: opener.bracket_node,
            text,
            label,
            destination: None,
            title: None,
            after_text_bracket: after_close,
        })
    }

    /// `(dest "title")` after the closing bracket; scanner is at `(`.
    fn parse_inline_destination_title(&mut self) -> Option<(String, Option<String>)> {
        self.scanner.next();
        self.scanner.whitespace();
        let destination_start = self.scanner.position();
        if !link_scanner::scan_link_destination(&mut self.scanner) {
            return None;
        }
        let raw = self
            .scanner
            .get_source(destination_start, self.scanner.position())
            .content();
        let destination = if raw.starts_with('<') {
            unescape_string(&raw[1..raw.len() - 1])
        } else {
            unescape_string(&raw)
        };

        let whitespace = self.scanner.whitespace();
        let title = if whitespace >= 1 && matches!(self.scanner.peek(), '"' | '\'' | '(') {
            let title_start = self.scanner.position();
            if !link_scanner::scan_link_title(&mut self.scanner) {
                return None;
            }
            let raw_title = self
                .scanner
                .get_source(title_start, self.scanner.position())
                .content();
            self.scanner.whitespace();
            Some(unescape_string(&raw_title[1..raw_title.len() - 1]))
        } else {
            None
        };
        if !self.scanner.next_ch(')') {
            return None;
        }
        Some((destination, title))
    }

    /// `[label]` after the closing bracket; scanner is right after `]`.
    fn parse_link_label(&mut self) -> Option<String> {
        if !self.scanner.next_ch('[') {
            return None;
        }
        let start = self.scanner.position();
        if !link_scanner::scan_link_label_content(&mut self.scanner) {
            return None;
        }
        let end = self.scanner.position();
        if !self.scanner.next_ch(']') {
            return None;
        }
        let content = self.scanner.get_source(start, end).content();
        if content.chars().count() > 999 {
            return None;
        }
        Some(content)
    }

    fn wrap_bracket(
        &mut self,
        opener: &Bracket,
        kind: NodeKind,
        position: Position,
        include_marker: bool,
    ) {
        let wrapper = self.tree.create(kind);
        // Everything parsed since the bracket becomes the wrapper's content
        let mut moved = Vec::new();
        let mut n = self.tree.next_sibling(opener.bracket_node);
        while let Some(id) = n {
            moved.push(id);
            n = self.tree.next_sibling(id);
        }
        for id in moved {
            self.tree.unlink(id);
            self.tree.append_child(wrapper, id);
        }

        if self.include_spans {
            let from = if include_marker {
                opener.marker_position.unwrap_or(opener.bracket_position)
            } else {
                opener.bracket_position
            };
            for span in self.scanner.get_source(from, position).source_spans() {
                self.tree.add_span(wrapper, span);
            }
        }

        // Emphasis inside the link text, scoped to this bracket
        self.process_delimiters(opener.previous_delimiter);

        if include_marker && let Some(marker) = opener.marker_node {
            self.tree.unlink(marker);
        }
        self.tree.unlink(opener.bracket_node);
        self.brackets.pop();
        self.append(wrapper);

        // Links cannot contain links: poison every pending plain bracket
        if opener.marker_node.is_none() {
            for bracket in &mut self.brackets {
                if bracket.marker_node.is_none() {
                    bracket.allowed = false;
                }
            }
        }
        self.scanner.set_position(position);
    }

    fn replace_bracket(&mut self, opener: &Bracket, node: NodeId, position: Position) {
        // Delimiters opened inside the bracket go away with the text
        while self.delimiters.last.is_some() && self.delimiters.last != opener.previous_delimiter {
            let last = self.delimiters.last.unwrap();
            self.delimiters.remove(last);
        }
        let first = opener.marker_node.unwrap_or(opener.bracket_node);
        let mut n = Some(first);
        while let Some(id) = n {
            n = self.tree.next_sibling(id);
            self.tree.unlink(id);
        }
        self.brackets.pop();
        self.append(node);
        self.scanner.set_position(position);
    }

    // ── Delimiter resolution ─────────────────────────────────────────

    fn process_delimiters(&mut self, stack_bottom: Option<usize>) {
        // Per delimiter char, the position below which no opener can exist
        let mut openers_bottom: HashMap<char, Option<usize>> = HashMap::new();

        let mut closer_opt = match stack_bottom {
            Some(bottom) => self.delimiters.arena[bottom].next,
            None => self.delimiters.first,
        };
        while let Some(closer_idx) = closer_opt {
            let delimiter_char = self.delimiters.arena[closer_idx].delimiter_char;
            let processor = self.config.delimiter_processors.get(&delimiter_char).cloned();
            let Some(processor) = processor else {
                closer_opt = self.delimiters.arena[closer_idx].next;
                continue;
            };
            if !self.delimiters.arena[closer_idx].can_close {
                closer_opt = self.delimiters.arena[closer_idx].next;
                continue;
            }

            let opening_char = processor.opening_character();
            let char_bottom = openers_bottom
                .get(&delimiter_char)
                .copied()
                .unwrap_or(stack_bottom);
            let mut found = None;
            let mut potential_opener_found = false;
            let mut opener_opt = self.delimiters.arena[closer_idx].previous;
            while let Some(opener_idx) = opener_opt {
                if Some(opener_idx) == stack_bottom || Some(opener_idx) == char_bottom {
                    break;
                }
                let opener = &self.delimiters.arena[opener_idx];
                if opener.can_open && opener.delimiter_char == opening_char {
                    potential_opener_found = true;
                    let closing_run = self.delimiters.arena[closer_idx].run();
                    let opening_run = self.delimiters.arena[opener_idx].run();
                    if let DelimiterUse::Wrap { consume, kind } =
                        processor.process(&opening_run, &closing_run)
                        && consume > 0
                    {
                        found = Some((opener_idx, consume, kind));
                        break;
                    }
                }
                opener_opt = self.delimiters.arena[opener_idx].previous;
            }

            let Some((opener_idx, consume, kind)) = found else {
                if !potential_opener_found {
                    // Remember how deep we searched; nothing below can ever
                    // open for this character
                    openers_bottom
                        .insert(delimiter_char, self.delimiters.arena[closer_idx].previous);
                    if !self.delimiters.arena[closer_idx].can_open {
                        let next = self.delimiters.arena[closer_idx].next;
                        self.delimiters.remove(closer_idx);
                        closer_opt = next;
                        continue;
                    }
                }
                closer_opt = self.delimiters.arena[closer_idx].next;
                continue;
            };

            self.pair(opener_idx, closer_idx, consume, kind);

            if self.delimiters.arena[opener_idx].text_nodes.is_empty() {
                self.delimiters.remove(opener_idx);
            }
            if self.delimiters.arena[closer_idx].text_nodes.is_empty() {
                let next = self.delimiters.arena[closer_idx].next;
                self.delimiters.remove(closer_idx);
                closer_opt = next;
            }
            // Otherwise stay on this closer; it may pair again
        }

        // Remaining delimiters didn't match; their characters stay as text
        loop {
            let last = self.delimiters.last;
            if last.is_none() || last == stack_bottom {
                break;
            }
            self.delimiters.remove(last.unwrap());
        }
    }

    /// Wrap the content between two paired delimiter runs, consuming
    /// `consume` characters from each.
    fn pair(&mut self, opener_idx: usize, closer_idx: usize, consume: usize, kind: NodeKind) {
        let consume = consume
            .min(self.delimiters.arena[opener_idx].text_nodes.len())
            .min(self.delimiters.arena[closer_idx].text_nodes.len());
        let opener_last = *self.delimiters.arena[opener_idx].text_nodes.last().unwrap();
        let closer_first = *self.delimiters.arena[closer_idx].text_nodes.first().unwrap();

        let mut content = Vec::new();
        let mut n = self.tree.next_sibling(opener_last);
        while let Some(id) = n {
            if id == closer_first {
                break;
            }
            content.push(id);
            n = self.tree.next_sibling(id);
        }

        let wrapper = self.tree.create(kind);
        self.tree.insert_after(opener_last, wrapper);
        for id in content {
            self.tree.unlink(id);
            self.tree.append_child(wrapper, id);
        }

        let opener_nodes = &mut self.delimiters.arena[opener_idx].text_nodes;
        let from = opener_nodes.len() - consume;
        let removed_opener: Vec<NodeId> = opener_nodes.drain(from..).collect();
        let closer_nodes = &mut self.delimiters.arena[closer_idx].text_nodes;
        let removed_closer: Vec<NodeId> = closer_nodes.drain(..consume).collect();

        if self.include_spans {
            let mut spans = SourceSpans::new();
            for id in &removed_opener {
                spans.add_all(self.tree.spans(*id).iter().copied());
            }
            let children: Vec<NodeId> = self.tree.children(wrapper).collect();
            for child in children {
                spans.add_all(self.tree.spans(child).iter().copied());
            }
            for id in &removed_closer {
                spans.add_all(self.tree.spans(*id).iter().copied());
            }
            self.tree.set_spans(wrapper, spans.into_vec());
        }

        for id in removed_opener {
            self.tree.unlink(id);
        }
        for id in removed_closer {
            self.tree.unlink(id);
        }

        // Delimiters between the opener and closer can't match anymore
        let mut between = self.delimiters.arena[opener_idx].next;
        while let Some(idx) = between {
            if idx == closer_idx {
                break;
            }
            let next = self.delimiters.arena[idx].next;
            self.delimiters.remove(idx);
            between = next;
        }
    }

    /// Join adjacent text nodes (and their spans) throughout the subtree.
    fn merge_text_nodes(&mut self, node: NodeId) {
        let mut child_opt = self.tree.first_child(node);
        while let Some(child) = child_opt {
            let mut next_opt = self.tree.next_sibling(child);
            if matches!(self.tree.kind(child), NodeKind::Text { .. }) {
                while let Some(next) = next_opt {
                    let NodeKind::Text { literal } = self.tree.kind(next) else {
                        break;
                    };
                    let addition = literal.clone();
                    let spans = self.tree.spans(next).to_vec();
                    self.tree.unlink(next);
                    if let NodeKind::Text { literal } = self.tree.kind_mut(child) {
                        literal.push_str(&addition);
                    }
                    for span in spans {
                        self.tree.add_span(child, span);
                    }
                    next_opt = self.tree.next_sibling(child);
                }
            } else {
                self.merge_text_nodes(child);
            }
            child_opt = next_opt;
        }
    }
}

/// Unicode punctuation for the flanking rules: ASCII punctuation plus the
/// common non-ASCII punctuation and symbol ranges.
fn is_punctuation(c: char) -> bool {
    if c.is_ascii_punctuation() {
        return true;
    }
    let code = c as u32;
    matches!(code,
        // Latin-1 Supplement punctuation and symbols
        0x00A1..=0x00BF | 0x00D7 | 0x00F7 |
        // General and Supplemental Punctuation
        0x2000..=0x206F | 0x2E00..=0x2E7F |
        // Currency symbols
        0x20A0..=0x20CF |
        // Arrows, mathematical operators, technical
        0x2190..=0x21FF | 0x2200..=0x22FF | 0x2300..=0x23FF |
        // Geometric shapes, miscellaneous symbols, dingbats
        0x2500..=0x25FF | 0x2600..=0x26FF | 0x2700..=0x27BF |
        // Miscellaneous mathematical symbols and arrows
        0x27C0..=0x27EF | 0x27F0..=0x27FF | 0x2900..=0x297F | 0x2980..=0x29FF |
        0x2B00..=0x2BFF
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_punctuation_classification() {
        assert!(is_punctuation('*'));
        assert!(is_punctuation('¿'));
        assert!(is_punctuation('€'));
        assert!(is_punctuation('→'));
        assert!(!is_punctuation('a'));
        assert!(!is_punctuation('素'));
    }

    #[test]
    fn test_staggered_processor_dispatch() {
        struct Fixed(usize);
        impl DelimiterProcessor for Fixed {
            fn opening_character(&self) -> char {
                '~'
            }
            fn closing_character(&self) -> char {
                '~'
            }
            fn min_length(&self) -> usize {
                self.0
            }
            fn process(&self, _: &DelimiterRun, _: &DelimiterRun) -> DelimiterUse {
                DelimiterUse::Wrap {
                    consume: self.0,
                    kind: NodeKind::Emphasis,
                }
            }
        }
        let mut staggered = StaggeredDelimiterProcessor::new('~');
        staggered.add(Arc::new(Fixed(1)));
        staggered.add(Arc::new(Fixed(2)));
        assert_eq!(staggered.min_length(), 1);
        assert_eq!(staggered.find_processor(2).min_length(), 2);
        assert_eq!(staggered.find_processor(1).min_length(), 1);
    }

    #[test]
    #[should_panic(expected = "minimum length")]
    fn test_staggered_processor_conflict_panics() {
        let mut staggered = StaggeredDelimiterProcessor::new('~');
        staggered.add(Arc::new(EmphasisDelimiterProcessor::new('~')));
        staggered.add(Arc::new(EmphasisDelimiterProcessor::new('~')));
    }
}
