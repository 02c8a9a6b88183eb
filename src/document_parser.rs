/// The block-structure engine: drives the open-block stack once per input line
use crate::block_parsers::{
    BlockContext, BlockContinue, BlockParser, BlockStart, DocumentBlockParser,
    MatchedBlockParser, ParagraphParser, ParserState,
};
use crate::definitions::Definitions;
use crate::inline_parser::InlineParser;
use crate::parser::ParserConfig;
use crate::scanner::{SourceLine, SourceLines};
use crate::span::{IncludeSourceSpans, SourceSpan};
use crate::tree::{NodeId, NodeKind, Tree};

struct OpenBlockParser {
    parser: Box<dyn BlockParser>,
    /// Index into the current line where this block's content starts.
    source_index: usize,
}

pub(crate) struct DocumentParser<'a> {
    config: &'a ParserConfig,
    tree: Tree,
    definitions: Definitions,
    open_block_parsers: Vec<OpenBlockParser>,
    /// Blocks whose raw content still needs the inline pass, collected as
    /// they close. Inline parsing must not start before the whole tree is
    /// closed: reference definitions may appear after their uses.
    inline_jobs: Vec<(NodeId, SourceLines)>,
    line: SourceLine,
    line_index: usize,
    index: usize,
    column: usize,
    /// True when `column` stopped inside a partially consumed tab.
    column_is_in_tab: bool,
    next_non_space: usize,
    next_non_space_column: usize,
    indent: usize,
    blank: bool,
}

/// Parse a whole input string into a block tree with inline content.
pub(crate) fn parse_document(config: &ParserConfig, input: &str) -> Tree {
    let mut parser = DocumentParser::new(config);
    if !input.is_empty() {
        let mut index = 0;
        loop {
            let rest = &input[index..];
            match rest.find(['\n', '\r']) {
                Some(pos) => {
                    parser.parse_line(&rest[..pos], index);
                    let bytes = rest.as_bytes();
                    let mut next = index + pos + 1;
                    if bytes[pos] == b'\r' && bytes.get(pos + 1) == Some(&b'\n') {
                        next += 1;
                    }
                    index = next;
                    if index >= input.len() {
                        break;
                    }
                }
                None => {
                    parser.parse_line(rest, index);
                    break;
                }
            }
        }
    }
    parser.finish()
}

impl<'a> DocumentParser<'a> {
    fn new(config: &'a ParserConfig) -> Self {
        let tree = Tree::new();
        let document = DocumentBlockParser::new(&tree);
        DocumentParser {
            config,
            tree,
            definitions: Definitions::new(),
            open_block_parsers: vec![OpenBlockParser {
                parser: Box::new(document),
                source_index: 0,
            }],
            inline_jobs: Vec::new(),
            line: SourceLine::of("", None),
            line_index: 0,
            index: 0,
            column: 0,
            column_is_in_tab: false,
            next_non_space: 0,
            next_non_space_column: 0,
            indent: 0,
            blank: false,
        }
    }

    fn parse_line(&mut self, text: &str, input_index: usize) {
        self.set_line(text, input_index);

        // Continuation pass: walk the open blocks outside-in (the document
        // root always matches) until one no longer continues.
        let mut matches = 1;
        let open_count = self.open_block_parsers.len();
        let mut i = 1;
        while i < open_count {
            self.find_next_non_space();
            // The block's span on this line starts at its own marker
            self.open_block_parsers[i].source_index = self.index;
            let result = self.try_continue(i);
            match result {
                None => break,
                Some(BlockContinue::Finished) => {
                    self.add_source_spans();
                    self.close_block_parsers(self.open_block_parsers.len() - i);
                    self.line_index += 1;
                    return;
                }
                Some(BlockContinue::AtIndex(new_index)) => self.set_new_index(new_index),
                Some(BlockContinue::AtColumn(new_column)) => self.set_new_column(new_column),
            }
            matches += 1;
            i += 1;
        }

        let mut unmatched = self.open_block_parsers.len() - matches;
        let mut matched_index = matches - 1;
        let mut started_new_block = false;
        let mut try_block_starts = {
            let parser = &self.open_block_parsers[matched_index].parser;
            matches!(self.tree.kind(parser.node()), NodeKind::Paragraph) || parser.is_container()
        };

        // New-block pass: keep asking the factories whether a block starts
        // here, descending into each new container.
        while try_block_starts {
            self.find_next_non_space();
            // Plain content lines can't start any core block; skip the
            // factories for them
            if self.blank
                || (self.indent < 4
                    && self.line.content()[self.next_non_space..]
                        .chars()
                        .next()
                        .is_some_and(|c| c.is_alphabetic()))
            {
                self.set_new_index(self.next_non_space);
                break;
            }
            let Some(block_start) = self.find_block_start(matched_index) else {
                self.set_new_index(self.next_non_space);
                break;
            };
            started_new_block = true;
            let source_index = self.index;

            // Close blocks the continuation pass left behind before attaching
            // anything new
            if unmatched > 0 {
                self.close_block_parsers(unmatched);
                unmatched = 0;
            }
            if let Some(new_index) = block_start.new_index {
                self.set_new_index(new_index);
            } else if let Some(new_column) = block_start.new_column {
                self.set_new_column(new_column);
            }
            if block_start.replace_paragraph_lines > 0 {
                self.replace_paragraph_lines(block_start.replace_paragraph_lines);
            }
            try_block_starts = false;
            for parser in block_start.parsers {
                let is_container = parser.is_container();
                self.add_child(parser, source_index);
                try_block_starts = is_container;
            }
            matched_index = self.open_block_parsers.len() - 1;
        }

        // Content pass: the rest of the line is text (or nothing).
        let active = self.open_block_parsers.last().unwrap();
        if !started_new_block && !self.blank && active.parser.can_have_lazy_continuation_lines() {
            // Lazy continuation: the line joins the open paragraph even
            // though its containers did not match
            self.add_source_spans();
            self.add_line();
        } else {
            if unmatched > 0 {
                self.close_block_parsers(unmatched);
            }
            if !self.open_block_parsers.last().unwrap().parser.is_container() {
                self.add_source_spans();
                self.add_line();
            } else if !self.blank {
                let paragraph = Box::new(ParagraphParser::new(&mut self.tree));
                self.add_child(paragraph, self.index);
                self.add_source_spans();
                self.add_line();
            } else {
                self.add_source_spans();
            }
        }
        self.line_index += 1;
    }

    fn finish(mut self) -> Tree {
        self.close_block_parsers(self.open_block_parsers.len());

        let DocumentParser {
            config,
            mut tree,
            definitions,
            inline_jobs,
            ..
        } = self;
        let inline_parser = InlineParser::new(
            &config.inline,
            &definitions,
            config.include_source_spans == IncludeSourceSpans::BlocksAndInlines,
        );
        for (node, content) in &inline_jobs {
            inline_parser.parse(&mut tree, *node, content);
        }
        tree
    }

    fn set_line(&mut self, text: &str, input_index: usize) {
        let content = if text.contains('\0') {
            text.replace('\0', "\u{FFFD}")
        } else {
            text.to_string()
        };
        let span = if self.config.include_source_spans != IncludeSourceSpans::None
            && !content.is_empty()
        {
            Some(SourceSpan::of(self.line_index, 0, input_index, content.len()))
        } else {
            None
        };
        self.line = SourceLine::of(content, span);
        self.index = 0;
        self.column = 0;
        self.column_is_in_tab = false;
    }

    fn active_block_flags(&self) -> (bool, bool) {
        let node = self.open_block_parsers.last().unwrap().parser.node();
        match self.tree.kind(node) {
            NodeKind::Paragraph => (true, false),
            NodeKind::ListItem => (false, true),
            _ => (false, false),
        }
    }

    fn try_continue(&mut self, i: usize) -> Option<BlockContinue> {
        let (active_is_paragraph, active_is_list_item) = self.active_block_flags();
        let Self {
            ref line,
            ref tree,
            ref mut open_block_parsers,
            line_index,
            index,
            column,
            next_non_space,
            next_non_space_column,
            indent,
            blank,
            ..
        } = *self;
        let state = ParserState {
            line,
            line_index,
            index,
            column,
            next_non_space,
            next_non_space_column,
            indent,
            blank,
            active_is_paragraph,
            active_is_list_item,
        };
        open_block_parsers[i].parser.try_continue(&state, tree)
    }

    fn find_block_start(&mut self, matched_index: usize) -> Option<BlockStart> {
        let (active_is_paragraph, active_is_list_item) = self.active_block_flags();
        let Self {
            config,
            ref mut tree,
            ref line,
            ref open_block_parsers,
            line_index,
            index,
            column,
            next_non_space,
            next_non_space_column,
            indent,
            blank,
            ..
        } = *self;
        let state = ParserState {
            line,
            line_index,
            index,
            column,
            next_non_space,
            next_non_space_column,
            indent,
            blank,
            active_is_paragraph,
            active_is_list_item,
        };
        let matched = MatchedBlockParser::new(open_block_parsers[matched_index].parser.as_ref());
        for factory in &config.block_parser_factories {
            if let Some(start) = factory.try_start(&state, &matched, tree) {
                return Some(start);
            }
        }
        None
    }

    /// Attach a new block, closing open blocks that cannot contain it.
    fn add_child(&mut self, parser: Box<dyn BlockParser>, source_index: usize) {
        let kind = self.tree.kind(parser.node()).clone();
        loop {
            let fits = {
                let Self {
                    ref mut tree,
                    ref mut open_block_parsers,
                    ..
                } = *self;
                open_block_parsers
                    .last_mut()
                    .unwrap()
                    .parser
                    .can_contain(tree, &kind)
            };
            if fits {
                break;
            }
            self.close_block_parsers(1);
        }
        let parent = self.open_block_parsers.last().unwrap().parser.node();
        self.tree.append_child(parent, parser.node());
        self.open_block_parsers.push(OpenBlockParser {
            parser,
            source_index,
        });
    }

    /// A new block claimed buffered lines of the active paragraph; close the
    /// paragraph with whatever it has left.
    fn replace_paragraph_lines(&mut self, count: usize) {
        let active = self.open_block_parsers.last().unwrap();
        if !matches!(self.tree.kind(active.parser.node()), NodeKind::Paragraph) {
            return;
        }
        let mut open = self.open_block_parsers.pop().unwrap();
        open.parser.remove_paragraph_lines(count);
        self.finalize_parser(open.parser);
    }

    fn close_block_parsers(&mut self, count: usize) {
        for _ in 0..count {
            let open = self.open_block_parsers.pop().unwrap();
            self.finalize_parser(open.parser);
        }
    }

    fn finalize_parser(&mut self, mut parser: Box<dyn BlockParser>) {
        let node = parser.node();
        let mut cx = BlockContext {
            tree: &mut self.tree,
            definitions: &mut self.definitions,
        };
        if let Some(content) = parser.close_block(&mut cx) {
            self.inline_jobs.push((node, content));
        }
    }

    /// Hand the rest of the line to the innermost open block.
    fn add_line(&mut self) {
        let content_line = if self.column_is_in_tab {
            // The parse position is inside a tab; expand its remaining
            // columns to spaces
            let after_tab = self.index + 1;
            let rest = &self.line.content()[after_tab..];
            let spaces = 4 - (self.column % 4);
            let mut buffer = " ".repeat(spaces);
            buffer.push_str(rest);
            let span = self
                .line
                .span()
                .map(|s| s.sub_span(self.index, s.length));
            SourceLine::of(buffer, span)
        } else if self.index == 0 {
            self.line.clone()
        } else {
            self.line
                .substring(self.index, self.line.content().len())
        };
        self.open_block_parsers
            .last_mut()
            .unwrap()
            .parser
            .add_line(content_line);
    }

    /// Record this line on every open block's span list.
    fn add_source_spans(&mut self) {
        if self.config.include_source_spans == IncludeSourceSpans::None {
            return;
        }
        let Some(line_span) = self.line.span() else {
            return;
        };
        for i in 1..self.open_block_parsers.len() {
            // A lazy continuation line can start before where the block
            // expects its content
            let block_index = self.open_block_parsers[i].source_index.min(self.index);
            if self.line.content().len() > block_index {
                let node = self.open_block_parsers[i].parser.node();
                let span = line_span.sub_span(block_index, line_span.length);
                self.tree.add_span(node, span);
            }
        }
    }

    fn find_next_non_space(&mut self) {
        let bytes = self.line.content().as_bytes();
        let mut i = self.index;
        let mut cols = self.column;
        self.blank = true;
        while i < bytes.len() {
            match bytes[i] {
                b' ' => {
                    i += 1;
                    cols += 1;
                }
                b'\t' => {
                    i += 1;
                    cols += 4 - (cols % 4);
                }
                _ => {
                    self.blank = false;
                    break;
                }
            }
        }
        self.next_non_space = i;
        self.next_non_space_column = cols;
        self.indent = self.next_non_space_column - self.column;
    }

    fn advance(&mut self) {
        let c = self.line.content()[self.index..].chars().next().unwrap();
        self.index += c.len_utf8();
        if c == '\t' {
            self.column += 4 - (self.column % 4);
        } else {
            self.column += 1;
        }
    }

    fn set_new_index(&mut self, new_index: usize) {
        if new_index >= self.next_non_space {
            // We can start from the first non-space position
            self.index = self.next_non_space;
            self.column = self.next_non_space_column;
        }
        let length = self.line.content().len();
        while self.index < new_index && self.index != length {
            self.advance();
        }
        self.column_is_in_tab = false;
    }

    fn set_new_column(&mut self, new_column: usize) {
        if new_column >= self.next_non_space_column {
            self.index = self.next_non_space;
            self.column = self.next_non_space_column;
        }
        let length = self.line.content().len();
        while self.column < new_column && self.index != length {
            self.advance();
        }
        if self.column > new_column {
            // Advancing over a tab went past the target column; the tab is
            // now partially consumed
            self.index -= 1;
            self.column = new_column;
            self.column_is_in_tab = true;
        } else {
            self.column_is_in_tab = false;
        }
    }
}
