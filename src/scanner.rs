/// Position-addressable cursor over the logical lines of the input
use crate::span::SourceSpan;

/// Character returned by [`Scanner::peek`] when there is nothing left to read.
/// NUL never occurs in scanned text (it is replaced with U+FFFD on input).
pub const END: char = '\0';

/// One logical line of input, without its line terminator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceLine {
    content: String,
    span: Option<SourceSpan>,
}

impl SourceLine {
    pub fn of(content: impl Into<String>, span: Option<SourceSpan>) -> Self {
        SourceLine {
            content: content.into(),
            span,
        }
    }

    pub fn content(&self) -> &str {
        &self.content
    }

    pub fn span(&self) -> Option<SourceSpan> {
        self.span
    }

    /// The part of this line covering byte range `begin..end`.
    pub fn substring(&self, begin: usize, end: usize) -> SourceLine {
        SourceLine {
            content: self.content[begin..end].to_string(),
            span: self
                .span
                .map(|s| s.sub_span(begin, end))
                .filter(|s| s.length > 0),
        }
    }
}

/// A sequence of [`SourceLine`]s, e.g. the raw content of one block.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SourceLines {
    lines: Vec<SourceLine>,
}

impl SourceLines {
    pub fn empty() -> Self {
        SourceLines::default()
    }

    pub fn of(lines: Vec<SourceLine>) -> Self {
        SourceLines { lines }
    }

    pub fn add_line(&mut self, line: SourceLine) {
        self.lines.push(line);
    }

    pub fn lines(&self) -> &[SourceLine] {
        &self.lines
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    /// The text of all lines, joined with `\n` (the scanner's synthetic
    /// line separator).
    pub fn content(&self) -> String {
        let mut out = String::new();
        for (i, line) in self.lines.iter().enumerate() {
            if i > 0 {
                out.push('\n');
            }
            out.push_str(&line.content);
        }
        out
    }

    pub fn source_spans(&self) -> Vec<SourceSpan> {
        self.lines.iter().filter_map(|l| l.span).collect()
    }
}

/// An opaque snapshot of a scanner position, cheap to take and restore.
///
/// Only meaningful for the scanner that produced it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Position {
    pub(crate) line_index: usize,
    pub(crate) index: usize,
}

/// A cursor over [`SourceLines`].
///
/// Between two lines the scanner reads a synthetic `'\n'`; past the last line
/// it reads [`END`]. All backtracking is done by taking a [`Position`]
/// snapshot up front and restoring it on failure; the lines are never
/// concatenated into a single buffer.
pub struct Scanner<'a> {
    lines: &'a [SourceLine],
    line_index: usize,
    index: usize,
}

impl<'a> Scanner<'a> {
    pub fn of(lines: &'a SourceLines) -> Scanner<'a> {
        Scanner {
            lines: lines.lines(),
            line_index: 0,
            index: 0,
        }
    }

    fn line(&self) -> &str {
        self.lines
            .get(self.line_index)
            .map(|l| l.content.as_str())
            .unwrap_or("")
    }

    pub fn has_next(&self) -> bool {
        self.peek() != END
    }

    /// The character at the cursor, without consuming it.
    pub fn peek(&self) -> char {
        let line = self.line();
        if let Some(c) = line[self.index.min(line.len())..].chars().next() {
            return c;
        }
        if self.line_index + 1 < self.lines.len() {
            '\n'
        } else {
            END
        }
    }

    /// The character just before the cursor, or [`END`] at the very start.
    pub fn peek_previous(&self) -> char {
        if self.index > 0 {
            // Always a char boundary: the cursor only moves in whole chars.
            return self.line()[..self.index].chars().next_back().unwrap_or(END);
        }
        if self.line_index > 0 { '\n' } else { END }
    }

    /// Advance by one character (or over a line boundary).
    pub fn next(&mut self) {
        let line_len = self.line().len();
        if self.index < line_len {
            let c = self.line()[self.index..].chars().next().unwrap();
            self.index += c.len_utf8();
        } else if self.line_index + 1 < self.lines.len() {
            self.line_index += 1;
            self.index = 0;
        }
    }

    /// Consume `c` if it is the next character.
    pub fn next_ch(&mut self, c: char) -> bool {
        if self.peek() == c {
            self.next();
            true
        } else {
            false
        }
    }

    /// Consume `s` if the current line continues with it (must not contain a
    /// line terminator).
    pub fn next_str(&mut self, s: &str) -> bool {
        let line = self.line();
        if self.index <= line.len() && line[self.index..].starts_with(s) {
            self.index += s.len();
            true
        } else {
            false
        }
    }

    /// Consume a run of `c`, returning its length.
    pub fn match_multiple(&mut self, c: char) -> usize {
        let mut count = 0;
        while self.peek() == c {
            count += 1;
            self.next();
        }
        count
    }

    /// Consume characters matching `pred`, returning how many were consumed.
    pub fn match_while(&mut self, pred: impl Fn(char) -> bool) -> usize {
        let mut count = 0;
        loop {
            let c = self.peek();
            if c == END || !pred(c) {
                break;
            }
            count += 1;
            self.next();
        }
        count
    }

    /// Advance until the next character matches `pred`. Returns the number of
    /// characters skipped, or `None` if the end was reached first (leaving the
    /// scanner at the end).
    pub fn find(&mut self, pred: impl Fn(char) -> bool) -> Option<usize> {
        let mut count = 0;
        loop {
            let c = self.peek();
            if c == END {
                return None;
            }
            if pred(c) {
                return Some(count);
            }
            count += 1;
            self.next();
        }
    }

    /// Consume ASCII whitespace (space, tab, line endings, form/vertical
    /// feed), returning how many characters were consumed.
    pub fn whitespace(&mut self) -> usize {
        self.match_while(|c| matches!(c, ' ' | '\t' | '\n' | '\r' | '\x0B' | '\x0C'))
    }

    pub fn position(&self) -> Position {
        Position {
            line_index: self.line_index,
            index: self.index,
        }
    }

    pub fn set_position(&mut self, position: Position) {
        self.line_index = position.line_index;
        self.index = position.index;
    }

    /// The exact text (and spans) between two previously-taken positions.
    pub fn get_source(&self, begin: Position, end: Position) -> SourceLines {
        let mut result = SourceLines::empty();
        if begin.line_index == end.line_index {
            let line = &self.lines[begin.line_index];
            result.add_line(line.substring(begin.index, end.index));
            return result;
        }
        let first = &self.lines[begin.line_index];
        result.add_line(first.substring(begin.index, first.content.len()));
        for line_index in begin.line_index + 1..end.line_index {
            let line = &self.lines[line_index];
            result.add_line(line.substring(0, line.content.len()));
        }
        let last = &self.lines[end.line_index];
        result.add_line(last.substring(0, end.index));
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lines(texts: &[&str]) -> SourceLines {
        SourceLines::of(texts.iter().map(|t| SourceLine::of(*t, None)).collect())
    }

    #[test]
    fn test_peek_and_next_across_lines() {
        let source = lines(&["ab", "c"]);
        let mut scanner = Scanner::of(&source);
        assert_eq!(scanner.peek(), 'a');
        scanner.next();
        assert_eq!(scanner.peek(), 'b');
        scanner.next();
        assert_eq!(scanner.peek(), '\n');
        scanner.next();
        assert_eq!(scanner.peek(), 'c');
        assert_eq!(scanner.peek_previous(), '\n');
        scanner.next();
        assert_eq!(scanner.peek(), END);
        assert!(!scanner.has_next());
    }

    #[test]
    fn test_position_snapshot_restores_exactly() {
        let source = lines(&["foo", "bar"]);
        let mut scanner = Scanner::of(&source);
        scanner.next();
        let saved = scanner.position();
        scanner.match_multiple('o');
        scanner.next();
        scanner.next();
        assert_eq!(scanner.peek(), 'a');
        scanner.set_position(saved);
        assert_eq!(scanner.peek(), 'o');
    }

    #[test]
    fn test_match_multiple_and_find() {
        let source = lines(&["***x"]);
        let mut scanner = Scanner::of(&source);
        assert_eq!(scanner.match_multiple('*'), 3);
        assert_eq!(scanner.peek(), 'x');

        let source = lines(&["abc]"]);
        let mut scanner = Scanner::of(&source);
        assert_eq!(scanner.find(|c| c == ']'), Some(3));
        assert_eq!(scanner.peek(), ']');

        let source = lines(&["abc"]);
        let mut scanner = Scanner::of(&source);
        assert_eq!(scanner.find(|c| c == ']'), None);
        assert!(!scanner.has_next());
    }

    #[test]
    fn test_next_str_does_not_cross_lines() {
        let source = lines(&["ab", "ab"]);
        let mut scanner = Scanner::of(&source);
        assert!(scanner.next_str("ab"));
        assert!(!scanner.next_str("ab"));
        assert_eq!(scanner.peek(), '\n');
    }

    #[test]
    fn test_get_source_multiline() {
        let source = SourceLines::of(vec![
            SourceLine::of("abcd", Some(SourceSpan::of(0, 0, 0, 4))),
            SourceLine::of("ef", Some(SourceSpan::of(1, 0, 5, 2))),
        ]);
        let mut scanner = Scanner::of(&source);
        scanner.next();
        scanner.next();
        let begin = scanner.position();
        while scanner.has_next() {
            scanner.next();
        }
        let end = scanner.position();
        let extracted = scanner.get_source(begin, end);
        assert_eq!(extracted.content(), "cd\nef");
        assert_eq!(
            extracted.source_spans(),
            vec![SourceSpan::of(0, 2, 2, 2), SourceSpan::of(1, 0, 5, 2)]
        );
    }

    #[test]
    fn test_whitespace() {
        let source = lines(&["  \tx"]);
        let mut scanner = Scanner::of(&source);
        assert_eq!(scanner.whitespace(), 3);
        assert_eq!(scanner.peek(), 'x');
    }

    #[test]
    fn test_unicode_peek() {
        let source = lines(&["á→b"]);
        let mut scanner = Scanner::of(&source);
        assert_eq!(scanner.peek(), 'á');
        scanner.next();
        assert_eq!(scanner.peek(), '→');
        assert_eq!(scanner.peek_previous(), 'á');
        scanner.next();
        assert_eq!(scanner.peek(), 'b');
    }
}
