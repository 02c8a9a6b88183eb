/// Source positions for AST nodes
use serde::{Deserialize, Serialize};

/// A contiguous piece of the input that a node was parsed from.
///
/// Line and column indexes are 0-based. `input_index` is the absolute byte
/// offset into the original input, `length` the number of bytes covered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceSpan {
    pub line_index: usize,
    pub column_index: usize,
    pub input_index: usize,
    pub length: usize,
}

impl SourceSpan {
    pub fn of(line_index: usize, column_index: usize, input_index: usize, length: usize) -> Self {
        SourceSpan {
            line_index,
            column_index,
            input_index,
            length,
        }
    }

    /// A sub-span covering `begin..end` (relative byte offsets within this span).
    pub fn sub_span(&self, begin: usize, end: usize) -> SourceSpan {
        let end = end.min(self.length);
        let begin = begin.min(end);
        SourceSpan {
            line_index: self.line_index,
            column_index: self.column_index + begin,
            input_index: self.input_index + begin,
            length: end - begin,
        }
    }

    /// Whether `other` starts exactly where this span ends, on the same line.
    pub fn is_adjacent_to(&self, other: &SourceSpan) -> bool {
        self.line_index == other.line_index && self.input_index + self.length == other.input_index
    }
}

/// How much source position information the parser records on nodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum IncludeSourceSpans {
    /// No spans are recorded.
    #[default]
    None,
    /// Spans are recorded on block nodes only.
    Blocks,
    /// Spans are recorded on blocks and inlines.
    BlocksAndInlines,
}

/// Accumulates spans for one node, merging adjacent spans as they are added.
#[derive(Debug, Clone, Default)]
pub struct SourceSpans {
    spans: Vec<SourceSpan>,
}

impl SourceSpans {
    pub fn new() -> Self {
        SourceSpans::default()
    }

    pub fn add(&mut self, span: SourceSpan) {
        if span.length == 0 {
            return;
        }
        if let Some(last) = self.spans.last_mut()
            && last.is_adjacent_to(&span)
        {
            last.length += span.length;
            return;
        }
        self.spans.push(span);
    }

    pub fn add_all(&mut self, spans: impl IntoIterator<Item = SourceSpan>) {
        for span in spans {
            self.add(span);
        }
    }

    pub fn into_vec(self) -> Vec<SourceSpan> {
        self.spans
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_adjacent_spans_merge() {
        let mut spans = SourceSpans::new();
        spans.add(SourceSpan::of(0, 0, 0, 3));
        spans.add(SourceSpan::of(0, 3, 3, 2));
        assert_eq!(spans.into_vec(), vec![SourceSpan::of(0, 0, 0, 5)]);
    }

    #[test]
    fn test_spans_on_different_lines_do_not_merge() {
        let mut spans = SourceSpans::new();
        spans.add(SourceSpan::of(0, 0, 0, 3));
        spans.add(SourceSpan::of(1, 0, 4, 3));
        assert_eq!(spans.into_vec().len(), 2);
    }

    #[test]
    fn test_empty_spans_are_dropped() {
        let mut spans = SourceSpans::new();
        spans.add(SourceSpan::of(0, 0, 0, 0));
        assert!(spans.into_vec().is_empty());
    }

    #[test]
    fn test_sub_span() {
        let span = SourceSpan::of(2, 4, 20, 10);
        assert_eq!(span.sub_span(2, 5), SourceSpan::of(2, 6, 22, 3));
        // End is clamped to the span length
        assert_eq!(span.sub_span(8, 100), SourceSpan::of(2, 12, 28, 2));
    }
}
