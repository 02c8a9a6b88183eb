/// Built-in inline content parsers (backslash escapes, code spans, entity
/// references, autolinks, raw inline HTML) and the escaping helpers shared
/// with the block phase
use crate::scanner::{END, Position, Scanner};
use crate::tree::{NodeId, NodeKind, Tree};

/// Working state the inline engine exposes to content parsers.
pub struct InlineParserState<'s, 'l> {
    pub scanner: &'s mut Scanner<'l>,
    pub tree: &'s mut Tree,
    pub include_spans: bool,
}

impl InlineParserState<'_, '_> {
    /// Create a node covering `from` up to the current scanner position.
    pub fn node(&mut self, kind: NodeKind, from: Position) -> NodeId {
        let id = self.tree.create(kind);
        if self.include_spans {
            let source = self.scanner.get_source(from, self.scanner.position());
            for span in source.source_spans() {
                self.tree.add_span(id, span);
            }
        }
        id
    }

    pub fn text(&mut self, literal: impl Into<String>, from: Position) -> NodeId {
        self.node(
            NodeKind::Text {
                literal: literal.into(),
            },
            from,
        )
    }
}

/// A successfully parsed inline: the node to append and the position to
/// continue scanning from.
pub struct ParsedInline {
    pub node: NodeId,
    pub position: Position,
}

/// Parses one kind of inline content at a trigger character. The scanner is
/// positioned at the trigger; on `None` the engine restores the position and
/// tries the next parser.
pub trait InlineContentParser {
    fn try_parse(&mut self, state: &mut InlineParserState) -> Option<ParsedInline>;
}

/// Creates inline content parsers for a parse run, keyed by the characters
/// that trigger them. Custom factories run before built-in ones.
pub trait InlineContentParserFactory: Send + Sync {
    fn trigger_characters(&self) -> Vec<char>;
    fn create(&self) -> Box<dyn InlineContentParser>;
}

// ── Backslash escapes ────────────────────────────────────────────────

pub(crate) struct BackslashInlineParser;

impl InlineContentParser for BackslashInlineParser {
    fn try_parse(&mut self, state: &mut InlineParserState) -> Option<ParsedInline> {
        let from = state.scanner.position();
        state.scanner.next();
        let c = state.scanner.peek();
        let node = if c == '\n' {
            state.scanner.next();
            state.node(NodeKind::HardBreak, from)
        } else if c.is_ascii_punctuation() {
            state.scanner.next();
            state.text(c.to_string(), from)
        } else {
            state.text("\\", from)
        };
        Some(ParsedInline {
            node,
            position: state.scanner.position(),
        })
    }
}

pub(crate) struct BackslashInlineParserFactory;

impl InlineContentParserFactory for BackslashInlineParserFactory {
    fn trigger_characters(&self) -> Vec<char> {
        vec!['\\']
    }

    fn create(&self) -> Box<dyn InlineContentParser> {
        Box::new(BackslashInlineParser)
    }
}

// ── Backtick code spans ──────────────────────────────────────────────

pub(crate) struct BackticksInlineParser;

impl InlineContentParser for BackticksInlineParser {
    fn try_parse(&mut self, state: &mut InlineParserState) -> Option<ParsedInline> {
        let from = state.scanner.position();
        let opening = state.scanner.match_multiple('`');
        let after_opening = state.scanner.position();

        while state.scanner.find(|c| c == '`').is_some() {
            let before_closing = state.scanner.position();
            let count = state.scanner.match_multiple('`');
            if count == opening {
                let mut content = state
                    .scanner
                    .get_source(after_opening, before_closing)
                    .content();
                // Line endings become spaces inside code spans
                content = content.replace('\n', " ");
                // Strip one space from each side if both are present and the
                // content is not all spaces
                if content.len() >= 2
                    && content.starts_with(' ')
                    && content.ends_with(' ')
                    && content.chars().any(|c| c != ' ')
                {
                    content = content[1..content.len() - 1].to_string();
                }
                let node = state.node(NodeKind::Code { literal: content }, from);
                return Some(ParsedInline {
                    node,
                    position: state.scanner.position(),
                });
            }
        }

        // No matching closer; the opening backticks are literal text
        state.scanner.set_position(after_opening);
        let node = state.text("`".repeat(opening), from);
        Some(ParsedInline {
            node,
            position: after_opening,
        })
    }
}

pub(crate) struct BackticksInlineParserFactory;

impl InlineContentParserFactory for BackticksInlineParserFactory {
    fn trigger_characters(&self) -> Vec<char> {
        vec!['`']
    }

    fn create(&self) -> Box<dyn InlineContentParser> {
        Box::new(BackticksInlineParser)
    }
}

// ── Entity and numeric character references ──────────────────────────

pub(crate) struct EntityInlineParser;

impl InlineContentParser for EntityInlineParser {
    fn try_parse(&mut self, state: &mut InlineParserState) -> Option<ParsedInline> {
        let from = state.scanner.position();
        let scanner = &mut *state.scanner;
        scanner.next();
        let decoded = if scanner.next_ch('#') {
            if scanner.next_ch('x') || scanner.next_ch('X') {
                let mut digits = 0;
                let mut value: u32 = 0;
                while digits < 6 && scanner.peek().is_ascii_hexdigit() {
                    value = value * 16 + scanner.peek().to_digit(16).unwrap();
                    scanner.next();
                    digits += 1;
                }
                if digits == 0 || !scanner.next_ch(';') {
                    return None;
                }
                decode_code_point(value).to_string()
            } else {
                let mut digits = 0;
                let mut value: u32 = 0;
                while digits < 7 && scanner.peek().is_ascii_digit() {
                    value = value * 10 + scanner.peek().to_digit(10).unwrap();
                    scanner.next();
                    digits += 1;
                }
                if digits == 0 || !scanner.next_ch(';') {
                    return None;
                }
                decode_code_point(value).to_string()
            }
        } else {
            let mut name = String::new();
            while scanner.peek().is_ascii_alphanumeric() {
                name.push(scanner.peek());
                scanner.next();
            }
            if name.is_empty() || !scanner.next_ch(';') {
                return None;
            }
            decode_named_entity(&name)?.to_string()
        };
        let node = state.text(decoded, from);
        Some(ParsedInline {
            node,
            position: state.scanner.position(),
        })
    }
}

pub(crate) struct EntityInlineParserFactory;

impl InlineContentParserFactory for EntityInlineParserFactory {
    fn trigger_characters(&self) -> Vec<char> {
        vec!['&']
    }

    fn create(&self) -> Box<dyn InlineContentParser> {
        Box::new(EntityInlineParser)
    }
}

fn decode_code_point(code_point: u32) -> char {
    if code_point == 0 {
        return '\u{FFFD}';
    }
    char::from_u32(code_point).unwrap_or('\u{FFFD}')
}

/// HTML5 named entities. A subset; the full table lives outside the parser.
fn decode_named_entity(name: &str) -> Option<&'static str> {
    let decoded = match name {
        "nbsp" => "\u{00A0}",
        "amp" => "&",
        "lt" => "<",
        "gt" => ">",
        "quot" => "\"",
        "apos" => "'",
        "copy" => "©",
        "reg" => "®",
        "AElig" => "Æ",
        "Dcaron" => "Ď",
        "frac34" => "¾",
        "HilbertSpace" => "ℋ",
        "DifferentialD" => "ⅆ",
        "ClockwiseContourIntegral" => "∲",
        "ngE" => "≧̸",
        "ouml" => "ö",
        _ => return None,
    };
    Some(decoded)
}

/// Resolve backslash escapes and entity references in a raw string (used for
/// link destinations, titles and info strings).
pub(crate) fn unescape_string(s: &str) -> String {
    if !s.contains(['\\', '&']) {
        return s.to_string();
    }
    let chars: Vec<char> = s.chars().collect();
    let mut out = String::with_capacity(s.len());
    let mut i = 0;
    while i < chars.len() {
        match chars[i] {
            '\\' if i + 1 < chars.len() && chars[i + 1].is_ascii_punctuation() => {
                out.push(chars[i + 1]);
                i += 2;
            }
            '&' => {
                if let Some((decoded, consumed)) = parse_entity(&chars[i..]) {
                    out.push_str(&decoded);
                    i += consumed;
                } else {
                    out.push('&');
                    i += 1;
                }
            }
            c => {
                out.push(c);
                i += 1;
            }
        }
    }
    out
}

/// Parse an entity reference at the start of `chars` (which begins with `&`).
/// Returns the decoded text and the number of chars consumed.
fn parse_entity(chars: &[char]) -> Option<(String, usize)> {
    let mut i = 1;
    if chars.get(i) == Some(&'#') {
        i += 1;
        let (radix, max_digits) = if matches!(chars.get(i), Some('x') | Some('X')) {
            i += 1;
            (16, 6)
        } else {
            (10, 7)
        };
        let digit_start = i;
        let mut value: u32 = 0;
        while i - digit_start < max_digits
            && chars.get(i).is_some_and(|c| c.is_digit(radix))
        {
            value = value * radix + chars[i].to_digit(radix).unwrap();
            i += 1;
        }
        if i == digit_start || chars.get(i) != Some(&';') {
            return None;
        }
        return Some((decode_code_point(value).to_string(), i + 1));
    }
    let name_start = i;
    while chars.get(i).is_some_and(|c| c.is_ascii_alphanumeric()) {
        i += 1;
    }
    if i == name_start || chars.get(i) != Some(&';') {
        return None;
    }
    let name: String = chars[name_start..i].iter().collect();
    decode_named_entity(&name).map(|decoded| (decoded.to_string(), i + 1))
}

// ── Autolinks ────────────────────────────────────────────────────────

pub(crate) struct AutolinkInlineParser;

impl InlineContentParser for AutolinkInlineParser {
    fn try_parse(&mut self, state: &mut InlineParserState) -> Option<ParsedInline> {
        let from = state.scanner.position();
        state.scanner.next();
        let content_start = state.scanner.position();
        loop {
            match state.scanner.peek() {
                END | '\n' | '<' | ' ' | '\t' => return None,
                '>' => break,
                _ => state.scanner.next(),
            }
        }
        let content = state
            .scanner
            .get_source(content_start, state.scanner.position())
            .content();
        state.scanner.next();
        if content.is_empty() {
            return None;
        }

        let destination = if content.contains('@') && is_email_address(&content) {
            format!("mailto:{}", content)
        } else if is_absolute_uri(&content) {
            // Backslash escapes don't work in autolinks; a backslash is part
            // of the destination
            content.replace('\\', "%5C")
        } else {
            return None;
        };

        let link = state.node(
            NodeKind::Link {
                destination,
                title: None,
            },
            from,
        );
        let text = state.text(content, from);
        state.tree.append_child(link, text);
        Some(ParsedInline {
            node: link,
            position: state.scanner.position(),
        })
    }
}

pub(crate) struct AutolinkInlineParserFactory;

impl InlineContentParserFactory for AutolinkInlineParserFactory {
    fn trigger_characters(&self) -> Vec<char> {
        vec!['<']
    }

    fn create(&self) -> Box<dyn InlineContentParser> {
        Box::new(AutolinkInlineParser)
    }
}

/// scheme:path with a 2-32 character scheme starting with a letter
fn is_absolute_uri(text: &str) -> bool {
    let Some(colon_pos) = text.find(':') else {
        return false;
    };
    let scheme = &text[..colon_pos];
    if scheme.len() < 2 || scheme.len() > 32 {
        return false;
    }
    if !scheme.chars().next().is_some_and(|c| c.is_ascii_alphabetic()) {
        return false;
    }
    scheme
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '+' | '.' | '-'))
}

fn is_email_address(text: &str) -> bool {
    let Some(at_pos) = text.find('@') else {
        return false;
    };
    let local = &text[..at_pos];
    let domain = &text[at_pos + 1..];
    if local.is_empty() || domain.is_empty() {
        return false;
    }
    let local_ok = local.chars().all(|c| {
        c.is_ascii_alphanumeric()
            || matches!(
                c,
                '.' | '!'
                    | '#'
                    | '$'
                    | '%'
                    | '&'
                    | '\''
                    | '*'
                    | '+'
                    | '/'
                    | '='
                    | '?'
                    | '^'
                    | '_'
                    | '`'
                    | '{'
                    | '|'
                    | '}'
                    | '~'
                    | '-'
            )
    });
    if !local_ok {
        return false;
    }
    domain.split('.').all(|part| {
        !part.is_empty()
            && part.chars().all(|c| c.is_ascii_alphanumeric() || c == '-')
            && part.chars().next().is_some_and(|c| c.is_ascii_alphanumeric())
            && part.chars().last().is_some_and(|c| c.is_ascii_alphanumeric())
    })
}

// ── Raw inline HTML ──────────────────────────────────────────────────

pub(crate) struct HtmlInlineParser;

impl InlineContentParser for HtmlInlineParser {
    fn try_parse(&mut self, state: &mut InlineParserState) -> Option<ParsedInline> {
        let from = state.scanner.position();
        state.scanner.next();
        let ok = match state.scanner.peek() {
            '!' => scan_bang(state.scanner),
            '?' => scan_processing_instruction(state.scanner),
            '/' => scan_closing_tag(state.scanner),
            c if c.is_ascii_alphabetic() => scan_open_tag(state.scanner),
            _ => false,
        };
        if !ok {
            return None;
        }
        let literal = state
            .scanner
            .get_source(from, state.scanner.position())
            .content();
        let node = state.node(NodeKind::HtmlInline { literal }, from);
        Some(ParsedInline {
            node,
            position: state.scanner.position(),
        })
    }
}

pub(crate) struct HtmlInlineParserFactory;

impl InlineContentParserFactory for HtmlInlineParserFactory {
    fn trigger_characters(&self) -> Vec<char> {
        vec!['<']
    }

    fn create(&self) -> Box<dyn InlineContentParser> {
        Box::new(HtmlInlineParser)
    }
}

/// Comments, CDATA sections and declarations, after `<` at `!`.
fn scan_bang(scanner: &mut Scanner) -> bool {
    scanner.next();
    if scanner.next_str("--") {
        // Comment: cannot start with `>` or `->`, cannot end with `--->`
        if scanner.peek() == '>' {
            return false;
        }
        let start = scanner.position();
        if scanner.next_str("->") {
            return false;
        }
        scanner.set_position(start);
        let mut last = '\0';
        loop {
            let c = scanner.peek();
            if c == END || c == '\n' {
                return false;
            }
            if c == '-' {
                let save = scanner.position();
                if scanner.next_str("-->") {
                    return last != '-';
                }
                scanner.set_position(save);
            }
            last = c;
            scanner.next();
        }
    }
    if scanner.next_str("[CDATA[") {
        loop {
            match scanner.peek() {
                END | '\n' => return false,
                ']' if scanner.next_str("]]>") => return true,
                _ => scanner.next(),
            }
        }
    }
    // Declaration: an ASCII letter, then anything up to `>`
    if !scanner.peek().is_ascii_uppercase() {
        return false;
    }
    loop {
        match scanner.peek() {
            END | '\n' => return false,
            '>' => {
                scanner.next();
                return true;
            }
            _ => scanner.next(),
        }
    }
}

fn scan_processing_instruction(scanner: &mut Scanner) -> bool {
    scanner.next();
    loop {
        match scanner.peek() {
            END | '\n' => return false,
            '?' if scanner.next_str("?>") => return true,
            _ => scanner.next(),
        }
    }
}

pub(crate) fn scan_closing_tag(scanner: &mut Scanner) -> bool {
    scanner.next();
    if !scanner.peek().is_ascii_alphabetic() {
        return false;
    }
    scanner.next();
    scanner.match_while(|c| c.is_ascii_alphanumeric() || c == '-');
    scanner.match_while(|c| c == ' ' || c == '\t');
    scanner.next_ch('>')
}

/// Tag whitespace: spaces, tabs, and at most one line ending.
fn scan_tag_whitespace(scanner: &mut Scanner) -> bool {
    let mut newline_seen = false;
    loop {
        match scanner.peek() {
            ' ' | '\t' => scanner.next(),
            '\n' => {
                if newline_seen {
                    return false;
                }
                newline_seen = true;
                scanner.next();
            }
            _ => return true,
        }
    }
}

pub(crate) fn scan_open_tag(scanner: &mut Scanner) -> bool {
    scanner.next();
    scanner.match_while(|c| c.is_ascii_alphanumeric() || c == '-');
    loop {
        if !scan_tag_whitespace(scanner) {
            return false;
        }
        match scanner.peek() {
            '>' => {
                scanner.next();
                return true;
            }
            '/' => {
                return scanner.next_str("/>");
            }
            c if c.is_ascii_alphabetic() || c == '_' || c == ':' => {
                scanner.next();
                scanner.match_while(|c| {
                    c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | ':' | '-')
                });
            }
            _ => return false,
        }
        // Optional attribute value
        let before_equals = scanner.position();
        if !scan_tag_whitespace(scanner) {
            return false;
        }
        if !scanner.next_ch('=') {
            scanner.set_position(before_equals);
            continue;
        }
        if !scan_tag_whitespace(scanner) {
            return false;
        }
        match scanner.peek() {
            '"' => {
                scanner.next();
                loop {
                    match scanner.peek() {
                        END | '\n' => return false,
                        '"' => {
                            scanner.next();
                            break;
                        }
                        _ => scanner.next(),
                    }
                }
            }
            '\'' => {
                scanner.next();
                loop {
                    match scanner.peek() {
                        END | '\n' => return false,
                        '\'' => {
                            scanner.next();
                            break;
                        }
                        _ => scanner.next(),
                    }
                }
            }
            _ => {
                let consumed = scanner.match_while(|c| {
                    !matches!(c, ' ' | '\t' | '\n' | '"' | '\'' | '=' | '<' | '>' | '`')
                });
                if consumed == 0 {
                    return false;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unescape_string() {
        assert_eq!(unescape_string("a\\*b"), "a*b");
        assert_eq!(unescape_string("a\\b"), "a\\b");
        assert_eq!(unescape_string("x&amp;y"), "x&y");
        assert_eq!(unescape_string("&#65;"), "A");
        assert_eq!(unescape_string("&#x41;"), "A");
        assert_eq!(unescape_string("&#0;"), "\u{FFFD}");
        assert_eq!(unescape_string("&bogus;"), "&bogus;");
        assert_eq!(unescape_string("&#xZZ;"), "&#xZZ;");
    }

    #[test]
    fn test_uri_and_email_recognition() {
        assert!(is_absolute_uri("http://example.com"));
        assert!(is_absolute_uri("made-up.scheme:x"));
        assert!(!is_absolute_uri("h:x"));
        assert!(!is_absolute_uri("no-colon"));
        assert!(is_email_address("foo@bar.example.com"));
        assert!(!is_email_address("foo@"));
        assert!(!is_email_address("foo@-bar.com"));
    }
}
