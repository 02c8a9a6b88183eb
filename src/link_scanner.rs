/// Scanners for the pieces of link syntax shared between reference
/// definitions and inline links
use crate::scanner::{END, Scanner};

/// Scan a link destination. Either the `<...>` form (no line endings or
/// unescaped `<`/`>` inside) or a run of non-space characters with balanced
/// parentheses. Leaves the scanner after the destination on success.
pub(crate) fn scan_link_destination(scanner: &mut Scanner) -> bool {
    if scanner.next_ch('<') {
        loop {
            match scanner.peek() {
                END | '\n' | '<' => return false,
                '>' => {
                    scanner.next();
                    return true;
                }
                '\\' => {
                    scanner.next();
                    if scanner.peek().is_ascii_punctuation() {
                        scanner.next();
                    }
                }
                _ => scanner.next(),
            }
        }
    }
    scan_destination_with_balanced_parens(scanner)
}

fn scan_destination_with_balanced_parens(scanner: &mut Scanner) -> bool {
    let mut parens = 0;
    let mut empty = true;
    loop {
        let c = scanner.peek();
        match c {
            END => return true,
            ' ' => return !empty,
            '\\' => {
                scanner.next();
                if scanner.peek().is_ascii_punctuation() {
                    scanner.next();
                }
            }
            '(' => {
                parens += 1;
                // Limit nesting to avoid quadratic behavior on pathological input
                if parens > 32 {
                    return false;
                }
                scanner.next();
            }
            ')' => {
                if parens == 0 {
                    return true;
                }
                parens -= 1;
                scanner.next();
            }
            c if c.is_control() => return !empty,
            _ => scanner.next(),
        }
        empty = false;
    }
}

/// Scan a complete link title including its delimiters (`"..."`, `'...'` or
/// `(...)`). Leaves the scanner after the closing delimiter on success.
pub(crate) fn scan_link_title(scanner: &mut Scanner) -> bool {
    let end_delimiter = match scanner.peek() {
        '"' => '"',
        '\'' => '\'',
        '(' => ')',
        _ => return false,
    };
    scanner.next();
    if !scan_link_title_content(scanner, end_delimiter) {
        return false;
    }
    scanner.next();
    true
}

/// Scan up to (but not including) the closing title delimiter.
pub(crate) fn scan_link_title_content(scanner: &mut Scanner, end_delimiter: char) -> bool {
    loop {
        let c = scanner.peek();
        if c == END {
            return false;
        }
        if c == end_delimiter {
            return true;
        }
        if c == '(' && end_delimiter == ')' {
            // Unescaped nested parens are not allowed in `(...)` titles
            return false;
        }
        scanner.next();
        if c == '\\' && scanner.peek().is_ascii_punctuation() {
            scanner.next();
        }
    }
}

/// Scan the content of a link label (between `[` and `]`). Unescaped `[` is
/// not allowed. Leaves the scanner at the `]` (or the end) on success.
pub(crate) fn scan_link_label_content(scanner: &mut Scanner) -> bool {
    loop {
        match scanner.peek() {
            END => return true,
            ']' => return true,
            '[' => return false,
            '\\' => {
                scanner.next();
                if scanner.peek().is_ascii_punctuation() {
                    scanner.next();
                }
            }
            _ => scanner.next(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scanner::{SourceLine, SourceLines};

    fn scan(text: &str, f: impl Fn(&mut Scanner) -> bool) -> (bool, String) {
        let lines = SourceLines::of(vec![SourceLine::of(text, None)]);
        let mut scanner = Scanner::of(&lines);
        let start = scanner.position();
        let ok = f(&mut scanner);
        let consumed = scanner.get_source(start, scanner.position()).content();
        (ok, consumed)
    }

    #[test]
    fn test_angle_destination() {
        assert_eq!(
            scan("<my url> rest", scan_link_destination),
            (true, "<my url>".to_string())
        );
        assert_eq!(scan("<unclosed", scan_link_destination).0, false);
        assert_eq!(scan("<a<b>", scan_link_destination).0, false);
    }

    #[test]
    fn test_plain_destination_balances_parens() {
        assert_eq!(
            scan("/url(a(b))x) rest", scan_link_destination),
            (true, "/url(a(b))x".to_string())
        );
        assert_eq!(
            scan("/url rest", scan_link_destination),
            (true, "/url".to_string())
        );
    }

    #[test]
    fn test_title_forms() {
        assert_eq!(
            scan("\"a \\\" b\" x", scan_link_title),
            (true, "\"a \\\" b\"".to_string())
        );
        assert_eq!(
            scan("(title)", scan_link_title),
            (true, "(title)".to_string())
        );
        assert_eq!(scan("(a(b))", scan_link_title).0, false);
        assert_eq!(scan("\"unclosed", scan_link_title).0, false);
    }

    #[test]
    fn test_label_content_rejects_nested_open_bracket() {
        assert_eq!(scan("a[b]", scan_link_label_content).0, false);
        assert_eq!(
            scan("a\\[b]", scan_link_label_content),
            (true, "a\\[b".to_string())
        );
    }
}
