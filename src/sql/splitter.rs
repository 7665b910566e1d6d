//! Statement splitting for multi-statement SQL blocks.
//!
//! A step body is a script such as
//!
//! ```sql
//! DROP MATERIALIZED VIEW IF EXISTS region_summary;
//! CREATE MATERIALIZED VIEW region_summary AS SELECT ...;
//! ```
//!
//! which has to be executed one statement at a time. Splitting is a single
//! character scan: `;` only terminates a statement outside of quoted
//! literals, comments and dollar-quoted bodies.

#[derive(Debug, Clone, PartialEq, Eq)]
enum ScanState {
    Normal,
    /// Inside a `'...'` or `"..."` literal, tracking the opening quote.
    Quoted { quote: char, escaped: bool },
    LineComment,
    BlockComment,
    /// Inside `$tag$ ... $tag$`; holds the full delimiter including `$`s.
    DollarQuoted(String),
}

/// Split `sql` into trimmed, non-empty statements in source order.
///
/// Unterminated quotes are tolerated: the rest of the input becomes part of
/// the last statement.
pub fn split_statements(sql: &str) -> Vec<String> {
    let chars: Vec<char> = sql.chars().collect();
    let mut statements = Vec::new();
    let mut current = String::new();
    let mut state = ScanState::Normal;
    let mut i = 0;

    while i < chars.len() {
        let ch = chars[i];
        let next = chars.get(i + 1).copied();

        match &mut state {
            ScanState::Normal => match ch {
                ';' => {
                    push_statement(&mut statements, &current);
                    current.clear();
                    i += 1;
                    continue;
                }
                '\'' | '"' => {
                    state = ScanState::Quoted {
                        quote: ch,
                        escaped: false,
                    };
                }
                '-' if next == Some('-') => {
                    current.push_str("--");
                    state = ScanState::LineComment;
                    i += 2;
                    continue;
                }
                '/' if next == Some('*') => {
                    current.push_str("/*");
                    state = ScanState::BlockComment;
                    i += 2;
                    continue;
                }
                '$' => {
                    if let Some(tag) = dollar_tag_at(&chars, i) {
                        current.push_str(&tag);
                        i += tag.chars().count();
                        state = ScanState::DollarQuoted(tag);
                        continue;
                    }
                }
                _ => {}
            },
            ScanState::Quoted { quote, escaped } => {
                if *escaped {
                    *escaped = false;
                } else if ch == '\\' {
                    *escaped = true;
                } else if ch == *quote {
                    state = ScanState::Normal;
                }
            }
            ScanState::LineComment => {
                if ch == '\n' {
                    state = ScanState::Normal;
                }
            }
            ScanState::BlockComment => {
                if ch == '*' && next == Some('/') {
                    current.push_str("*/");
                    state = ScanState::Normal;
                    i += 2;
                    continue;
                }
            }
            ScanState::DollarQuoted(tag) => {
                if ch == '$' && starts_with_at(&chars, i, tag) {
                    let len = tag.chars().count();
                    current.push_str(tag);
                    state = ScanState::Normal;
                    i += len;
                    continue;
                }
            }
        }

        current.push(ch);
        i += 1;
    }

    push_statement(&mut statements, &current);
    statements
}

/// Remove `--` and `/* */` comments outside of quoted literals.
///
/// Used to find the leading keyword of a statement and to drop
/// comment-only fragments.
pub fn strip_comments(sql: &str) -> String {
    let chars: Vec<char> = sql.chars().collect();
    let mut out = String::with_capacity(sql.len());
    let mut quote: Option<char> = None;
    let mut i = 0;

    while i < chars.len() {
        let ch = chars[i];
        let next = chars.get(i + 1).copied();
        match quote {
            Some(q) => {
                out.push(ch);
                if ch == q {
                    quote = None;
                }
                i += 1;
            }
            None if ch == '-' && next == Some('-') => {
                while i < chars.len() && chars[i] != '\n' {
                    i += 1;
                }
            }
            None if ch == '/' && next == Some('*') => {
                i += 2;
                while i < chars.len() && !(chars[i] == '*' && chars.get(i + 1) == Some(&'/')) {
                    i += 1;
                }
                i += 2;
                out.push(' ');
            }
            None => {
                if ch == '\'' || ch == '"' {
                    quote = Some(ch);
                }
                out.push(ch);
                i += 1;
            }
        }
    }

    out
}

fn push_statement(statements: &mut Vec<String>, buffer: &str) {
    let trimmed = buffer.trim();
    if trimmed.is_empty() || strip_comments(trimmed).trim().is_empty() {
        return;
    }
    statements.push(trimmed.to_string());
}

/// Return the `$tag$` delimiter starting at `start`, if there is one.
fn dollar_tag_at(chars: &[char], start: usize) -> Option<String> {
    // `$1` style parameters are not delimiters
    if chars
        .get(start + 1)
        .is_some_and(|c| c.is_ascii_digit())
    {
        return None;
    }
    let mut end = start + 1;
    while end < chars.len() && (chars[end].is_alphanumeric() || chars[end] == '_') {
        end += 1;
    }
    if chars.get(end) == Some(&'$') {
        Some(chars[start..=end].iter().collect())
    } else {
        None
    }
}

fn starts_with_at(chars: &[char], start: usize, needle: &str) -> bool {
    let mut idx = start;
    for n in needle.chars() {
        if chars.get(idx) != Some(&n) {
            return false;
        }
        idx += 1;
    }
    true
}
