//! Best-effort textual inspection of SQL statements.
//!
//! None of this is a parser. The view-name extraction in particular relies
//! on the statement being shaped like
//! `CREATE MATERIALIZED VIEW <name> [...] AS <query>` with the keywords
//! separated by whitespace. Keywords are matched case-insensitively; any
//! other shape yields `None` and the caller simply runs the SQL.

use super::splitter::strip_comments;

const CREATE_MATVIEW: [&str; 3] = ["CREATE", "MATERIALIZED", "VIEW"];

/// A view name as written in a `CREATE MATERIALIZED VIEW` statement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ViewName {
    pub schema: Option<String>,
    pub name: String,
}

impl ViewName {
    /// Parse `name`, `schema.name` or their double-quoted forms.
    pub fn parse(raw: &str) -> Option<Self> {
        let raw = raw.trim();
        if raw.is_empty() {
            return None;
        }
        let parts: Vec<String> = raw.split('.').map(unquote_identifier).collect();
        match parts.as_slice() {
            [name] if !name.is_empty() => Some(Self {
                schema: None,
                name: name.clone(),
            }),
            [schema, name] if !schema.is_empty() && !name.is_empty() => Some(Self {
                schema: Some(schema.clone()),
                name: name.clone(),
            }),
            _ => None,
        }
    }
}

impl std::fmt::Display for ViewName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.schema {
            Some(schema) => write!(f, "{}.{}", schema, self.name),
            None => f.write_str(&self.name),
        }
    }
}

fn unquote_identifier(part: &str) -> String {
    let part = part.trim();
    if part.len() >= 2 && part.starts_with('"') && part.ends_with('"') {
        part[1..part.len() - 1].replace("\"\"", "\"")
    } else {
        part.to_lowercase()
    }
}

fn tokens(sql: &str) -> Vec<String> {
    strip_comments(sql)
        .split_whitespace()
        .map(|t| t.to_string())
        .collect()
}

fn keyword_eq(token: &str, keyword: &str) -> bool {
    token.eq_ignore_ascii_case(keyword)
}

/// Whether the statement starts with `CREATE MATERIALIZED VIEW`.
pub fn is_create_materialized_view(statement: &str) -> bool {
    let toks = tokens(statement);
    toks.len() >= 3
        && CREATE_MATVIEW
            .iter()
            .zip(toks.iter())
            .all(|(kw, tok)| keyword_eq(tok, kw))
}

/// Extract the target of a `CREATE MATERIALIZED VIEW` statement: the text
/// between the keywords and the next whitespace-delimited `AS`.
///
/// An `IF NOT EXISTS` clause and a parenthesised column list are skipped.
pub fn extract_view_name(statement: &str) -> Option<ViewName> {
    if !is_create_materialized_view(statement) {
        return None;
    }
    let toks = tokens(statement);
    let mut rest: Vec<&str> = toks[3..]
        .iter()
        .take_while(|t| !keyword_eq(t, "AS"))
        .map(|t| t.as_str())
        .collect();

    if rest.len() >= 3
        && keyword_eq(rest[0], "IF")
        && keyword_eq(rest[1], "NOT")
        && keyword_eq(rest[2], "EXISTS")
    {
        rest.drain(..3);
    }

    let target: &str = rest.first()?;
    // `name(col_a, col_b)` or `name (col_a, ...)`
    let target = target.split('(').next().unwrap_or(target);
    ViewName::parse(target)
}

/// Whether any statement in `sql_body` creates a materialized view.
pub fn contains_view_creation(sql_body: &str) -> bool {
    super::split_statements(sql_body)
        .iter()
        .any(|s| is_create_materialized_view(s))
}

/// Whether `sql` mentions `identifier` as a whole word, case-insensitively.
///
/// `region_summary` does not match inside `region_summary_idx`.
pub fn references_identifier(sql: &str, identifier: &str) -> bool {
    if identifier.is_empty() {
        return false;
    }
    let haystack = sql.to_lowercase();
    let needle = identifier.to_lowercase();
    let is_ident = |c: char| c.is_alphanumeric() || c == '_';

    let mut from = 0;
    while let Some(pos) = haystack[from..].find(&needle) {
        let start = from + pos;
        let end = start + needle.len();
        let before_ok = haystack[..start].chars().next_back().is_none_or(|c| !is_ident(c));
        let after_ok = haystack[end..].chars().next().is_none_or(|c| !is_ident(c));
        if before_ok && after_ok {
            return true;
        }
        from = start + needle.len().max(1);
    }
    false
}

/// First keyword of a statement, uppercased, ignoring leading comments.
pub fn leading_keyword(statement: &str) -> Option<String> {
    tokens(statement)
        .into_iter()
        .next()
        .map(|t| t.trim_start_matches('(').to_ascii_uppercase())
}

/// Whether the statement only reads (`SELECT`, `WITH`, `TABLE`, `SHOW`).
///
/// A `WITH` that feeds an `INSERT`/`UPDATE`/`DELETE` is not read-only.
pub fn is_select_only(statement: &str) -> bool {
    match leading_keyword(statement).as_deref() {
        Some("SELECT") | Some("TABLE") | Some("SHOW") | Some("VALUES") => {
            !contains_keyword(statement, "INTO")
        }
        Some("WITH") => !["INSERT", "UPDATE", "DELETE", "MERGE"]
            .iter()
            .any(|kw| contains_keyword(statement, kw)),
        _ => false,
    }
}

/// Statements PostgreSQL refuses to run inside a transaction block.
pub fn requires_autocommit(statement: &str) -> bool {
    let toks = tokens(statement);
    let Some(first) = toks.first() else {
        return false;
    };
    if keyword_eq(first, "VACUUM") || (keyword_eq(first, "CREATE") && toks.iter().any(|t| keyword_eq(t, "DATABASE"))) {
        return true;
    }
    let concurrent = toks.iter().any(|t| keyword_eq(t, "CONCURRENTLY"));
    let index_op = toks.iter().take(4).any(|t| keyword_eq(t, "INDEX"));
    concurrent && (index_op || keyword_eq(first, "REINDEX"))
}

fn contains_keyword(statement: &str, keyword: &str) -> bool {
    tokens(statement).iter().any(|t| {
        t.trim_matches(|c: char| !c.is_alphanumeric() && c != '_')
            .eq_ignore_ascii_case(keyword)
    })
}
