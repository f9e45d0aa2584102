//! Lexical query sanitizer and parser.
//!
//! Raw user text is turned into a safe, escaped expression for the full-text
//! index, plus a detected match mode:
//!
//! - `"quick fox"` -> exact phrase
//! - `qui*` -> prefix
//! - `quick brown fox` -> fuzzy (all terms must match)
//!
//! [`parse`] is a pure function of its inputs; nothing here touches the
//! store, the cache, or the model.

use serde::{Deserialize, Serialize};

/// Maximum accepted query length, in characters.
pub const MAX_QUERY_LEN: usize = 1_000;

/// Characters with meaning to the index engine, backslash-escaped in every
/// mode after the mode-specific transform.
const RESERVED: &[char] = &['"', '\'', '(', ')', '[', ']', '*', '\\'];

/// Characters that count as query operators for strategy analysis.
const OPERATORS: &[char] = &['"', '\'', '(', ')', '+', '-', '*'];

/// How the sanitized expression should be matched by the index engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MatchMode {
    /// Single literal phrase
    Exact,
    /// Word-prefix match on the final term
    Prefix,
    /// Term-AND: every term must match
    Fuzzy,
}

/// A sanitized query, produced fresh per call and never persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedQuery {
    /// The text as the caller supplied it
    pub original: String,
    /// Escaped expression safe to hand to the index engine
    pub sanitized: String,
    /// Detected or hinted match mode
    pub mode: MatchMode,
    /// Whether the query survived sanitization
    pub valid: bool,
    /// Why the query was rejected, when `valid` is false
    pub reason: Option<String>,
    /// Whether the original text contained operator characters
    pub has_operators: bool,
}

impl ParsedQuery {
    fn invalid(original: &str, has_operators: bool, reason: impl Into<String>) -> Self {
        Self {
            original: original.to_string(),
            sanitized: String::new(),
            mode: MatchMode::Fuzzy,
            valid: false,
            reason: Some(reason.into()),
            has_operators,
        }
    }
}

/// Parses raw query text into a [`ParsedQuery`].
///
/// When `hint` is given it overrides mode detection; the mode-specific
/// transform still applies. Invalid input (empty, over-long, or nothing left
/// after stripping reserved characters) yields `valid == false` with a
/// reason rather than an error, so callers can surface the diagnostic.
pub fn parse(text: &str, hint: Option<MatchMode>) -> ParsedQuery {
    let trimmed = text.trim();
    let has_operators = trimmed.chars().any(|c| OPERATORS.contains(&c));

    if trimmed.is_empty() {
        return ParsedQuery::invalid(text, has_operators, "query is empty");
    }
    if text.chars().count() > MAX_QUERY_LEN {
        return ParsedQuery::invalid(
            text,
            has_operators,
            format!("query exceeds {} characters", MAX_QUERY_LEN),
        );
    }

    let mode = hint.unwrap_or_else(|| detect_mode(trimmed));
    let sanitized = match mode {
        MatchMode::Exact => sanitize_exact(trimmed),
        MatchMode::Prefix => sanitize_prefix(trimmed),
        MatchMode::Fuzzy => sanitize_fuzzy(trimmed),
    };

    match sanitized {
        Ok(sanitized) => ParsedQuery {
            original: text.to_string(),
            sanitized,
            mode,
            valid: true,
            reason: None,
            has_operators,
        },
        Err(reason) => ParsedQuery::invalid(text, has_operators, reason),
    }
}

fn detect_mode(text: &str) -> MatchMode {
    if is_quote_wrapped(text) {
        MatchMode::Exact
    } else if text.ends_with('*') {
        MatchMode::Prefix
    } else {
        MatchMode::Fuzzy
    }
}

fn is_quote_wrapped(text: &str) -> bool {
    let mut chars = text.chars();
    match (chars.next(), chars.next_back()) {
        (Some(first), Some(last)) => (first == '"' && last == '"') || (first == '\'' && last == '\''),
        _ => false,
    }
}

/// Backslash-escapes every reserved character.
fn escape_reserved(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        if RESERVED.contains(&c) {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

/// Removes every reserved character; used to decide whether anything
/// searchable survives.
fn strip_reserved(text: &str) -> String {
    text.chars().filter(|c| !RESERVED.contains(c)).collect()
}

fn sanitize_exact(text: &str) -> Result<String, String> {
    let inner: String = if is_quote_wrapped(text) {
        let mut chars = text.chars();
        chars.next();
        chars.next_back();
        chars.collect()
    } else {
        text.to_string()
    };

    if strip_reserved(&inner).trim().is_empty() {
        return Err("query contains only reserved characters".to_string());
    }

    // Embedded quotes are doubled so the index engine sees one literal
    // phrase, then the standard escape applies to the doubled content.
    let doubled = inner.replace('"', "\"\"");
    Ok(format!("\"{}\"", escape_reserved(&doubled)))
}

fn sanitize_prefix(text: &str) -> Result<String, String> {
    let stem = text.trim_end_matches('*').trim_end();
    if strip_reserved(stem).trim().is_empty() {
        return Err("query contains only reserved characters".to_string());
    }
    Ok(format!("{}*", escape_reserved(stem)))
}

fn sanitize_fuzzy(text: &str) -> Result<String, String> {
    let terms: Vec<String> = text
        .split_whitespace()
        .filter(|term| !strip_reserved(term).is_empty())
        .map(escape_reserved)
        .collect();

    if terms.is_empty() {
        return Err("query contains only reserved characters".to_string());
    }
    // Whitespace between terms is an implicit AND for the index engine.
    Ok(terms.join(" "))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exact_mode_detected() {
        let parsed = parse("\"quick fox\"", None);
        assert!(parsed.valid);
        assert_eq!(parsed.mode, MatchMode::Exact);
        assert_eq!(parsed.sanitized, "\"quick fox\"");
    }

    #[test]
    fn test_single_quotes_detect_exact() {
        let parsed = parse("'quick fox'", None);
        assert!(parsed.valid);
        assert_eq!(parsed.mode, MatchMode::Exact);
        assert_eq!(parsed.sanitized, "\"quick fox\"");
    }

    #[test]
    fn test_prefix_mode_detected() {
        let parsed = parse("term*", None);
        assert!(parsed.valid);
        assert_eq!(parsed.mode, MatchMode::Prefix);
        assert_eq!(parsed.sanitized, "term*");
    }

    #[test]
    fn test_multiple_trailing_wildcards_collapse() {
        let parsed = parse("term***", None);
        assert!(parsed.valid);
        assert_eq!(parsed.sanitized, "term*");
    }

    #[test]
    fn test_fuzzy_mode_detected() {
        let parsed = parse("a b c", None);
        assert!(parsed.valid);
        assert_eq!(parsed.mode, MatchMode::Fuzzy);
        assert_eq!(parsed.sanitized, "a b c");
    }

    #[test]
    fn test_empty_query_invalid() {
        let parsed = parse("", None);
        assert!(!parsed.valid);
        assert!(parsed.reason.is_some());
    }

    #[test]
    fn test_whitespace_only_invalid() {
        let parsed = parse("   \t  ", None);
        assert!(!parsed.valid);
    }

    #[test]
    fn test_only_reserved_characters_invalid() {
        let parsed = parse(" * * ", None);
        assert!(!parsed.valid);
        assert!(parsed
            .reason
            .as_deref()
            .unwrap()
            .contains("reserved characters"));
    }

    #[test]
    fn test_over_long_query_invalid() {
        let long = "a".repeat(MAX_QUERY_LEN + 1);
        let parsed = parse(&long, None);
        assert!(!parsed.valid);
    }

    #[test]
    fn test_embedded_quotes_doubled_and_escaped() {
        let parsed = parse("\"he said \"hi\"\"", None);
        assert!(parsed.valid);
        assert_eq!(parsed.mode, MatchMode::Exact);
        // Inner quotes are doubled, then each quote is backslash-escaped.
        assert_eq!(parsed.sanitized, "\"he said \\\"\\\"hi\\\"\\\"\"");
    }

    #[test]
    fn test_fuzzy_drops_empty_terms_keeps_rest() {
        let parsed = parse("foo ** bar", None);
        assert!(parsed.valid);
        assert_eq!(parsed.mode, MatchMode::Fuzzy);
        assert_eq!(parsed.sanitized, "foo bar");
    }

    #[test]
    fn test_fuzzy_escapes_reserved_in_terms() {
        let parsed = parse("foo(bar baz", None);
        assert!(parsed.valid);
        assert_eq!(parsed.sanitized, "foo\\(bar baz");
    }

    #[test]
    fn test_hint_overrides_detection() {
        let parsed = parse("quick fox", Some(MatchMode::Exact));
        assert!(parsed.valid);
        assert_eq!(parsed.mode, MatchMode::Exact);
        assert_eq!(parsed.sanitized, "\"quick fox\"");
    }

    #[test]
    fn test_operator_presence_flag() {
        assert!(parse("\"phrase\"", None).has_operators);
        assert!(parse("a + b", None).has_operators);
        assert!(parse("wild*", None).has_operators);
        assert!(!parse("plain words", None).has_operators);
    }

    #[test]
    fn test_parse_is_pure() {
        let a = parse("same input", None);
        let b = parse("same input", None);
        assert_eq!(a, b);
    }

    #[test]
    fn test_backslash_is_escaped() {
        let parsed = parse("path\\to", None);
        assert!(parsed.valid);
        assert_eq!(parsed.sanitized, "path\\\\to");
    }
}
