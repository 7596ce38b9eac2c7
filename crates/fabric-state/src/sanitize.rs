//! Free-text query sanitization for FTS5 `MATCH`.
//!
//! Arbitrary agent text must never reach the FTS5 query language as-is:
//! punctuation such as `"`, `(`, `*`, `:` and bare words like `NOT` are
//! operators there. The sanitizer keeps only word characters, treats
//! everything else as a word boundary, and quotes each token so it can only
//! ever be a literal term.

/// Maximum number of tokens forwarded to the index.
pub const MAX_QUERY_TOKENS: usize = 20;

/// Split `raw` into lowercase word tokens, deduplicated in first-seen order.
pub fn query_tokens(raw: &str) -> Vec<String> {
    let mut tokens: Vec<String> = Vec::new();
    for word in raw.split(|c: char| !(c.is_alphanumeric() || c == '_')) {
        if word.is_empty() {
            continue;
        }
        let word = word.to_lowercase();
        if !tokens.contains(&word) {
            tokens.push(word);
            if tokens.len() == MAX_QUERY_TOKENS {
                break;
            }
        }
    }
    tokens
}

/// Build a safe FTS5 expression (`"a" OR "b"`), or `None` when the input
/// has no searchable tokens.
pub fn fts_query(raw: &str) -> Option<String> {
    let tokens = query_tokens(raw);
    if tokens.is_empty() {
        return None;
    }
    Some(
        tokens
            .iter()
            .map(|t| format!("\"{t}\""))
            .collect::<Vec<_>>()
            .join(" OR "),
    )
}
