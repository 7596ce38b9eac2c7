//! Redaction of sensitive values.
//!
//! Two independent tools live here:
//!
//! - [`RedactionRules`]: key-based masking applied to event payloads on
//!   export. Keys are kept, values are replaced with [`REDACTED_MARKER`].
//! - [`scrub_secrets`]: pattern-based masking of secret-looking substrings
//!   in free text (API keys, bearer tokens, emails, ...), used before a
//!   memory's content is stored.

use std::sync::LazyLock;

use regex::Regex;
use serde_json::Value;

use crate::event::Payload;

/// Replacement value for masked payload fields.
pub const REDACTED_MARKER: &str = "[REDACTED]";

/// Default sensitive-key substrings (matched case-insensitively).
pub const SENSITIVE_KEYS: &[&str] = &["password", "token", "key", "secret", "credential"];

/// Sensitive-key rule table consumed by event export.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RedactionRules {
    needles: Vec<String>,
}

impl RedactionRules {
    /// Build rules from custom key substrings.
    pub fn new<I, S>(needles: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            needles: needles
                .into_iter()
                .map(|s| s.as_ref().to_lowercase())
                .collect(),
        }
    }

    /// Whether a payload key names a sensitive field.
    pub fn is_sensitive(&self, key: &str) -> bool {
        let lower = key.to_lowercase();
        self.needles.iter().any(|n| lower.contains(n.as_str()))
    }

    /// Mask every sensitive field in `payload`, descending into nested
    /// objects and arrays. Returns the number of masked values.
    pub fn redact_payload(&self, payload: &mut Payload) -> usize {
        let mut masked = 0;
        for (key, value) in payload.iter_mut() {
            if self.is_sensitive(key) {
                *value = Value::String(REDACTED_MARKER.to_string());
                masked += 1;
            } else {
                masked += self.redact_value(value);
            }
        }
        masked
    }

    fn redact_value(&self, value: &mut Value) -> usize {
        match value {
            Value::Object(map) => self.redact_payload(map),
            Value::Array(items) => items.iter_mut().map(|v| self.redact_value(v)).sum(),
            _ => 0,
        }
    }
}

impl Default for RedactionRules {
    fn default() -> Self {
        Self::new(SENSITIVE_KEYS)
    }
}

/// Secret-looking substrings and their replacement markers.
const SECRET_PATTERN_SOURCES: [(&str, &str); 11] = [
    (r"sk-ant-[A-Za-z0-9\-_]+", "<REDACTED_TOKEN>"),
    (r"sk-[A-Za-z0-9]+", "<REDACTED_TOKEN>"),
    (
        r"Bearer\s+[A-Za-z0-9\-_]+(\.[A-Za-z0-9\-_]+\.[A-Za-z0-9\-_]+)?",
        "<REDACTED_TOKEN>",
    ),
    (r"gh[pousr]_[A-Za-z0-9]{36,}", "<REDACTED_TOKEN>"),
    (r"AKIA[0-9A-Z]{16}", "<REDACTED_TOKEN>"),
    (
        r#"(?i)(api[_-]?key|secret[_-]?key|access[_-]?token|auth[_-]?token)\s*[:=]\s*['"]?[A-Za-z0-9\-_]{16,}['"]?"#,
        "<REDACTED_SECRET>",
    ),
    (r#"(?i)password\s*[:=]\s*['"][^'"]{4,}['"]"#, "<REDACTED_SECRET>"),
    (
        r"[A-Za-z0-9._%+\-]+@[A-Za-z0-9.\-]+\.[A-Za-z]{2,}",
        "<REDACTED_EMAIL>",
    ),
    (r"\b[0-9a-fA-F]{32,}\b", "<REDACTED_HEX>"),
    (r"xox[baprs]-[A-Za-z0-9\-]{10,}", "<REDACTED_TOKEN>"),
    (r"AIza[0-9A-Za-z\-_]{35}", "<REDACTED_TOKEN>"),
];

static SECRET_PATTERNS: LazyLock<Vec<(Regex, &'static str)>> = LazyLock::new(|| {
    SECRET_PATTERN_SOURCES
        .iter()
        .map(|(p, r)| (Regex::new(p).expect("secret pattern is a valid regex"), *r))
        .collect()
});

/// Replace secret-looking substrings in `text`.
pub fn scrub_secrets(text: &str) -> String {
    let mut out = text.to_string();
    for (re, replacement) in SECRET_PATTERNS.iter() {
        out = re.replace_all(&out, *replacement).into_owned();
    }
    out
}

/// Whether `text` contains anything [`scrub_secrets`] would mask.
pub fn contains_secrets(text: &str) -> bool {
    SECRET_PATTERNS.iter().any(|(re, _)| re.is_match(text))
}
