// Deterministic query redaction for the audit store

use regex::Regex;
use std::sync::OnceLock;

fn string_literal_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    // SQL string literal, '' as the embedded quote escape
    RE.get_or_init(|| Regex::new(r"'(?:[^']|'')*'").expect("static pattern"))
}

fn numeric_literal_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\b\d+(\.\d+)?\b").expect("static pattern"))
}

fn whitespace_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\s+").expect("static pattern"))
}

/// Redact literals from a raw query so the audit store never durably
/// holds the sensitive payloads the PII classifier found. String and
/// numeric literals become `?`, whitespace collapses, and the output is
/// truncated to `max_len`. Pure function: identical input yields
/// byte-identical output.
pub fn sanitize_query(raw: &str, max_len: usize) -> String {
    let redacted = string_literal_re().replace_all(raw, "?");
    let redacted = numeric_literal_re().replace_all(&redacted, "?");
    let collapsed = whitespace_re().replace_all(&redacted, " ");
    let trimmed = collapsed.trim();

    if trimmed.len() <= max_len {
        return trimmed.to_string();
    }
    let mut end = max_len;
    while !trimmed.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}…", &trimmed[..end])
}
