//! Text helpers for tool output and error bodies.

use once_cell::sync::Lazy;
use regex::Regex;

static WHITESPACE_RUN: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").expect("Invalid regex"));

const TRUNCATION_MARKER: &str = "... [truncated]";

/// Largest char boundary at or below `index`.
pub fn floor_char_boundary(s: &str, index: usize) -> usize {
    if index >= s.len() {
        return s.len();
    }
    (0..=index)
        .rev()
        .find(|&i| s.is_char_boundary(i))
        .unwrap_or(0)
}

/// Keep at most `max_bytes` of `s` and mark the cut.
pub fn truncate_with_marker(s: &str, max_bytes: usize) -> String {
    if s.len() <= max_bytes {
        return s.to_string();
    }
    let mut out = s[..floor_char_boundary(s, max_bytes)].to_string();
    out.push_str(TRUNCATION_MARKER);
    out
}

/// Trim and fold every whitespace run, newlines included, into one space.
pub fn collapse_whitespace(s: &str) -> String {
    WHITESPACE_RUN.replace_all(s.trim(), " ").into_owned()
}
