//! Character-safe truncation for log excerpts and prompt embedding.

/// Keep at most `max_chars` characters, appending `suffix` when anything was cut.
pub fn truncate_chars(text: &str, max_chars: usize, suffix: &str) -> String {
    match text.char_indices().nth(max_chars) {
        Some((cut, _)) => format!("{}{suffix}", &text[..cut]),
        None => text.to_string(),
    }
}

/// Single-line excerpt for log messages and failure summaries.
pub fn excerpt(text: &str, max_chars: usize) -> String {
    truncate_chars(text.trim(), max_chars, "...")
}
