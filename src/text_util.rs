/// Maximum number of characters shown for a result snippet.
pub const DEFAULT_SNIPPET_MAX_CHARS: usize = 500;

/// Shorten `text` to at most `max_chars` characters, appending `...` when
/// anything was cut.
pub fn truncate_chars(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((byte, _)) => format!("{}...", &text[..byte]),
        None => text.to_string(),
    }
}

/// Replace every run of whitespace with a single space.
pub fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// One-line preview of a chunk for terminal output.
pub fn snippet(text: &str) -> String {
    truncate_chars(&collapse_whitespace(text), DEFAULT_SNIPPET_MAX_CHARS)
}
