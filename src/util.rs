//! Shared utility functions

/// Render captured body bytes for display
///
/// Invalid UTF-8 is replaced rather than rejected, and the result never exceeds
/// `max_bytes` of text; a cut is never made inside a character. When the body
/// was longer than what is shown, a marker with the omitted byte count follows.
pub fn body_preview(bytes: &[u8], total: u64, max_bytes: usize) -> String {
    let text = String::from_utf8_lossy(bytes);
    let shown = truncate_utf8_safe(&text, max_bytes);

    let truncated = shown.len() < text.len() || total > bytes.len() as u64;
    if !truncated {
        return shown.to_string();
    }
    // Approximate when replacement characters changed the length
    let omitted = total.saturating_sub(shown.len() as u64);
    format!("{}... ({} more bytes)", shown, omitted)
}

/// Head bytes as text without the terminating blank line
pub fn head_text(raw: &[u8]) -> String {
    let text = String::from_utf8_lossy(raw);
    text.trim_end_matches(['\r', '\n']).to_string()
}

/// Longest prefix of `s` of at most `max_bytes` that ends on a char boundary
pub fn truncate_utf8_safe(s: &str, max_bytes: usize) -> &str {
    if s.len() <= max_bytes {
        return s;
    }
    let mut end = max_bytes;
    while end > 0 && !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}
