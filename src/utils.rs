//! Shared utility functions

use crate::models::Item;

/// Safely truncate a string at a UTF-8 boundary
pub fn safe_truncate(s: &str, max_bytes: usize) -> &str {
    if max_bytes >= s.len() {
        return s;
    }
    let mut end = max_bytes;
    while end > 0 && !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}

/// Join item texts with blank lines, capped at `max_bytes`
pub fn joined_item_text<'a, I>(items: I, max_bytes: usize) -> String
where
    I: IntoIterator<Item = &'a Item>,
{
    let joined = items
        .into_iter()
        .map(|item| item.text.as_str())
        .collect::<Vec<_>>()
        .join("\n\n");
    safe_truncate(&joined, max_bytes).to_string()
}
