//! Shape validation for model JSON output.

use serde_json::Value;

/// Longest list kept from a model response.
pub const MAX_LIST_ITEMS: usize = 5;
/// Longest string kept from a model response, in characters.
pub const MAX_TEXT_CHARS: usize = 600;

/// Trim and cut `text` to at most [`MAX_TEXT_CHARS`] characters.
pub fn clip(text: &str) -> String {
    clip_to(text, MAX_TEXT_CHARS)
}

fn clip_to(text: &str, max_chars: usize) -> String {
    let trimmed = text.trim();
    match trimmed.char_indices().nth(max_chars) {
        Some((idx, _)) => trimmed[..idx].trim_end().to_string(),
        None => trimmed.to_string(),
    }
}

/// Append `suffix` after `text`, shortening `text` so the whole stays
/// within [`MAX_TEXT_CHARS`]. The suffix itself is never cut.
pub fn append_within_limit(text: &str, suffix: &str) -> String {
    let room = MAX_TEXT_CHARS.saturating_sub(suffix.chars().count() + 1);
    let head = clip_to(text, room);
    if head.is_empty() {
        suffix.to_string()
    } else {
        format!("{} {}", head, suffix)
    }
}

/// Non-empty string field, clipped.
pub fn text_field(obj: &Value, key: &str) -> Option<String> {
    obj.get(key)
        .and_then(Value::as_str)
        .map(clip)
        .filter(|s| !s.is_empty())
}

/// String list field: non-string and empty entries dropped, at most
/// [`MAX_LIST_ITEMS`] kept, each entry clipped.
pub fn list_field(obj: &Value, key: &str) -> Option<Vec<String>> {
    let items = obj.get(key)?.as_array()?;
    let list: Vec<String> = items
        .iter()
        .filter_map(Value::as_str)
        .map(clip)
        .filter(|s| !s.is_empty())
        .take(MAX_LIST_ITEMS)
        .collect();
    (!list.is_empty()).then_some(list)
}

/// Turn a tag like `safety_building` into `safety building`.
pub fn humanize(tag: &str) -> String {
    tag.replace('_', " ")
}
