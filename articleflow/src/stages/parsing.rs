//! Helpers for pulling structured data out of model responses.

use once_cell::sync::Lazy;
use regex::Regex;

#[allow(clippy::expect_used)]
static FENCE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?s)^\s*```[A-Za-z0-9_-]*[ \t]*\n(.*?)\n?```\s*$").expect("fence pattern is valid")
});

/// Removes a surrounding Markdown code fence, if present.
#[must_use]
pub fn strip_fences(text: &str) -> &str {
    FENCE
        .captures(text)
        .and_then(|c| c.get(1))
        .map_or_else(|| text.trim(), |m| m.as_str().trim())
}

/// Extracts the first JSON object from a response.
///
/// Accepts bare JSON, fenced JSON, and JSON surrounded by prose.
#[must_use]
pub fn extract_json(text: &str) -> Option<serde_json::Value> {
    let body = strip_fences(text);
    if let Ok(value @ serde_json::Value::Object(_)) = serde_json::from_str(body) {
        return Some(value);
    }
    let start = body.find('{')?;
    let end = body.rfind('}')?;
    if end <= start {
        return None;
    }
    match serde_json::from_str(&body[start..=end]) {
        Ok(value @ serde_json::Value::Object(_)) => Some(value),
        _ => None,
    }
}

/// Returns a string field, trimmed, if present and non-empty.
#[must_use]
pub fn str_field<'v>(value: &'v serde_json::Value, key: &str) -> Option<&'v str> {
    value
        .get(key)
        .and_then(serde_json::Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
}

/// Returns a list of strings from an array field, skipping blanks.
#[must_use]
pub fn string_list(value: &serde_json::Value, key: &str) -> Vec<String> {
    value
        .get(key)
        .and_then(serde_json::Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(|item| match item {
                    serde_json::Value::String(s) => Some(s.trim().to_string()),
                    serde_json::Value::Object(_) => str_field(item, "description").map(str::to_string),
                    _ => None,
                })
                .filter(|s| !s.is_empty())
                .collect()
        })
        .unwrap_or_default()
}

/// Turns a heading into a kebab-case id.
#[must_use]
pub fn slugify(text: &str) -> String {
    let mut slug = String::with_capacity(text.len());
    let mut pending_dash = false;
    for c in text.chars() {
        if c.is_alphanumeric() {
            if pending_dash && !slug.is_empty() {
                slug.push('-');
            }
            pending_dash = false;
            slug.extend(c.to_lowercase());
        } else {
            pending_dash = true;
        }
    }
    slug
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_strip_fences() {
        assert_eq!(strip_fences("```mermaid\ngraph TD\nA-->B\n```"), "graph TD\nA-->B");
        assert_eq!(strip_fences("  plain text  "), "plain text");
    }

    #[test]
    fn test_extract_json_variants() {
        assert_eq!(extract_json(r#"{"a": 1}"#), Some(json!({"a": 1})));
        assert_eq!(extract_json("```json\n{\"a\": 1}\n```"), Some(json!({"a": 1})));
        assert_eq!(
            extract_json("Here is the outline: {\"a\": [1, 2]} hope it helps"),
            Some(json!({"a": [1, 2]}))
        );
        assert_eq!(extract_json("no json here"), None);
        assert_eq!(extract_json("[1, 2]"), None);
    }

    #[test]
    fn test_string_list_accepts_objects() {
        let value = json!({"items": ["a", " ", {"description": "b"}, 3]});
        assert_eq!(string_list(&value, "items"), vec!["a", "b"]);
        assert!(string_list(&value, "missing").is_empty());
    }

    #[test]
    fn test_slugify() {
        assert_eq!(slugify("What is Redis?"), "what-is-redis");
        assert_eq!(slugify("  Setup & Install  "), "setup-install");
        assert_eq!(slugify("!!!"), "");
    }
}
