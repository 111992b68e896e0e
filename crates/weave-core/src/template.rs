//! # Prompt Templates
//!
//! `$instructions` and field prompts may reference other values as `{name}`
//! (or `{parent.name}`). Unknown placeholders are left untouched so that a
//! generation provider still sees them.

use std::collections::BTreeMap;

/// Names referenced by `{...}` placeholders, in order of first appearance.
pub fn placeholders(template: &str) -> Vec<String> {
    let mut names = Vec::new();
    let mut rest = template;
    while let Some(open) = rest.find('{') {
        let after = &rest[open + 1..];
        let Some(close) = after.find('}') else {
            break;
        };
        let name = after[..close].trim();
        if is_placeholder_name(name) && !names.iter().any(|n| n == name) {
            names.push(name.to_string());
        }
        rest = &after[close + 1..];
    }
    names
}

/// Substitute `{name}` placeholders with rendered values.
///
/// Strings are inserted verbatim; other JSON values use their compact form.
pub fn render(template: &str, values: &BTreeMap<String, serde_json::Value>) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;
    while let Some(open) = rest.find('{') {
        out.push_str(&rest[..open]);
        let after = &rest[open + 1..];
        let Some(close) = after.find('}') else {
            out.push_str(&rest[open..]);
            return out;
        };
        let name = after[..close].trim();
        match values.get(name) {
            Some(serde_json::Value::String(s)) => out.push_str(s),
            Some(other) if is_placeholder_name(name) => out.push_str(&other.to_string()),
            _ => out.push_str(&rest[open..open + close + 2]),
        }
        rest = &after[close + 1..];
    }
    out.push_str(rest);
    out
}

fn is_placeholder_name(name: &str) -> bool {
    !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '.')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn placeholders_in_order_without_duplicates() {
        let names = placeholders("Write about {topic} for {audience}, mention {topic}.");
        assert_eq!(names, vec!["topic", "audience"]);
    }

    #[test]
    fn placeholders_ignore_json_like_braces() {
        assert!(placeholders("Return {\"a\": 1}").is_empty());
    }

    #[test]
    fn render_substitutes_known_and_keeps_unknown() {
        let mut values = BTreeMap::new();
        values.insert("topic".to_string(), serde_json::json!("Rust"));
        values.insert("count".to_string(), serde_json::json!(3));

        let out = render("{count} posts on {topic} by {author}", &values);
        assert_eq!(out, "3 posts on Rust by {author}");
    }

    #[test]
    fn render_handles_unclosed_brace() {
        let values = BTreeMap::new();
        assert_eq!(render("open { brace", &values), "open { brace");
    }
}
