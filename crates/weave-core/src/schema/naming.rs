//! Naming conventions for derived backrefs.

/// Irregular plurals recognised when deriving backref names.
const IRREGULAR_PLURALS: &[(&str, &str)] = &[
    ("person", "people"),
    ("child", "children"),
    ("man", "men"),
    ("woman", "women"),
    ("mouse", "mice"),
    ("datum", "data"),
    ("index", "indices"),
];

/// Lower the first character: `BlogPost` -> `blogPost`.
pub fn lower_camel(name: &str) -> String {
    let mut chars = name.chars();
    match chars.next() {
        Some(first) => first.to_lowercase().chain(chars).collect(),
        None => String::new(),
    }
}

/// English pluralisation good enough for identifiers.
///
/// Only the last camel-case segment is inflected: `blogPost` -> `blogPosts`,
/// `salesPerson` -> `salesPeople`.
pub fn pluralize(word: &str) -> String {
    if word.is_empty() {
        return String::new();
    }

    let split = word
        .char_indices()
        .filter(|(_, c)| c.is_uppercase())
        .map(|(i, _)| i)
        .next_back()
        .unwrap_or(0);
    let (head, tail) = word.split_at(split);
    let lower = tail.to_lowercase();

    for (singular, plural) in IRREGULAR_PLURALS {
        if lower == *singular {
            let mut inflected = String::from(head);
            if tail.starts_with(|c: char| c.is_uppercase()) {
                inflected.push_str(&upper_first(plural));
            } else {
                inflected.push_str(plural);
            }
            return inflected;
        }
    }

    if lower.ends_with('y') && !ends_with_vowel_y(&lower) {
        return format!("{}ies", &word[..word.len() - 1]);
    }
    if ["s", "x", "z", "ch", "sh"]
        .iter()
        .any(|suffix| lower.ends_with(suffix))
    {
        return format!("{}es", word);
    }
    format!("{}s", word)
}

fn ends_with_vowel_y(lower: &str) -> bool {
    let mut rev = lower.chars().rev();
    rev.next();
    matches!(rev.next(), Some('a' | 'e' | 'i' | 'o' | 'u'))
}

fn upper_first(s: &str) -> String {
    let mut chars = s.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

/// Check that a string is a plain identifier (`[A-Za-z_][A-Za-z0-9_]*`).
pub fn is_identifier(s: &str) -> bool {
    let mut chars = s.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {
            chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
        }
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lower_camel_lowers_first_char_only() {
        assert_eq!(lower_camel("BlogPost"), "blogPost");
        assert_eq!(lower_camel("Topic"), "topic");
        assert_eq!(lower_camel(""), "");
    }

    #[test]
    fn pluralize_regular_words() {
        assert_eq!(pluralize("post"), "posts");
        assert_eq!(pluralize("category"), "categories");
        assert_eq!(pluralize("day"), "days");
        assert_eq!(pluralize("box"), "boxes");
        assert_eq!(pluralize("branch"), "branches");
    }

    #[test]
    fn pluralize_inflects_last_segment() {
        assert_eq!(pluralize("blogPost"), "blogPosts");
        assert_eq!(pluralize("salesPerson"), "salesPeople");
        assert_eq!(pluralize("person"), "people");
    }

    #[test]
    fn identifier_check() {
        assert!(is_identifier("Topic"));
        assert!(is_identifier("_private2"));
        assert!(!is_identifier("2fast"));
        assert!(!is_identifier("a-b"));
        assert!(!is_identifier(""));
    }
}
