//! Field-definition grammar.
//!
//! ```text
//! definition := [prompt WS] relation | scalar | prompt
//! relation   := ['['] [op] ['['] targets [']'] ['.' backref] ['(' threshold ')'] [']'] ['?']
//! op         := '->' | '~>' | '<-' | '<~'
//! targets    := Type ('|' Type)*
//! scalar     := ['['] type [']'] ['[]'] ['?']
//! ```
//!
//! Anything containing a space, `/` or `?` that fits neither form is a
//! generation prompt for a string field.

use super::Operator;
use super::naming::is_identifier;

/// Scalar type names understood without declaration.
pub const KNOWN_SCALARS: &[&str] = &[
    "string", "text", "markdown", "number", "integer", "int", "float", "boolean", "bool", "date",
    "datetime", "timestamp", "email", "url", "uuid", "json", "id",
];

/// The shape of one parsed definition string, before backref derivation.
#[derive(Debug, Clone, PartialEq)]
pub struct Definition {
    pub is_array: bool,
    pub is_optional: bool,
    pub kind: DefinitionKind,
}

#[derive(Debug, Clone, PartialEq)]
pub enum DefinitionKind {
    Relation {
        operator: Operator,
        targets: Vec<String>,
        backref: Option<String>,
        threshold: Option<f32>,
        prompt: Option<String>,
    },
    Scalar {
        scalar_type: String,
        prompt: Option<String>,
    },
}

/// Parse one definition string.
///
/// `is_declared` answers whether a name is an entity of the schema being parsed.
/// Errors are plain messages; the caller attaches entity and field names.
pub fn parse(raw: &str, is_declared: &dyn Fn(&str) -> bool) -> Result<Definition, String> {
    let text = raw.trim();
    if text.is_empty() {
        return Err("empty field definition".to_string());
    }

    if let Some((prefix, operator, body)) = split_operator(text) {
        let (prompt, bracket_open) = match prefix.trim_end().strip_suffix('[') {
            Some(p) => (p.trim(), true),
            None => (prefix.trim(), false),
        };
        let prompt = (!prompt.is_empty()).then(|| prompt.to_string());
        return parse_relation(operator, body, bracket_open, prompt, is_declared);
    }

    if let Some(scalar) = parse_scalar(text) {
        return Ok(scalar);
    }

    if looks_like_bare_relation(text) {
        let (body, bracket_open) = match text.strip_prefix('[') {
            Some(rest) => (rest, true),
            None => (text, false),
        };
        return parse_relation(Operator::ForwardExact, body, bracket_open, None, is_declared);
    }

    if text.contains([' ', '/', '?']) {
        return Ok(Definition {
            is_array: false,
            is_optional: false,
            kind: DefinitionKind::Scalar {
                scalar_type: "string".to_string(),
                prompt: Some(text.to_string()),
            },
        });
    }

    Err(format!("unrecognised field definition '{}'", text))
}

/// Find the first operator that starts the definition or follows whitespace / `[`.
fn split_operator(text: &str) -> Option<(&str, Operator, &str)> {
    let bytes = text.as_bytes();
    for i in 0..bytes.len().saturating_sub(1) {
        if !bytes[i].is_ascii() || !bytes[i + 1].is_ascii() {
            continue;
        }
        let Some(operator) = Operator::from_symbol(&text[i..i + 2]) else {
            continue;
        };
        let boundary = i == 0 || matches!(bytes[i - 1], b' ' | b'\t' | b'[');
        if boundary {
            return Some((&text[..i], operator, &text[i + 2..]));
        }
    }
    None
}

fn parse_relation(
    operator: Operator,
    body: &str,
    bracket_open: bool,
    prompt: Option<String>,
    is_declared: &dyn Fn(&str) -> bool,
) -> Result<Definition, String> {
    let mut s = body.trim();
    let mut is_optional = false;
    let mut is_array = false;

    if let Some(stripped) = s.strip_suffix('?') {
        is_optional = true;
        s = stripped.trim_end();
    }

    if bracket_open {
        s = s
            .strip_suffix(']')
            .ok_or_else(|| format!("unclosed '[' in relation '{}'", body.trim()))?
            .trim();
        is_array = true;
    }
    if let Some(inner) = s.strip_prefix('[') {
        s = inner
            .strip_suffix(']')
            .ok_or_else(|| format!("unclosed '[' in relation '{}'", body.trim()))?
            .trim();
        is_array = true;
    }
    if let Some(stripped) = s.strip_suffix("[]") {
        s = stripped;
        is_array = true;
    }
    if let Some(stripped) = s.strip_suffix('?') {
        is_optional = true;
        s = stripped.trim_end();
    }

    let mut threshold = None;
    if let Some(stripped) = s.strip_suffix(')') {
        let open = stripped
            .rfind('(')
            .ok_or_else(|| format!("unbalanced ')' in relation '{}'", body.trim()))?;
        let value: f32 = stripped[open + 1..]
            .trim()
            .parse()
            .map_err(|_| format!("threshold '{}' is not a number", &stripped[open + 1..]))?;
        if !(0.0..=1.0).contains(&value) {
            return Err(format!("threshold {} is outside [0, 1]", value));
        }
        threshold = Some(value);
        s = stripped[..open].trim_end();
    }

    let (targets_part, backref) = match s.split_once('.') {
        Some((t, b)) => (t, Some(b.trim().to_string())),
        None => (s, None),
    };
    if let Some(ref b) = backref
        && !is_identifier(b)
    {
        return Err(format!("backref '{}' is not an identifier", b));
    }

    let targets: Vec<String> = targets_part
        .split('|')
        .map(|t| t.trim().to_string())
        .collect();
    for target in &targets {
        if !is_identifier(target) {
            return Err(format!("related type '{}' is not an identifier", target));
        }
        if !is_declared(target) {
            return Err(format!("related type '{}' is not a declared entity", target));
        }
    }

    Ok(Definition {
        is_array,
        is_optional,
        kind: DefinitionKind::Relation {
            operator,
            targets,
            backref,
            threshold,
            prompt,
        },
    })
}

fn parse_scalar(text: &str) -> Option<Definition> {
    let mut s = text;
    let mut is_optional = false;
    let mut is_array = false;

    if let Some(stripped) = s.strip_suffix('?') {
        is_optional = true;
        s = stripped;
    }
    if let Some(inner) = s.strip_prefix('[').and_then(|r| r.strip_suffix(']')) {
        s = inner;
        is_array = true;
    } else if let Some(stripped) = s.strip_suffix("[]") {
        s = stripped;
        is_array = true;
    }

    let lower = s.to_ascii_lowercase();
    let known = KNOWN_SCALARS.contains(&lower.as_str());
    let custom = is_identifier(s) && s.starts_with(|c: char| c.is_ascii_lowercase());
    if !known && !custom {
        return None;
    }

    Some(Definition {
        is_array,
        is_optional,
        kind: DefinitionKind::Scalar {
            scalar_type: if known { lower } else { s.to_string() },
            prompt: None,
        },
    })
}

/// `Type`, `Type.backref`, `[Type|Other]?` and friends: no whitespace, capitalised head.
fn looks_like_bare_relation(text: &str) -> bool {
    let allowed = |c: char| c.is_ascii_alphanumeric() || "_.|()[]?".contains(c);
    if !text.chars().all(allowed) {
        return false;
    }
    text.trim_start_matches('[')
        .chars()
        .next()
        .is_some_and(|c| c.is_ascii_uppercase())
}
