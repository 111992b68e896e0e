//! # Draft Phase
//!
//! `draft` turns input data into a `Draft` without touching any provider:
//! provided scalars are copied, relation inputs are classified into slots,
//! and the scalars still to generate are listed in generation order.
//!
//! Relation input forms:
//!
//! | Input | Slot |
//! |-------|------|
//! | `{"$ref": "id"}` (optionally `"$type"`) | `RefSlot::Explicit` |
//! | `{...}` | `RefSlot::Nested`, the child's own input |
//! | `"text"` | `RefSlot::Hint` |
//! | `[...]` | one slot per element (array fields only) |
//!
//! Input problems that only affect one field are recorded on `Draft::errors`
//! and surface in `Resolved::errors`; they never abort the draft.

use crate::schema::{Operator, ParsedEntity, ParsedField, ParsedSchema, RelatedType};
use crate::{EntityId, FieldError, FieldMap, FieldValue, WeaveError};
use serde::Serialize;

/// Input key carrying a caller-chosen id.
pub const ID_KEY: &str = "$id";
/// Input key carrying a natural-language hint for the entity itself.
pub const HINT_KEY: &str = "$hint";

/// One unit of relation input.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum RefSlot {
    /// Link an existing entity directly.
    Explicit {
        id: EntityId,
        entity_type: Option<String>,
    },
    /// Input object for a child entity.
    Nested {
        input: serde_json::Map<String, serde_json::Value>,
    },
    /// Natural-language hint.
    Hint { text: String },
}

impl RefSlot {
    /// Hint text used when the slot must be searched or generated.
    #[must_use]
    pub fn hint(&self) -> Option<String> {
        match self {
            Self::Hint { text } => Some(text.clone()),
            Self::Nested { input } => input
                .get(HINT_KEY)
                .and_then(serde_json::Value::as_str)
                .map(str::to_string)
                .or_else(|| {
                    let joined = input
                        .iter()
                        .filter(|(k, _)| !k.starts_with('$'))
                        .filter_map(|(_, v)| v.as_str())
                        .collect::<Vec<_>>()
                        .join(" ");
                    (!joined.is_empty()).then_some(joined)
                }),
            Self::Explicit { .. } => None,
        }
    }
}

/// A relation field awaiting resolution.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReferenceSpec {
    pub field: String,
    pub operator: Operator,
    pub related_type: RelatedType,
    pub is_array: bool,
    pub is_optional: bool,
    pub backref: Option<String>,
    pub prompt: Option<String>,
    /// Slots from input, in input order.
    pub slots: Vec<RefSlot>,
    /// The input mentioned this field at all.
    pub provided: bool,
}

impl ReferenceSpec {
    fn from_field(field: &ParsedField, operator: Operator, related: &RelatedType) -> Self {
        Self {
            field: field.name.clone(),
            operator,
            related_type: related.clone(),
            is_array: field.is_array,
            is_optional: field.is_optional,
            backref: field.backref.clone(),
            prompt: field.prompt.clone(),
            slots: Vec::new(),
            provided: false,
        }
    }

    /// Hint used when no input was given: the prompt, else the field name.
    #[must_use]
    pub fn default_hint(&self) -> String {
        self.prompt.clone().unwrap_or_else(|| self.field.clone())
    }
}

/// An entity before relationship resolution.
///
/// `values` holds only the scalars the input provided. Missing scalars are
/// listed in `pending` and filled at resolve time, where prompts can see the
/// parent and earlier values; drafting itself never calls a generator.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Draft {
    pub entity_type: String,
    /// `$id` from input.
    pub id: Option<EntityId>,
    /// `$hint` from input, or the hint the parent generated this entity from.
    pub hint: Option<String>,
    /// Scalars provided by the input.
    pub values: FieldMap,
    /// Scalar fields still to generate, in generation order.
    pub pending: Vec<String>,
    /// Relation fields in declaration order.
    pub refs: Vec<ReferenceSpec>,
    /// Per-field input problems.
    pub errors: Vec<FieldError>,
    /// The raw input, used for derived ids.
    #[serde(skip)]
    pub input: serde_json::Map<String, serde_json::Value>,
}

impl Draft {
    /// Preview as JSON: provided values, pending fields and reference slots.
    #[must_use]
    pub fn to_json(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or(serde_json::Value::Null)
    }
}

/// Draft an entity of `entity_type` from `input`.
///
/// Fails only when the type is unknown or the input is not an object.
pub fn draft(
    schema: &ParsedSchema,
    entity_type: &str,
    input: &serde_json::Value,
) -> Result<Draft, WeaveError> {
    let object = match input {
        serde_json::Value::Object(map) => map.clone(),
        serde_json::Value::Null => serde_json::Map::new(),
        other => {
            return Err(WeaveError::InvalidInput(format!(
                "input for {} must be an object, got {}",
                entity_type, other
            )));
        }
    };
    draft_object(schema, entity_type, object, None)
}

/// Draft from an owned input object with an optional hint from the parent.
pub(crate) fn draft_object(
    schema: &ParsedSchema,
    entity_type: &str,
    input: serde_json::Map<String, serde_json::Value>,
    hint: Option<String>,
) -> Result<Draft, WeaveError> {
    let entity = schema.require(entity_type)?;

    let mut draft = Draft {
        entity_type: entity_type.to_string(),
        id: input
            .get(ID_KEY)
            .and_then(serde_json::Value::as_str)
            .map(EntityId::new),
        hint: input
            .get(HINT_KEY)
            .and_then(serde_json::Value::as_str)
            .map(str::to_string)
            .or(hint),
        values: FieldMap::new(),
        pending: Vec::new(),
        refs: Vec::new(),
        errors: Vec::new(),
        input: serde_json::Map::new(),
    };

    for (key, value) in &input {
        if key.starts_with('$') {
            continue;
        }
        match entity.field(key) {
            Some(field) if !field.is_relation => {
                if !value.is_null() {
                    draft.values.insert(key.clone(), FieldValue::Scalar(value.clone()));
                }
            }
            Some(_) => {}
            None => {
                tracing::debug!(entity_type, field = %key, "input field not declared, ignored");
            }
        }
    }

    for field in entity.relations() {
        let Some((operator, related)) = field.relation() else {
            continue;
        };
        let mut spec = ReferenceSpec::from_field(field, operator, related);
        match input.get(&field.name) {
            None | Some(serde_json::Value::Null) => {}
            Some(value) => {
                spec.provided = true;
                if let Err(message) = classify(value, field, &mut spec.slots) {
                    draft.errors.push(FieldError::new(&field.name, message));
                }
            }
        }
        draft.refs.push(spec);
    }

    draft.pending = pending_scalars(entity, &draft.values);
    draft.input = input;
    Ok(draft)
}

fn pending_scalars(entity: &ParsedEntity, provided: &FieldMap) -> Vec<String> {
    entity
        .scalar_generation_order()
        .into_iter()
        .filter(|f| !f.is_optional && !provided.contains_key(&f.name))
        .map(|f| f.name.clone())
        .collect()
}

fn classify(
    value: &serde_json::Value,
    field: &ParsedField,
    slots: &mut Vec<RefSlot>,
) -> Result<(), String> {
    match value {
        serde_json::Value::Array(items) => {
            if !field.is_array {
                return Err(format!("'{}' holds one reference, got an array", field.name));
            }
            if items.len() > crate::primitives::MAX_ARRAY_REFS {
                return Err(format!(
                    "'{}' has {} items, limit is {}",
                    field.name,
                    items.len(),
                    crate::primitives::MAX_ARRAY_REFS
                ));
            }
            for item in items {
                if item.is_array() {
                    return Err(format!("'{}' items may not be arrays", field.name));
                }
                slots.push(slot(item));
            }
            Ok(())
        }
        single => {
            slots.push(slot(single));
            Ok(())
        }
    }
}

fn slot(value: &serde_json::Value) -> RefSlot {
    match value {
        serde_json::Value::Object(map) => match map.get("$ref").and_then(serde_json::Value::as_str) {
            Some(id) => RefSlot::Explicit {
                id: EntityId::new(id),
                entity_type: map
                    .get("$type")
                    .and_then(serde_json::Value::as_str)
                    .map(str::to_string),
            },
            None => RefSlot::Nested { input: map.clone() },
        },
        serde_json::Value::String(text) => RefSlot::Hint { text: text.clone() },
        other => RefSlot::Hint {
            text: other.to_string(),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn schema() -> ParsedSchema {
        ParsedSchema::parse(&json!({
            "Blog": { "title": "string", "tagline": "string?", "topics": "[Topic.blog]" },
            "Topic": { "name": "string", "posts": "->Post" },
            "Post": {
                "title": "string",
                "summary": "Summarize {title}",
                "category": "~>Category?",
                "author": "->Author"
            },
            "Category": { "name": "string" },
            "Author": { "name": "string" }
        }))
        .expect("schema")
    }

    #[test]
    fn scalars_are_copied_and_pending_listed() {
        let d = draft(&schema(), "Post", &json!({ "title": "Ownership" })).expect("draft");
        assert_eq!(d.values.get("title"), Some(&FieldValue::text("Ownership")));
        assert_eq!(d.pending, vec!["summary"]);
        assert!(d.errors.is_empty());
    }

    #[test]
    fn optional_scalars_are_not_pending() {
        let d = draft(&schema(), "Blog", &json!({})).expect("draft");
        assert_eq!(d.pending, vec!["title"]);
    }

    #[test]
    fn refs_follow_declaration_order_and_classify_input() {
        let d = draft(
            &schema(),
            "Post",
            &json!({
                "author": { "$ref": "a1" },
                "category": "Databases"
            }),
        )
        .expect("draft");

        let fields: Vec<_> = d.refs.iter().map(|r| r.field.as_str()).collect();
        assert_eq!(fields, vec!["category", "author"]);
        assert_eq!(
            d.refs[0].slots,
            vec![RefSlot::Hint {
                text: "Databases".into()
            }]
        );
        assert_eq!(
            d.refs[1].slots,
            vec![RefSlot::Explicit {
                id: EntityId::new("a1"),
                entity_type: None
            }]
        );
    }

    #[test]
    fn nested_array_input_becomes_child_slots() {
        let d = draft(
            &schema(),
            "Blog",
            &json!({ "title": "Eng", "topics": [{ "name": "Rust" }, "Go"] }),
        )
        .expect("draft");
        let topics = &d.refs[0];
        assert!(topics.provided && topics.is_array);
        assert_eq!(topics.slots.len(), 2);
        assert!(matches!(topics.slots[0], RefSlot::Nested { .. }));
        assert_eq!(topics.slots[0].hint().as_deref(), Some("Rust"));
    }

    #[test]
    fn missing_relations_are_not_provided() {
        let d = draft(&schema(), "Topic", &json!({ "name": "Rust" })).expect("draft");
        assert!(!d.refs[0].provided);
        assert_eq!(d.refs[0].default_hint(), "posts");
    }

    #[test]
    fn array_for_single_relation_is_a_field_error() {
        let d = draft(&schema(), "Topic", &json!({ "posts": ["a", "b"] })).expect("draft");
        assert_eq!(d.errors.len(), 1);
        assert_eq!(d.errors[0].field, "posts");
    }

    #[test]
    fn id_and_hint_keys_are_read() {
        let d = draft(&schema(), "Category", &json!({ "$id": "c9", "$hint": "Databases" }))
            .expect("draft");
        assert_eq!(d.id, Some(EntityId::new("c9")));
        assert_eq!(d.hint.as_deref(), Some("Databases"));
    }

    #[test]
    fn unknown_type_and_bad_input_fail() {
        assert!(matches!(
            draft(&schema(), "Ghost", &json!({})),
            Err(WeaveError::UnknownEntityType(_))
        ));
        assert!(matches!(
            draft(&schema(), "Blog", &json!("text")),
            Err(WeaveError::InvalidInput(_))
        ));
    }

    #[test]
    fn draft_is_pure() {
        let s = schema();
        let input = json!({ "title": "Eng", "topics": ["Rust"] });
        assert_eq!(
            draft(&s, "Blog", &input).expect("draft"),
            draft(&s, "Blog", &input).expect("draft")
        );
    }
}
