//! # Core Type Definitions
//!
//! This module contains the record types every other module speaks:
//! - Identifiers (`EntityId`, `EntityRef`)
//! - Field values and materialized records (`FieldValue`, `FieldMap`, `Entity`)
//! - Per-field outcomes (`FieldError`, `FieldNote`)
//! - Error types (`WeaveError`)
//!
//! ## Ordering Guarantees
//!
//! - Field maps are `BTreeMap`s, so serialized entities are byte-stable
//! - Array relations are `Vec`s and keep insertion order

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use thiserror::Error;

// =============================================================================
// IDENTIFIERS
// =============================================================================

/// Stable identifier of a materialized entity.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct EntityId(pub String);

impl EntityId {
    /// Create a new identifier from a string.
    #[must_use]
    pub fn new(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    /// Get the identifier as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A typed pointer to an entity.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct EntityRef {
    /// The referenced entity's identifier.
    pub id: EntityId,
    /// The referenced entity's type tag.
    pub entity_type: String,
}

impl EntityRef {
    /// Create a new reference.
    #[must_use]
    pub fn new(entity_type: impl Into<String>, id: EntityId) -> Self {
        Self {
            id,
            entity_type: entity_type.into(),
        }
    }
}

// =============================================================================
// FIELD VALUES
// =============================================================================

/// The value of one field on an entity.
///
/// Relation values are either a single reference or an ordered list.
/// List order is the order in which references were resolved.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldValue {
    /// A scalar (string, number, boolean, null, or JSON document).
    Scalar(serde_json::Value),
    /// A single relation.
    Ref(EntityRef),
    /// An ordered array relation.
    Refs(Vec<EntityRef>),
}

impl FieldValue {
    /// Create a text scalar.
    #[must_use]
    pub fn text(s: impl Into<String>) -> Self {
        Self::Scalar(serde_json::Value::String(s.into()))
    }

    /// Get the scalar payload, if this is a scalar.
    #[must_use]
    pub fn as_scalar(&self) -> Option<&serde_json::Value> {
        match self {
            Self::Scalar(v) => Some(v),
            _ => None,
        }
    }

    /// Get the scalar as a string slice, if it is a text scalar.
    #[must_use]
    pub fn as_text(&self) -> Option<&str> {
        self.as_scalar().and_then(serde_json::Value::as_str)
    }

    /// All references held by this value (empty for scalars).
    #[must_use]
    pub fn refs(&self) -> Vec<&EntityRef> {
        match self {
            Self::Scalar(_) => Vec::new(),
            Self::Ref(r) => vec![r],
            Self::Refs(rs) => rs.iter().collect(),
        }
    }

    /// Check whether this value points at the given entity.
    #[must_use]
    pub fn points_at(&self, id: &EntityId) -> bool {
        self.refs().iter().any(|r| &r.id == id)
    }

    /// Read a value rendered by `to_json`. Objects carrying both `$ref` and
    /// `$type` (or arrays made only of them) become references.
    #[must_use]
    pub fn from_json(value: &serde_json::Value) -> Self {
        fn as_ref(v: &serde_json::Value) -> Option<EntityRef> {
            let id = v.get("$ref")?.as_str()?;
            let entity_type = v.get("$type")?.as_str()?;
            Some(EntityRef::new(entity_type, EntityId::new(id)))
        }
        match value {
            serde_json::Value::Object(_) => match as_ref(value) {
                Some(r) => Self::Ref(r),
                None => Self::Scalar(value.clone()),
            },
            serde_json::Value::Array(items) if !items.is_empty() => {
                match items.iter().map(as_ref).collect::<Option<Vec<_>>>() {
                    Some(refs) => Self::Refs(refs),
                    None => Self::Scalar(value.clone()),
                }
            }
            _ => Self::Scalar(value.clone()),
        }
    }

    /// Render the value as plain JSON. References become `{"$ref", "$type"}` objects.
    #[must_use]
    pub fn to_json(&self) -> serde_json::Value {
        fn ref_json(r: &EntityRef) -> serde_json::Value {
            serde_json::json!({ "$ref": r.id.as_str(), "$type": r.entity_type })
        }
        match self {
            Self::Scalar(v) => v.clone(),
            Self::Ref(r) => ref_json(r),
            Self::Refs(rs) => serde_json::Value::Array(rs.iter().map(ref_json).collect()),
        }
    }
}

/// Field name -> value, in deterministic order.
pub type FieldMap = BTreeMap<String, FieldValue>;

// =============================================================================
// ENTITY
// =============================================================================

/// A materialized record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entity {
    /// Stable identifier.
    pub id: EntityId,
    /// Type tag (an entity name from the schema).
    pub entity_type: String,
    /// Scalar and relation values.
    pub fields: FieldMap,
}

impl Entity {
    /// Create a new entity.
    #[must_use]
    pub fn new(entity_type: impl Into<String>, id: EntityId, fields: FieldMap) -> Self {
        Self {
            id,
            entity_type: entity_type.into(),
            fields,
        }
    }

    /// A reference to this entity.
    #[must_use]
    pub fn to_ref(&self) -> EntityRef {
        EntityRef::new(self.entity_type.clone(), self.id.clone())
    }

    /// Get a field value.
    #[must_use]
    pub fn get(&self, field: &str) -> Option<&FieldValue> {
        self.fields.get(field)
    }

    /// The text used when this entity is a similarity-search candidate:
    /// every string scalar, in field order, joined by spaces.
    #[must_use]
    pub fn searchable_text(&self) -> String {
        self.fields
            .values()
            .filter_map(FieldValue::as_text)
            .filter(|s| !s.is_empty())
            .collect::<Vec<_>>()
            .join(" ")
    }

    /// Render the entity as a plain JSON object with `$id` and `$type`.
    #[must_use]
    pub fn to_json(&self) -> serde_json::Value {
        let mut map = serde_json::Map::new();
        map.insert("$id".to_string(), self.id.as_str().into());
        map.insert("$type".to_string(), self.entity_type.clone().into());
        for (name, value) in &self.fields {
            map.insert(name.clone(), value.to_json());
        }
        serde_json::Value::Object(map)
    }
}

// =============================================================================
// PER-FIELD OUTCOMES
// =============================================================================

/// A reference field that could not be resolved.
///
/// Recorded on `Resolved::errors`; the entity is still returned.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldError {
    /// Field path (`topics`, or `topics[1].posts` for nested children).
    pub field: String,
    /// Human-readable failure.
    pub error: String,
}

impl FieldError {
    /// Create a new field error.
    #[must_use]
    pub fn new(field: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            error: error.into(),
        }
    }

    /// Prefix the field path, used when a child's errors bubble up.
    #[must_use]
    pub fn nested(self, prefix: &str) -> Self {
        Self {
            field: format!("{}.{}", prefix, self.field),
            error: self.error,
        }
    }
}

/// Kind of a non-error annotation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NoteKind {
    /// AI generation failed and a placeholder was substituted.
    GenerationFallback,
    /// A fuzzy search found nothing at or above the threshold.
    LowConfidence,
    /// A child was not generated because the depth bound was reached.
    DepthLimit,
    /// A search failed and the resolver degraded to generation.
    SearchDegraded,
}

/// A non-fatal annotation on a resolved entity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldNote {
    /// Field path the note refers to.
    pub field: String,
    /// What happened.
    pub kind: NoteKind,
    /// Details.
    pub message: String,
}

impl FieldNote {
    /// Create a new note.
    #[must_use]
    pub fn new(field: impl Into<String>, kind: NoteKind, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            kind,
            message: message.into(),
        }
    }

    /// Prefix the field path.
    #[must_use]
    pub fn nested(self, prefix: &str) -> Self {
        Self {
            field: format!("{}.{}", prefix, self.field),
            ..self
        }
    }
}

// =============================================================================
// ERROR TYPES
// =============================================================================

/// Errors that can occur in the Weave engine.
///
/// - `SchemaValidation` and `SchemaCycle` are fatal and raised before any side effect
/// - `FieldResolution` is per field; the pipeline records it instead of returning it
/// - Provider, generation and timeout errors are converted to field errors by the pipeline
#[derive(Debug, Clone, Error, PartialEq)]
pub enum WeaveError {
    /// The schema is malformed or references undeclared types.
    #[error("Schema validation failed for {entity}.{field}: {message}")]
    SchemaValidation {
        entity: String,
        field: String,
        message: String,
    },

    /// Required forward-exact relations form a cycle.
    #[error("Schema cycle among forward-exact relations: {}", cycle.join(" -> "))]
    SchemaCycle { cycle: Vec<String> },

    /// A single reference field could not be resolved.
    #[error("Cannot resolve field {field}: {message}")]
    FieldResolution { field: String, message: String },

    /// The requested entity type is not declared in the schema.
    #[error("Unknown entity type: {0}")]
    UnknownEntityType(String),

    /// Input data does not fit the schema.
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// The data or semantic provider failed.
    #[error("Provider error: {0}")]
    Provider(String),

    /// The value generation provider failed or returned malformed output.
    #[error("Generation error: {0}")]
    Generation(String),

    /// A provider call exceeded its time budget.
    #[error("Timed out after {0} ms")]
    Timeout(u64),

    /// An entity referenced by id does not exist.
    #[error("Entity not found: {entity_type} {id}")]
    NotFound { entity_type: String, id: EntityId },

    /// A serialization or deserialization error occurred.
    #[error("Serialization error: {0}")]
    SerializationError(String),

    /// An I/O error occurred.
    #[error("I/O error: {0}")]
    IoError(String),

    /// Configuration could not be loaded.
    #[error("Configuration error: {0}")]
    Config(String),
}

impl WeaveError {
    /// Shorthand for a schema validation error.
    pub(crate) fn schema(
        entity: impl Into<String>,
        field: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self::SchemaValidation {
            entity: entity.into(),
            field: field.into(),
            message: message.into(),
        }
    }

    /// Check whether the error must stop a cascade before any generation.
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::SchemaValidation { .. } | Self::SchemaCycle { .. } | Self::UnknownEntityType(_)
        )
    }
}

impl From<serde_json::Error> for WeaveError {
    fn from(e: serde_json::Error) -> Self {
        Self::SerializationError(e.to_string())
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Entity {
        let mut fields = FieldMap::new();
        fields.insert("title".to_string(), FieldValue::text("Rust in Practice"));
        fields.insert("views".to_string(), FieldValue::Scalar(42.into()));
        fields.insert("summary".to_string(), FieldValue::text("Ownership explained"));
        fields.insert(
            "author".to_string(),
            FieldValue::Ref(EntityRef::new("Author", EntityId::new("a1"))),
        );
        Entity::new("Post", EntityId::new("p1"), fields)
    }

    #[test]
    fn searchable_text_joins_string_scalars_in_field_order() {
        let entity = sample();
        assert_eq!(entity.searchable_text(), "Ownership explained Rust in Practice");
    }

    #[test]
    fn points_at_checks_single_and_array_refs() {
        let single = FieldValue::Ref(EntityRef::new("A", EntityId::new("1")));
        let many = FieldValue::Refs(vec![
            EntityRef::new("A", EntityId::new("1")),
            EntityRef::new("A", EntityId::new("2")),
        ]);

        assert!(single.points_at(&EntityId::new("1")));
        assert!(!single.points_at(&EntityId::new("2")));
        assert!(many.points_at(&EntityId::new("2")));
        assert!(!FieldValue::text("1").points_at(&EntityId::new("1")));
    }

    #[test]
    fn entity_json_renders_refs() {
        let json = sample().to_json();
        assert_eq!(json["$id"], "p1");
        assert_eq!(json["$type"], "Post");
        assert_eq!(json["author"]["$ref"], "a1");
        assert_eq!(json["views"], 42);
    }

    #[test]
    fn from_json_reads_rendered_refs() {
        let single = serde_json::json!({ "$ref": "a1", "$type": "Author" });
        assert_eq!(
            FieldValue::from_json(&single),
            FieldValue::Ref(EntityRef::new("Author", EntityId::new("a1")))
        );

        let many = serde_json::json!([{ "$ref": "t1", "$type": "Tag" }]);
        assert!(matches!(FieldValue::from_json(&many), FieldValue::Refs(ref r) if r.len() == 1));

        let doc = serde_json::json!({ "$ref": "x" });
        assert!(matches!(FieldValue::from_json(&doc), FieldValue::Scalar(_)));
        assert!(matches!(FieldValue::from_json(&serde_json::json!([])), FieldValue::Scalar(_)));
    }

    #[test]
    fn nested_error_prefixes_path() {
        let err = FieldError::new("posts", "boom").nested("topics[1]");
        assert_eq!(err.field, "topics[1].posts");
    }

    #[test]
    fn fatal_classification() {
        assert!(WeaveError::SchemaCycle { cycle: vec![] }.is_fatal());
        assert!(WeaveError::schema("A", "b", "bad").is_fatal());
        assert!(!WeaveError::Provider("down".into()).is_fatal());
    }
}
