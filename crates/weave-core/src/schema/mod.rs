//! # Schema Parser
//!
//! Turns a raw schema document (entity name -> field name -> definition string)
//! into a `ParsedSchema`.
//!
//! - Declaration order of entities and fields is preserved
//! - Relations are typed: a closed `Operator` enum, never raw strings
//! - Every related type is validated against the declared entities
//! - Backrefs are derived when not explicit; collisions are rejected
//!
//! Parsing is the only place schema errors are raised. Nothing downstream
//! re-validates, so a `ParsedSchema` is safe to hand to the cascade.

mod definition;
mod naming;

pub use definition::KNOWN_SCALARS;
pub use naming::{lower_camel, pluralize};

use crate::WeaveError;
use crate::template;
use definition::{Definition, DefinitionKind};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

// =============================================================================
// OPERATORS
// =============================================================================

/// The four relationship operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operator {
    /// `->` creates an owned child.
    ForwardExact,
    /// `~>` links an existing match or creates one.
    ForwardFuzzy,
    /// `<-` queries entities whose backref points here.
    BackwardExact,
    /// `<~` grounds against existing entities; never creates.
    BackwardFuzzy,
}

/// Which way a relation points.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Forward,
    Backward,
}

/// How a relation matches.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchMode {
    Exact,
    Fuzzy,
}

impl Operator {
    /// Parse an operator token.
    #[must_use]
    pub fn from_symbol(symbol: &str) -> Option<Self> {
        match symbol {
            "->" => Some(Self::ForwardExact),
            "~>" => Some(Self::ForwardFuzzy),
            "<-" => Some(Self::BackwardExact),
            "<~" => Some(Self::BackwardFuzzy),
            _ => None,
        }
    }

    /// The operator token.
    #[must_use]
    pub const fn symbol(self) -> &'static str {
        match self {
            Self::ForwardExact => "->",
            Self::ForwardFuzzy => "~>",
            Self::BackwardExact => "<-",
            Self::BackwardFuzzy => "<~",
        }
    }

    #[must_use]
    pub const fn direction(self) -> Direction {
        match self {
            Self::ForwardExact | Self::ForwardFuzzy => Direction::Forward,
            Self::BackwardExact | Self::BackwardFuzzy => Direction::Backward,
        }
    }

    #[must_use]
    pub const fn match_mode(self) -> MatchMode {
        match self {
            Self::ForwardExact | Self::BackwardExact => MatchMode::Exact,
            Self::ForwardFuzzy | Self::BackwardFuzzy => MatchMode::Fuzzy,
        }
    }

    /// Whether resolving this operator may create entities.
    #[must_use]
    pub const fn may_generate(self) -> bool {
        matches!(self, Self::ForwardExact | Self::ForwardFuzzy)
    }
}

// =============================================================================
// RELATED TYPE
// =============================================================================

/// The target of a relation: one entity type or an ordered union.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RelatedType {
    Single(String),
    Union(Vec<String>),
}

impl RelatedType {
    fn from_targets(mut targets: Vec<String>) -> Self {
        if targets.len() == 1 {
            Self::Single(targets.remove(0))
        } else {
            Self::Union(targets)
        }
    }

    /// Candidate type names in declaration order.
    #[must_use]
    pub fn candidates(&self) -> Vec<&str> {
        match self {
            Self::Single(name) => vec![name.as_str()],
            Self::Union(names) => names.iter().map(String::as_str).collect(),
        }
    }

    /// The first candidate; the type generated when a union must create.
    #[must_use]
    pub fn primary(&self) -> &str {
        match self {
            Self::Single(name) => name,
            Self::Union(names) => names.first().map(String::as_str).unwrap_or_default(),
        }
    }

    #[must_use]
    pub fn is_union(&self) -> bool {
        matches!(self, Self::Union(_))
    }
}

// =============================================================================
// PARSED FIELD / ENTITY / SCHEMA
// =============================================================================

/// A normalized field descriptor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParsedField {
    pub name: String,
    pub is_array: bool,
    pub is_optional: bool,
    pub is_relation: bool,
    /// Absent for scalar fields.
    pub operator: Option<Operator>,
    /// Absent for scalar fields.
    pub related_type: Option<RelatedType>,
    /// Inverse field name on the related type (derived when not explicit).
    pub backref: Option<String>,
    /// Field-level fuzzy threshold.
    pub threshold: Option<f32>,
    /// Natural-language generation hint.
    pub prompt: Option<String>,
    /// Declared scalar type (`string`, `number`, ...). Absent for relations.
    pub scalar_type: Option<String>,
}

impl ParsedField {
    /// The operator and target of a relation field.
    #[must_use]
    pub fn relation(&self) -> Option<(Operator, &RelatedType)> {
        Some((self.operator?, self.related_type.as_ref()?))
    }

    /// The declared type name used by value generators.
    #[must_use]
    pub fn declared_type(&self) -> &str {
        match (&self.scalar_type, &self.related_type) {
            (Some(t), _) => t,
            (None, Some(rt)) => rt.primary(),
            (None, None) => "string",
        }
    }

    /// Other fields this field's prompt refers to as `{name}`.
    #[must_use]
    pub fn template_refs(&self) -> Vec<String> {
        self.prompt
            .as_deref()
            .map(template::placeholders)
            .unwrap_or_default()
    }
}

/// A parsed entity type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParsedEntity {
    pub name: String,
    /// Fields in declaration order.
    pub fields: Vec<ParsedField>,
    /// `$fuzzyThreshold`
    pub fuzzy_threshold: Option<f32>,
    /// `$instructions`
    pub instructions: Option<String>,
    /// `$context`: field names (own, or `parent.`-prefixed) passed to generators.
    pub context: Vec<String>,
    /// `$seed`
    pub seed: Option<u64>,
}

impl ParsedEntity {
    /// Look up a field by name.
    #[must_use]
    pub fn field(&self, name: &str) -> Option<&ParsedField> {
        self.fields.iter().find(|f| f.name == name)
    }

    /// Relation fields in declaration order.
    pub fn relations(&self) -> impl Iterator<Item = &ParsedField> {
        self.fields.iter().filter(|f| f.is_relation)
    }

    /// Scalar fields in declaration order.
    pub fn scalars(&self) -> impl Iterator<Item = &ParsedField> {
        self.fields.iter().filter(|f| !f.is_relation)
    }

    /// Scalar fields ordered so that a field comes after the fields its prompt
    /// references. A reference cycle is cut where it closes.
    #[must_use]
    pub fn scalar_generation_order(&self) -> Vec<&ParsedField> {
        let scalars: Vec<&ParsedField> = self.scalars().collect();
        let mut done: BTreeSet<&str> = BTreeSet::new();
        let mut visiting: BTreeSet<&str> = BTreeSet::new();
        let mut order = Vec::with_capacity(scalars.len());

        fn visit<'a>(
            field: &'a ParsedField,
            scalars: &[&'a ParsedField],
            done: &mut BTreeSet<&'a str>,
            visiting: &mut BTreeSet<&'a str>,
            order: &mut Vec<&'a ParsedField>,
        ) {
            if done.contains(field.name.as_str()) || !visiting.insert(field.name.as_str()) {
                return;
            }
            for dep in field.template_refs() {
                if let Some(dep_field) = scalars.iter().find(|f| f.name == dep) {
                    visit(dep_field, scalars, done, visiting, order);
                }
            }
            visiting.remove(field.name.as_str());
            done.insert(field.name.as_str());
            order.push(field);
        }

        for field in &scalars {
            visit(field, &scalars, &mut done, &mut visiting, &mut order);
        }
        order
    }
}

/// An ordered set of parsed entity types.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ParsedSchema {
    entities: Vec<ParsedEntity>,
    #[serde(skip)]
    index: BTreeMap<String, usize>,
}

impl ParsedSchema {
    /// Parse a raw schema document.
    pub fn parse(raw: &serde_json::Value) -> Result<Self, WeaveError> {
        parse_schema(raw)
    }

    /// Parse a JSON schema document.
    pub fn from_json_str(json: &str) -> Result<Self, WeaveError> {
        let raw: serde_json::Value = serde_json::from_str(json)?;
        parse_schema(&raw)
    }

    /// Look up an entity type.
    #[must_use]
    pub fn entity(&self, name: &str) -> Option<&ParsedEntity> {
        self.index.get(name).and_then(|&i| self.entities.get(i))
    }

    /// Look up an entity type or fail with `UnknownEntityType`.
    pub fn require(&self, name: &str) -> Result<&ParsedEntity, WeaveError> {
        self.entity(name)
            .ok_or_else(|| WeaveError::UnknownEntityType(name.to_string()))
    }

    /// Entity types in declaration order.
    #[must_use]
    pub fn entities(&self) -> &[ParsedEntity] {
        &self.entities
    }

    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.index.contains_key(name)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entities.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    /// Effective fuzzy threshold for matching `candidate` through `field` of `source`.
    ///
    /// Precedence: field > call override > source `$fuzzyThreshold`
    /// > candidate `$fuzzyThreshold` > global default.
    #[must_use]
    pub fn threshold_for(
        &self,
        source: &ParsedEntity,
        field: &ParsedField,
        candidate: &str,
        call_override: Option<f32>,
    ) -> f32 {
        field
            .threshold
            .or(call_override)
            .or(source.fuzzy_threshold)
            .or_else(|| self.entity(candidate).and_then(|e| e.fuzzy_threshold))
            .unwrap_or(crate::primitives::DEFAULT_FUZZY_THRESHOLD)
    }
}

// =============================================================================
// PARSING
// =============================================================================

/// Parse a raw schema document into a `ParsedSchema`.
///
/// Fails with `SchemaValidation` on malformed definitions, undeclared related
/// types, bad `$` keys, or colliding backrefs.
pub fn parse_schema(raw: &serde_json::Value) -> Result<ParsedSchema, WeaveError> {
    let root = raw
        .as_object()
        .ok_or_else(|| WeaveError::schema("$schema", "$root", "schema must be an object"))?;

    let declared: BTreeSet<&str> = root.keys().map(String::as_str).collect();
    let is_declared = |name: &str| declared.contains(name);

    let mut entities = Vec::with_capacity(root.len());
    for (entity_name, body) in root {
        if !naming::is_identifier(entity_name) {
            return Err(WeaveError::schema(
                entity_name,
                "$name",
                "entity names must be identifiers",
            ));
        }
        let body = body.as_object().ok_or_else(|| {
            WeaveError::schema(entity_name, "$body", "entity definition must be an object")
        })?;
        entities.push(parse_entity(entity_name, body, &is_declared)?);
    }

    derive_backrefs(&mut entities)?;
    check_backref_collisions(&entities)?;

    let index = entities
        .iter()
        .enumerate()
        .map(|(i, e)| (e.name.clone(), i))
        .collect();

    tracing::debug!(entities = entities.len(), "schema parsed");
    Ok(ParsedSchema { entities, index })
}

fn parse_entity(
    name: &str,
    body: &serde_json::Map<String, serde_json::Value>,
    is_declared: &dyn Fn(&str) -> bool,
) -> Result<ParsedEntity, WeaveError> {
    let mut entity = ParsedEntity {
        name: name.to_string(),
        fields: Vec::new(),
        fuzzy_threshold: None,
        instructions: None,
        context: Vec::new(),
        seed: None,
    };

    for (key, value) in body {
        if let Some(reserved) = key.strip_prefix('$') {
            apply_reserved(&mut entity, reserved, value)?;
            continue;
        }
        if !naming::is_identifier(key) {
            return Err(WeaveError::schema(name, key, "field names must be identifiers"));
        }
        let (raw, forced_array) = match value {
            serde_json::Value::String(s) => (s.as_str(), false),
            serde_json::Value::Array(items) => match items.as_slice() {
                [serde_json::Value::String(s)] => (s.as_str(), true),
                _ => {
                    return Err(WeaveError::schema(
                        name,
                        key,
                        "array definitions must hold exactly one definition string",
                    ));
                }
            },
            _ => {
                return Err(WeaveError::schema(
                    name,
                    key,
                    "field definitions must be strings",
                ));
            }
        };

        let def = definition::parse(raw, is_declared).map_err(|m| WeaveError::schema(name, key, m))?;
        entity.fields.push(into_field(key, def, forced_array));
    }

    for ctx_field in &entity.context {
        if ctx_field.starts_with("parent.") {
            continue;
        }
        if entity.field(ctx_field).is_none() {
            return Err(WeaveError::schema(
                name,
                "$context",
                format!("unknown context field '{}'", ctx_field),
            ));
        }
    }

    Ok(entity)
}

fn apply_reserved(
    entity: &mut ParsedEntity,
    key: &str,
    value: &serde_json::Value,
) -> Result<(), WeaveError> {
    let field = format!("${}", key);
    match key {
        "fuzzyThreshold" => {
            let t = value
                .as_f64()
                .filter(|t| (0.0..=1.0).contains(t))
                .ok_or_else(|| {
                    WeaveError::schema(&entity.name, &field, "must be a number in [0, 1]")
                })?;
            entity.fuzzy_threshold = Some(t as f32);
        }
        "instructions" => {
            let text = value
                .as_str()
                .ok_or_else(|| WeaveError::schema(&entity.name, &field, "must be a string"))?;
            entity.instructions = Some(text.to_string());
        }
        "context" => {
            entity.context = match value {
                serde_json::Value::String(s) => vec![s.clone()],
                serde_json::Value::Array(items) => items
                    .iter()
                    .map(|v| v.as_str().map(str::to_string))
                    .collect::<Option<Vec<_>>>()
                    .ok_or_else(|| {
                        WeaveError::schema(&entity.name, &field, "must list field names")
                    })?,
                _ => {
                    return Err(WeaveError::schema(
                        &entity.name,
                        &field,
                        "must be a string or an array of strings",
                    ));
                }
            };
        }
        "seed" => {
            let seed = value.as_u64().ok_or_else(|| {
                WeaveError::schema(&entity.name, &field, "must be an unsigned integer")
            })?;
            entity.seed = Some(seed);
        }
        _ => {
            return Err(WeaveError::schema(
                &entity.name,
                &field,
                "unknown reserved key",
            ));
        }
    }
    Ok(())
}

fn into_field(name: &str, def: Definition, forced_array: bool) -> ParsedField {
    let is_array = def.is_array || forced_array;
    match def.kind {
        DefinitionKind::Relation {
            operator,
            targets,
            backref,
            threshold,
            prompt,
        } => ParsedField {
            name: name.to_string(),
            is_array,
            is_optional: def.is_optional,
            is_relation: true,
            operator: Some(operator),
            related_type: Some(RelatedType::from_targets(targets)),
            backref,
            threshold,
            prompt,
            scalar_type: None,
        },
        DefinitionKind::Scalar {
            scalar_type,
            prompt,
        } => ParsedField {
            name: name.to_string(),
            is_array,
            is_optional: def.is_optional,
            is_relation: false,
            operator: None,
            related_type: None,
            backref: None,
            threshold: None,
            prompt,
            scalar_type: Some(scalar_type),
        },
    }
}

/// Fill in missing backrefs.
///
/// Forward-exact children belong to one parent: singular source name.
/// A backward relation reuses the related type's own forward field that points
/// back at the source, when there is one. Everything else may be shared:
/// pluralized source name.
fn derive_backrefs(entities: &mut [ParsedEntity]) -> Result<(), WeaveError> {
    let mut pointing: BTreeMap<(String, String), String> = BTreeMap::new();
    for entity in entities.iter() {
        for field in entity.relations() {
            let Some((operator, related)) = field.relation() else {
                continue;
            };
            if operator.direction() != Direction::Forward {
                continue;
            }
            for target in related.candidates() {
                pointing
                    .entry((entity.name.clone(), target.to_string()))
                    .or_insert_with(|| field.name.clone());
            }
        }
    }

    for entity in entities.iter_mut() {
        let base = lower_camel(&entity.name);
        for field in entity.fields.iter_mut().filter(|f| f.is_relation) {
            if field.backref.is_some() {
                continue;
            }
            let (operator, related) = field.relation().ok_or_else(|| {
                WeaveError::schema(&entity.name, &field.name, "relation without operator")
            })?;
            let derived = match operator {
                Operator::ForwardExact => base.clone(),
                Operator::BackwardExact | Operator::BackwardFuzzy => pointing
                    .get(&(related.primary().to_string(), entity.name.clone()))
                    .cloned()
                    .unwrap_or_else(|| pluralize(&base)),
                Operator::ForwardFuzzy => pluralize(&base),
            };
            field.backref = Some(derived);
        }
    }
    Ok(())
}

/// Two forward relations may not write the same backref onto the same type,
/// and a backref may not overwrite a scalar field of the related type.
fn check_backref_collisions(entities: &[ParsedEntity]) -> Result<(), WeaveError> {
    let mut claimed: BTreeMap<(String, String), (String, String)> = BTreeMap::new();

    for entity in entities {
        for field in entity.relations() {
            let Some((operator, related)) = field.relation() else {
                continue;
            };
            if operator.direction() != Direction::Forward {
                continue;
            }
            let Some(backref) = field.backref.as_deref() else {
                continue;
            };

            for target in related.candidates() {
                let target_scalar = entities
                    .iter()
                    .find(|e| e.name == target)
                    .and_then(|e| e.field(backref))
                    .is_some_and(|f| !f.is_relation);
                if target_scalar {
                    return Err(WeaveError::schema(
                        &entity.name,
                        &field.name,
                        format!("backref '{}' collides with scalar field {}.{}", backref, target, backref),
                    ));
                }

                let key = (target.to_string(), backref.to_string());
                if let Some((other_entity, other_field)) = claimed.get(&key) {
                    return Err(WeaveError::schema(
                        &entity.name,
                        &field.name,
                        format!(
                            "backref '{}.{}' is also produced by {}.{}; declare an explicit backref",
                            target, backref, other_entity, other_field
                        ),
                    ));
                }
                claimed.insert(key, (entity.name.clone(), field.name.clone()));
            }
        }
    }
    Ok(())
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn blog_schema() -> ParsedSchema {
        parse_schema(&json!({
            "Blog": { "title": "string", "topics": "[Topic.blog]" },
            "Topic": { "name": "string", "posts": "->Post" },
            "Post": { "title": "string", "category": "~>Category?" },
            "Category": { "name": "string", "$fuzzyThreshold": 0.8 }
        }))
        .expect("parse")
    }

    #[test]
    fn declaration_order_is_preserved() {
        let schema = blog_schema();
        let names: Vec<_> = schema.entities().iter().map(|e| e.name.as_str()).collect();
        assert_eq!(names, vec!["Blog", "Topic", "Post", "Category"]);

        let blog = schema.entity("Blog").expect("blog");
        let fields: Vec<_> = blog.fields.iter().map(|f| f.name.as_str()).collect();
        assert_eq!(fields, vec!["title", "topics"]);
    }

    #[test]
    fn relation_fields_are_normalized() {
        let schema = blog_schema();
        let topics = schema
            .entity("Blog")
            .and_then(|e| e.field("topics"))
            .expect("topics");

        assert!(topics.is_relation && topics.is_array && !topics.is_optional);
        assert_eq!(topics.operator, Some(Operator::ForwardExact));
        assert_eq!(topics.related_type, Some(RelatedType::Single("Topic".into())));
        assert_eq!(topics.backref.as_deref(), Some("blog"));
    }

    #[test]
    fn backrefs_are_derived() {
        let schema = blog_schema();
        let posts = schema
            .entity("Topic")
            .and_then(|e| e.field("posts"))
            .expect("posts");
        assert_eq!(posts.backref.as_deref(), Some("topic"));

        let category = schema
            .entity("Post")
            .and_then(|e| e.field("category"))
            .expect("category");
        assert_eq!(category.backref.as_deref(), Some("posts"));
    }

    #[test]
    fn backward_backref_reuses_pointing_field() {
        let schema = parse_schema(&json!({
            "Post": { "title": "string", "comments": "<-Comment", "likes": "<-Like" },
            "Comment": { "body": "string", "post": "~>Post.discussion" },
            "Like": { "count": "number" }
        }))
        .expect("parse");
        let post = schema.entity("Post").expect("post");
        assert_eq!(
            post.field("comments").and_then(|f| f.backref.as_deref()),
            Some("post")
        );
        assert_eq!(
            post.field("likes").and_then(|f| f.backref.as_deref()),
            Some("posts")
        );
    }

    #[test]
    fn threshold_precedence() {
        let schema = parse_schema(&json!({
            "Post": {
                "$fuzzyThreshold": 0.6,
                "strict": "~>Tag(0.9)",
                "loose": "~>Tag"
            },
            "Note": { "tag": "~>Tag" },
            "Tag": { "name": "string", "$fuzzyThreshold": 0.75 },
            "Plain": { "name": "string" },
            "Link": { "plain": "~>Plain" }
        }))
        .expect("parse");

        let post = schema.entity("Post").expect("post");
        let note = schema.entity("Note").expect("note");
        let link = schema.entity("Link").expect("link");
        let field = |e: &ParsedEntity, f: &str| e.field(f).cloned().expect("field");

        assert_eq!(schema.threshold_for(post, &field(post, "strict"), "Tag", None), 0.9);
        assert_eq!(schema.threshold_for(post, &field(post, "loose"), "Tag", None), 0.6);
        assert_eq!(schema.threshold_for(note, &field(note, "tag"), "Tag", None), 0.75);
        assert_eq!(schema.threshold_for(link, &field(link, "plain"), "Plain", Some(0.5)), 0.5);

        // A call override beats both entity thresholds but not a field threshold.
        assert_eq!(schema.threshold_for(post, &field(post, "loose"), "Tag", Some(0.4)), 0.4);
        assert_eq!(schema.threshold_for(note, &field(note, "tag"), "Tag", Some(0.4)), 0.4);
        assert_eq!(schema.threshold_for(post, &field(post, "strict"), "Tag", Some(0.4)), 0.9);
        assert_eq!(
            schema.threshold_for(link, &field(link, "plain"), "Plain", None),
            crate::primitives::DEFAULT_FUZZY_THRESHOLD
        );
    }

    #[test]
    fn undeclared_related_type_is_rejected() {
        let err = parse_schema(&json!({ "Post": { "author": "->Author" } })).expect_err("fail");
        assert!(matches!(err, WeaveError::SchemaValidation { ref field, .. } if field == "author"));
    }

    #[test]
    fn colliding_backrefs_are_rejected() {
        let err = parse_schema(&json!({
            "Post": { "author": "~>Person", "editor": "~>Person" },
            "Person": { "name": "string" }
        }))
        .expect_err("collision");
        assert!(matches!(err, WeaveError::SchemaValidation { ref message, .. } if message.contains("posts")));

        parse_schema(&json!({
            "Post": { "author": "~>Person.authored", "editor": "~>Person.edited" },
            "Person": { "name": "string" }
        }))
        .expect("explicit backrefs resolve the collision");
    }

    #[test]
    fn backref_onto_scalar_is_rejected() {
        let err = parse_schema(&json!({
            "Topic": { "posts": "->Post" },
            "Post": { "topic": "string" }
        }))
        .expect_err("scalar collision");
        assert!(err.is_fatal());
    }

    #[test]
    fn reserved_keys_are_parsed() {
        let schema = parse_schema(&json!({
            "Post": {
                "$instructions": "Write for {audience}",
                "$context": ["audience", "parent.name"],
                "$seed": 7,
                "audience": "string",
                "body": "Write the body for {audience}"
            }
        }))
        .expect("parse");
        let post = schema.entity("Post").expect("post");
        assert_eq!(post.seed, Some(7));
        assert_eq!(post.context, vec!["audience", "parent.name"]);
        assert_eq!(post.instructions.as_deref(), Some("Write for {audience}"));
    }

    #[test]
    fn bad_reserved_keys_are_rejected() {
        assert!(parse_schema(&json!({ "A": { "$fuzzyThreshold": 2.0 } })).is_err());
        assert!(parse_schema(&json!({ "A": { "$color": "red" } })).is_err());
        assert!(parse_schema(&json!({ "A": { "$context": ["missing"] } })).is_err());
        assert!(parse_schema(&json!({ "A": { "$seed": -1 } })).is_err());
    }

    #[test]
    fn one_element_array_definition_is_array() {
        let schema = parse_schema(&json!({ "Post": { "tags": ["string"] } })).expect("parse");
        let tags = schema
            .entity("Post")
            .and_then(|e| e.field("tags"))
            .expect("tags");
        assert!(tags.is_array && !tags.is_relation);
    }

    #[test]
    fn scalar_generation_order_follows_template_refs() {
        let schema = parse_schema(&json!({
            "Post": {
                "summary": "Summarize {body} in one line",
                "body": "Write about {title}",
                "title": "string"
            }
        }))
        .expect("parse");
        let order: Vec<_> = schema
            .entity("Post")
            .expect("post")
            .scalar_generation_order()
            .into_iter()
            .map(|f| f.name.as_str())
            .collect();
        assert_eq!(order, vec!["title", "body", "summary"]);
    }

    #[test]
    fn cyclic_template_refs_terminate() {
        let schema = parse_schema(&json!({
            "Post": { "a": "Mention {b} here", "b": "Mention {a} here" }
        }))
        .expect("parse");
        let order: Vec<_> = schema
            .entity("Post")
            .expect("post")
            .scalar_generation_order()
            .into_iter()
            .map(|f| f.name.as_str())
            .collect();
        assert_eq!(order, vec!["b", "a"]);
    }
}
