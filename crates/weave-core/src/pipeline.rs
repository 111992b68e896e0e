//! # Draft/Resolve Pipeline
//!
//! Turns a `Draft` into a stored entity:
//!
//! 1. Generate pending scalars (prompt dependencies first)
//! 2. Point the backref at the parent, when there is one
//! 3. Store the shell so children can point at it
//! 4. Resolve relation fields wave by wave; fields in a wave run concurrently
//! 5. Write the relation values back with one update
//!
//! A failing field becomes a `FieldError`; the entity is still returned.

use crate::context::{CascadeContext, ProgressKind, Scope};
use crate::draft::{Draft, ReferenceSpec};
use crate::generator::{GenerationMetadata, GenerationRequest};
use crate::resolver::{ReferenceResult, resolve_reference};
use crate::schema::{Direction, Operator, ParsedEntity};
use crate::template;
use crate::{
    Entity, EntityId, EntityRef, FieldError, FieldMap, FieldNote, FieldValue, NoteKind, WeaveError,
};
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::future::Future;
use std::pin::Pin;
use tokio::task::{self, JoinSet};

/// Field name used for errors about the entity itself.
pub const SELF_FIELD: &str = "$self";

/// A resolved entity and everything that happened on the way.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Resolved {
    pub entity: Entity,
    /// Per-field failures, including those of generated descendants.
    pub errors: Vec<FieldError>,
    pub notes: Vec<FieldNote>,
    /// How each generated scalar was produced.
    pub generation: BTreeMap<String, GenerationMetadata>,
    /// Every entity created by this call, this one first.
    pub created: Vec<EntityRef>,
    /// The entity was written to the data provider.
    pub stored: bool,
}

impl Resolved {
    /// No field failed anywhere in the cascade.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.stored && self.errors.is_empty()
    }

    /// Summary for callers and the CLI.
    #[must_use]
    pub fn to_json(&self) -> serde_json::Value {
        serde_json::json!({
            "entity": self.entity.to_json(),
            "errors": self.errors,
            "notes": self.notes,
            "generation": self.generation,
            "created": self.created,
        })
    }
}

pub(crate) type ResolveFuture<'a> = Pin<Box<dyn Future<Output = Result<Resolved, WeaveError>> + Send + 'a>>;

/// Boxed entry point for recursion from the resolver.
pub(crate) fn resolve_boxed<'a>(ctx: &'a CascadeContext, draft: Draft, scope: Scope) -> ResolveFuture<'a> {
    Box::pin(resolve_draft(ctx, draft, scope))
}

/// Resolve one draft at `scope`.
///
/// Only an unknown entity type is returned as `Err`.
pub(crate) async fn resolve_draft(
    ctx: &CascadeContext,
    draft: Draft,
    scope: Scope,
) -> Result<Resolved, WeaveError> {
    let def = ctx.schema.require(&draft.entity_type)?;
    ctx.emit(ProgressKind::Drafted, &draft.entity_type, draft.id.as_ref(), &scope);

    let mut errors = draft.errors.clone();
    let mut notes = Vec::new();
    let mut generation = BTreeMap::new();
    let mut values = draft.values.clone();

    // 1. scalars
    generate_scalars(ctx, def, &draft, &scope, &mut values, &mut generation, &mut notes, &mut errors)
        .await;

    // 2. backref
    let backref = scope
        .parent
        .as_ref()
        .and_then(|p| p.backref.as_deref().map(|field| (p, field)));
    if let Some((parent, field)) = backref {
        let parent_ref = parent.entity.to_ref();
        let value = match def.field(field) {
            Some(f) if f.is_array => FieldValue::Refs(vec![parent_ref]),
            Some(_) => FieldValue::Ref(parent_ref),
            None if parent.operator == Operator::ForwardExact => FieldValue::Ref(parent_ref),
            None => FieldValue::Refs(vec![parent_ref]),
        };
        values.insert(field.to_string(), value);
    }

    // 3. shell
    let id = match &draft.id {
        Some(id) => Some(id.clone()),
        None => ctx
            .seed_for(def)
            .map(|seed| derive_id(seed, &draft, &scope)),
    };
    let entity = match store_shell(ctx, &draft.entity_type, id.as_ref(), values.clone()).await {
        Ok(entity) => entity,
        Err(e) => {
            tracing::warn!(entity_type = %draft.entity_type, error = %e, "entity shell not stored");
            errors.push(FieldError::new(SELF_FIELD, e.to_string()));
            for spec in &draft.refs {
                errors.push(FieldError::new(&spec.field, "not resolved: entity was not stored"));
            }
            return Ok(Resolved {
                entity: Entity::new(&draft.entity_type, id.unwrap_or_else(|| EntityId::new("")), values),
                errors,
                notes,
                generation,
                created: Vec::new(),
                stored: false,
            });
        }
    };
    ctx.emit(ProgressKind::Created, &entity.entity_type, Some(&entity.id), &scope);
    let mut created = vec![entity.to_ref()];
    let mut entity = entity;

    // 4. relation waves
    let skip = backref.map(|(_, field)| field);
    let mut waves: BTreeMap<usize, Vec<(usize, ReferenceSpec)>> = BTreeMap::new();
    for (index, spec) in draft.refs.iter().enumerate() {
        if skip == Some(spec.field.as_str()) && !spec.provided {
            continue;
        }
        waves.entry(wave_of(ctx, spec)).or_default().push((index, spec.clone()));
    }

    let mut relation_values = FieldMap::new();
    for (rank, wave) in waves {
        tracing::trace!(entity_type = %entity.entity_type, rank, fields = wave.len(), "resolving wave");
        let results = run_wave(ctx, &entity, wave, &scope).await;
        for (spec, result) in results {
            match result {
                Ok(result) => {
                    let value = if spec.is_array {
                        Some(FieldValue::Refs(result.refs()))
                    } else {
                        result.refs().into_iter().next().map(FieldValue::Ref)
                    };
                    if let Some(value) = value {
                        entity.fields.insert(spec.field.clone(), value.clone());
                        relation_values.insert(spec.field.clone(), value);
                    }
                    notes.extend(result.notes);
                    errors.extend(result.errors);
                    created.extend(result.created);
                }
                Err(e) => {
                    tracing::warn!(
                        entity_type = %entity.entity_type,
                        field = %spec.field,
                        error = %e,
                        "field not resolved"
                    );
                    errors.push(FieldError::new(&spec.field, e.to_string()));
                }
            }
        }
    }

    // 5. write back
    if !relation_values.is_empty() {
        match ctx
            .data
            .update(&entity.entity_type, &entity.id, relation_values)
            .await
        {
            Ok(updated) => entity = updated,
            Err(e) => errors.push(FieldError::new(SELF_FIELD, e.to_string())),
        }
    }
    ctx.emit(ProgressKind::Resolved, &entity.entity_type, Some(&entity.id), &scope);

    Ok(Resolved {
        entity,
        errors,
        notes,
        generation,
        created,
        stored: true,
    })
}

/// Wave of a relation field: the earliest generation rank among its
/// candidates. Backward fields run last, after forward children exist.
fn wave_of(ctx: &CascadeContext, spec: &ReferenceSpec) -> usize {
    if spec.operator.direction() == Direction::Backward {
        return usize::MAX;
    }
    spec.related_type
        .candidates()
        .into_iter()
        .map(|t| ctx.order.rank(t))
        .min()
        .unwrap_or(usize::MAX)
}

async fn run_wave(
    ctx: &CascadeContext,
    source: &Entity,
    wave: Vec<(usize, ReferenceSpec)>,
    scope: &Scope,
) -> Vec<(ReferenceSpec, Result<ReferenceResult, WeaveError>)> {
    if wave.len() == 1 {
        let mut out = Vec::with_capacity(1);
        for (_, spec) in wave {
            let result = resolve_reference(ctx, source, &spec, scope).await;
            out.push((spec, result));
        }
        return out;
    }

    let mut tasks = JoinSet::new();
    let mut pending: HashMap<task::Id, (usize, ReferenceSpec)> = HashMap::with_capacity(wave.len());
    for (index, spec) in wave {
        let ctx = ctx.clone();
        let source = source.clone();
        let scope = scope.clone();
        let task_spec = spec.clone();
        let handle = tasks.spawn(async move { resolve_reference(&ctx, &source, &task_spec, &scope).await });
        pending.insert(handle.id(), (index, spec));
    }

    let mut done = Vec::with_capacity(pending.len());
    while let Some(joined) = tasks.join_next_with_id().await {
        let (id, outcome) = match joined {
            Ok((id, result)) => (id, Ok(result)),
            Err(e) => (e.id(), Err(e)),
        };
        let Some((index, spec)) = pending.remove(&id) else {
            continue;
        };
        let result = outcome.unwrap_or_else(|e| {
            tracing::error!(field = %spec.field, error = %e, "field task failed");
            Err(WeaveError::FieldResolution {
                field: spec.field.clone(),
                message: format!("task failed: {}", e),
            })
        });
        done.push((index, spec, result));
    }
    done.sort_by_key(|(index, _, _)| *index);
    done.into_iter().map(|(_, spec, result)| (spec, result)).collect()
}

/// Create the shell, or update it when a seeded or explicit id already exists.
async fn store_shell(
    ctx: &CascadeContext,
    entity_type: &str,
    id: Option<&EntityId>,
    fields: FieldMap,
) -> Result<Entity, WeaveError> {
    if let Some(id) = id
        && ctx.data.get(entity_type, id).await?.is_some()
    {
        tracing::debug!(entity_type, id = %id, "entity exists, updating");
        return ctx.data.update(entity_type, id, fields).await;
    }
    ctx.data.create(entity_type, id.cloned(), fields).await
}

// =============================================================================
// SCALARS
// =============================================================================

#[allow(clippy::too_many_arguments)]
async fn generate_scalars(
    ctx: &CascadeContext,
    def: &ParsedEntity,
    draft: &Draft,
    scope: &Scope,
    values: &mut FieldMap,
    generation: &mut BTreeMap<String, GenerationMetadata>,
    notes: &mut Vec<FieldNote>,
    errors: &mut Vec<FieldError>,
) {
    let parent = scope.parent.as_ref().map(|p| &p.entity);
    let seed = ctx.seed_for(def).unwrap_or(0);

    for name in &draft.pending {
        let Some(field) = def.field(name) else {
            continue;
        };
        let known = template_values(values, parent);
        let mut request = GenerationRequest::new(&def.name, &field.name, field.declared_type());
        request.is_array = field.is_array;
        request.prompt = field.prompt.as_deref().map(|p| template::render(p, &known));
        request.instructions = def.instructions.as_deref().map(|i| template::render(i, &known));
        request.hint = draft.hint.clone();
        request.parent = parent.map(Entity::to_json);
        request.context = def
            .context
            .iter()
            .chain(field.template_refs().iter())
            .filter_map(|key| known.get(key).map(|v| (key.clone(), v.clone())))
            .collect();
        request.seed = seed;
        request.lineage = scope.lineage.clone();

        match ctx.generator.generate(&request).await {
            Ok(generated) => {
                if generated.metadata.fallback {
                    notes.push(FieldNote::new(
                        name,
                        NoteKind::GenerationFallback,
                        generated
                            .metadata
                            .error
                            .clone()
                            .unwrap_or_else(|| "placeholder substituted".to_string()),
                    ));
                }
                values.insert(name.clone(), FieldValue::Scalar(generated.value));
                generation.insert(name.clone(), generated.metadata);
            }
            Err(e) => {
                tracing::warn!(entity_type = %def.name, field = %name, error = %e, "generation failed");
                errors.push(FieldError::new(name, e.to_string()));
            }
        }
    }
}

/// Scalars usable in templates: own values by name, parent values as `parent.name`.
fn template_values(values: &FieldMap, parent: Option<&Entity>) -> BTreeMap<String, serde_json::Value> {
    let mut known: BTreeMap<String, serde_json::Value> = values
        .iter()
        .filter_map(|(k, v)| v.as_scalar().map(|s| (k.clone(), s.clone())))
        .collect();
    if let Some(parent) = parent {
        for (k, v) in &parent.fields {
            if let Some(s) = v.as_scalar() {
                known.insert(format!("parent.{}", k), s.clone());
            }
        }
    }
    known
}

// =============================================================================
// IDS
// =============================================================================

/// Deterministic id for a seeded entity.
///
/// Roots hash their canonical input; children hash their position under the
/// parent. Same seed and same input, same id.
pub fn derive_id(seed: u64, draft: &Draft, scope: &Scope) -> EntityId {
    let mut hasher = blake3::Hasher::new();
    hasher.update(&seed.to_le_bytes());
    let parts: Vec<String> = match &scope.parent {
        Some(parent) => vec![
            parent.entity.id.as_str().to_string(),
            parent.field.clone(),
            parent.index.to_string(),
        ],
        None => vec![
            "root".to_string(),
            draft.entity_type.clone(),
            canonical(&serde_json::Value::Object(draft.input.clone())).to_string(),
        ],
    };
    for part in &parts {
        hasher.update(part.as_bytes());
        hasher.update(&[0]);
    }
    let hex = hasher.finalize().to_hex();
    EntityId::new(format!("{}-{}", draft.entity_type.to_lowercase(), &hex[..16]))
}

/// Object keys sorted at every level.
fn canonical(value: &serde_json::Value) -> serde_json::Value {
    match value {
        serde_json::Value::Object(map) => {
            let sorted: BTreeMap<&String, serde_json::Value> =
                map.iter().map(|(k, v)| (k, canonical(v))).collect();
            serde_json::Value::Object(sorted.into_iter().map(|(k, v)| (k.clone(), v)).collect())
        }
        serde_json::Value::Array(items) => serde_json::Value::Array(items.iter().map(canonical).collect()),
        other => other.clone(),
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::{CascadeOptions, ParentLink};
    use crate::draft::draft;
    use crate::generator::PlaceholderGenerator;
    use crate::graph::DependencyGraph;
    use crate::memory::MemoryStore;
    use crate::provider::DataProvider;
    use crate::schema::ParsedSchema;
    use crate::semantic::HashEmbedder;
    use serde_json::json;
    use std::sync::Arc;

    fn context(raw: serde_json::Value, store: Arc<MemoryStore>, options: CascadeOptions) -> CascadeContext {
        let schema = ParsedSchema::parse(&raw).expect("schema");
        let order = DependencyGraph::build(&schema).generation_order().expect("order");
        CascadeContext::new(
            Arc::new(schema),
            Arc::new(order),
            store,
            Arc::new(HashEmbedder::default()),
            Arc::new(PlaceholderGenerator),
            options,
        )
    }

    fn blog_schema() -> serde_json::Value {
        json!({
            "Blog": { "name": "string", "topics": ["->Topic"] },
            "Topic": { "name": "string", "summary": "string" }
        })
    }

    #[tokio::test]
    async fn resolves_scalars_and_children() {
        let store = Arc::new(MemoryStore::new());
        let ctx = context(blog_schema(), Arc::clone(&store), CascadeOptions::new().default_array_count(2));
        let d = draft(&ctx.schema, "Blog", &json!({"name": "Rust Weekly"})).expect("draft");
        let resolved = resolve_draft(&ctx, d, Scope::root("Blog")).await.expect("resolve");

        assert!(resolved.is_complete(), "{:?}", resolved.errors);
        let topics = resolved.entity.get("topics").expect("topics").refs();
        assert_eq!(topics.len(), 2);
        assert_eq!(resolved.created.len(), 3);
        assert_eq!(store.count("Topic").await, 2);

        let topic = store
            .get("Topic", &topics[0].id)
            .await
            .expect("get")
            .expect("stored");
        assert!(topic.get("blog").expect("backref").points_at(&resolved.entity.id));
        assert!(resolved.generation.is_empty(), "blog name was provided");
        assert!(topic.get("summary").is_some());
    }

    #[tokio::test]
    async fn seeded_ids_are_stable() {
        let store = Arc::new(MemoryStore::new());
        let ctx = context(blog_schema(), store, CascadeOptions::new().seed(7));
        let d = draft(&ctx.schema, "Blog", &json!({"name": "A", "topics": []})).expect("draft");
        let first = derive_id(7, &d, &Scope::root("Blog"));
        let reordered = draft(&ctx.schema, "Blog", &json!({"topics": [], "name": "A"})).expect("draft");
        assert_eq!(first, derive_id(7, &reordered, &Scope::root("Blog")));
        assert_ne!(first, derive_id(8, &d, &Scope::root("Blog")));
        assert!(first.as_str().starts_with("blog-"));
    }

    #[tokio::test]
    async fn child_ids_depend_on_position() {
        let store = Arc::new(MemoryStore::new());
        let ctx = context(blog_schema(), store, CascadeOptions::new());
        let d = draft(&ctx.schema, "Topic", &json!({})).expect("draft");
        let parent = |index| ParentLink {
            entity: Entity::new("Blog", EntityId::new("blog-1"), FieldMap::new()),
            field: "topics".into(),
            operator: Operator::ForwardExact,
            backref: Some("blog".into()),
            index,
        };
        let root = Scope::root("Blog");
        let a = derive_id(1, &d, &root.child(parent(0), "topics[0]"));
        let b = derive_id(1, &d, &root.child(parent(1), "topics[1]"));
        assert_ne!(a, b);
    }

    #[tokio::test]
    async fn explicit_id_is_upserted() {
        let store = Arc::new(MemoryStore::new());
        let ctx = context(blog_schema(), Arc::clone(&store), CascadeOptions::new());
        for name in ["first", "second"] {
            let d = draft(&ctx.schema, "Blog", &json!({"$id": "b1", "name": name, "topics": []}))
                .expect("draft");
            let resolved = resolve_draft(&ctx, d, Scope::root("Blog")).await.expect("resolve");
            assert!(resolved.is_complete());
        }
        assert_eq!(store.count("Blog").await, 1);
        let blog = store.get("Blog", &EntityId::new("b1")).await.expect("get").expect("stored");
        assert_eq!(blog.get("name").and_then(FieldValue::as_text), Some("second"));
        assert_eq!(blog.get("topics"), Some(&FieldValue::Refs(vec![])));
    }

    #[tokio::test]
    async fn prompts_see_earlier_scalars() {
        let raw = json!({
            "Topic": {
                "name": "string",
                "summary": "A summary of {name}"
            }
        });
        let store = Arc::new(MemoryStore::new());
        let ctx = context(raw, store, CascadeOptions::new());
        let d = draft(&ctx.schema, "Topic", &json!({"name": "ownership"})).expect("draft");
        let resolved = resolve_draft(&ctx, d, Scope::root("Topic")).await.expect("resolve");
        assert!(resolved.entity.get("summary").is_some());
        assert_eq!(resolved.entity.get("name").and_then(FieldValue::as_text), Some("ownership"));
    }

    #[test]
    fn canonical_sorts_nested_keys() {
        let a = canonical(&json!({"b": {"y": 1, "x": 2}, "a": [ {"d": 1, "c": 2} ]}));
        assert_eq!(a.to_string(), r#"{"a":[{"c":2,"d":1}],"b":{"x":2,"y":1}}"#);
    }
}
