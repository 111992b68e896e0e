//! # Relationship Resolver
//!
//! Resolves one relation field of a stored source entity to zero, one or
//! many entities. One strategy per operator, matched exhaustively:
//!
//! - `->` always generates owned children (no search)
//! - `~>` links the best match at or above the threshold, else generates
//! - `<-` lists entities whose backref field points at the source
//! - `<~` links the best match at or above the threshold, else nothing
//!   (with a low-confidence note); never generates
//!
//! Generated children are cascaded through the resolve pipeline and linked
//! with `DataProvider::relate`. Their own errors and notes come back with a
//! path prefix.

use crate::context::{CascadeContext, ParentLink, ProgressKind, Scope};
use crate::draft::{ReferenceSpec, RefSlot, draft_object};
use crate::pipeline::{Resolved, resolve_boxed};
use crate::provider::{Link, LinkMetadata, ListOptions};
use crate::schema::{Operator, ParsedEntity, ParsedField};
use crate::template;
use crate::union::{Candidate, FailureMode};
use crate::{Entity, EntityId, EntityRef, FieldError, FieldNote, NoteKind, WeaveError};
use serde::Serialize;
use std::collections::BTreeMap;
use tokio::task::JoinSet;

// =============================================================================
// RESULT
// =============================================================================

/// Outcome of resolving one relation field.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ReferenceResult {
    /// Linked entities in slot order.
    pub entities: Vec<Entity>,
    /// At least one entity was created for this field.
    pub generated: bool,
    /// Similarity per linked entity, for fuzzy operators.
    pub scores: Option<Vec<f32>>,
    /// Union candidate each entity matched, in `entities` order.
    pub matched_types: Vec<String>,
    pub notes: Vec<FieldNote>,
    /// Errors of generated children, already path-prefixed.
    pub errors: Vec<FieldError>,
    /// Every entity created while resolving this field, children included.
    pub created: Vec<EntityRef>,
}

impl ReferenceResult {
    fn push(&mut self, entity: Entity, score: Option<f32>, generated: bool) {
        if let Some(s) = score {
            self.scores.get_or_insert_with(Vec::new).push(s);
        }
        self.matched_types.push(entity.entity_type.clone());
        self.generated |= generated;
        self.entities.push(entity);
    }

    /// Absorb a generated child; `false` when the child could not be stored.
    fn absorb_child(&mut self, child: Resolved, prefix: &str) -> bool {
        self.errors
            .extend(child.errors.into_iter().map(|e| e.nested(prefix)));
        self.notes
            .extend(child.notes.into_iter().map(|n| n.nested(prefix)));
        self.created.extend(child.created);
        if child.stored {
            self.push(child.entity, None, true);
        }
        child.stored
    }

    /// References to the linked entities.
    #[must_use]
    pub fn refs(&self) -> Vec<EntityRef> {
        self.entities.iter().map(Entity::to_ref).collect()
    }
}

/// One unit of work for a forward relation.
#[derive(Debug, Clone)]
enum Work {
    Slot(RefSlot),
    /// Nothing in the input; generate from the field's default hint.
    Fresh,
}

// =============================================================================
// ENTRY POINT
// =============================================================================

/// Resolve `spec` for the stored entity `source`.
///
/// An `Err` means the whole field failed; the pipeline records it and moves on.
pub async fn resolve_reference(
    ctx: &CascadeContext,
    source: &Entity,
    spec: &ReferenceSpec,
    scope: &Scope,
) -> Result<ReferenceResult, WeaveError> {
    let entity_def = ctx.schema.require(&source.entity_type)?;
    let field_def = entity_def.field(&spec.field).ok_or_else(|| WeaveError::FieldResolution {
        field: spec.field.clone(),
        message: format!("{} has no field {}", source.entity_type, spec.field),
    })?;

    tracing::debug!(
        entity_type = %source.entity_type,
        field = %spec.field,
        operator = spec.operator.symbol(),
        "resolving reference"
    );

    match spec.operator {
        Operator::ForwardExact => forward_exact(ctx, source, spec, scope).await,
        Operator::ForwardFuzzy => forward_fuzzy(ctx, source, entity_def, field_def, spec, scope).await,
        Operator::BackwardExact => backward_exact(ctx, source, spec).await,
        Operator::BackwardFuzzy => backward_fuzzy(ctx, source, entity_def, field_def, spec, scope).await,
    }
}

fn work_items(ctx: &CascadeContext, spec: &ReferenceSpec) -> Vec<Work> {
    if spec.provided {
        let take = if spec.is_array { spec.slots.len() } else { 1 };
        return spec.slots.iter().take(take).cloned().map(Work::Slot).collect();
    }
    if spec.is_optional {
        return Vec::new();
    }
    let count = if spec.is_array {
        ctx.options.default_array_count
    } else {
        1
    };
    vec![Work::Fresh; count]
}

fn segment(spec: &ReferenceSpec, index: usize) -> String {
    if spec.is_array {
        format!("{}[{}]", spec.field, index)
    } else {
        spec.field.clone()
    }
}

/// The field prompt (or name) with `{field}` placeholders filled from the source.
fn default_hint(spec: &ReferenceSpec, source: &Entity) -> String {
    let values: BTreeMap<String, serde_json::Value> = source
        .fields
        .iter()
        .filter_map(|(k, v)| v.as_scalar().map(|s| (k.clone(), s.clone())))
        .collect();
    template::render(&spec.default_hint(), &values)
}

fn candidates(
    ctx: &CascadeContext,
    entity_def: &ParsedEntity,
    field_def: &ParsedField,
    spec: &ReferenceSpec,
) -> Vec<Candidate> {
    spec.related_type
        .candidates()
        .into_iter()
        .map(|t| Candidate {
            entity_type: t.to_string(),
            threshold: ctx
                .schema
                .threshold_for(entity_def, field_def, t, ctx.options.threshold),
        })
        .collect()
}

async fn link(
    ctx: &CascadeContext,
    source: &Entity,
    spec: &ReferenceSpec,
    target: &Entity,
    similarity: Option<f32>,
    generated: bool,
) -> Result<(), WeaveError> {
    ctx.data
        .relate(&Link {
            from: source.to_ref(),
            field: spec.field.clone(),
            to: target.to_ref(),
            metadata: LinkMetadata {
                operator: spec.operator,
                similarity,
                matched_type: spec
                    .related_type
                    .is_union()
                    .then(|| target.entity_type.clone()),
                generated,
            },
        })
        .await
}

/// Fetch an explicitly referenced entity, trying each candidate type in order.
async fn fetch_explicit(
    ctx: &CascadeContext,
    spec: &ReferenceSpec,
    id: &EntityId,
    entity_type: Option<&str>,
) -> Result<Entity, WeaveError> {
    let types: Vec<&str> = match entity_type {
        Some(t) if spec.related_type.candidates().contains(&t) => vec![t],
        Some(t) => {
            return Err(WeaveError::InvalidInput(format!(
                "{} is not a valid target of {}",
                t, spec.field
            )));
        }
        None => spec.related_type.candidates(),
    };
    for t in types {
        if let Some(entity) = ctx.data.get(t, id).await? {
            return Ok(entity);
        }
    }
    Err(WeaveError::NotFound {
        entity_type: spec.related_type.primary().to_string(),
        id: id.clone(),
    })
}

// =============================================================================
// CHILD GENERATION
// =============================================================================

/// Generate one child of `spec.related_type.primary()` and cascade into it.
///
/// Returns `None` when the depth bound stops generation (a note is recorded).
async fn generate_child(
    ctx: &CascadeContext,
    source: &Entity,
    spec: &ReferenceSpec,
    scope: &Scope,
    index: usize,
    input: serde_json::Map<String, serde_json::Value>,
    hint: Option<String>,
    result: &mut ReferenceResult,
) -> Result<Option<Entity>, WeaveError> {
    let seg = segment(spec, index);
    let child_type = spec.related_type.primary();

    if scope.depth + 1 > ctx.options.max_depth {
        result.notes.push(FieldNote::new(
            &seg,
            NoteKind::DepthLimit,
            format!(
                "{} not generated: depth {} exceeds max depth {}",
                child_type,
                scope.depth + 1,
                ctx.options.max_depth
            ),
        ));
        ctx.emit(ProgressKind::Skipped, child_type, None, scope);
        return Ok(None);
    }

    let parent = ParentLink {
        entity: source.clone(),
        field: spec.field.clone(),
        operator: spec.operator,
        backref: spec.backref.clone(),
        index,
    };
    let child_scope = scope.child(parent, &seg);
    let draft = draft_object(&ctx.schema, child_type, input, hint)?;
    let child = resolve_boxed(ctx, draft, child_scope).await?;

    let entity = child.entity.clone();
    if !result.absorb_child(child, &seg) {
        // Not stored: not linked.
        return Ok(None);
    }
    link(ctx, source, spec, &entity, None, true).await?;
    Ok(Some(entity))
}

fn slot_input(work: &Work) -> serde_json::Map<String, serde_json::Value> {
    match work {
        Work::Slot(RefSlot::Nested { input }) => input.clone(),
        _ => serde_json::Map::new(),
    }
}

// =============================================================================
// STRATEGIES
// =============================================================================

async fn forward_exact(
    ctx: &CascadeContext,
    source: &Entity,
    spec: &ReferenceSpec,
    scope: &Scope,
) -> Result<ReferenceResult, WeaveError> {
    let items = work_items(ctx, spec);
    let mut result = ReferenceResult::default();

    if items.len() > 1 {
        let mut tasks = JoinSet::new();
        for (index, work) in items.into_iter().enumerate() {
            let ctx = ctx.clone();
            let source = source.clone();
            let spec = spec.clone();
            let scope = scope.clone();
            tasks.spawn(async move {
                let mut partial = ReferenceResult::default();
                let outcome =
                    forward_exact_one(&ctx, &source, &spec, &scope, index, work, &mut partial).await;
                (index, outcome.map(|_| partial))
            });
        }

        let mut parts: Vec<(usize, Result<ReferenceResult, WeaveError>)> = Vec::new();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(part) => parts.push(part),
                Err(e) => {
                    return Err(WeaveError::FieldResolution {
                        field: spec.field.clone(),
                        message: format!("child task failed: {}", e),
                    });
                }
            }
        }
        parts.sort_by_key(|(index, _)| *index);
        for (index, part) in parts {
            match part {
                Ok(part) => merge(&mut result, part),
                Err(e) => result
                    .errors
                    .push(FieldError::new(segment(spec, index), e.to_string())),
            }
        }
        return Ok(result);
    }

    for (index, work) in items.into_iter().enumerate() {
        forward_exact_one(ctx, source, spec, scope, index, work, &mut result).await?;
    }
    Ok(result)
}

async fn forward_exact_one(
    ctx: &CascadeContext,
    source: &Entity,
    spec: &ReferenceSpec,
    scope: &Scope,
    index: usize,
    work: Work,
    result: &mut ReferenceResult,
) -> Result<(), WeaveError> {
    if let Work::Slot(RefSlot::Explicit { id, entity_type }) = &work {
        let target = fetch_explicit(ctx, spec, id, entity_type.as_deref()).await?;
        link(ctx, source, spec, &target, None, false).await?;
        ctx.emit(ProgressKind::Linked, &target.entity_type, Some(&target.id), scope);
        result.push(target, None, false);
        return Ok(());
    }
    let hint = match &work {
        Work::Slot(slot) => slot.hint(),
        Work::Fresh => Some(default_hint(spec, source)),
    };
    generate_child(ctx, source, spec, scope, index, slot_input(&work), hint, result).await?;
    Ok(())
}

fn merge(into: &mut ReferenceResult, part: ReferenceResult) {
    for (i, entity) in part.entities.into_iter().enumerate() {
        let score = part.scores.as_ref().and_then(|s| s.get(i).copied());
        let generated = part.generated;
        into.push(entity, score, generated);
    }
    into.notes.extend(part.notes);
    into.errors.extend(part.errors);
    into.created.extend(part.created);
}

async fn forward_fuzzy(
    ctx: &CascadeContext,
    source: &Entity,
    entity_def: &ParsedEntity,
    field_def: &ParsedField,
    spec: &ReferenceSpec,
    scope: &Scope,
) -> Result<ReferenceResult, WeaveError> {
    let mut result = ReferenceResult::default();
    let cands = candidates(ctx, entity_def, field_def, spec);
    let search = ctx.union_search();

    for (index, work) in work_items(ctx, spec).into_iter().enumerate() {
        if let Work::Slot(RefSlot::Explicit { id, entity_type }) = &work {
            let target = fetch_explicit(ctx, spec, id, entity_type.as_deref()).await?;
            link(ctx, source, spec, &target, None, false).await?;
            ctx.emit(ProgressKind::Linked, &target.entity_type, Some(&target.id), scope);
            result.push(target, None, false);
            continue;
        }

        let hint = match &work {
            Work::Slot(slot) => slot.hint().unwrap_or_else(|| default_hint(spec, source)),
            Work::Fresh => default_hint(spec, source),
        };

        match search.search(&cands, &hint, ctx.options.search_mode).await {
            Ok(mut outcome) => {
                if let Some(best) = outcome.best.take() {
                    let target = best.found.entity;
                    let similarity = best.found.similarity;
                    link(ctx, source, spec, &target, Some(similarity), false).await?;
                    ctx.emit(ProgressKind::Linked, &target.entity_type, Some(&target.id), scope);
                    tracing::debug!(field = %spec.field, similarity, matched = %best.matched_type, "fuzzy match linked");
                    result.push(target, Some(similarity), false);
                    continue;
                }
                if outcome.all_failed(cands.len()) {
                    result.notes.push(FieldNote::new(
                        segment(spec, index),
                        NoteKind::SearchDegraded,
                        "every candidate search failed; generated instead",
                    ));
                }
            }
            Err(e) if ctx.options.failure_mode == FailureMode::Throw => return Err(e),
            Err(e) => {
                result.notes.push(FieldNote::new(
                    segment(spec, index),
                    NoteKind::SearchDegraded,
                    format!("search failed ({}); generated instead", e),
                ));
            }
        }

        generate_child(ctx, source, spec, scope, index, slot_input(&work), Some(hint), &mut result)
            .await?;
    }
    Ok(result)
}

async fn backward_exact(
    ctx: &CascadeContext,
    source: &Entity,
    spec: &ReferenceSpec,
) -> Result<ReferenceResult, WeaveError> {
    let backref = spec.backref.as_deref().ok_or_else(|| WeaveError::FieldResolution {
        field: spec.field.clone(),
        message: "backward relation without backref".to_string(),
    })?;

    let mut result = ReferenceResult::default();
    for entity_type in spec.related_type.candidates() {
        let opts = ListOptions::pointing_at(backref, source.id.clone());
        for entity in ctx.data.list(entity_type, &opts).await? {
            result.push(entity, None, false);
        }
    }
    Ok(result)
}

async fn backward_fuzzy(
    ctx: &CascadeContext,
    source: &Entity,
    entity_def: &ParsedEntity,
    field_def: &ParsedField,
    spec: &ReferenceSpec,
    scope: &Scope,
) -> Result<ReferenceResult, WeaveError> {
    let mut result = ReferenceResult::default();
    let cands = candidates(ctx, entity_def, field_def, spec);
    let search = ctx.union_search();

    let slots: Vec<RefSlot> = if spec.provided {
        let take = if spec.is_array { spec.slots.len() } else { 1 };
        spec.slots.iter().take(take).cloned().collect()
    } else {
        let text = if spec.prompt.is_some() {
            default_hint(spec, source)
        } else {
            let own = source.searchable_text();
            if own.is_empty() { spec.field.clone() } else { own }
        };
        vec![RefSlot::Hint { text }]
    };

    for (index, slot) in slots.into_iter().enumerate() {
        let hint = match slot {
            RefSlot::Explicit { id, entity_type } => {
                let target = fetch_explicit(ctx, spec, &id, entity_type.as_deref()).await?;
                link(ctx, source, spec, &target, None, false).await?;
                ctx.emit(ProgressKind::Linked, &target.entity_type, Some(&target.id), scope);
                result.push(target, None, false);
                continue;
            }
            other => other.hint().unwrap_or_else(|| default_hint(spec, source)),
        };

        let outcome = search.search(&cands, &hint, ctx.options.search_mode).await?;
        if outcome.all_failed(cands.len()) {
            return Err(WeaveError::FieldResolution {
                field: spec.field.clone(),
                message: "every candidate search failed".to_string(),
            });
        }
        match outcome.best {
            Some(best) => {
                let target = best.found.entity;
                let similarity = best.found.similarity;
                link(ctx, source, spec, &target, Some(similarity), false).await?;
                ctx.emit(ProgressKind::Linked, &target.entity_type, Some(&target.id), scope);
                result.push(target, Some(similarity), false);
            }
            None => {
                let detail = match outcome.top_similarity {
                    Some((ty, s)) => format!("best {} match scored {:.3}", ty, s),
                    None => "no candidates".to_string(),
                };
                tracing::info!(field = %spec.field, %detail, "no grounding match above threshold");
                result.notes.push(FieldNote::new(
                    segment(spec, index),
                    NoteKind::LowConfidence,
                    format!("no match for '{}' at or above threshold: {}", hint, detail),
                ));
            }
        }
    }
    Ok(result)
}
