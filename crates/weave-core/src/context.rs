//! # Cascade Context
//!
//! `CascadeOptions` are the caller's knobs. `CascadeContext` is the shared,
//! cheaply clonable state of one top-level call: schema, order, providers,
//! options and the embedding cache. Spawned field tasks each own a clone.
//!
//! `Scope` is the per-entity position (depth, lineage, parent) and is passed
//! by value down the recursion, never shared.

use crate::generator::ValueGenerator;
use crate::graph::GenerationOrder;
use crate::primitives::{
    DEFAULT_ARRAY_COUNT, DEFAULT_MAX_DEPTH, DEFAULT_SEARCH_TIMEOUT_MS, MAX_ARRAY_REFS,
    MAX_CASCADE_DEPTH,
};
use crate::provider::{DataProvider, SemanticProvider};
use crate::schema::{Operator, ParsedEntity, ParsedSchema};
use crate::search::SearchStrategy;
use crate::semantic::EmbeddingCache;
use crate::union::{FailureMode, SearchMode, UnionSearch};
use crate::{Entity, EntityId};
use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

// =============================================================================
// PROGRESS
// =============================================================================

/// What happened to an entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ProgressKind {
    /// Input was drafted for an entity about to be created.
    Drafted,
    /// The entity shell was stored.
    Created,
    /// An existing entity was linked to a field.
    Linked,
    /// All fields of the entity were attempted.
    Resolved,
    /// A child was not generated because of the depth bound.
    Skipped,
}

/// One progress notification.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProgressEvent {
    pub kind: ProgressKind,
    pub entity_type: String,
    pub id: Option<EntityId>,
    /// Field path relative to the root (`topics[1].posts`); empty for the root.
    pub path: String,
    pub depth: usize,
}

/// Progress callback. Called from whichever task made progress.
pub type ProgressCallback = Arc<dyn Fn(&ProgressEvent) + Send + Sync>;

// =============================================================================
// OPTIONS
// =============================================================================

/// Per-call configuration.
#[derive(Clone)]
pub struct CascadeOptions {
    /// Depth bound for generated children; the root sits at depth 0.
    pub max_depth: usize,
    /// Threshold override: beats `$fuzzyThreshold`, yields to a field threshold.
    pub threshold: Option<f32>,
    /// Union search mode.
    pub search_mode: SearchMode,
    /// Candidate ranking.
    pub search_strategy: SearchStrategy,
    /// Failing union candidates are skipped (`Continue`) or fatal to the field (`Throw`).
    pub failure_mode: FailureMode,
    pub search_timeout: Duration,
    /// Children generated for a required array relation absent from the input.
    pub default_array_count: usize,
    /// Seed for placeholder values and derived ids. Overrides `$seed`.
    pub seed: Option<u64>,
    pub on_progress: Option<ProgressCallback>,
}

impl Default for CascadeOptions {
    fn default() -> Self {
        Self {
            max_depth: DEFAULT_MAX_DEPTH,
            threshold: None,
            search_mode: SearchMode::default(),
            search_strategy: SearchStrategy::default(),
            failure_mode: FailureMode::default(),
            search_timeout: Duration::from_millis(DEFAULT_SEARCH_TIMEOUT_MS),
            default_array_count: DEFAULT_ARRAY_COUNT,
            seed: None,
            on_progress: None,
        }
    }
}

impl fmt::Debug for CascadeOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CascadeOptions")
            .field("max_depth", &self.max_depth)
            .field("threshold", &self.threshold)
            .field("search_mode", &self.search_mode)
            .field("search_strategy", &self.search_strategy)
            .field("failure_mode", &self.failure_mode)
            .field("search_timeout", &self.search_timeout)
            .field("default_array_count", &self.default_array_count)
            .field("seed", &self.seed)
            .field("on_progress", &self.on_progress.is_some())
            .finish()
    }
}

impl CascadeOptions {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Clamped to `MAX_CASCADE_DEPTH`.
    #[must_use]
    pub fn max_depth(mut self, depth: usize) -> Self {
        self.max_depth = depth.min(MAX_CASCADE_DEPTH);
        self
    }

    /// Clamped to `[0, 1]`.
    #[must_use]
    pub fn threshold(mut self, threshold: f32) -> Self {
        self.threshold = Some(threshold.clamp(0.0, 1.0));
        self
    }

    #[must_use]
    pub fn search_mode(mut self, mode: SearchMode) -> Self {
        self.search_mode = mode;
        self
    }

    #[must_use]
    pub fn search_strategy(mut self, strategy: SearchStrategy) -> Self {
        self.search_strategy = strategy;
        self
    }

    #[must_use]
    pub fn failure_mode(mut self, mode: FailureMode) -> Self {
        self.failure_mode = mode;
        self
    }

    #[must_use]
    pub fn search_timeout(mut self, timeout: Duration) -> Self {
        self.search_timeout = timeout;
        self
    }

    /// Clamped to `MAX_ARRAY_REFS`.
    #[must_use]
    pub fn default_array_count(mut self, count: usize) -> Self {
        self.default_array_count = count.min(MAX_ARRAY_REFS);
        self
    }

    #[must_use]
    pub fn seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    #[must_use]
    pub fn on_progress(mut self, callback: impl Fn(&ProgressEvent) + Send + Sync + 'static) -> Self {
        self.on_progress = Some(Arc::new(callback));
        self
    }
}

// =============================================================================
// CONTEXT
// =============================================================================

/// Shared state of one top-level call.
#[derive(Clone)]
pub struct CascadeContext {
    pub(crate) schema: Arc<ParsedSchema>,
    pub(crate) order: Arc<GenerationOrder>,
    pub(crate) data: Arc<dyn DataProvider>,
    pub(crate) semantic: Arc<dyn SemanticProvider>,
    pub(crate) generator: Arc<dyn ValueGenerator>,
    pub(crate) options: Arc<CascadeOptions>,
    /// Fresh per top-level call.
    pub(crate) cache: Arc<EmbeddingCache>,
}

impl CascadeContext {
    pub(crate) fn new(
        schema: Arc<ParsedSchema>,
        order: Arc<GenerationOrder>,
        data: Arc<dyn DataProvider>,
        semantic: Arc<dyn SemanticProvider>,
        generator: Arc<dyn ValueGenerator>,
        options: CascadeOptions,
    ) -> Self {
        Self {
            schema,
            order,
            data,
            semantic,
            generator,
            options: Arc::new(options),
            cache: Arc::new(EmbeddingCache::new()),
        }
    }

    /// Effective seed for an entity type: options first, then `$seed`.
    pub(crate) fn seed_for(&self, entity: &ParsedEntity) -> Option<u64> {
        self.options.seed.or(entity.seed)
    }

    pub(crate) fn union_search(&self) -> UnionSearch {
        UnionSearch::new(
            Arc::clone(&self.data),
            Arc::clone(&self.semantic),
            Arc::clone(&self.cache),
        )
        .strategy(self.options.search_strategy)
        .timeout(self.options.search_timeout)
        .failure_mode(self.options.failure_mode)
    }

    pub(crate) fn emit(&self, kind: ProgressKind, entity_type: &str, id: Option<&EntityId>, scope: &Scope) {
        if let Some(callback) = &self.options.on_progress {
            callback(&ProgressEvent {
                kind,
                entity_type: entity_type.to_string(),
                id: id.cloned(),
                path: scope.path.clone(),
                depth: scope.depth,
            });
        }
    }
}

// =============================================================================
// SCOPE
// =============================================================================

/// The parent an entity is generated for.
#[derive(Debug, Clone)]
pub struct ParentLink {
    /// Snapshot of the parent shell.
    pub entity: Entity,
    /// The parent's relation field.
    pub field: String,
    pub operator: Operator,
    /// Field on the child that points back at the parent.
    pub backref: Option<String>,
    /// Position within the parent's array field.
    pub index: usize,
}

/// Position of an entity within one cascade.
#[derive(Debug, Clone, Default)]
pub struct Scope {
    pub depth: usize,
    /// Stable position key (`Blog/topics[1]/posts[0]`), part of placeholder seeds.
    pub lineage: String,
    /// Error and progress path relative to the root (`topics[1].posts`).
    pub path: String,
    pub parent: Option<ParentLink>,
}

impl Scope {
    /// Scope of a root entity.
    #[must_use]
    pub fn root(entity_type: &str) -> Self {
        Self {
            depth: 0,
            lineage: entity_type.to_string(),
            path: String::new(),
            parent: None,
        }
    }

    /// Scope of a child generated for `parent.field[index]`.
    #[must_use]
    pub fn child(&self, parent: ParentLink, segment: &str) -> Self {
        Self {
            depth: self.depth + 1,
            lineage: format!("{}/{}", self.lineage, segment),
            path: if self.path.is_empty() {
                segment.to_string()
            } else {
                format!("{}.{}", self.path, segment)
            },
            parent: Some(parent),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[test]
    fn builders_clamp() {
        let opts = CascadeOptions::new()
            .max_depth(99)
            .threshold(1.5)
            .default_array_count(10_000)
            .seed(3);
        assert_eq!(opts.max_depth, MAX_CASCADE_DEPTH);
        assert_eq!(opts.threshold, Some(1.0));
        assert_eq!(opts.default_array_count, MAX_ARRAY_REFS);
        assert_eq!(opts.seed, Some(3));
    }

    #[test]
    fn debug_does_not_require_callback_debug() {
        let opts = CascadeOptions::new().on_progress(|_| {});
        assert!(format!("{:?}", opts).contains("on_progress: true"));
    }

    #[test]
    fn child_scope_extends_lineage_and_path() {
        let root = Scope::root("Blog");
        let parent = ParentLink {
            entity: Entity::new("Blog", EntityId::new("b1"), Default::default()),
            field: "topics".into(),
            operator: Operator::ForwardExact,
            backref: Some("blog".into()),
            index: 1,
        };
        let child = root.child(parent.clone(), "topics[1]");
        assert_eq!(child.depth, 1);
        assert_eq!(child.lineage, "Blog/topics[1]");
        assert_eq!(child.path, "topics[1]");

        let grandchild = child.child(parent, "posts");
        assert_eq!(grandchild.path, "topics[1].posts");
        assert_eq!(grandchild.depth, 2);
    }

    #[test]
    fn progress_callback_receives_events() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let opts = CascadeOptions::new().on_progress(move |e| {
            if let Ok(mut v) = sink.lock() {
                v.push(e.kind);
            }
        });
        if let Some(cb) = &opts.on_progress {
            cb(&ProgressEvent {
                kind: ProgressKind::Created,
                entity_type: "Blog".into(),
                id: None,
                path: String::new(),
                depth: 0,
            });
        }
        assert_eq!(*seen.lock().expect("lock"), vec![ProgressKind::Created]);
    }
}
