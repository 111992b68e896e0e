//! # Cascade
//!
//! The facade: a parsed schema with its generation order, a data provider,
//! a semantic provider and a value generator. `cascade` drafts input for a
//! root type and resolves it recursively down to `max_depth`.
//!
//! Schema problems (malformed definitions, hard reference cycles) fail
//! `Cascade::new`, before anything is stored.

use crate::context::{CascadeContext, CascadeOptions, Scope};
use crate::draft::{self, Draft};
use crate::generator::{PlaceholderGenerator, ValueGenerator};
use crate::graph::{DependencyGraph, GenerationOrder};
use crate::pipeline::{Resolved, resolve_draft};
use crate::provider::{DataProvider, SemanticProvider};
use crate::schema::ParsedSchema;
use crate::semantic::HashEmbedder;
use crate::WeaveError;
use std::sync::Arc;

/// Orchestrates draft, resolve and recursion for one schema.
#[derive(Clone)]
pub struct Cascade {
    schema: Arc<ParsedSchema>,
    order: Arc<GenerationOrder>,
    data: Arc<dyn DataProvider>,
    semantic: Arc<dyn SemanticProvider>,
    generator: Arc<dyn ValueGenerator>,
}

impl Cascade {
    /// Build a cascade over `schema`, storing into `data`.
    ///
    /// Defaults to the hashing embedder and the placeholder generator.
    pub fn new(schema: ParsedSchema, data: Arc<dyn DataProvider>) -> Result<Self, WeaveError> {
        let graph = DependencyGraph::build(&schema);
        let order = graph.generation_order()?;
        if !order.deferred.is_empty() {
            tracing::info!(deferred = order.deferred.len(), "reference cycles cut at deferrable edges");
        }
        Ok(Self {
            schema: Arc::new(schema),
            order: Arc::new(order),
            data,
            semantic: Arc::new(HashEmbedder::default()),
            generator: Arc::new(PlaceholderGenerator),
        })
    }

    #[must_use]
    pub fn with_semantic(mut self, semantic: Arc<dyn SemanticProvider>) -> Self {
        self.semantic = semantic;
        self
    }

    #[must_use]
    pub fn with_generator(mut self, generator: Arc<dyn ValueGenerator>) -> Self {
        self.generator = generator;
        self
    }

    #[must_use]
    pub fn schema(&self) -> &ParsedSchema {
        &self.schema
    }

    #[must_use]
    pub fn order(&self) -> &GenerationOrder {
        &self.order
    }

    /// Draft without side effects.
    pub fn draft(&self, entity_type: &str, input: &serde_json::Value) -> Result<Draft, WeaveError> {
        draft::draft(&self.schema, entity_type, input)
    }

    /// Resolve a draft as a root entity.
    pub async fn resolve(&self, draft: Draft, options: &CascadeOptions) -> Result<Resolved, WeaveError> {
        let scope = Scope::root(&draft.entity_type);
        let ctx = CascadeContext::new(
            Arc::clone(&self.schema),
            Arc::clone(&self.order),
            Arc::clone(&self.data),
            Arc::clone(&self.semantic),
            Arc::clone(&self.generator),
            options.clone(),
        );
        let resolved = resolve_draft(&ctx, draft, scope).await?;
        if !ctx.cache.is_empty().await {
            tracing::debug!(vectors = ctx.cache.len().await, "embedding cache dropped");
        }
        tracing::info!(
            entity_type = %resolved.entity.entity_type,
            id = %resolved.entity.id,
            created = resolved.created.len(),
            errors = resolved.errors.len(),
            cache_hits = ctx.cache.stats().0,
            "cascade resolved"
        );
        Ok(resolved)
    }

    /// Draft and resolve in one call.
    pub async fn cascade(
        &self,
        entity_type: &str,
        input: &serde_json::Value,
        options: &CascadeOptions,
    ) -> Result<Resolved, WeaveError> {
        let draft = self.draft(entity_type, input)?;
        self.resolve(draft, options).await
    }
}
