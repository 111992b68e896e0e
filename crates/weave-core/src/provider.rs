//! # Provider Interfaces
//!
//! The engine consumes three injected capabilities:
//!
//! - `DataProvider`: entity storage (get/list/search/create/update/delete and links)
//! - `SemanticProvider`: text embeddings for similarity search
//! - `GenerationProvider`: the delegate behind AI-backed value generation
//!
//! Implementations must be `Send + Sync`; the cascade shares them across
//! concurrently resolving fields through `Arc`.

use crate::generator::GenerationRequest;
use crate::schema::Operator;
use crate::{Entity, EntityId, EntityRef, FieldMap, WeaveError};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

// =============================================================================
// QUERY TYPES
// =============================================================================

/// Restrict a listing to entities whose `field` references `target`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RefFilter {
    pub field: String,
    pub target: EntityId,
}

/// Options for `DataProvider::list`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListOptions {
    pub filter: Option<RefFilter>,
    pub limit: Option<usize>,
}

impl ListOptions {
    /// Entities whose `field` points at `target`.
    #[must_use]
    pub fn pointing_at(field: impl Into<String>, target: EntityId) -> Self {
        Self {
            filter: Some(RefFilter {
                field: field.into(),
                target,
            }),
            limit: None,
        }
    }
}

/// One lexical search hit. Hits are returned best first.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchHit {
    pub entity: Entity,
    pub score: f32,
}

// =============================================================================
// LINKS
// =============================================================================

/// How a link came to be.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LinkMetadata {
    pub operator: Operator,
    /// Cosine similarity for fuzzy matches.
    pub similarity: Option<f32>,
    /// The union candidate that matched.
    pub matched_type: Option<String>,
    /// The target was created for this link.
    pub generated: bool,
}

/// A directed edge `from.field -> to`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Link {
    pub from: EntityRef,
    pub field: String,
    pub to: EntityRef,
    pub metadata: LinkMetadata,
}

// =============================================================================
// TRAITS
// =============================================================================

/// Entity storage consumed by the resolver and orchestrator.
#[async_trait]
pub trait DataProvider: Send + Sync {
    /// Fetch one entity, `None` when absent.
    async fn get(&self, entity_type: &str, id: &EntityId) -> Result<Option<Entity>, WeaveError>;

    /// All entities of a type in creation order, optionally filtered.
    async fn list(&self, entity_type: &str, opts: &ListOptions) -> Result<Vec<Entity>, WeaveError>;

    /// Lexical search, best hit first.
    async fn search(
        &self,
        entity_type: &str,
        query: &str,
        limit: usize,
    ) -> Result<Vec<SearchHit>, WeaveError>;

    /// Create an entity. The provider assigns an id when none is given.
    async fn create(
        &self,
        entity_type: &str,
        id: Option<EntityId>,
        fields: FieldMap,
    ) -> Result<Entity, WeaveError>;

    /// Merge `fields` into an existing entity and return the result.
    async fn update(
        &self,
        entity_type: &str,
        id: &EntityId,
        fields: FieldMap,
    ) -> Result<Entity, WeaveError>;

    /// Remove an entity and its links. Returns whether it existed.
    async fn delete(&self, entity_type: &str, id: &EntityId) -> Result<bool, WeaveError>;

    /// Targets linked from `entity_type:id` through `relation`, in link order.
    async fn related(
        &self,
        entity_type: &str,
        id: &EntityId,
        relation: &str,
    ) -> Result<Vec<EntityRef>, WeaveError>;

    /// Record a link.
    async fn relate(&self, link: &Link) -> Result<(), WeaveError>;

    /// Remove a link. Returns whether it existed.
    async fn unrelate(
        &self,
        from: &EntityRef,
        field: &str,
        to: &EntityRef,
    ) -> Result<bool, WeaveError>;
}

/// Text embeddings for similarity search.
#[async_trait]
pub trait SemanticProvider: Send + Sync {
    /// Embed one text. Identical inputs must yield identical vectors.
    async fn embed(&self, text: &str) -> Result<Vec<f32>, WeaveError>;
}

/// The external collaborator behind `AiGenerator`.
#[async_trait]
pub trait GenerationProvider: Send + Sync {
    /// Produce a raw value for one field. The caller coerces it to the declared type.
    async fn generate(&self, request: &GenerationRequest) -> Result<serde_json::Value, WeaveError>;
}
