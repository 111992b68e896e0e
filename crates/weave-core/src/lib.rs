//! # weave-core
//!
//! Relationship resolution and cascade generation for schema-first data.
//!
//! A schema declares entity types whose fields are scalars or relations.
//! Relations carry one of four operators:
//!
//! - `->` forward exact: the parent owns freshly generated children
//! - `~>` forward fuzzy: link the most similar existing entity, else generate
//! - `<-` backward exact: entities whose backref points at this one
//! - `<~` backward fuzzy: ground against existing entities, never generate
//!
//! `Cascade::cascade` drafts the input for a root type, generates what is
//! missing, stores the entity and recurses into its relations in dependency
//! order, down to a depth bound.
//!
//! ## Architectural Constraints
//!
//! - No storage and no network: data, similarity and value generation are
//!   injected through `DataProvider`, `SemanticProvider` and `ValueGenerator`
//! - Deterministic under a seed: BTreeMap ordering and BLAKE3-derived ids
//! - Partial failure is data: a failing field is reported on `Resolved`,
//!   the rest of the cascade still completes

// =============================================================================
// MODULES
// =============================================================================

pub mod cascade;
pub mod context;
pub mod draft;
pub mod generator;
pub mod graph;
pub mod memory;
pub mod pipeline;
pub mod primitives;
pub mod provider;
pub mod resolver;
pub mod schema;
pub mod search;
pub mod semantic;
pub mod template;
pub mod types;
pub mod union;

// =============================================================================
// RE-EXPORTS: Core Types (from types module)
// =============================================================================

pub use types::{
    Entity, EntityId, EntityRef, FieldError, FieldMap, FieldNote, FieldValue, NoteKind, WeaveError,
};

// =============================================================================
// RE-EXPORTS: Schema and Graph
// =============================================================================

pub use graph::{DependencyEdge, DependencyGraph, GenerationOrder};
pub use schema::{
    Direction, MatchMode, Operator, ParsedEntity, ParsedField, ParsedSchema, RelatedType,
    parse_schema,
};

// =============================================================================
// RE-EXPORTS: Resolution
// =============================================================================

pub use cascade::Cascade;
pub use context::{CascadeOptions, ProgressCallback, ProgressEvent, ProgressKind};
pub use draft::{Draft, RefSlot, ReferenceSpec, draft};
pub use pipeline::Resolved;
pub use resolver::ReferenceResult;
pub use search::{Match, SearchStrategy};
pub use union::{FailureMode, SearchMode};

// =============================================================================
// RE-EXPORTS: Providers and Generators
// =============================================================================

pub use generator::{
    AiGenerator, FallbackPolicy, GeneratedValue, GenerationMetadata, GenerationRequest,
    GeneratorKind, PlaceholderGenerator, ValueGenerator,
};
pub use memory::MemoryStore;
pub use provider::{
    DataProvider, GenerationProvider, Link, LinkMetadata, ListOptions, RefFilter, SearchHit,
    SemanticProvider,
};
pub use semantic::{EmbeddingCache, HashEmbedder, cosine_similarity};
