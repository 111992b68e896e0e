//! # Engine Primitives
//!
//! Documented defaults and hard limits for the Weave engine.
//!
//! Every value here can be overridden per call through `CascadeOptions`,
//! except the limits, which bound work regardless of options.

/// Global fuzzy-match threshold.
///
/// Precedence: field threshold > call override > source `$fuzzyThreshold`
/// > candidate `$fuzzyThreshold` > this value.
pub const DEFAULT_FUZZY_THRESHOLD: f32 = 0.7;

/// Default cascade depth. The root sits at depth 0.
pub const DEFAULT_MAX_DEPTH: usize = 3;

/// Hard ceiling for `max_depth`, whatever the caller asks for.
pub const MAX_CASCADE_DEPTH: usize = 16;

/// Children generated for a required array relation absent from the input.
pub const DEFAULT_ARRAY_COUNT: usize = 1;

/// Upper bound on references in one array field.
pub const MAX_ARRAY_REFS: usize = 256;

// =============================================================================
// HYBRID RANKING
// =============================================================================

/// Reciprocal Rank Fusion constant `k`.
pub const RRF_K: f32 = 60.0;

/// Weight of the lexical rank in RRF.
pub const DEFAULT_FTS_WEIGHT: f32 = 0.5;

/// Weight of the semantic rank in RRF.
pub const DEFAULT_SEMANTIC_WEIGHT: f32 = 0.5;

/// Dimension of the built-in feature-hashing embedder.
pub const HASH_EMBEDDING_DIM: usize = 256;

// =============================================================================
// TIME BUDGETS
// =============================================================================

/// Per-call budget for AI-backed value generation, in milliseconds.
pub const DEFAULT_GENERATION_TIMEOUT_MS: u64 = 30_000;

/// Per-call budget for one type-scoped similarity search, in milliseconds.
pub const DEFAULT_SEARCH_TIMEOUT_MS: u64 = 10_000;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_threshold_in_unit_range() {
        assert!((0.0..=1.0).contains(&DEFAULT_FUZZY_THRESHOLD));
    }

    #[test]
    fn rrf_weights_are_equal() {
        assert_eq!(DEFAULT_FTS_WEIGHT, DEFAULT_SEMANTIC_WEIGHT);
    }
}
