//! # Type-Scoped Search
//!
//! Ranks the existing entities of one type against a hint text.
//!
//! - `Semantic`: cosine similarity between the hint and each candidate's
//!   searchable text
//! - `Hybrid`: reciprocal rank fusion of the data provider's lexical ranking
//!   and the semantic ranking
//!
//! Whatever the strategy, a match is accepted by comparing its cosine
//! similarity with the threshold. Equal similarities favour the most recently
//! created entity (later in `list` order).

use crate::primitives::{DEFAULT_FTS_WEIGHT, DEFAULT_SEMANTIC_WEIGHT, RRF_K};
use crate::provider::{DataProvider, ListOptions, SemanticProvider};
use crate::semantic::{EmbeddingCache, cosine_similarity, rrf_fuse};
use crate::{Entity, EntityId, WeaveError};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;

/// How candidates are ranked.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SearchStrategy {
    #[default]
    Semantic,
    Hybrid,
}

/// One ranked candidate.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Match {
    pub entity: Entity,
    /// Cosine similarity to the hint.
    pub similarity: f32,
    /// Ranking score (similarity, or the RRF score in hybrid mode).
    pub score: f32,
}

/// The first match in rank order whose similarity reaches `threshold`.
#[must_use]
pub fn first_at_or_above(ranked: &[Match], threshold: f32) -> Option<&Match> {
    ranked.iter().find(|m| m.similarity >= threshold)
}

/// Search over one entity type at a time.
pub struct TypeSearch<'a> {
    data: &'a dyn DataProvider,
    semantic: &'a dyn SemanticProvider,
    cache: &'a EmbeddingCache,
    strategy: SearchStrategy,
    timeout: Duration,
}

impl<'a> TypeSearch<'a> {
    pub fn new(
        data: &'a dyn DataProvider,
        semantic: &'a dyn SemanticProvider,
        cache: &'a EmbeddingCache,
    ) -> Self {
        Self {
            data,
            semantic,
            cache,
            strategy: SearchStrategy::Semantic,
            timeout: Duration::from_millis(crate::primitives::DEFAULT_SEARCH_TIMEOUT_MS),
        }
    }

    #[must_use]
    pub fn strategy(mut self, strategy: SearchStrategy) -> Self {
        self.strategy = strategy;
        self
    }

    #[must_use]
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Rank every entity of `entity_type` against `hint`, best first.
    ///
    /// Fails with `Timeout` when the whole search exceeds the budget.
    pub async fn rank(&self, entity_type: &str, hint: &str) -> Result<Vec<Match>, WeaveError> {
        let budget_ms = u64::try_from(self.timeout.as_millis()).unwrap_or(u64::MAX);
        tokio::time::timeout(self.timeout, self.rank_inner(entity_type, hint))
            .await
            .map_err(|_| WeaveError::Timeout(budget_ms))?
    }

    async fn rank_inner(&self, entity_type: &str, hint: &str) -> Result<Vec<Match>, WeaveError> {
        let candidates = self.data.list(entity_type, &ListOptions::default()).await?;
        if candidates.is_empty() {
            return Ok(Vec::new());
        }

        let query = self.cache.embed(self.semantic, hint).await?;
        let mut scored: Vec<(usize, Entity, f32)> = Vec::with_capacity(candidates.len());
        for (pos, entity) in candidates.into_iter().enumerate() {
            let text = entity.searchable_text();
            let similarity = if text.is_empty() {
                0.0
            } else {
                let v = self.cache.embed(self.semantic, &text).await?;
                cosine_similarity(&query, &v)
            };
            scored.push((pos, entity, similarity));
        }

        // Highest similarity first, then the most recently created.
        scored.sort_by(|a, b| b.2.total_cmp(&a.2).then(b.0.cmp(&a.0)));

        let matches = match self.strategy {
            SearchStrategy::Semantic => scored
                .into_iter()
                .map(|(_, entity, similarity)| Match {
                    entity,
                    similarity,
                    score: similarity,
                })
                .collect(),
            SearchStrategy::Hybrid => self.fuse(entity_type, hint, scored).await?,
        };
        tracing::debug!(entity_type, candidates = matches.len(), strategy = ?self.strategy, "type search ranked");
        Ok(matches)
    }

    async fn fuse(
        &self,
        entity_type: &str,
        hint: &str,
        scored: Vec<(usize, Entity, f32)>,
    ) -> Result<Vec<Match>, WeaveError> {
        let lexical: Vec<EntityId> = self
            .data
            .search(entity_type, hint, scored.len())
            .await?
            .into_iter()
            .map(|hit| hit.entity.id)
            .collect();
        let semantic: Vec<EntityId> = scored.iter().map(|(_, e, _)| e.id.clone()).collect();

        let mut by_id: BTreeMap<EntityId, (Entity, f32)> = scored
            .into_iter()
            .map(|(_, e, s)| (e.id.clone(), (e, s)))
            .collect();

        Ok(rrf_fuse(
            &lexical,
            &semantic,
            RRF_K,
            DEFAULT_FTS_WEIGHT,
            DEFAULT_SEMANTIC_WEIGHT,
        )
        .into_iter()
        .filter_map(|(id, score)| {
            by_id.remove(&id).map(|(entity, similarity)| Match {
                entity,
                similarity,
                score,
            })
        })
        .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryStore;
    use crate::semantic::HashEmbedder;
    use crate::{FieldMap, FieldValue};

    async fn store_with(titles: &[&str]) -> MemoryStore {
        let store = MemoryStore::new();
        for title in titles {
            let mut fields = FieldMap::new();
            fields.insert("name".into(), FieldValue::text(*title));
            store.create("Category", None, fields).await.expect("create");
        }
        store
    }

    fn name(m: &Match) -> &str {
        m.entity.get("name").and_then(FieldValue::as_text).unwrap_or_default()
    }

    #[tokio::test]
    async fn semantic_ranking_puts_best_first() {
        let store = store_with(&["Gardening", "Distributed Databases", "Databases"]).await;
        let embedder = HashEmbedder::default();
        let cache = EmbeddingCache::new();
        let ranked = TypeSearch::new(&store, &embedder, &cache)
            .rank("Category", "databases")
            .await
            .expect("rank");

        assert_eq!(ranked.len(), 3);
        assert_eq!(name(&ranked[0]), "Databases");
        assert!((ranked[0].similarity - 1.0).abs() < 1e-6);
        assert!(ranked[1].similarity > ranked[2].similarity);
    }

    #[tokio::test]
    async fn equal_similarity_prefers_most_recent() {
        let store = store_with(&["Rust", "rust"]).await;
        let embedder = HashEmbedder::default();
        let cache = EmbeddingCache::new();
        let ranked = TypeSearch::new(&store, &embedder, &cache)
            .rank("Category", "RUST")
            .await
            .expect("rank");
        assert_eq!(name(&ranked[0]), "rust");
    }

    #[tokio::test]
    async fn hybrid_keeps_cosine_similarity_for_gating() {
        let store = store_with(&["Databases", "Compilers"]).await;
        let embedder = HashEmbedder::default();
        let cache = EmbeddingCache::new();
        let ranked = TypeSearch::new(&store, &embedder, &cache)
            .strategy(SearchStrategy::Hybrid)
            .rank("Category", "databases")
            .await
            .expect("rank");

        assert_eq!(name(&ranked[0]), "Databases");
        assert!(ranked[0].score < 1.0);
        assert!((ranked[0].similarity - 1.0).abs() < 1e-6);
        assert!(first_at_or_above(&ranked, 0.99).is_some());
        assert!(first_at_or_above(&ranked[1..], 0.5).is_none());
    }

    #[tokio::test]
    async fn empty_type_ranks_nothing() {
        let store = MemoryStore::new();
        let embedder = HashEmbedder::default();
        let cache = EmbeddingCache::new();
        let ranked = TypeSearch::new(&store, &embedder, &cache)
            .rank("Category", "anything")
            .await
            .expect("rank");
        assert!(ranked.is_empty());
        assert!(cache.is_empty().await);
    }
}
