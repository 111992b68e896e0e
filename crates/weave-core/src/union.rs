//! # Union-Type Fallback Search
//!
//! Resolves a fuzzy relation whose target may be one of several entity types.
//!
//! - `Ordered`: search candidates in list order; the first match at or above
//!   that candidate's threshold wins
//! - `Parallel`: search every candidate concurrently (`tokio::task::JoinSet`)
//!   and keep the best qualifying match; equal similarities go to the earlier
//!   candidate in the list
//!
//! A candidate whose search fails is excluded in `Continue` mode and aborts
//! the whole search in `Throw` mode. A single-type relation is a union of one.

use crate::WeaveError;
use crate::provider::{DataProvider, SemanticProvider};
use crate::search::{Match, SearchStrategy, TypeSearch, first_at_or_above};
use crate::semantic::EmbeddingCache;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;

/// How union candidates are searched.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SearchMode {
    #[default]
    Ordered,
    Parallel,
}

/// What a failing candidate search does to the union search.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureMode {
    #[default]
    Continue,
    Throw,
}

/// One candidate type and the threshold its matches must reach.
#[derive(Debug, Clone, PartialEq)]
pub struct Candidate {
    pub entity_type: String,
    pub threshold: f32,
}

/// The winning match and the candidate type it came from.
#[derive(Debug, Clone, PartialEq)]
pub struct UnionMatch {
    pub matched_type: String,
    pub found: Match,
}

/// Everything a union search learned.
#[derive(Debug, Clone, Default)]
pub struct UnionOutcome {
    /// The accepted match, if any candidate qualified.
    pub best: Option<UnionMatch>,
    /// Highest similarity seen across all candidates, qualifying or not.
    pub top_similarity: Option<(String, f32)>,
    /// Candidates excluded because their search failed (`Continue` mode only).
    pub failures: Vec<(String, WeaveError)>,
}

impl UnionOutcome {
    fn observe(&mut self, entity_type: &str, ranked: &[Match]) {
        if let Some(top) = ranked.first() {
            let better = self
                .top_similarity
                .as_ref()
                .is_none_or(|(_, s)| top.similarity > *s);
            if better {
                self.top_similarity = Some((entity_type.to_string(), top.similarity));
            }
        }
    }

    /// Every candidate failed, so nothing was actually searched.
    #[must_use]
    pub fn all_failed(&self, candidates: usize) -> bool {
        candidates > 0 && self.failures.len() == candidates
    }
}

/// Shared handles for searching several types.
#[derive(Clone)]
pub struct UnionSearch {
    data: Arc<dyn DataProvider>,
    semantic: Arc<dyn SemanticProvider>,
    cache: Arc<EmbeddingCache>,
    strategy: SearchStrategy,
    timeout: Duration,
    failure_mode: FailureMode,
}

impl UnionSearch {
    pub fn new(
        data: Arc<dyn DataProvider>,
        semantic: Arc<dyn SemanticProvider>,
        cache: Arc<EmbeddingCache>,
    ) -> Self {
        Self {
            data,
            semantic,
            cache,
            strategy: SearchStrategy::default(),
            timeout: Duration::from_millis(crate::primitives::DEFAULT_SEARCH_TIMEOUT_MS),
            failure_mode: FailureMode::default(),
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

    #[must_use]
    pub fn failure_mode(mut self, failure_mode: FailureMode) -> Self {
        self.failure_mode = failure_mode;
        self
    }

    /// Search `candidates` for `hint` in the given mode.
    pub async fn search(
        &self,
        candidates: &[Candidate],
        hint: &str,
        mode: SearchMode,
    ) -> Result<UnionOutcome, WeaveError> {
        match mode {
            SearchMode::Ordered => self.search_ordered(candidates, hint).await,
            SearchMode::Parallel => self.search_parallel(candidates, hint).await,
        }
    }

    async fn rank_one(&self, entity_type: &str, hint: &str) -> Result<Vec<Match>, WeaveError> {
        TypeSearch::new(self.data.as_ref(), self.semantic.as_ref(), self.cache.as_ref())
            .strategy(self.strategy)
            .timeout(self.timeout)
            .rank(entity_type, hint)
            .await
    }

    async fn search_ordered(
        &self,
        candidates: &[Candidate],
        hint: &str,
    ) -> Result<UnionOutcome, WeaveError> {
        let mut outcome = UnionOutcome::default();
        for candidate in candidates {
            let ranked = match self.rank_one(&candidate.entity_type, hint).await {
                Ok(ranked) => ranked,
                Err(e) => {
                    self.on_failure(&mut outcome, &candidate.entity_type, e)?;
                    continue;
                }
            };
            outcome.observe(&candidate.entity_type, &ranked);
            if let Some(found) = first_at_or_above(&ranked, candidate.threshold) {
                outcome.best = Some(UnionMatch {
                    matched_type: candidate.entity_type.clone(),
                    found: found.clone(),
                });
                return Ok(outcome);
            }
        }
        Ok(outcome)
    }

    async fn search_parallel(
        &self,
        candidates: &[Candidate],
        hint: &str,
    ) -> Result<UnionOutcome, WeaveError> {
        let mut tasks = JoinSet::new();
        for (index, candidate) in candidates.iter().enumerate() {
            let search = self.clone();
            let entity_type = candidate.entity_type.clone();
            let hint = hint.to_string();
            tasks.spawn(async move {
                let ranked = search.rank_one(&entity_type, &hint).await;
                (index, ranked)
            });
        }

        let mut results: Vec<Option<Result<Vec<Match>, WeaveError>>> =
            (0..candidates.len()).map(|_| None).collect();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((index, ranked)) => {
                    if let Some(slot) = results.get_mut(index) {
                        *slot = Some(ranked);
                    }
                }
                Err(e) => {
                    return Err(WeaveError::Provider(format!("search task failed: {}", e)));
                }
            }
        }

        // Equal similarities keep the earlier candidate.
        let mut outcome = UnionOutcome::default();
        for (candidate, result) in candidates.iter().zip(results) {
            let ranked = match result {
                Some(Ok(ranked)) => ranked,
                Some(Err(e)) => {
                    self.on_failure(&mut outcome, &candidate.entity_type, e)?;
                    continue;
                }
                None => continue,
            };
            outcome.observe(&candidate.entity_type, &ranked);
            let Some(found) = first_at_or_above(&ranked, candidate.threshold) else {
                continue;
            };
            let better = outcome
                .best
                .as_ref()
                .is_none_or(|b| found.similarity > b.found.similarity);
            if better {
                outcome.best = Some(UnionMatch {
                    matched_type: candidate.entity_type.clone(),
                    found: found.clone(),
                });
            }
        }
        Ok(outcome)
    }

    fn on_failure(
        &self,
        outcome: &mut UnionOutcome,
        entity_type: &str,
        error: WeaveError,
    ) -> Result<(), WeaveError> {
        match self.failure_mode {
            FailureMode::Throw => Err(error),
            FailureMode::Continue => {
                tracing::warn!(entity_type, error = %error, "candidate search failed, excluded");
                outcome.failures.push((entity_type.to_string(), error));
                Ok(())
            }
        }
    }
}
