//! # Semantic Scoring
//!
//! Similarity primitives used by fuzzy resolution:
//!
//! - `cosine_similarity` over embedding vectors
//! - `rrf_fuse`, reciprocal rank fusion of a lexical and a semantic ranking
//! - `HashEmbedder`, a deterministic feature-hashing `SemanticProvider`
//! - `EmbeddingCache`, a read-through cache scoped to one top-level call
//!
//! Texts are normalized (trimmed, whitespace collapsed, lowercased) before
//! embedding, so the cache fingerprint and the embedded text always agree.

use crate::WeaveError;
use crate::primitives::HASH_EMBEDDING_DIM;
use crate::provider::SemanticProvider;
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::RwLock;

// =============================================================================
// SIMILARITY
// =============================================================================

/// Cosine similarity in `[-1, 1]`.
///
/// Returns 0.0 for empty, mismatched or zero-length vectors.
#[must_use]
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.is_empty() || a.len() != b.len() {
        return 0.0;
    }
    let mut dot = 0.0_f32;
    let mut norm_a = 0.0_f32;
    let mut norm_b = 0.0_f32;
    for (x, y) in a.iter().zip(b) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    (dot / (norm_a.sqrt() * norm_b.sqrt())).clamp(-1.0, 1.0)
}

/// Reciprocal rank fusion.
///
/// `score = fts_weight / (k + fts_rank) + semantic_weight / (k + semantic_rank)`
/// with 1-based ranks. A key missing from one ranking only gets the other term.
/// The result is sorted by descending score; ties keep semantic order.
#[must_use]
pub fn rrf_fuse<K: Ord + Clone>(
    lexical: &[K],
    semantic: &[K],
    k: f32,
    fts_weight: f32,
    semantic_weight: f32,
) -> Vec<(K, f32)> {
    let mut scores: BTreeMap<K, (f32, usize)> = BTreeMap::new();
    for (i, key) in semantic.iter().enumerate() {
        let entry = scores.entry(key.clone()).or_insert((0.0, i));
        entry.0 += semantic_weight / (k + (i + 1) as f32);
    }
    let tail = semantic.len();
    for (i, key) in lexical.iter().enumerate() {
        let entry = scores.entry(key.clone()).or_insert((0.0, tail + i));
        entry.0 += fts_weight / (k + (i + 1) as f32);
    }

    let mut fused: Vec<(K, f32, usize)> = scores
        .into_iter()
        .map(|(key, (score, first))| (key, score, first))
        .collect();
    fused.sort_by(|a, b| b.1.total_cmp(&a.1).then(a.2.cmp(&b.2)));
    fused.into_iter().map(|(key, score, _)| (key, score)).collect()
}

/// Lowercase, trim and collapse runs of whitespace.
#[must_use]
pub fn normalize_text(text: &str) -> String {
    text.split_whitespace()
        .map(str::to_lowercase)
        .collect::<Vec<_>>()
        .join(" ")
}

// =============================================================================
// HASH EMBEDDER
// =============================================================================

/// Deterministic bag-of-words embedder.
///
/// Each alphanumeric token is hashed with BLAKE3 into one signed bucket of a
/// fixed-width vector, which is then L2-normalized. Texts sharing tokens score
/// positive similarity; identical texts score 1.0.
#[derive(Debug, Clone)]
pub struct HashEmbedder {
    dim: usize,
}

impl Default for HashEmbedder {
    fn default() -> Self {
        Self::new(HASH_EMBEDDING_DIM)
    }
}

impl HashEmbedder {
    #[must_use]
    pub fn new(dim: usize) -> Self {
        Self { dim: dim.max(1) }
    }

    /// Embed synchronously.
    #[must_use]
    pub fn embed_text(&self, text: &str) -> Vec<f32> {
        let mut v = vec![0.0_f32; self.dim];
        let normalized = normalize_text(text);
        for token in normalized
            .split(|c: char| !c.is_alphanumeric())
            .filter(|t| !t.is_empty())
        {
            let digest = blake3::hash(token.as_bytes());
            let bytes = digest.as_bytes();
            let bucket = u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]) as usize
                % self.dim;
            let sign = if bytes[4] & 1 == 0 { 1.0 } else { -1.0 };
            v[bucket] += sign;
        }
        let norm = v.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > 0.0 {
            for x in &mut v {
                *x /= norm;
            }
        }
        v
    }
}

#[async_trait]
impl SemanticProvider for HashEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, WeaveError> {
        Ok(self.embed_text(text))
    }
}

// =============================================================================
// EMBEDDING CACHE
// =============================================================================

/// Read-through embedding cache keyed by the BLAKE3 fingerprint of normalized text.
///
/// Shared by concurrent resolutions of one top-level call and dropped with it,
/// so nothing goes stale across calls.
#[derive(Debug, Default)]
pub struct EmbeddingCache {
    vectors: RwLock<BTreeMap<[u8; 32], Arc<Vec<f32>>>>,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl EmbeddingCache {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Fingerprint of a text after normalization.
    fn fingerprint(text: &str) -> [u8; 32] {
        *blake3::hash(normalize_text(text).as_bytes()).as_bytes()
    }

    /// Embed `text` through `provider`, reusing a cached vector when present.
    pub async fn embed(
        &self,
        provider: &dyn SemanticProvider,
        text: &str,
    ) -> Result<Arc<Vec<f32>>, WeaveError> {
        let normalized = normalize_text(text);
        let key = Self::fingerprint(&normalized);

        if let Some(v) = self.vectors.read().await.get(&key) {
            self.hits.fetch_add(1, Ordering::Relaxed);
            return Ok(Arc::clone(v));
        }

        self.misses.fetch_add(1, Ordering::Relaxed);
        let vector = Arc::new(provider.embed(&normalized).await?);
        let mut vectors = self.vectors.write().await;
        Ok(Arc::clone(vectors.entry(key).or_insert(vector)))
    }

    /// (hits, misses) so far.
    #[must_use]
    pub fn stats(&self) -> (u64, u64) {
        (
            self.hits.load(Ordering::Relaxed),
            self.misses.load(Ordering::Relaxed),
        )
    }

    pub async fn len(&self) -> usize {
        self.vectors.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.vectors.read().await.is_empty()
    }
}

// =============================================================================
// TESTS
// =============================================================================
