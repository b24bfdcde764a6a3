//! Cross-encoder reranking of the leading candidates.
//!
//! # Flow
//!
//! ```ascii
//! results ──┬── [0, top_k) ─► score each (cache ─► scorer + inference delay)
//!           │                    └─► sort desc by final_score
//!           └── [top_k, n) ─────────────────────────────┐ (order kept)
//!                                                       ▼
//!                              reranked prefix ++ unscored tail
//! ```
//!
//! Model inference is simulated: [`PairScorer`] produces the relevance score
//! and the injected [`Clock`](crate::clock::Clock) sleeps
//! `per_result_latency` for every cache miss.

use lru::LruCache;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use super::config::RetrievalConfig;
use super::result::SearchResult;
use super::tokenize::{tokenize, TokenizerConfig};
use super::traits::PairScorer;
use crate::clock::{SharedClock, SystemClock};
use crate::error::{Result, RetrievalError};

// ============================================================================
// Pair scorer
// ============================================================================

/// Deterministic term-overlap + phrase-proximity scorer.
///
/// ```ascii
/// score = 0.7 × |q ∩ d| / |q|  +  0.3 × matched adjacent query pairs / pairs
/// ```
#[derive(Debug, Clone)]
pub struct LexicalPairScorer {
    tokenizer: TokenizerConfig,
    overlap_weight: f64,
    phrase_weight: f64,
}

impl LexicalPairScorer {
    pub fn new() -> Self {
        Self {
            tokenizer: TokenizerConfig::default(),
            overlap_weight: 0.7,
            phrase_weight: 0.3,
        }
    }

    fn phrase_bonus(query_terms: &[String], doc_terms: &[String]) -> f64 {
        if query_terms.len() < 2 || doc_terms.len() < 2 {
            return 0.0;
        }
        let pairs = query_terms.len() - 1;
        let matched = query_terms
            .windows(2)
            .filter(|q| doc_terms.windows(2).any(|d| d[0] == q[0] && d[1] == q[1]))
            .count();
        matched as f64 / pairs as f64
    }
}

impl Default for LexicalPairScorer {
    fn default() -> Self {
        Self::new()
    }
}

impl PairScorer for LexicalPairScorer {
    fn name(&self) -> &str {
        "lexical-pair"
    }

    fn score(&self, query: &str, result: &SearchResult) -> f64 {
        let query_terms = tokenize(query, &self.tokenizer);
        if query_terms.is_empty() {
            return 0.0;
        }
        let text = if result.title.is_empty() {
            result.content.clone()
        } else {
            format!("{} {}", result.title, result.content)
        };
        let doc_terms = tokenize(&text, &self.tokenizer);

        let matched = query_terms
            .iter()
            .filter(|t| doc_terms.contains(t))
            .count();
        let overlap = matched as f64 / query_terms.len() as f64;

        self.overlap_weight * overlap
            + self.phrase_weight * Self::phrase_bonus(&query_terms, &doc_terms)
    }
}

// ============================================================================
// Reranker
// ============================================================================

/// Cache key for one (query, document) pair.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct RerankCacheKey {
    query: String,
    doc_id: String,
}

/// Score cache counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct RerankCacheStats {
    pub hits: u64,
    pub misses: u64,
    pub size: usize,
    pub capacity: usize,
}

impl RerankCacheStats {
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

fn millis_to_duration(ms: f64) -> Duration {
    Duration::from_micros((ms.max(0.0) * 1000.0).round() as u64)
}

/// Reorders the leading candidates by pairwise relevance.
pub struct CrossEncoderReranker {
    model: String,
    scorer: Arc<dyn PairScorer>,
    clock: SharedClock,
    per_result_latency: Duration,
    cache: Mutex<LruCache<RerankCacheKey, f64>>,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl std::fmt::Debug for CrossEncoderReranker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CrossEncoderReranker")
            .field("model", &self.model)
            .field("scorer", &self.scorer.name())
            .field("per_result_latency", &self.per_result_latency)
            .finish()
    }
}

impl CrossEncoderReranker {
    /// Build from config with the system clock and the lexical pair scorer.
    pub fn new(config: &RetrievalConfig) -> Self {
        Self::with_clock(config, SystemClock::shared())
    }

    /// Build from config with an explicit clock.
    pub fn with_clock(config: &RetrievalConfig, clock: SharedClock) -> Self {
        let capacity = NonZeroUsize::new(config.rerank_cache_size).unwrap_or(NonZeroUsize::MIN);
        Self {
            model: config.rerank_model.clone(),
            scorer: Arc::new(LexicalPairScorer::new()),
            clock,
            per_result_latency: millis_to_duration(config.per_result_latency_ms),
            cache: Mutex::new(LruCache::new(capacity)),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    /// Replace the pair scorer.
    pub fn with_scorer(mut self, scorer: Arc<dyn PairScorer>) -> Self {
        self.scorer = scorer;
        self
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    async fn score_one(&self, query: &str, result: &SearchResult) -> Result<f64> {
        let key = RerankCacheKey {
            query: query.to_string(),
            doc_id: result.id.clone(),
        };

        let cached = self.cache.lock().get(&key).copied();
        if let Some(score) = cached {
            self.hits.fetch_add(1, AtomicOrdering::Relaxed);
            return Ok(score);
        }

        self.misses.fetch_add(1, AtomicOrdering::Relaxed);
        self.clock.sleep(self.per_result_latency).await;

        let score = self.scorer.score(query, result);
        if !score.is_finite() {
            return Err(RetrievalError::Rerank(format!(
                "{} produced a non-finite score for '{}'",
                self.scorer.name(),
                result.id
            )));
        }

        self.cache.lock().put(key, score);
        Ok(score)
    }

    /// Rerank the first `top_k` results.
    ///
    /// Returns the reordered list and the rerank latency in milliseconds.
    pub async fn rerank(
        &self,
        query: &str,
        mut results: Vec<SearchResult>,
        top_k: usize,
    ) -> Result<(Vec<SearchResult>, f64)> {
        let start = self.clock.now();
        let split = top_k.min(results.len());
        let tail = results.split_off(split);
        let mut head = results;

        for result in &mut head {
            let score = self.score_one(query, result).await?;
            result.set_rerank_score(score);
        }

        head.sort_by(|a, b| {
            b.final_score
                .partial_cmp(&a.final_score)
                .unwrap_or(Ordering::Equal)
        });

        let latency_ms = self.clock.now().duration_since(start).as_secs_f64() * 1000.0;
        if !head.is_empty() {
            let share = latency_ms / head.len() as f64;
            for result in &mut head {
                result.rerank_latency_ms = Some(share);
            }
        }

        debug!(
            model = %self.model,
            scored = head.len(),
            passed_through = tail.len(),
            latency_ms,
            "Reranked candidates"
        );

        head.extend(tail);
        Ok((head, latency_ms))
    }

    pub fn cache_stats(&self) -> RerankCacheStats {
        let cache = self.cache.lock();
        RerankCacheStats {
            hits: self.hits.load(AtomicOrdering::Relaxed),
            misses: self.misses.load(AtomicOrdering::Relaxed),
            size: cache.len(),
            capacity: cache.cap().get(),
        }
    }

    pub fn clear_cache(&self) {
        self.cache.lock().clear();
    }
}
