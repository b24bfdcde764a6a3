//! Top-level retrieval orchestrator.
//!
//! # Pipeline
//!
//! ```ascii
//!   query, top_k
//!        │
//!        ├──────────────┬──────────────┐
//!        ▼              ▼              │ (concurrent, both must finish)
//!   dense(top_k*m)  lexical(top_k*m)   │
//!        └──────┬───────┘              │
//!               ▼                      │
//!            fusion ─► gate ─► [rerank top rerank_top_k] ─► trim top_k
//!                                       │
//!                                       ▼
//!                               RetrievalStats ─► bounded history
//! ```
//!
//! Stage errors propagate unchanged; nothing is swallowed and no partial
//! results are returned.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Instant;
use tracing::debug;

use super::config::RetrievalConfig;
use super::cross_encoder::{CrossEncoderReranker, RerankCacheStats};
use super::fusion::fusion_for;
use super::gate::DynamicGate;
use super::result::SearchResult;
use super::stats::{PerformanceSummary, RetrievalStats, SkipReason, StatsHistory};
use super::traits::{PairScorer, ScoreFusion, SearchBackend};
use crate::clock::{Clock, SharedClock, SystemClock};
use crate::error::{Result, RetrievalError};

/// Per-call knobs used by degradation-aware callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetrieveOptions {
    /// When false the rerank stage is skipped with `degraded_mode`.
    pub allow_rerank: bool,
    /// Each backend is asked for `top_k * candidate_multiplier` candidates.
    pub candidate_multiplier: usize,
}

impl Default for RetrieveOptions {
    fn default() -> Self {
        Self {
            allow_rerank: true,
            candidate_multiplier: 2,
        }
    }
}

impl RetrieveOptions {
    /// Fewer candidates, rerank allowed.
    pub fn reduced() -> Self {
        Self {
            allow_rerank: true,
            candidate_multiplier: 1,
        }
    }

    /// Fewer candidates, no rerank.
    pub fn essential() -> Self {
        Self {
            allow_rerank: false,
            candidate_multiplier: 1,
        }
    }
}

fn elapsed_ms(clock: &dyn Clock, since: Instant) -> f64 {
    clock.now().saturating_duration_since(since).as_secs_f64() * 1000.0
}

/// Dense + lexical retrieval, fusion, gated reranking.
///
/// # Example
///
/// ```ignore
/// use std::sync::Arc;
/// use edgequake_retrieval::{DenseIndex, LexicalIndex, RetrievalConfig, RetrievalReranker};
///
/// let pipeline = RetrievalReranker::new(
///     RetrievalConfig::default(),
///     Arc::new(DenseIndex::new(docs.clone())),
///     Arc::new(LexicalIndex::new(docs)),
/// )?;
/// let (results, stats) = pipeline.retrieve_and_rerank("token bucket", 5).await?;
/// ```
pub struct RetrievalReranker {
    config: RetrievalConfig,
    dense: Arc<dyn SearchBackend>,
    lexical: Arc<dyn SearchBackend>,
    fusion: Box<dyn ScoreFusion>,
    gate: DynamicGate,
    reranker: CrossEncoderReranker,
    clock: SharedClock,
    history: Mutex<StatsHistory>,
}

impl RetrievalReranker {
    /// Build with the system clock. Weights are normalized.
    pub fn new(
        config: RetrievalConfig,
        dense: Arc<dyn SearchBackend>,
        lexical: Arc<dyn SearchBackend>,
    ) -> Result<Self> {
        Self::with_clock(config, dense, lexical, SystemClock::shared())
    }

    /// Build with an explicit clock.
    pub fn with_clock(
        config: RetrievalConfig,
        dense: Arc<dyn SearchBackend>,
        lexical: Arc<dyn SearchBackend>,
        clock: SharedClock,
    ) -> Result<Self> {
        let config = config.normalized()?;
        Ok(Self {
            fusion: fusion_for(&config),
            gate: DynamicGate::new(config.clone()),
            reranker: CrossEncoderReranker::with_clock(&config, clock.clone()),
            history: Mutex::new(StatsHistory::new(config.stats_history_size)),
            config,
            dense,
            lexical,
            clock,
        })
    }

    /// Replace the cross-encoder's pair scorer.
    pub fn with_scorer(mut self, scorer: Arc<dyn PairScorer>) -> Self {
        self.reranker = self.reranker.with_scorer(scorer);
        self
    }

    /// Normalized configuration in effect.
    pub fn config(&self) -> &RetrievalConfig {
        &self.config
    }

    /// Run the full pipeline with default options.
    pub async fn retrieve_and_rerank(
        &self,
        query: &str,
        top_k: usize,
    ) -> Result<(Vec<SearchResult>, RetrievalStats)> {
        self.retrieve_with_options(query, top_k, RetrieveOptions::default())
            .await
    }

    /// Run the full pipeline.
    pub async fn retrieve_with_options(
        &self,
        query: &str,
        top_k: usize,
        options: RetrieveOptions,
    ) -> Result<(Vec<SearchResult>, RetrievalStats)> {
        if query.trim().is_empty() {
            return Err(RetrievalError::InvalidQuery("query is empty".to_string()));
        }
        if top_k == 0 {
            return Err(RetrievalError::InvalidQuery(
                "top_k must be at least 1".to_string(),
            ));
        }

        let start = self.clock.now();
        let mut stats = RetrievalStats {
            query: query.to_string(),
            top_k,
            timestamp_ms: self.clock.unix_millis(),
            fusion_method: self.fusion.name().to_string(),
            ..Default::default()
        };

        let limit = top_k.saturating_mul(options.candidate_multiplier.max(1));
        let clock = self.clock.as_ref();
        let dense_stage = async {
            let t = clock.now();
            let results = self.dense.search(query, limit).await?;
            Ok::<_, RetrievalError>((results, elapsed_ms(clock, t)))
        };
        let lexical_stage = async {
            let t = clock.now();
            let results = self.lexical.search(query, limit).await?;
            Ok::<_, RetrievalError>((results, elapsed_ms(clock, t)))
        };
        let ((dense, dense_ms), (lexical, lexical_ms)) =
            tokio::try_join!(dense_stage, lexical_stage)?;

        stats.dense_count = dense.len();
        stats.lexical_count = lexical.len();
        stats.dense_latency_ms = dense_ms;
        stats.lexical_latency_ms = lexical_ms;

        let t = clock.now();
        let fused = self.fusion.fuse(dense, lexical);
        stats.fusion_latency_ms = elapsed_ms(clock, t);
        stats.fused_count = fused.len();

        let t = clock.now();
        let (should_rerank, skip_reason) = if options.allow_rerank {
            self.gate.should_rerank(&fused, query, &mut stats)
        } else {
            (false, Some(SkipReason::DegradedMode))
        };
        stats.gate_latency_ms = elapsed_ms(clock, t);

        let mut results = if should_rerank {
            let scored = self.config.rerank_top_k.min(fused.len());
            let (reranked, latency_ms) = self
                .reranker
                .rerank(query, fused, self.config.rerank_top_k)
                .await?;
            stats.rerank_invoked = true;
            stats.reranked_count = scored;
            stats.rerank_latency_ms = latency_ms;
            reranked
        } else {
            stats.skip_reason = skip_reason;
            stats.rerank_latency_ms = 0.0;
            fused
        };

        results.truncate(top_k);
        stats.final_count = results.len();
        stats.total_latency_ms = elapsed_ms(clock, start);

        debug!(
            top_k,
            dense = stats.dense_count,
            lexical = stats.lexical_count,
            fused = stats.fused_count,
            reranked = stats.rerank_invoked,
            skip_reason = ?stats.skip_reason,
            total_ms = stats.total_latency_ms,
            "Retrieval complete"
        );

        self.history.lock().push(stats.clone());
        Ok((results, stats))
    }

    /// Fraction of retained queries that invoked the cross-encoder.
    pub fn get_rerank_invocation_rate(&self) -> f64 {
        self.history.lock().rerank_invocation_rate()
    }

    /// Aggregates over the retained history.
    pub fn get_performance_summary(&self) -> PerformanceSummary {
        self.history.lock().summary()
    }

    /// Newest `n` stats records, oldest first.
    pub fn get_recent_stats(&self, n: usize) -> Vec<RetrievalStats> {
        self.history.lock().recent(n)
    }

    /// Drop the retained history.
    pub fn clear_stats(&self) {
        self.history.lock().clear();
    }

    /// Cross-encoder cache counters.
    pub fn cache_stats(&self) -> RerankCacheStats {
        self.reranker.cache_stats()
    }
}
