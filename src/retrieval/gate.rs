//! Dynamic gate: decides whether the fused list needs cross-encoder reranking.
//!
//! # Decision Order (first match wins)
//!
//! ```ascii
//! 1. dynamic gating disabled        ─► rerank
//! 2. reranking disabled             ─► skip  reranking_disabled
//! 3. < 2 results                    ─► skip  insufficient_results
//! 4. gap = top1 - top2 > threshold
//!      top1 from dense AND lexical  ─► skip  score_gap_with_lexical_agreement
//!      gap > 2 * threshold          ─► skip  large_score_gap
//! 5. n * per_result * complexity
//!      > max_rerank_latency_ms      ─► skip  expected_latency_too_high
//! 6. fusion confidence (diagnostic; low confidence proceeds to rerank)
//! 7.                                ─► rerank
//! ```
//!
//! `complexity = 1 + (query_words - 5) * 0.1`

use tracing::debug;

use super::config::RetrievalConfig;
use super::result::SearchResult;
use super::stats::{RetrievalStats, SkipReason};

/// Stateless rerank gate over a [`RetrievalConfig`].
#[derive(Debug, Clone)]
pub struct DynamicGate {
    config: RetrievalConfig,
}

impl DynamicGate {
    pub fn new(config: RetrievalConfig) -> Self {
        Self { config }
    }

    /// Decide whether to rerank `results` for `query`.
    ///
    /// Diagnostics (`score_gap`, `lexical_agreement`, `fusion_confidence`,
    /// `low_confidence`) are written into `stats` as they are computed.
    pub fn should_rerank(
        &self,
        results: &[SearchResult],
        query: &str,
        stats: &mut RetrievalStats,
    ) -> (bool, Option<SkipReason>) {
        if !self.config.enable_dynamic_gating {
            return (true, None);
        }

        if !self.config.enable_reranking {
            return (false, Some(SkipReason::RerankingDisabled));
        }

        if results.len() < 2 {
            return (false, Some(SkipReason::InsufficientResults));
        }

        let score_gap = results[0].fused_score - results[1].fused_score;
        stats.score_gap = Some(score_gap);
        stats.lexical_agreement = Some(self.lexical_agreement(results));

        if score_gap > self.config.rerank_threshold {
            if results[0].has_cross_method_agreement() {
                debug!(
                    score_gap,
                    top_id = %results[0].id,
                    "Gate skip: clear winner with cross-method agreement"
                );
                return (false, Some(SkipReason::ScoreGapWithLexicalAgreement));
            }
            if score_gap > 2.0 * self.config.rerank_threshold {
                debug!(score_gap, "Gate skip: large score gap");
                return (false, Some(SkipReason::LargeScoreGap));
            }
        }

        let expected_ms = self.expected_latency_ms(results.len(), query);
        if expected_ms > self.config.max_rerank_latency_ms {
            debug!(
                expected_ms,
                budget_ms = self.config.max_rerank_latency_ms,
                "Gate skip: expected rerank latency over budget"
            );
            return (false, Some(SkipReason::ExpectedLatencyTooHigh));
        }

        let confidence = fusion_confidence(results);
        stats.fusion_confidence = Some(confidence);
        let adjusted = confidence
            + stats.lexical_agreement.unwrap_or(0.0) * self.config.lexical_agreement_bonus;
        if adjusted < self.config.min_fusion_confidence {
            stats.low_confidence = true;
            debug!(confidence, adjusted, "Low fusion confidence, reranking");
        }

        (true, None)
    }

    /// Estimated rerank cost for `result_count` candidates.
    pub fn expected_latency_ms(&self, result_count: usize, query: &str) -> f64 {
        result_count as f64 * self.config.per_result_latency_ms * complexity_factor(query)
    }

    /// Fraction of the first `rerank_top_k` results surfaced by both methods.
    pub fn lexical_agreement(&self, results: &[SearchResult]) -> f64 {
        let window = results.len().min(self.config.rerank_top_k);
        if window == 0 {
            return 0.0;
        }
        let agreeing = results[..window]
            .iter()
            .filter(|r| r.has_cross_method_agreement())
            .count();
        agreeing as f64 / window as f64
    }
}

/// Query complexity multiplier: longer queries cost more to score.
pub fn complexity_factor(query: &str) -> f64 {
    let words = query.split_whitespace().count() as f64;
    1.0 + (words - 5.0) * 0.1
}

/// `max(0, 1 - cv)` over every fused score; 0 when the mean is not positive.
pub fn fusion_confidence(results: &[SearchResult]) -> f64 {
    if results.is_empty() {
        return 0.0;
    }
    let n = results.len() as f64;
    let mean = results.iter().map(|r| r.fused_score).sum::<f64>() / n;
    if mean <= 0.0 {
        return 0.0;
    }
    let variance = results
        .iter()
        .map(|r| (r.fused_score - mean).powi(2))
        .sum::<f64>()
        / n;
    let cv = variance.sqrt() / mean;
    (1.0 - cv).max(0.0)
}
