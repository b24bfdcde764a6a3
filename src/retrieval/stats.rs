//! Per-query retrieval statistics and rolling aggregates.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, VecDeque};
use std::fmt;

/// Why the gate decided not to rerank.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    /// Reranking is switched off in config.
    RerankingDisabled,
    /// Fewer than two candidates.
    InsufficientResults,
    /// Clear winner that both retrieval methods agree on.
    ScoreGapWithLexicalAgreement,
    /// Winner separated by more than twice the threshold.
    LargeScoreGap,
    /// Estimated rerank latency exceeds the budget.
    ExpectedLatencyTooHigh,
    /// Caller disabled reranking (system degraded).
    DegradedMode,
}

impl SkipReason {
    /// Stable reason code.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::RerankingDisabled => "reranking_disabled",
            Self::InsufficientResults => "insufficient_results",
            Self::ScoreGapWithLexicalAgreement => "score_gap_with_lexical_agreement",
            Self::LargeScoreGap => "large_score_gap",
            Self::ExpectedLatencyTooHigh => "expected_latency_too_high",
            Self::DegradedMode => "degraded_mode",
        }
    }
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One record per `retrieve_and_rerank` call.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RetrievalStats {
    /// Query text.
    pub query: String,
    /// Requested result count.
    pub top_k: usize,
    /// Wall-clock time the query started (ms since epoch).
    pub timestamp_ms: u64,
    /// Fusion strategy used (`weighted` or `rrf`).
    pub fusion_method: String,

    /// Candidates returned by dense retrieval.
    pub dense_count: usize,
    /// Candidates returned by lexical retrieval.
    pub lexical_count: usize,
    /// Unique candidates after fusion.
    pub fused_count: usize,
    /// Candidates scored by the cross-encoder.
    pub reranked_count: usize,
    /// Results returned to the caller.
    pub final_count: usize,

    pub dense_latency_ms: f64,
    pub lexical_latency_ms: f64,
    pub fusion_latency_ms: f64,
    pub gate_latency_ms: f64,
    /// Zero when reranking was skipped.
    pub rerank_latency_ms: f64,
    pub total_latency_ms: f64,

    /// Whether the cross-encoder ran.
    pub rerank_invoked: bool,
    /// Reason code when it did not.
    pub skip_reason: Option<SkipReason>,

    /// Top-1 minus top-2 fused score.
    pub score_gap: Option<f64>,
    /// Fraction of the leading candidates surfaced by both methods.
    pub lexical_agreement: Option<f64>,
    /// `max(0, 1 - cv(fused_scores))`.
    pub fusion_confidence: Option<f64>,
    /// Confidence (with agreement bonus) fell below `min_fusion_confidence`.
    pub low_confidence: bool,
}

/// Rolling aggregate over the retained stats history.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PerformanceSummary {
    pub total_queries: usize,
    pub rerank_invocation_rate: f64,
    pub avg_total_latency_ms: f64,
    pub p95_total_latency_ms: f64,
    pub avg_dense_latency_ms: f64,
    pub avg_lexical_latency_ms: f64,
    pub avg_fusion_latency_ms: f64,
    /// Average over queries that were actually reranked.
    pub avg_rerank_latency_ms: f64,
    pub avg_score_gap: Option<f64>,
    pub avg_fusion_confidence: Option<f64>,
    pub avg_lexical_agreement: Option<f64>,
    pub low_confidence_queries: usize,
    /// Count per skip reason code.
    pub skip_reasons: BTreeMap<String, usize>,
}

fn mean_of(records: &VecDeque<RetrievalStats>, f: impl Fn(&RetrievalStats) -> f64) -> f64 {
    if records.is_empty() {
        return 0.0;
    }
    records.iter().map(f).sum::<f64>() / records.len() as f64
}

fn mean_of_present(
    records: &VecDeque<RetrievalStats>,
    f: impl Fn(&RetrievalStats) -> Option<f64>,
) -> Option<f64> {
    let values: Vec<f64> = records.iter().filter_map(f).collect();
    if values.is_empty() {
        None
    } else {
        Some(values.iter().sum::<f64>() / values.len() as f64)
    }
}

/// Bounded ring of [`RetrievalStats`]; oldest records are evicted first.
#[derive(Debug, Clone)]
pub struct StatsHistory {
    records: VecDeque<RetrievalStats>,
    capacity: usize,
}

impl StatsHistory {
    /// Create with the given capacity (at least 1).
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            records: VecDeque::with_capacity(capacity.min(1024)),
            capacity,
        }
    }

    pub fn push(&mut self, stats: RetrievalStats) {
        while self.records.len() >= self.capacity {
            self.records.pop_front();
        }
        self.records.push_back(stats);
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn clear(&mut self) {
        self.records.clear();
    }

    /// Newest `n` records, oldest first.
    pub fn recent(&self, n: usize) -> Vec<RetrievalStats> {
        let skip = self.records.len().saturating_sub(n);
        self.records.iter().skip(skip).cloned().collect()
    }

    /// Fraction of retained queries that invoked the cross-encoder.
    pub fn rerank_invocation_rate(&self) -> f64 {
        if self.records.is_empty() {
            return 0.0;
        }
        let invoked = self.records.iter().filter(|s| s.rerank_invoked).count();
        invoked as f64 / self.records.len() as f64
    }

    pub fn summary(&self) -> PerformanceSummary {
        let total = self.records.len();
        if total == 0 {
            return PerformanceSummary::default();
        }

        let mut totals: Vec<f64> = self.records.iter().map(|s| s.total_latency_ms).collect();
        totals.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
        let p95_index = ((totals.len() as f64 * 0.95).ceil() as usize).clamp(1, totals.len()) - 1;

        let reranked: Vec<f64> = self
            .records
            .iter()
            .filter(|s| s.rerank_invoked)
            .map(|s| s.rerank_latency_ms)
            .collect();
        let avg_rerank_latency_ms = if reranked.is_empty() {
            0.0
        } else {
            reranked.iter().sum::<f64>() / reranked.len() as f64
        };

        let mut skip_reasons = BTreeMap::new();
        for reason in self.records.iter().filter_map(|s| s.skip_reason) {
            *skip_reasons.entry(reason.as_str().to_string()).or_insert(0) += 1;
        }

        PerformanceSummary {
            total_queries: total,
            rerank_invocation_rate: self.rerank_invocation_rate(),
            avg_total_latency_ms: mean_of(&self.records, |s| s.total_latency_ms),
            p95_total_latency_ms: totals[p95_index],
            avg_dense_latency_ms: mean_of(&self.records, |s| s.dense_latency_ms),
            avg_lexical_latency_ms: mean_of(&self.records, |s| s.lexical_latency_ms),
            avg_fusion_latency_ms: mean_of(&self.records, |s| s.fusion_latency_ms),
            avg_rerank_latency_ms,
            avg_score_gap: mean_of_present(&self.records, |s| s.score_gap),
            avg_fusion_confidence: mean_of_present(&self.records, |s| s.fusion_confidence),
            avg_lexical_agreement: mean_of_present(&self.records, |s| s.lexical_agreement),
            low_confidence_queries: self.records.iter().filter(|s| s.low_confidence).count(),
            skip_reasons,
        }
    }
}
