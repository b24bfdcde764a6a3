//! Retrieval pipeline configuration.
//!
//! # Architecture
//!
//! ```ascii
//! ┌─────────────────────────────────────────────────────────┐
//! │                   RetrievalConfig                        │
//! ├─────────────────────────────────────────────────────────┤
//! │ dense_weight / lexical_weight ──► fusion (sum to 1)     │
//! │ rerank_threshold              ──► gate: score gap       │
//! │ lexical_agreement_bonus       ──► gate: diagnostics     │
//! │ min_fusion_confidence         ──► gate: diagnostics     │
//! │ max_rerank_latency_ms         ──► gate: latency budget  │
//! │ enable_reranking / top_k      ──► cross-encoder         │
//! │ rerank_model                  ──► cross-encoder         │
//! └─────────────────────────────────────────────────────────┘
//! ```

use serde::{Deserialize, Serialize};

use crate::error::{Result, RetrievalError};

/// Fusion strategy selected from the configured weights.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FusionMethod {
    /// Weighted sum of dense and lexical scores.
    Weighted,
    /// Reciprocal Rank Fusion (score-free).
    ReciprocalRank,
}

/// Immutable per-pipeline configuration.
///
/// Unknown keys are rejected when deserializing.
///
/// # Example
///
/// ```
/// use edgequake_retrieval::RetrievalConfig;
///
/// let config = RetrievalConfig::default()
///     .with_weights(0.6, 0.4)
///     .with_rerank_top_k(10);
/// assert!(config.validate().is_ok());
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RetrievalConfig {
    /// Weight of the dense score in weighted fusion.
    pub dense_weight: f64,
    /// Weight of the lexical score in weighted fusion.
    pub lexical_weight: f64,
    /// Minimum top-1/top-2 fused score gap considered "confident".
    pub rerank_threshold: f64,
    /// Confidence credit for cross-method agreement in the top results.
    pub lexical_agreement_bonus: f64,
    /// Fusion confidence below which the set is flagged as low-confidence.
    pub min_fusion_confidence: f64,
    /// Latency budget for the rerank stage.
    pub max_rerank_latency_ms: f64,
    /// Master switch for cross-encoder reranking.
    pub enable_reranking: bool,
    /// When false every query is reranked (gate bypassed).
    pub enable_dynamic_gating: bool,
    /// Number of leading candidates the cross-encoder scores.
    pub rerank_top_k: usize,
    /// Cross-encoder model identifier.
    pub rerank_model: String,
    /// RRF smoothing constant.
    pub rrf_k: u32,
    /// Number of per-query stats records retained.
    pub stats_history_size: usize,
    /// Capacity of the `(query, id)` rerank score cache.
    pub rerank_cache_size: usize,
    /// Simulated cross-encoder inference time per scored candidate.
    pub per_result_latency_ms: f64,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            dense_weight: 0.7,
            lexical_weight: 0.3,
            rerank_threshold: 0.1,
            lexical_agreement_bonus: 0.1,
            min_fusion_confidence: 0.3,
            max_rerank_latency_ms: 100.0,
            enable_reranking: true,
            enable_dynamic_gating: true,
            rerank_top_k: 20,
            rerank_model: "cross-encoder/ms-marco-MiniLM-L-6-v2".to_string(),
            rrf_k: 60,
            stats_history_size: 1000,
            rerank_cache_size: 10_000,
            per_result_latency_ms: 2.0,
        }
    }
}

impl RetrievalConfig {
    /// Set fusion weights (normalized when the pipeline is built).
    pub fn with_weights(mut self, dense: f64, lexical: f64) -> Self {
        self.dense_weight = dense;
        self.lexical_weight = lexical;
        self
    }

    /// Set the score-gap threshold.
    pub fn with_rerank_threshold(mut self, threshold: f64) -> Self {
        self.rerank_threshold = threshold;
        self
    }

    /// Enable or disable reranking.
    pub fn with_reranking(mut self, enabled: bool) -> Self {
        self.enable_reranking = enabled;
        self
    }

    /// Enable or disable dynamic gating.
    pub fn with_dynamic_gating(mut self, enabled: bool) -> Self {
        self.enable_dynamic_gating = enabled;
        self
    }

    /// Set the number of candidates scored by the cross-encoder.
    pub fn with_rerank_top_k(mut self, top_k: usize) -> Self {
        self.rerank_top_k = top_k;
        self
    }

    /// Set the rerank latency budget.
    pub fn with_max_rerank_latency_ms(mut self, ms: f64) -> Self {
        self.max_rerank_latency_ms = ms;
        self
    }

    /// Set the simulated per-candidate inference time.
    pub fn with_per_result_latency_ms(mut self, ms: f64) -> Self {
        self.per_result_latency_ms = ms;
        self
    }

    /// Check invariants.
    pub fn validate(&self) -> Result<()> {
        if self.dense_weight < 0.0 || self.lexical_weight < 0.0 {
            return Err(RetrievalError::Config(format!(
                "fusion weights must be non-negative (dense={}, lexical={})",
                self.dense_weight, self.lexical_weight
            )));
        }
        if !(self.dense_weight + self.lexical_weight).is_normal() {
            return Err(RetrievalError::Config(
                "fusion weights must not both be zero".to_string(),
            ));
        }
        for (name, value) in [
            ("rerank_threshold", self.rerank_threshold),
            ("lexical_agreement_bonus", self.lexical_agreement_bonus),
            ("min_fusion_confidence", self.min_fusion_confidence),
            ("max_rerank_latency_ms", self.max_rerank_latency_ms),
            ("per_result_latency_ms", self.per_result_latency_ms),
        ] {
            if value < 0.0 || !value.is_finite() {
                return Err(RetrievalError::Config(format!(
                    "{} must be a non-negative number, got {}",
                    name, value
                )));
            }
        }
        if self.stats_history_size == 0 {
            return Err(RetrievalError::Config(
                "stats_history_size must be positive".to_string(),
            ));
        }
        if self.rerank_cache_size == 0 {
            return Err(RetrievalError::Config(
                "rerank_cache_size must be positive".to_string(),
            ));
        }
        Ok(())
    }

    /// Copy with weights rescaled to sum to 1.
    pub fn normalized(&self) -> Result<Self> {
        self.validate()?;
        let total = self.dense_weight + self.lexical_weight;
        Ok(Self {
            dense_weight: self.dense_weight / total,
            lexical_weight: self.lexical_weight / total,
            ..self.clone()
        })
    }

    /// Fusion strategy implied by the weights.
    ///
    /// A weight of exactly zero on either side degrades to rank fusion.
    pub fn fusion_method(&self) -> FusionMethod {
        if self.dense_weight == 0.0 || self.lexical_weight == 0.0 {
            FusionMethod::ReciprocalRank
        } else {
            FusionMethod::Weighted
        }
    }
}
