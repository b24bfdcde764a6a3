//! Score fusion: merging dense and lexical candidate lists.
//!
//! # Algorithm
//!
//! ```ascii
//! Weighted:  fused = w_dense * dense_score + w_lexical * lexical_score
//!
//! RRF:       fused = Σ 1/(k + rank + 1)   over each list the id appears in
//!            rank = 0-indexed position, k = smoothing constant (default 60)
//! ```
//!
//! Both strategies union candidates by `id` (dense order first, then ids only
//! the lexical path surfaced) and sort descending by fused score with a stable
//! sort, so ties keep input order.

use std::cmp::Ordering;
use std::collections::HashMap;

use super::config::{FusionMethod, RetrievalConfig};
use super::result::SearchResult;
use super::traits::ScoreFusion;

/// Merge both lists by id, preserving first-seen order.
fn merge_by_id(dense: Vec<SearchResult>, lexical: Vec<SearchResult>) -> Vec<SearchResult> {
    let mut merged: Vec<SearchResult> = Vec::with_capacity(dense.len() + lexical.len());
    let mut positions: HashMap<String, usize> = HashMap::new();

    for result in dense.into_iter().chain(lexical) {
        match positions.get(&result.id) {
            Some(&pos) => merged[pos].absorb(&result),
            None => {
                positions.insert(result.id.clone(), merged.len());
                merged.push(result);
            }
        }
    }

    merged
}

fn sort_by_fused_desc(results: &mut [SearchResult]) {
    // slice::sort_by is stable.
    results.sort_by(|a, b| {
        b.fused_score
            .partial_cmp(&a.fused_score)
            .unwrap_or(Ordering::Equal)
    });
}

/// Weighted linear combination of dense and lexical scores.
///
/// # Example
///
/// ```
/// use edgequake_retrieval::{ScoreFusion, SearchResult, WeightedFusion};
///
/// let fusion = WeightedFusion::new(0.7, 0.3);
/// let fused = fusion.fuse(
///     vec![SearchResult::dense("a", "", 0.9)],
///     vec![SearchResult::lexical("a", "", 0.8)],
/// );
/// assert!((fused[0].fused_score - 0.87).abs() < 1e-9);
/// ```
#[derive(Debug, Clone, Copy)]
pub struct WeightedFusion {
    dense_weight: f64,
    lexical_weight: f64,
}

impl WeightedFusion {
    /// Create with weights; they are rescaled to sum to 1 when possible.
    pub fn new(dense_weight: f64, lexical_weight: f64) -> Self {
        let total = dense_weight + lexical_weight;
        if total > 0.0 {
            Self {
                dense_weight: dense_weight / total,
                lexical_weight: lexical_weight / total,
            }
        } else {
            Self {
                dense_weight,
                lexical_weight,
            }
        }
    }

    /// Normalized dense weight.
    pub fn dense_weight(&self) -> f64 {
        self.dense_weight
    }

    /// Normalized lexical weight.
    pub fn lexical_weight(&self) -> f64 {
        self.lexical_weight
    }
}

impl ScoreFusion for WeightedFusion {
    fn name(&self) -> &str {
        "weighted"
    }

    fn fuse(&self, dense: Vec<SearchResult>, lexical: Vec<SearchResult>) -> Vec<SearchResult> {
        let mut merged = merge_by_id(dense, lexical);
        for result in &mut merged {
            let score =
                self.dense_weight * result.dense_score + self.lexical_weight * result.lexical_score;
            result.set_fused_score(score);
        }
        sort_by_fused_desc(&mut merged);
        merged
    }
}

/// Reciprocal Rank Fusion: position-based, ignores raw scores.
#[derive(Debug, Clone, Copy)]
pub struct RankFusion {
    k: u32,
}

impl RankFusion {
    /// Create with the default k=60.
    pub fn new() -> Self {
        Self { k: 60 }
    }

    /// Create with a custom k value.
    pub fn with_k(k: u32) -> Self {
        Self { k }
    }

    /// Smoothing constant.
    pub fn k(&self) -> u32 {
        self.k
    }

    fn contribution(&self, rank: usize) -> f64 {
        1.0 / (self.k as f64 + rank as f64 + 1.0)
    }
}

impl Default for RankFusion {
    fn default() -> Self {
        Self::new()
    }
}

impl ScoreFusion for RankFusion {
    fn name(&self) -> &str {
        "rrf"
    }

    fn fuse(&self, dense: Vec<SearchResult>, lexical: Vec<SearchResult>) -> Vec<SearchResult> {
        let mut rrf_scores: HashMap<String, f64> = HashMap::new();
        for list in [&dense, &lexical] {
            for (rank, result) in list.iter().enumerate() {
                *rrf_scores.entry(result.id.clone()).or_insert(0.0) += self.contribution(rank);
            }
        }

        let mut merged = merge_by_id(dense, lexical);
        for result in &mut merged {
            let score = rrf_scores.get(&result.id).copied().unwrap_or(0.0);
            result.set_fused_score(score);
        }
        sort_by_fused_desc(&mut merged);
        merged
    }
}

/// Pick the fusion strategy implied by `config`.
pub fn fusion_for(config: &RetrievalConfig) -> Box<dyn ScoreFusion> {
    match config.fusion_method() {
        FusionMethod::Weighted => Box::new(WeightedFusion::new(
            config.dense_weight,
            config.lexical_weight,
        )),
        FusionMethod::ReciprocalRank => Box::new(RankFusion::with_k(config.rrf_k)),
    }
}
