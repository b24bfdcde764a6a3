//! Trait seams of the retrieval pipeline.
//!
//! # Architecture
//!
//! ```ascii
//!   ┌──────────────────┐   ┌──────────────────┐
//!   │  SearchBackend   │   │  SearchBackend   │
//!   │     (dense)      │   │    (lexical)     │
//!   └────────┬─────────┘   └────────┬─────────┘
//!            └──────────┬───────────┘
//!                       ▼
//!              ┌─────────────────┐
//!              │   ScoreFusion   │  Weighted | RankFusion
//!              └────────┬────────┘
//!                       ▼
//!              ┌─────────────────┐
//!              │   PairScorer    │  used by CrossEncoderReranker
//!              └─────────────────┘
//! ```
//!
//! # Implementations
//!
//! - [`super::LexicalIndex`], [`super::DenseIndex`], [`super::MockBackend`],
//!   [`super::TracedBackend`] implement [`SearchBackend`]
//! - [`super::WeightedFusion`], [`super::RankFusion`] implement [`ScoreFusion`]
//! - [`super::LexicalPairScorer`] implements [`PairScorer`]

use async_trait::async_trait;

use super::result::SearchResult;
use crate::error::Result;

/// An external retrieval collaborator (vector index, BM25 index, ...).
///
/// Results must be ordered by the backend's native score, best first, with
/// `id`, `content` and the matching one of `dense_score` / `lexical_score`
/// populated.
#[async_trait]
pub trait SearchBackend: Send + Sync {
    /// Backend name used in logs and errors.
    fn name(&self) -> &str;

    /// Return at most `limit` candidates for `query`.
    async fn search(&self, query: &str, limit: usize) -> Result<Vec<SearchResult>>;
}

/// Merges dense and lexical candidate lists into one ranked list.
pub trait ScoreFusion: Send + Sync {
    /// Strategy name.
    fn name(&self) -> &str;

    /// Union by id, score and sort descending (stable).
    fn fuse(&self, dense: Vec<SearchResult>, lexical: Vec<SearchResult>) -> Vec<SearchResult>;
}

/// Jointly scores a (query, document) pair.
pub trait PairScorer: Send + Sync {
    /// Scorer/model name.
    fn name(&self) -> &str;

    /// Relevance of `result` to `query`; higher is better.
    fn score(&self, query: &str, result: &SearchResult) -> f64;
}
