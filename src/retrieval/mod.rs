//! Hybrid retrieval with gated cross-encoder reranking.
//!
//! # Architecture
//!
//! ```ascii
//!                    ┌─────────────────────────────┐
//!                    │        query, top_k          │
//!                    └──────────────┬──────────────┘
//!                                   │
//!               ┌───────────────────┴───────────────────┐
//!               ▼                                       ▼
//!     ┌──────────────────┐                    ┌──────────────────┐
//!     │  SearchBackend   │                    │  SearchBackend   │
//!     │  (DenseIndex)    │                    │  (LexicalIndex)  │
//!     └────────┬─────────┘                    └────────┬─────────┘
//!              └───────────────────┬───────────────────┘
//!                                  ▼
//!                     ┌─────────────────────────┐
//!                     │ ScoreFusion             │ Weighted | RankFusion
//!                     └────────────┬────────────┘
//!                                  ▼
//!                     ┌─────────────────────────┐
//!                     │ DynamicGate             │ skip? reason
//!                     └────────────┬────────────┘
//!                                  ▼
//!                     ┌─────────────────────────┐
//!                     │ CrossEncoderReranker    │ top rerank_top_k
//!                     └─────────────────────────┘
//! ```
//!
//! # Module Structure
//!
//! ```ascii
//! retrieval/
//! ├── mod.rs          ─► This file (re-exports)
//! ├── config.rs       ─► RetrievalConfig, FusionMethod
//! ├── result.rs       ─► SearchResult, Document, RetrievalSource
//! ├── traits.rs       ─► SearchBackend, ScoreFusion, PairScorer
//! ├── fusion.rs       ─► WeightedFusion, RankFusion
//! ├── gate.rs         ─► DynamicGate
//! ├── cross_encoder.rs─► CrossEncoderReranker, LexicalPairScorer
//! ├── tokenize.rs     ─► TokenizerConfig
//! ├── lexical.rs      ─► LexicalIndex (BM25)
//! ├── dense.rs        ─► DenseIndex (hashed vectors)
//! ├── mock.rs         ─► MockBackend
//! ├── traced.rs       ─► TracedBackend
//! ├── stats.rs        ─► RetrievalStats, PerformanceSummary
//! └── pipeline.rs     ─► RetrievalReranker
//! ```

mod config;
mod cross_encoder;
mod dense;
mod fusion;
mod gate;
mod lexical;
mod mock;
mod pipeline;
mod result;
mod stats;
mod tokenize;
mod traced;
mod traits;

pub use config::{FusionMethod, RetrievalConfig};
pub use cross_encoder::{CrossEncoderReranker, LexicalPairScorer, RerankCacheStats};
pub use dense::DenseIndex;
pub use fusion::{fusion_for, RankFusion, WeightedFusion};
pub use gate::{complexity_factor, fusion_confidence, DynamicGate};
pub use lexical::LexicalIndex;
pub use mock::MockBackend;
pub use pipeline::{RetrievalReranker, RetrieveOptions};
pub use result::{Document, RetrievalSource, SearchResult};
pub use stats::{PerformanceSummary, RetrievalStats, SkipReason, StatsHistory};
pub use tokenize::{tokenize, TokenizerConfig};
pub use traced::TracedBackend;
pub use traits::{PairScorer, ScoreFusion, SearchBackend};
