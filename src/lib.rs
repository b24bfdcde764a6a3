//! EdgeQuake Retrieval - Retrieval-Serving Core
//!
//! Three subsystems that interlock on every request:
//!
//! - **Retrieval** ([`retrieval`]): dense + lexical candidate generation,
//!   weighted or reciprocal-rank fusion, a dynamic gate that decides whether
//!   the expensive cross-encoder rerank is worth running, and the rerank
//!   itself.
//! - **Backpressure** ([`backpressure`]): token-bucket rate limiting, a
//!   circuit breaker around the request handler, adaptive throttling driven
//!   by CPU/memory/disk pressure, a bounded priority queue and a graceful
//!   degradation ladder.
//! - **Latency** ([`latency`]): sliding-window percentiles per operation,
//!   SLA threshold, spike and degradation-trend alerts.
//!
//! # Architecture
//!
//! ```ascii
//!            ┌───────────────────────────────────────────────┐
//!  request ─►│ BackpressureManager (admission)               │
//!            └──────────────┬────────────────────▲───────────┘
//!                           │ degradation level  │ p95 vs SLA
//!                           ▼                    │
//!            ┌───────────────────────────┐   ┌───┴────────────┐
//!            │ RetrievalReranker         │──►│ LatencyTracker │
//!            │ fuse ─► gate ─► rerank    │   └────────────────┘
//!            └───────────────────────────┘
//! ```
//!
//! [`ServingContext`] builds all three from one [`ServingConfig`] and runs a
//! search through them.
//!
//! # Example
//!
//! ```ignore
//! use edgequake_retrieval::{Document, ServingConfig, ServingContext};
//!
//! let docs = vec![
//!     Document::new("rl", "token bucket rate limiting"),
//!     Document::new("cb", "circuit breaker recovery timeout"),
//! ];
//! let ctx = ServingContext::from_documents(ServingConfig::load()?, docs)?;
//! let response = ctx.search("rate limiting", 5, 1).await?;
//! for result in &response.results {
//!     println!("{} {:.3}", result.id, result.final_score);
//! }
//! ```
//!
//! # See Also
//!
//! - [`crate::config`] for file and environment configuration
//! - [`crate::retry`] for retrying rejected or failed searches

pub mod backpressure;
pub mod clock;
pub mod config;
pub mod error;
pub mod latency;
pub mod retrieval;
pub mod retry;
pub mod serving;
pub mod worker;

pub use backpressure::{
    BackpressureConfig, BackpressureManager, BackpressureMetrics, BackpressureStatus,
    CircuitBreaker, CircuitStateKind, DegradationLevel, PriorityQueue, ProcessedRequest,
    RateLimiter, RequestContext, RequestCounters, RequestOutcome, ResourceMonitor,
    ResourceSample, ResourceSampler,
};
pub use clock::{Clock, ManualClock, SharedClock, SystemClock};
pub use config::{ConfigError, ServingConfig};
pub use error::{BackpressureError, RejectionReason, Result, RetrievalError, RetryStrategy};
pub use latency::{
    AlertKind, LatencyAlert, LatencyConfig, LatencySnapshot, LatencySummary, LatencyTracker,
    Severity,
};
pub use retrieval::{
    CrossEncoderReranker, DenseIndex, Document, DynamicGate, FusionMethod, LexicalIndex,
    MockBackend, PairScorer, RankFusion, RetrievalConfig, RetrievalReranker, RetrievalStats,
    RetrieveOptions, ScoreFusion, SearchBackend, SearchResult, SkipReason, TracedBackend,
    WeightedFusion,
};
pub use retry::{RetryExecutor, RetryHint};
pub use serving::{SearchResponse, ServingContext, ServingError};
pub use worker::PeriodicTask;
