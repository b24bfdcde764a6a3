//! Overload protection: admission control in front of a request handler.
//!
//! # Architecture
//!
//! ```ascii
//!                 ┌──────────────────────────────────────────┐
//!   request ─────►│          BackpressureManager             │────► handler
//!                 │                                          │
//!                 │  RateLimiter ─► CircuitBreaker ─►        │
//!                 │  throttle ─► PriorityQueue ─► ladder     │
//!                 └───────────────────▲──────────────────────┘
//!                                     │ every monitoring_interval_seconds
//!                 ┌───────────────────┴──────────────────────┐
//!                 │ ResourceMonitor (+ LatencyTracker p95)   │
//!                 └──────────────────────────────────────────┘
//! ```
//!
//! Every refusal is a [`BackpressureError`](crate::BackpressureError) whose
//! `reason` names the step that refused it.
//!
//! # Module Structure
//!
//! ```ascii
//! backpressure/
//! ├── mod.rs             ─► This file (re-exports)
//! ├── config.rs          ─► BackpressureConfig, DegradationLevel
//! ├── context.rs         ─► RequestContext, RequestOutcome
//! ├── rate_limiter.rs    ─► RateLimiter (token bucket + sliding window)
//! ├── circuit_breaker.rs ─► CircuitBreaker
//! ├── queue.rs           ─► PriorityQueue
//! ├── resource.rs        ─► ResourceMonitor, ResourceSampler
//! └── manager.rs         ─► BackpressureManager
//! ```

mod circuit_breaker;
mod config;
mod context;
mod manager;
mod queue;
mod rate_limiter;
mod resource;

pub use circuit_breaker::{CircuitBreaker, CircuitBreakerStatus, CircuitDecision, CircuitStateKind};
pub use config::{BackpressureConfig, DegradationLevel};
pub use context::{RequestContext, RequestOutcome, DEGRADATION_LEVEL_KEY};
pub use manager::{
    BackpressureManager, BackpressureMetrics, BackpressureStatus, ProcessedRequest,
    QueueStatus, RateLimiterStatus, RequestCounters,
};
pub use queue::{PriorityQueue, QueueError};
pub use rate_limiter::{RateDecision, RateLimiter};
pub use resource::{FixedSampler, ResourceMonitor, ResourceSample, ResourceSampler, SysinfoSampler};
