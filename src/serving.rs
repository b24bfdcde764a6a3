//! Serving context wiring admission control, retrieval and latency feedback.
//!
//! # Request flow
//!
//! ```ascii
//! search(query, top_k, priority)
//!   │
//!   ├─► validate query                      ✗ RetrievalError::InvalidQuery
//!   ├─► BackpressureManager.process_request ✗ BackpressureError
//!   │     └─► handler: degradation level ─► RetrieveOptions
//!   │                  RetrievalReranker.retrieve_with_options()
//!   ├─► LatencyTracker.record_latency("retrieve", end-to-end ms)
//!   │     └─► "rerank" when the cross-encoder ran
//!   └─► SearchResponse { results, stats, context }
//! ```
//!
//! The manager reads the tracker's global p95 on every monitoring tick, so
//! slow searches push the system towards `reduced_features` and
//! `essential_only`, which in turn shrink the candidate pool and disable
//! reranking.

use serde::Serialize;
use std::sync::Arc;
use thiserror::Error;
use tracing::debug;

use crate::backpressure::{
    BackpressureManager, DegradationLevel, RequestContext, ResourceSampler, SysinfoSampler,
};
use crate::clock::{SharedClock, SystemClock};
use crate::config::{ConfigError, ServingConfig};
use crate::error::{BackpressureError, RetrievalError, RetryStrategy};
use crate::latency::LatencyTracker;
use crate::retrieval::{
    DenseIndex, Document, LexicalIndex, RetrievalReranker, RetrievalStats, RetrieveOptions,
    SearchBackend, SearchResult, TracedBackend,
};
use crate::retry::RetryHint;
use crate::worker::PeriodicTask;

/// Operation name for end-to-end search latency.
pub const RETRIEVE_OPERATION: &str = "retrieve";
/// Operation name for cross-encoder latency.
pub const RERANK_OPERATION: &str = "rerank";

#[derive(Debug, Error)]
pub enum ServingError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// The request never reached admission control.
    #[error(transparent)]
    Retrieval(#[from] RetrievalError),

    /// Refused by admission control, or the handler failed.
    #[error(transparent)]
    Rejected(#[from] BackpressureError),
}

impl RetryHint for ServingError {
    fn retry_hint(&self) -> RetryStrategy {
        match self {
            Self::Config(_) => RetryStrategy::NoRetry,
            Self::Retrieval(e) => e.retry_hint(),
            Self::Rejected(e) => e.retry_hint(),
        }
    }
}

/// One served search.
#[derive(Debug, Clone, Serialize)]
pub struct SearchResponse {
    pub results: Vec<SearchResult>,
    pub stats: RetrievalStats,
    /// Context after admission: queue time, processing time, degradation.
    pub context: RequestContext,
}

/// Retrieve options for the degradation level recorded on a context.
pub fn options_for(ctx: &RequestContext) -> RetrieveOptions {
    match ctx.degradation_level() {
        Some(level) if level == DegradationLevel::ReducedFeatures.as_str() => {
            RetrieveOptions::reduced()
        }
        Some(level) if level == DegradationLevel::EssentialOnly.as_str() => {
            RetrieveOptions::essential()
        }
        _ => RetrieveOptions::default(),
    }
}

/// Handles for the background loops started by
/// [`ServingContext::start_background_tasks`].
#[derive(Debug)]
pub struct BackgroundTasks {
    monitoring: PeriodicTask,
    snapshots: PeriodicTask,
}

impl BackgroundTasks {
    pub async fn stop(self) {
        self.monitoring.stop().await;
        self.snapshots.stop().await;
    }
}

/// Explicit context shared by request handlers.
///
/// # Example
///
/// ```ignore
/// use edgequake_retrieval::{Document, ServingConfig, ServingContext};
///
/// let ctx = ServingContext::from_documents(ServingConfig::load()?, docs)?;
/// let tasks = ctx.start_background_tasks();
/// let response = ctx.search("token bucket refill", 5, 1).await?;
/// tasks.stop().await;
/// ```
pub struct ServingContext {
    config: ServingConfig,
    pipeline: RetrievalReranker,
    backpressure: Arc<BackpressureManager>,
    latency: Arc<LatencyTracker>,
    clock: SharedClock,
}

impl std::fmt::Debug for ServingContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServingContext")
            .field("backpressure", &self.backpressure)
            .field("total_recorded", &self.latency.total_recorded())
            .finish()
    }
}

impl ServingContext {
    /// Build over the given backends, sampling the live system.
    pub fn new(
        config: ServingConfig,
        dense: Arc<dyn SearchBackend>,
        lexical: Arc<dyn SearchBackend>,
    ) -> Result<Self, ServingError> {
        let sampler = Arc::new(SysinfoSampler::new(
            config.backpressure.disk_io_ceiling_bytes_per_sec,
        ));
        Self::with_parts(config, dense, lexical, sampler, SystemClock::shared())
    }

    /// Build with in-memory dense and BM25 indexes over `documents`.
    pub fn from_documents(
        config: ServingConfig,
        documents: Vec<Document>,
    ) -> Result<Self, ServingError> {
        let dense = Arc::new(TracedBackend::new(DenseIndex::new(documents.clone())));
        let lexical = Arc::new(TracedBackend::new(LexicalIndex::new(documents)));
        Self::new(config, dense, lexical)
    }

    /// Build with an explicit resource sampler and clock.
    pub fn with_parts(
        config: ServingConfig,
        dense: Arc<dyn SearchBackend>,
        lexical: Arc<dyn SearchBackend>,
        sampler: Arc<dyn ResourceSampler>,
        clock: SharedClock,
    ) -> Result<Self, ServingError> {
        config.validate()?;
        let latency = Arc::new(LatencyTracker::with_clock(
            config.latency.clone(),
            clock.clone(),
        ));
        let backpressure = Arc::new(
            BackpressureManager::with_parts(config.backpressure.clone(), sampler, clock.clone())?
                .with_latency_tracker(latency.clone()),
        );
        let pipeline =
            RetrievalReranker::with_clock(config.retrieval.clone(), dense, lexical, clock.clone())?;

        Ok(Self {
            config,
            pipeline,
            backpressure,
            latency,
            clock,
        })
    }

    pub fn config(&self) -> &ServingConfig {
        &self.config
    }

    pub fn pipeline(&self) -> &RetrievalReranker {
        &self.pipeline
    }

    pub fn backpressure(&self) -> &Arc<BackpressureManager> {
        &self.backpressure
    }

    pub fn latency(&self) -> &Arc<LatencyTracker> {
        &self.latency
    }

    /// Start resource monitoring and latency snapshotting.
    pub fn start_background_tasks(&self) -> BackgroundTasks {
        BackgroundTasks {
            monitoring: self.backpressure.start_monitoring(),
            snapshots: self.latency.start_snapshotting(),
        }
    }

    /// Search under admission control with a fresh context.
    pub async fn search(
        &self,
        query: &str,
        top_k: usize,
        priority: usize,
    ) -> Result<SearchResponse, ServingError> {
        let ctx = RequestContext::new().with_priority(priority);
        self.search_with_context(query, top_k, ctx).await
    }

    pub async fn search_with_context(
        &self,
        query: &str,
        top_k: usize,
        ctx: RequestContext,
    ) -> Result<SearchResponse, ServingError> {
        // Caller mistakes must not count against the circuit breaker.
        if query.trim().is_empty() {
            return Err(RetrievalError::InvalidQuery("query is empty".to_string()).into());
        }
        if top_k == 0 {
            return Err(RetrievalError::InvalidQuery("top_k must be at least 1".to_string()).into());
        }

        let start = self.clock.now();
        let pipeline = &self.pipeline;
        let processed = self
            .backpressure
            .process_request(ctx, |ctx| async move {
                let options = options_for(&ctx);
                pipeline.retrieve_with_options(query, top_k, options).await
            })
            .await?;
        let elapsed_ms = self.clock.now().saturating_duration_since(start).as_secs_f64() * 1000.0;

        let (results, stats) = processed.value;
        let context = processed.context;
        self.latency.record_latency_traced(
            elapsed_ms,
            RETRIEVE_OPERATION,
            Some(context.request_id.clone()),
            context.metadata.clone(),
        );
        if stats.rerank_invoked {
            self.latency
                .record_latency(stats.rerank_latency_ms, RERANK_OPERATION);
        }

        debug!(
            request_id = %context.request_id,
            results = results.len(),
            degradation = context.degradation_level().unwrap_or("normal"),
            elapsed_ms,
            "Search served"
        );

        Ok(SearchResponse {
            results,
            stats,
            context,
        })
    }
}
