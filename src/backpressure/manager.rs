//! Admission pipeline composing rate limiting, circuit breaking, resource
//! throttling, queuing and graceful degradation.
//!
//! # Admission sequence
//!
//! ```ascii
//! process_request(ctx, handler)
//!   │
//!   ├─1─► RateLimiter.is_allowed()          ✗ rate_limit
//!   ├─2─► CircuitBreaker.call_allowed()     ✗ circuit_breaker
//!   ├─3─► overloaded && adaptive?
//!   │       throttle > 0.8                  ✗ resource_pressure
//!   │       else sleep(throttle × 100ms)
//!   ├─4─► queue non-empty || throttle > 0.5 || no free slot?
//!   │       try_put                         ✗ queue_full
//!   │       wait until head with free slot
//!   │         min(ctx.timeout, queue_timeout) ✗ queue_timeout
//!   ├─5─► degradation == maintenance_mode   ✗ maintenance_mode
//!   │       else tag ctx.metadata.degradation_level
//!   └─6─► handler(ctx) holding the slot
//!           Ok  ─► circuit success
//!           Err ─► circuit failure          ✗ processing_error
//! ```
//!
//! A slot is one of `max_concurrent_requests` handler permits. Above the
//! queueing throttle level the limit shrinks with the throttle. Releasing a
//! slot wakes the queue, whose head claims it next, so queued requests run
//! in priority order.
//!
//! # Monitoring tick
//!
//! ```ascii
//! sample resources ─► throttle ± step ─► level = max(resource ladder,
//!                                                    latency feedback)
//!                                      ─► metrics snapshot ─► bounded history
//! ```

use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, VecDeque};
use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use super::circuit_breaker::{CircuitBreaker, CircuitBreakerStatus, CircuitDecision};
use super::config::{BackpressureConfig, DegradationLevel};
use super::context::{RequestContext, RequestOutcome, DEGRADATION_LEVEL_KEY};
use super::queue::{PriorityQueue, QueueError};
use super::rate_limiter::RateLimiter;
use super::resource::{ResourceMonitor, ResourceSample, ResourceSampler, SysinfoSampler};
use crate::clock::{SharedClock, SystemClock};
use crate::config::ConfigError;
use crate::error::{BackpressureError, RejectionReason};
use crate::latency::LatencyTracker;
use crate::worker::PeriodicTask;

/// Throttle level above which requests are refused outright.
const THROTTLE_REJECT_LEVEL: f64 = 0.8;
/// Throttle level above which requests go through the queue.
const THROTTLE_QUEUE_LEVEL: f64 = 0.5;
/// Delay applied at throttle level 1.0.
const MAX_THROTTLE_DELAY: Duration = Duration::from_millis(100);

// ============================================================================
// Reporting types
// ============================================================================

/// A handler result together with its annotated context.
#[derive(Debug, Clone)]
pub struct ProcessedRequest<T> {
    pub value: T,
    pub context: RequestContext,
}

/// Outcome counters. `allowed + queued + rejected + in_flight == total`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RequestCounters {
    pub total: u64,
    /// Served without passing through the queue.
    pub allowed: u64,
    /// Served after waiting in the queue.
    pub queued: u64,
    /// Refused at any step, handler failures included.
    pub rejected: u64,
    pub in_flight: u64,
    pub rejections_by_reason: BTreeMap<String, u64>,
}

/// Point-in-time metrics captured on every monitoring tick.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackpressureMetrics {
    pub timestamp_ms: u64,
    /// Admitted requests per second over the sliding window.
    pub current_rate: f64,
    /// Admitted requests inside the sliding window.
    pub window_request_count: usize,
    pub queue_depth: usize,
    pub resources: ResourceSample,
    pub pressure_ratio: f64,
    pub throttle_level: f64,
    pub degradation_level: DegradationLevel,
    pub circuit_state: String,
    pub latency_p95_ms: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RateLimiterStatus {
    pub available_tokens: f64,
    pub current_rate: f64,
    pub window_request_count: usize,
    pub max_requests_per_second: f64,
    pub burst_capacity: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueueStatus {
    pub depth: usize,
    pub capacity: usize,
    pub depth_by_priority: Vec<usize>,
    /// Handlers holding a slot.
    pub active_requests: usize,
    /// Slots available at the current throttle level.
    pub concurrency_limit: usize,
}

/// Report returned by [`BackpressureManager::get_status_summary`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackpressureStatus {
    pub degradation_level: DegradationLevel,
    pub throttle_level: f64,
    pub circuit_breaker: CircuitBreakerStatus,
    pub rate_limiter: RateLimiterStatus,
    pub queue: QueueStatus,
    pub resources: ResourceSample,
    pub pressure_ratio: f64,
    pub requests: RequestCounters,
    pub latency_p95_ms: Option<f64>,
}

// ============================================================================
// Internal state
// ============================================================================

#[derive(Debug, Clone, Copy, Default)]
struct AdaptiveState {
    throttle_level: f64,
    degradation_level: DegradationLevel,
}

#[derive(Default)]
struct Counters {
    total: AtomicU64,
    allowed: AtomicU64,
    queued: AtomicU64,
    rejected: AtomicU64,
    in_flight: AtomicU64,
    by_reason: Mutex<BTreeMap<RejectionReason, u64>>,
}

/// Handler permit; frees its slot and wakes the queue on drop.
struct Slot<'a> {
    manager: &'a BackpressureManager,
}

impl Drop for Slot<'_> {
    fn drop(&mut self) {
        {
            let mut active = self.manager.active.lock();
            *active = active.saturating_sub(1);
        }
        self.manager.queue.notify_waiters();
    }
}

/// Decrements the in-flight gauge when the request future ends or is dropped.
struct InFlight<'a>(&'a AtomicU64);

impl<'a> InFlight<'a> {
    fn enter(gauge: &'a AtomicU64) -> Self {
        gauge.fetch_add(1, Ordering::SeqCst);
        Self(gauge)
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

// ============================================================================
// Manager
// ============================================================================

/// Overload protection for a request handler.
///
/// # Example
///
/// ```ignore
/// use edgequake_retrieval::{BackpressureConfig, BackpressureManager, RequestContext};
///
/// let manager = BackpressureManager::new(BackpressureConfig::default())?;
/// let processed = manager
///     .process_request(RequestContext::new().with_priority(0), |ctx| async move {
///         Ok::<_, std::io::Error>(ctx.request_id.len())
///     })
///     .await?;
/// ```
pub struct BackpressureManager {
    config: BackpressureConfig,
    clock: SharedClock,
    rate_limiter: RateLimiter,
    circuit_breaker: CircuitBreaker,
    queue: PriorityQueue<u64>,
    next_ticket: AtomicU64,
    active: Mutex<usize>,
    resources: ResourceMonitor,
    sampler: Arc<dyn ResourceSampler>,
    latency: Option<Arc<LatencyTracker>>,
    state: RwLock<AdaptiveState>,
    counters: Counters,
    metrics_history: Mutex<VecDeque<BackpressureMetrics>>,
}

impl fmt::Debug for BackpressureManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = *self.state.read();
        f.debug_struct("BackpressureManager")
            .field("degradation_level", &state.degradation_level)
            .field("throttle_level", &state.throttle_level)
            .field("queue_depth", &self.queue.len())
            .finish()
    }
}

impl BackpressureManager {
    /// Manager sampling the live system with the system clock.
    pub fn new(config: BackpressureConfig) -> Result<Self, ConfigError> {
        let sampler = Arc::new(SysinfoSampler::new(config.disk_io_ceiling_bytes_per_sec));
        Self::with_parts(config, sampler, SystemClock::shared())
    }

    /// Manager with an explicit resource sampler and clock.
    pub fn with_parts(
        config: BackpressureConfig,
        sampler: Arc<dyn ResourceSampler>,
        clock: SharedClock,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self {
            rate_limiter: RateLimiter::new(
                config.max_requests_per_second,
                config.burst_capacity,
                config.sliding_window_seconds,
                clock.clone(),
            ),
            circuit_breaker: CircuitBreaker::new(
                "request_handler",
                config.failure_threshold,
                config.recovery_timeout(),
                config.half_open_max_calls,
                clock.clone(),
            ),
            queue: PriorityQueue::new(config.max_queue_size, config.priority_levels),
            next_ticket: AtomicU64::new(0),
            active: Mutex::new(0),
            resources: ResourceMonitor::new(&config),
            sampler,
            latency: None,
            state: RwLock::new(AdaptiveState::default()),
            counters: Counters::default(),
            metrics_history: Mutex::new(VecDeque::new()),
            config,
            clock,
        })
    }

    /// Feed global p95 latency into degradation decisions.
    pub fn with_latency_tracker(mut self, tracker: Arc<LatencyTracker>) -> Self {
        self.latency = Some(tracker);
        self
    }

    pub fn config(&self) -> &BackpressureConfig {
        &self.config
    }

    pub fn degradation_level(&self) -> DegradationLevel {
        self.state.read().degradation_level
    }

    pub fn throttle_level(&self) -> f64 {
        self.state.read().throttle_level
    }

    pub fn circuit_breaker(&self) -> &CircuitBreaker {
        &self.circuit_breaker
    }

    pub fn resources(&self) -> &ResourceMonitor {
        &self.resources
    }

    /// Handlers allowed at `throttle_level`.
    fn concurrency_limit(&self, throttle_level: f64) -> usize {
        let max = self.config.max_concurrent_requests;
        if throttle_level <= THROTTLE_QUEUE_LEVEL {
            return max;
        }
        let scaled = (max as f64 * (1.0 - throttle_level.clamp(0.0, 1.0))).ceil() as usize;
        scaled.clamp(1, max)
    }

    fn try_claim_slot(&self, limit: usize) -> Option<Slot<'_>> {
        let mut active = self.active.lock();
        if *active >= limit {
            return None;
        }
        *active += 1;
        Some(Slot { manager: self })
    }

    /// Handlers currently holding a slot.
    pub fn active_requests(&self) -> usize {
        *self.active.lock()
    }

    fn reject(&self, ctx: &RequestContext, err: BackpressureError) -> BackpressureError {
        self.counters.rejected.fetch_add(1, Ordering::SeqCst);
        *self.counters.by_reason.lock().entry(err.reason).or_insert(0) += 1;
        warn!(
            request_id = %ctx.request_id,
            priority = ctx.priority,
            reason = %err.reason,
            retry_after_ms = err.retry_after.map(|d| d.as_millis() as u64),
            "Request rejected: {}",
            err.message
        );
        err
    }

    /// Run `handler` under admission control.
    ///
    /// The handler receives a copy of the context; when the system is
    /// degraded the copy carries `degradation_level` in its metadata. A
    /// handler error is counted as a circuit-breaker failure and returned as
    /// a `processing_error` rejection with the original message.
    pub async fn process_request<F, Fut, T, E>(
        &self,
        mut ctx: RequestContext,
        handler: F,
    ) -> Result<ProcessedRequest<T>, BackpressureError>
    where
        F: FnOnce(RequestContext) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: fmt::Display,
    {
        self.counters.total.fetch_add(1, Ordering::SeqCst);
        let _in_flight = InFlight::enter(&self.counters.in_flight);

        // 1. Rate limit
        let rate = self.rate_limiter.is_allowed();
        if !rate.allowed {
            let err = BackpressureError::new(RejectionReason::RateLimit, "rate limit exceeded")
                .with_retry_after(rate.retry_after);
            return Err(self.reject(&ctx, err));
        }

        // 2. Circuit breaker
        let circuit = self.circuit_breaker.call_allowed();
        if !circuit.is_allowed() {
            let retry_after = self
                .circuit_breaker
                .cooldown_remaining()
                .unwrap_or_else(|| self.circuit_breaker.recovery_timeout());
            let err = BackpressureError::new(RejectionReason::CircuitBreaker, circuit.as_str())
                .with_retry_after(retry_after);
            return Err(self.reject(&ctx, err));
        }

        match self.admit(&mut ctx).await {
            Ok((queued, slot)) => {
                let result = self.execute(ctx, handler, queued).await;
                drop(slot);
                result
            }
            Err(err) => {
                if circuit == CircuitDecision::CircuitHalfOpen {
                    self.circuit_breaker.release_trial();
                }
                Err(self.reject(&ctx, err))
            }
        }
    }

    /// Steps 3 to 5. Returns whether the request went through the queue,
    /// and the slot it holds while the handler runs.
    async fn admit(
        &self,
        ctx: &mut RequestContext,
    ) -> Result<(bool, Slot<'_>), BackpressureError> {
        let state = *self.state.read();

        // 3. Resource pressure
        if self.config.enable_adaptive_throttling && self.resources.is_overloaded() {
            if state.throttle_level > THROTTLE_REJECT_LEVEL {
                return Err(BackpressureError::new(
                    RejectionReason::ResourcePressure,
                    format!(
                        "system overloaded (throttle level {:.2})",
                        state.throttle_level
                    ),
                ));
            }
            let delay = MAX_THROTTLE_DELAY.mul_f64(state.throttle_level.clamp(0.0, 1.0));
            if !delay.is_zero() {
                debug!(
                    request_id = %ctx.request_id,
                    delay_ms = delay.as_millis() as u64,
                    "Throttling request"
                );
                self.clock.sleep(delay).await;
            }
        }

        // 4. Conditional queueing
        let limit = self.concurrency_limit(state.throttle_level);
        let direct = if self.queue.is_empty() && state.throttle_level <= THROTTLE_QUEUE_LEVEL {
            self.try_claim_slot(limit)
        } else {
            None
        };
        let (queued, slot) = match direct {
            Some(slot) => (false, slot),
            None => {
                let ticket = self.next_ticket.fetch_add(1, Ordering::Relaxed);
                self.queue.try_put(ticket, ctx.priority).map_err(|err| {
                    BackpressureError::new(RejectionReason::QueueFull, err.to_string())
                })?;

                let wait = ctx.timeout().min(self.config.queue_timeout());
                let start = self.clock.now();
                let slot = match self
                    .queue
                    .wait_turn(wait, |t| *t == ticket, || self.try_claim_slot(limit))
                    .await
                {
                    Ok((_, slot)) => slot,
                    Err(QueueError::Timeout(waited)) => {
                        return Err(BackpressureError::new(
                            RejectionReason::QueueTimeout,
                            format!("waited {:?} in queue", waited),
                        ));
                    }
                    Err(err @ QueueError::Full { .. }) => {
                        return Err(BackpressureError::new(
                            RejectionReason::QueueFull,
                            err.to_string(),
                        ));
                    }
                };
                let waited = self.clock.now().saturating_duration_since(start);
                ctx.queue_time_ms = Some(waited.as_secs_f64() * 1000.0);
                debug!(
                    request_id = %ctx.request_id,
                    priority = ctx.priority,
                    queue_ms = waited.as_millis() as u64,
                    "Dequeued request"
                );
                (true, slot)
            }
        };

        // 5. Degradation
        let level = self.degradation_level();
        if level == DegradationLevel::MaintenanceMode {
            return Err(BackpressureError::new(
                RejectionReason::MaintenanceMode,
                "system is in maintenance mode",
            ));
        }
        if level > DegradationLevel::Normal {
            ctx.metadata.insert(
                DEGRADATION_LEVEL_KEY.to_string(),
                serde_json::Value::String(level.as_str().to_string()),
            );
        }

        Ok((queued, slot))
    }

    async fn execute<F, Fut, T, E>(
        &self,
        mut ctx: RequestContext,
        handler: F,
        queued: bool,
    ) -> Result<ProcessedRequest<T>, BackpressureError>
    where
        F: FnOnce(RequestContext) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: fmt::Display,
    {
        let start = self.clock.now();
        let result = handler(ctx.clone()).await;
        let elapsed = self.clock.now().saturating_duration_since(start);
        ctx.processing_time_ms = Some(elapsed.as_secs_f64() * 1000.0);

        match result {
            Ok(value) => {
                self.circuit_breaker.record_success();
                let counter = if queued {
                    &self.counters.queued
                } else {
                    &self.counters.allowed
                };
                counter.fetch_add(1, Ordering::SeqCst);
                ctx.outcome = Some(RequestOutcome::Completed);
                debug!(
                    request_id = %ctx.request_id,
                    queued,
                    processing_ms = elapsed.as_millis() as u64,
                    "Request completed"
                );
                Ok(ProcessedRequest {
                    value,
                    context: ctx,
                })
            }
            Err(e) => {
                self.circuit_breaker.record_failure();
                let message = e.to_string();
                ctx.outcome = Some(RequestOutcome::Failed {
                    error: message.clone(),
                });
                let err = BackpressureError::new(RejectionReason::ProcessingError, message);
                Err(self.reject(&ctx, err))
            }
        }
    }

    // ------------------------------------------------------------------------
    // Monitoring
    // ------------------------------------------------------------------------

    fn latency_level(&self) -> (DegradationLevel, Option<f64>) {
        let Some(tracker) = &self.latency else {
            return (DegradationLevel::Normal, None);
        };
        let snapshot = tracker.get_current_snapshot(None);
        if snapshot.is_empty() {
            return (DegradationLevel::Normal, None);
        }
        let sla = tracker.config().sla_p95_ms;
        let level = if snapshot.p95_ms > 2.0 * sla {
            DegradationLevel::EssentialOnly
        } else if snapshot.p95_ms > sla {
            DegradationLevel::ReducedFeatures
        } else {
            DegradationLevel::Normal
        };
        (level, Some(snapshot.p95_ms))
    }

    /// Sample resources, adjust throttle and degradation, record metrics.
    pub fn run_monitoring_cycle(&self) -> BackpressureMetrics {
        let sample = self.sampler.sample();
        self.resources.update(sample);
        let overloaded = self.resources.is_overloaded();
        let pressure = self.resources.pressure_ratio();
        let (latency_level, latency_p95_ms) = self.latency_level();

        let resource_level = DegradationLevel::from_pressure(pressure);
        let target = self.config.cap_level(resource_level.max(latency_level));

        let (previous, current) = {
            let mut state = self.state.write();
            let previous = *state;
            if self.config.enable_adaptive_throttling {
                state.throttle_level = if overloaded {
                    (state.throttle_level + self.config.throttle_step()).min(1.0)
                } else {
                    (state.throttle_level - self.config.recovery_step()).max(0.0)
                };
            }
            state.degradation_level = target;
            (previous, *state)
        };

        if previous.degradation_level != current.degradation_level {
            info!(
                from = %previous.degradation_level,
                to = %current.degradation_level,
                pressure,
                latency_p95_ms,
                "Degradation level changed"
            );
        }
        if previous.throttle_level != current.throttle_level {
            debug!(
                throttle_level = current.throttle_level,
                overloaded,
                "Throttle level adjusted"
            );
        }

        let window_request_count = self.rate_limiter.window_count();
        let metrics = BackpressureMetrics {
            timestamp_ms: self.clock.unix_millis(),
            current_rate: window_request_count as f64 / self.config.sliding_window_seconds,
            window_request_count,
            queue_depth: self.queue.len(),
            resources: sample,
            pressure_ratio: pressure,
            throttle_level: current.throttle_level,
            degradation_level: current.degradation_level,
            circuit_state: self.circuit_breaker.state().to_string(),
            latency_p95_ms,
        };

        let mut history = self.metrics_history.lock();
        history.push_back(metrics.clone());
        while history.len() > self.config.metrics_history_size {
            history.pop_front();
        }
        metrics
    }

    /// Run the monitoring cycle every `monitoring_interval_seconds`.
    ///
    /// Sampling happens on the blocking pool so a busy request path cannot
    /// starve it.
    pub fn start_monitoring(self: &Arc<Self>) -> PeriodicTask {
        let manager = Arc::clone(self);
        PeriodicTask::spawn(
            "backpressure-monitor",
            self.config.monitoring_interval(),
            move || {
                let manager = Arc::clone(&manager);
                async move {
                    if let Err(err) =
                        tokio::task::spawn_blocking(move || manager.run_monitoring_cycle()).await
                    {
                        warn!(error = %err, "Monitoring cycle failed");
                    }
                }
            },
        )
    }

    pub fn get_metrics_history(&self) -> Vec<BackpressureMetrics> {
        self.metrics_history.lock().iter().cloned().collect()
    }

    pub fn counters(&self) -> RequestCounters {
        let c = &self.counters;
        RequestCounters {
            total: c.total.load(Ordering::SeqCst),
            allowed: c.allowed.load(Ordering::SeqCst),
            queued: c.queued.load(Ordering::SeqCst),
            rejected: c.rejected.load(Ordering::SeqCst),
            in_flight: c.in_flight.load(Ordering::SeqCst),
            rejections_by_reason: c
                .by_reason
                .lock()
                .iter()
                .map(|(reason, n)| (reason.as_str().to_string(), *n))
                .collect(),
        }
    }

    pub fn get_status_summary(&self) -> BackpressureStatus {
        let state = *self.state.read();
        let window_request_count = self.rate_limiter.window_count();
        BackpressureStatus {
            degradation_level: state.degradation_level,
            throttle_level: state.throttle_level,
            circuit_breaker: self.circuit_breaker.status(),
            rate_limiter: RateLimiterStatus {
                available_tokens: self.rate_limiter.available_tokens(),
                current_rate: self.rate_limiter.current_rate(),
                window_request_count,
                max_requests_per_second: self.config.max_requests_per_second,
                burst_capacity: self.config.burst_capacity,
            },
            queue: QueueStatus {
                depth: self.queue.len(),
                capacity: self.queue.capacity(),
                depth_by_priority: self.queue.depth_by_priority(),
                active_requests: self.active_requests(),
                concurrency_limit: self.concurrency_limit(state.throttle_level),
            },
            resources: self.resources.latest(),
            pressure_ratio: self.resources.pressure_ratio(),
            requests: self.counters(),
            latency_p95_ms: self.latency_level().1,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backpressure::resource::FixedSampler;
    use crate::clock::ManualClock;
    use crate::latency::LatencyConfig;

    struct Harness {
        manager: BackpressureManager,
        sampler: Arc<FixedSampler>,
        clock: Arc<ManualClock>,
    }

    fn harness(config: BackpressureConfig) -> Harness {
        let sampler = Arc::new(FixedSampler::new(ResourceSample::new(10.0, 10.0, 0.0)));
        let clock = ManualClock::shared();
        let manager =
            BackpressureManager::with_parts(config, sampler.clone(), clock.clone()).unwrap();
        Harness {
            manager,
            sampler,
            clock,
        }
    }

    async fn ok_request(
        manager: &BackpressureManager,
    ) -> Result<ProcessedRequest<&'static str>, BackpressureError> {
        manager
            .process_request(RequestContext::new(), |_| async {
                Ok::<_, String>("done")
            })
            .await
    }

    #[tokio::test]
    async fn test_allows_under_light_load() {
        let h = harness(BackpressureConfig::default());
        let processed = ok_request(&h.manager).await.unwrap();

        assert_eq!(processed.value, "done");
        assert!(processed.context.is_completed());
        assert!(processed.context.processing_time_ms.is_some());
        assert!(processed.context.queue_time_ms.is_none());
        assert!(processed.context.degradation_level().is_none());

        let counters = h.manager.counters();
        assert_eq!(counters.total, 1);
        assert_eq!(counters.allowed, 1);
        assert_eq!(counters.in_flight, 0);
    }

    #[tokio::test]
    async fn test_rate_limit_rejection_carries_retry_hint() {
        let h = harness(BackpressureConfig::default().with_rate_limit(1.0, 2));
        ok_request(&h.manager).await.unwrap();
        ok_request(&h.manager).await.unwrap();

        let err = ok_request(&h.manager).await.unwrap_err();
        assert_eq!(err.reason, RejectionReason::RateLimit);
        let retry = err.retry_after_seconds().unwrap();
        assert!((retry - 1.0).abs() < 1e-6);
    }

    #[tokio::test]
    async fn test_handler_failures_open_circuit() {
        let h = harness(BackpressureConfig::default().with_circuit_breaker(2, 30.0, 1));

        for _ in 0..2 {
            let err = h
                .manager
                .process_request(RequestContext::new(), |_| async {
                    Err::<(), _>("index offline")
                })
                .await
                .unwrap_err();
            assert_eq!(err.reason, RejectionReason::ProcessingError);
            assert_eq!(err.message, "index offline");
            assert!(!err.is_retryable());
        }

        let mut called = false;
        let err = h
            .manager
            .process_request(RequestContext::new(), |_| {
                called = true;
                async { Ok::<_, String>(()) }
            })
            .await
            .unwrap_err();
        assert!(!called);
        assert_eq!(err.reason, RejectionReason::CircuitBreaker);
        assert_eq!(err.message, "circuit_open");
        assert_eq!(err.retry_after, Some(Duration::from_secs(30)));

        h.clock.advance(Duration::from_secs(30));
        ok_request(&h.manager).await.unwrap();
        assert_eq!(h.manager.circuit_breaker().failure_count(), 0);
    }

    #[tokio::test]
    async fn test_high_throttle_rejects_for_resource_pressure() {
        let h = harness(BackpressureConfig::default());
        h.sampler.set(ResourceSample::new(95.0, 10.0, 0.0));
        for _ in 0..12 {
            h.manager.run_monitoring_cycle();
        }
        assert_eq!(h.manager.throttle_level(), 1.0);

        let err = ok_request(&h.manager).await.unwrap_err();
        assert_eq!(err.reason, RejectionReason::ResourcePressure);
        assert_eq!(err.retry_after, Some(Duration::from_secs(5)));
    }

    #[tokio::test]
    async fn test_moderate_throttle_delays_and_tags_degradation() {
        let h = harness(BackpressureConfig::default());
        // 85 / 80 = 1.0625 -> essential_only
        h.sampler.set(ResourceSample::new(85.0, 10.0, 0.0));
        for _ in 0..3 {
            h.manager.run_monitoring_cycle();
        }
        assert_eq!(h.manager.degradation_level(), DegradationLevel::EssentialOnly);

        let before = h.clock.elapsed();
        let processed = h
            .manager
            .process_request(RequestContext::new(), |ctx| async move {
                Ok::<_, String>(ctx.degradation_level().map(str::to_string))
            })
            .await
            .unwrap();
        let delay = h.clock.elapsed() - before;

        assert!(delay >= Duration::from_millis(29) && delay <= Duration::from_millis(31));
        assert_eq!(processed.value.as_deref(), Some("essential_only"));
        assert_eq!(processed.context.degradation_level(), Some("essential_only"));
        assert_eq!(h.manager.counters().allowed, 1);
    }

    #[tokio::test]
    async fn test_throttle_above_half_routes_through_queue() {
        let h = harness(BackpressureConfig::default());
        h.sampler.set(ResourceSample::new(90.0, 10.0, 0.0));
        for _ in 0..6 {
            h.manager.run_monitoring_cycle();
        }
        assert!(h.manager.throttle_level() > 0.5);

        let processed = ok_request(&h.manager).await.unwrap();
        assert!(processed.context.queue_time_ms.is_some());

        let counters = h.manager.counters();
        assert_eq!(counters.queued, 1);
        assert_eq!(counters.allowed, 0);
        assert_eq!(h.manager.get_status_summary().queue.depth, 0);
    }

    #[tokio::test]
    async fn test_maintenance_mode_rejects() {
        let config = BackpressureConfig::default().with_adaptive_throttling(false);
        let h = harness(config);
        h.sampler.set(ResourceSample::new(100.0, 10.0, 0.0));
        h.manager.run_monitoring_cycle();
        assert_eq!(
            h.manager.degradation_level(),
            DegradationLevel::MaintenanceMode
        );

        let err = ok_request(&h.manager).await.unwrap_err();
        assert_eq!(err.reason, RejectionReason::MaintenanceMode);
        assert_eq!(err.retry_after, Some(Duration::from_secs(60)));
    }

    #[tokio::test]
    async fn test_level_capped_by_configured_levels() {
        let config = BackpressureConfig {
            degradation_levels: vec![
                DegradationLevel::Normal,
                DegradationLevel::ReducedFeatures,
                DegradationLevel::EssentialOnly,
            ],
            enable_adaptive_throttling: false,
            ..Default::default()
        };
        let h = harness(config);
        h.sampler.set(ResourceSample::new(100.0, 10.0, 0.0));
        h.manager.run_monitoring_cycle();

        assert_eq!(h.manager.degradation_level(), DegradationLevel::EssentialOnly);
        assert!(ok_request(&h.manager).await.is_ok());
    }

    #[tokio::test]
    async fn test_recovery_lowers_throttle() {
        let h = harness(BackpressureConfig::default());
        h.sampler.set(ResourceSample::new(95.0, 10.0, 0.0));
        h.manager.run_monitoring_cycle();
        h.manager.run_monitoring_cycle();
        h.sampler.set(ResourceSample::new(10.0, 10.0, 0.0));
        h.manager.run_monitoring_cycle();

        assert!((h.manager.throttle_level() - 0.15).abs() < 1e-9);
        assert_eq!(h.manager.degradation_level(), DegradationLevel::Normal);
    }

    #[tokio::test]
    async fn test_latency_feedback_raises_level() {
        let clock = ManualClock::shared();
        let tracker = Arc::new(LatencyTracker::with_clock(
            LatencyConfig::default().with_sla_p95_ms(100.0),
            clock.clone(),
        ));
        let sampler = Arc::new(FixedSampler::new(ResourceSample::default()));
        let manager =
            BackpressureManager::with_parts(BackpressureConfig::default(), sampler, clock)
                .unwrap()
                .with_latency_tracker(tracker.clone());

        for _ in 0..20 {
            tracker.record_latency(150.0, "retrieve");
        }
        let metrics = manager.run_monitoring_cycle();
        assert_eq!(metrics.degradation_level, DegradationLevel::ReducedFeatures);
        assert_eq!(metrics.latency_p95_ms, Some(150.0));

        for _ in 0..200 {
            tracker.record_latency(500.0, "retrieve");
        }
        manager.run_monitoring_cycle();
        assert_eq!(manager.degradation_level(), DegradationLevel::EssentialOnly);
    }

    #[tokio::test]
    async fn test_outcomes_account_for_every_request() {
        let h = harness(BackpressureConfig::default().with_rate_limit(1.0, 3));
        ok_request(&h.manager).await.unwrap();
        let _ = h
            .manager
            .process_request(RequestContext::new(), |_| async { Err::<(), _>("boom") })
            .await;
        ok_request(&h.manager).await.unwrap();
        let _ = ok_request(&h.manager).await;
        let _ = ok_request(&h.manager).await;

        let c = h.manager.counters();
        assert_eq!(c.total, 5);
        assert_eq!(c.allowed + c.queued + c.rejected + c.in_flight, c.total);
        assert_eq!(c.rejections_by_reason.get("rate_limit"), Some(&2));
        assert_eq!(c.rejections_by_reason.get("processing_error"), Some(&1));
    }

    #[tokio::test]
    async fn test_metrics_history_bounded_and_rate_normalized() {
        let config = BackpressureConfig {
            metrics_history_size: 2,
            sliding_window_seconds: 10.0,
            ..Default::default()
        };
        let h = harness(config);
        for _ in 0..5 {
            ok_request(&h.manager).await.unwrap();
        }
        for _ in 0..3 {
            h.manager.run_monitoring_cycle();
        }

        let history = h.manager.get_metrics_history();
        assert_eq!(history.len(), 2);
        assert_eq!(history[1].window_request_count, 5);
        assert!((history[1].current_rate - 0.5).abs() < 1e-12);
        assert_eq!(history[1].circuit_state, "closed");
    }

    #[tokio::test]
    async fn test_status_summary_serializes() {
        let h = harness(BackpressureConfig::default());
        ok_request(&h.manager).await.unwrap();
        let status = h.manager.get_status_summary();
        let json = serde_json::to_value(&status).unwrap();
        assert_eq!(json["degradation_level"], "normal");
        assert_eq!(json["circuit_breaker"]["state"], "closed");
        assert_eq!(json["requests"]["allowed"], 1);
        assert_eq!(json["queue"]["depth_by_priority"].as_array().unwrap().len(), 3);
    }

    #[test]
    fn test_invalid_config_rejected() {
        let config = BackpressureConfig::default().with_rate_limit(0.0, 10);
        let result = BackpressureManager::with_parts(
            config,
            Arc::new(FixedSampler::default()),
            ManualClock::shared(),
        );
        assert!(matches!(result, Err(ConfigError::Validation(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn test_background_monitoring() {
        let config = BackpressureConfig {
            monitoring_interval_seconds: 1.0,
            ..Default::default()
        };
        let sampler = Arc::new(FixedSampler::new(ResourceSample::new(95.0, 0.0, 0.0)));
        let manager = Arc::new(
            BackpressureManager::with_parts(config, sampler, SystemClock::shared()).unwrap(),
        );

        let task = manager.start_monitoring();
        tokio::time::sleep(Duration::from_millis(1500)).await;
        task.stop().await;

        assert!(!manager.get_metrics_history().is_empty());
        assert!(manager.throttle_level() > 0.0);
    }

    #[tokio::test]
    async fn test_full_queue_rejects_while_slots_are_busy() {
        let config = BackpressureConfig::default()
            .with_concurrency_limit(1)
            .with_queue(1, 30.0);
        let h = harness(config);
        let (release, hold) = tokio::sync::oneshot::channel::<()>();

        let holder = h.manager.process_request(RequestContext::new(), |_| async move {
            hold.await.map_err(|e| e.to_string())
        });
        let waiter = ok_request(&h.manager);
        let overflow = async {
            let result = ok_request(&h.manager).await;
            let _ = release.send(());
            result
        };
        let (holder, waiter, overflow) = tokio::join!(holder, waiter, overflow);

        assert!(holder.is_ok());
        assert!(waiter.unwrap().context.queue_time_ms.is_some());
        assert_eq!(overflow.unwrap_err().reason, RejectionReason::QueueFull);

        let c = h.manager.counters();
        assert_eq!((c.allowed, c.queued, c.rejected), (1, 1, 1));
        assert_eq!(c.rejections_by_reason.get("queue_full"), Some(&1));
        assert_eq!(h.manager.active_requests(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_queue_wait_capped_by_queue_timeout() {
        let config = BackpressureConfig::default()
            .with_concurrency_limit(1)
            .with_queue(10, 0.5);
        let h = harness(config);
        let (release, hold) = tokio::sync::oneshot::channel::<()>();

        let holder = h.manager.process_request(RequestContext::new(), |_| async move {
            hold.await.map_err(|e| e.to_string())
        });
        let waiter = async {
            let result = h
                .manager
                .process_request(RequestContext::new().with_timeout_seconds(30.0), |_| async {
                    Ok::<_, String>(())
                })
                .await;
            let _ = release.send(());
            result
        };
        let (holder, waiter) = tokio::join!(holder, waiter);

        assert!(holder.is_ok());
        let err = waiter.unwrap_err();
        assert_eq!(err.reason, RejectionReason::QueueTimeout);
        assert_eq!(
            err.message,
            format!("waited {:?} in queue", Duration::from_millis(500))
        );
        assert_eq!(h.manager.get_status_summary().queue.depth, 0);
    }

    #[tokio::test]
    async fn test_queued_requests_run_in_priority_order() {
        let h = harness(BackpressureConfig::default().with_concurrency_limit(1));
        let order = Arc::new(Mutex::new(Vec::new()));
        let (release, hold) = tokio::sync::oneshot::channel::<()>();

        let holder = h.manager.process_request(RequestContext::new(), |_| async move {
            hold.await.map_err(|e| e.to_string())
        });
        let manager = &h.manager;
        let queued = |priority: usize| {
            let order = order.clone();
            async move {
                manager
                    .process_request(RequestContext::new().with_priority(priority), |ctx| {
                        async move {
                            order.lock().push(ctx.priority);
                            Ok::<_, String>(())
                        }
                    })
                    .await
            }
        };
        let releaser = async {
            tokio::task::yield_now().await;
            let _ = release.send(());
        };

        let (holder, low, high, mid, ()) =
            tokio::join!(holder, queued(2), queued(0), queued(1), releaser);

        assert!(holder.is_ok() && low.is_ok() && high.is_ok() && mid.is_ok());
        assert_eq!(*order.lock(), vec![0, 1, 2]);
        assert_eq!(h.manager.counters().queued, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancelled_queued_request_leaves_queue_usable() {
        let h = harness(BackpressureConfig::default().with_concurrency_limit(1));
        let (release, hold) = tokio::sync::oneshot::channel::<()>();

        let holder = h.manager.process_request(RequestContext::new(), |_| async move {
            hold.await.map_err(|e| e.to_string())
        });
        let abandoned = async {
            let waited =
                tokio::time::timeout(Duration::from_millis(10), ok_request(&h.manager)).await;
            let _ = release.send(());
            waited
        };
        let (holder, abandoned) = tokio::join!(holder, abandoned);

        assert!(holder.is_ok());
        assert!(abandoned.is_err());
        assert_eq!(h.manager.get_status_summary().queue.depth, 0);
        assert_eq!(h.manager.active_requests(), 0);

        let processed = ok_request(&h.manager).await.unwrap();
        assert!(processed.context.queue_time_ms.is_none());
    }

    #[test]
    fn test_concurrency_limit_shrinks_with_throttle() {
        let h = harness(BackpressureConfig::default().with_concurrency_limit(10));
        assert_eq!(h.manager.concurrency_limit(0.0), 10);
        assert_eq!(h.manager.concurrency_limit(0.5), 10);
        assert_eq!(h.manager.concurrency_limit(0.75), 3);
        assert_eq!(h.manager.concurrency_limit(1.0), 1);
    }
}
