//! Retry executor with exponential backoff.
//!
//! The executor applies a [`RetryStrategy`] to any error that can describe
//! its own retry advice through [`RetryHint`]. Both failure domains do:
//!
//! | Error | Hint |
//! |-------|------|
//! | [`RetrievalError`] | its `retry_strategy()` |
//! | [`BackpressureError`] | `WaitAndRetry { retry_after }` when transient, `NoRetry` otherwise |
//!
//! During exponential backoff an error that names its own wait (a rejection
//! with `retry_after`) overrides the computed delay, capped by `max_delay`.
//! `maintenance_mode` and `processing_error` rejections stop the loop at once.
//!
//! # Usage
//!
//! ```ignore
//! use edgequake_retrieval::retry::RetryExecutor;
//! use edgequake_retrieval::RetryStrategy;
//!
//! let executor = RetryExecutor::new();
//! let result = executor.execute(
//!     &RetryStrategy::network_backoff(),
//!     || async { ctx.search("token bucket", 5, 1).await },
//! ).await;
//! ```

use std::fmt::Display;
use std::future::Future;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::clock::{SharedClock, SystemClock};
use crate::error::{BackpressureError, RetrievalError, RetryStrategy};

/// Errors that know how they should be retried.
pub trait RetryHint: Display {
    fn retry_hint(&self) -> RetryStrategy;
}

impl RetryHint for RetrievalError {
    fn retry_hint(&self) -> RetryStrategy {
        self.retry_strategy()
    }
}

impl RetryHint for BackpressureError {
    fn retry_hint(&self) -> RetryStrategy {
        if !self.is_retryable() {
            return RetryStrategy::NoRetry;
        }
        RetryStrategy::WaitAndRetry {
            wait: self
                .retry_after
                .or_else(|| self.reason.default_retry_after())
                .unwrap_or(Duration::from_secs(1)),
        }
    }
}

/// Executor for retry logic with configurable backoff strategies.
///
/// Delays go through the injected [`Clock`](crate::Clock), so tests can use a
/// `ManualClock` and observe the total virtual wait.
#[derive(Debug)]
pub struct RetryExecutor {
    log_retries: bool,
    clock: SharedClock,
}

impl Default for RetryExecutor {
    fn default() -> Self {
        Self::new()
    }
}

impl RetryExecutor {
    pub fn new() -> Self {
        Self {
            log_retries: true,
            clock: SystemClock::shared(),
        }
    }

    /// Create a retry executor without logging.
    pub fn silent() -> Self {
        Self {
            log_retries: false,
            clock: SystemClock::shared(),
        }
    }

    pub fn with_clock(mut self, clock: SharedClock) -> Self {
        self.clock = clock;
        self
    }

    /// Execute an async operation with automatic retry based on strategy.
    ///
    /// Returns the last error if every attempt fails.
    pub async fn execute<F, Fut, T, E>(
        &self,
        strategy: &RetryStrategy,
        mut operation: F,
    ) -> Result<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: RetryHint,
    {
        match strategy {
            RetryStrategy::NoRetry => operation().await,

            RetryStrategy::WaitAndRetry { wait } => {
                self.execute_wait_and_retry(*wait, operation).await
            }

            RetryStrategy::ExponentialBackoff {
                base_delay,
                max_delay,
                max_attempts,
            } => {
                self.execute_exponential_backoff(*base_delay, *max_delay, *max_attempts, operation)
                    .await
            }
        }
    }

    async fn execute_wait_and_retry<F, Fut, T, E>(
        &self,
        wait: Duration,
        mut operation: F,
    ) -> Result<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: RetryHint,
    {
        match operation().await {
            Ok(v) => Ok(v),
            Err(e) => {
                if !e.retry_hint().should_retry() {
                    return Err(e);
                }
                if self.log_retries {
                    warn!(wait_ms = wait.as_millis() as u64, error = %e, "Operation failed, waiting before retry");
                }
                self.clock.sleep(wait).await;
                operation().await
            }
        }
    }

    async fn execute_exponential_backoff<F, Fut, T, E>(
        &self,
        base_delay: Duration,
        max_delay: Duration,
        max_attempts: u32,
        mut operation: F,
    ) -> Result<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: RetryHint,
    {
        let mut delay = base_delay;
        let mut attempts = 0;

        loop {
            attempts += 1;

            match operation().await {
                Ok(v) => {
                    if attempts > 1 && self.log_retries {
                        info!(attempts, "Operation succeeded after retry");
                    }
                    return Ok(v);
                }
                Err(e) => {
                    if attempts >= max_attempts {
                        if self.log_retries {
                            warn!(attempts, error = %e, "Operation failed, giving up");
                        }
                        return Err(e);
                    }

                    let wait = match e.retry_hint() {
                        RetryStrategy::NoRetry => {
                            if self.log_retries {
                                debug!(error = %e, "Error is non-retryable, stopping");
                            }
                            return Err(e);
                        }
                        RetryStrategy::WaitAndRetry { wait } => wait.min(max_delay),
                        RetryStrategy::ExponentialBackoff { .. } => delay,
                    };

                    if self.log_retries {
                        warn!(
                            attempt = attempts,
                            max_attempts,
                            wait_ms = wait.as_millis() as u64,
                            error = %e,
                            "Attempt failed, retrying"
                        );
                    }

                    self.clock.sleep(wait).await;
                    delay = (delay * 2).min(max_delay);
                }
            }
        }
    }

    /// Execute an operation, taking the strategy from the first error.
    pub async fn execute_auto<F, Fut, T, E>(&self, mut operation: F) -> Result<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: RetryHint,
    {
        match operation().await {
            Ok(v) => Ok(v),
            Err(e) => {
                let strategy = e.retry_hint();

                if self.log_retries && strategy.should_retry() {
                    debug!(strategy = ?strategy, error = %e, "First attempt failed");
                }

                match strategy {
                    RetryStrategy::NoRetry => Err(e),
                    RetryStrategy::WaitAndRetry { wait } => {
                        self.clock.sleep(wait).await;
                        operation().await
                    }
                    RetryStrategy::ExponentialBackoff {
                        base_delay,
                        max_delay,
                        max_attempts,
                    } => {
                        self.clock.sleep(base_delay).await;
                        self.execute_exponential_backoff(
                            (base_delay * 2).min(max_delay),
                            max_delay,
                            max_attempts.saturating_sub(1),
                            operation,
                        )
                        .await
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::error::RejectionReason;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    fn executor(clock: &Arc<ManualClock>) -> RetryExecutor {
        RetryExecutor::silent().with_clock(clock.clone())
    }

    fn backoff(max_attempts: u32) -> RetryStrategy {
        RetryStrategy::ExponentialBackoff {
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_millis(500),
            max_attempts,
        }
    }

    #[tokio::test]
    async fn test_no_retry_succeeds() {
        let clock = ManualClock::shared();
        let result = executor(&clock)
            .execute(&RetryStrategy::NoRetry, || async {
                Ok::<_, RetrievalError>(42)
            })
            .await;
        assert_eq!(result.unwrap(), 42);
    }

    #[tokio::test]
    async fn test_exponential_backoff_retries_backend_errors() {
        let clock = ManualClock::shared();
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();

        let result = executor(&clock)
            .execute(&backoff(3), || {
                let count = counter.clone();
                async move {
                    let attempt = count.fetch_add(1, Ordering::SeqCst) + 1;
                    if attempt < 3 {
                        Err(RetrievalError::backend("dense", "connection reset"))
                    } else {
                        Ok(7)
                    }
                }
            })
            .await;

        assert_eq!(result.unwrap(), 7);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        // 100ms + 200ms
        assert_eq!(clock.elapsed(), Duration::from_millis(300));
    }

    #[tokio::test]
    async fn test_exponential_backoff_gives_up() {
        let clock = ManualClock::shared();
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();

        let result = executor(&clock)
            .execute(&backoff(4), || {
                let count = counter.clone();
                async move {
                    count.fetch_add(1, Ordering::SeqCst);
                    Err::<i32, _>(RetrievalError::Timeout)
                }
            })
            .await;

        assert!(matches!(result, Err(RetrievalError::Timeout)));
        assert_eq!(calls.load(Ordering::SeqCst), 4);
        // 100 + 200 + 400, the last delay capped at 500
        assert_eq!(clock.elapsed(), Duration::from_millis(700));
    }

    #[tokio::test]
    async fn test_stops_on_invalid_query() {
        let clock = ManualClock::shared();
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();

        let result = executor(&clock)
            .execute(&backoff(5), || {
                let count = counter.clone();
                async move {
                    count.fetch_add(1, Ordering::SeqCst);
                    Err::<i32, _>(RetrievalError::InvalidQuery("empty".to_string()))
                }
            })
            .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(clock.elapsed(), Duration::ZERO);
    }

    #[tokio::test]
    async fn test_rejection_retry_after_overrides_delay() {
        let clock = ManualClock::shared();
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();

        let result = executor(&clock)
            .execute(&backoff(3), || {
                let count = counter.clone();
                async move {
                    if count.fetch_add(1, Ordering::SeqCst) == 0 {
                        Err(BackpressureError::new(RejectionReason::RateLimit, "slow down")
                            .with_retry_after(Duration::from_millis(40)))
                    } else {
                        Ok("served")
                    }
                }
            })
            .await;

        assert_eq!(result.unwrap(), "served");
        assert_eq!(clock.elapsed(), Duration::from_millis(40));
    }

    #[tokio::test]
    async fn test_rejection_retry_after_capped_by_max_delay() {
        let clock = ManualClock::shared();
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();

        let result = executor(&clock)
            .execute(&backoff(2), || {
                let count = counter.clone();
                async move {
                    if count.fetch_add(1, Ordering::SeqCst) == 0 {
                        Err(BackpressureError::new(RejectionReason::CircuitBreaker, "open"))
                    } else {
                        Ok(1)
                    }
                }
            })
            .await;

        assert_eq!(result.unwrap(), 1);
        assert_eq!(clock.elapsed(), Duration::from_millis(500));
    }

    #[tokio::test]
    async fn test_maintenance_and_processing_errors_not_retried() {
        for reason in [RejectionReason::MaintenanceMode, RejectionReason::ProcessingError] {
            let clock = ManualClock::shared();
            let calls = Arc::new(AtomicU32::new(0));
            let counter = calls.clone();

            let result = executor(&clock)
                .execute(&backoff(5), || {
                    let count = counter.clone();
                    async move {
                        count.fetch_add(1, Ordering::SeqCst);
                        Err::<i32, _>(BackpressureError::new(reason, "no"))
                    }
                })
                .await;

            assert_eq!(result.unwrap_err().reason, reason);
            assert_eq!(calls.load(Ordering::SeqCst), 1);
        }
    }

    #[tokio::test]
    async fn test_wait_and_retry() {
        let clock = ManualClock::shared();
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();

        let result = executor(&clock)
            .execute(
                &RetryStrategy::WaitAndRetry {
                    wait: Duration::from_millis(250),
                },
                || {
                    let count = counter.clone();
                    async move {
                        if count.fetch_add(1, Ordering::SeqCst) == 0 {
                            Err(RetrievalError::BackendRateLimited {
                                backend: "lexical".to_string(),
                                message: "quota".to_string(),
                            })
                        } else {
                            Ok(42)
                        }
                    }
                },
            )
            .await;

        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(clock.elapsed(), Duration::from_millis(250));
    }

    #[tokio::test]
    async fn test_execute_auto_uses_error_strategy() {
        let clock = ManualClock::shared();
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();

        let result = executor(&clock)
            .execute_auto(|| {
                let count = counter.clone();
                async move {
                    if count.fetch_add(1, Ordering::SeqCst) == 0 {
                        Err(BackpressureError::new(RejectionReason::QueueFull, "full"))
                    } else {
                        Ok(3)
                    }
                }
            })
            .await;

        assert_eq!(result.unwrap(), 3);
        assert_eq!(clock.elapsed(), Duration::from_secs(1));
    }

    #[test]
    fn test_rejection_hints() {
        let hint = BackpressureError::new(RejectionReason::QueueTimeout, "late").retry_hint();
        assert_eq!(
            hint,
            RetryStrategy::WaitAndRetry {
                wait: Duration::from_secs(2)
            }
        );
        let hint = BackpressureError::new(RejectionReason::MaintenanceMode, "down").retry_hint();
        assert_eq!(hint, RetryStrategy::NoRetry);
    }
}
