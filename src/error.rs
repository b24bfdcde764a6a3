//! Error types for the retrieval pipeline and the admission layer.
//!
//! # Error Handling Philosophy
//!
//! Two failure domains, two shapes:
//!
//! 1. **Retrieval failures** ([`RetrievalError`]) propagate unmodified out of
//!    the pipeline. A dense/lexical backend outage or a reranker failure is
//!    never converted into an empty result list; the serving layer decides
//!    whether to retry.
//! 2. **Admission rejections** ([`BackpressureError`]) carry a machine-readable
//!    [`RejectionReason`] and a retry hint so callers can branch on the reason
//!    code instead of parsing messages.
//!
//! # Rejection Reasons
//!
//! | Reason | Cause | Default retry hint |
//! |--------|-------|--------------------|
//! | `rate_limit` | Token bucket exhausted | time until next token |
//! | `circuit_breaker` | Downstream circuit open | recovery timeout |
//! | `resource_pressure` | Throttle level too high | 5s |
//! | `queue_full` | Bounded queue at capacity | 1s |
//! | `queue_timeout` | Waited in queue past timeout | 2s |
//! | `maintenance_mode` | Deepest degradation level | 60s |
//! | `processing_error` | Handler itself failed | none |
//!
//! # Retry Strategies
//!
//! Each retrieval error maps to a [`RetryStrategy`]:
//! - `ExponentialBackoff`: transient backend/network failures
//! - `WaitAndRetry`: backend rate limiting
//! - `NoRetry`: invalid queries and configuration errors

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// Result type for retrieval operations.
pub type Result<T> = std::result::Result<T, RetrievalError>;

// ============================================================================
// Retry Strategy
// ============================================================================

/// Strategy for retrying a failed retrieval.
///
/// The pipeline itself never retries; this is advice for the serving layer.
#[derive(Debug, Clone, PartialEq)]
pub enum RetryStrategy {
    /// Retry with exponential backoff (for transient errors).
    ExponentialBackoff {
        /// Initial delay before first retry.
        base_delay: Duration,
        /// Maximum delay between retries.
        max_delay: Duration,
        /// Maximum number of retry attempts.
        max_attempts: u32,
    },

    /// Wait for a specific duration then retry once.
    WaitAndRetry {
        /// Duration to wait before retrying.
        wait: Duration,
    },

    /// Do not retry at all (permanent error).
    NoRetry,
}

impl RetryStrategy {
    /// Standard backoff for backend connectivity failures.
    pub fn network_backoff() -> Self {
        Self::ExponentialBackoff {
            base_delay: Duration::from_millis(125),
            max_delay: Duration::from_secs(30),
            max_attempts: 5,
        }
    }

    /// Standard backoff for backend-side failures.
    pub fn server_backoff() -> Self {
        Self::ExponentialBackoff {
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
            max_attempts: 3,
        }
    }

    /// Check if this strategy allows retrying.
    pub fn should_retry(&self) -> bool {
        !matches!(self, Self::NoRetry)
    }
}

// ============================================================================
// Retrieval Errors
// ============================================================================

/// Errors raised by the retrieval pipeline.
#[derive(Debug, Error)]
pub enum RetrievalError {
    /// A search backend failed.
    #[error("{backend} backend error: {message}")]
    Backend {
        /// Backend name (e.g. "dense", "lexical").
        backend: String,
        /// Failure description.
        message: String,
    },

    /// A backend rejected the call because of its own rate limit.
    #[error("{backend} backend rate limited: {message}")]
    BackendRateLimited {
        /// Backend name.
        backend: String,
        /// Failure description.
        message: String,
    },

    /// The cross-encoder failed to score candidates.
    #[error("Rerank failed: {0}")]
    Rerank(String),

    /// The query cannot be served (empty text, zero top_k, ...).
    #[error("Invalid query: {0}")]
    InvalidQuery(String),

    /// Pipeline misconfiguration.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Serialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A stage exceeded its deadline.
    #[error("Retrieval timed out")]
    Timeout,
}

impl RetrievalError {
    /// Convenience constructor for backend failures.
    pub fn backend(backend: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Backend {
            backend: backend.into(),
            message: message.into(),
        }
    }

    /// Get the appropriate retry strategy for this error.
    ///
    /// # Example
    ///
    /// ```
    /// use edgequake_retrieval::RetrievalError;
    ///
    /// let error = RetrievalError::backend("dense", "connection refused");
    /// assert!(error.retry_strategy().should_retry());
    /// ```
    pub fn retry_strategy(&self) -> RetryStrategy {
        match self {
            Self::Backend { .. } | Self::Timeout => RetryStrategy::network_backoff(),
            Self::BackendRateLimited { .. } => RetryStrategy::WaitAndRetry {
                wait: Duration::from_secs(5),
            },
            Self::Rerank(_) => RetryStrategy::server_backoff(),
            Self::InvalidQuery(_) | Self::Config(_) => RetryStrategy::NoRetry,
            Self::Serialization(_) => RetryStrategy::ExponentialBackoff {
                base_delay: Duration::from_secs(1),
                max_delay: Duration::from_secs(30),
                max_attempts: 2,
            },
        }
    }

    /// Get a user-facing description of the error with suggested action.
    pub fn user_description(&self) -> String {
        match self {
            Self::Backend { backend, .. } => {
                format!("The {} search backend is unavailable. Retry shortly.", backend)
            }
            Self::BackendRateLimited { backend, .. } => {
                format!("The {} search backend is throttling requests.", backend)
            }
            Self::Rerank(_) => "Reranking failed. Retrying...".to_string(),
            Self::InvalidQuery(msg) => format!("Invalid query: {}. Check your input.", msg),
            Self::Config(msg) => format!("Configuration error: {}.", msg),
            Self::Serialization(_) => {
                "Failed to decode backend response. This may be a temporary issue.".to_string()
            }
            Self::Timeout => "Retrieval timed out. The backends may be overloaded.".to_string(),
        }
    }

    /// Check if this error is recoverable (can be retried).
    pub fn is_recoverable(&self) -> bool {
        self.retry_strategy().should_retry()
    }
}

// ============================================================================
// Backpressure Rejections
// ============================================================================

/// Reason a request was refused by the admission layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RejectionReason {
    /// Token bucket exhausted.
    RateLimit,
    /// Downstream circuit open.
    CircuitBreaker,
    /// System overloaded and throttle level too high to admit.
    ResourcePressure,
    /// Bounded queue at capacity.
    QueueFull,
    /// Request waited in queue past its timeout.
    QueueTimeout,
    /// System is in the deepest degradation level.
    MaintenanceMode,
    /// The wrapped handler failed.
    ProcessingError,
}

impl RejectionReason {
    /// All reasons, in admission-pipeline order.
    pub const ALL: [RejectionReason; 7] = [
        Self::RateLimit,
        Self::CircuitBreaker,
        Self::ResourcePressure,
        Self::QueueFull,
        Self::QueueTimeout,
        Self::MaintenanceMode,
        Self::ProcessingError,
    ];

    /// Stable reason code.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::RateLimit => "rate_limit",
            Self::CircuitBreaker => "circuit_breaker",
            Self::ResourcePressure => "resource_pressure",
            Self::QueueFull => "queue_full",
            Self::QueueTimeout => "queue_timeout",
            Self::MaintenanceMode => "maintenance_mode",
            Self::ProcessingError => "processing_error",
        }
    }

    /// Default retry hint when the rejecting stage has no better estimate.
    pub fn default_retry_after(self) -> Option<Duration> {
        match self {
            Self::RateLimit => Some(Duration::from_secs(1)),
            Self::CircuitBreaker => Some(Duration::from_secs(30)),
            Self::ResourcePressure => Some(Duration::from_secs(5)),
            Self::QueueFull => Some(Duration::from_secs(1)),
            Self::QueueTimeout => Some(Duration::from_secs(2)),
            Self::MaintenanceMode => Some(Duration::from_secs(60)),
            Self::ProcessingError => None,
        }
    }

    /// Whether a retry can reasonably succeed without operator action.
    pub fn is_transient(self) -> bool {
        !matches!(self, Self::MaintenanceMode | Self::ProcessingError)
    }
}

impl fmt::Display for RejectionReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Uniform rejection returned by `BackpressureManager::process_request`.
#[derive(Debug, Clone, Error, Serialize)]
#[error("request rejected ({reason}): {message}")]
pub struct BackpressureError {
    /// Machine-readable reason code.
    pub reason: RejectionReason,
    /// Human-readable detail. For `processing_error` this is the handler's
    /// original error message.
    pub message: String,
    /// Suggested wait before retrying, if a retry makes sense.
    pub retry_after: Option<Duration>,
}

impl BackpressureError {
    /// Create a rejection with the reason's default retry hint.
    pub fn new(reason: RejectionReason, message: impl Into<String>) -> Self {
        Self {
            reason,
            message: message.into(),
            retry_after: reason.default_retry_after(),
        }
    }

    /// Override the retry hint.
    pub fn with_retry_after(mut self, retry_after: Duration) -> Self {
        self.retry_after = Some(retry_after);
        self
    }

    /// Retry hint in seconds (for JSON-facing callers).
    pub fn retry_after_seconds(&self) -> Option<f64> {
        self.retry_after.map(|d| d.as_secs_f64())
    }

    /// Check if the rejection is worth retrying.
    pub fn is_retryable(&self) -> bool {
        self.reason.is_transient()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retrieval_error_display() {
        let error = RetrievalError::backend("dense", "connection refused");
        assert_eq!(error.to_string(), "dense backend error: connection refused");

        let error = RetrievalError::InvalidQuery("empty query".to_string());
        assert_eq!(error.to_string(), "Invalid query: empty query");

        assert_eq!(RetrievalError::Timeout.to_string(), "Retrieval timed out");
    }

    #[test]
    fn test_backend_error_retry_strategy() {
        let error = RetrievalError::backend("lexical", "503");
        match error.retry_strategy() {
            RetryStrategy::ExponentialBackoff { max_attempts, .. } => {
                assert_eq!(max_attempts, 5);
            }
            other => panic!("Expected ExponentialBackoff, got {:?}", other),
        }
        assert!(error.is_recoverable());
    }

    #[test]
    fn test_backend_rate_limited_waits() {
        let error = RetrievalError::BackendRateLimited {
            backend: "dense".to_string(),
            message: "quota".to_string(),
        };
        assert_eq!(
            error.retry_strategy(),
            RetryStrategy::WaitAndRetry {
                wait: Duration::from_secs(5)
            }
        );
    }

    #[test]
    fn test_invalid_query_not_recoverable() {
        let error = RetrievalError::InvalidQuery("top_k must be positive".to_string());
        assert!(matches!(error.retry_strategy(), RetryStrategy::NoRetry));
        assert!(!error.is_recoverable());
        assert!(error.user_description().contains("top_k"));
    }

    #[test]
    fn test_rerank_error_server_backoff() {
        let error = RetrievalError::Rerank("model crashed".to_string());
        assert_eq!(error.retry_strategy(), RetryStrategy::server_backoff());
    }

    #[test]
    fn test_serialization_error_from_serde() {
        let json_err = serde_json::from_str::<serde_json::Value>("nope").unwrap_err();
        let error: RetrievalError = json_err.into();
        assert!(matches!(error, RetrievalError::Serialization(_)));
        assert!(error.user_description().contains("decode"));
    }

    #[test]
    fn test_rejection_reason_codes() {
        let codes: Vec<&str> = RejectionReason::ALL.iter().map(|r| r.as_str()).collect();
        assert_eq!(
            codes,
            vec![
                "rate_limit",
                "circuit_breaker",
                "resource_pressure",
                "queue_full",
                "queue_timeout",
                "maintenance_mode",
                "processing_error",
            ]
        );
    }

    #[test]
    fn test_rejection_reason_serializes_as_code() {
        let json = serde_json::to_string(&RejectionReason::QueueTimeout).unwrap();
        assert_eq!(json, "\"queue_timeout\"");
    }

    #[test]
    fn test_backpressure_error_retry_hints() {
        let error = BackpressureError::new(RejectionReason::MaintenanceMode, "down");
        assert_eq!(error.retry_after, Some(Duration::from_secs(60)));
        assert!(!error.is_retryable());

        let error = BackpressureError::new(RejectionReason::ProcessingError, "boom");
        assert!(error.retry_after.is_none());
        assert!(error.retry_after_seconds().is_none());

        let error = BackpressureError::new(RejectionReason::RateLimit, "slow down")
            .with_retry_after(Duration::from_millis(250));
        assert_eq!(error.retry_after_seconds(), Some(0.25));
        assert!(error.is_retryable());
    }

    #[test]
    fn test_backpressure_error_display() {
        let error = BackpressureError::new(RejectionReason::QueueFull, "queue at capacity (10)");
        assert_eq!(
            error.to_string(),
            "request rejected (queue_full): queue at capacity (10)"
        );
    }
}
