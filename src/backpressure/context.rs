//! Per-request envelope carried through admission control.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use uuid::Uuid;

/// Metadata key set when a request is served under degradation.
pub const DEGRADATION_LEVEL_KEY: &str = "degradation_level";

/// How a processed request ended.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum RequestOutcome {
    /// Handler returned successfully.
    Completed,
    /// Handler failed; message preserved.
    Failed { error: String },
}

/// Request envelope owned by the in-flight request.
///
/// # Example
///
/// ```
/// use edgequake_retrieval::RequestContext;
///
/// let ctx = RequestContext::new()
///     .with_priority(0)
///     .with_timeout_seconds(5.0)
///     .with_metadata("tenant", serde_json::json!("acme"));
/// assert_eq!(ctx.priority, 0);
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequestContext {
    pub request_id: String,
    /// Arrival time, ms since epoch.
    pub timestamp_ms: u64,
    /// 0 is the highest priority.
    pub priority: usize,
    /// Upper bound on time spent waiting in the queue.
    pub timeout_seconds: f64,
    #[serde(default)]
    pub metadata: HashMap<String, serde_json::Value>,
    #[serde(default)]
    pub queue_time_ms: Option<f64>,
    #[serde(default)]
    pub processing_time_ms: Option<f64>,
    #[serde(default)]
    pub outcome: Option<RequestOutcome>,
}

impl Default for RequestContext {
    fn default() -> Self {
        Self::new()
    }
}

impl RequestContext {
    /// New context with a random id, priority 1 and a 30s timeout.
    pub fn new() -> Self {
        let timestamp_ms = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0);
        Self {
            request_id: Uuid::new_v4().to_string(),
            timestamp_ms,
            priority: 1,
            timeout_seconds: 30.0,
            metadata: HashMap::new(),
            queue_time_ms: None,
            processing_time_ms: None,
            outcome: None,
        }
    }

    pub fn with_request_id(mut self, id: impl Into<String>) -> Self {
        self.request_id = id.into();
        self
    }

    pub fn with_priority(mut self, priority: usize) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_timeout_seconds(mut self, timeout_seconds: f64) -> Self {
        self.timeout_seconds = timeout_seconds;
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }

    /// `timeout_seconds` as a duration. Infinite or oversized values saturate.
    pub fn timeout(&self) -> Duration {
        Duration::try_from_secs_f64(self.timeout_seconds.max(0.0)).unwrap_or(Duration::MAX)
    }

    /// Degradation level recorded on the context, if any.
    pub fn degradation_level(&self) -> Option<&str> {
        self.metadata
            .get(DEGRADATION_LEVEL_KEY)
            .and_then(|v| v.as_str())
    }

    pub fn is_completed(&self) -> bool {
        matches!(self.outcome, Some(RequestOutcome::Completed))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_context_has_unique_ids() {
        let a = RequestContext::new();
        let b = RequestContext::new();
        assert_ne!(a.request_id, b.request_id);
        assert!(a.timestamp_ms > 0);
        assert!(a.outcome.is_none());
    }

    #[test]
    fn test_outcome_serialization() {
        let ctx = RequestContext::new().with_request_id("r1");
        let mut ctx = ctx;
        ctx.outcome = Some(RequestOutcome::Failed {
            error: "index offline".to_string(),
        });
        let json = serde_json::to_value(&ctx).unwrap();
        assert_eq!(json["outcome"]["status"], "failed");
        assert_eq!(json["outcome"]["error"], "index offline");
    }

    #[test]
    fn test_timeout_saturates() {
        let ctx = RequestContext::new().with_timeout_seconds(f64::INFINITY);
        assert_eq!(ctx.timeout(), Duration::MAX);
        let ctx = RequestContext::new().with_timeout_seconds(1e300);
        assert_eq!(ctx.timeout(), Duration::MAX);
        let ctx = RequestContext::new().with_timeout_seconds(-3.0);
        assert_eq!(ctx.timeout(), Duration::ZERO);
        let ctx = RequestContext::new().with_timeout_seconds(f64::NAN);
        assert_eq!(ctx.timeout(), Duration::ZERO);
    }

    #[test]
    fn test_degradation_level_lookup() {
        let ctx = RequestContext::new()
            .with_metadata(DEGRADATION_LEVEL_KEY, serde_json::json!("essential_only"));
        assert_eq!(ctx.degradation_level(), Some("essential_only"));
    }
}
