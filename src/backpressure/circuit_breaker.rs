//! Three-state circuit breaker guarding the wrapped handler.
//!
//! ```ascii
//!            failure_count ≥ threshold
//!  ┌────────┐ ───────────────────────► ┌──────┐
//!  │ closed │                          │ open │
//!  └────────┘ ◄──────┐                 └──────┘
//!       ▲            │ success            │ recovery_timeout elapsed
//!       │            │                    ▼ (next call_allowed)
//!       │      ┌───────────┐  failure  ┌───────────┐
//!       └──────│ half_open │ ────────► │   open    │
//!              └───────────┘           └───────────┘
//!         at most half_open_max_calls trial calls
//! ```

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::{Duration, Instant};
use tracing::{info, warn};

use crate::clock::SharedClock;

#[derive(Debug, Clone, Copy)]
enum CircuitState {
    Closed,
    Open { opened_at: Instant },
    HalfOpen { calls: u32 },
}

/// Public-facing circuit state for status reporting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitStateKind {
    Closed,
    Open,
    HalfOpen,
}

impl CircuitStateKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Closed => "closed",
            Self::Open => "open",
            Self::HalfOpen => "half_open",
        }
    }
}

impl fmt::Display for CircuitStateKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of [`CircuitBreaker::call_allowed`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitDecision {
    /// Normal operation.
    CircuitClosed,
    /// Trial call admitted while probing recovery.
    CircuitHalfOpen,
    /// Blocked; cooling down.
    CircuitOpen,
    /// Blocked; trial calls for this half-open period are used up.
    HalfOpenLimitReached,
}

impl CircuitDecision {
    pub fn is_allowed(self) -> bool {
        matches!(self, Self::CircuitClosed | Self::CircuitHalfOpen)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::CircuitClosed => "circuit_closed",
            Self::CircuitHalfOpen => "circuit_half_open",
            Self::CircuitOpen => "circuit_open",
            Self::HalfOpenLimitReached => "half_open_limit_reached",
        }
    }
}

impl fmt::Display for CircuitDecision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Snapshot of circuit breaker status for reporting.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CircuitBreakerStatus {
    pub state: CircuitStateKind,
    pub failure_count: u32,
    pub failure_threshold: u32,
    pub half_open_calls: u32,
    pub half_open_max_calls: u32,
    /// Remaining cooldown while open.
    pub cooldown_remaining_ms: Option<u64>,
    pub times_opened: u64,
    pub total_successes: u64,
    pub total_failures: u64,
}

struct Inner {
    state: CircuitState,
    failure_count: u32,
    times_opened: u64,
    total_successes: u64,
    total_failures: u64,
}

/// Circuit breaker with consecutive-failure semantics.
pub struct CircuitBreaker {
    name: String,
    failure_threshold: u32,
    recovery_timeout: Duration,
    half_open_max_calls: u32,
    clock: SharedClock,
    inner: Mutex<Inner>,
}

impl CircuitBreaker {
    pub fn new(
        name: impl Into<String>,
        failure_threshold: u32,
        recovery_timeout: Duration,
        half_open_max_calls: u32,
        clock: SharedClock,
    ) -> Self {
        Self {
            name: name.into(),
            failure_threshold: failure_threshold.max(1),
            recovery_timeout,
            half_open_max_calls: half_open_max_calls.max(1),
            clock,
            inner: Mutex::new(Inner {
                state: CircuitState::Closed,
                failure_count: 0,
                times_opened: 0,
                total_successes: 0,
                total_failures: 0,
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Decide whether a call may proceed.
    ///
    /// An open circuit whose cooldown has elapsed moves to half-open here and
    /// the call counts as the first trial.
    pub fn call_allowed(&self) -> CircuitDecision {
        let now = self.clock.now();
        let mut inner = self.inner.lock();
        match inner.state {
            CircuitState::Closed => CircuitDecision::CircuitClosed,
            CircuitState::Open { opened_at } => {
                if now.saturating_duration_since(opened_at) >= self.recovery_timeout {
                    inner.state = CircuitState::HalfOpen { calls: 1 };
                    info!(circuit = %self.name, "Circuit breaker half-open");
                    CircuitDecision::CircuitHalfOpen
                } else {
                    CircuitDecision::CircuitOpen
                }
            }
            CircuitState::HalfOpen { calls } => {
                if calls < self.half_open_max_calls {
                    inner.state = CircuitState::HalfOpen { calls: calls + 1 };
                    CircuitDecision::CircuitHalfOpen
                } else {
                    CircuitDecision::HalfOpenLimitReached
                }
            }
        }
    }

    /// Hand back a half-open trial slot for a call that never ran.
    pub fn release_trial(&self) {
        let mut inner = self.inner.lock();
        if let CircuitState::HalfOpen { calls } = inner.state {
            inner.state = CircuitState::HalfOpen {
                calls: calls.saturating_sub(1),
            };
        }
    }

    pub fn record_success(&self) {
        let mut inner = self.inner.lock();
        inner.total_successes += 1;
        match inner.state {
            CircuitState::Closed => {
                inner.failure_count = 0;
            }
            CircuitState::HalfOpen { .. } => {
                inner.state = CircuitState::Closed;
                inner.failure_count = 0;
                info!(circuit = %self.name, "Circuit breaker closed");
            }
            // Late completion of a call admitted before the circuit opened.
            CircuitState::Open { .. } => {}
        }
    }

    pub fn record_failure(&self) {
        let now = self.clock.now();
        let mut inner = self.inner.lock();
        inner.total_failures += 1;
        match inner.state {
            CircuitState::Closed => {
                inner.failure_count += 1;
                if inner.failure_count >= self.failure_threshold {
                    inner.state = CircuitState::Open { opened_at: now };
                    inner.times_opened += 1;
                    warn!(
                        circuit = %self.name,
                        failures = inner.failure_count,
                        threshold = self.failure_threshold,
                        cooldown_ms = self.recovery_timeout.as_millis() as u64,
                        "Circuit breaker opened"
                    );
                }
            }
            CircuitState::HalfOpen { .. } => {
                inner.failure_count += 1;
                inner.state = CircuitState::Open { opened_at: now };
                inner.times_opened += 1;
                warn!(circuit = %self.name, "Circuit breaker re-opened from half-open");
            }
            CircuitState::Open { .. } => {
                inner.failure_count += 1;
            }
        }
    }

    pub fn state(&self) -> CircuitStateKind {
        match self.inner.lock().state {
            CircuitState::Closed => CircuitStateKind::Closed,
            CircuitState::Open { .. } => CircuitStateKind::Open,
            CircuitState::HalfOpen { .. } => CircuitStateKind::HalfOpen,
        }
    }

    pub fn failure_count(&self) -> u32 {
        self.inner.lock().failure_count
    }

    pub fn recovery_timeout(&self) -> Duration {
        self.recovery_timeout
    }

    /// Time left before an open circuit starts probing.
    pub fn cooldown_remaining(&self) -> Option<Duration> {
        let now = self.clock.now();
        match self.inner.lock().state {
            CircuitState::Open { opened_at } => Some(
                self.recovery_timeout
                    .saturating_sub(now.saturating_duration_since(opened_at)),
            ),
            _ => None,
        }
    }

    pub fn status(&self) -> CircuitBreakerStatus {
        let cooldown_remaining_ms = self.cooldown_remaining().map(|d| d.as_millis() as u64);
        let inner = self.inner.lock();
        let (state, half_open_calls) = match inner.state {
            CircuitState::Closed => (CircuitStateKind::Closed, 0),
            CircuitState::Open { .. } => (CircuitStateKind::Open, 0),
            CircuitState::HalfOpen { calls } => (CircuitStateKind::HalfOpen, calls),
        };
        CircuitBreakerStatus {
            state,
            failure_count: inner.failure_count,
            failure_threshold: self.failure_threshold,
            half_open_calls,
            half_open_max_calls: self.half_open_max_calls,
            cooldown_remaining_ms,
            times_opened: inner.times_opened,
            total_successes: inner.total_successes,
            total_failures: inner.total_failures,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use std::sync::Arc;

    fn breaker(clock: Arc<ManualClock>) -> CircuitBreaker {
        CircuitBreaker::new("handler", 3, Duration::from_secs(60), 2, clock)
    }

    #[test]
    fn test_opens_after_threshold() {
        let clock = ManualClock::shared();
        let cb = breaker(clock);
        for _ in 0..3 {
            assert_eq!(cb.call_allowed(), CircuitDecision::CircuitClosed);
            cb.record_failure();
        }
        assert_eq!(cb.state(), CircuitStateKind::Open);
        let decision = cb.call_allowed();
        assert!(!decision.is_allowed());
        assert_eq!(decision.as_str(), "circuit_open");
    }

    #[test]
    fn test_half_open_after_recovery_then_close() {
        let clock = ManualClock::shared();
        let cb = breaker(clock.clone());
        for _ in 0..3 {
            cb.record_failure();
        }

        clock.advance(Duration::from_secs(60));
        let decision = cb.call_allowed();
        assert!(decision.is_allowed());
        assert_eq!(decision.as_str(), "circuit_half_open");

        cb.record_success();
        assert_eq!(cb.state(), CircuitStateKind::Closed);
        assert_eq!(cb.failure_count(), 0);
    }

    #[test]
    fn test_half_open_failure_reopens() {
        let clock = ManualClock::shared();
        let cb = breaker(clock.clone());
        for _ in 0..3 {
            cb.record_failure();
        }
        clock.advance(Duration::from_secs(61));
        assert!(cb.call_allowed().is_allowed());

        cb.record_failure();
        assert_eq!(cb.state(), CircuitStateKind::Open);
        assert_eq!(cb.call_allowed(), CircuitDecision::CircuitOpen);
        assert_eq!(cb.status().times_opened, 2);
    }

    #[test]
    fn test_half_open_call_limit() {
        let clock = ManualClock::shared();
        let cb = breaker(clock.clone());
        for _ in 0..3 {
            cb.record_failure();
        }
        clock.advance(Duration::from_secs(60));

        assert_eq!(cb.call_allowed(), CircuitDecision::CircuitHalfOpen);
        assert_eq!(cb.call_allowed(), CircuitDecision::CircuitHalfOpen);
        assert_eq!(cb.call_allowed(), CircuitDecision::HalfOpenLimitReached);
    }

    #[test]
    fn test_released_trial_can_be_reused() {
        let clock = ManualClock::shared();
        let cb = breaker(clock.clone());
        for _ in 0..3 {
            cb.record_failure();
        }
        clock.advance(Duration::from_secs(60));

        assert!(cb.call_allowed().is_allowed());
        assert!(cb.call_allowed().is_allowed());
        cb.release_trial();
        assert_eq!(cb.call_allowed(), CircuitDecision::CircuitHalfOpen);
        assert_eq!(cb.call_allowed(), CircuitDecision::HalfOpenLimitReached);
    }

    #[test]
    fn test_success_resets_consecutive_failures() {
        let cb = breaker(ManualClock::shared());
        cb.record_failure();
        cb.record_failure();
        cb.record_success();
        cb.record_failure();
        assert_eq!(cb.state(), CircuitStateKind::Closed);
        assert_eq!(cb.failure_count(), 1);
    }

    #[test]
    fn test_status_reports_cooldown() {
        let clock = ManualClock::shared();
        let cb = breaker(clock.clone());
        for _ in 0..3 {
            cb.record_failure();
        }
        clock.advance(Duration::from_secs(20));
        let status = cb.status();
        assert_eq!(status.state, CircuitStateKind::Open);
        assert_eq!(status.cooldown_remaining_ms, Some(40_000));
        assert_eq!(status.total_failures, 3);
    }
}
