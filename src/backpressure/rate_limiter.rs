//! Token-bucket rate limiter with a sliding-window request counter.
//!
//! ```ascii
//! tokens = min(burst_capacity, tokens + elapsed × max_requests_per_second)
//!
//! admit:   tokens ≥ 1 ─► tokens -= 1, push now into window
//! reject:  retry_after = (1 - tokens) / max_requests_per_second
//!
//! window:  admitted timestamps younger than sliding_window_seconds
//! ```

use parking_lot::Mutex;
use std::collections::VecDeque;
use std::time::{Duration, Instant};

use crate::clock::SharedClock;

struct TokenBucket {
    tokens: f64,
    max_tokens: f64,
    refill_rate: f64, // tokens per second
    last_refill: Instant,
}

impl TokenBucket {
    fn new(max_tokens: f64, refill_rate: f64, now: Instant) -> Self {
        Self {
            tokens: max_tokens,
            max_tokens,
            refill_rate,
            last_refill: now,
        }
    }

    fn refill(&mut self, now: Instant) {
        let elapsed = now.saturating_duration_since(self.last_refill).as_secs_f64();
        self.tokens = (self.tokens + elapsed * self.refill_rate).min(self.max_tokens);
        self.last_refill = now;
    }

    fn try_acquire(&mut self, now: Instant) -> bool {
        self.refill(now);
        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            true
        } else {
            false
        }
    }

    fn time_to_acquire(&self) -> Duration {
        if self.tokens >= 1.0 || self.refill_rate <= 0.0 {
            Duration::ZERO
        } else {
            Duration::from_secs_f64((1.0 - self.tokens) / self.refill_rate)
        }
    }
}

struct State {
    bucket: TokenBucket,
    window: VecDeque<Instant>,
}

/// Admission decision from [`RateLimiter::is_allowed`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RateDecision {
    pub allowed: bool,
    /// Time until a token is available; zero when allowed.
    pub retry_after: Duration,
}

/// Request-rate limiter shared by all request tasks.
pub struct RateLimiter {
    clock: SharedClock,
    window_duration: Duration,
    state: Mutex<State>,
}

impl RateLimiter {
    pub fn new(
        max_requests_per_second: f64,
        burst_capacity: u32,
        sliding_window_seconds: f64,
        clock: SharedClock,
    ) -> Self {
        let now = clock.now();
        Self {
            window_duration: Duration::from_secs_f64(sliding_window_seconds.max(0.001)),
            state: Mutex::new(State {
                bucket: TokenBucket::new(burst_capacity as f64, max_requests_per_second, now),
                window: VecDeque::new(),
            }),
            clock,
        }
    }

    fn evict(&self, window: &mut VecDeque<Instant>, now: Instant) {
        while let Some(front) = window.front() {
            if now.saturating_duration_since(*front) > self.window_duration {
                window.pop_front();
            } else {
                break;
            }
        }
    }

    /// Try to take one token.
    pub fn is_allowed(&self) -> RateDecision {
        let now = self.clock.now();
        let mut state = self.state.lock();
        let allowed = state.bucket.try_acquire(now);
        self.evict(&mut state.window, now);
        if allowed {
            state.window.push_back(now);
            RateDecision {
                allowed: true,
                retry_after: Duration::ZERO,
            }
        } else {
            RateDecision {
                allowed: false,
                retry_after: state.bucket.time_to_acquire(),
            }
        }
    }

    /// Tokens currently in the bucket.
    pub fn available_tokens(&self) -> f64 {
        let now = self.clock.now();
        let mut state = self.state.lock();
        state.bucket.refill(now);
        state.bucket.tokens
    }

    /// Admitted requests inside the sliding window.
    pub fn window_count(&self) -> usize {
        let now = self.clock.now();
        let mut state = self.state.lock();
        self.evict(&mut state.window, now);
        state.window.len()
    }

    /// Admitted requests per second over the sliding window.
    pub fn current_rate(&self) -> f64 {
        self.window_count() as f64 / self.window_duration.as_secs_f64()
    }
}
