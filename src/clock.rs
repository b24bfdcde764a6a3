//! Injectable time source for every timed component.
//!
//! Rate limiting, circuit-breaker cooldowns, sliding-window eviction and the
//! simulated inference delay of the cross-encoder all read time through the
//! [`Clock`] trait instead of calling `Instant::now()` / `tokio::time::sleep`
//! directly.
//!
//! ```text
//! ┌──────────────────┐        ┌──────────────────────────────┐
//! │   SystemClock    │        │         ManualClock          │
//! │ Instant::now()   │        │ base + offset (virtual time) │
//! │ tokio sleep      │        │ sleep() advances offset      │
//! └──────────────────┘        └──────────────────────────────┘
//! ```
//!
//! Production code uses [`SystemClock`]; tests use [`ManualClock`] so that
//! cooldowns and windows can be crossed without real waiting.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

/// Source of monotonic time, wall-clock time and delays.
#[async_trait]
pub trait Clock: Send + Sync + std::fmt::Debug {
    /// Current monotonic instant.
    fn now(&self) -> Instant;

    /// Milliseconds since the Unix epoch (for serialized timestamps).
    fn unix_millis(&self) -> u64;

    /// Suspend the current task for `duration`.
    async fn sleep(&self, duration: Duration);
}

/// Shared clock handle.
pub type SharedClock = Arc<dyn Clock>;

/// Real time backed by `std::time` and `tokio::time::sleep`.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl SystemClock {
    /// Create a shared system clock.
    pub fn shared() -> SharedClock {
        Arc::new(SystemClock)
    }
}

#[async_trait]
impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }

    fn unix_millis(&self) -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0)
    }

    async fn sleep(&self, duration: Duration) {
        if !duration.is_zero() {
            tokio::time::sleep(duration).await;
        }
    }
}

/// Virtual clock for deterministic tests.
///
/// Time only moves when [`ManualClock::advance`] or [`Clock::sleep`] is called.
#[derive(Debug)]
pub struct ManualClock {
    base: Instant,
    base_unix_ms: u64,
    offset: Mutex<Duration>,
}

impl ManualClock {
    /// Create a manual clock anchored at the current instant.
    pub fn new() -> Self {
        Self {
            base: Instant::now(),
            base_unix_ms: 1_700_000_000_000,
            offset: Mutex::new(Duration::ZERO),
        }
    }

    /// Create a shared manual clock.
    pub fn shared() -> Arc<ManualClock> {
        Arc::new(Self::new())
    }

    /// Move virtual time forward.
    pub fn advance(&self, by: Duration) {
        *self.offset.lock() += by;
    }

    /// Total virtual time elapsed since creation.
    pub fn elapsed(&self) -> Duration {
        *self.offset.lock()
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Clock for ManualClock {
    fn now(&self) -> Instant {
        self.base + *self.offset.lock()
    }

    fn unix_millis(&self) -> u64 {
        self.base_unix_ms + self.offset.lock().as_millis() as u64
    }

    async fn sleep(&self, duration: Duration) {
        self.advance(duration);
        tokio::task::yield_now().await;
    }
}
