//! Backpressure configuration and the degradation ladder.
//!
//! # Degradation Ladder
//!
//! ```ascii
//! max_pressure = max(cpu/max_cpu, memory/max_memory, disk_io/max_disk_io)
//!
//!   < 0.8  ─► normal
//!   ≥ 0.8  ─► reduced_features
//!   ≥ 1.0  ─► essential_only
//!   ≥ 1.2  ─► maintenance_mode
//! ```

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

use crate::config::ConfigError;

/// Graceful-degradation level, ordered by severity.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum DegradationLevel {
    #[default]
    Normal,
    ReducedFeatures,
    EssentialOnly,
    MaintenanceMode,
}

impl DegradationLevel {
    /// Every level, least to most severe.
    pub const ALL: [DegradationLevel; 4] = [
        Self::Normal,
        Self::ReducedFeatures,
        Self::EssentialOnly,
        Self::MaintenanceMode,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Normal => "normal",
            Self::ReducedFeatures => "reduced_features",
            Self::EssentialOnly => "essential_only",
            Self::MaintenanceMode => "maintenance_mode",
        }
    }

    /// Level for a resource pressure ratio (1.0 = at ceiling).
    pub fn from_pressure(max_pressure: f64) -> Self {
        if max_pressure >= 1.2 {
            Self::MaintenanceMode
        } else if max_pressure >= 1.0 {
            Self::EssentialOnly
        } else if max_pressure >= 0.8 {
            Self::ReducedFeatures
        } else {
            Self::Normal
        }
    }
}

impl fmt::Display for DegradationLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Admission-control configuration.
///
/// # Example
///
/// ```
/// use edgequake_retrieval::BackpressureConfig;
///
/// let config = BackpressureConfig::default()
///     .with_rate_limit(50.0, 100)
///     .with_queue(500, 10.0);
/// assert!(config.validate().is_ok());
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct BackpressureConfig {
    // Rate limiting
    pub max_requests_per_second: f64,
    pub burst_capacity: u32,
    /// Window of the request-rate counter reported in metrics.
    pub sliding_window_seconds: f64,

    // Queueing
    pub max_queue_size: usize,
    /// Longest a request waits in the queue, further capped by its own
    /// `timeout_seconds`.
    pub queue_timeout_seconds: f64,
    /// Number of priority lanes; priorities beyond the last lane share it.
    pub priority_levels: usize,
    /// Handlers allowed to run at once. Scaled down while throttling; a
    /// request finding no free slot waits in the queue.
    pub max_concurrent_requests: usize,

    // Circuit breaker
    pub failure_threshold: u32,
    pub recovery_timeout_seconds: f64,
    pub half_open_max_calls: u32,

    // Resource ceilings (percent)
    pub max_cpu_percent: f64,
    pub max_memory_percent: f64,
    pub max_disk_io_percent: f64,
    /// Disk throughput treated as 100% disk I/O.
    pub disk_io_ceiling_bytes_per_sec: u64,

    // Adaptive throttling
    pub enable_adaptive_throttling: bool,
    pub throttle_step_percent: f64,
    pub recovery_step_percent: f64,
    pub monitoring_interval_seconds: f64,
    pub metrics_history_size: usize,

    /// Levels the manager may enter, least to most severe.
    pub degradation_levels: Vec<DegradationLevel>,
}

impl Default for BackpressureConfig {
    fn default() -> Self {
        Self {
            max_requests_per_second: 100.0,
            burst_capacity: 200,
            sliding_window_seconds: 60.0,
            max_queue_size: 1000,
            queue_timeout_seconds: 30.0,
            priority_levels: 3,
            max_concurrent_requests: 64,
            failure_threshold: 5,
            recovery_timeout_seconds: 60.0,
            half_open_max_calls: 3,
            max_cpu_percent: 80.0,
            max_memory_percent: 85.0,
            max_disk_io_percent: 90.0,
            disk_io_ceiling_bytes_per_sec: 200 * 1024 * 1024,
            enable_adaptive_throttling: true,
            throttle_step_percent: 10.0,
            recovery_step_percent: 5.0,
            monitoring_interval_seconds: 5.0,
            metrics_history_size: 1000,
            degradation_levels: DegradationLevel::ALL.to_vec(),
        }
    }
}

impl BackpressureConfig {
    pub fn with_rate_limit(mut self, max_requests_per_second: f64, burst_capacity: u32) -> Self {
        self.max_requests_per_second = max_requests_per_second;
        self.burst_capacity = burst_capacity;
        self
    }

    pub fn with_queue(mut self, max_queue_size: usize, queue_timeout_seconds: f64) -> Self {
        self.max_queue_size = max_queue_size;
        self.queue_timeout_seconds = queue_timeout_seconds;
        self
    }

    pub fn with_concurrency_limit(mut self, max_concurrent_requests: usize) -> Self {
        self.max_concurrent_requests = max_concurrent_requests;
        self
    }

    pub fn with_circuit_breaker(
        mut self,
        failure_threshold: u32,
        recovery_timeout_seconds: f64,
        half_open_max_calls: u32,
    ) -> Self {
        self.failure_threshold = failure_threshold;
        self.recovery_timeout_seconds = recovery_timeout_seconds;
        self.half_open_max_calls = half_open_max_calls;
        self
    }

    pub fn with_resource_limits(mut self, cpu: f64, memory: f64, disk_io: f64) -> Self {
        self.max_cpu_percent = cpu;
        self.max_memory_percent = memory;
        self.max_disk_io_percent = disk_io;
        self
    }

    pub fn with_adaptive_throttling(mut self, enabled: bool) -> Self {
        self.enable_adaptive_throttling = enabled;
        self
    }

    pub fn queue_timeout(&self) -> Duration {
        Duration::try_from_secs_f64(self.queue_timeout_seconds.max(0.0)).unwrap_or(Duration::MAX)
    }

    pub fn recovery_timeout(&self) -> Duration {
        Duration::from_secs_f64(self.recovery_timeout_seconds.max(0.0))
    }

    pub fn monitoring_interval(&self) -> Duration {
        Duration::from_secs_f64(self.monitoring_interval_seconds.max(0.001))
    }

    /// Throttle increment as a fraction (10% -> 0.1).
    pub fn throttle_step(&self) -> f64 {
        self.throttle_step_percent / 100.0
    }

    /// Throttle decrement as a fraction.
    pub fn recovery_step(&self) -> f64 {
        self.recovery_step_percent / 100.0
    }

    /// Most severe configured level not above `level`.
    pub fn cap_level(&self, level: DegradationLevel) -> DegradationLevel {
        self.degradation_levels
            .iter()
            .copied()
            .filter(|l| *l <= level)
            .max()
            .unwrap_or(DegradationLevel::Normal)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let positive = [
            ("max_requests_per_second", self.max_requests_per_second),
            ("sliding_window_seconds", self.sliding_window_seconds),
            ("queue_timeout_seconds", self.queue_timeout_seconds),
            ("max_cpu_percent", self.max_cpu_percent),
            ("max_memory_percent", self.max_memory_percent),
            ("max_disk_io_percent", self.max_disk_io_percent),
            ("monitoring_interval_seconds", self.monitoring_interval_seconds),
        ];
        for (name, value) in positive {
            if !(value > 0.0 && value.is_finite()) {
                return Err(ConfigError::Validation(format!(
                    "{} must be positive, got {}",
                    name, value
                )));
            }
        }

        let non_negative = [
            ("recovery_timeout_seconds", self.recovery_timeout_seconds),
            ("throttle_step_percent", self.throttle_step_percent),
            ("recovery_step_percent", self.recovery_step_percent),
        ];
        for (name, value) in non_negative {
            if !(value >= 0.0 && value.is_finite()) {
                return Err(ConfigError::Validation(format!(
                    "{} must be non-negative, got {}",
                    name, value
                )));
            }
        }

        let counts = [
            ("burst_capacity", self.burst_capacity as usize),
            ("max_queue_size", self.max_queue_size),
            ("priority_levels", self.priority_levels),
            ("max_concurrent_requests", self.max_concurrent_requests),
            ("failure_threshold", self.failure_threshold as usize),
            ("half_open_max_calls", self.half_open_max_calls as usize),
            ("metrics_history_size", self.metrics_history_size),
            (
                "disk_io_ceiling_bytes_per_sec",
                self.disk_io_ceiling_bytes_per_sec as usize,
            ),
        ];
        for (name, value) in counts {
            if value == 0 {
                return Err(ConfigError::Validation(format!("{} must be at least 1", name)));
            }
        }

        if self.degradation_levels.is_empty() {
            return Err(ConfigError::Validation(
                "degradation_levels must not be empty".to_string(),
            ));
        }
        if self.degradation_levels.windows(2).any(|w| w[0] >= w[1]) {
            return Err(ConfigError::Validation(
                "degradation_levels must be strictly ordered from normal upward".to_string(),
            ));
        }

        Ok(())
    }
}
