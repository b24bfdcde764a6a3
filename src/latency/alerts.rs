//! Latency alerts and their subscribers.
//!
//! Alerts are dispatched synchronously to every registered callback. A
//! callback that returns an error or panics is logged and skipped; delivery
//! to the remaining callbacks continues.

use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use tracing::{error, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertKind {
    /// A single measurement exceeded the SLA threshold.
    ThresholdExceeded,
    /// A measurement far above the current p95.
    SpikeDetected,
    /// p95 has been climbing across recent snapshots.
    DegradationTrend,
}

impl AlertKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::ThresholdExceeded => "threshold_exceeded",
            Self::SpikeDetected => "spike_detected",
            Self::DegradationTrend => "degradation_trend",
        }
    }
}

impl fmt::Display for AlertKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Warning,
    Critical,
}

/// A fired alert.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LatencyAlert {
    pub kind: AlertKind,
    pub severity: Severity,
    pub operation: String,
    pub message: String,
    /// Observed value that triggered the alert.
    pub value_ms: f64,
    /// Threshold it was compared against.
    pub threshold_ms: f64,
    pub timestamp_ms: u64,
    #[serde(default)]
    pub trace_id: Option<String>,
}

/// Alert subscriber.
pub type AlertCallback = Arc<dyn Fn(&LatencyAlert) -> anyhow::Result<()> + Send + Sync>;

/// Fan-out of alerts to subscribers plus a bounded log of recent alerts.
pub struct AlertDispatcher {
    callbacks: RwLock<Vec<AlertCallback>>,
    recent: Mutex<VecDeque<LatencyAlert>>,
    history_size: usize,
}

impl AlertDispatcher {
    pub fn new(history_size: usize) -> Self {
        Self {
            callbacks: RwLock::new(Vec::new()),
            recent: Mutex::new(VecDeque::new()),
            history_size: history_size.max(1),
        }
    }

    pub fn subscribe(&self, callback: AlertCallback) {
        self.callbacks.write().push(callback);
    }

    pub fn subscriber_count(&self) -> usize {
        self.callbacks.read().len()
    }

    pub fn dispatch(&self, alert: LatencyAlert) {
        warn!(
            kind = %alert.kind,
            severity = ?alert.severity,
            operation = %alert.operation,
            value_ms = alert.value_ms,
            threshold_ms = alert.threshold_ms,
            "{}",
            alert.message
        );

        // Snapshot so callbacks may subscribe without deadlocking.
        let callbacks: Vec<AlertCallback> = self.callbacks.read().clone();
        for callback in callbacks {
            match catch_unwind(AssertUnwindSafe(|| callback(&alert))) {
                Ok(Ok(())) => {}
                Ok(Err(err)) => {
                    error!(kind = %alert.kind, error = %err, "Latency alert callback failed");
                }
                Err(_) => {
                    error!(kind = %alert.kind, "Latency alert callback panicked");
                }
            }
        }

        let mut recent = self.recent.lock();
        recent.push_back(alert);
        while recent.len() > self.history_size {
            recent.pop_front();
        }
    }

    /// Most recent alerts, oldest first.
    pub fn recent(&self, n: usize) -> Vec<LatencyAlert> {
        let recent = self.recent.lock();
        let skip = recent.len().saturating_sub(n);
        recent.iter().skip(skip).cloned().collect()
    }

    pub fn total_recent(&self) -> usize {
        self.recent.lock().len()
    }
}
