//! Latency tracker: global and per-operation windows, alerts, snapshots.

use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use super::alerts::{AlertCallback, AlertDispatcher, AlertKind, LatencyAlert, Severity};
use super::window::{LatencyMeasurement, SlidingWindowTracker};
use crate::clock::{SharedClock, SystemClock};
use crate::config::ConfigError;
use crate::worker::PeriodicTask;

/// Snapshots examined by trend detection.
const TREND_WINDOW: usize = 10;
/// Fraction of consecutive snapshot steps that must be non-decreasing.
const TREND_NON_DECREASING_FRACTION: f64 = 0.7;
/// Required growth of p95 over the oldest snapshot in the trend window.
const TREND_GROWTH_FACTOR: f64 = 1.5;
/// Prior samples an operation window needs before spikes are detected.
const SPIKE_MIN_SAMPLES: usize = 10;
/// Alerts included in [`LatencySummary::recent_alerts`].
const SUMMARY_ALERTS: usize = 10;

// ============================================================================
// Configuration
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LatencyConfig {
    pub window_seconds: f64,
    /// Samples kept per window regardless of age.
    pub max_samples: usize,
    /// p95 service-level objective; single samples above it raise an alert.
    pub sla_p95_ms: f64,
    /// A sample above `spike_multiplier × p95` is a spike.
    pub spike_multiplier: f64,
    /// A sample above `outlier_multiplier × mean` counts as an outlier.
    pub outlier_multiplier: f64,
    pub snapshot_interval_seconds: f64,
    pub snapshot_history_size: usize,
    pub alert_history_size: usize,
    pub enable_alerts: bool,
}

impl Default for LatencyConfig {
    fn default() -> Self {
        Self {
            window_seconds: 300.0,
            max_samples: 10_000,
            sla_p95_ms: 1000.0,
            spike_multiplier: 3.0,
            outlier_multiplier: 3.0,
            snapshot_interval_seconds: 60.0,
            snapshot_history_size: 1440,
            alert_history_size: 100,
            enable_alerts: true,
        }
    }
}

impl LatencyConfig {
    pub fn with_sla_p95_ms(mut self, sla_p95_ms: f64) -> Self {
        self.sla_p95_ms = sla_p95_ms;
        self
    }

    pub fn with_window(mut self, window_seconds: f64, max_samples: usize) -> Self {
        self.window_seconds = window_seconds;
        self.max_samples = max_samples;
        self
    }

    pub fn window(&self) -> Duration {
        Duration::from_secs_f64(self.window_seconds.max(0.0))
    }

    pub fn snapshot_interval(&self) -> Duration {
        Duration::from_secs_f64(self.snapshot_interval_seconds.max(0.001))
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let positive = [
            ("window_seconds", self.window_seconds),
            ("sla_p95_ms", self.sla_p95_ms),
            ("spike_multiplier", self.spike_multiplier),
            ("outlier_multiplier", self.outlier_multiplier),
            ("snapshot_interval_seconds", self.snapshot_interval_seconds),
        ];
        for (name, value) in positive {
            if !(value > 0.0 && value.is_finite()) {
                return Err(ConfigError::Validation(format!(
                    "{} must be positive, got {}",
                    name, value
                )));
            }
        }
        for (name, value) in [
            ("max_samples", self.max_samples),
            ("snapshot_history_size", self.snapshot_history_size),
            ("alert_history_size", self.alert_history_size),
        ] {
            if value == 0 {
                return Err(ConfigError::Validation(format!("{} must be at least 1", name)));
            }
        }
        Ok(())
    }
}

// ============================================================================
// Snapshots
// ============================================================================

/// Aggregate over one window at a point in time.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LatencySnapshot {
    pub timestamp_ms: u64,
    /// `None` for the global window.
    pub operation: Option<String>,
    pub count: usize,
    pub p50_ms: f64,
    pub p95_ms: f64,
    pub p99_ms: f64,
    pub p999_ms: f64,
    pub min_ms: f64,
    pub max_ms: f64,
    pub mean_ms: f64,
    pub stddev_ms: f64,
    pub outlier_count: usize,
    pub sla_violations: usize,
    pub window_seconds: f64,
}

impl LatencySnapshot {
    pub fn is_empty(&self) -> bool {
        self.count == 0
    }
}

/// Report returned by [`LatencyTracker::get_summary`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LatencySummary {
    pub total_recorded: u64,
    pub sla_p95_ms: f64,
    /// Global p95 within the SLA (vacuously true with no data).
    pub sla_compliant: bool,
    pub global: LatencySnapshot,
    pub operations: BTreeMap<String, LatencySnapshot>,
    pub recent_alerts: Vec<LatencyAlert>,
}

type Window = Arc<Mutex<SlidingWindowTracker>>;

/// Streaming latency tracker.
///
/// # Example
///
/// ```
/// use edgequake_retrieval::latency::{LatencyConfig, LatencyTracker};
///
/// let tracker = LatencyTracker::new(LatencyConfig::default());
/// for ms in [12.0, 15.0, 11.0, 40.0] {
///     tracker.record_latency(ms, "retrieve");
/// }
/// let snapshot = tracker.get_current_snapshot(Some("retrieve"));
/// assert_eq!(snapshot.count, 4);
/// assert!(snapshot.p50_ms <= snapshot.p95_ms);
/// ```
pub struct LatencyTracker {
    config: LatencyConfig,
    clock: SharedClock,
    global: Mutex<SlidingWindowTracker>,
    operations: RwLock<HashMap<String, Window>>,
    history: Mutex<HashMap<Option<String>, VecDeque<LatencySnapshot>>>,
    alerts: AlertDispatcher,
    total_recorded: AtomicU64,
}

impl LatencyTracker {
    pub fn new(config: LatencyConfig) -> Self {
        Self::with_clock(config, SystemClock::shared())
    }

    pub fn with_clock(config: LatencyConfig, clock: SharedClock) -> Self {
        let global = SlidingWindowTracker::new(config.window(), config.max_samples, clock.clone());
        Self {
            alerts: AlertDispatcher::new(config.alert_history_size),
            global: Mutex::new(global),
            operations: RwLock::new(HashMap::new()),
            history: Mutex::new(HashMap::new()),
            total_recorded: AtomicU64::new(0),
            config,
            clock,
        }
    }

    pub fn config(&self) -> &LatencyConfig {
        &self.config
    }

    pub fn subscribe(&self, callback: AlertCallback) {
        self.alerts.subscribe(callback);
    }

    fn window_for(&self, operation: &str) -> Window {
        if let Some(window) = self.operations.read().get(operation) {
            return window.clone();
        }
        self.operations
            .write()
            .entry(operation.to_string())
            .or_insert_with(|| {
                Arc::new(Mutex::new(SlidingWindowTracker::new(
                    self.config.window(),
                    self.config.max_samples,
                    self.clock.clone(),
                )))
            })
            .clone()
    }

    pub fn record_latency(&self, latency_ms: f64, operation: &str) {
        self.record_latency_traced(latency_ms, operation, None, HashMap::new());
    }

    /// Record a sample with a trace id and free-form context.
    pub fn record_latency_traced(
        &self,
        latency_ms: f64,
        operation: &str,
        trace_id: Option<String>,
        context: HashMap<String, serde_json::Value>,
    ) {
        if !latency_ms.is_finite() || latency_ms < 0.0 {
            debug!(operation, latency_ms, "Ignoring invalid latency sample");
            return;
        }

        let measurement = LatencyMeasurement {
            timestamp_ms: self.clock.unix_millis(),
            latency_ms,
            operation: operation.to_string(),
            trace_id,
            context,
        };

        let window = self.window_for(operation);
        let (prior_count, prior_p95) = {
            let mut window = window.lock();
            let prior_count = window.len();
            let prior_p95 = window.spike_baseline();
            window.add(measurement.clone());
            (prior_count, prior_p95)
        };
        self.global.lock().add(measurement.clone());
        self.total_recorded.fetch_add(1, Ordering::Relaxed);

        if self.config.enable_alerts {
            self.check_sample_alerts(&measurement, prior_count, prior_p95);
        }
    }

    fn check_sample_alerts(
        &self,
        measurement: &LatencyMeasurement,
        prior_count: usize,
        prior_p95: Option<f64>,
    ) {
        let latency = measurement.latency_ms;
        let sla = self.config.sla_p95_ms;

        if latency > sla {
            let severity = if latency > 2.0 * sla {
                Severity::Critical
            } else {
                Severity::Warning
            };
            self.alerts.dispatch(LatencyAlert {
                kind: AlertKind::ThresholdExceeded,
                severity,
                operation: measurement.operation.clone(),
                message: format!(
                    "{} latency {:.1}ms exceeds SLA {:.1}ms",
                    measurement.operation, latency, sla
                ),
                value_ms: latency,
                threshold_ms: sla,
                timestamp_ms: measurement.timestamp_ms,
                trace_id: measurement.trace_id.clone(),
            });
        }

        if let Some(p95) = prior_p95 {
            let limit = self.config.spike_multiplier * p95;
            if prior_count >= SPIKE_MIN_SAMPLES && p95 > 0.0 && latency > limit {
                self.alerts.dispatch(LatencyAlert {
                    kind: AlertKind::SpikeDetected,
                    severity: Severity::Warning,
                    operation: measurement.operation.clone(),
                    message: format!(
                        "{} latency spike {:.1}ms over {:.1}x p95 ({:.1}ms)",
                        measurement.operation, latency, self.config.spike_multiplier, p95
                    ),
                    value_ms: latency,
                    threshold_ms: limit,
                    timestamp_ms: measurement.timestamp_ms,
                    trace_id: measurement.trace_id.clone(),
                });
            }
        }
    }

    fn snapshot_of(&self, window: &mut SlidingWindowTracker, operation: Option<&str>) -> LatencySnapshot {
        let mut snapshot = LatencySnapshot {
            timestamp_ms: self.clock.unix_millis(),
            operation: operation.map(str::to_string),
            window_seconds: self.config.window_seconds,
            ..Default::default()
        };

        let sketch = window.sketch();
        if sketch.is_empty() {
            return snapshot;
        }

        snapshot.count = sketch.len();
        snapshot.p50_ms = sketch.quantile(0.5).unwrap_or(0.0);
        snapshot.p95_ms = sketch.quantile(0.95).unwrap_or(0.0);
        snapshot.p99_ms = sketch.quantile(0.99).unwrap_or(0.0);
        snapshot.p999_ms = sketch.quantile(0.999).unwrap_or(0.0);
        snapshot.min_ms = sketch.min().unwrap_or(0.0);
        snapshot.max_ms = sketch.max().unwrap_or(0.0);
        snapshot.mean_ms = sketch.mean().unwrap_or(0.0);
        snapshot.stddev_ms = sketch.stddev().unwrap_or(0.0);

        let outlier_limit = snapshot.mean_ms * self.config.outlier_multiplier;
        let sla = self.config.sla_p95_ms;
        for value in sketch.values() {
            if value > outlier_limit {
                snapshot.outlier_count += 1;
            }
            if value > sla {
                snapshot.sla_violations += 1;
            }
        }
        window.set_spike_baseline(snapshot.p95_ms);
        snapshot
    }

    /// Snapshot of one operation's window, or the global window for `None`.
    ///
    /// Unknown operations yield an empty snapshot.
    pub fn get_current_snapshot(&self, operation: Option<&str>) -> LatencySnapshot {
        match operation {
            None => self.snapshot_of(&mut self.global.lock(), None),
            Some(op) => {
                let window = self.operations.read().get(op).cloned();
                match window {
                    Some(window) => self.snapshot_of(&mut window.lock(), Some(op)),
                    None => LatencySnapshot {
                        timestamp_ms: self.clock.unix_millis(),
                        operation: Some(op.to_string()),
                        window_seconds: self.config.window_seconds,
                        ..Default::default()
                    },
                }
            }
        }
    }

    /// Arbitrary quantiles for one operation or the global window.
    pub fn get_percentiles(&self, operation: Option<&str>, quantiles: &[f64]) -> Vec<(f64, f64)> {
        match operation {
            None => self.global.lock().percentiles(quantiles),
            Some(op) => {
                let window = self.operations.read().get(op).cloned();
                window
                    .map(|w| w.lock().percentiles(quantiles))
                    .unwrap_or_default()
            }
        }
    }

    /// Known operation names, sorted.
    pub fn operations(&self) -> Vec<String> {
        let mut names: Vec<String> = self.operations.read().keys().cloned().collect();
        names.sort();
        names
    }

    pub fn total_recorded(&self) -> u64 {
        self.total_recorded.load(Ordering::Relaxed)
    }

    /// Bounded snapshot history for one operation or the global window.
    pub fn get_snapshot_history(&self, operation: Option<&str>) -> Vec<LatencySnapshot> {
        self.history
            .lock()
            .get(&operation.map(str::to_string))
            .map(|h| h.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn recent_alerts(&self, n: usize) -> Vec<LatencyAlert> {
        self.alerts.recent(n)
    }

    /// Snapshot every window into history and run trend detection.
    ///
    /// Empty windows are not recorded. Returns the snapshots taken.
    pub fn take_snapshots(&self) -> Vec<LatencySnapshot> {
        let mut taken = vec![self.get_current_snapshot(None)];
        for op in self.operations() {
            taken.push(self.get_current_snapshot(Some(&op)));
        }
        taken.retain(|s| !s.is_empty());

        let mut trends = Vec::new();
        {
            let mut history = self.history.lock();
            for snapshot in &taken {
                let ring = history.entry(snapshot.operation.clone()).or_default();
                ring.push_back(snapshot.clone());
                while ring.len() > self.config.snapshot_history_size {
                    ring.pop_front();
                }
                if let Some((oldest, current)) = detect_trend(ring) {
                    trends.push((snapshot.clone(), oldest, current));
                }
            }
        }

        if self.config.enable_alerts {
            for (snapshot, oldest, current) in trends {
                let operation = snapshot
                    .operation
                    .clone()
                    .unwrap_or_else(|| "global".to_string());
                self.alerts.dispatch(LatencyAlert {
                    kind: AlertKind::DegradationTrend,
                    severity: Severity::Warning,
                    message: format!(
                        "{} p95 rose from {:.1}ms to {:.1}ms over the last {} snapshots",
                        operation, oldest, current, TREND_WINDOW
                    ),
                    operation,
                    value_ms: current,
                    threshold_ms: oldest * TREND_GROWTH_FACTOR,
                    timestamp_ms: snapshot.timestamp_ms,
                    trace_id: None,
                });
            }
        }

        taken
    }

    pub fn get_summary(&self) -> LatencySummary {
        let global = self.get_current_snapshot(None);
        let operations = self
            .operations()
            .into_iter()
            .map(|op| {
                let snapshot = self.get_current_snapshot(Some(&op));
                (op, snapshot)
            })
            .collect();
        LatencySummary {
            total_recorded: self.total_recorded(),
            sla_p95_ms: self.config.sla_p95_ms,
            sla_compliant: global.is_empty() || global.p95_ms <= self.config.sla_p95_ms,
            global,
            operations,
            recent_alerts: self.alerts.recent(SUMMARY_ALERTS),
        }
    }

    /// Drop all samples and snapshot history. Subscribers are kept.
    pub fn clear(&self) {
        self.global.lock().clear();
        self.operations.write().clear();
        self.history.lock().clear();
    }

    /// Take snapshots every `snapshot_interval_seconds` on a background task.
    pub fn start_snapshotting(self: &Arc<Self>) -> PeriodicTask {
        let tracker = Arc::clone(self);
        PeriodicTask::spawn(
            "latency-snapshots",
            self.config.snapshot_interval(),
            move || {
                let tracker = Arc::clone(&tracker);
                async move {
                    tracker.take_snapshots();
                }
            },
        )
    }
}

/// `(oldest_p95, current_p95)` when the last [`TREND_WINDOW`] snapshots show a
/// sustained p95 climb.
fn detect_trend(history: &VecDeque<LatencySnapshot>) -> Option<(f64, f64)> {
    if history.len() < TREND_WINDOW {
        return None;
    }
    let recent: Vec<f64> = history
        .iter()
        .skip(history.len() - TREND_WINDOW)
        .map(|s| s.p95_ms)
        .collect();
    let steps = recent.len() - 1;
    let non_decreasing = recent.windows(2).filter(|w| w[1] >= w[0]).count();
    if (non_decreasing as f64) < TREND_NON_DECREASING_FRACTION * steps as f64 {
        return None;
    }
    let oldest = recent[0];
    let current = recent[recent.len() - 1];
    if oldest > 0.0 && current > TREND_GROWTH_FACTOR * oldest {
        Some((oldest, current))
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;

    fn tracker(config: LatencyConfig) -> (LatencyTracker, Arc<ManualClock>) {
        let clock = ManualClock::shared();
        (LatencyTracker::with_clock(config, clock.clone()), clock)
    }

    fn snapshot_with_p95(p95: f64) -> LatencySnapshot {
        LatencySnapshot {
            count: 1,
            p95_ms: p95,
            ..Default::default()
        }
    }

    #[test]
    fn test_snapshot_statistics() {
        let (tracker, _) = tracker(LatencyConfig::default());
        for v in 1..=100 {
            tracker.record_latency(v as f64, "search");
        }
        let snap = tracker.get_current_snapshot(Some("search"));
        assert_eq!(snap.count, 100);
        assert!((50.0..=51.0).contains(&snap.p50_ms));
        assert!((95.0..=96.0).contains(&snap.p95_ms));
        assert!(snap.p95_ms <= snap.p99_ms && snap.p99_ms <= snap.p999_ms);
        assert_eq!(snap.min_ms, 1.0);
        assert_eq!(snap.max_ms, 100.0);
        assert!((snap.mean_ms - 50.5).abs() < 1e-9);
        // Nothing exceeds 3 × 50.5.
        assert_eq!(snap.outlier_count, 0);
        assert_eq!(snap.sla_violations, 0);

        assert_eq!(tracker.get_current_snapshot(None).count, 100);
    }

    #[test]
    fn test_sla_violations_and_outliers() {
        let config = LatencyConfig::default().with_sla_p95_ms(100.0);
        let (tracker, _) = tracker(config);
        for _ in 0..9 {
            tracker.record_latency(10.0, "search");
        }
        tracker.record_latency(500.0, "search");

        let snap = tracker.get_current_snapshot(Some("search"));
        assert_eq!(snap.sla_violations, 1);
        // mean = 59, 500 > 177
        assert_eq!(snap.outlier_count, 1);
    }

    #[test]
    fn test_unknown_operation_is_empty() {
        let (tracker, _) = tracker(LatencyConfig::default());
        let snap = tracker.get_current_snapshot(Some("missing"));
        assert!(snap.is_empty());
        assert_eq!(snap.operation.as_deref(), Some("missing"));
        assert!(tracker.get_percentiles(Some("missing"), &[0.5]).is_empty());
    }

    #[test]
    fn test_window_eviction_in_percentiles() {
        let config = LatencyConfig::default().with_window(10.0, 100);
        let (tracker, clock) = tracker(config);
        tracker.record_latency(900.0, "search");
        clock.advance(Duration::from_secs(11));
        tracker.record_latency(5.0, "search");

        let p = tracker.get_percentiles(Some("search"), &[0.99]);
        assert_eq!(p, vec![(0.99, 5.0)]);
        let p = tracker.get_percentiles(None, &[0.99]);
        assert_eq!(p, vec![(0.99, 5.0)]);
    }

    #[test]
    fn test_threshold_alert_severity() {
        let config = LatencyConfig::default().with_sla_p95_ms(100.0);
        let (tracker, _) = tracker(config);

        tracker.record_latency(150.0, "search");
        tracker.record_latency(250.0, "search");

        let alerts = tracker.recent_alerts(10);
        assert_eq!(alerts.len(), 2);
        assert_eq!(alerts[0].kind, AlertKind::ThresholdExceeded);
        assert_eq!(alerts[0].severity, Severity::Warning);
        assert_eq!(alerts[1].severity, Severity::Critical);
    }

    #[test]
    fn test_spike_needs_history() {
        let (tracker, _) = tracker(LatencyConfig::default());
        for _ in 0..5 {
            tracker.record_latency(10.0, "warmup");
        }
        tracker.record_latency(100.0, "warmup");
        assert!(tracker.recent_alerts(10).is_empty());

        for _ in 0..10 {
            tracker.record_latency(10.0, "search");
        }
        tracker.record_latency(100.0, "search");
        let alerts = tracker.recent_alerts(10);
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].kind, AlertKind::SpikeDetected);
        assert!((alerts[0].threshold_ms - 30.0).abs() < 1e-9);
    }

    #[test]
    fn test_spike_detected_against_cached_baseline() {
        let config = LatencyConfig::default().with_sla_p95_ms(1000.0);
        let (tracker, _) = tracker(config);
        for _ in 0..400 {
            tracker.record_latency(20.0, "search");
        }
        tracker.record_latency(300.0, "search");

        let spikes: Vec<_> = tracker
            .recent_alerts(10)
            .into_iter()
            .filter(|a| a.kind == AlertKind::SpikeDetected)
            .collect();
        assert_eq!(spikes.len(), 1);
        assert!((spikes[0].threshold_ms - 60.0).abs() < 1e-9);
        assert_eq!(spikes[0].value_ms, 300.0);
    }

    #[test]
    fn test_alerts_disabled() {
        let config = LatencyConfig {
            enable_alerts: false,
            sla_p95_ms: 1.0,
            ..Default::default()
        };
        let (tracker, _) = tracker(config);
        tracker.record_latency(100.0, "search");
        assert!(tracker.recent_alerts(10).is_empty());
    }

    #[test]
    fn test_invalid_samples_ignored() {
        let (tracker, _) = tracker(LatencyConfig::default());
        tracker.record_latency(f64::NAN, "search");
        tracker.record_latency(-1.0, "search");
        assert_eq!(tracker.total_recorded(), 0);
    }

    #[test]
    fn test_detect_trend() {
        let rising: VecDeque<_> = [10.0, 11.0, 12.0, 12.0, 11.5, 13.0, 14.0, 15.0, 15.5, 16.0]
            .into_iter()
            .map(snapshot_with_p95)
            .collect();
        assert_eq!(detect_trend(&rising), Some((10.0, 16.0)));

        let flat: VecDeque<_> = [10.0; 10].into_iter().map(snapshot_with_p95).collect();
        assert_eq!(detect_trend(&flat), None);

        let short: VecDeque<_> = [1.0, 5.0, 9.0].into_iter().map(snapshot_with_p95).collect();
        assert_eq!(detect_trend(&short), None);

        let choppy: VecDeque<_> = [10.0, 20.0, 12.0, 22.0, 14.0, 24.0, 16.0, 26.0, 18.0, 28.0]
            .into_iter()
            .map(snapshot_with_p95)
            .collect();
        assert_eq!(detect_trend(&choppy), None);
    }

    #[test]
    fn test_take_snapshots_fires_trend_alert() {
        let config = LatencyConfig::default().with_window(1.0, 100);
        let (tracker, clock) = tracker(config);

        for step in 0..10 {
            tracker.record_latency(10.0 + 5.0 * step as f64, "search");
            tracker.take_snapshots();
            clock.advance(Duration::from_secs(2));
        }

        assert_eq!(tracker.get_snapshot_history(Some("search")).len(), 10);
        assert_eq!(tracker.get_snapshot_history(None).len(), 10);
        let trend: Vec<_> = tracker
            .recent_alerts(100)
            .into_iter()
            .filter(|a| a.kind == AlertKind::DegradationTrend)
            .collect();
        // One for the operation window, one for the global window.
        assert_eq!(trend.len(), 2);
        assert!((trend[0].value_ms - 55.0).abs() < 1e-9);
    }

    #[test]
    fn test_empty_windows_not_snapshotted() {
        let (tracker, _) = tracker(LatencyConfig::default());
        assert!(tracker.take_snapshots().is_empty());
        assert!(tracker.get_snapshot_history(None).is_empty());
    }

    #[test]
    fn test_summary() {
        let config = LatencyConfig::default().with_sla_p95_ms(50.0);
        let (tracker, _) = tracker(config);
        tracker.record_latency(10.0, "dense");
        tracker.record_latency(20.0, "lexical");

        let summary = tracker.get_summary();
        assert_eq!(summary.total_recorded, 2);
        assert!(summary.sla_compliant);
        assert_eq!(
            summary.operations.keys().cloned().collect::<Vec<_>>(),
            vec!["dense".to_string(), "lexical".to_string()]
        );
        assert_eq!(tracker.operations(), vec!["dense", "lexical"]);
    }

    #[test]
    fn test_config_validation() {
        assert!(LatencyConfig::default().validate().is_ok());
        let bad = LatencyConfig::default().with_sla_p95_ms(0.0);
        assert!(bad.validate().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_background_snapshotting() {
        let config = LatencyConfig {
            snapshot_interval_seconds: 1.0,
            ..Default::default()
        };
        let tracker = Arc::new(LatencyTracker::new(config));
        tracker.record_latency(5.0, "search");

        let task = tracker.start_snapshotting();
        tokio::time::sleep(Duration::from_millis(3500)).await;
        task.stop().await;

        assert_eq!(tracker.get_snapshot_history(None).len(), 3);
    }
}
