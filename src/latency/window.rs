//! Bounded quantile sketch and time-windowed sample store.
//!
//! ```text
//! ┌───────────────────────────────────────────────────────────────┐
//! │ SlidingWindowTracker                                          │
//! │                                                               │
//! │  entries: (recorded_at, LatencyMeasurement)  oldest ──► newest│
//! │  sketch:  latency values in the same order                    │
//! │                                                               │
//! │  evict: recorded_at older than window_duration, or beyond     │
//! │         max_samples                                           │
//! │  quantile(q): sorted cache, linear interpolation between      │
//! │               order statistics at q × (n - 1)                 │
//! │  spike_baseline: p95 re-sorted once per len / 8 inserts       │
//! └───────────────────────────────────────────────────────────────┘
//! ```

use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::time::{Duration, Instant};

use crate::clock::SharedClock;

/// The spike baseline is recomputed after `len / BASELINE_REFRESH_DIVISOR`
/// inserts.
const BASELINE_REFRESH_DIVISOR: usize = 8;

/// One latency sample.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LatencyMeasurement {
    /// Recording time, ms since epoch.
    pub timestamp_ms: u64,
    pub latency_ms: f64,
    pub operation: String,
    #[serde(default)]
    pub trace_id: Option<String>,
    #[serde(default)]
    pub context: HashMap<String, serde_json::Value>,
}

// ============================================================================
// Quantile sketch
// ============================================================================

/// Keeps the last `max_samples` values and answers order-statistic queries.
///
/// Sorting happens lazily on the first query after a mutation.
#[derive(Debug, Clone)]
pub struct QuantileSketch {
    samples: VecDeque<f64>,
    max_samples: usize,
    sorted: Vec<f64>,
    dirty: bool,
}

impl QuantileSketch {
    pub fn new(max_samples: usize) -> Self {
        Self {
            samples: VecDeque::new(),
            max_samples: max_samples.max(1),
            sorted: Vec::new(),
            dirty: false,
        }
    }

    /// Insert a value, dropping the oldest when full.
    pub fn insert(&mut self, value: f64) {
        self.samples.push_back(value);
        if self.samples.len() > self.max_samples {
            self.samples.pop_front();
        }
        self.dirty = true;
    }

    pub fn remove_oldest(&mut self) -> Option<f64> {
        let value = self.samples.pop_front();
        if value.is_some() {
            self.dirty = true;
        }
        value
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn clear(&mut self) {
        self.samples.clear();
        self.sorted.clear();
        self.dirty = false;
    }

    fn sorted(&mut self) -> &[f64] {
        if self.dirty {
            self.sorted.clear();
            self.sorted.extend(self.samples.iter().copied());
            self.sorted.sort_by(f64::total_cmp);
            self.dirty = false;
        }
        &self.sorted
    }

    /// Value at quantile `q` in [0, 1], or `None` when empty.
    pub fn quantile(&mut self, q: f64) -> Option<f64> {
        let sorted = self.sorted();
        if sorted.is_empty() {
            return None;
        }
        let q = q.clamp(0.0, 1.0);
        let pos = q * (sorted.len() - 1) as f64;
        let lo = pos.floor() as usize;
        let hi = pos.ceil() as usize;
        let frac = pos - lo as f64;
        let value = sorted[lo] + (sorted[hi] - sorted[lo]) * frac;
        Some(value.clamp(sorted[lo], sorted[hi]))
    }

    pub fn min(&mut self) -> Option<f64> {
        self.sorted().first().copied()
    }

    pub fn max(&mut self) -> Option<f64> {
        self.sorted().last().copied()
    }

    pub fn mean(&self) -> Option<f64> {
        if self.samples.is_empty() {
            return None;
        }
        Some(self.samples.iter().sum::<f64>() / self.samples.len() as f64)
    }

    /// Population standard deviation.
    pub fn stddev(&self) -> Option<f64> {
        let mean = self.mean()?;
        let var = self
            .samples
            .iter()
            .map(|v| (v - mean).powi(2))
            .sum::<f64>()
            / self.samples.len() as f64;
        Some(var.sqrt())
    }

    pub fn values(&self) -> impl Iterator<Item = f64> + '_ {
        self.samples.iter().copied()
    }
}

// ============================================================================
// Sliding window
// ============================================================================

/// Time-windowed latency store for one operation (or the global stream).
#[derive(Debug)]
pub struct SlidingWindowTracker {
    window_duration: Duration,
    clock: SharedClock,
    entries: VecDeque<(Instant, LatencyMeasurement)>,
    sketch: QuantileSketch,
    baseline: Option<f64>,
    inserts_since_baseline: usize,
}

impl SlidingWindowTracker {
    pub fn new(window_duration: Duration, max_samples: usize, clock: SharedClock) -> Self {
        Self {
            window_duration,
            clock,
            entries: VecDeque::new(),
            sketch: QuantileSketch::new(max_samples),
            baseline: None,
            inserts_since_baseline: 0,
        }
    }

    pub fn window_duration(&self) -> Duration {
        self.window_duration
    }

    /// Append a measurement. Both stores drop their oldest entry together.
    pub fn add(&mut self, measurement: LatencyMeasurement) {
        let now = self.clock.now();
        self.sketch.insert(measurement.latency_ms);
        self.entries.push_back((now, measurement));
        self.inserts_since_baseline += 1;
        while self.entries.len() > self.sketch.len() {
            self.entries.pop_front();
        }
        self.evict(now);
    }

    fn evict(&mut self, now: Instant) {
        while let Some((recorded_at, _)) = self.entries.front() {
            if now.saturating_duration_since(*recorded_at) > self.window_duration {
                self.entries.pop_front();
                self.sketch.remove_oldest();
            } else {
                break;
            }
        }
    }

    /// Drop expired measurements.
    pub fn refresh(&mut self) {
        let now = self.clock.now();
        self.evict(now);
    }

    pub fn len(&mut self) -> usize {
        self.refresh();
        self.entries.len()
    }

    pub fn is_empty(&mut self) -> bool {
        self.len() == 0
    }

    pub fn quantile(&mut self, q: f64) -> Option<f64> {
        self.refresh();
        self.sketch.quantile(q)
    }

    /// Cached p95 used to judge spikes.
    ///
    /// Re-sorts only once `len / 8` inserts (at least one) have landed since
    /// the last refresh, so large windows pay for the sort once per batch.
    pub fn spike_baseline(&mut self) -> Option<f64> {
        self.refresh();
        let stale_after = (self.sketch.len() / BASELINE_REFRESH_DIVISOR).max(1);
        if self.baseline.is_none() || self.inserts_since_baseline >= stale_after {
            self.baseline = self.sketch.quantile(0.95);
            self.inserts_since_baseline = 0;
        }
        self.baseline
    }

    /// Replace the cached baseline with a freshly computed p95.
    pub fn set_spike_baseline(&mut self, p95: f64) {
        self.baseline = Some(p95);
        self.inserts_since_baseline = 0;
    }

    /// Several quantiles at once; missing when the window is empty.
    pub fn percentiles(&mut self, qs: &[f64]) -> Vec<(f64, f64)> {
        self.refresh();
        qs.iter()
            .filter_map(|&q| self.sketch.quantile(q).map(|v| (q, v)))
            .collect()
    }

    /// Sketch over the live window.
    pub fn sketch(&mut self) -> &mut QuantileSketch {
        self.refresh();
        &mut self.sketch
    }

    /// Live measurements, oldest first.
    pub fn measurements(&mut self) -> impl Iterator<Item = &LatencyMeasurement> + '_ {
        self.refresh();
        self.entries.iter().map(|(_, m)| m)
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.sketch.clear();
        self.baseline = None;
        self.inserts_since_baseline = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use proptest::prelude::*;

    fn measurement(latency_ms: f64) -> LatencyMeasurement {
        LatencyMeasurement {
            timestamp_ms: 0,
            latency_ms,
            operation: "op".to_string(),
            trace_id: None,
            context: HashMap::new(),
        }
    }

    #[test]
    fn test_quantiles_over_one_to_hundred() {
        let mut sketch = QuantileSketch::new(1000);
        for v in 1..=100 {
            sketch.insert(v as f64);
        }
        let p50 = sketch.quantile(0.5).unwrap();
        let p95 = sketch.quantile(0.95).unwrap();
        let p99 = sketch.quantile(0.99).unwrap();
        assert!((50.0..=51.0).contains(&p50));
        assert!((95.0..=96.0).contains(&p95));
        assert!((99.0..=100.0).contains(&p99));
        assert_eq!(sketch.min(), Some(1.0));
        assert_eq!(sketch.max(), Some(100.0));
    }

    #[test]
    fn test_empty_sketch() {
        let mut sketch = QuantileSketch::new(10);
        assert_eq!(sketch.quantile(0.5), None);
        assert_eq!(sketch.mean(), None);
    }

    #[test]
    fn test_sketch_keeps_last_samples() {
        let mut sketch = QuantileSketch::new(3);
        for v in [100.0, 1.0, 2.0, 3.0] {
            sketch.insert(v);
        }
        assert_eq!(sketch.len(), 3);
        assert_eq!(sketch.max(), Some(3.0));
    }

    #[test]
    fn test_stddev() {
        let mut sketch = QuantileSketch::new(10);
        for v in [2.0, 4.0, 4.0, 4.0, 5.0, 5.0, 7.0, 9.0] {
            sketch.insert(v);
        }
        assert!((sketch.mean().unwrap() - 5.0).abs() < 1e-12);
        assert!((sketch.stddev().unwrap() - 2.0).abs() < 1e-12);
    }

    #[test]
    fn test_window_evicts_old_measurements() {
        let clock = ManualClock::shared();
        let mut window = SlidingWindowTracker::new(Duration::from_secs(10), 100, clock.clone());

        window.add(measurement(500.0));
        clock.advance(Duration::from_secs(6));
        window.add(measurement(10.0));
        clock.advance(Duration::from_secs(5));

        assert_eq!(window.len(), 1);
        assert_eq!(window.percentiles(&[0.5, 0.99]), vec![(0.5, 10.0), (0.99, 10.0)]);
    }

    #[test]
    fn test_window_respects_max_samples() {
        let clock = ManualClock::shared();
        let mut window = SlidingWindowTracker::new(Duration::from_secs(60), 2, clock);
        for v in [1.0, 2.0, 3.0] {
            window.add(measurement(v));
        }
        assert_eq!(window.len(), 2);
        assert_eq!(window.sketch().min(), Some(2.0));
        let ops: Vec<f64> = window.measurements().map(|m| m.latency_ms).collect();
        assert_eq!(ops, vec![2.0, 3.0]);
    }

    #[test]
    fn test_spike_baseline_refreshes_in_batches() {
        let clock = ManualClock::shared();
        let mut window = SlidingWindowTracker::new(Duration::from_secs(60), 10_000, clock);
        for _ in 0..800 {
            window.add(measurement(10.0));
        }
        assert_eq!(window.spike_baseline(), Some(10.0));

        // 50 inserts < 850 / 8: the cached value stands
        for _ in 0..50 {
            window.add(measurement(1000.0));
        }
        assert_eq!(window.spike_baseline(), Some(10.0));

        // 120 inserts >= 920 / 8: re-sorted
        for _ in 0..70 {
            window.add(measurement(1000.0));
        }
        assert_eq!(window.spike_baseline(), Some(1000.0));
    }

    #[test]
    fn test_small_window_baseline_is_exact() {
        let clock = ManualClock::shared();
        let mut window = SlidingWindowTracker::new(Duration::from_secs(60), 100, clock);
        assert_eq!(window.spike_baseline(), None);
        for v in [1.0, 2.0, 3.0] {
            window.add(measurement(v));
            assert_eq!(window.spike_baseline(), window.quantile(0.95));
        }
    }

    proptest! {
        #[test]
        fn prop_quantiles_monotonic(values in prop::collection::vec(0.0f64..10_000.0, 1..200)) {
            let mut sketch = QuantileSketch::new(1000);
            for v in &values {
                sketch.insert(*v);
            }
            let p50 = sketch.quantile(0.5).unwrap();
            let p95 = sketch.quantile(0.95).unwrap();
            let p99 = sketch.quantile(0.99).unwrap();
            let p999 = sketch.quantile(0.999).unwrap();
            prop_assert!(p50 <= p95 && p95 <= p99 && p99 <= p999);
            prop_assert!(sketch.min().unwrap() <= p50);
            prop_assert!(p999 <= sketch.max().unwrap());
        }
    }
}
