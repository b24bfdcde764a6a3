//! Streaming latency percentiles, alerts and trend detection.
//!
//! # Architecture
//!
//! ```text
//! record_latency(ms, op)
//!        │
//!        ├──► per-operation SlidingWindowTracker ──┐
//!        ├──► global SlidingWindowTracker ─────────┤──► get_current_snapshot()
//!        │                                         │    get_percentiles()
//!        └──► inline alerts                        │
//!             threshold_exceeded, spike_detected   │
//!                                                  ▼
//!                        take_snapshots() (every snapshot_interval_seconds)
//!                          ├──► bounded snapshot history per window
//!                          └──► degradation_trend alert
//! ```
//!
//! All alerts go to subscribers registered with
//! [`LatencyTracker::subscribe`]. A failing subscriber is logged, never
//! propagated to the caller of `record_latency`.

mod alerts;
mod tracker;
mod window;

pub use alerts::{AlertCallback, AlertDispatcher, AlertKind, LatencyAlert, Severity};
pub use tracker::{LatencyConfig, LatencySnapshot, LatencySummary, LatencyTracker};
pub use window::{LatencyMeasurement, QuantileSketch, SlidingWindowTracker};
