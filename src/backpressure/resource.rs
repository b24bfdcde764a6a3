//! System resource sampling and pressure computation.
//!
//! [`ResourceMonitor`] keeps bounded histories of CPU, memory and disk-I/O
//! utilization written by the monitoring loop and read by request tasks.
//! Sampling goes through the [`ResourceSampler`] trait so tests can feed fixed
//! readings instead of the live system.

use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::time::Instant;
use sysinfo::{Pid, System};

use super::config::BackpressureConfig;

/// One reading of system utilization, in percent.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ResourceSample {
    pub cpu_percent: f64,
    pub memory_percent: f64,
    pub disk_io_percent: f64,
}

impl ResourceSample {
    pub fn new(cpu_percent: f64, memory_percent: f64, disk_io_percent: f64) -> Self {
        Self {
            cpu_percent,
            memory_percent,
            disk_io_percent,
        }
    }
}

/// Source of resource readings.
pub trait ResourceSampler: Send + Sync {
    fn sample(&self) -> ResourceSample;
}

// ============================================================================
// Live system sampler
// ============================================================================

struct SysinfoState {
    system: System,
    pid: Option<Pid>,
    last_sample: Instant,
}

/// Samples the host through `sysinfo`.
///
/// CPU usage is the global average since the previous refresh, so the first
/// reading after construction may be zero. Disk I/O is this process's read +
/// write throughput relative to `disk_io_ceiling_bytes_per_sec`.
pub struct SysinfoSampler {
    state: Mutex<SysinfoState>,
    disk_io_ceiling_bytes_per_sec: u64,
}

impl SysinfoSampler {
    pub fn new(disk_io_ceiling_bytes_per_sec: u64) -> Self {
        let mut system = System::new();
        system.refresh_cpu();
        system.refresh_memory();
        let pid = sysinfo::get_current_pid().ok();
        if let Some(pid) = pid {
            system.refresh_process(pid);
        }
        Self {
            state: Mutex::new(SysinfoState {
                system,
                pid,
                last_sample: Instant::now(),
            }),
            disk_io_ceiling_bytes_per_sec: disk_io_ceiling_bytes_per_sec.max(1),
        }
    }
}

impl ResourceSampler for SysinfoSampler {
    fn sample(&self) -> ResourceSample {
        let mut state = self.state.lock();
        let now = Instant::now();
        let elapsed = now.duration_since(state.last_sample).as_secs_f64();
        state.last_sample = now;

        state.system.refresh_cpu();
        state.system.refresh_memory();
        let cpu_percent = state.system.global_cpu_info().cpu_usage() as f64;

        let total = state.system.total_memory();
        let memory_percent = if total > 0 {
            state.system.used_memory() as f64 / total as f64 * 100.0
        } else {
            0.0
        };

        let mut disk_io_percent = 0.0;
        if let Some(pid) = state.pid {
            if state.system.refresh_process(pid) {
                if let Some(process) = state.system.process(pid) {
                    let usage = process.disk_usage();
                    let bytes = usage.read_bytes + usage.written_bytes;
                    if elapsed > 0.0 {
                        let per_sec = bytes as f64 / elapsed;
                        disk_io_percent =
                            per_sec / self.disk_io_ceiling_bytes_per_sec as f64 * 100.0;
                    }
                }
            }
        }

        ResourceSample::new(cpu_percent, memory_percent, disk_io_percent.min(100.0))
    }
}

/// Sampler returning a settable reading.
#[derive(Debug, Default)]
pub struct FixedSampler {
    sample: RwLock<ResourceSample>,
}

impl FixedSampler {
    pub fn new(sample: ResourceSample) -> Self {
        Self {
            sample: RwLock::new(sample),
        }
    }

    pub fn set(&self, sample: ResourceSample) {
        *self.sample.write() = sample;
    }
}

impl ResourceSampler for FixedSampler {
    fn sample(&self) -> ResourceSample {
        *self.sample.read()
    }
}

// ============================================================================
// Monitor
// ============================================================================

#[derive(Default)]
struct Histories {
    cpu: VecDeque<f64>,
    memory: VecDeque<f64>,
    disk_io: VecDeque<f64>,
}

fn push_bounded(history: &mut VecDeque<f64>, value: f64, cap: usize) {
    history.push_back(value);
    while history.len() > cap {
        history.pop_front();
    }
}

/// Resource utilization tracker with pressure thresholds.
pub struct ResourceMonitor {
    max_cpu_percent: f64,
    max_memory_percent: f64,
    max_disk_io_percent: f64,
    history_size: usize,
    histories: RwLock<Histories>,
}

impl ResourceMonitor {
    pub fn new(config: &BackpressureConfig) -> Self {
        Self {
            max_cpu_percent: config.max_cpu_percent,
            max_memory_percent: config.max_memory_percent,
            max_disk_io_percent: config.max_disk_io_percent,
            history_size: config.metrics_history_size.max(1),
            histories: RwLock::new(Histories::default()),
        }
    }

    /// Record a reading.
    pub fn update(&self, sample: ResourceSample) {
        let mut h = self.histories.write();
        push_bounded(&mut h.cpu, sample.cpu_percent, self.history_size);
        push_bounded(&mut h.memory, sample.memory_percent, self.history_size);
        push_bounded(&mut h.disk_io, sample.disk_io_percent, self.history_size);
    }

    /// Most recent reading, zeros before the first update.
    pub fn latest(&self) -> ResourceSample {
        let h = self.histories.read();
        ResourceSample {
            cpu_percent: h.cpu.back().copied().unwrap_or(0.0),
            memory_percent: h.memory.back().copied().unwrap_or(0.0),
            disk_io_percent: h.disk_io.back().copied().unwrap_or(0.0),
        }
    }

    /// Mean of the last `n` readings.
    pub fn average(&self, n: usize) -> ResourceSample {
        fn tail_mean(history: &VecDeque<f64>, n: usize) -> f64 {
            let take = n.min(history.len());
            if take == 0 {
                return 0.0;
            }
            history.iter().rev().take(take).sum::<f64>() / take as f64
        }
        let h = self.histories.read();
        ResourceSample {
            cpu_percent: tail_mean(&h.cpu, n),
            memory_percent: tail_mean(&h.memory, n),
            disk_io_percent: tail_mean(&h.disk_io, n),
        }
    }

    pub fn history_len(&self) -> usize {
        self.histories.read().cpu.len()
    }

    /// Highest utilization-to-ceiling ratio across resources.
    pub fn pressure_ratio(&self) -> f64 {
        let latest = self.latest();
        [
            latest.cpu_percent / self.max_cpu_percent,
            latest.memory_percent / self.max_memory_percent,
            latest.disk_io_percent / self.max_disk_io_percent,
        ]
        .into_iter()
        .fold(0.0, f64::max)
    }

    /// Whether any resource exceeds its ceiling.
    pub fn is_overloaded(&self) -> bool {
        let latest = self.latest();
        latest.cpu_percent > self.max_cpu_percent
            || latest.memory_percent > self.max_memory_percent
            || latest.disk_io_percent > self.max_disk_io_percent
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backpressure::config::DegradationLevel;

    fn monitor() -> ResourceMonitor {
        ResourceMonitor::new(&BackpressureConfig {
            metrics_history_size: 3,
            ..Default::default()
        })
    }

    #[test]
    fn test_pressure_ratio_picks_worst_resource() {
        let monitor = monitor();
        monitor.update(ResourceSample::new(85.0, 0.0, 0.0));

        let ratio = monitor.pressure_ratio();
        assert!((ratio - 85.0 / 80.0).abs() < 1e-12);
        assert!(monitor.is_overloaded());
        assert_eq!(
            DegradationLevel::from_pressure(ratio),
            DegradationLevel::EssentialOnly
        );
    }

    #[test]
    fn test_not_overloaded_at_ceiling() {
        let monitor = monitor();
        monitor.update(ResourceSample::new(80.0, 85.0, 90.0));
        assert!(!monitor.is_overloaded());
        assert!((monitor.pressure_ratio() - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_history_is_bounded() {
        let monitor = monitor();
        for cpu in [10.0, 20.0, 30.0, 40.0] {
            monitor.update(ResourceSample::new(cpu, 0.0, 0.0));
        }
        assert_eq!(monitor.history_len(), 3);
        assert!((monitor.average(10).cpu_percent - 30.0).abs() < 1e-12);
        assert_eq!(monitor.latest().cpu_percent, 40.0);
    }

    #[test]
    fn test_empty_monitor_reads_zero() {
        let monitor = monitor();
        assert_eq!(monitor.latest(), ResourceSample::default());
        assert_eq!(monitor.pressure_ratio(), 0.0);
    }

    #[test]
    fn test_fixed_sampler_set() {
        let sampler = FixedSampler::new(ResourceSample::new(1.0, 2.0, 3.0));
        sampler.set(ResourceSample::new(4.0, 5.0, 6.0));
        assert_eq!(sampler.sample().disk_io_percent, 6.0);
    }

    #[test]
    fn test_sysinfo_sampler_in_range() {
        let sampler = SysinfoSampler::new(1024 * 1024);
        let sample = sampler.sample();
        assert!(sample.memory_percent >= 0.0 && sample.memory_percent <= 100.0);
        assert!(sample.disk_io_percent >= 0.0 && sample.disk_io_percent <= 100.0);
        assert!(sample.cpu_percent >= 0.0);
    }
}
