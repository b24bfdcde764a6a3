//! Periodic background tasks with explicit shutdown.
//!
//! Used by the resource-monitoring loop and the latency snapshot loop. Each
//! task ticks on its own `tokio::time::interval`, independent of request load.

use std::future::Future;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info};

/// Handle to a running periodic task.
///
/// Dropping the handle without calling [`PeriodicTask::stop`] also stops the
/// loop at its next tick, since the shutdown channel closes.
#[derive(Debug)]
pub struct PeriodicTask {
    name: &'static str,
    shutdown: watch::Sender<bool>,
    join: JoinHandle<()>,
}

impl PeriodicTask {
    /// Run `tick` every `interval` until stopped. The first run happens one
    /// interval after spawning.
    pub fn spawn<F, Fut>(name: &'static str, interval: Duration, mut tick: F) -> Self
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send,
    {
        let (shutdown, mut shutdown_rx) = watch::channel(false);
        let join = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            ticker.tick().await;

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        debug!(task = name, "Periodic task tick");
                        tick().await;
                    }
                    changed = shutdown_rx.changed() => {
                        if changed.is_err() || *shutdown_rx.borrow() {
                            info!(task = name, "Periodic task shutting down");
                            break;
                        }
                    }
                }
            }
        });
        info!(task = name, interval_ms = interval.as_millis() as u64, "Periodic task started");
        Self {
            name,
            shutdown,
            join,
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn is_finished(&self) -> bool {
        self.join.is_finished()
    }

    /// Signal shutdown and wait for the loop to exit.
    pub async fn stop(self) {
        let _ = self.shutdown.send(true);
        let _ = self.join.await;
    }
}
