//! Background sweep of stale tracker entries.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info};

use super::clock::Clock;
use super::tracker::RequestAdmissionTracker;

/// Default cadence of the sweep loop.
pub const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(300);
/// Default age after which an entry is considered stale.
pub const DEFAULT_STALE_THRESHOLD: Duration = Duration::from_secs(86_400);

const MIN_SWEEP_INTERVAL: Duration = Duration::from_millis(1);

/// How often to sweep and what counts as stale.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SweepSettings {
    pub interval: Duration,
    pub stale_threshold: Duration,
}

impl SweepSettings {
    /// Stale threshold in milliseconds, saturating at `u64::MAX`.
    pub fn stale_threshold_ms(&self) -> u64 {
        u64::try_from(self.stale_threshold.as_millis()).unwrap_or(u64::MAX)
    }
}

impl Default for SweepSettings {
    fn default() -> Self {
        Self {
            interval: DEFAULT_SWEEP_INTERVAL,
            stale_threshold: DEFAULT_STALE_THRESHOLD,
        }
    }
}

/// Handle to a running sweep loop.
///
/// Dropping the handle also ends the loop, but only [`SweepHandle::stop`]
/// waits for it to finish.
pub struct SweepHandle {
    shutdown: Option<oneshot::Sender<()>>,
    task: JoinHandle<()>,
}

impl SweepHandle {
    /// Signal the loop to exit and wait for it.
    pub async fn stop(mut self) {
        if let Some(shutdown) = self.shutdown.take() {
            let _ = shutdown.send(());
        }
        let _ = (&mut self.task).await;
        debug!("Sweep loop stopped");
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

/// Spawn a task that periodically removes stale entries from `tracker`.
///
/// The first sweep happens one full interval after start. A zero interval is
/// raised to one millisecond. Must be called from within a tokio runtime.
pub fn start_sweep_loop(
    tracker: Arc<RequestAdmissionTracker>,
    clock: Arc<dyn Clock>,
    settings: SweepSettings,
) -> SweepHandle {
    let (shutdown_tx, mut shutdown_rx) = oneshot::channel::<()>();
    let stale_threshold_ms = settings.stale_threshold_ms();
    let period = settings.interval.max(MIN_SWEEP_INTERVAL);

    info!(
        interval = ?period,
        stale_threshold = ?settings.stale_threshold,
        "Starting sweep loop"
    );

    let task = tokio::spawn(async move {
        let mut ticker = interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick completes immediately
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = &mut shutdown_rx => break,
                _ = ticker.tick() => {
                    let removed = tracker.sweep_stale(clock.now_ms(), stale_threshold_ms);
                    debug!(removed, tracked = tracker.len(), "Sweep pass complete");
                }
            }
        }
    });

    SweepHandle {
        shutdown: Some(shutdown_tx),
        task,
    }
}
