//! Periodic sweeps
//!
//! A sweep is any idempotent job run on a fixed interval: closing expired
//! cycles, finalizing invoices, polling the carrier. [`SweepGuard`] keeps two
//! runs of the same sweep from interleaving, whether they come from the
//! timer or from an operator-triggered run.

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info};

/// "Still running" flag for one kind of sweep
#[derive(Debug, Clone, Default)]
pub struct SweepGuard {
    running: Arc<AtomicBool>,
}

/// Held while a sweep runs; clears the flag on drop
#[derive(Debug)]
pub struct SweepPermit {
    running: Arc<AtomicBool>,
}

impl Drop for SweepPermit {
    fn drop(&mut self) {
        self.running.store(false, Ordering::Release);
    }
}

impl SweepGuard {
    /// New idle guard
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim the sweep, or `None` if a run is already in progress
    pub fn try_start(&self) -> Option<SweepPermit> {
        self.running
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| SweepPermit {
                running: Arc::clone(&self.running),
            })
    }

    /// Whether a run is in progress
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }
}

/// Run `job` every `period` until the task is aborted.
///
/// The first run happens immediately. Ticks missed while a run was slow are
/// skipped, not replayed.
pub fn spawn_periodic<F, Fut>(name: &'static str, period: Duration, mut job: F) -> JoinHandle<()>
where
    F: FnMut() -> Fut + Send + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    tokio::spawn(async move {
        info!(sweep = name, period_secs = period.as_secs(), "Starting periodic sweep");

        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            interval.tick().await;
            debug!(sweep = name, "Sweep tick");
            job().await;
        }
    })
}
