//! Periodic background reclamation.
//!
//! [`spawn`] starts a task that, every interval, asks each registered
//! [`Sweep`] target to drop state it no longer needs: expired rate windows,
//! in-flight operations past their deadline, expired cache entries. The task
//! goes through the same locks as request handling, so a sweep racing a
//! request on the same entry is safe.
//!
//! The returned [`MaintenanceHandle`] stops the task gracefully with
//! [`MaintenanceHandle::shutdown`]; dropping the handle aborts it.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info};

use crate::cache::TtlStore;
use crate::coalesce::Coalescer;
use crate::rate_limit::RateLimiter;

/// Default sweep interval.
pub const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(60);

/// Something the maintenance task can reclaim memory from.
pub trait Sweep: Send + Sync {
    /// Label used in logs.
    fn name(&self) -> &'static str;

    /// Drop reclaimable state. Returns how many entries were removed.
    fn sweep(&self) -> usize;
}

impl<V: Clone + Send> Sweep for TtlStore<V> {
    fn name(&self) -> &'static str {
        "cache"
    }

    fn sweep(&self) -> usize {
        self.purge_expired()
    }
}

impl<T: Clone + Send + Sync + 'static> Sweep for Coalescer<T> {
    fn name(&self) -> &'static str {
        "coalescer"
    }

    fn sweep(&self) -> usize {
        self.expire_stale()
    }
}

impl Sweep for RateLimiter {
    fn name(&self) -> &'static str {
        "rate_limiter"
    }

    fn sweep(&self) -> usize {
        self.purge_expired()
    }
}

/// Run one sweep over every target. Returns the total removed.
pub fn sweep_all(targets: &[Arc<dyn Sweep>]) -> usize {
    targets
        .iter()
        .map(|target| {
            let removed = target.sweep();
            if removed > 0 {
                debug!(target_name = target.name(), removed, "reclaimed expired state");
            }
            removed
        })
        .sum()
}

/// Handle to the running maintenance task.
pub struct MaintenanceHandle {
    shutdown: Option<oneshot::Sender<()>>,
    task: Option<JoinHandle<()>>,
}

impl MaintenanceHandle {
    /// Stop the task and wait for it to finish its current sweep.
    pub async fn shutdown(mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
    }

    pub fn is_running(&self) -> bool {
        self.task.as_ref().is_some_and(|task| !task.is_finished())
    }
}

impl Drop for MaintenanceHandle {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

/// Start the periodic sweep. The first sweep runs one `interval` from now.
///
/// # Panics
///
/// Requires a tokio runtime context.
pub fn spawn(interval: Duration, targets: Vec<Arc<dyn Sweep>>) -> MaintenanceHandle {
    let (tx, mut rx) = oneshot::channel();
    let task = tokio::spawn(async move {
        let mut ticker = tokio::time::interval_at(Instant::now() + interval, interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!(interval_secs = interval.as_secs(), targets = targets.len(), "maintenance started");

        loop {
            tokio::select! {
                _ = &mut rx => break,
                _ = ticker.tick() => {
                    sweep_all(&targets);
                }
            }
        }
        debug!("maintenance stopped");
    });

    MaintenanceHandle {
        shutdown: Some(tx),
        task: Some(task),
    }
}
