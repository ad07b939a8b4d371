//! Request coalescing for idempotent reads.
//!
//! [`Coalescer::run`] deduplicates concurrent calls that share a key: the
//! first caller starts the operation, later callers subscribe to it, and
//! every subscriber receives the identical outcome (value or error).
//!
//! # Ownership
//!
//! The operation is driven by its own spawned task rather than by the first
//! caller. Dropping any caller, including the one that started the call,
//! never strands the other subscribers or leaves a stale table entry. The
//! task removes the entry and publishes the outcome when the call settles,
//! or publishes [`SluiceError::CoalescingTimeout`] once the deadline passes.
//! A panicking operation is caught and reported as [`SluiceError::Abandoned`].
//!
//! The table lock only guards map manipulation; the upstream call always
//! runs unlocked.
//!
//! # Stale entries
//!
//! [`Coalescer::expire_stale`] (called by the maintenance task) removes any
//! entry older than the deadline and fails its subscribers. An entry is
//! removed before its outcome is published, so the sweep can only ever see
//! operations that have not settled; nothing it discards had a result.
//!
//! Only coalesce operations without side effects.

use std::collections::HashMap;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use futures_util::FutureExt;
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::telemetry;
use crate::{Result, SluiceError};

/// Default deadline for an in-flight operation.
pub const DEFAULT_COALESCING_TIMEOUT: Duration = Duration::from_secs(30);

/// Configuration for the coalescer.
#[derive(Debug, Clone)]
pub struct CoalescingConfig {
    /// How long an in-flight operation may run before every subscriber is
    /// failed with a timeout. Default: 30s.
    pub timeout: Duration,
}

impl Default for CoalescingConfig {
    fn default() -> Self {
        Self {
            timeout: DEFAULT_COALESCING_TIMEOUT,
        }
    }
}

impl CoalescingConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

/// `None` until the operation settles.
type Outcome<T> = Option<Result<T>>;

struct PendingOperation<T> {
    id: u64,
    created_at: Instant,
    outcome: Arc<watch::Sender<Outcome<T>>>,
}

type PendingTable<T> = Arc<Mutex<HashMap<String, PendingOperation<T>>>>;

/// Deduplicates concurrent identical operations.
pub struct Coalescer<T> {
    pending: PendingTable<T>,
    timeout: Duration,
    next_id: AtomicU64,
}

impl<T> Coalescer<T>
where
    T: Clone + Send + Sync + 'static,
{
    pub fn new(config: &CoalescingConfig) -> Self {
        Self {
            pending: Arc::new(Mutex::new(HashMap::new())),
            timeout: config.timeout,
            next_id: AtomicU64::new(0),
        }
    }

    /// Run `operation` for `key`, or join the call already in flight.
    ///
    /// `operation` is invoked at most once per in-flight key; callers that
    /// arrive while it runs receive the same outcome without invoking their
    /// own.
    ///
    /// # Panics
    ///
    /// Requires a tokio runtime context (the operation runs on a spawned task).
    pub async fn run<F, Fut>(&self, key: impl Into<String>, operation: F) -> Result<T>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<T>> + Send + 'static,
    {
        let key = key.into();
        let mut outcome = {
            let mut pending = lock(&self.pending);
            match pending.get(&key) {
                Some(op) => {
                    metrics::counter!(telemetry::COALESCED_TOTAL).increment(1);
                    debug!(
                        key = %key,
                        subscribers = op.outcome.receiver_count() + 1,
                        "joining in-flight operation"
                    );
                    op.outcome.subscribe()
                }
                None => {
                    let id = self.next_id.fetch_add(1, Ordering::Relaxed);
                    let (tx, rx) = watch::channel(None);
                    let tx = Arc::new(tx);
                    pending.insert(
                        key.clone(),
                        PendingOperation {
                            id,
                            created_at: Instant::now(),
                            outcome: Arc::clone(&tx),
                        },
                    );
                    self.spawn_operation(key.clone(), id, tx, operation);
                    rx
                }
            }
        };

        match outcome.wait_for(Option::is_some).await {
            Ok(settled) => settled
                .clone()
                .unwrap_or_else(|| Err(SluiceError::Abandoned { key })),
            Err(_) => Err(SluiceError::Abandoned { key }),
        }
    }

    fn spawn_operation<F, Fut>(
        &self,
        key: String,
        id: u64,
        outcome: Arc<watch::Sender<Outcome<T>>>,
        operation: F,
    ) where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<T>> + Send + 'static,
    {
        let pending = Arc::clone(&self.pending);
        let timeout = self.timeout;

        tokio::spawn(async move {
            let guarded = AssertUnwindSafe(async move { operation().await }).catch_unwind();
            let result = match tokio::time::timeout(timeout, guarded).await {
                Ok(Ok(result)) => result,
                Ok(Err(_)) => {
                    warn!(key = %key, "in-flight operation panicked");
                    Err(SluiceError::Abandoned { key: key.clone() })
                }
                Err(_) => {
                    metrics::counter!(telemetry::COALESCING_TIMEOUTS_TOTAL).increment(1);
                    warn!(key = %key, ?timeout, "in-flight operation exceeded coalescing deadline");
                    Err(SluiceError::CoalescingTimeout {
                        key: key.clone(),
                        timeout,
                    })
                }
            };

            {
                let mut table = lock(&pending);
                // The sweep may already have replaced this entry with a newer call.
                if table.get(&key).is_some_and(|op| op.id == id) {
                    table.remove(&key);
                }
            }
            publish(&outcome, result);
        });
    }

    /// Force-fail and remove every operation older than the deadline.
    ///
    /// Returns the number of operations expired.
    pub fn expire_stale(&self) -> usize {
        let now = Instant::now();
        let expired: Vec<(String, PendingOperation<T>)> = {
            let mut table = lock(&self.pending);
            let keys: Vec<String> = table
                .iter()
                .filter(|(_, op)| now.saturating_duration_since(op.created_at) >= self.timeout)
                .map(|(key, _)| key.clone())
                .collect();
            keys.iter()
                .filter_map(|key| table.remove_entry(key))
                .collect()
        };

        for (key, op) in &expired {
            metrics::counter!(telemetry::COALESCING_TIMEOUTS_TOTAL).increment(1);
            warn!(
                key = %key,
                subscribers = op.outcome.receiver_count(),
                "sweeping stale in-flight operation"
            );
            publish(
                &op.outcome,
                Err(SluiceError::CoalescingTimeout {
                    key: key.clone(),
                    timeout: self.timeout,
                }),
            );
        }
        expired.len()
    }

    /// Number of operations currently in flight.
    pub fn in_flight(&self) -> usize {
        lock(&self.pending).len()
    }

    /// Number of callers waiting on the in-flight operation for `key`.
    pub fn subscribers(&self, key: &str) -> Option<usize> {
        lock(&self.pending)
            .get(key)
            .map(|op| op.outcome.receiver_count())
    }
}

/// Publish the first outcome only; later ones (e.g. a result arriving after
/// the sweep already failed the call) are dropped.
fn publish<T>(outcome: &watch::Sender<Outcome<T>>, result: Result<T>) {
    outcome.send_if_modified(|slot| {
        if slot.is_some() {
            return false;
        }
        *slot = Some(result);
        true
    });
}

fn lock<T>(table: &Mutex<T>) -> MutexGuard<'_, T> {
    table.lock().unwrap_or_else(PoisonError::into_inner)
}
