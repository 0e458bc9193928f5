//! Passive quota collector.
//!
//! Accepts externally observed quota snapshots, validates them, and writes
//! them through to the store. When the drain task is running, snapshots are
//! buffered in a bounded queue so `ingest` never blocks the caller beyond a
//! short mutex hold; on overflow the oldest pending entry is discarded and
//! counted.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::Utc;
use serde::Serialize;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use quotaplane_common::{QuotaPlaneError, QuotaPlaneResult};

use crate::quota::QuotaInfo;
use crate::store::StateStore;

/// Configuration for the passive collector.
#[derive(Debug, Clone)]
pub struct CollectorConfig {
    /// Bounded queue capacity; the oldest entry is dropped when full.
    pub queue_capacity: usize,
    /// Drain cadence for the background flush task.
    pub drain_interval: Duration,
}

impl Default for CollectorConfig {
    fn default() -> Self {
        Self {
            queue_capacity: 1024,
            drain_interval: Duration::from_millis(100),
        }
    }
}

/// Counter snapshot for the collector.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct CollectorMetrics {
    /// Snapshots accepted (queued or written through).
    pub ingested: u64,
    /// Pending entries discarded because the queue was full.
    pub dropped: u64,
    /// Snapshots rejected by validation.
    pub rejected: u64,
}

#[derive(Default)]
#[derive(Debug)]
struct Counters {
    ingested: AtomicU64,
    dropped: AtomicU64,
    rejected: AtomicU64,
}

/// Passive collector feeding observed quota state into the store.
#[derive(Debug)]
pub struct PassiveCollector<S> {
    store: Arc<S>,
    config: CollectorConfig,
    queue: Arc<Mutex<VecDeque<QuotaInfo>>>,
    counters: Arc<Counters>,
    running: Arc<AtomicBool>,
    drain_task: tokio::sync::Mutex<Option<(CancellationToken, JoinHandle<()>)>>,
}

impl<S: StateStore + Send + Sync + 'static> PassiveCollector<S> {
    /// Create a collector with the given configuration.
    pub fn new(store: Arc<S>, config: CollectorConfig) -> Self {
        Self {
            store,
            config,
            queue: Arc::new(Mutex::new(VecDeque::new())),
            counters: Arc::new(Counters::default()),
            running: Arc::new(AtomicBool::new(false)),
            drain_task: tokio::sync::Mutex::new(None),
        }
    }

    /// Create a collector with default configuration.
    pub fn with_defaults(store: Arc<S>) -> Self {
        Self::new(store, CollectorConfig::default())
    }

    /// Accept an observed quota snapshot.
    ///
    /// Validates the snapshot and stamps `collected_at` when the observer
    /// left it unset. While the drain task runs, the snapshot is queued;
    /// otherwise it is written through immediately.
    pub async fn ingest(&self, mut quota: QuotaInfo) -> QuotaPlaneResult<()> {
        if let Err(err) = quota.validate() {
            self.counters.rejected.fetch_add(1, Ordering::Relaxed);
            return Err(err.into());
        }
        if quota.collected_at.is_none() {
            quota.collected_at = Some(Utc::now());
        }

        if self.running.load(Ordering::Acquire) {
            let overflowed = {
                let Ok(mut queue) = self.queue.lock() else {
                    return Err(QuotaPlaneError::Internal(
                        "collector queue lock poisoned".to_string(),
                    ));
                };
                let overflowed = queue.len() >= self.config.queue_capacity;
                if overflowed {
                    queue.pop_front();
                }
                queue.push_back(quota);
                overflowed
            };
            if overflowed {
                self.counters.dropped.fetch_add(1, Ordering::Relaxed);
                debug!("collector queue full, dropped oldest pending snapshot");
            }
        } else {
            write_through(&self.store, quota).await?;
        }

        self.counters.ingested.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    /// Launch the drain task. Idempotent while already running.
    pub async fn start(&self, parent: &CancellationToken) -> QuotaPlaneResult<()> {
        let mut guard = self.drain_task.lock().await;
        if guard.is_some() {
            return Ok(());
        }

        let token = parent.child_token();
        self.running.store(true, Ordering::Release);

        let handle = tokio::spawn(drain_loop(
            Arc::clone(&self.store),
            Arc::clone(&self.queue),
            token.clone(),
            self.config.drain_interval,
        ));
        *guard = Some((token, handle));

        debug!(interval_ms = self.config.drain_interval.as_millis() as u64, "collector started");
        Ok(())
    }

    /// Stop the drain task: flush what is pending, then join.
    pub async fn stop(&self) -> QuotaPlaneResult<()> {
        let Some((token, handle)) = self.drain_task.lock().await.take() else {
            return Ok(());
        };

        self.running.store(false, Ordering::Release);
        token.cancel();
        handle
            .await
            .map_err(|err| QuotaPlaneError::Internal(format!("collector drain task: {err}")))?;

        // Entries accepted between the flag flip and now.
        flush(&self.store, &self.queue).await;
        debug!("collector stopped");
        Ok(())
    }

    /// Whether the drain task is running.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Number of snapshots waiting to be flushed.
    pub fn pending(&self) -> usize {
        self.queue.lock().map(|q| q.len()).unwrap_or(0)
    }

    /// Counter snapshot.
    pub fn metrics(&self) -> CollectorMetrics {
        CollectorMetrics {
            ingested: self.counters.ingested.load(Ordering::Relaxed),
            dropped: self.counters.dropped.load(Ordering::Relaxed),
            rejected: self.counters.rejected.load(Ordering::Relaxed),
        }
    }
}

async fn drain_loop<S: StateStore + Send + Sync>(
    store: Arc<S>,
    queue: Arc<Mutex<VecDeque<QuotaInfo>>>,
    token: CancellationToken,
    interval: Duration,
) {
    let mut ticker = tokio::time::interval(interval.max(Duration::from_millis(1)));
    loop {
        tokio::select! {
            _ = token.cancelled() => {
                flush(&store, &queue).await;
                break;
            }
            _ = ticker.tick() => {
                flush(&store, &queue).await;
            }
        }
    }
}

async fn flush<S: StateStore + Send + Sync>(
    store: &Arc<S>,
    queue: &Arc<Mutex<VecDeque<QuotaInfo>>>,
) {
    // Drain under the lock, write without it.
    let batch: Vec<QuotaInfo> = match queue.lock() {
        Ok(mut queue) => queue.drain(..).collect(),
        Err(_) => return,
    };

    for quota in batch {
        let account_id = quota.account_id.clone();
        if let Err(err) = write_through(store, quota).await {
            warn!(account_id = %account_id, "quota write-through failed: {err}");
        }
    }
}

/// Replace the observed quota record, carrying over the virtual holds.
///
/// External observers cannot see reservation state, so a snapshot arrives
/// with no virtual usage; dropping the existing holds here would break the
/// reservation accounting.
async fn write_through<S: StateStore + Send + Sync>(
    store: &Arc<S>,
    mut quota: QuotaInfo,
) -> QuotaPlaneResult<()> {
    if let Some(existing) = store.get_quota(&quota.account_id).await? {
        quota.virtual_used_pct = existing.virtual_used_pct;
    }
    store.set_quota(quota).await
}
