//! Reservation lifecycle manager.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde::Serialize;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument, warn};

use quotaplane_common::{AccountId, QuotaPlaneError, QuotaPlaneResult, ReservationId};
use quotaplane_state::{Reservation, ReservationStatus, StateStore};

/// Configuration for the reservation manager.
#[derive(Debug, Clone)]
pub struct ReservationConfig {
    /// TTL applied to new reservations.
    pub default_ttl: Duration,
    /// Cadence of the background expiry sweep.
    pub cleanup_interval: Duration,
}

impl Default for ReservationConfig {
    fn default() -> Self {
        Self {
            default_ttl: Duration::from_secs(300),
            cleanup_interval: Duration::from_secs(30),
        }
    }
}

/// Lifecycle counter snapshot.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct ReservationMetrics {
    /// Reservations created.
    pub created: u64,
    /// Reservations released with an actual cost.
    pub released: u64,
    /// Reservations cancelled by the caller.
    pub cancelled: u64,
    /// Reservations expired by the sweep.
    pub expired: u64,
    /// Reservations currently holding quota.
    pub active: u64,
    /// Sweep items that failed and were skipped.
    pub sweep_failures: u64,
}

#[derive(Default, Debug)]
struct Counters {
    created: AtomicU64,
    released: AtomicU64,
    cancelled: AtomicU64,
    expired: AtomicU64,
    sweep_failures: AtomicU64,
}

/// Manages the soft-reservation state machine.
///
/// The store is the source of truth for reservations; the manager holds no
/// private reservation state beyond lifecycle counters. A single operation
/// mutex serializes every state transition so the compound quota/reservation
/// update is atomic.
#[derive(Debug)]
pub struct ReservationManager<S> {
    store: Arc<S>,
    config: ReservationConfig,
    op_lock: tokio::sync::Mutex<()>,
    counters: Counters,
}

impl<S: StateStore + Send + Sync + 'static> ReservationManager<S> {
    /// Create a manager with the given configuration.
    pub fn new(store: Arc<S>, config: ReservationConfig) -> Self {
        Self {
            store,
            config,
            op_lock: tokio::sync::Mutex::new(()),
            counters: Counters::default(),
        }
    }

    /// Create a manager with default configuration.
    pub fn with_defaults(store: Arc<S>) -> Self {
        Self::new(store, ReservationConfig::default())
    }

    /// Place a hold of `estimated_cost_pct` against an account's budget.
    ///
    /// Fails with `NoQuota` when the account has no quota record and with
    /// `InsufficientQuota` when the remaining headroom (net of existing
    /// holds) cannot cover the estimate.
    #[instrument(skip(self), fields(account_id = %account_id))]
    pub async fn create(
        &self,
        account_id: &AccountId,
        estimated_cost_pct: f64,
        correlation_id: &str,
    ) -> QuotaPlaneResult<Reservation> {
        if !(0.0..=100.0).contains(&estimated_cost_pct) {
            return Err(QuotaPlaneError::Validation(format!(
                "estimated_cost_pct must be within [0, 100], got {estimated_cost_pct}"
            )));
        }
        if correlation_id.is_empty() {
            return Err(QuotaPlaneError::Validation(
                "correlation_id must be non-empty".to_string(),
            ));
        }

        let _guard = self.op_lock.lock().await;

        let mut quota = self
            .store
            .get_quota(account_id)
            .await?
            .ok_or_else(|| QuotaPlaneError::NoQuota(account_id.to_string()))?;

        let available = quota.effective_remaining_with_virtual();
        if available < estimated_cost_pct {
            return Err(QuotaPlaneError::InsufficientQuota {
                requested: estimated_cost_pct,
                available,
            });
        }

        let ttl = chrono::Duration::from_std(self.config.default_ttl)
            .unwrap_or_else(|_| chrono::Duration::seconds(300));
        let reservation = Reservation::new(
            account_id.clone(),
            estimated_cost_pct,
            correlation_id,
            ttl,
        );

        quota.add_virtual_used(estimated_cost_pct)?;
        self.store.set_quota(quota).await?;
        self.store.set_reservation(reservation.clone()).await?;
        self.counters.created.fetch_add(1, Ordering::Relaxed);

        debug!(
            reservation_id = %reservation.id,
            cost_pct = estimated_cost_pct,
            "reservation created"
        );
        Ok(reservation)
    }

    /// Report the actual cost and release the hold.
    ///
    /// `actual_cost_pct` above the estimate is accepted: overruns are
    /// reported by the caller, not prevented here.
    #[instrument(skip(self), fields(reservation_id = %id))]
    pub async fn release(&self, id: &ReservationId, actual_cost_pct: f64) -> QuotaPlaneResult<()> {
        if !(0.0..=100.0).contains(&actual_cost_pct) {
            return Err(QuotaPlaneError::Validation(format!(
                "actual_cost_pct must be within [0, 100], got {actual_cost_pct}"
            )));
        }
        self.finish(id, ReservationStatus::Released, Some(actual_cost_pct))
            .await
    }

    /// Abandon the hold, crediting the full estimate back.
    #[instrument(skip(self), fields(reservation_id = %id))]
    pub async fn cancel(&self, id: &ReservationId) -> QuotaPlaneResult<()> {
        self.finish(id, ReservationStatus::Cancelled, None).await
    }

    /// Expire the hold after its TTL elapsed. Invoked by the sweep.
    #[instrument(skip(self), fields(reservation_id = %id))]
    pub async fn expire(&self, id: &ReservationId) -> QuotaPlaneResult<()> {
        self.finish(id, ReservationStatus::Expired, None).await
    }

    /// Drive one terminal transition under the operation lock.
    async fn finish(
        &self,
        id: &ReservationId,
        to: ReservationStatus,
        actual_cost_pct: Option<f64>,
    ) -> QuotaPlaneResult<()> {
        let _guard = self.op_lock.lock().await;

        let mut reservation = self
            .store
            .get_reservation(id)
            .await?
            .ok_or_else(|| QuotaPlaneError::ReservationNotFound(id.to_string()))?;

        if !reservation.status.can_transition_to(to) {
            return Err(QuotaPlaneError::InvalidTransition {
                id: id.to_string(),
                status: reservation.status.to_string(),
            });
        }

        match self.store.get_quota(&reservation.account_id).await? {
            Some(mut quota) => {
                quota.release_virtual_used(reservation.estimated_cost_pct);
                if let Some(actual) = actual_cost_pct {
                    quota.add_virtual_used(actual)?;
                }
                self.store.set_quota(quota).await?;
            }
            None => {
                // Cannot happen through the public surface; an administrative
                // write would have to remove the quota record out from under
                // an active reservation.
                warn!(
                    account_id = %reservation.account_id,
                    "quota record missing during terminal transition"
                );
            }
        }

        reservation.status = to;
        if to == ReservationStatus::Released {
            reservation.released_at = Some(Utc::now());
            reservation.actual_cost_pct = actual_cost_pct;
        }
        self.store.set_reservation(reservation).await?;

        let counter = match to {
            ReservationStatus::Released => &self.counters.released,
            ReservationStatus::Cancelled => &self.counters.cancelled,
            ReservationStatus::Expired => &self.counters.expired,
            ReservationStatus::Active => unreachable!("Active is not a terminal state"),
        };
        counter.fetch_add(1, Ordering::Relaxed);

        debug!(status = %to, "reservation finished");
        Ok(())
    }

    /// Expire every active reservation whose TTL has elapsed.
    ///
    /// Idempotent: a second sweep with no time advance expires nothing.
    /// Per-item failures are logged, counted, and skipped.
    pub async fn cleanup_expired(&self) -> QuotaPlaneResult<usize> {
        let now = Utc::now();
        let snapshot = self.store.list_reservations().await?;
        let mut expired = 0;

        for (id, reservation) in snapshot {
            if !reservation.is_active() || !reservation.is_expired_at(now) {
                continue;
            }
            match self.expire(&id).await {
                Ok(()) => expired += 1,
                // Lost the race against a concurrent release/cancel.
                Err(QuotaPlaneError::InvalidTransition { .. }) => {}
                Err(err) => {
                    self.counters.sweep_failures.fetch_add(1, Ordering::Relaxed);
                    warn!(reservation_id = %id, "expiry sweep item failed: {err}");
                }
            }
        }

        Ok(expired)
    }

    /// Cancel every active reservation on shutdown.
    ///
    /// Checks the cancellation token between items; once it fires, the
    /// remaining ids are reported in the partial-failure error.
    pub async fn release_all(&self, token: &CancellationToken) -> QuotaPlaneResult<()> {
        let snapshot = self.store.list_reservations().await?;
        let mut active: Vec<ReservationId> = snapshot
            .into_iter()
            .filter(|(_, r)| r.is_active())
            .map(|(id, _)| id)
            .collect();
        active.sort_by_key(|id| id.to_string());

        let mut failures = Vec::new();
        for (idx, id) in active.iter().enumerate() {
            if token.is_cancelled() {
                for rest in &active[idx..] {
                    failures.push(format!("{rest}: aborted by shutdown deadline"));
                }
                break;
            }
            match self.cancel(id).await {
                Ok(()) => {}
                // Finished concurrently; nothing left to credit.
                Err(QuotaPlaneError::InvalidTransition { .. }) => {}
                Err(err) => failures.push(format!("{id}: {err}")),
            }
        }

        if failures.is_empty() {
            Ok(())
        } else {
            Err(QuotaPlaneError::Partial { failures })
        }
    }

    /// Active reservations held against one account.
    pub async fn get_active_by_account(
        &self,
        account_id: &AccountId,
    ) -> QuotaPlaneResult<Vec<Reservation>> {
        let snapshot = self.store.list_reservations().await?;
        let mut active: Vec<Reservation> = snapshot
            .into_values()
            .filter(|r| r.is_active() && &r.account_id == account_id)
            .collect();
        active.sort_by_key(|r| r.created_at);
        Ok(active)
    }

    /// Sum of estimates currently held against one account.
    pub async fn get_total_reserved_pct(&self, account_id: &AccountId) -> QuotaPlaneResult<f64> {
        let active = self.get_active_by_account(account_id).await?;
        Ok(active.iter().map(|r| r.estimated_cost_pct).sum())
    }

    /// Lifecycle counter snapshot; `active` is read live from the store.
    pub async fn metrics(&self) -> QuotaPlaneResult<ReservationMetrics> {
        let snapshot = self.store.list_reservations().await?;
        let active = snapshot.values().filter(|r| r.is_active()).count() as u64;

        Ok(ReservationMetrics {
            created: self.counters.created.load(Ordering::Relaxed),
            released: self.counters.released.load(Ordering::Relaxed),
            cancelled: self.counters.cancelled.load(Ordering::Relaxed),
            expired: self.counters.expired.load(Ordering::Relaxed),
            active,
            sweep_failures: self.counters.sweep_failures.load(Ordering::Relaxed),
        })
    }

    /// Launch the periodic expiry sweep; exits when the token fires.
    pub fn start_cleanup_routine(
        self: Arc<Self>,
        parent: &CancellationToken,
        interval: Duration,
    ) -> JoinHandle<()> {
        let manager = self;
        let token = parent.child_token();
        let period = interval.max(Duration::from_millis(1));

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = ticker.tick() => {
                        match manager.cleanup_expired().await {
                            Ok(0) => {}
                            Ok(count) => debug!(expired = count, "expiry sweep"),
                            Err(err) => warn!("expiry sweep failed: {err}"),
                        }
                    }
                }
            }
        })
    }

    /// Cadence configured for the expiry sweep.
    pub fn cleanup_interval(&self) -> Duration {
        self.config.cleanup_interval
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use quotaplane_common::Provider;
    use quotaplane_state::{MemoryStore, QuotaInfo};

    async fn manager_with_quota(
        effective: f64,
        ttl: Duration,
    ) -> ReservationManager<MemoryStore> {
        let store = Arc::new(MemoryStore::new());
        store
            .set_quota(QuotaInfo::new("a1", Provider::OpenAi, effective))
            .await
            .unwrap();
        ReservationManager::new(
            store,
            ReservationConfig {
                default_ttl: ttl,
                cleanup_interval: Duration::from_secs(30),
            },
        )
    }

    async fn quota_state(manager: &ReservationManager<MemoryStore>) -> (f64, f64) {
        let quota = manager
            .store
            .get_quota(&"a1".into())
            .await
            .unwrap()
            .unwrap();
        (quota.effective_remaining_pct, quota.virtual_used_pct)
    }

    #[tokio::test]
    async fn test_reserve_release_round_trip() {
        let manager = manager_with_quota(80.0, Duration::from_secs(300)).await;

        let reservation = manager.create(&"a1".into(), 10.0, "c1").await.unwrap();
        assert_eq!(quota_state(&manager).await, (80.0, 10.0));

        manager.release(&reservation.id, 5.0).await.unwrap();
        assert_eq!(quota_state(&manager).await, (80.0, 5.0));

        let stored = manager
            .store
            .get_reservation(&reservation.id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.status, ReservationStatus::Released);
        assert_eq!(stored.actual_cost_pct, Some(5.0));
        assert!(stored.released_at.is_some());
    }

    #[tokio::test]
    async fn test_insufficient_quota_leaves_state_untouched() {
        let manager = manager_with_quota(5.0, Duration::from_secs(300)).await;

        let err = manager.create(&"a1".into(), 10.0, "c2").await.unwrap_err();
        assert!(matches!(
            err,
            QuotaPlaneError::InsufficientQuota {
                requested,
                available
            } if requested == 10.0 && available == 5.0
        ));

        assert_eq!(quota_state(&manager).await, (5.0, 0.0));
        assert!(manager.store.list_reservations().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_no_quota_for_unknown_account() {
        let manager = manager_with_quota(80.0, Duration::from_secs(300)).await;
        let err = manager
            .create(&"unknown".into(), 10.0, "c3")
            .await
            .unwrap_err();
        assert!(matches!(err, QuotaPlaneError::NoQuota(_)));
    }

    #[tokio::test]
    async fn test_estimate_boundaries() {
        let manager = manager_with_quota(100.0, Duration::from_secs(300)).await;

        // Zero-cost hold succeeds and consumes nothing.
        manager.create(&"a1".into(), 0.0, "c-zero").await.unwrap();
        assert_eq!(quota_state(&manager).await, (100.0, 0.0));

        // Full-budget hold succeeds only while headroom is exactly 100.
        manager.create(&"a1".into(), 100.0, "c-full").await.unwrap();
        assert_eq!(quota_state(&manager).await, (100.0, 100.0));

        let err = manager.create(&"a1".into(), 100.0, "c-again").await.unwrap_err();
        assert!(matches!(err, QuotaPlaneError::InsufficientQuota { .. }));
    }

    #[tokio::test]
    async fn test_estimate_range_validation() {
        let manager = manager_with_quota(80.0, Duration::from_secs(300)).await;

        for bad in [-0.1, 100.1] {
            let err = manager.create(&"a1".into(), bad, "c4").await.unwrap_err();
            assert!(matches!(err, QuotaPlaneError::Validation(_)));
        }

        let err = manager.create(&"a1".into(), 10.0, "").await.unwrap_err();
        assert!(matches!(err, QuotaPlaneError::Validation(_)));
    }

    #[tokio::test]
    async fn test_release_overrun_accepted() {
        let manager = manager_with_quota(80.0, Duration::from_secs(300)).await;
        let reservation = manager.create(&"a1".into(), 10.0, "c5").await.unwrap();

        // Actual above the estimate is the caller reporting an overrun.
        manager.release(&reservation.id, 25.0).await.unwrap();
        assert_eq!(quota_state(&manager).await, (80.0, 25.0));
    }

    #[tokio::test]
    async fn test_release_terminal_is_invalid_transition() {
        let manager = manager_with_quota(80.0, Duration::from_secs(300)).await;
        let reservation = manager.create(&"a1".into(), 10.0, "c6").await.unwrap();
        manager.release(&reservation.id, 5.0).await.unwrap();

        let err = manager.release(&reservation.id, 3.0).await.unwrap_err();
        assert!(matches!(err, QuotaPlaneError::InvalidTransition { .. }));

        // State unchanged by the rejected transition.
        assert_eq!(quota_state(&manager).await, (80.0, 5.0));
        let stored = manager
            .store
            .get_reservation(&reservation.id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.actual_cost_pct, Some(5.0));
    }

    #[tokio::test]
    async fn test_cancel_credits_estimate_only() {
        let manager = manager_with_quota(80.0, Duration::from_secs(300)).await;
        let reservation = manager.create(&"a1".into(), 15.0, "c7").await.unwrap();

        manager.cancel(&reservation.id).await.unwrap();

        assert_eq!(quota_state(&manager).await, (80.0, 0.0));
        let stored = manager
            .store
            .get_reservation(&reservation.id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.status, ReservationStatus::Cancelled);
        assert!(stored.actual_cost_pct.is_none());
        assert!(stored.released_at.is_none());
    }

    #[tokio::test]
    async fn test_release_unknown_reservation() {
        let manager = manager_with_quota(80.0, Duration::from_secs(300)).await;
        let err = manager
            .release(&ReservationId::new(), 5.0)
            .await
            .unwrap_err();
        assert!(matches!(err, QuotaPlaneError::ReservationNotFound(_)));
    }

    #[tokio::test]
    async fn test_ttl_expiry_sweep() {
        let manager = manager_with_quota(80.0, Duration::from_millis(100)).await;
        let reservation = manager.create(&"a1".into(), 10.0, "c8").await.unwrap();
        assert_eq!(quota_state(&manager).await, (80.0, 10.0));

        tokio::time::sleep(Duration::from_millis(150)).await;

        assert_eq!(manager.cleanup_expired().await.unwrap(), 1);
        assert_eq!(quota_state(&manager).await, (80.0, 0.0));

        let stored = manager
            .store
            .get_reservation(&reservation.id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.status, ReservationStatus::Expired);

        // Idempotent with no time advance.
        assert_eq!(manager.cleanup_expired().await.unwrap(), 0);
        assert_eq!(quota_state(&manager).await, (80.0, 0.0));
    }

    #[tokio::test]
    async fn test_sweep_ignores_unexpired_and_terminal() {
        let manager = manager_with_quota(80.0, Duration::from_secs(300)).await;
        let kept = manager.create(&"a1".into(), 5.0, "c9").await.unwrap();
        let cancelled = manager.create(&"a1".into(), 5.0, "c10").await.unwrap();
        manager.cancel(&cancelled.id).await.unwrap();

        assert_eq!(manager.cleanup_expired().await.unwrap(), 0);
        let stored = manager
            .store
            .get_reservation(&kept.id)
            .await
            .unwrap()
            .unwrap();
        assert!(stored.is_active());
    }

    #[tokio::test]
    async fn test_active_by_account_excludes_terminal() {
        let manager = manager_with_quota(80.0, Duration::from_secs(300)).await;
        let first = manager.create(&"a1".into(), 5.0, "c11").await.unwrap();
        let second = manager.create(&"a1".into(), 7.0, "c12").await.unwrap();
        manager.release(&first.id, 5.0).await.unwrap();

        let active = manager.get_active_by_account(&"a1".into()).await.unwrap();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].id, second.id);
        assert_eq!(
            manager.get_total_reserved_pct(&"a1".into()).await.unwrap(),
            7.0
        );
    }

    #[tokio::test]
    async fn test_release_all_cancels_active() {
        let manager = manager_with_quota(80.0, Duration::from_secs(300)).await;
        manager.create(&"a1".into(), 5.0, "c13").await.unwrap();
        manager.create(&"a1".into(), 7.0, "c14").await.unwrap();

        let token = CancellationToken::new();
        manager.release_all(&token).await.unwrap();

        assert_eq!(quota_state(&manager).await, (80.0, 0.0));
        let metrics = manager.metrics().await.unwrap();
        assert_eq!(metrics.active, 0);
        assert_eq!(metrics.cancelled, 2);
    }

    #[tokio::test]
    async fn test_release_all_aborts_on_cancellation() {
        let manager = manager_with_quota(80.0, Duration::from_secs(300)).await;
        manager.create(&"a1".into(), 5.0, "c15").await.unwrap();
        manager.create(&"a1".into(), 7.0, "c16").await.unwrap();

        let token = CancellationToken::new();
        token.cancel();

        let err = manager.release_all(&token).await.unwrap_err();
        match err {
            QuotaPlaneError::Partial { failures } => assert_eq!(failures.len(), 2),
            other => panic!("expected Partial, got {other}"),
        }

        // Nothing was cancelled once the deadline had already passed.
        assert_eq!(manager.metrics().await.unwrap().active, 2);
    }

    #[tokio::test]
    async fn test_metrics_counters() {
        let manager = manager_with_quota(80.0, Duration::from_millis(50)).await;
        let released = manager.create(&"a1".into(), 5.0, "c17").await.unwrap();
        let cancelled = manager.create(&"a1".into(), 5.0, "c18").await.unwrap();
        manager.create(&"a1".into(), 5.0, "c19").await.unwrap();

        manager.release(&released.id, 2.0).await.unwrap();
        manager.cancel(&cancelled.id).await.unwrap();
        tokio::time::sleep(Duration::from_millis(80)).await;
        manager.cleanup_expired().await.unwrap();

        let metrics = manager.metrics().await.unwrap();
        assert_eq!(metrics.created, 3);
        assert_eq!(metrics.released, 1);
        assert_eq!(metrics.cancelled, 1);
        assert_eq!(metrics.expired, 1);
        assert_eq!(metrics.active, 0);
        assert_eq!(metrics.sweep_failures, 0);
    }

    #[tokio::test]
    async fn test_cleanup_routine_expires_in_background() {
        let store = Arc::new(MemoryStore::new());
        store
            .set_quota(QuotaInfo::new("a1", Provider::OpenAi, 80.0))
            .await
            .unwrap();
        let manager = Arc::new(ReservationManager::new(
            store,
            ReservationConfig {
                default_ttl: Duration::from_millis(50),
                cleanup_interval: Duration::from_millis(20),
            },
        ));

        let token = CancellationToken::new();
        let handle = Arc::clone(&manager).start_cleanup_routine(&token, Duration::from_millis(20));

        manager.create(&"a1".into(), 10.0, "c20").await.unwrap();
        tokio::time::sleep(Duration::from_millis(150)).await;

        assert_eq!(manager.metrics().await.unwrap().expired, 1);

        token.cancel();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn test_concurrent_operations_preserve_accounting() {
        let store = Arc::new(MemoryStore::new());
        store
            .set_quota(QuotaInfo::new("a1", Provider::OpenAi, 100.0))
            .await
            .unwrap();
        let manager = Arc::new(ReservationManager::with_defaults(store));

        let mut handles = Vec::new();
        for i in 0..8 {
            let manager = Arc::clone(&manager);
            handles.push(tokio::spawn(async move {
                let reservation = manager
                    .create(&"a1".into(), 2.0, &format!("corr-{i}"))
                    .await
                    .unwrap();
                if i % 2 == 0 {
                    manager.cancel(&reservation.id).await.unwrap();
                } else {
                    manager.release(&reservation.id, 1.0).await.unwrap();
                }
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        // 4 cancels credit fully; 4 releases convert 2% holds into 1% actuals.
        let quota = manager
            .store
            .get_quota(&"a1".into())
            .await
            .unwrap()
            .unwrap();
        assert!((quota.virtual_used_pct - 4.0).abs() < 1e-9);
        assert_eq!(manager.metrics().await.unwrap().active, 0);
    }
}
