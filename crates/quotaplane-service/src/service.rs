//! Control-plane facade and lifecycle sequencing.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument, warn};

use quotaplane_common::{
    config::QuotaPlaneConfig, health_check, AccountId, HealthResponse, QuotaPlaneError,
    QuotaPlaneResult, ReservationId,
};
use quotaplane_reservations::{ReservationConfig, ReservationManager, ReservationMetrics};
use quotaplane_routing::{
    FeedbackReport, RoutePolicy, Router, RouterConfig, SelectRequest, SelectResponse,
};
use quotaplane_state::{
    collector::CollectorConfig, CollectorMetrics, PassiveCollector, QuotaInfo, Reservation,
    StateStore,
};

use crate::api::{CreateReservationRequest, IngestRequest, ReleaseReservationRequest,
    ReservationCreated};

/// Main entry point for the control plane.
///
/// Owns every core component and exposes the typed operation surface a
/// transport layer wraps. Nothing in the core references the facade back;
/// the dependency graph stays a DAG rooted at the store.
#[derive(Debug)]
pub struct ControlPlane<S> {
    store: Arc<S>,
    router: Arc<Router<S>>,
    reservations: Arc<ReservationManager<S>>,
    collector: Arc<PassiveCollector<S>>,
    root_token: CancellationToken,
    sweeper: tokio::sync::Mutex<Option<JoinHandle<()>>>,
    accepting: AtomicBool,
    cleanup_interval: Duration,
}

impl<S: StateStore + Send + Sync + 'static> ControlPlane<S> {
    /// Assemble a control plane from loaded configuration.
    pub fn new(store: Arc<S>, config: &QuotaPlaneConfig) -> QuotaPlaneResult<Self> {
        let default_policy: RoutePolicy = config
            .router
            .default_policy
            .parse()
            .map_err(QuotaPlaneError::Configuration)?;

        let router = Router::new(
            Arc::clone(&store),
            RouterConfig {
                default_policy,
                throttle_penalty: config.router.throttle_penalty,
                max_alternatives: config.router.max_alternatives,
            },
        );
        let reservations = ReservationManager::new(
            Arc::clone(&store),
            ReservationConfig {
                default_ttl: Duration::from_secs(config.reservations.default_ttl_secs),
                cleanup_interval: Duration::from_secs(config.reservations.cleanup_interval_secs),
            },
        );
        let collector = PassiveCollector::new(
            Arc::clone(&store),
            CollectorConfig {
                queue_capacity: config.collector.queue_capacity,
                drain_interval: Duration::from_millis(config.collector.drain_interval_ms),
            },
        );

        Ok(Self {
            cleanup_interval: reservations.cleanup_interval(),
            router: Arc::new(router),
            reservations: Arc::new(reservations),
            collector: Arc::new(collector),
            store,
            root_token: CancellationToken::new(),
            sweeper: tokio::sync::Mutex::new(None),
            accepting: AtomicBool::new(true),
        })
    }

    /// Assemble a control plane with default configuration.
    pub fn with_defaults(store: Arc<S>) -> Self {
        let router = Router::with_defaults(Arc::clone(&store));
        let reservations = ReservationManager::with_defaults(Arc::clone(&store));
        let collector = PassiveCollector::with_defaults(Arc::clone(&store));

        Self {
            cleanup_interval: reservations.cleanup_interval(),
            router: Arc::new(router),
            reservations: Arc::new(reservations),
            collector: Arc::new(collector),
            store,
            root_token: CancellationToken::new(),
            sweeper: tokio::sync::Mutex::new(None),
            accepting: AtomicBool::new(true),
        }
    }

    /// Launch the background sweep and the collector drain task.
    pub async fn start(&self) -> QuotaPlaneResult<()> {
        let mut sweeper = self.sweeper.lock().await;
        if sweeper.is_none() {
            *sweeper = Some(
                Arc::clone(&self.reservations)
                    .start_cleanup_routine(&self.root_token, self.cleanup_interval),
            );
        }
        drop(sweeper);

        self.collector.start(&self.root_token).await?;
        info!("control plane started");
        Ok(())
    }

    /// `router.select`: pick an account for the request.
    #[instrument(skip(self, request))]
    pub async fn select(&self, request: &SelectRequest) -> QuotaPlaneResult<SelectResponse> {
        if !self.accepting.load(Ordering::Acquire) {
            return Err(QuotaPlaneError::closed("control plane"));
        }
        self.router.select(request).await
    }

    /// `router.feedback`: report the outcome of a routed request.
    pub fn feedback(&self, report: &FeedbackReport) -> QuotaPlaneResult<()> {
        self.router.report_feedback(report)
    }

    /// `router.distribution`: normalized allocation over the current pool.
    pub async fn distribution(&self, total: f64) -> QuotaPlaneResult<HashMap<AccountId, f64>> {
        self.router.calculate_optimal_distribution(total).await
    }

    /// `quotas.list`: snapshot of every quota record, ordered by account.
    pub async fn list_quotas(&self) -> QuotaPlaneResult<Vec<QuotaInfo>> {
        let mut quotas: Vec<QuotaInfo> = self.store.list_quotas().await?.into_values().collect();
        quotas.sort_by(|a, b| a.account_id.cmp(&b.account_id));
        Ok(quotas)
    }

    /// `quotas.get`: quota record for one account.
    pub async fn get_quota(&self, account_id: &AccountId) -> QuotaPlaneResult<QuotaInfo> {
        self.store
            .get_quota(account_id)
            .await?
            .ok_or_else(|| QuotaPlaneError::NoQuota(account_id.to_string()))
    }

    /// `reservations.create`: place a hold against an account's budget.
    #[instrument(skip(self, request), fields(account_id = %request.account_id))]
    pub async fn create_reservation(
        &self,
        request: CreateReservationRequest,
    ) -> QuotaPlaneResult<ReservationCreated> {
        if !self.accepting.load(Ordering::Acquire) {
            return Err(QuotaPlaneError::closed("control plane"));
        }
        let reservation = self
            .reservations
            .create(
                &request.account_id,
                request.estimated_cost_pct,
                &request.correlation_id,
            )
            .await?;
        Ok(ReservationCreated::from(reservation))
    }

    /// `reservations.release`: report actual cost and release the hold.
    pub async fn release_reservation(
        &self,
        request: ReleaseReservationRequest,
    ) -> QuotaPlaneResult<()> {
        self.reservations
            .release(&request.id, request.actual_cost_pct)
            .await
    }

    /// `reservations.cancel`: abandon the hold.
    pub async fn cancel_reservation(&self, id: &ReservationId) -> QuotaPlaneResult<()> {
        self.reservations.cancel(id).await
    }

    /// `reservations.get`: fetch one reservation.
    pub async fn get_reservation(&self, id: &ReservationId) -> QuotaPlaneResult<Reservation> {
        self.store
            .get_reservation(id)
            .await?
            .ok_or_else(|| QuotaPlaneError::ReservationNotFound(id.to_string()))
    }

    /// `ingest`: accept an externally observed quota snapshot.
    pub async fn ingest(&self, request: IngestRequest) -> QuotaPlaneResult<()> {
        self.collector.ingest(request.into()).await
    }

    /// `health`: overall status plus the router's routable flag.
    pub async fn health(&self) -> HealthResponse {
        health_check(self.router.is_healthy().await)
    }

    /// Reservation lifecycle counters.
    pub async fn reservation_metrics(&self) -> QuotaPlaneResult<ReservationMetrics> {
        self.reservations.metrics().await
    }

    /// Collector counters.
    pub fn collector_metrics(&self) -> CollectorMetrics {
        self.collector.metrics()
    }

    /// The reservation manager, for callers needing direct access.
    pub fn reservations(&self) -> &Arc<ReservationManager<S>> {
        &self.reservations
    }

    /// The router, for callers needing direct access.
    pub fn router(&self) -> &Arc<Router<S>> {
        &self.router
    }

    /// Graceful shutdown: stop accepting selections, cancel active holds,
    /// drain the collector, close router and store.
    ///
    /// `deadline` bounds the whole sequence; each failed step is collected
    /// and the aggregate is returned as one `Partial` error. Idempotent.
    #[instrument(skip(self, deadline))]
    pub async fn shutdown(&self, deadline: &CancellationToken) -> QuotaPlaneResult<()> {
        if !self.accepting.swap(false, Ordering::AcqRel) {
            return Ok(());
        }

        let mut failures = Vec::new();

        if let Err(err) = self.reservations.release_all(deadline).await {
            failures.push(format!("release_all: {err}"));
        }
        if let Err(err) = self.collector.stop().await {
            failures.push(format!("collector: {err}"));
        }

        self.root_token.cancel();
        if let Some(handle) = self.sweeper.lock().await.take() {
            if let Err(err) = handle.await {
                failures.push(format!("sweeper: {err}"));
            }
        }

        self.router.close();
        if let Err(err) = self.store.close().await {
            failures.push(format!("store: {err}"));
        }

        if failures.is_empty() {
            info!("control plane shut down");
            Ok(())
        } else {
            warn!(failed_steps = failures.len(), "control plane shut down with failures");
            Err(QuotaPlaneError::Partial { failures })
        }
    }
}
