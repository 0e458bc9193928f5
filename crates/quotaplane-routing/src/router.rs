//! Account selection under named scoring policies.

use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering as AtomicOrdering};
use std::sync::{Arc, Mutex, RwLock};

use serde::{Deserialize, Serialize};
use tracing::{debug, instrument, warn};

use quotaplane_common::{
    AccountId, DimensionType, Provider, QuotaPlaneError, QuotaPlaneResult, ReservationId,
};
use quotaplane_state::StateStore;

use crate::anomaly::{assess_shadow_ban_risk, AnomalyDetector, AnomalySample, Baseline};
use crate::policy::{
    normalize, RoutePolicy, BALANCED_PRIORITY_WEIGHT, BALANCED_REMAINING_WEIGHT,
    BALANCED_THROTTLE_WEIGHT,
};

/// Latency samples kept per account for the p95 window.
const RECENT_WINDOW: usize = 100;

/// Configuration for the router.
#[derive(Debug, Clone)]
pub struct RouterConfig {
    /// Policy applied when a request names none.
    pub default_policy: RoutePolicy,
    /// Multiplier applied to the score of throttled or shadow-banned
    /// candidates re-admitted because every candidate was flagged.
    pub throttle_penalty: f64,
    /// Maximum number of alternative ids returned per selection.
    pub max_alternatives: usize,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            default_policy: RoutePolicy::Balanced,
            throttle_penalty: 0.5,
            max_alternatives: 3,
        }
    }
}

/// A routing request.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SelectRequest {
    /// Restrict to a specific provider; `None` means any.
    #[serde(default)]
    pub provider: Option<Provider>,
    /// Dimensions a candidate's quota must declare with headroom.
    #[serde(default)]
    pub required_dimensions: Vec<DimensionType>,
    /// Estimated cost of the request, as a percentage of an account budget.
    #[serde(default)]
    pub estimated_cost: Option<f64>,
    /// Estimated token volume; informational.
    #[serde(default)]
    pub estimated_tokens: Option<u64>,
    /// Scoring policy; defaults to the router's configured policy.
    #[serde(default)]
    pub policy: Option<RoutePolicy>,
    /// Accounts to skip regardless of score.
    #[serde(default)]
    pub exclude_accounts: Vec<AccountId>,
    /// Providers to skip regardless of score.
    #[serde(default)]
    pub exclude_providers: Vec<Provider>,
}

/// The selected account with its score and runners-up.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SelectResponse {
    /// Chosen account.
    pub account_id: AccountId,
    /// Provider of the chosen account.
    pub provider: Provider,
    /// Score under the applied policy.
    pub score: f64,
    /// Dominant factor behind the choice.
    pub reason: String,
    /// Next-best candidates, best first.
    pub alternative_ids: Vec<AccountId>,
}

/// Outcome report for a routed request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeedbackReport {
    /// Account the request was routed to.
    pub account_id: AccountId,
    /// Reservation held for the request, when one was created.
    #[serde(default)]
    pub reservation_id: Option<ReservationId>,
    /// Actual cost reported by the caller; informational here.
    #[serde(default)]
    pub actual_cost_pct: Option<f64>,
    /// Whether the upstream call succeeded.
    pub success: bool,
    /// Upstream error message, if any.
    #[serde(default)]
    pub error: Option<String>,
    /// Observed latency of the upstream call.
    #[serde(default)]
    pub latency_ms: Option<f64>,
    /// Whether the upstream call timed out.
    #[serde(default)]
    pub timed_out: bool,
}

#[derive(Debug, Clone, Default)]
struct AccountHealth {
    baseline: Baseline,
    recent_latencies: Vec<f64>,
    consecutive_errors: u32,
    error_count: u64,
    success_count: u64,
    shadow_banned: bool,
}

impl AccountHealth {
    fn error_rate(&self) -> f64 {
        let total = self.error_count + self.success_count;
        if total == 0 {
            0.0
        } else {
            self.error_count as f64 / total as f64
        }
    }
}

/// An account that survived candidate filtering.
struct Candidate {
    id: AccountId,
    provider: Provider,
    priority: i32,
    headroom: f64,
    max_dim_remaining: i64,
    is_throttled: bool,
    /// Re-admitted despite being throttled or shadow-banned.
    penalized: bool,
}

/// A scored candidate, ready for ranking.
struct Scored {
    id: AccountId,
    provider: Provider,
    priority: i32,
    headroom: f64,
    max_dim_remaining: i64,
    score: f64,
    reason: String,
}

/// Quota-aware account selection over the store's snapshot API.
///
/// `select` is reentrant: it reads store snapshots without holding router
/// locks, except for the short critical section that advances round-robin
/// state.
#[derive(Debug)]
pub struct Router<S> {
    store: Arc<S>,
    config: RouterConfig,
    detector: AnomalyDetector,
    /// Last selection per provider filter, for round-robin rotation.
    last_selected: Mutex<HashMap<String, AccountId>>,
    health: RwLock<HashMap<AccountId, AccountHealth>>,
    closed: AtomicBool,
}

impl<S: StateStore + Send + Sync + 'static> Router<S> {
    /// Create a router with the given configuration.
    pub fn new(store: Arc<S>, config: RouterConfig) -> Self {
        Self {
            store,
            config,
            detector: AnomalyDetector::default(),
            last_selected: Mutex::new(HashMap::new()),
            health: RwLock::new(HashMap::new()),
            closed: AtomicBool::new(false),
        }
    }

    /// Create a router with default configuration.
    pub fn with_defaults(store: Arc<S>) -> Self {
        Self::new(store, RouterConfig::default())
    }

    /// Select the best account for the request under the applied policy.
    #[instrument(skip(self, request))]
    pub async fn select(&self, request: &SelectRequest) -> QuotaPlaneResult<SelectResponse> {
        if self.closed.load(AtomicOrdering::Acquire) {
            return Err(QuotaPlaneError::closed("router"));
        }

        let policy = request.policy.unwrap_or(self.config.default_policy);
        let candidates = self.collect_candidates(request).await?;
        if candidates.is_empty() {
            return Err(QuotaPlaneError::NoCandidate(no_candidate_reason(request)));
        }

        let ranked = if policy == RoutePolicy::RoundRobin {
            self.rank_round_robin(candidates, request)
        } else {
            rank_scored(candidates, policy, self.config.throttle_penalty)
        };

        let winner = &ranked[0];
        self.record_switch(rotation_key(request.provider), &winner.id);

        let alternative_ids = ranked[1..]
            .iter()
            .take(self.config.max_alternatives)
            .map(|s| s.id.clone())
            .collect();

        debug!(account_id = %winner.id, policy = %policy, score = winner.score, "account selected");
        Ok(SelectResponse {
            account_id: winner.id.clone(),
            provider: winner.provider,
            score: winner.score,
            reason: winner.reason.clone(),
            alternative_ids,
        })
    }

    /// Normalized allocation proportional to priority-weighted headroom.
    ///
    /// Zero-headroom accounts are omitted; the returned shares sum to
    /// `total`.
    pub async fn calculate_optimal_distribution(
        &self,
        total: f64,
    ) -> QuotaPlaneResult<HashMap<AccountId, f64>> {
        if self.closed.load(AtomicOrdering::Acquire) {
            return Err(QuotaPlaneError::closed("router"));
        }

        let candidates = self.collect_candidates(&SelectRequest::default()).await?;
        let weights: Vec<(AccountId, f64)> = candidates
            .into_iter()
            .filter(|c| c.headroom > 0.0)
            .map(|c| {
                let priority_weight = f64::from(c.priority.max(0)) + 1.0;
                (c.id, c.headroom * priority_weight)
            })
            .collect();

        let sum: f64 = weights.iter().map(|(_, w)| w).sum();
        if sum <= 0.0 {
            return Ok(HashMap::new());
        }

        Ok(weights
            .into_iter()
            .map(|(id, weight)| (id, total * weight / sum))
            .collect())
    }

    /// Whether at least one enabled account still has headroom.
    pub async fn is_healthy(&self) -> bool {
        if self.closed.load(AtomicOrdering::Acquire) {
            return false;
        }
        let (Ok(accounts), Ok(quotas)) = (
            self.store.list_accounts().await,
            self.store.list_quotas().await,
        ) else {
            return false;
        };

        accounts.values().any(|account| {
            account.enabled
                && quotas
                    .get(&account.id)
                    .is_some_and(|q| q.effective_remaining_with_virtual() > 0.0)
        })
    }

    /// Record the outcome of a routed request.
    ///
    /// Updates the account's baseline and error history, runs the anomaly
    /// detector, and re-evaluates shadow-ban risk.
    #[instrument(skip(self, report), fields(account_id = %report.account_id))]
    pub fn report_feedback(&self, report: &FeedbackReport) -> QuotaPlaneResult<()> {
        if self.closed.load(AtomicOrdering::Acquire) {
            return Err(QuotaPlaneError::closed("router"));
        }
        if report.account_id.is_empty() {
            return Err(QuotaPlaneError::Validation(
                "account_id must be non-empty".to_string(),
            ));
        }
        if let Some(actual) = report.actual_cost_pct {
            if !(0.0..=100.0).contains(&actual) {
                return Err(QuotaPlaneError::Validation(format!(
                    "actual_cost_pct must be within [0, 100], got {actual}"
                )));
            }
        }

        let mut health = self
            .health
            .write()
            .map_err(|_| QuotaPlaneError::Internal("router health lock poisoned".to_string()))?;
        let entry = health.entry(report.account_id.clone()).or_default();

        if report.success && !report.timed_out {
            entry.success_count += 1;
            entry.consecutive_errors = 0;
            if let Some(latency) = report.latency_ms {
                entry.baseline.observe(latency);
                entry.recent_latencies.push(latency);
                if entry.recent_latencies.len() > RECENT_WINDOW {
                    entry.recent_latencies.remove(0);
                }
                entry.baseline.p95_latency_ms = p95(&entry.recent_latencies);
            }
        } else {
            entry.error_count += 1;
            entry.consecutive_errors += 1;
        }

        let sample = AnomalySample {
            latency_ms: report.latency_ms.unwrap_or_default(),
            error_rate: entry.error_rate(),
            timeout_count: u32::from(report.timed_out),
        };
        let anomalies = self.detector.detect(&entry.baseline, &sample);
        for anomaly in &anomalies {
            debug!(kind = ?anomaly.kind, "{}", anomaly.detail);
        }

        let degradation = if entry.baseline.avg_latency_ms > 0.0 && sample.latency_ms > 0.0 {
            sample.latency_ms / entry.baseline.avg_latency_ms
        } else {
            1.0
        };
        let risk = assess_shadow_ban_risk(
            entry.consecutive_errors,
            entry.error_rate(),
            degradation,
            entry.baseline.sample_count,
        );
        let was_banned = entry.shadow_banned;
        entry.shadow_banned = risk.is_shadow_banned();
        if entry.shadow_banned && !was_banned {
            warn!(risk = %risk, "account flagged as shadow-banned");
        }

        Ok(())
    }

    /// Baseline statistics for an account, if any feedback was recorded.
    pub fn baseline(&self, account_id: &AccountId) -> Option<Baseline> {
        let health = self.health.read().ok()?;
        health.get(account_id).map(|h| h.baseline)
    }

    /// Whether feedback has flagged the account as shadow-banned.
    pub fn is_shadow_banned(&self, account_id: &AccountId) -> bool {
        self.health
            .read()
            .ok()
            .and_then(|h| h.get(account_id).map(|h| h.shadow_banned))
            .unwrap_or(false)
    }

    /// Last account selected for the given provider filter.
    pub fn last_selected(&self, provider: Option<Provider>) -> Option<AccountId> {
        let last = self.last_selected.lock().ok()?;
        last.get(&rotation_key(provider)).cloned()
    }

    /// Release router state; idempotent.
    pub fn close(&self) {
        self.closed.store(true, AtomicOrdering::Release);
    }

    async fn collect_candidates(
        &self,
        request: &SelectRequest,
    ) -> QuotaPlaneResult<Vec<Candidate>> {
        let accounts = self.store.list_accounts().await?;
        let quotas = self.store.list_quotas().await?;

        let excluded_accounts: HashSet<&AccountId> = request.exclude_accounts.iter().collect();
        let excluded_providers: HashSet<&Provider> = request.exclude_providers.iter().collect();
        let shadow_banned: HashSet<AccountId> = match self.health.read() {
            Ok(health) => health
                .iter()
                .filter(|(_, h)| h.shadow_banned)
                .map(|(id, _)| id.clone())
                .collect(),
            Err(_) => HashSet::new(),
        };

        let mut clean = Vec::new();
        let mut flagged = Vec::new();
        for (id, account) in accounts {
            if !account.enabled {
                continue;
            }
            if let Some(provider) = request.provider {
                if account.provider != provider {
                    continue;
                }
            }
            if excluded_accounts.contains(&id) || excluded_providers.contains(&account.provider) {
                continue;
            }
            let Some(quota) = quotas.get(&id) else {
                continue;
            };
            let headroom = quota.effective_remaining_with_virtual();
            if headroom < request.estimated_cost.unwrap_or(0.0) {
                continue;
            }
            if request
                .required_dimensions
                .iter()
                .any(|kind| !quota.has_dimension_headroom(*kind))
            {
                continue;
            }

            let candidate = Candidate {
                id: id.clone(),
                provider: account.provider,
                priority: account.priority,
                headroom,
                max_dim_remaining: quota.max_dimension_remaining(),
                is_throttled: quota.is_throttled,
                penalized: false,
            };
            if quota.is_throttled || shadow_banned.contains(&id) {
                flagged.push(candidate);
            } else {
                clean.push(candidate);
            }
        }

        if clean.is_empty() {
            // Every survivor is throttled or shadow-banned: re-admit them
            // with a score penalty rather than fail the request outright.
            for candidate in &mut flagged {
                candidate.penalized = true;
            }
            Ok(flagged)
        } else {
            Ok(clean)
        }
    }

    fn rank_round_robin(
        &self,
        candidates: Vec<Candidate>,
        request: &SelectRequest,
    ) -> Vec<Scored> {
        let mut order: Vec<Scored> = candidates
            .into_iter()
            .map(|c| {
                let score = if c.penalized {
                    self.config.throttle_penalty
                } else {
                    1.0
                };
                Scored {
                    score,
                    reason: "round_robin: next in rotation".to_string(),
                    id: c.id,
                    provider: c.provider,
                    priority: c.priority,
                    headroom: c.headroom,
                    max_dim_remaining: c.max_dim_remaining,
                }
            })
            .collect();
        order.sort_by(|a, b| a.id.cmp(&b.id));

        let start = {
            let last = self
                .last_selected
                .lock()
                .ok()
                .and_then(|m| m.get(&rotation_key(request.provider)).cloned());
            match last {
                Some(last) => order
                    .iter()
                    .position(|s| s.id == last)
                    .map(|i| (i + 1) % order.len())
                    .unwrap_or(0),
                None => 0,
            }
        };
        order.rotate_left(start);
        order
    }

    fn record_switch(&self, key: String, id: &AccountId) {
        if let Ok(mut last) = self.last_selected.lock() {
            last.insert(key, id.clone());
        }
    }
}

fn rank_scored(candidates: Vec<Candidate>, policy: RoutePolicy, penalty: f64) -> Vec<Scored> {
    let (mut min_headroom, mut max_headroom) = (f64::MAX, f64::MIN);
    let (mut min_priority, mut max_priority) = (i32::MAX, i32::MIN);
    let mut total_headroom = 0.0;
    for c in &candidates {
        min_headroom = min_headroom.min(c.headroom);
        max_headroom = max_headroom.max(c.headroom);
        min_priority = min_priority.min(c.priority);
        max_priority = max_priority.max(c.priority);
        total_headroom += c.headroom;
    }

    let mut scored: Vec<Scored> = candidates
        .into_iter()
        .map(|c| {
            let (score, reason) = match policy {
                RoutePolicy::LowestUsage => (
                    c.headroom / 100.0,
                    format!("lowest_usage: {:.1}% headroom", c.headroom),
                ),
                RoutePolicy::HighestQuota => (
                    c.headroom / 100.0,
                    format!(
                        "highest_quota: {:.1}% headroom, max dimension remaining {}",
                        c.headroom, c.max_dim_remaining
                    ),
                ),
                RoutePolicy::Priority => (
                    normalize(
                        f64::from(c.priority),
                        f64::from(min_priority),
                        f64::from(max_priority),
                    ),
                    format!("priority: {}", c.priority),
                ),
                RoutePolicy::Weighted => {
                    let share = if total_headroom > 0.0 {
                        c.headroom / total_headroom
                    } else {
                        0.0
                    };
                    (
                        share,
                        format!("weighted: {:.1}% of pool headroom", share * 100.0),
                    )
                }
                RoutePolicy::Balanced => {
                    let blend = BALANCED_REMAINING_WEIGHT
                        * normalize(c.headroom, min_headroom, max_headroom)
                        + BALANCED_PRIORITY_WEIGHT
                            * normalize(
                                f64::from(c.priority),
                                f64::from(min_priority),
                                f64::from(max_priority),
                            )
                        + BALANCED_THROTTLE_WEIGHT * if c.is_throttled { 0.0 } else { 1.0 };
                    (
                        blend,
                        format!(
                            "balanced: {:.1}% headroom, priority {}",
                            c.headroom, c.priority
                        ),
                    )
                }
                RoutePolicy::RoundRobin => unreachable!("round_robin ranks by rotation"),
            };

            let (score, reason) = if c.penalized {
                (
                    score * penalty,
                    format!("{reason}; throttled re-admitted with penalty"),
                )
            } else {
                (score, reason)
            };

            Scored {
                id: c.id,
                provider: c.provider,
                priority: c.priority,
                headroom: c.headroom,
                max_dim_remaining: c.max_dim_remaining,
                score,
                reason,
            }
        })
        .collect();

    scored.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(Ordering::Equal)
            .then_with(|| match policy {
                RoutePolicy::HighestQuota => b.max_dim_remaining.cmp(&a.max_dim_remaining),
                RoutePolicy::Priority => {
                    b.headroom.partial_cmp(&a.headroom).unwrap_or(Ordering::Equal)
                }
                _ => Ordering::Equal,
            })
            .then_with(|| b.priority.cmp(&a.priority))
            .then_with(|| a.id.cmp(&b.id))
    });
    scored
}

fn rotation_key(provider: Option<Provider>) -> String {
    provider
        .map(|p| p.as_str().to_string())
        .unwrap_or_else(|| "*".to_string())
}

fn no_candidate_reason(request: &SelectRequest) -> String {
    match request.provider {
        Some(provider) => format!("no eligible account for provider {provider}"),
        None => "no eligible account in the pool".to_string(),
    }
}

fn p95(samples: &[f64]) -> f64 {
    if samples.is_empty() {
        return 0.0;
    }
    let mut sorted = samples.to_vec();
    sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(Ordering::Equal));
    let idx = ((sorted.len() as f64) * 0.95).ceil() as usize;
    sorted[idx.saturating_sub(1).min(sorted.len() - 1)]
}

#[cfg(test)]
mod tests {
    use super::*;
    use quotaplane_common::QuotaDimension;
    use quotaplane_state::{Account, MemoryStore, QuotaInfo};

    async fn seeded_router() -> Router<MemoryStore> {
        let store = Arc::new(MemoryStore::new());
        seed(&store, "a1", Provider::OpenAi, 0, 80.0, false).await;
        seed(&store, "a2", Provider::OpenAi, 0, 60.0, false).await;
        Router::with_defaults(store)
    }

    async fn seed(
        store: &Arc<MemoryStore>,
        id: &str,
        provider: Provider,
        priority: i32,
        effective: f64,
        throttled: bool,
    ) {
        store
            .set_account(Account::new(id, provider).with_priority(priority))
            .await
            .unwrap();
        let mut quota = QuotaInfo::new(id, provider, effective);
        quota.is_throttled = throttled;
        store.set_quota(quota).await.unwrap();
    }

    fn request(policy: RoutePolicy) -> SelectRequest {
        SelectRequest {
            policy: Some(policy),
            ..SelectRequest::default()
        }
    }

    #[tokio::test]
    async fn test_lowest_usage_prefers_most_headroom() {
        let router = seeded_router().await;

        let response = router.select(&request(RoutePolicy::LowestUsage)).await.unwrap();

        assert_eq!(response.account_id, "a1".into());
        assert_eq!(response.provider, Provider::OpenAi);
        assert!((response.score - 0.8).abs() < 1e-9);
        assert!(response.alternative_ids.contains(&"a2".into()));
    }

    #[tokio::test]
    async fn test_optimal_distribution_is_headroom_proportional() {
        let router = seeded_router().await;

        let distribution = router.calculate_optimal_distribution(100.0).await.unwrap();

        assert_eq!(distribution.len(), 2);
        assert!((distribution[&"a1".into()] - 57.14).abs() < 0.01);
        assert!((distribution[&"a2".into()] - 42.86).abs() < 0.01);
    }

    #[tokio::test]
    async fn test_distribution_omits_zero_headroom() {
        let store = Arc::new(MemoryStore::new());
        seed(&store, "a1", Provider::OpenAi, 0, 50.0, false).await;
        seed(&store, "a2", Provider::OpenAi, 0, 0.0, false).await;
        let router = Router::with_defaults(store);

        let distribution = router.calculate_optimal_distribution(100.0).await.unwrap();

        assert_eq!(distribution.len(), 1);
        assert!((distribution[&"a1".into()] - 100.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_distribution_weights_priority() {
        let store = Arc::new(MemoryStore::new());
        seed(&store, "a1", Provider::OpenAi, 1, 50.0, false).await;
        seed(&store, "a2", Provider::OpenAi, 0, 50.0, false).await;
        let router = Router::with_defaults(store);

        let distribution = router.calculate_optimal_distribution(100.0).await.unwrap();

        // 50*2 vs 50*1.
        assert!((distribution[&"a1".into()] - 66.67).abs() < 0.01);
        assert!((distribution[&"a2".into()] - 33.33).abs() < 0.01);
    }

    #[tokio::test]
    async fn test_provider_filter_and_exclusions() {
        let store = Arc::new(MemoryStore::new());
        seed(&store, "oa", Provider::OpenAi, 0, 80.0, false).await;
        seed(&store, "an", Provider::Anthropic, 0, 90.0, false).await;
        let router = Router::with_defaults(store);

        let response = router
            .select(&SelectRequest {
                provider: Some(Provider::OpenAi),
                policy: Some(RoutePolicy::LowestUsage),
                ..SelectRequest::default()
            })
            .await
            .unwrap();
        assert_eq!(response.account_id, "oa".into());

        let response = router
            .select(&SelectRequest {
                exclude_accounts: vec!["an".into()],
                policy: Some(RoutePolicy::LowestUsage),
                ..SelectRequest::default()
            })
            .await
            .unwrap();
        assert_eq!(response.account_id, "oa".into());

        let err = router
            .select(&SelectRequest {
                exclude_providers: vec![Provider::OpenAi, Provider::Anthropic],
                ..SelectRequest::default()
            })
            .await
            .unwrap_err();
        assert!(matches!(err, QuotaPlaneError::NoCandidate(_)));
    }

    #[tokio::test]
    async fn test_estimated_cost_filters_thin_accounts() {
        let store = Arc::new(MemoryStore::new());
        seed(&store, "thin", Provider::OpenAi, 0, 5.0, false).await;
        seed(&store, "thick", Provider::OpenAi, 0, 50.0, false).await;
        let router = Router::with_defaults(store);

        let response = router
            .select(&SelectRequest {
                estimated_cost: Some(10.0),
                policy: Some(RoutePolicy::LowestUsage),
                ..SelectRequest::default()
            })
            .await
            .unwrap();

        assert_eq!(response.account_id, "thick".into());
        assert!(response.alternative_ids.is_empty());
    }

    #[tokio::test]
    async fn test_required_dimensions_filter() {
        let store = Arc::new(MemoryStore::new());
        store
            .set_account(Account::new("no-dims", Provider::OpenAi))
            .await
            .unwrap();
        store
            .set_quota(QuotaInfo::new("no-dims", Provider::OpenAi, 90.0))
            .await
            .unwrap();
        store
            .set_account(Account::new("with-dims", Provider::OpenAi))
            .await
            .unwrap();
        store
            .set_quota(
                QuotaInfo::new("with-dims", Provider::OpenAi, 40.0).with_dimensions(vec![
                    QuotaDimension::new(DimensionType::Rpm, 500, 100),
                ]),
            )
            .await
            .unwrap();
        let router = Router::with_defaults(store);

        let response = router
            .select(&SelectRequest {
                required_dimensions: vec![DimensionType::Rpm],
                policy: Some(RoutePolicy::LowestUsage),
                ..SelectRequest::default()
            })
            .await
            .unwrap();

        assert_eq!(response.account_id, "with-dims".into());
    }

    #[tokio::test]
    async fn test_disabled_accounts_are_ignored() {
        let store = Arc::new(MemoryStore::new());
        store
            .set_account(Account::new("off", Provider::OpenAi).disabled())
            .await
            .unwrap();
        store
            .set_quota(QuotaInfo::new("off", Provider::OpenAi, 90.0))
            .await
            .unwrap();
        let router = Router::with_defaults(store);

        let err = router.select(&SelectRequest::default()).await.unwrap_err();
        assert!(matches!(err, QuotaPlaneError::NoCandidate(_)));
        assert!(!router.is_healthy().await);
    }

    #[tokio::test]
    async fn test_throttled_readmitted_with_penalty_when_all_flagged() {
        let store = Arc::new(MemoryStore::new());
        seed(&store, "t1", Provider::OpenAi, 0, 80.0, true).await;
        seed(&store, "t2", Provider::OpenAi, 0, 60.0, true).await;
        let router = Router::with_defaults(store);

        let response = router.select(&request(RoutePolicy::LowestUsage)).await.unwrap();

        assert_eq!(response.account_id, "t1".into());
        // 0.8 base score halved by the re-admission penalty.
        assert!((response.score - 0.4).abs() < 1e-9);
        assert!(response.reason.contains("re-admitted"));
    }

    #[tokio::test]
    async fn test_throttled_dropped_when_clean_candidate_exists() {
        let store = Arc::new(MemoryStore::new());
        seed(&store, "throttled", Provider::OpenAi, 0, 95.0, true).await;
        seed(&store, "clean", Provider::OpenAi, 0, 30.0, false).await;
        let router = Router::with_defaults(store);

        let response = router.select(&request(RoutePolicy::LowestUsage)).await.unwrap();

        assert_eq!(response.account_id, "clean".into());
        assert!(response.alternative_ids.is_empty());
    }

    #[tokio::test]
    async fn test_priority_policy_and_tiebreaks() {
        let store = Arc::new(MemoryStore::new());
        seed(&store, "low-pri", Provider::OpenAi, 1, 90.0, false).await;
        seed(&store, "high-pri", Provider::OpenAi, 5, 30.0, false).await;
        let router = Router::with_defaults(store);

        let response = router.select(&request(RoutePolicy::Priority)).await.unwrap();
        assert_eq!(response.account_id, "high-pri".into());

        // Equal priority: more headroom wins the secondary tiebreak.
        let store = Arc::new(MemoryStore::new());
        seed(&store, "b", Provider::OpenAi, 2, 40.0, false).await;
        seed(&store, "a", Provider::OpenAi, 2, 70.0, false).await;
        let router = Router::with_defaults(store);

        let response = router.select(&request(RoutePolicy::Priority)).await.unwrap();
        assert_eq!(response.account_id, "a".into());
    }

    #[tokio::test]
    async fn test_deterministic_tiebreak_priority_then_id() {
        let store = Arc::new(MemoryStore::new());
        seed(&store, "b", Provider::OpenAi, 3, 50.0, false).await;
        seed(&store, "a", Provider::OpenAi, 0, 50.0, false).await;
        seed(&store, "c", Provider::OpenAi, 3, 50.0, false).await;
        let router = Router::with_defaults(store);

        // Identical headroom everywhere: higher priority first, then the
        // lexicographically smaller id.
        let response = router.select(&request(RoutePolicy::LowestUsage)).await.unwrap();
        assert_eq!(response.account_id, "b".into());
        assert_eq!(
            response.alternative_ids,
            vec![AccountId::new("c"), AccountId::new("a")]
        );
    }

    #[tokio::test]
    async fn test_weighted_score_is_pool_share() {
        let router = seeded_router().await;

        let response = router.select(&request(RoutePolicy::Weighted)).await.unwrap();

        assert_eq!(response.account_id, "a1".into());
        assert!((response.score - 80.0 / 140.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_balanced_blends_headroom_and_priority() {
        let store = Arc::new(MemoryStore::new());
        seed(&store, "roomy", Provider::OpenAi, 0, 90.0, false).await;
        seed(&store, "preferred", Provider::OpenAi, 10, 80.0, false).await;
        let router = Router::with_defaults(store);

        // Headroom normalizes to 1.0 vs 0.0 across the pair, so the 0.5
        // remaining weight outweighs the 0.3 priority weight here.
        let response = router.select(&request(RoutePolicy::Balanced)).await.unwrap();
        assert_eq!(response.account_id, "roomy".into());

        // With equal headroom the priority term decides.
        let store = Arc::new(MemoryStore::new());
        seed(&store, "plain", Provider::OpenAi, 0, 80.0, false).await;
        seed(&store, "preferred", Provider::OpenAi, 10, 80.0, false).await;
        let router = Router::with_defaults(store);

        let response = router.select(&request(RoutePolicy::Balanced)).await.unwrap();
        assert_eq!(response.account_id, "preferred".into());
    }

    #[tokio::test]
    async fn test_round_robin_rotates_in_id_order() {
        let store = Arc::new(MemoryStore::new());
        seed(&store, "a1", Provider::OpenAi, 0, 80.0, false).await;
        seed(&store, "a2", Provider::OpenAi, 0, 60.0, false).await;
        seed(&store, "a3", Provider::OpenAi, 0, 40.0, false).await;
        let router = Router::with_defaults(store);

        let mut picks = Vec::new();
        for _ in 0..4 {
            let response = router.select(&request(RoutePolicy::RoundRobin)).await.unwrap();
            picks.push(response.account_id);
        }

        assert_eq!(
            picks,
            vec![
                AccountId::new("a1"),
                AccountId::new("a2"),
                AccountId::new("a3"),
                AccountId::new("a1"),
            ]
        );
        assert_eq!(router.last_selected(None), Some("a1".into()));
    }

    #[tokio::test]
    async fn test_round_robin_state_is_per_provider() {
        let store = Arc::new(MemoryStore::new());
        seed(&store, "oa1", Provider::OpenAi, 0, 80.0, false).await;
        seed(&store, "oa2", Provider::OpenAi, 0, 80.0, false).await;
        seed(&store, "an1", Provider::Anthropic, 0, 80.0, false).await;
        let router = Router::with_defaults(store);

        let openai = SelectRequest {
            provider: Some(Provider::OpenAi),
            policy: Some(RoutePolicy::RoundRobin),
            ..SelectRequest::default()
        };
        let anthropic = SelectRequest {
            provider: Some(Provider::Anthropic),
            policy: Some(RoutePolicy::RoundRobin),
            ..SelectRequest::default()
        };

        assert_eq!(router.select(&openai).await.unwrap().account_id, "oa1".into());
        // The anthropic rotation is independent of the openai one.
        assert_eq!(
            router.select(&anthropic).await.unwrap().account_id,
            "an1".into()
        );
        assert_eq!(router.select(&openai).await.unwrap().account_id, "oa2".into());
    }

    #[tokio::test]
    async fn test_is_healthy_reflects_headroom() {
        let store = Arc::new(MemoryStore::new());
        seed(&store, "spent", Provider::OpenAi, 0, 0.0, false).await;
        let router = Router::with_defaults(Arc::clone(&store));
        assert!(!router.is_healthy().await);

        seed(&store, "fresh", Provider::OpenAi, 0, 10.0, false).await;
        assert!(router.is_healthy().await);
    }

    #[tokio::test]
    async fn test_closed_router_rejects_operations() {
        let router = seeded_router().await;
        router.close();
        router.close();

        let err = router.select(&SelectRequest::default()).await.unwrap_err();
        assert!(matches!(err, QuotaPlaneError::Closed { .. }));
        assert!(!router.is_healthy().await);
    }

    #[tokio::test]
    async fn test_feedback_validation() {
        let router = seeded_router().await;

        let err = router
            .report_feedback(&FeedbackReport {
                account_id: "".into(),
                reservation_id: None,
                actual_cost_pct: None,
                success: true,
                error: None,
                latency_ms: None,
                timed_out: false,
            })
            .unwrap_err();
        assert!(matches!(err, QuotaPlaneError::Validation(_)));

        let err = router
            .report_feedback(&FeedbackReport {
                account_id: "a1".into(),
                reservation_id: None,
                actual_cost_pct: Some(120.0),
                success: true,
                error: None,
                latency_ms: None,
                timed_out: false,
            })
            .unwrap_err();
        assert!(matches!(err, QuotaPlaneError::Validation(_)));
    }

    #[tokio::test]
    async fn test_feedback_builds_baseline() {
        let router = seeded_router().await;

        for latency in [100.0, 110.0, 90.0, 105.0] {
            router
                .report_feedback(&FeedbackReport {
                    account_id: "a1".into(),
                    reservation_id: None,
                    actual_cost_pct: None,
                    success: true,
                    error: None,
                    latency_ms: Some(latency),
                    timed_out: false,
                })
                .unwrap();
        }

        let baseline = router.baseline(&"a1".into()).unwrap();
        assert_eq!(baseline.sample_count, 4);
        assert!((baseline.avg_latency_ms - 101.25).abs() < 1e-9);
        assert_eq!(baseline.p95_latency_ms, 110.0);
    }

    #[tokio::test]
    async fn test_repeated_failures_shadow_ban_and_route_around() {
        let store = Arc::new(MemoryStore::new());
        seed(&store, "flaky", Provider::OpenAi, 0, 95.0, false).await;
        seed(&store, "steady", Provider::OpenAi, 0, 20.0, false).await;
        let router = Router::with_defaults(store);

        // Ten successes first so the sample-count downgrade does not apply.
        for _ in 0..10 {
            router
                .report_feedback(&FeedbackReport {
                    account_id: "flaky".into(),
                    reservation_id: None,
                    actual_cost_pct: None,
                    success: true,
                    error: None,
                    latency_ms: Some(100.0),
                    timed_out: false,
                })
                .unwrap();
        }
        for _ in 0..5 {
            router
                .report_feedback(&FeedbackReport {
                    account_id: "flaky".into(),
                    reservation_id: None,
                    actual_cost_pct: None,
                    success: false,
                    error: Some("upstream 500".to_string()),
                    latency_ms: None,
                    timed_out: false,
                })
                .unwrap();
        }

        assert!(router.is_shadow_banned(&"flaky".into()));

        // The shadow-banned account loses to the clean one despite having
        // far more headroom.
        let response = router.select(&request(RoutePolicy::LowestUsage)).await.unwrap();
        assert_eq!(response.account_id, "steady".into());
    }
}
