//! Per-account quota state with virtual accounting.

use chrono::{DateTime, Utc};
use quotaplane_common::{
    AccountId, DimensionType, Provider, QuotaDimension, QuotaPlaneError, QuotaPlaneResult,
    QuotaSource,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Validation errors for observed quota snapshots.
#[derive(Debug, Error)]
pub enum QuotaValidationError {
    #[error("Account id is required and must be non-empty")]
    EmptyAccountId,

    #[error("effective_remaining_pct must be within [0, 100], got {0}")]
    RemainingOutOfRange(f64),

    #[error("virtual_used_pct must be non-negative, got {0}")]
    NegativeVirtualUsed(f64),

    #[error("confidence must be within [0, 1], got {0}")]
    ConfidenceOutOfRange(f64),
}

impl From<QuotaValidationError> for QuotaPlaneError {
    fn from(err: QuotaValidationError) -> Self {
        QuotaPlaneError::Validation(err.to_string())
    }
}

/// Observed and virtual quota state for one account.
///
/// `effective_remaining_pct` is what external observation says is still
/// usable; `virtual_used_pct` is what active reservations are holding plus
/// actual costs reported since the last observation. Ingest replaces the
/// observed value wholesale and never sums into it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuotaInfo {
    /// Account this quota belongs to.
    pub account_id: AccountId,
    /// Provider of the account.
    pub provider: Provider,
    /// Most recent externally observed headroom, 0-100.
    pub effective_remaining_pct: f64,
    /// Percentage currently held by reservations; mutated only inside the
    /// reservation manager's serialized critical section.
    #[serde(default)]
    pub virtual_used_pct: f64,
    /// Observed rate-limit dimensions, in provider order.
    #[serde(default)]
    pub dimensions: Vec<QuotaDimension>,
    /// Whether the provider is currently throttling this account.
    #[serde(default)]
    pub is_throttled: bool,
    /// Where the observation came from.
    #[serde(default)]
    pub source: QuotaSource,
    /// When the observation was taken; `None` until stamped by the collector.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub collected_at: Option<DateTime<Utc>>,
    /// Observer's confidence in the snapshot, 0-1.
    #[serde(default = "default_confidence")]
    pub confidence: f64,
}

fn default_confidence() -> f64 {
    1.0
}

impl QuotaInfo {
    /// Create a quota snapshot with full confidence and no virtual usage.
    pub fn new(
        account_id: impl Into<AccountId>,
        provider: Provider,
        effective_remaining_pct: f64,
    ) -> Self {
        Self {
            account_id: account_id.into(),
            provider,
            effective_remaining_pct,
            virtual_used_pct: 0.0,
            dimensions: Vec::new(),
            is_throttled: false,
            source: QuotaSource::default(),
            collected_at: Some(Utc::now()),
            confidence: 1.0,
        }
    }

    /// Attach observed dimensions.
    pub fn with_dimensions(mut self, dimensions: Vec<QuotaDimension>) -> Self {
        self.dimensions = dimensions;
        self
    }

    /// Mark the account as throttled by its provider.
    pub fn throttled(mut self) -> Self {
        self.is_throttled = true;
        self
    }

    /// Add reserved headroom. `delta` must be non-negative.
    pub fn add_virtual_used(&mut self, delta: f64) -> QuotaPlaneResult<()> {
        if delta < 0.0 {
            return Err(QuotaPlaneError::Validation(format!(
                "virtual usage delta must be non-negative, got {delta}"
            )));
        }
        self.virtual_used_pct += delta;
        Ok(())
    }

    /// Return reserved headroom, flooring at zero.
    pub fn release_virtual_used(&mut self, delta: f64) {
        self.virtual_used_pct = (self.virtual_used_pct - delta).max(0.0);
    }

    /// Headroom after subtracting what reservations are holding.
    pub fn effective_remaining_with_virtual(&self) -> f64 {
        (self.effective_remaining_pct - self.virtual_used_pct).max(0.0)
    }

    /// Look up an observed dimension by type.
    pub fn dimension(&self, kind: DimensionType) -> Option<&QuotaDimension> {
        self.dimensions.iter().find(|d| d.kind == kind)
    }

    /// Whether the quota declares `kind` and it still has headroom.
    pub fn has_dimension_headroom(&self, kind: DimensionType) -> bool {
        self.dimension(kind).is_some_and(QuotaDimension::has_headroom)
    }

    /// Largest remaining value across observed dimensions.
    pub fn max_dimension_remaining(&self) -> i64 {
        self.dimensions.iter().map(|d| d.remaining).max().unwrap_or(0)
    }

    /// Validate an externally supplied snapshot before it enters the store.
    pub fn validate(&self) -> Result<(), QuotaValidationError> {
        if self.account_id.is_empty() {
            return Err(QuotaValidationError::EmptyAccountId);
        }
        if !(0.0..=100.0).contains(&self.effective_remaining_pct) {
            return Err(QuotaValidationError::RemainingOutOfRange(
                self.effective_remaining_pct,
            ));
        }
        if self.virtual_used_pct < 0.0 {
            return Err(QuotaValidationError::NegativeVirtualUsed(
                self.virtual_used_pct,
            ));
        }
        if !(0.0..=1.0).contains(&self.confidence) {
            return Err(QuotaValidationError::ConfidenceOutOfRange(self.confidence));
        }
        Ok(())
    }
}
