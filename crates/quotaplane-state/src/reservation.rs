//! Soft reservations against an account's budget.

use chrono::{DateTime, Duration, Utc};
use quotaplane_common::{AccountId, ReservationId};
use serde::{Deserialize, Serialize};

/// Reservation status state machine.
///
/// `Active` is the only non-terminal state; every terminal state is a sink.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReservationStatus {
    /// Reservation is holding quota.
    Active,
    /// Caller reported actual cost.
    Released,
    /// Caller abandoned the reservation.
    Cancelled,
    /// TTL elapsed before the caller reported back.
    Expired,
}

impl ReservationStatus {
    /// Check if this is a terminal state.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Active)
    }

    /// Check if a transition to `to` is valid.
    pub fn can_transition_to(&self, to: ReservationStatus) -> bool {
        use ReservationStatus::*;

        matches!(
            (self, to),
            (Active, Released) | (Active, Cancelled) | (Active, Expired)
        )
    }

    /// Get string representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Released => "released",
            Self::Cancelled => "cancelled",
            Self::Expired => "expired",
        }
    }
}

impl std::fmt::Display for ReservationStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A soft hold on a portion of an account's budget, with a TTL.
///
/// Immutable once terminal: after the single terminal transition the record
/// never changes again.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Reservation {
    /// Unique reservation id.
    pub id: ReservationId,
    /// Account the hold is against.
    pub account_id: AccountId,
    /// Estimated cost held, as a percentage of the account budget.
    pub estimated_cost_pct: f64,
    /// Actual cost reported at release.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub actual_cost_pct: Option<f64>,
    /// Current status.
    pub status: ReservationStatus,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
    /// Expiry timestamp.
    pub expires_at: DateTime<Utc>,
    /// When the caller released the hold.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub released_at: Option<DateTime<Utc>>,
    /// Caller-supplied identifier propagated for audit and tracing.
    pub correlation_id: String,
}

impl Reservation {
    /// Create an active reservation expiring after `ttl`.
    pub fn new(
        account_id: impl Into<AccountId>,
        estimated_cost_pct: f64,
        correlation_id: impl Into<String>,
        ttl: Duration,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: ReservationId::new(),
            account_id: account_id.into(),
            estimated_cost_pct,
            actual_cost_pct: None,
            status: ReservationStatus::Active,
            created_at: now,
            expires_at: now + ttl,
            released_at: None,
            correlation_id: correlation_id.into(),
        }
    }

    /// Whether the reservation is still holding quota.
    pub fn is_active(&self) -> bool {
        self.status == ReservationStatus::Active
    }

    /// Whether the TTL has elapsed as of `now`.
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }

    /// Whether the TTL has elapsed.
    pub fn is_expired(&self) -> bool {
        self.is_expired_at(Utc::now())
    }

    /// Time remaining until expiry, floored at zero.
    pub fn time_remaining(&self) -> Duration {
        let remaining = self.expires_at - Utc::now();
        if remaining < Duration::zero() {
            Duration::zero()
        } else {
            remaining
        }
    }
}
