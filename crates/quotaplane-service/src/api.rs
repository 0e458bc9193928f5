//! Request and response bodies for the operation surface.
//!
//! These are the records a transport adapter serializes; the core types
//! they map to live in `quotaplane-state`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use quotaplane_common::{
    AccountId, Provider, QuotaDimension, QuotaSource, ReservationId,
};
use quotaplane_state::{QuotaInfo, Reservation, ReservationStatus};

/// Body of `reservations.create`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateReservationRequest {
    /// Account to hold budget against.
    pub account_id: AccountId,
    /// Estimated cost, 0-100.
    pub estimated_cost_pct: f64,
    /// Caller-supplied correlation id; required.
    pub correlation_id: String,
}

/// Response of `reservations.create`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReservationCreated {
    /// Allocated reservation id.
    pub id: ReservationId,
    /// Account the hold is against.
    pub account_id: AccountId,
    /// Status at creation; always `active`.
    pub status: ReservationStatus,
    /// When the hold lapses unless released or cancelled.
    pub expires_at: DateTime<Utc>,
}

impl From<Reservation> for ReservationCreated {
    fn from(reservation: Reservation) -> Self {
        Self {
            id: reservation.id,
            account_id: reservation.account_id,
            status: reservation.status,
            expires_at: reservation.expires_at,
        }
    }
}

/// Body of `reservations.release`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReleaseReservationRequest {
    /// Reservation to release.
    pub id: ReservationId,
    /// Observed actual cost, 0-100; overruns above the estimate are legal.
    pub actual_cost_pct: f64,
}

/// Body of `ingest`: an externally observed quota snapshot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestRequest {
    /// Observed account.
    pub account_id: AccountId,
    /// Provider of the account.
    pub provider: Provider,
    /// Observed headroom, 0-100.
    pub effective_remaining_pct: f64,
    /// Observed rate-limit dimensions.
    #[serde(default)]
    pub dimensions: Vec<QuotaDimension>,
    /// Whether the provider is throttling the account.
    #[serde(default)]
    pub is_throttled: bool,
    /// Observation source; defaults to `ingest`.
    #[serde(default)]
    pub source: Option<QuotaSource>,
    /// Observation timestamp; stamped by the collector when absent.
    #[serde(default)]
    pub collected_at: Option<DateTime<Utc>>,
    /// Observer confidence, 0-1; defaults to 1.
    #[serde(default)]
    pub confidence: Option<f64>,
}

impl From<IngestRequest> for QuotaInfo {
    fn from(request: IngestRequest) -> Self {
        QuotaInfo {
            account_id: request.account_id,
            provider: request.provider,
            effective_remaining_pct: request.effective_remaining_pct,
            // Observers cannot see reservation holds; the collector carries
            // the stored value over on write-through.
            virtual_used_pct: 0.0,
            dimensions: request.dimensions,
            is_throttled: request.is_throttled,
            source: request.source.unwrap_or(QuotaSource::Ingest),
            collected_at: request.collected_at,
            confidence: request.confidence.unwrap_or(1.0),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ingest_request_minimal_body() {
        let body = r#"{
            "account_id": "a1",
            "provider": "openai",
            "effective_remaining_pct": 72.5
        }"#;
        let request: IngestRequest = serde_json::from_str(body).unwrap();
        let quota: QuotaInfo = request.into();

        assert_eq!(quota.account_id, "a1".into());
        assert_eq!(quota.effective_remaining_pct, 72.5);
        assert_eq!(quota.source, QuotaSource::Ingest);
        assert_eq!(quota.confidence, 1.0);
        assert!(quota.collected_at.is_none());
        assert!(quota.validate().is_ok());
    }

    #[test]
    fn test_reservation_created_from_reservation() {
        let reservation =
            Reservation::new("a1", 10.0, "corr-1", chrono::Duration::seconds(300));
        let created = ReservationCreated::from(reservation.clone());

        assert_eq!(created.id, reservation.id);
        assert_eq!(created.status, ReservationStatus::Active);
        assert_eq!(created.expires_at, reservation.expires_at);

        let json = serde_json::to_string(&created).unwrap();
        assert!(json.contains(r#""status":"active""#));
    }
}
