//! Error types for the quotaplane control plane.

use thiserror::Error;

/// Result type alias for quotaplane operations.
pub type QuotaPlaneResult<T> = Result<T, QuotaPlaneError>;

/// Unified error type for all quotaplane operations.
#[derive(Error, Debug)]
pub enum QuotaPlaneError {
    // ─────────────────────────────────────────────────────────────────────────
    // Validation Errors
    // ─────────────────────────────────────────────────────────────────────────
    #[error("Validation failed: {0}")]
    Validation(String),

    // ─────────────────────────────────────────────────────────────────────────
    // Lookup Errors
    // ─────────────────────────────────────────────────────────────────────────
    #[error("Account not found: {0}")]
    AccountNotFound(String),

    #[error("No quota recorded for account: {0}")]
    NoQuota(String),

    #[error("Reservation not found: {0}")]
    ReservationNotFound(String),

    // ─────────────────────────────────────────────────────────────────────────
    // Reservation Errors
    // ─────────────────────────────────────────────────────────────────────────
    #[error("Insufficient quota: requested {requested:.2}%, available {available:.2}%")]
    InsufficientQuota { requested: f64, available: f64 },

    #[error("Invalid transition: reservation {id} is already {status}")]
    InvalidTransition { id: String, status: String },

    // ─────────────────────────────────────────────────────────────────────────
    // Routing Errors
    // ─────────────────────────────────────────────────────────────────────────
    #[error("No candidate account satisfies the request: {0}")]
    NoCandidate(String),

    // ─────────────────────────────────────────────────────────────────────────
    // Lifecycle Errors
    // ─────────────────────────────────────────────────────────────────────────
    #[error("{component} is closed")]
    Closed { component: String },

    #[error("Partial failure: {failures:?}")]
    Partial { failures: Vec<String> },

    // ─────────────────────────────────────────────────────────────────────────
    // Infrastructure Errors
    // ─────────────────────────────────────────────────────────────────────────
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl QuotaPlaneError {
    /// Shorthand for a closed-component error.
    pub fn closed(component: impl Into<String>) -> Self {
        Self::Closed {
            component: component.into(),
        }
    }

    /// Whether the caller should back off and retry later (capacity errors),
    /// as opposed to fixing the request or giving up.
    pub fn is_capacity(&self) -> bool {
        matches!(
            self,
            Self::InsufficientQuota { .. } | Self::NoQuota(_) | Self::NoCandidate(_)
        )
    }
}
