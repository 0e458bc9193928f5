//! # quotaplane-common
//!
//! Shared types and utilities for the quotaplane control plane.
//!
//! This crate provides the foundational types used across the workspace:
//! - `quotaplane-state`: entity model, state store, passive collector
//! - `quotaplane-reservations`: soft-reservation lifecycle management
//! - `quotaplane-routing`: account selection and anomaly detection
//! - `quotaplane-service`: typed operation facade

pub mod error;
pub mod health;
pub mod identity;
pub mod types;

#[cfg(feature = "config")]
pub mod config;

pub use error::{QuotaPlaneError, QuotaPlaneResult};
pub use health::{health_check, HealthResponse};
pub use identity::{AccountId, ReservationId};
pub use types::{DimensionType, Provider, QuotaDimension, QuotaSource};

#[cfg(feature = "config")]
pub use config::{
    load_config, load_quotaplane_config, CollectorConfig, ObservabilityConfig, QuotaPlaneConfig,
    ReservationConfig, RouterConfig,
};
