//! # quotaplane-state
//!
//! Entity model and state store for the quotaplane control plane.
//!
//! ## Overview
//!
//! This crate owns the data the rest of the plane reads and writes:
//!
//! - **Accounts**: upstream provider credentials with routing attributes
//! - **Quotas**: externally observed headroom plus virtual (reserved)
//!   accounting
//! - **Reservations**: soft holds against an account's budget
//!
//! The [`StateStore`] trait is the pluggable persistence seam; the canonical
//! implementation is the in-memory [`MemoryStore`]. The [`PassiveCollector`]
//! accepts externally observed quota snapshots and writes them through.
//!
//! The store does not coordinate cross-entity atomicity; the reservation
//! manager serializes compound updates itself.

pub mod account;
pub mod collector;
pub mod quota;
pub mod reservation;
pub mod store;

pub use account::Account;
pub use collector::{CollectorConfig, CollectorMetrics, PassiveCollector};
pub use quota::{QuotaInfo, QuotaValidationError};
pub use reservation::{Reservation, ReservationStatus};
pub use store::{MemoryStore, StateStore};
