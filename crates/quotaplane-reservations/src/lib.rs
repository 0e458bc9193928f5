//! # quotaplane-reservations
//!
//! Soft-reservation lifecycle management.
//!
//! A reservation is a TTL-bounded hold on a portion of an account's budget.
//! The [`ReservationManager`] is the only component that mutates
//! `virtual_used_pct`: every transition runs the compound
//! get-quota → mutate → set-quota → set-reservation sequence under a single
//! operation mutex, so per-reservation transitions are totally ordered and
//! quota accounting never tears.

pub mod manager;

pub use manager::{ReservationConfig, ReservationManager, ReservationMetrics};
