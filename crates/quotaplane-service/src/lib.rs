//! # quotaplane-service
//!
//! Typed operation facade over the quotaplane core.
//!
//! The [`ControlPlane`] owns the store, router, reservation manager, and
//! passive collector, exposes the operation surface a transport layer
//! wraps, and sequences graceful shutdown. The core stays
//! transport-agnostic: HTTP/JSON is the reference framing but nothing here
//! depends on it.

pub mod api;
pub mod service;
pub mod telemetry;

pub use api::{
    CreateReservationRequest, IngestRequest, ReleaseReservationRequest, ReservationCreated,
};
pub use service::ControlPlane;
pub use telemetry::init_tracing;
