//! Health check response
//!
//! Provides a standardized health response the transport layer can expose.

use serde::Serialize;
use tracing::instrument;

/// Health check response
#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    /// Service health status
    pub status: String,
    /// Crate version from Cargo.toml
    pub version: String,
    /// Whether the router has at least one routable account
    pub router_healthy: bool,
}

impl HealthResponse {
    /// Create a response from the router's health flag.
    ///
    /// A plane with no routable account is degraded, not down: reservations
    /// and ingest keep working while the pool is exhausted.
    pub fn from_router(router_healthy: bool) -> Self {
        Self {
            status: if router_healthy {
                "healthy".to_string()
            } else {
                "degraded".to_string()
            },
            version: env!("CARGO_PKG_VERSION").to_string(),
            router_healthy,
        }
    }

    /// Create a fully healthy response.
    pub fn healthy() -> Self {
        Self::from_router(true)
    }
}

impl Default for HealthResponse {
    fn default() -> Self {
        Self::healthy()
    }
}

/// Health check function returning a HealthResponse
#[instrument(name = "health.check")]
pub fn health_check(router_healthy: bool) -> HealthResponse {
    HealthResponse::from_router(router_healthy)
}
