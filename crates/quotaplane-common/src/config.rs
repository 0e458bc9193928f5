//! Configuration loading utilities.
//!
//! This module provides layered configuration loading using figment:
//! - Default values (compiled in)
//! - Configuration file (TOML)
//! - Environment variables
//!
//! # Example
//!
//! ```rust,ignore
//! use quotaplane_common::config::{QuotaPlaneConfig, load_quotaplane_config};
//!
//! // Load configuration from defaults + file + env
//! let config: QuotaPlaneConfig = load_quotaplane_config(None)?;
//! ```

#[cfg(feature = "config")]
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

/// Reservation manager configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ReservationConfig {
    /// TTL applied to new reservations, in seconds.
    #[serde(default = "default_reservation_ttl")]
    pub default_ttl_secs: u64,

    /// How often the background sweep fires, in seconds.
    #[serde(default = "default_cleanup_interval")]
    pub cleanup_interval_secs: u64,
}

fn default_reservation_ttl() -> u64 {
    300 // 5 minutes
}

fn default_cleanup_interval() -> u64 {
    30
}

impl Default for ReservationConfig {
    fn default() -> Self {
        Self {
            default_ttl_secs: default_reservation_ttl(),
            cleanup_interval_secs: default_cleanup_interval(),
        }
    }
}

/// Router configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RouterConfig {
    /// Policy applied when a request names none.
    #[serde(default = "default_policy")]
    pub default_policy: String,

    /// Multiplier applied to the score of throttled candidates that are
    /// re-admitted because every candidate was throttled.
    #[serde(default = "default_throttle_penalty")]
    pub throttle_penalty: f64,

    /// Maximum number of alternative account ids returned per selection.
    #[serde(default = "default_max_alternatives")]
    pub max_alternatives: usize,
}

fn default_policy() -> String {
    "balanced".to_string()
}

fn default_throttle_penalty() -> f64 {
    0.5
}

fn default_max_alternatives() -> usize {
    3
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            default_policy: default_policy(),
            throttle_penalty: default_throttle_penalty(),
            max_alternatives: default_max_alternatives(),
        }
    }
}

/// Passive collector configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CollectorConfig {
    /// Bounded queue capacity; the oldest entry is dropped when full.
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,

    /// Drain cadence for the background flush task, in milliseconds.
    #[serde(default = "default_drain_interval_ms")]
    pub drain_interval_ms: u64,
}

fn default_queue_capacity() -> usize {
    1024
}

fn default_drain_interval_ms() -> u64 {
    100
}

impl Default for CollectorConfig {
    fn default() -> Self {
        Self {
            queue_capacity: default_queue_capacity(),
            drain_interval_ms: default_drain_interval_ms(),
        }
    }
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Enable JSON logging.
    #[serde(default)]
    pub json_logs: bool,

    /// Service name for tracing.
    #[serde(default = "default_service_name")]
    pub service_name: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_service_name() -> String {
    "quotaplane".to_string()
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            json_logs: false,
            service_name: default_service_name(),
        }
    }
}

/// Complete control-plane configuration.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct QuotaPlaneConfig {
    /// Reservation manager configuration.
    #[serde(default)]
    pub reservations: ReservationConfig,

    /// Router configuration.
    #[serde(default)]
    pub router: RouterConfig,

    /// Passive collector configuration.
    #[serde(default)]
    pub collector: CollectorConfig,

    /// Observability configuration.
    #[serde(default)]
    pub observability: ObservabilityConfig,
}

/// Load configuration from layered sources.
///
/// Sources (in order of precedence):
/// 1. Defaults (lowest)
/// 2. Configuration file (if provided)
/// 3. Environment variables (highest)
///
/// Environment variables are prefixed with the uppercase `prefix` followed
/// by `_` and split on `_` into nested keys.
#[cfg(feature = "config")]
pub fn load_config<T: Default + Serialize + for<'de> Deserialize<'de>>(
    prefix: &str,
    config_file: Option<&str>,
) -> Result<T, figment::Error> {
    let mut figment = Figment::new().merge(Serialized::defaults(T::default()));

    if let Some(path) = config_file {
        figment = figment.merge(Toml::file(path));
    }

    figment = figment.merge(Env::prefixed(&format!("{}_", prefix.to_uppercase())).split("_"));

    figment.extract()
}

/// Load control-plane configuration from defaults, file, and environment.
#[cfg(feature = "config")]
pub fn load_quotaplane_config(
    config_file: Option<&str>,
) -> Result<QuotaPlaneConfig, figment::Error> {
    load_config("quotaplane", config_file)
}
