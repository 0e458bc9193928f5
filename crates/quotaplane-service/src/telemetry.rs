//! Tracing subscriber initialization.

use quotaplane_common::config::ObservabilityConfig;
use tracing_subscriber::EnvFilter;

/// Install the global tracing subscriber from observability configuration.
///
/// Safe to call more than once; only the first call installs a subscriber.
pub fn init_tracing(config: &ObservabilityConfig) {
    let filter =
        EnvFilter::try_new(&config.log_level).unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);

    if config.json_logs {
        let _ = builder.json().try_init();
    } else {
        let _ = builder.try_init();
    }
}
