//! Logging setup
//!
//! Logs go to stderr so stdout stays clean for plan output. `RUST_LOG`
//! overrides the level from the config file.

use tracing_subscriber::EnvFilter;

/// Build the filter: `RUST_LOG` first, then the configured level, then "info"
pub fn filter(level: &str) -> EnvFilter {
    EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level))
        .unwrap_or_else(|_| EnvFilter::new("info"))
}

/// Install the global subscriber. A second call is a no-op.
pub fn init(level: &str) {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter(level))
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init();
}
