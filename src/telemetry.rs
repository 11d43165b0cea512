//! Tracing initialization.
//!
//! Runners call [`init`] once at startup; the filter defaults to `info`
//! for this crate and can be overridden with the `STEWARD_LOG`
//! environment variable (standard env-filter syntax).

use tracing_subscriber::{fmt, EnvFilter};

/// Environment variable controlling the log filter.
pub const LOG_ENV: &str = "STEWARD_LOG";

/// Installs the global tracing subscriber. Safe to call more than once;
/// subsequent calls are no-ops.
pub fn init() {
    let filter = EnvFilter::try_from_env(LOG_ENV)
        .unwrap_or_else(|_| EnvFilter::new("steward=info,warn"));
    let _ = fmt()
        .with_env_filter(filter)
        .with_target(false)
        .try_init();
}

/// Test-friendly variant: compact output, everything at debug.
pub fn init_for_tests() {
    let _ = fmt()
        .with_env_filter(EnvFilter::new("steward=debug"))
        .compact()
        .with_test_writer()
        .try_init();
}
