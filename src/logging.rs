//! Tracing subscriber setup for binaries and tests
//!
//! The library only emits `tracing` events. Hosts that want them on stderr
//! call [`init_tracing`] once at startup.

use tracing_subscriber::EnvFilter;

use crate::{Error, Result};

/// Environment variable holding the filter directives.
pub const LOG_ENV: &str = "TRUENO_RESULTS_LOG";

/// Filter used when neither variable is set.
pub const DEFAULT_FILTER: &str = "info";

/// Install a fmt subscriber filtered by `TRUENO_RESULTS_LOG`, then `RUST_LOG`,
/// then `info`. Does nothing if a global subscriber is already set.
pub fn init_tracing() {
    // A subscriber installed by the host wins
    let _ = try_init_tracing(DEFAULT_FILTER);
}

/// Like [`init_tracing`] with an explicit fallback filter.
///
/// # Errors
///
/// Returns `Error::InvalidInput` for unparsable directives and
/// `Error::Other` if a global subscriber is already installed.
pub fn try_init_tracing(default_filter: &str) -> Result<()> {
    let directives = std::env::var(LOG_ENV)
        .or_else(|_| std::env::var(EnvFilter::DEFAULT_ENV))
        .unwrap_or_else(|_| default_filter.to_string());
    let filter = EnvFilter::try_new(&directives)
        .map_err(|e| Error::InvalidInput(format!("log filter '{directives}': {e}")))?;

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .try_init()
        .map_err(|e| Error::Other(format!("tracing subscriber: {e}")))
}
