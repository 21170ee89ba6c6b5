//! Diagnostic output setup.

use tracing_subscriber::EnvFilter;

/// Environment variable holding the filter directive, e.g. `testforge=debug`.
pub const LOG_ENV: &str = "TESTFORGE_LOG";

/// Install a formatted `tracing` subscriber for the process.
///
/// The filter comes from `TESTFORGE_LOG`, falling back to `default_filter`
/// when the variable is unset or unparsable. Returns `false` if a global
/// subscriber was already installed, in which case nothing changes.
pub fn init_logging(default_filter: &str) -> bool {
    let filter = EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new(default_filter));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_thread_names(true)
        .with_target(false)
        .try_init()
        .is_ok()
}
