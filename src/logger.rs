//! Logging setup
//!
//! Status lines for every stage go through `tracing`. The binaries install a
//! human-readable fmt subscriber; `RUST_LOG` takes precedence over the
//! configured level when set.

use tracing_subscriber::EnvFilter;

/// Install the global fmt subscriber at `level` (e.g. "info", "debug").
///
/// Calling this more than once is harmless: later calls leave the first
/// subscriber in place.
pub fn init_logging(level: &str) {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .try_init();
}
