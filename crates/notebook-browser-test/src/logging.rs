//! Log output for harness runs.
//!
//! Test binaries call [`init_test_logging`] at the top of every test; only
//! the first call installs a subscriber. Output goes through libtest's
//! capture so it shows up only for failing tests.
//!
//! The level comes from `RUST_LOG` and falls back to `info` for this crate.
//! Readiness transitions and UI actions log at `debug`, settle delays at
//! `trace`.

use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Filter used when `RUST_LOG` is unset.
pub const DEFAULT_FILTER: &str = "notebook_browser_test=info";

/// Installs the harness subscriber once per process.
pub fn init_test_logging() {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));
    init_with_filter(filter);
}

/// Installs a subscriber with a custom filter.
///
/// Returns false if a global subscriber was already set.
pub fn init_with_filter(filter: EnvFilter) -> bool {
    let fmt_layer = fmt::layer()
        .with_target(false)
        .with_level(true)
        .with_test_writer()
        .compact();

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt_layer)
        .try_init()
        .is_ok()
}
