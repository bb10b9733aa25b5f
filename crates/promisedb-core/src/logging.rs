//! Logging utilities.
//!
//! The adapter only emits `tracing` events; installing a subscriber is left
//! to the host. Native hosts and tests can use [`init`] (requires the
//! `subscriber` feature). In the browser, install a wasm-aware subscriber
//! instead.

/// Initialize tracing with defaults.
///
/// Sets up tracing-subscriber with:
/// - Environment filter (RUST_LOG)
/// - Compact format suitable for terminal output
#[cfg(feature = "subscriber")]
pub fn init() {
    init_with_filter("info");
}

/// Initialize tracing with a custom default filter.
///
/// Returns `false` if a global subscriber was already installed, which
/// happens when several tests in one binary call this.
#[cfg(feature = "subscriber")]
pub fn init_with_filter(default_filter: &str) -> bool {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().compact().with_test_writer())
        .try_init()
        .is_ok()
}

/// Segment prefixes for log lines.
pub mod prefix {
    /// Database operations prefix
    pub const DB: &str = "⊔";
}
