//! Tracing initialization shared by the `bqem` binary and test suites.

use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

/// Error returned when a global subscriber is already installed.
pub type TracingInitError = tracing_subscriber::util::TryInitError;

/// Installs the global subscriber for a binary.
///
/// `RUST_LOG` takes precedence. Otherwise events from `app_name` and the `bqem` library are
/// emitted at `info`, or `debug` when `debug` is set.
pub fn init_tracing(app_name: &str, debug: bool) -> Result<(), TracingInitError> {
    let level = if debug { "debug" } else { "info" };
    let default_directives = format!("{}={level},bqem={level}", app_name.replace('-', "_"));

    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| default_directives.into()))
        .with(tracing_subscriber::fmt::layer())
        .try_init()
}

/// Initializes test logging, ignoring repeated calls from the same test binary.
pub fn init_test_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| "bqem=debug".into()),
        )
        .with_test_writer()
        .try_init();
}
