//! Logging initialization using tracing.

use tracing_subscriber::{EnvFilter, fmt, prelude::*};

/// Default filter used when `RUST_LOG` is not set.
const DEFAULT_FILTER: &str = "info,subpass=debug";

/// Initialize the logging system.
///
/// Uses the `RUST_LOG` environment variable for filtering, falling back to
/// [`DEFAULT_FILTER`]. Calling this twice is harmless; the second call is ignored.
pub fn init_logging() {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));

    let result = tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(true).with_thread_ids(true))
        .try_init();

    if result.is_err() {
        tracing::debug!("Logging already initialized");
    }
}
