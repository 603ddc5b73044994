//! Logging initialization and configuration.

use tracing_subscriber::{EnvFilter, fmt, prelude::*};

/// Default filter used when `RUST_LOG` is not set.
const DEFAULT_FILTER: &str = "info,ferry=debug,ferry_renderer=debug,ferry_rhi=info";

/// Initialize the logging system with tracing.
///
/// This sets up tracing-subscriber with:
/// - Environment-based filtering (RUST_LOG)
/// - Target and thread id annotations on every line
///
/// Calling this twice is harmless; the second registration is ignored.
///
/// # Example
/// ```
/// ferry_core::init_logging();
/// tracing::info!("Uploader ready");
/// ```
pub fn init_logging() {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));

    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(true).with_thread_ids(true))
        .try_init();
}
