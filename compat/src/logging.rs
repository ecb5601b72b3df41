//! Tracing setup.
//!
//! # Separation of Concerns
//!
//! - **Tracing (this module)**: diagnostics via `RUST_LOG`, output to stderr.
//!   Build tool output is forwarded here line by line under the
//!   `compat::build` target.
//!
//! - **Product output**: plan listings, status and run summaries are printed
//!   to stdout by the CLI and are unaffected by `RUST_LOG`.

use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Default filter when `RUST_LOG` is unset.
pub const DEFAULT_FILTER: &str = "compat=info,warn";

/// Initialize the tracing subscriber.
///
/// Reads `RUST_LOG`. Defaults to [`DEFAULT_FILTER`] if unset.
/// Output: stderr, compact format.
///
/// # Example
/// ```bash
/// RUST_LOG=compat=debug compat run
/// ```
pub fn init() {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr).compact())
        .init();
}
