//! Logging setup

use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Install the global tracing subscriber for applications embedding this
/// library.
///
/// Honors `RUST_LOG` when set, falling back to `default_filter`. Safe to
/// call more than once; later calls keep the first subscriber.
pub fn init(default_filter: &str) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_filter));

    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer())
        .try_init();
}
