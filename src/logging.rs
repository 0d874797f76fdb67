//! Tracing bootstrap for embedders.

use tracing_subscriber::{fmt, EnvFilter};

/// Initialize a subscriber honoring `RUST_LOG`; info-level by default.
/// Safe to call more than once; later calls are no-ops.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = fmt().with_env_filter(filter).try_init();
}

/// JSON-lines variant for machine-read logs.
pub fn init_tracing_json() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = fmt().json().with_env_filter(filter).try_init();
}
