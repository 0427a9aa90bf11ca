//! Logging init: tracing to stderr with env-filter control.
//!
//! The proxy is a foreground console tool, so logs go to stderr; use
//! `RUST_LOG` to adjust verbosity per module.

use tracing_subscriber::EnvFilter;

/// Initialize structured logging to stderr. Call once, early.
pub fn init_logging() {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,speedstream=debug,speedstream_core=debug"));
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .with_ansi(false)
        .init();
}
