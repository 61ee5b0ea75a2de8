//! Structured logging setup with `tracing`.
//!
//! The control plane logs through `tracing` macros everywhere; this module
//! owns subscriber initialization so binaries and tests get consistent
//! output. Gate and retrieval decisions log at `debug`, recoverable
//! anomalies (pattern fallbacks, malformed rule lines) at `warn`.

/// Initialize the global tracing subscriber with stderr output.
///
/// Call once at startup. Subsequent calls are no-ops, so library tests can
/// call this freely.
///
/// # Arguments
///
/// * `level` - Minimum log level when `RUST_LOG` is unset (e.g. `"warn"`).
pub fn init_subscriber(level: &str) {
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_writer(std::io::stderr)
        .compact();

    // try_init is a no-op if a subscriber is already set
    let _ = subscriber.try_init();
}
