//! Telemetry helpers for structured logging and tracing.

/// Install a default env-filtered `tracing` subscriber unless one is already set.
///
/// Gates only emit events through `tracing`; applications that install their
/// own subscriber never need to call this. Verbosity follows `RUST_LOG`
/// (for example `RUST_LOG=prometheus_gates=debug`).
pub fn init_tracing() {
    if tracing::dispatcher::has_been_set() {
        return;
    }
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_target(true)
        .try_init();
}
