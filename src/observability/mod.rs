//! Observability bootstrap.
//!
//! The engine emits structured events through [`tracing`] and counters
//! through [`metrics`] macros; embedding applications own the subscriber and
//! exporter wiring. [`init_tracing`] is a convenience for binaries and tests
//! that just want formatted logs on stderr.

use tracing_subscriber::EnvFilter;

/// Environment variable controlling the log filter (e.g. `statehouse=debug`).
pub const LOG_FILTER_ENV: &str = "STATEHOUSE_LOG";

/// Installs a formatted `tracing` subscriber with an env-driven filter.
///
/// Filter resolution order: `STATEHOUSE_LOG`, then `RUST_LOG`, then `"info"`.
/// Idempotent: a second call (or an embedding application's own subscriber)
/// wins silently.
pub fn init_tracing() {
    let filter = std::env::var(LOG_FILTER_ENV)
        .or_else(|_| std::env::var(EnvFilter::DEFAULT_ENV))
        .map_or_else(
            |_| EnvFilter::new("info"),
            |directives| {
                EnvFilter::try_new(&directives).unwrap_or_else(|_| EnvFilter::new("info"))
            },
        );

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(true)
        .try_init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_tracing_is_idempotent() {
        init_tracing();
        init_tracing();
        tracing::debug!("still alive after double init");
    }
}
