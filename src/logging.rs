//! Console logging for containerized workloads.
//!
//! Every Poiesis workload logs to stdout; the cluster is responsible for
//! shipping the stream. The level comes from `LOG_LEVEL` (or a standard
//! `RUST_LOG` directive set for finer control), defaulting to `info`.

use tracing_subscriber::{fmt, EnvFilter};

/// Initialize the global tracing subscriber. Safe to call once per process;
/// later calls are ignored so tests can initialize freely.
pub fn init_tracing(level: &str) {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    let _ = fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_ansi(std::io::IsTerminal::is_terminal(&std::io::stdout()))
        .try_init();
}
