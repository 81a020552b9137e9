//! Optional operational-logging init. The library itself never installs
//! a global subscriber — callers (binaries, tests) opt in explicitly.

use tracing_subscriber::EnvFilter;

/// Installs a `tracing-subscriber` fmt layer filtered by `RUST_LOG`
/// (falling back to `info` when unset). Safe to call more than once;
/// later calls are ignored.
pub fn init() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}
