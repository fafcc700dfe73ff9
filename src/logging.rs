//! Tracing subscriber setup
//!
//! The library only emits `tracing` events; hosts that want them on stderr
//! call `init_logging` once. `RUST_LOG` overrides the default filter.

use tracing_subscriber::EnvFilter;

pub type InitError = Box<dyn std::error::Error + Send + Sync>;

/// Install a compact stderr subscriber filtered by `RUST_LOG`, falling back
/// to `default_filter` (e.g. `"info"` or `"page_harvest=debug"`).
///
/// Returns an error instead of panicking when a global subscriber is
/// already set.
pub fn init_logging(default_filter: &str) -> Result<(), InitError> {
    let env_filter = EnvFilter::try_from_default_env().or_else(|_| EnvFilter::try_new(default_filter))?;

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .with_target(true)
        .compact()
        .try_init()
}
