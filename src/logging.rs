//! Tracing initialization.
//!
//! The library only emits `tracing` events; binaries call [`init_tracing`]
//! once at startup. Filtering honours `RUST_LOG`
//! (e.g. `RUST_LOG=exchange_feed=debug`) and defaults to `info`.

use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

/// Installs the global subscriber: JSON lines when `json` is true, compact
/// human-readable output otherwise.
///
/// # Panics
///
/// Panics if a global subscriber has already been set.
pub fn init_tracing(json: bool) {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let registry = tracing_subscriber::registry().with(env_filter);

    if json {
        registry
            .with(tracing_subscriber::fmt::layer().json().with_target(true))
            .init();
    } else {
        registry
            .with(tracing_subscriber::fmt::layer().compact().with_target(true))
            .init();
    }
}
