//! # Tracing Setup
//!
//! ## Log Levels
//! - `RUST_LOG=debug` - Show debug messages
//! - `RUST_LOG=brew_engine=trace` - Trace the engine only
//! - Default: [`DEFAULT_FILTER`]
//!
//! Settlement attempts log stage transitions at `debug`, commits at `info`
//! and conflicts at `warn`.

use tracing_subscriber::EnvFilter;

pub const DEFAULT_FILTER: &str = "info,brew=debug,sqlx=warn";

/// Installs the global subscriber. A second call is a no-op.
pub fn init_tracing() {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .try_init();
}
