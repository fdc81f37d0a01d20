//! Structured logging configuration.
//!
//! The core never requires a logger; events remain the integration surface.
//! These helpers install a `tracing-subscriber` formatter for binaries and
//! tests that want the crate's `tracing` output on the console.

use tracing::Level;
use tracing_subscriber::EnvFilter;

use crate::config::LoggingSection;

/// Install a console subscriber at INFO, honoring `RUST_LOG` when set.
///
/// Safe to call more than once; only the first installation wins.
pub fn init() {
    init_with_level(Level::INFO);
}

/// Install a console subscriber at the given level, honoring `RUST_LOG`
/// when set.
pub fn init_with_level(level: Level) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(level.to_string()));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .try_init();
}

/// Install a subscriber according to the logging section of the
/// configuration.
pub fn init_from_config(config: &LoggingSection) {
    if config.log_to_console {
        init_with_level(config.log_level);
    }
}
