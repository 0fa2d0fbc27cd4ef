//! Shared ambient infrastructure: error types, configuration,
//! persisted settings, progress reporting, the single-instance lock,
//! and tracing setup. Nothing in this crate is specific to the relay
//! or the peer session engine.

#![forbid(unsafe_code)]

pub mod config;
pub mod error;
pub mod progress;
pub mod settings;
pub mod singleton;

pub use config::CoreConfig;
pub use error::{CoreError, ReconnectClass, Result};
pub use progress::{NullObserver, Progress, ProgressObserver};

/// Initialize tracing with sensible defaults.
///
/// Log level is controlled by the `RUST_LOG` environment variable.
/// Defaults to `info` if not set.
pub fn init_tracing() {
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .init();
}

/// Initialize tracing with a specific default level.
pub fn init_tracing_with_default(default_level: &str) {
    use tracing_subscriber::EnvFilter;

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .init();
}
