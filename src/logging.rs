//! Structured logging setup
//!
//! Builds the global tracing subscriber from [`LoggingConfig`]. A `RUST_LOG`
//! environment variable takes precedence over the configured level.

use tracing_subscriber::{EnvFilter, fmt, prelude::*};

use crate::config::LoggingConfig;

/// Initialize the global tracing subscriber.
///
/// Fails if a subscriber has already been installed for this process.
pub fn init_tracing(config: &LoggingConfig) -> Result<(), Box<dyn std::error::Error>> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.level.clone()));

    let registry = tracing_subscriber::registry().with(filter);

    match config.format.as_str() {
        "json" => registry.with(fmt::layer().json()).try_init()?,
        _ => registry.with(fmt::layer()).try_init()?,
    }

    Ok(())
}
