//! Process logging setup.
//!
//! Library code logs through the `log` facade and opens `tracing` spans
//! around pipeline stages; [`init_logging`] routes both into one
//! `tracing-subscriber` registry.

use thiserror::Error;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::{fmt, EnvFilter};

use crate::config::schema::LoggingConfig;

#[derive(Error, Debug)]
pub enum LoggingError {
    #[error("Invalid log filter '{filter}': {reason}")]
    InvalidFilter { filter: String, reason: String },

    #[error("Logging already initialized: {0}")]
    AlreadyInitialized(String),
}

/// `RUST_LOG` wins over the configured level when it is set and non-empty.
pub fn build_filter(level: &str, env_override: Option<&str>) -> Result<EnvFilter, LoggingError> {
    let directives = match env_override.map(str::trim) {
        Some(value) if !value.is_empty() => value,
        _ => level,
    };

    EnvFilter::try_new(directives).map_err(|e| LoggingError::InvalidFilter {
        filter: directives.to_string(),
        reason: e.to_string(),
    })
}

/// Installs the global subscriber and the `log` bridge.
///
/// Fails instead of panicking when a subscriber is already installed.
pub fn init_logging(config: &LoggingConfig) -> Result<(), LoggingError> {
    let env_value = std::env::var(EnvFilter::DEFAULT_ENV).ok();
    let filter = build_filter(&config.level, env_value.as_deref())?;

    let registry = tracing_subscriber::registry().with(filter);
    let installed = if config.json {
        tracing::subscriber::set_global_default(registry.with(fmt::layer().json().with_target(true)))
    } else {
        tracing::subscriber::set_global_default(registry.with(fmt::layer().with_target(true)))
    };
    installed.map_err(|e| LoggingError::AlreadyInitialized(e.to_string()))?;

    tracing_log::LogTracer::init().map_err(|e| LoggingError::AlreadyInitialized(e.to_string()))?;

    log::debug!(
        "Logging initialized (level: {}, json: {})",
        config.level,
        config.json
    );
    Ok(())
}
