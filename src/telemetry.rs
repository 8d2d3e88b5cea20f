// Tracing subscriber setup driven by the logger section of the config

use thiserror::Error;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::{LogFormat, LoggerConfig};

#[derive(Error, Debug)]
pub enum TelemetryError {
    #[error("Invalid log filter `{0}`: {1}")]
    Filter(String, String),

    #[error("Failed to install tracing subscriber: {0}")]
    Install(String),
}

/// RUST_LOG wins over the configured level when set.
pub fn build_filter(config: &LoggerConfig) -> Result<EnvFilter, TelemetryError> {
    match EnvFilter::try_from_default_env() {
        Ok(filter) => Ok(filter),
        Err(_) => EnvFilter::try_new(&config.level)
            .map_err(|e| TelemetryError::Filter(config.level.clone(), e.to_string())),
    }
}

/// Installs the global subscriber. Fails instead of panicking when one is already set.
pub fn init_tracing(config: &LoggerConfig) -> Result<(), TelemetryError> {
    let filter = build_filter(config)?;
    let registry = tracing_subscriber::registry().with(filter);

    let result = match config.format {
        LogFormat::Json => registry
            .with(fmt::layer().json().with_current_span(true))
            .try_init(),
        LogFormat::Pretty => registry.with(fmt::layer().with_target(true)).try_init(),
    };

    result.map_err(|e| TelemetryError::Install(e.to_string()))
}
