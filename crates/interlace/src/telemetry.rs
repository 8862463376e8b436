//! Tracing subscriber setup.
//!
//! `log` records emitted by the git layer are forwarded into `tracing` so a
//! single filter governs both.

use tracing_subscriber::prelude::*;
use tracing_subscriber::{fmt, EnvFilter, Layer};

#[derive(Debug, thiserror::Error)]
pub enum TelemetryError {
    #[error("Invalid log filter '{filter}': {message}")]
    Filter { filter: String, message: String },

    #[error("A global subscriber is already installed: {0}")]
    AlreadyInstalled(String),
}

/// Builds the log filter. An explicit level wins over `RUST_LOG`.
pub fn build_filter(level: Option<&str>) -> Result<EnvFilter, TelemetryError> {
    match level {
        Some(level) => EnvFilter::try_new(level).map_err(|e| TelemetryError::Filter {
            filter: level.to_string(),
            message: e.to_string(),
        }),
        None => Ok(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))),
    }
}

/// Installs the global subscriber and the `log` bridge.
pub fn init(level: Option<&str>, json: bool) -> Result<(), TelemetryError> {
    let filter = build_filter(level)?;

    let fmt_layer = if json {
        fmt::layer().json().with_current_span(true).boxed()
    } else {
        fmt::layer().with_target(false).boxed()
    };

    let subscriber = tracing_subscriber::registry().with(filter).with(fmt_layer);
    tracing::subscriber::set_global_default(subscriber)
        .map_err(|e| TelemetryError::AlreadyInstalled(e.to_string()))?;

    tracing_log::LogTracer::init().map_err(|e| TelemetryError::AlreadyInstalled(e.to_string()))
}
