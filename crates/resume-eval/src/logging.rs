//! Subscriber setup for the binary.
//!
//! Pipeline code emits `tracing` events; the database and worker plumbing
//! use `log` macros, which are forwarded into the same subscriber.

use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::EnvFilter;

use crate::config::{LogFormat, LoggingConfig};
use crate::error::ResumeEvalError;

/// Directives applied on top of the configured level to quiet chatty
/// dependencies.
const DEPENDENCY_DIRECTIVES: &[&str] = &["hyper=warn", "reqwest=warn", "lopdf=warn"];

/// Builds the filter: `RUST_LOG` when set, otherwise the configured level.
pub fn build_filter(config: &LoggingConfig) -> Result<EnvFilter, ResumeEvalError> {
    if let Ok(filter) = EnvFilter::try_from_default_env() {
        return Ok(filter);
    }

    let mut directives = vec![config.level.clone()];
    directives.extend(DEPENDENCY_DIRECTIVES.iter().map(|d| d.to_string()));
    EnvFilter::try_new(directives.join(","))
        .map_err(|e| ResumeEvalError::Logging(format!("invalid level '{}': {}", config.level, e)))
}

/// Installs the global subscriber and the `log` bridge. Call once.
pub fn init_logging(config: &LoggingConfig) -> Result<(), ResumeEvalError> {
    let filter = build_filter(config)?;
    let registry = tracing_subscriber::registry().with(filter);

    let result = match config.format {
        LogFormat::Json => tracing::subscriber::set_global_default(
            registry.with(tracing_subscriber::fmt::layer().json().with_target(true)),
        ),
        LogFormat::Pretty => tracing::subscriber::set_global_default(
            registry.with(tracing_subscriber::fmt::layer().with_target(false)),
        ),
    };
    result.map_err(|e| ResumeEvalError::Logging(e.to_string()))?;

    tracing_log::LogTracer::init().map_err(|e| ResumeEvalError::Logging(e.to_string()))?;

    tracing::debug!(level = %config.level, format = ?config.format, "Logging initialized");
    Ok(())
}
