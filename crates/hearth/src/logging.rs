//! # Logging
//!
//! Installs the process-wide `tracing` subscriber. Library code only emits
//! events; binaries and tests decide whether anything is printed.

use serde::{Deserialize, Serialize};
use tracing_subscriber::EnvFilter;

use crate::error::{EngineError, EngineResult};

/// Log output settings.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// `EnvFilter` directives, e.g. `"info,hearth_core=debug"`. `RUST_LOG`
    /// takes precedence when set.
    pub filter: String,
    /// Print the module path of each event.
    pub with_target: bool,
    /// Colour the output.
    pub ansi: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: "info".to_string(),
            with_target: false,
            ansi: true,
        }
    }
}

/// Installs a formatting subscriber filtered by `RUST_LOG`, falling back to
/// `config.filter`.
///
/// # Errors
///
/// [`EngineError::Logging`] if the filter does not parse or a global
/// subscriber is already installed.
pub fn init_logging(config: &LoggingConfig) -> EngineResult<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.filter))
        .map_err(|err| EngineError::Logging(err.to_string()))?;

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(config.with_target)
        .with_ansi(config.ansi)
        .try_init()
        .map_err(|err| EngineError::Logging(err.to_string()))
}
