//! # Engine
//!
//! The application object. It owns the [`MemorySystem`] from startup to
//! shutdown and hands shared references to every subsystem that allocates.

use std::path::Path;
use std::sync::Arc;

use hearth_core::{MemoryConfig, MemorySystem, ShutdownReport};
use serde::{Deserialize, Serialize};

use crate::error::{EngineError, EngineResult};
use crate::logging::LoggingConfig;

/// Top-level configuration file.
///
/// ```toml
/// [memory]
/// arena_size = 67108864
///
/// [logging]
/// filter = "info"
/// ```
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Arena and tracker sizing.
    pub memory: MemoryConfig,
    /// Log output.
    pub logging: LoggingConfig,
}

impl EngineConfig {
    /// Parses and validates a TOML document.
    ///
    /// # Errors
    ///
    /// [`EngineError::Config`] if the document does not parse or the memory
    /// section is invalid.
    pub fn from_toml_str(text: &str) -> EngineResult<Self> {
        let config: Self = toml::from_str(text).map_err(|err| EngineError::Config(err.to_string()))?;
        config
            .memory
            .validate()
            .map_err(|err| EngineError::Config(err.to_string()))?;
        Ok(config)
    }

    /// Reads a TOML file.
    ///
    /// # Errors
    ///
    /// [`EngineError::Config`] if the file cannot be read or parsed.
    pub fn from_file(path: impl AsRef<Path>) -> EngineResult<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .map_err(|err| EngineError::Config(format!("cannot read {}: {err}", path.display())))?;
        Self::from_toml_str(&text)
    }
}

/// Running engine state.
///
/// # Example
///
/// ```rust,ignore
/// let config = EngineConfig::from_file("config/hearth.toml")?;
/// init_logging(&config.logging)?;
///
/// let engine = Engine::init(config)?;
/// let mut index = AssetIndex::new(Arc::clone(engine.memory()))?;
/// // ... run ...
/// drop(index);
///
/// let report = engine.shutdown()?;
/// ```
pub struct Engine {
    config: EngineConfig,
    memory: Arc<MemorySystem>,
}

impl Engine {
    /// Reserves the memory system.
    ///
    /// # Errors
    ///
    /// [`EngineError::Memory`] if the arena cannot be reserved.
    pub fn init(config: EngineConfig) -> EngineResult<Self> {
        let memory = Arc::new(MemorySystem::new(&config.memory)?);
        tracing::info!("engine: initialized");
        Ok(Self { config, memory })
    }

    /// The shared memory system.
    #[inline]
    #[must_use]
    pub const fn memory(&self) -> &Arc<MemorySystem> {
        &self.memory
    }

    /// The configuration the engine was started with.
    #[inline]
    #[must_use]
    pub const fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Per-tag memory usage.
    #[must_use]
    pub fn usage_report(&self) -> String {
        self.memory.usage_report()
    }

    /// Shuts the memory system down and returns what was leaked.
    ///
    /// Subsystems still holding the memory system at this point can no
    /// longer allocate or free.
    ///
    /// # Errors
    ///
    /// [`EngineError::Memory`] if the memory system was already shut down.
    pub fn shutdown(self) -> EngineResult<ShutdownReport> {
        let holders = Arc::strong_count(&self.memory) - 1;
        if holders > 0 {
            tracing::warn!("engine: shutting down with {} memory system handles still alive", holders);
        }

        let report = self.memory.shutdown()?;
        tracing::info!("engine: shut down");
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hearth_core::MemoryTag;

    #[test]
    fn test_config_sections_default() {
        let config = EngineConfig::from_toml_str("[logging]\nfilter = \"debug\"\n").unwrap();
        assert_eq!(config.memory, MemoryConfig::default());
        assert_eq!(config.logging.filter, "debug");
    }

    #[test]
    fn test_config_rejects_empty_arena() {
        assert!(matches!(
            EngineConfig::from_toml_str("[memory]\narena_size = 0\n"),
            Err(EngineError::Config(_))
        ));
    }

    #[test]
    fn test_engine_lifecycle() {
        let config = EngineConfig::from_toml_str("[memory]\narena_size = 65536\n").unwrap();
        let engine = Engine::init(config).unwrap();

        let block = engine.memory().alloc(100, MemoryTag::Game).unwrap();
        assert!(engine.usage_report().contains("  GAME: 100.00B"));
        engine.memory().free(block).unwrap();

        let report = engine.shutdown().unwrap();
        assert!(report.is_clean());
    }
}
