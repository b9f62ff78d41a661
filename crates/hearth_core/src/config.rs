//! # Memory Configuration
//!
//! Sizing of the arena and of the bookkeeping around it. Loaded once at
//! startup, usually as the `[memory]` table of the engine's TOML file.
//!
//! ```toml
//! arena_size = 67108864
//! max_free_ranges = 4096
//! tracker_buckets = 1024
//! warn_on_unknown_tag = true
//! ```

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{MemoryError, MemoryResult};

/// Default arena size: 64 MiB.
pub const DEFAULT_ARENA_SIZE: u64 = 64 * 1024 * 1024;

/// Default bucket hint of the allocation record map.
pub const DEFAULT_TRACKER_BUCKETS: usize = 1024;

/// Configuration of a [`MemorySystem`](crate::memory::MemorySystem).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MemoryConfig {
    /// Arena size in bytes.
    pub arena_size: u64,
    /// Number of free ranges the freelist can track. `None` derives it from
    /// the arena size.
    pub max_free_ranges: Option<usize>,
    /// Initial bucket hint of the allocation record map.
    pub tracker_buckets: usize,
    /// Log a warning whenever a block is allocated with the unknown tag.
    pub warn_on_unknown_tag: bool,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            arena_size: DEFAULT_ARENA_SIZE,
            max_free_ranges: None,
            tracker_buckets: DEFAULT_TRACKER_BUCKETS,
            warn_on_unknown_tag: true,
        }
    }
}

impl MemoryConfig {
    /// Checks the values before anything is reserved.
    ///
    /// # Errors
    ///
    /// [`MemoryError::InvalidConfig`] for an empty arena or an empty free
    /// range pool.
    pub fn validate(&self) -> MemoryResult<()> {
        if self.arena_size == 0 {
            return Err(MemoryError::InvalidConfig(
                "arena_size must be greater than zero".to_string(),
            ));
        }
        if self.max_free_ranges == Some(0) {
            return Err(MemoryError::InvalidConfig(
                "max_free_ranges must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }

    /// Parses and validates a TOML document.
    ///
    /// # Errors
    ///
    /// [`MemoryError::InvalidConfig`] if the document does not parse or
    /// fails [`validate`](Self::validate).
    pub fn from_toml_str(text: &str) -> MemoryResult<Self> {
        let config: Self =
            toml::from_str(text).map_err(|err| MemoryError::InvalidConfig(err.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Reads, parses and validates a TOML file.
    ///
    /// # Errors
    ///
    /// [`MemoryError::InvalidConfig`] if the file cannot be read or parsed.
    pub fn from_file(path: impl AsRef<Path>) -> MemoryResult<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|err| {
            MemoryError::InvalidConfig(format!("cannot read {}: {err}", path.display()))
        })?;
        Self::from_toml_str(&text)
    }
}
