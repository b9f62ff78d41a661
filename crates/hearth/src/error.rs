//! # Engine Error Types

use std::path::PathBuf;

use hearth_core::MemoryError;
use thiserror::Error;

/// Errors raised above the memory layer.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EngineError {
    /// The memory system rejected an operation.
    #[error("memory error: {0}")]
    Memory(#[from] MemoryError),

    /// The configuration could not be read or parsed.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// The log subscriber could not be installed.
    #[error("logging setup failed: {0}")]
    Logging(String),

    /// An asset file could not be read.
    #[error("cannot read {path}: {message}")]
    Io {
        /// File that failed.
        path: PathBuf,
        /// OS error text.
        message: String,
    },

    /// An asset file has no content.
    #[error("asset file {0} is empty")]
    EmptyAsset(PathBuf),

    /// No asset is registered under this handle.
    #[error("unknown asset handle {0}")]
    UnknownAsset(u32),

    /// The asset loader worker has stopped.
    #[error("asset loader is not running")]
    LoaderClosed,
}

/// Result type for engine operations.
pub type EngineResult<T> = Result<T, EngineError>;
