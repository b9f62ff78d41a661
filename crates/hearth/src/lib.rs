//! # HEARTH
//!
//! The engine runtime, built on the `hearth_core` memory system.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │                        HEARTH                            │
//! ├──────────────────────────────────────────────────────────┤
//! │  Engine ──owns──> Arc<MemorySystem>                      │
//! │                      ▲          ▲                        │
//! │          AssetIndex ─┘          └─ AssetLoader (thread)  │
//! │          (HashMap + DArray)        (crossbeam channels)  │
//! └──────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Modules
//!
//! - `engine`: configuration, init and shutdown
//! - `logging`: `tracing` subscriber setup
//! - `assets`: asset index and background loader

#![deny(missing_docs)]
#![deny(unsafe_code)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![deny(clippy::perf)]

pub mod assets;
pub mod engine;
pub mod error;
pub mod logging;

// Re-export the memory substrate
pub use hearth_core as core;

pub use assets::{AssetHandle, AssetIndex, AssetLoader, AssetRecord, LoadError, LoadReply, LoadedAsset};
pub use engine::{Engine, EngineConfig};
pub use error::{EngineError, EngineResult};
pub use logging::{init_logging, LoggingConfig};
