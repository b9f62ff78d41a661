//! # HEARTH Core
//!
//! The engine's memory substrate:
//! - A single pre-reserved arena with a coalescing freelist
//! - Tagged, tracked allocation behind one lock
//! - Arena-backed dynamic arrays and open-addressing hash maps
//!
//! ## Architecture Rules
//!
//! 1. **One arena** - Every engine allocation is carved from it
//! 2. **Every block is tagged** - Usage is reported per category
//! 3. **Misuse is an error** - Double frees and bad indices return `Err`
//!
//! ## Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use hearth_core::{DArray, MemoryConfig, MemorySystem};
//!
//! let memory = Arc::new(MemorySystem::new(&MemoryConfig::default())?);
//! let mut scores: DArray<u32> = DArray::new(Arc::clone(&memory))?;
//! scores.push(42)?;
//! println!("{}", memory.usage_report());
//! ```

#![deny(missing_docs)]
#![deny(unsafe_code)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![deny(clippy::perf)]

pub mod config;
pub mod containers;
pub mod error;
pub mod memory;

pub use config::MemoryConfig;
pub use containers::{DArray, HashMap, Slot};
pub use error::{MemoryError, MemoryResult};
pub use memory::{
    Address, DynamicAllocator, Freelist, LinearAllocator, MemoryGuard, MemoryStats, MemorySystem,
    MemoryTag, ShutdownReport,
};
