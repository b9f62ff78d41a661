//! # Memory Management
//!
//! One arena, reserved at startup, serves every allocation in the engine.
//!
//! ## Layers
//!
//! - [`Freelist`]: ordered free ranges with coalescing, fixed node pool
//! - [`DynamicAllocator`]: first-fit allocation of arena addresses
//! - [`MemorySystem`]: locking, per-block records and per-tag accounting
//! - [`LinearAllocator`]: bump allocation inside one tracked block

mod address;
mod dynamic;
mod freelist;
mod linear;
mod system;
mod tag;

pub use address::{Address, ARENA_BASE};
pub use dynamic::DynamicAllocator;
pub use freelist::{FreeRange, Freelist};
pub use linear::LinearAllocator;
pub use system::{MemoryGuard, MemorySystem, ShutdownReport};
pub use tag::{format_bytes, MemoryStats, MemoryTag};
