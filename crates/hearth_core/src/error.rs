//! # Memory Error Types
//!
//! All errors that can occur in the allocator and container layers.

use thiserror::Error;

/// Errors that can occur in the memory system.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MemoryError {
    /// No free range is large enough for the request.
    #[error("out of memory: requested {requested} bytes, {available} bytes free")]
    OutOfMemory {
        /// Bytes requested.
        requested: u64,
        /// Total free bytes at the time of the request.
        available: u64,
    },

    /// A zero-byte allocation or free was requested.
    #[error("zero-sized request")]
    ZeroSize,

    /// An address or range lies outside the arena.
    #[error("address {address:#x} (+{size} bytes) is outside the arena [{start:#x}, {end:#x})")]
    OutOfBounds {
        /// Offending address.
        address: u64,
        /// Length of the range that was accessed.
        size: u64,
        /// First valid address.
        start: u64,
        /// One past the last valid address.
        end: u64,
    },

    /// The freelist needed a node to track a new free range and had none left.
    #[error("freelist node pool exhausted: capacity {capacity}")]
    NodePoolExhausted {
        /// Number of nodes in the pool.
        capacity: usize,
    },

    /// A range being freed overlaps space that is already free.
    #[error("range at offset {offset} ({size} bytes) overlaps free space")]
    DoubleFree {
        /// Offset of the range being freed.
        offset: u64,
        /// Size of the range being freed.
        size: u64,
    },

    /// The address has no live allocation record.
    #[error("address {0:#x} is not a live allocation")]
    UntrackedAddress(u64),

    /// Two blocks that must be disjoint share bytes.
    #[error("blocks {first:#x} and {second:#x} overlap")]
    AliasedBlocks {
        /// First block address.
        first: u64,
        /// Second block address.
        second: u64,
    },

    /// An element index is past the end of a container.
    #[error("index {index} out of bounds for length {length}")]
    IndexOutOfBounds {
        /// Requested index.
        index: usize,
        /// Current container length.
        length: usize,
    },

    /// Popped from an empty array.
    #[error("array is empty")]
    EmptyArray,

    /// A hash map slot that holds no entry was used as an entry.
    #[error("bucket {0} holds no entry")]
    EmptyBucket(usize),

    /// The key equals the map's empty-key sentinel and cannot be stored.
    #[error("key equals the empty-key sentinel")]
    SentinelKey,

    /// The memory system has been shut down.
    #[error("memory system has been shut down")]
    ShutDown,

    /// Invalid configuration value or file.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

/// Result type for memory operations.
pub type MemoryResult<T> = Result<T, MemoryError>;
