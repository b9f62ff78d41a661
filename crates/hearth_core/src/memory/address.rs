//! # Arena Addresses

use std::fmt;

use bytemuck::{Pod, Zeroable};

/// Address of the first arena byte.
///
/// Offsets are shifted by this base so that `0` is never a valid address.
pub const ARENA_BASE: u64 = 0x1000;

/// An address inside a [`DynamicAllocator`](super::DynamicAllocator) arena.
///
/// Addresses are plain values: they carry no lifetime and stay valid only
/// until the block they point into is freed.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Pod, Zeroable)]
#[repr(transparent)]
pub struct Address(u64);

impl Address {
    /// Wraps a raw address value.
    #[inline]
    #[must_use]
    pub const fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    /// Returns the raw address value.
    #[inline]
    #[must_use]
    pub const fn get(self) -> u64 {
        self.0
    }

    /// Returns the address `bytes` further into the arena.
    #[inline]
    #[must_use]
    pub const fn add(self, bytes: u64) -> Self {
        Self(self.0 + bytes)
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}
