//! # Dynamic Allocator
//!
//! Variable-size allocations out of one pre-reserved arena, backed by a
//! [`Freelist`].

use std::mem::size_of;
use std::ops::Range;

use super::address::{Address, ARENA_BASE};
use super::freelist::Freelist;
use crate::error::{MemoryError, MemoryResult};

/// A first-fit allocator over a single arena.
///
/// The arena is reserved (and zeroed) once at creation. Allocations are
/// returned as [`Address`] values in `[ARENA_BASE, ARENA_BASE + total_size)`.
///
/// # Thread Safety
///
/// Not synchronized. [`MemorySystem`](super::MemorySystem) wraps it in its
/// global lock.
#[derive(Debug)]
pub struct DynamicAllocator {
    /// Address of arena byte zero.
    base: u64,
    /// The arena itself.
    arena: Box<[u8]>,
    /// Free ranges within the arena.
    freelist: Freelist,
}

impl DynamicAllocator {
    /// Total bytes an allocator over `total_size` arena bytes occupies:
    /// freelist metadata, allocator state and the arena.
    #[must_use]
    pub fn memory_requirement(total_size: u64) -> u64 {
        Freelist::memory_requirement(total_size) + size_of::<Self>() as u64 + total_size
    }

    /// Reserves an arena of `total_size` bytes with the default freelist pool.
    ///
    /// # Errors
    ///
    /// Returns [`MemoryError::ZeroSize`] for an empty arena and
    /// [`MemoryError::InvalidConfig`] if the arena cannot be addressed.
    pub fn new(total_size: u64) -> MemoryResult<Self> {
        Self::with_node_capacity(total_size, Freelist::default_node_capacity(total_size))
    }

    /// Reserves an arena whose freelist can track `node_capacity` free ranges.
    ///
    /// # Errors
    ///
    /// See [`new`](Self::new) and [`Freelist::with_node_capacity`].
    pub fn with_node_capacity(total_size: u64, node_capacity: usize) -> MemoryResult<Self> {
        let freelist = Freelist::with_node_capacity(total_size, node_capacity)?;
        let arena_len = usize::try_from(total_size).map_err(|_| {
            MemoryError::InvalidConfig(format!("arena of {total_size} bytes is not addressable"))
        })?;
        if ARENA_BASE.checked_add(total_size).is_none() {
            return Err(MemoryError::InvalidConfig(format!(
                "arena of {total_size} bytes overflows the address space"
            )));
        }

        Ok(Self {
            base: ARENA_BASE,
            arena: vec![0u8; arena_len].into_boxed_slice(),
            freelist,
        })
    }

    /// Returns the arena size in bytes.
    #[inline]
    #[must_use]
    pub fn total_size(&self) -> u64 {
        self.freelist.total_size()
    }

    /// Returns the number of free bytes.
    #[must_use]
    pub fn free_space(&self) -> u64 {
        self.freelist.free_space()
    }

    /// Returns the underlying freelist.
    #[inline]
    #[must_use]
    pub const fn freelist(&self) -> &Freelist {
        &self.freelist
    }

    /// Returns `true` if `address` points into the arena.
    #[inline]
    #[must_use]
    pub fn contains(&self, address: Address) -> bool {
        address.get() >= self.base && address.get() - self.base < self.total_size()
    }

    /// Returns the arena offset of `address`.
    ///
    /// # Errors
    ///
    /// Returns [`MemoryError::OutOfBounds`] if `address` is not in the arena.
    pub fn offset_of(&self, address: Address) -> MemoryResult<u64> {
        if self.contains(address) {
            Ok(address.get() - self.base)
        } else {
            Err(self.out_of_bounds(address, 0))
        }
    }

    /// Allocates `size` bytes.
    ///
    /// # Errors
    ///
    /// [`MemoryError::OutOfMemory`] when no free range fits, or
    /// [`MemoryError::ZeroSize`] for an empty request.
    pub fn alloc(&mut self, size: u64) -> MemoryResult<Address> {
        match self.freelist.allocate(size) {
            Ok(offset) => Ok(Address::from_raw(self.base + offset)),
            Err(err) => {
                tracing::error!("dynamic allocator: failed to allocate {} bytes: {}", size, err);
                Err(err)
            }
        }
    }

    /// Returns `size` bytes at `address` to the arena.
    ///
    /// # Errors
    ///
    /// [`MemoryError::OutOfBounds`] if `address` is not inside the arena,
    /// otherwise any error of [`Freelist::free`].
    pub fn free(&mut self, address: Address, size: u64) -> MemoryResult<()> {
        let offset = match self.offset_of(address) {
            Ok(offset) => offset,
            Err(err) => {
                tracing::error!(
                    "dynamic allocator: address {} was not allocated by this allocator",
                    address
                );
                return Err(err);
            }
        };

        self.freelist.free(offset, size).map_err(|err| {
            tracing::error!("dynamic allocator: failed to free block at {}: {}", address, err);
            err
        })
    }

    /// Borrows `len` arena bytes starting at `address`.
    ///
    /// # Errors
    ///
    /// Returns [`MemoryError::OutOfBounds`] if the range leaves the arena.
    pub fn range(&self, address: Address, len: u64) -> MemoryResult<&[u8]> {
        let span = self.span(address, len)?;
        Ok(&self.arena[span])
    }

    /// Mutably borrows `len` arena bytes starting at `address`.
    ///
    /// # Errors
    ///
    /// Returns [`MemoryError::OutOfBounds`] if the range leaves the arena.
    pub fn range_mut(&mut self, address: Address, len: u64) -> MemoryResult<&mut [u8]> {
        let span = self.span(address, len)?;
        Ok(&mut self.arena[span])
    }

    /// Mutably borrows two disjoint ranges at once.
    ///
    /// # Errors
    ///
    /// [`MemoryError::OutOfBounds`] if either range leaves the arena and
    /// [`MemoryError::AliasedBlocks`] if they overlap.
    pub fn range_pair_mut(
        &mut self,
        first: (Address, u64),
        second: (Address, u64),
    ) -> MemoryResult<(&mut [u8], &mut [u8])> {
        let a = self.span(first.0, first.1)?;
        let b = self.span(second.0, second.1)?;
        if a.start < b.end && b.start < a.end {
            return Err(MemoryError::AliasedBlocks {
                first: first.0.get(),
                second: second.0.get(),
            });
        }

        if a.start < b.start {
            let (low, high) = self.arena.split_at_mut(b.start);
            Ok((&mut low[a], &mut high[..b.end - b.start]))
        } else {
            let (low, high) = self.arena.split_at_mut(a.start);
            Ok((&mut high[..a.end - a.start], &mut low[b]))
        }
    }

    /// Sets `len` bytes at `address` to `value`.
    ///
    /// # Errors
    ///
    /// Returns [`MemoryError::OutOfBounds`] if the range leaves the arena.
    pub fn fill(&mut self, address: Address, len: u64, value: u8) -> MemoryResult<()> {
        self.range_mut(address, len)?.fill(value);
        Ok(())
    }

    /// Copies `len` bytes from `source` to `destination`. The ranges may overlap.
    ///
    /// # Errors
    ///
    /// Returns [`MemoryError::OutOfBounds`] if either range leaves the arena.
    pub fn copy_within(&mut self, source: Address, destination: Address, len: u64) -> MemoryResult<()> {
        let from = self.span(source, len)?;
        let to = self.span(destination, len)?;
        self.arena.copy_within(from, to.start);
        Ok(())
    }

    /// Zeroes the arena and releases it.
    pub fn destroy(mut self) {
        self.arena.fill(0);
        self.freelist.clear();
        tracing::debug!("dynamic allocator: destroyed arena of {} bytes", self.arena.len());
    }

    fn span(&self, address: Address, len: u64) -> MemoryResult<Range<usize>> {
        let total = self.total_size();
        let offset = address
            .get()
            .checked_sub(self.base)
            .filter(|&offset| offset.checked_add(len).is_some_and(|end| end <= total))
            .ok_or_else(|| self.out_of_bounds(address, len))?;

        // Both ends fit in the arena, whose length is a usize.
        let start = usize::try_from(offset).map_err(|_| self.out_of_bounds(address, len))?;
        let len = usize::try_from(len).map_err(|_| self.out_of_bounds(address, len))?;
        Ok(start..start + len)
    }

    fn out_of_bounds(&self, address: Address, size: u64) -> MemoryError {
        MemoryError::OutOfBounds {
            address: address.get(),
            size,
            start: self.base,
            end: self.base + self.total_size(),
        }
    }
}
