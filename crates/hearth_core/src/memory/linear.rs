//! # Linear Allocator
//!
//! A bump allocator for short-lived allocations that are freed all at once,
//! carved out of a single [`MemoryTag::LinearAllocator`] block.

use std::sync::Arc;

use super::address::Address;
use super::system::MemorySystem;
use super::tag::MemoryTag;
use crate::error::{MemoryError, MemoryResult};

/// A bump-pointer allocator over one tracked block.
///
/// Allocations are a bounds check and an add. Nothing is freed individually;
/// [`reset`](Self::reset) releases everything at once.
///
/// # Example
///
/// ```rust,ignore
/// let mut frame = LinearAllocator::new(Arc::clone(&memory), 64 * 1024)?;
///
/// let vertices = frame.alloc(4096)?;
/// let indices = frame.alloc(1024)?;
///
/// // End of frame
/// frame.reset()?;
/// ```
pub struct LinearAllocator {
    /// System owning the backing block.
    memory: Arc<MemorySystem>,
    /// Backing block, `None` once destroyed.
    block: Option<Address>,
    /// Block size in bytes.
    capacity: u64,
    /// Bytes handed out since the last reset.
    offset: u64,
}

impl LinearAllocator {
    /// Allocates a backing block of `capacity` bytes from `memory`.
    ///
    /// # Errors
    ///
    /// Any error of [`MemorySystem::alloc`].
    pub fn new(memory: Arc<MemorySystem>, capacity: u64) -> MemoryResult<Self> {
        let block = memory.alloc(capacity, MemoryTag::LinearAllocator)?;
        Ok(Self {
            memory,
            block: Some(block),
            capacity,
            offset: 0,
        })
    }

    /// Returns the total capacity in bytes.
    #[inline]
    #[must_use]
    pub const fn capacity(&self) -> u64 {
        self.capacity
    }

    /// Returns the bytes handed out since the last reset.
    #[inline]
    #[must_use]
    pub const fn used(&self) -> u64 {
        self.offset
    }

    /// Returns the bytes still available.
    #[inline]
    #[must_use]
    pub const fn remaining(&self) -> u64 {
        self.capacity - self.offset
    }

    /// Returns the current marker, an offset into the block.
    #[inline]
    #[must_use]
    pub const fn marker(&self) -> u64 {
        self.offset
    }

    /// Returns the address of `marker` within the block, or `None` if the
    /// marker lies past the block or the allocator was destroyed.
    #[must_use]
    pub fn address_at(&self, marker: u64) -> Option<Address> {
        self.block
            .filter(|_| marker <= self.capacity)
            .map(|block| block.add(marker))
    }

    /// Hands out `size` bytes.
    ///
    /// # Errors
    ///
    /// [`MemoryError::ZeroSize`] for an empty request and
    /// [`MemoryError::OutOfMemory`] when fewer than `size` bytes remain.
    pub fn alloc(&mut self, size: u64) -> MemoryResult<Address> {
        let block = self.block.ok_or(MemoryError::ShutDown)?;
        if size == 0 {
            return Err(MemoryError::ZeroSize);
        }
        if size > self.remaining() {
            tracing::error!(
                "linear allocator: requested {} bytes, only {} remaining",
                size,
                self.remaining()
            );
            return Err(MemoryError::OutOfMemory {
                requested: size,
                available: self.remaining(),
            });
        }

        let address = block.add(self.offset);
        self.offset += size;
        Ok(address)
    }

    /// Releases every allocation and zeroes the block.
    ///
    /// # Errors
    ///
    /// Fails if the owning system has shut down.
    pub fn reset(&mut self) -> MemoryResult<()> {
        let block = self.block.ok_or(MemoryError::ShutDown)?;
        self.memory.lock().fill(block, self.offset, 0)?;
        self.offset = 0;
        Ok(())
    }

    /// Frees the backing block.
    ///
    /// # Errors
    ///
    /// Any error of [`MemorySystem::free`].
    pub fn destroy(mut self) -> MemoryResult<()> {
        self.release()
    }

    fn release(&mut self) -> MemoryResult<()> {
        match self.block.take() {
            Some(block) => self.memory.free(block),
            None => Ok(()),
        }
    }
}

impl Drop for LinearAllocator {
    fn drop(&mut self) {
        if let Err(err) = self.release() {
            tracing::error!("linear allocator: failed to release block: {}", err);
        }
    }
}
