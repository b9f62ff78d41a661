//! # Dynamic Array
//!
//! A growable sequence of plain-old-data elements whose storage is a
//! [`MemoryTag::DArray`] block of a [`MemorySystem`].
//!
//! The array owns its block: growth swaps the block behind the value, so
//! there is no handle for callers to refresh, and dropping the array frees
//! the block.

use std::marker::PhantomData;
use std::mem::size_of;
use std::sync::Arc;

use bytemuck::Pod;

use crate::error::{MemoryError, MemoryResult};
use crate::memory::{Address, MemoryGuard, MemorySystem, MemoryTag};

/// Capacity used by [`DArray::new`].
pub const DEFAULT_CAPACITY: usize = 4;

/// Capacity, length and location of the element block.
#[derive(Clone, Copy, Debug)]
struct ArrayHeader {
    block: Address,
    capacity: usize,
    length: usize,
}

/// Growable array of `T` stored in the engine arena.
///
/// # Invariants
///
/// - `len() <= capacity()`
/// - elements `[0, len())` are contiguous at stride `size_of::<T>()`
///
/// # Example
///
/// ```rust,ignore
/// let mut particles: DArray<Particle> = DArray::new(Arc::clone(&memory))?;
/// particles.push(Particle::spawn(origin))?;
///
/// while let Ok(dead) = particles.pop() {
///     recycle(dead);
/// }
/// ```
pub struct DArray<T: Pod> {
    /// System owning the element block.
    memory: Arc<MemorySystem>,
    /// Element block bookkeeping.
    header: ArrayHeader,
    /// Set once the block has been freed.
    released: bool,
    /// Marker for T.
    _marker: PhantomData<T>,
}

impl<T: Pod> DArray<T> {
    const STRIDE: usize = size_of::<T>();

    /// Creates an array with room for [`DEFAULT_CAPACITY`] elements.
    ///
    /// # Errors
    ///
    /// See [`with_capacity`](Self::with_capacity).
    pub fn new(memory: Arc<MemorySystem>) -> MemoryResult<Self> {
        Self::with_capacity(memory, DEFAULT_CAPACITY)
    }

    /// Creates an array with room for `capacity` elements (at least one).
    ///
    /// # Errors
    ///
    /// [`MemoryError::InvalidConfig`] if `T` is zero-sized, or any error of
    /// [`MemorySystem::alloc`].
    pub fn with_capacity(memory: Arc<MemorySystem>, capacity: usize) -> MemoryResult<Self> {
        if Self::STRIDE == 0 {
            return Err(MemoryError::InvalidConfig(
                "darray elements must not be zero-sized".to_string(),
            ));
        }

        let capacity = capacity.max(1);
        let block = memory.alloc(Self::bytes(capacity), MemoryTag::DArray)?;
        Ok(Self {
            memory,
            header: ArrayHeader {
                block,
                capacity,
                length: 0,
            },
            released: false,
            _marker: PhantomData,
        })
    }

    /// Number of elements.
    #[inline]
    #[must_use]
    pub const fn len(&self) -> usize {
        self.header.length
    }

    /// Returns `true` if the array holds no elements.
    #[inline]
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.header.length == 0
    }

    /// Number of elements that fit before the next growth.
    #[inline]
    #[must_use]
    pub const fn capacity(&self) -> usize {
        self.header.capacity
    }

    /// Size of one element in bytes.
    #[inline]
    #[must_use]
    pub const fn stride(&self) -> usize {
        Self::STRIDE
    }

    /// Address of the element block. Changes when the array grows.
    #[inline]
    #[must_use]
    pub const fn block(&self) -> Address {
        self.header.block
    }

    #[inline]
    fn bytes(count: usize) -> u64 {
        (count * Self::STRIDE) as u64
    }

    #[inline]
    fn at(header: &ArrayHeader, index: usize) -> Address {
        header.block.add(Self::bytes(index))
    }

    /// Doubles the capacity until `needed` elements fit.
    fn grow_to(guard: &mut MemoryGuard<'_>, header: &mut ArrayHeader, needed: usize) -> MemoryResult<()> {
        if needed <= header.capacity {
            return Ok(());
        }

        let mut capacity = header.capacity;
        while capacity < needed {
            capacity *= 2;
        }
        header.block = guard.realloc(Some(header.block), Self::bytes(capacity), MemoryTag::DArray)?;
        tracing::debug!(
            "darray: grew from {} to {} elements of {} bytes",
            header.capacity,
            capacity,
            Self::STRIDE
        );
        header.capacity = capacity;
        Ok(())
    }

    fn write_at(guard: &mut MemoryGuard<'_>, header: &ArrayHeader, index: usize, value: &T) -> MemoryResult<()> {
        guard
            .range_mut(Self::at(header, index), Self::bytes(1))?
            .copy_from_slice(bytemuck::bytes_of(value));
        Ok(())
    }

    fn read_at(guard: &MemoryGuard<'_>, header: &ArrayHeader, index: usize) -> MemoryResult<T> {
        let bytes = guard.range(Self::at(header, index), Self::bytes(1))?;
        Ok(bytemuck::pod_read_unaligned(bytes))
    }

    fn check_index(&self, index: usize, limit: usize) -> MemoryResult<()> {
        if index < limit {
            return Ok(());
        }
        tracing::error!(
            "darray: index {} is outside the bounds of this array (length {})",
            index,
            self.header.length
        );
        Err(MemoryError::IndexOutOfBounds {
            index,
            length: self.header.length,
        })
    }

    /// Appends `value`, doubling the capacity when full.
    ///
    /// # Errors
    ///
    /// Any allocation error from growing.
    pub fn push(&mut self, value: T) -> MemoryResult<()> {
        let needed = self.header.length + 1;
        let mut guard = self.memory.lock();
        Self::grow_to(&mut guard, &mut self.header, needed)?;
        Self::write_at(&mut guard, &self.header, self.header.length, &value)?;
        self.header.length += 1;
        Ok(())
    }

    /// Removes and returns the last element.
    ///
    /// # Errors
    ///
    /// [`MemoryError::EmptyArray`] if there is nothing to pop.
    pub fn pop(&mut self) -> MemoryResult<T> {
        if self.header.length == 0 {
            return Err(MemoryError::EmptyArray);
        }
        let guard = self.memory.lock();
        let value = Self::read_at(&guard, &self.header, self.header.length - 1)?;
        self.header.length -= 1;
        Ok(value)
    }

    /// Removes and returns the element at `index`, shifting the tail left.
    ///
    /// # Errors
    ///
    /// [`MemoryError::IndexOutOfBounds`] unless `index < len()`. The array is
    /// left unchanged.
    pub fn pop_at(&mut self, index: usize) -> MemoryResult<T> {
        self.check_index(index, self.header.length)?;

        let mut guard = self.memory.lock();
        let value = Self::read_at(&guard, &self.header, index)?;
        let tail = self.header.length - index - 1;
        if tail > 0 {
            guard.copy(
                Self::at(&self.header, index + 1),
                Self::at(&self.header, index),
                Self::bytes(tail),
            )?;
        }
        self.header.length -= 1;
        Ok(value)
    }

    /// Inserts `value` at `index`, shifting the tail right. `index == len()`
    /// appends.
    ///
    /// # Errors
    ///
    /// [`MemoryError::IndexOutOfBounds`] if `index > len()`, or any
    /// allocation error from growing.
    pub fn insert_at(&mut self, index: usize, value: T) -> MemoryResult<()> {
        self.check_index(index, self.header.length + 1)?;

        let needed = self.header.length + 1;
        let mut guard = self.memory.lock();
        Self::grow_to(&mut guard, &mut self.header, needed)?;
        let tail = self.header.length - index;
        if tail > 0 {
            guard.copy(
                Self::at(&self.header, index),
                Self::at(&self.header, index + 1),
                Self::bytes(tail),
            )?;
        }
        Self::write_at(&mut guard, &self.header, index, &value)?;
        self.header.length += 1;
        Ok(())
    }

    /// Returns a copy of the element at `index`.
    ///
    /// # Errors
    ///
    /// [`MemoryError::IndexOutOfBounds`] unless `index < len()`.
    pub fn get(&self, index: usize) -> MemoryResult<T> {
        self.check_index(index, self.header.length)?;
        Self::read_at(&self.memory.lock(), &self.header, index)
    }

    /// Overwrites the element at `index`.
    ///
    /// # Errors
    ///
    /// [`MemoryError::IndexOutOfBounds`] unless `index < len()`.
    pub fn set(&mut self, index: usize, value: T) -> MemoryResult<()> {
        self.check_index(index, self.header.length)?;
        Self::write_at(&mut self.memory.lock(), &self.header, index, &value)
    }

    /// Appends every element of `values`, growing at most once.
    ///
    /// # Errors
    ///
    /// Any allocation error from growing.
    pub fn extend_from_slice(&mut self, values: &[T]) -> MemoryResult<()> {
        if values.is_empty() {
            return Ok(());
        }

        let needed = self.header.length + values.len();
        let mut guard = self.memory.lock();
        Self::grow_to(&mut guard, &mut self.header, needed)?;
        guard
            .range_mut(Self::at(&self.header, self.header.length), Self::bytes(values.len()))?
            .copy_from_slice(bytemuck::cast_slice(values));
        self.header.length += values.len();
        Ok(())
    }

    /// Copies the elements out.
    ///
    /// # Errors
    ///
    /// Fails only if the owning system has shut down.
    pub fn to_vec(&self) -> MemoryResult<Vec<T>> {
        let guard = self.memory.lock();
        let bytes = guard.range(self.header.block, Self::bytes(self.header.length))?;
        Ok(bytes
            .chunks_exact(Self::STRIDE)
            .map(bytemuck::pod_read_unaligned)
            .collect())
    }

    /// Sets the length to zero. The capacity is kept.
    #[inline]
    pub fn clear(&mut self) {
        self.header.length = 0;
    }

    /// Frees the element block.
    ///
    /// # Errors
    ///
    /// Any error of [`MemorySystem::free`].
    pub fn destroy(mut self) -> MemoryResult<()> {
        self.release()
    }

    fn release(&mut self) -> MemoryResult<()> {
        if std::mem::replace(&mut self.released, true) {
            return Ok(());
        }
        self.memory.free(self.header.block)
    }
}

impl<T: Pod> Drop for DArray<T> {
    fn drop(&mut self) {
        if let Err(err) = self.release() {
            tracing::error!("darray: failed to release block {}: {}", self.header.block, err);
        }
    }
}
