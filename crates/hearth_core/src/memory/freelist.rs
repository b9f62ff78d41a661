//! # Freelist
//!
//! Tracks the free byte ranges of a fixed-size arena.
//!
//! Free ranges are kept in a singly linked list ordered by offset. The list
//! nodes come from a pool that is allocated once at creation, so tracking
//! more fragmentation never allocates.

use std::mem::size_of;

use crate::error::{MemoryError, MemoryResult};

/// A node of the free list. `next` links to the next higher free range.
#[derive(Clone, Copy, Debug, Default)]
struct FreelistNode {
    offset: u64,
    size: u64,
    next: Option<usize>,
}

impl FreelistNode {
    #[inline]
    const fn end(&self) -> u64 {
        self.offset + self.size
    }
}

/// A free byte range, as reported by [`Freelist::ranges`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FreeRange {
    /// First free byte.
    pub offset: u64,
    /// Number of free bytes.
    pub size: u64,
}

/// First-fit free range tracker over `[0, total_size)`.
///
/// # Invariants
///
/// - Ranges are linked in strictly ascending offset order.
/// - Ranges never overlap.
/// - After any [`free`](Self::free), no two ranges are adjacent.
///
/// # Thread Safety
///
/// Not synchronized. The owner serializes access.
///
/// # Example
///
/// ```rust,ignore
/// let mut freelist = Freelist::new(1024)?;
/// let offset = freelist.allocate(100)?;
/// freelist.free(offset, 100)?;
/// assert_eq!(freelist.free_space(), 1024);
/// ```
#[derive(Debug)]
pub struct Freelist {
    /// Size of the tracked region in bytes.
    total_size: u64,
    /// Node pool, allocated once.
    nodes: Box<[FreelistNode]>,
    /// Indices of pool nodes not currently linked.
    spare: Vec<usize>,
    /// Lowest free range.
    head: Option<usize>,
}

impl Freelist {
    /// Number of pool nodes the default sizing reserves for `total_size`.
    ///
    /// One node per `pointer size * node size` bytes of arena, at least one.
    #[must_use]
    pub fn default_node_capacity(total_size: u64) -> usize {
        let bytes_per_node = (size_of::<usize>() * size_of::<FreelistNode>()) as u64;
        usize::try_from(total_size / bytes_per_node)
            .unwrap_or(usize::MAX)
            .max(1)
    }

    /// Bytes of metadata a freelist over `total_size` bytes needs with the
    /// default node pool.
    #[must_use]
    pub fn memory_requirement(total_size: u64) -> u64 {
        let nodes = Self::default_node_capacity(total_size) as u64;
        size_of::<Self>() as u64 + nodes * (size_of::<FreelistNode>() + size_of::<usize>()) as u64
    }

    /// Creates a freelist with one free range spanning `total_size` bytes.
    ///
    /// The node pool uses [`default_node_capacity`](Self::default_node_capacity).
    ///
    /// # Errors
    ///
    /// Returns [`MemoryError::ZeroSize`] if `total_size` is zero.
    pub fn new(total_size: u64) -> MemoryResult<Self> {
        Self::with_node_capacity(total_size, Self::default_node_capacity(total_size))
    }

    /// Creates a freelist whose pool can track `node_capacity` disjoint free
    /// ranges.
    ///
    /// # Errors
    ///
    /// Returns [`MemoryError::ZeroSize`] if `total_size` is zero and
    /// [`MemoryError::InvalidConfig`] if `node_capacity` is zero.
    pub fn with_node_capacity(total_size: u64, node_capacity: usize) -> MemoryResult<Self> {
        if total_size == 0 {
            return Err(MemoryError::ZeroSize);
        }
        if node_capacity == 0 {
            return Err(MemoryError::InvalidConfig(
                "freelist node capacity must be greater than zero".to_string(),
            ));
        }

        let mut freelist = Self {
            total_size,
            nodes: vec![FreelistNode::default(); node_capacity].into_boxed_slice(),
            spare: Vec::with_capacity(node_capacity),
            head: None,
        };
        freelist.clear();
        Ok(freelist)
    }

    /// Returns the size of the tracked region.
    #[inline]
    #[must_use]
    pub const fn total_size(&self) -> u64 {
        self.total_size
    }

    /// Returns the number of pool nodes.
    #[inline]
    #[must_use]
    pub fn node_capacity(&self) -> usize {
        self.nodes.len()
    }

    /// Takes `size` bytes from the first free range large enough to hold them.
    ///
    /// An exact fit unlinks the range; a larger range shrinks from the front.
    ///
    /// # Errors
    ///
    /// - [`MemoryError::ZeroSize`] if `size` is zero
    /// - [`MemoryError::OutOfMemory`] if no range is large enough
    pub fn allocate(&mut self, size: u64) -> MemoryResult<u64> {
        if size == 0 {
            return Err(MemoryError::ZeroSize);
        }

        let mut prev: Option<usize> = None;
        let mut cursor = self.head;
        while let Some(index) = cursor {
            let node = self.nodes[index];
            if node.size == size {
                match prev {
                    Some(p) => self.nodes[p].next = node.next,
                    None => self.head = node.next,
                }
                self.release_node(index);
                return Ok(node.offset);
            }
            if node.size > size {
                let slot = &mut self.nodes[index];
                slot.offset += size;
                slot.size -= size;
                return Ok(node.offset);
            }
            prev = Some(index);
            cursor = node.next;
        }

        let available = self.free_space();
        tracing::warn!(
            "freelist: no free range of {} bytes ({} bytes free in {} ranges)",
            size,
            available,
            self.range_count()
        );
        Err(MemoryError::OutOfMemory {
            requested: size,
            available,
        })
    }

    /// Returns `[offset, offset + size)` to the free list, merging it with
    /// adjacent free ranges on either side.
    ///
    /// # Errors
    ///
    /// - [`MemoryError::ZeroSize`] if `size` is zero
    /// - [`MemoryError::OutOfBounds`] if the range ends past the region
    /// - [`MemoryError::DoubleFree`] if the range overlaps free space
    /// - [`MemoryError::NodePoolExhausted`] if the range touches no free
    ///   neighbour and the pool has no node left to track it
    pub fn free(&mut self, offset: u64, size: u64) -> MemoryResult<()> {
        if size == 0 {
            return Err(MemoryError::ZeroSize);
        }
        let end = offset
            .checked_add(size)
            .filter(|&end| end <= self.total_size)
            .ok_or(MemoryError::OutOfBounds {
                address: offset,
                size,
                start: 0,
                end: self.total_size,
            })?;

        // Find the free ranges on either side of the block.
        let mut prev: Option<usize> = None;
        let mut next = self.head;
        while let Some(index) = next {
            if self.nodes[index].offset >= offset {
                break;
            }
            prev = Some(index);
            next = self.nodes[index].next;
        }

        let overlaps_prev = prev.is_some_and(|p| self.nodes[p].end() > offset);
        let overlaps_next = next.is_some_and(|n| self.nodes[n].offset < end);
        if overlaps_prev || overlaps_next {
            return Err(MemoryError::DoubleFree { offset, size });
        }

        let merge_prev = prev.filter(|&p| self.nodes[p].end() == offset);
        let merge_next = next.filter(|&n| self.nodes[n].offset == end);

        match (merge_prev, merge_next) {
            (Some(p), Some(n)) => {
                let absorbed = self.nodes[n];
                let node = &mut self.nodes[p];
                node.size += size + absorbed.size;
                node.next = absorbed.next;
                self.release_node(n);
            }
            (Some(p), None) => {
                self.nodes[p].size += size;
            }
            (None, Some(n)) => {
                let node = &mut self.nodes[n];
                node.offset = offset;
                node.size += size;
            }
            (None, None) => {
                let index = self.acquire_node()?;
                self.nodes[index] = FreelistNode { offset, size, next };
                match prev {
                    Some(p) => self.nodes[p].next = Some(index),
                    None => self.head = Some(index),
                }
            }
        }

        Ok(())
    }

    /// Resets to a single free range spanning the whole region.
    pub fn clear(&mut self) {
        for node in self.nodes.iter_mut() {
            *node = FreelistNode::default();
        }
        self.spare.clear();
        self.spare.extend((1..self.nodes.len()).rev());

        self.nodes[0] = FreelistNode {
            offset: 0,
            size: self.total_size,
            next: None,
        };
        self.head = Some(0);
    }

    /// Returns the total number of free bytes.
    #[must_use]
    pub fn free_space(&self) -> u64 {
        self.ranges().map(|range| range.size).sum()
    }

    /// Returns the number of disjoint free ranges.
    #[must_use]
    pub fn range_count(&self) -> usize {
        self.ranges().count()
    }

    /// Iterates the free ranges in ascending offset order.
    pub fn ranges(&self) -> impl Iterator<Item = FreeRange> + '_ {
        std::iter::successors(self.head.map(|index| self.nodes[index]), move |node| {
            node.next.map(|index| self.nodes[index])
        })
        .map(|node| FreeRange {
            offset: node.offset,
            size: node.size,
        })
    }

    fn acquire_node(&mut self) -> MemoryResult<usize> {
        self.spare.pop().ok_or_else(|| {
            tracing::warn!(
                "freelist: node pool exhausted ({} nodes), range cannot be tracked",
                self.nodes.len()
            );
            MemoryError::NodePoolExhausted {
                capacity: self.nodes.len(),
            }
        })
    }

    fn release_node(&mut self, index: usize) {
        self.nodes[index] = FreelistNode::default();
        self.spare.push(index);
    }
}
