//! # Memory System
//!
//! The engine-wide allocator facade. Every container allocation goes through
//! a [`MemorySystem`], which owns the [`DynamicAllocator`], remembers the
//! size and tag of every live block and keeps per-tag totals.
//!
//! ## Locking
//!
//! One `parking_lot::Mutex` guards the allocator, the record map and the
//! counters together. [`MemorySystem::lock`] hands out a [`MemoryGuard`] so
//! that a multi-step operation (grow an array, rehash a map) happens inside
//! a single critical section.
//!
//! ```text
//! DArray / HashMap / LinearAllocator / AssetLoader
//!                    │
//!                    ▼
//!   MemorySystem ── Mutex<SystemState> ──┬── DynamicAllocator (arena)
//!                                        ├── records: HashMap<Address, AllocationRecord>
//!                                        └── MemoryStats
//! ```

use bytemuck::{Pod, Zeroable};
use parking_lot::{Mutex, MutexGuard};

use super::address::Address;
use super::dynamic::DynamicAllocator;
use super::tag::{format_bytes, MemoryStats, MemoryTag};
use crate::config::MemoryConfig;
use crate::containers::hash::mix64;
use crate::containers::HashMap;
use crate::error::{MemoryError, MemoryResult};

/// Key marking vacant buckets in the record map. Never a valid arena address.
const VACANT_ADDRESS: Address = Address::from_raw(u64::MAX);

/// Size and tag of one live allocation.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Pod, Zeroable)]
#[repr(C)]
struct AllocationRecord {
    size: u64,
    tag: u32,
    _reserved: u32,
}

impl AllocationRecord {
    fn new(size: u64, tag: MemoryTag) -> Self {
        Self {
            size,
            tag: u32::from(tag as u8),
            _reserved: 0,
        }
    }

    fn tag(self) -> MemoryTag {
        MemoryTag::from_index(self.tag as usize).unwrap_or(MemoryTag::Unknown)
    }
}

fn same_address(a: &Address, b: &Address) -> bool {
    a == b
}

fn hash_address(address: &Address) -> u64 {
    mix64(address.get())
}

/// Everything behind the lock.
struct SystemState {
    /// `None` once the system has shut down.
    allocator: Option<DynamicAllocator>,
    /// Live allocations. Heap-backed: it cannot allocate from the arena it tracks.
    records: HashMap<Address, AllocationRecord>,
    /// Counters.
    stats: MemoryStats,
    /// Log a warning for [`MemoryTag::Unknown`] allocations.
    warn_on_unknown_tag: bool,
}

/// What was still allocated when a [`MemorySystem`] shut down.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ShutdownReport {
    /// Bytes never freed.
    pub leaked_bytes: u64,
    /// Allocations never freed.
    pub leaked_allocations: u64,
    /// Per-tag usage at shutdown.
    pub usage_report: String,
}

impl ShutdownReport {
    /// Returns `true` if every allocation was freed before shutdown.
    #[inline]
    #[must_use]
    pub const fn is_clean(&self) -> bool {
        self.leaked_allocations == 0
    }
}

/// Tagged, tracked allocator over one arena.
///
/// Share it between owners with `Arc<MemorySystem>`; all methods take `&self`.
///
/// # Example
///
/// ```rust,ignore
/// let memory = Arc::new(MemorySystem::new(&MemoryConfig::default())?);
///
/// let block = memory.alloc(256, MemoryTag::Game)?;
/// memory.write(block, |bytes| bytes[0] = 7)?;
/// memory.free(block)?;
///
/// println!("{}", memory.usage_report());
/// let report = memory.shutdown()?;
/// assert!(report.is_clean());
/// ```
pub struct MemorySystem {
    state: Mutex<SystemState>,
    total_size: u64,
}

impl MemorySystem {
    /// Reserves the arena and the record map described by `config`.
    ///
    /// # Errors
    ///
    /// [`MemoryError::InvalidConfig`] or [`MemoryError::ZeroSize`] if the
    /// configuration is rejected.
    pub fn new(config: &MemoryConfig) -> MemoryResult<Self> {
        config.validate()?;

        let allocator = match config.max_free_ranges {
            Some(max_ranges) => DynamicAllocator::with_node_capacity(config.arena_size, max_ranges)?,
            None => DynamicAllocator::new(config.arena_size)?,
        };
        let records = HashMap::new(
            config.tracker_buckets,
            VACANT_ADDRESS,
            same_address,
            hash_address,
        )?;

        tracing::info!(
            "memory system: reserved {} arena with room for {} free ranges",
            format_bytes(config.arena_size),
            allocator.freelist().node_capacity()
        );

        Ok(Self {
            state: Mutex::new(SystemState {
                allocator: Some(allocator),
                records,
                stats: MemoryStats::default(),
                warn_on_unknown_tag: config.warn_on_unknown_tag,
            }),
            total_size: config.arena_size,
        })
    }

    /// Default configuration with an arena of `arena_size` bytes.
    ///
    /// # Errors
    ///
    /// See [`new`](Self::new).
    pub fn with_arena_size(arena_size: u64) -> MemoryResult<Self> {
        Self::new(&MemoryConfig {
            arena_size,
            ..MemoryConfig::default()
        })
    }

    /// Acquires the system lock.
    pub fn lock(&self) -> MemoryGuard<'_> {
        MemoryGuard {
            state: self.state.lock(),
        }
    }

    /// Arena size in bytes.
    #[inline]
    #[must_use]
    pub const fn total_size(&self) -> u64 {
        self.total_size
    }

    /// Allocates `size` zeroed bytes under `tag`.
    ///
    /// # Errors
    ///
    /// See [`MemoryGuard::alloc`].
    pub fn alloc(&self, size: u64, tag: MemoryTag) -> MemoryResult<Address> {
        self.lock().alloc(size, tag)
    }

    /// Resizes a block, or allocates one when `address` is `None`.
    ///
    /// # Errors
    ///
    /// See [`MemoryGuard::realloc`].
    pub fn realloc(&self, address: Option<Address>, new_size: u64, tag: MemoryTag) -> MemoryResult<Address> {
        self.lock().realloc(address, new_size, tag)
    }

    /// Frees a block returned by [`alloc`](Self::alloc).
    ///
    /// # Errors
    ///
    /// See [`MemoryGuard::free`].
    pub fn free(&self, address: Address) -> MemoryResult<()> {
        self.lock().free(address)
    }

    /// Size of the live block at `address`.
    ///
    /// # Errors
    ///
    /// [`MemoryError::UntrackedAddress`] if no block starts at `address`.
    pub fn alloc_size(&self, address: Address) -> MemoryResult<u64> {
        self.lock().alloc_size(address)
    }

    /// Number of live allocations.
    #[must_use]
    pub fn alloc_count(&self) -> u64 {
        self.lock().stats().allocation_count()
    }

    /// Snapshot of the counters.
    #[must_use]
    pub fn stats(&self) -> MemoryStats {
        self.lock().stats()
    }

    /// Per-tag usage in human units.
    #[must_use]
    pub fn usage_report(&self) -> String {
        self.stats().usage_report()
    }

    /// Free bytes left in the arena, `0` after shutdown.
    #[must_use]
    pub fn free_space(&self) -> u64 {
        self.lock().free_space()
    }

    /// Returns `true` once [`shutdown`](Self::shutdown) has run.
    #[must_use]
    pub fn is_shut_down(&self) -> bool {
        self.state.lock().allocator.is_none()
    }

    /// Runs `f` over the bytes of the block at `address`.
    ///
    /// # Errors
    ///
    /// [`MemoryError::UntrackedAddress`] if no block starts at `address`.
    pub fn read<R>(&self, address: Address, f: impl FnOnce(&[u8]) -> R) -> MemoryResult<R> {
        let guard = self.lock();
        Ok(f(guard.bytes(address)?))
    }

    /// Runs `f` over the mutable bytes of the block at `address`.
    ///
    /// # Errors
    ///
    /// [`MemoryError::UntrackedAddress`] if no block starts at `address`.
    pub fn write<R>(&self, address: Address, f: impl FnOnce(&mut [u8]) -> R) -> MemoryResult<R> {
        let mut guard = self.lock();
        Ok(f(guard.bytes_mut(address)?))
    }

    /// Destroys the arena.
    ///
    /// Anything still allocated is reported (and logged) as leaked. Every
    /// later call on this system fails with [`MemoryError::ShutDown`].
    ///
    /// # Errors
    ///
    /// [`MemoryError::ShutDown`] if the system was already shut down.
    pub fn shutdown(&self) -> MemoryResult<ShutdownReport> {
        let mut state = self.state.lock();
        let allocator = state.allocator.take().ok_or(MemoryError::ShutDown)?;

        let stats = state.stats;
        let report = ShutdownReport {
            leaked_bytes: stats.total_allocated(),
            leaked_allocations: stats.allocation_count(),
            usage_report: stats.usage_report(),
        };
        if report.is_clean() {
            tracing::debug!(
                "memory system: clean shutdown, peak usage {}",
                format_bytes(stats.peak_allocated())
            );
        } else {
            tracing::warn!(
                "memory system: {} in {} allocations still live at shutdown\n{}",
                format_bytes(report.leaked_bytes),
                report.leaked_allocations,
                report.usage_report
            );
        }

        state.records.clear()?;
        state.stats = MemoryStats::default();
        allocator.destroy();
        Ok(report)
    }
}

/// Exclusive access to a [`MemorySystem`] for the duration of one operation.
pub struct MemoryGuard<'a> {
    state: MutexGuard<'a, SystemState>,
}

impl MemoryGuard<'_> {
    fn allocator(&self) -> MemoryResult<&DynamicAllocator> {
        self.state.allocator.as_ref().ok_or(MemoryError::ShutDown)
    }

    fn allocator_mut(&mut self) -> MemoryResult<&mut DynamicAllocator> {
        self.state.allocator.as_mut().ok_or(MemoryError::ShutDown)
    }

    /// Allocates `size` zeroed bytes under `tag` and records the block.
    ///
    /// # Errors
    ///
    /// [`MemoryError::ShutDown`] after shutdown, otherwise any error of
    /// [`DynamicAllocator::alloc`].
    pub fn alloc(&mut self, size: u64, tag: MemoryTag) -> MemoryResult<Address> {
        let state = &mut *self.state;
        let allocator = state.allocator.as_mut().ok_or(MemoryError::ShutDown)?;
        if tag == MemoryTag::Unknown && state.warn_on_unknown_tag {
            tracing::warn!("memory system: allocation of {} bytes uses MemoryTag::Unknown", size);
        }

        let address = allocator.alloc(size)?;
        let recorded = allocator
            .fill(address, size, 0)
            .and_then(|()| state.records.insert(address, AllocationRecord::new(size, tag)).map(|_| ()));
        if let Err(err) = recorded {
            if let Err(rollback) = allocator.free(address, size) {
                tracing::error!("memory system: failed to return unrecorded block {}: {}", address, rollback);
            }
            return Err(err);
        }
        state.stats.record_alloc(tag, size);
        Ok(address)
    }

    /// Moves the block at `address` into a new block of `new_size` bytes,
    /// copying `min(old, new)` bytes, and frees the old block. With `None`
    /// this is [`alloc`](Self::alloc).
    ///
    /// # Errors
    ///
    /// [`MemoryError::UntrackedAddress`] if `address` is not a live block,
    /// or any error of [`alloc`](Self::alloc) and [`free`](Self::free). On
    /// failure the old block is left untouched and the new one released.
    pub fn realloc(&mut self, address: Option<Address>, new_size: u64, tag: MemoryTag) -> MemoryResult<Address> {
        let Some(old) = address else {
            return self.alloc(new_size, tag);
        };

        let old_size = self.alloc_size(old)?;
        let fresh = self.alloc(new_size, tag)?;
        let moved = self
            .copy(old, fresh, old_size.min(new_size))
            .and_then(|()| self.free(old));
        if let Err(err) = moved {
            self.release_unused(fresh);
            return Err(err);
        }
        Ok(fresh)
    }

    /// Frees a block allocated by a multi-step operation that then failed.
    pub(crate) fn release_unused(&mut self, address: Address) {
        if let Err(err) = self.free(address) {
            tracing::error!("memory system: failed to release unused block {}: {}", address, err);
        }
    }

    /// Frees the block starting at `address`.
    ///
    /// # Errors
    ///
    /// [`MemoryError::UntrackedAddress`] if no live block starts at
    /// `address`, which includes a second free of the same block. If the
    /// arena refuses the range the block stays live.
    pub fn free(&mut self, address: Address) -> MemoryResult<()> {
        let state = &mut *self.state;
        let allocator = state.allocator.as_mut().ok_or(MemoryError::ShutDown)?;
        let Some(record) = state.records.get(&address)? else {
            tracing::error!("memory system: free of untracked address {}", address);
            return Err(MemoryError::UntrackedAddress(address.get()));
        };

        allocator.free(address, record.size)?;
        state.records.remove(&address)?;
        state.stats.record_free(record.tag(), record.size);
        Ok(())
    }

    /// Size of the live block at `address`.
    ///
    /// # Errors
    ///
    /// [`MemoryError::UntrackedAddress`] if no block starts at `address`.
    pub fn alloc_size(&self, address: Address) -> MemoryResult<u64> {
        self.allocator()?;
        self.state
            .records
            .get(&address)?
            .map(|record| record.size)
            .ok_or(MemoryError::UntrackedAddress(address.get()))
    }

    /// Tag of the live block at `address`.
    ///
    /// # Errors
    ///
    /// [`MemoryError::UntrackedAddress`] if no block starts at `address`.
    pub fn alloc_tag(&self, address: Address) -> MemoryResult<MemoryTag> {
        self.allocator()?;
        self.state
            .records
            .get(&address)?
            .map(AllocationRecord::tag)
            .ok_or(MemoryError::UntrackedAddress(address.get()))
    }

    /// Snapshot of the counters.
    #[must_use]
    pub fn stats(&self) -> MemoryStats {
        self.state.stats
    }

    /// Free bytes left in the arena, `0` after shutdown.
    #[must_use]
    pub fn free_space(&self) -> u64 {
        self.allocator().map_or(0, DynamicAllocator::free_space)
    }

    /// Bytes of the whole block at `address`.
    ///
    /// # Errors
    ///
    /// [`MemoryError::UntrackedAddress`] if no block starts at `address`.
    pub fn bytes(&self, address: Address) -> MemoryResult<&[u8]> {
        let size = self.alloc_size(address)?;
        self.allocator()?.range(address, size)
    }

    /// Mutable bytes of the whole block at `address`.
    ///
    /// # Errors
    ///
    /// [`MemoryError::UntrackedAddress`] if no block starts at `address`.
    pub fn bytes_mut(&mut self, address: Address) -> MemoryResult<&mut [u8]> {
        let size = self.alloc_size(address)?;
        self.allocator_mut()?.range_mut(address, size)
    }

    /// Mutable bytes of two distinct live blocks at once.
    ///
    /// # Errors
    ///
    /// [`MemoryError::UntrackedAddress`] if either block is not live and
    /// [`MemoryError::AliasedBlocks`] if both name the same block.
    pub fn block_pair_mut(&mut self, first: Address, second: Address) -> MemoryResult<(&mut [u8], &mut [u8])> {
        let first_size = self.alloc_size(first)?;
        let second_size = self.alloc_size(second)?;
        self.allocator_mut()?
            .range_pair_mut((first, first_size), (second, second_size))
    }

    /// Arena bytes `[address, address + len)`, which may lie inside a block.
    ///
    /// # Errors
    ///
    /// [`MemoryError::OutOfBounds`] if the range leaves the arena.
    pub fn range(&self, address: Address, len: u64) -> MemoryResult<&[u8]> {
        self.allocator()?.range(address, len)
    }

    /// Mutable arena bytes `[address, address + len)`.
    ///
    /// # Errors
    ///
    /// [`MemoryError::OutOfBounds`] if the range leaves the arena.
    pub fn range_mut(&mut self, address: Address, len: u64) -> MemoryResult<&mut [u8]> {
        self.allocator_mut()?.range_mut(address, len)
    }

    /// Copies `len` bytes between arena addresses. The ranges may overlap.
    ///
    /// # Errors
    ///
    /// [`MemoryError::OutOfBounds`] if either range leaves the arena.
    pub fn copy(&mut self, source: Address, destination: Address, len: u64) -> MemoryResult<()> {
        self.allocator_mut()?.copy_within(source, destination, len)
    }

    /// Sets `len` arena bytes at `address` to `value`.
    ///
    /// # Errors
    ///
    /// [`MemoryError::OutOfBounds`] if the range leaves the arena.
    pub fn fill(&mut self, address: Address, len: u64, value: u8) -> MemoryResult<()> {
        self.allocator_mut()?.fill(address, len, value)
    }
}
