//! # Open-Addressing Hash Map
//!
//! Fixed-size keys and values, linear probing, backward-shift deletion.
//!
//! ## Layout
//!
//! ```text
//! bucket i:  [ key bytes (size_of::<K>()) ][ value bytes (size_of::<V>()) ]
//! ```
//!
//! A bucket is vacant when its key bytes equal the `empty_key` sentinel, so
//! the sentinel itself can never be stored. The bucket count is always a
//! power of two and the map rehashes before occupancy passes one half, which
//! keeps probe sequences short and guarantees every probe meets a vacancy.
//!
//! Buckets live either in a heap block owned by the map or in a
//! [`MemoryTag::HashMap`] block of a [`MemorySystem`].

use std::marker::PhantomData;
use std::mem::size_of;
use std::sync::Arc;

use bytemuck::Pod;

use super::hash::{hash_pod, pod_eq};
use crate::error::{MemoryError, MemoryResult};
use crate::memory::{Address, MemorySystem, MemoryTag};

/// Key comparison function.
pub type KeyEqFn<K> = fn(&K, &K) -> bool;

/// Key hash function.
pub type HashFn<K> = fn(&K) -> u64;

/// Position of a bucket in a [`HashMap`].
///
/// Slots are invalidated by any insert (which may rehash) and by erase
/// (which may shift entries backwards).
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Slot(usize);

impl Slot {
    /// Returns the bucket index.
    #[inline]
    #[must_use]
    pub const fn index(self) -> usize {
        self.0
    }
}

/// Caller-supplied key behaviour.
struct KeyOps<K> {
    empty_key: K,
    key_eq: KeyEqFn<K>,
    hash: HashFn<K>,
}

/// Backing bytes of the bucket array.
enum BucketStore {
    Heap(Box<[u8]>),
    Tracked {
        memory: Arc<MemorySystem>,
        block: Address,
    },
}

impl BucketStore {
    fn read<R>(&self, f: impl FnOnce(&[u8]) -> R) -> MemoryResult<R> {
        match self {
            Self::Heap(bytes) => Ok(f(&bytes[..])),
            Self::Tracked { memory, block } => {
                let guard = memory.lock();
                Ok(f(guard.bytes(*block)?))
            }
        }
    }

    fn write<R>(&mut self, f: impl FnOnce(&mut [u8]) -> R) -> MemoryResult<R> {
        match self {
            Self::Heap(bytes) => Ok(f(&mut bytes[..])),
            Self::Tracked { memory, block } => {
                let mut guard = memory.lock();
                Ok(f(guard.bytes_mut(*block)?))
            }
        }
    }

    /// Swaps in a fresh store of `len` bytes, built by `fill` from the old one.
    fn replace(&mut self, len: usize, fill: impl FnOnce(&[u8], &mut [u8])) -> MemoryResult<()> {
        match self {
            Self::Heap(bytes) => {
                let mut fresh = vec![0u8; len].into_boxed_slice();
                fill(&bytes[..], &mut fresh[..]);
                *bytes = fresh;
            }
            Self::Tracked { memory, block } => {
                let mut guard = memory.lock();
                let fresh = guard.alloc(len as u64, MemoryTag::HashMap)?;
                let moved = guard
                    .block_pair_mut(*block, fresh)
                    .map(|(old, new)| fill(old, new))
                    .and_then(|()| guard.free(*block));
                if let Err(err) = moved {
                    // The old buckets were only read, so the map stays intact.
                    guard.release_unused(fresh);
                    return Err(err);
                }
                *block = fresh;
            }
        }
        Ok(())
    }

    fn release(&mut self) -> MemoryResult<()> {
        if let Self::Tracked { memory, block } = std::mem::replace(self, Self::Heap(Box::default())) {
            memory.free(block)?;
        }
        Ok(())
    }
}

/// Probing logic over a borrowed bucket array.
struct RawTable<'a, K, V, B> {
    ops: &'a KeyOps<K>,
    buckets: B,
    mask: usize,
    _value: PhantomData<V>,
}

impl<'a, K: Pod, V: Pod, B: AsRef<[u8]>> RawTable<'a, K, V, B> {
    const KEY_SIZE: usize = size_of::<K>();
    const STRIDE: usize = size_of::<K>() + size_of::<V>();

    fn new(ops: &'a KeyOps<K>, buckets: B, mask: usize) -> Self {
        Self {
            ops,
            buckets,
            mask,
            _value: PhantomData,
        }
    }

    fn bucket(&self, index: usize) -> &[u8] {
        let start = index * Self::STRIDE;
        &self.buckets.as_ref()[start..start + Self::STRIDE]
    }

    fn is_vacant(&self, index: usize) -> bool {
        &self.bucket(index)[..Self::KEY_SIZE] == bytemuck::bytes_of(&self.ops.empty_key)
    }

    fn key_at(&self, index: usize) -> K {
        bytemuck::pod_read_unaligned(&self.bucket(index)[..Self::KEY_SIZE])
    }

    fn value_at(&self, index: usize) -> V {
        bytemuck::pod_read_unaligned(&self.bucket(index)[Self::KEY_SIZE..])
    }

    /// Ideal bucket of `key`.
    fn home(&self, key: &K) -> usize {
        // Masked to the bucket range, so the value fits a usize.
        ((self.ops.hash)(key) & self.mask as u64) as usize
    }

    fn find(&self, key: &K) -> Option<usize> {
        let mut index = self.home(key);
        loop {
            if self.is_vacant(index) {
                return None;
            }
            if (self.ops.key_eq)(&self.key_at(index), key) {
                return Some(index);
            }
            index = (index + 1) & self.mask;
        }
    }

    fn next_occupied(&self, from: usize) -> Option<usize> {
        (from..=self.mask).find(|&index| !self.is_vacant(index))
    }
}

impl<K: Pod, V: Pod, B: AsRef<[u8]> + AsMut<[u8]>> RawTable<'_, K, V, B> {
    fn bucket_mut(&mut self, index: usize) -> &mut [u8] {
        let start = index * Self::STRIDE;
        &mut self.buckets.as_mut()[start..start + Self::STRIDE]
    }

    fn write(&mut self, index: usize, key: &K, value: &V) {
        let bucket = self.bucket_mut(index);
        bucket[..Self::KEY_SIZE].copy_from_slice(bytemuck::bytes_of(key));
        bucket[Self::KEY_SIZE..].copy_from_slice(bytemuck::bytes_of(value));
    }

    fn write_value(&mut self, index: usize, value: &V) {
        self.bucket_mut(index)[Self::KEY_SIZE..].copy_from_slice(bytemuck::bytes_of(value));
    }

    /// Marks a bucket vacant and zeroes its value bytes.
    fn vacate(&mut self, index: usize) {
        let empty_key = self.ops.empty_key;
        let bucket = self.bucket_mut(index);
        bucket[..Self::KEY_SIZE].copy_from_slice(bytemuck::bytes_of(&empty_key));
        bucket[Self::KEY_SIZE..].fill(0);
    }

    fn reset(&mut self) {
        for index in 0..=self.mask {
            self.vacate(index);
        }
    }

    /// Returns the bucket holding `key` and whether it was newly written.
    fn insert(&mut self, key: &K, value: &V) -> (usize, bool) {
        let mut index = self.home(key);
        loop {
            if self.is_vacant(index) {
                self.write(index, key, value);
                return (index, true);
            }
            if (self.ops.key_eq)(&self.key_at(index), key) {
                return (index, false);
            }
            index = (index + 1) & self.mask;
        }
    }

    /// Backward-shift deletion of an occupied bucket.
    fn erase(&mut self, slot: usize) {
        let mut hole = slot;
        let mut index = (hole + 1) & self.mask;
        while !self.is_vacant(index) {
            let ideal = self.home(&self.key_at(index));
            // Move the entry back if the hole lies on its probe path.
            if (hole.wrapping_sub(ideal) & self.mask) < (index.wrapping_sub(ideal) & self.mask) {
                let from = index * Self::STRIDE;
                self.buckets
                    .as_mut()
                    .copy_within(from..from + Self::STRIDE, hole * Self::STRIDE);
                hole = index;
            }
            index = (index + 1) & self.mask;
        }
        self.vacate(hole);
    }
}

/// Open-addressing hash map over plain-old-data keys and values.
///
/// # Invariants
///
/// - `bucket_count` is a power of two
/// - after every insert, `len() * 2 <= bucket_count()`
/// - the `empty_key` sentinel is never stored
///
/// # Example
///
/// ```rust,ignore
/// let mut glyphs: HashMap<u32, GlyphMetrics> =
///     HashMap::new(512, u32::MAX, |a, b| a == b, |c| mix64(u64::from(*c)))?;
///
/// glyphs.insert('A' as u32, metrics)?;
/// let metrics = glyphs.get(&('A' as u32))?;
/// ```
pub struct HashMap<K: Pod, V: Pod> {
    /// Sentinel, comparison and hash.
    ops: KeyOps<K>,
    /// Number of buckets, a power of two.
    bucket_count: usize,
    /// Number of occupied buckets.
    occupied: usize,
    /// Bucket bytes.
    store: BucketStore,
    /// Marker for V.
    _value: PhantomData<V>,
}

impl<K: Pod, V: Pod> HashMap<K, V> {
    const STRIDE: usize = size_of::<K>() + size_of::<V>();

    /// Bytes of bucket storage a map created with `bucket_hint` occupies.
    #[must_use]
    pub fn memory_requirement(bucket_hint: usize) -> usize {
        Self::bucket_count_for(bucket_hint) * Self::STRIDE
    }

    /// Creates a map whose buckets are owned on the heap.
    ///
    /// # Arguments
    ///
    /// * `bucket_hint` - Initial bucket count, rounded up to a power of two
    /// * `empty_key` - Sentinel marking vacant buckets
    /// * `key_eq` - Key comparison
    /// * `hash` - Key hash
    ///
    /// # Errors
    ///
    /// Returns [`MemoryError::InvalidConfig`] if `K` is zero-sized.
    pub fn new(bucket_hint: usize, empty_key: K, key_eq: KeyEqFn<K>, hash: HashFn<K>) -> MemoryResult<Self> {
        let ops = KeyOps {
            empty_key,
            key_eq,
            hash,
        };
        Self::build(bucket_hint, ops, |len| {
            Ok(BucketStore::Heap(vec![0u8; len].into_boxed_slice()))
        })
    }

    /// Creates a map whose buckets live in a [`MemoryTag::HashMap`] block of
    /// `memory`.
    ///
    /// # Errors
    ///
    /// Returns [`MemoryError::InvalidConfig`] if `K` is zero-sized, or any
    /// allocation error of [`MemorySystem::alloc`].
    pub fn new_in(
        memory: Arc<MemorySystem>,
        bucket_hint: usize,
        empty_key: K,
        key_eq: KeyEqFn<K>,
        hash: HashFn<K>,
    ) -> MemoryResult<Self> {
        let ops = KeyOps {
            empty_key,
            key_eq,
            hash,
        };
        Self::build(bucket_hint, ops, |len| {
            let block = memory.alloc(len as u64, MemoryTag::HashMap)?;
            Ok(BucketStore::Tracked { memory, block })
        })
    }

    /// Heap-backed map comparing and hashing keys by their bytes.
    ///
    /// # Errors
    ///
    /// See [`new`](Self::new).
    pub fn bytewise(bucket_hint: usize, empty_key: K) -> MemoryResult<Self> {
        Self::new(bucket_hint, empty_key, pod_eq::<K>, hash_pod::<K>)
    }

    /// Arena-backed map comparing and hashing keys by their bytes.
    ///
    /// # Errors
    ///
    /// See [`new_in`](Self::new_in).
    pub fn bytewise_in(memory: Arc<MemorySystem>, bucket_hint: usize, empty_key: K) -> MemoryResult<Self> {
        Self::new_in(memory, bucket_hint, empty_key, pod_eq::<K>, hash_pod::<K>)
    }

    fn build(
        bucket_hint: usize,
        ops: KeyOps<K>,
        store: impl FnOnce(usize) -> MemoryResult<BucketStore>,
    ) -> MemoryResult<Self> {
        if size_of::<K>() == 0 {
            return Err(MemoryError::InvalidConfig(
                "hash map keys must not be zero-sized".to_string(),
            ));
        }

        let bucket_count = Self::bucket_count_for(bucket_hint);
        let mut map = Self {
            ops,
            bucket_count,
            occupied: 0,
            store: store(bucket_count * Self::STRIDE)?,
            _value: PhantomData,
        };
        map.clear()?;
        Ok(map)
    }

    fn bucket_count_for(bucket_hint: usize) -> usize {
        bucket_hint.max(1).next_power_of_two()
    }

    #[inline]
    fn mask(&self) -> usize {
        self.bucket_count - 1
    }

    fn is_sentinel(&self, key: &K) -> bool {
        pod_eq(key, &self.ops.empty_key)
    }

    fn check_slot(&self, slot: Slot) -> MemoryResult<usize> {
        if slot.0 < self.bucket_count {
            Ok(slot.0)
        } else {
            Err(MemoryError::IndexOutOfBounds {
                index: slot.0,
                length: self.bucket_count,
            })
        }
    }

    /// Number of stored entries.
    #[inline]
    #[must_use]
    pub const fn len(&self) -> usize {
        self.occupied
    }

    /// Returns `true` if the map holds no entries.
    #[inline]
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.occupied == 0
    }

    /// Number of buckets.
    #[inline]
    #[must_use]
    pub const fn bucket_count(&self) -> usize {
        self.bucket_count
    }

    /// Occupied buckets divided by total buckets.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn load_factor(&self) -> f64 {
        self.occupied as f64 / self.bucket_count as f64
    }

    /// Returns the slot holding `key`, or `None` if it is absent.
    ///
    /// # Errors
    ///
    /// Fails only if arena-backed buckets cannot be reached.
    pub fn find(&self, key: &K) -> MemoryResult<Option<Slot>> {
        if self.is_sentinel(key) {
            return Ok(None);
        }
        let (ops, mask) = (&self.ops, self.mask());
        self.store
            .read(|buckets| RawTable::<K, V, _>::new(ops, buckets, mask).find(key).map(Slot))
    }

    /// Returns a copy of the value stored under `key`.
    ///
    /// # Errors
    ///
    /// See [`find`](Self::find).
    pub fn get(&self, key: &K) -> MemoryResult<Option<V>> {
        if self.is_sentinel(key) {
            return Ok(None);
        }
        let (ops, mask) = (&self.ops, self.mask());
        self.store.read(|buckets| {
            let table = RawTable::<K, V, _>::new(ops, buckets, mask);
            table.find(key).map(|index| table.value_at(index))
        })
    }

    /// Returns `true` if `key` is stored.
    ///
    /// # Errors
    ///
    /// See [`find`](Self::find).
    pub fn contains_key(&self, key: &K) -> MemoryResult<bool> {
        Ok(self.find(key)?.is_some())
    }

    /// Inserts `key` with `value`.
    ///
    /// If `key` is already present nothing is written and the existing slot
    /// is returned.
    ///
    /// # Errors
    ///
    /// [`MemoryError::SentinelKey`] if `key` is the empty-key sentinel, or an
    /// allocation error from growing the bucket array.
    pub fn insert(&mut self, key: K, value: V) -> MemoryResult<Slot> {
        if self.is_sentinel(&key) {
            tracing::warn!("hash map: refusing to insert the empty-key sentinel");
            return Err(MemoryError::SentinelKey);
        }
        self.reserve(self.occupied + 1)?;

        let (ops, mask) = (&self.ops, self.mask());
        let (index, inserted) = self
            .store
            .write(|buckets| RawTable::<K, V, _>::new(ops, buckets, mask).insert(&key, &value))?;
        if inserted {
            self.occupied += 1;
        }
        Ok(Slot(index))
    }

    /// Removes the entry at `slot` and returns it.
    ///
    /// Entries further along the probe sequence are shifted back into the
    /// hole, so no tombstones are left behind.
    ///
    /// # Errors
    ///
    /// [`MemoryError::EmptyBucket`] if `slot` holds no entry and
    /// [`MemoryError::IndexOutOfBounds`] if it is past the bucket array.
    pub fn erase(&mut self, slot: Slot) -> MemoryResult<(K, V)> {
        let index = self.check_slot(slot)?;
        let (ops, mask) = (&self.ops, self.mask());
        let entry = self.store.write(|buckets| {
            let mut table = RawTable::<K, V, _>::new(ops, buckets, mask);
            if table.is_vacant(index) {
                return Err(MemoryError::EmptyBucket(index));
            }
            let entry = (table.key_at(index), table.value_at(index));
            table.erase(index);
            Ok(entry)
        })??;
        self.occupied -= 1;
        Ok(entry)
    }

    /// Removes `key` and returns its value, if present.
    ///
    /// # Errors
    ///
    /// See [`erase`](Self::erase).
    pub fn remove(&mut self, key: &K) -> MemoryResult<Option<V>> {
        match self.find(key)? {
            Some(slot) => Ok(Some(self.erase(slot)?.1)),
            None => Ok(None),
        }
    }

    /// Returns the key stored at `slot`.
    ///
    /// # Errors
    ///
    /// [`MemoryError::EmptyBucket`] if `slot` holds no entry.
    pub fn key(&self, slot: Slot) -> MemoryResult<K> {
        Ok(self.entry(slot)?.0)
    }

    /// Returns the value stored at `slot`.
    ///
    /// # Errors
    ///
    /// [`MemoryError::EmptyBucket`] if `slot` holds no entry.
    pub fn value(&self, slot: Slot) -> MemoryResult<V> {
        Ok(self.entry(slot)?.1)
    }

    /// Returns the key and value stored at `slot`.
    ///
    /// # Errors
    ///
    /// [`MemoryError::EmptyBucket`] if `slot` holds no entry.
    pub fn entry(&self, slot: Slot) -> MemoryResult<(K, V)> {
        let index = self.check_slot(slot)?;
        let (ops, mask) = (&self.ops, self.mask());
        self.store.read(|buckets| {
            let table = RawTable::<K, V, _>::new(ops, buckets, mask);
            if table.is_vacant(index) {
                Err(MemoryError::EmptyBucket(index))
            } else {
                Ok((table.key_at(index), table.value_at(index)))
            }
        })?
    }

    /// Overwrites the value stored at `slot`.
    ///
    /// # Errors
    ///
    /// [`MemoryError::EmptyBucket`] if `slot` holds no entry.
    pub fn set_value(&mut self, slot: Slot, value: V) -> MemoryResult<()> {
        let index = self.check_slot(slot)?;
        let (ops, mask) = (&self.ops, self.mask());
        self.store.write(|buckets| {
            let mut table = RawTable::<K, V, _>::new(ops, buckets, mask);
            if table.is_vacant(index) {
                return Err(MemoryError::EmptyBucket(index));
            }
            table.write_value(index, &value);
            Ok(())
        })?
    }

    /// First occupied slot in bucket order, or `None` for an empty map.
    ///
    /// # Errors
    ///
    /// Fails only if arena-backed buckets cannot be reached.
    pub fn begin(&self) -> MemoryResult<Option<Slot>> {
        self.next_from(0)
    }

    /// Occupied slot following `slot` in bucket order, or `None` at the end.
    ///
    /// # Errors
    ///
    /// Fails only if arena-backed buckets cannot be reached.
    pub fn next_after(&self, slot: Slot) -> MemoryResult<Option<Slot>> {
        self.next_from(slot.0 + 1)
    }

    fn next_from(&self, from: usize) -> MemoryResult<Option<Slot>> {
        let (ops, mask) = (&self.ops, self.mask());
        self.store
            .read(|buckets| RawTable::<K, V, _>::new(ops, buckets, mask).next_occupied(from).map(Slot))
    }

    /// Copies every entry out in bucket order.
    ///
    /// # Errors
    ///
    /// Fails only if arena-backed buckets cannot be reached.
    pub fn entries(&self) -> MemoryResult<Vec<(K, V)>> {
        let (ops, mask, len) = (&self.ops, self.mask(), self.occupied);
        self.store.read(|buckets| {
            let table = RawTable::<K, V, _>::new(ops, buckets, mask);
            let mut entries = Vec::with_capacity(len);
            let mut cursor = table.next_occupied(0);
            while let Some(index) = cursor {
                entries.push((table.key_at(index), table.value_at(index)));
                cursor = table.next_occupied(index + 1);
            }
            entries
        })
    }

    /// Vacates every bucket. Value bytes are zeroed so stale values cannot
    /// resurface when a bucket is reused.
    ///
    /// # Errors
    ///
    /// Fails only if arena-backed buckets cannot be reached.
    pub fn clear(&mut self) -> MemoryResult<()> {
        let (ops, mask) = (&self.ops, self.mask());
        self.store
            .write(|buckets| RawTable::<K, V, _>::new(ops, buckets, mask).reset())?;
        self.occupied = 0;
        Ok(())
    }

    /// Ensures `count` entries fit at a load factor of at most one half.
    ///
    /// Rehashes into `max(2 * bucket_count, 2 * count)` buckets (rounded up
    /// to a power of two) when needed.
    ///
    /// # Errors
    ///
    /// Any allocation error of the new bucket array.
    pub fn reserve(&mut self, count: usize) -> MemoryResult<()> {
        let wanted = count.saturating_mul(2);
        if wanted <= self.bucket_count {
            return Ok(());
        }
        self.rehash(wanted.max(self.bucket_count * 2).next_power_of_two())
    }

    fn rehash(&mut self, bucket_count: usize) -> MemoryResult<()> {
        let (ops, old_mask, new_mask) = (&self.ops, self.mask(), bucket_count - 1);
        self.store.replace(bucket_count * Self::STRIDE, |old, new| {
            let old = RawTable::<K, V, _>::new(ops, old, old_mask);
            let mut fresh = RawTable::<K, V, _>::new(ops, new, new_mask);
            fresh.reset();

            let mut cursor = old.next_occupied(0);
            while let Some(index) = cursor {
                fresh.insert(&old.key_at(index), &old.value_at(index));
                cursor = old.next_occupied(index + 1);
            }
        })?;

        tracing::debug!(
            "hash map: rehashed {} entries from {} to {} buckets",
            self.occupied,
            self.bucket_count,
            bucket_count
        );
        self.bucket_count = bucket_count;
        Ok(())
    }

    /// Releases the bucket array.
    ///
    /// # Errors
    ///
    /// Any error of [`MemorySystem::free`] for arena-backed buckets.
    pub fn destroy(mut self) -> MemoryResult<()> {
        self.store.release()
    }
}

impl<K: Pod, V: Pod> Drop for HashMap<K, V> {
    fn drop(&mut self) {
        if let Err(err) = self.store.release() {
            tracing::error!("hash map: failed to release buckets: {}", err);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const EMPTY: u32 = 0xFFFF_FFFF;

    fn identity(key: &u32) -> u64 {
        u64::from(*key)
    }

    fn same(a: &u32, b: &u32) -> bool {
        a == b
    }

    fn map_with(buckets: usize) -> HashMap<u32, u8> {
        HashMap::new(buckets, EMPTY, same, identity).unwrap()
    }

    #[test]
    fn test_colliding_keys_probe_forward() {
        let mut map = map_with(8);
        let a = map.insert(5, b'a').unwrap();
        let b = map.insert(13, b'b').unwrap();

        assert_eq!(a.index(), 5);
        assert_eq!(b.index(), 6);
        assert_eq!(map.find(&13).unwrap(), Some(b));
        assert_eq!(map.get(&13).unwrap(), Some(b'b'));
        assert_eq!(map.get(&5).unwrap(), Some(b'a'));
        assert_eq!(map.find(&21).unwrap(), None);
    }

    #[test]
    fn test_duplicate_insert_keeps_first_value() {
        let mut map = map_with(8);
        let first = map.insert(3, 1).unwrap();
        let second = map.insert(3, 2).unwrap();

        assert_eq!(first, second);
        assert_eq!(map.len(), 1);
        assert_eq!(map.get(&3).unwrap(), Some(1));

        map.set_value(first, 2).unwrap();
        assert_eq!(map.get(&3).unwrap(), Some(2));
    }

    #[test]
    fn test_erase_shifts_cluster_back() {
        let mut map = map_with(8);
        for (key, value) in [(5, 1), (13, 2), (21, 3)] {
            map.insert(key, value).unwrap();
        }

        let slot = map.find(&5).unwrap().unwrap();
        assert_eq!(map.erase(slot).unwrap(), (5, 1));

        assert_eq!(map.find(&5).unwrap(), None);
        assert_eq!(map.find(&13).unwrap().map(Slot::index), Some(5));
        assert_eq!(map.find(&21).unwrap().map(Slot::index), Some(6));
        assert_eq!(map.get(&21).unwrap(), Some(3));
        assert_eq!(map.len(), 2);
    }

    #[test]
    fn test_erase_across_wraparound() {
        let mut map = map_with(8);
        for (key, value) in [(7, 1), (15, 2), (23, 3)] {
            map.insert(key, value).unwrap();
        }
        assert_eq!(map.find(&23).unwrap().map(Slot::index), Some(1));

        map.remove(&7).unwrap();
        assert_eq!(map.find(&15).unwrap().map(Slot::index), Some(7));
        assert_eq!(map.find(&23).unwrap().map(Slot::index), Some(0));
        assert_eq!(map.get(&15).unwrap(), Some(2));
    }

    #[test]
    fn test_erase_leaves_entries_at_home() {
        let mut map = map_with(8);
        map.insert(5, 1).unwrap();
        map.insert(6, 2).unwrap();

        map.remove(&5).unwrap();
        assert_eq!(map.find(&6).unwrap().map(Slot::index), Some(6));
    }

    #[test]
    fn test_load_factor_stays_at_most_half() {
        let mut map = map_with(2);
        for key in 0..1000u32 {
            map.insert(key, (key % 251) as u8).unwrap();
            assert!(map.len() * 2 <= map.bucket_count());
            assert!(map.bucket_count().is_power_of_two());
        }
        for key in 0..1000u32 {
            assert_eq!(map.get(&key).unwrap(), Some((key % 251) as u8));
        }
    }

    #[test]
    fn test_reserve() {
        let mut map = map_with(16);
        map.reserve(8).unwrap();
        assert_eq!(map.bucket_count(), 16);

        map.reserve(9).unwrap();
        assert_eq!(map.bucket_count(), 32);

        map.reserve(100).unwrap();
        assert_eq!(map.bucket_count(), 256);
    }

    #[test]
    fn test_clear_zeroes_values() {
        let mut map = map_with(8);
        let slot = map.insert(4, 9).unwrap();
        map.clear().unwrap();

        assert!(map.is_empty());
        assert_eq!(map.find(&4).unwrap(), None);
        assert_eq!(map.value(slot), Err(MemoryError::EmptyBucket(slot.index())));

        map.insert(4, 1).unwrap();
        assert_eq!(map.get(&4).unwrap(), Some(1));
    }

    #[test]
    fn test_iteration_visits_every_entry() {
        let mut map = map_with(16);
        for key in [1, 2, 3, 40, 41] {
            map.insert(key, key as u8).unwrap();
        }

        let mut seen = Vec::new();
        let mut cursor = map.begin().unwrap();
        while let Some(slot) = cursor {
            seen.push(map.key(slot).unwrap());
            cursor = map.next_after(slot).unwrap();
        }
        seen.sort_unstable();
        assert_eq!(seen, vec![1, 2, 3, 40, 41]);
        assert_eq!(map.entries().unwrap().len(), 5);
    }

    #[test]
    fn test_misuse_is_reported() {
        let mut map = map_with(8);
        assert_eq!(map.insert(EMPTY, 1), Err(MemoryError::SentinelKey));
        assert_eq!(map.find(&EMPTY).unwrap(), None);
        assert_eq!(map.erase(Slot(3)), Err(MemoryError::EmptyBucket(3)));
        assert!(matches!(
            map.erase(Slot(8)),
            Err(MemoryError::IndexOutOfBounds { index: 8, length: 8 })
        ));
    }

    #[test]
    fn test_bytewise_keys() {
        let mut map: HashMap<[u8; 4], u64> = HashMap::bytewise(4, [0xFF; 4]).unwrap();
        map.insert(*b"font", 1).unwrap();
        map.insert(*b"tile", 2).unwrap();
        assert_eq!(map.get(b"tile").unwrap(), Some(2));
        assert_eq!(HashMap::<[u8; 4], u64>::memory_requirement(5), 8 * 12);
    }

    #[test]
    fn test_arena_backed_map_accounts_buckets() {
        let memory = Arc::new(MemorySystem::with_arena_size(1 << 16).unwrap());
        let mut map: HashMap<u32, u32> =
            HashMap::new_in(Arc::clone(&memory), 4, EMPTY, same, identity).unwrap();
        assert_eq!(memory.stats().tagged(MemoryTag::HashMap), 4 * 8);

        for key in 0..20 {
            map.insert(key, key * 10).unwrap();
        }
        assert_eq!(memory.stats().tagged(MemoryTag::HashMap), 64 * 8);
        assert_eq!(memory.alloc_count(), 1);
        assert_eq!(map.get(&19).unwrap(), Some(190));

        drop(map);
        assert_eq!(memory.stats().tagged(MemoryTag::HashMap), 0);
        assert_eq!(memory.alloc_count(), 0);
    }

    #[test]
    fn test_failed_rehash_keeps_old_buckets() {
        let config = crate::config::MemoryConfig {
            arena_size: 1024,
            max_free_ranges: Some(2),
            ..crate::config::MemoryConfig::default()
        };
        let memory = Arc::new(MemorySystem::new(&config).unwrap());
        let mut map: HashMap<u32, u32> =
            HashMap::new_in(Arc::clone(&memory), 4, EMPTY, same, identity).unwrap();
        let _pinned = memory.alloc(32, MemoryTag::Game).unwrap();
        let hole = memory.alloc(128, MemoryTag::Game).unwrap();
        let _tail = memory.alloc(64, MemoryTag::Game).unwrap();
        // Both freelist nodes are now in use: this hole and the arena tail.
        memory.free(hole).unwrap();

        map.insert(0, 0).unwrap();
        map.insert(1, 10).unwrap();
        // Growing lands in the hole, but the old buckets need a third node.
        assert_eq!(
            map.insert(2, 20),
            Err(MemoryError::NodePoolExhausted { capacity: 2 })
        );

        assert_eq!(map.bucket_count(), 4);
        assert_eq!(map.len(), 2);
        assert_eq!(map.get(&1).unwrap(), Some(10));
        assert_eq!(map.get(&2).unwrap(), None);
        assert_eq!(memory.alloc_count(), 3);
        assert_eq!(memory.stats().tagged(MemoryTag::HashMap), 4 * 8);
        assert_eq!(memory.free_space(), 1024 - 32 - 32 - 64);
    }
}
