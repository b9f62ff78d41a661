//! # Assets
//!
//! Asset bookkeeping on top of the memory system.
//!
//! - [`AssetIndex`]: maps asset names (by [`hash_str`]) to handles and keeps
//!   one [`AssetRecord`] per asset in a [`DArray`]
//! - [`AssetLoader`]: a worker thread that reads files and copies their
//!   bytes into [`MemoryTag::Asset`] blocks
//!
//! ## Data Flow
//!
//! ```text
//! game thread                         loader thread
//! ───────────                         ─────────────
//! index.insert("tiles.png") ─► handle
//! loader.request(handle, path) ──────► fs::read(path)
//!                                      memory.alloc(len, Asset)
//!                                      memory.write(..)
//! loader.recv_timeout(..) ◄───────────  LoadedAsset
//! index.attach(loaded)
//! ```

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use bytemuck::{Pod, Zeroable};
use crossbeam_channel::{unbounded, Receiver, RecvTimeoutError, Sender};
use hearth_core::containers::hash::{hash_str, mix64};
use hearth_core::{Address, DArray, HashMap, MemorySystem, MemoryTag};

use crate::error::{EngineError, EngineResult};

/// Vacant-bucket key of the name map. Polynomial name hashes stay far below it.
const NO_NAME: u64 = u64::MAX;

/// Stands in for the address of an asset whose data is not loaded.
const NOT_LOADED: Address = Address::from_raw(0);

/// Initial bucket hint of the name map.
const NAME_BUCKETS: usize = 64;

/// Index of an asset within an [`AssetIndex`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Pod, Zeroable)]
#[repr(transparent)]
pub struct AssetHandle(u32);

impl AssetHandle {
    /// Returns the raw index.
    #[inline]
    #[must_use]
    pub const fn index(self) -> u32 {
        self.0
    }
}

/// Where an asset's data lives.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Pod, Zeroable)]
#[repr(C)]
pub struct AssetRecord {
    /// [`hash_str`] of the asset name.
    pub name_hash: u64,
    /// Block holding the data, or address zero when not loaded.
    pub address: Address,
    /// Data size in bytes.
    pub size: u64,
}

impl AssetRecord {
    /// Returns `true` if the asset's data is resident.
    #[inline]
    #[must_use]
    pub fn is_loaded(&self) -> bool {
        self.address != NOT_LOADED
    }
}

fn same_hash(a: &u64, b: &u64) -> bool {
    a == b
}

fn spread_hash(name_hash: &u64) -> u64 {
    mix64(*name_hash)
}

/// Name-addressed table of assets and their resident data.
///
/// The index owns the data blocks attached to it and frees them on
/// [`release`](Self::release), [`release_all`](Self::release_all) or drop.
pub struct AssetIndex {
    memory: Arc<MemorySystem>,
    by_name: HashMap<u64, AssetHandle>,
    records: DArray<AssetRecord>,
}

impl AssetIndex {
    /// Creates an empty index whose tables live in `memory`.
    ///
    /// # Errors
    ///
    /// [`EngineError::Memory`] if the tables cannot be allocated.
    pub fn new(memory: Arc<MemorySystem>) -> EngineResult<Self> {
        let by_name = HashMap::new_in(Arc::clone(&memory), NAME_BUCKETS, NO_NAME, same_hash, spread_hash)?;
        let records = DArray::new(Arc::clone(&memory))?;
        Ok(Self {
            memory,
            by_name,
            records,
        })
    }

    /// Number of registered assets.
    #[inline]
    #[must_use]
    pub const fn len(&self) -> usize {
        self.records.len()
    }

    /// Returns `true` if no asset is registered.
    #[inline]
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Registers `name`, or returns its existing handle.
    ///
    /// # Errors
    ///
    /// [`EngineError::Memory`] if the tables cannot grow.
    pub fn insert(&mut self, name: &str) -> EngineResult<AssetHandle> {
        let name_hash = hash_str(name);
        if let Some(handle) = self.by_name.get(&name_hash)? {
            return Ok(handle);
        }

        let index = u32::try_from(self.records.len())
            .map_err(|_| EngineError::Config("asset index is full".to_string()))?;
        let handle = AssetHandle(index);
        self.records.push(AssetRecord {
            name_hash,
            address: NOT_LOADED,
            size: 0,
        })?;
        if let Err(err) = self.by_name.insert(name_hash, handle) {
            // Unreachable by name, so drop it again.
            self.records.pop()?;
            return Err(err.into());
        }
        Ok(handle)
    }

    /// Handle of `name`, if registered.
    ///
    /// # Errors
    ///
    /// [`EngineError::Memory`] if the name map cannot be read.
    pub fn handle(&self, name: &str) -> EngineResult<Option<AssetHandle>> {
        Ok(self.by_name.get(&hash_str(name))?)
    }

    /// Record of `handle`.
    ///
    /// # Errors
    ///
    /// [`EngineError::UnknownAsset`] if `handle` was not issued by this index.
    pub fn record(&self, handle: AssetHandle) -> EngineResult<AssetRecord> {
        let index = handle.0 as usize;
        if index >= self.records.len() {
            return Err(EngineError::UnknownAsset(handle.0));
        }
        Ok(self.records.get(index)?)
    }

    /// Takes ownership of a loaded block, replacing any data already
    /// attached to the same asset.
    ///
    /// # Errors
    ///
    /// [`EngineError::UnknownAsset`] for a foreign handle.
    pub fn attach(&mut self, loaded: LoadedAsset) -> EngineResult<()> {
        self.release(loaded.handle)?;
        let mut record = self.record(loaded.handle)?;
        record.address = loaded.address;
        record.size = loaded.size;
        self.records.set(loaded.handle.0 as usize, record)?;
        tracing::debug!(
            "assets: attached {} bytes to asset {}",
            loaded.size,
            loaded.handle.0
        );
        Ok(())
    }

    /// Frees the data of one asset. The asset stays registered.
    ///
    /// # Errors
    ///
    /// [`EngineError::UnknownAsset`] for a foreign handle.
    pub fn release(&mut self, handle: AssetHandle) -> EngineResult<()> {
        let record = self.record(handle)?;
        if !record.is_loaded() {
            return Ok(());
        }
        self.memory.free(record.address)?;
        self.records.set(
            handle.0 as usize,
            AssetRecord {
                address: NOT_LOADED,
                size: 0,
                ..record
            },
        )?;
        Ok(())
    }

    /// Frees the data of every asset.
    ///
    /// # Errors
    ///
    /// The first error met. Remaining assets are still released.
    pub fn release_all(&mut self) -> EngineResult<()> {
        let mut first_error = None;
        for index in 0..self.records.len() {
            // Bounded by len(), which is a u32 by construction.
            let handle = AssetHandle(index as u32);
            if let Err(err) = self.release(handle) {
                first_error.get_or_insert(err);
            }
        }
        first_error.map_or(Ok(()), Err)
    }
}

impl Drop for AssetIndex {
    fn drop(&mut self) {
        if let Err(err) = self.release_all() {
            tracing::error!("assets: failed to release asset data: {}", err);
        }
    }
}

/// A file to load for an asset.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LoadRequest {
    /// Asset the data belongs to.
    pub handle: AssetHandle,
    /// File to read.
    pub path: PathBuf,
}

/// Data read by the loader, resident in an [`MemoryTag::Asset`] block.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct LoadedAsset {
    /// Asset the data belongs to.
    pub handle: AssetHandle,
    /// Block holding the file contents.
    pub address: Address,
    /// File size in bytes.
    pub size: u64,
}

/// A request the loader could not satisfy.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LoadError {
    /// Asset the request was for.
    pub handle: AssetHandle,
    /// File that was requested.
    pub path: PathBuf,
    /// What went wrong.
    pub error: EngineError,
}

/// Outcome of one [`LoadRequest`].
pub type LoadReply = Result<LoadedAsset, LoadError>;

/// Background file loader.
///
/// One worker thread serves requests in order. Replies that are never
/// received are freed when the loader shuts down.
pub struct AssetLoader {
    memory: Arc<MemorySystem>,
    requests: Option<Sender<LoadRequest>>,
    replies: Receiver<LoadReply>,
    worker: Option<JoinHandle<()>>,
}

impl AssetLoader {
    /// Starts the worker thread.
    #[must_use]
    pub fn spawn(memory: Arc<MemorySystem>) -> Self {
        let (request_tx, request_rx) = unbounded::<LoadRequest>();
        let (reply_tx, reply_rx) = unbounded::<LoadReply>();

        let worker_memory = Arc::clone(&memory);
        let worker = thread::spawn(move || {
            Self::worker_loop(&worker_memory, &request_rx, &reply_tx);
        });
        tracing::debug!("assets: loader thread started");

        Self {
            memory,
            requests: Some(request_tx),
            replies: reply_rx,
            worker: Some(worker),
        }
    }

    /// Worker thread main loop. Ends when the request channel closes.
    fn worker_loop(memory: &MemorySystem, requests: &Receiver<LoadRequest>, replies: &Sender<LoadReply>) {
        for request in requests {
            let reply = Self::load(memory, &request.path)
                .map(|(address, size)| LoadedAsset {
                    handle: request.handle,
                    address,
                    size,
                })
                .map_err(|error| {
                    tracing::warn!("assets: failed to load {}: {}", request.path.display(), error);
                    LoadError {
                        handle: request.handle,
                        path: request.path.clone(),
                        error,
                    }
                });

            if let Err(unsent) = replies.send(reply) {
                // Nobody is listening any more; do not leak the block.
                if let Ok(loaded) = unsent.into_inner() {
                    if let Err(err) = memory.free(loaded.address) {
                        tracing::error!("assets: failed to free undelivered asset data: {}", err);
                    }
                }
                break;
            }
        }
    }

    fn load(memory: &MemorySystem, path: &Path) -> EngineResult<(Address, u64)> {
        let data = std::fs::read(path).map_err(|err| EngineError::Io {
            path: path.to_path_buf(),
            message: err.to_string(),
        })?;
        if data.is_empty() {
            return Err(EngineError::EmptyAsset(path.to_path_buf()));
        }

        let size = data.len() as u64;
        let address = memory.alloc(size, MemoryTag::Asset)?;
        if let Err(err) = memory.write(address, |bytes| bytes.copy_from_slice(&data)) {
            if let Err(rollback) = memory.free(address) {
                tracing::error!("assets: failed to free partial load of {}: {}", path.display(), rollback);
            }
            return Err(err.into());
        }
        tracing::debug!("assets: loaded {} ({} bytes)", path.display(), size);
        Ok((address, size))
    }

    /// Queues a file for loading.
    ///
    /// # Errors
    ///
    /// [`EngineError::LoaderClosed`] if the worker has stopped.
    pub fn request(&self, handle: AssetHandle, path: impl Into<PathBuf>) -> EngineResult<()> {
        let request = LoadRequest {
            handle,
            path: path.into(),
        };
        self.requests
            .as_ref()
            .ok_or(EngineError::LoaderClosed)?
            .send(request)
            .map_err(|_| EngineError::LoaderClosed)
    }

    /// Returns a finished reply without blocking.
    #[must_use]
    pub fn try_recv(&self) -> Option<LoadReply> {
        self.replies.try_recv().ok()
    }

    /// Waits up to `timeout` for the next reply.
    ///
    /// # Errors
    ///
    /// [`EngineError::LoaderClosed`] if the worker has stopped and every
    /// reply has been received.
    pub fn recv_timeout(&self, timeout: Duration) -> EngineResult<Option<LoadReply>> {
        match self.replies.recv_timeout(timeout) {
            Ok(reply) => Ok(Some(reply)),
            Err(RecvTimeoutError::Timeout) => Ok(None),
            Err(RecvTimeoutError::Disconnected) => Err(EngineError::LoaderClosed),
        }
    }

    /// Stops the worker after it has served every queued request, and frees
    /// the data of replies nobody received.
    pub fn shutdown(mut self) {
        self.stop();
    }

    fn stop(&mut self) {
        // Closing the request channel ends the worker loop.
        self.requests = None;
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                tracing::error!("assets: loader thread panicked");
            }
        }

        let mut dropped = 0usize;
        for loaded in self.replies.try_iter().flatten() {
            if let Err(err) = self.memory.free(loaded.address) {
                tracing::error!("assets: failed to free unclaimed asset data: {}", err);
            }
            dropped += 1;
        }
        if dropped > 0 {
            tracing::debug!("assets: freed {} unclaimed loads", dropped);
        }
    }
}

impl Drop for AssetLoader {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn memory() -> Arc<MemorySystem> {
        Arc::new(MemorySystem::with_arena_size(1 << 16).unwrap())
    }

    #[test]
    fn test_insert_is_idempotent() {
        let mut index = AssetIndex::new(memory()).unwrap();
        let tiles = index.insert("tiles.png").unwrap();
        let font = index.insert("font.ttf").unwrap();

        assert_ne!(tiles, font);
        assert_eq!(index.insert("tiles.png").unwrap(), tiles);
        assert_eq!(index.handle("font.ttf").unwrap(), Some(font));
        assert_eq!(index.handle("missing").unwrap(), None);
        assert_eq!(index.len(), 2);

        let record = index.record(font).unwrap();
        assert_eq!(record.name_hash, hash_str("font.ttf"));
        assert!(!record.is_loaded());
    }

    #[test]
    fn test_failed_name_insert_drops_record() {
        // Name buckets take 768 bytes and records grow to 1536 bytes on the
        // 33rd asset, leaving too little arena to rehash the name map.
        let memory = Arc::new(MemorySystem::with_arena_size(4096).unwrap());
        let mut index = AssetIndex::new(Arc::clone(&memory)).unwrap();
        for n in 0..32 {
            index.insert(&format!("asset-{n}")).unwrap();
        }

        assert!(matches!(
            index.insert("asset-32"),
            Err(EngineError::Memory(hearth_core::MemoryError::OutOfMemory { .. }))
        ));
        assert_eq!(index.len(), 32);
        assert_eq!(index.handle("asset-32").unwrap(), None);
        assert_eq!(
            index.record(AssetHandle(32)),
            Err(EngineError::UnknownAsset(32))
        );
        assert_eq!(index.insert("asset-5").unwrap(), AssetHandle(5));
    }

    #[test]
    fn test_attach_and_release() {
        let memory = memory();
        let mut index = AssetIndex::new(Arc::clone(&memory)).unwrap();
        let handle = index.insert("level.dat").unwrap();

        let address = memory.alloc(32, MemoryTag::Asset).unwrap();
        index
            .attach(LoadedAsset {
                handle,
                address,
                size: 32,
            })
            .unwrap();
        assert!(index.record(handle).unwrap().is_loaded());

        let replacement = memory.alloc(16, MemoryTag::Asset).unwrap();
        index
            .attach(LoadedAsset {
                handle,
                address: replacement,
                size: 16,
            })
            .unwrap();
        assert_eq!(memory.stats().tagged(MemoryTag::Asset), 16);

        index.release_all().unwrap();
        assert_eq!(memory.stats().tagged(MemoryTag::Asset), 0);
        assert!(!index.record(handle).unwrap().is_loaded());
    }

    #[test]
    fn test_unknown_handle() {
        let index = AssetIndex::new(memory()).unwrap();
        assert_eq!(
            index.record(AssetHandle(9)),
            Err(EngineError::UnknownAsset(9))
        );
    }

    #[test]
    fn test_index_frees_everything_on_drop() {
        let memory = memory();
        {
            let mut index = AssetIndex::new(Arc::clone(&memory)).unwrap();
            let handle = index.insert("music.ogg").unwrap();
            let address = memory.alloc(64, MemoryTag::Asset).unwrap();
            index.attach(LoadedAsset { handle, address, size: 64 }).unwrap();
        }
        assert_eq!(memory.alloc_count(), 0);
    }
}
