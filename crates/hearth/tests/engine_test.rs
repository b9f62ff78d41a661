//! Engine integration tests: configuration files, the asset loader round
//! trip and leak reporting at shutdown.

use std::fs;
use std::sync::Arc;
use std::time::Duration;

use hearth::core::MemoryTag;
use hearth::{AssetIndex, AssetLoader, Engine, EngineConfig, EngineError, LoadReply};

const TIMEOUT: Duration = Duration::from_secs(5);

fn small_engine() -> Engine {
    let config = EngineConfig::from_toml_str("[memory]\narena_size = 1048576\n").unwrap();
    Engine::init(config).unwrap()
}

fn next_reply(loader: &AssetLoader) -> LoadReply {
    loader
        .recv_timeout(TIMEOUT)
        .unwrap()
        .expect("loader did not reply in time")
}

#[test]
fn test_config_from_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("hearth.toml");
    fs::write(
        &path,
        "[memory]\narena_size = 131072\nmax_free_ranges = 16\n\n[logging]\nfilter = \"hearth=debug\"\nansi = false\n",
    )
    .unwrap();

    let config = EngineConfig::from_file(&path).unwrap();
    assert_eq!(config.memory.arena_size, 131_072);
    assert_eq!(config.memory.max_free_ranges, Some(16));
    assert_eq!(config.logging.filter, "hearth=debug");
    assert!(!config.logging.ansi);

    let engine = Engine::init(config).unwrap();
    assert_eq!(engine.memory().total_size(), 131_072);
    assert!(engine.shutdown().unwrap().is_clean());
}

#[test]
fn test_config_missing_file() {
    let dir = tempfile::tempdir().unwrap();
    let result = EngineConfig::from_file(dir.path().join("absent.toml"));
    assert!(matches!(result, Err(EngineError::Config(_))));
}

#[test]
fn test_asset_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let tiles = dir.path().join("tiles.bin");
    let font = dir.path().join("font.bin");
    fs::write(&tiles, [7u8; 300]).unwrap();
    fs::write(&font, b"glyphs").unwrap();

    let engine = small_engine();
    let memory = Arc::clone(engine.memory());
    let mut index = AssetIndex::new(Arc::clone(&memory)).unwrap();
    let loader = AssetLoader::spawn(Arc::clone(&memory));

    let tiles_handle = index.insert("tiles").unwrap();
    let font_handle = index.insert("font").unwrap();
    assert_eq!(index.insert("tiles").unwrap(), tiles_handle);
    assert_eq!(index.handle("font").unwrap(), Some(font_handle));
    assert_eq!(index.len(), 2);

    loader.request(tiles_handle, &tiles).unwrap();
    loader.request(font_handle, &font).unwrap();

    // One worker serves requests in order.
    let first = next_reply(&loader).unwrap();
    assert_eq!(first.handle, tiles_handle);
    assert_eq!(first.size, 300);
    index.attach(first).unwrap();

    let second = next_reply(&loader).unwrap();
    assert_eq!(second.handle, font_handle);
    index.attach(second).unwrap();

    let record = index.record(font_handle).unwrap();
    assert!(record.is_loaded());
    let bytes = memory.read(record.address, <[u8]>::to_vec).unwrap();
    assert_eq!(bytes, b"glyphs");
    assert_eq!(memory.stats().tagged(MemoryTag::Asset), 306);

    index.release(tiles_handle).unwrap();
    assert!(!index.record(tiles_handle).unwrap().is_loaded());
    assert_eq!(memory.stats().tagged(MemoryTag::Asset), 6);

    loader.shutdown();
    drop(index);
    drop(memory);
    assert!(engine.shutdown().unwrap().is_clean());
}

#[test]
fn test_asset_load_failures() {
    let dir = tempfile::tempdir().unwrap();
    let empty = dir.path().join("empty.bin");
    fs::write(&empty, b"").unwrap();
    let missing = dir.path().join("missing.bin");

    let engine = small_engine();
    let mut index = AssetIndex::new(Arc::clone(engine.memory())).unwrap();
    let loader = AssetLoader::spawn(Arc::clone(engine.memory()));
    let handle = index.insert("broken").unwrap();

    loader.request(handle, &missing).unwrap();
    let failed = next_reply(&loader).unwrap_err();
    assert_eq!(failed.handle, handle);
    assert_eq!(failed.path, missing);
    assert!(matches!(failed.error, EngineError::Io { .. }));

    loader.request(handle, &empty).unwrap();
    let failed = next_reply(&loader).unwrap_err();
    assert_eq!(failed.error, EngineError::EmptyAsset(empty.clone()));

    assert_eq!(engine.memory().stats().tagged(MemoryTag::Asset), 0);
    assert!(!index.record(handle).unwrap().is_loaded());

    loader.shutdown();
    drop(index);
    assert!(engine.shutdown().unwrap().is_clean());
}

#[test]
fn test_unclaimed_loads_freed_on_shutdown() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("level.bin");
    fs::write(&path, [1u8; 128]).unwrap();

    let engine = small_engine();
    let mut index = AssetIndex::new(Arc::clone(engine.memory())).unwrap();
    let loader = AssetLoader::spawn(Arc::clone(engine.memory()));
    let handle = index.insert("level").unwrap();
    loader.request(handle, &path).unwrap();
    loader.request(handle, &path).unwrap();

    // The worker drains the queue before stopping; neither reply is claimed.
    loader.shutdown();
    assert_eq!(engine.memory().stats().tagged(MemoryTag::Asset), 0);

    drop(index);
    assert!(engine.shutdown().unwrap().is_clean());
}

#[test]
fn test_unknown_asset_handle() {
    let engine = small_engine();
    let mut index = AssetIndex::new(Arc::clone(engine.memory())).unwrap();
    let mut other = AssetIndex::new(Arc::clone(engine.memory())).unwrap();
    other.insert("a").unwrap();
    let foreign = other.insert("b").unwrap();

    assert_eq!(index.record(foreign), Err(EngineError::UnknownAsset(1)));
    assert_eq!(index.release(foreign), Err(EngineError::UnknownAsset(1)));
    assert_eq!(index.handle("b").unwrap(), None);
}

#[test]
fn test_shutdown_reports_leaks() {
    let engine = small_engine();
    let leaked = engine.memory().alloc(512, MemoryTag::Game).unwrap();
    engine.memory().alloc(64, MemoryTag::String).unwrap();

    let memory = Arc::clone(engine.memory());
    let report = engine.shutdown().unwrap();
    assert!(!report.is_clean());
    assert_eq!(report.leaked_bytes, 576);
    assert_eq!(report.leaked_allocations, 2);
    assert!(report.usage_report.contains("GAME"));

    assert!(memory.is_shut_down());
    assert!(matches!(
        memory.free(leaked),
        Err(hearth::core::MemoryError::ShutDown)
    ));
}

#[test]
fn test_loader_rejects_after_shutdown_of_memory() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("late.bin");
    fs::write(&path, [3u8; 16]).unwrap();

    let engine = small_engine();
    let loader = AssetLoader::spawn(Arc::clone(engine.memory()));
    let memory = Arc::clone(engine.memory());
    let mut index = AssetIndex::new(Arc::clone(&memory)).unwrap();
    let handle = index.insert("late").unwrap();
    drop(index);

    assert!(engine.shutdown().unwrap().is_clean());
    loader.request(handle, &path).unwrap();
    let failed = next_reply(&loader).unwrap_err();
    assert_eq!(
        failed.error,
        EngineError::Memory(hearth::core::MemoryError::ShutDown)
    );
    loader.shutdown();
    drop(memory);
}
