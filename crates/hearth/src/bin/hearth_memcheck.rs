//! # HEARTH Memory Check
//!
//! Boots the engine, runs a representative allocation workload through every
//! container, and prints the tagged usage report and the shutdown leak
//! report. Exits non-zero if anything leaked.
//!
//! ```bash
//! # Default configuration
//! ./hearth_memcheck
//!
//! # Custom configuration, plus asset files to load through the worker
//! ./hearth_memcheck crates/hearth/config/hearth.toml assets/tiles.png assets/font.ttf
//! ```

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use hearth::core::containers::hash::mix64;
use hearth::core::{DArray, HashMap, LinearAllocator, MemorySystem, MemoryTag};
use hearth::{init_logging, AssetIndex, AssetLoader, Engine, EngineConfig, EngineResult};

/// Entities simulated by the container workload.
const ENTITY_COUNT: u32 = 10_000;

/// Per-frame scratch memory.
const FRAME_SCRATCH: u64 = 64 * 1024;

/// How long to wait for one asset load.
const LOAD_TIMEOUT: Duration = Duration::from_secs(5);

fn same_id(a: &u32, b: &u32) -> bool {
    a == b
}

fn hash_id(id: &u32) -> u64 {
    mix64(u64::from(*id))
}

/// Arrays and maps that grow, shrink and churn.
fn container_workload(memory: &Arc<MemorySystem>) -> EngineResult<()> {
    let mut positions: DArray<[f32; 3]> = DArray::new(Arc::clone(memory))?;
    let mut slots: HashMap<u32, u32> =
        HashMap::new_in(Arc::clone(memory), 16, u32::MAX, same_id, hash_id)?;

    for id in 0..ENTITY_COUNT {
        let index = u32::try_from(positions.len()).unwrap_or(u32::MAX);
        #[allow(clippy::cast_precision_loss)]
        let coordinate = id as f32;
        positions.push([coordinate, 0.0, -coordinate])?;
        slots.insert(id, index)?;
    }

    // Despawn every third entity.
    for id in (0..ENTITY_COUNT).step_by(3) {
        slots.remove(&id)?;
    }

    println!(
        "  containers: {} positions (capacity {}), {} live slots in {} buckets",
        positions.len(),
        positions.capacity(),
        slots.len(),
        slots.bucket_count()
    );
    println!();
    print!("{}", memory.usage_report());
    println!();
    Ok(())
}

/// A few frames of scratch allocation.
fn frame_workload(memory: &Arc<MemorySystem>) -> EngineResult<()> {
    let mut scratch = LinearAllocator::new(Arc::clone(memory), FRAME_SCRATCH)?;
    for frame in 0..8u64 {
        for draw in 0..32u64 {
            scratch.alloc(64 + (frame * draw) % 512)?;
        }
        scratch.reset()?;
    }

    let game_state = memory.alloc(4096, MemoryTag::Game)?;
    let game_state = memory.realloc(Some(game_state), 16 * 1024, MemoryTag::Game)?;
    memory.free(game_state)?;
    Ok(())
}

/// Loads the given files through the background worker.
fn asset_workload(memory: &Arc<MemorySystem>, paths: &[PathBuf]) -> EngineResult<()> {
    if paths.is_empty() {
        return Ok(());
    }

    let mut index = AssetIndex::new(Arc::clone(memory))?;
    let loader = AssetLoader::spawn(Arc::clone(memory));
    for path in paths {
        let handle = index.insert(&path.to_string_lossy())?;
        loader.request(handle, path.clone())?;
    }

    for _ in paths {
        match loader.recv_timeout(LOAD_TIMEOUT)? {
            Some(Ok(loaded)) => {
                println!("  loaded asset {} ({} bytes)", loaded.handle.index(), loaded.size);
                index.attach(loaded)?;
            }
            Some(Err(failed)) => println!("  failed {}: {}", failed.path.display(), failed.error),
            None => println!("  timed out waiting for the asset loader"),
        }
    }
    println!(
        "  assets resident: {}",
        hearth::core::memory::format_bytes(memory.stats().tagged(MemoryTag::Asset))
    );

    loader.shutdown();
    index.release_all()?;
    Ok(())
}

fn run(config: EngineConfig, assets: &[PathBuf]) -> EngineResult<bool> {
    let engine = Engine::init(config)?;

    container_workload(engine.memory())?;
    frame_workload(engine.memory())?;
    asset_workload(engine.memory(), assets)?;

    let report = engine.shutdown()?;
    if report.is_clean() {
        println!("  ✓ no leaks");
    } else {
        println!(
            "  ✗ {} bytes in {} allocations leaked",
            report.leaked_bytes, report.leaked_allocations
        );
        print!("{}", report.usage_report);
    }
    Ok(report.is_clean())
}

fn main() -> ExitCode {
    let mut args = std::env::args().skip(1);
    let config = match args.next() {
        Some(path) => match EngineConfig::from_file(&path) {
            Ok(config) => config,
            Err(err) => {
                eprintln!("✗ FATAL: {err}");
                return ExitCode::FAILURE;
            }
        },
        None => EngineConfig::default(),
    };
    let assets: Vec<PathBuf> = args.map(PathBuf::from).collect();

    if let Err(err) = init_logging(&config.logging) {
        eprintln!("✗ {err}");
    }

    println!("═══════════════════════════════════════════════════════════════════");
    println!("                    HEARTH MEMORY CHECK");
    println!("═══════════════════════════════════════════════════════════════════");
    println!(
        "  arena: {}",
        hearth::core::memory::format_bytes(config.memory.arena_size)
    );
    println!();

    match run(config, &assets) {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(err) => {
            tracing::error!("memcheck: {}", err);
            eprintln!("✗ FATAL: {err}");
            ExitCode::FAILURE
        }
    }
}
