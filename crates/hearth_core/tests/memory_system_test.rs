//! # Memory System Integration Tests
//!
//! End-to-end scenarios through the public API: containers sharing one
//! system, cross-thread allocation and shutdown accounting.
//!
//! Run with: cargo test -p hearth_core --test memory_system_test

use std::sync::Arc;
use std::thread;

use hearth_core::{DArray, HashMap, MemoryConfig, MemoryError, MemorySystem, MemoryTag};

fn system(arena_size: u64) -> Arc<MemorySystem> {
    Arc::new(MemorySystem::with_arena_size(arena_size).unwrap())
}

#[test]
fn darray_of_i32_doubles_from_two() {
    let memory = system(4096);
    let mut array: DArray<i32> = DArray::with_capacity(Arc::clone(&memory), 2).unwrap();
    for value in [1, 2, 3] {
        array.push(value).unwrap();
    }

    assert_eq!(array.len(), 3);
    assert_eq!(array.capacity(), 4);
    assert_eq!(array.stride(), 4);
    for (index, expected) in [1, 2, 3].into_iter().enumerate() {
        assert_eq!(array.get(index).unwrap(), expected);
    }
}

#[test]
fn u32_map_resolves_collision() {
    fn identity(key: &u32) -> u64 {
        u64::from(*key)
    }
    fn same(a: &u32, b: &u32) -> bool {
        a == b
    }

    let memory = system(4096);
    let mut map: HashMap<u32, u8> =
        HashMap::new_in(Arc::clone(&memory), 8, 0xFFFF_FFFF, same, identity).unwrap();
    map.insert(5, b'a').unwrap();
    map.insert(13, b'b').unwrap();

    let slot = map.find(&13).unwrap().unwrap();
    assert_eq!(slot.index(), 6);
    assert_eq!(map.value(slot).unwrap(), b'b');
    assert_eq!(memory.stats().tagged(MemoryTag::HashMap), 8 * 5);
}

#[test]
fn containers_share_one_arena() {
    let memory = system(1 << 20);
    let mut names: HashMap<u64, u32> = HashMap::bytewise_in(Arc::clone(&memory), 16, 0).unwrap();
    let mut sizes: DArray<u64> = DArray::new(Arc::clone(&memory)).unwrap();

    for id in 1..=100u64 {
        let index = u32::try_from(sizes.len()).unwrap();
        sizes.push(id * 64).unwrap();
        names.insert(id, index).unwrap();
    }

    let index = names.get(&42).unwrap().unwrap() as usize;
    assert_eq!(sizes.get(index).unwrap(), 42 * 64);

    let stats = memory.stats();
    let tagged: u64 = stats.iter().map(|(_, bytes)| bytes).sum();
    assert_eq!(tagged, stats.total_allocated());
    assert_eq!(stats.allocation_count(), 2);

    drop(names);
    drop(sizes);
    assert_eq!(memory.stats().total_allocated(), 0);
    assert_eq!(memory.free_space(), memory.total_size());
}

#[test]
fn concurrent_allocation_is_serialized() {
    let memory = system(4 << 20);

    thread::scope(|scope| {
        for worker in 0..4u8 {
            let memory = Arc::clone(&memory);
            scope.spawn(move || {
                for round in 0..250u64 {
                    let size = 8 + (round % 13) * 16;
                    let block = memory.alloc(size, MemoryTag::Asset).unwrap();
                    memory.write(block, |bytes| bytes.fill(worker)).unwrap();
                    let intact = memory
                        .read(block, |bytes| bytes.iter().all(|&b| b == worker))
                        .unwrap();
                    assert!(intact);
                    memory.free(block).unwrap();
                }
            });
        }
    });

    assert_eq!(memory.alloc_count(), 0);
    assert_eq!(memory.free_space(), memory.total_size());
    assert!(memory.stats().peak_allocated() > 0);
}

#[test]
fn shutdown_reports_leaks_and_blocks_later_calls() {
    let memory = system(8192);
    let leaked = memory.alloc(300, MemoryTag::Window).unwrap();
    let mut array: DArray<u8> = DArray::new(Arc::clone(&memory)).unwrap();
    array.push(1).unwrap();

    let report = memory.shutdown().unwrap();
    assert_eq!(report.leaked_allocations, 2);
    assert_eq!(report.leaked_bytes, 300 + 4);
    assert!(report.usage_report.contains("WINDOW"));

    assert_eq!(memory.free(leaked), Err(MemoryError::ShutDown));
    assert_eq!(array.push(2), Err(MemoryError::ShutDown));
    // Dropping the array after shutdown only logs.
    drop(array);
}

#[test]
fn configured_node_pool_limits_fragmentation() {
    let config = MemoryConfig {
        arena_size: 1024,
        max_free_ranges: Some(2),
        ..MemoryConfig::default()
    };
    let memory = MemorySystem::new(&config).unwrap();
    let blocks: Vec<_> = (0..8)
        .map(|_| memory.alloc(64, MemoryTag::Game).unwrap())
        .collect();

    // One node tracks the tail of the arena, the second tracks this hole.
    memory.free(blocks[1]).unwrap();

    // The moved copy fits the hole, but the old block cannot be returned.
    assert_eq!(
        memory.realloc(Some(blocks[3]), 32, MemoryTag::Game),
        Err(MemoryError::NodePoolExhausted { capacity: 2 })
    );
    assert_eq!(memory.alloc_count(), 7);
    assert_eq!(memory.stats().tagged(MemoryTag::Game), 7 * 64);
    assert_eq!(memory.alloc_size(blocks[3]).unwrap(), 64);
    assert_eq!(memory.free_space(), 1024 - 7 * 64);

    assert!(matches!(
        memory.free(blocks[3]),
        Err(MemoryError::NodePoolExhausted { capacity: 2 })
    ));
    // Merging with an existing range needs no new node.
    memory.free(blocks[7]).unwrap();
    memory.free(blocks[2]).unwrap();
}
