//! # Allocator Performance Benchmark
//!
//! Measures the allocation path from the raw freelist up to the tracked,
//! locked `MemorySystem`.
//!
//! Run with: `cargo bench --package hearth_core --bench allocator_benchmark`

// Benchmarks don't need docs
#![allow(missing_docs)]

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use hearth_core::{DynamicAllocator, Freelist, MemorySystem, MemoryTag};

/// Arena used by every benchmark: 16 MiB.
const ARENA_SIZE: u64 = 16 * 1024 * 1024;

/// Benchmark: allocate and free a batch of blocks straight from the freelist.
fn bench_freelist_churn(c: &mut Criterion) {
    let mut group = c.benchmark_group("freelist_churn");

    for count in [64u64, 1024, 8192] {
        group.bench_with_input(BenchmarkId::from_parameter(count), &count, |b, &count| {
            let mut freelist = Freelist::new(ARENA_SIZE).unwrap();
            let mut offsets = Vec::with_capacity(count as usize);
            b.iter(|| {
                for i in 0..count {
                    offsets.push(freelist.allocate(16 + (i % 7) * 8).unwrap());
                }
                // Free every other block first to exercise coalescing.
                for (i, &offset) in offsets.iter().enumerate().step_by(2) {
                    freelist.free(offset, 16 + (i as u64 % 7) * 8).unwrap();
                }
                for (i, &offset) in offsets.iter().enumerate().skip(1).step_by(2) {
                    freelist.free(offset, 16 + (i as u64 % 7) * 8).unwrap();
                }
                offsets.clear();
                black_box(freelist.free_space())
            });
        });
    }

    group.finish();
}

/// Benchmark: single alloc/free pair on the dynamic allocator.
fn bench_dynamic_alloc_free(c: &mut Criterion) {
    let mut allocator = DynamicAllocator::new(ARENA_SIZE).unwrap();
    c.bench_function("dynamic_alloc_free_256", |b| {
        b.iter(|| {
            let address = allocator.alloc(black_box(256)).unwrap();
            allocator.free(address, 256).unwrap();
        });
    });
}

/// Benchmark: tracked alloc/free including the lock, record map and zeroing.
fn bench_tracked_alloc_free(c: &mut Criterion) {
    let memory = MemorySystem::with_arena_size(ARENA_SIZE).unwrap();
    let mut group = c.benchmark_group("tracked_alloc_free");

    for size in [16u64, 256, 4096] {
        group.bench_with_input(BenchmarkId::from_parameter(size), &size, |b, &size| {
            b.iter(|| {
                let address = memory.alloc(size, MemoryTag::Game).unwrap();
                memory.free(black_box(address)).unwrap();
            });
        });
    }

    group.finish();
}

/// Benchmark: growing a block with realloc.
fn bench_realloc_growth(c: &mut Criterion) {
    let memory = MemorySystem::with_arena_size(ARENA_SIZE).unwrap();
    c.bench_function("realloc_16_to_64k", |b| {
        b.iter(|| {
            let mut address = memory.alloc(16, MemoryTag::String).unwrap();
            let mut size = 16;
            while size < 64 * 1024 {
                size *= 2;
                address = memory.realloc(Some(address), size, MemoryTag::String).unwrap();
            }
            memory.free(address).unwrap();
        });
    });
}

criterion_group!(
    benches,
    bench_freelist_churn,
    bench_dynamic_alloc_free,
    bench_tracked_alloc_free,
    bench_realloc_growth,
);
criterion_main!(benches);
