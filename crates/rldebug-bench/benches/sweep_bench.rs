//! Registry validation benchmarks.
//!
//! Every intercepted call validates the whole registry first, so the sweep
//! cost grows with the number of live resources.

use criterion::{BenchmarkId, Criterion, criterion_group, criterion_main};
use rldebug_membrane::{
    CallKind, Descriptor, Fill, GuardedRegion, MemoryBlock, Registry, Resource, SourceLocation,
    validate_registry,
};

fn populated_registry(live: usize) -> Registry {
    let mut registry = Registry::new();
    for i in 0..live {
        let Some(region) = GuardedRegion::allocate(32 + i % 64, Fill::Poison) else {
            break;
        };
        let block = MemoryBlock::new(region, CallKind::Malloc);
        registry.insert(Descriptor::new(
            Resource::Memory(block),
            SourceLocation::new("bench.c", i as u32),
        ));
    }
    registry
}

fn bench_validate_registry(c: &mut Criterion) {
    let mut group = c.benchmark_group("validate_registry");

    for &live in &[0_usize, 16, 256, 4096] {
        let registry = populated_registry(live);
        group.bench_with_input(BenchmarkId::new("live", live), &registry, |b, reg| {
            b.iter(|| criterion::black_box(validate_registry(reg)));
        });
    }
    group.finish();
}

fn bench_descriptor_checksum(c: &mut Criterion) {
    let registry = populated_registry(1);
    let mut group = c.benchmark_group("descriptor_checksum");

    if let Some(slot) = registry.head() {
        if let Some(desc) = registry.get(slot) {
            group.bench_function("memory_block", |b| {
                b.iter(|| criterion::black_box(desc.compute_checksum()));
            });
        }
    }
    group.finish();
}

criterion_group!(benches, bench_validate_registry, bench_descriptor_checksum);
criterion_main!(benches);
