use std::sync::Arc;

use criterion::{black_box, criterion_group, criterion_main, BatchSize, Criterion, Throughput};
use gk_core::config::{CpuConfig, CpuCore};
use gk_memory::{GuestMemory, Memory};
use gk_ppc::tiered::dispatch::{DispatchCache, DispatchEntry};
use gk_ppc::Machine;

const CODE: u32 = 0x8000_1000;
const RUN_CYCLES: u64 = 200_000;

/// Eight increments and a branch back to the top
fn hot_loop(core: CpuCore) -> Machine {
    let config = CpuConfig {
        core,
        baseline: false,
        ..CpuConfig::default()
    };
    let memory = Arc::new(GuestMemory::new());
    for i in 0..8 {
        memory.write_be32(CODE + i * 4, 0x3863_0001).unwrap();
    }
    memory.write_be32(CODE + 32, 0x4BFF_FFE0).unwrap();

    let mut machine = Machine::new(&config, memory).unwrap();
    machine.state.pc = CODE;
    machine
}

fn bench_cores(c: &mut Criterion) {
    let mut group = c.benchmark_group("run_for");
    group.throughput(Throughput::Elements(RUN_CYCLES));
    for (name, core) in [("interpreter", CpuCore::Interpreter), ("tiered", CpuCore::Tiered)] {
        group.bench_function(name, |b| {
            b.iter_batched(
                || hot_loop(core),
                |mut machine| {
                    machine.run_for(RUN_CYCLES);
                    black_box(machine.state.gpr[3])
                },
                BatchSize::LargeInput,
            )
        });
    }
    group.finish();
}

fn bench_dispatch_cache(c: &mut Criterion) {
    const BLOCKS: u32 = 4096;
    let mut cache = DispatchCache::new(4);
    for i in 0..BLOCKS {
        cache.insert(DispatchEntry::interpreter(0x8000_0000 + i * 0x40, i * 4, 4));
    }

    let mut group = c.benchmark_group("dispatch_cache");
    group.throughput(Throughput::Elements(BLOCKS as u64));
    group.bench_function("find_hit", |b| {
        b.iter(|| {
            for i in 0..BLOCKS {
                black_box(cache.find(black_box(0x8000_0000 + i * 0x40)));
            }
        })
    });
    group.bench_function("find_miss", |b| {
        b.iter(|| {
            for i in 0..BLOCKS {
                black_box(cache.find(black_box(0x9000_0004 + i * 0x40)));
            }
        })
    });
    group.finish();
}

criterion_group!(benches, bench_cores, bench_dispatch_cache);
criterion_main!(benches);
