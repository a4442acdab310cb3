// Single-threaded cost of the container operations, section overhead
// included: every operation below runs in its own atomic section, the way
// the workloads call them.

use criterion::*;
use rand::seq::SliceRandom;
use stamp_stm::rng::SeededRng;
use stamp_stm::{atomically, TArena, THeap, TList, TMap, TQueue};

const SIZES: [usize; 3] = [64, 512, 4096];

fn shuffled_keys(size: usize) -> Vec<u64> {
    let mut keys: Vec<u64> = (0..size as u64).collect();
    keys.shuffle(&mut SeededRng::new(size as u64));
    keys
}

pub fn map_bench(c: &mut Criterion) {
    let mut group = c.benchmark_group("TMAP");
    group.sample_size(10);
    for size in SIZES.iter() {
        let keys = shuffled_keys(*size);
        group.bench_with_input(BenchmarkId::from_parameter(size), &keys, |b, keys| {
            b.iter(|| {
                let map: TMap<u64, u64> = TMap::new();
                for key in keys.iter() {
                    atomically(|tx| map.insert(tx, *key, *key));
                }
                for key in keys.iter() {
                    black_box(atomically(|tx| map.find(tx, key)));
                }
                for key in keys.iter() {
                    atomically(|tx| map.remove(tx, key));
                }
                map.compact()
            })
        });
    }
    group.finish();
}

pub fn list_bench(c: &mut Criterion) {
    let mut group = c.benchmark_group("TLIST");
    group.sample_size(10);
    // sorted insert walks the list, keep it short
    for size in SIZES[..2].iter() {
        let keys = shuffled_keys(*size);
        group.bench_with_input(BenchmarkId::from_parameter(size), &keys, |b, keys| {
            b.iter(|| {
                let list: TList<u64> = TList::new();
                for key in keys.iter() {
                    atomically(|tx| list.insert(tx, *key));
                }
                for key in keys.iter() {
                    atomically(|tx| list.remove(tx, key));
                }
            })
        });
    }
    group.finish();
}

pub fn queue_bench(c: &mut Criterion) {
    let mut group = c.benchmark_group("TQUEUE");
    group.sample_size(10);
    for size in SIZES.iter() {
        group.bench_with_input(BenchmarkId::from_parameter(size), size, |b, size| {
            b.iter(|| {
                let queue = TQueue::new();
                for i in 0..*size {
                    atomically(|tx| queue.push(tx, i));
                }
                while let Some(i) = atomically(|tx| queue.pop(tx)) {
                    black_box(i);
                }
            })
        });
    }
    group.finish();
}

pub fn heap_bench(c: &mut Criterion) {
    let mut group = c.benchmark_group("THEAP");
    group.sample_size(10);
    for size in SIZES.iter() {
        let keys = shuffled_keys(*size);
        group.bench_with_input(BenchmarkId::from_parameter(size), &keys, |b, keys| {
            b.iter(|| {
                let heap: THeap<u64> = THeap::new();
                for key in keys.iter() {
                    atomically(|tx| heap.insert(tx, *key));
                }
                while let Some(key) = atomically(|tx| heap.remove_min(tx)) {
                    black_box(key);
                }
            })
        });
    }
    group.finish();
}

pub fn arena_bench(c: &mut Criterion) {
    let mut group = c.benchmark_group("TARENA");
    group.sample_size(10);
    for size in SIZES.iter() {
        group.bench_with_input(BenchmarkId::from_parameter(size), size, |b, size| {
            let arena = TArena::new();
            b.iter(|| {
                let handles: Vec<_> = (0..*size)
                    .map(|i| atomically(|tx| arena.alloc(tx, i)))
                    .collect();
                for handle in handles {
                    atomically(|tx| arena.free(tx, handle));
                }
            })
        });
    }
    group.finish();
}

criterion_group!(containers, map_bench, list_bench, queue_bench, heap_bench, arena_bench);
criterion_main!(containers);
