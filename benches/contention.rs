use crossbeam::channel;
use criterion::*;
use rand::Rng;
use stamp_stm::rng::SeededRng;
use stamp_stm::{atomically, TMap};
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

// Each benchmark spawns the worker threads first and only starts the clock
// once the workload is sent to them through a channel. A work item is a
// short list of keys; every key is read and incremented within one section
// (or under one lock acquisition for the lock baseline).
//
// DISJOINT: every thread gets its own range of keys, so sections never
// conflict. OVERLAPPING: all threads draw from the same small range.

const KEYS_PER_THREAD: u64 = 512;
const SHARED_KEYS: u64 = 64;
const KEYS_PER_ITEM: usize = 4;
const ITEMS_PER_THREAD: usize = 2048;
const THREAD_COUNTS: [usize; 4] = [1, 2, 4, 8];

type Item = Vec<u64>;

fn workload(thread_count: usize, disjoint: bool) -> Vec<Vec<Item>> {
    let mut rng = SeededRng::new(thread_count as u64);
    (0..thread_count as u64)
        .map(|thread| {
            (0..ITEMS_PER_THREAD)
                .map(|_| {
                    (0..KEYS_PER_ITEM)
                        .map(|_| match disjoint {
                            true => thread * KEYS_PER_THREAD + rng.gen_range(0..KEYS_PER_THREAD),
                            false => rng.gen_range(0..SHARED_KEYS),
                        })
                        .collect()
                })
                .collect()
        })
        .collect()
}

macro_rules! perform_stm {
    ($map:expr, $stream:expr) => {
        for item in $stream {
            atomically(|tx| {
                for key in item.iter() {
                    let count = $map.find(tx, key)?.unwrap_or(0);
                    $map.update(tx, *key, count + 1)?;
                }
                Ok(())
            });
        }
    };
}

macro_rules! perform_lock {
    ($map:expr, $stream:expr) => {
        for item in $stream {
            let mut guard = $map.lock().unwrap();
            for key in item.iter() {
                *guard.entry(*key).or_insert(0) += 1;
            }
        }
    };
}

// Spawn `thread_count` workers running `$perform`, feed each its share of
// the workload and time until all of them are done.
macro_rules! run_threads {
    ($thread_count:expr, $disjoint:expr, $map:expr, $perform:ident) => {{
        let workload = workload($thread_count, $disjoint);
        let mut handles = Vec::new();
        let mut senders = Vec::new();
        for _ in 0..$thread_count {
            let (send, recv) = channel::unbounded::<Item>();
            let map = $map.clone();
            handles.push(std::thread::spawn(move || {
                $perform!(map, recv);
            }));
            senders.push(send);
        }

        // We only start measuring the time once we send requests
        let start = Instant::now();
        for (send, items) in senders.into_iter().zip(workload) {
            for item in items {
                send.send(item).unwrap();
            }
        }
        for handle in handles {
            handle.join().unwrap();
        }
        start.elapsed()
    }};
}

fn stm_group(c: &mut Criterion, name: &str, disjoint: bool) {
    let mut group = c.benchmark_group(name);
    group.sample_size(10);
    for thread_count in THREAD_COUNTS.iter() {
        group.bench_with_input(
            BenchmarkId::from_parameter(thread_count),
            thread_count,
            |b, thread_count| {
                b.iter_custom(|iters| {
                    let mut duration = Duration::from_micros(0);
                    for _ in 0..iters {
                        let map: Arc<TMap<u64, u64>> = Arc::new(TMap::new());
                        duration += run_threads!(*thread_count, disjoint, map, perform_stm);
                    }
                    duration
                })
            },
        );
    }
    group.finish();
}

fn lock_group(c: &mut Criterion, name: &str, disjoint: bool) {
    let mut group = c.benchmark_group(name);
    group.sample_size(10);
    for thread_count in THREAD_COUNTS.iter() {
        group.bench_with_input(
            BenchmarkId::from_parameter(thread_count),
            thread_count,
            |b, thread_count| {
                b.iter_custom(|iters| {
                    let mut duration = Duration::from_micros(0);
                    for _ in 0..iters {
                        let map = Arc::new(Mutex::new(BTreeMap::<u64, u64>::new()));
                        duration += run_threads!(*thread_count, disjoint, map, perform_lock);
                    }
                    duration
                })
            },
        );
    }
    group.finish();
}

pub fn stm_bench(c: &mut Criterion) {
    stm_group(c, "STM_DISJOINT", true);
    stm_group(c, "STM_OVERLAPPING", false);
}

pub fn lock_bench(c: &mut Criterion) {
    lock_group(c, "LOCK_DISJOINT", true);
    lock_group(c, "LOCK_OVERLAPPING", false);
}

criterion_group!(contention, stm_bench, lock_bench);
criterion_main!(contention);
