//! Map operation benchmarks.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use hashtrie_bench::utils::{random_keys, random_payload, segmented_map};
use hashtrie_codec::{BytesCodec, U32Codec};
use hashtrie_core::{HashTrieMap, MapConfig};
use rand::Rng;
use std::sync::Arc;

fn payload_map() -> HashTrieMap<u32, Vec<u8>> {
    HashTrieMap::new(Arc::new(U32Codec), Arc::new(BytesCodec)).unwrap()
}

/// Benchmark inserts of fresh keys across payload sizes.
fn bench_put(c: &mut Criterion) {
    let mut group = c.benchmark_group("put");

    for size in [64, 256, 1024, 4096].iter() {
        group.throughput(Throughput::Bytes(*size as u64));
        group.bench_with_input(BenchmarkId::from_parameter(size), size, |b, &size| {
            let map = payload_map();
            let payload = random_payload(size);
            let mut next_key = 0u32;

            b.iter(|| {
                next_key = next_key.wrapping_add(1);
                map.put(black_box(&next_key), black_box(&payload)).unwrap();
            });
        });
    }
    group.finish();
}

/// Benchmark overwrites of a single hot key.
fn bench_put_overwrite(c: &mut Criterion) {
    let mut group = c.benchmark_group("put_overwrite");

    for size in [64, 1024].iter() {
        group.throughput(Throughput::Bytes(*size as u64));
        group.bench_with_input(BenchmarkId::from_parameter(size), size, |b, &size| {
            let map = payload_map();
            let payload = random_payload(size);
            map.put(&1, &payload).unwrap();

            b.iter(|| {
                map.put(black_box(&1), black_box(&payload)).unwrap();
            });
        });
    }
    group.finish();
}

/// Benchmark random reads from maps of increasing population.
fn bench_get_populated(c: &mut Criterion) {
    let mut group = c.benchmark_group("get_populated");

    for entry_count in [100, 1_000, 10_000].iter() {
        group.bench_with_input(
            BenchmarkId::from_parameter(entry_count),
            entry_count,
            |b, &count| {
                let map = segmented_map(3);
                let keys = random_keys(count);
                for key in &keys {
                    map.put(key, key).unwrap();
                }
                let mut rng = rand::thread_rng();

                b.iter(|| {
                    let key = keys[rng.gen_range(0..keys.len())];
                    let value = map.get(black_box(&key)).unwrap();
                    black_box(value);
                });
            },
        );
    }
    group.finish();
}

/// Benchmark reads across segment counts on a fixed population.
fn bench_segment_sweep(c: &mut Criterion) {
    let mut group = c.benchmark_group("segment_sweep");

    for shift in [0u8, 2, 4].iter() {
        group.bench_with_input(BenchmarkId::from_parameter(shift), shift, |b, &shift| {
            let map = segmented_map(shift);
            let keys = random_keys(10_000);
            for key in &keys {
                map.put(key, key).unwrap();
            }
            let mut rng = rand::thread_rng();

            b.iter(|| {
                let key = keys[rng.gen_range(0..keys.len())];
                let value = map.get(black_box(&key)).unwrap();
                black_box(value);
            });
        });
    }
    group.finish();
}

/// Benchmark removal including structural collapse.
fn bench_remove(c: &mut Criterion) {
    c.bench_function("remove", |b| {
        let map = segmented_map(3);
        let mut rng = rand::thread_rng();

        b.iter_batched(
            || {
                let key: u32 = rng.gen();
                map.put(&key, &key).unwrap();
                key
            },
            |key| {
                map.remove(black_box(&key)).unwrap();
            },
            criterion::BatchSize::SmallInput,
        );
    });
}

/// Benchmark inserts under an entry count bound, where every growing
/// write piggybacks an eviction pass.
fn bench_bounded_put(c: &mut Criterion) {
    c.bench_function("bounded_put", |b| {
        let map: HashTrieMap<u32, u32> = HashTrieMap::with_config(
            Arc::new(U32Codec),
            Arc::new(U32Codec),
            MapConfig::default().expire_max_size(1_000),
        )
        .unwrap();
        let mut next_key = 0u32;

        b.iter(|| {
            next_key = next_key.wrapping_add(1);
            map.put(black_box(&next_key), black_box(&next_key)).unwrap();
        });
    });
}

criterion_group!(
    benches,
    bench_put,
    bench_put_overwrite,
    bench_get_populated,
    bench_segment_sweep,
    bench_remove,
    bench_bounded_put,
);

criterion_main!(benches);
