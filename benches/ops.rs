//! Micro-operation benchmarks for the cache engine.
//!
//! Run with: `cargo bench --bench ops`
//!
//! Measures per-operation latency (nanoseconds) for the hot read path,
//! the write path, and single-flight hits under identical conditions.

use std::hint::black_box;
use std::time::{Duration, Instant};

use criterion::{criterion_group, criterion_main, Criterion, Throughput};
use genarena::cache::Cache;
use genarena::loader::CancelToken;

const CAP_BYTES: i64 = 64 << 20;
const TTL: Duration = Duration::from_secs(600);
const KEYS: u64 = 16_384;
const OPS: u64 = 100_000;

// ============================================================================
// Get Hit Latency (ns/op)
// ============================================================================

fn bench_get_hit(c: &mut Criterion) {
    let mut group = c.benchmark_group("get_hit_ns");
    group.throughput(Throughput::Elements(OPS));

    for shards in [1u8, 4, 16] {
        group.bench_function(format!("shards_{shards}"), |b| {
            b.iter_custom(|iters| {
                let cache: Cache<u64, u64> = Cache::new(CAP_BYTES, TTL, shards).unwrap();
                for i in 0..KEYS {
                    cache.put(i, i, 8).unwrap();
                }
                let start = Instant::now();
                for _ in 0..iters {
                    for i in 0..OPS {
                        let key = i % KEYS;
                        black_box(cache.get(&key).unwrap());
                    }
                }
                let elapsed = start.elapsed();
                cache.close();
                elapsed
            })
        });
    }
    group.finish();
}

// ============================================================================
// Put Latency (ns/op)
// ============================================================================

fn bench_put(c: &mut Criterion) {
    let mut group = c.benchmark_group("put_ns");
    group.throughput(Throughput::Elements(OPS));

    for shards in [1u8, 4, 16] {
        group.bench_function(format!("shards_{shards}"), |b| {
            b.iter_custom(|iters| {
                let cache: Cache<u64, u64> = Cache::new(CAP_BYTES, TTL, shards).unwrap();
                let start = Instant::now();
                for _ in 0..iters {
                    for i in 0..OPS {
                        cache.put(i % KEYS, i, 8).unwrap();
                    }
                }
                let elapsed = start.elapsed();
                cache.close();
                elapsed
            })
        });
    }
    group.finish();
}

// ============================================================================
// Mixed Workload (90% get / 10% put)
// ============================================================================

fn bench_mixed(c: &mut Criterion) {
    let mut group = c.benchmark_group("mixed_90_10_ns");
    group.throughput(Throughput::Elements(OPS));

    group.bench_function("shards_8", |b| {
        b.iter_custom(|iters| {
            let cache: Cache<u64, u64> = Cache::new(CAP_BYTES, TTL, 8).unwrap();
            for i in 0..KEYS {
                cache.put(i, i, 8).unwrap();
            }
            let start = Instant::now();
            for _ in 0..iters {
                for i in 0..OPS {
                    let key = i % KEYS;
                    if i % 10 == 0 {
                        cache.put(key, i, 8).unwrap();
                    } else {
                        black_box(cache.get(&key).unwrap());
                    }
                }
            }
            let elapsed = start.elapsed();
            cache.close();
            elapsed
        })
    });
    group.finish();
}

// ============================================================================
// get_or_load Hit Path (no loader execution)
// ============================================================================

fn bench_get_or_load_hit(c: &mut Criterion) {
    let mut group = c.benchmark_group("get_or_load_hit_ns");
    group.throughput(Throughput::Elements(OPS));

    group.bench_function("shards_4", |b| {
        b.iter_custom(|iters| {
            let cache: Cache<u64, u64> = Cache::new(CAP_BYTES, TTL, 4).unwrap();
            let token = CancelToken::none();
            for i in 0..KEYS {
                cache.put(i, i, 8).unwrap();
            }
            let start = Instant::now();
            for _ in 0..iters {
                for i in 0..OPS {
                    let key = i % KEYS;
                    black_box(
                        cache
                            .get_or_load(&token, key, |_, k| Ok(*k))
                            .unwrap(),
                    );
                }
            }
            let elapsed = start.elapsed();
            cache.close();
            elapsed
        })
    });
    group.finish();
}

criterion_group!(
    benches,
    bench_get_hit,
    bench_put,
    bench_mixed,
    bench_get_or_load_hit
);
criterion_main!(benches);
