//! # Response Cache Benchmarks
//!
//! Run with: `cargo bench --bench response_cache`

use criterion::{criterion_group, criterion_main, BatchSize, BenchmarkId, Criterion, Throughput};
use durable_rater::{generate_key, request_key, CacheConfig, ResponseCache};
use tempfile::{tempdir, TempDir};

fn open_cache() -> (TempDir, ResponseCache) {
    let dir = tempdir().unwrap();
    let cache = ResponseCache::new(CacheConfig::new(dir.path().join("cache"))).unwrap();
    (dir, cache)
}

/// Benchmark key derivation for different prompt sizes
fn bench_generate_key(c: &mut Criterion) {
    let mut group = c.benchmark_group("generate_key");

    for size in [64usize, 1024, 16 * 1024] {
        let prompt = "x".repeat(size);
        group.throughput(Throughput::Bytes(size as u64));
        group.bench_with_input(BenchmarkId::from_parameter(size), &prompt, |b, prompt| {
            b.iter(|| std::hint::black_box(request_key(prompt, "gpt-4", "You are terse.")))
        });
    }

    group.finish();
}

/// Benchmark writes of different payload sizes
fn bench_put(c: &mut Criterion) {
    let mut group = c.benchmark_group("put");

    for size in [128usize, 4 * 1024, 64 * 1024] {
        let payload = vec![b'r'; size];
        group.throughput(Throughput::Bytes(size as u64));
        group.bench_with_input(BenchmarkId::from_parameter(size), &payload, |b, payload| {
            let (_dir, cache) = open_cache();
            let key = generate_key(&["put", &size.to_string()]);
            b.iter(|| cache.put(&key, payload).unwrap());
        });
    }

    group.finish();
}

/// Benchmark lookups
fn bench_get(c: &mut Criterion) {
    let mut group = c.benchmark_group("get");

    group.bench_function("hit", |b| {
        let (_dir, cache) = open_cache();
        let key = generate_key(&["hit"]);
        cache.put(&key, vec![b'r'; 4096]).unwrap();
        b.iter(|| std::hint::black_box(cache.get(&key).unwrap()));
    });

    group.bench_function("miss", |b| {
        let (_dir, cache) = open_cache();
        let key = generate_key(&["miss"]);
        b.iter(|| std::hint::black_box(cache.get(&key).unwrap()));
    });

    group.bench_function("rejected_key", |b| {
        let (_dir, cache) = open_cache();
        b.iter(|| std::hint::black_box(cache.get("../../etc/passwd").is_err()));
    });

    group.finish();
}

/// Benchmark the directory scans behind stats and sweeps
fn bench_scans(c: &mut Criterion) {
    let mut group = c.benchmark_group("scans");

    for entries in [10usize, 100, 500] {
        group.bench_with_input(BenchmarkId::new("get_stats", entries), &entries, |b, &entries| {
            let (_dir, cache) = open_cache();
            for i in 0..entries {
                cache.put(&generate_key(&[&i.to_string()]), "payload").unwrap();
            }
            b.iter(|| std::hint::black_box(cache.get_stats()));
        });

        group.bench_with_input(BenchmarkId::new("clear", entries), &entries, |b, &entries| {
            b.iter_batched(
                || {
                    let (dir, cache) = open_cache();
                    for i in 0..entries {
                        cache.put(&generate_key(&[&i.to_string()]), "payload").unwrap();
                    }
                    (dir, cache)
                },
                |(_dir, cache)| std::hint::black_box(cache.clear()),
                BatchSize::PerIteration,
            );
        });
    }

    group.finish();
}

criterion_group!(benches, bench_generate_key, bench_put, bench_get, bench_scans);

criterion_main!(benches);
