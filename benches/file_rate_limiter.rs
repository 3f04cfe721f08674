//! # File Rate Limiter Benchmarks
//!
//! Each acquisition is a lock, a read, a refill and an atomic rewrite, so
//! these numbers are dominated by the filesystem.
//!
//! Run with: `cargo bench --bench file_rate_limiter`

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use durable_rater::{
    BucketState, FileLock, FileRateLimiter, FileRateLimiterConfig, LimiterRegistry, LockMode,
};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use tempfile::tempdir;

/// A bucket that never runs dry during a benchmark
fn bottomless() -> FileRateLimiterConfig {
    FileRateLimiterConfig::new(1e9, 1 << 40)
}

/// Benchmark single-handle token acquisition
fn bench_try_acquire(c: &mut Criterion) {
    let mut group = c.benchmark_group("try_acquire");
    group.throughput(Throughput::Elements(1));

    group.bench_function("granted", |b| {
        let dir = tempdir().unwrap();
        let limiter = FileRateLimiter::new(dir.path().join("g.ratelimit"), bottomless()).unwrap();
        b.iter(|| std::hint::black_box(limiter.try_acquire()));
    });

    // Denials skip the write
    group.bench_function("denied", |b| {
        let dir = tempdir().unwrap();
        let limiter =
            FileRateLimiter::new(dir.path().join("d.ratelimit"), FileRateLimiterConfig::new(1e-6, 1))
                .unwrap();
        limiter.try_acquire();
        b.iter(|| std::hint::black_box(limiter.try_acquire()));
    });

    group.finish();
}

/// Benchmark read-only queries under a shared lock
fn bench_available_tokens(c: &mut Criterion) {
    c.bench_function("available_tokens", |b| {
        let dir = tempdir().unwrap();
        let limiter = FileRateLimiter::new(dir.path().join("a.ratelimit"), bottomless()).unwrap();
        limiter.try_acquire();
        b.iter(|| std::hint::black_box(limiter.available_tokens()));
    });
}

/// Benchmark several handles contending for one state file
fn bench_contended_handles(c: &mut Criterion) {
    let mut group = c.benchmark_group("contended_handles");

    for num_threads in [2, 4, 8] {
        group.throughput(Throughput::Elements(num_threads as u64 * 50));
        group.bench_with_input(
            BenchmarkId::from_parameter(format!("{}_threads", num_threads)),
            &num_threads,
            |b, &num_threads| {
                let dir = tempdir().unwrap();
                let path = dir.path().join("c.ratelimit");

                b.iter_custom(|iters| {
                    let mut total_duration = Duration::ZERO;

                    for _ in 0..iters {
                        let start = Instant::now();
                        let handles: Vec<_> = (0..num_threads)
                            .map(|_| {
                                let path = path.clone();
                                thread::spawn(move || {
                                    let limiter = FileRateLimiter::new(path, bottomless()).unwrap();
                                    for _ in 0..50 {
                                        limiter.try_acquire();
                                    }
                                })
                            })
                            .collect();
                        for handle in handles {
                            handle.join().unwrap();
                        }
                        total_duration += start.elapsed();
                    }

                    total_duration
                });
            },
        );
    }

    group.finish();
}

/// Benchmark namespace lookup through the registry
fn bench_registry(c: &mut Criterion) {
    let mut group = c.benchmark_group("registry");

    group.bench_function("get_limiter_hit", |b| {
        let dir = tempdir().unwrap();
        let registry = LimiterRegistry::new(dir.path(), bottomless());
        registry.get_limiter("api").unwrap();
        b.iter(|| std::hint::black_box(registry.get_limiter("api").unwrap()));
    });

    group.bench_function("try_acquire_spread", |b| {
        let dir = tempdir().unwrap();
        let registry = Arc::new(LimiterRegistry::new(dir.path(), bottomless()));
        let names: Vec<String> = (0..32).map(|i| format!("tenant-{}", i)).collect();
        let mut i = 0;
        b.iter(|| {
            i = (i + 1) % names.len();
            std::hint::black_box(registry.try_acquire(&names[i]))
        });
    });

    group.finish();
}

/// Benchmark the lock primitive on its own
fn bench_file_lock(c: &mut Criterion) {
    let mut group = c.benchmark_group("file_lock");

    for (name, mode) in [("shared", LockMode::Shared), ("exclusive", LockMode::Exclusive)] {
        group.bench_function(name, |b| {
            let dir = tempdir().unwrap();
            let path = dir.path().join("bench.lock");
            b.iter(|| std::hint::black_box(FileLock::acquire(&path, mode, Duration::ZERO).unwrap()));
        });
    }

    group.finish();
}

/// Benchmark the pure record arithmetic
fn bench_state_record(c: &mut Criterion) {
    let mut group = c.benchmark_group("state_record");
    let state = BucketState::full(3.0, 5, 1_700_000_000_000);
    let bytes = state.encode();

    group.bench_function("encode", |b| b.iter(|| std::hint::black_box(state.encode())));
    group.bench_function("decode", |b| {
        b.iter(|| std::hint::black_box(BucketState::decode(&bytes).unwrap()))
    });
    group.bench_function("refill", |b| {
        b.iter(|| {
            let mut s = state;
            s.tokens = 0.0;
            s.refill(1_700_000_000_500, 3.0, 5);
            std::hint::black_box(s)
        })
    });

    group.finish();
}

criterion_group!(
    benches,
    bench_try_acquire,
    bench_available_tokens,
    bench_contended_handles,
    bench_registry,
    bench_file_lock,
    bench_state_record,
);

criterion_main!(benches);
