//! Benchmarks for the render worker pool.
//!
//! Benchmarks cover:
//! - Uncontended acquire/release of a warm worker
//! - Round trips to the worker thread
//! - Full page renders at several resolutions and pause policies
//! - Contended acquisition from several threads

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use std::hint::black_box;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use prometheus_render_pool::config::WorkerPoolConfig;
use prometheus_render_pool::core::WorkerPool;
use prometheus_render_pool::engine::synthetic::{self, SyntheticConfig, SyntheticEngine};
use prometheus_render_pool::engine::{AlwaysPause, NeverPause};
use rand::Rng;

// ============================================================================
// Helpers
// ============================================================================

fn make_pool(max_total: usize, engine: SyntheticEngine) -> WorkerPool<SyntheticEngine> {
    WorkerPool::new(
        WorkerPoolConfig::new()
            .with_min_idle(1)
            .with_max_idle(max_total)
            .with_max_total(max_total)
            .with_maintenance_interval(Duration::from_secs(3600)),
        engine,
    )
    .expect("pool")
}

// ============================================================================
// Lease Benchmarks
// ============================================================================

fn bench_acquire_release(c: &mut Criterion) {
    let pool = make_pool(2, SyntheticEngine::default());

    c.bench_function("lease/acquire_release", |b| {
        b.iter(|| {
            let mut lease = pool.try_acquire().expect("lease");
            lease.close().expect("close");
            black_box(lease.id());
        });
    });

    c.bench_function("lease/open_close_document", |b| {
        let bytes = synthetic::document(8);
        let mut lease = pool.try_acquire().expect("lease");
        b.iter(|| {
            lease.open_document(bytes.clone()).expect("open");
            black_box(lease.page_count().expect("count"));
            lease.close_document().expect("close");
        });
    });
}

// ============================================================================
// Render Benchmarks
// ============================================================================

fn bench_render_page(c: &mut Criterion) {
    let pool = make_pool(1, SyntheticEngine::new(SyntheticConfig::new().with_render_steps(8)));
    let mut group = c.benchmark_group("render/page");

    for dpi in [36_u32, 72, 150] {
        let pixels = u64::from(612 * dpi / 72) * u64::from(792 * dpi / 72);
        group.throughput(Throughput::Elements(pixels));

        group.bench_with_input(BenchmarkId::new("never_pause", dpi), &dpi, |b, &dpi| {
            let mut lease = pool.try_acquire().expect("lease");
            lease.open_document(synthetic::document(1)).expect("open");
            b.iter(|| black_box(lease.render_page(0, dpi, NeverPause).expect("render")));
        });

        group.bench_with_input(BenchmarkId::new("always_pause", dpi), &dpi, |b, &dpi| {
            let mut lease = pool.try_acquire().expect("lease");
            lease.open_document(synthetic::document(1)).expect("open");
            b.iter(|| black_box(lease.render_page(0, dpi, AlwaysPause).expect("render")));
        });
    }

    group.finish();
}

// ============================================================================
// Contention Benchmarks
// ============================================================================

fn bench_contended_acquire(c: &mut Criterion) {
    let mut group = c.benchmark_group("pool/contended");
    group.sample_size(20);

    for threads in [2_usize, 4, 8] {
        let pool = Arc::new(make_pool(2, SyntheticEngine::default()));
        group.bench_with_input(BenchmarkId::from_parameter(threads), &threads, |b, &threads| {
            b.iter(|| {
                let handles: Vec<_> = (0..threads)
                    .map(|_| {
                        let pool = Arc::clone(&pool);
                        thread::spawn(move || {
                            let mut rng = rand::rng();
                            let mut lease = pool.acquire(Duration::from_secs(10)).expect("lease");
                            lease
                                .open_document(synthetic::document(rng.random_range(1..4)))
                                .expect("open");
                            black_box(lease.page_count().expect("count"));
                        })
                    })
                    .collect();
                for handle in handles {
                    handle.join().expect("join");
                }
            });
        });
    }

    group.finish();
}

criterion_group!(lease_benches, bench_acquire_release);

criterion_group!(render_benches, bench_render_page);

criterion_group!(contention_benches, bench_contended_acquire);

criterion_main!(lease_benches, render_benches, contention_benches);
