//! Benchmark for the deduplicating work queue
//!
//! Target: a burst of events for 1K StorageClasses drains in well under 10ms

use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};
use storage_capability_controller::controller::ExponentialRateLimiter;
use storage_capability_controller::{RateLimiterConfig, WorkQueue};

fn bench_add_dedup(c: &mut Criterion) {
    let mut group = c.benchmark_group("work_queue");
    group.throughput(Throughput::Elements(1));

    // Pre-fill so every add hits the dirty set
    let queue = WorkQueue::new(RateLimiterConfig::default());
    let keys: Vec<String> = (0..1000).map(|i| format!("sc-{:04}", i)).collect();
    for key in &keys {
        queue.add(key);
    }

    group.bench_function("add_duplicate", |b| {
        let mut counter = 0usize;
        b.iter(|| {
            counter += 1;
            queue.add(black_box(&keys[counter % keys.len()]));
        });
    });

    group.finish();
}

fn bench_drain(c: &mut Criterion) {
    let mut group = c.benchmark_group("work_queue");
    group.throughput(Throughput::Elements(1000));

    let rt = tokio::runtime::Runtime::new().unwrap();
    let keys: Vec<String> = (0..1000).map(|i| format!("sc-{:04}", i)).collect();

    group.bench_function("add_get_done_1000", |b| {
        b.to_async(&rt).iter(|| async {
            let queue = WorkQueue::new(RateLimiterConfig::default());
            for key in &keys {
                queue.add(key);
            }
            while !queue.is_empty() {
                if let Some(key) = queue.get().await {
                    queue.forget(&key);
                    queue.done(&key);
                }
            }
        });
    });

    group.finish();
}

fn bench_rate_limited(c: &mut Criterion) {
    let mut group = c.benchmark_group("work_queue");
    group.throughput(Throughput::Elements(1));

    let limiter = ExponentialRateLimiter::new(RateLimiterConfig::default());

    group.bench_function("backoff_when", |b| {
        let mut counter = 0u64;
        b.iter(|| {
            counter += 1;
            let key = format!("sc-{}", counter % 100);
            let delay = limiter.when(black_box(&key));
            if counter % 20 == 0 {
                limiter.forget(&key);
            }
            delay
        });
    });

    group.finish();
}

criterion_group!(benches, bench_add_dedup, bench_drain, bench_rate_limited);
criterion_main!(benches);
