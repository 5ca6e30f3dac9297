//! Work queue benchmarks.
//!
//! Measures add/get/done cycles with and without coalescing, and the cost
//! of scheduling delayed retries.

use std::time::Duration;

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};

use reconcile_core::model::{ResourceIdentity, ResourceKind};
use reconcile_core::scheduler::WorkQueue;

fn identities(count: usize) -> Vec<ResourceIdentity> {
    (0..count)
        .map(|i| ResourceIdentity::new(ResourceKind::Deployment, "default", format!("app-{}", i)))
        .collect()
}

fn bench_add_get_done(c: &mut Criterion) {
    let mut group = c.benchmark_group("workqueue_cycle");

    for count in [100, 1000, 10_000] {
        let ids = identities(count);
        group.throughput(Throughput::Elements(count as u64));
        group.bench_function(BenchmarkId::new("identities", count), |b| {
            b.iter(|| {
                let queue = WorkQueue::new();
                for id in &ids {
                    queue.add(id.clone());
                }
                while let Some(id) = queue.try_get() {
                    queue.done(black_box(&id));
                }
            })
        });
    }

    group.finish();
}

fn bench_coalescing(c: &mut Criterion) {
    let mut group = c.benchmark_group("workqueue_coalesce");

    // Ten adds per identity collapse into one pass each.
    for count in [100, 1000] {
        let ids = identities(count);
        group.throughput(Throughput::Elements((count * 10) as u64));
        group.bench_function(BenchmarkId::new("identities", count), |b| {
            b.iter(|| {
                let queue = WorkQueue::new();
                for _ in 0..10 {
                    for id in &ids {
                        queue.add(id.clone());
                    }
                }
                assert_eq!(queue.len(), count);
            })
        });
    }

    group.finish();
}

fn bench_add_after(c: &mut Criterion) {
    let mut group = c.benchmark_group("workqueue_add_after");
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_time()
        .build()
        .unwrap();

    for count in [100, 1000] {
        let ids = identities(count);
        group.throughput(Throughput::Elements(count as u64));
        group.bench_function(BenchmarkId::new("identities", count), |b| {
            b.iter(|| {
                let _guard = runtime.enter();
                let queue = WorkQueue::new();
                for (i, id) in ids.iter().enumerate() {
                    queue.add_after(id.clone(), Duration::from_secs(60 + i as u64));
                }
                black_box(queue.delayed_count())
            })
        });
    }

    group.finish();
}

criterion_group!(benches, bench_add_get_done, bench_coalescing, bench_add_after);
criterion_main!(benches);
