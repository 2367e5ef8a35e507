//! # Delegate Queue Benchmark
//!
//! Measures the marshaling overhead between threads:
//! - enqueue + drain on a single thread
//! - bounded important drain of a full backlog
//! - round trip of a synchronous task through a live native thread
//!
//! Run with: `cargo bench --package cadence_async`

#![allow(missing_docs)]
#![allow(dead_code)]

use std::sync::Arc;

use cadence_async::{DelegateQueue, Priority, TaskDispatcher, ThreadRegistry};
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};

fn bench_enqueue_drain(c: &mut Criterion) {
    let queue = DelegateQueue::new("bench");
    c.bench_function("important_enqueue_drain", |b| {
        b.iter(|| {
            queue.important_execute(|| {
                black_box(1_u64 + 1);
            });
            black_box(queue.drain())
        });
    });
}

fn bench_bounded_drain(c: &mut Criterion) {
    let mut group = c.benchmark_group("bounded_drain");

    for limit in [10_usize, 100, 1_000] {
        group.bench_with_input(BenchmarkId::from_parameter(limit), &limit, |b, &limit| {
            let queue = DelegateQueue::with_limit("bench", limit);
            b.iter(|| {
                for _ in 0..limit {
                    queue.important_execute(|| {});
                }
                black_box(queue.drain())
            });
        });
    }

    group.finish();
}

fn bench_inline_task(c: &mut Criterion) {
    let queue = Arc::new(DelegateQueue::new("owner"));
    queue.claim_owner();
    let dispatcher = TaskDispatcher::new(queue);

    c.bench_function("task_inline_pooled", |b| {
        b.iter(|| black_box(dispatcher.sync_run(|| 7_u32, Priority::Important)));
    });
}

fn bench_cross_thread_task(c: &mut Criterion) {
    let registry = ThreadRegistry::new();
    if registry.execute_all().is_err() {
        return;
    }
    let Ok(dispatcher) = registry.dispatcher("bench-owner") else {
        return;
    };
    if let Some(thread) = registry.get_thread("bench-owner") {
        thread.set_delay(std::time::Duration::from_millis(1));
    }

    c.bench_function("task_cross_thread_sync", |b| {
        b.iter(|| black_box(dispatcher.sync(|| 7_u32)));
    });

    registry.shutdown();
}

criterion_group!(
    benches,
    bench_enqueue_drain,
    bench_bounded_drain,
    bench_inline_task,
    bench_cross_thread_task,
);
criterion_main!(benches);
