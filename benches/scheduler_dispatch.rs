//! Scheduler dispatch benchmarks.
//!
//! Measures the per-entry cost of the run loop:
//! - adding and completing microthreads in one pass
//! - round-robin yields between equal-priority microthreads
//! - invoking reusable action nodes
//! - waking waiters through a wait queue

use criterion::{BenchmarkId, Criterion, Throughput, black_box, criterion_group, criterion_main};
use microthread::sync::WaitQueue;
use microthread::{MicroThreadFlags, ScheduleMode, Scheduler};
use std::sync::Arc;

const SIZES: [usize; 3] = [16, 256, 4096];

fn bench_add_and_run(c: &mut Criterion) {
    let mut group = c.benchmark_group("dispatch/add_and_run");
    for size in SIZES {
        group.throughput(Throughput::Elements(size as u64));
        group.bench_with_input(BenchmarkId::from_parameter(size), &size, |b, &size| {
            b.iter(|| {
                let scheduler = Scheduler::new();
                for index in 0..size {
                    let priority = (index % 4) as i64;
                    scheduler.add_with(priority, MicroThreadFlags::NONE, |_cx| async { Ok(()) });
                }
                scheduler.run().expect("run");
                black_box(scheduler.snapshot().counters.finished)
            });
        });
    }
    group.finish();
}

fn bench_yield_round_robin(c: &mut Criterion) {
    let mut group = c.benchmark_group("dispatch/yield");
    const ROUNDS: usize = 8;
    for size in [16_usize, 256] {
        group.throughput(Throughput::Elements((size * ROUNDS) as u64));
        group.bench_with_input(BenchmarkId::from_parameter(size), &size, |b, &size| {
            b.iter(|| {
                let scheduler = Scheduler::new();
                for _ in 0..size {
                    scheduler.add(|cx| async move {
                        for _ in 0..ROUNDS {
                            cx.yield_now().await?;
                        }
                        Ok(())
                    });
                }
                scheduler.run().expect("run");
                black_box(scheduler.snapshot().counters.resumes)
            });
        });
    }
    group.finish();
}

fn bench_action_nodes(c: &mut Criterion) {
    let mut group = c.benchmark_group("dispatch/actions");
    let scheduler = Scheduler::new();
    let nodes: Vec<_> = (0..256)
        .map(|index| scheduler.create_node(index % 8, || Ok(())))
        .collect();
    group.throughput(Throughput::Elements(nodes.len() as u64));
    group.bench_function("schedule_and_run_256", |b| {
        b.iter(|| {
            for node in &nodes {
                scheduler.schedule(node, ScheduleMode::Last);
            }
            scheduler.run().expect("run");
        });
    });
    group.finish();
}

fn bench_wait_queue_wakeups(c: &mut Criterion) {
    let mut group = c.benchmark_group("dispatch/wait_queue");
    for size in [16_usize, 256] {
        group.throughput(Throughput::Elements(size as u64));
        group.bench_with_input(BenchmarkId::from_parameter(size), &size, |b, &size| {
            b.iter(|| {
                let scheduler = Scheduler::new();
                let queue = Arc::new(WaitQueue::<u64>::new());
                for _ in 0..size {
                    let queue = Arc::clone(&queue);
                    scheduler.add(move |_cx| async move {
                        black_box(queue.enqueue().await?);
                        Ok(())
                    });
                }
                let producer = Arc::clone(&queue);
                scheduler.add_with(1, MicroThreadFlags::NONE, move |_cx| async move {
                    producer.dequeue_all(7).release();
                    Ok(())
                });
                scheduler.run().expect("run");
            });
        });
    }
    group.finish();
}

criterion_group!(
    benches,
    bench_add_and_run,
    bench_yield_round_robin,
    bench_action_nodes,
    bench_wait_queue_wakeups
);
criterion_main!(benches);
