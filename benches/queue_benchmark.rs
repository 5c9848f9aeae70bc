/*!
 * Queue and Dispatch Benchmarks
 *
 * Work queue throughput under contention, and the cost of running a
 * series of no-op tasks through the trampoline
 */

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use flowkernel::kernel::WorkQueue;
use flowkernel::task::GenericTask;
use flowkernel::workflow::SeriesWork;
use std::sync::Arc;
use std::thread;

const MESSAGES: u64 = 10_000;

fn bench_queue_producers(c: &mut Criterion) {
    let mut group = c.benchmark_group("work_queue_producers");
    group.throughput(Throughput::Elements(MESSAGES));

    for producers in [1u64, 2, 4, 8] {
        group.bench_with_input(BenchmarkId::from_parameter(producers), &producers, |b, &producers| {
            b.iter(|| {
                let queue = Arc::new(WorkQueue::new(1024));
                let per = MESSAGES / producers;
                let handles: Vec<_> = (0..producers)
                    .map(|_| {
                        let queue = queue.clone();
                        thread::spawn(move || {
                            for i in 0..per {
                                queue.put(i);
                            }
                        })
                    })
                    .collect();

                let mut sum = 0u64;
                for _ in 0..per * producers {
                    sum += queue.get().unwrap_or(0);
                }
                for handle in handles {
                    handle.join().unwrap();
                }
                black_box(sum)
            });
        });
    }

    group.finish();
}

fn bench_put_head(c: &mut Criterion) {
    c.bench_function("work_queue_put_head", |b| {
        let queue = WorkQueue::unbounded();
        b.iter(|| {
            queue.put(1u32);
            queue.put_head(0u32);
            black_box(queue.get());
            black_box(queue.get());
        });
    });
}

fn bench_series_dispatch(c: &mut Criterion) {
    let mut group = c.benchmark_group("series_dispatch");

    for tasks in [10usize, 1_000, 100_000] {
        group.throughput(Throughput::Elements(tasks as u64));
        group.bench_with_input(BenchmarkId::from_parameter(tasks), &tasks, |b, &tasks| {
            b.iter(|| {
                let series = SeriesWork::empty(None);
                for _ in 0..tasks {
                    series.push_back(GenericTask::new(None));
                }
                series.start();
                black_box(series.is_finished())
            });
        });
    }

    group.finish();
}

criterion_group!(benches, bench_queue_producers, bench_put_head, bench_series_dispatch);
criterion_main!(benches);
