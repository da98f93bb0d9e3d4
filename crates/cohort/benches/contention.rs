use cohort::scheduler::{wait_for_all, Scheduler, SchedulerConfig};
use cohort::sync::{Condition, Mutex, SyncPoint};
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use std::sync::Arc;
use std::thread;

fn bench_uncontended(c: &mut Criterion) {
    let mut group = c.benchmark_group("uncontended");

    let mutex = Mutex::new();
    group.bench_function("mutex_lock_unlock", |b| {
        b.iter(|| {
            mutex.lock().unwrap();
            mutex.unlock().unwrap();
        });
    });

    let point = SyncPoint::new(0u64);
    group.bench_function("trigger_no_waiters", |b| {
        b.iter(|| point.trigger(|v| *v = black_box(*v + 1)));
    });

    let condition = Condition::new();
    condition.trigger();
    group.bench_function("condition_fast_path", |b| {
        b.iter(|| condition.wait());
    });

    group.finish();
}

fn bench_contended_mutex(c: &mut Criterion) {
    let mut group = c.benchmark_group("contended_mutex");
    const ROUNDS: usize = 1_000;

    for threads in [2usize, 4, 8] {
        group.throughput(Throughput::Elements((threads * ROUNDS) as u64));
        group.bench_with_input(BenchmarkId::new("threads", threads), &threads, |b, &threads| {
            b.iter(|| {
                let mutex = Arc::new(Mutex::new());
                let handles: Vec<_> = (0..threads)
                    .map(|_| {
                        let mutex = mutex.clone();
                        thread::spawn(move || {
                            for _ in 0..ROUNDS {
                                let _guard = mutex.guard().unwrap();
                            }
                        })
                    })
                    .collect();
                for handle in handles {
                    handle.join().unwrap();
                }
            });
        });
    }

    group.finish();
}

fn bench_scheduler(c: &mut Criterion) {
    let mut group = c.benchmark_group("scheduler");

    let mut scheduler = Scheduler::new(SchedulerConfig::default().with_workers(4));
    scheduler.start().unwrap();

    for tasks in [100usize, 1_000] {
        group.throughput(Throughput::Elements(tasks as u64));
        group.bench_with_input(BenchmarkId::new("spawn_join", tasks), &tasks, |b, &tasks| {
            b.iter(|| {
                let spawned: Vec<_> = (0..tasks)
                    .map(|i| {
                        scheduler
                            .spawn(move |ctx| async move {
                                if i % 2 == 0 {
                                    ctx.yield_now().await;
                                }
                            })
                            .unwrap()
                    })
                    .collect();
                wait_for_all(&spawned)
            });
        });

        group.bench_with_input(BenchmarkId::new("fork_join", tasks), &tasks, |b, &tasks| {
            b.iter(|| {
                let root = scheduler
                    .spawn(move |ctx| async move {
                        for _ in 0..tasks {
                            ctx.spawn_subtask(|_ctx| async {}).unwrap();
                        }
                    })
                    .unwrap();
                root.wait()
            });
        });
    }

    group.finish();
}

criterion_group!(benches, bench_uncontended, bench_contended_mutex, bench_scheduler);
criterion_main!(benches);
