//! # Limiter Benchmarks
//!
//! Throughput of the admission path with and without contention.
//!
//! Run with: `cargo bench`

use criterion::{criterion_group, criterion_main, BatchSize, BenchmarkId, Criterion, Throughput};
use sluice::{LimiterConfig, Message, RateLimiter};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

/// High enough that no benchmark ever runs out of credit.
const UNLIMITED: f64 = 1e12;

/// Benchmark single-threaded admission for one sender
fn bench_single_send(c: &mut Criterion) {
    let mut group = c.benchmark_group("single_send");
    group.throughput(Throughput::Elements(1));

    group.bench_function("admit", |b| {
        let limiter = RateLimiter::new(LimiterConfig::per_minute(UNLIMITED));
        limiter.start().unwrap();
        let output = limiter.take_output().unwrap();
        let mut id = 0u64;

        b.iter(|| {
            id += 1;
            let admitted = limiter.send(Message::new(id, "alice", "bench")).is_ok();
            std::hint::black_box(admitted);
            output.try_next()
        });
    });

    group.bench_function("reject", |b| {
        let limiter = RateLimiter::new(LimiterConfig::per_minute(1.0).with_reject(true));
        limiter.start().unwrap();
        let _output = limiter.take_output().unwrap();
        limiter.send(Message::new(0, "alice", "drain")).unwrap();

        b.iter(|| std::hint::black_box(limiter.send(Message::new(1, "alice", "bench"))));
    });

    group.finish();
}

/// Benchmark first-message cost, which includes creating the sender's bucket
fn bench_new_sender(c: &mut Criterion) {
    let mut group = c.benchmark_group("new_sender");

    for senders in [10u64, 100, 1000] {
        group.throughput(Throughput::Elements(senders));
        group.bench_with_input(
            BenchmarkId::from_parameter(senders),
            &senders,
            |b, &senders| {
                let names: Vec<String> = (0..senders).map(|i| format!("sender-{}", i)).collect();
                b.iter_batched(
                    || {
                        let limiter = RateLimiter::new(LimiterConfig::per_minute(UNLIMITED));
                        limiter.start().unwrap();
                        let output = limiter.take_output().unwrap();
                        (limiter, output)
                    },
                    |(limiter, output)| {
                        for name in &names {
                            let _ = limiter.send(Message::new(0, name.as_str(), "hello"));
                        }
                        (limiter, output)
                    },
                    BatchSize::SmallInput,
                );
            },
        );
    }

    group.finish();
}

/// Benchmark many threads sending, either all as one sender or each as its own
fn bench_concurrent_send(c: &mut Criterion) {
    let mut group = c.benchmark_group("concurrent_send");
    let per_thread = 1000u64;

    for num_threads in [2u64, 4, 8] {
        group.throughput(Throughput::Elements(num_threads * per_thread));

        for shared in [true, false] {
            let label = if shared { "same_sender" } else { "own_sender" };
            group.bench_with_input(
                BenchmarkId::new(label, format!("{}_threads", num_threads)),
                &num_threads,
                |b, &num_threads| {
                    b.iter_custom(|iters| {
                        let mut total = Duration::ZERO;
                        for _ in 0..iters {
                            let config = LimiterConfig::per_minute(UNLIMITED);
                            let limiter = Arc::new(RateLimiter::new(config));
                            limiter.start().unwrap();
                            let output = limiter.take_output().unwrap();
                            let drain = thread::spawn(move || output.count());

                            let start = Instant::now();
                            let handles: Vec<_> = (0..num_threads)
                                .map(|t| {
                                    let limiter = limiter.clone();
                                    let name = if shared {
                                        "shared".to_string()
                                    } else {
                                        format!("sender-{}", t)
                                    };
                                    thread::spawn(move || {
                                        for i in 0..per_thread {
                                            let msg = Message::new(i, name.as_str(), "x");
                                            let _ = limiter.send(msg);
                                        }
                                    })
                                })
                                .collect();
                            for handle in handles {
                                handle.join().unwrap();
                            }
                            total += start.elapsed();

                            limiter.close().unwrap();
                            drain.join().unwrap();
                        }
                        total
                    });
                },
            );
        }
    }

    group.finish();
}

/// Benchmark the metrics snapshot with many senders registered
fn bench_metrics(c: &mut Criterion) {
    let mut group = c.benchmark_group("metrics");

    let limiter = RateLimiter::new(LimiterConfig::per_minute(UNLIMITED));
    limiter.start().unwrap();
    let _output = limiter.take_output().unwrap();
    for i in 0..1000 {
        limiter
            .send(Message::new(0, format!("sender-{}", i), "x"))
            .unwrap();
    }

    group.bench_function("limiter", |b| b.iter(|| std::hint::black_box(limiter.metrics())));
    group.bench_function("one_sender", |b| {
        b.iter(|| std::hint::black_box(limiter.sender_metrics("sender-500")))
    });
    group.bench_function("all_senders", |b| {
        b.iter(|| std::hint::black_box(limiter.all_sender_metrics()))
    });

    group.finish();
}

criterion_group!(
    benches,
    bench_single_send,
    bench_new_sender,
    bench_concurrent_send,
    bench_metrics
);
criterion_main!(benches);
