//! Presence registry benchmarks.
//!
//! Measures the cost of counting joins and leaves, alone and under
//! contention from many threads.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use huddle_bench::room_keys;
use huddle_core::PresenceRegistry;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Join and leave in one busy room.
fn bench_single_room(c: &mut Criterion) {
    let mut group = c.benchmark_group("registry_single_room");

    group.bench_function("join_leave", |b| {
        let registry = PresenceRegistry::new();
        registry.join("lobby");
        b.iter(|| {
            registry.join(black_box("lobby"));
            registry.leave(black_box("lobby"))
        });
    });

    // The room is created and destroyed on every iteration
    group.bench_function("create_destroy", |b| {
        let registry = PresenceRegistry::new();
        b.iter(|| {
            registry.join(black_box("lobby"));
            registry.leave(black_box("lobby"))
        });
    });

    group.bench_function("peek", |b| {
        let registry = PresenceRegistry::new();
        registry.join("lobby");
        b.iter(|| registry.peek(black_box("lobby")));
    });

    group.finish();
}

/// Joins spread over many rooms.
fn bench_many_rooms(c: &mut Criterion) {
    let mut group = c.benchmark_group("registry_many_rooms");

    for rooms in [10usize, 1_000, 100_000] {
        let keys = room_keys(rooms);
        group.throughput(Throughput::Elements(1));
        group.bench_with_input(BenchmarkId::from_parameter(rooms), &keys, |b, keys| {
            let registry = PresenceRegistry::new();
            let mut i = 0usize;
            b.iter(|| {
                let key = &keys[i % keys.len()];
                i += 1;
                registry.join(black_box(key))
            });
        });
    }

    group.finish();
}

/// Threads joining and leaving the same room at once.
fn bench_contention(c: &mut Criterion) {
    let mut group = c.benchmark_group("registry_contention");
    group.measurement_time(Duration::from_secs(5));

    for threads in [2usize, 4, 8] {
        group.throughput(Throughput::Elements(threads as u64));
        group.bench_with_input(
            BenchmarkId::from_parameter(threads),
            &threads,
            |b, &threads| {
                b.iter_custom(|iters| {
                    let registry = Arc::new(PresenceRegistry::new());
                    let start = Instant::now();
                    let handles: Vec<_> = (0..threads)
                        .map(|_| {
                            let registry = Arc::clone(&registry);
                            std::thread::spawn(move || {
                                for _ in 0..iters {
                                    registry.join("lobby");
                                    registry.leave("lobby");
                                }
                            })
                        })
                        .collect();
                    for handle in handles {
                        handle.join().unwrap();
                    }
                    let elapsed = start.elapsed();
                    assert_eq!(registry.peek("lobby"), 0);
                    elapsed
                });
            },
        );
    }

    group.finish();
}

criterion_group!(benches, bench_single_room, bench_many_rooms, bench_contention);
criterion_main!(benches);
