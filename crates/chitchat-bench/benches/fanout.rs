//! Fan-out benchmarks for the broadcast engine.
//!
//! Measures stamping plus delivery of one event to a growing number of
//! joined sessions, and the cost of the clock on its own.

use chitchat_core::{Hub, HubConfig, LamportClock, Subscription};
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};

/// Benchmark the server clock.
fn bench_clock(c: &mut Criterion) {
    let clock = LamportClock::new();
    c.bench_function("lamport_tick", |b| b.iter(|| black_box(clock.tick())));
}

/// Benchmark publish + fan-out to N sessions.
fn bench_publish_fanout(c: &mut Criterion) {
    let mut group = c.benchmark_group("publish_fanout");

    for sessions in [1usize, 10, 100, 1000] {
        let hub = Hub::with_config(HubConfig {
            session_buffer: 1024,
            ..HubConfig::default()
        });
        let mut subs: Vec<Subscription> = (0..sessions)
            .map(|i| hub.join(&format!("client-{}", i)).unwrap())
            .collect();

        group.throughput(Throughput::Elements(sessions as u64));
        group.bench_with_input(BenchmarkId::from_parameter(sessions), &sessions, |b, _| {
            b.iter(|| {
                hub.publish("client-0", black_box(b"hello, world")).unwrap();
                for sub in &mut subs {
                    while sub.try_recv().is_some() {}
                }
            });
        });
    }

    group.finish();
}

/// Benchmark rejected publishes (validation only, no fan-out).
fn bench_publish_rejected(c: &mut Criterion) {
    let hub = Hub::new();
    let _sub = hub.join("alice").unwrap();
    let oversized = "x".repeat(256);

    c.bench_function("publish_rejected_256_chars", |b| {
        b.iter(|| hub.publish("alice", black_box(oversized.as_bytes())).is_err())
    });
}

criterion_group!(
    benches,
    bench_clock,
    bench_publish_fanout,
    bench_publish_rejected
);
criterion_main!(benches);
