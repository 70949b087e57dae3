//! Codec benchmarks for chitchat-protocol.

use chitchat_protocol::{codec, EventKind, Frame};
use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};

fn bench_encode_event(c: &mut Criterion) {
    let frame = Frame::event(EventKind::Chat, "alice", "x".repeat(128), 42);

    let mut group = c.benchmark_group("encode");
    group.throughput(Throughput::Elements(1));
    group.bench_function("event_128_chars", |b| {
        b.iter(|| codec::encode(black_box(&frame)))
    });
    group.finish();
}

fn bench_decode_publish(c: &mut Criterion) {
    let frame = Frame::publish(1, "alice", vec![b'x'; 128]);
    let encoded = codec::encode(&frame).unwrap();

    let mut group = c.benchmark_group("decode");
    group.throughput(Throughput::Bytes(encoded.len() as u64));
    group.bench_function("publish_128B", |b| {
        b.iter(|| codec::decode(black_box(&encoded)))
    });
    group.finish();
}

criterion_group!(benches, bench_encode_event, bench_decode_publish);
criterion_main!(benches);
