//! Codec benchmarks for huddle-protocol.

use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};
use huddle_protocol::{codec, EventKind, Frame, PresenceEvent};

fn event_frame() -> Frame {
    Frame::event(
        "/topic/room/bench",
        PresenceEvent {
            kind: EventKind::Message,
            room_key: "bench".into(),
            username: "alice".into(),
            content: "x".repeat(64),
            timestamp: 1_700_000_000_000,
            participant_count: 12,
        },
    )
}

fn bench_encode(c: &mut Criterion) {
    let frame = event_frame();

    let mut group = c.benchmark_group("encode_event");
    group.throughput(Throughput::Elements(1));
    group.bench_function("msgpack", |b| b.iter(|| codec::encode(black_box(&frame))));
    group.bench_function("json", |b| b.iter(|| codec::encode_json(black_box(&frame))));
    group.finish();
}

fn bench_decode(c: &mut Criterion) {
    let frame = Frame::message("bench", "alice", "x".repeat(64));
    let binary = codec::encode(&frame).unwrap();
    let text = codec::encode_json(&frame).unwrap();

    let mut group = c.benchmark_group("decode_message");
    group.throughput(Throughput::Elements(1));
    group.bench_function("msgpack", |b| b.iter(|| codec::decode(black_box(&binary))));
    group.bench_function("json", |b| b.iter(|| codec::decode_json(black_box(&text))));
    group.finish();
}

criterion_group!(benches, bench_encode, bench_decode);
criterion_main!(benches);
