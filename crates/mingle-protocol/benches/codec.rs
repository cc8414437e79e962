//! Codec benchmarks for mingle-protocol.

use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};
use mingle_protocol::{codec, types::ChatMessage, ClientCommand};

fn send_command(body_len: usize) -> ClientCommand {
    ClientCommand::Send {
        message: ChatMessage::new("bench-guid", 1, "bench-user", "x".repeat(body_len)),
    }
}

fn bench_encode_small(c: &mut Criterion) {
    let command = send_command(64);

    let mut group = c.benchmark_group("encode");
    group.throughput(Throughput::Bytes(64));
    group.bench_function("small_64B", |b| {
        b.iter(|| codec::encode(black_box(&command)))
    });
    group.finish();
}

fn bench_decode_small(c: &mut Criterion) {
    let command = send_command(64);
    let encoded = codec::encode(&command).unwrap();

    let mut group = c.benchmark_group("decode");
    group.throughput(Throughput::Bytes(encoded.len() as u64));
    group.bench_function("small_64B", |b| {
        b.iter(|| codec::decode::<ClientCommand>(black_box(&encoded)))
    });
    group.finish();
}

fn bench_roundtrip(c: &mut Criterion) {
    let command = send_command(256);

    c.bench_function("roundtrip_256B", |b| {
        b.iter(|| {
            let encoded = codec::encode(black_box(&command)).unwrap();
            codec::decode::<ClientCommand>(black_box(&encoded)).unwrap()
        })
    });
}

criterion_group!(
    benches,
    bench_encode_small,
    bench_decode_small,
    bench_roundtrip
);
criterion_main!(benches);
