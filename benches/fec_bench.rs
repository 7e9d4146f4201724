//! FEC 코덱과 시퀀스 큐 벤치마크

use bytes::Bytes;
use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};

use ffrdp::fec::{FecDecoder, FecEncoder, FecOutcome};
use ffrdp::frame::Frame;
use ffrdp::queue::FrameQueue;
use ffrdp::DEFAULT_MSS;

const REDUNDANCY: u8 = 4;

fn full_frame(seq: u32) -> bytes::BytesMut {
    Frame::new(seq, REDUNDANCY, Bytes::from(vec![seq as u8; DEFAULT_MSS])).encode()
}

fn bench_fec_encode(c: &mut Criterion) {
    let mut group = c.benchmark_group("fec_encode");
    group.throughput(Throughput::Bytes(DEFAULT_MSS as u64));

    group.bench_function("full_frame", |b| {
        let mut encoder = FecEncoder::new(REDUNDANCY, DEFAULT_MSS);
        let mut seq = 0u32;
        b.iter(|| {
            let mut datagram = full_frame(seq);
            seq = seq.wrapping_add(1);
            black_box(encoder.encode(&mut datagram))
        })
    });

    group.finish();
}

fn bench_fec_recover(c: &mut Criterion) {
    let mut encoder = FecEncoder::new(REDUNDANCY, DEFAULT_MSS);
    let mut group_frames = Vec::new();
    for seq in 0..(REDUNDANCY as u32 - 1) {
        let mut datagram = full_frame(seq);
        let parity = encoder.encode(&mut datagram);
        group_frames.push(datagram);
        if let Some(parity) = parity {
            group_frames.push(parity);
        }
    }

    let mut group = c.benchmark_group("fec_decode");
    group.throughput(Throughput::Bytes((DEFAULT_MSS * group_frames.len()) as u64));

    group.bench_function("recover_first_loss", |b| {
        b.iter(|| {
            let mut decoder = FecDecoder::new(DEFAULT_MSS);
            let mut recovered = 0;
            for datagram in group_frames.iter().skip(1) {
                if let FecOutcome::Recovered(d) = decoder.decode(datagram.clone()) {
                    recovered += d.len();
                }
            }
            black_box(recovered)
        })
    });

    group.finish();
}

fn bench_queue_reorder(c: &mut Criterion) {
    c.bench_function("queue_insert_reordered_256", |b| {
        b.iter(|| {
            let mut queue = FrameQueue::new();
            for i in 0..256u32 {
                // 짝수 먼저, 홀수 나중 (역순 도착)
                let seq = if i < 128 { i * 2 } else { (255 - i) * 2 + 1 };
                queue.insert(Frame::new(seq, 0, Bytes::new()));
            }
            black_box(queue.len())
        })
    });
}

criterion_group!(benches, bench_fec_encode, bench_fec_recover, bench_queue_reorder);
criterion_main!(benches);
