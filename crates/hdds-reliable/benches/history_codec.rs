// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Writer history and wire codec benchmarks
//!
//! Covers the two hot paths of every write:
//! - storing a change and releasing it once acknowledged
//! - encoding and decoding a DATA + HEARTBEAT datagram

#![allow(clippy::uninlined_format_args)]

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use hdds_reliable::history::{Room, WriterHistory};
use hdds_reliable::messages::{
    decode_message, encode_message, AckNack, Data, Heartbeat, InlineQos, RtpsHeader,
    SequenceNumberSet, Submessage,
};
use hdds_reliable::qos::QosProfile;
use hdds_reliable::rt::PayloadPool;
use hdds_reliable::types::{ChangeKind, EntityId, Guid, GuidPrefix, InstanceHandle};

const PAYLOAD_SIZES: [usize; 3] = [64, 1024, 16 * 1024];

fn bench_history_add_release(c: &mut Criterion) {
    let mut group = c.benchmark_group("writer_history");
    for size in PAYLOAD_SIZES {
        let payload = vec![0xA5u8; size];
        group.throughput(Throughput::Bytes(size as u64));
        group.bench_with_input(BenchmarkId::new("add_then_release", size), &payload, |b, payload| {
            let mut history = WriterHistory::new(
                Guid::new(GuidPrefix([1; 12]), EntityId::writer(1, false)),
                &QosProfile::reliable_keep_all(1024),
                PayloadPool::new(64),
                1300,
                64_000,
            );
            b.iter(|| {
                let change = history.new_change(ChangeKind::Alive, InstanceHandle::NIL, payload);
                if history.make_room(&change, |_| true) == Room::Ready {
                    let stored = history.add_change(change).expect("room was made");
                    black_box(history.remove_up_to(stored.sequence_number));
                }
            });
        });
    }
    group.finish();
}

fn bench_codec(c: &mut Criterion) {
    let prefix = GuidPrefix([7; 12]);
    let reader_id = EntityId::reader(1, false);
    let writer_id = EntityId::writer(1, false);
    let mut group = c.benchmark_group("codec");
    for size in PAYLOAD_SIZES {
        let payload = vec![0x5Au8; size];
        let submessages = [
            Submessage::Data(Data {
                reader_id,
                writer_id,
                writer_sn: 42,
                inline_qos: InlineQos::default(),
                key_flag: false,
                payload: &payload,
            }),
            Submessage::Heartbeat(Heartbeat {
                reader_id,
                writer_id,
                first_sn: 1,
                last_sn: 42,
                count: 7,
                final_flag: false,
                liveliness_flag: false,
            }),
        ];
        let header = RtpsHeader::new(prefix);
        group.throughput(Throughput::Bytes(size as u64));
        group.bench_with_input(BenchmarkId::new("encode", size), &submessages, |b, subs| {
            b.iter(|| black_box(encode_message(&header, subs)));
        });
        let bytes = encode_message(&header, &submessages);
        group.bench_with_input(BenchmarkId::new("decode", size), &bytes, |b, bytes| {
            b.iter(|| {
                let (_, subs) = decode_message(black_box(bytes)).expect("valid datagram");
                black_box(subs.filter(Result::is_ok).count())
            });
        });
    }
    group.finish();

    let acknack = Submessage::AckNack(AckNack {
        reader_id,
        writer_id,
        reader_sn_state: SequenceNumberSet::from_sequences(100, (100..356).step_by(3))
            .expect("window fits"),
        count: 3,
        final_flag: false,
    });
    c.bench_function("codec/acknack_256_bits", |b| {
        b.iter(|| {
            let bytes = encode_message(&RtpsHeader::new(prefix), std::slice::from_ref(&acknack));
            black_box(decode_message(&bytes).map(|(_, subs)| subs.count()))
        });
    });
}

criterion_group!(benches, bench_history_add_release, bench_codec);
criterion_main!(benches);
