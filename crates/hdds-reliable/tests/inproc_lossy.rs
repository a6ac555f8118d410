// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Writer and reader on receive threads over a lossy in-process link.

use std::sync::Arc;
use std::time::{Duration, Instant};

use hdds_reliable::config::{ReaderAttributes, ReaderTimes, WriterAttributes, WriterTimes};
use hdds_reliable::participant::RtpsParticipant;
use hdds_reliable::qos::QosProfile;
use hdds_reliable::transport::{InProcessTransport, Locator, NetworkFactory};
use hdds_reliable::types::GuidPrefix;

const SAMPLES: u64 = 60;

fn lossy_pair(
    drop_one_in: u32,
) -> (
    Arc<InProcessTransport>,
    Arc<RtpsParticipant>,
    Arc<RtpsParticipant>,
) {
    let transport = InProcessTransport::new();
    if drop_one_in > 0 {
        transport.set_loss_filter(Some(Arc::new(move |_, _| {
            fastrand::u32(0..drop_one_in) == 0
        })));
    }
    let network = Arc::new(NetworkFactory::new());
    network.register_transport(transport.clone());
    let participant = |n: u8, port: u32| {
        RtpsParticipant::builder(GuidPrefix([n; 12]))
            .with_network(Arc::clone(&network))
            .unicast_locator(Locator::inproc(port))
            .build()
            .expect("participant")
    };
    (transport, participant(1, 7600), participant(2, 7601))
}

fn run(drop_one_in: u32, payload_len: usize, max_message_size: usize) {
    let (transport, pub_side, sub_side) = lossy_pair(drop_one_in);
    let writer = pub_side
        .create_writer(
            QosProfile::reliable_keep_all(SAMPLES as usize)
                .with_max_blocking_time(Duration::from_secs(5)),
            WriterAttributes {
                max_message_size,
                fragment_size: 1024,
                times: WriterTimes {
                    initial_heartbeat_delay: Duration::from_millis(1),
                    heartbeat_period: Duration::from_millis(10),
                    nack_response_delay: Duration::from_millis(1),
                    nack_supression_duration: Duration::ZERO,
                },
                ..WriterAttributes::default()
            },
        )
        .expect("writer");
    let reader = sub_side
        .create_reader(
            QosProfile::reliable_keep_all(SAMPLES as usize),
            ReaderAttributes {
                times: ReaderTimes {
                    initial_acknack_delay: Duration::from_millis(1),
                    heartbeat_response_delay: Duration::from_millis(1),
                },
                ..ReaderAttributes::default()
            },
        )
        .expect("reader");
    writer
        .matched_reader_add(sub_side.reader_proxy_data(&reader))
        .expect("match reader");
    reader
        .matched_writer_add(pub_side.writer_proxy_data(&writer))
        .expect("match writer");

    for i in 0..SAMPLES {
        let mut sample = vec![(i % 256) as u8; payload_len];
        sample[..8].copy_from_slice(&i.to_le_bytes());
        writer.write(&sample).expect("write");
    }

    let mut next = 1;
    let deadline = Instant::now() + Duration::from_secs(20);
    while next <= SAMPLES && Instant::now() < deadline {
        if !reader.wait_for_unread(Duration::from_millis(100)) {
            continue;
        }
        for change in reader.take_all() {
            assert_eq!(change.sequence_number, next);
            assert_eq!(change.payload.len(), payload_len);
            let mut id = [0u8; 8];
            id.copy_from_slice(&change.payload[..8]);
            assert_eq!(u64::from_le_bytes(id) + 1, next);
            next += 1;
        }
    }
    assert_eq!(next, SAMPLES + 1, "samples missing");
    assert!(writer.wait_for_all_acked(Duration::from_secs(10)));
    assert_eq!(reader.sample_lost_status().total_count, 0);

    let (_, dropped) = transport.stats();
    if drop_one_in == 0 {
        assert_eq!(dropped, 0);
    }
    pub_side.stop();
    sub_side.stop();
}

#[test]
fn test_lossless_link_delivers_everything() {
    run(0, 64, 65_000);
}

#[test]
fn test_lossy_link_delivers_everything_in_order() {
    run(5, 64, 65_000);
}

#[test]
fn test_lossy_link_with_fragmented_samples() {
    run(8, 5000, 1400);
}
