// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Datagram assembly for one destination.
//!
//! Endpoints collect their outgoing submessages in a [`MessageBuilder`]
//! while holding their lock, then hand the finished datagrams to the
//! network after releasing it.

use super::codec::{encode_submessage, Placement, RtpsHeader};
use super::submessages::{InfoDestination, InfoTimestamp, Submessage};
use crate::config::RTPS_HEADER_LEN;
use crate::transport::Locator;
use crate::types::{GuidPrefix, Time};

/// A finished datagram and where to send it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundMessage {
    pub bytes: Vec<u8>,
    pub destinations: Vec<Locator>,
}

/// Groups submessages into datagrams bounded by `max_size`.
///
/// Every datagram starts with the RTPS header and, when a destination
/// participant is known, an INFO_DST. INFO_TS is emitted only when the
/// timestamp differs from the previous one in the same datagram.
pub struct MessageBuilder {
    header: RtpsHeader,
    destination: Option<GuidPrefix>,
    locators: Vec<Locator>,
    max_size: usize,
    current: Vec<u8>,
    preamble_len: usize,
    current_ts: Option<Time>,
    sealed: bool,
    scratch: Vec<u8>,
    finished: Vec<OutboundMessage>,
}

impl MessageBuilder {
    pub fn new(
        local_prefix: GuidPrefix,
        destination: Option<GuidPrefix>,
        locators: Vec<Locator>,
        max_size: usize,
    ) -> Self {
        Self {
            header: RtpsHeader::new(local_prefix),
            destination,
            locators,
            max_size,
            current: Vec::new(),
            preamble_len: 0,
            current_ts: None,
            sealed: false,
            scratch: Vec::with_capacity(256),
            finished: Vec::new(),
        }
    }

    fn start_datagram(&mut self) {
        self.current.clear();
        self.header.encode(&mut self.current);
        if let Some(prefix) = self.destination {
            encode_submessage(
                &mut self.current,
                &Submessage::InfoDst(InfoDestination {
                    guid_prefix: prefix,
                }),
            );
        }
        self.preamble_len = self.current.len();
        self.current_ts = None;
        self.sealed = false;
    }

    fn has_content(&self) -> bool {
        self.current.len() > self.preamble_len
    }

    fn flush(&mut self) {
        if self.has_content() {
            self.finished.push(OutboundMessage {
                bytes: std::mem::take(&mut self.current),
                destinations: self.locators.clone(),
            });
        }
        self.current.clear();
        self.preamble_len = 0;
    }

    fn ensure_room(&mut self, needed: usize) {
        if self.current.len() < RTPS_HEADER_LEN {
            self.start_datagram();
            return;
        }
        if self.has_content() && (self.sealed || self.current.len() + needed > self.max_size) {
            self.flush();
            self.start_datagram();
        }
    }

    /// Append a submessage that does not depend on a source timestamp.
    pub fn add(&mut self, sub: &Submessage<'_>) {
        self.scratch.clear();
        let placement = encode_submessage(&mut self.scratch, sub);
        self.ensure_room(self.scratch.len());
        self.current.extend_from_slice(&self.scratch);
        self.sealed = placement == Placement::Last;
    }

    /// Append a DATA/DATA_FRAG preceded by an INFO_TS when needed.
    pub fn add_timestamped(&mut self, timestamp: Time, sub: &Submessage<'_>) {
        self.scratch.clear();
        let placement = encode_submessage(&mut self.scratch, sub);
        let ts_len = 12;
        self.ensure_room(self.scratch.len() + ts_len);
        if self.current_ts != Some(timestamp) {
            encode_submessage(
                &mut self.current,
                &Submessage::InfoTs(InfoTimestamp {
                    timestamp: Some(timestamp),
                }),
            );
            self.current_ts = Some(timestamp);
        }
        self.current.extend_from_slice(&self.scratch);
        self.sealed = placement == Placement::Last;
    }

    pub fn is_empty(&self) -> bool {
        self.finished.is_empty() && !self.has_content()
    }

    /// Finish the pending datagram and return everything built so far.
    pub fn finish(mut self) -> Vec<OutboundMessage> {
        self.flush();
        self.finished
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messages::{decode_message, Data, Heartbeat, InlineQos};
    use crate::types::EntityId;

    fn heartbeat(count: u32) -> Submessage<'static> {
        Submessage::Heartbeat(Heartbeat {
            reader_id: EntityId::UNKNOWN,
            writer_id: EntityId::writer(1, false),
            first_sn: 1,
            last_sn: 1,
            count,
            final_flag: false,
            liveliness_flag: false,
        })
    }

    #[test]
    fn test_builder_prefixes_info_dst() {
        let mut b = MessageBuilder::new(
            GuidPrefix([1; 12]),
            Some(GuidPrefix([2; 12])),
            vec![Locator::inproc(1)],
            1500,
        );
        b.add(&heartbeat(1));
        let out = b.finish();
        assert_eq!(out.len(), 1);
        let (_, iter) = decode_message(&out[0].bytes).expect("header");
        let subs: Vec<_> = iter.map(|s| s.expect("valid")).collect();
        assert!(matches!(subs[0], Submessage::InfoDst(_)));
        assert!(matches!(subs[1], Submessage::Heartbeat(_)));
        assert_eq!(out[0].destinations, vec![Locator::inproc(1)]);
    }

    #[test]
    fn test_builder_splits_on_size() {
        let mut b = MessageBuilder::new(GuidPrefix([1; 12]), None, vec![], 100);
        for i in 0..10 {
            b.add(&heartbeat(i));
        }
        let out = b.finish();
        assert!(out.len() > 1);
        assert!(out.iter().all(|m| m.bytes.len() <= 100));
        let total: usize = out
            .iter()
            .map(|m| decode_message(&m.bytes).expect("header").1.count())
            .sum();
        assert_eq!(total, 10);
    }

    #[test]
    fn test_builder_seals_after_unaligned_data() {
        let payload = [1u8, 2, 3];
        let mut b = MessageBuilder::new(GuidPrefix([1; 12]), None, vec![], 1500);
        b.add_timestamped(
            Time::ZERO,
            &Submessage::Data(Data {
                reader_id: EntityId::UNKNOWN,
                writer_id: EntityId::writer(1, false),
                writer_sn: 1,
                inline_qos: InlineQos::default(),
                key_flag: false,
                payload: &payload,
            }),
        );
        b.add(&heartbeat(1));
        assert_eq!(b.finish().len(), 2);
    }

    #[test]
    fn test_builder_empty_finish() {
        let b = MessageBuilder::new(GuidPrefix([1; 12]), None, vec![], 1500);
        assert!(b.is_empty());
        assert!(b.finish().is_empty());
    }
}
