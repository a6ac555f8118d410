// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Shared harness for the integration tests.
//!
//! [`Wire`] is a transport that queues every datagram instead of delivering
//! it. Tests call [`Wire::pump`] to deliver the queue on the test thread,
//! optionally dropping individual submessages first. With every protocol
//! delay set to zero the whole exchange is deterministic.

#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::{Duration, Instant};

use hdds_reliable::config::{ReaderAttributes, ReaderTimes, WriterAttributes, WriterTimes};
use hdds_reliable::messages::{decode_message, encode_message, Submessage};
use hdds_reliable::participant::RtpsParticipant;
use hdds_reliable::transport::{
    Locator, NetworkFactory, ReceiverCallback, Transport, LOCATOR_KIND_INPROC,
};
use hdds_reliable::types::{GuidPrefix, SequenceNumber};
use hdds_reliable::{Error, Result};
use parking_lot::Mutex;

/// Owned summary of one submessage seen on the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Seen {
    Data {
        seq: SequenceNumber,
    },
    DataFrag {
        seq: SequenceNumber,
        first: u32,
        count: u16,
    },
    Heartbeat {
        first: SequenceNumber,
        last: SequenceNumber,
        final_flag: bool,
    },
    HeartbeatFrag {
        seq: SequenceNumber,
        last_fragment: u32,
    },
    Gap {
        irrelevant: Vec<SequenceNumber>,
    },
    AckNack {
        base: SequenceNumber,
        requested: Vec<SequenceNumber>,
        final_flag: bool,
    },
    NackFrag {
        seq: SequenceNumber,
        fragments: Vec<u32>,
    },
    Other,
}

impl Seen {
    fn of(sub: &Submessage<'_>) -> Self {
        match sub {
            Submessage::Data(d) => Seen::Data { seq: d.writer_sn },
            Submessage::DataFrag(d) => Seen::DataFrag {
                seq: d.writer_sn,
                first: d.fragment_starting_num,
                count: d.fragments_in_submessage,
            },
            Submessage::Heartbeat(h) => Seen::Heartbeat {
                first: h.first_sn,
                last: h.last_sn,
                final_flag: h.final_flag,
            },
            Submessage::HeartbeatFrag(h) => Seen::HeartbeatFrag {
                seq: h.writer_sn,
                last_fragment: h.last_fragment_num,
            },
            Submessage::Gap(g) => Seen::Gap {
                irrelevant: g.irrelevant().collect(),
            },
            Submessage::AckNack(a) => Seen::AckNack {
                base: a.reader_sn_state.base(),
                requested: a.reader_sn_state.iter().collect(),
                final_flag: a.final_flag,
            },
            Submessage::NackFrag(n) => Seen::NackFrag {
                seq: n.writer_sn,
                fragments: n.fragment_number_state.iter().collect(),
            },
            _ => Seen::Other,
        }
    }
}

/// A submessage and whether the filter dropped it.
#[derive(Debug, Clone)]
pub struct Captured {
    pub to: Locator,
    pub seen: Seen,
    pub dropped: bool,
}

/// Returns `true` to drop the submessage on its way to `to`.
pub type DropFilter = Box<dyn FnMut(&Submessage<'_>, &Locator) -> bool + Send>;

#[derive(Default)]
struct WireState {
    queue: VecDeque<(Vec<u8>, Locator)>,
    captured: Vec<Captured>,
    filter: Option<DropFilter>,
}

/// Queueing transport driven by the test thread.
#[derive(Default)]
pub struct Wire {
    inputs: Mutex<HashMap<u32, Arc<dyn ReceiverCallback>>>,
    state: Mutex<WireState>,
}

impl Wire {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn set_filter(&self, filter: Option<DropFilter>) {
        self.state.lock().filter = filter;
    }

    pub fn captured(&self) -> Vec<Captured> {
        self.state.lock().captured.clone()
    }

    /// Submessages captured so far; pass the result to [`Wire::since`] later.
    pub fn mark(&self) -> usize {
        self.state.lock().captured.len()
    }

    /// Submessages captured after `mark`.
    pub fn since(&self, mark: usize) -> Vec<Captured> {
        self.state.lock().captured[mark..].to_vec()
    }

    pub fn pending(&self) -> usize {
        self.state.lock().queue.len()
    }

    /// Deliver queued datagrams until the queue is empty. Returns how many
    /// were delivered.
    pub fn pump(&self) -> usize {
        let mut delivered = 0;
        for _ in 0..100_000 {
            let next = self.state.lock().queue.pop_front();
            let Some((bytes, to)) = next else {
                return delivered;
            };
            let target = self.inputs.lock().get(&to.port).cloned();
            if let Some(target) = target {
                target.on_data_received(&bytes, &to, &Locator::inproc(0));
                delivered += 1;
            }
        }
        panic!("wire did not settle");
    }

    /// Filter and record one datagram, returning what is left of it.
    fn admit(&self, buffer: &[u8], to: &Locator) -> Option<Vec<u8>> {
        let Ok((header, subs)) = decode_message(buffer) else {
            return Some(buffer.to_vec());
        };
        let mut state = self.state.lock();
        let mut kept = Vec::new();
        let mut any_dropped = false;
        for sub in subs.flatten() {
            let dropped = match (&sub, state.filter.as_mut()) {
                (Submessage::InfoDst(_) | Submessage::InfoTs(_), _) | (_, None) => false,
                (_, Some(filter)) => filter(&sub, to),
            };
            if !matches!(sub, Submessage::InfoDst(_) | Submessage::InfoTs(_)) {
                state.captured.push(Captured {
                    to: *to,
                    seen: Seen::of(&sub),
                    dropped,
                });
            }
            any_dropped |= dropped;
            if !dropped {
                kept.push(sub);
            }
        }
        if !any_dropped {
            return Some(buffer.to_vec());
        }
        let bytes = encode_message(&header, &kept);
        Some(bytes)
    }
}

impl Transport for Wire {
    fn name(&self) -> &str {
        "wire"
    }

    fn is_locator_supported(&self, locator: &Locator) -> bool {
        locator.kind == LOCATOR_KIND_INPROC
    }

    fn send(&self, buffer: &[u8], destinations: &[Locator], _deadline: Instant) -> bool {
        for to in destinations {
            if let Some(bytes) = self.admit(buffer, to) {
                self.state.lock().queue.push_back((bytes, *to));
            }
        }
        true
    }

    fn open_input_channel(
        &self,
        locator: &Locator,
        receiver: Arc<dyn ReceiverCallback>,
    ) -> Result<()> {
        let mut inputs = self.inputs.lock();
        if inputs.contains_key(&locator.port) {
            return Err(Error::Config(format!("port {} in use", locator.port)));
        }
        inputs.insert(locator.port, receiver);
        Ok(())
    }

    fn close_input_channel(&self, locator: &Locator) -> bool {
        self.inputs.lock().remove(&locator.port).is_some()
    }
}

/// Two participants connected through one [`Wire`].
pub struct Pair {
    pub wire: Arc<Wire>,
    pub pub_side: Arc<RtpsParticipant>,
    pub sub_side: Arc<RtpsParticipant>,
}

impl Pair {
    pub fn new() -> Self {
        let wire = Wire::new();
        let network = Arc::new(NetworkFactory::new());
        network.register_transport(wire.clone());
        let participant = |n: u8, port: u32| {
            RtpsParticipant::builder(GuidPrefix([n; 12]))
                .with_network(Arc::clone(&network))
                .unicast_locator(Locator::inproc(port))
                .build()
                .expect("participant")
        };
        Self {
            pub_side: participant(1, 7400),
            sub_side: participant(2, 7401),
            wire,
        }
    }
}

impl Drop for Pair {
    fn drop(&mut self) {
        self.pub_side.stop();
        self.sub_side.stop();
    }
}

/// Writer attributes with zero protocol delays. The periodic heartbeat is
/// pushed far out so tests trigger it explicitly.
pub fn writer_attributes() -> WriterAttributes {
    WriterAttributes {
        times: WriterTimes::immediate(Duration::from_secs(3600)),
        ..WriterAttributes::default()
    }
}

pub fn reader_attributes() -> ReaderAttributes {
    ReaderAttributes {
        times: ReaderTimes::immediate(),
        ..ReaderAttributes::default()
    }
}

pub fn sent_data(captured: &[Captured]) -> Vec<SequenceNumber> {
    captured
        .iter()
        .filter_map(|c| match c.seen {
            Seen::Data { seq } => Some(seq),
            _ => None,
        })
        .collect()
}
