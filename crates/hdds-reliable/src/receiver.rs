// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Incoming datagram dispatch.
//!
//! [`MessageReceiver`] decodes each datagram and routes its submessages to
//! the local endpoints registered with it:
//!
//! - DATA, DATA_FRAG, HEARTBEAT, HEARTBEAT_FRAG and GAP go to readers. An
//!   UNKNOWN reader id fans out to every reader matched with the writer.
//! - ACKNACK and NACK_FRAG go to the writer named by `writer_id`.
//!
//! INFO_DST and INFO_TS apply to the following submessages of the same
//! datagram only. A malformed submessage is counted and skipped.

use std::sync::Arc;

use dashmap::DashMap;

use crate::messages::{decode_message, Submessage};
use crate::metrics::{Counter, ReliableMetrics};
use crate::reader::StatefulReader;
use crate::transport::{Locator, ReceiverCallback};
use crate::types::{EntityId, Guid, GuidPrefix, Time};
use crate::writer::StatefulWriter;

/// Per-datagram interpreter state.
struct Context {
    source: GuidPrefix,
    /// Following submessages are addressed to someone else.
    foreign: bool,
    timestamp: Option<Time>,
}

pub struct MessageReceiver {
    prefix: GuidPrefix,
    writers: DashMap<EntityId, Arc<StatefulWriter>>,
    readers: DashMap<EntityId, Arc<StatefulReader>>,
    metrics: Arc<ReliableMetrics>,
}

impl MessageReceiver {
    pub fn new(prefix: GuidPrefix, metrics: Arc<ReliableMetrics>) -> Self {
        Self {
            prefix,
            writers: DashMap::new(),
            readers: DashMap::new(),
            metrics,
        }
    }

    pub fn prefix(&self) -> GuidPrefix {
        self.prefix
    }

    pub fn register_writer(&self, writer: Arc<StatefulWriter>) {
        self.writers.insert(writer.guid().entity_id, writer);
    }

    pub fn register_reader(&self, reader: Arc<StatefulReader>) {
        self.readers.insert(reader.guid().entity_id, reader);
    }

    pub fn unregister_writer(&self, id: &EntityId) -> Option<Arc<StatefulWriter>> {
        self.writers.remove(id).map(|(_, w)| w)
    }

    pub fn unregister_reader(&self, id: &EntityId) -> Option<Arc<StatefulReader>> {
        self.readers.remove(id).map(|(_, r)| r)
    }

    pub fn writer_count(&self) -> usize {
        self.writers.len()
    }

    pub fn reader_count(&self) -> usize {
        self.readers.len()
    }

    /// Drop every registration.
    pub fn clear(&self) {
        self.writers.clear();
        self.readers.clear();
    }

    /// Decode `data` and dispatch every submessage addressed to us.
    pub fn process_message(&self, data: &[u8]) {
        let (header, submessages) = match decode_message(data) {
            Ok(decoded) => decoded,
            Err(e) => {
                self.metrics.incr(Counter::MalformedSubmessages);
                log::debug!("[RECV] dropped datagram: {}", e);
                return;
            }
        };
        let mut ctx = Context {
            source: header.guid_prefix,
            foreign: false,
            timestamp: None,
        };
        for sub in submessages {
            match sub {
                Ok(sub) => self.dispatch(&mut ctx, &sub),
                Err(e) => {
                    self.metrics.incr(Counter::MalformedSubmessages);
                    log::debug!("[RECV] skipped submessage from {:?}: {}", ctx.source, e);
                }
            }
        }
    }

    fn dispatch(&self, ctx: &mut Context, sub: &Submessage<'_>) {
        match sub {
            Submessage::InfoDst(dst) => {
                ctx.foreign = !dst.guid_prefix.is_unknown() && dst.guid_prefix != self.prefix;
                return;
            }
            Submessage::InfoTs(ts) => {
                ctx.timestamp = ts.timestamp;
                return;
            }
            Submessage::Unknown { id } => {
                log::trace!("[RECV] ignoring submessage id=0x{:02x}", id);
                return;
            }
            _ => {}
        }
        if ctx.foreign {
            return;
        }
        let source = ctx.source;
        match sub {
            Submessage::Data(data) => {
                let writer = Guid::new(source, data.writer_id);
                self.for_readers(data.reader_id, &writer, |r| {
                    r.process_data(&writer, data, ctx.timestamp);
                });
            }
            Submessage::DataFrag(frag) => {
                let writer = Guid::new(source, frag.writer_id);
                self.for_readers(frag.reader_id, &writer, |r| {
                    r.process_data_frag(&writer, frag, ctx.timestamp);
                });
            }
            Submessage::Heartbeat(hb) => {
                let writer = Guid::new(source, hb.writer_id);
                self.for_readers(hb.reader_id, &writer, |r| r.process_heartbeat(&writer, hb));
            }
            Submessage::HeartbeatFrag(hbf) => {
                let writer = Guid::new(source, hbf.writer_id);
                self.for_readers(hbf.reader_id, &writer, |r| {
                    r.process_heartbeat_frag(&writer, hbf);
                });
            }
            Submessage::Gap(gap) => {
                let writer = Guid::new(source, gap.writer_id);
                self.for_readers(gap.reader_id, &writer, |r| r.process_gap(&writer, gap));
            }
            Submessage::AckNack(acknack) => {
                let reader = Guid::new(source, acknack.reader_id);
                if let Some(w) = self.writer(&acknack.writer_id) {
                    w.process_acknack(&reader, acknack);
                }
            }
            Submessage::NackFrag(nack_frag) => {
                let reader = Guid::new(source, nack_frag.reader_id);
                if let Some(w) = self.writer(&nack_frag.writer_id) {
                    w.process_nack_frag(&reader, nack_frag);
                }
            }
            Submessage::InfoDst(_) | Submessage::InfoTs(_) | Submessage::Unknown { .. } => {}
        }
    }

    fn writer(&self, id: &EntityId) -> Option<Arc<StatefulWriter>> {
        let found = self.writers.get(id).map(|w| Arc::clone(w.value()));
        if found.is_none() {
            log::trace!("[RECV] no local writer {:?}", id);
        }
        found
    }

    /// Run `f` on the addressed reader, or on every reader matched with
    /// `writer` when the reader id is UNKNOWN. Map guards are released first.
    fn for_readers(&self, reader_id: EntityId, writer: &Guid, f: impl Fn(&StatefulReader)) {
        let targets: Vec<Arc<StatefulReader>> = if reader_id.is_unknown() {
            self.readers
                .iter()
                .filter(|r| r.value().matched_writer_is_matched(writer))
                .map(|r| Arc::clone(r.value()))
                .collect()
        } else {
            self.readers
                .get(&reader_id)
                .map(|r| Arc::clone(r.value()))
                .into_iter()
                .collect()
        };
        for reader in &targets {
            f(reader);
        }
    }
}

impl ReceiverCallback for MessageReceiver {
    fn on_data_received(&self, data: &[u8], _local: &Locator, remote: &Locator) {
        log::trace!("[RECV] {} bytes from {}", data.len(), remote);
        self.process_message(data);
    }
}

impl std::fmt::Debug for MessageReceiver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MessageReceiver")
            .field("prefix", &self.prefix)
            .field("writers", &self.writers.len())
            .field("readers", &self.readers.len())
            .finish()
    }
}
