// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! StatefulWriter - reliable RTPS writer with one proxy per matched reader.
//!
//! # Locking
//!
//! ```text
//! discovery_lock ──► state ──► event scheduler
//! ```
//!
//! Every operation builds its datagrams with a [`MessageBuilder`] while the
//! state lock is held, then releases the lock before handing them to the
//! network and before calling the listener. Timer callbacks hold only a
//! `Weak` reference to the writer plus the reader GUID and proxy generation,
//! so a callback that races with `matched_reader_remove` finds nothing to do.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex, RwLock};

use super::change_for_reader::ChangeForReaderStatus;
use super::gap_builder::GapBuilder;
use super::reader_proxy::{ProxyTimers, ReaderProxy, ReaderProxyData};
use crate::config::{LiveTimes, WriterAttributes, WriterTimes};
use crate::error::{Error, Result};
use crate::events::{EventService, TimedEvent};
use crate::history::{Room, WriterHistory};
use crate::listener::{OfferedIncompatibleQosStatus, PublicationMatchedStatus, WriterListener};
use crate::messages::{
    AckNack, Data, DataFrag, Heartbeat, InlineQos, MessageBuilder, NackFrag, OutboundMessage,
    Submessage,
};
use crate::metrics::{Counter, ReliableMetrics};
use crate::qos::{check_compatibility, Durability, History, QosProfile, Reliability};
use crate::rt::PayloadPool;
use crate::transport::NetworkFactory;
use crate::types::{CacheChange, ChangeKind, EntityId, Guid, InstanceHandle, SequenceNumber};

/// Which changes a send pass looks at.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SendPass {
    /// First transmission of everything above `highest_sent`.
    NewChanges,
    /// Retransmission of REQUESTED changes and requested GAPs.
    Repair,
}

/// Work to do once the state lock is released.
#[derive(Default)]
struct Deferred {
    messages: Vec<OutboundMessage>,
    acked_by_all: Vec<Arc<CacheChange>>,
    matched: Option<PublicationMatchedStatus>,
    incompatible: Option<OfferedIncompatibleQosStatus>,
    progress: bool,
}

struct WriterState {
    history: WriterHistory,
    proxies: Vec<ReaderProxy>,
    heartbeat_count: u32,
    /// Highest sequence already reported through `on_writer_change_received_by_all`.
    acked_by_all_notified: SequenceNumber,
    matched: PublicationMatchedStatus,
    incompatible: OfferedIncompatibleQosStatus,
}

impl WriterState {
    fn find_active(&self, reader: &Guid) -> Option<usize> {
        self.proxies
            .iter()
            .position(|p| p.is_active() && p.guid() == *reader)
    }

    fn find_generation(&self, reader: &Guid, generation: u64) -> Option<usize> {
        self.find_active(reader)
            .filter(|&i| self.proxies[i].generation() == generation)
    }

    fn active(&self) -> impl Iterator<Item = &ReaderProxy> + '_ {
        self.proxies.iter().filter(|p| p.is_active())
    }

    fn is_acked_by_all(&self, seq: SequenceNumber) -> bool {
        self.active().all(|p| p.changes_low_mark() >= seq)
    }

    fn next_heartbeat_count(&mut self) -> u32 {
        self.heartbeat_count = self.heartbeat_count.wrapping_add(1);
        self.heartbeat_count
    }
}

/// Reliable stateful writer.
pub struct StatefulWriter {
    guid: Guid,
    qos: QosProfile,
    attributes: WriterAttributes,
    times: LiveTimes<WriterTimes>,
    state: Mutex<WriterState>,
    /// Signalled on acknowledgment progress, history removal and unmatch.
    progress: Condvar,
    discovery_lock: Mutex<()>,
    network: Arc<NetworkFactory>,
    events: Arc<EventService>,
    metrics: Arc<ReliableMetrics>,
    listener: RwLock<Option<Arc<dyn WriterListener>>>,
    periodic_heartbeat: TimedEvent,
    nack_response: TimedEvent,
    stopped: AtomicBool,
    self_ref: Weak<StatefulWriter>,
}

impl StatefulWriter {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        guid: Guid,
        qos: QosProfile,
        attributes: WriterAttributes,
        pool: Arc<PayloadPool>,
        network: Arc<NetworkFactory>,
        events: Arc<EventService>,
        metrics: Arc<ReliableMetrics>,
    ) -> Result<Arc<Self>> {
        qos.validate().map_err(Error::InvalidQos)?;
        attributes.validate().map_err(Error::Config)?;

        let history = WriterHistory::new(
            guid,
            &qos,
            pool,
            attributes.fragment_size,
            attributes.max_unfragmented_payload(),
        );
        let times = attributes.times;

        Ok(Arc::new_cyclic(|weak: &Weak<Self>| {
            let hb_writer = weak.clone();
            let periodic_heartbeat = TimedEvent::new(&events, times.heartbeat_period, move || {
                hb_writer
                    .upgrade()
                    .is_some_and(|w| w.send_periodic_heartbeat())
            });
            let nack_writer = weak.clone();
            let nack_response = TimedEvent::new(&events, times.nack_response_delay, move || {
                if let Some(w) = nack_writer.upgrade() {
                    w.perform_nack_response();
                }
                false
            });

            log::debug!("[WRITER] {} created ({:?}, {:?})", guid, qos.reliability, qos.history);

            Self {
                guid,
                qos,
                attributes,
                times: LiveTimes::new(times),
                state: Mutex::new(WriterState {
                    history,
                    proxies: Vec::new(),
                    heartbeat_count: 0,
                    acked_by_all_notified: 0,
                    matched: PublicationMatchedStatus::default(),
                    incompatible: OfferedIncompatibleQosStatus::default(),
                }),
                progress: Condvar::new(),
                discovery_lock: Mutex::new(()),
                network,
                events,
                metrics,
                listener: RwLock::new(None),
                periodic_heartbeat,
                nack_response,
                stopped: AtomicBool::new(false),
                self_ref: weak.clone(),
            }
        }))
    }

    pub fn guid(&self) -> Guid {
        self.guid
    }

    pub fn qos(&self) -> &QosProfile {
        &self.qos
    }

    pub fn attributes(&self) -> &WriterAttributes {
        &self.attributes
    }

    pub fn times(&self) -> WriterTimes {
        self.times.get()
    }

    pub fn set_listener(&self, listener: Option<Arc<dyn WriterListener>>) {
        *self.listener.write() = listener;
    }

    // ========================================================================
    // Writing
    // ========================================================================

    /// Write an unkeyed sample.
    pub fn write(&self, payload: &[u8]) -> Result<SequenceNumber> {
        self.new_change(ChangeKind::Alive, InstanceHandle::NIL, payload)
    }

    /// Write a sample of `instance`.
    pub fn write_with_handle(&self, payload: &[u8], instance: InstanceHandle) -> Result<SequenceNumber> {
        self.new_change(ChangeKind::Alive, instance, payload)
    }

    /// Announce that `instance` was disposed.
    pub fn dispose(&self, instance: InstanceHandle) -> Result<SequenceNumber> {
        self.new_change(ChangeKind::NotAliveDisposed, instance, &[])
    }

    /// Announce that this writer no longer updates `instance`.
    pub fn unregister(&self, instance: InstanceHandle) -> Result<SequenceNumber> {
        self.new_change(ChangeKind::NotAliveUnregistered, instance, &[])
    }

    fn new_change(
        &self,
        kind: ChangeKind,
        instance: InstanceHandle,
        payload: &[u8],
    ) -> Result<SequenceNumber> {
        if self.stopped.load(Ordering::Acquire) {
            return Err(Error::AlreadyStopped);
        }
        let deadline = Instant::now() + self.qos.max_blocking_time;
        let mut deferred = Deferred::default();
        let seq;
        {
            let mut guard = self.state.lock();
            let mut change = guard.history.new_change(kind, instance, payload);

            loop {
                let state = &mut *guard;
                let room = state
                    .history
                    .make_room(&change, |seq| state.is_acked_by_all(seq));
                match room {
                    Room::Ready => break,
                    Room::Evict(old) => {
                        state.history.remove_change(old);
                        for proxy in state.proxies.iter_mut().filter(|p| p.is_active()) {
                            proxy.remove_change(old);
                        }
                        log::trace!("[WRITER] {} evicted seq={}", self.guid, old);
                    }
                    Room::Rejected(limit) => {
                        return Err(Error::ResourceLimitExceeded(limit.as_str().to_string()));
                    }
                    Room::Full => {
                        if self.stopped.load(Ordering::Acquire) {
                            return Err(Error::AlreadyStopped);
                        }
                        if self.progress.wait_until(&mut guard, deadline).timed_out() {
                            let state = &*guard;
                            if matches!(
                                state.history.make_room(&change, |s| state.is_acked_by_all(s)),
                                Room::Full
                            ) {
                                self.metrics.incr(Counter::WriteTimeouts);
                                log::debug!(
                                    "[WRITER] {} history full for {:?}",
                                    self.guid,
                                    self.qos.max_blocking_time
                                );
                                return Err(Error::WriteTimeout);
                            }
                        }
                    }
                }
            }

            // Another writer may have committed while this one waited.
            change.sequence_number = guard.history.next_sequence();
            let change = guard.history.add_change(change)?;
            seq = change.sequence_number;

            let state = &mut *guard;
            for proxy in state.proxies.iter_mut().filter(|p| p.is_active()) {
                proxy.add_change(Arc::clone(&change));
            }
            for i in 0..state.proxies.len() {
                let proxy = &state.proxies[i];
                if !proxy.is_active() {
                    continue;
                }
                if self.attributes.push_mode || !proxy.is_reliable() {
                    self.send_pass(state, i, SendPass::NewChanges, &mut deferred);
                }
            }
            if state.active().any(ReaderProxy::is_reliable) {
                self.periodic_heartbeat.restart_timer();
            }
            self.collect_acknowledged(state, &mut deferred);
        }
        log::trace!("[WRITER] {} wrote seq={} kind={:?}", self.guid, seq, kind);
        self.finish(deferred);
        Ok(seq)
    }

    // ========================================================================
    // Send passes
    // ========================================================================

    fn builder_for(&self, proxy: &ReaderProxy) -> MessageBuilder {
        MessageBuilder::new(
            self.guid.prefix,
            Some(proxy.guid().prefix),
            proxy.locators().to_vec(),
            self.attributes.max_message_size,
        )
    }

    fn heartbeat_for(
        &self,
        state: &mut WriterState,
        reader_id: EntityId,
        final_flag: bool,
        liveliness_flag: bool,
    ) -> Heartbeat {
        Heartbeat {
            reader_id,
            writer_id: self.guid.entity_id,
            first_sn: state.history.first_available(),
            last_sn: state.history.last_sequence(),
            count: state.next_heartbeat_count(),
            final_flag,
            liveliness_flag,
        }
    }

    /// Send what `pass` selects to proxy `index`, followed by a HEARTBEAT for
    /// reliable readers when anything went out.
    fn send_pass(&self, state: &mut WriterState, index: usize, pass: SendPass, out: &mut Deferred) {
        let times = self.times.get();
        let last = state.history.last_sequence();
        let WriterState {
            history,
            proxies,
            heartbeat_count,
            ..
        } = state;
        let proxy = &mut proxies[index];
        let reliable = proxy.is_reliable();
        let reader_id = proxy.guid().entity_id;
        let writer_id = self.guid.entity_id;
        let mut builder = self.builder_for(proxy);
        let mut gaps = GapBuilder::new(reader_id, writer_id);

        let from = proxy.highest_sent() + 1;
        match pass {
            SendPass::NewChanges => {
                if reliable && from <= last {
                    for (first, end) in proxy.missing_ranges(from, last) {
                        gaps.add_range(first, end);
                    }
                }
            }
            SendPass::Repair => {
                for (first, end) in proxy.take_requested_gaps() {
                    gaps.add_range(first, end);
                }
            }
        }
        let gap_list = gaps.finish();
        for gap in &gap_list {
            let skipped = gap.irrelevant().count() as u64;
            self.metrics.record_gap(skipped);
            builder.add(&Submessage::Gap(gap.clone()));
        }
        self.metrics.add(Counter::GapsSent, gap_list.len() as u64);

        let sent_status = if reliable && !times.nack_supression_duration.is_zero() {
            ChangeForReaderStatus::Underway
        } else {
            ChangeForReaderStatus::Unacknowledged
        };
        let (data_counter, frag_counter) = match pass {
            SendPass::NewChanges => (Counter::DataSent, Counter::FragmentsSent),
            SendPass::Repair => (Counter::Retransmissions, Counter::Retransmissions),
        };
        let mut sent = 0usize;
        for cfr in proxy.iter_mut() {
            let selected = match pass {
                SendPass::NewChanges => {
                    cfr.sequence_number() >= from
                        && cfr.status() == ChangeForReaderStatus::Unsent
                }
                SendPass::Repair => cfr.status() == ChangeForReaderStatus::Requested,
            };
            if !selected {
                continue;
            }
            let change = Arc::clone(cfr.change());
            let inline_qos = InlineQos::for_change(change.kind, change.instance_handle);
            let key_flag = !change.kind.is_alive();
            if change.is_fragmented() {
                let pending: Vec<u32> = cfr.unsent_fragments().iter_set().collect();
                for frag in pending {
                    let Some(bytes) = change.fragment(frag) else {
                        continue;
                    };
                    builder.add_timestamped(
                        change.source_timestamp,
                        &Submessage::DataFrag(DataFrag {
                            reader_id,
                            writer_id,
                            writer_sn: change.sequence_number,
                            fragment_starting_num: frag,
                            fragments_in_submessage: 1,
                            fragment_size: change.fragment_size,
                            sample_size: change.payload.len() as u32,
                            inline_qos,
                            key_flag,
                            payload: bytes,
                        }),
                    );
                    cfr.mark_fragment_as_sent(frag);
                    self.metrics.incr(frag_counter);
                }
            } else {
                builder.add_timestamped(
                    change.source_timestamp,
                    &Submessage::Data(Data {
                        reader_id,
                        writer_id,
                        writer_sn: change.sequence_number,
                        inline_qos,
                        key_flag,
                        payload: &change.payload,
                    }),
                );
                self.metrics.incr(data_counter);
            }
            cfr.set_status(sent_status);
            sent += 1;
        }

        if pass == SendPass::NewChanges {
            proxy.set_highest_sent(last);
        }

        if reliable && (sent > 0 || !gap_list.is_empty()) {
            *heartbeat_count = heartbeat_count.wrapping_add(1);
            builder.add(&Submessage::Heartbeat(Heartbeat {
                reader_id,
                writer_id,
                first_sn: history.first_available(),
                last_sn: last,
                count: *heartbeat_count,
                final_flag: false,
                liveliness_flag: false,
            }));
            self.metrics.incr(Counter::HeartbeatsSent);
            if sent_status == ChangeForReaderStatus::Underway {
                if let Some(timers) = proxy.timers() {
                    timers.nack_supression.restart_timer();
                }
            }
        }

        if proxy.acked_on_send()
            && !proxy.has_pending()
            && proxy.acked_changes_set(proxy.highest_sent() + 1)
        {
            out.progress = true;
        }

        if sent > 0 {
            log::trace!(
                "[WRITER] {} {:?} pass to {}: {} change(s), {} gap(s)",
                self.guid,
                pass,
                proxy.guid(),
                sent,
                gap_list.len()
            );
        }
        out.messages.extend(builder.finish());
    }

    fn heartbeat_message(
        &self,
        state: &mut WriterState,
        index: usize,
        final_flag: bool,
        liveliness_flag: bool,
        out: &mut Deferred,
    ) {
        let reader_id = state.proxies[index].guid().entity_id;
        let mut builder = self.builder_for(&state.proxies[index]);
        let hb = self.heartbeat_for(state, reader_id, final_flag, liveliness_flag);
        builder.add(&Submessage::Heartbeat(hb));
        self.metrics.incr(Counter::HeartbeatsSent);
        out.messages.extend(builder.finish());
    }

    /// Notify changes acknowledged by every active proxy and, for volatile
    /// writers, drop them from the history.
    fn collect_acknowledged(&self, state: &mut WriterState, out: &mut Deferred) {
        let Some(min_low) = state.active().map(ReaderProxy::changes_low_mark).min() else {
            return;
        };
        if min_low <= state.acked_by_all_notified {
            return;
        }
        let from = state.acked_by_all_notified;
        out.acked_by_all.extend(
            state
                .history
                .iter()
                .filter(|c| c.sequence_number > from && c.sequence_number <= min_low)
                .cloned(),
        );
        state.acked_by_all_notified = min_low;
        if self.qos.durability == Durability::Volatile {
            let removed = state.history.remove_up_to(min_low);
            if !removed.is_empty() {
                log::trace!(
                    "[WRITER] {} released {} acknowledged change(s) up to seq={}",
                    self.guid,
                    removed.len(),
                    min_low
                );
            }
        }
        out.progress = true;
    }

    fn finish(&self, deferred: Deferred) {
        if deferred.progress {
            self.progress.notify_all();
        }
        for msg in &deferred.messages {
            if msg.destinations.is_empty() {
                continue;
            }
            if !self
                .network
                .send(&msg.bytes, &msg.destinations, self.qos.max_blocking_time)
            {
                self.metrics.incr(Counter::SendFailures);
                log::debug!(
                    "[WRITER] {} send of {} bytes to {:?} failed",
                    self.guid,
                    msg.bytes.len(),
                    msg.destinations
                );
            }
        }
        let needs_listener = !deferred.acked_by_all.is_empty()
            || deferred.matched.is_some()
            || deferred.incompatible.is_some();
        if !needs_listener {
            return;
        }
        let Some(listener) = self.listener.read().clone() else {
            return;
        };
        if let Some(status) = deferred.incompatible {
            listener.on_offered_incompatible_qos(&self.guid, status);
        }
        if let Some(status) = deferred.matched {
            listener.on_publication_matched(&self.guid, status);
        }
        for change in &deferred.acked_by_all {
            listener.on_writer_change_received_by_all(&self.guid, change);
        }
    }

    // ========================================================================
    // Matching
    // ========================================================================

    fn make_proxy_timers(&self, reader: Guid, generation: u64, times: WriterTimes) -> ProxyTimers {
        let writer = self.self_ref.clone();
        let nack_supression = TimedEvent::new(&self.events, times.nack_supression_duration, move || {
            if let Some(w) = writer.upgrade() {
                w.on_nack_supression_expired(reader, generation);
            }
            false
        });
        let writer = self.self_ref.clone();
        let initial_heartbeat =
            TimedEvent::new(&self.events, times.initial_heartbeat_delay, move || {
                if let Some(w) = writer.upgrade() {
                    w.on_initial_heartbeat(reader, generation);
                }
                false
            });
        ProxyTimers {
            nack_supression,
            initial_heartbeat,
        }
    }

    /// Match a remote reader, or refresh its attributes if already matched.
    pub fn matched_reader_add(&self, data: ReaderProxyData) -> Result<()> {
        let _discovery = self.discovery_lock.lock();
        if self.stopped.load(Ordering::Acquire) {
            return Err(Error::AlreadyStopped);
        }
        let reader = data.guid;
        let mut deferred = Deferred::default();

        if let Err(policy) = check_compatibility(
            self.qos.reliability,
            self.qos.durability,
            data.reliability,
            data.durability,
        ) {
            {
                let mut state = self.state.lock();
                state.incompatible.record(policy);
                deferred.incompatible = Some(state.incompatible.read_and_reset());
            }
            log::debug!(
                "[WRITER] {} incompatible reader {} ({:?})",
                self.guid,
                reader,
                policy
            );
            self.finish(deferred);
            return Err(Error::QosIncompatible(policy));
        }

        let locators = self.network.normalize_locators(&data.unicast_locators);
        {
            let mut guard = self.state.lock();
            let state = &mut *guard;
            if let Some(i) = state.find_active(&reader) {
                state.proxies[i].update(data, locators);
                log::debug!("[WRITER] {} updated reader {}", self.guid, reader);
                return Ok(());
            }

            let index = match state.proxies.iter().position(|p| !p.is_active()) {
                Some(i) => i,
                None if state.proxies.len() < self.attributes.max_matched_readers => {
                    state.proxies.push(ReaderProxy::new(state.history.len()));
                    state.proxies.len() - 1
                }
                None => {
                    return Err(Error::ResourceLimitExceeded(
                        "max_matched_readers".to_string(),
                    ))
                }
            };

            let times = self.times.get();
            let low_mark = match data.durability {
                Durability::Volatile => state.history.last_sequence(),
                _ => 0,
            };
            let reliable = data.reliability == Reliability::Reliable;
            let timers = self.make_proxy_timers(reader, state.proxies[index].generation(), times);
            let proxy = &mut state.proxies[index];
            proxy.start(data, locators, timers, low_mark);
            for change in state.history.iter() {
                proxy.add_change(Arc::clone(change));
            }

            if low_mark < state.history.last_sequence()
                && (self.attributes.push_mode || !reliable)
            {
                self.send_pass(state, index, SendPass::NewChanges, &mut deferred);
            }
            if reliable {
                if times.initial_heartbeat_delay.is_zero() {
                    if deferred.messages.is_empty() {
                        self.heartbeat_message(state, index, false, false, &mut deferred);
                    }
                } else if let Some(timers) = state.proxies[index].timers() {
                    timers.initial_heartbeat.restart_timer();
                }
                if state.proxies[index].has_unacknowledged(state.history.last_sequence()) {
                    self.periodic_heartbeat.restart_timer();
                }
            }

            state.matched.on_matched(reader);
            deferred.matched = Some(state.matched.read_and_reset());
            self.collect_acknowledged(state, &mut deferred);
            log::debug!(
                "[WRITER] {} matched reader {} (low_mark={}, reliable={})",
                self.guid,
                reader,
                low_mark,
                reliable
            );
        }
        self.finish(deferred);
        Ok(())
    }

    /// Unmatch a reader. Returns `false` if it was not matched.
    pub fn matched_reader_remove(&self, reader: &Guid) -> bool {
        let _discovery = self.discovery_lock.lock();
        let mut deferred = Deferred::default();
        {
            let mut guard = self.state.lock();
            let state = &mut *guard;
            let Some(index) = state.find_active(reader) else {
                return false;
            };
            state.proxies[index].stop();
            state.matched.on_unmatched(*reader);
            deferred.matched = Some(state.matched.read_and_reset());
            deferred.progress = true;
            self.collect_acknowledged(state, &mut deferred);
        }
        log::debug!("[WRITER] {} unmatched reader {}", self.guid, reader);
        self.finish(deferred);
        true
    }

    pub fn matched_reader_is_matched(&self, reader: &Guid) -> bool {
        self.state.lock().find_active(reader).is_some()
    }

    pub fn matched_reader_count(&self) -> usize {
        self.state.lock().active().count()
    }

    /// Run `f` against the proxy of `reader`, if matched.
    pub fn with_reader_proxy<R>(&self, reader: &Guid, f: impl FnOnce(&ReaderProxy) -> R) -> Option<R> {
        let state = self.state.lock();
        state.find_active(reader).map(|i| f(&state.proxies[i]))
    }

    // ========================================================================
    // Incoming control traffic
    // ========================================================================

    /// Handle an ACKNACK from `reader`.
    pub fn process_acknack(&self, reader: &Guid, acknack: &AckNack) {
        let mut deferred = Deferred::default();
        {
            let mut guard = self.state.lock();
            let state = &mut *guard;
            let Some(index) = state.find_active(reader) else {
                log::trace!("[WRITER] {} ACKNACK from unknown reader {}", self.guid, reader);
                return;
            };
            let next = state.history.next_sequence();
            let last = state.history.last_sequence();
            let proxy = &mut state.proxies[index];
            if !proxy.is_reliable() {
                return;
            }
            // a bogus base must not consume the count
            let base = acknack.reader_sn_state.base();
            if base > next {
                self.metrics.incr(Counter::AcknacksRejected);
                log::debug!(
                    "[WRITER] {} ACKNACK from {} acknowledges {} but last written is {}",
                    self.guid,
                    reader,
                    base - 1,
                    last
                );
                return;
            }
            if !proxy.check_and_set_acknack_count(acknack.count) {
                self.metrics.incr(Counter::AcknacksRejected);
                log::trace!(
                    "[WRITER] {} stale ACKNACK count={} from {}",
                    self.guid,
                    acknack.count,
                    reader
                );
                return;
            }
            self.metrics.incr(Counter::AcknacksReceived);

            if proxy.acked_changes_set(base) {
                deferred.progress = true;
            }
            let outcome = proxy.requested_changes_set(acknack.reader_sn_state.iter(), last);
            let repair = outcome.requested > 0 || outcome.missing > 0;

            if repair {
                if self.times.get().nack_response_delay.is_zero() {
                    self.send_pass(state, index, SendPass::Repair, &mut deferred);
                } else {
                    self.nack_response.restart_timer();
                }
            } else if !acknack.final_flag && acknack.reader_sn_state.is_empty() {
                // requests for UNDERWAY changes get no HEARTBEAT back
                self.heartbeat_message(state, index, false, false, &mut deferred);
            }
            self.collect_acknowledged(state, &mut deferred);
        }
        self.finish(deferred);
    }

    /// Handle a NACK_FRAG from `reader`.
    pub fn process_nack_frag(&self, reader: &Guid, nack_frag: &NackFrag) {
        let mut deferred = Deferred::default();
        {
            let mut guard = self.state.lock();
            let state = &mut *guard;
            let Some(index) = state.find_active(reader) else {
                return;
            };
            let proxy = &mut state.proxies[index];
            if !proxy.is_reliable() {
                return;
            }
            if !proxy.check_and_set_nackfrag_count(nack_frag.count) {
                self.metrics.incr(Counter::AcknacksRejected);
                return;
            }
            self.metrics.incr(Counter::NackFragsReceived);
            if !proxy.requested_fragments_set(
                nack_frag.writer_sn,
                nack_frag.fragment_number_state.iter(),
            ) {
                log::trace!(
                    "[WRITER] {} NACK_FRAG for seq={} ignored",
                    self.guid,
                    nack_frag.writer_sn
                );
                return;
            }
            if self.times.get().nack_response_delay.is_zero() {
                self.send_pass(state, index, SendPass::Repair, &mut deferred);
            } else {
                self.nack_response.restart_timer();
            }
        }
        self.finish(deferred);
    }

    // ========================================================================
    // Timer work
    // ========================================================================

    /// Retransmit everything readers requested since the last pass.
    pub fn perform_nack_response(&self) {
        let mut deferred = Deferred::default();
        {
            let mut guard = self.state.lock();
            let state = &mut *guard;
            for index in 0..state.proxies.len() {
                let proxy = &state.proxies[index];
                if proxy.is_active() && proxy.is_reliable() && proxy.has_pending() {
                    self.send_pass(state, index, SendPass::Repair, &mut deferred);
                }
            }
            self.collect_acknowledged(state, &mut deferred);
        }
        self.finish(deferred);
    }

    /// Heartbeat every reliable reader with unacknowledged changes.
    /// Returns `true` while some remain, which keeps the timer running.
    pub fn send_periodic_heartbeat(&self) -> bool {
        let mut deferred = Deferred::default();
        let pending;
        {
            let mut guard = self.state.lock();
            let state = &mut *guard;
            let last = state.history.last_sequence();
            let targets: Vec<usize> = (0..state.proxies.len())
                .filter(|&i| {
                    let p = &state.proxies[i];
                    p.is_active() && p.is_reliable() && p.has_unacknowledged(last)
                })
                .collect();
            pending = !targets.is_empty();
            for index in targets {
                self.heartbeat_message(state, index, false, false, &mut deferred);
            }
        }
        self.finish(deferred);
        pending && !self.stopped.load(Ordering::Acquire)
    }

    /// Send a HEARTBEAT with the liveliness flag to every reliable reader.
    pub fn assert_liveliness(&self) {
        let mut deferred = Deferred::default();
        {
            let mut guard = self.state.lock();
            let state = &mut *guard;
            for index in 0..state.proxies.len() {
                let p = &state.proxies[index];
                if p.is_active() && p.is_reliable() {
                    self.heartbeat_message(state, index, true, true, &mut deferred);
                }
            }
        }
        self.finish(deferred);
    }

    fn on_nack_supression_expired(&self, reader: Guid, generation: u64) {
        let mut state = self.state.lock();
        if let Some(index) = state.find_generation(&reader, generation) {
            let moved = state.proxies[index].underway_to_unacknowledged();
            log::trace!(
                "[WRITER] {} {} change(s) to {} now accept NACKs",
                self.guid,
                moved,
                reader
            );
        }
    }

    fn on_initial_heartbeat(&self, reader: Guid, generation: u64) {
        let mut deferred = Deferred::default();
        {
            let mut guard = self.state.lock();
            let state = &mut *guard;
            let Some(index) = state.find_generation(&reader, generation) else {
                return;
            };
            self.heartbeat_message(state, index, false, false, &mut deferred);
        }
        self.finish(deferred);
    }

    // ========================================================================
    // Queries and waits
    // ========================================================================

    /// Whether every matched reader acknowledged `seq` (vacuously true
    /// without readers).
    pub fn is_acked_by_all(&self, seq: SequenceNumber) -> bool {
        self.state.lock().is_acked_by_all(seq)
    }

    /// Block until `reader` acknowledged `seq`. Returns `false` on timeout
    /// or if the reader is not (or no longer) matched.
    pub fn wait_for_acknowledgment(&self, seq: SequenceNumber, reader: &Guid, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut state = self.state.lock();
        loop {
            match state.find_active(reader) {
                None => return false,
                Some(i) if state.proxies[i].changes_low_mark() >= seq => return true,
                Some(_) => {}
            }
            if self.stopped.load(Ordering::Acquire) {
                return false;
            }
            if self.progress.wait_until(&mut state, deadline).timed_out() {
                return state
                    .find_active(reader)
                    .is_some_and(|i| state.proxies[i].changes_low_mark() >= seq);
            }
        }
    }

    /// Block until every matched reader acknowledged everything written so far.
    pub fn wait_for_all_acked(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut state = self.state.lock();
        loop {
            let last = state.history.last_sequence();
            if state.is_acked_by_all(last) {
                return true;
            }
            if self.stopped.load(Ordering::Acquire) {
                return false;
            }
            if self.progress.wait_until(&mut state, deadline).timed_out() {
                let last = state.history.last_sequence();
                return state.is_acked_by_all(last);
            }
        }
    }

    /// Replace the protocol timings; running timers pick them up on their next arm.
    pub fn update_times(&self, times: WriterTimes) {
        self.times.set(times);
        self.periodic_heartbeat.update_interval(times.heartbeat_period);
        self.nack_response.update_interval(times.nack_response_delay);
        let state = self.state.lock();
        for timers in state.proxies.iter().filter_map(ReaderProxy::timers) {
            timers.nack_supression.update_interval(times.nack_supression_duration);
            timers.initial_heartbeat.update_interval(times.initial_heartbeat_delay);
        }
    }

    pub fn publication_matched_status(&self) -> PublicationMatchedStatus {
        self.state.lock().matched.read_and_reset()
    }

    pub fn offered_incompatible_qos_status(&self) -> OfferedIncompatibleQosStatus {
        self.state.lock().incompatible.read_and_reset()
    }

    pub fn history_len(&self) -> usize {
        self.state.lock().history.len()
    }

    /// Sequence number of the last written change (0 before the first write).
    pub fn last_sequence(&self) -> SequenceNumber {
        self.state.lock().history.last_sequence()
    }

    pub fn is_keep_all(&self) -> bool {
        self.qos.history == History::KeepAll
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::Acquire)
    }

    /// Unmatch every reader, cancel timers and wake blocked writers.
    pub fn stop(&self) {
        let _discovery = self.discovery_lock.lock();
        if self.stopped.swap(true, Ordering::AcqRel) {
            return;
        }
        self.periodic_heartbeat.cancel_timer();
        self.nack_response.cancel_timer();
        {
            let mut state = self.state.lock();
            for proxy in state.proxies.iter_mut().filter(|p| p.is_active()) {
                proxy.stop();
            }
        }
        self.progress.notify_all();
        log::debug!("[WRITER] {} stopped", self.guid);
    }
}

impl std::fmt::Debug for StatefulWriter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StatefulWriter")
            .field("guid", &self.guid)
            .field("reliability", &self.qos.reliability)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messages::SequenceNumberSet;
    use crate::qos::QosPolicyId;
    use crate::types::GuidPrefix;
    use std::thread;

    fn reader_guid(n: u8) -> Guid {
        Guid::new(GuidPrefix([n; 12]), EntityId::reader(1, false))
    }

    fn writer_with(qos: QosProfile) -> (Arc<StatefulWriter>, Arc<ReliableMetrics>) {
        let metrics = Arc::new(ReliableMetrics::new());
        let attributes = WriterAttributes {
            times: WriterTimes::immediate(Duration::from_secs(1)),
            ..WriterAttributes::default()
        };
        let writer = StatefulWriter::new(
            Guid::new(GuidPrefix([1; 12]), EntityId::writer(1, false)),
            qos,
            attributes,
            PayloadPool::new(8),
            Arc::new(NetworkFactory::new()),
            EventService::new().expect("event thread"),
            Arc::clone(&metrics),
        )
        .expect("writer");
        (writer, metrics)
    }

    fn acknack(base: SequenceNumber, count: u32) -> AckNack {
        AckNack {
            reader_id: EntityId::reader(1, false),
            writer_id: EntityId::writer(1, false),
            reader_sn_state: SequenceNumberSet::empty(base),
            count,
            final_flag: true,
        }
    }

    #[test]
    fn test_write_without_readers() {
        let (writer, _) = writer_with(QosProfile::reliable(2));
        for i in 0..3u8 {
            writer.write(&[i; 8]).expect("write");
        }
        assert_eq!(writer.last_sequence(), 3);
        assert_eq!(writer.history_len(), 2);
        assert!(writer.is_acked_by_all(3));
        assert!(writer.wait_for_all_acked(Duration::ZERO));
    }

    #[test]
    fn test_keep_all_times_out_when_unacknowledged() {
        let qos = QosProfile::reliable_keep_all(2).with_max_blocking_time(Duration::from_millis(50));
        let (writer, metrics) = writer_with(qos);
        writer
            .matched_reader_add(ReaderProxyData::new(reader_guid(2), Vec::new()))
            .expect("match");
        writer.write(b"a").expect("first");
        writer.write(b"b").expect("second");
        assert!(matches!(writer.write(b"c"), Err(Error::WriteTimeout)));
        assert_eq!(metrics.snapshot().write_timeouts, 1);
        assert_eq!(writer.last_sequence(), 2);
    }

    #[test]
    fn test_keep_all_unblocks_on_acknowledgment() {
        let qos = QosProfile::reliable_keep_all(2).with_max_blocking_time(Duration::from_secs(5));
        let (writer, _) = writer_with(qos);
        let reader = reader_guid(2);
        writer
            .matched_reader_add(ReaderProxyData::new(reader, Vec::new()))
            .expect("match");
        writer.write(b"a").expect("first");
        writer.write(b"b").expect("second");

        let blocked = Arc::clone(&writer);
        let handle = thread::spawn(move || blocked.write(b"c"));
        thread::sleep(Duration::from_millis(30));
        writer.process_acknack(&reader, &acknack(3, 1));

        assert_eq!(handle.join().expect("join").expect("third"), 3);
        assert!(writer.wait_for_acknowledgment(2, &reader, Duration::ZERO));
        assert!(!writer.wait_for_acknowledgment(3, &reader, Duration::from_millis(10)));
    }

    #[test]
    fn test_acknack_count_replay_is_rejected() {
        let (writer, metrics) = writer_with(QosProfile::reliable(10));
        let reader = reader_guid(2);
        writer
            .matched_reader_add(ReaderProxyData::new(reader, Vec::new()))
            .expect("match");
        writer.write(b"a").expect("write");
        writer.write(b"b").expect("write");

        writer.process_acknack(&reader, &acknack(2, 5));
        writer.process_acknack(&reader, &acknack(3, 5));
        assert_eq!(writer.with_reader_proxy(&reader, |p| p.changes_low_mark()), Some(1));

        // acknowledging beyond the last written change is bogus
        writer.process_acknack(&reader, &acknack(10, 6));
        assert_eq!(writer.with_reader_proxy(&reader, |p| p.changes_low_mark()), Some(1));
        assert_eq!(metrics.snapshot().acknacks_rejected, 2);
        assert_eq!(metrics.snapshot().acknacks_received, 1);
    }

    #[test]
    fn test_incompatible_reader_is_refused() {
        let (writer, _) = writer_with(QosProfile::default());
        let err = writer
            .matched_reader_add(ReaderProxyData::new(reader_guid(2), Vec::new()))
            .expect_err("best-effort writer cannot serve a reliable reader");
        assert!(matches!(err, Error::QosIncompatible(QosPolicyId::Reliability)));
        let status = writer.offered_incompatible_qos_status();
        assert_eq!(status.total_count, 1);
        assert_eq!(status.last_policy_id, Some(QosPolicyId::Reliability));
        assert_eq!(writer.matched_reader_count(), 0);
    }

    #[test]
    fn test_unmatch_releases_history() {
        let (writer, _) = writer_with(QosProfile::reliable(10));
        let reader = reader_guid(2);
        writer
            .matched_reader_add(ReaderProxyData::new(reader, Vec::new()))
            .expect("match");
        writer.write(b"a").expect("write");
        assert!(!writer.is_acked_by_all(1));
        assert!(writer.matched_reader_remove(&reader));
        assert!(!writer.matched_reader_remove(&reader));
        assert!(writer.is_acked_by_all(1));
        let status = writer.publication_matched_status();
        assert_eq!(status.current_count, 0);
        assert_eq!(status.total_count, 1);
    }

    #[test]
    fn test_write_after_stop_fails() {
        let (writer, _) = writer_with(QosProfile::reliable(10));
        writer.stop();
        assert!(matches!(writer.write(b"a"), Err(Error::AlreadyStopped)));
    }
}
