// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! StatefulReader - reliable RTPS reader with one proxy per matched writer.
//!
//! Received changes are stored as they arrive but only become visible to
//! `take` (and to `on_new_cache_change_added`) once every lower sequence of
//! the same writer is received or irrelevant. Locking mirrors the writer:
//! `discovery_lock` before `state`, datagrams and listener calls after the
//! state lock is released.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex, RwLock};

use super::fragment_buffer::{FragmentBuffer, FragmentOutcome};
use super::writer_proxy::{WriterProxy, WriterProxyData, WriterProxyTimers};
use crate::config::{LiveTimes, ReaderAttributes, ReaderTimes, DEFAULT_MAX_MESSAGE_SIZE, MAX_BITMAP_BITS};
use crate::error::{Error, Result};
use crate::events::{EventService, TimedEvent};
use crate::history::{Admission, ReaderHistory};
use crate::listener::{
    ReaderListener, RequestedIncompatibleQosStatus, SampleLostStatus, SubscriptionMatchedStatus,
};
use crate::messages::{
    AckNack, Data, DataFrag, FragmentNumberSet, Gap, Heartbeat, HeartbeatFrag, InlineQos,
    MessageBuilder, NackFrag, OutboundMessage, SequenceNumberSet, Submessage,
};
use crate::metrics::{Counter, ReliableMetrics};
use crate::qos::{check_compatibility, QosProfile, Reliability};
use crate::rt::{PayloadPool, SerializedPayload};
use crate::transport::NetworkFactory;
use crate::types::{CacheChange, Guid, InstanceHandle, SequenceNumber, Time};

#[derive(Default)]
struct Deferred {
    messages: Vec<OutboundMessage>,
    delivered: Vec<Arc<CacheChange>>,
    matched: Option<SubscriptionMatchedStatus>,
    incompatible: Option<RequestedIncompatibleQosStatus>,
    lost: Option<SampleLostStatus>,
}

struct ReaderState {
    history: ReaderHistory,
    proxies: Vec<WriterProxy>,
    fragments: FragmentBuffer,
    matched: SubscriptionMatchedStatus,
    incompatible: RequestedIncompatibleQosStatus,
    lost: SampleLostStatus,
}

impl ReaderState {
    fn find_active(&self, writer: &Guid) -> Option<usize> {
        self.proxies
            .iter()
            .position(|p| p.is_active() && p.guid() == *writer)
    }

    fn find_generation(&self, writer: &Guid, generation: u64) -> Option<usize> {
        self.find_active(writer)
            .filter(|&i| self.proxies[i].generation() == generation)
    }
}

/// Whether `change` may be handed to the application.
fn is_visible(proxies: &[WriterProxy], change: &CacheChange) -> bool {
    proxies
        .iter()
        .find(|p| p.is_active() && p.guid() == change.writer_guid)
        .map_or(true, |p| change.sequence_number <= p.last_notified())
}

/// Reliable stateful reader.
pub struct StatefulReader {
    guid: Guid,
    qos: QosProfile,
    attributes: ReaderAttributes,
    times: LiveTimes<ReaderTimes>,
    state: Mutex<ReaderState>,
    /// Signalled when changes become visible.
    unread: Condvar,
    discovery_lock: Mutex<()>,
    pool: Arc<PayloadPool>,
    network: Arc<NetworkFactory>,
    events: Arc<EventService>,
    metrics: Arc<ReliableMetrics>,
    listener: RwLock<Option<Arc<dyn ReaderListener>>>,
    stopped: AtomicBool,
    self_ref: Weak<StatefulReader>,
}

impl StatefulReader {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        guid: Guid,
        qos: QosProfile,
        attributes: ReaderAttributes,
        pool: Arc<PayloadPool>,
        network: Arc<NetworkFactory>,
        events: Arc<EventService>,
        metrics: Arc<ReliableMetrics>,
    ) -> Result<Arc<Self>> {
        qos.validate().map_err(Error::InvalidQos)?;
        if attributes.max_matched_writers == 0 {
            return Err(Error::Config("max_matched_writers must be > 0".to_string()));
        }
        let history = ReaderHistory::new(&qos);
        if attributes.max_sample_size == 0 {
            return Err(Error::Config("max_sample_size must be > 0".to_string()));
        }
        let fragments = FragmentBuffer::new(
            attributes.max_pending_reassemblies,
            attributes.fragment_timeout,
            attributes.max_sample_size,
        );
        log::debug!("[READER] {} created ({:?}, {:?})", guid, qos.reliability, qos.history);
        Ok(Arc::new_cyclic(|weak| Self {
            guid,
            qos,
            attributes,
            times: LiveTimes::new(attributes.times),
            state: Mutex::new(ReaderState {
                history,
                proxies: Vec::new(),
                fragments,
                matched: SubscriptionMatchedStatus::default(),
                incompatible: RequestedIncompatibleQosStatus::default(),
                lost: SampleLostStatus::default(),
            }),
            unread: Condvar::new(),
            discovery_lock: Mutex::new(()),
            pool,
            network,
            events,
            metrics,
            listener: RwLock::new(None),
            stopped: AtomicBool::new(false),
            self_ref: weak.clone(),
        }))
    }

    pub fn guid(&self) -> Guid {
        self.guid
    }

    pub fn qos(&self) -> &QosProfile {
        &self.qos
    }

    pub fn attributes(&self) -> &ReaderAttributes {
        &self.attributes
    }

    pub fn times(&self) -> ReaderTimes {
        self.times.get()
    }

    pub fn set_listener(&self, listener: Option<Arc<dyn ReaderListener>>) {
        *self.listener.write() = listener;
    }

    // ========================================================================
    // Matching
    // ========================================================================

    fn make_proxy_timers(&self, writer: Guid, generation: u64, times: ReaderTimes) -> WriterProxyTimers {
        let reader = self.self_ref.clone();
        let heartbeat_response =
            TimedEvent::new(&self.events, times.heartbeat_response_delay, move || {
                if let Some(r) = reader.upgrade() {
                    r.on_acknack_timer(writer, generation);
                }
                false
            });
        let reader = self.self_ref.clone();
        let initial_acknack = TimedEvent::new(&self.events, times.initial_acknack_delay, move || {
            if let Some(r) = reader.upgrade() {
                r.on_acknack_timer(writer, generation);
            }
            false
        });
        WriterProxyTimers {
            heartbeat_response,
            initial_acknack,
        }
    }

    /// Match a remote writer, or refresh its attributes if already matched.
    pub fn matched_writer_add(&self, data: WriterProxyData) -> Result<()> {
        let _discovery = self.discovery_lock.lock();
        if self.stopped.load(Ordering::Acquire) {
            return Err(Error::AlreadyStopped);
        }
        let writer = data.guid;
        let mut deferred = Deferred::default();

        if let Err(policy) = check_compatibility(
            data.reliability,
            data.durability,
            self.qos.reliability,
            self.qos.durability,
        ) {
            {
                let mut state = self.state.lock();
                state.incompatible.record(policy);
                deferred.incompatible = Some(state.incompatible.read_and_reset());
            }
            log::debug!(
                "[READER] {} incompatible writer {} ({:?})",
                self.guid,
                writer,
                policy
            );
            self.finish(deferred);
            return Err(Error::QosIncompatible(policy));
        }

        let locators = self.network.normalize_locators(&data.unicast_locators);
        {
            let mut guard = self.state.lock();
            let state = &mut *guard;
            if let Some(i) = state.find_active(&writer) {
                state.proxies[i].update(data, locators);
                return Ok(());
            }
            let index = match state.proxies.iter().position(|p| !p.is_active()) {
                Some(i) => i,
                None if state.proxies.len() < self.attributes.max_matched_writers => {
                    state.proxies.push(WriterProxy::new());
                    state.proxies.len() - 1
                }
                None => {
                    return Err(Error::ResourceLimitExceeded(
                        "max_matched_writers".to_string(),
                    ))
                }
            };
            let times = self.times.get();
            let reliable = data.reliability == Reliability::Reliable
                && self.qos.reliability == Reliability::Reliable;
            let timers = self.make_proxy_timers(writer, state.proxies[index].generation(), times);
            state.proxies[index].start(data, locators, timers);

            if reliable {
                if times.initial_acknack_delay.is_zero() {
                    self.acknack_message(state, index, &mut deferred);
                } else if let Some(timers) = state.proxies[index].timers() {
                    timers.initial_acknack.restart_timer();
                }
            }
            state.matched.on_matched(writer);
            deferred.matched = Some(state.matched.read_and_reset());
            log::debug!("[READER] {} matched writer {} (reliable={})", self.guid, writer, reliable);
        }
        self.finish(deferred);
        Ok(())
    }

    /// Unmatch a writer. Samples already visible stay readable; the rest
    /// are dropped. Returns `false` if it was not matched.
    pub fn matched_writer_remove(&self, writer: &Guid) -> bool {
        let _discovery = self.discovery_lock.lock();
        let mut deferred = Deferred::default();
        {
            let mut guard = self.state.lock();
            let state = &mut *guard;
            let Some(index) = state.find_active(writer) else {
                return false;
            };
            let delivered = state.proxies[index].last_notified();
            state.proxies[index].stop();
            let dropped = state.history.remove_undelivered(writer, delivered);
            state.fragments.remove_writer(writer);
            state.matched.on_unmatched(*writer);
            deferred.matched = Some(state.matched.read_and_reset());
            log::debug!(
                "[READER] {} unmatched writer {} ({} undelivered change(s) dropped)",
                self.guid,
                writer,
                dropped
            );
        }
        self.finish(deferred);
        true
    }

    pub fn matched_writer_is_matched(&self, writer: &Guid) -> bool {
        self.state.lock().find_active(writer).is_some()
    }

    pub fn matched_writer_count(&self) -> usize {
        self.state.lock().proxies.iter().filter(|p| p.is_active()).count()
    }

    /// Run `f` against the proxy of `writer`, if matched.
    pub fn with_writer_proxy<R>(&self, writer: &Guid, f: impl FnOnce(&WriterProxy) -> R) -> Option<R> {
        let state = self.state.lock();
        state.find_active(writer).map(|i| f(&state.proxies[i]))
    }

    // ========================================================================
    // Incoming data
    // ========================================================================

    /// Handle a DATA from `writer`.
    pub fn process_data(&self, writer: &Guid, data: &Data<'_>, timestamp: Option<Time>) {
        let mut deferred = Deferred::default();
        {
            let mut guard = self.state.lock();
            let state = &mut *guard;
            let Some(index) = state.find_active(writer) else {
                log::trace!("[READER] {} DATA from unknown writer {}", self.guid, writer);
                return;
            };
            if !self.accept_sequence(state, index, data.writer_sn, &mut deferred) {
                return;
            }
            let payload = self.pool.get_payload(data.payload);
            self.store(
                state,
                index,
                data.writer_sn,
                &data.inline_qos,
                payload,
                timestamp,
                &mut deferred,
            );
        }
        self.finish(deferred);
    }

    /// Handle a DATA_FRAG from `writer`.
    pub fn process_data_frag(&self, writer: &Guid, frag: &DataFrag<'_>, timestamp: Option<Time>) {
        let mut deferred = Deferred::default();
        {
            let mut guard = self.state.lock();
            let state = &mut *guard;
            let Some(index) = state.find_active(writer) else {
                return;
            };
            let seq = frag.writer_sn;
            if state.proxies[index].is_resolved(seq) {
                self.metrics.incr(Counter::DuplicatesDropped);
                return;
            }
            match state.fragments.insert(*writer, frag, Instant::now()) {
                FragmentOutcome::Invalid => {
                    self.metrics.incr(Counter::MalformedSubmessages);
                    log::debug!(
                        "[READER] {} inconsistent DATA_FRAG seq={} from {}",
                        self.guid,
                        seq,
                        writer
                    );
                }
                FragmentOutcome::Pending(fresh) => {
                    self.metrics.add(Counter::FragmentsReceived, u64::from(fresh));
                    if fresh == 0 {
                        self.metrics.incr(Counter::DuplicatesDropped);
                    }
                }
                FragmentOutcome::Complete(sample) => {
                    self.metrics.incr(Counter::FragmentsReceived);
                    if self.accept_sequence(state, index, seq, &mut deferred) {
                        let payload = self.pool.commit(sample.payload);
                        self.store(
                            state,
                            index,
                            seq,
                            &sample.inline_qos,
                            payload,
                            timestamp,
                            &mut deferred,
                        );
                    }
                }
            }
        }
        self.finish(deferred);
    }

    /// Duplicate filter; best-effort proxies also give up on skipped numbers.
    fn accept_sequence(
        &self,
        state: &mut ReaderState,
        index: usize,
        seq: SequenceNumber,
        out: &mut Deferred,
    ) -> bool {
        let proxy = &mut state.proxies[index];
        if proxy.is_resolved(seq) {
            self.metrics.incr(Counter::DuplicatesDropped);
            log::trace!("[READER] {} duplicate seq={} from {}", self.guid, seq, proxy.guid());
            return false;
        }
        let best_effort = !proxy.is_reliable() || self.qos.reliability == Reliability::BestEffort;
        if best_effort {
            let lost = proxy.lost_changes_update(seq);
            if lost > 0 {
                self.record_lost(state, lost, out);
            }
        }
        true
    }

    #[allow(clippy::too_many_arguments)]
    fn store(
        &self,
        state: &mut ReaderState,
        index: usize,
        seq: SequenceNumber,
        inline_qos: &InlineQos,
        payload: SerializedPayload,
        timestamp: Option<Time>,
        out: &mut Deferred,
    ) {
        let writer = state.proxies[index].guid();
        let mut change = CacheChange::new(
            inline_qos.change_kind(),
            writer,
            inline_qos.key_hash.unwrap_or(InstanceHandle::NIL),
            seq,
            payload,
        );
        if let Some(ts) = timestamp {
            change.source_timestamp = ts;
        }
        match state.history.add_change(Arc::new(change)) {
            Ok(admission) => {
                state.proxies[index].received_change_set(seq);
                state.fragments.remove(&writer, seq);
                self.metrics.incr(Counter::SamplesReceived);
                match admission {
                    Admission::Stored(Some(old)) => log::trace!(
                        "[READER] {} dropped seq={} of {} to make room",
                        self.guid,
                        old.sequence_number,
                        old.writer_guid
                    ),
                    Admission::Stored(None) => {}
                    // a repair older than the instance's kept samples
                    Admission::Superseded => log::trace!(
                        "[READER] {} seq={} from {} already superseded",
                        self.guid,
                        seq,
                        writer
                    ),
                }
                self.deliver(state, index, out);
            }
            Err(e) => {
                // not marked received: the writer will offer it again
                self.metrics.incr(Counter::SamplesRejected);
                log::debug!("[READER] {} rejected seq={} from {}: {}", self.guid, seq, writer, e);
            }
        }
    }

    /// Publish everything that became contiguous for proxy `index`.
    fn deliver(&self, state: &mut ReaderState, index: usize, out: &mut Deferred) {
        let proxy = &mut state.proxies[index];
        let writer = proxy.guid();
        let from = proxy.last_notified();
        let upto = proxy.available_changes_max();
        if upto <= from {
            return;
        }
        proxy.set_last_notified(upto);
        out.delivered.extend(
            state
                .history
                .cache()
                .iter()
                .filter(|c| {
                    c.writer_guid == writer
                        && c.sequence_number > from
                        && c.sequence_number <= upto
                })
                .cloned(),
        );
        state.fragments.remove_up_to(&writer, upto);
    }

    fn record_lost(&self, state: &mut ReaderState, lost: u64, out: &mut Deferred) {
        self.metrics.add(Counter::SamplesLost, lost);
        self.metrics.record_gap(lost);
        state.lost.record(lost);
        out.lost = Some(state.lost);
    }

    // ========================================================================
    // Incoming control traffic
    // ========================================================================

    /// Handle a HEARTBEAT from `writer`.
    pub fn process_heartbeat(&self, writer: &Guid, hb: &Heartbeat) {
        let mut deferred = Deferred::default();
        {
            let mut guard = self.state.lock();
            let state = &mut *guard;
            let Some(index) = state.find_active(writer) else {
                return;
            };
            let proxy = &mut state.proxies[index];
            if !proxy.is_reliable() || self.qos.reliability == Reliability::BestEffort {
                return;
            }
            if !proxy.check_and_set_heartbeat_count(hb.count) {
                log::trace!("[READER] {} stale HEARTBEAT count={}", self.guid, hb.count);
                return;
            }
            self.metrics.incr(Counter::HeartbeatsReceived);

            let lost = proxy.lost_changes_update(hb.first_sn);
            proxy.update_max_available(hb.last_sn);
            if lost > 0 {
                log::debug!(
                    "[READER] {} writer {} no longer offers {} change(s) below seq={}",
                    self.guid,
                    writer,
                    lost,
                    hb.first_sn
                );
                self.record_lost(state, lost, &mut deferred);
            }
            state.fragments.purge_expired(Instant::now());
            self.deliver(state, index, &mut deferred);

            let proxy = &state.proxies[index];
            let missing = !proxy.missing_changes().is_empty();
            if !hb.final_flag || missing {
                if self.times.get().heartbeat_response_delay.is_zero() {
                    self.acknack_message(state, index, &mut deferred);
                } else if let Some(timers) = proxy.timers() {
                    timers.heartbeat_response.restart_timer();
                }
            }
        }
        self.finish(deferred);
    }

    /// Handle a HEARTBEAT_FRAG: NACK the fragments still missing.
    pub fn process_heartbeat_frag(&self, writer: &Guid, hbf: &HeartbeatFrag) {
        let mut deferred = Deferred::default();
        {
            let mut guard = self.state.lock();
            let state = &mut *guard;
            let Some(index) = state.find_active(writer) else {
                return;
            };
            let proxy = &mut state.proxies[index];
            if !proxy.is_reliable() || !proxy.check_and_set_heartbeat_frag_count(hbf.count) {
                return;
            }
            if proxy.is_resolved(hbf.writer_sn) {
                return;
            }
            let missing: Vec<u32> = match state.fragments.missing_fragments(writer, hbf.writer_sn) {
                Some(frags) => frags
                    .into_iter()
                    .filter(|&f| f <= hbf.last_fragment_num)
                    .collect(),
                None => (1..=hbf.last_fragment_num).collect(),
            };
            if missing.is_empty() {
                return;
            }
            let mut builder = self.builder_for(&state.proxies[index]);
            self.add_nack_frag(state, index, hbf.writer_sn, &missing, &mut builder);
            deferred.messages.extend(builder.finish());
        }
        self.finish(deferred);
    }

    /// Handle a GAP from `writer`.
    pub fn process_gap(&self, writer: &Guid, gap: &Gap) {
        let mut deferred = Deferred::default();
        {
            let mut guard = self.state.lock();
            let state = &mut *guard;
            let Some(index) = state.find_active(writer) else {
                return;
            };
            self.metrics.incr(Counter::GapsReceived);
            let proxy = &mut state.proxies[index];
            let range = gap.contiguous();
            let mut skipped = 0;
            if !range.is_empty() {
                skipped += proxy.irrelevant_range_set(range.start, range.end - 1);
                if proxy.is_resolved(range.end - 1) {
                    state.fragments.remove_range(writer, range.start, range.end - 1);
                }
            }
            for seq in gap.gap_list.iter() {
                if proxy.irrelevant_change_set(seq) {
                    skipped += 1;
                    state.fragments.remove(writer, seq);
                }
            }
            if skipped > 0 {
                self.metrics.record_gap(skipped);
                log::trace!("[READER] {} {} irrelevant change(s) from {}", self.guid, skipped, writer);
            }
            self.deliver(state, index, &mut deferred);
        }
        self.finish(deferred);
    }

    // ========================================================================
    // Outgoing control traffic
    // ========================================================================

    fn builder_for(&self, proxy: &WriterProxy) -> MessageBuilder {
        MessageBuilder::new(
            self.guid.prefix,
            Some(proxy.guid().prefix),
            proxy.locators().to_vec(),
            DEFAULT_MAX_MESSAGE_SIZE,
        )
    }

    fn add_nack_frag(
        &self,
        state: &mut ReaderState,
        index: usize,
        seq: SequenceNumber,
        missing: &[u32],
        builder: &mut MessageBuilder,
    ) {
        let Some(&base) = missing.first() else {
            return;
        };
        let window = missing
            .iter()
            .copied()
            .take_while(|&f| f < base.saturating_add(MAX_BITMAP_BITS));
        let Some(set) = FragmentNumberSet::from_fragments(base, window) else {
            return;
        };
        let proxy = &mut state.proxies[index];
        builder.add(&Submessage::NackFrag(NackFrag {
            reader_id: self.guid.entity_id,
            writer_id: proxy.guid().entity_id,
            writer_sn: seq,
            fragment_number_state: set,
            count: proxy.next_nackfrag_count(),
        }));
        self.metrics.incr(Counter::NackFragsSent);
    }

    /// ACKNACK for proxy `index`, plus a NACK_FRAG per partial reassembly.
    ///
    /// Partially reassembled sequences are left out of the ACKNACK so the
    /// writer resends only the missing fragments. The ACKNACK is final
    /// unless it requests something or no HEARTBEAT was seen yet.
    fn acknack_message(&self, state: &mut ReaderState, index: usize, out: &mut Deferred) {
        let writer = state.proxies[index].guid();
        let proxy = &state.proxies[index];
        let low_mark = proxy.available_changes_max();
        let partial: Vec<SequenceNumber> = state
            .fragments
            .pending_sequences(&writer)
            .into_iter()
            .filter(|&s| s > low_mark && !proxy.is_resolved(s))
            .collect();
        let requested = proxy
            .missing_changes()
            .into_iter()
            .filter(|s| !partial.contains(s));
        let Some(set) = SequenceNumberSet::from_sequences(low_mark + 1, requested) else {
            return;
        };
        let preemptive = !proxy.heartbeat_seen();
        let final_flag = set.is_empty() && !preemptive;
        let mut builder = self.builder_for(proxy);

        let proxy = &mut state.proxies[index];
        builder.add(&Submessage::AckNack(AckNack {
            reader_id: self.guid.entity_id,
            writer_id: writer.entity_id,
            reader_sn_state: set,
            count: proxy.next_acknack_count(),
            final_flag,
        }));
        self.metrics.incr(Counter::AcknacksSent);

        for seq in partial {
            if let Some(missing) = state.fragments.missing_fragments(&writer, seq) {
                self.add_nack_frag(state, index, seq, &missing, &mut builder);
            }
        }
        out.messages.extend(builder.finish());
    }

    /// Send an ACKNACK to `writer` now. Returns `false` if it is not a
    /// matched reliable writer.
    pub fn send_acknack(&self, writer: &Guid) -> bool {
        let mut deferred = Deferred::default();
        {
            let mut guard = self.state.lock();
            let state = &mut *guard;
            let Some(index) = state.find_active(writer) else {
                return false;
            };
            if !state.proxies[index].is_reliable() || !self.qos.is_reliable() {
                return false;
            }
            self.acknack_message(state, index, &mut deferred);
        }
        self.finish(deferred);
        true
    }

    fn on_acknack_timer(&self, writer: Guid, generation: u64) {
        let mut deferred = Deferred::default();
        {
            let mut guard = self.state.lock();
            let state = &mut *guard;
            let Some(index) = state.find_generation(&writer, generation) else {
                return;
            };
            self.acknack_message(state, index, &mut deferred);
        }
        self.finish(deferred);
    }

    fn finish(&self, deferred: Deferred) {
        if !deferred.delivered.is_empty() {
            self.unread.notify_all();
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
                log::debug!("[READER] {} send to {:?} failed", self.guid, msg.destinations);
            }
        }
        let Some(listener) = self.listener.read().clone() else {
            return;
        };
        if let Some(status) = deferred.incompatible {
            listener.on_requested_incompatible_qos(&self.guid, status);
        }
        if let Some(status) = deferred.matched {
            listener.on_subscription_matched(&self.guid, status);
        }
        if let Some(status) = deferred.lost {
            listener.on_sample_lost(&self.guid, status);
        }
        for change in &deferred.delivered {
            listener.on_new_cache_change_added(&self.guid, change);
        }
    }

    // ========================================================================
    // Application side
    // ========================================================================

    /// Remove and return up to `max` visible changes, per-writer in
    /// sequence order.
    pub fn take(&self, max: usize) -> Vec<Arc<CacheChange>> {
        let mut guard = self.state.lock();
        let ReaderState {
            history, proxies, ..
        } = &mut *guard;
        let proxies: &[WriterProxy] = proxies;
        history.take(max, |c| is_visible(proxies, c))
    }

    pub fn take_all(&self) -> Vec<Arc<CacheChange>> {
        self.take(usize::MAX)
    }

    /// Number of visible changes not taken yet.
    pub fn unread_count(&self) -> usize {
        let state = self.state.lock();
        state.history.visible_count(|c| is_visible(&state.proxies, c))
    }

    /// Block until at least one change is visible. Returns `false` on timeout.
    pub fn wait_for_unread(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut state = self.state.lock();
        loop {
            if state.history.visible_count(|c| is_visible(&state.proxies, c)) > 0 {
                return true;
            }
            if self.stopped.load(Ordering::Acquire) {
                return false;
            }
            if self.unread.wait_until(&mut state, deadline).timed_out() {
                return state.history.visible_count(|c| is_visible(&state.proxies, c)) > 0;
            }
        }
    }

    /// Replace the protocol timings; running timers pick them up on their next arm.
    pub fn update_times(&self, times: ReaderTimes) {
        self.times.set(times);
        let state = self.state.lock();
        for timers in state.proxies.iter().filter_map(WriterProxy::timers) {
            timers.heartbeat_response.update_interval(times.heartbeat_response_delay);
            timers.initial_acknack.update_interval(times.initial_acknack_delay);
        }
    }

    pub fn subscription_matched_status(&self) -> SubscriptionMatchedStatus {
        self.state.lock().matched.read_and_reset()
    }

    pub fn requested_incompatible_qos_status(&self) -> RequestedIncompatibleQosStatus {
        self.state.lock().incompatible.read_and_reset()
    }

    pub fn sample_lost_status(&self) -> SampleLostStatus {
        self.state.lock().lost.read_and_reset()
    }

    /// Stored changes, visible or not.
    pub fn history_len(&self) -> usize {
        self.state.lock().history.len()
    }

    pub fn pending_reassemblies(&self) -> usize {
        self.state.lock().fragments.len()
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::Acquire)
    }

    /// Unmatch every writer, cancel timers and wake blocked readers.
    pub fn stop(&self) {
        let _discovery = self.discovery_lock.lock();
        if self.stopped.swap(true, Ordering::AcqRel) {
            return;
        }
        {
            let mut state = self.state.lock();
            for proxy in state.proxies.iter_mut().filter(|p| p.is_active()) {
                proxy.stop();
            }
        }
        self.unread.notify_all();
        log::debug!("[READER] {} stopped", self.guid);
    }
}

impl std::fmt::Debug for StatefulReader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StatefulReader")
            .field("guid", &self.guid)
            .field("reliability", &self.qos.reliability)
            .finish_non_exhaustive()
    }
}
