// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! ReaderProxy - per-reader state of a stateful writer.
//!
//! Tracks, for one matched remote reader:
//! - `changes_low_mark`: highest sequence number the reader acknowledged
//! - one [`ChangeForReader`] per stored change above the low mark
//! - replay protection for ACKNACK and NACK_FRAG counts
//! - the nack-suppression and initial-heartbeat timers
//!
//! Sequence numbers above the low mark without an entry are no longer in
//! the writer history and are announced with GAP.
//!
//! Proxies are slots: `stop()` deactivates one (cancelling its timers) so
//! that a later match can reuse it with `start()`.

use std::collections::VecDeque;
use std::sync::Arc;

use super::change_for_reader::{ChangeForReader, ChangeForReaderStatus};
use crate::events::TimedEvent;
use crate::qos::{Durability, Reliability};
use crate::transport::Locator;
use crate::types::{CacheChange, Guid, SequenceNumber};

/// Remote reader attributes supplied by discovery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReaderProxyData {
    pub guid: Guid,
    pub unicast_locators: Vec<Locator>,
    pub reliability: Reliability,
    pub durability: Durability,
    pub expects_inline_qos: bool,
    pub disable_positive_acks: bool,
}

impl ReaderProxyData {
    /// Reliable, volatile reader reachable at `locators`.
    pub fn new(guid: Guid, unicast_locators: Vec<Locator>) -> Self {
        Self {
            guid,
            unicast_locators,
            reliability: Reliability::Reliable,
            durability: Durability::Volatile,
            expects_inline_qos: false,
            disable_positive_acks: false,
        }
    }

    #[must_use]
    pub fn with_reliability(mut self, reliability: Reliability) -> Self {
        self.reliability = reliability;
        self
    }

    #[must_use]
    pub fn with_durability(mut self, durability: Durability) -> Self {
        self.durability = durability;
        self
    }

    #[must_use]
    pub fn with_inline_qos(mut self, expects_inline_qos: bool) -> Self {
        self.expects_inline_qos = expects_inline_qos;
        self
    }

    #[must_use]
    pub fn with_positive_acks_disabled(mut self, disabled: bool) -> Self {
        self.disable_positive_acks = disabled;
        self
    }
}

/// Timers owned by an active proxy.
#[derive(Debug)]
pub struct ProxyTimers {
    pub nack_supression: TimedEvent,
    pub initial_heartbeat: TimedEvent,
}

impl ProxyTimers {
    fn cancel(&self) {
        self.nack_supression.cancel_timer();
        self.initial_heartbeat.cancel_timer();
    }
}

/// Result of applying an ACKNACK request bitmap.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct NackOutcome {
    /// Entries moved to REQUESTED.
    pub requested: usize,
    /// Requested numbers the proxy no longer has an entry for.
    pub missing: usize,
}

#[derive(Debug)]
pub struct ReaderProxy {
    data: Option<ReaderProxyData>,
    locators: Vec<Locator>,
    active: bool,
    generation: u64,
    changes: VecDeque<ChangeForReader>,
    changes_low_mark: SequenceNumber,
    /// Highest sequence considered by a first-transmission pass.
    highest_sent: SequenceNumber,
    /// Lowest and highest requested numbers with no entry (0 = none);
    /// the next repair pass sends GAPs for the untracked numbers between.
    gap_request_from: SequenceNumber,
    gap_request_upto: SequenceNumber,
    last_acknack_count: u32,
    last_nackfrag_count: u32,
    timers: Option<ProxyTimers>,
}

impl ReaderProxy {
    /// Inactive slot.
    pub fn new(capacity: usize) -> Self {
        Self {
            data: None,
            locators: Vec::new(),
            active: false,
            generation: 0,
            changes: VecDeque::with_capacity(capacity.min(1024)),
            changes_low_mark: 0,
            highest_sent: 0,
            gap_request_from: 0,
            gap_request_upto: 0,
            last_acknack_count: 0,
            last_nackfrag_count: 0,
            timers: None,
        }
    }

    /// Activate for a newly matched reader.
    ///
    /// `low_mark` is what the reader is considered to already have: the
    /// writer's last sequence for volatile readers, 0 for durable ones.
    pub fn start(
        &mut self,
        data: ReaderProxyData,
        locators: Vec<Locator>,
        timers: ProxyTimers,
        low_mark: SequenceNumber,
    ) {
        self.data = Some(data);
        self.locators = locators;
        self.active = true;
        self.changes.clear();
        self.changes_low_mark = low_mark;
        self.highest_sent = low_mark;
        self.gap_request_from = 0;
        self.gap_request_upto = 0;
        self.last_acknack_count = 0;
        self.last_nackfrag_count = 0;
        self.timers = Some(timers);
        log::debug!("[PROXY] reader {} started, low_mark={}", self.guid(), low_mark);
    }

    /// Deactivate; cancels and releases every timer.
    pub fn stop(&mut self) {
        if let Some(timers) = self.timers.take() {
            timers.cancel();
        }
        self.active = false;
        self.generation += 1;
        self.changes.clear();
        log::debug!("[PROXY] reader {} stopped", self.guid());
    }

    /// Refresh attributes of an already active proxy (discovery update).
    pub fn update(&mut self, data: ReaderProxyData, locators: Vec<Locator>) {
        self.data = Some(data);
        self.locators = locators;
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    /// Bumped by every `stop()`; timers compare it to detect a reused slot.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn guid(&self) -> Guid {
        self.data.as_ref().map(|d| d.guid).unwrap_or(Guid::UNKNOWN)
    }

    pub fn data(&self) -> Option<&ReaderProxyData> {
        self.data.as_ref()
    }

    pub fn locators(&self) -> &[Locator] {
        &self.locators
    }

    pub fn timers(&self) -> Option<&ProxyTimers> {
        self.timers.as_ref()
    }

    pub fn is_reliable(&self) -> bool {
        self.data
            .as_ref()
            .is_some_and(|d| d.reliability == Reliability::Reliable)
    }

    pub fn expects_inline_qos(&self) -> bool {
        self.data.as_ref().is_some_and(|d| d.expects_inline_qos)
    }

    /// Readers that never send positive ACKs are acknowledged on send.
    pub fn acked_on_send(&self) -> bool {
        self.data
            .as_ref()
            .map_or(true, |d| {
                d.reliability == Reliability::BestEffort || d.disable_positive_acks
            })
    }

    pub fn changes_low_mark(&self) -> SequenceNumber {
        self.changes_low_mark
    }

    pub fn highest_sent(&self) -> SequenceNumber {
        self.highest_sent
    }

    pub(crate) fn set_highest_sent(&mut self, seq: SequenceNumber) {
        self.highest_sent = self.highest_sent.max(seq);
    }

    pub fn iter(&self) -> impl Iterator<Item = &ChangeForReader> + '_ {
        self.changes.iter()
    }

    pub(crate) fn iter_mut(&mut self) -> impl Iterator<Item = &mut ChangeForReader> + '_ {
        self.changes.iter_mut()
    }

    pub fn len(&self) -> usize {
        self.changes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }

    fn index_of(&self, seq: SequenceNumber) -> Option<usize> {
        self.changes
            .binary_search_by_key(&seq, ChangeForReader::sequence_number)
            .ok()
    }

    pub fn find_change(&self, seq: SequenceNumber) -> Option<&ChangeForReader> {
        self.index_of(seq).map(|i| &self.changes[i])
    }

    pub(crate) fn find_change_mut(&mut self, seq: SequenceNumber) -> Option<&mut ChangeForReader> {
        self.index_of(seq).map(move |i| &mut self.changes[i])
    }

    /// Track a new change. Changes at or below the low mark are implicitly
    /// acknowledged and not stored. Returns whether an entry was added.
    pub fn add_change(&mut self, change: Arc<CacheChange>) -> bool {
        let seq = change.sequence_number;
        if seq <= self.changes_low_mark {
            return false;
        }
        match self.changes.back() {
            Some(last) if last.sequence_number() >= seq => {
                if self.index_of(seq).is_some() {
                    return false;
                }
                let pos = self
                    .changes
                    .partition_point(|c| c.sequence_number() < seq);
                self.changes.insert(pos, ChangeForReader::new(change));
            }
            _ => self.changes.push_back(ChangeForReader::new(change)),
        }
        true
    }

    /// Forget a change the writer history dropped. Returns `true` if the
    /// reader had not acknowledged it yet.
    pub fn remove_change(&mut self, seq: SequenceNumber) -> bool {
        match self.index_of(seq) {
            Some(i) => {
                self.changes.remove(i);
                true
            }
            None => false,
        }
    }

    /// Status of `seq` for this reader; `None` if it is above the low mark
    /// and not tracked (i.e. irrelevant, announced by GAP).
    pub fn change_status(&self, seq: SequenceNumber) -> Option<ChangeForReaderStatus> {
        if seq <= self.changes_low_mark {
            return Some(ChangeForReaderStatus::Acknowledged);
        }
        self.find_change(seq).map(ChangeForReader::status)
    }

    /// Every change below `seq` is acknowledged.
    ///
    /// Monotonic: a `seq` at or below `low_mark + 1` changes nothing.
    /// Returns `true` if the low mark advanced.
    pub fn acked_changes_set(&mut self, seq: SequenceNumber) -> bool {
        let new_low = seq.saturating_sub(1);
        if new_low <= self.changes_low_mark {
            return false;
        }
        while self
            .changes
            .front()
            .is_some_and(|c| c.sequence_number() <= new_low)
        {
            self.changes.pop_front();
        }
        self.changes_low_mark = new_low;
        self.highest_sent = self.highest_sent.max(new_low);
        if self.gap_request_upto <= new_low {
            self.gap_request_from = 0;
            self.gap_request_upto = 0;
        }
        log::trace!("[PROXY] reader {} low_mark -> {}", self.guid(), new_low);
        true
    }

    /// Apply the request bitmap of an ACKNACK.
    ///
    /// UNACKNOWLEDGED (and, for pull-mode writers, UNSENT) entries become
    /// REQUESTED, whole change with every fragment. UNDERWAY entries are
    /// still inside the nack-suppression window and are left alone.
    /// Requested numbers without an entry, including numbers at or below
    /// the low mark that a late volatile reader asks for, are remembered so
    /// the next response sends a GAP for them.
    pub fn requested_changes_set(
        &mut self,
        sequences: impl IntoIterator<Item = SequenceNumber>,
        writer_last: SequenceNumber,
    ) -> NackOutcome {
        let mut outcome = NackOutcome::default();
        for seq in sequences {
            if seq > writer_last {
                break;
            }
            match self.find_change_mut(seq) {
                Some(cfr) => {
                    if matches!(
                        cfr.status(),
                        ChangeForReaderStatus::Unacknowledged | ChangeForReaderStatus::Unsent
                    ) {
                        cfr.set_status(ChangeForReaderStatus::Requested);
                        cfr.mark_all_fragments_unsent();
                        outcome.requested += 1;
                    }
                }
                None => {
                    outcome.missing += 1;
                    if self.gap_request_from == 0 || seq < self.gap_request_from {
                        self.gap_request_from = seq;
                    }
                    self.gap_request_upto = self.gap_request_upto.max(seq);
                }
            }
        }
        outcome
    }

    /// Apply a NACK_FRAG: queue the listed fragments of `seq`.
    ///
    /// Ignored when the change is already acknowledged, unknown, unfragmented
    /// or still UNDERWAY. Returns `true` if fragments were queued.
    pub fn requested_fragments_set(
        &mut self,
        seq: SequenceNumber,
        fragments: impl IntoIterator<Item = u32>,
    ) -> bool {
        if seq <= self.changes_low_mark {
            return false;
        }
        let Some(cfr) = self.find_change_mut(seq) else {
            return false;
        };
        if !cfr.change().is_fragmented() {
            return false;
        }
        match cfr.status() {
            ChangeForReaderStatus::Unacknowledged | ChangeForReaderStatus::Requested => {}
            _ => return false,
        }
        if cfr.mark_fragments_unsent(fragments) == 0 && !cfr.has_unsent_fragments() {
            return false;
        }
        cfr.set_status(ChangeForReaderStatus::Requested);
        true
    }

    /// Record a fragment as sent; returns `true` once every fragment went out.
    pub fn mark_fragment_as_sent_for_change(&mut self, seq: SequenceNumber, frag_num: u32) -> bool {
        self.find_change_mut(seq)
            .is_some_and(|cfr| cfr.mark_fragment_as_sent(frag_num))
    }

    /// Requested numbers without an entry, as inclusive ranges. Clears the
    /// pending request.
    pub(crate) fn take_requested_gaps(&mut self) -> Vec<(SequenceNumber, SequenceNumber)> {
        let from = std::mem::take(&mut self.gap_request_from);
        let upto = std::mem::take(&mut self.gap_request_upto);
        if from == 0 {
            return Vec::new();
        }
        let low_mark = self.changes_low_mark;
        let mut ranges = Vec::new();
        if from <= low_mark {
            ranges.push((from, low_mark.min(upto)));
        }
        if upto > low_mark {
            ranges.extend(self.missing_ranges(from.max(low_mark + 1), upto));
        }
        ranges
    }

    /// Inclusive ranges of numbers in `[from, to]` that have no entry.
    pub fn missing_ranges(
        &self,
        from: SequenceNumber,
        to: SequenceNumber,
    ) -> Vec<(SequenceNumber, SequenceNumber)> {
        let mut ranges = Vec::new();
        if from > to {
            return ranges;
        }
        let mut next = from;
        let start = self.changes.partition_point(|c| c.sequence_number() < from);
        for cfr in self.changes.range(start..) {
            let seq = cfr.sequence_number();
            if seq > to {
                break;
            }
            if seq > next {
                ranges.push((next, seq - 1));
            }
            next = seq + 1;
        }
        if next <= to {
            ranges.push((next, to));
        }
        ranges
    }

    /// Nack-suppression expiry: UNDERWAY entries become UNACKNOWLEDGED.
    pub fn underway_to_unacknowledged(&mut self) -> usize {
        let mut moved = 0;
        for cfr in self.changes.iter_mut() {
            if cfr.status() == ChangeForReaderStatus::Underway {
                cfr.set_status(ChangeForReaderStatus::Unacknowledged);
                moved += 1;
            }
        }
        moved
    }

    pub fn has_underway(&self) -> bool {
        self.changes
            .iter()
            .any(|c| c.status() == ChangeForReaderStatus::Underway)
    }

    pub fn has_pending(&self) -> bool {
        self.changes.iter().any(ChangeForReader::is_pending) || self.gap_request_from > 0
    }

    /// Accept `count` only if it is newer than every count seen so far.
    pub fn check_and_set_acknack_count(&mut self, count: u32) -> bool {
        if count > self.last_acknack_count {
            self.last_acknack_count = count;
            true
        } else {
            false
        }
    }

    pub fn check_and_set_nackfrag_count(&mut self, count: u32) -> bool {
        if count > self.last_nackfrag_count {
            self.last_nackfrag_count = count;
            true
        } else {
            false
        }
    }

    /// True when the reader still lacks something up to `writer_last`.
    pub fn has_unacknowledged(&self, writer_last: SequenceNumber) -> bool {
        self.changes_low_mark < writer_last
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rt::SerializedPayload;
    use crate::types::{ChangeKind, EntityId, GuidPrefix, InstanceHandle};

    fn change(seq: SequenceNumber) -> Arc<CacheChange> {
        Arc::new(CacheChange::new(
            ChangeKind::Alive,
            Guid::UNKNOWN,
            InstanceHandle::NIL,
            seq,
            SerializedPayload::unpooled(vec![0; 8]),
        ))
    }

    fn proxy_with(seqs: &[SequenceNumber]) -> ReaderProxy {
        let mut proxy = ReaderProxy::new(16);
        proxy.data = Some(ReaderProxyData::new(
            Guid::new(GuidPrefix([3; 12]), EntityId::reader(1, false)),
            vec![],
        ));
        proxy.active = true;
        for &s in seqs {
            proxy.add_change(change(s));
        }
        proxy
    }

    fn mark_sent(proxy: &mut ReaderProxy) {
        for cfr in proxy.iter_mut() {
            cfr.set_status(ChangeForReaderStatus::Unacknowledged);
        }
    }

    #[test]
    fn test_acked_changes_set_is_monotonic() {
        let mut proxy = proxy_with(&[1, 2, 3, 4]);
        assert!(proxy.acked_changes_set(3));
        assert_eq!(proxy.changes_low_mark(), 2);
        assert_eq!(proxy.len(), 2);
        assert!(!proxy.acked_changes_set(2));
        assert!(!proxy.acked_changes_set(3));
        assert_eq!(proxy.changes_low_mark(), 2);
        assert_eq!(proxy.change_status(1), Some(ChangeForReaderStatus::Acknowledged));
        assert!(proxy.acked_changes_set(5));
        assert!(proxy.is_empty());
    }

    #[test]
    fn test_acknack_count_replay_rejected() {
        let mut proxy = proxy_with(&[]);
        assert!(proxy.check_and_set_acknack_count(1));
        assert!(!proxy.check_and_set_acknack_count(1));
        assert!(proxy.check_and_set_acknack_count(5));
        assert!(!proxy.check_and_set_acknack_count(3));
        assert!(!proxy.check_and_set_acknack_count(5));
        assert!(proxy.check_and_set_nackfrag_count(1));
        assert!(!proxy.check_and_set_nackfrag_count(1));
    }

    #[test]
    fn test_requested_changes_skip_underway() {
        let mut proxy = proxy_with(&[1, 2, 3]);
        mark_sent(&mut proxy);
        proxy
            .find_change_mut(2)
            .expect("tracked")
            .set_status(ChangeForReaderStatus::Underway);
        let outcome = proxy.requested_changes_set([1, 2, 3], 3);
        assert_eq!(outcome.requested, 2);
        assert_eq!(proxy.change_status(2), Some(ChangeForReaderStatus::Underway));
        assert_eq!(proxy.change_status(3), Some(ChangeForReaderStatus::Requested));
    }

    #[test]
    fn test_missing_requests_become_gaps() {
        let mut proxy = proxy_with(&[1, 2, 3, 6, 7]);
        mark_sent(&mut proxy);
        let outcome = proxy.requested_changes_set(1..=7, 7);
        assert_eq!(outcome, NackOutcome { requested: 5, missing: 2 });
        assert_eq!(proxy.take_requested_gaps(), vec![(4, 5)]);
        assert!(proxy.take_requested_gaps().is_empty());
        assert_eq!(proxy.missing_ranges(1, 9), vec![(4, 5), (8, 9)]);
    }

    #[test]
    fn test_requests_below_low_mark_become_gaps() {
        let mut proxy = proxy_with(&[]);
        proxy.changes_low_mark = 10;
        proxy.add_change(change(11));
        let outcome = proxy.requested_changes_set(1..=11, 11);
        assert_eq!(outcome.missing, 10);
        assert_eq!(outcome.requested, 1);
        assert!(proxy.has_pending());
        assert_eq!(proxy.take_requested_gaps(), vec![(1, 10)]);
    }

    #[test]
    fn test_underway_expiry() {
        let mut proxy = proxy_with(&[1, 2]);
        for cfr in proxy.iter_mut() {
            cfr.set_status(ChangeForReaderStatus::Underway);
        }
        assert!(proxy.has_underway());
        assert_eq!(proxy.underway_to_unacknowledged(), 2);
        assert!(!proxy.has_underway());
    }

    #[test]
    fn test_add_change_below_low_mark_is_implicitly_acked() {
        let mut proxy = proxy_with(&[]);
        proxy.changes_low_mark = 5;
        assert!(!proxy.add_change(change(4)));
        assert!(proxy.add_change(change(7)));
        assert!(proxy.add_change(change(6)));
        let seqs: Vec<_> = proxy.iter().map(ChangeForReader::sequence_number).collect();
        assert_eq!(seqs, vec![6, 7]);
        assert!(proxy.remove_change(6));
        assert!(!proxy.remove_change(6));
        assert_eq!(proxy.change_status(6), None);
    }
}
