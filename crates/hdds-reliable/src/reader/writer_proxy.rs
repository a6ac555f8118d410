// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! WriterProxy - per-writer state of a stateful reader.
//!
//! Everything at or below `low_mark` is resolved: received, announced
//! irrelevant by GAP, or given up as lost. Above it, `resolved` holds the
//! numbers already settled out of order. A sequence is deliverable to the
//! application once it is at or below the low mark.

use std::collections::BTreeSet;

use crate::config::MAX_BITMAP_BITS;
use crate::events::TimedEvent;
use crate::qos::{Durability, Reliability};
use crate::transport::Locator;
use crate::types::{Guid, SequenceNumber};

/// Out-of-order GAP ranges wider than this are not recorded; they are
/// applied once the low mark reaches them.
pub const MAX_GAP_SPAN: u64 = 1 << 16;

/// Remote writer attributes supplied by discovery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriterProxyData {
    pub guid: Guid,
    pub unicast_locators: Vec<Locator>,
    pub reliability: Reliability,
    pub durability: Durability,
}

impl WriterProxyData {
    /// Reliable, volatile writer reachable at `locators`.
    pub fn new(guid: Guid, unicast_locators: Vec<Locator>) -> Self {
        Self {
            guid,
            unicast_locators,
            reliability: Reliability::Reliable,
            durability: Durability::Volatile,
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
}

/// Timers owned by an active writer proxy.
#[derive(Debug)]
pub struct WriterProxyTimers {
    pub heartbeat_response: TimedEvent,
    pub initial_acknack: TimedEvent,
}

impl WriterProxyTimers {
    fn cancel(&self) {
        self.heartbeat_response.cancel_timer();
        self.initial_acknack.cancel_timer();
    }
}

#[derive(Debug)]
pub struct WriterProxy {
    data: Option<WriterProxyData>,
    locators: Vec<Locator>,
    active: bool,
    generation: u64,
    low_mark: SequenceNumber,
    resolved: BTreeSet<SequenceNumber>,
    /// Highest sequence the writer announced (HEARTBEAT `lastSN`) or sent.
    max_available: SequenceNumber,
    /// Highest sequence handed to the listener.
    last_notified: SequenceNumber,
    heartbeat_seen: bool,
    last_heartbeat_count: u32,
    last_heartbeat_frag_count: u32,
    acknack_count: u32,
    nackfrag_count: u32,
    timers: Option<WriterProxyTimers>,
}

impl WriterProxy {
    /// Inactive slot.
    pub fn new() -> Self {
        Self {
            data: None,
            locators: Vec::new(),
            active: false,
            generation: 0,
            low_mark: 0,
            resolved: BTreeSet::new(),
            max_available: 0,
            last_notified: 0,
            heartbeat_seen: false,
            last_heartbeat_count: 0,
            last_heartbeat_frag_count: 0,
            acknack_count: 0,
            nackfrag_count: 0,
            timers: None,
        }
    }

    pub fn start(&mut self, data: WriterProxyData, locators: Vec<Locator>, timers: WriterProxyTimers) {
        self.data = Some(data);
        self.locators = locators;
        self.active = true;
        self.low_mark = 0;
        self.resolved.clear();
        self.max_available = 0;
        self.last_notified = 0;
        self.heartbeat_seen = false;
        self.last_heartbeat_count = 0;
        self.last_heartbeat_frag_count = 0;
        self.acknack_count = 0;
        self.nackfrag_count = 0;
        self.timers = Some(timers);
        log::debug!("[PROXY] writer {} started", self.guid());
    }

    /// Deactivate; cancels and releases every timer.
    pub fn stop(&mut self) {
        if let Some(timers) = self.timers.take() {
            timers.cancel();
        }
        self.active = false;
        self.generation += 1;
        self.resolved.clear();
        log::debug!("[PROXY] writer {} stopped", self.guid());
    }

    pub fn update(&mut self, data: WriterProxyData, locators: Vec<Locator>) {
        self.data = Some(data);
        self.locators = locators;
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn guid(&self) -> Guid {
        self.data.as_ref().map(|d| d.guid).unwrap_or(Guid::UNKNOWN)
    }

    pub fn data(&self) -> Option<&WriterProxyData> {
        self.data.as_ref()
    }

    pub fn locators(&self) -> &[Locator] {
        &self.locators
    }

    pub fn timers(&self) -> Option<&WriterProxyTimers> {
        self.timers.as_ref()
    }

    pub fn is_reliable(&self) -> bool {
        self.data
            .as_ref()
            .is_some_and(|d| d.reliability == Reliability::Reliable)
    }

    /// Highest sequence with every lower one resolved.
    pub fn available_changes_max(&self) -> SequenceNumber {
        self.low_mark
    }

    pub fn max_available(&self) -> SequenceNumber {
        self.max_available
    }

    pub fn last_notified(&self) -> SequenceNumber {
        self.last_notified
    }

    pub(crate) fn set_last_notified(&mut self, seq: SequenceNumber) {
        self.last_notified = self.last_notified.max(seq);
    }

    pub fn heartbeat_seen(&self) -> bool {
        self.heartbeat_seen
    }

    /// At or below the low mark, or settled out of order.
    pub fn is_resolved(&self, seq: SequenceNumber) -> bool {
        seq <= self.low_mark || self.resolved.contains(&seq)
    }

    /// Record a received change. Returns `false` for duplicates.
    pub fn received_change_set(&mut self, seq: SequenceNumber) -> bool {
        self.resolve(seq)
    }

    /// Record a sequence announced irrelevant by GAP. Returns `false` if it
    /// was already resolved.
    pub fn irrelevant_change_set(&mut self, seq: SequenceNumber) -> bool {
        self.resolve(seq)
    }

    /// Mark the whole range `[first, last]` irrelevant. Returns how many
    /// numbers were newly resolved.
    pub fn irrelevant_range_set(&mut self, first: SequenceNumber, last: SequenceNumber) -> u64 {
        if first > last || last <= self.low_mark {
            return 0;
        }
        let first = first.max(self.low_mark + 1);
        let already = self.resolved.range(first..=last).count() as u64;
        let fresh = last - first + 1 - already;
        if first == self.low_mark + 1 {
            self.low_mark = last;
            self.resolved = self.resolved.split_off(&(last + 1));
            self.advance();
        } else if last - first < MAX_GAP_SPAN {
            self.resolved.extend(first..=last);
        } else {
            log::debug!(
                "[PROXY] writer {} GAP [{}, {}] ahead of low mark {} ignored",
                self.guid(),
                first,
                last,
                self.low_mark
            );
            return 0;
        }
        self.max_available = self.max_available.max(last);
        fresh
    }

    fn resolve(&mut self, seq: SequenceNumber) -> bool {
        if seq == 0 || seq <= self.low_mark || !self.resolved.insert(seq) {
            return false;
        }
        self.max_available = self.max_available.max(seq);
        self.advance();
        true
    }

    fn advance(&mut self) {
        while self.resolved.remove(&(self.low_mark + 1)) {
            self.low_mark += 1;
        }
    }

    /// Give up on everything below `first`. Returns how many unresolved
    /// sequence numbers were lost.
    pub fn lost_changes_update(&mut self, first: SequenceNumber) -> u64 {
        if first <= self.low_mark + 1 {
            return 0;
        }
        let upto = first - 1;
        let settled = self.resolved.range(..=upto).count() as u64;
        let lost = upto - self.low_mark - settled;
        self.low_mark = upto;
        self.resolved = self.resolved.split_off(&first);
        self.advance();
        self.max_available = self.max_available.max(upto);
        lost
    }

    pub fn update_max_available(&mut self, last: SequenceNumber) {
        self.max_available = self.max_available.max(last);
    }

    /// Unresolved numbers in `(low_mark, max_available]`, at most one
    /// ACKNACK bitmap's worth.
    pub fn missing_changes(&self) -> Vec<SequenceNumber> {
        let first = self.low_mark + 1;
        let last = self
            .max_available
            .min(self.low_mark + u64::from(MAX_BITMAP_BITS));
        (first..=last)
            .filter(|seq| !self.resolved.contains(seq))
            .collect()
    }

    /// HEARTBEAT replay protection: accept strictly increasing counts.
    pub fn check_and_set_heartbeat_count(&mut self, count: u32) -> bool {
        if self.heartbeat_seen && count <= self.last_heartbeat_count {
            return false;
        }
        self.heartbeat_seen = true;
        self.last_heartbeat_count = count;
        true
    }

    pub fn check_and_set_heartbeat_frag_count(&mut self, count: u32) -> bool {
        if count <= self.last_heartbeat_frag_count {
            return false;
        }
        self.last_heartbeat_frag_count = count;
        true
    }

    pub(crate) fn next_acknack_count(&mut self) -> u32 {
        self.acknack_count = self.acknack_count.wrapping_add(1);
        self.acknack_count
    }

    pub(crate) fn next_nackfrag_count(&mut self) -> u32 {
        self.nackfrag_count = self.nackfrag_count.wrapping_add(1);
        self.nackfrag_count
    }
}

impl Default for WriterProxy {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{EntityId, GuidPrefix};

    fn proxy() -> WriterProxy {
        let mut p = WriterProxy::new();
        p.data = Some(WriterProxyData::new(
            Guid::new(GuidPrefix([5; 12]), EntityId::writer(1, false)),
            Vec::new(),
        ));
        p.active = true;
        p
    }

    #[test]
    fn test_out_of_order_reception_advances_low_mark() {
        let mut p = proxy();
        assert!(p.received_change_set(2));
        assert!(p.received_change_set(3));
        assert_eq!(p.available_changes_max(), 0);
        assert!(p.received_change_set(1));
        assert_eq!(p.available_changes_max(), 3);
        assert!(!p.received_change_set(2));
    }

    #[test]
    fn test_missing_changes_skip_resolved() {
        let mut p = proxy();
        p.received_change_set(1);
        p.received_change_set(3);
        p.irrelevant_change_set(5);
        p.update_max_available(6);
        assert_eq!(p.missing_changes(), vec![2, 4, 6]);
    }

    #[test]
    fn test_gap_range_applied_wholesale() {
        let mut p = proxy();
        p.received_change_set(3);
        assert_eq!(p.irrelevant_range_set(1, 100_000), 99_999);
        assert_eq!(p.available_changes_max(), 100_000);
        assert!(p.missing_changes().is_empty());
    }

    #[test]
    fn test_wide_gap_ahead_of_low_mark_is_deferred() {
        let mut p = proxy();
        assert_eq!(p.irrelevant_range_set(10, 10 + MAX_GAP_SPAN), 0);
        assert_eq!(p.irrelevant_range_set(10, 20), 11);
        assert_eq!(p.available_changes_max(), 0);
        assert!(p.received_change_set(1));
        assert_eq!(p.irrelevant_range_set(2, 9), 8);
        assert_eq!(p.available_changes_max(), 20);
    }

    #[test]
    fn test_lost_changes_update_counts_holes() {
        let mut p = proxy();
        p.received_change_set(1);
        p.received_change_set(4);
        p.received_change_set(7);
        assert_eq!(p.lost_changes_update(6), 3);
        assert_eq!(p.available_changes_max(), 5);
        assert!(p.received_change_set(6));
        assert_eq!(p.available_changes_max(), 7);
        assert_eq!(p.lost_changes_update(3), 0);
    }

    #[test]
    fn test_heartbeat_count_replay() {
        let mut p = proxy();
        assert!(p.check_and_set_heartbeat_count(0));
        assert!(!p.check_and_set_heartbeat_count(0));
        assert!(p.check_and_set_heartbeat_count(4));
        assert!(!p.check_and_set_heartbeat_count(3));
    }
}
