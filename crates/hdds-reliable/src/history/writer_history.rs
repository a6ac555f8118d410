// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Writer-side history: sequence assignment, fragmentation decision and
//! eviction policy on top of [`HistoryCache`].

use std::sync::Arc;

use super::cache::{HistoryCache, LimitExceeded};
use crate::qos::{History, QosProfile};
use crate::rt::PayloadPool;
use crate::types::{
    CacheChange, ChangeKind, Guid, InstanceHandle, SeqNumGenerator, SequenceNumber,
};
use crate::{Error, Result};

/// Outcome of asking the history to make room for a new change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Room {
    /// The change fits as is.
    Ready,
    /// Remove this sequence first, then retry.
    Evict(SequenceNumber),
    /// KEEP_ALL is full of unacknowledged changes; wait for acknowledgments.
    Full,
    /// A limit no eviction can satisfy (e.g. max_instances).
    Rejected(LimitExceeded),
}

#[derive(Debug)]
pub struct WriterHistory {
    cache: HistoryCache,
    history: History,
    writer_guid: Guid,
    seq: SeqNumGenerator,
    pool: Arc<PayloadPool>,
    fragment_size: u16,
    max_unfragmented: usize,
}

impl WriterHistory {
    pub fn new(
        writer_guid: Guid,
        qos: &QosProfile,
        pool: Arc<PayloadPool>,
        fragment_size: u16,
        max_unfragmented: usize,
    ) -> Self {
        Self {
            cache: HistoryCache::new(qos.resource_limits),
            history: qos.history,
            writer_guid,
            seq: SeqNumGenerator::new(),
            pool,
            fragment_size,
            max_unfragmented,
        }
    }

    pub fn cache(&self) -> &HistoryCache {
        &self.cache
    }

    pub fn len(&self) -> usize {
        self.cache.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cache.is_empty()
    }

    /// Number the next change will receive.
    pub fn next_sequence(&self) -> SequenceNumber {
        self.seq.peek()
    }

    /// Highest sequence number ever assigned (0 before the first write).
    pub fn last_sequence(&self) -> SequenceNumber {
        self.seq.last()
    }

    /// Lowest stored sequence, or the next one when the history is empty.
    pub fn first_available(&self) -> SequenceNumber {
        self.cache
            .get_min_change_from(&self.writer_guid)
            .map(|c| c.sequence_number)
            .unwrap_or_else(|| self.seq.peek())
    }

    pub fn get_change(&self, seq: SequenceNumber) -> Option<&Arc<CacheChange>> {
        self.cache.get_change(&self.writer_guid, seq)
    }

    pub fn iter(&self) -> impl DoubleEndedIterator<Item = &Arc<CacheChange>> + '_ {
        self.cache.iter()
    }

    /// Build the next change without consuming its sequence number.
    pub fn new_change(
        &self,
        kind: ChangeKind,
        instance: InstanceHandle,
        payload: &[u8],
    ) -> CacheChange {
        let mut change = CacheChange::new(
            kind,
            self.writer_guid,
            instance,
            self.seq.peek(),
            self.pool.get_payload(payload),
        );
        if payload.len() > self.max_unfragmented {
            change.fragment_size = self.fragment_size;
        }
        change
    }

    /// Decide what must happen before `change` can be stored.
    ///
    /// KEEP_LAST replaces the oldest change of the same instance, preferring
    /// one already acknowledged. KEEP_ALL only ever evicts acknowledged
    /// changes and reports [`Room::Full`] otherwise.
    pub fn make_room(&self, change: &CacheChange, is_acked: impl Fn(SequenceNumber) -> bool) -> Room {
        let instance = change.instance_handle;
        let in_instance = |c: &&Arc<CacheChange>| c.instance_handle == instance;

        if let History::KeepLast(depth) = self.history {
            if self.cache.samples_of_instance(&instance) >= depth as usize {
                let candidate = self
                    .cache
                    .iter()
                    .filter(in_instance)
                    .find(|c| is_acked(c.sequence_number))
                    .or_else(|| self.cache.iter().find(in_instance));
                if let Some(c) = candidate {
                    return Room::Evict(c.sequence_number);
                }
            }
        }

        let limit = match self.cache.check_limits(change) {
            None => return Room::Ready,
            Some(limit) => limit,
        };
        let candidate = match limit {
            LimitExceeded::MaxInstances => return Room::Rejected(limit),
            LimitExceeded::MaxSamplesPerInstance => {
                let acked = self
                    .cache
                    .iter()
                    .filter(in_instance)
                    .find(|c| is_acked(c.sequence_number));
                match self.history {
                    History::KeepAll => acked,
                    History::KeepLast(_) => acked.or_else(|| self.cache.iter().find(in_instance)),
                }
            }
            LimitExceeded::MaxSamples | LimitExceeded::MaxQuotaBytes => {
                let acked = self.cache.iter().find(|c| is_acked(c.sequence_number));
                match self.history {
                    History::KeepAll => acked,
                    History::KeepLast(_) => acked.or_else(|| self.cache.iter().next()),
                }
            }
        };
        match candidate {
            Some(c) => Room::Evict(c.sequence_number),
            None => Room::Full,
        }
    }

    /// Store `change` and consume its sequence number.
    pub fn add_change(&mut self, change: CacheChange) -> Result<Arc<CacheChange>> {
        let seq = change.sequence_number;
        if seq != self.seq.peek() {
            return Err(Error::DuplicateChange);
        }
        let change = Arc::new(change);
        self.cache.add_change(Arc::clone(&change))?;
        self.seq.commit(seq);
        log::trace!("[HISTORY] {} stored seq={}", self.writer_guid, seq);
        Ok(change)
    }

    pub fn remove_change(&mut self, seq: SequenceNumber) -> Option<Arc<CacheChange>> {
        let removed = self.cache.remove_sequence(&self.writer_guid, seq);
        if removed.is_some() {
            log::trace!("[HISTORY] {} removed seq={}", self.writer_guid, seq);
        }
        removed
    }

    /// Drop every change up to and including `seq`.
    pub fn remove_up_to(&mut self, seq: SequenceNumber) -> Vec<Arc<CacheChange>> {
        self.cache.remove_where(|c| c.sequence_number <= seq)
    }
}
