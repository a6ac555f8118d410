// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Reader-side history: duplicate rejection, KEEP_LAST eviction and the
//! application's `take`.

use std::sync::Arc;

use super::cache::HistoryCache;
use crate::qos::{History, QosProfile};
use crate::types::{CacheChange, Guid, SequenceNumber};
use crate::{Error, Result};

/// Outcome of [`ReaderHistory::add_change`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Admission {
    /// Stored, possibly after dropping the returned change.
    Stored(Option<Arc<CacheChange>>),
    /// Newer changes of the same writer already fill the instance.
    Superseded,
}

#[derive(Debug)]
pub struct ReaderHistory {
    cache: HistoryCache,
    history: History,
}

impl ReaderHistory {
    pub fn new(qos: &QosProfile) -> Self {
        Self {
            cache: HistoryCache::new(qos.resource_limits),
            history: qos.history,
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

    pub fn contains(&self, writer: &Guid, seq: SequenceNumber) -> bool {
        self.cache.contains(writer, seq)
    }

    /// Store a received change.
    ///
    /// KEEP_LAST makes room by dropping the oldest change of the instance
    /// (or the oldest overall when `max_samples` is reached). A change older
    /// than everything its writer has stored for a full instance is not
    /// stored at all. KEEP_ALL refuses the change when full, so the caller
    /// must not mark it received.
    pub fn add_change(&mut self, change: Arc<CacheChange>) -> Result<Admission> {
        if self.cache.contains(&change.writer_guid, change.sequence_number) {
            return Err(Error::DuplicateChange);
        }
        let mut evicted = None;
        if let History::KeepLast(depth) = self.history {
            let instance = change.instance_handle;
            let full_instance = self.cache.samples_of_instance(&instance) >= depth as usize;
            let victim = if full_instance {
                self.cache.iter().position(|c| c.instance_handle == instance)
            } else if self.cache.check_limits(&change).is_some() {
                (!self.cache.is_empty()).then_some(0)
            } else {
                None
            };
            if let Some(index) = victim {
                let superseded = self.cache.get(index).is_some_and(|oldest| {
                    full_instance
                        && oldest.writer_guid == change.writer_guid
                        && oldest.sequence_number > change.sequence_number
                });
                if superseded {
                    return Ok(Admission::Superseded);
                }
                evicted = self.cache.remove_change(index).map(|(c, _)| c);
            }
        }
        match self.cache.add_change(change) {
            Ok(_) => Ok(Admission::Stored(evicted)),
            Err(e) => {
                log::debug!("[HISTORY] reader history rejected change: {}", e);
                Err(e)
            }
        }
    }

    /// Number of stored changes the application may see now.
    pub fn visible_count(&self, visible: impl Fn(&CacheChange) -> bool) -> usize {
        self.cache.iter().filter(|c| visible(c)).count()
    }

    /// Remove and return up to `max` visible changes in per-writer order.
    pub fn take(
        &mut self,
        max: usize,
        visible: impl Fn(&CacheChange) -> bool,
    ) -> Vec<Arc<CacheChange>> {
        let mut taken = Vec::new();
        let mut index = 0;
        while taken.len() < max {
            let Some(change) = self.cache.get(index) else {
                break;
            };
            if !visible(change) {
                index += 1;
                continue;
            }
            match self.cache.remove_change(index) {
                Some((change, next)) => {
                    taken.push(change);
                    index = next;
                }
                None => break,
            }
        }
        taken
    }

    /// Drop the changes from `writer` above `delivered_upto` (writer
    /// unmatched before they became visible).
    pub fn remove_undelivered(&mut self, writer: &Guid, delivered_upto: SequenceNumber) -> usize {
        self.cache
            .remove_where(|c| c.writer_guid == *writer && c.sequence_number > delivered_upto)
            .len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::history::cache::tests::{change, guid};

    #[test]
    fn test_duplicate_is_rejected() {
        let mut h = ReaderHistory::new(&QosProfile::reliable(10));
        h.add_change(change(guid(1), 1, 0, 4)).expect("stored");
        assert!(matches!(
            h.add_change(change(guid(1), 1, 0, 4)),
            Err(Error::DuplicateChange)
        ));
        assert_eq!(h.len(), 1);
    }

    #[test]
    fn test_keep_last_drops_oldest_of_instance() {
        let mut h = ReaderHistory::new(&QosProfile::reliable(2));
        h.add_change(change(guid(1), 1, 7, 4)).expect("stored");
        h.add_change(change(guid(1), 2, 8, 4)).expect("stored");
        h.add_change(change(guid(1), 3, 7, 4)).expect("stored");
        let admission = h.add_change(change(guid(1), 4, 7, 4)).expect("stored");
        assert!(matches!(admission, Admission::Stored(Some(old)) if old.sequence_number == 1));
        let seqs: Vec<_> = h.take(10, |_| true).iter().map(|c| c.sequence_number).collect();
        assert_eq!(seqs, vec![2, 3, 4]);
    }

    #[test]
    fn test_keep_last_keeps_newest_when_older_arrives_late() {
        let mut h = ReaderHistory::new(&QosProfile::reliable(1));
        h.add_change(change(guid(1), 3, 7, 4)).expect("stored");
        assert_eq!(
            h.add_change(change(guid(1), 1, 7, 4)).expect("handled"),
            Admission::Superseded
        );
        // another writer's change still replaces the stored one
        let admission = h.add_change(change(guid(2), 1, 7, 4)).expect("stored");
        assert!(matches!(admission, Admission::Stored(Some(old)) if old.sequence_number == 3));
        let stored: Vec<_> = h
            .take(10, |_| true)
            .iter()
            .map(|c| (c.writer_guid, c.sequence_number))
            .collect();
        assert_eq!(stored, vec![(guid(2), 1)]);
    }

    #[test]
    fn test_keep_all_rejects_when_full() {
        let mut h = ReaderHistory::new(&QosProfile::reliable_keep_all(2));
        h.add_change(change(guid(1), 1, 0, 4)).expect("stored");
        h.add_change(change(guid(1), 2, 0, 4)).expect("stored");
        assert!(matches!(
            h.add_change(change(guid(1), 3, 0, 4)),
            Err(Error::ResourceLimitExceeded(_))
        ));
        assert!(!h.contains(&guid(1), 3));
    }

    #[test]
    fn test_take_respects_visibility() {
        let mut h = ReaderHistory::new(&QosProfile::reliable(10));
        for seq in [1, 2, 4] {
            h.add_change(change(guid(1), seq, 0, 4)).expect("stored");
        }
        let visible = |c: &CacheChange| c.sequence_number <= 2;
        assert_eq!(h.visible_count(visible), 2);
        let taken = h.take(1, visible);
        assert_eq!(taken[0].sequence_number, 1);
        let taken = h.take(10, visible);
        assert_eq!(taken.len(), 1);
        assert_eq!(h.len(), 1);
        assert_eq!(h.remove_undelivered(&guid(1), 3), 1);
    }
}
