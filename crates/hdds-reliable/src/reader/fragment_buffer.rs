// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! DATA_FRAG reassembly.
//!
//! One pending sample per (writer, sequence number). The table is bounded:
//! when full, the least recently touched reassembly is dropped (the writer
//! will resend it after the next HEARTBEAT). Reassemblies idle for longer
//! than the timeout are purged, and so are those that fall below a writer
//! proxy's low mark after a GAP or HEARTBEAT.
//!
//! Fragments may arrive in any order and any number of times. The sample
//! buffer grows with the highest fragment received, up to a per-reader cap
//! on the announced sample size.

use std::num::NonZeroUsize;
use std::time::{Duration, Instant};

use lru::LruCache;

use crate::messages::{DataFrag, InlineQos};
use crate::types::{FragmentBitmap, Guid, SequenceNumber};

/// Hard ceiling on the per-reader sample size cap.
pub const MAX_SAMPLE_SIZE: u32 = 256 * 1024 * 1024;

type Key = (Guid, SequenceNumber);

#[derive(Debug)]
struct Reassembly {
    data: Vec<u8>,
    sample_size: usize,
    received: FragmentBitmap,
    fragment_size: u16,
    inline_qos: InlineQos,
    key_flag: bool,
    last_update: Instant,
}

impl Reassembly {
    fn new(frag: &DataFrag<'_>, now: Instant) -> Self {
        Self {
            data: Vec::new(),
            sample_size: frag.sample_size as usize,
            received: FragmentBitmap::new(frag.total_fragments()),
            fragment_size: frag.fragment_size,
            inline_qos: InlineQos::default(),
            key_flag: frag.key_flag,
            last_update: now,
        }
    }

    fn matches(&self, frag: &DataFrag<'_>) -> bool {
        self.fragment_size == frag.fragment_size && self.sample_size == frag.sample_size as usize
    }

    /// Copy every fragment carried by `frag`. Returns how many were new.
    fn apply(&mut self, frag: &DataFrag<'_>) -> u32 {
        let size = usize::from(self.fragment_size);
        let mut fresh = 0;
        for i in 0..u32::from(frag.fragments_in_submessage) {
            let num = frag.fragment_starting_num + i;
            if num > self.received.len() {
                break;
            }
            let offset = (num as usize - 1) * size;
            let len = size.min(self.sample_size - offset);
            let src_start = i as usize * size;
            let Some(src) = frag.payload.get(src_start..src_start + len) else {
                break;
            };
            if self.received.insert(num) {
                if self.data.len() < offset + len {
                    self.data.resize(offset + len, 0);
                }
                self.data[offset..offset + len].copy_from_slice(src);
                fresh += 1;
            }
        }
        if !frag.inline_qos.is_empty() {
            self.inline_qos = frag.inline_qos;
        }
        fresh
    }
}

/// A sample whose last missing fragment just arrived.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompletedSample {
    pub payload: Vec<u8>,
    pub inline_qos: InlineQos,
    pub key_flag: bool,
}

/// Outcome of [`FragmentBuffer::insert`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FragmentOutcome {
    /// Every fragment is present.
    Complete(CompletedSample),
    /// Stored; `n` fragments were new.
    Pending(u32),
    /// Inconsistent or oversized; nothing stored.
    Invalid,
}

pub struct FragmentBuffer {
    entries: LruCache<Key, Reassembly>,
    timeout: Duration,
    max_sample_size: u32,
    evicted: u64,
    expired: u64,
}

impl FragmentBuffer {
    pub fn new(capacity: usize, timeout: Duration, max_sample_size: u32) -> Self {
        Self {
            entries: LruCache::new(NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN)),
            timeout,
            max_sample_size: max_sample_size.min(MAX_SAMPLE_SIZE),
            evicted: 0,
            expired: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Reassemblies dropped because the table was full / timed out.
    pub fn dropped(&self) -> (u64, u64) {
        (self.evicted, self.expired)
    }

    pub fn insert(&mut self, writer: Guid, frag: &DataFrag<'_>, now: Instant) -> FragmentOutcome {
        if frag.sample_size == 0
            || frag.sample_size > self.max_sample_size
            || frag.fragment_size == 0
            || frag.fragment_starting_num == 0
            || frag.fragment_starting_num > frag.total_fragments()
        {
            return FragmentOutcome::Invalid;
        }
        let key = (writer, frag.writer_sn);
        let stale = self.entries.peek(&key).is_some_and(|r| !r.matches(frag));
        if stale {
            log::debug!(
                "[FRAG] {} seq={} changed geometry, restarting reassembly",
                writer,
                frag.writer_sn
            );
            self.entries.pop(&key);
        }
        if !self.entries.contains(&key) {
            if let Some(((old_writer, old_seq), _)) =
                self.entries.push(key, Reassembly::new(frag, now))
            {
                if (old_writer, old_seq) != key {
                    self.evicted += 1;
                    log::debug!(
                        "[FRAG] table full, dropped {} seq={}",
                        old_writer,
                        old_seq
                    );
                }
            }
        }
        let Some(entry) = self.entries.get_mut(&key) else {
            return FragmentOutcome::Invalid;
        };
        let fresh = entry.apply(frag);
        entry.last_update = now;
        if !entry.received.is_full() {
            return FragmentOutcome::Pending(fresh);
        }
        match self.entries.pop(&key) {
            Some(done) => FragmentOutcome::Complete(CompletedSample {
                payload: done.data,
                inline_qos: done.inline_qos,
                key_flag: done.key_flag,
            }),
            None => FragmentOutcome::Invalid,
        }
    }

    pub fn contains(&self, writer: &Guid, seq: SequenceNumber) -> bool {
        self.entries.contains(&(*writer, seq))
    }

    /// Missing fragment numbers of a pending reassembly, ascending.
    pub fn missing_fragments(&self, writer: &Guid, seq: SequenceNumber) -> Option<Vec<u32>> {
        self.entries
            .peek(&(*writer, seq))
            .map(|r| r.received.iter_clear().collect())
    }

    /// Sequence numbers of `writer` with a pending reassembly, ascending.
    pub fn pending_sequences(&self, writer: &Guid) -> Vec<SequenceNumber> {
        let mut seqs: Vec<_> = self
            .entries
            .iter()
            .filter(|((w, _), _)| w == writer)
            .map(|((_, seq), _)| *seq)
            .collect();
        seqs.sort_unstable();
        seqs
    }

    pub fn remove(&mut self, writer: &Guid, seq: SequenceNumber) -> bool {
        self.entries.pop(&(*writer, seq)).is_some()
    }

    /// Drop reassemblies of `writer` at or below `seq`.
    pub fn remove_up_to(&mut self, writer: &Guid, seq: SequenceNumber) -> usize {
        self.remove_matching(|(w, s)| w == writer && *s <= seq)
    }

    /// Drop reassemblies of `writer` in `first..=last`.
    pub fn remove_range(&mut self, writer: &Guid, first: SequenceNumber, last: SequenceNumber) -> usize {
        self.remove_matching(|(w, s)| w == writer && (first..=last).contains(s))
    }

    pub fn remove_writer(&mut self, writer: &Guid) -> usize {
        self.remove_matching(|(w, _)| w == writer)
    }

    /// Drop reassemblies idle for longer than the timeout.
    pub fn purge_expired(&mut self, now: Instant) -> usize {
        let timeout = self.timeout;
        let keys: Vec<Key> = self
            .entries
            .iter()
            .filter(|(_, r)| now.saturating_duration_since(r.last_update) >= timeout)
            .map(|(k, _)| *k)
            .collect();
        for key in &keys {
            self.entries.pop(key);
        }
        self.expired += keys.len() as u64;
        keys.len()
    }

    fn remove_matching(&mut self, pred: impl Fn(&Key) -> bool) -> usize {
        let keys: Vec<Key> = self
            .entries
            .iter()
            .map(|(k, _)| *k)
            .filter(|k| pred(k))
            .collect();
        for key in &keys {
            self.entries.pop(key);
        }
        keys.len()
    }
}

impl std::fmt::Debug for FragmentBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FragmentBuffer")
            .field("pending", &self.entries.len())
            .field("capacity", &self.entries.cap())
            .field("timeout", &self.timeout)
            .field("max_sample_size", &self.max_sample_size)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{EntityId, GuidPrefix};

    fn writer() -> Guid {
        Guid::new(GuidPrefix([3; 12]), EntityId::writer(1, false))
    }

    fn frag(seq: SequenceNumber, num: u32, sample: &[u8], size: u16) -> DataFrag<'_> {
        let start = (num as usize - 1) * usize::from(size);
        let end = (start + usize::from(size)).min(sample.len());
        DataFrag {
            reader_id: EntityId::UNKNOWN,
            writer_id: EntityId::writer(1, false),
            writer_sn: seq,
            fragment_starting_num: num,
            fragments_in_submessage: 1,
            fragment_size: size,
            sample_size: sample.len() as u32,
            inline_qos: InlineQos::default(),
            key_flag: false,
            payload: &sample[start..end],
        }
    }

    fn sample(len: usize) -> Vec<u8> {
        (0..len).map(|i| (i * 7) as u8).collect()
    }

    #[test]
    fn test_out_of_order_reassembly() {
        let data = sample(250);
        let mut buf = FragmentBuffer::new(4, Duration::from_secs(1), MAX_SAMPLE_SIZE);
        let now = Instant::now();
        assert_eq!(buf.insert(writer(), &frag(1, 3, &data, 100), now), FragmentOutcome::Pending(1));
        assert_eq!(buf.missing_fragments(&writer(), 1), Some(vec![1, 2]));
        assert_eq!(buf.insert(writer(), &frag(1, 1, &data, 100), now), FragmentOutcome::Pending(1));
        // duplicate fragment
        assert_eq!(buf.insert(writer(), &frag(1, 1, &data, 100), now), FragmentOutcome::Pending(0));
        match buf.insert(writer(), &frag(1, 2, &data, 100), now) {
            FragmentOutcome::Complete(done) => assert_eq!(done.payload, data),
            other => panic!("expected completion, got {other:?}"),
        }
        assert!(buf.is_empty());
    }

    #[test]
    fn test_lru_eviction_when_full() {
        let data = sample(300);
        let mut buf = FragmentBuffer::new(2, Duration::from_secs(1), MAX_SAMPLE_SIZE);
        let now = Instant::now();
        for seq in 1..=3 {
            buf.insert(writer(), &frag(seq, 1, &data, 100), now);
        }
        assert_eq!(buf.len(), 2);
        assert!(!buf.contains(&writer(), 1));
        assert_eq!(buf.pending_sequences(&writer()), vec![2, 3]);
        assert_eq!(buf.dropped().0, 1);
    }

    #[test]
    fn test_timeout_and_low_mark_purge() {
        let data = sample(300);
        let mut buf = FragmentBuffer::new(8, Duration::from_millis(10), MAX_SAMPLE_SIZE);
        let start = Instant::now();
        buf.insert(writer(), &frag(1, 1, &data, 100), start);
        buf.insert(writer(), &frag(2, 1, &data, 100), start + Duration::from_millis(8));
        buf.insert(writer(), &frag(3, 1, &data, 100), start + Duration::from_millis(8));
        assert_eq!(buf.purge_expired(start + Duration::from_millis(12)), 1);
        assert_eq!(buf.remove_up_to(&writer(), 2), 1);
        assert_eq!(buf.pending_sequences(&writer()), vec![3]);
    }

    #[test]
    fn test_rejects_inconsistent_fragment() {
        let data = sample(100);
        let mut buf = FragmentBuffer::new(8, Duration::from_secs(1), MAX_SAMPLE_SIZE);
        let mut bad = frag(1, 1, &data, 100);
        bad.fragment_starting_num = 5;
        assert_eq!(buf.insert(writer(), &bad, Instant::now()), FragmentOutcome::Invalid);
        assert!(buf.is_empty());
    }

    #[test]
    fn test_oversized_sample_is_rejected() {
        let data = sample(300);
        let mut buf = FragmentBuffer::new(8, Duration::from_secs(1), 256);
        assert_eq!(
            buf.insert(writer(), &frag(1, 1, &data, 100), Instant::now()),
            FragmentOutcome::Invalid
        );
        assert!(buf.is_empty());
    }

    #[test]
    fn test_buffer_grows_with_received_fragments() {
        let data = sample(1000);
        let mut buf = FragmentBuffer::new(8, Duration::from_secs(1), MAX_SAMPLE_SIZE);
        let now = Instant::now();
        buf.insert(writer(), &frag(1, 2, &data, 100), now);
        let held = buf.entries.peek(&(writer(), 1)).map(|r| r.data.len());
        assert_eq!(held, Some(200));
        for num in (1..=10).filter(|&n| n != 2) {
            let outcome = buf.insert(writer(), &frag(1, num, &data, 100), now);
            if let FragmentOutcome::Complete(done) = outcome {
                assert_eq!(done.payload, data);
            }
        }
        assert!(buf.is_empty());
    }
}
