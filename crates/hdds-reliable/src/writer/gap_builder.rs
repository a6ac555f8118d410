// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Coalesces irrelevant sequence numbers into as few GAP submessages as
//! possible.
//!
//! A GAP covers a contiguous run `[gap_start, gap_list.base)` plus a
//! 256-bit bitmap after it. Ranges must be added in ascending order.

use crate::config::MAX_BITMAP_BITS;
use crate::messages::{Gap, SequenceNumberSet};
use crate::types::{EntityId, SequenceNumber};

#[derive(Debug)]
pub struct GapBuilder {
    reader_id: EntityId,
    writer_id: EntityId,
    current: Option<(SequenceNumber, SequenceNumberSet)>,
    gaps: Vec<Gap>,
}

impl GapBuilder {
    pub fn new(reader_id: EntityId, writer_id: EntityId) -> Self {
        Self {
            reader_id,
            writer_id,
            current: None,
            gaps: Vec::new(),
        }
    }

    pub fn add(&mut self, seq: SequenceNumber) {
        self.add_range(seq, seq);
    }

    /// Add the inclusive range `[first, last]`.
    pub fn add_range(&mut self, first: SequenceNumber, last: SequenceNumber) {
        if first == 0 || first > last {
            return;
        }
        if let Some((_, list)) = self.current.as_mut() {
            if list.is_empty() && first == list.base() {
                *list = SequenceNumberSet::empty(last + 1);
                return;
            }
            if first >= list.base() && last - list.base() < u64::from(MAX_BITMAP_BITS) {
                for seq in first..=last {
                    list.insert(seq);
                }
                return;
            }
            self.flush();
        }
        self.current = Some((first, SequenceNumberSet::empty(last + 1)));
    }

    fn flush(&mut self) {
        if let Some((gap_start, gap_list)) = self.current.take() {
            self.gaps.push(Gap {
                reader_id: self.reader_id,
                writer_id: self.writer_id,
                gap_start,
                gap_list,
            });
        }
    }

    pub fn is_empty(&self) -> bool {
        self.current.is_none() && self.gaps.is_empty()
    }

    pub fn finish(mut self) -> Vec<Gap> {
        self.flush();
        self.gaps
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn builder() -> GapBuilder {
        GapBuilder::new(EntityId::reader(1, false), EntityId::writer(1, false))
    }

    fn irrelevant(gaps: &[Gap]) -> Vec<SequenceNumber> {
        gaps.iter().flat_map(|g| g.irrelevant().collect::<Vec<_>>()).collect()
    }

    #[test]
    fn test_contiguous_run_is_one_gap() {
        let mut b = builder();
        b.add_range(1, 1000);
        b.add(1001);
        let gaps = b.finish();
        assert_eq!(gaps.len(), 1);
        assert_eq!(gaps[0].contiguous(), 1..1002);
        assert!(gaps[0].gap_list.is_empty());
    }

    #[test]
    fn test_holes_use_bitmap() {
        let mut b = builder();
        b.add_range(4, 5);
        b.add(9);
        b.add(12);
        let gaps = b.finish();
        assert_eq!(gaps.len(), 1);
        assert_eq!(irrelevant(&gaps), vec![4, 5, 9, 12]);
    }

    #[test]
    fn test_far_apart_splits() {
        let mut b = builder();
        b.add(1);
        b.add(1000);
        let gaps = b.finish();
        assert_eq!(gaps.len(), 2);
        assert_eq!(irrelevant(&gaps), vec![1, 1000]);
    }

    #[test]
    fn test_empty_builder() {
        let b = builder();
        assert!(b.is_empty());
        assert!(b.finish().is_empty());
    }
}
