// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Per-(change, reader) delivery state.

use std::sync::Arc;

use crate::types::{CacheChange, FragmentBitmap, SequenceNumber};

/// Delivery status of one change towards one reader.
///
/// ```text
/// UNSENT ──send──► UNDERWAY ──suppression expiry──► UNACKNOWLEDGED
///                     ▲                                  │
///                     └──────── resend ◄── REQUESTED ◄───┘ NACK
/// ```
///
/// ACKNOWLEDGED changes are not stored: everything at or below the proxy's
/// `changes_low_mark` is acknowledged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChangeForReaderStatus {
    Unsent,
    Unacknowledged,
    Requested,
    Underway,
    Acknowledged,
}

/// A change as seen by one reader proxy.
#[derive(Debug, Clone)]
pub struct ChangeForReader {
    change: Arc<CacheChange>,
    status: ChangeForReaderStatus,
    relevant: bool,
    /// Fragments still to (re)send; empty for unfragmented changes.
    unsent_fragments: FragmentBitmap,
}

impl ChangeForReader {
    pub fn new(change: Arc<CacheChange>) -> Self {
        let unsent_fragments = if change.is_fragmented() {
            FragmentBitmap::full(change.fragment_count())
        } else {
            FragmentBitmap::new(0)
        };
        Self {
            change,
            status: ChangeForReaderStatus::Unsent,
            relevant: true,
            unsent_fragments,
        }
    }

    pub fn sequence_number(&self) -> SequenceNumber {
        self.change.sequence_number
    }

    pub fn change(&self) -> &Arc<CacheChange> {
        &self.change
    }

    pub fn status(&self) -> ChangeForReaderStatus {
        self.status
    }

    pub fn set_status(&mut self, status: ChangeForReaderStatus) {
        self.status = status;
    }

    /// Always true until content filtering exists.
    pub fn is_relevant(&self) -> bool {
        self.relevant
    }

    /// Waiting for a (re)transmission.
    pub fn is_pending(&self) -> bool {
        matches!(
            self.status,
            ChangeForReaderStatus::Unsent | ChangeForReaderStatus::Requested
        )
    }

    pub fn unsent_fragments(&self) -> &FragmentBitmap {
        &self.unsent_fragments
    }

    pub fn has_unsent_fragments(&self) -> bool {
        !self.unsent_fragments.none_set()
    }

    /// Mark `frag_num` as sent. Returns `true` once no fragment is left unsent.
    pub fn mark_fragment_as_sent(&mut self, frag_num: u32) -> bool {
        self.unsent_fragments.remove(frag_num);
        !self.has_unsent_fragments()
    }

    /// Queue the given fragments for retransmission; numbers beyond the
    /// change's fragment count are ignored. Returns how many were queued.
    pub fn mark_fragments_unsent(&mut self, fragments: impl IntoIterator<Item = u32>) -> u32 {
        let mut queued = 0;
        for frag in fragments {
            if frag >= 1 && frag <= self.unsent_fragments.len() && self.unsent_fragments.insert(frag)
            {
                queued += 1;
            }
        }
        queued
    }

    /// Queue the whole change for retransmission.
    pub fn mark_all_fragments_unsent(&mut self) {
        self.unsent_fragments.set_all();
    }
}
