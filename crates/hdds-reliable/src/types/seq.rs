// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Per-writer sequence number allocation.
//!
//! RTPS sequence numbers start at 1 and never repeat while the writer is
//! alive. Allocation is split in `peek` and `commit` so a write that fails
//! (history full, timeout) does not burn a number and leave a hole that
//! readers would have to be told about with a GAP.

use std::sync::atomic::{AtomicU64, Ordering};

/// Sequence number as used inside the crate (wire form is `i32` high + `u32` low).
pub type SequenceNumber = u64;

/// Sentinel meaning "no sequence number".
pub const SEQUENCE_NUMBER_UNKNOWN: SequenceNumber = 0;

#[derive(Debug)]
pub struct SeqNumGenerator {
    /// Next sequence number to assign (starts at 1).
    next: AtomicU64,
}

impl SeqNumGenerator {
    pub fn new() -> Self {
        Self {
            next: AtomicU64::new(1),
        }
    }

    /// Number the next committed change will receive.
    #[inline]
    pub fn peek(&self) -> SequenceNumber {
        self.next.load(Ordering::Acquire)
    }

    /// Consume `seq`; it must be the value returned by the last `peek`.
    #[inline]
    pub fn commit(&self, seq: SequenceNumber) {
        debug_assert_eq!(seq, self.peek());
        self.next.store(seq + 1, Ordering::Release);
    }

    /// Highest number handed out so far (0 before the first commit).
    #[inline]
    pub fn last(&self) -> SequenceNumber {
        self.peek() - 1
    }
}

impl Default for SeqNumGenerator {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generator_starts_at_one() {
        let gen = SeqNumGenerator::new();
        assert_eq!(gen.peek(), 1);
        assert_eq!(gen.last(), 0);
    }

    #[test]
    fn test_peek_without_commit_is_stable() {
        let gen = SeqNumGenerator::new();
        let a = gen.peek();
        assert_eq!(gen.peek(), a, "uncommitted peek must not consume");
        gen.commit(a);
        assert_eq!(gen.peek(), a + 1);
        assert_eq!(gen.last(), a);
    }
}
