// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Base + bitmap sets carried by ACKNACK, GAP and NACK_FRAG.
//!
//! Both sets describe numbers in `[base, base + num_bits)`. Bit `i` of the
//! bitmap (MSB-first within each 32-bit word) stands for `base + i`. At most
//! 256 bits may be used.

use crate::config::MAX_BITMAP_BITS;
use crate::types::SequenceNumber;

const WORD_BITS: u32 = 32;
const BITMAP_WORDS: usize = (MAX_BITMAP_BITS / WORD_BITS) as usize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
struct Bitmap256 {
    num_bits: u32,
    words: [u32; BITMAP_WORDS],
}

impl Bitmap256 {
    fn from_words(num_bits: u32, words: &[u32]) -> Option<Self> {
        if num_bits > MAX_BITMAP_BITS || words.len() != word_count_for_bits(num_bits) {
            return None;
        }
        let mut bitmap = Self {
            num_bits,
            words: [0; BITMAP_WORDS],
        };
        bitmap.words[..words.len()].copy_from_slice(words);
        // bits past num_bits are meaningless on the wire; drop them
        for offset in num_bits..(words.len() as u32 * WORD_BITS) {
            bitmap.clear(offset);
        }
        Some(bitmap)
    }

    fn set(&mut self, offset: u32) -> bool {
        if offset >= MAX_BITMAP_BITS {
            return false;
        }
        let word = (offset / WORD_BITS) as usize;
        self.words[word] |= 1 << (31 - offset % WORD_BITS);
        self.num_bits = self.num_bits.max(offset + 1);
        true
    }

    fn clear(&mut self, offset: u32) {
        let word = (offset / WORD_BITS) as usize;
        if word < BITMAP_WORDS {
            self.words[word] &= !(1 << (31 - offset % WORD_BITS));
        }
    }

    fn get(&self, offset: u32) -> bool {
        if offset >= self.num_bits {
            return false;
        }
        let word = (offset / WORD_BITS) as usize;
        self.words[word] & (1 << (31 - offset % WORD_BITS)) != 0
    }

    fn offsets(&self) -> impl Iterator<Item = u32> + '_ {
        (0..self.num_bits).filter(move |&o| self.get(o))
    }

    fn words(&self) -> &[u32] {
        &self.words[..word_count_for_bits(self.num_bits)]
    }

    fn is_empty(&self) -> bool {
        self.words.iter().all(|&w| w == 0)
    }
}

/// Number of 32-bit words needed on the wire for `bits` bits.
pub fn word_count_for_bits(bits: u32) -> usize {
    bits.div_ceil(WORD_BITS) as usize
}

/// SequenceNumberSet of ACKNACK (`readerSNState`) and GAP (`gapList`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SequenceNumberSet {
    base: SequenceNumber,
    bitmap: Bitmap256,
}

impl SequenceNumberSet {
    pub fn empty(base: SequenceNumber) -> Self {
        Self {
            base,
            bitmap: Bitmap256::default(),
        }
    }

    /// Build from sequence numbers in `[base, base + 256)`; others are rejected.
    pub fn from_sequences(
        base: SequenceNumber,
        sequences: impl IntoIterator<Item = SequenceNumber>,
    ) -> Option<Self> {
        let mut set = Self::empty(base);
        for seq in sequences {
            if !set.insert(seq) {
                return None;
            }
        }
        Some(set)
    }

    /// Construct from wire fields (used by the decoder).
    pub fn from_raw(base: SequenceNumber, num_bits: u32, words: &[u32]) -> Option<Self> {
        Some(Self {
            base,
            bitmap: Bitmap256::from_words(num_bits, words)?,
        })
    }

    /// Add `seq`. Returns `false` when it falls outside the 256-bit window.
    pub fn insert(&mut self, seq: SequenceNumber) -> bool {
        if seq < self.base || seq - self.base >= u64::from(MAX_BITMAP_BITS) {
            return false;
        }
        self.bitmap.set((seq - self.base) as u32)
    }

    pub fn contains(&self, seq: SequenceNumber) -> bool {
        seq >= self.base
            && seq - self.base < u64::from(MAX_BITMAP_BITS)
            && self.bitmap.get((seq - self.base) as u32)
    }

    pub fn base(&self) -> SequenceNumber {
        self.base
    }

    pub fn num_bits(&self) -> u32 {
        self.bitmap.num_bits
    }

    pub fn words(&self) -> &[u32] {
        self.bitmap.words()
    }

    pub fn is_empty(&self) -> bool {
        self.bitmap.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = SequenceNumber> + '_ {
        self.bitmap.offsets().map(move |o| self.base + u64::from(o))
    }
}

/// FragmentNumberSet of NACK_FRAG (`fragmentNumberState`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FragmentNumberSet {
    base: u32,
    bitmap: Bitmap256,
}

impl FragmentNumberSet {
    pub fn empty(base: u32) -> Self {
        Self {
            base,
            bitmap: Bitmap256::default(),
        }
    }

    pub fn from_fragments(base: u32, fragments: impl IntoIterator<Item = u32>) -> Option<Self> {
        let mut set = Self::empty(base);
        for frag in fragments {
            if !set.insert(frag) {
                return None;
            }
        }
        Some(set)
    }

    pub fn from_raw(base: u32, num_bits: u32, words: &[u32]) -> Option<Self> {
        Some(Self {
            base,
            bitmap: Bitmap256::from_words(num_bits, words)?,
        })
    }

    pub fn insert(&mut self, frag: u32) -> bool {
        if frag < self.base {
            return false;
        }
        self.bitmap.set(frag - self.base)
    }

    pub fn contains(&self, frag: u32) -> bool {
        frag >= self.base && self.bitmap.get(frag - self.base)
    }

    pub fn base(&self) -> u32 {
        self.base
    }

    pub fn num_bits(&self) -> u32 {
        self.bitmap.num_bits
    }

    pub fn words(&self) -> &[u32] {
        self.bitmap.words()
    }

    pub fn is_empty(&self) -> bool {
        self.bitmap.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = u32> + '_ {
        self.bitmap.offsets().map(move |o| self.base + o)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_seqset_msb_first_layout() {
        let set = SequenceNumberSet::from_sequences(10, [10, 12, 41]).expect("in window");
        assert_eq!(set.num_bits(), 32);
        assert_eq!(set.words(), &[0xA000_0001]);
        assert_eq!(set.iter().collect::<Vec<_>>(), vec![10, 12, 41]);
    }

    #[test]
    fn test_seqset_window_limit() {
        let mut set = SequenceNumberSet::empty(1);
        assert!(set.insert(256));
        assert!(!set.insert(257));
        assert!(!set.insert(0));
        assert_eq!(set.num_bits(), 256);
        assert_eq!(set.words().len(), 8);
    }

    #[test]
    fn test_seqset_from_raw_rejects_bad_counts() {
        assert!(SequenceNumberSet::from_raw(1, 300, &[0; 8]).is_none());
        assert!(SequenceNumberSet::from_raw(1, 33, &[0]).is_none());
        let set = SequenceNumberSet::from_raw(1, 33, &[0, 0x8000_0000]).expect("valid");
        assert_eq!(set.iter().collect::<Vec<_>>(), vec![33]);
    }

    #[test]
    fn test_seqset_from_raw_masks_trailing_bits() {
        // num_bits = 2 but bit 5 set in the word
        let set = SequenceNumberSet::from_raw(100, 2, &[0xC400_0000]).expect("valid");
        assert_eq!(set.iter().collect::<Vec<_>>(), vec![100, 101]);
        assert!(!set.contains(105));
    }

    #[test]
    fn test_fragset_basic() {
        let set = FragmentNumberSet::from_fragments(3, [3, 6, 8]).expect("in window");
        assert_eq!(set.iter().collect::<Vec<_>>(), vec![3, 6, 8]);
        assert!(set.contains(6));
        assert!(!set.contains(4));
        assert_eq!(set.num_bits(), 6);
    }
}
