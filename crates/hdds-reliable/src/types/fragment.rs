// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Per-fragment bookkeeping bitmap.
//!
//! Fragment numbers are 1-based as on the wire. The writer uses a bitmap of
//! fragments still to be sent for a given reader; the reader uses one for
//! fragments already received during reassembly.

/// Fixed-size bitset over fragment numbers `1..=len`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FragmentBitmap {
    words: Vec<u64>,
    len: u32,
    set: u32,
}

impl FragmentBitmap {
    /// Bitmap over `len` fragments with every bit cleared.
    pub fn new(len: u32) -> Self {
        Self {
            words: vec![0; (len as usize).div_ceil(64)],
            len,
            set: 0,
        }
    }

    /// Bitmap over `len` fragments with every bit set.
    pub fn full(len: u32) -> Self {
        let mut bitmap = Self::new(len);
        bitmap.set_all();
        bitmap
    }

    pub fn len(&self) -> u32 {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Number of set bits.
    pub fn count(&self) -> u32 {
        self.set
    }

    pub fn is_full(&self) -> bool {
        self.set == self.len
    }

    pub fn none_set(&self) -> bool {
        self.set == 0
    }

    fn slot(&self, frag_num: u32) -> Option<(usize, u64)> {
        if frag_num == 0 || frag_num > self.len {
            return None;
        }
        let idx = (frag_num - 1) as usize;
        Some((idx / 64, 1u64 << (idx % 64)))
    }

    pub fn contains(&self, frag_num: u32) -> bool {
        self.slot(frag_num)
            .is_some_and(|(word, mask)| self.words[word] & mask != 0)
    }

    /// Set one bit. Returns `true` if it was previously clear.
    pub fn insert(&mut self, frag_num: u32) -> bool {
        let Some((word, mask)) = self.slot(frag_num) else {
            return false;
        };
        if self.words[word] & mask != 0 {
            return false;
        }
        self.words[word] |= mask;
        self.set += 1;
        true
    }

    /// Clear one bit. Returns `true` if it was previously set.
    pub fn remove(&mut self, frag_num: u32) -> bool {
        let Some((word, mask)) = self.slot(frag_num) else {
            return false;
        };
        if self.words[word] & mask == 0 {
            return false;
        }
        self.words[word] &= !mask;
        self.set -= 1;
        true
    }

    pub fn set_all(&mut self) {
        for frag in 1..=self.len {
            self.insert(frag);
        }
    }

    pub fn clear(&mut self) {
        self.words.iter_mut().for_each(|w| *w = 0);
        self.set = 0;
    }

    /// Lowest set fragment number.
    pub fn first_set(&self) -> Option<u32> {
        self.iter_set().next()
    }

    /// Lowest clear fragment number.
    pub fn first_clear(&self) -> Option<u32> {
        self.iter_clear().next()
    }

    pub fn iter_set(&self) -> impl Iterator<Item = u32> + '_ {
        (1..=self.len).filter(move |&f| self.contains(f))
    }

    pub fn iter_clear(&self) -> impl Iterator<Item = u32> + '_ {
        (1..=self.len).filter(move |&f| !self.contains(f))
    }
}
