// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Recycling pool for serialized payload buffers.
//!
//! A [`SerializedPayload`] is an immutable, reference-counted view of a
//! buffer taken from a [`PayloadPool`]. The history slot, every
//! `ChangeForReader` of every reader proxy and any in-flight send all hold
//! clones of the same payload; the buffer goes back to its size class only
//! when the last clone is dropped.
//!
//! # Size classes
//!
//! Buffers are bucketed by power-of-two capacity from 64 B to 128 KB.
//! Larger payloads are allocated on demand and simply freed on release.

use parking_lot::Mutex;
use std::fmt;
use std::ops::Deref;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

const MIN_CLASS_SHIFT: u32 = 6; // 64 B
const MAX_CLASS_SHIFT: u32 = 17; // 128 KB
const CLASS_COUNT: usize = (MAX_CLASS_SHIFT - MIN_CLASS_SHIFT + 1) as usize;

/// Default number of idle buffers retained per size class.
pub const DEFAULT_MAX_FREE_PER_CLASS: usize = 64;

fn class_for(len: usize) -> Option<usize> {
    let cap = len.max(1).next_power_of_two();
    let shift = cap.trailing_zeros().max(MIN_CLASS_SHIFT);
    if shift > MAX_CLASS_SHIFT {
        return None;
    }
    Some((shift - MIN_CLASS_SHIFT) as usize)
}

fn class_capacity(class: usize) -> usize {
    1usize << (class as u32 + MIN_CLASS_SHIFT)
}

/// Snapshot of pool usage.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PoolStats {
    /// Buffers handed out over the pool lifetime.
    pub acquired: u64,
    /// Buffers served from a free list instead of a fresh allocation.
    pub reused: u64,
    /// Buffers currently referenced by at least one payload.
    pub outstanding: u64,
    /// Idle buffers waiting in free lists.
    pub free: usize,
}

/// Shared pool of payload buffers.
pub struct PayloadPool {
    free: [Mutex<Vec<Vec<u8>>>; CLASS_COUNT],
    max_free_per_class: usize,
    acquired: AtomicU64,
    reused: AtomicU64,
    outstanding: AtomicU64,
}

impl PayloadPool {
    pub fn new(max_free_per_class: usize) -> Arc<Self> {
        Arc::new(Self {
            free: std::array::from_fn(|_| Mutex::new(Vec::new())),
            max_free_per_class,
            acquired: AtomicU64::new(0),
            reused: AtomicU64::new(0),
            outstanding: AtomicU64::new(0),
        })
    }

    /// Take an empty buffer with at least `len` bytes of capacity.
    pub fn reserve(&self, len: usize) -> Vec<u8> {
        self.acquired.fetch_add(1, Ordering::Relaxed);
        let Some(class) = class_for(len) else {
            return Vec::with_capacity(len);
        };
        if let Some(mut buf) = self.free[class].lock().pop() {
            self.reused.fetch_add(1, Ordering::Relaxed);
            buf.clear();
            return buf;
        }
        Vec::with_capacity(class_capacity(class))
    }

    /// Freeze a filled buffer (usually obtained from [`reserve`](Self::reserve))
    /// into a shared payload owned by this pool.
    pub fn commit(self: &Arc<Self>, data: Vec<u8>) -> SerializedPayload {
        self.outstanding.fetch_add(1, Ordering::Relaxed);
        SerializedPayload {
            inner: Arc::new(PooledBuffer {
                data,
                pool: Arc::downgrade(self),
            }),
        }
    }

    /// Copy `bytes` into a pooled buffer.
    pub fn get_payload(self: &Arc<Self>, bytes: &[u8]) -> SerializedPayload {
        let mut buf = self.reserve(bytes.len());
        buf.extend_from_slice(bytes);
        self.commit(buf)
    }

    fn release(&self, buf: Vec<u8>) {
        self.outstanding.fetch_sub(1, Ordering::Relaxed);
        let Some(class) = class_for(buf.capacity()) else {
            return;
        };
        // only recycle buffers whose capacity really covers the class
        if buf.capacity() < class_capacity(class) {
            return;
        }
        let mut free = self.free[class].lock();
        if free.len() < self.max_free_per_class {
            free.push(buf);
        }
    }

    pub fn stats(&self) -> PoolStats {
        PoolStats {
            acquired: self.acquired.load(Ordering::Relaxed),
            reused: self.reused.load(Ordering::Relaxed),
            outstanding: self.outstanding.load(Ordering::Relaxed),
            free: self.free.iter().map(|f| f.lock().len()).sum(),
        }
    }
}

impl fmt::Debug for PayloadPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PayloadPool")
            .field("stats", &self.stats())
            .finish()
    }
}

struct PooledBuffer {
    data: Vec<u8>,
    pool: Weak<PayloadPool>,
}

impl Drop for PooledBuffer {
    fn drop(&mut self) {
        if let Some(pool) = self.pool.upgrade() {
            pool.release(std::mem::take(&mut self.data));
        }
    }
}

/// Immutable, cheaply clonable serialized payload.
#[derive(Clone)]
pub struct SerializedPayload {
    inner: Arc<PooledBuffer>,
}

impl SerializedPayload {
    /// Payload not backed by any pool (freed normally on drop).
    pub fn unpooled(data: Vec<u8>) -> Self {
        Self {
            inner: Arc::new(PooledBuffer {
                data,
                pool: Weak::new(),
            }),
        }
    }

    pub fn empty() -> Self {
        Self::unpooled(Vec::new())
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.inner.data
    }

    /// Number of live references to this buffer.
    pub fn ref_count(&self) -> usize {
        Arc::strong_count(&self.inner)
    }
}

impl Deref for SerializedPayload {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        &self.inner.data
    }
}

impl AsRef<[u8]> for SerializedPayload {
    fn as_ref(&self) -> &[u8] {
        &self.inner.data
    }
}

impl PartialEq for SerializedPayload {
    fn eq(&self, other: &Self) -> bool {
        self.as_slice() == other.as_slice()
    }
}

impl Eq for SerializedPayload {}

impl fmt::Debug for SerializedPayload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SerializedPayload({} bytes)", self.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pool_returns_buffer_on_last_drop() {
        let pool = PayloadPool::new(DEFAULT_MAX_FREE_PER_CLASS);
        let payload = pool.get_payload(&[1, 2, 3]);
        let clone = payload.clone();
        assert_eq!(payload.ref_count(), 2);
        assert_eq!(pool.stats().outstanding, 1);

        drop(payload);
        assert_eq!(pool.stats().free, 0, "still referenced by clone");
        drop(clone);
        let stats = pool.stats();
        assert_eq!(stats.outstanding, 0);
        assert_eq!(stats.free, 1);
    }

    #[test]
    fn test_pool_reuses_buffers() {
        let pool = PayloadPool::new(DEFAULT_MAX_FREE_PER_CLASS);
        drop(pool.get_payload(&[0u8; 100]));
        let again = pool.get_payload(&[9u8; 120]);
        assert_eq!(&again[..], &[9u8; 120][..]);
        assert_eq!(pool.stats().reused, 1);
    }

    #[test]
    fn test_pool_oversized_not_retained() {
        let pool = PayloadPool::new(DEFAULT_MAX_FREE_PER_CLASS);
        drop(pool.get_payload(&vec![0u8; 300_000]));
        assert_eq!(pool.stats().free, 0);
        assert_eq!(pool.stats().outstanding, 0);
    }

    #[test]
    fn test_pool_free_list_bounded() {
        let pool = PayloadPool::new(2);
        let held: Vec<_> = (0..5).map(|_| pool.get_payload(&[1u8; 10])).collect();
        drop(held);
        assert_eq!(pool.stats().free, 2);
    }

    #[test]
    fn test_unpooled_payload() {
        let p = SerializedPayload::unpooled(vec![4, 5]);
        assert_eq!(p.as_slice(), &[4, 5]);
        assert!(SerializedPayload::empty().is_empty());
    }
}
