// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Cache change: one immutable sample or lifecycle marker.

use super::guid::Guid;
use super::seq::SequenceNumber;
use super::time::Time;
use crate::rt::SerializedPayload;
use std::fmt;

/// Kind of a change (DDS instance lifecycle).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ChangeKind {
    #[default]
    Alive,
    NotAliveDisposed,
    NotAliveUnregistered,
    NotAliveDisposedUnregistered,
}

impl ChangeKind {
    const DISPOSED_FLAG: u32 = 0x01;
    const UNREGISTERED_FLAG: u32 = 0x02;

    /// Flags carried by PID_STATUS_INFO.
    pub fn status_info(self) -> u32 {
        match self {
            ChangeKind::Alive => 0,
            ChangeKind::NotAliveDisposed => Self::DISPOSED_FLAG,
            ChangeKind::NotAliveUnregistered => Self::UNREGISTERED_FLAG,
            ChangeKind::NotAliveDisposedUnregistered => {
                Self::DISPOSED_FLAG | Self::UNREGISTERED_FLAG
            }
        }
    }

    pub fn from_status_info(flags: u32) -> Self {
        let disposed = flags & Self::DISPOSED_FLAG != 0;
        let unregistered = flags & Self::UNREGISTERED_FLAG != 0;
        match (disposed, unregistered) {
            (false, false) => ChangeKind::Alive,
            (true, false) => ChangeKind::NotAliveDisposed,
            (false, true) => ChangeKind::NotAliveUnregistered,
            (true, true) => ChangeKind::NotAliveDisposedUnregistered,
        }
    }

    pub fn is_alive(self) -> bool {
        self == ChangeKind::Alive
    }
}

/// Instance handle: the 16-byte key hash of a keyed instance.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default, PartialOrd, Ord)]
pub struct InstanceHandle(pub [u8; 16]);

impl InstanceHandle {
    /// HANDLE_NIL, used by every change of an unkeyed topic.
    pub const NIL: InstanceHandle = InstanceHandle([0; 16]);

    pub fn is_nil(&self) -> bool {
        *self == Self::NIL
    }

    /// Convenience handle built from a small integer key (tests, demos).
    pub fn from_key(key: u64) -> Self {
        let mut bytes = [0u8; 16];
        bytes[8..].copy_from_slice(&key.to_be_bytes());
        InstanceHandle(bytes)
    }
}

impl fmt::Debug for InstanceHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_nil() {
            return write!(f, "InstanceHandle(NIL)");
        }
        write!(f, "InstanceHandle(")?;
        for b in self.0 {
            write!(f, "{:02x}", b)?;
        }
        write!(f, ")")
    }
}

/// One sample (or dispose/unregister marker) as stored by a history.
///
/// Shared as `Arc<CacheChange>` between the history and every proxy that
/// references it; never mutated after insertion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheChange {
    pub kind: ChangeKind,
    pub writer_guid: Guid,
    pub instance_handle: InstanceHandle,
    pub sequence_number: SequenceNumber,
    pub source_timestamp: Time,
    pub payload: SerializedPayload,
    /// Fragment size in bytes, 0 when the change is sent in a single DATA.
    pub fragment_size: u16,
}

impl CacheChange {
    pub fn new(
        kind: ChangeKind,
        writer_guid: Guid,
        instance_handle: InstanceHandle,
        sequence_number: SequenceNumber,
        payload: SerializedPayload,
    ) -> Self {
        Self {
            kind,
            writer_guid,
            instance_handle,
            sequence_number,
            source_timestamp: Time::now(),
            payload,
            fragment_size: 0,
        }
    }

    pub fn is_fragmented(&self) -> bool {
        self.fragment_size > 0
    }

    pub fn serialized_size(&self) -> usize {
        self.payload.len()
    }

    /// Total number of fragments (1 when not fragmented).
    pub fn fragment_count(&self) -> u32 {
        if !self.is_fragmented() {
            return 1;
        }
        let frag = usize::from(self.fragment_size);
        self.payload.len().div_ceil(frag).max(1) as u32
    }

    /// Bytes of fragment `frag_num` (1-based).
    pub fn fragment(&self, frag_num: u32) -> Option<&[u8]> {
        if !self.is_fragmented() || frag_num == 0 || frag_num > self.fragment_count() {
            return None;
        }
        let frag = usize::from(self.fragment_size);
        let start = (frag_num as usize - 1) * frag;
        let end = (start + frag).min(self.payload.len());
        Some(&self.payload[start..end])
    }
}
