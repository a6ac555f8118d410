// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! RTPS submessage structures used by the reliability protocol.
//!
//! Payload-carrying submessages borrow their bytes from the datagram they
//! were decoded from (or from the cache change they are built from), so
//! decoding never copies user data.

use super::sets::{FragmentNumberSet, SequenceNumberSet};
use crate::types::{ChangeKind, EntityId, GuidPrefix, InstanceHandle, SequenceNumber, Time};

// =======================================================================
// Submessage ids and flags
// =======================================================================

pub const SUBMSG_ACKNACK: u8 = 0x06;
pub const SUBMSG_HEARTBEAT: u8 = 0x07;
pub const SUBMSG_GAP: u8 = 0x08;
pub const SUBMSG_INFO_TS: u8 = 0x09;
pub const SUBMSG_INFO_DST: u8 = 0x0e;
pub const SUBMSG_NACK_FRAG: u8 = 0x12;
pub const SUBMSG_HEARTBEAT_FRAG: u8 = 0x13;
pub const SUBMSG_DATA: u8 = 0x15;
pub const SUBMSG_DATA_FRAG: u8 = 0x16;

/// Endianness flag, common to every submessage (set = little endian).
pub const FLAG_ENDIANNESS: u8 = 0x01;
/// ACKNACK / HEARTBEAT final flag.
pub const FLAG_FINAL: u8 = 0x02;
/// HEARTBEAT liveliness flag.
pub const FLAG_LIVELINESS: u8 = 0x04;
/// INFO_TS invalidate flag.
pub const FLAG_INVALIDATE: u8 = 0x02;
/// DATA / DATA_FRAG inline QoS flag.
pub const FLAG_INLINE_QOS: u8 = 0x02;
/// DATA serialized data flag.
pub const FLAG_DATA: u8 = 0x04;
/// DATA serialized key flag.
pub const FLAG_DATA_KEY: u8 = 0x08;
/// DATA_FRAG serialized key flag.
pub const FLAG_DATA_FRAG_KEY: u8 = 0x04;

// =======================================================================
// Inline QoS parameter ids
// =======================================================================

pub const PID_SENTINEL: u16 = 0x0001;
pub const PID_KEY_HASH: u16 = 0x0070;
pub const PID_STATUS_INFO: u16 = 0x0071;

/// Inline QoS understood by the reliability core.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct InlineQos {
    pub key_hash: Option<InstanceHandle>,
    pub status_info: Option<u32>,
}

impl InlineQos {
    /// Inline QoS describing a change of `kind` for `instance`.
    pub fn for_change(kind: ChangeKind, instance: InstanceHandle) -> Self {
        Self {
            key_hash: (!instance.is_nil()).then_some(instance),
            status_info: (!kind.is_alive()).then_some(kind.status_info()),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.key_hash.is_none() && self.status_info.is_none()
    }

    pub fn change_kind(&self) -> ChangeKind {
        self.status_info
            .map(ChangeKind::from_status_info)
            .unwrap_or_default()
    }
}

// =======================================================================
// Submessages
// =======================================================================

/// ACKNACK: reader → writer, acknowledges everything below `reader_sn_state.base()`
/// and requests the sequences set in the bitmap.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AckNack {
    pub reader_id: EntityId,
    pub writer_id: EntityId,
    pub reader_sn_state: SequenceNumberSet,
    pub count: u32,
    pub final_flag: bool,
}

/// HEARTBEAT: writer → reader, announces the available range `[first_sn, last_sn]`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Heartbeat {
    pub reader_id: EntityId,
    pub writer_id: EntityId,
    pub first_sn: SequenceNumber,
    pub last_sn: SequenceNumber,
    pub count: u32,
    pub final_flag: bool,
    pub liveliness_flag: bool,
}

/// GAP: writer → reader, declares sequences irrelevant.
///
/// The irrelevant set is `[gap_start, gap_list.base() - 1]` plus every
/// sequence set in `gap_list`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Gap {
    pub reader_id: EntityId,
    pub writer_id: EntityId,
    pub gap_start: SequenceNumber,
    pub gap_list: SequenceNumberSet,
}

impl Gap {
    /// Contiguous part of the gap, `gap_start..gap_list.base()`.
    pub fn contiguous(&self) -> std::ops::Range<SequenceNumber> {
        self.gap_start..self.gap_list.base().max(self.gap_start)
    }

    /// Every irrelevant sequence number, ascending.
    ///
    /// The contiguous part may be large; prefer [`Gap::contiguous`] when
    /// ranges can be applied wholesale.
    pub fn irrelevant(&self) -> impl Iterator<Item = SequenceNumber> + '_ {
        self.contiguous().chain(self.gap_list.iter())
    }
}

/// INFO_TS: source timestamp for the following submessages (`None` = invalidated).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InfoTimestamp {
    pub timestamp: Option<Time>,
}

/// INFO_DST: following submessages are addressed to this participant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InfoDestination {
    pub guid_prefix: GuidPrefix,
}

/// NACK_FRAG: reader → writer, requests missing fragments of one change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NackFrag {
    pub reader_id: EntityId,
    pub writer_id: EntityId,
    pub writer_sn: SequenceNumber,
    pub fragment_number_state: FragmentNumberSet,
    pub count: u32,
}

/// HEARTBEAT_FRAG: writer → reader, fragments `1..=last_fragment_num` are available.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeartbeatFrag {
    pub reader_id: EntityId,
    pub writer_id: EntityId,
    pub writer_sn: SequenceNumber,
    pub last_fragment_num: u32,
    pub count: u32,
}

/// DATA: one complete change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Data<'a> {
    pub reader_id: EntityId,
    pub writer_id: EntityId,
    pub writer_sn: SequenceNumber,
    pub inline_qos: InlineQos,
    /// Payload is a serialized key rather than data (K flag).
    pub key_flag: bool,
    pub payload: &'a [u8],
}

/// DATA_FRAG: `fragments_in_submessage` consecutive fragments of one change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataFrag<'a> {
    pub reader_id: EntityId,
    pub writer_id: EntityId,
    pub writer_sn: SequenceNumber,
    pub fragment_starting_num: u32,
    pub fragments_in_submessage: u16,
    pub fragment_size: u16,
    pub sample_size: u32,
    pub inline_qos: InlineQos,
    pub key_flag: bool,
    pub payload: &'a [u8],
}

impl DataFrag<'_> {
    /// Total fragments making up the sample.
    pub fn total_fragments(&self) -> u32 {
        if self.fragment_size == 0 {
            return 0;
        }
        self.sample_size.div_ceil(u32::from(self.fragment_size))
    }
}

/// Any submessage the reliability core understands.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Submessage<'a> {
    AckNack(AckNack),
    Heartbeat(Heartbeat),
    Gap(Gap),
    InfoTs(InfoTimestamp),
    InfoDst(InfoDestination),
    NackFrag(NackFrag),
    HeartbeatFrag(HeartbeatFrag),
    Data(Data<'a>),
    DataFrag(DataFrag<'a>),
    /// Recognised framing, unknown or unsupported id (skipped by receivers).
    Unknown { id: u8 },
}

impl Submessage<'_> {
    pub fn id(&self) -> u8 {
        match self {
            Submessage::AckNack(_) => SUBMSG_ACKNACK,
            Submessage::Heartbeat(_) => SUBMSG_HEARTBEAT,
            Submessage::Gap(_) => SUBMSG_GAP,
            Submessage::InfoTs(_) => SUBMSG_INFO_TS,
            Submessage::InfoDst(_) => SUBMSG_INFO_DST,
            Submessage::NackFrag(_) => SUBMSG_NACK_FRAG,
            Submessage::HeartbeatFrag(_) => SUBMSG_HEARTBEAT_FRAG,
            Submessage::Data(_) => SUBMSG_DATA,
            Submessage::DataFrag(_) => SUBMSG_DATA_FRAG,
            Submessage::Unknown { id } => *id,
        }
    }
}
