// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! RTPS message encoding and lenient decoding.
//!
//! # Wire layout
//!
//! ```text
//! +------+---------+--------+-------------+   +----+-------+--------------------+------+
//! | RTPS | version | vendor | guid prefix |   | id | flags | octetsToNextHeader | body | ...
//! +------+---------+--------+-------------+   +----+-------+--------------------+------+
//!   4        2         2          12             1      1            2
//! ```
//!
//! Encoding always uses little endian (E flag set). Decoding honours the E
//! flag of each submessage. A malformed submessage is reported by the
//! iterator and skipped using its length field; when the length field itself
//! cannot be trusted, iteration stops. A bad header rejects the datagram.

use super::sets::{word_count_for_bits, FragmentNumberSet, SequenceNumberSet};
use super::submessages::*;
use crate::config::{
    MAX_BITMAP_BITS, RTPS_HEADER_LEN, RTPS_MAGIC, RTPS_VERSION, SUBMESSAGE_HEADER_LEN, VENDOR_ID,
};
use crate::types::{EntityId, GuidPrefix, InstanceHandle, SequenceNumber, Time};
use std::fmt;

/// Decoding failure: where and why.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DecodeError {
    pub offset: usize,
    pub reason: &'static str,
}

impl DecodeError {
    fn new(offset: usize, reason: &'static str) -> Self {
        Self { offset, reason }
    }
}

impl fmt::Display for DecodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} at offset {}", self.reason, self.offset)
    }
}

impl std::error::Error for DecodeError {}

// =======================================================================
// Header
// =======================================================================

/// RTPS message header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RtpsHeader {
    pub version: [u8; 2],
    pub vendor_id: [u8; 2],
    pub guid_prefix: GuidPrefix,
}

impl RtpsHeader {
    pub fn new(guid_prefix: GuidPrefix) -> Self {
        Self {
            version: RTPS_VERSION,
            vendor_id: VENDOR_ID,
            guid_prefix,
        }
    }

    pub fn encode(&self, buf: &mut Vec<u8>) {
        buf.extend_from_slice(&RTPS_MAGIC);
        buf.extend_from_slice(&self.version);
        buf.extend_from_slice(&self.vendor_id);
        buf.extend_from_slice(&self.guid_prefix.0);
    }

    pub fn decode(data: &[u8]) -> Result<Self, DecodeError> {
        if data.len() < RTPS_HEADER_LEN {
            return Err(DecodeError::new(0, "datagram shorter than RTPS header"));
        }
        if data[0..4] != RTPS_MAGIC {
            return Err(DecodeError::new(0, "bad protocol magic"));
        }
        if data[4] != RTPS_VERSION[0] {
            return Err(DecodeError::new(4, "unsupported major version"));
        }
        let mut prefix = [0u8; 12];
        prefix.copy_from_slice(&data[8..20]);
        Ok(Self {
            version: [data[4], data[5]],
            vendor_id: [data[6], data[7]],
            guid_prefix: GuidPrefix(prefix),
        })
    }
}

// =======================================================================
// Byte reader
// =======================================================================

/// Bounds-checked reader over one submessage body.
struct ByteReader<'a> {
    buf: &'a [u8],
    pos: usize,
    /// Offset of `buf` inside the datagram, for error reporting.
    base: usize,
    little_endian: bool,
}

macro_rules! impl_read {
    ($name:ident, $type:ty, $size:expr) => {
        fn $name(&mut self) -> Result<$type, DecodeError> {
            let bytes: [u8; $size] = self.array()?;
            Ok(if self.little_endian {
                <$type>::from_le_bytes(bytes)
            } else {
                <$type>::from_be_bytes(bytes)
            })
        }
    };
}

impl<'a> ByteReader<'a> {
    fn new(buf: &'a [u8], base: usize, little_endian: bool) -> Self {
        Self {
            buf,
            pos: 0,
            base,
            little_endian,
        }
    }

    fn err(&self, reason: &'static str) -> DecodeError {
        DecodeError::new(self.base + self.pos, reason)
    }

    fn bytes(&mut self, n: usize) -> Result<&'a [u8], DecodeError> {
        if self.remaining() < n {
            return Err(self.err("truncated submessage"));
        }
        let out = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        Ok(out)
    }

    fn array<const N: usize>(&mut self) -> Result<[u8; N], DecodeError> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.bytes(N)?);
        Ok(out)
    }

    fn remaining(&self) -> usize {
        self.buf.len().saturating_sub(self.pos)
    }

    fn rest(&mut self) -> &'a [u8] {
        let out = &self.buf[self.pos.min(self.buf.len())..];
        self.pos = self.buf.len();
        out
    }

    fn seek(&mut self, pos: usize) -> Result<(), DecodeError> {
        if pos > self.buf.len() {
            return Err(self.err("offset beyond submessage"));
        }
        self.pos = pos;
        Ok(())
    }

    impl_read!(u16, u16, 2);
    impl_read!(u32, u32, 4);
    impl_read!(i32, i32, 4);

    fn entity_id(&mut self) -> Result<EntityId, DecodeError> {
        Ok(EntityId(self.array()?))
    }

    fn sequence_number(&mut self) -> Result<SequenceNumber, DecodeError> {
        let high = self.i32()?;
        let low = self.u32()?;
        if high < 0 {
            return Err(self.err("negative sequence number"));
        }
        Ok(((high as u64) << 32) | u64::from(low))
    }

    fn bitmap_words(&mut self, num_bits: u32) -> Result<Vec<u32>, DecodeError> {
        if num_bits > MAX_BITMAP_BITS {
            return Err(self.err("bitmap larger than 256 bits"));
        }
        (0..word_count_for_bits(num_bits))
            .map(|_| self.u32())
            .collect()
    }

    fn sequence_number_set(&mut self) -> Result<SequenceNumberSet, DecodeError> {
        let base = self.sequence_number()?;
        let num_bits = self.u32()?;
        let words = self.bitmap_words(num_bits)?;
        SequenceNumberSet::from_raw(base, num_bits, &words)
            .ok_or_else(|| self.err("invalid SequenceNumberSet"))
    }

    fn fragment_number_set(&mut self) -> Result<FragmentNumberSet, DecodeError> {
        let base = self.u32()?;
        let num_bits = self.u32()?;
        let words = self.bitmap_words(num_bits)?;
        if base == 0 {
            return Err(self.err("fragment numbers start at 1"));
        }
        FragmentNumberSet::from_raw(base, num_bits, &words)
            .ok_or_else(|| self.err("invalid FragmentNumberSet"))
    }

    fn inline_qos(&mut self) -> Result<InlineQos, DecodeError> {
        let mut qos = InlineQos::default();
        loop {
            let pid = self.u16()?;
            let len = usize::from(self.u16()?);
            if pid == PID_SENTINEL {
                return Ok(qos);
            }
            let value = self.bytes(len)?;
            match pid {
                PID_KEY_HASH if len >= 16 => {
                    let mut hash = [0u8; 16];
                    hash.copy_from_slice(&value[..16]);
                    qos.key_hash = Some(InstanceHandle(hash));
                }
                // status info flags live in the last octet, always big endian
                PID_STATUS_INFO if len >= 4 => {
                    qos.status_info = Some(u32::from_be_bytes([
                        value[0], value[1], value[2], value[3],
                    ]));
                }
                _ => {}
            }
        }
    }
}

// =======================================================================
// Decoding
// =======================================================================

/// Decode the header and return an iterator over the submessages.
pub fn decode_message(data: &[u8]) -> Result<(RtpsHeader, SubmessageIter<'_>), DecodeError> {
    let header = RtpsHeader::decode(data)?;
    Ok((
        header,
        SubmessageIter {
            data,
            pos: RTPS_HEADER_LEN,
            done: false,
        },
    ))
}

/// Iterator over the submessages of one datagram.
pub struct SubmessageIter<'a> {
    data: &'a [u8],
    pos: usize,
    done: bool,
}

impl<'a> Iterator for SubmessageIter<'a> {
    type Item = Result<Submessage<'a>, DecodeError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done || self.pos >= self.data.len() {
            return None;
        }
        let start = self.pos;
        if self.data.len() - start < SUBMESSAGE_HEADER_LEN {
            self.done = true;
            return Some(Err(DecodeError::new(start, "truncated submessage header")));
        }
        let id = self.data[start];
        let flags = self.data[start + 1];
        let little_endian = flags & FLAG_ENDIANNESS != 0;
        let len_bytes = [self.data[start + 2], self.data[start + 3]];
        let declared = if little_endian {
            u16::from_le_bytes(len_bytes)
        } else {
            u16::from_be_bytes(len_bytes)
        } as usize;
        let body_start = start + SUBMESSAGE_HEADER_LEN;
        let available = self.data.len() - body_start;

        let body_len = if declared == 0 && id != SUBMSG_INFO_TS {
            // last submessage: extends to the end of the datagram
            available
        } else if declared > available {
            self.done = true;
            return Some(Err(DecodeError::new(start, "submessage length exceeds datagram")));
        } else {
            declared
        };
        self.pos = body_start + body_len;

        let body = &self.data[body_start..body_start + body_len];
        let mut reader = ByteReader::new(body, body_start, little_endian);
        Some(decode_body(id, flags, &mut reader))
    }
}

fn decode_body<'a>(
    id: u8,
    flags: u8,
    r: &mut ByteReader<'a>,
) -> Result<Submessage<'a>, DecodeError> {
    let sub = match id {
        SUBMSG_ACKNACK => Submessage::AckNack(AckNack {
            reader_id: r.entity_id()?,
            writer_id: r.entity_id()?,
            reader_sn_state: r.sequence_number_set()?,
            count: r.u32()?,
            final_flag: flags & FLAG_FINAL != 0,
        }),
        SUBMSG_HEARTBEAT => {
            let hb = Heartbeat {
                reader_id: r.entity_id()?,
                writer_id: r.entity_id()?,
                first_sn: r.sequence_number()?,
                last_sn: r.sequence_number()?,
                count: r.u32()?,
                final_flag: flags & FLAG_FINAL != 0,
                liveliness_flag: flags & FLAG_LIVELINESS != 0,
            };
            if hb.first_sn == 0 || hb.last_sn + 1 < hb.first_sn {
                return Err(r.err("inconsistent HEARTBEAT range"));
            }
            Submessage::Heartbeat(hb)
        }
        SUBMSG_GAP => {
            let gap = Gap {
                reader_id: r.entity_id()?,
                writer_id: r.entity_id()?,
                gap_start: r.sequence_number()?,
                gap_list: r.sequence_number_set()?,
            };
            if gap.gap_start == 0 || gap.gap_list.base() < gap.gap_start {
                return Err(r.err("inconsistent GAP range"));
            }
            Submessage::Gap(gap)
        }
        SUBMSG_INFO_TS => {
            let timestamp = if flags & FLAG_INVALIDATE != 0 {
                None
            } else {
                Some(Time {
                    seconds: r.i32()?,
                    fraction: r.u32()?,
                })
            };
            Submessage::InfoTs(InfoTimestamp { timestamp })
        }
        SUBMSG_INFO_DST => Submessage::InfoDst(InfoDestination {
            guid_prefix: GuidPrefix(r.array()?),
        }),
        SUBMSG_NACK_FRAG => Submessage::NackFrag(NackFrag {
            reader_id: r.entity_id()?,
            writer_id: r.entity_id()?,
            writer_sn: r.sequence_number()?,
            fragment_number_state: r.fragment_number_set()?,
            count: r.u32()?,
        }),
        SUBMSG_HEARTBEAT_FRAG => Submessage::HeartbeatFrag(HeartbeatFrag {
            reader_id: r.entity_id()?,
            writer_id: r.entity_id()?,
            writer_sn: r.sequence_number()?,
            last_fragment_num: r.u32()?,
            count: r.u32()?,
        }),
        SUBMSG_DATA => decode_data(flags, r)?,
        SUBMSG_DATA_FRAG => decode_data_frag(flags, r)?,
        other => Submessage::Unknown { id: other },
    };
    Ok(sub)
}

fn decode_data<'a>(flags: u8, r: &mut ByteReader<'a>) -> Result<Submessage<'a>, DecodeError> {
    let _extra_flags = r.u16()?;
    let octets_to_inline_qos = usize::from(r.u16()?);
    let reader_id = r.entity_id()?;
    let writer_id = r.entity_id()?;
    let writer_sn = r.sequence_number()?;
    if writer_sn == 0 {
        return Err(r.err("DATA with sequence number 0"));
    }
    // octetsToInlineQos counts from the end of its own field (offset 4)
    r.seek(4 + octets_to_inline_qos)?;
    let inline_qos = if flags & FLAG_INLINE_QOS != 0 {
        r.inline_qos()?
    } else {
        InlineQos::default()
    };
    let has_payload = flags & (FLAG_DATA | FLAG_DATA_KEY) != 0;
    let payload = if has_payload { r.rest() } else { &[] };
    Ok(Submessage::Data(Data {
        reader_id,
        writer_id,
        writer_sn,
        inline_qos,
        key_flag: flags & FLAG_DATA_KEY != 0,
        payload,
    }))
}

fn decode_data_frag<'a>(flags: u8, r: &mut ByteReader<'a>) -> Result<Submessage<'a>, DecodeError> {
    let _extra_flags = r.u16()?;
    let octets_to_inline_qos = usize::from(r.u16()?);
    let reader_id = r.entity_id()?;
    let writer_id = r.entity_id()?;
    let writer_sn = r.sequence_number()?;
    let fragment_starting_num = r.u32()?;
    let fragments_in_submessage = r.u16()?;
    let fragment_size = r.u16()?;
    let sample_size = r.u32()?;
    if writer_sn == 0 || fragment_starting_num == 0 || fragment_size == 0 {
        return Err(r.err("invalid DATA_FRAG numbering"));
    }
    r.seek(4 + octets_to_inline_qos)?;
    let inline_qos = if flags & FLAG_INLINE_QOS != 0 {
        r.inline_qos()?
    } else {
        InlineQos::default()
    };

    let mut frag = DataFrag {
        reader_id,
        writer_id,
        writer_sn,
        fragment_starting_num,
        fragments_in_submessage,
        fragment_size,
        sample_size,
        inline_qos,
        key_flag: flags & FLAG_DATA_FRAG_KEY != 0,
        payload: &[],
    };
    let total = frag.total_fragments();
    let last = fragment_starting_num
        .checked_add(u32::from(fragments_in_submessage))
        .map(|end| end - 1)
        .ok_or_else(|| r.err("fragment number overflow"))?;
    if fragments_in_submessage == 0 || last > total {
        return Err(r.err("fragment range beyond sample size"));
    }
    // exact length: padding after the last fragment is not part of the sample
    let start_offset = (fragment_starting_num as usize - 1) * usize::from(fragment_size);
    let end_offset = (last as usize * usize::from(fragment_size)).min(sample_size as usize);
    frag.payload = r.bytes(end_offset - start_offset)?;
    Ok(Submessage::DataFrag(frag))
}

// =======================================================================
// Encoding
// =======================================================================

fn put_u16(buf: &mut Vec<u8>, v: u16) {
    buf.extend_from_slice(&v.to_le_bytes());
}

fn put_u32(buf: &mut Vec<u8>, v: u32) {
    buf.extend_from_slice(&v.to_le_bytes());
}

fn put_sn(buf: &mut Vec<u8>, seq: SequenceNumber) {
    buf.extend_from_slice(&((seq >> 32) as i32).to_le_bytes());
    put_u32(buf, seq as u32);
}

fn put_sn_set(buf: &mut Vec<u8>, set: &SequenceNumberSet) {
    put_sn(buf, set.base());
    put_u32(buf, set.num_bits());
    set.words().iter().for_each(|&w| put_u32(buf, w));
}

fn put_fn_set(buf: &mut Vec<u8>, set: &FragmentNumberSet) {
    put_u32(buf, set.base());
    put_u32(buf, set.num_bits());
    set.words().iter().for_each(|&w| put_u32(buf, w));
}

fn put_inline_qos(buf: &mut Vec<u8>, qos: &InlineQos) {
    if let Some(hash) = qos.key_hash {
        put_u16(buf, PID_KEY_HASH);
        put_u16(buf, 16);
        buf.extend_from_slice(&hash.0);
    }
    if let Some(status) = qos.status_info {
        put_u16(buf, PID_STATUS_INFO);
        put_u16(buf, 4);
        buf.extend_from_slice(&status.to_be_bytes());
    }
    put_u16(buf, PID_SENTINEL);
    put_u16(buf, 0);
}

/// Whether an encoded submessage must be the last one of its datagram.
///
/// A DATA whose payload is not a multiple of 4 bytes is written without
/// trailing padding and with `octetsToNextHeader = 0`, so the receiver can
/// recover the exact payload length.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Placement {
    Any,
    Last,
}

/// Append one submessage (little endian) to `buf`.
pub fn encode_submessage(buf: &mut Vec<u8>, sub: &Submessage<'_>) -> Placement {
    let start = buf.len();
    buf.extend_from_slice(&[sub.id(), FLAG_ENDIANNESS, 0, 0]);
    let mut flags = FLAG_ENDIANNESS;
    let mut placement = Placement::Any;

    match sub {
        Submessage::AckNack(a) => {
            if a.final_flag {
                flags |= FLAG_FINAL;
            }
            buf.extend_from_slice(&a.reader_id.0);
            buf.extend_from_slice(&a.writer_id.0);
            put_sn_set(buf, &a.reader_sn_state);
            put_u32(buf, a.count);
        }
        Submessage::Heartbeat(h) => {
            if h.final_flag {
                flags |= FLAG_FINAL;
            }
            if h.liveliness_flag {
                flags |= FLAG_LIVELINESS;
            }
            buf.extend_from_slice(&h.reader_id.0);
            buf.extend_from_slice(&h.writer_id.0);
            put_sn(buf, h.first_sn);
            put_sn(buf, h.last_sn);
            put_u32(buf, h.count);
        }
        Submessage::Gap(g) => {
            buf.extend_from_slice(&g.reader_id.0);
            buf.extend_from_slice(&g.writer_id.0);
            put_sn(buf, g.gap_start);
            put_sn_set(buf, &g.gap_list);
        }
        Submessage::InfoTs(ts) => match ts.timestamp {
            Some(t) => {
                buf.extend_from_slice(&t.seconds.to_le_bytes());
                put_u32(buf, t.fraction);
            }
            None => flags |= FLAG_INVALIDATE,
        },
        Submessage::InfoDst(dst) => buf.extend_from_slice(&dst.guid_prefix.0),
        Submessage::NackFrag(n) => {
            buf.extend_from_slice(&n.reader_id.0);
            buf.extend_from_slice(&n.writer_id.0);
            put_sn(buf, n.writer_sn);
            put_fn_set(buf, &n.fragment_number_state);
            put_u32(buf, n.count);
        }
        Submessage::HeartbeatFrag(h) => {
            buf.extend_from_slice(&h.reader_id.0);
            buf.extend_from_slice(&h.writer_id.0);
            put_sn(buf, h.writer_sn);
            put_u32(buf, h.last_fragment_num);
            put_u32(buf, h.count);
        }
        Submessage::Data(d) => {
            if !d.inline_qos.is_empty() {
                flags |= FLAG_INLINE_QOS;
            }
            if !d.payload.is_empty() {
                flags |= if d.key_flag { FLAG_DATA_KEY } else { FLAG_DATA };
            }
            put_u16(buf, 0);
            put_u16(buf, 16);
            buf.extend_from_slice(&d.reader_id.0);
            buf.extend_from_slice(&d.writer_id.0);
            put_sn(buf, d.writer_sn);
            if !d.inline_qos.is_empty() {
                put_inline_qos(buf, &d.inline_qos);
            }
            buf.extend_from_slice(d.payload);
            if d.payload.len() % 4 != 0 {
                placement = Placement::Last;
            }
        }
        Submessage::DataFrag(d) => {
            if !d.inline_qos.is_empty() {
                flags |= FLAG_INLINE_QOS;
            }
            if d.key_flag {
                flags |= FLAG_DATA_FRAG_KEY;
            }
            put_u16(buf, 0);
            put_u16(buf, 28);
            buf.extend_from_slice(&d.reader_id.0);
            buf.extend_from_slice(&d.writer_id.0);
            put_sn(buf, d.writer_sn);
            put_u32(buf, d.fragment_starting_num);
            put_u16(buf, d.fragments_in_submessage);
            put_u16(buf, d.fragment_size);
            put_u32(buf, d.sample_size);
            if !d.inline_qos.is_empty() {
                put_inline_qos(buf, &d.inline_qos);
            }
            buf.extend_from_slice(d.payload);
        }
        Submessage::Unknown { .. } => {}
    }

    if placement == Placement::Any {
        while (buf.len() - start) % 4 != 0 {
            buf.push(0);
        }
    }
    let body_len = buf.len() - start - SUBMESSAGE_HEADER_LEN;
    let octets = match placement {
        Placement::Last => 0,
        // bodies above u16::MAX only occur for DATA, which the builder never emits that large
        Placement::Any => u16::try_from(body_len).unwrap_or(0),
    };
    buf[start + 1] = flags;
    buf[start + 2..start + 4].copy_from_slice(&octets.to_le_bytes());
    if octets == 0 && body_len > 0 {
        placement = Placement::Last;
    }
    placement
}

/// Encode a whole message (header plus submessages) into one buffer.
pub fn encode_message(header: &RtpsHeader, submessages: &[Submessage<'_>]) -> Vec<u8> {
    let mut buf = Vec::with_capacity(128);
    header.encode(&mut buf);
    for sub in submessages {
        encode_submessage(&mut buf, sub);
    }
    buf
}

#[cfg(test)]
mod tests {
    use super::*;

    fn prefix() -> GuidPrefix {
        GuidPrefix([1, 2, 3, 4, 5, 6, 7, 8, 9, 10, 11, 12])
    }

    fn writer_id() -> EntityId {
        EntityId::writer(1, false)
    }

    fn reader_id() -> EntityId {
        EntityId::reader(1, false)
    }

    fn decode_all(bytes: &[u8]) -> Vec<Result<Submessage<'_>, DecodeError>> {
        let (_, iter) = decode_message(bytes).expect("valid header");
        iter.collect()
    }

    #[test]
    fn test_header_layout() {
        let mut buf = Vec::new();
        RtpsHeader::new(prefix()).encode(&mut buf);
        assert_eq!(&buf[0..4], b"RTPS");
        assert_eq!(&buf[4..6], &[2, 4]);
        assert_eq!(&buf[6..8], &[0x01, 0xAA]);
        assert_eq!(buf.len(), RTPS_HEADER_LEN);
        assert_eq!(RtpsHeader::decode(&buf).expect("decodes").guid_prefix, prefix());
    }

    #[test]
    fn test_header_rejects_bad_magic() {
        let mut buf = Vec::new();
        RtpsHeader::new(prefix()).encode(&mut buf);
        buf[0] = b'X';
        assert!(RtpsHeader::decode(&buf).is_err());
        assert!(RtpsHeader::decode(&buf[..10]).is_err());
    }

    #[test]
    fn test_acknack_wire_bytes() {
        let ack = Submessage::AckNack(AckNack {
            reader_id: reader_id(),
            writer_id: writer_id(),
            reader_sn_state: SequenceNumberSet::from_sequences(2, [2, 3]).expect("window"),
            count: 7,
            final_flag: false,
        });
        let mut buf = Vec::new();
        encode_submessage(&mut buf, &ack);
        // id, flags(E), len = 4 + 4 + 8 + 4 + 4 + 4 = 28
        assert_eq!(&buf[0..4], &[0x06, 0x01, 28, 0]);
        // bitmapBase high/low
        assert_eq!(&buf[12..20], &[0, 0, 0, 0, 2, 0, 0, 0]);
        // numBits = 2, one word 0xC0000000 LE
        assert_eq!(&buf[20..24], &[2, 0, 0, 0]);
        assert_eq!(&buf[24..28], &[0, 0, 0, 0xC0]);
        assert_eq!(&buf[28..32], &[7, 0, 0, 0]);
    }

    #[test]
    fn test_heartbeat_flags() {
        let hb = Submessage::Heartbeat(Heartbeat {
            reader_id: EntityId::UNKNOWN,
            writer_id: writer_id(),
            first_sn: 1,
            last_sn: 5,
            count: 3,
            final_flag: true,
            liveliness_flag: true,
        });
        let msg = encode_message(&RtpsHeader::new(prefix()), &[hb.clone()]);
        assert_eq!(msg[RTPS_HEADER_LEN + 1], 0x01 | 0x02 | 0x04);
        let subs = decode_all(&msg);
        assert_eq!(subs.len(), 1);
        assert_eq!(subs[0].as_ref().expect("valid"), &hb);
    }

    #[test]
    fn test_big_endian_heartbeat_decodes() {
        let mut msg = Vec::new();
        RtpsHeader::new(prefix()).encode(&mut msg);
        msg.extend_from_slice(&[SUBMSG_HEARTBEAT, 0x00, 0, 28]);
        msg.extend_from_slice(&[0, 0, 0, 0]);
        msg.extend_from_slice(&writer_id().0);
        msg.extend_from_slice(&[0, 0, 0, 0, 0, 0, 0, 1]);
        msg.extend_from_slice(&[0, 0, 0, 0, 0, 0, 0, 9]);
        msg.extend_from_slice(&[0, 0, 0, 4]);
        match decode_all(&msg).remove(0) {
            Ok(Submessage::Heartbeat(hb)) => {
                assert_eq!((hb.first_sn, hb.last_sn, hb.count), (1, 9, 4));
                assert!(!hb.final_flag);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_data_with_inline_qos() {
        let payload = [1u8, 2, 3, 4, 5, 6, 7, 8];
        let data = Submessage::Data(Data {
            reader_id: EntityId::UNKNOWN,
            writer_id: writer_id(),
            writer_sn: 42,
            inline_qos: InlineQos::for_change(
                crate::types::ChangeKind::NotAliveDisposed,
                InstanceHandle::from_key(9),
            ),
            key_flag: true,
            payload: &payload,
        });
        let msg = encode_message(&RtpsHeader::new(prefix()), &[data.clone()]);
        let flags = msg[RTPS_HEADER_LEN + 1];
        assert_eq!(flags, FLAG_ENDIANNESS | FLAG_INLINE_QOS | FLAG_DATA_KEY);
        assert_eq!(decode_all(&msg)[0].as_ref().expect("valid"), &data);
    }

    #[test]
    fn test_unaligned_data_is_last_and_exact() {
        let payload = [9u8; 5];
        let data = Submessage::Data(Data {
            reader_id: reader_id(),
            writer_id: writer_id(),
            writer_sn: 1,
            inline_qos: InlineQos::default(),
            key_flag: false,
            payload: &payload,
        });
        let mut buf = Vec::new();
        RtpsHeader::new(prefix()).encode(&mut buf);
        assert_eq!(encode_submessage(&mut buf, &data), Placement::Last);
        assert_eq!(&buf[RTPS_HEADER_LEN + 2..RTPS_HEADER_LEN + 4], &[0, 0]);
        match decode_all(&buf).remove(0) {
            Ok(Submessage::Data(d)) => assert_eq!(d.payload, &payload),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_data_frag_exact_last_fragment() {
        let bytes: Vec<u8> = (0..250u32).map(|i| i as u8).collect();
        let frag = Submessage::DataFrag(DataFrag {
            reader_id: reader_id(),
            writer_id: writer_id(),
            writer_sn: 3,
            fragment_starting_num: 2,
            fragments_in_submessage: 2,
            fragment_size: 100,
            sample_size: 250,
            inline_qos: InlineQos::default(),
            key_flag: false,
            payload: &bytes[100..250],
        });
        let msg = encode_message(&RtpsHeader::new(prefix()), &[frag.clone()]);
        assert_eq!((msg.len() - RTPS_HEADER_LEN) % 4, 0, "DATA_FRAG padded");
        assert_eq!(decode_all(&msg)[0].as_ref().expect("valid"), &frag);
    }

    #[test]
    fn test_nack_frag_roundtrip() {
        let nf = Submessage::NackFrag(NackFrag {
            reader_id: reader_id(),
            writer_id: writer_id(),
            writer_sn: 1,
            fragment_number_state: FragmentNumberSet::from_fragments(3, [3, 6, 8])
                .expect("window"),
            count: 1,
        });
        let msg = encode_message(&RtpsHeader::new(prefix()), &[nf.clone()]);
        assert_eq!(decode_all(&msg)[0].as_ref().expect("valid"), &nf);
    }

    #[test]
    fn test_malformed_submessage_skipped() {
        let hb = Submessage::Heartbeat(Heartbeat {
            reader_id: EntityId::UNKNOWN,
            writer_id: writer_id(),
            first_sn: 1,
            last_sn: 1,
            count: 1,
            final_flag: false,
            liveliness_flag: false,
        });
        let mut msg = Vec::new();
        RtpsHeader::new(prefix()).encode(&mut msg);
        // ACKNACK claiming 8 bytes: too short for its fields
        msg.extend_from_slice(&[SUBMSG_ACKNACK, 0x01, 8, 0, 0, 0, 0, 0, 0, 0, 0, 0]);
        encode_submessage(&mut msg, &hb);

        let subs = decode_all(&msg);
        assert_eq!(subs.len(), 2);
        assert!(subs[0].is_err());
        assert_eq!(subs[1].as_ref().expect("heartbeat survives"), &hb);
    }

    #[test]
    fn test_corrupt_length_stops_parsing() {
        let mut msg = Vec::new();
        RtpsHeader::new(prefix()).encode(&mut msg);
        msg.extend_from_slice(&[SUBMSG_GAP, 0x01, 0xFF, 0x00, 1, 2, 3, 4]);
        let subs = decode_all(&msg);
        assert_eq!(subs.len(), 1);
        assert!(subs[0].is_err());
    }

    #[test]
    fn test_unknown_submessage_passthrough() {
        let mut msg = Vec::new();
        RtpsHeader::new(prefix()).encode(&mut msg);
        msg.extend_from_slice(&[0x01, 0x01, 4, 0, 0, 0, 0, 0]);
        assert_eq!(
            decode_all(&msg)[0].as_ref().expect("framing valid"),
            &Submessage::Unknown { id: 0x01 }
        );
    }

    #[test]
    fn test_gap_roundtrip_and_validation() {
        let gap = Submessage::Gap(Gap {
            reader_id: reader_id(),
            writer_id: writer_id(),
            gap_start: 4,
            gap_list: SequenceNumberSet::empty(6),
        });
        let msg = encode_message(&RtpsHeader::new(prefix()), &[gap.clone()]);
        assert_eq!(decode_all(&msg)[0].as_ref().expect("valid"), &gap);

        let bad = Submessage::Gap(Gap {
            reader_id: reader_id(),
            writer_id: writer_id(),
            gap_start: 8,
            gap_list: SequenceNumberSet::empty(6),
        });
        let msg = encode_message(&RtpsHeader::new(prefix()), &[bad]);
        assert!(decode_all(&msg)[0].is_err());
    }
}
