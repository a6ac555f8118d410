// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! RTPS GUID (Globally Unique Identifier) and its parts.

use std::fmt;

/// 12-byte participant-unique prefix shared by every entity of a participant.
#[derive(Copy, Clone, Default, Eq, PartialEq, Hash, PartialOrd, Ord)]
pub struct GuidPrefix(pub [u8; 12]);

impl GuidPrefix {
    /// All-zero prefix, used as "unknown" on the wire (e.g. INFO_DST broadcast).
    pub const UNKNOWN: GuidPrefix = GuidPrefix([0; 12]);

    pub fn is_unknown(&self) -> bool {
        *self == Self::UNKNOWN
    }
}

impl fmt::Debug for GuidPrefix {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write_dotted(f, &self.0)
    }
}

/// 4-byte entity identifier: 3-byte key plus 1-byte kind.
#[derive(Copy, Clone, Default, Eq, PartialEq, Hash, PartialOrd, Ord)]
pub struct EntityId(pub [u8; 4]);

impl EntityId {
    /// ENTITYID_UNKNOWN: wildcard reader/writer id.
    pub const UNKNOWN: EntityId = EntityId([0, 0, 0, 0]);
    pub const PARTICIPANT: EntityId = EntityId([0, 0, 1, 0xC1]);

    pub const KIND_WRITER_WITH_KEY: u8 = 0x02;
    pub const KIND_WRITER_NO_KEY: u8 = 0x03;
    pub const KIND_READER_NO_KEY: u8 = 0x04;
    pub const KIND_READER_WITH_KEY: u8 = 0x07;

    /// Build a user-defined entity id from a 24-bit key and a kind octet.
    pub fn new(key: u32, kind: u8) -> Self {
        let k = key.to_be_bytes();
        Self([k[1], k[2], k[3], kind])
    }

    pub fn writer(key: u32, keyed: bool) -> Self {
        let kind = if keyed {
            Self::KIND_WRITER_WITH_KEY
        } else {
            Self::KIND_WRITER_NO_KEY
        };
        Self::new(key, kind)
    }

    pub fn reader(key: u32, keyed: bool) -> Self {
        let kind = if keyed {
            Self::KIND_READER_WITH_KEY
        } else {
            Self::KIND_READER_NO_KEY
        };
        Self::new(key, kind)
    }

    pub fn kind(&self) -> u8 {
        self.0[3]
    }

    pub fn is_unknown(&self) -> bool {
        *self == Self::UNKNOWN
    }

    pub fn is_writer(&self) -> bool {
        matches!(
            self.kind() & 0x3F,
            Self::KIND_WRITER_WITH_KEY | Self::KIND_WRITER_NO_KEY
        )
    }

    pub fn is_reader(&self) -> bool {
        matches!(
            self.kind() & 0x3F,
            Self::KIND_READER_WITH_KEY | Self::KIND_READER_NO_KEY
        )
    }
}

impl fmt::Debug for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write_dotted(f, &self.0)
    }
}

/// RTPS GUID
///
/// 16-byte identifier: 12-byte prefix followed by a 4-byte entity id.
///
/// # Display Format
/// Hex with dots: "01.0f.ac.10.00.00.00.00.00.00.00.01.00.00.01.c1"
#[derive(Copy, Clone, Default, Eq, PartialEq, Hash, PartialOrd, Ord)]
pub struct Guid {
    pub prefix: GuidPrefix,
    pub entity_id: EntityId,
}

impl Guid {
    pub const UNKNOWN: Guid = Guid {
        prefix: GuidPrefix::UNKNOWN,
        entity_id: EntityId::UNKNOWN,
    };

    pub fn new(prefix: GuidPrefix, entity_id: EntityId) -> Self {
        Self { prefix, entity_id }
    }

    /// Create GUID from raw bytes (16 bytes total)
    pub fn from_bytes(bytes: [u8; 16]) -> Self {
        let mut prefix = [0u8; 12];
        let mut entity_id = [0u8; 4];
        prefix.copy_from_slice(&bytes[0..12]);
        entity_id.copy_from_slice(&bytes[12..16]);
        Self {
            prefix: GuidPrefix(prefix),
            entity_id: EntityId(entity_id),
        }
    }

    pub fn as_bytes(&self) -> [u8; 16] {
        let mut bytes = [0u8; 16];
        bytes[0..12].copy_from_slice(&self.prefix.0);
        bytes[12..16].copy_from_slice(&self.entity_id.0);
        bytes
    }
}

fn write_dotted(f: &mut fmt::Formatter<'_>, bytes: &[u8]) -> fmt::Result {
    for (i, b) in bytes.iter().enumerate() {
        if i > 0 {
            write!(f, ".")?;
        }
        write!(f, "{:02x}", b)?;
    }
    Ok(())
}

impl fmt::Display for Guid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write_dotted(f, &self.as_bytes())
    }
}

impl fmt::Debug for Guid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Guid({})", self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_guid_display() {
        let guid = Guid::from_bytes([1, 15, 172, 16, 0, 0, 0, 0, 0, 0, 0, 1, 0, 0, 1, 193]);
        assert_eq!(guid.to_string(), "01.0f.ac.10.00.00.00.00.00.00.00.01.00.00.01.c1");
    }

    #[test]
    fn test_guid_bytes_roundtrip() {
        let bytes = [7u8; 16];
        assert_eq!(Guid::from_bytes(bytes).as_bytes(), bytes);
    }

    #[test]
    fn test_entity_id_kinds() {
        let w = EntityId::writer(0x10, true);
        let r = EntityId::reader(0x10, false);
        assert_eq!(w.0, [0, 0, 0x10, 0x02]);
        assert!(w.is_writer() && !w.is_reader());
        assert!(r.is_reader() && !r.is_writer());
        assert!(EntityId::UNKNOWN.is_unknown());
    }
}
