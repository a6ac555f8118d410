// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! RTPS locator: (kind, port, 16-byte address).

use std::fmt;
use std::net::{Ipv4Addr, Ipv6Addr};

pub const LOCATOR_KIND_INVALID: i32 = -1;
pub const LOCATOR_KIND_RESERVED: i32 = 0;
pub const LOCATOR_KIND_UDPV4: i32 = 1;
pub const LOCATOR_KIND_UDPV6: i32 = 2;
pub const LOCATOR_KIND_TCPV4: i32 = 4;
pub const LOCATOR_KIND_TCPV6: i32 = 8;
pub const LOCATOR_KIND_SHM: i32 = 16;
/// Vendor-specific kind for datagrams exchanged inside one process.
pub const LOCATOR_KIND_INPROC: i32 = 0x0100_0000;

pub const LOCATOR_PORT_INVALID: u32 = 0;

/// Opaque transport address. The core never interprets it beyond routing
/// it to the transport that declares support for its kind.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Locator {
    pub kind: i32,
    pub port: u32,
    pub address: [u8; 16],
}

impl Locator {
    pub const INVALID: Locator = Locator {
        kind: LOCATOR_KIND_INVALID,
        port: LOCATOR_PORT_INVALID,
        address: [0; 16],
    };

    pub fn new(kind: i32, port: u32, address: [u8; 16]) -> Self {
        Self {
            kind,
            port,
            address,
        }
    }

    /// UDPv4 locator; the IPv4 address occupies the last 4 bytes.
    pub fn udpv4(ip: Ipv4Addr, port: u16) -> Self {
        let mut address = [0u8; 16];
        address[12..].copy_from_slice(&ip.octets());
        Self::new(LOCATOR_KIND_UDPV4, u32::from(port), address)
    }

    pub fn udpv6(ip: Ipv6Addr, port: u16) -> Self {
        Self::new(LOCATOR_KIND_UDPV6, u32::from(port), ip.octets())
    }

    /// In-process locator identified by its port alone.
    pub fn inproc(port: u32) -> Self {
        Self::new(LOCATOR_KIND_INPROC, port, [0; 16])
    }

    pub fn is_valid(&self) -> bool {
        self.kind != LOCATOR_KIND_INVALID && self.kind != LOCATOR_KIND_RESERVED
    }

    /// True for the "any address" form that transports expand on normalization.
    pub fn is_any_address(&self) -> bool {
        self.address.iter().all(|&b| b == 0)
    }

    pub fn ipv4(&self) -> Option<Ipv4Addr> {
        (self.kind == LOCATOR_KIND_UDPV4 || self.kind == LOCATOR_KIND_TCPV4).then(|| {
            Ipv4Addr::new(
                self.address[12],
                self.address[13],
                self.address[14],
                self.address[15],
            )
        })
    }
}

impl fmt::Display for Locator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind {
            LOCATOR_KIND_UDPV4 | LOCATOR_KIND_TCPV4 => {
                let proto = if self.kind == LOCATOR_KIND_UDPV4 {
                    "UDPv4"
                } else {
                    "TCPv4"
                };
                match self.ipv4() {
                    Some(ip) => write!(f, "{}:[{}]:{}", proto, ip, self.port),
                    None => write!(f, "{}:[?]:{}", proto, self.port),
                }
            }
            LOCATOR_KIND_UDPV6 | LOCATOR_KIND_TCPV6 => {
                write!(f, "UDPv6:[{}]:{}", Ipv6Addr::from(self.address), self.port)
            }
            LOCATOR_KIND_SHM => write!(f, "SHM:{}", self.port),
            LOCATOR_KIND_INPROC => write!(f, "INPROC:{}", self.port),
            LOCATOR_KIND_INVALID => write!(f, "INVALID"),
            kind => write!(f, "KIND({}):{}", kind, self.port),
        }
    }
}

impl fmt::Debug for Locator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Locator({})", self)
    }
}
