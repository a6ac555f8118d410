// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Reliability configuration - constants, protocol timings, endpoint attributes.
//!
//! # Architecture
//!
//! - **Level 1 (Static)**: compile-time constants (RTPS header, sizes, defaults)
//! - **Level 2 (Dynamic)**: [`LiveTimes`] holds the protocol timings of one
//!   endpoint behind an `ArcSwap`, so `update_times` takes effect on the next
//!   timer firing without locking the endpoint.
//!
//! With the `qos-loaders` feature, [`ReliabilityConfig`] can be read from YAML.

use arc_swap::ArcSwap;
use std::sync::Arc;
use std::time::Duration;

#[cfg(feature = "qos-loaders")]
use serde::{Deserialize, Serialize};

// =======================================================================
// RTPS message constants
// =======================================================================

/// RTPS protocol magic.
pub const RTPS_MAGIC: [u8; 4] = *b"RTPS";

/// RTPS protocol version (2.4).
pub const RTPS_VERSION: [u8; 2] = [2, 4];

/// Vendor id placed in outgoing headers.
pub const VENDOR_ID: [u8; 2] = [0x01, 0xAA];

/// RTPS header length: magic + version + vendor + guid prefix.
pub const RTPS_HEADER_LEN: usize = 20;

/// Submessage header length: id + flags + octetsToNextHeader.
pub const SUBMESSAGE_HEADER_LEN: usize = 4;

/// Largest bitmap a SequenceNumberSet / FragmentNumberSet may carry.
pub const MAX_BITMAP_BITS: u32 = 256;

// =======================================================================
// Size defaults
// =======================================================================

/// Default upper bound for one datagram built by a writer.
pub const DEFAULT_MAX_MESSAGE_SIZE: usize = 65_000;

/// Default DATA_FRAG fragment size.
pub const DEFAULT_FRAGMENT_SIZE: u16 = 1_300;

/// Default number of concurrent fragment reassemblies per reader.
pub const DEFAULT_MAX_PENDING_REASSEMBLIES: usize = 256;

/// Default largest sample a reader reassembles from DATA_FRAG.
pub const DEFAULT_MAX_SAMPLE_SIZE: u32 = 16 * 1024 * 1024;

/// Default age after which an incomplete reassembly is abandoned.
pub const DEFAULT_FRAGMENT_TIMEOUT_MS: u64 = 5_000;

/// Default cap on matched remote endpoints per local endpoint.
pub const DEFAULT_MAX_MATCHED_ENDPOINTS: usize = 64;

// =======================================================================
// Protocol timings
// =======================================================================

/// Timings driving a stateful writer.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "qos-loaders", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "qos-loaders", serde(default))]
pub struct WriterTimes {
    /// Delay between a new match and the first HEARTBEAT to that reader.
    pub initial_heartbeat_delay: Duration,
    /// Period of the HEARTBEAT sent while changes remain unacknowledged.
    pub heartbeat_period: Duration,
    /// Debounce between a NACK and the retransmission pass it triggers.
    pub nack_response_delay: Duration,
    /// Window after a send during which NACKs for that change are ignored.
    pub nack_supression_duration: Duration,
}

impl Default for WriterTimes {
    fn default() -> Self {
        Self {
            initial_heartbeat_delay: Duration::from_millis(12),
            heartbeat_period: Duration::from_secs(3),
            nack_response_delay: Duration::from_millis(5),
            nack_supression_duration: Duration::ZERO,
        }
    }
}

impl WriterTimes {
    /// All delays zero, heartbeat period kept: every protocol reaction happens inline.
    #[must_use]
    pub fn immediate(heartbeat_period: Duration) -> Self {
        Self {
            initial_heartbeat_delay: Duration::ZERO,
            heartbeat_period,
            nack_response_delay: Duration::ZERO,
            nack_supression_duration: Duration::ZERO,
        }
    }
}

/// Timings driving a stateful reader.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "qos-loaders", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "qos-loaders", serde(default))]
pub struct ReaderTimes {
    /// Delay between a new match and the preemptive ACKNACK.
    pub initial_acknack_delay: Duration,
    /// Debounce between a HEARTBEAT and the ACKNACK answering it.
    pub heartbeat_response_delay: Duration,
}

impl Default for ReaderTimes {
    fn default() -> Self {
        Self {
            initial_acknack_delay: Duration::from_millis(70),
            heartbeat_response_delay: Duration::from_millis(5),
        }
    }
}

impl ReaderTimes {
    #[must_use]
    pub fn immediate() -> Self {
        Self {
            initial_acknack_delay: Duration::ZERO,
            heartbeat_response_delay: Duration::ZERO,
        }
    }
}

/// Hot-swappable timings of one endpoint.
#[derive(Debug)]
pub struct LiveTimes<T> {
    current: ArcSwap<T>,
}

impl<T: Copy> LiveTimes<T> {
    pub fn new(times: T) -> Self {
        Self {
            current: ArcSwap::from_pointee(times),
        }
    }

    pub fn get(&self) -> T {
        **self.current.load()
    }

    pub fn set(&self, times: T) {
        self.current.store(Arc::new(times));
    }
}

// =======================================================================
// Endpoint attributes
// =======================================================================

/// Static attributes of a stateful writer.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "qos-loaders", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "qos-loaders", serde(default))]
pub struct WriterAttributes {
    pub times: WriterTimes,
    /// Send new changes as soon as they are written (otherwise wait for NACKs).
    pub push_mode: bool,
    pub max_message_size: usize,
    pub fragment_size: u16,
    pub max_matched_readers: usize,
}

impl Default for WriterAttributes {
    fn default() -> Self {
        Self {
            times: WriterTimes::default(),
            push_mode: true,
            max_message_size: DEFAULT_MAX_MESSAGE_SIZE,
            fragment_size: DEFAULT_FRAGMENT_SIZE,
            max_matched_readers: DEFAULT_MAX_MATCHED_ENDPOINTS,
        }
    }
}

impl WriterAttributes {
    /// Largest payload sent as a single DATA; anything above is fragmented.
    pub fn max_unfragmented_payload(&self) -> usize {
        // header + INFO_DST + INFO_TS + DATA header + inline qos headroom
        self.max_message_size.saturating_sub(RTPS_HEADER_LEN + 16 + 12 + 24 + 64)
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.fragment_size == 0 {
            return Err("fragment_size must be > 0".to_string());
        }
        let min = usize::from(self.fragment_size) + RTPS_HEADER_LEN + 128;
        if self.max_message_size < min {
            return Err(format!(
                "max_message_size ({}) too small for fragment_size ({})",
                self.max_message_size, self.fragment_size
            ));
        }
        if self.max_matched_readers == 0 {
            return Err("max_matched_readers must be > 0".to_string());
        }
        Ok(())
    }
}

/// Static attributes of a stateful reader.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "qos-loaders", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "qos-loaders", serde(default))]
pub struct ReaderAttributes {
    pub times: ReaderTimes,
    pub expects_inline_qos: bool,
    pub max_pending_reassemblies: usize,
    /// Fragmented samples announcing a larger size are dropped.
    pub max_sample_size: u32,
    pub fragment_timeout: Duration,
    pub max_matched_writers: usize,
}

impl Default for ReaderAttributes {
    fn default() -> Self {
        Self {
            times: ReaderTimes::default(),
            expects_inline_qos: false,
            max_pending_reassemblies: DEFAULT_MAX_PENDING_REASSEMBLIES,
            max_sample_size: DEFAULT_MAX_SAMPLE_SIZE,
            fragment_timeout: Duration::from_millis(DEFAULT_FRAGMENT_TIMEOUT_MS),
            max_matched_writers: DEFAULT_MAX_MATCHED_ENDPOINTS,
        }
    }
}

/// Writer and reader attribute block as stored in configuration files.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "qos-loaders", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "qos-loaders", serde(default))]
pub struct ReliabilityConfig {
    pub writer: WriterAttributes,
    pub reader: ReaderAttributes,
}

#[cfg(feature = "qos-loaders")]
impl ReliabilityConfig {
    /// Parse a YAML document. Missing fields keep their defaults.
    ///
    /// ```yaml
    /// writer:
    ///   times:
    ///     heartbeat_period: { secs: 1, nanos: 0 }
    ///   fragment_size: 1024
    /// reader:
    ///   expects_inline_qos: true
    /// ```
    pub fn from_yaml_str(yaml: &str) -> crate::Result<Self> {
        let config: Self =
            serde_yaml::from_str(yaml).map_err(|e| crate::Error::Config(e.to_string()))?;
        config.writer.validate().map_err(crate::Error::Config)?;
        Ok(config)
    }

    pub fn from_yaml_file(path: impl AsRef<std::path::Path>) -> crate::Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .map_err(|e| crate::Error::Config(format!("{}: {}", path.display(), e)))?;
        Self::from_yaml_str(&text)
    }
}
