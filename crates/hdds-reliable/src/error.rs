// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Crate-wide error type.
//!
//! Network-level conditions (loss, duplicates, replayed ACKNACKs, malformed
//! submessages) never show up here: they are absorbed by the protocol
//! engines, logged, and counted in [`crate::metrics::ReliableMetrics`].
//! Only conditions an application can act on are returned as `Err`.

use crate::messages::DecodeError;
use crate::qos::QosPolicyId;
use crate::transport::Locator;

/// Errors returned by the reliable delivery core.
#[derive(Debug)]
pub enum Error {
    // ========================================================================
    // Configuration Errors
    // ========================================================================
    /// Configuration could not be loaded or is inconsistent.
    Config(String),
    /// QoS policy is invalid (e.g., zero depth, history larger than limits).
    InvalidQos(String),

    // ========================================================================
    // Matching Errors
    // ========================================================================
    /// Offered and requested QoS do not match on the given policy.
    QosIncompatible(QosPolicyId),
    /// The remote endpoint is not matched with this endpoint.
    NotMatched,
    /// Endpoint was stopped; no further operations are accepted.
    AlreadyStopped,

    // ========================================================================
    // Resource Errors
    // ========================================================================
    /// History is full and the caller asked not to wait.
    WouldBlock,
    /// History stayed full for the whole `max_blocking_time`.
    WriteTimeout,
    /// Resource limit exceeded (max_samples, max_instances, quota, ...).
    ResourceLimitExceeded(String),
    /// A change with the same writer and sequence number is already stored.
    DuplicateChange,

    // ========================================================================
    // Wire / Transport Errors
    // ========================================================================
    /// Wire message could not be decoded.
    Malformed(DecodeError),
    /// No registered transport accepts this locator.
    TransportUnavailable(Locator),
    /// Send operation failed.
    SendFailed(String),

    // ========================================================================
    // System Errors
    // ========================================================================
    /// OS-level failure, e.g. the event thread could not be spawned.
    IoError(std::io::Error),
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            // Configuration
            Error::Config(msg) => write!(f, "Configuration error: {}", msg),
            Error::InvalidQos(msg) => write!(f, "Invalid QoS: {}", msg),
            // Matching
            Error::QosIncompatible(policy) => write!(f, "QoS incompatible: {:?}", policy),
            Error::NotMatched => write!(f, "Remote endpoint not matched"),
            Error::AlreadyStopped => write!(f, "Endpoint already stopped"),
            // Resource
            Error::WouldBlock => write!(f, "Operation would block"),
            Error::WriteTimeout => write!(f, "Write timeout"),
            Error::ResourceLimitExceeded(msg) => write!(f, "Resource limit exceeded: {}", msg),
            Error::DuplicateChange => write!(f, "Duplicate change"),
            // Wire / transport
            Error::Malformed(e) => write!(f, "Malformed message: {}", e),
            Error::TransportUnavailable(loc) => write!(f, "No transport for locator {}", loc),
            Error::SendFailed(msg) => write!(f, "Send failed: {}", msg),
            // System
            Error::IoError(e) => write!(f, "I/O error: {}", e),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Malformed(e) => Some(e),
            Error::IoError(e) => Some(e),
            _ => None,
        }
    }
}

impl From<DecodeError> for Error {
    fn from(e: DecodeError) -> Self {
        Error::Malformed(e)
    }
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::IoError(e)
    }
}

/// Convenient alias for results using the crate [`Error`] type.
pub type Result<T> = core::result::Result<T, Error>;
