// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! QoS policies consumed by the reliable delivery core.
//!
//! # Supported Policies
//!
//! - **Reliability**: BestEffort or Reliable, plus `max_blocking_time`
//! - **History**: KeepLast(n) per instance, KeepAll within ResourceLimits
//! - **Durability**: Volatile, TransientLocal, Transient, Persistent
//! - **ResourceLimits**: max_samples, max_instances, max_samples_per_instance, quota
//!
//! Matching between a local endpoint and a discovered remote one goes through
//! [`check_compatibility`]; an incompatible pair never produces a proxy.

use std::time::Duration;

#[cfg(feature = "qos-loaders")]
use serde::{Deserialize, Serialize};

/// Resource limit value meaning "no limit".
pub const LENGTH_UNLIMITED: usize = usize::MAX;

/// QoS Profile - Collection of policies for Writer/Reader
///
/// Validated at Writer/Reader creation (fail-fast on invalid config).
#[derive(Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "qos-loaders", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "qos-loaders", serde(default))]
pub struct QosProfile {
    pub reliability: Reliability,
    pub history: History,
    pub durability: Durability,
    pub resource_limits: ResourceLimits,
    /// Longest time a reliable `write()` may block on a full KEEP_ALL history.
    pub max_blocking_time: Duration,
}

impl Default for QosProfile {
    fn default() -> Self {
        Self {
            reliability: Reliability::BestEffort,
            history: History::KeepLast(10),
            durability: Durability::Volatile,
            resource_limits: ResourceLimits::default(),
            max_blocking_time: Duration::from_millis(100),
        }
    }
}

impl QosProfile {
    /// Reliable, volatile, KEEP_LAST(depth).
    #[must_use]
    pub fn reliable(depth: u32) -> Self {
        Self {
            reliability: Reliability::Reliable,
            history: History::KeepLast(depth),
            ..Default::default()
        }
    }

    /// Reliable KEEP_ALL bounded to `max_samples`; writers block when full.
    #[must_use]
    pub fn reliable_keep_all(max_samples: usize) -> Self {
        Self {
            reliability: Reliability::Reliable,
            history: History::KeepAll,
            resource_limits: ResourceLimits {
                max_samples,
                max_samples_per_instance: max_samples,
                ..Default::default()
            },
            ..Default::default()
        }
    }

    #[must_use]
    pub fn with_durability(mut self, durability: Durability) -> Self {
        self.durability = durability;
        self
    }

    #[must_use]
    pub fn with_max_blocking_time(mut self, max_blocking_time: Duration) -> Self {
        self.max_blocking_time = max_blocking_time;
        self
    }

    pub fn is_reliable(&self) -> bool {
        self.reliability == Reliability::Reliable
    }

    /// Validate QoS configuration
    ///
    /// # Validation Rules
    ///
    /// - History::KeepLast(n) where n > 0 and n <= max_samples_per_instance
    /// - History::KeepAll requires ResourceLimits.max_samples > 0
    /// - max_samples >= max_samples_per_instance
    pub fn validate(&self) -> Result<(), String> {
        let rl = &self.resource_limits;
        match self.history {
            History::KeepLast(0) => {
                return Err("History::KeepLast(n) requires n > 0".to_string());
            }
            History::KeepLast(depth) => {
                if depth as usize > rl.max_samples_per_instance {
                    return Err(format!(
                        "History::KeepLast({}) exceeds max_samples_per_instance ({})",
                        depth, rl.max_samples_per_instance
                    ));
                }
            }
            History::KeepAll => {
                if rl.max_samples == 0 {
                    return Err(
                        "History::KeepAll requires ResourceLimits.max_samples > 0".to_string()
                    );
                }
            }
        }

        if rl.max_samples < rl.max_samples_per_instance {
            return Err(format!(
                "max_samples ({}) must be >= max_samples_per_instance ({})",
                rl.max_samples, rl.max_samples_per_instance
            ));
        }
        if rl.max_instances == 0 || rl.max_samples_per_instance == 0 {
            return Err("max_instances and max_samples_per_instance must be > 0".to_string());
        }

        Ok(())
    }
}

/// Reliability policy
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Default)]
#[cfg_attr(feature = "qos-loaders", derive(Serialize, Deserialize))]
pub enum Reliability {
    /// Fire-and-forget (no ACKs, no retransmission)
    #[default]
    BestEffort,
    /// Reliable delivery with HEARTBEAT/ACKNACK driven retransmission
    Reliable,
}

/// History policy
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "qos-loaders", derive(Serialize, Deserialize))]
pub enum History {
    /// Keep last N samples per instance (drops oldest)
    KeepLast(u32),
    /// Keep all samples within resource limits; reliable writers block when full.
    KeepAll,
}

impl Default for History {
    fn default() -> Self {
        Self::KeepLast(10)
    }
}

/// Durability policy, ordered from weakest to strongest.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Default)]
#[cfg_attr(feature = "qos-loaders", derive(Serialize, Deserialize))]
pub enum Durability {
    /// Late joiners only see samples written after they matched.
    #[default]
    Volatile,
    /// Writer keeps its history for late-joining readers.
    TransientLocal,
    Transient,
    Persistent,
}

/// Resource limits for Writer/Reader histories.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "qos-loaders", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "qos-loaders", serde(default))]
pub struct ResourceLimits {
    /// Maximum total samples across all instances
    pub max_samples: usize,
    /// Maximum number of distinct instances
    pub max_instances: usize,
    /// Maximum samples per instance
    pub max_samples_per_instance: usize,
    /// Maximum total payload bytes held by the history
    pub max_quota_bytes: usize,
}

impl Default for ResourceLimits {
    fn default() -> Self {
        Self {
            max_samples: 5_000,
            max_instances: LENGTH_UNLIMITED,
            max_samples_per_instance: 5_000,
            max_quota_bytes: 100_000_000,
        }
    }
}

/// Policy that caused an offered/requested mismatch.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum QosPolicyId {
    Reliability,
    Durability,
}

/// Check a writer's offered QoS against a reader's requested QoS.
///
/// Returns the first incompatible policy. A reliable reader cannot be served
/// by a best-effort writer, and a reader may not request a stronger
/// durability than the writer offers.
pub fn check_compatibility(
    offered_reliability: Reliability,
    offered_durability: Durability,
    requested_reliability: Reliability,
    requested_durability: Durability,
) -> Result<(), QosPolicyId> {
    if offered_reliability < requested_reliability {
        return Err(QosPolicyId::Reliability);
    }
    if offered_durability < requested_durability {
        return Err(QosPolicyId::Durability);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_qos_default() {
        let qos = QosProfile::default();

        assert_eq!(qos.reliability, Reliability::BestEffort);
        assert_eq!(qos.history, History::KeepLast(10));
        assert_eq!(qos.durability, Durability::Volatile);
        assert_eq!(qos.max_blocking_time, Duration::from_millis(100));
        assert!(qos.validate().is_ok());
    }

    #[test]
    fn test_qos_validate_invalid_history_zero() {
        let qos = QosProfile {
            history: History::KeepLast(0),
            ..Default::default()
        };
        assert!(qos.validate().is_err());
    }

    #[test]
    fn test_qos_validate_depth_exceeds_per_instance() {
        let mut qos = QosProfile::reliable(20);
        qos.resource_limits.max_samples_per_instance = 10;
        let err = qos.validate().expect_err("depth above per-instance limit");
        assert!(err.contains("max_samples_per_instance"));
    }

    #[test]
    fn test_qos_validate_keep_all_requires_limits() {
        let qos = QosProfile::reliable_keep_all(0);
        assert!(qos.validate().is_err());
        assert!(QosProfile::reliable_keep_all(3).validate().is_ok());
    }

    #[test]
    fn test_compatibility_reliability() {
        assert_eq!(
            check_compatibility(
                Reliability::BestEffort,
                Durability::Volatile,
                Reliability::Reliable,
                Durability::Volatile,
            ),
            Err(QosPolicyId::Reliability)
        );
        assert!(check_compatibility(
            Reliability::Reliable,
            Durability::Volatile,
            Reliability::BestEffort,
            Durability::Volatile,
        )
        .is_ok());
    }

    #[test]
    fn test_compatibility_durability() {
        assert_eq!(
            check_compatibility(
                Reliability::Reliable,
                Durability::Volatile,
                Reliability::Reliable,
                Durability::TransientLocal,
            ),
            Err(QosPolicyId::Durability)
        );
        assert!(check_compatibility(
            Reliability::Reliable,
            Durability::TransientLocal,
            Reliability::Reliable,
            Durability::Volatile,
        )
        .is_ok());
    }
}
