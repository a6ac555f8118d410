// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Metrics for the reliable delivery core.
//!
//! Network-level conditions that never surface as errors (loss, duplicates,
//! replayed ACKNACKs, malformed submessages) are counted here instead.
//! One [`ReliableMetrics`] is shared by every endpoint of a participant.
//!
//! # Thread Safety
//!
//! All counters are `AtomicU64` updated with `Relaxed` ordering.
//!
//! # Example
//!
//! ```
//! use hdds_reliable::metrics::{Counter, ReliableMetrics};
//!
//! let metrics = ReliableMetrics::new();
//! metrics.incr(Counter::HeartbeatsSent);
//! metrics.record_gap(3);
//! let snap = metrics.snapshot();
//! assert_eq!(snap.heartbeats_sent, 1);
//! assert_eq!(snap.max_gap_size, 3);
//! ```

use std::sync::atomic::{AtomicU64, Ordering};

macro_rules! counters {
    ($( $(#[$doc:meta])* $variant:ident => $field:ident ),* $(,)?) => {
        /// Counter identifiers.
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        pub enum Counter {
            $( $(#[$doc])* $variant ),*
        }

        impl Counter {
            pub const ALL: &'static [Counter] = &[$(Counter::$variant),*];
        }

        /// Point-in-time copy of every counter.
        #[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
        pub struct MetricsSnapshot {
            $( $(#[$doc])* pub $field: u64, )*
            /// Largest number of sequences lost or gapped at once.
            pub max_gap_size: u64,
        }

        impl ReliableMetrics {
            pub fn snapshot(&self) -> MetricsSnapshot {
                MetricsSnapshot {
                    $( $field: self.get(Counter::$variant), )*
                    max_gap_size: self.max_gap_size.load(Ordering::Relaxed),
                }
            }
        }
    };
}

counters! {
    /// HEARTBEAT submessages sent
    HeartbeatsSent => heartbeats_sent,
    /// HEARTBEAT submessages accepted by a reader
    HeartbeatsReceived => heartbeats_received,
    /// ACKNACK submessages sent
    AcknacksSent => acknacks_sent,
    /// ACKNACK submessages accepted by a writer
    AcknacksReceived => acknacks_received,
    /// ACKNACKs dropped as replayed or bogus
    AcknacksRejected => acknacks_rejected,
    /// NACK_FRAG submessages sent
    NackFragsSent => nack_frags_sent,
    /// NACK_FRAG submessages accepted by a writer
    NackFragsReceived => nack_frags_received,
    /// DATA submessages sent (first transmission)
    DataSent => data_sent,
    /// DATA_FRAG submessages sent (first transmission)
    FragmentsSent => fragments_sent,
    /// DATA / DATA_FRAG submessages re-sent after a NACK
    Retransmissions => retransmissions,
    /// GAP submessages sent
    GapsSent => gaps_sent,
    /// GAP submessages applied by a reader
    GapsReceived => gaps_received,
    /// Samples stored by a reader
    SamplesReceived => samples_received,
    /// DATA_FRAG submessages accepted into reassembly
    FragmentsReceived => fragments_received,
    /// Changes received twice and discarded
    DuplicatesDropped => duplicates_dropped,
    /// Sequences given up on by a reader
    SamplesLost => samples_lost,
    /// Samples refused by a full reader history
    SamplesRejected => samples_rejected,
    /// Submessages that failed to decode
    MalformedSubmessages => malformed_submessages,
    /// Writes that hit `max_blocking_time`
    WriteTimeouts => write_timeouts,
    /// Datagrams the network refused
    SendFailures => send_failures,
}

const COUNTER_COUNT: usize = Counter::ALL.len();

/// Reliable delivery metrics collector.
#[derive(Debug)]
pub struct ReliableMetrics {
    counters: [AtomicU64; COUNTER_COUNT],
    max_gap_size: AtomicU64,
}

impl ReliableMetrics {
    pub fn new() -> Self {
        Self {
            counters: std::array::from_fn(|_| AtomicU64::new(0)),
            max_gap_size: AtomicU64::new(0),
        }
    }

    #[inline]
    pub fn incr(&self, counter: Counter) {
        self.add(counter, 1);
    }

    #[inline]
    pub fn add(&self, counter: Counter, n: u64) {
        self.counters[counter as usize].fetch_add(n, Ordering::Relaxed);
    }

    pub fn get(&self, counter: Counter) -> u64 {
        self.counters[counter as usize].load(Ordering::Relaxed)
    }

    /// Record a run of `size` sequences skipped at once (GAP or loss).
    pub fn record_gap(&self, size: u64) {
        let mut current = self.max_gap_size.load(Ordering::Relaxed);
        while size > current {
            match self.max_gap_size.compare_exchange_weak(
                current,
                size,
                Ordering::Relaxed,
                Ordering::Relaxed,
            ) {
                Ok(_) => break,
                Err(actual) => current = actual,
            }
        }
    }

    pub fn reset(&self) {
        for c in &self.counters {
            c.store(0, Ordering::Relaxed);
        }
        self.max_gap_size.store(0, Ordering::Relaxed);
    }
}

impl Default for ReliableMetrics {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_metrics_new() {
        let metrics = ReliableMetrics::new();
        assert_eq!(metrics.snapshot(), MetricsSnapshot::default());
    }

    #[test]
    fn test_counters_are_independent() {
        let metrics = ReliableMetrics::new();
        metrics.incr(Counter::AcknacksSent);
        metrics.add(Counter::Retransmissions, 3);
        let snap = metrics.snapshot();
        assert_eq!(snap.acknacks_sent, 1);
        assert_eq!(snap.retransmissions, 3);
        assert_eq!(snap.heartbeats_sent, 0);
    }

    #[test]
    fn test_max_gap_size_high_water_mark() {
        let metrics = ReliableMetrics::new();
        metrics.record_gap(5);
        metrics.record_gap(2);
        assert_eq!(metrics.snapshot().max_gap_size, 5);
        metrics.reset();
        assert_eq!(metrics.snapshot().max_gap_size, 0);
    }

    #[test]
    fn test_concurrent_increments() {
        let metrics = Arc::new(ReliableMetrics::new());
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let m = Arc::clone(&metrics);
                thread::spawn(move || {
                    for _ in 0..1000 {
                        m.incr(Counter::DataSent);
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().expect("thread");
        }
        assert_eq!(metrics.get(Counter::DataSent), 4000);
    }
}
