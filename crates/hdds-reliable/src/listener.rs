// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Upward notifications and status objects.
//!
//! Listeners are invoked after the endpoint lock is released. The change
//! passed to a callback is borrowed; clone the `Arc` to keep it.

use crate::qos::QosPolicyId;
use crate::types::{CacheChange, Guid};

/// PublicationMatched status (writer side).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PublicationMatchedStatus {
    pub total_count: u32,
    pub total_count_change: i32,
    pub current_count: u32,
    pub current_count_change: i32,
    pub last_subscription_handle: Option<Guid>,
}

impl PublicationMatchedStatus {
    pub(crate) fn on_matched(&mut self, reader: Guid) {
        self.total_count += 1;
        self.total_count_change += 1;
        self.current_count += 1;
        self.current_count_change += 1;
        self.last_subscription_handle = Some(reader);
    }

    pub(crate) fn on_unmatched(&mut self, reader: Guid) {
        self.current_count = self.current_count.saturating_sub(1);
        self.current_count_change -= 1;
        self.last_subscription_handle = Some(reader);
    }

    /// Return the status and clear the `*_change` deltas.
    pub(crate) fn read_and_reset(&mut self) -> Self {
        let status = *self;
        self.total_count_change = 0;
        self.current_count_change = 0;
        status
    }
}

/// SubscriptionMatched status (reader side).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SubscriptionMatchedStatus {
    pub total_count: u32,
    pub total_count_change: i32,
    pub current_count: u32,
    pub current_count_change: i32,
    pub last_publication_handle: Option<Guid>,
}

impl SubscriptionMatchedStatus {
    pub(crate) fn on_matched(&mut self, writer: Guid) {
        self.total_count += 1;
        self.total_count_change += 1;
        self.current_count += 1;
        self.current_count_change += 1;
        self.last_publication_handle = Some(writer);
    }

    pub(crate) fn on_unmatched(&mut self, writer: Guid) {
        self.current_count = self.current_count.saturating_sub(1);
        self.current_count_change -= 1;
        self.last_publication_handle = Some(writer);
    }

    pub(crate) fn read_and_reset(&mut self) -> Self {
        let status = *self;
        self.total_count_change = 0;
        self.current_count_change = 0;
        status
    }
}

/// OfferedIncompatibleQos status (writer side).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct OfferedIncompatibleQosStatus {
    pub total_count: u32,
    pub total_count_change: i32,
    pub last_policy_id: Option<QosPolicyId>,
}

impl OfferedIncompatibleQosStatus {
    pub(crate) fn record(&mut self, policy: QosPolicyId) {
        self.total_count += 1;
        self.total_count_change += 1;
        self.last_policy_id = Some(policy);
    }

    pub(crate) fn read_and_reset(&mut self) -> Self {
        let status = *self;
        self.total_count_change = 0;
        status
    }
}

/// RequestedIncompatibleQos status (reader side).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RequestedIncompatibleQosStatus {
    pub total_count: u32,
    pub total_count_change: i32,
    pub last_policy_id: Option<QosPolicyId>,
}

impl RequestedIncompatibleQosStatus {
    pub(crate) fn record(&mut self, policy: QosPolicyId) {
        self.total_count += 1;
        self.total_count_change += 1;
        self.last_policy_id = Some(policy);
    }

    pub(crate) fn read_and_reset(&mut self) -> Self {
        let status = *self;
        self.total_count_change = 0;
        status
    }
}

/// SampleLost status: sequences a reader will never receive.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SampleLostStatus {
    pub total_count: u64,
    pub total_count_change: i64,
}

impl SampleLostStatus {
    pub(crate) fn record(&mut self, lost: u64) {
        self.total_count += lost;
        self.total_count_change += lost as i64;
    }

    pub(crate) fn read_and_reset(&mut self) -> Self {
        let status = *self;
        self.total_count_change = 0;
        status
    }
}

/// Writer-side callbacks. Every method has a no-op default.
pub trait WriterListener: Send + Sync {
    /// Every matched reader has acknowledged `change`.
    fn on_writer_change_received_by_all(&self, _writer: &Guid, _change: &CacheChange) {}

    fn on_publication_matched(&self, _writer: &Guid, _status: PublicationMatchedStatus) {}

    fn on_offered_incompatible_qos(&self, _writer: &Guid, _status: OfferedIncompatibleQosStatus) {}
}

/// Reader-side callbacks. Every method has a no-op default.
pub trait ReaderListener: Send + Sync {
    /// `change` became available to `take`, in per-writer sequence order.
    fn on_new_cache_change_added(&self, _reader: &Guid, _change: &CacheChange) {}

    fn on_subscription_matched(&self, _reader: &Guid, _status: SubscriptionMatchedStatus) {}

    fn on_requested_incompatible_qos(
        &self,
        _reader: &Guid,
        _status: RequestedIncompatibleQosStatus,
    ) {
    }

    fn on_sample_lost(&self, _reader: &Guid, _status: SampleLostStatus) {}
}
