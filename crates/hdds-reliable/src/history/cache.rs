// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Ordered change store shared by writer and reader histories.
//!
//! Changes are kept sorted by `(writer_guid, sequence_number)` so that every
//! writer's changes form an ascending run. Resource limits are checked on
//! insert; eviction policy belongs to the wrapping history.

use std::collections::HashMap;
use std::sync::Arc;

use crate::qos::{ResourceLimits, LENGTH_UNLIMITED};
use crate::types::{CacheChange, Guid, InstanceHandle, SequenceNumber};
use crate::{Error, Result};

/// Which resource limit an insertion would break.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LimitExceeded {
    MaxSamples,
    MaxInstances,
    MaxSamplesPerInstance,
    MaxQuotaBytes,
}

impl LimitExceeded {
    pub fn as_str(self) -> &'static str {
        match self {
            LimitExceeded::MaxSamples => "max_samples",
            LimitExceeded::MaxInstances => "max_instances",
            LimitExceeded::MaxSamplesPerInstance => "max_samples_per_instance",
            LimitExceeded::MaxQuotaBytes => "max_quota_bytes",
        }
    }
}

/// Bounded, ordered collection of cache changes.
#[derive(Debug)]
pub struct HistoryCache {
    changes: Vec<Arc<CacheChange>>,
    instances: HashMap<InstanceHandle, usize>,
    quota_bytes: usize,
    limits: ResourceLimits,
}

impl HistoryCache {
    pub fn new(limits: ResourceLimits) -> Self {
        let reserve = if limits.max_samples == LENGTH_UNLIMITED {
            64
        } else {
            limits.max_samples.min(1024)
        };
        Self {
            changes: Vec::with_capacity(reserve),
            instances: HashMap::new(),
            quota_bytes: 0,
            limits,
        }
    }

    pub fn limits(&self) -> &ResourceLimits {
        &self.limits
    }

    pub fn len(&self) -> usize {
        self.changes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }

    /// Payload bytes currently held.
    pub fn quota_bytes(&self) -> usize {
        self.quota_bytes
    }

    /// Number of distinct instances with at least one stored change.
    pub fn instance_count(&self) -> usize {
        self.instances.len()
    }

    /// Stored changes of `instance`.
    pub fn samples_of_instance(&self, instance: &InstanceHandle) -> usize {
        self.instances.get(instance).copied().unwrap_or(0)
    }

    pub fn iter(&self) -> impl DoubleEndedIterator<Item = &Arc<CacheChange>> + '_ {
        self.changes.iter()
    }

    pub fn get(&self, index: usize) -> Option<&Arc<CacheChange>> {
        self.changes.get(index)
    }

    fn search(&self, writer: &Guid, seq: SequenceNumber) -> std::result::Result<usize, usize> {
        self.changes
            .binary_search_by(|c| (c.writer_guid, c.sequence_number).cmp(&(*writer, seq)))
    }

    /// Index of the change `(writer, seq)`, if stored.
    pub fn position(&self, writer: &Guid, seq: SequenceNumber) -> Option<usize> {
        self.search(writer, seq).ok()
    }

    pub fn get_change(&self, writer: &Guid, seq: SequenceNumber) -> Option<&Arc<CacheChange>> {
        self.position(writer, seq).map(|i| &self.changes[i])
    }

    pub fn contains(&self, writer: &Guid, seq: SequenceNumber) -> bool {
        self.position(writer, seq).is_some()
    }

    /// Oldest stored change from `writer`.
    pub fn get_min_change_from(&self, writer: &Guid) -> Option<&Arc<CacheChange>> {
        let start = match self.search(writer, 0) {
            Ok(i) | Err(i) => i,
        };
        self.changes
            .get(start)
            .filter(|c| c.writer_guid == *writer)
    }

    /// Newest stored change from `writer`.
    pub fn get_max_change_from(&self, writer: &Guid) -> Option<&Arc<CacheChange>> {
        let end = match self.search(writer, SequenceNumber::MAX) {
            Ok(i) => i + 1,
            Err(i) => i,
        };
        end.checked_sub(1)
            .and_then(|i| self.changes.get(i))
            .filter(|c| c.writer_guid == *writer)
    }

    /// Limit that inserting `change` would break, if any.
    pub fn check_limits(&self, change: &CacheChange) -> Option<LimitExceeded> {
        let limits = &self.limits;
        if limits.max_samples != LENGTH_UNLIMITED && self.changes.len() >= limits.max_samples {
            return Some(LimitExceeded::MaxSamples);
        }
        let per_instance = self.samples_of_instance(&change.instance_handle);
        if per_instance == 0
            && limits.max_instances != LENGTH_UNLIMITED
            && self.instances.len() >= limits.max_instances
        {
            return Some(LimitExceeded::MaxInstances);
        }
        if limits.max_samples_per_instance != LENGTH_UNLIMITED
            && per_instance >= limits.max_samples_per_instance
        {
            return Some(LimitExceeded::MaxSamplesPerInstance);
        }
        if limits.max_quota_bytes != LENGTH_UNLIMITED
            && !self.changes.is_empty()
            && self.quota_bytes.saturating_add(change.serialized_size()) > limits.max_quota_bytes
        {
            return Some(LimitExceeded::MaxQuotaBytes);
        }
        None
    }

    /// Insert keeping `(writer, seq)` order.
    ///
    /// Fails on a duplicate `(writer, seq)` or when a resource limit would be
    /// exceeded; eviction is the caller's job.
    pub fn add_change(&mut self, change: Arc<CacheChange>) -> Result<usize> {
        let index = match self.search(&change.writer_guid, change.sequence_number) {
            Ok(_) => return Err(Error::DuplicateChange),
            Err(i) => i,
        };
        if let Some(limit) = self.check_limits(&change) {
            return Err(Error::ResourceLimitExceeded(limit.as_str().to_string()));
        }
        *self.instances.entry(change.instance_handle).or_insert(0) += 1;
        self.quota_bytes += change.serialized_size();
        self.changes.insert(index, change);
        Ok(index)
    }

    /// Remove the change at `index`.
    ///
    /// Returns the removed change and the index of the next one, which is
    /// `index` itself since later changes shift down.
    pub fn remove_change(&mut self, index: usize) -> Option<(Arc<CacheChange>, usize)> {
        if index >= self.changes.len() {
            return None;
        }
        let change = self.changes.remove(index);
        self.forget(&change);
        Some((change, index))
    }

    pub fn remove_sequence(&mut self, writer: &Guid, seq: SequenceNumber) -> Option<Arc<CacheChange>> {
        let index = self.position(writer, seq)?;
        self.remove_change(index).map(|(c, _)| c)
    }

    /// Remove every change matching `pred`; returns the removed changes in order.
    pub fn remove_where(&mut self, mut pred: impl FnMut(&CacheChange) -> bool) -> Vec<Arc<CacheChange>> {
        let mut removed = Vec::new();
        let mut kept = Vec::with_capacity(self.changes.len());
        for change in self.changes.drain(..) {
            if pred(&change) {
                removed.push(change);
            } else {
                kept.push(change);
            }
        }
        self.changes = kept;
        for change in &removed {
            self.forget(change);
        }
        removed
    }

    fn forget(&mut self, change: &CacheChange) {
        self.quota_bytes = self.quota_bytes.saturating_sub(change.serialized_size());
        if let Some(count) = self.instances.get_mut(&change.instance_handle) {
            *count -= 1;
            if *count == 0 {
                self.instances.remove(&change.instance_handle);
            }
        }
    }

    pub fn clear(&mut self) {
        self.changes.clear();
        self.instances.clear();
        self.quota_bytes = 0;
    }
}
