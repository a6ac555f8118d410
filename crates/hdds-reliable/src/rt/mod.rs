// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Runtime building blocks shared by writers and readers.

pub mod payload_pool;

pub use payload_pool::{PayloadPool, PoolStats, SerializedPayload, DEFAULT_MAX_FREE_PER_CLASS};
