// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Core value types: identifiers, sequence numbers, timestamps, changes.

mod change;
mod fragment;
mod guid;
mod seq;
mod time;

pub use change::{CacheChange, ChangeKind, InstanceHandle};
pub use fragment::FragmentBitmap;
pub use guid::{EntityId, Guid, GuidPrefix};
pub use seq::{SeqNumGenerator, SequenceNumber, SEQUENCE_NUMBER_UNKNOWN};
pub use time::Time;
