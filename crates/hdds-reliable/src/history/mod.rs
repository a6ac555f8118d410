// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Change stores.
//!
//! - [`HistoryCache`]: ordered, resource-limited storage of `Arc<CacheChange>`
//! - [`WriterHistory`]: sequence numbering and eviction for a writer
//! - [`ReaderHistory`]: reception-side storage drained by `take`
//!
//! Payload buffers go back to the pool when the last `Arc<CacheChange>`
//! referencing them is dropped, whether that last owner is the history or a
//! reader proxy still holding the change.

mod cache;
mod reader_history;
mod writer_history;

pub use cache::{HistoryCache, LimitExceeded};
pub use reader_history::{Admission, ReaderHistory};
pub use writer_history::{Room, WriterHistory};
