// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Reader side of the reliable protocol.
//!
//! [`StatefulReader`] keeps one [`WriterProxy`] per matched writer, answers
//! HEARTBEATs with ACKNACK / NACK_FRAG and releases samples to the
//! application in per-writer sequence order.

mod fragment_buffer;
mod stateful_reader;
mod writer_proxy;

pub use fragment_buffer::{CompletedSample, FragmentBuffer, FragmentOutcome, MAX_SAMPLE_SIZE};
pub use stateful_reader::StatefulReader;
pub use writer_proxy::{WriterProxy, WriterProxyData, WriterProxyTimers, MAX_GAP_SPAN};
