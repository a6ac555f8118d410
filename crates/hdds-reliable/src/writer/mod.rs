// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Writer side of the reliable protocol.
//!
//! [`StatefulWriter`] keeps one [`ReaderProxy`] per matched reader and
//! drives DATA / DATA_FRAG / GAP / HEARTBEAT transmission from the
//! ACKNACK and NACK_FRAG it receives.

mod change_for_reader;
mod gap_builder;
mod reader_proxy;
mod stateful_writer;

pub use change_for_reader::{ChangeForReader, ChangeForReaderStatus};
pub use gap_builder::GapBuilder;
pub use reader_proxy::{NackOutcome, ProxyTimers, ReaderProxy, ReaderProxyData};
pub use stateful_writer::StatefulWriter;
