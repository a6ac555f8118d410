// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! # hdds-reliable - RTPS reliable delivery core
//!
//! Stateful reliable writers and readers speaking RTPS: per-peer proxies,
//! history caches, HEARTBEAT / ACKNACK / GAP exchange and fragmentation
//! with NACK_FRAG repair.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use hdds_reliable::config::{ReaderAttributes, WriterAttributes};
//! use hdds_reliable::participant::RtpsParticipant;
//! use hdds_reliable::qos::QosProfile;
//! use hdds_reliable::transport::{InProcessTransport, Locator, NetworkFactory};
//! use hdds_reliable::types::GuidPrefix;
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! fn main() -> hdds_reliable::Result<()> {
//!     let network = Arc::new(NetworkFactory::new());
//!     network.register_transport(InProcessTransport::new());
//!
//!     let pub_side = RtpsParticipant::builder(GuidPrefix([1; 12]))
//!         .with_network(Arc::clone(&network))
//!         .unicast_locator(Locator::inproc(7400))
//!         .build()?;
//!     let sub_side = RtpsParticipant::builder(GuidPrefix([2; 12]))
//!         .with_network(Arc::clone(&network))
//!         .unicast_locator(Locator::inproc(7401))
//!         .build()?;
//!
//!     let writer = pub_side.create_writer(QosProfile::reliable(16), WriterAttributes::default())?;
//!     let reader = sub_side.create_reader(QosProfile::reliable(16), ReaderAttributes::default())?;
//!
//!     // stand-in for endpoint discovery
//!     writer.matched_reader_add(sub_side.reader_proxy_data(&reader))?;
//!     reader.matched_writer_add(pub_side.writer_proxy_data(&writer))?;
//!
//!     writer.write(b"hello")?;
//!     if reader.wait_for_unread(Duration::from_secs(1)) {
//!         for change in reader.take_all() {
//!             println!("seq {} -> {:?}", change.sequence_number, change.payload.as_slice());
//!         }
//!     }
//!     Ok(())
//! }
//! ```
//!
//! ## Architecture
//!
//! ```text
//! +-------------------------------------------------------------+
//! |  StatefulWriter                      StatefulReader         |
//! |  WriterHistory + ReaderProxy*        ReaderHistory +        |
//! |                                      WriterProxy* +         |
//! |                                      FragmentBuffer         |
//! +-------------------------------------------------------------+
//! |  MessageBuilder / codec        MessageReceiver (dispatch)   |
//! +-------------------------------------------------------------+
//! |  NetworkFactory -> Transport (in-process, user supplied)    |
//! |  EventService (timers)         PayloadPool (buffers)        |
//! +-------------------------------------------------------------+
//! ```
//!
//! ## Modules Overview
//!
//! - [`writer`] / [`reader`] - protocol engines (start here)
//! - [`history`] - writer and reader caches
//! - [`messages`] - RTPS submessages and wire codec
//! - [`transport`] - locators, transport trait, in-process transport
//! - [`participant`] - shared runtime and endpoint factory
//! - [`config`] - timings and endpoint attributes

pub mod config;
pub mod error;
pub mod events;
pub mod history;
pub mod listener;
pub mod messages;
pub mod metrics;
pub mod participant;
pub mod qos;
pub mod reader;
pub mod receiver;
pub mod rt;
pub mod transport;
pub mod types;
pub mod writer;

pub use config::{ReaderAttributes, ReaderTimes, WriterAttributes, WriterTimes};
pub use error::{Error, Result};
pub use listener::{ReaderListener, WriterListener};
pub use metrics::{MetricsSnapshot, ReliableMetrics};
pub use participant::RtpsParticipant;
pub use qos::{Durability, History, QosProfile, Reliability, ResourceLimits};
pub use reader::{StatefulReader, WriterProxyData};
pub use receiver::MessageReceiver;
pub use types::{CacheChange, ChangeKind, Guid, GuidPrefix, InstanceHandle, SequenceNumber};
pub use writer::{ReaderProxyData, StatefulWriter};
