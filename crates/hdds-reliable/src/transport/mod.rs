// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Transport abstraction consumed by the reliability core.
//!
//! The core only needs three things from the network: send a datagram to a
//! set of locators within a deadline, open an input channel that calls back
//! with received datagrams, and normalize locators once when a remote
//! endpoint is registered. Socket handling lives behind [`Transport`].
//!
//! # Components
//!
//! | Type                 | Role                                               |
//! |----------------------|----------------------------------------------------|
//! | [`Locator`]          | opaque (kind, port, address) destination           |
//! | [`Transport`]        | one concrete transport (UDP, SHM, in-process, ...) |
//! | [`ReceiverCallback`] | sink for received datagrams                        |
//! | [`NetworkFactory`]   | routes locators to registered transports           |
//! | [`InProcessTransport`] | crossbeam-channel datagrams within one process   |

mod inproc;
mod locator;

pub use inproc::{InProcessTransport, LossFilter};
pub use locator::*;

use crate::error::{Error, Result};
use parking_lot::RwLock;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Sink for datagrams received on an input channel.
pub trait ReceiverCallback: Send + Sync {
    fn on_data_received(&self, data: &[u8], local: &Locator, remote: &Locator);
}

/// One concrete transport.
pub trait Transport: Send + Sync {
    fn name(&self) -> &str;

    fn is_locator_supported(&self, locator: &Locator) -> bool;

    /// Expand or rewrite a locator once at registration (e.g. any-address
    /// into the concrete interface list). Default: unchanged.
    fn normalize_locator(&self, locator: &Locator) -> Vec<Locator> {
        vec![*locator]
    }

    /// Send `buffer` to every destination. Returns `false` if any
    /// destination could not be served before `deadline`.
    fn send(&self, buffer: &[u8], destinations: &[Locator], deadline: Instant) -> bool;

    fn open_input_channel(
        &self,
        locator: &Locator,
        receiver: Arc<dyn ReceiverCallback>,
    ) -> Result<()>;

    fn close_input_channel(&self, locator: &Locator) -> bool;
}

/// Registry of transports; resolves locators to the transport serving them.
#[derive(Default)]
pub struct NetworkFactory {
    transports: RwLock<Vec<Arc<dyn Transport>>>,
}

impl NetworkFactory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_transport(&self, transport: Arc<dyn Transport>) {
        log::debug!("[NET] registering transport {}", transport.name());
        self.transports.write().push(transport);
    }

    pub fn transport_count(&self) -> usize {
        self.transports.read().len()
    }

    /// Run every locator through the transport supporting it.
    ///
    /// Unsupported locators are dropped; duplicates are removed.
    pub fn normalize_locators(&self, locators: &[Locator]) -> Vec<Locator> {
        let transports = self.transports.read();
        let mut out: Vec<Locator> = Vec::with_capacity(locators.len());
        for loc in locators {
            match transports.iter().find(|t| t.is_locator_supported(loc)) {
                Some(t) => {
                    for normalized in t.normalize_locator(loc) {
                        if !out.contains(&normalized) {
                            out.push(normalized);
                        }
                    }
                }
                None => log::debug!("[NET] no transport for locator {}, dropped", loc),
            }
        }
        out
    }

    /// Send one datagram to all destinations within `max_blocking_time`.
    ///
    /// Returns `true` only if every destination was handed to a transport
    /// that accepted it.
    pub fn send(&self, buffer: &[u8], destinations: &[Locator], max_blocking_time: Duration) -> bool {
        if destinations.is_empty() {
            return false;
        }
        let deadline = Instant::now() + max_blocking_time;
        let transports = self.transports.read();
        let mut served = 0usize;
        let mut ok = true;
        for t in transports.iter() {
            let dests: Vec<Locator> = destinations
                .iter()
                .filter(|l| t.is_locator_supported(l))
                .copied()
                .collect();
            if dests.is_empty() {
                continue;
            }
            served += dests.len();
            ok &= t.send(buffer, &dests, deadline);
        }
        if served < destinations.len() {
            log::trace!(
                "[NET] {} of {} destinations had no transport",
                destinations.len() - served,
                destinations.len()
            );
        }
        ok && served == destinations.len()
    }

    pub fn open_input_channel(
        &self,
        locator: &Locator,
        receiver: Arc<dyn ReceiverCallback>,
    ) -> Result<()> {
        let transports = self.transports.read();
        let transport = transports
            .iter()
            .find(|t| t.is_locator_supported(locator))
            .ok_or(Error::TransportUnavailable(*locator))?;
        transport.open_input_channel(locator, receiver)
    }

    pub fn close_input_channel(&self, locator: &Locator) -> bool {
        self.transports
            .read()
            .iter()
            .filter(|t| t.is_locator_supported(locator))
            .any(|t| t.close_input_channel(locator))
    }
}
