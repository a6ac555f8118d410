// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! In-process datagram transport.
//!
//! Each input channel is a bounded crossbeam channel drained by one
//! receive thread that invokes the registered [`ReceiverCallback`].
//! Datagrams keep their boundaries. An optional [`LossFilter`] drops
//! datagrams before they are queued, which makes lossy links easy to
//! simulate.

use super::{Locator, ReceiverCallback, Transport, LOCATOR_KIND_INPROC};
use crate::error::{Error, Result};
use crossbeam::channel::{bounded, Sender, SendTimeoutError};
use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Instant;

/// Default queue depth of one input channel.
pub const DEFAULT_CHANNEL_CAPACITY: usize = 1024;

/// Decides whether a datagram sent to `destination` is dropped (`true`).
pub type LossFilter = Arc<dyn Fn(&[u8], &Locator) -> bool + Send + Sync>;

struct InputChannel {
    sender: Sender<Vec<u8>>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

/// Datagram transport between endpoints living in the same process.
pub struct InProcessTransport {
    channels: DashMap<u32, Arc<InputChannel>>,
    capacity: usize,
    loss_filter: RwLock<Option<LossFilter>>,
    sent: AtomicU64,
    dropped: AtomicU64,
}

impl InProcessTransport {
    pub fn new() -> Arc<Self> {
        Self::with_capacity(DEFAULT_CHANNEL_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Arc<Self> {
        Arc::new(Self {
            channels: DashMap::new(),
            capacity: capacity.max(1),
            loss_filter: RwLock::new(None),
            sent: AtomicU64::new(0),
            dropped: AtomicU64::new(0),
        })
    }

    /// Install (or clear with `None`) the loss filter.
    pub fn set_loss_filter(&self, filter: Option<LossFilter>) {
        *self.loss_filter.write() = filter;
    }

    /// (datagrams delivered to a queue, datagrams dropped by the filter or a full queue)
    pub fn stats(&self) -> (u64, u64) {
        (
            self.sent.load(Ordering::Relaxed),
            self.dropped.load(Ordering::Relaxed),
        )
    }
}

impl Transport for InProcessTransport {
    fn name(&self) -> &str {
        "inproc"
    }

    fn is_locator_supported(&self, locator: &Locator) -> bool {
        locator.kind == LOCATOR_KIND_INPROC
    }

    fn send(&self, buffer: &[u8], destinations: &[Locator], deadline: Instant) -> bool {
        let filter = self.loss_filter.read().clone();
        let mut ok = true;
        for dest in destinations {
            if filter.as_ref().is_some_and(|drop| drop(buffer, dest)) {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                continue;
            }
            let Some(channel) = self.channels.get(&dest.port).map(|c| Arc::clone(&c)) else {
                log::trace!("[INPROC] no input channel on {}", dest);
                ok = false;
                continue;
            };
            let timeout = deadline.saturating_duration_since(Instant::now());
            match channel.sender.send_timeout(buffer.to_vec(), timeout) {
                Ok(()) => {
                    self.sent.fetch_add(1, Ordering::Relaxed);
                }
                Err(SendTimeoutError::Timeout(_)) => {
                    log::debug!("[INPROC] queue full on {}, datagram dropped", dest);
                    self.dropped.fetch_add(1, Ordering::Relaxed);
                    ok = false;
                }
                Err(SendTimeoutError::Disconnected(_)) => {
                    ok = false;
                }
            }
        }
        ok
    }

    fn open_input_channel(
        &self,
        locator: &Locator,
        receiver: Arc<dyn ReceiverCallback>,
    ) -> Result<()> {
        if !self.is_locator_supported(locator) {
            return Err(Error::TransportUnavailable(*locator));
        }
        if self.channels.contains_key(&locator.port) {
            return Err(Error::Config(format!("input channel {} already open", locator)));
        }
        let (tx, rx) = bounded::<Vec<u8>>(self.capacity);
        let local = *locator;
        let remote = Locator::inproc(0);
        let worker = std::thread::Builder::new()
            .name(format!("hdds-inproc-{}", locator.port))
            .spawn(move || {
                while let Ok(datagram) = rx.recv() {
                    receiver.on_data_received(&datagram, &local, &remote);
                }
            })
            .map_err(|e| Error::Config(format!("spawn receive thread: {}", e)))?;
        self.channels.insert(
            locator.port,
            Arc::new(InputChannel {
                sender: tx,
                worker: Mutex::new(Some(worker)),
            }),
        );
        Ok(())
    }

    fn close_input_channel(&self, locator: &Locator) -> bool {
        let Some((_, channel)) = self.channels.remove(&locator.port) else {
            return false;
        };
        let worker = channel.worker.lock().take();
        // dropping the last sender disconnects the worker's receiver
        drop(channel);
        if let Some(handle) = worker {
            if handle.thread().id() != std::thread::current().id() {
                let _ = handle.join();
            }
        }
        true
    }
}

impl Drop for InProcessTransport {
    fn drop(&mut self) {
        let ports: Vec<u32> = self.channels.iter().map(|e| *e.key()).collect();
        for port in ports {
            self.close_input_channel(&Locator::inproc(port));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[derive(Default)]
    struct Counter {
        n: AtomicU64,
    }

    impl ReceiverCallback for Counter {
        fn on_data_received(&self, _data: &[u8], _local: &Locator, _remote: &Locator) {
            self.n.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn test_loss_filter_drops() {
        let t = InProcessTransport::new();
        let counter = Arc::new(Counter::default());
        t.open_input_channel(&Locator::inproc(1), counter.clone())
            .expect("opens");
        t.set_loss_filter(Some(Arc::new(|data: &[u8], _: &Locator| data[0] == 0)));

        let deadline = Instant::now() + Duration::from_millis(100);
        assert!(t.send(&[0], &[Locator::inproc(1)], deadline));
        assert!(t.send(&[1], &[Locator::inproc(1)], deadline));
        assert!(t.close_input_channel(&Locator::inproc(1)));
        assert_eq!(counter.n.load(Ordering::SeqCst), 1);
        assert_eq!(t.stats(), (1, 1));
    }

    #[test]
    fn test_double_open_rejected() {
        let t = InProcessTransport::new();
        let counter = Arc::new(Counter::default());
        t.open_input_channel(&Locator::inproc(2), counter.clone())
            .expect("opens");
        assert!(t.open_input_channel(&Locator::inproc(2), counter).is_err());
        assert!(!t.send(&[1], &[Locator::inproc(3)], Instant::now()));
    }
}
