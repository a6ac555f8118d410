// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! RTPS participant: the shared runtime of a group of endpoints.
//!
//! A participant owns one guid prefix, the network, the timer thread, the
//! payload pool, the metrics and the [`MessageReceiver`] listening on its
//! unicast locator. Writers and readers are created through it so that
//! they share those resources and receive their control traffic.
//!
//! # Example
//!
//! ```no_run
//! use hdds_reliable::participant::RtpsParticipant;
//! use hdds_reliable::transport::{InProcessTransport, Locator};
//! use hdds_reliable::types::GuidPrefix;
//!
//! let participant = RtpsParticipant::builder(GuidPrefix([1; 12]))
//!     .with_transport(InProcessTransport::new())
//!     .unicast_locator(Locator::inproc(7400))
//!     .build()
//!     .expect("participant");
//! participant.stop();
//! ```

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::config::{ReaderAttributes, WriterAttributes};
use crate::error::{Error, Result};
use crate::events::EventService;
use crate::metrics::ReliableMetrics;
use crate::qos::QosProfile;
use crate::reader::{StatefulReader, WriterProxyData};
use crate::receiver::MessageReceiver;
use crate::rt::{PayloadPool, DEFAULT_MAX_FREE_PER_CLASS};
use crate::transport::{Locator, NetworkFactory, ReceiverCallback, Transport};
use crate::types::{EntityId, Guid, GuidPrefix};
use crate::writer::{ReaderProxyData, StatefulWriter};

/// Builder for [`RtpsParticipant`].
pub struct ParticipantBuilder {
    prefix: GuidPrefix,
    network: Option<Arc<NetworkFactory>>,
    transports: Vec<Arc<dyn Transport>>,
    unicast_locator: Option<Locator>,
    max_free_per_class: usize,
}

impl ParticipantBuilder {
    /// Share an existing network (and its transports) instead of a private one.
    #[must_use]
    pub fn with_network(mut self, network: Arc<NetworkFactory>) -> Self {
        self.network = Some(network);
        self
    }

    #[must_use]
    pub fn with_transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transports.push(transport);
        self
    }

    /// Locator the participant listens on; remote endpoints send here.
    #[must_use]
    pub fn unicast_locator(mut self, locator: Locator) -> Self {
        self.unicast_locator = Some(locator);
        self
    }

    /// Free buffers kept per size class by the payload pool.
    #[must_use]
    pub fn pool_capacity(mut self, max_free_per_class: usize) -> Self {
        self.max_free_per_class = max_free_per_class;
        self
    }

    pub fn build(self) -> Result<Arc<RtpsParticipant>> {
        if self.prefix.is_unknown() {
            return Err(Error::Config("guid prefix must not be unknown".to_string()));
        }
        let network = self.network.unwrap_or_default();
        for transport in self.transports {
            network.register_transport(transport);
        }
        let events = EventService::new()?;
        let metrics = Arc::new(ReliableMetrics::new());
        let receiver = Arc::new(MessageReceiver::new(self.prefix, Arc::clone(&metrics)));
        if let Some(locator) = &self.unicast_locator {
            let callback: Arc<dyn ReceiverCallback> = receiver.clone();
            network.open_input_channel(locator, callback)?;
        }
        log::debug!(
            "[PARTICIPANT] {:?} listening on {:?}",
            self.prefix,
            self.unicast_locator
        );
        Ok(Arc::new(RtpsParticipant {
            prefix: self.prefix,
            unicast_locator: self.unicast_locator,
            network,
            events,
            pool: PayloadPool::new(self.max_free_per_class),
            metrics,
            receiver,
            next_entity_key: AtomicU32::new(1),
            endpoints: Mutex::new(Endpoints::default()),
            stopped: AtomicBool::new(false),
        }))
    }
}

#[derive(Default)]
struct Endpoints {
    writers: Vec<Arc<StatefulWriter>>,
    readers: Vec<Arc<StatefulReader>>,
}

pub struct RtpsParticipant {
    prefix: GuidPrefix,
    unicast_locator: Option<Locator>,
    network: Arc<NetworkFactory>,
    events: Arc<EventService>,
    pool: Arc<PayloadPool>,
    metrics: Arc<ReliableMetrics>,
    receiver: Arc<MessageReceiver>,
    next_entity_key: AtomicU32,
    endpoints: Mutex<Endpoints>,
    stopped: AtomicBool,
}

impl RtpsParticipant {
    pub fn builder(prefix: GuidPrefix) -> ParticipantBuilder {
        ParticipantBuilder {
            prefix,
            network: None,
            transports: Vec::new(),
            unicast_locator: None,
            max_free_per_class: DEFAULT_MAX_FREE_PER_CLASS,
        }
    }

    pub fn guid_prefix(&self) -> GuidPrefix {
        self.prefix
    }

    pub fn unicast_locator(&self) -> Option<Locator> {
        self.unicast_locator
    }

    pub fn network(&self) -> &Arc<NetworkFactory> {
        &self.network
    }

    pub fn events(&self) -> &Arc<EventService> {
        &self.events
    }

    pub fn pool(&self) -> &Arc<PayloadPool> {
        &self.pool
    }

    pub fn metrics(&self) -> &Arc<ReliableMetrics> {
        &self.metrics
    }

    pub fn receiver(&self) -> &Arc<MessageReceiver> {
        &self.receiver
    }

    fn next_key(&self) -> u32 {
        self.next_entity_key.fetch_add(1, Ordering::Relaxed)
    }

    fn check_running(&self) -> Result<()> {
        if self.stopped.load(Ordering::Acquire) {
            return Err(Error::AlreadyStopped);
        }
        Ok(())
    }

    pub fn create_writer(
        &self,
        qos: QosProfile,
        attributes: WriterAttributes,
    ) -> Result<Arc<StatefulWriter>> {
        self.check_running()?;
        let guid = Guid::new(self.prefix, EntityId::writer(self.next_key(), false));
        let writer = StatefulWriter::new(
            guid,
            qos,
            attributes,
            Arc::clone(&self.pool),
            Arc::clone(&self.network),
            Arc::clone(&self.events),
            Arc::clone(&self.metrics),
        )?;
        self.receiver.register_writer(Arc::clone(&writer));
        self.endpoints.lock().writers.push(Arc::clone(&writer));
        Ok(writer)
    }

    pub fn create_reader(
        &self,
        qos: QosProfile,
        attributes: ReaderAttributes,
    ) -> Result<Arc<StatefulReader>> {
        self.check_running()?;
        let guid = Guid::new(self.prefix, EntityId::reader(self.next_key(), false));
        let reader = StatefulReader::new(
            guid,
            qos,
            attributes,
            Arc::clone(&self.pool),
            Arc::clone(&self.network),
            Arc::clone(&self.events),
            Arc::clone(&self.metrics),
        )?;
        self.receiver.register_reader(Arc::clone(&reader));
        self.endpoints.lock().readers.push(Arc::clone(&reader));
        Ok(reader)
    }

    /// Stop and forget a local writer. Returns `false` if unknown.
    pub fn delete_writer(&self, guid: &Guid) -> bool {
        let removed = {
            let mut endpoints = self.endpoints.lock();
            let before = endpoints.writers.len();
            endpoints.writers.retain(|w| w.guid() != *guid);
            before != endpoints.writers.len()
        };
        match self.receiver.unregister_writer(&guid.entity_id) {
            Some(writer) => {
                writer.stop();
                true
            }
            None => removed,
        }
    }

    /// Stop and forget a local reader. Returns `false` if unknown.
    pub fn delete_reader(&self, guid: &Guid) -> bool {
        let removed = {
            let mut endpoints = self.endpoints.lock();
            let before = endpoints.readers.len();
            endpoints.readers.retain(|r| r.guid() != *guid);
            before != endpoints.readers.len()
        };
        match self.receiver.unregister_reader(&guid.entity_id) {
            Some(reader) => {
                reader.stop();
                true
            }
            None => removed,
        }
    }

    /// Discovery snapshot of a local writer as a remote reader would see it.
    pub fn writer_proxy_data(&self, writer: &StatefulWriter) -> WriterProxyData {
        WriterProxyData::new(writer.guid(), self.unicast_locator.into_iter().collect())
            .with_reliability(writer.qos().reliability)
            .with_durability(writer.qos().durability)
    }

    /// Discovery snapshot of a local reader as a remote writer would see it.
    pub fn reader_proxy_data(&self, reader: &StatefulReader) -> ReaderProxyData {
        ReaderProxyData::new(reader.guid(), self.unicast_locator.into_iter().collect())
            .with_reliability(reader.qos().reliability)
            .with_durability(reader.qos().durability)
            .with_inline_qos(reader.attributes().expects_inline_qos)
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::Acquire)
    }

    /// Stop every endpoint, close the input channel and the timer thread.
    pub fn stop(&self) {
        if self.stopped.swap(true, Ordering::AcqRel) {
            return;
        }
        let endpoints = std::mem::take(&mut *self.endpoints.lock());
        for writer in &endpoints.writers {
            writer.stop();
        }
        for reader in &endpoints.readers {
            reader.stop();
        }
        self.receiver.clear();
        if let Some(locator) = &self.unicast_locator {
            self.network.close_input_channel(locator);
        }
        self.events.shutdown();
        log::debug!(
            "[PARTICIPANT] {:?} stopped ({} writer(s), {} reader(s))",
            self.prefix,
            endpoints.writers.len(),
            endpoints.readers.len()
        );
    }
}

impl Drop for RtpsParticipant {
    fn drop(&mut self) {
        self.stop();
    }
}

impl std::fmt::Debug for RtpsParticipant {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RtpsParticipant")
            .field("prefix", &self.prefix)
            .field("unicast_locator", &self.unicast_locator)
            .field("stopped", &self.is_stopped())
            .finish_non_exhaustive()
    }
}
