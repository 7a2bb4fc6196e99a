//! Publisher facade: the only way application code sends events to rooms.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use tablecast_broker::{Broker, BrokerError};
use tablecast_protocol::{Codec, EventEnvelope, JsonCodec};
use tracing::{debug, warn};

use crate::bridge::{BridgeHub, BrokerBridge};
use crate::PublisherConfig;

/// How a published event was handed off.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    /// Accepted by the broker. Every subscribed process, this one
    /// included, delivers it to its local members.
    Broker,
    /// The broker was unavailable or the bridge is degraded; the event
    /// went straight to this process's members only.
    LocalFallback { delivered: usize },
    /// The envelope could not be serialized and nobody received it.
    Dropped,
}

/// Running counts of publish outcomes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PublishStats {
    pub broker: u64,
    pub local_fallback: u64,
    pub dropped: u64,
}

#[derive(Default)]
struct Counters {
    broker: AtomicU64,
    local_fallback: AtomicU64,
    dropped: AtomicU64,
}

/// Publishes domain events to rooms.
///
/// On the healthy path the event goes to the broker only; this process's
/// own members receive it through the bridge like everyone else's, so
/// nobody gets it twice. When the broker publish fails or times out, or
/// the bridge has degraded, the event is delivered to local members
/// directly instead. Either way the caller sees success; the outcome is
/// reported as a [`Delivery`] and counted in [`PublishStats`].
///
/// Cheap to clone; clones share the same counters.
pub struct Publisher<B: Broker> {
    broker: Arc<B>,
    bridge: Arc<BrokerBridge<B>>,
    hub: Arc<BridgeHub<B>>,
    codec: JsonCodec,
    config: PublisherConfig,
    counters: Arc<Counters>,
}

impl<B: Broker> Clone for Publisher<B> {
    fn clone(&self) -> Self {
        Self {
            broker: Arc::clone(&self.broker),
            bridge: Arc::clone(&self.bridge),
            hub: Arc::clone(&self.hub),
            codec: JsonCodec,
            config: self.config.clone(),
            counters: Arc::clone(&self.counters),
        }
    }
}

impl<B: Broker> Publisher<B> {
    pub fn new(
        broker: Arc<B>,
        bridge: Arc<BrokerBridge<B>>,
        hub: Arc<BridgeHub<B>>,
        config: PublisherConfig,
    ) -> Self {
        Self {
            broker,
            bridge,
            hub,
            codec: JsonCodec,
            config,
            counters: Arc::new(Counters::default()),
        }
    }

    /// Publishes `envelope` to `room`. Never fails.
    pub async fn publish(&self, room: &str, envelope: &EventEnvelope) -> Delivery {
        let text = match self.codec.encode(envelope) {
            Ok(text) => text,
            Err(e) => {
                self.counters.dropped.fetch_add(1, Ordering::Relaxed);
                warn!(room, error = %e, "event dropped, could not encode");
                return Delivery::Dropped;
            }
        };

        if self.bridge.is_degraded() {
            return self.deliver_locally(room, &text).await;
        }

        match self.publish_to_broker(room, &text).await {
            Ok(()) => {
                self.counters.broker.fetch_add(1, Ordering::Relaxed);
                debug!(room, event = envelope.event_type(), "published");
                Delivery::Broker
            }
            Err(e) => {
                warn!(room, error = %e, "broker publish failed, delivering locally");
                self.deliver_locally(room, &text).await
            }
        }
    }

    /// Outcome counts since this publisher was created.
    pub fn stats(&self) -> PublishStats {
        PublishStats {
            broker: self.counters.broker.load(Ordering::Relaxed),
            local_fallback: self.counters.local_fallback.load(Ordering::Relaxed),
            dropped: self.counters.dropped.load(Ordering::Relaxed),
        }
    }

    async fn publish_to_broker(&self, room: &str, text: &str) -> Result<(), BrokerError> {
        let limit = self.config.publish_timeout;
        tokio::time::timeout(limit, self.broker.publish(room, text))
            .await
            .map_err(|_| BrokerError::Timeout(limit))?
    }

    async fn deliver_locally(&self, room: &str, text: &str) -> Delivery {
        let delivered = self.hub.deliver_local(room, text).await;
        self.counters.local_fallback.fetch_add(1, Ordering::Relaxed);
        debug!(room, delivered, "event delivered locally");
        Delivery::LocalFallback { delivered }
    }
}
