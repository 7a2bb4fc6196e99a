//! In-process broker.
//!
//! Clones of one [`MemoryBroker`] share state, so several hubs in the same
//! process behave like separate server instances talking through a real
//! broker. Used for single-instance deployments and throughout the tests,
//! where it can also be told to fail.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};

use tokio::sync::{Mutex, mpsc};

use crate::{Broker, BrokerError, BrokerMessage, Subscriber};

/// An in-process publish/subscribe broker.
#[derive(Clone, Default)]
pub struct MemoryBroker {
    inner: Arc<Inner>,
}

#[derive(Default)]
struct Inner {
    state: Mutex<State>,
    next_subscriber: AtomicU64,
    publish_down: AtomicBool,
    connect_down: AtomicBool,
    failing_subscribes: AtomicUsize,
}

#[derive(Default)]
struct State {
    subscribers: HashMap<u64, SubscriberSlot>,
    subscribe_commands: HashMap<String, usize>,
    unsubscribe_commands: HashMap<String, usize>,
    published: u64,
}

struct SubscriberSlot {
    channels: HashSet<String>,
    tx: mpsc::UnboundedSender<BrokerMessage>,
}

impl MemoryBroker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every `publish` fail with [`BrokerError::Unavailable`] while
    /// `false`.
    pub fn set_publish_available(&self, available: bool) {
        self.inner.publish_down.store(!available, Ordering::SeqCst);
    }

    /// Makes every `subscriber()` call fail while `false`.
    pub fn set_accepting_subscribers(&self, accepting: bool) {
        self.inner.connect_down.store(!accepting, Ordering::SeqCst);
    }

    /// Makes the next `n` `SUBSCRIBE` commands, on any subscriber, fail
    /// with [`BrokerError::Unavailable`]. Failed commands are not counted.
    pub fn fail_next_subscribes(&self, n: usize) {
        self.inner.failing_subscribes.store(n, Ordering::SeqCst);
    }

    /// Severs every open subscriber connection, as if the broker restarted.
    /// Their `next_message` returns `None` once drained.
    pub async fn drop_subscribers(&self) {
        let mut state = self.inner.state.lock().await;
        let dropped = state.subscribers.len();
        state.subscribers.clear();
        tracing::debug!(dropped, "memory broker dropped subscribers");
    }

    /// How many `SUBSCRIBE` commands were issued for `channel`, across all
    /// subscriber connections.
    pub async fn subscribe_count(&self, channel: &str) -> usize {
        let state = self.inner.state.lock().await;
        state.subscribe_commands.get(channel).copied().unwrap_or(0)
    }

    /// How many `UNSUBSCRIBE` commands were issued for `channel`.
    pub async fn unsubscribe_count(&self, channel: &str) -> usize {
        let state = self.inner.state.lock().await;
        state.unsubscribe_commands.get(channel).copied().unwrap_or(0)
    }

    /// Channels with at least one live subscription, sorted.
    pub async fn subscribed_channels(&self) -> Vec<String> {
        let state = self.inner.state.lock().await;
        let channels: BTreeSet<&String> = state
            .subscribers
            .values()
            .filter(|slot| !slot.tx.is_closed())
            .flat_map(|slot| slot.channels.iter())
            .collect();
        channels.into_iter().cloned().collect()
    }

    /// Number of subscriber connections still open.
    pub async fn live_subscribers(&self) -> usize {
        let state = self.inner.state.lock().await;
        state
            .subscribers
            .values()
            .filter(|slot| !slot.tx.is_closed())
            .count()
    }

    /// Number of successful publishes.
    pub async fn published(&self) -> u64 {
        self.inner.state.lock().await.published
    }
}

impl Broker for MemoryBroker {
    type Subscriber = MemorySubscriber;

    async fn publish(&self, channel: &str, payload: &str) -> Result<(), BrokerError> {
        if self.inner.publish_down.load(Ordering::SeqCst) {
            return Err(BrokerError::Unavailable);
        }

        let mut state = self.inner.state.lock().await;
        // Subscribers whose receiving half was dropped are gone for good.
        state.subscribers.retain(|_, slot| !slot.tx.is_closed());
        for slot in state.subscribers.values() {
            if slot.channels.contains(channel) {
                let _ = slot.tx.send(BrokerMessage {
                    channel: channel.to_string(),
                    payload: payload.to_string(),
                });
            }
        }
        state.published += 1;
        Ok(())
    }

    async fn subscriber(&self) -> Result<MemorySubscriber, BrokerError> {
        if self.inner.connect_down.load(Ordering::SeqCst) {
            return Err(BrokerError::Connection(
                "memory broker is refusing connections".into(),
            ));
        }

        let id = self.inner.next_subscriber.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::unbounded_channel();
        self.inner.state.lock().await.subscribers.insert(
            id,
            SubscriberSlot {
                channels: HashSet::new(),
                tx,
            },
        );

        Ok(MemorySubscriber {
            id,
            inner: Arc::clone(&self.inner),
            rx: Mutex::new(rx),
        })
    }
}

/// A subscriber connection on a [`MemoryBroker`].
pub struct MemorySubscriber {
    id: u64,
    inner: Arc<Inner>,
    rx: Mutex<mpsc::UnboundedReceiver<BrokerMessage>>,
}

impl Subscriber for MemorySubscriber {
    async fn subscribe(&self, channel: &str) -> Result<(), BrokerError> {
        let injected = self.inner.failing_subscribes.fetch_update(
            Ordering::SeqCst,
            Ordering::SeqCst,
            |n| n.checked_sub(1),
        );
        if injected.is_ok() {
            return Err(BrokerError::Unavailable);
        }

        let mut guard = self.inner.state.lock().await;
        let state = &mut *guard;
        let slot = state
            .subscribers
            .get_mut(&self.id)
            .ok_or(BrokerError::Disconnected)?;
        slot.channels.insert(channel.to_string());
        *state
            .subscribe_commands
            .entry(channel.to_string())
            .or_default() += 1;
        Ok(())
    }

    async fn unsubscribe(&self, channel: &str) -> Result<(), BrokerError> {
        let mut guard = self.inner.state.lock().await;
        let state = &mut *guard;
        let slot = state
            .subscribers
            .get_mut(&self.id)
            .ok_or(BrokerError::Disconnected)?;
        slot.channels.remove(channel);
        *state
            .unsubscribe_commands
            .entry(channel.to_string())
            .or_default() += 1;
        Ok(())
    }

    async fn next_message(&self) -> Option<BrokerMessage> {
        self.rx.lock().await.recv().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_publish_reaches_subscribed_channel_only() {
        let broker = MemoryBroker::new();
        let sub = broker.subscriber().await.unwrap();
        sub.subscribe("branch:1").await.unwrap();

        broker.publish("branch:2", "ignored").await.unwrap();
        broker.publish("branch:1", "hello").await.unwrap();

        let msg = sub.next_message().await.unwrap();
        assert_eq!(msg.channel, "branch:1");
        assert_eq!(msg.payload, "hello");
    }

    #[tokio::test]
    async fn test_publish_fails_while_unavailable() {
        let broker = MemoryBroker::new();
        broker.set_publish_available(false);
        let err = broker.publish("x", "y").await.unwrap_err();
        assert!(matches!(err, BrokerError::Unavailable));

        broker.set_publish_available(true);
        broker.publish("x", "y").await.unwrap();
        assert_eq!(broker.published().await, 1);
    }

    #[tokio::test]
    async fn test_unsubscribe_stops_delivery() {
        let broker = MemoryBroker::new();
        let sub = broker.subscriber().await.unwrap();
        sub.subscribe("r").await.unwrap();
        sub.unsubscribe("r").await.unwrap();
        broker.publish("r", "late").await.unwrap();
        broker.drop_subscribers().await;

        assert_eq!(sub.next_message().await, None);
        assert_eq!(broker.subscribe_count("r").await, 1);
        assert_eq!(broker.unsubscribe_count("r").await, 1);
    }

    #[tokio::test]
    async fn test_drop_subscribers_ends_stream_and_rejects_changes() {
        let broker = MemoryBroker::new();
        let sub = broker.subscriber().await.unwrap();
        broker.drop_subscribers().await;

        assert_eq!(sub.next_message().await, None);
        assert!(matches!(
            sub.subscribe("r").await,
            Err(BrokerError::Disconnected)
        ));
    }

    #[tokio::test]
    async fn test_injected_subscribe_failures_run_out() {
        let broker = MemoryBroker::new();
        let sub = broker.subscriber().await.unwrap();
        broker.fail_next_subscribes(2);

        assert!(matches!(
            sub.subscribe("r").await,
            Err(BrokerError::Unavailable)
        ));
        assert!(sub.subscribe("r").await.is_err());
        sub.subscribe("r").await.unwrap();
        assert_eq!(broker.subscribe_count("r").await, 1);
    }

    #[tokio::test]
    async fn test_refusing_subscribers() {
        let broker = MemoryBroker::new();
        broker.set_accepting_subscribers(false);
        assert!(broker.subscriber().await.is_err());
    }

    #[tokio::test]
    async fn test_clones_share_state() {
        let a = MemoryBroker::new();
        let b = a.clone();
        let sub = a.subscriber().await.unwrap();
        sub.subscribe("room").await.unwrap();

        b.publish("room", "from b").await.unwrap();
        assert_eq!(sub.next_message().await.unwrap().payload, "from b");
        assert_eq!(b.subscribed_channels().await, vec!["room".to_string()]);
    }
}
