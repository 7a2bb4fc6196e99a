//! Broker bridge: the process-wide subscriber for room channels.
//!
//! The bridge owns the one dedicated subscriber connection of this
//! process. Every message arriving on a room channel is handed to
//! [`Hub::deliver_local`] in arrival order. When the connection is lost,
//! the bridge reconnects with exponential backoff and re-subscribes every
//! room that is active at that moment. After too many failed attempts it
//! gives up and marks itself degraded, which switches the
//! [`Publisher`](crate::Publisher) to local-only delivery.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use tablecast_broker::{Broker, BrokerError, Subscriber};
use tablecast_room::{Hub, RoomSubscriptions};
use tokio::sync::{Mutex, Notify};
use tracing::{debug, error, info, trace, warn};

use crate::BridgeConfig;

/// The hub type every server component shares.
pub type BridgeHub<B> = Hub<BrokerBridge<B>>;

/// Subscriber-side half of the broker integration.
///
/// The bridge also implements [`RoomSubscriptions`], so the hub issues its
/// `SUBSCRIBE`/`UNSUBSCRIBE` commands through whichever subscriber
/// connection is current. It remembers every channel the hub asked for, so
/// a fresh connection can be brought up to date before it is used.
///
/// The link lock serializes subscription commands with connection
/// installs. It is never held while taking the hub lock.
pub struct BrokerBridge<B: Broker> {
    broker: Arc<B>,
    config: BridgeConfig,
    link: Mutex<Link<B::Subscriber>>,
    /// Generation of the installed connection, 0 while disconnected.
    active: AtomicU64,
    /// Woken when a failed command retires the current connection.
    invalidated: Notify,
    degraded: AtomicBool,
}

struct Link<S> {
    /// Channels the hub wants, whether or not a connection is up.
    channels: BTreeSet<String>,
    current: Option<Arc<S>>,
    generation: u64,
}

impl<B: Broker> BrokerBridge<B> {
    pub fn new(broker: Arc<B>, config: BridgeConfig) -> Self {
        Self {
            broker,
            config: config.validated(),
            link: Mutex::new(Link {
                channels: BTreeSet::new(),
                current: None,
                generation: 0,
            }),
            active: AtomicU64::new(0),
            invalidated: Notify::new(),
            degraded: AtomicBool::new(false),
        }
    }

    /// Whether the bridge gave up reconnecting.
    pub fn is_degraded(&self) -> bool {
        self.degraded.load(Ordering::SeqCst)
    }

    /// Whether a subscriber connection is currently installed.
    pub fn is_connected(&self) -> bool {
        self.active.load(Ordering::SeqCst) != 0
    }

    pub fn config(&self) -> &BridgeConfig {
        &self.config
    }

    /// Runs the connect / resubscribe / receive loop.
    ///
    /// Returns only once the bridge has degraded; spawn it on its own task.
    pub async fn run(self: Arc<Self>, hub: Arc<BridgeHub<B>>) {
        let mut attempt: u32 = 0;

        loop {
            let connected = match self.broker.subscriber().await {
                Ok(subscriber) => self.install(Arc::new(subscriber)).await,
                Err(e) => Err(e),
            };
            let (generation, subscriber) = match connected {
                Ok(installed) => installed,
                Err(e) => {
                    attempt += 1;
                    if attempt > self.config.max_retries {
                        self.degraded.store(true, Ordering::SeqCst);
                        error!(
                            attempts = attempt,
                            error = %e,
                            "broker unreachable, giving up; delivering locally only"
                        );
                        return;
                    }
                    let delay = self.config.backoff(attempt);
                    warn!(
                        attempt,
                        ?delay,
                        error = %e,
                        "broker subscriber connect failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    continue;
                }
            };
            attempt = 0;

            self.pump(&hub, &subscriber, generation).await;

            self.detach(generation).await;
            warn!(generation, "broker subscriber connection lost, reconnecting");
            tokio::time::sleep(self.config.backoff(1)).await;
        }
    }

    /// Subscribes every wanted channel on `subscriber` and makes it
    /// current. Any failed `SUBSCRIBE` fails the whole install.
    async fn install(
        &self,
        subscriber: Arc<B::Subscriber>,
    ) -> Result<(u64, Arc<B::Subscriber>), BrokerError> {
        let mut link = self.link.lock().await;
        for room in &link.channels {
            if let Err(e) = subscriber.subscribe(room).await {
                warn!(room = room.as_str(), error = %e, "resubscribe failed");
                return Err(e);
            }
        }

        link.generation += 1;
        link.current = Some(Arc::clone(&subscriber));
        self.active.store(link.generation, Ordering::SeqCst);
        info!(
            rooms = link.channels.len(),
            generation = link.generation,
            "broker bridge connected"
        );
        Ok((link.generation, subscriber))
    }

    /// Hands every incoming message to local delivery until the
    /// connection ends or is retired.
    async fn pump(&self, hub: &BridgeHub<B>, subscriber: &B::Subscriber, generation: u64) {
        loop {
            tokio::select! {
                message = subscriber.next_message() => {
                    let Some(message) = message else {
                        return;
                    };
                    let delivered = hub
                        .deliver_local(&message.channel, &message.payload)
                        .await;
                    trace!(channel = message.channel.as_str(), delivered, "broker message");
                }
                () = self.invalidated.notified() => {
                    // Permits left over from an older connection are ignored.
                    if self.active.load(Ordering::SeqCst) != generation {
                        debug!(generation, "subscriber retired");
                        return;
                    }
                }
            }
        }
    }

    /// Forgets the connection of `generation` if it is still current.
    async fn detach(&self, generation: u64) {
        let mut link = self.link.lock().await;
        if link.generation == generation {
            link.current = None;
            self.active.store(0, Ordering::SeqCst);
        }
    }

    /// Retires the current connection after a failed command. The run
    /// loop reconnects and resubscribes everything in `channels`.
    fn invalidate(&self, link: &mut Link<B::Subscriber>) {
        if link.current.take().is_some() {
            self.active.store(0, Ordering::SeqCst);
            self.invalidated.notify_one();
        }
    }
}

impl<B: Broker> RoomSubscriptions for BrokerBridge<B> {
    type Error = BrokerError;

    /// Records the channel and subscribes it on the current connection.
    ///
    /// Without a connection the channel is subscribed on the next one. A
    /// failed `SUBSCRIBE` retires the connection, so the room is picked up
    /// by the resubscribe that follows. While degraded this is a no-op.
    async fn subscribe(&self, room: &str) -> Result<(), BrokerError> {
        if self.is_degraded() {
            debug!(room, "degraded, subscribe skipped");
            return Ok(());
        }

        let mut link = self.link.lock().await;
        link.channels.insert(room.to_string());
        let Some(subscriber) = link.current.clone() else {
            debug!(room, "no subscriber connection, subscribing on reconnect");
            return Ok(());
        };
        if let Err(e) = subscriber.subscribe(room).await {
            warn!(room, error = %e, "subscribe failed, reconnecting subscriber");
            self.invalidate(&mut link);
        }
        Ok(())
    }

    async fn unsubscribe(&self, room: &str) -> Result<(), BrokerError> {
        if self.is_degraded() {
            debug!(room, "degraded, unsubscribe skipped");
            return Ok(());
        }

        let mut link = self.link.lock().await;
        link.channels.remove(room);
        let Some(subscriber) = link.current.clone() else {
            return Ok(());
        };
        if let Err(e) = subscriber.unsubscribe(room).await {
            warn!(room, error = %e, "unsubscribe failed, reconnecting subscriber");
            self.invalidate(&mut link);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use tablecast_broker::MemoryBroker;
    use tokio::sync::mpsc;

    use super::*;

    fn fast_config(max_retries: u32) -> BridgeConfig {
        BridgeConfig {
            max_retries,
            base_delay: Duration::from_millis(10),
            max_delay: Duration::from_millis(40),
            jitter: Duration::ZERO,
        }
    }

    fn setup(
        config: BridgeConfig,
    ) -> (
        MemoryBroker,
        Arc<BrokerBridge<MemoryBroker>>,
        Arc<BridgeHub<MemoryBroker>>,
    ) {
        let broker = MemoryBroker::new();
        let bridge = Arc::new(BrokerBridge::new(Arc::new(broker.clone()), config));
        let hub = Arc::new(Hub::new(Arc::clone(&bridge)));
        (broker, bridge, hub)
    }

    async fn wait_connected(bridge: &BrokerBridge<MemoryBroker>) {
        for _ in 0..400 {
            if bridge.is_connected() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("bridge did not connect in time");
    }

    async fn wait_for<F, Fut>(mut check: F)
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = bool>,
    {
        for _ in 0..400 {
            if check().await {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("condition not reached in time");
    }

    #[tokio::test]
    async fn test_broker_messages_reach_local_members() {
        let (broker, bridge, hub) = setup(fast_config(3));
        tokio::spawn(Arc::clone(&bridge).run(Arc::clone(&hub)));
        wait_connected(&bridge).await;

        let (tx, mut rx) = mpsc::unbounded_channel();
        let id = hub.admit(tx).await;
        hub.join_room(id, "branch:1").await.unwrap();
        assert_eq!(broker.subscribe_count("branch:1").await, 1);

        broker.publish("branch:1", "one").await.unwrap();
        broker.publish("branch:1", "two").await.unwrap();
        assert_eq!(&*rx.recv().await.unwrap(), "one");
        assert_eq!(&*rx.recv().await.unwrap(), "two");
    }

    #[tokio::test]
    async fn test_reconnect_resubscribes_active_rooms() {
        let (broker, bridge, hub) = setup(fast_config(3));
        tokio::spawn(Arc::clone(&bridge).run(Arc::clone(&hub)));
        wait_connected(&bridge).await;

        let (tx, mut rx) = mpsc::unbounded_channel();
        let id = hub.admit(tx).await;
        hub.join_room(id, "table:7").await.unwrap();
        hub.join_room(id, "gone").await.unwrap();
        hub.leave_room(id, "gone").await;

        broker.drop_subscribers().await;
        let shared = &broker;
        wait_for(|| async move { shared.subscribe_count("table:7").await == 2 }).await;
        wait_connected(&bridge).await;

        assert_eq!(broker.subscribe_count("gone").await, 1);
        assert_eq!(broker.subscribed_channels().await, vec!["table:7".to_string()]);

        broker.publish("table:7", "after").await.unwrap();
        assert_eq!(&*rx.recv().await.unwrap(), "after");
        assert!(!bridge.is_degraded());
    }

    #[tokio::test]
    async fn test_room_created_while_disconnected_is_subscribed_on_connect() {
        let (broker, bridge, hub) = setup(fast_config(3));
        let (tx, mut rx) = mpsc::unbounded_channel();
        let id = hub.admit(tx).await;

        // Not running yet: the room exists and waits for a connection.
        assert!(hub.join_room(id, "branch:2").await.unwrap());
        assert_eq!(broker.subscribe_count("branch:2").await, 0);

        tokio::spawn(Arc::clone(&bridge).run(Arc::clone(&hub)));
        wait_connected(&bridge).await;
        assert_eq!(broker.subscribe_count("branch:2").await, 1);

        broker.publish("branch:2", "late").await.unwrap();
        assert_eq!(&*rx.recv().await.unwrap(), "late");
    }

    #[tokio::test]
    async fn test_failed_subscribe_reconnects_and_resubscribes() {
        let (broker, bridge, hub) = setup(fast_config(3));
        tokio::spawn(Arc::clone(&bridge).run(Arc::clone(&hub)));
        wait_connected(&bridge).await;

        let (tx, mut rx) = mpsc::unbounded_channel();
        let id = hub.admit(tx).await;
        broker.fail_next_subscribes(1);
        assert!(hub.join_room(id, "branch:5").await.unwrap());

        let shared = &broker;
        wait_for(|| async move { shared.subscribe_count("branch:5").await == 1 }).await;
        wait_connected(&bridge).await;
        assert_eq!(broker.live_subscribers().await, 1);
        assert_eq!(broker.subscribed_channels().await, vec!["branch:5".to_string()]);

        broker.publish("branch:5", "served").await.unwrap();
        assert_eq!(&*rx.recv().await.unwrap(), "served");
        assert!(!bridge.is_degraded());
    }

    #[tokio::test]
    async fn test_failed_resubscribe_counts_as_failed_connect() {
        let (broker, bridge, hub) = setup(fast_config(3));
        let (tx, mut rx) = mpsc::unbounded_channel();
        let id = hub.admit(tx).await;
        hub.join_room(id, "table:9").await.unwrap();
        broker.fail_next_subscribes(1);

        tokio::spawn(Arc::clone(&bridge).run(Arc::clone(&hub)));
        wait_connected(&bridge).await;
        assert_eq!(broker.subscribe_count("table:9").await, 1);
        assert_eq!(broker.live_subscribers().await, 1);

        broker.publish("table:9", "served").await.unwrap();
        assert_eq!(&*rx.recv().await.unwrap(), "served");
    }

    #[tokio::test]
    async fn test_slow_room_changes_do_not_stall_delivery() {
        let (broker, bridge, hub) = setup(fast_config(3));
        tokio::spawn(Arc::clone(&bridge).run(Arc::clone(&hub)));
        wait_connected(&bridge).await;

        let (tx, mut rx) = mpsc::unbounded_channel();
        let id = hub.admit(tx).await;
        hub.join_room(id, "branch:1").await.unwrap();

        // Hold the link lock, as a slow SUBSCRIBE would.
        let link = bridge.link.lock().await;
        let (tx2, _rx2) = mpsc::unbounded_channel();
        let other = hub.admit(tx2).await;
        let join = tokio::spawn({
            let hub = Arc::clone(&hub);
            async move { hub.join_room(other, "branch:2").await }
        });

        broker.publish("branch:1", "through").await.unwrap();
        let received = tokio::time::timeout(Duration::from_secs(1), rx.recv()).await;
        assert_eq!(&*received.unwrap().unwrap(), "through");
        assert!(!join.is_finished());

        drop(link);
        assert!(join.await.unwrap().unwrap());
        assert_eq!(broker.subscribe_count("branch:2").await, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_degrades_after_max_retries() {
        let (broker, bridge, hub) = setup(fast_config(3));
        broker.set_accepting_subscribers(false);

        Arc::clone(&bridge).run(Arc::clone(&hub)).await;

        assert!(bridge.is_degraded());
        assert!(!bridge.is_connected());
    }

    #[tokio::test(start_paused = true)]
    async fn test_backoff_elapses_before_degrading() {
        let (broker, bridge, hub) = setup(fast_config(3));
        broker.set_accepting_subscribers(false);

        let start = tokio::time::Instant::now();
        Arc::clone(&bridge).run(Arc::clone(&hub)).await;

        // 10ms + 20ms + 40ms of backoff before the fourth attempt fails.
        assert!(start.elapsed() >= Duration::from_millis(70));
    }

    #[tokio::test]
    async fn test_recovers_from_transient_connect_failures() {
        let (broker, bridge, hub) = setup(fast_config(50));
        broker.set_accepting_subscribers(false);
        tokio::spawn(Arc::clone(&bridge).run(Arc::clone(&hub)));

        tokio::time::sleep(Duration::from_millis(30)).await;
        assert!(!bridge.is_connected());

        broker.set_accepting_subscribers(true);
        wait_connected(&bridge).await;
        assert!(!bridge.is_degraded());
    }

    #[tokio::test]
    async fn test_subscriptions_are_noops_when_degraded() {
        let (broker, bridge, hub) = setup(fast_config(0));
        broker.set_accepting_subscribers(false);
        Arc::clone(&bridge).run(Arc::clone(&hub)).await;
        assert!(bridge.is_degraded());

        assert!(bridge.subscribe("x").await.is_ok());
        assert!(bridge.unsubscribe("x").await.is_ok());
        assert_eq!(broker.subscribe_count("x").await, 0);
    }
}
