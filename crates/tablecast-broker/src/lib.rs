//! Publish/subscribe broker layer for Tablecast.
//!
//! The room index on a process is strictly local. What makes rooms look
//! unified across several server instances is a shared broker: every
//! process subscribes to one channel per active room and publishes events
//! to the channel named after the target room.
//!
//! # Key types
//!
//! - [`Broker`] — publishing client + factory for subscriber connections
//! - [`Subscriber`] — one dedicated subscriber connection
//! - [`MemoryBroker`] — in-process broker (single instance, tests)
//! - [`RedisBroker`] — Redis `PUBLISH`/`SUBSCRIBE` (feature `redis`)
//!
//! Publishing and subscribing deliberately use separate connections: a
//! subscriber connection spends its life blocked waiting for messages and
//! cannot serve request/response traffic.

mod error;
mod memory;
#[cfg(feature = "redis")]
mod redis_broker;

use std::future::Future;

pub use error::BrokerError;
pub use memory::{MemoryBroker, MemorySubscriber};
#[cfg(feature = "redis")]
pub use redis_broker::{RedisBroker, RedisConfig, RedisSubscriber};

/// A message received on a subscribed channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrokerMessage {
    /// The channel it was published to (equal to the room name).
    pub channel: String,
    /// The published text, unchanged.
    pub payload: String,
}

/// A publish/subscribe broker.
///
/// `publish` goes through a shared client; [`subscriber`](Broker::subscriber)
/// opens a new, dedicated connection each time it is called. The bridge
/// holds exactly one subscriber at a time and calls `subscriber` again only
/// after the previous one died.
pub trait Broker: Send + Sync + 'static {
    /// The subscriber connection type.
    type Subscriber: Subscriber;

    /// `PUBLISH channel payload`.
    fn publish(
        &self,
        channel: &str,
        payload: &str,
    ) -> impl Future<Output = Result<(), BrokerError>> + Send;

    /// Opens a dedicated subscriber connection with no subscriptions.
    fn subscriber(
        &self,
    ) -> impl Future<Output = Result<Self::Subscriber, BrokerError>> + Send;
}

/// A dedicated subscriber connection.
///
/// Subscription changes and message receipt may run concurrently: one task
/// parks in [`next_message`](Subscriber::next_message) while others call
/// [`subscribe`](Subscriber::subscribe) / [`unsubscribe`](Subscriber::unsubscribe).
pub trait Subscriber: Send + Sync + 'static {
    /// `SUBSCRIBE channel`, resolving once the broker acknowledged it.
    fn subscribe(
        &self,
        channel: &str,
    ) -> impl Future<Output = Result<(), BrokerError>> + Send;

    /// `UNSUBSCRIBE channel`, resolving once the broker acknowledged it.
    fn unsubscribe(
        &self,
        channel: &str,
    ) -> impl Future<Output = Result<(), BrokerError>> + Send;

    /// Waits for the next message on any subscribed channel.
    ///
    /// Messages of one channel arrive in publish order. `None` means the
    /// connection is gone for good; open a new subscriber. Dropping the
    /// future before it resolves loses no message.
    fn next_message(&self) -> impl Future<Output = Option<BrokerMessage>> + Send;
}
