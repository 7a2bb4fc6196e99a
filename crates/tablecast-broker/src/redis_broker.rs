//! Redis `PUBLISH`/`SUBSCRIBE` broker.

use std::time::Duration;

use futures_util::StreamExt;
use redis::AsyncCommands;
use redis::aio::{MultiplexedConnection, PubSubSink, PubSubStream};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tokio::time::timeout;
use tracing::{info, trace, warn};

use crate::{Broker, BrokerError, BrokerMessage, Subscriber};

/// Redis connection settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RedisConfig {
    /// Redis connection URL.
    pub url: String,
    /// Upper bound for connecting and for every single command.
    #[serde(default = "default_command_timeout_ms")]
    pub command_timeout_ms: u64,
}

fn default_command_timeout_ms() -> u64 {
    2_000
}

impl RedisConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            command_timeout_ms: default_command_timeout_ms(),
        }
    }

    pub fn command_timeout(&self) -> Duration {
        Duration::from_millis(self.command_timeout_ms)
    }
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self::new("redis://localhost:6379")
    }
}

/// Redis-backed [`Broker`].
///
/// Publishing goes through one multiplexed connection shared by every
/// caller; each [`subscriber`](Broker::subscriber) call opens its own
/// pub/sub connection.
pub struct RedisBroker {
    client: redis::Client,
    publisher: MultiplexedConnection,
    config: RedisConfig,
}

impl RedisBroker {
    /// Opens the publishing connection.
    pub async fn connect(config: RedisConfig) -> Result<Self, BrokerError> {
        let client = redis::Client::open(config.url.as_str())
            .map_err(|e| BrokerError::Connection(e.to_string()))?;

        let publisher = timeout(
            config.command_timeout(),
            client.get_multiplexed_async_connection(),
        )
        .await
        .map_err(|_| BrokerError::Timeout(config.command_timeout()))?
        .map_err(|e| BrokerError::Connection(e.to_string()))?;

        info!(url = %config.url, "connected to Redis");

        Ok(Self {
            client,
            publisher,
            config,
        })
    }
}

impl Broker for RedisBroker {
    type Subscriber = RedisSubscriber;

    async fn publish(&self, channel: &str, payload: &str) -> Result<(), BrokerError> {
        let mut conn = self.publisher.clone();
        let limit = self.config.command_timeout();

        let published: Result<Result<i64, redis::RedisError>, _> =
            timeout(limit, conn.publish(channel, payload)).await;

        let receivers = published
            .map_err(|_| BrokerError::Timeout(limit))?
            .map_err(|e| BrokerError::Publish {
                channel: channel.to_string(),
                reason: e.to_string(),
            })?;

        trace!(channel, receivers, "published to Redis");
        Ok(())
    }

    async fn subscriber(&self) -> Result<RedisSubscriber, BrokerError> {
        let limit = self.config.command_timeout();
        let pubsub = timeout(limit, self.client.get_async_pubsub())
            .await
            .map_err(|_| BrokerError::Timeout(limit))?
            .map_err(|e| BrokerError::Connection(e.to_string()))?;

        // Split so SUBSCRIBE/UNSUBSCRIBE can be issued while another task
        // is parked on the message stream.
        let (sink, stream) = pubsub.split();

        info!(url = %self.config.url, "opened Redis subscriber connection");

        Ok(RedisSubscriber {
            sink: Mutex::new(sink),
            stream: Mutex::new(stream),
            limit,
        })
    }
}

/// A dedicated Redis pub/sub connection.
pub struct RedisSubscriber {
    sink: Mutex<PubSubSink>,
    stream: Mutex<PubSubStream>,
    limit: Duration,
}

impl RedisSubscriber {
    async fn sink(&self) -> PubSubSink {
        self.sink.lock().await.clone()
    }
}

impl Subscriber for RedisSubscriber {
    async fn subscribe(&self, channel: &str) -> Result<(), BrokerError> {
        let mut sink = self.sink().await;
        timeout(self.limit, sink.subscribe(channel))
            .await
            .map_err(|_| BrokerError::Timeout(self.limit))?
            .map_err(|e| BrokerError::Subscribe {
                channel: channel.to_string(),
                reason: e.to_string(),
            })
    }

    async fn unsubscribe(&self, channel: &str) -> Result<(), BrokerError> {
        let mut sink = self.sink().await;
        timeout(self.limit, sink.unsubscribe(channel))
            .await
            .map_err(|_| BrokerError::Timeout(self.limit))?
            .map_err(|e| BrokerError::Subscribe {
                channel: channel.to_string(),
                reason: e.to_string(),
            })
    }

    async fn next_message(&self) -> Option<BrokerMessage> {
        let mut stream = self.stream.lock().await;
        loop {
            let msg = stream.next().await?;
            match msg.get_payload::<String>() {
                Ok(payload) => {
                    return Some(BrokerMessage {
                        channel: msg.get_channel_name().to_string(),
                        payload,
                    });
                }
                Err(e) => {
                    warn!(
                        channel = msg.get_channel_name(),
                        error = %e,
                        "dropping non-text Redis message"
                    );
                }
            }
        }
    }
}
