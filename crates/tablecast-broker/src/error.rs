//! Error types for the broker layer.

use std::time::Duration;

/// Errors that can occur talking to the publish/subscribe broker.
///
/// None of these reach business code: the publisher turns them into a
/// local-only delivery and the bridge turns them into a reconnect.
#[derive(Debug, thiserror::Error)]
pub enum BrokerError {
    /// Opening a broker connection failed.
    #[error("broker connection failed: {0}")]
    Connection(String),

    /// `PUBLISH` was rejected or the connection broke mid-command.
    #[error("publish to {channel} failed: {reason}")]
    Publish { channel: String, reason: String },

    /// `SUBSCRIBE`/`UNSUBSCRIBE` was not acknowledged.
    #[error("subscription change for {channel} failed: {reason}")]
    Subscribe { channel: String, reason: String },

    /// The broker did not answer in time.
    #[error("broker timed out after {0:?}")]
    Timeout(Duration),

    /// There is currently no live subscriber connection.
    #[error("subscriber connection is down")]
    Disconnected,

    /// The broker is switched off or deliberately unreachable.
    #[error("broker unavailable")]
    Unavailable,
}
