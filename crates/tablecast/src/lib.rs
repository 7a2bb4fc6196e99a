//! # Tablecast
//!
//! Real-time event distribution for a multi-tenant restaurant platform.
//!
//! Browser clients (staff dashboards, customer tablets) hold a WebSocket
//! open and are grouped into named rooms such as `branch:<id>` or
//! `table:<id>`. Business code publishes domain events to a room; every
//! member of that room on every server instance receives them. Instances
//! are kept consistent through a shared publish/subscribe broker.
//!
//! ## Layers
//!
//! - [`BrokerBridge`] — the one broker subscriber per process; delivers
//!   channel traffic to local room members and resubscribes on reconnect
//! - [`Publisher`] — publishes to the broker, falling back to local
//!   delivery when the broker is unavailable
//! - [`FrameHandler`] — answers `auth`, `join`, `leave` and `ping` frames
//! - [`TablecastServer`] — binds the WebSocket listener and runs it all
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use tablecast::prelude::*;
//!
//! # async fn start() -> Result<(), TablecastError> {
//! let server = TablecastServerBuilder::new()
//!     .bind("0.0.0.0:8080")
//!     .build(MemoryBroker::new(), StaticVerifier::new())
//!     .await?;
//!
//! let publisher = server.publisher();
//! tokio::spawn(server.run());
//!
//! let event = EventEnvelope::new("order:created", serde_json::json!({ "orderId": 17 }));
//! publisher.publish("branch:1", &event).await;
//! # Ok(())
//! # }
//! ```

mod bridge;
mod config;
mod error;
mod handler;
mod publisher;
mod server;

pub use bridge::{BridgeHub, BrokerBridge};
pub use config::{BridgeConfig, PublisherConfig};
pub use error::TablecastError;
pub use handler::FrameHandler;
pub use publisher::{Delivery, PublishStats, Publisher};
pub use server::{TablecastServer, TablecastServerBuilder};

/// Commonly used types, re-exported for convenience.
///
/// ```rust
/// use tablecast::prelude::*;
/// ```
pub mod prelude {
    pub use crate::{
        BridgeConfig, Delivery, PublishStats, Publisher, PublisherConfig, TablecastError,
        TablecastServer, TablecastServerBuilder,
    };

    pub use tablecast_broker::{Broker, BrokerError, MemoryBroker};
    #[cfg(feature = "redis")]
    pub use tablecast_broker::{RedisBroker, RedisConfig};
    pub use tablecast_protocol::{ClientFrame, EventEnvelope, ServerFrame};
    pub use tablecast_session::{Identity, IdentityVerifier, ScopeKind, SessionError, StaticVerifier};
    pub use tablecast_transport::ConnectionId;
}
