//! `TablecastServer` builder and server loop.
//!
//! This is the entry point for running a Tablecast instance. It ties
//! together all the layers: transport → protocol → session → hub, with
//! the broker bridge running alongside.

use std::sync::Arc;
use std::time::Duration;

use tablecast_broker::Broker;
use tablecast_room::Hub;
use tablecast_session::IdentityVerifier;
use tablecast_transport::{
    DEFAULT_HANDSHAKE_TIMEOUT, DEFAULT_UPGRADE_PATH, TransportError, WebSocketTransport,
};

use crate::bridge::{BridgeHub, BrokerBridge};
use crate::handler::{FrameHandler, handle_connection};
use crate::{BridgeConfig, Publisher, PublisherConfig, TablecastError};

/// Builder for configuring and starting a Tablecast server.
///
/// # Example
///
/// ```rust,no_run
/// use std::time::Duration;
///
/// use tablecast::prelude::*;
///
/// # async fn start() -> Result<(), TablecastError> {
/// let server = TablecastServerBuilder::new()
///     .bind("0.0.0.0:8080")
///     .path("/ws")
///     .handshake_timeout(Duration::from_secs(5))
///     .build(MemoryBroker::new(), StaticVerifier::new())
///     .await?;
/// let publisher = server.publisher();
/// server.run().await
/// # }
/// ```
pub struct TablecastServerBuilder {
    bind_addr: String,
    path: String,
    handshake_timeout: Duration,
    bridge_config: BridgeConfig,
    publisher_config: PublisherConfig,
}

impl TablecastServerBuilder {
    /// Creates a new builder with default settings.
    pub fn new() -> Self {
        Self {
            bind_addr: "127.0.0.1:8080".to_string(),
            path: DEFAULT_UPGRADE_PATH.to_string(),
            handshake_timeout: DEFAULT_HANDSHAKE_TIMEOUT,
            bridge_config: BridgeConfig::default(),
            publisher_config: PublisherConfig::default(),
        }
    }

    /// Sets the address to bind the server to.
    pub fn bind(mut self, addr: &str) -> Self {
        self.bind_addr = addr.to_string();
        self
    }

    /// Sets the WebSocket upgrade path.
    pub fn path(mut self, path: &str) -> Self {
        self.path = path.to_string();
        self
    }

    /// Sets how long a client may take to complete the upgrade handshake.
    pub fn handshake_timeout(mut self, timeout: Duration) -> Self {
        self.handshake_timeout = timeout;
        self
    }

    /// Sets the broker bridge's reconnect policy.
    pub fn bridge_config(mut self, config: BridgeConfig) -> Self {
        self.bridge_config = config;
        self
    }

    /// Sets the publisher configuration.
    pub fn publisher_config(mut self, config: PublisherConfig) -> Self {
        self.publisher_config = config;
        self
    }

    /// Binds the listener and wires the hub, bridge and publisher around
    /// `broker` and `verifier`.
    pub async fn build<B, V>(
        self,
        broker: B,
        verifier: V,
    ) -> Result<TablecastServer<B, V>, TablecastError>
    where
        B: Broker,
        V: IdentityVerifier,
    {
        let transport = WebSocketTransport::bind_with_path(&self.bind_addr, &self.path)
            .await?
            .with_handshake_timeout(self.handshake_timeout);

        let broker = Arc::new(broker);
        let bridge = Arc::new(BrokerBridge::new(Arc::clone(&broker), self.bridge_config));
        let hub = Arc::new(Hub::new(Arc::clone(&bridge)));
        let publisher = Publisher::new(
            broker,
            Arc::clone(&bridge),
            Arc::clone(&hub),
            self.publisher_config,
        );
        let handler = Arc::new(FrameHandler::new(Arc::clone(&hub), Arc::new(verifier)));

        Ok(TablecastServer {
            transport,
            bridge,
            hub,
            publisher,
            handler,
        })
    }
}

impl Default for TablecastServerBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// A Tablecast server instance.
///
/// Call [`run()`](Self::run) to start the broker bridge and accept
/// connections. Grab a [`publisher()`](Self::publisher) first if the
/// process also produces events.
pub struct TablecastServer<B: Broker, V: IdentityVerifier> {
    transport: WebSocketTransport,
    bridge: Arc<BrokerBridge<B>>,
    hub: Arc<BridgeHub<B>>,
    publisher: Publisher<B>,
    handler: Arc<FrameHandler<B, V>>,
}

impl<B, V> TablecastServer<B, V>
where
    B: Broker,
    V: IdentityVerifier,
{
    /// Returns the local address the server is bound to.
    pub fn local_addr(&self) -> std::io::Result<std::net::SocketAddr> {
        self.transport.local_addr()
    }

    /// Returns a handle for publishing events to rooms.
    pub fn publisher(&self) -> Publisher<B> {
        self.publisher.clone()
    }

    /// Returns the connection registry and room index.
    pub fn hub(&self) -> &Arc<BridgeHub<B>> {
        &self.hub
    }

    /// Returns the broker bridge.
    pub fn bridge(&self) -> &Arc<BrokerBridge<B>> {
        &self.bridge
    }

    /// Runs the server.
    ///
    /// Spawns the broker bridge, then accepts incoming connections. Each
    /// connection is upgraded and handled on its own task, so the accept
    /// loop never waits on a client. Runs until the process is terminated.
    pub async fn run(self) -> Result<(), TablecastError> {
        tokio::spawn(Arc::clone(&self.bridge).run(Arc::clone(&self.hub)));

        tracing::info!(path = self.transport.path(), "Tablecast server running");

        loop {
            let pending = match self.transport.accept_stream().await {
                Ok(pending) => pending,
                Err(e) => {
                    tracing::error!(error = %e, "accept failed");
                    continue;
                }
            };

            let handler = Arc::clone(&self.handler);
            tokio::spawn(async move {
                let peer = pending.peer_addr();
                let conn = match pending.upgrade().await {
                    Ok(conn) => conn,
                    Err(TransportError::PathRejected(path)) => {
                        tracing::debug!(%peer, path = path.as_str(), "upgrade on unknown path refused");
                        return;
                    }
                    Err(e) => {
                        tracing::debug!(%peer, error = %e, "upgrade failed");
                        return;
                    }
                };
                if let Err(e) = handle_connection(conn, handler).await {
                    tracing::debug!(error = %e, "connection ended with error");
                }
            });
        }
    }
}
