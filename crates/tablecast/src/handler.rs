//! Per-connection handler: frame dispatch and the socket loop.
//!
//! Each accepted connection gets its own Tokio task running
//! [`handle_connection`]. The flow is:
//!   1. Admit the connection into the hub with a fresh outbound queue
//!   2. Spawn a writer task draining that queue into the socket
//!   3. Loop: receive a text frame → [`FrameHandler::handle_frame`] →
//!      queue the reply
//!   4. On close or error, remove the connection from the hub
//!
//! Replies and room deliveries share the one outbound queue, so a client
//! sees them in the order they were produced.

use std::sync::Arc;

use tablecast_broker::Broker;
use tablecast_protocol::{ClientFrame, Codec, JsonCodec, ServerFrame, decode_client_frame};
use tablecast_session::IdentityVerifier;
use tablecast_transport::{Connection, ConnectionId, WebSocketConnection};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::TablecastError;
use crate::bridge::BridgeHub;

/// Turns one decoded client frame into hub operations and a reply.
///
/// Independent of any socket: the connection loop calls it once per
/// inbound text frame, and tests call it directly.
pub struct FrameHandler<B: Broker, V: IdentityVerifier> {
    hub: Arc<BridgeHub<B>>,
    verifier: Arc<V>,
    codec: JsonCodec,
}

impl<B: Broker, V: IdentityVerifier> FrameHandler<B, V> {
    pub fn new(hub: Arc<BridgeHub<B>>, verifier: Arc<V>) -> Self {
        Self {
            hub,
            verifier,
            codec: JsonCodec,
        }
    }

    pub fn hub(&self) -> &Arc<BridgeHub<B>> {
        &self.hub
    }

    /// Handles one inbound text frame from connection `id`.
    ///
    /// Always produces exactly one reply. Undecodable input yields an
    /// `error` frame and leaves the connection untouched.
    pub async fn handle_frame(&self, id: ConnectionId, text: &str) -> ServerFrame {
        let frame = match decode_client_frame(&self.codec, text) {
            Ok(frame) => frame,
            Err(e) => {
                debug!(%id, error = %e, "rejected inbound frame");
                return ServerFrame::error(e.to_string());
            }
        };
        debug!(%id, frame = frame.type_tag(), "inbound frame");

        match frame {
            ClientFrame::Auth { token } => self.authenticate(id, &token).await,
            ClientFrame::Join { room } => match self.hub.join_room(id, &room).await {
                Ok(_) => ServerFrame::joined(room),
                Err(e) => {
                    warn!(%id, room = room.as_str(), error = %e, "join failed");
                    ServerFrame::error(format!("could not join {room}: {e}"))
                }
            },
            ClientFrame::Leave { room } => {
                self.hub.leave_room(id, &room).await;
                ServerFrame::left(room)
            }
            ClientFrame::Ping => ServerFrame::pong(),
        }
    }

    /// Verifies `token`, attaches the identity and joins its scope rooms.
    ///
    /// A repeated `auth` re-attaches and joins again; joins already held
    /// are no-ops. A failed `auth` leaves any earlier identity in place.
    async fn authenticate(&self, id: ConnectionId, token: &str) -> ServerFrame {
        let identity = match self.verifier.verify(token).await {
            Ok(identity) => identity,
            Err(e) => {
                info!(%id, error = %e, "authentication failed");
                return ServerFrame::auth_error(e.to_string());
            }
        };

        if !self.hub.attach_identity(id, &identity.subject_id).await {
            // Disconnected while verifying; nothing left to join.
            return ServerFrame::auth_success(identity.subject_id);
        }

        let rooms = identity.auto_join_rooms();
        for room in &rooms {
            if let Err(e) = self.hub.join_room(id, room).await {
                warn!(%id, room = room.as_str(), error = %e, "scope room join failed");
            }
        }
        info!(
            %id,
            subject = identity.subject_id.as_str(),
            rooms = rooms.len(),
            "connection authenticated"
        );
        ServerFrame::auth_success(identity.subject_id)
    }
}

/// Takes the connection out of the hub, and out of every room it joined,
/// once `handle_connection` returns or unwinds.
///
/// The last member leaving a room triggers its broker unsubscribe, which
/// needs the runtime; `Drop` hands the removal to a spawned task. A
/// connection already removed elsewhere is skipped by `Hub::remove`.
struct ConnectionGuard<B: Broker> {
    id: ConnectionId,
    hub: Arc<BridgeHub<B>>,
}

impl<B: Broker> Drop for ConnectionGuard<B> {
    fn drop(&mut self) {
        let id = self.id;
        let hub = Arc::clone(&self.hub);
        tokio::spawn(async move {
            hub.remove(id).await;
        });
    }
}

/// Handles a single connection from accept to close.
pub(crate) async fn handle_connection<B, V>(
    conn: WebSocketConnection,
    handler: Arc<FrameHandler<B, V>>,
) -> Result<(), TablecastError>
where
    B: Broker,
    V: IdentityVerifier,
{
    let conn = Arc::new(conn);
    let peer = conn.peer_addr();
    let (tx, mut rx) = mpsc::unbounded_channel::<Arc<str>>();

    let id = handler.hub.admit(tx.clone()).await;
    let _guard = ConnectionGuard {
        id,
        hub: Arc::clone(&handler.hub),
    };
    info!(%id, %peer, "connection opened");

    let writer = tokio::spawn({
        let conn = Arc::clone(&conn);
        async move {
            while let Some(frame) = rx.recv().await {
                if let Err(e) = conn.send_text(&frame).await {
                    debug!(%id, error = %e, "send failed, writer stopping");
                    break;
                }
            }
        }
    });

    let result = loop {
        let text = match conn.recv().await {
            Ok(Some(text)) => text,
            Ok(None) => {
                info!(%id, "connection closed cleanly");
                break Ok(());
            }
            Err(e) => {
                debug!(%id, error = %e, "recv error");
                break Err(TablecastError::Transport(e));
            }
        };

        let reply = handler.handle_frame(id, &text).await;
        match handler.codec.encode(&reply) {
            Ok(encoded) => {
                if tx.send(Arc::from(encoded)).is_err() {
                    debug!(%id, "writer gone, closing");
                    break Ok(());
                }
            }
            Err(e) => warn!(%id, error = %e, "failed to encode reply"),
        }
    };

    writer.abort();
    // _guard drops here → hub removal fires.
    result
}
