//! WebSocket transport implementation using `tokio-tungstenite`.

use std::net::SocketAddr;
use std::time::Duration;

use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Mutex;
use tokio_tungstenite::tungstenite::handshake::server::{
    ErrorResponse, Request, Response,
};
use tokio_tungstenite::tungstenite::http::StatusCode;
use tokio_tungstenite::tungstenite::Message;

use crate::{Connection, Transport, TransportError};

/// Upgrade path used when none is configured.
pub const DEFAULT_UPGRADE_PATH: &str = "/ws";

/// How long a client gets to complete the upgrade handshake.
pub const DEFAULT_HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

type WsStream = tokio_tungstenite::WebSocketStream<TcpStream>;

/// A WebSocket-based [`Transport`] that listens for incoming connections.
///
/// Only upgrade requests addressed to the configured path are accepted;
/// anything else is answered with `404 Not Found` during the handshake.
///
/// [`accept_stream`](Self::accept_stream) returns as soon as a TCP
/// connection arrives; the handshake itself runs in
/// [`PendingUpgrade::upgrade`], so a server can do it on the connection's
/// own task and one slow client never holds up the next accept.
pub struct WebSocketTransport {
    listener: TcpListener,
    path: String,
    handshake_timeout: Duration,
}

impl WebSocketTransport {
    /// Binds a new WebSocket transport to the given address, accepting
    /// upgrades on [`DEFAULT_UPGRADE_PATH`].
    pub async fn bind(addr: &str) -> Result<Self, TransportError> {
        Self::bind_with_path(addr, DEFAULT_UPGRADE_PATH).await
    }

    /// Binds a new WebSocket transport that accepts upgrades on `path`.
    pub async fn bind_with_path(
        addr: &str,
        path: &str,
    ) -> Result<Self, TransportError> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(TransportError::AcceptFailed)?;
        tracing::info!(addr, path, "WebSocket transport listening");
        Ok(Self {
            listener,
            path: path.to_string(),
            handshake_timeout: DEFAULT_HANDSHAKE_TIMEOUT,
        })
    }

    /// Bounds every upgrade handshake by `timeout`.
    pub fn with_handshake_timeout(mut self, timeout: Duration) -> Self {
        self.handshake_timeout = timeout;
        self
    }

    /// Waits for the next TCP connection without upgrading it.
    pub async fn accept_stream(&self) -> Result<PendingUpgrade, TransportError> {
        let (stream, peer) = self
            .listener
            .accept()
            .await
            .map_err(TransportError::AcceptFailed)?;
        Ok(PendingUpgrade {
            stream,
            peer,
            path: self.path.clone(),
            timeout: self.handshake_timeout,
        })
    }

    /// Returns the local address the listener is bound to.
    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Returns the upgrade path this transport accepts.
    pub fn path(&self) -> &str {
        &self.path
    }
}

impl Transport for WebSocketTransport {
    type Connection = WebSocketConnection;
    type Error = TransportError;

    async fn accept(&mut self) -> Result<Self::Connection, Self::Error> {
        self.accept_stream().await?.upgrade().await
    }

    async fn shutdown(&self) -> Result<(), Self::Error> {
        Ok(())
    }
}

/// A TCP connection that has not finished its WebSocket handshake.
pub struct PendingUpgrade {
    stream: TcpStream,
    peer: SocketAddr,
    path: String,
    timeout: Duration,
}

impl PendingUpgrade {
    pub fn peer_addr(&self) -> SocketAddr {
        self.peer
    }

    /// Runs the upgrade handshake, refusing any path but the configured
    /// one with `404 Not Found`.
    pub async fn upgrade(self) -> Result<WebSocketConnection, TransportError> {
        let Self {
            stream,
            peer,
            path,
            timeout,
        } = self;

        let mut rejected: Option<String> = None;
        let expected = path.as_str();
        let check_path = |req: &Request, resp: Response| {
            let requested = req.uri().path();
            if requested == expected {
                Ok(resp)
            } else {
                rejected = Some(requested.to_string());
                let mut err = ErrorResponse::new(Some("not found".into()));
                *err.status_mut() = StatusCode::NOT_FOUND;
                Err(err)
            }
        };

        let handshake = tokio::time::timeout(
            timeout,
            tokio_tungstenite::accept_hdr_async(stream, check_path),
        )
        .await;
        let ws = match handshake {
            Ok(Ok(ws)) => ws,
            Ok(Err(e)) => {
                if let Some(path) = rejected {
                    tracing::debug!(%peer, path, "upgrade rejected");
                    return Err(TransportError::PathRejected(path));
                }
                return Err(TransportError::AcceptFailed(std::io::Error::new(
                    std::io::ErrorKind::ConnectionRefused,
                    e,
                )));
            }
            Err(_) => {
                tracing::debug!(%peer, ?timeout, "upgrade handshake timed out");
                return Err(TransportError::HandshakeTimeout(timeout));
            }
        };

        tracing::debug!(%peer, "accepted WebSocket connection");

        let (sink, stream) = ws.split();
        Ok(WebSocketConnection {
            peer,
            sink: Mutex::new(sink),
            stream: Mutex::new(stream),
        })
    }
}

/// A single WebSocket connection.
///
/// The socket is split so the writer half and the reader half are locked
/// independently.
pub struct WebSocketConnection {
    peer: SocketAddr,
    sink: Mutex<SplitSink<WsStream, Message>>,
    stream: Mutex<SplitStream<WsStream>>,
}

impl Connection for WebSocketConnection {
    type Error = TransportError;

    async fn send_text(&self, text: &str) -> Result<(), Self::Error> {
        self.sink
            .lock()
            .await
            .send(Message::text(text.to_owned()))
            .await
            .map_err(|e| {
                TransportError::SendFailed(std::io::Error::new(
                    std::io::ErrorKind::BrokenPipe,
                    e,
                ))
            })
    }

    async fn recv(&self) -> Result<Option<String>, Self::Error> {
        let mut stream = self.stream.lock().await;
        loop {
            match stream.next().await {
                Some(Ok(Message::Text(text))) => {
                    return Ok(Some(text.to_string()));
                }
                // Binary frames are accepted but must still hold a JSON
                // document; invalid UTF-8 surfaces later as a decode error.
                Some(Ok(Message::Binary(data))) => {
                    return Ok(Some(
                        String::from_utf8_lossy(&data).into_owned(),
                    ));
                }
                Some(Ok(Message::Close(_))) | None => return Ok(None),
                Some(Ok(_)) => continue, // ping/pong/raw frame
                Some(Err(e)) => {
                    return Err(TransportError::ReceiveFailed(
                        std::io::Error::new(
                            std::io::ErrorKind::ConnectionReset,
                            e,
                        ),
                    ));
                }
            }
        }
    }

    async fn close(&self) -> Result<(), Self::Error> {
        self.sink
            .lock()
            .await
            .send(Message::Close(None))
            .await
            .map_err(|e| {
                TransportError::SendFailed(std::io::Error::new(
                    std::io::ErrorKind::BrokenPipe,
                    e,
                ))
            })
    }

    fn peer_addr(&self) -> SocketAddr {
        self.peer
    }
}
