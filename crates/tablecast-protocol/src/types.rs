//! Core protocol types for Tablecast's wire format.
//!
//! Every type here travels "on the wire": it is serialized to a JSON text
//! frame, sent over a WebSocket (or through the broker), and parsed on the
//! other side. All frames share one shape, `{ "type": ..., ...fields }`,
//! so a browser client can switch on `type` without knowing anything else.

use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};

/// Returns the current wall-clock time in milliseconds since the Unix
/// epoch. Every server-built frame is stamped with this value.
///
/// A clock set before 1970 yields `0` rather than failing; timestamps are
/// informational only.
pub fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default()
}

// ---------------------------------------------------------------------------
// ClientFrame — client → server
// ---------------------------------------------------------------------------

/// A frame sent by a client.
///
/// `#[serde(tag = "type")]` makes this "internally tagged":
///   `{ "type": "join", "room": "branch:1" }`
/// instead of serde's default `{ "Join": { "room": "branch:1" } }`.
/// `rename_all = "lowercase"` turns `Join` into `"join"`.
///
/// Unknown extra fields are ignored, so older servers keep working when a
/// newer client sends more than they expect.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ClientFrame {
    /// Authenticate this connection with a token issued elsewhere.
    Auth { token: String },

    /// Join a named room. Any room name is accepted.
    Join { room: String },

    /// Leave a named room.
    Leave { room: String },

    /// Liveness check; answered with `pong`.
    Ping,
}

impl ClientFrame {
    /// Every `type` tag a client may send.
    pub const TYPES: [&'static str; 4] = ["auth", "join", "leave", "ping"];

    /// Returns the `type` tag of this frame.
    pub fn type_tag(&self) -> &'static str {
        match self {
            Self::Auth { .. } => "auth",
            Self::Join { .. } => "join",
            Self::Leave { .. } => "leave",
            Self::Ping => "ping",
        }
    }
}

// ---------------------------------------------------------------------------
// ServerFrame — server → client replies
// ---------------------------------------------------------------------------

/// A reply frame sent by the server in response to a [`ClientFrame`].
///
/// Tags are set per variant because some contain a colon
/// (`"auth:success"`), which no `rename_all` rule produces.
///
/// Domain events are *not* `ServerFrame`s; they travel as
/// [`EventEnvelope`]s and share only the `type` field convention.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ServerFrame {
    /// The token was accepted. `userId` is the verified subject id.
    #[serde(rename = "auth:success")]
    AuthSuccess {
        #[serde(rename = "userId")]
        user_id: String,
        timestamp: u64,
    },

    /// The token was rejected. The connection stays open.
    #[serde(rename = "auth:error")]
    AuthError { message: String, timestamp: u64 },

    /// The connection is now a member of `room`.
    #[serde(rename = "joined")]
    Joined { room: String, timestamp: u64 },

    /// The connection is no longer a member of `room`.
    #[serde(rename = "left")]
    Left { room: String, timestamp: u64 },

    /// Answer to `ping`.
    #[serde(rename = "pong")]
    Pong { timestamp: u64 },

    /// The inbound frame could not be understood.
    #[serde(rename = "error")]
    Error { message: String },
}

impl ServerFrame {
    pub fn auth_success(user_id: impl Into<String>) -> Self {
        Self::AuthSuccess {
            user_id: user_id.into(),
            timestamp: now_millis(),
        }
    }

    pub fn auth_error(message: impl Into<String>) -> Self {
        Self::AuthError {
            message: message.into(),
            timestamp: now_millis(),
        }
    }

    pub fn joined(room: impl Into<String>) -> Self {
        Self::Joined {
            room: room.into(),
            timestamp: now_millis(),
        }
    }

    pub fn left(room: impl Into<String>) -> Self {
        Self::Left {
            room: room.into(),
            timestamp: now_millis(),
        }
    }

    pub fn pong() -> Self {
        Self::Pong {
            timestamp: now_millis(),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self::Error {
            message: message.into(),
        }
    }
}

// ---------------------------------------------------------------------------
// EventEnvelope — domain events
// ---------------------------------------------------------------------------

/// A real-time domain event: a type tag, an opaque JSON payload, and the
/// moment it was created.
///
/// ```text
/// { "type": "order:updated", "payload": { "orderId": 17 }, "timestamp": 1718000000000 }
/// ```
///
/// The envelope is immutable once built: fields are private and only
/// readable. The same serialized text goes to the broker and, unchanged,
/// to every client socket.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventEnvelope {
    #[serde(rename = "type")]
    event_type: String,
    payload: serde_json::Value,
    timestamp: u64,
}

impl EventEnvelope {
    /// Builds an envelope stamped with the current time.
    pub fn new(
        event_type: impl Into<String>,
        payload: serde_json::Value,
    ) -> Self {
        Self::with_timestamp(event_type, payload, now_millis())
    }

    /// Builds an envelope with an explicit timestamp (milliseconds since
    /// the Unix epoch).
    pub fn with_timestamp(
        event_type: impl Into<String>,
        payload: serde_json::Value,
        timestamp: u64,
    ) -> Self {
        Self {
            event_type: event_type.into(),
            payload,
            timestamp,
        }
    }

    /// The domain type tag, e.g. `"order:created"`.
    pub fn event_type(&self) -> &str {
        &self.event_type
    }

    /// The opaque event payload.
    pub fn payload(&self) -> &serde_json::Value {
        &self.payload
    }

    /// Creation time in milliseconds since the Unix epoch.
    pub fn timestamp(&self) -> u64 {
        self.timestamp
    }
}

// =========================================================================
// Tests
// =========================================================================
