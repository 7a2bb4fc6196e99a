//! Error types for the protocol layer.
//!
//! Each crate in Tablecast defines its own error enum. A `ProtocolError`
//! always means the problem is in turning frames into text or text back
//! into frames, never in networking or room bookkeeping.

/// Errors that can occur in the protocol layer.
///
/// None of these close a connection: the handler answers them with an
/// `error` frame and keeps reading.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    /// Serialization failed (turning a Rust value into text).
    #[error("encode failed: {0}")]
    Encode(serde_json::Error),

    /// The frame body is not valid structured text at all.
    #[error("malformed frame: {0}")]
    Decode(serde_json::Error),

    /// The frame is structured but names a `type` this server does not
    /// understand.
    #[error("unknown message type: {0}")]
    UnknownType(String),

    /// The frame parsed but violates the protocol: missing `type`, or a
    /// known type with missing/ill-typed fields.
    #[error("invalid message: {0}")]
    InvalidMessage(String),
}
