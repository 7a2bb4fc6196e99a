//! Unified error type for Tablecast.

use tablecast_broker::BrokerError;
use tablecast_protocol::ProtocolError;
use tablecast_session::SessionError;
use tablecast_transport::TransportError;

/// Top-level error that wraps all crate-specific errors.
///
/// When using the `tablecast` crate, you deal with this single error type
/// instead of importing errors from each sub-crate. The `#[from]`
/// attribute on each variant auto-generates `From` impls, so the `?`
/// operator converts sub-crate errors automatically.
#[derive(Debug, thiserror::Error)]
pub enum TablecastError {
    /// A transport-level error (bind, accept, send, recv).
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// A protocol-level error (encode, decode, invalid frame).
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    /// A session-level error (token verification, token table).
    #[error(transparent)]
    Session(#[from] SessionError),

    /// A broker error (connect, publish, subscribe).
    #[error(transparent)]
    Broker(#[from] BrokerError),
}
