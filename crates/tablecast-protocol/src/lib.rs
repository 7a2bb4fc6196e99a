//! Wire protocol for Tablecast.
//!
//! This crate defines the "language" that browser clients and the server
//! speak:
//!
//! - **Types** ([`ClientFrame`], [`ServerFrame`], [`EventEnvelope`]) —
//!   the frames that travel on the wire.
//! - **Codec** ([`Codec`] trait, [`JsonCodec`]) — how frames become text
//!   and back.
//! - **Errors** ([`ProtocolError`]) — what can go wrong while doing so.
//!
//! # Architecture
//!
//! The protocol layer sits between transport (raw text frames) and the
//! frame handler. It knows nothing about connections, rooms, or brokers.
//!
//! ```text
//! Transport (text) → Protocol (ClientFrame) → Handler (rooms, auth)
//! ```

mod codec;
mod error;
mod types;

pub use codec::{Codec, JsonCodec, decode_client_frame};
pub use error::ProtocolError;
pub use types::{ClientFrame, EventEnvelope, ServerFrame, now_millis};
