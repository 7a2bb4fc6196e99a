//! Codec trait and implementations for serializing/deserializing frames.
//!
//! A "codec" (coder/decoder) converts between Rust values and the text
//! that travels over the socket and through the broker. The handler and
//! the publisher only depend on the [`Codec`] trait, so swapping the wire
//! format touches nothing else.

use serde::{Serialize, de::DeserializeOwned};

use crate::{ClientFrame, ProtocolError};

/// A codec that can encode Rust values to text and decode text back.
///
/// `Send + Sync + 'static` because one codec instance is shared by every
/// connection task for the lifetime of the server.
pub trait Codec: Send + Sync + 'static {
    /// Serializes a value into a text frame.
    ///
    /// # Errors
    /// Returns `ProtocolError::Encode` if the value cannot be represented.
    fn encode<T: Serialize>(&self, value: &T) -> Result<String, ProtocolError>;

    /// Deserializes a text frame back into a value.
    ///
    /// # Errors
    /// Returns `ProtocolError::Decode` if the text is malformed or does
    /// not match the expected shape.
    fn decode<T: DeserializeOwned>(&self, text: &str) -> Result<T, ProtocolError>;
}

/// Decodes an inbound client frame, classifying what went wrong.
///
/// Three failure modes are told apart so the `error` reply is useful:
/// - the body is not structured text → [`ProtocolError::Decode`]
/// - the `type` tag is missing or unknown →
///   [`ProtocolError::InvalidMessage`] / [`ProtocolError::UnknownType`]
/// - the tag is known but its fields are wrong →
///   [`ProtocolError::InvalidMessage`]
pub fn decode_client_frame(
    codec: &impl Codec,
    text: &str,
) -> Result<ClientFrame, ProtocolError> {
    let value: serde_json::Value = codec.decode(text)?;

    let tag = match value.get("type").and_then(serde_json::Value::as_str) {
        Some(tag) => tag.to_owned(),
        None => {
            return Err(ProtocolError::InvalidMessage(
                "frame has no \"type\" field".into(),
            ));
        }
    };

    if !ClientFrame::TYPES.contains(&tag.as_str()) {
        return Err(ProtocolError::UnknownType(tag));
    }

    serde_json::from_value(value).map_err(|e| {
        ProtocolError::InvalidMessage(format!("invalid {tag} frame: {e}"))
    })
}

// ---------------------------------------------------------------------------
// JsonCodec
// ---------------------------------------------------------------------------

/// A [`Codec`] that uses JSON (via `serde_json`).
///
/// JSON is what the browser dashboard and ordering flow speak natively,
/// and it is readable in DevTools and in `redis-cli MONITOR`.
///
/// ## Example
///
/// ```rust
/// use tablecast_protocol::{Codec, JsonCodec, ServerFrame};
///
/// let codec = JsonCodec;
/// let text = codec.encode(&ServerFrame::error("nope")).unwrap();
/// assert_eq!(text, r#"{"type":"error","message":"nope"}"#);
/// ```
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonCodec;

impl Codec for JsonCodec {
    fn encode<T: Serialize>(&self, value: &T) -> Result<String, ProtocolError> {
        serde_json::to_string(value).map_err(ProtocolError::Encode)
    }

    fn decode<T: DeserializeOwned>(&self, text: &str) -> Result<T, ProtocolError> {
        serde_json::from_str(text).map_err(ProtocolError::Decode)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_client_frame_valid() {
        let frame =
            decode_client_frame(&JsonCodec, r#"{"type":"leave","room":"X"}"#)
                .unwrap();
        assert_eq!(frame, ClientFrame::Leave { room: "X".into() });
    }

    #[test]
    fn test_decode_client_frame_not_json() {
        let err = decode_client_frame(&JsonCodec, "not json at all").unwrap_err();
        assert!(matches!(err, ProtocolError::Decode(_)));
    }

    #[test]
    fn test_decode_client_frame_missing_type() {
        let err = decode_client_frame(&JsonCodec, r#"{"room":"X"}"#).unwrap_err();
        assert!(matches!(err, ProtocolError::InvalidMessage(_)));
    }

    #[test]
    fn test_decode_client_frame_non_object() {
        let err = decode_client_frame(&JsonCodec, "[1,2,3]").unwrap_err();
        assert!(matches!(err, ProtocolError::InvalidMessage(_)));
    }

    #[test]
    fn test_decode_client_frame_unknown_type() {
        let err =
            decode_client_frame(&JsonCodec, r#"{"type":"teleport"}"#).unwrap_err();
        match err {
            ProtocolError::UnknownType(tag) => assert_eq!(tag, "teleport"),
            other => panic!("expected UnknownType, got {other:?}"),
        }
    }

    #[test]
    fn test_decode_client_frame_known_type_bad_fields() {
        let err =
            decode_client_frame(&JsonCodec, r#"{"type":"auth","token":5}"#)
                .unwrap_err();
        match err {
            ProtocolError::InvalidMessage(msg) => {
                assert!(msg.starts_with("invalid auth frame"), "{msg}");
            }
            other => panic!("expected InvalidMessage, got {other:?}"),
        }
    }

    #[test]
    fn test_unknown_type_error_message() {
        let err = ProtocolError::UnknownType("teleport".into());
        assert_eq!(err.to_string(), "unknown message type: teleport");
    }

    #[test]
    fn test_json_codec_keeps_envelope_payload_verbatim() {
        let env = crate::EventEnvelope::new(
            "order:created",
            serde_json::json!({ "orderId": 17, "items": ["soup"] }),
        );
        let text = JsonCodec.encode(&env).unwrap();
        let value: serde_json::Value = JsonCodec.decode(&text).unwrap();
        assert_eq!(value["type"], "order:created");
        assert_eq!(value["payload"]["items"][0], "soup");
    }
}
