use axum::extract::ws::Utf8Bytes;
use watchroom_common::protocol::ws::{OutgoingMessage, RoomErrorCode, ServerMessage};

/// Serializes a server message into a text frame body, stamping the
/// envelope timestamp at encode time.
pub fn encode_message(message: ServerMessage) -> Result<Utf8Bytes, serde_json::Error> {
    encode_outgoing(&OutgoingMessage::new(message))
}

pub fn encode_outgoing(message: &OutgoingMessage) -> Result<Utf8Bytes, serde_json::Error> {
    serde_json::to_string(message).map(Utf8Bytes::from)
}

pub fn encode_error(code: RoomErrorCode) -> Result<Utf8Bytes, serde_json::Error> {
    encode_outgoing(&OutgoingMessage::error(code))
}
