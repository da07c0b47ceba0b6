// WebSocket message types for the watch-together room protocol.
//
// Every server frame is an envelope `{"type", "payload"?, "timestamp"}`.
// Client frames are `{"type", "payload"}` where the payload stays raw JSON
// until the type tag has been matched.

use std::{fmt, str::FromStr};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::types::RoomDescriptor;

/// Maximum chat message length, counted in characters.
pub const MAX_CHAT_MESSAGE_CHARS: usize = 500;

/// Server -> Client envelope.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct OutgoingMessage {
    #[serde(flatten)]
    pub message: ServerMessage,
    pub timestamp: DateTime<Utc>,
}

impl OutgoingMessage {
    pub fn new(message: ServerMessage) -> Self {
        Self { message, timestamp: Utc::now() }
    }

    pub fn error(code: RoomErrorCode) -> Self {
        Self::new(ServerMessage::Error(ErrorPayload::from_code(code)))
    }

    pub fn kind(&self) -> &'static str {
        self.message.kind()
    }
}

impl From<ServerMessage> for OutgoingMessage {
    fn from(message: ServerMessage) -> Self {
        Self::new(message)
    }
}

/// All message kinds the server emits.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum ServerMessage {
    /// Full room snapshot, sent once to a newly registered connection.
    RoomState(RoomStatePayload),
    UserJoined(UserJoinedPayload),
    UserLeft(UserLeftPayload),
    /// A seat changed hands; `user_id: null` means the seat was freed.
    SeatUpdated(SeatUpdatedPayload),
    MediaState(MediaStatePayload),
    /// Periodic playback position hint while media is playing.
    MediaSync(MediaSyncPayload),
    ChatMessage(ChatMessageBroadcast),
    Error(ErrorPayload),
}

impl ServerMessage {
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::RoomState(_) => "room_state",
            Self::UserJoined(_) => "user_joined",
            Self::UserLeft(_) => "user_left",
            Self::SeatUpdated(_) => "seat_updated",
            Self::MediaState(_) => "media_state",
            Self::MediaSync(_) => "media_sync",
            Self::ChatMessage(_) => "chat_message",
            Self::Error(_) => "error",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RoomStatePayload {
    pub room: RoomDescriptor,
    pub users: Vec<UserInfo>,
    pub seats: Vec<SeatInfo>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub media: Option<MediaState>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct UserInfo {
    pub id: String,
    pub display_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seat_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SeatInfo {
    pub id: String,
    pub position: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct UserJoinedPayload {
    pub user: UserInfo,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct UserLeftPayload {
    pub user_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SeatUpdatedPayload {
    pub seat_id: String,
    pub user_id: Option<String>,
}

/// Shared player state. Only the room owner can change it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MediaState {
    pub video_url: String,
    pub video_title: String,
    pub is_playing: bool,
    /// Playback position in seconds.
    pub current_time: f64,
    pub updated_at: DateTime<Utc>,
}

impl MediaState {
    pub fn new(now: DateTime<Utc>) -> Self {
        Self {
            video_url: String::new(),
            video_title: String::new(),
            is_playing: false,
            current_time: 0.0,
            updated_at: now,
        }
    }

    /// Estimated playback position at `now`, advancing from `current_time`
    /// while the player is running.
    pub fn position_at(&self, now: DateTime<Utc>) -> f64 {
        if !self.is_playing {
            return self.current_time;
        }
        let elapsed_ms = (now - self.updated_at).num_milliseconds().max(0);
        self.current_time + elapsed_ms as f64 / 1000.0
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MediaStatePayload {
    pub media: MediaState,
    pub updated_by: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MediaSyncPayload {
    pub current_time: f64,
    pub is_playing: bool,
    pub server_time: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ChatMessageBroadcast {
    pub id: Uuid,
    pub user_id: String,
    pub display_name: String,
    pub content: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ErrorPayload {
    pub code: RoomErrorCode,
    pub message: String,
}

impl ErrorPayload {
    pub fn from_code(code: RoomErrorCode) -> Self {
        Self { code, message: code.default_message().to_string() }
    }
}

/// Error codes sent to a single connection. None of them close the socket.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RoomErrorCode {
    InvalidFormat,
    FrameTooLarge,
    UnknownType,
    InvalidPayload,
    EmptyMessage,
    MessageTooLong,
    InvalidSeat,
    SeatOccupied,
    NotHost,
    InvalidTime,
    InvalidUrl,
    InvalidAction,
}

impl RoomErrorCode {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::InvalidFormat => "INVALID_FORMAT",
            Self::FrameTooLarge => "FRAME_TOO_LARGE",
            Self::UnknownType => "UNKNOWN_TYPE",
            Self::InvalidPayload => "INVALID_PAYLOAD",
            Self::EmptyMessage => "EMPTY_MESSAGE",
            Self::MessageTooLong => "MESSAGE_TOO_LONG",
            Self::InvalidSeat => "INVALID_SEAT",
            Self::SeatOccupied => "SEAT_OCCUPIED",
            Self::NotHost => "NOT_HOST",
            Self::InvalidTime => "INVALID_TIME",
            Self::InvalidUrl => "INVALID_URL",
            Self::InvalidAction => "INVALID_ACTION",
        }
    }

    pub const fn default_message(self) -> &'static str {
        match self {
            Self::InvalidFormat => "Invalid message format",
            Self::FrameTooLarge => "Message frame exceeds the maximum size",
            Self::UnknownType => "Unknown message type",
            Self::InvalidPayload => "Invalid message payload",
            Self::EmptyMessage => "Message content cannot be empty",
            Self::MessageTooLong => "Message cannot exceed 500 characters",
            Self::InvalidSeat => "Seat does not exist",
            Self::SeatOccupied => "Seat is already occupied",
            Self::NotHost => "Only the room owner can control media",
            Self::InvalidTime => "Time cannot be negative",
            Self::InvalidUrl => "Video URL is required",
            Self::InvalidAction => "Invalid media control action",
        }
    }
}

impl fmt::Display for RoomErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Client -> Server envelope. The payload is kept raw until the tag is known.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct IncomingEnvelope {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub payload: Value,
}

/// All message kinds a client may send.
#[derive(Debug, Clone, PartialEq)]
pub enum ClientMessage {
    ChatMessage(ChatMessageRequest),
    SelectSeat(SelectSeatRequest),
    MediaControl(MediaControlRequest),
    /// Reserved; accepted and ignored.
    AvatarAction(Value),
}

impl ClientMessage {
    pub const CHAT_MESSAGE: &'static str = "chat_message";
    pub const SELECT_SEAT: &'static str = "select_seat";
    pub const MEDIA_CONTROL: &'static str = "media_control";
    pub const AVATAR_ACTION: &'static str = "avatar_action";

    /// Decodes the payload according to the envelope's type tag.
    pub fn from_envelope(envelope: IncomingEnvelope) -> Result<Self, DecodeError> {
        let IncomingEnvelope { kind, payload } = envelope;
        match kind.as_str() {
            Self::CHAT_MESSAGE => decode_payload(Self::CHAT_MESSAGE, payload).map(Self::ChatMessage),
            Self::SELECT_SEAT => decode_payload(Self::SELECT_SEAT, payload).map(Self::SelectSeat),
            Self::MEDIA_CONTROL => {
                decode_payload(Self::MEDIA_CONTROL, payload).map(Self::MediaControl)
            }
            Self::AVATAR_ACTION => Ok(Self::AvatarAction(payload)),
            _ => Err(DecodeError::UnknownType(kind)),
        }
    }

    pub const fn kind(&self) -> &'static str {
        match self {
            Self::ChatMessage(_) => Self::CHAT_MESSAGE,
            Self::SelectSeat(_) => Self::SELECT_SEAT,
            Self::MediaControl(_) => Self::MEDIA_CONTROL,
            Self::AvatarAction(_) => Self::AVATAR_ACTION,
        }
    }
}

fn decode_payload<T>(kind: &'static str, payload: Value) -> Result<T, DecodeError>
where
    T: for<'de> Deserialize<'de>,
{
    serde_json::from_value(payload).map_err(|source| DecodeError::Payload { kind, source })
}

/// Parses a raw text frame into a typed client message.
pub fn decode_client_message(raw: &str) -> Result<ClientMessage, DecodeError> {
    let envelope =
        serde_json::from_str::<IncomingEnvelope>(raw).map_err(DecodeError::Format)?;
    ClientMessage::from_envelope(envelope)
}

#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    #[error("frame is not a valid message envelope")]
    Format(#[source] serde_json::Error),
    #[error("unknown message type `{0}`")]
    UnknownType(String),
    #[error("invalid `{kind}` payload")]
    Payload {
        kind: &'static str,
        #[source]
        source: serde_json::Error,
    },
}

impl DecodeError {
    pub const fn code(&self) -> RoomErrorCode {
        match self {
            Self::Format(_) => RoomErrorCode::InvalidFormat,
            Self::UnknownType(_) => RoomErrorCode::UnknownType,
            Self::Payload { .. } => RoomErrorCode::InvalidPayload,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ChatMessageRequest {
    pub content: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SelectSeatRequest {
    pub seat_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MediaControlRequest {
    pub action: String,
    /// Target position for `seek`, in seconds.
    #[serde(default)]
    pub time: f64,
    /// New source for `change`.
    #[serde(default)]
    pub video_url: String,
    #[serde(default)]
    pub video_title: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaAction {
    Play,
    Pause,
    Seek,
    Change,
}

impl MediaAction {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Play => "play",
            Self::Pause => "pause",
            Self::Seek => "seek",
            Self::Change => "change",
        }
    }
}

impl FromStr for MediaAction {
    type Err = RoomErrorCode;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "play" => Ok(Self::Play),
            "pause" => Ok(Self::Pause),
            "seek" => Ok(Self::Seek),
            "change" => Ok(Self::Change),
            _ => Err(RoomErrorCode::InvalidAction),
        }
    }
}

impl fmt::Display for MediaAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};
    use serde_json::json;

    #[test]
    fn outgoing_message_flattens_type_and_payload() {
        let message = OutgoingMessage::new(ServerMessage::UserLeft(UserLeftPayload {
            user_id: "u-1".to_string(),
        }));
        let value = serde_json::to_value(&message).expect("message should serialize");

        assert_eq!(value["type"], "user_left");
        assert_eq!(value["payload"]["user_id"], "u-1");
        assert!(value["timestamp"].is_string());
    }

    #[test]
    fn freed_seat_serializes_explicit_null_occupant() {
        let message = OutgoingMessage::new(ServerMessage::SeatUpdated(SeatUpdatedPayload {
            seat_id: "A2".to_string(),
            user_id: None,
        }));
        let value = serde_json::to_value(&message).expect("message should serialize");

        assert_eq!(value["payload"], json!({ "seat_id": "A2", "user_id": null }));
    }

    #[test]
    fn error_payload_uses_registry_code() {
        let value = serde_json::to_value(OutgoingMessage::error(RoomErrorCode::NotHost))
            .expect("error should serialize");

        assert_eq!(value["type"], "error");
        assert_eq!(value["payload"]["code"], "NOT_HOST");
        assert_eq!(value["payload"]["message"], RoomErrorCode::NotHost.default_message());
    }

    #[test]
    fn server_message_decodes_from_envelope_with_timestamp() {
        let raw = r#"{"type":"user_left","payload":{"user_id":"u-9"},"timestamp":"2026-01-01T00:00:00Z"}"#;
        let decoded = serde_json::from_str::<ServerMessage>(raw).expect("frame should decode");

        assert_eq!(decoded, ServerMessage::UserLeft(UserLeftPayload { user_id: "u-9".into() }));
    }

    #[test]
    fn decodes_each_known_client_kind() {
        let chat = decode_client_message(r#"{"type":"chat_message","payload":{"content":"hi"}}"#)
            .expect("chat should decode");
        assert_eq!(chat, ClientMessage::ChatMessage(ChatMessageRequest { content: "hi".into() }));

        let seat = decode_client_message(r#"{"type":"select_seat","payload":{"seat_id":"A3"}}"#)
            .expect("seat should decode");
        assert_eq!(seat, ClientMessage::SelectSeat(SelectSeatRequest { seat_id: "A3".into() }));

        let media = decode_client_message(
            r#"{"type":"media_control","payload":{"action":"seek","time":12.5}}"#,
        )
        .expect("media control should decode");
        let ClientMessage::MediaControl(request) = media else {
            panic!("expected media control, got {media:?}");
        };
        assert_eq!(request.action, "seek");
        assert_eq!(request.time, 12.5);
        assert!(request.video_url.is_empty());

        let avatar = decode_client_message(r#"{"type":"avatar_action"}"#)
            .expect("avatar action should decode without payload");
        assert_eq!(avatar, ClientMessage::AvatarAction(Value::Null));
    }

    #[test]
    fn decode_errors_map_to_scoped_codes() {
        let format = decode_client_message("not json").expect_err("garbage should fail");
        assert_eq!(format.code(), RoomErrorCode::InvalidFormat);

        let missing_type =
            decode_client_message(r#"{"payload":{}}"#).expect_err("missing type should fail");
        assert_eq!(missing_type.code(), RoomErrorCode::InvalidFormat);

        let unknown = decode_client_message(r#"{"type":"dance","payload":{}}"#)
            .expect_err("unknown type should fail");
        assert_eq!(unknown.code(), RoomErrorCode::UnknownType);

        let payload = decode_client_message(r#"{"type":"select_seat","payload":{"seat":1}}"#)
            .expect_err("wrong payload shape should fail");
        assert_eq!(payload.code(), RoomErrorCode::InvalidPayload);

        let null_payload = decode_client_message(r#"{"type":"chat_message"}"#)
            .expect_err("chat without payload should fail");
        assert_eq!(null_payload.code(), RoomErrorCode::InvalidPayload);
    }

    #[test]
    fn media_action_parsing_rejects_unknown_actions() {
        assert_eq!("play".parse::<MediaAction>(), Ok(MediaAction::Play));
        assert_eq!("change".parse::<MediaAction>(), Ok(MediaAction::Change));
        assert_eq!("rewind".parse::<MediaAction>(), Err(RoomErrorCode::InvalidAction));
    }

    #[test]
    fn position_advances_only_while_playing() {
        let start = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).single().expect("valid instant");
        let mut media = MediaState::new(start);
        media.current_time = 30.0;

        assert_eq!(media.position_at(start + Duration::seconds(10)), 30.0);

        media.is_playing = true;
        assert_eq!(media.position_at(start + Duration::milliseconds(2_500)), 32.5);
        assert_eq!(media.position_at(start - Duration::seconds(5)), 30.0);
    }
}
