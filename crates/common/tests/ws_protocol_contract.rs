use chrono::Utc;
use serde_json::Value;
use uuid::Uuid;
use watchroom_common::protocol::ws::{
    ChatMessageBroadcast, ErrorPayload, MediaState, MediaStatePayload, MediaSyncPayload,
    OutgoingMessage, RoomErrorCode, RoomStatePayload, SeatInfo, SeatUpdatedPayload,
    ServerMessage, UserInfo, UserJoinedPayload, UserLeftPayload,
};
use watchroom_common::types::RoomDescriptor;

fn object_keys(value: &Value) -> Vec<String> {
    let mut keys = value
        .as_object()
        .expect("value should be a JSON object")
        .keys()
        .cloned()
        .collect::<Vec<_>>();
    keys.sort();
    keys
}

fn sorted(keys: &[&str]) -> Vec<String> {
    let mut keys = keys.iter().map(|key| key.to_string()).collect::<Vec<_>>();
    keys.sort();
    keys
}

#[test]
fn server_message_shapes_match_contract() {
    let now = Utc::now();
    let media = MediaState {
        video_url: "https://videos.example/trailer.mp4".to_string(),
        video_title: "Trailer".to_string(),
        is_playing: true,
        current_time: 0.0,
        updated_at: now,
    };

    let samples = [
        (
            ServerMessage::RoomState(RoomStatePayload {
                room: RoomDescriptor {
                    id: "room-1".to_string(),
                    name: "Friday Night".to_string(),
                    theme: "horror".to_string(),
                    owner_id: "owner".to_string(),
                    max_seats: 2,
                },
                users: vec![UserInfo {
                    id: "owner".to_string(),
                    display_name: "User-owner".to_string(),
                    seat_id: Some("A1".to_string()),
                }],
                seats: vec![
                    SeatInfo { id: "A1".to_string(), position: 0, user_id: Some("owner".into()) },
                    SeatInfo { id: "A2".to_string(), position: 1, user_id: None },
                ],
                media: Some(media.clone()),
            }),
            "room_state",
            &["room", "users", "seats", "media"][..],
        ),
        (
            ServerMessage::UserJoined(UserJoinedPayload {
                user: UserInfo {
                    id: "guest".to_string(),
                    display_name: "User-guest".to_string(),
                    seat_id: None,
                },
            }),
            "user_joined",
            &["user"][..],
        ),
        (
            ServerMessage::UserLeft(UserLeftPayload { user_id: "guest".to_string() }),
            "user_left",
            &["user_id"][..],
        ),
        (
            ServerMessage::SeatUpdated(SeatUpdatedPayload {
                seat_id: "A2".to_string(),
                user_id: None,
            }),
            "seat_updated",
            &["seat_id", "user_id"][..],
        ),
        (
            ServerMessage::MediaState(MediaStatePayload {
                media: media.clone(),
                updated_by: "owner".to_string(),
            }),
            "media_state",
            &["media", "updated_by"][..],
        ),
        (
            ServerMessage::MediaSync(MediaSyncPayload {
                current_time: 4.0,
                is_playing: true,
                server_time: now,
            }),
            "media_sync",
            &["current_time", "is_playing", "server_time"][..],
        ),
        (
            ServerMessage::ChatMessage(ChatMessageBroadcast {
                id: Uuid::new_v4(),
                user_id: "guest".to_string(),
                display_name: "User-guest".to_string(),
                content: "hello".to_string(),
                created_at: now,
            }),
            "chat_message",
            &["id", "user_id", "display_name", "content", "created_at"][..],
        ),
        (
            ServerMessage::Error(ErrorPayload::from_code(RoomErrorCode::SeatOccupied)),
            "error",
            &["code", "message"][..],
        ),
    ];

    for (message, expected_type, expected_payload_keys) in samples {
        let value = serde_json::to_value(OutgoingMessage::new(message))
            .expect("outgoing message should serialize");

        assert_eq!(object_keys(&value), sorted(&["type", "payload", "timestamp"]));
        assert_eq!(value["type"], expected_type);
        assert_eq!(object_keys(&value["payload"]), sorted(expected_payload_keys));
    }
}

#[test]
fn media_state_fields_match_contract() {
    let value = serde_json::to_value(MediaState::new(Utc::now())).expect("media should serialize");

    assert_eq!(
        object_keys(&value),
        sorted(&["video_url", "video_title", "is_playing", "current_time", "updated_at"])
    );
    assert_eq!(value["is_playing"], false);
    assert_eq!(value["current_time"], 0.0);
}

#[test]
fn error_codes_serialize_as_screaming_snake_case() {
    let codes = [
        (RoomErrorCode::InvalidFormat, "INVALID_FORMAT"),
        (RoomErrorCode::UnknownType, "UNKNOWN_TYPE"),
        (RoomErrorCode::EmptyMessage, "EMPTY_MESSAGE"),
        (RoomErrorCode::MessageTooLong, "MESSAGE_TOO_LONG"),
        (RoomErrorCode::InvalidSeat, "INVALID_SEAT"),
        (RoomErrorCode::SeatOccupied, "SEAT_OCCUPIED"),
        (RoomErrorCode::NotHost, "NOT_HOST"),
        (RoomErrorCode::InvalidTime, "INVALID_TIME"),
        (RoomErrorCode::InvalidUrl, "INVALID_URL"),
    ];

    for (code, expected) in codes {
        assert_eq!(serde_json::to_value(code).expect("code should serialize"), expected);
        assert_eq!(code.as_str(), expected);
    }
}
