use crate::config::RoomConfig;
use crate::metrics;
use crate::ws::connection::ClientConnection;
use crate::ws::directory::RoomDirectory;
use crate::ws::protocol::encode_message;
use crate::ws::seats::SeatMap;
use axum::extract::ws::Utf8Bytes;
use chrono::Utc;
use std::{
    collections::BTreeMap,
    sync::{Arc, RwLock},
    time::Duration,
};
use thiserror::Error;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};
use uuid::Uuid;
use watchroom_common::protocol::ws::{
    ChatMessageBroadcast, ChatMessageRequest, ClientMessage, ErrorPayload, MediaAction,
    MediaControlRequest, MediaState, MediaStatePayload, MediaSyncPayload, RoomErrorCode,
    RoomStatePayload, SeatUpdatedPayload, SelectSeatRequest, ServerMessage, UserInfo,
    UserJoinedPayload, UserLeftPayload, MAX_CHAT_MESSAGE_CHARS,
};
use watchroom_common::types::RoomDescriptor;

#[derive(Debug)]
pub enum RoomCommand {
    Register(ClientConnection),
    Unregister { connection_id: Uuid, user_id: String },
    Inbound { connection_id: Uuid, user_id: String, message: ClientMessage },
}

#[derive(Debug, Error)]
#[error("room session {room_id} has shut down")]
pub struct RoomClosed {
    pub room_id: String,
}

/// Point-in-time counters published by the session actor for readers
/// outside it. Fields are not read atomically with each other.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RoomStats {
    pub clients: usize,
    pub occupied_seats: usize,
}

/// Cloneable address of a running room session.
#[derive(Debug, Clone)]
pub struct RoomHandle {
    descriptor: Arc<RoomDescriptor>,
    generation: Uuid,
    commands: mpsc::Sender<RoomCommand>,
    stats: Arc<RwLock<RoomStats>>,
}

impl RoomHandle {
    /// Distinguishes successive sessions of the same room id.
    pub fn generation(&self) -> Uuid {
        self.generation
    }

    pub fn stats(&self) -> RoomStats {
        match self.stats.read() {
            Ok(stats) => *stats,
            Err(poisoned) => *poisoned.into_inner(),
        }
    }

    pub async fn dispatch(
        &self,
        connection_id: Uuid,
        user_id: &str,
        message: ClientMessage,
    ) -> Result<(), RoomClosed> {
        self.commands
            .send(RoomCommand::Inbound { connection_id, user_id: user_id.to_string(), message })
            .await
            .map_err(|_| self.closed())
    }

    /// Best effort: a session that already shut down has nothing to clean up.
    pub async fn unregister(&self, connection_id: Uuid, user_id: &str) {
        let command = RoomCommand::Unregister { connection_id, user_id: user_id.to_string() };
        if self.commands.send(command).await.is_err() {
            debug!(room_id = %self.descriptor.id, %connection_id, "unregister after room shutdown");
        }
    }

    pub(crate) fn try_send(&self, command: RoomCommand) -> Result<(), RoomCommand> {
        self.commands.try_send(command).map_err(|error| match error {
            TrySendError::Full(command) | TrySendError::Closed(command) => command,
        })
    }

    fn closed(&self) -> RoomClosed {
        RoomClosed { room_id: self.descriptor.id.clone() }
    }
}

/// Live state of one room. Owned by a single task; every mutation arrives
/// through its command inbox in order.
pub struct RoomSession {
    descriptor: Arc<RoomDescriptor>,
    generation: Uuid,
    clients: BTreeMap<String, ClientConnection>,
    seats: SeatMap,
    media: Option<MediaState>,
    stats: Arc<RwLock<RoomStats>>,
}

impl RoomSession {
    pub(crate) fn spawn(
        descriptor: RoomDescriptor,
        config: &RoomConfig,
        directory: RoomDirectory,
    ) -> RoomHandle {
        let (commands, inbox) = mpsc::channel(config.inbox_capacity.max(1));
        let descriptor = Arc::new(descriptor);
        let stats = Arc::new(RwLock::new(RoomStats::default()));
        let session = Self {
            seats: SeatMap::new(descriptor.max_seats),
            descriptor: Arc::clone(&descriptor),
            generation: Uuid::new_v4(),
            clients: BTreeMap::new(),
            media: None,
            stats: Arc::clone(&stats),
        };
        let handle =
            RoomHandle { descriptor, generation: session.generation, commands, stats };

        tokio::spawn(session.run(inbox, directory, config.media_sync_interval));
        handle
    }

    async fn run(
        mut self,
        mut inbox: mpsc::Receiver<RoomCommand>,
        directory: RoomDirectory,
        sync_every: Duration,
    ) {
        let mut media_sync = interval_at(Instant::now() + sync_every, sync_every);
        media_sync.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                command = inbox.recv() => {
                    let Some(command) = command else {
                        break;
                    };
                    self.handle(command);

                    if self.clients.is_empty()
                        && directory.remove(&self.descriptor.id, self.generation, &mut inbox).await
                    {
                        break;
                    }
                }
                _ = media_sync.tick() => self.emit_media_sync(),
            }
        }

        info!(room_id = %self.descriptor.id, "room session removed");
    }

    fn handle(&mut self, command: RoomCommand) {
        match command {
            RoomCommand::Register(connection) => self.register(connection),
            RoomCommand::Unregister { connection_id, user_id } => {
                self.unregister(connection_id, &user_id)
            }
            RoomCommand::Inbound { connection_id, user_id, message } => {
                let Some(sender) = self.current_connection(connection_id, &user_id) else {
                    return;
                };
                self.dispatch(&sender, message);
            }
        }
        self.publish_stats();
    }

    fn register(&mut self, connection: ClientConnection) {
        let user_id = connection.user_id.clone();
        if let Some(previous) = self.clients.insert(user_id.clone(), connection.clone()) {
            warn!(
                room_id = %self.descriptor.id,
                user_id = %user_id,
                connection_id = %previous.connection_id,
                "duplicate join, closing previous connection"
            );
            metrics::record_ws_eviction("duplicate_join");
            previous.close();
        }

        let snapshot = ServerMessage::RoomState(self.snapshot());
        self.send_to(&connection, snapshot);

        let joined = ServerMessage::UserJoined(UserJoinedPayload { user: self.user_info(&connection) });
        self.broadcast_except(&user_id, joined);

        info!(
            room_id = %self.descriptor.id,
            user_id = %user_id,
            connection_id = %connection.connection_id,
            clients = self.clients.len(),
            "user joined room"
        );
    }

    fn unregister(&mut self, connection_id: Uuid, user_id: &str) {
        if self.current_connection(connection_id, user_id).is_none() {
            return;
        }

        if let Some(connection) = self.clients.remove(user_id) {
            connection.close();
        }
        let freed_seat = self.seats.release_user(user_id);

        self.broadcast(ServerMessage::UserLeft(UserLeftPayload { user_id: user_id.to_string() }));
        if let Some(seat_id) = freed_seat {
            self.broadcast(ServerMessage::SeatUpdated(SeatUpdatedPayload { seat_id, user_id: None }));
        }

        info!(
            room_id = %self.descriptor.id,
            user_id = %user_id,
            %connection_id,
            clients = self.clients.len(),
            "user left room"
        );
    }

    fn dispatch(&mut self, sender: &ClientConnection, message: ClientMessage) {
        let result = match message {
            ClientMessage::ChatMessage(request) => self.chat(sender, request),
            ClientMessage::SelectSeat(request) => self.select_seat(sender, request),
            ClientMessage::MediaControl(request) => self.media_control(sender, request),
            ClientMessage::AvatarAction(_) => Ok(()),
        };

        if let Err(code) = result {
            metrics::record_ws_error(code.as_str());
            self.send_to(sender, ServerMessage::Error(ErrorPayload::from_code(code)));
        }
    }

    fn chat(
        &mut self,
        sender: &ClientConnection,
        request: ChatMessageRequest,
    ) -> Result<(), RoomErrorCode> {
        if request.content.trim().is_empty() {
            return Err(RoomErrorCode::EmptyMessage);
        }
        if request.content.chars().count() > MAX_CHAT_MESSAGE_CHARS {
            return Err(RoomErrorCode::MessageTooLong);
        }

        self.broadcast(ServerMessage::ChatMessage(ChatMessageBroadcast {
            id: Uuid::new_v4(),
            user_id: sender.user_id.clone(),
            display_name: sender.display_name.clone(),
            content: request.content,
            created_at: Utc::now(),
        }));
        Ok(())
    }

    fn select_seat(
        &mut self,
        sender: &ClientConnection,
        request: SelectSeatRequest,
    ) -> Result<(), RoomErrorCode> {
        let change = self.seats.assign(&request.seat_id, &sender.user_id)?;

        if let Some(seat_id) = change.vacated {
            self.broadcast(ServerMessage::SeatUpdated(SeatUpdatedPayload { seat_id, user_id: None }));
        }
        self.broadcast(ServerMessage::SeatUpdated(SeatUpdatedPayload {
            seat_id: change.seat_id,
            user_id: Some(sender.user_id.clone()),
        }));
        Ok(())
    }

    fn media_control(
        &mut self,
        sender: &ClientConnection,
        request: MediaControlRequest,
    ) -> Result<(), RoomErrorCode> {
        if sender.user_id != self.descriptor.owner_id {
            return Err(RoomErrorCode::NotHost);
        }

        let action = request.action.parse::<MediaAction>()?;
        let now = Utc::now();
        let mut media = self.media.clone().unwrap_or_else(|| MediaState::new(now));

        match action {
            MediaAction::Play | MediaAction::Pause => {
                media.is_playing = action == MediaAction::Play;
            }
            MediaAction::Seek => {
                if !(request.time >= 0.0) {
                    return Err(RoomErrorCode::InvalidTime);
                }
                media.current_time = request.time;
            }
            MediaAction::Change => {
                if request.video_url.is_empty() {
                    return Err(RoomErrorCode::InvalidUrl);
                }
                media.video_url = request.video_url;
                media.video_title = request.video_title;
                media.current_time = 0.0;
                media.is_playing = true;
            }
        }
        media.updated_at = now;

        info!(
            room_id = %self.descriptor.id,
            user_id = %sender.user_id,
            action = %action,
            "media control applied"
        );

        self.media = Some(media.clone());
        self.broadcast(ServerMessage::MediaState(MediaStatePayload {
            media,
            updated_by: sender.user_id.clone(),
        }));
        Ok(())
    }

    fn emit_media_sync(&mut self) {
        let Some(media) = self.media.as_ref().filter(|media| media.is_playing) else {
            return;
        };
        let now = Utc::now();
        let sync = MediaSyncPayload {
            current_time: media.position_at(now),
            is_playing: media.is_playing,
            server_time: now,
        };
        self.broadcast(ServerMessage::MediaSync(sync));
    }

    fn snapshot(&self) -> RoomStatePayload {
        RoomStatePayload {
            room: self.descriptor.as_ref().clone(),
            users: self
                .clients
                .values()
                .filter(|connection| !connection.is_closed())
                .map(|connection| self.user_info(connection))
                .collect(),
            seats: self.seats.snapshot(),
            media: self.media.clone(),
        }
    }

    fn user_info(&self, connection: &ClientConnection) -> UserInfo {
        UserInfo {
            id: connection.user_id.clone(),
            display_name: connection.display_name.clone(),
            seat_id: self.seats.seat_of(&connection.user_id),
        }
    }

    fn current_connection(&self, connection_id: Uuid, user_id: &str) -> Option<ClientConnection> {
        self.clients
            .get(user_id)
            .filter(|connection| connection.connection_id == connection_id)
            .cloned()
    }

    fn send_to(&self, connection: &ClientConnection, message: ServerMessage) {
        if let Some(frame) = self.encode(message) {
            let _ = connection.send(frame);
        }
    }

    fn broadcast(&self, message: ServerMessage) {
        self.fan_out(message, None);
    }

    fn broadcast_except(&self, user_id: &str, message: ServerMessage) {
        self.fan_out(message, Some(user_id));
    }

    /// One encode, one non-blocking enqueue per member. A member whose queue
    /// is full is closed by `send` and does not affect the others.
    fn fan_out(&self, message: ServerMessage, skip_user: Option<&str>) {
        let Some(frame) = self.encode(message) else {
            return;
        };
        for (user_id, connection) in &self.clients {
            if Some(user_id.as_str()) == skip_user || connection.is_closed() {
                continue;
            }
            let _ = connection.send(frame.clone());
        }
    }

    fn encode(&self, message: ServerMessage) -> Option<Utf8Bytes> {
        let kind = message.kind();
        match encode_message(message) {
            Ok(frame) => Some(frame),
            Err(error) => {
                warn!(room_id = %self.descriptor.id, kind, ?error, "failed to encode room message");
                None
            }
        }
    }

    fn publish_stats(&self) {
        let next =
            RoomStats { clients: self.clients.len(), occupied_seats: self.seats.occupied_count() };
        match self.stats.write() {
            Ok(mut stats) => *stats = next,
            Err(poisoned) => *poisoned.into_inner() = next,
        }
    }
}
