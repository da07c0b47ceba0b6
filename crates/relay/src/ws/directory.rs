use crate::config::RoomConfig;
use crate::metrics;
use crate::ws::connection::ClientConnection;
use crate::ws::room::{RoomCommand, RoomHandle, RoomSession};
use std::{collections::HashMap, sync::Arc, time::Duration};
use thiserror::Error;
use tokio::sync::{mpsc, RwLock};
use tracing::info;
use uuid::Uuid;
use watchroom_common::types::RoomDescriptor;

const REGISTER_ATTEMPTS: usize = 50;
const REGISTER_RETRY_DELAY: Duration = Duration::from_millis(10);

#[derive(Debug, Error)]
pub enum RegisterError {
    #[error("room {room_id} did not accept the connection after {attempts} attempts")]
    Unavailable { room_id: String, attempts: usize },
}

/// Process-wide map from room id to its live session actor.
#[derive(Debug, Clone)]
pub struct RoomDirectory {
    rooms: Arc<RwLock<HashMap<String, RoomHandle>>>,
    config: RoomConfig,
}

impl RoomDirectory {
    pub fn new(config: RoomConfig) -> Self {
        Self { rooms: Arc::new(RwLock::new(HashMap::new())), config }
    }

    /// Returns the live session for the room, starting one if none exists.
    /// At most one session per room id is ever started.
    pub async fn get_or_create(&self, descriptor: &RoomDescriptor) -> RoomHandle {
        if let Some(handle) = self.rooms.read().await.get(&descriptor.id) {
            return handle.clone();
        }

        let mut rooms = self.rooms.write().await;
        rooms
            .entry(descriptor.id.clone())
            .or_insert_with(|| {
                let handle = RoomSession::spawn(descriptor.clone(), &self.config, self.clone());
                metrics::record_room_created();
                info!(
                    room_id = %descriptor.id,
                    max_seats = descriptor.max_seats,
                    "room session created"
                );
                handle
            })
            .clone()
    }

    pub async fn get(&self, room_id: &str) -> Option<RoomHandle> {
        self.rooms.read().await.get(room_id).cloned()
    }

    /// Hands `connection` to the room's session, creating the session if
    /// needed. Retries when the session found has just shut down.
    pub async fn register(
        &self,
        descriptor: &RoomDescriptor,
        mut connection: ClientConnection,
    ) -> Result<RoomHandle, RegisterError> {
        for _ in 0..REGISTER_ATTEMPTS {
            let handle = self.get_or_create(descriptor).await;

            // Sending under the read lock keeps a retiring session from
            // missing a registration queued after its final inbox check.
            let rooms = self.rooms.read().await;
            let current = rooms
                .get(&descriptor.id)
                .is_some_and(|entry| entry.generation() == handle.generation());
            if current {
                match handle.try_send(RoomCommand::Register(connection)) {
                    Ok(()) => return Ok(handle),
                    Err(RoomCommand::Register(returned)) => connection = returned,
                    Err(_) => break,
                }
            }
            drop(rooms);

            tokio::time::sleep(REGISTER_RETRY_DELAY).await;
        }

        Err(RegisterError::Unavailable {
            room_id: descriptor.id.clone(),
            attempts: REGISTER_ATTEMPTS,
        })
    }

    /// Removal path for a session whose client set just became empty. Only
    /// the entry of that same `generation` is dropped, so a stale or repeated
    /// call never detaches a newer session. Returns false, leaving the entry
    /// in place, while commands are still queued for the caller; otherwise
    /// the inbox is closed and the caller must stop.
    pub(crate) async fn remove(
        &self,
        room_id: &str,
        generation: Uuid,
        inbox: &mut mpsc::Receiver<RoomCommand>,
    ) -> bool {
        let mut rooms = self.rooms.write().await;
        if !inbox.is_empty() {
            return false;
        }

        if rooms.get(room_id).is_some_and(|entry| entry.generation() == generation) {
            rooms.remove(room_id);
            metrics::record_room_removed();
        }
        inbox.close();
        true
    }

    pub async fn count(&self) -> usize {
        self.rooms.read().await.len()
    }

    pub async fn total_clients(&self) -> usize {
        self.rooms.read().await.values().map(|handle| handle.stats().clients).sum()
    }
}
