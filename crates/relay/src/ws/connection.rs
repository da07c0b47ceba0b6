use crate::config::ConnectionConfig;
use crate::metrics;
use crate::ws::protocol::encode_error;
use crate::ws::room::RoomHandle;
use axum::{
    body::Bytes,
    extract::ws::{Message, Utf8Bytes, WebSocket},
};
use futures_util::{
    stream::{SplitSink, SplitStream},
    SinkExt, StreamExt,
};
use thiserror::Error;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::time::{interval_at, timeout, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use uuid::Uuid;
use watchroom_common::protocol::ws::{decode_client_message, RoomErrorCode};

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum SendError {
    #[error("outbound queue is full")]
    QueueFull,
    #[error("connection is closed")]
    Closed,
}

/// Room-side handle to one participant link. Cloning shares the same
/// outbound queue and cancellation scope.
#[derive(Debug, Clone)]
pub struct ClientConnection {
    pub connection_id: Uuid,
    pub user_id: String,
    pub display_name: String,
    outbound: mpsc::Sender<Utf8Bytes>,
    cancel: CancellationToken,
}

impl ClientConnection {
    pub fn new(
        user_id: impl Into<String>,
        display_name: impl Into<String>,
        capacity: usize,
    ) -> (Self, mpsc::Receiver<Utf8Bytes>) {
        let (outbound, receiver) = mpsc::channel(capacity.max(1));
        let connection = Self {
            connection_id: Uuid::new_v4(),
            user_id: user_id.into(),
            display_name: display_name.into(),
            outbound,
            cancel: CancellationToken::new(),
        };
        (connection, receiver)
    }

    /// Queues a frame without waiting. A full queue closes the connection.
    pub fn send(&self, frame: Utf8Bytes) -> Result<(), SendError> {
        if self.cancel.is_cancelled() {
            return Err(SendError::Closed);
        }

        match self.outbound.try_send(frame) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(_)) => {
                warn!(
                    user_id = %self.user_id,
                    connection_id = %self.connection_id,
                    "outbound queue full, closing connection"
                );
                metrics::record_ws_eviction("queue_full");
                self.cancel.cancel();
                Err(SendError::QueueFull)
            }
            Err(TrySendError::Closed(_)) => {
                self.cancel.cancel();
                Err(SendError::Closed)
            }
        }
    }

    pub fn close(&self) {
        self.cancel.cancel();
    }

    pub fn is_closed(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub fn cancellation(&self) -> CancellationToken {
        self.cancel.clone()
    }
}

/// Pumps one upgraded socket until either side fails or the room cancels
/// the connection, then unregisters it from `room`.
pub async fn run_connection(
    socket: WebSocket,
    connection: ClientConnection,
    outbound: mpsc::Receiver<Utf8Bytes>,
    room: RoomHandle,
    config: ConnectionConfig,
) {
    let (sink, stream) = socket.split();

    let writer = tokio::spawn(write_loop(sink, outbound, connection.cancellation(), config.clone()));
    read_loop(stream, &connection, &room, &config).await;

    connection.close();
    room.unregister(connection.connection_id, &connection.user_id).await;
    if let Err(join_error) = writer.await {
        warn!(?join_error, connection_id = %connection.connection_id, "websocket writer task failed");
    }
}

async fn read_loop(
    mut stream: SplitStream<WebSocket>,
    connection: &ClientConnection,
    room: &RoomHandle,
    config: &ConnectionConfig,
) {
    let cancel = connection.cancellation();

    loop {
        let next = tokio::select! {
            _ = cancel.cancelled() => break,
            next = timeout(config.idle_timeout, stream.next()) => next,
        };

        let message = match next {
            Err(_) => {
                debug!(connection_id = %connection.connection_id, "websocket idle timeout");
                break;
            }
            Ok(None) => break,
            Ok(Some(Err(error))) => {
                debug!(?error, connection_id = %connection.connection_id, "websocket read failed");
                break;
            }
            Ok(Some(Ok(message))) => message,
        };

        let raw = match message {
            Message::Text(raw) => raw,
            Message::Close(_) => break,
            Message::Binary(_) | Message::Ping(_) | Message::Pong(_) => continue,
        };

        if raw.len() > config.max_frame_bytes {
            reply_error(connection, RoomErrorCode::FrameTooLarge);
            continue;
        }

        match decode_client_message(raw.as_str()) {
            Ok(message) => {
                metrics::record_ws_message(message.kind());
                if room.dispatch(connection.connection_id, &connection.user_id, message).await.is_err()
                {
                    break;
                }
            }
            Err(error) => {
                debug!(%error, connection_id = %connection.connection_id, "rejected websocket frame");
                reply_error(connection, error.code());
            }
        }
    }
}

async fn write_loop(
    mut sink: SplitSink<WebSocket, Message>,
    mut outbound: mpsc::Receiver<Utf8Bytes>,
    cancel: CancellationToken,
    config: ConnectionConfig,
) {
    let ping_every = config.ping_interval();
    let mut ping = interval_at(Instant::now() + ping_every, ping_every);

    loop {
        let message = tokio::select! {
            _ = cancel.cancelled() => break,
            frame = outbound.recv() => match frame {
                Some(frame) => Message::Text(frame),
                None => break,
            },
            _ = ping.tick() => Message::Ping(Bytes::new()),
        };

        match timeout(config.write_timeout, sink.send(message)).await {
            Ok(Ok(())) => {}
            Ok(Err(error)) => {
                debug!(?error, "websocket write failed");
                break;
            }
            Err(_) => {
                warn!(timeout_ms = config.write_timeout.as_millis() as u64, "websocket write timed out");
                break;
            }
        }
    }

    cancel.cancel();
    let _ = timeout(config.write_timeout, sink.send(Message::Close(None))).await;
}

fn reply_error(connection: &ClientConnection, code: RoomErrorCode) {
    metrics::record_ws_error(code.as_str());
    match encode_error(code) {
        Ok(frame) => {
            let _ = connection.send(frame);
        }
        Err(error) => warn!(?error, "failed to encode websocket error frame"),
    }
}
