pub mod connection;
pub mod directory;
pub mod protocol;
pub mod room;
pub mod seats;

use crate::auth::{
    jwt::JwtAccessTokenService,
    middleware::{require_bearer_auth, AuthenticatedUser},
};
use crate::config::ConnectionConfig;
use crate::error::{
    current_request_id, request_id_from_headers_or_generate, with_request_id_scope, ErrorCode,
    RelayError,
};
use crate::rooms::RoomCatalog;
use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Extension, Path, State,
    },
    http::HeaderMap,
    middleware,
    response::Response,
    routing::get,
    Json, Router,
};
use connection::{run_connection, ClientConnection};
use directory::RoomDirectory;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{error, info, warn};
use watchroom_common::types::RoomDescriptor;

#[derive(Clone)]
pub struct RoomRouterState {
    directory: RoomDirectory,
    catalog: RoomCatalog,
    connection: ConnectionConfig,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct WsStatsResponse {
    pub rooms: usize,
    pub clients: usize,
}

pub fn router(
    jwt_service: Arc<JwtAccessTokenService>,
    directory: RoomDirectory,
    catalog: RoomCatalog,
    connection: ConnectionConfig,
) -> Router {
    let state = RoomRouterState { directory, catalog, connection };
    let auth_layer = middleware::from_fn_with_state(jwt_service, require_bearer_auth);

    Router::new()
        .route("/v1/rooms/{room_id}/ws", get(ws_upgrade))
        .route("/v1/ws/stats", get(ws_stats))
        .route_layer(auth_layer)
        .with_state(state)
}

pub async fn ws_upgrade(
    Path(room_id): Path<String>,
    Extension(user): Extension<AuthenticatedUser>,
    State(state): State<RoomRouterState>,
    headers: HeaderMap,
    ws: WebSocketUpgrade,
) -> Result<Response, RelayError> {
    let room = resolve_room(&state.catalog, &room_id, &user).await?;

    let request_id = request_id_from_headers_or_generate(&headers);
    let frame_limit = state.connection.transport_frame_limit();
    Ok(ws.max_message_size(frame_limit).max_frame_size(frame_limit).on_upgrade(move |socket| {
        with_request_id_scope(request_id, handle_socket(state, room, user, socket))
    }))
}

async fn resolve_room(
    catalog: &RoomCatalog,
    room_id: &str,
    user: &AuthenticatedUser,
) -> Result<RoomDescriptor, RelayError> {
    match catalog.find_room(room_id).await {
        Ok(Some(room)) => Ok(room),
        Ok(None) => Err(RelayError::room_not_found(room_id)),
        Err(error) => {
            error!(?error, room_id = %room_id, user_id = %user.user_id, "failed to resolve room");
            Err(RelayError::from_code(ErrorCode::CatalogUnavailable))
        }
    }
}

async fn handle_socket(
    state: RoomRouterState,
    room: RoomDescriptor,
    user: AuthenticatedUser,
    mut socket: WebSocket,
) {
    let request_id = current_request_id().unwrap_or_else(|| "unknown".to_string());
    let (connection, outbound) = ClientConnection::new(
        user.user_id.clone(),
        user.display_name.clone(),
        state.connection.outbound_capacity,
    );

    let handle = match state.directory.register(&room, connection.clone()).await {
        Ok(handle) => handle,
        Err(error) => {
            warn!(%error, room_id = %room.id, user_id = %user.user_id, "room rejected connection");
            let _ = socket.send(Message::Close(None)).await;
            return;
        }
    };

    info!(
        request_id = %request_id,
        room_id = %room.id,
        user_id = %user.user_id,
        connection_id = %connection.connection_id,
        "websocket connected"
    );
    run_connection(socket, connection, outbound, handle, state.connection.clone()).await;
    info!(
        request_id = %request_id,
        room_id = %room.id,
        user_id = %user.user_id,
        "websocket disconnected"
    );
}

pub async fn ws_stats(State(state): State<RoomRouterState>) -> Json<WsStatsResponse> {
    Json(WsStatsResponse {
        rooms: state.directory.count().await,
        clients: state.directory.total_clients().await,
    })
}
