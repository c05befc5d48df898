//! Ingress: the HTTP surface, the per-connection WebSocket loop, and the
//! coordination-bus dispatcher. Handlers translate errors to status codes and
//! delegate; no business logic lives here.

mod connection;
mod dispatch;

pub use connection::spawn_reaper;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::{Path, Query, State, WebSocketUpgrade};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::json;

use crate::auth::{bearer_token, TokenAuthority};
use crate::bus::{LeadershipHook, MessageBus};
use crate::error::{AppError, AppResult};
use crate::game::GameService;
use crate::protocol::{JoinRequest, PlayerId, RoomPage, RoomRequest};
use crate::registry::PlayerRegistry;
use crate::room::RoomService;
use crate::store::RoomRepository;
use crate::users::UserStatsSink;

pub use dispatch::spawn_dispatcher;

/// Everything a request handler or connection task needs, wired once by the
/// composition root.
pub struct AppState {
    pub rooms: Arc<RoomRepository>,
    pub room_service: Arc<RoomService>,
    pub game: Arc<GameService>,
    pub registry: Arc<PlayerRegistry>,
    pub bus: Arc<dyn MessageBus>,
    pub tokens: Arc<TokenAuthority>,
    pub stats: Arc<dyn UserStatsSink>,
    pub leadership: Arc<dyn LeadershipHook>,
    pub keepalive: Duration,
    pub reaper_grace: Duration,
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/rooms", post(create_room).get(list_rooms))
        .route("/rooms/players", post(join_room).delete(leave_room))
        .route("/users/stats/{id}", get(user_stats))
        .route("/game", get(game_upgrade))
        .route("/health", get(health))
        .with_state(state)
}

fn authenticate(state: &AppState, headers: &HeaderMap) -> AppResult<PlayerId> {
    let value = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| AppError::unauthorized("Missing bearer token"))?;
    let token =
        bearer_token(value).ok_or_else(|| AppError::unauthorized("Missing bearer token"))?;
    state.tokens.verify(token)
}

async fn create_room(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(request): Json<RoomRequest>,
) -> AppResult<Response> {
    let player_id = authenticate(&state, &headers)?;
    let room = state.room_service.create_room(&player_id, &request).await?;
    Ok((StatusCode::CREATED, Json(json!({ "room": room }))).into_response())
}

async fn list_rooms(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Query(page): Query<RoomPage>,
) -> AppResult<Response> {
    authenticate(&state, &headers)?;
    let rooms = state.room_service.list_rooms(page.page, page.size).await?;
    Ok(Json(json!({ "rooms": rooms })).into_response())
}

async fn join_room(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(request): Json<JoinRequest>,
) -> AppResult<Response> {
    let player_id = authenticate(&state, &headers)?;
    let room = state.room_service.join(&player_id, &request.room).await?;
    Ok((StatusCode::ACCEPTED, Json(json!({ "room": room }))).into_response())
}

#[derive(Deserialize)]
struct LeaveParams {
    #[serde(rename = "playerId")]
    player_id: PlayerId,
}

async fn leave_room(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Query(params): Query<LeaveParams>,
) -> AppResult<Response> {
    authenticate(&state, &headers)?;
    state.room_service.leave(&params.player_id).await?;
    Ok(StatusCode::ACCEPTED.into_response())
}

async fn user_stats(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> AppResult<Response> {
    let stats = state.stats.fetch(&id).await?;
    Ok(Json(stats).into_response())
}

async fn health() -> Response {
    Json(json!({ "status": "ok" })).into_response()
}

/// Upgrade `GET /game` to the persistent frame channel. The token rides the
/// `token` query parameter or the Authorization header; the connection is
/// refused when the player is not currently mapped to a room.
async fn game_upgrade(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Query(params): Query<HashMap<String, String>>,
    ws: WebSocketUpgrade,
) -> Response {
    let player_id = match params
        .get("token")
        .map(String::as_str)
        .map(|token| state.tokens.verify(token))
        .unwrap_or_else(|| authenticate(&state, &headers))
    {
        Ok(player_id) => player_id,
        Err(err) => return err.into_response(),
    };

    let room_id = match state.rooms.get_player_room(&player_id).await {
        Ok(Some(room_id)) => room_id,
        Ok(None) => {
            return AppError::forbidden("Player is not in a room").into_response();
        }
        Err(err) => return err.into_response(),
    };

    ws.on_upgrade(move |socket| connection::handle_socket(state, socket, player_id, room_id))
}
