//! Per-connection ingress loop and the grace-delayed disconnect reaper.

use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket};
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;

use crate::protocol::{BusMessage, ClientFrame, PlayerId, Position, RoomId};
use crate::registry::OUTBOUND_QUEUE_DEPTH;

use super::AppState;

pub(super) async fn handle_socket(
    state: Arc<AppState>,
    socket: WebSocket,
    player_id: PlayerId,
    room_id: RoomId,
) {
    let (mut sink, mut stream) = socket.split();
    let (tx, mut rx) = mpsc::channel::<Arc<BusMessage>>(OUTBOUND_QUEUE_DEPTH);

    let connection = state.registry.register(&player_id, &room_id, tx);

    // A reconnect mid-match re-attaches to the local copy of the game.
    if connection.game().is_none() {
        if let Some(handle) = state.game.match_handle(&room_id) {
            if let Err(err) = connection.attach_game(handle) {
                tracing::warn!(%player_id, error = %err, "failed to re-attach match on connect");
            }
        }
    }

    if let Err(err) = state.rooms.set_session_mark(&player_id).await {
        tracing::warn!(%player_id, error = %err, "failed to set session mark");
    }

    tracing::info!(%player_id, %room_id, "player connected");

    // Writer: drains the outbound queue and keeps the socket alive with a
    // periodic ping. Frame order is the queue order (FIFO per socket).
    let keepalive = state.keepalive;
    let writer_player = player_id.clone();
    let send_task = tokio::spawn(async move {
        let mut ping = tokio::time::interval(keepalive);
        ping.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        ping.tick().await; // the first tick fires immediately; skip it
        loop {
            tokio::select! {
                outbound = rx.recv() => {
                    let Some(message) = outbound else { break };
                    let frame = match serde_json::to_string(&*message) {
                        Ok(frame) => frame,
                        Err(err) => {
                            tracing::error!(player_id = %writer_player, error = %err, "failed to encode frame");
                            continue;
                        }
                    };
                    if sink.send(Message::Text(frame.into())).await.is_err() {
                        break;
                    }
                }
                _ = ping.tick() => {
                    if sink.send(Message::Ping(Vec::new().into())).await.is_err() {
                        break;
                    }
                }
            }
        }
    });

    // Reader: decode and dispatch until the socket drops.
    while let Some(frame) = stream.next().await {
        match frame {
            Ok(Message::Text(text)) => match serde_json::from_str::<ClientFrame>(&text) {
                Ok(frame) => dispatch_frame(&state, &player_id, frame).await,
                Err(err) => {
                    tracing::warn!(%player_id, error = %err, "discarding malformed frame");
                }
            },
            Ok(Message::Close(_)) => break,
            Ok(_) => {} // pings/pongs/binary: nothing to do
            Err(err) => {
                tracing::warn!(%player_id, error = %err, "socket read error");
                break;
            }
        }
    }

    // Disconnect: flag the connection, drop the session mark, leave the rest
    // to the reaper so a quick reconnect costs nothing.
    connection.mark_disconnected();
    if let Err(err) = state.rooms.clear_session_mark(&player_id).await {
        tracing::warn!(%player_id, error = %err, "failed to clear session mark");
    }
    send_task.abort();
    tracing::info!(%player_id, "player disconnected; reaper scheduled");
    spawn_reaper(state, player_id);
}

async fn dispatch_frame(state: &Arc<AppState>, player_id: &PlayerId, frame: ClientFrame) {
    match frame {
        ClientFrame::Move { x, y, angle } => {
            state
                .game
                .move_player(player_id, Position::new(x, y, angle))
                .await;
        }
        ClientFrame::Shoot {
            owner_id,
            x,
            y,
            angle,
        } => {
            state.game.shoot(&owner_id, Position::new(x, y, angle)).await;
        }
        ClientFrame::GameStart { room_id } => {
            if let Err(err) = state.game.start_game(player_id, &room_id).await {
                tracing::warn!(%player_id, %room_id, error = %err, "game start rejected");
            }
        }
        ClientFrame::RoomLeave { .. } => {
            if let Err(err) = state.room_service.leave(player_id).await {
                tracing::warn!(%player_id, error = %err, "room leave rejected");
            }
        }
        ClientFrame::RoomKick {
            room_id,
            player_id: target,
        } => {
            if let Err(err) = state.room_service.kick(player_id, &room_id, &target).await {
                tracing::warn!(%player_id, %room_id, error = %err, "kick rejected");
            }
        }
        ClientFrame::RoomDeletion { room } => {
            if let Err(err) = state.room_service.delete_room(player_id, &room).await {
                tracing::warn!(%player_id, room_id = %room, error = %err, "room deletion rejected");
            }
        }
    }
}

/// After the grace window, clean up a player who neither reconnected here nor
/// resurfaced on another instance (session mark absent).
pub fn spawn_reaper(state: Arc<AppState>, player_id: PlayerId) {
    tokio::spawn(async move {
        tokio::time::sleep(state.reaper_grace).await;

        let Some(connection) = state.registry.get(&player_id) else {
            return;
        };
        if connection.is_connected() {
            return;
        }
        match state.rooms.session_mark_present(&player_id).await {
            Ok(true) => return, // another instance picked up the socket
            Ok(false) => {}
            Err(err) => {
                tracing::warn!(%player_id, error = %err, "session mark lookup failed; reaping anyway");
            }
        }

        if let Err(err) = state.room_service.leave(&player_id).await {
            tracing::debug!(%player_id, error = %err, "reaper leave was a no-op");
        }
        state.registry.remove(&player_id);
        tracing::info!(%player_id, "disconnected player reaped");
    });
}
