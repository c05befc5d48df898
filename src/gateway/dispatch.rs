//! The per-instance bus dispatch task.
//!
//! Inbound envelopes are either targeted client messages — forwarded to the
//! locally attached connections named in `users` — or replication and
//! leader-contention signals merged into local match copies.

use std::sync::Arc;
use std::time::Duration;

use crate::protocol::{BusMessage, Envelope};

use super::AppState;

const RESUBSCRIBE_BACKOFF: Duration = Duration::from_secs(1);

/// Subscribe to the coordination bus and dispatch until shutdown. The
/// subscription is re-established forever with a 1-second backoff.
pub fn spawn_dispatcher(state: Arc<AppState>) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            match state.bus.subscribe().await {
                Ok(mut subscription) => {
                    tracing::info!("subscribed to coordination bus");
                    while let Some(envelope) = subscription.next().await {
                        handle_envelope(&state, envelope).await;
                    }
                    tracing::warn!("bus subscription ended; resubscribing");
                }
                Err(err) => {
                    tracing::warn!(error = %err, "bus subscription failed; retrying");
                }
            }
            tokio::time::sleep(RESUBSCRIBE_BACKOFF).await;
        }
    })
}

async fn handle_envelope(state: &Arc<AppState>, envelope: Envelope) {
    match &envelope.message {
        // Leader announcement from another instance: start contending so the
        // match survives that instance's failure.
        BusMessage::GameStartInfo { room_id, instance } => {
            if instance != state.game.instance_id() {
                let hook = state.leadership.clone();
                let contested = room_id.clone();
                tokio::spawn(async move {
                    hook.attempt_leadership(contested).await;
                });
            }
            return;
        }
        // Replication frames update local match copies and stop there.
        BusMessage::GameMove {
            room_id,
            player_id,
            position,
        } => {
            state
                .game
                .apply_replica_move(room_id, player_id, *position)
                .await;
            return;
        }
        BusMessage::GameShoot { room_id, bullet } => {
            state
                .game
                .apply_replica_shoot(room_id, bullet.clone())
                .await;
            return;
        }
        // A starting match needs a replica wherever its players connect.
        BusMessage::GameStart(game_state) => {
            state.game.adopt_replica(game_state.clone());
        }
        // The post-match snapshot doubles as the replica teardown signal.
        BusMessage::RoomInfo(room) => {
            state.game.clear_match(&room.id);
        }
        _ => {}
    }

    if let Some(users) = &envelope.users {
        let message = Arc::new(envelope.message);
        state.registry.send_to_users(users, &message);
    }
}
