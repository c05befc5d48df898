//! Authoritative in-memory match state and its shared-store checkpoints.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use anyhow::Result;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use crate::protocol::{PlayerId, Position, Room, RoomId};
use crate::store::{keys, SharedStore};

/// Starting health of a tank.
pub const PLAYER_HEALTH: i32 = 100;
/// Starting health of a fortress.
pub const FORTRESS_HEALTH: i32 = 500;
/// Damage dealt by one bullet.
pub const BULLET_DAMAGE: i32 = 20;
/// Bullet velocity in units per second.
pub const BULLET_SPEED: f64 = 500.0;
/// Width of a bullet, used for the perpendicular collision sample points.
pub const BULLET_WIDTH: f64 = 12.0;
/// Player hitbox (axis-aligned, centered on the player).
pub const PLAYER_AABB: (f64, f64) = (32.0, 30.0);
/// Fortress hitbox.
pub const FORTRESS_AABB: (f64, f64) = (64.0, 256.0);

/// Team 1 spawn column; team 2 mirrors on the far side.
pub const TEAM1_SPAWN_X: f64 = 150.0;
pub const TEAM2_SPAWN_X: f64 = 1834.0;
/// First spawn row at match start; players stack every 80 px below it.
pub const SPAWN_BASE_Y: f64 = 324.0;
pub const SPAWN_ROW_SPACING: f64 = 80.0;
/// Respawn corridor: `RESPAWN_BASE_Y + 80·rand(0..6)`, clamped to the corridor.
pub const RESPAWN_BASE_Y: f64 = 244.0;
pub const RESPAWN_ROWS: u32 = 6;

pub const FORTRESS1_POSITION: (f64, f64) = (48.0, 416.0);
pub const FORTRESS2_POSITION: (f64, f64) = (1936.0, 416.0);

/// Checkpointed bullets expire after this long, bounding the in-flight set a
/// new leader can restore.
pub const BULLET_CHECKPOINT_TTL: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PlayerState {
    pub id: PlayerId,
    pub position: Position,
    pub health: i32,
    pub team1: bool,
}

impl PlayerState {
    pub fn is_alive(&self) -> bool {
        self.health > 0
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Bullet {
    pub id: String,
    pub position: Position,
    pub speed: f64,
    pub owner_id: PlayerId,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Fortress {
    pub id: String,
    pub position: Position,
    pub health: i32,
    pub team1: bool,
}

/// Authoritative state of one running match. Mutated only under the match
/// lock; replicas on non-leader instances receive position and bullet
/// overwrites but never run physics.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct GameState {
    pub room_id: RoomId,
    pub timestamp: i64,
    pub players: HashMap<PlayerId, PlayerState>,
    pub bullets: HashMap<String, Bullet>,
    pub fortresses: Vec<Fortress>,
}

impl GameState {
    /// Initial placement: fortresses at their fixed positions, each team
    /// stacked in rows on its own side, team 2 facing left.
    pub fn initial(room: &Room) -> Self {
        let mut players = HashMap::new();
        for (i, player) in room.team1.iter().enumerate() {
            players.insert(
                player.id.clone(),
                PlayerState {
                    id: player.id.clone(),
                    position: Position::new(
                        TEAM1_SPAWN_X,
                        SPAWN_BASE_Y + SPAWN_ROW_SPACING * i as f64,
                        0.0,
                    ),
                    health: PLAYER_HEALTH,
                    team1: true,
                },
            );
        }
        for (i, player) in room.team2.iter().enumerate() {
            players.insert(
                player.id.clone(),
                PlayerState {
                    id: player.id.clone(),
                    position: Position::new(
                        TEAM2_SPAWN_X,
                        SPAWN_BASE_Y + SPAWN_ROW_SPACING * i as f64,
                        std::f64::consts::PI,
                    ),
                    health: PLAYER_HEALTH,
                    team1: false,
                },
            );
        }

        Self {
            room_id: room.id.clone(),
            timestamp: chrono::Utc::now().timestamp(),
            players,
            bullets: HashMap::new(),
            fortresses: vec![
                Fortress {
                    id: "1".into(),
                    position: Position::new(FORTRESS1_POSITION.0, FORTRESS1_POSITION.1, 0.0),
                    health: FORTRESS_HEALTH,
                    team1: true,
                },
                Fortress {
                    id: "2".into(),
                    position: Position::new(FORTRESS2_POSITION.0, FORTRESS2_POSITION.1, 0.0),
                    health: FORTRESS_HEALTH,
                    team1: false,
                },
            ],
        }
    }

    /// Ids of every match participant except `excluded` (pass "" for all).
    pub fn participant_ids_except(&self, excluded: &str) -> Vec<PlayerId> {
        self.players
            .keys()
            .filter(|id| id.as_str() != excluded)
            .cloned()
            .collect()
    }

    /// Write the per-entity projection of this state to the shared store.
    /// Bullets carry a TTL; players and fortresses persist until the match
    /// ends.
    pub async fn checkpoint(&self, store: &dyn SharedStore) -> Result<()> {
        for bullet in self.bullets.values() {
            store
                .hset_all(
                    &keys::bullet(&self.room_id, &bullet.id),
                    &[
                        ("x".into(), bullet.position.x.to_string()),
                        ("y".into(), bullet.position.y.to_string()),
                        ("angle".into(), bullet.position.angle.to_string()),
                        ("speed".into(), bullet.speed.to_string()),
                        ("ownerId".into(), bullet.owner_id.clone()),
                    ],
                    Some(BULLET_CHECKPOINT_TTL),
                )
                .await?;
        }
        for player in self.players.values() {
            store
                .hset_all(
                    &keys::player_state(&self.room_id, &player.id),
                    &[
                        ("x".into(), player.position.x.to_string()),
                        ("y".into(), player.position.y.to_string()),
                        ("angle".into(), player.position.angle.to_string()),
                    ],
                    None,
                )
                .await?;
        }
        for fortress in &self.fortresses {
            store
                .hset_all(
                    &keys::fortress(&self.room_id, &fortress.id),
                    &[
                        ("x".into(), fortress.position.x.to_string()),
                        ("y".into(), fortress.position.y.to_string()),
                        ("health".into(), fortress.health.to_string()),
                        ("team1".into(), fortress.team1.to_string()),
                    ],
                    None,
                )
                .await?;
        }
        Ok(())
    }

    /// Rebuild a state from the checkpoint keys of `room`. Players start from
    /// the initial placement, overridden by any checkpointed position; team
    /// membership comes from the room record and health resets to full (the
    /// player projection intentionally carries neither). Fortress angles
    /// default to zero. Bullets older than their TTL have already expired.
    pub async fn restore(store: &dyn SharedStore, room: &Room) -> Result<Self> {
        let mut state = Self::initial(room);

        let prefix = keys::checkpoint_prefix(&room.id);
        for key in store.keys_with_prefix(&prefix).await? {
            let fields = store.hgetall(&key).await?;
            let Some(suffix) = key.strip_prefix(&prefix) else {
                continue;
            };
            if let Some(player_id) = suffix.strip_prefix("player:") {
                if let Some(player) = state.players.get_mut(player_id) {
                    player.position = Position::new(
                        field_f64(&fields, "x").unwrap_or(player.position.x),
                        field_f64(&fields, "y").unwrap_or(player.position.y),
                        field_f64(&fields, "angle").unwrap_or(player.position.angle),
                    );
                }
            } else if let Some(fortress_id) = suffix.strip_prefix("fortress:") {
                if let Some(fortress) = state
                    .fortresses
                    .iter_mut()
                    .find(|f| f.id == fortress_id)
                {
                    fortress.position = Position::new(
                        field_f64(&fields, "x").unwrap_or(fortress.position.x),
                        field_f64(&fields, "y").unwrap_or(fortress.position.y),
                        0.0,
                    );
                    if let Some(health) = field_f64(&fields, "health") {
                        fortress.health = health as i32;
                    }
                }
            } else if let Some(bullet_id) = suffix.strip_prefix("bullet:") {
                let Some(owner_id) = fields.get("ownerId").cloned() else {
                    continue;
                };
                state.bullets.insert(
                    bullet_id.to_string(),
                    Bullet {
                        id: bullet_id.to_string(),
                        position: Position::new(
                            field_f64(&fields, "x").unwrap_or_default(),
                            field_f64(&fields, "y").unwrap_or_default(),
                            field_f64(&fields, "angle").unwrap_or_default(),
                        ),
                        speed: field_f64(&fields, "speed").unwrap_or(BULLET_SPEED),
                        owner_id,
                    },
                );
            }
        }

        state.timestamp = chrono::Utc::now().timestamp();
        Ok(state)
    }

    /// Remove every checkpoint key of this room.
    pub async fn clear_checkpoint(&self, store: &dyn SharedStore) -> Result<()> {
        for key in store
            .keys_with_prefix(&keys::checkpoint_prefix(&self.room_id))
            .await?
        {
            store.del(&key).await?;
        }
        Ok(())
    }
}

fn field_f64(fields: &HashMap<String, String>, name: &str) -> Option<f64> {
    fields.get(name).and_then(|raw| raw.parse().ok())
}

/// One live match on this instance: the authoritative copy when we lead it, a
/// replica otherwise. The single lock covers ticks and single-event mutations.
pub struct MatchHandle {
    pub room_id: RoomId,
    pub state: Mutex<GameState>,
    game_over: AtomicBool,
}

impl MatchHandle {
    pub fn new(state: GameState) -> Self {
        Self {
            room_id: state.room_id.clone(),
            state: Mutex::new(state),
            game_over: AtomicBool::new(false),
        }
    }

    pub fn is_over(&self) -> bool {
        self.game_over.load(Ordering::Acquire)
    }

    pub fn mark_over(&self) {
        self.game_over.store(true, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{Player, RoomStatus};
    use crate::store::MemoryStore;
    use std::sync::Arc;

    fn player(id: &str) -> Player {
        Player {
            id: id.into(),
            username: format!("user-{id}"),
        }
    }

    fn playing_room() -> Room {
        Room {
            id: "abcd1234".into(),
            name: "arena".into(),
            capacity: 4,
            player_count: 4,
            team1: vec![player("1"), player("3")],
            team2: vec![player("2"), player("4")],
            host: player("1"),
            status: RoomStatus::Playing,
        }
    }

    #[test]
    fn initial_placement_matches_layout() {
        let state = GameState::initial(&playing_room());

        let p1 = &state.players["1"];
        assert_eq!((p1.position.x, p1.position.y), (150.0, 324.0));
        assert_eq!(p1.position.angle, 0.0);
        assert!(p1.team1);

        let p3 = &state.players["3"];
        assert_eq!(p3.position.y, 404.0);

        let p2 = &state.players["2"];
        assert_eq!((p2.position.x, p2.position.y), (1834.0, 324.0));
        assert!((p2.position.angle - std::f64::consts::PI).abs() < 1e-12);
        assert!(!p2.team1);

        assert_eq!(state.fortresses.len(), 2);
        assert_eq!(state.fortresses[0].position.x, 48.0);
        assert_eq!(state.fortresses[1].position.x, 1936.0);
        assert!(state.fortresses.iter().all(|f| f.health == 500));
        assert!(state.bullets.is_empty());
    }

    #[tokio::test]
    async fn checkpoint_then_restore_preserves_the_match() {
        let store = Arc::new(MemoryStore::new());
        let room = playing_room();
        let mut state = GameState::initial(&room);

        state.players.get_mut("1").unwrap().position = Position::new(400.0, 500.0, 1.0);
        state.fortresses[1].health = 120;
        state.bullets.insert(
            "b-1".into(),
            Bullet {
                id: "b-1".into(),
                position: Position::new(700.0, 416.0, 0.5),
                speed: BULLET_SPEED,
                owner_id: "1".into(),
            },
        );

        state.checkpoint(store.as_ref()).await.unwrap();
        let restored = GameState::restore(store.as_ref(), &room).await.unwrap();

        let p1 = &restored.players["1"];
        assert_eq!((p1.position.x, p1.position.y, p1.position.angle), (400.0, 500.0, 1.0));
        // Health is not part of the player projection; survivors come back full.
        assert_eq!(p1.health, PLAYER_HEALTH);
        assert!(p1.team1);

        assert_eq!(restored.fortresses[1].health, 120);
        assert_eq!(restored.fortresses[1].position.angle, 0.0);

        let bullet = &restored.bullets["b-1"];
        assert_eq!(bullet.owner_id, "1");
        assert_eq!(bullet.position.x, 700.0);
        assert_eq!(bullet.speed, BULLET_SPEED);
    }

    #[tokio::test]
    async fn clear_checkpoint_removes_every_key() {
        let store = Arc::new(MemoryStore::new());
        let room = playing_room();
        let state = GameState::initial(&room);
        state.checkpoint(store.as_ref()).await.unwrap();
        assert!(!store
            .keys_with_prefix("room:abcd1234:")
            .await
            .unwrap()
            .is_empty());

        state.clear_checkpoint(store.as_ref()).await.unwrap();
        assert!(store
            .keys_with_prefix("room:abcd1234:")
            .await
            .unwrap()
            .is_empty());
    }

    #[test]
    fn game_state_serializes_camel_case() {
        let state = GameState::initial(&playing_room());
        let json = serde_json::to_value(&state).unwrap();
        assert_eq!(json["roomId"], "abcd1234");
        assert!(json["players"]["1"]["team1"].as_bool().unwrap());
    }
}
