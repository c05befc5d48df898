//! Match lifecycle: start validation, the authoritative tick loop, damage and
//! respawn resolution, game-over handling, and leader failover.

pub mod runtime;
pub mod state;

use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use uuid::Uuid;

use crate::bus::{LeaderElector, LeadershipHook, MessageBus};
use crate::error::{AppError, AppResult};
use crate::grid::CollisionGrid;
use crate::protocol::{BusMessage, Envelope, PlayerId, Position, Room, RoomId, RoomStatus};
use crate::registry::PlayerRegistry;
use crate::store::{RoomRepository, SharedStore};
use crate::users::UserStatsSink;

use state::{Bullet, GameState, MatchHandle, BULLET_SPEED};

pub struct GameService {
    rooms: Arc<RoomRepository>,
    store: Arc<dyn SharedStore>,
    bus: Arc<dyn MessageBus>,
    registry: Arc<PlayerRegistry>,
    grid: Arc<CollisionGrid>,
    stats: Arc<dyn UserStatsSink>,
    elector: LeaderElector,
    /// Matches this instance holds in memory: authoritative when we lead the
    /// room, replicas otherwise.
    matches: DashMap<RoomId, Arc<MatchHandle>>,
    /// Rooms with an active leader-contention loop, to avoid duplicates.
    contending: DashMap<RoomId, ()>,
}

impl GameService {
    pub fn new(
        rooms: Arc<RoomRepository>,
        bus: Arc<dyn MessageBus>,
        registry: Arc<PlayerRegistry>,
        grid: Arc<CollisionGrid>,
        stats: Arc<dyn UserStatsSink>,
        elector: LeaderElector,
    ) -> Arc<Self> {
        let store = rooms.store();
        Arc::new(Self {
            rooms,
            store,
            bus,
            registry,
            grid,
            stats,
            elector,
            matches: DashMap::new(),
            contending: DashMap::new(),
        })
    }

    pub fn instance_id(&self) -> &str {
        self.elector.instance_id()
    }

    pub fn match_handle(&self, room_id: &str) -> Option<Arc<MatchHandle>> {
        self.matches.get(room_id).map(|entry| Arc::clone(entry.value()))
    }

    pub(crate) async fn publish(&self, envelope: Envelope) {
        if let Err(err) = self.bus.publish(&envelope).await {
            tracing::error!(
                tag = envelope.message.tag(),
                error = %err,
                "failed to publish to coordination bus"
            );
        }
    }

    fn validate_room(room: &Room, player_id: &str) -> AppResult<()> {
        if room.host.id != player_id {
            return Err(AppError::forbidden("Only the host can start the game"));
        }
        if room.status != RoomStatus::Lobby {
            return Err(AppError::bad_request(
                "Cannot start game: room is not in LOBBY status",
            ));
        }
        if room.team1.is_empty() || room.team2.is_empty() {
            return Err(AppError::bad_request(
                "Cannot start game: not enough players in the room",
            ));
        }
        if room.team1.len() > crate::protocol::MAX_TEAM_SIZE
            || room.team2.len() > crate::protocol::MAX_TEAM_SIZE
        {
            return Err(AppError::bad_request(
                "Cannot start game: too many players in a team",
            ));
        }
        if room.team1.len().abs_diff(room.team2.len()) > 1 {
            return Err(AppError::bad_request(
                "Cannot start game: teams must have at most 1 player more than the other team",
            ));
        }
        Ok(())
    }

    /// Start the match for `room_id`, hosted (led) by this instance.
    pub async fn start_game(self: &Arc<Self>, player_id: &str, room_id: &str) -> AppResult<()> {
        let room = self.rooms.get_room(room_id).await?;
        Self::validate_room(&room, player_id)?;

        let game_state = GameState::initial(&room);
        let handle = Arc::new(MatchHandle::new(game_state.clone()));
        self.registry.attach_match(&room.member_ids(), &handle)?;
        self.matches.insert(room.id.clone(), handle.clone());

        self.rooms.set_status(room_id, RoomStatus::Playing).await?;

        if let Err(err) = game_state.checkpoint(self.store.as_ref()).await {
            tracing::warn!(%room_id, error = %err, "failed to checkpoint initial game state");
        }

        self.publish(Envelope::targeted(
            BusMessage::GameStart(game_state),
            room.member_ids(),
        ))
        .await;

        match self.elector.try_acquire(room_id).await {
            Ok(true) => {}
            Ok(false) => tracing::warn!(%room_id, "another instance already leads this room"),
            Err(err) => tracing::error!(%room_id, error = %err, "failed to acquire leader lease"),
        }

        self.publish(Envelope::untargeted(BusMessage::GameStartInfo {
            room_id: room_id.to_string(),
            instance: self.instance_id().to_string(),
        }))
        .await;

        runtime::spawn_tick_loop(self.clone(), handle);
        tracing::info!(%room_id, instance_id = %self.instance_id(), "match started");
        Ok(())
    }

    /// Position update from a locally connected player. Mid-match the local
    /// copy is updated (leader or replica) and the overwrite is replicated;
    /// in a lobby the move only fans out to the other members.
    pub async fn move_player(&self, player_id: &str, position: Position) {
        let Some(connection) = self.registry.get(player_id) else {
            tracing::debug!(%player_id, "move from unregistered player dropped");
            return;
        };

        if let Some(handle) = connection.game() {
            let mut game_state = handle.state.lock().await;
            // Checked under the lock: the final tick sets the flag before
            // releasing it, so nothing is emitted after GAME_OVER.
            if handle.is_over() {
                return;
            }
            let Some(player) = game_state.players.get_mut(player_id) else {
                return;
            };
            if !player.is_alive() {
                return;
            }
            player.position = position;
            let users = game_state.participant_ids_except(player_id);
            let room_id = game_state.room_id.clone();

            // Published under the match lock, like the tick loop, so these
            // frames cannot reorder around a concurrent GAME_OVER.
            self.publish(Envelope::targeted(
                BusMessage::Move {
                    player_id: player_id.to_string(),
                    position,
                },
                users,
            ))
            .await;
            self.publish(Envelope::untargeted(BusMessage::GameMove {
                room_id,
                player_id: player_id.to_string(),
                position,
            }))
            .await;
        } else {
            let Ok(room) = self.rooms.get_room(&connection.room_id).await else {
                return;
            };
            self.publish(Envelope::targeted(
                BusMessage::Move {
                    player_id: player_id.to_string(),
                    position,
                },
                room.member_ids_except(player_id),
            ))
            .await;
        }
    }

    /// Spawn a bullet for `owner_id` at `position`. Mints a fresh id and the
    /// fixed muzzle speed.
    pub async fn shoot(&self, owner_id: &str, position: Position) {
        let Some(connection) = self.registry.get(owner_id) else {
            return;
        };
        let bullet = Bullet {
            id: Uuid::new_v4().to_string(),
            position,
            speed: BULLET_SPEED,
            owner_id: owner_id.to_string(),
        };

        if let Some(handle) = connection.game() {
            let mut game_state = handle.state.lock().await;
            if handle.is_over() {
                return;
            }
            let Some(owner) = game_state.players.get(owner_id) else {
                return;
            };
            if !owner.is_alive() {
                return;
            }
            let team1 = owner.team1;
            game_state
                .bullets
                .insert(bullet.id.clone(), bullet.clone());
            let users = game_state.participant_ids_except(owner_id);
            let room_id = game_state.room_id.clone();

            self.publish(Envelope::targeted(
                BusMessage::Shoot {
                    id: bullet.id.clone(),
                    position,
                    team1,
                    owner_id: owner_id.to_string(),
                },
                users,
            ))
            .await;
            self.publish(Envelope::untargeted(BusMessage::GameShoot { room_id, bullet }))
                .await;
        } else {
            let Ok(room) = self.rooms.get_room(&connection.room_id).await else {
                return;
            };
            let team1 = room.team1_membership(owner_id).unwrap_or(false);
            self.publish(Envelope::targeted(
                BusMessage::Shoot {
                    id: bullet.id,
                    position,
                    team1,
                    owner_id: owner_id.to_string(),
                },
                room.member_ids_except(owner_id),
            ))
            .await;
        }
    }

    /// Merge a replicated position overwrite into the local copy of the
    /// match, if we hold one. Re-applying is idempotent.
    pub async fn apply_replica_move(&self, room_id: &str, player_id: &str, position: Position) {
        let Some(handle) = self.match_handle(room_id) else {
            return;
        };
        let mut game_state = handle.state.lock().await;
        if handle.is_over() {
            return;
        }
        if let Some(player) = game_state.players.get_mut(player_id) {
            if player.is_alive() {
                player.position = position;
            }
        }
    }

    /// Merge a replicated bullet spawn. Bullet ids are unique, so a frame
    /// seen twice (or one we originated) inserts nothing new.
    pub async fn apply_replica_shoot(&self, room_id: &str, bullet: Bullet) {
        let Some(handle) = self.match_handle(room_id) else {
            return;
        };
        let mut game_state = handle.state.lock().await;
        if handle.is_over() {
            return;
        }
        game_state
            .bullets
            .entry(bullet.id.clone())
            .or_insert(bullet);
    }

    /// Adopt a replica of a freshly started match whose players connect
    /// through this instance. The leader skips this (it already holds the
    /// authoritative copy).
    pub fn adopt_replica(&self, game_state: GameState) {
        let room_id = game_state.room_id.clone();
        if self.matches.contains_key(&room_id) {
            return;
        }
        let participants: Vec<PlayerId> = game_state.players.keys().cloned().collect();
        if !self.registry.hosts_any(&participants) {
            return;
        }
        let handle = Arc::new(MatchHandle::new(game_state));
        if let Err(err) = self.registry.attach_match(&participants, &handle) {
            tracing::warn!(%room_id, error = %err, "failed to attach replica to local players");
            return;
        }
        self.matches.insert(room_id.clone(), handle);
        tracing::debug!(%room_id, "adopted match replica for local players");
    }

    /// Drop any local copy of a finished match and detach its players.
    pub fn clear_match(&self, room_id: &str) {
        if let Some((_, handle)) = self.matches.remove(room_id) {
            handle.mark_over();
        }
        self.registry.detach_match(room_id);
    }

    /// Contend for leadership of a playing room, once per second, until we
    /// win (take over the match) or the room stops playing.
    pub async fn contend_for_leadership(self: &Arc<Self>, room_id: RoomId) {
        if self.contending.insert(room_id.clone(), ()).is_some() {
            return;
        }

        loop {
            tokio::time::sleep(crate::bus::leadership::CONTENTION_INTERVAL).await;

            let room = match self.rooms.get_room(&room_id).await {
                Ok(room) if room.status == RoomStatus::Playing => room,
                Ok(_) | Err(_) => break,
            };

            match self.elector.current_leader(&room_id).await {
                Ok(Some(holder)) if holder == self.instance_id() => break,
                Ok(_) => {}
                Err(err) => {
                    tracing::warn!(%room_id, error = %err, "leader lookup failed; retrying");
                    continue;
                }
            }

            match self.elector.try_acquire(&room_id).await {
                Ok(true) => {
                    if let Err(err) = self.take_over_match(&room).await {
                        tracing::error!(%room_id, error = %err, "failed to take over match");
                        let _ = self.elector.release(&room_id).await;
                        continue;
                    }
                    tracing::info!(
                        %room_id,
                        instance_id = %self.instance_id(),
                        "instance is now leader of the room"
                    );
                    break;
                }
                Ok(false) => {}
                Err(err) => {
                    tracing::warn!(%room_id, error = %err, "lease acquisition failed; retrying");
                }
            }
        }

        self.contending.remove(&room_id);
    }

    /// Rebuild the match from the last checkpoint and resume the tick loop.
    async fn take_over_match(self: &Arc<Self>, room: &Room) -> anyhow::Result<()> {
        let restored = GameState::restore(self.store.as_ref(), room).await?;
        let handle = Arc::new(MatchHandle::new(restored));

        // Swap out any replica we were holding for this room.
        if let Some((_, old)) = self.matches.remove(&room.id) {
            old.mark_over();
        }
        self.registry.detach_match(&room.id);
        if let Err(err) = self.registry.attach_match(&room.member_ids(), &handle) {
            tracing::warn!(room_id = %room.id, error = %err, "failed to attach restored match");
        }
        self.matches.insert(room.id.clone(), handle.clone());

        runtime::spawn_tick_loop(self.clone(), handle);
        Ok(())
    }

    /// End-of-match: detach connections, return the room to the lobby,
    /// publish the room snapshot, and record per-user results.
    /// The over-flag is already set: the final tick flips it before releasing
    /// the match lock.
    pub(crate) async fn finish_game(self: &Arc<Self>, handle: &Arc<MatchHandle>) {
        let room_id = handle.room_id.clone();
        self.matches.remove(&room_id);
        self.registry.detach_match(&room_id);

        let (winner_team1, results) = {
            let game_state = handle.state.lock().await;
            let winner_team1 = game_state
                .fortresses
                .iter()
                .find(|f| f.health <= 0)
                .map(|f| !f.team1)
                .unwrap_or(false);
            let results: Vec<(PlayerId, bool)> = game_state
                .players
                .values()
                .map(|p| (p.id.clone(), p.team1 == winner_team1))
                .collect();
            if let Err(err) = game_state.clear_checkpoint(self.store.as_ref()).await {
                tracing::warn!(%room_id, error = %err, "failed to clear match checkpoint");
            }
            (winner_team1, results)
        };

        match self.rooms.set_status(&room_id, RoomStatus::Lobby).await {
            Ok(room) => {
                let members = room.member_ids();
                self.publish(Envelope::targeted(BusMessage::RoomInfo(room), members))
                    .await;
            }
            Err(err) => {
                tracing::error!(%room_id, error = %err, "failed to return room to lobby");
            }
        }

        for (player_id, won) in results {
            if let Err(err) = self.stats.record_result(&player_id, won).await {
                tracing::warn!(%player_id, error = %err, "failed to record match result");
            }
        }

        if let Err(err) = self.elector.release(&room_id).await {
            tracing::warn!(%room_id, error = %err, "failed to release leader lease");
        }

        tracing::info!(%room_id, winner_team1, "match finished");
    }
}

#[async_trait]
impl LeadershipHook for Arc<GameService> {
    async fn attempt_leadership(&self, room_id: RoomId) {
        self.contend_for_leadership(room_id).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::protocol::Player;

    fn player(id: &str) -> Player {
        Player {
            id: id.into(),
            username: format!("user-{id}"),
        }
    }

    fn room(team1: &[&str], team2: &[&str], host: &str, status: RoomStatus) -> Room {
        let team1: Vec<Player> = team1.iter().map(|id| player(id)).collect();
        let team2: Vec<Player> = team2.iter().map(|id| player(id)).collect();
        Room {
            id: "abcd1234".into(),
            name: "arena".into(),
            capacity: 8,
            player_count: (team1.len() + team2.len()) as u32,
            team1,
            team2,
            host: player(host),
            status,
        }
    }

    #[test]
    fn start_accepts_a_balanced_lobby() {
        let room = room(&["host", "p3"], &["p2"], "host", RoomStatus::Lobby);
        assert!(GameService::validate_room(&room, "host").is_ok());
    }

    #[test]
    fn only_the_host_may_start() {
        let room = room(&["host"], &["p2"], "host", RoomStatus::Lobby);
        let err = GameService::validate_room(&room, "p2").unwrap_err();
        assert_eq!(err.kind, ErrorKind::Forbidden);
    }

    #[test]
    fn start_requires_the_lobby_phase() {
        let room = room(&["host"], &["p2"], "host", RoomStatus::Playing);
        let err = GameService::validate_room(&room, "host").unwrap_err();
        assert_eq!(err.kind, ErrorKind::BadRequest);
    }

    #[test]
    fn start_requires_both_teams_manned() {
        let room = room(&["host"], &[], "host", RoomStatus::Lobby);
        let err = GameService::validate_room(&room, "host").unwrap_err();
        assert_eq!(err.kind, ErrorKind::BadRequest);
    }

    #[test]
    fn start_rejects_lopsided_teams() {
        let room = room(&["host", "a", "b"], &["c"], "host", RoomStatus::Lobby);
        let err = GameService::validate_room(&room, "host").unwrap_err();
        assert_eq!(err.kind, ErrorKind::BadRequest);
        assert!(err.message.contains("at most 1 player"));
    }

    #[test]
    fn start_rejects_oversized_teams() {
        let room = room(
            &["host", "a", "b", "c", "d"],
            &["e", "f", "g", "h"],
            "host",
            RoomStatus::Lobby,
        );
        let err = GameService::validate_room(&room, "host").unwrap_err();
        assert_eq!(err.kind, ErrorKind::BadRequest);
        assert!(err.message.contains("too many players"));
    }
}
