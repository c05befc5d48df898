//! Durable room records and their secondary indexes.
//!
//! All writes are single-key; the multi-key invariants (room record plus the
//! player→room index, room record plus the ordered index) are kept recoverable
//! by write ordering: the player index is written only after the room mutation
//! succeeded, and deletion drops the room record before its index entry.

use std::sync::Arc;

use uuid::Uuid;

use crate::error::{AppError, AppResult};
use crate::protocol::{Player, PlayerId, Room, RoomId, RoomStatus, MAX_TEAM_SIZE};
use crate::users::UserDirectory;

use super::{keys, SharedStore};

pub struct RoomRepository {
    store: Arc<dyn SharedStore>,
    users: Arc<dyn UserDirectory>,
}

impl RoomRepository {
    pub fn new(store: Arc<dyn SharedStore>, users: Arc<dyn UserDirectory>) -> Self {
        Self { store, users }
    }

    async fn player(&self, user_id: &str) -> AppResult<Player> {
        let username = self.users.username(user_id).await?;
        Ok(Player {
            id: user_id.to_string(),
            username,
        })
    }

    async fn save(&self, room: &Room) -> AppResult<()> {
        let record = serde_json::to_string(room)
            .map_err(|e| AppError::internal("error serializing room", e.into()))?;
        self.store
            .set(&keys::room(&room.id), &record)
            .await
            .map_err(|e| AppError::internal("error saving room", e))
    }

    /// Create a room hosted by `host_user_id`, placed alone on team 1.
    pub async fn create_room(
        &self,
        name: &str,
        capacity: u32,
        host_user_id: &str,
    ) -> AppResult<Room> {
        if self.get_player_room(host_user_id).await?.is_some() {
            return Err(AppError::conflict("Player already in a room"));
        }

        let host = self.player(host_user_id).await?;
        let id: RoomId = Uuid::new_v4().to_string()[..crate::protocol::ROOM_ID_LENGTH].to_string();
        let room = Room {
            id: id.clone(),
            name: name.to_string(),
            capacity,
            player_count: 1,
            team1: vec![host.clone()],
            team2: Vec::new(),
            host,
            status: RoomStatus::Lobby,
        };

        self.save(&room).await?;
        let created_at = chrono::Utc::now().timestamp_millis() as f64;
        self.store
            .zadd(keys::ROOM_INDEX, created_at, &id)
            .await
            .map_err(|e| AppError::internal("error indexing room", e))?;

        // Player index last so a partial failure leaves no dangling mapping.
        self.set_player_room(host_user_id, &id).await?;
        Ok(room)
    }

    pub async fn get_room(&self, room_id: &str) -> AppResult<Room> {
        let raw = self
            .store
            .get(&keys::room(room_id))
            .await
            .map_err(|e| AppError::internal("error reading room", e))?
            .ok_or_else(|| AppError::not_found("Room not found"))?;
        serde_json::from_str(&raw)
            .map_err(|e| AppError::internal("error deserializing room", e.into()))
    }

    /// Rooms ordered newest-first. Entries whose record vanished underneath
    /// the index are skipped.
    pub async fn list_rooms(&self, page: u32, size: u32) -> AppResult<Vec<Room>> {
        if size == 0 {
            return Ok(Vec::new());
        }
        let start = (page * size) as usize;
        let stop = start + size as usize - 1;
        let ids = self
            .store
            .zrevrange(keys::ROOM_INDEX, start, stop)
            .await
            .map_err(|e| AppError::internal("error reading room index", e))?;

        let mut rooms = Vec::with_capacity(ids.len());
        for id in ids {
            match self.get_room(&id).await {
                Ok(room) => rooms.push(room),
                Err(err) if err.kind == crate::error::ErrorKind::NotFound => {
                    tracing::debug!(room_id = %id, "skipping indexed room with missing record");
                }
                Err(err) => return Err(err),
            }
        }
        Ok(rooms)
    }

    /// Seat a player on the smaller team (ties favour team 1).
    pub async fn add_player(&self, room_id: &str, user_id: &str) -> AppResult<Room> {
        if self.get_player_room(user_id).await?.is_some() {
            return Err(AppError::conflict("Player already in a room"));
        }

        let mut room = self.get_room(room_id).await?;
        if room.status != RoomStatus::Lobby {
            return Err(AppError::bad_request("Room is not in LOBBY status"));
        }
        if room.is_full() {
            return Err(AppError::bad_request("Room is full"));
        }

        let player = self.player(user_id).await?;
        if room.team1.len() <= room.team2.len() && room.team1.len() < MAX_TEAM_SIZE {
            room.team1.push(player);
        } else {
            room.team2.push(player);
        }
        room.player_count += 1;

        self.save(&room).await?;
        self.set_player_room(user_id, room_id).await?;
        Ok(room)
    }

    /// Remove a player from whichever team holds them.
    pub async fn remove_player(&self, room_id: &str, user_id: &str) -> AppResult<Room> {
        let mut room = self.get_room(room_id).await?;
        if room.player_count == 0 {
            return Err(AppError::bad_request("Room has no players left"));
        }
        if !room.contains(user_id) {
            return Err(AppError::not_found("Player not found in room"));
        }

        room.team1.retain(|p| p.id != user_id);
        room.team2.retain(|p| p.id != user_id);
        room.player_count -= 1;

        self.save(&room).await?;
        self.delete_player_room(user_id).await?;
        Ok(room)
    }

    pub async fn set_host(&self, room_id: &str, host: Player) -> AppResult<Room> {
        let mut room = self.get_room(room_id).await?;
        room.host = host;
        self.save(&room).await?;
        Ok(room)
    }

    pub async fn set_status(&self, room_id: &str, status: RoomStatus) -> AppResult<Room> {
        let mut room = self.get_room(room_id).await?;
        room.status = status;
        self.save(&room).await?;
        Ok(room)
    }

    /// Drop the record first; a crash between the two writes leaves only a
    /// dangling index entry, which listing tolerates.
    pub async fn delete_room(&self, room_id: &str) -> AppResult<()> {
        self.store
            .del(&keys::room(room_id))
            .await
            .map_err(|e| AppError::internal("error deleting room", e))?;
        self.store
            .zrem(keys::ROOM_INDEX, room_id)
            .await
            .map_err(|e| AppError::internal("error unindexing room", e))?;
        Ok(())
    }

    pub async fn set_player_room(&self, user_id: &str, room_id: &str) -> AppResult<()> {
        self.store
            .set(&keys::player_room(user_id), room_id)
            .await
            .map_err(|e| AppError::internal("error saving player room", e))
    }

    pub async fn get_player_room(&self, user_id: &str) -> AppResult<Option<RoomId>> {
        self.store
            .get(&keys::player_room(user_id))
            .await
            .map_err(|e| AppError::internal("error reading player room", e))
    }

    pub async fn delete_player_room(&self, user_id: &str) -> AppResult<()> {
        self.store
            .del(&keys::player_room(user_id))
            .await
            .map_err(|e| AppError::internal("error deleting player room", e))?;
        Ok(())
    }

    /// Mark the player's socket as held by some instance.
    pub async fn set_session_mark(&self, player_id: &PlayerId) -> AppResult<()> {
        self.store
            .set(&keys::session(player_id), "connected")
            .await
            .map_err(|e| AppError::internal("error marking session", e))
    }

    pub async fn clear_session_mark(&self, player_id: &PlayerId) -> AppResult<()> {
        self.store
            .del(&keys::session(player_id))
            .await
            .map_err(|e| AppError::internal("error clearing session", e))?;
        Ok(())
    }

    pub async fn session_mark_present(&self, player_id: &PlayerId) -> AppResult<bool> {
        Ok(self
            .store
            .get(&keys::session(player_id))
            .await
            .map_err(|e| AppError::internal("error reading session", e))?
            .is_some())
    }

    /// Expose the raw store for collaborators sharing the same backend.
    pub fn store(&self) -> Arc<dyn SharedStore> {
        self.store.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use crate::users::InMemoryUsers;

    fn repository() -> RoomRepository {
        RoomRepository::new(Arc::new(MemoryStore::new()), Arc::new(InMemoryUsers::new()))
    }

    #[tokio::test]
    async fn create_room_seats_host_on_team1() {
        let repo = repository();
        let room = repo.create_room("arena", 4, "1").await.unwrap();

        assert_eq!(room.id.len(), 8);
        assert_eq!(room.player_count, 1);
        assert_eq!(room.team1.len(), 1);
        assert_eq!(room.host.id, "1");
        assert_eq!(room.status, RoomStatus::Lobby);
        assert_eq!(repo.get_player_room("1").await.unwrap(), Some(room.id));
    }

    #[tokio::test]
    async fn create_room_rejects_player_already_mapped() {
        let repo = repository();
        repo.create_room("first", 4, "1").await.unwrap();
        let err = repo.create_room("second", 4, "1").await.unwrap_err();
        assert_eq!(err.kind, crate::error::ErrorKind::Conflict);
    }

    #[tokio::test]
    async fn add_player_balances_teams() {
        let repo = repository();
        let room = repo.create_room("arena", 4, "1").await.unwrap();

        let room = repo.add_player(&room.id, "2").await.unwrap();
        assert_eq!(room.team2.iter().map(|p| &p.id).collect::<Vec<_>>(), ["2"]);

        let room = repo.add_player(&room.id, "3").await.unwrap();
        assert_eq!(
            room.team1.iter().map(|p| &p.id).collect::<Vec<_>>(),
            ["1", "3"]
        );

        let room = repo.add_player(&room.id, "4").await.unwrap();
        assert_eq!(
            room.team2.iter().map(|p| &p.id).collect::<Vec<_>>(),
            ["2", "4"]
        );
        assert_eq!(room.player_count, 4);
    }

    #[tokio::test]
    async fn add_player_rejects_full_room() {
        let repo = repository();
        let room = repo.create_room("arena", 2, "1").await.unwrap();
        repo.add_player(&room.id, "2").await.unwrap();

        let err = repo.add_player(&room.id, "3").await.unwrap_err();
        assert_eq!(err.kind, crate::error::ErrorKind::BadRequest);
        assert_eq!(err.message, "Room is full");
    }

    #[tokio::test]
    async fn add_player_rejects_mid_match_join() {
        let repo = repository();
        let room = repo.create_room("arena", 4, "1").await.unwrap();
        repo.set_status(&room.id, RoomStatus::Playing).await.unwrap();

        let err = repo.add_player(&room.id, "2").await.unwrap_err();
        assert_eq!(err.kind, crate::error::ErrorKind::BadRequest);
    }

    #[tokio::test]
    async fn remove_player_clears_mapping_and_count() {
        let repo = repository();
        let room = repo.create_room("arena", 4, "1").await.unwrap();
        repo.add_player(&room.id, "2").await.unwrap();

        let room = repo.remove_player(&room.id, "2").await.unwrap();
        assert_eq!(room.player_count, 1);
        assert!(room.team2.is_empty());
        assert_eq!(repo.get_player_room("2").await.unwrap(), None);

        let err = repo.remove_player(&room.id, "9").await.unwrap_err();
        assert_eq!(err.kind, crate::error::ErrorKind::NotFound);
    }

    #[tokio::test]
    async fn listing_orders_newest_first_and_paginates() {
        let repo = repository();
        let a = repo.create_room("a", 2, "1").await.unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        let b = repo.create_room("b", 2, "2").await.unwrap();

        let rooms = repo.list_rooms(0, 10).await.unwrap();
        assert_eq!(
            rooms.iter().map(|r| &r.id).collect::<Vec<_>>(),
            [&b.id, &a.id]
        );

        let page = repo.list_rooms(1, 1).await.unwrap();
        assert_eq!(page.len(), 1);
        assert_eq!(page[0].id, a.id);
    }

    #[tokio::test]
    async fn delete_room_removes_record_and_index_entry() {
        let repo = repository();
        let room = repo.create_room("arena", 4, "1").await.unwrap();
        repo.delete_room(&room.id).await.unwrap();

        assert!(repo.get_room(&room.id).await.is_err());
        assert!(repo.list_rooms(0, 10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn session_marks_toggle() {
        let repo = repository();
        let id = "7".to_string();
        assert!(!repo.session_mark_present(&id).await.unwrap());
        repo.set_session_mark(&id).await.unwrap();
        assert!(repo.session_mark_present(&id).await.unwrap());
        repo.clear_session_mark(&id).await.unwrap();
        assert!(!repo.session_mark_present(&id).await.unwrap());
    }
}
