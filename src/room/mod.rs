//! Lobby state machine on top of the room store. Every transition fans its
//! outbound effect out through the coordination bus; the in-instance `Room`
//! values handled here are cached reads, never shared state.

use std::sync::Arc;

use crate::bus::MessageBus;
use crate::error::{AppError, AppResult};
use crate::protocol::{BusMessage, Envelope, Player, Room, RoomRequest};
use crate::store::RoomRepository;

pub struct RoomService {
    rooms: Arc<RoomRepository>,
    bus: Arc<dyn MessageBus>,
}

impl RoomService {
    pub fn new(rooms: Arc<RoomRepository>, bus: Arc<dyn MessageBus>) -> Self {
        Self { rooms, bus }
    }

    async fn publish(&self, envelope: Envelope) {
        if let Err(err) = self.bus.publish(&envelope).await {
            tracing::error!(
                tag = envelope.message.tag(),
                error = %err,
                "failed to publish room event"
            );
        }
    }

    pub async fn create_room(&self, host_id: &str, request: &RoomRequest) -> AppResult<Room> {
        request.validate()?;
        let room = self
            .rooms
            .create_room(&request.name, request.capacity, host_id)
            .await?;
        tracing::info!(room_id = %room.id, host = %host_id, "room created");
        Ok(room)
    }

    pub async fn get_room(&self, room_id: &str) -> AppResult<Room> {
        self.rooms.get_room(room_id).await
    }

    pub async fn list_rooms(&self, page: u32, size: u32) -> AppResult<Vec<Room>> {
        self.rooms.list_rooms(page, size).await
    }

    /// Seat a player and tell the rest of the lobby, exactly once.
    pub async fn join(&self, player_id: &str, room_id: &str) -> AppResult<Room> {
        let room = self.rooms.add_player(room_id, player_id).await?;

        let Some(team1) = room.team1_membership(player_id) else {
            // add_player just seated them; a miss here means the record was
            // concurrently rewritten. Surface it rather than guessing.
            return Err(AppError::not_found("Player not found in room"));
        };
        let player = if team1 {
            room.team1.iter().find(|p| p.id == player_id)
        } else {
            room.team2.iter().find(|p| p.id == player_id)
        }
        .cloned()
        .ok_or_else(|| AppError::not_found("Player not found in room"))?;

        self.publish(Envelope::targeted(
            BusMessage::RoomJoin {
                player,
                team: if team1 { 1 } else { 2 },
            },
            room.member_ids_except(player_id),
        ))
        .await;

        tracing::info!(%room_id, player = %player_id, "player joined room");
        Ok(room)
    }

    /// Remove a player from their current room; hands the host role forward
    /// and deletes the room when it empties.
    pub async fn leave(&self, player_id: &str) -> AppResult<()> {
        let room_id = self
            .rooms
            .get_player_room(player_id)
            .await?
            .ok_or_else(|| AppError::bad_request("Player is not in a room"))?;

        let mut room = self.rooms.remove_player(&room_id, player_id).await?;

        if room.player_count == 0 {
            self.rooms.delete_room(&room_id).await?;
            tracing::info!(%room_id, "room emptied and deleted");
            return Ok(());
        }

        if room.host.id == player_id {
            let new_host = room
                .team1
                .first()
                .or_else(|| room.team2.first())
                .cloned()
                .ok_or_else(|| AppError::not_found("Player not found in room"))?;
            room = self.rooms.set_host(&room_id, new_host).await?;
            tracing::info!(%room_id, new_host = %room.host.id, "host handed off");
        }

        self.publish(Envelope::targeted(
            BusMessage::RoomLeave {
                player: player_id.to_string(),
                host: room.host.clone(),
            },
            room.member_ids(),
        ))
        .await;

        tracing::info!(%room_id, player = %player_id, "player left room");
        Ok(())
    }

    /// Host-only eviction. The kicked player is notified along with the
    /// remaining members.
    pub async fn kick(&self, host_id: &str, room_id: &str, target_id: &str) -> AppResult<Room> {
        let room = self.rooms.get_room(room_id).await?;

        let target_room = self.rooms.get_player_room(target_id).await?;
        if target_room.as_deref() != Some(room_id) {
            return Err(AppError::not_found("Player not found in room"));
        }
        if room.host.id != host_id {
            return Err(AppError::forbidden("Only the host can kick players"));
        }
        if target_id == room.host.id {
            return Err(AppError::forbidden("Host cannot be kicked"));
        }

        let room = self.rooms.remove_player(room_id, target_id).await?;

        let mut users = room.member_ids();
        users.push(target_id.to_string());
        self.publish(Envelope::targeted(
            BusMessage::RoomKick {
                room_id: room_id.to_string(),
                kicked: target_id.to_string(),
            },
            users,
        ))
        .await;

        tracing::info!(%room_id, kicked = %target_id, "player kicked");
        Ok(room)
    }

    /// Host-only dissolution of the whole lobby.
    pub async fn delete_room(&self, host_id: &str, room_id: &str) -> AppResult<Vec<Player>> {
        let room = self.rooms.get_room(room_id).await?;
        if room.host.id != host_id {
            return Err(AppError::forbidden("Only the host can delete the room"));
        }

        self.rooms.delete_room(room_id).await?;

        let members: Vec<Player> = room
            .team1
            .iter()
            .chain(room.team2.iter())
            .cloned()
            .collect();
        for member in &members {
            self.rooms.delete_player_room(&member.id).await?;
        }

        self.publish(Envelope::targeted(
            BusMessage::RoomDeletion {
                room_id: room_id.to_string(),
            },
            members.iter().map(|p| p.id.clone()).collect(),
        ))
        .await;

        tracing::info!(%room_id, "room deleted by host");
        Ok(members)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::{MemoryBus, MessageBus};
    use crate::error::ErrorKind;
    use crate::store::MemoryStore;
    use crate::users::InMemoryUsers;

    fn service() -> (RoomService, Arc<MemoryBus>) {
        let bus = Arc::new(MemoryBus::new());
        let rooms = Arc::new(RoomRepository::new(
            Arc::new(MemoryStore::new()),
            Arc::new(InMemoryUsers::new()),
        ));
        (RoomService::new(rooms, bus.clone()), bus)
    }

    fn request(name: &str, capacity: u32) -> RoomRequest {
        RoomRequest {
            name: name.into(),
            capacity,
        }
    }

    #[tokio::test]
    async fn fill_room_then_host_leaves() {
        let (service, bus) = service();
        let mut subscription = bus.subscribe().await.unwrap();

        let room = service.create_room("1", &request("r", 4)).await.unwrap();
        service.join("2", &room.id).await.unwrap();
        service.join("3", &room.id).await.unwrap();
        let full = service.join("4", &room.id).await.unwrap();

        assert_eq!(full.player_count, 4);
        assert_eq!(
            full.team1.iter().map(|p| &p.id).collect::<Vec<_>>(),
            ["1", "3"]
        );
        assert_eq!(
            full.team2.iter().map(|p| &p.id).collect::<Vec<_>>(),
            ["2", "4"]
        );

        service.leave("1").await.unwrap();
        let room = service.get_room(&room.id).await.unwrap();
        assert_eq!(room.player_count, 3);
        assert_eq!(room.team1.iter().map(|p| &p.id).collect::<Vec<_>>(), ["3"]);
        assert_eq!(room.host.id, "3");

        // Three ROOM_JOIN fan-outs then the ROOM_LEAVE naming the new host.
        for _ in 0..3 {
            let envelope = subscription.next().await.unwrap();
            assert!(matches!(envelope.message, BusMessage::RoomJoin { .. }));
        }
        let envelope = subscription.next().await.unwrap();
        match envelope.message {
            BusMessage::RoomLeave { player, host } => {
                assert_eq!(player, "1");
                assert_eq!(host.id, "3");
            }
            other => panic!("unexpected message: {other:?}"),
        }
        let mut users = envelope.users.unwrap();
        users.sort_unstable();
        assert_eq!(users, vec!["2".to_string(), "3".into(), "4".into()]);
    }

    #[tokio::test]
    async fn join_fan_out_targets_only_existing_members() {
        let (service, bus) = service();
        let mut subscription = bus.subscribe().await.unwrap();

        let room = service.create_room("1", &request("r", 4)).await.unwrap();
        service.join("2", &room.id).await.unwrap();

        let envelope = subscription.next().await.unwrap();
        match envelope.message {
            BusMessage::RoomJoin { player, team } => {
                assert_eq!(player.id, "2");
                assert_eq!(team, 2);
            }
            other => panic!("unexpected message: {other:?}"),
        }
        assert_eq!(envelope.users.unwrap(), vec!["1".to_string()]);
    }

    #[tokio::test]
    async fn join_rejects_full_room() {
        let (service, _bus) = service();
        let room = service.create_room("1", &request("r", 2)).await.unwrap();
        service.join("2", &room.id).await.unwrap();

        let err = service.join("5", &room.id).await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::BadRequest);
        assert_eq!(err.message, "Room is full");
    }

    #[tokio::test]
    async fn leave_of_last_player_deletes_the_room() {
        let (service, _bus) = service();
        let room = service.create_room("1", &request("r", 2)).await.unwrap();
        service.leave("1").await.unwrap();

        let err = service.get_room(&room.id).await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::NotFound);
        assert!(service.list_rooms(0, 10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn leave_requires_membership() {
        let (service, _bus) = service();
        let err = service.leave("99").await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::BadRequest);
    }

    #[tokio::test]
    async fn kick_rules() {
        let (service, bus) = service();
        let room = service.create_room("1", &request("r", 4)).await.unwrap();
        service.join("2", &room.id).await.unwrap();

        let err = service.kick("2", &room.id, "1").await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::Forbidden);

        let err = service.kick("1", &room.id, "1").await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::Forbidden);

        let err = service.kick("1", &room.id, "9").await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::NotFound);

        let mut subscription = bus.subscribe().await.unwrap();
        let after = service.kick("1", &room.id, "2").await.unwrap();
        assert_eq!(after.player_count, 1);

        let envelope = subscription.next().await.unwrap();
        match envelope.message {
            BusMessage::RoomKick { room_id, kicked } => {
                assert_eq!(room_id, room.id);
                assert_eq!(kicked, "2");
            }
            other => panic!("unexpected message: {other:?}"),
        }
        // The kicked player is among the targets.
        assert!(envelope.users.unwrap().contains(&"2".to_string()));
    }

    #[tokio::test]
    async fn delete_room_clears_mappings_and_notifies_members() {
        let (service, bus) = service();
        let room = service.create_room("1", &request("r", 4)).await.unwrap();
        service.join("2", &room.id).await.unwrap();

        let err = service.delete_room("2", &room.id).await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::Forbidden);

        let mut subscription = bus.subscribe().await.unwrap();
        let members = service.delete_room("1", &room.id).await.unwrap();
        assert_eq!(members.len(), 2);

        let envelope = subscription.next().await.unwrap();
        assert!(matches!(envelope.message, BusMessage::RoomDeletion { .. }));
        assert_eq!(envelope.users.unwrap().len(), 2);

        // Both players are free to create or join again.
        service.create_room("1", &request("next", 2)).await.unwrap();
        service.create_room("2", &request("other", 2)).await.unwrap();
    }
}
