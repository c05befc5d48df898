//! Process-local mapping of player identity to live connection.
//!
//! One reader-writer lock guards the map (readers are the hot path); each
//! connection carries its own mutex protecting the connected flag, the
//! outbound sender, and the match-state attachment. Nothing awaits while
//! holding either lock — outbound delivery is a bounded `try_send`.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};

use tokio::sync::mpsc;

use crate::error::{AppError, AppResult};
use crate::game::state::MatchHandle;
use crate::protocol::{BusMessage, PlayerId, RoomId};

/// Depth of a connection's outbound queue. A client that cannot drain this
/// many frames is effectively gone and will be reaped.
pub const OUTBOUND_QUEUE_DEPTH: usize = 256;

pub type OutboundSender = mpsc::Sender<Arc<BusMessage>>;

struct ConnectionInner {
    connected: bool,
    sender: OutboundSender,
    game: Option<Arc<MatchHandle>>,
}

/// One live session on this instance.
pub struct PlayerConnection {
    pub id: PlayerId,
    pub room_id: RoomId,
    inner: Mutex<ConnectionInner>,
}

impl PlayerConnection {
    fn new(id: PlayerId, room_id: RoomId, sender: OutboundSender) -> Self {
        Self {
            id,
            room_id,
            inner: Mutex::new(ConnectionInner {
                connected: true,
                sender,
                game: None,
            }),
        }
    }

    /// Queue a frame for the client. Errors are logged, not propagated; a
    /// dead socket is the reaper's problem.
    pub fn send(&self, message: Arc<BusMessage>) {
        let inner = self.inner.lock().expect("connection mutex poisoned");
        if !inner.connected {
            return;
        }
        if let Err(err) = inner.sender.try_send(message) {
            tracing::warn!(player_id = %self.id, error = %err, "failed to queue outbound frame");
        }
    }

    pub fn is_connected(&self) -> bool {
        self.inner.lock().expect("connection mutex poisoned").connected
    }

    pub fn mark_disconnected(&self) {
        self.inner
            .lock()
            .expect("connection mutex poisoned")
            .connected = false;
    }

    /// Re-attach a fresh socket after a reconnect within the grace window.
    pub fn reattach(&self, sender: OutboundSender) {
        let mut inner = self.inner.lock().expect("connection mutex poisoned");
        inner.sender = sender;
        inner.connected = true;
    }

    /// Attach this connection to a running match. Rejected when the player is
    /// already mid-game.
    pub fn attach_game(&self, handle: Arc<MatchHandle>) -> AppResult<()> {
        let mut inner = self.inner.lock().expect("connection mutex poisoned");
        if inner.game.is_some() {
            return Err(AppError::bad_request(
                "Cannot start game: player is already in a game",
            ));
        }
        inner.game = Some(handle);
        Ok(())
    }

    pub fn detach_game(&self) {
        self.inner.lock().expect("connection mutex poisoned").game = None;
    }

    pub fn game(&self) -> Option<Arc<MatchHandle>> {
        self.inner
            .lock()
            .expect("connection mutex poisoned")
            .game
            .clone()
    }
}

/// Registry of every connection this instance currently hosts.
#[derive(Default)]
pub struct PlayerRegistry {
    players: RwLock<HashMap<PlayerId, Arc<PlayerConnection>>>,
}

impl PlayerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a connection, or refresh the existing one when the player
    /// reconnects within the reaper grace window.
    pub fn register(
        &self,
        player_id: &PlayerId,
        room_id: &RoomId,
        sender: OutboundSender,
    ) -> Arc<PlayerConnection> {
        let mut players = self.players.write().expect("registry lock poisoned");
        if let Some(existing) = players.get(player_id) {
            existing.reattach(sender);
            return existing.clone();
        }
        let connection = Arc::new(PlayerConnection::new(
            player_id.clone(),
            room_id.clone(),
            sender,
        ));
        players.insert(player_id.clone(), connection.clone());
        connection
    }

    pub fn get(&self, player_id: &str) -> Option<Arc<PlayerConnection>> {
        self.players
            .read()
            .expect("registry lock poisoned")
            .get(player_id)
            .cloned()
    }

    pub fn remove(&self, player_id: &str) -> Option<Arc<PlayerConnection>> {
        self.players
            .write()
            .expect("registry lock poisoned")
            .remove(player_id)
    }

    pub fn len(&self) -> usize {
        self.players.read().expect("registry lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Forward a frame to every locally attached connection named in `users`.
    pub fn send_to_users(&self, users: &[PlayerId], message: &Arc<BusMessage>) {
        let players = self.players.read().expect("registry lock poisoned");
        for user in users {
            if let Some(connection) = players.get(user) {
                connection.send(Arc::clone(message));
            }
        }
    }

    /// Attach every locally connected participant to a match. Fails without
    /// attaching anyone if one of them is already mid-game.
    pub fn attach_match(&self, participants: &[PlayerId], handle: &Arc<MatchHandle>) -> AppResult<()> {
        let locals: Vec<_> = {
            let players = self.players.read().expect("registry lock poisoned");
            participants
                .iter()
                .filter_map(|id| players.get(id).cloned())
                .collect()
        };
        if locals.iter().any(|conn| conn.game().is_some()) {
            return Err(AppError::bad_request(
                "Cannot start game: player is already in a game",
            ));
        }
        for connection in &locals {
            connection.attach_game(handle.clone())?;
        }
        Ok(())
    }

    /// Detach every local connection attached to `room_id`'s match.
    pub fn detach_match(&self, room_id: &str) {
        let players = self.players.read().expect("registry lock poisoned");
        for connection in players.values() {
            if connection
                .game()
                .is_some_and(|handle| handle.room_id == room_id)
            {
                connection.detach_game();
            }
        }
    }

    /// True when any of `participants` is connected to this instance.
    pub fn hosts_any(&self, participants: &[PlayerId]) -> bool {
        let players = self.players.read().expect("registry lock poisoned");
        participants.iter().any(|id| players.contains_key(id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::state::GameState;
    use crate::protocol::{Player, Room, RoomStatus};

    fn sender() -> (OutboundSender, mpsc::Receiver<Arc<BusMessage>>) {
        mpsc::channel(OUTBOUND_QUEUE_DEPTH)
    }

    fn test_room() -> Room {
        Room {
            id: "abcd1234".into(),
            name: "arena".into(),
            capacity: 2,
            player_count: 2,
            team1: vec![Player {
                id: "1".into(),
                username: "a".into(),
            }],
            team2: vec![Player {
                id: "2".into(),
                username: "b".into(),
            }],
            host: Player {
                id: "1".into(),
                username: "a".into(),
            },
            status: RoomStatus::Playing,
        }
    }

    #[test]
    fn register_then_send_reaches_the_channel() {
        let registry = PlayerRegistry::new();
        let (tx, mut rx) = sender();
        registry.register(&"1".to_string(), &"abcd1234".to_string(), tx);

        registry.send_to_users(
            &["1".to_string(), "9".to_string()],
            &Arc::new(BusMessage::GameOver { team1: true }),
        );
        let frame = rx.try_recv().unwrap();
        assert!(matches!(*frame, BusMessage::GameOver { team1: true }));
    }

    #[test]
    fn reconnect_refreshes_instead_of_duplicating() {
        let registry = PlayerRegistry::new();
        let (tx1, _rx1) = sender();
        let first = registry.register(&"1".to_string(), &"abcd1234".to_string(), tx1);
        first.mark_disconnected();

        let (tx2, mut rx2) = sender();
        let second = registry.register(&"1".to_string(), &"abcd1234".to_string(), tx2);
        assert!(Arc::ptr_eq(&first, &second));
        assert!(second.is_connected());

        second.send(Arc::new(BusMessage::GameOver { team1: false }));
        assert!(rx2.try_recv().is_ok());
    }

    #[test]
    fn disconnected_connection_drops_frames() {
        let registry = PlayerRegistry::new();
        let (tx, mut rx) = sender();
        let conn = registry.register(&"1".to_string(), &"abcd1234".to_string(), tx);
        conn.mark_disconnected();
        conn.send(Arc::new(BusMessage::GameOver { team1: true }));
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn attach_match_rejects_double_start_without_partial_attach() {
        let registry = PlayerRegistry::new();
        let (tx1, _r1) = sender();
        let (tx2, _r2) = sender();
        let one = registry.register(&"1".to_string(), &"abcd1234".to_string(), tx1);
        registry.register(&"2".to_string(), &"abcd1234".to_string(), tx2);

        let handle = Arc::new(MatchHandle::new(GameState::initial(&test_room())));
        one.attach_game(handle.clone()).unwrap();

        let err = registry
            .attach_match(&["1".to_string(), "2".to_string()], &handle)
            .unwrap_err();
        assert_eq!(err.kind, crate::error::ErrorKind::BadRequest);
        assert!(registry.get("2").unwrap().game().is_none());
    }

    #[test]
    fn detach_match_clears_only_that_room() {
        let registry = PlayerRegistry::new();
        let (tx, _rx) = sender();
        let conn = registry.register(&"1".to_string(), &"abcd1234".to_string(), tx);
        let handle = Arc::new(MatchHandle::new(GameState::initial(&test_room())));
        conn.attach_game(handle).unwrap();

        registry.detach_match("other-room");
        assert!(conn.game().is_some());
        registry.detach_match("abcd1234");
        assert!(conn.game().is_none());
    }
}
