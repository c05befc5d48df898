use serde::{Deserialize, Serialize};

use crate::game::state::{Bullet, GameState};

use super::types::{Player, PlayerId, Position, Room, RoomId};

/// Frames sent by a connected client over the game channel.
///
/// Decoding dispatches on `type`; an unknown tag fails deserialization and the
/// gateway logs and discards the frame.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ClientFrame {
    #[serde(rename_all = "camelCase")]
    Move { x: f64, y: f64, angle: f64 },
    #[serde(rename_all = "camelCase")]
    Shoot {
        owner_id: PlayerId,
        x: f64,
        y: f64,
        angle: f64,
    },
    #[serde(rename_all = "camelCase")]
    GameStart { room_id: RoomId },
    #[serde(rename_all = "camelCase")]
    RoomLeave { player: PlayerId, room: RoomId },
    #[serde(rename_all = "camelCase")]
    RoomKick {
        room_id: RoomId,
        player_id: PlayerId,
    },
    #[serde(rename_all = "camelCase")]
    RoomDeletion { room: RoomId },
}

/// Tagged control messages carried on the coordination bus and, stripped of
/// the `users` list, forwarded verbatim to clients as `{type, payload}`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", content = "payload", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BusMessage {
    /// A player joined a lobby; `team` is 1 or 2.
    #[serde(rename_all = "camelCase")]
    RoomJoin { player: Player, team: u32 },
    /// A player left; `host` is the (possibly re-elected) host.
    #[serde(rename_all = "camelCase")]
    RoomLeave { player: PlayerId, host: Player },
    #[serde(rename_all = "camelCase")]
    RoomKick {
        room_id: RoomId,
        kicked: PlayerId,
    },
    /// Full room snapshot, published when a match ends.
    RoomInfo(Room),
    /// The host dissolved the lobby.
    #[serde(rename_all = "camelCase")]
    RoomDeletion { room_id: RoomId },
    /// Match has begun; payload is the initial authoritative state.
    GameStart(GameState),
    /// Leader announcement; other instances begin leader contention.
    #[serde(rename_all = "camelCase")]
    GameStartInfo { room_id: RoomId, instance: String },
    #[serde(rename_all = "camelCase")]
    Move {
        player_id: PlayerId,
        position: Position,
    },
    #[serde(rename_all = "camelCase")]
    Shoot {
        id: String,
        position: Position,
        team1: bool,
        owner_id: PlayerId,
    },
    #[serde(rename_all = "camelCase")]
    PlayerHit { player_id: PlayerId, health: i32 },
    #[serde(rename_all = "camelCase")]
    PlayerKilled { player_id: PlayerId },
    #[serde(rename_all = "camelCase")]
    PlayerRevived {
        player_id: PlayerId,
        position: Position,
    },
    #[serde(rename_all = "camelCase")]
    FortressHit { team1: bool, health: i32 },
    #[serde(rename_all = "camelCase")]
    GameOver { team1: bool },
    /// Intra-cluster replication of a position overwrite.
    #[serde(rename_all = "camelCase")]
    GameMove {
        room_id: RoomId,
        player_id: PlayerId,
        position: Position,
    },
    /// Intra-cluster replication of a bullet spawn.
    #[serde(rename_all = "camelCase")]
    GameShoot { room_id: RoomId, bullet: Bullet },
}

impl BusMessage {
    /// Wire tag of this message, for logging.
    pub fn tag(&self) -> &'static str {
        match self {
            Self::RoomJoin { .. } => "ROOM_JOIN",
            Self::RoomLeave { .. } => "ROOM_LEAVE",
            Self::RoomKick { .. } => "ROOM_KICK",
            Self::RoomInfo(_) => "ROOM_INFO",
            Self::RoomDeletion { .. } => "ROOM_DELETION",
            Self::GameStart(_) => "GAME_START",
            Self::GameStartInfo { .. } => "GAME_START_INFO",
            Self::Move { .. } => "MOVE",
            Self::Shoot { .. } => "SHOOT",
            Self::PlayerHit { .. } => "PLAYER_HIT",
            Self::PlayerKilled { .. } => "PLAYER_KILLED",
            Self::PlayerRevived { .. } => "PLAYER_REVIVED",
            Self::FortressHit { .. } => "FORTRESS_HIT",
            Self::GameOver { .. } => "GAME_OVER",
            Self::GameMove { .. } => "GAME_MOVE",
            Self::GameShoot { .. } => "GAME_SHOOT",
        }
    }
}

/// One frame on the coordination bus: a tagged message plus the target
/// players. Recipients forward only to locally attached connections named in
/// `users`; untargeted frames are replication or leader-contention signals.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Envelope {
    #[serde(flatten)]
    pub message: BusMessage,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub users: Option<Vec<PlayerId>>,
}

impl Envelope {
    pub fn targeted(message: BusMessage, users: Vec<PlayerId>) -> Self {
        Self {
            message,
            users: Some(users),
        }
    }

    pub fn untargeted(message: BusMessage) -> Self {
        Self {
            message,
            users: None,
        }
    }
}
