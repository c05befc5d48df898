use serde::{Deserialize, Serialize};

/// Player identifier: the stringified numeric user id issued by the user
/// service. Room ids are opaque 8-character tokens.
pub type PlayerId = String;
pub type RoomId = String;

/// Length of a room id token.
pub const ROOM_ID_LENGTH: usize = 8;
/// Longest accepted room name.
pub const MAX_ROOM_NAME_LENGTH: usize = 30;
/// Seats per room must be one of these (two teams of at most 4).
pub const VALID_CAPACITIES: [u32; 4] = [2, 4, 6, 8];
/// Hard cap on a single team.
pub const MAX_TEAM_SIZE: usize = 4;

/// Immutable display identity of a player within a room.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Player {
    pub id: PlayerId,
    pub username: String,
}

/// Lobby/match phase of a room.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RoomStatus {
    Lobby,
    Playing,
}

/// Lobby/match container persisted in the shared store. Instances only ever
/// hold cached reads of this record; all mutation goes through the room store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Room {
    pub id: RoomId,
    pub name: String,
    pub capacity: u32,
    #[serde(rename = "players")]
    pub player_count: u32,
    pub team1: Vec<Player>,
    pub team2: Vec<Player>,
    pub host: Player,
    #[serde(rename = "state")]
    pub status: RoomStatus,
}

impl Room {
    pub fn is_full(&self) -> bool {
        self.player_count >= self.capacity
    }

    pub fn contains(&self, player_id: &str) -> bool {
        self.team1.iter().any(|p| p.id == player_id)
            || self.team2.iter().any(|p| p.id == player_id)
    }

    /// True when the player sits on team 1. `None` if not a member.
    pub fn team1_membership(&self, player_id: &str) -> Option<bool> {
        if self.team1.iter().any(|p| p.id == player_id) {
            Some(true)
        } else if self.team2.iter().any(|p| p.id == player_id) {
            Some(false)
        } else {
            None
        }
    }

    /// Ids of every member, team 1 first.
    pub fn member_ids(&self) -> Vec<PlayerId> {
        self.team1
            .iter()
            .chain(self.team2.iter())
            .map(|p| p.id.clone())
            .collect()
    }

    /// Ids of every member except `excluded`.
    pub fn member_ids_except(&self, excluded: &str) -> Vec<PlayerId> {
        self.team1
            .iter()
            .chain(self.team2.iter())
            .filter(|p| p.id != excluded)
            .map(|p| p.id.clone())
            .collect()
    }
}

/// Map-space coordinates; `angle` is the heading in radians.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Default)]
pub struct Position {
    pub x: f64,
    pub y: f64,
    pub angle: f64,
}

impl Position {
    pub fn new(x: f64, y: f64, angle: f64) -> Self {
        Self { x, y, angle }
    }
}

/// Room creation request (HTTP body).
#[derive(Debug, Clone, Deserialize)]
pub struct RoomRequest {
    pub name: String,
    pub capacity: u32,
}

impl RoomRequest {
    pub fn validate(&self) -> Result<(), crate::error::AppError> {
        if !VALID_CAPACITIES.contains(&self.capacity) {
            return Err(crate::error::AppError::bad_request(
                "capacity must be 2, 4, 6, or 8",
            ));
        }
        if self.name.chars().count() > MAX_ROOM_NAME_LENGTH {
            return Err(crate::error::AppError::bad_request(
                "name must not exceed 30 characters",
            ));
        }
        Ok(())
    }
}

/// Join request (HTTP body).
#[derive(Debug, Clone, Deserialize)]
pub struct JoinRequest {
    pub room: RoomId,
}

/// Pagination for room listing.
#[derive(Debug, Clone, Copy, Deserialize)]
pub struct RoomPage {
    #[serde(default)]
    pub page: u32,
    #[serde(default = "default_page_size")]
    pub size: u32,
}

fn default_page_size() -> u32 {
    10
}
