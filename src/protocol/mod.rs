//! Wire protocol: client frames, bus envelopes, and the shared domain types
//! they carry.

pub mod messages;
pub mod types;

pub use messages::{BusMessage, ClientFrame, Envelope};
pub use types::{
    JoinRequest, Player, PlayerId, Position, Room, RoomId, RoomPage, RoomRequest, RoomStatus,
    MAX_ROOM_NAME_LENGTH, MAX_TEAM_SIZE, ROOM_ID_LENGTH, VALID_CAPACITIES,
};
