//! Shared key-value store abstraction.
//!
//! The trait mirrors the handful of store primitives the server relies on:
//! plain strings, set-if-absent with TTL (leases, session sentinels), hashes
//! with optional TTL (match checkpoints), one ordered set (the room index),
//! and a prefix scan (checkpoint restore). [`memory::MemoryStore`] is the
//! in-process backend; a Redis adapter is a deployment concern behind the
//! same trait.

pub mod memory;
pub mod rooms;

use std::collections::HashMap;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;

pub use memory::MemoryStore;
pub use rooms::RoomRepository;

#[async_trait]
pub trait SharedStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>>;

    async fn set(&self, key: &str, value: &str) -> Result<()>;

    /// Atomic set-if-absent with a TTL. Returns true when the key was set.
    async fn set_nx_ex(&self, key: &str, value: &str, ttl: Duration) -> Result<bool>;

    /// Refresh the TTL of an existing key. Returns false when the key is gone.
    async fn expire(&self, key: &str, ttl: Duration) -> Result<bool>;

    /// Delete a key. Returns true when something was removed.
    async fn del(&self, key: &str) -> Result<bool>;

    /// Add (or rescore) a member of an ordered set.
    async fn zadd(&self, key: &str, score: f64, member: &str) -> Result<()>;

    async fn zrem(&self, key: &str, member: &str) -> Result<()>;

    /// Members ordered by descending score, `start..=stop` inclusive.
    async fn zrevrange(&self, key: &str, start: usize, stop: usize) -> Result<Vec<String>>;

    /// Overwrite a hash's fields; `ttl` applies to the whole key when given.
    async fn hset_all(
        &self,
        key: &str,
        fields: &[(String, String)],
        ttl: Option<Duration>,
    ) -> Result<()>;

    async fn hgetall(&self, key: &str) -> Result<HashMap<String, String>>;

    /// Live keys starting with `prefix`.
    async fn keys_with_prefix(&self, prefix: &str) -> Result<Vec<String>>;
}

/// Key layout of the shared store.
pub mod keys {
    /// Ordered set of room ids, scored by creation epoch.
    pub const ROOM_INDEX: &str = "rooms_id";

    /// Room record: the bare room id.
    pub fn room(room_id: &str) -> String {
        room_id.to_string()
    }

    /// Player→room mapping: the bare user id.
    pub fn player_room(user_id: &str) -> String {
        user_id.to_string()
    }

    /// Lease granting exclusive right to advance a match.
    pub fn leader(room_id: &str) -> String {
        format!("leader:{room_id}")
    }

    /// Session sentinel: present while some instance holds the socket.
    pub fn session(player_id: &str) -> String {
        format!("ws:{player_id}")
    }

    /// Prefix of every checkpoint key of one room.
    pub fn checkpoint_prefix(room_id: &str) -> String {
        format!("room:{room_id}:")
    }

    pub fn bullet(room_id: &str, bullet_id: &str) -> String {
        format!("room:{room_id}:bullet:{bullet_id}")
    }

    pub fn player_state(room_id: &str, player_id: &str) -> String {
        format!("room:{room_id}:player:{player_id}")
    }

    pub fn fortress(room_id: &str, fortress_id: &str) -> String {
        format!("room:{room_id}:fortress:{fortress_id}")
    }
}
