//! External user-service collaborators.
//!
//! Credential checking, password hashing, and the persistent user table live
//! in a separate service; this server only needs a username lookup when a
//! player enters a room and a per-user win/loss increment when a match ends.
//! Both sit behind narrow traits with in-memory implementations.

use anyhow::Result;
use async_trait::async_trait;
use dashmap::DashMap;
use serde::Serialize;

use crate::error::{AppError, AppResult};
use crate::protocol::PlayerId;

/// Username lookup by user id.
#[async_trait]
pub trait UserDirectory: Send + Sync {
    async fn username(&self, user_id: &str) -> AppResult<String>;
}

/// Per-user match statistics.
#[async_trait]
pub trait UserStatsSink: Send + Sync {
    /// Record one finished match for the user; `won` marks the winning team.
    async fn record_result(&self, user_id: &str, won: bool) -> Result<()>;

    async fn fetch(&self, user_id: &str) -> AppResult<UserStats>;
}

#[derive(Debug, Clone, Copy, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UserStats {
    pub total_games: u32,
    pub wins: u32,
    pub losses: u32,
    pub win_rate: f64,
}

/// In-memory directory seeded at startup or on demand; usernames default to
/// `player-<id>` so a bare deployment stays usable.
#[derive(Default)]
pub struct InMemoryUsers {
    usernames: DashMap<PlayerId, String>,
    stats: DashMap<PlayerId, (u32, u32)>,
}

impl InMemoryUsers {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_username(&self, user_id: &str, username: &str) {
        self.usernames
            .insert(user_id.to_string(), username.to_string());
    }
}

#[async_trait]
impl UserDirectory for InMemoryUsers {
    async fn username(&self, user_id: &str) -> AppResult<String> {
        Ok(self
            .usernames
            .get(user_id)
            .map(|name| name.clone())
            .unwrap_or_else(|| format!("player-{user_id}")))
    }
}

#[async_trait]
impl UserStatsSink for InMemoryUsers {
    async fn record_result(&self, user_id: &str, won: bool) -> Result<()> {
        let mut entry = self.stats.entry(user_id.to_string()).or_insert((0, 0));
        if won {
            entry.0 += 1;
        } else {
            entry.1 += 1;
        }
        Ok(())
    }

    async fn fetch(&self, user_id: &str) -> AppResult<UserStats> {
        let (wins, losses) = self
            .stats
            .get(user_id)
            .map(|entry| *entry)
            .ok_or_else(|| AppError::not_found("No stats recorded for user"))?;
        let total = wins + losses;
        Ok(UserStats {
            total_games: total,
            wins,
            losses,
            win_rate: if total == 0 {
                0.0
            } else {
                f64::from(wins) / f64::from(total)
            },
        })
    }
}
