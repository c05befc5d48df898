use std::collections::HashMap;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use tokio::sync::RwLock;

use super::SharedStore;

#[derive(Debug, Clone)]
enum Value {
    Text(String),
    Hash(HashMap<String, String>),
    Sorted(Vec<(f64, String)>),
}

#[derive(Debug, Clone)]
struct Entry {
    value: Value,
    expires_at: Option<chrono::DateTime<chrono::Utc>>,
}

impl Entry {
    fn is_expired(&self, now: chrono::DateTime<chrono::Utc>) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }
}

fn deadline(ttl: Duration) -> Option<chrono::DateTime<chrono::Utc>> {
    chrono::Duration::from_std(ttl)
        .ok()
        .map(|d| chrono::Utc::now() + d)
}

/// In-process store backend with lazy TTL expiry: expired entries are dropped
/// whenever a write touches the map and ignored by reads.
#[derive(Default)]
pub struct MemoryStore {
    entries: RwLock<HashMap<String, Entry>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn purge_expired(entries: &mut HashMap<String, Entry>) {
        let now = chrono::Utc::now();
        entries.retain(|_, entry| !entry.is_expired(now));
    }
}

#[async_trait]
impl SharedStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        let entries = self.entries.read().await;
        let now = chrono::Utc::now();
        Ok(entries
            .get(key)
            .filter(|entry| !entry.is_expired(now))
            .and_then(|entry| match &entry.value {
                Value::Text(text) => Some(text.clone()),
                _ => None,
            }))
    }

    async fn set(&self, key: &str, value: &str) -> Result<()> {
        let mut entries = self.entries.write().await;
        Self::purge_expired(&mut entries);
        entries.insert(
            key.to_string(),
            Entry {
                value: Value::Text(value.to_string()),
                expires_at: None,
            },
        );
        Ok(())
    }

    async fn set_nx_ex(&self, key: &str, value: &str, ttl: Duration) -> Result<bool> {
        // Purge and test under one write guard so a concurrent claimant
        // cannot slip in between the check and the insert.
        let mut entries = self.entries.write().await;
        Self::purge_expired(&mut entries);
        if entries.contains_key(key) {
            return Ok(false);
        }
        entries.insert(
            key.to_string(),
            Entry {
                value: Value::Text(value.to_string()),
                expires_at: deadline(ttl),
            },
        );
        Ok(true)
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<bool> {
        let mut entries = self.entries.write().await;
        Self::purge_expired(&mut entries);
        match entries.get_mut(key) {
            Some(entry) => {
                entry.expires_at = deadline(ttl);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn del(&self, key: &str) -> Result<bool> {
        let mut entries = self.entries.write().await;
        Self::purge_expired(&mut entries);
        Ok(entries.remove(key).is_some())
    }

    async fn zadd(&self, key: &str, score: f64, member: &str) -> Result<()> {
        let mut entries = self.entries.write().await;
        Self::purge_expired(&mut entries);
        let entry = entries.entry(key.to_string()).or_insert_with(|| Entry {
            value: Value::Sorted(Vec::new()),
            expires_at: None,
        });
        if let Value::Sorted(members) = &mut entry.value {
            members.retain(|(_, m)| m != member);
            members.push((score, member.to_string()));
        } else {
            anyhow::bail!("key {key} holds a non-sorted value");
        }
        Ok(())
    }

    async fn zrem(&self, key: &str, member: &str) -> Result<()> {
        let mut entries = self.entries.write().await;
        if let Some(entry) = entries.get_mut(key) {
            if let Value::Sorted(members) = &mut entry.value {
                members.retain(|(_, m)| m != member);
            }
        }
        Ok(())
    }

    async fn zrevrange(&self, key: &str, start: usize, stop: usize) -> Result<Vec<String>> {
        let entries = self.entries.read().await;
        let now = chrono::Utc::now();
        let Some(entry) = entries.get(key).filter(|e| !e.is_expired(now)) else {
            return Ok(Vec::new());
        };
        let Value::Sorted(members) = &entry.value else {
            anyhow::bail!("key {key} holds a non-sorted value");
        };
        let mut ordered = members.clone();
        ordered.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(std::cmp::Ordering::Equal));
        Ok(ordered
            .into_iter()
            .skip(start)
            .take(stop.saturating_sub(start) + 1)
            .map(|(_, member)| member)
            .collect())
    }

    async fn hset_all(
        &self,
        key: &str,
        fields: &[(String, String)],
        ttl: Option<Duration>,
    ) -> Result<()> {
        let mut entries = self.entries.write().await;
        Self::purge_expired(&mut entries);
        entries.insert(
            key.to_string(),
            Entry {
                value: Value::Hash(fields.iter().cloned().collect()),
                expires_at: ttl.and_then(deadline),
            },
        );
        Ok(())
    }

    async fn hgetall(&self, key: &str) -> Result<HashMap<String, String>> {
        let entries = self.entries.read().await;
        let now = chrono::Utc::now();
        Ok(entries
            .get(key)
            .filter(|entry| !entry.is_expired(now))
            .and_then(|entry| match &entry.value {
                Value::Hash(map) => Some(map.clone()),
                _ => None,
            })
            .unwrap_or_default())
    }

    async fn keys_with_prefix(&self, prefix: &str) -> Result<Vec<String>> {
        let entries = self.entries.read().await;
        let now = chrono::Utc::now();
        Ok(entries
            .iter()
            .filter(|(key, entry)| key.starts_with(prefix) && !entry.is_expired(now))
            .map(|(key, _)| key.clone())
            .collect())
    }
}
