use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;

use crate::store::{keys, SharedStore};

/// TTL of the leader lease; renewal is attempted every tick.
pub const LEASE_TTL: Duration = Duration::from_secs(5);
/// Pause between contention attempts when another instance leads.
pub const CONTENTION_INTERVAL: Duration = Duration::from_secs(1);

/// Lease-based single-leader election per room, backed by an atomic
/// set-if-absent on `leader:<roomId>`.
#[derive(Clone)]
pub struct LeaderElector {
    store: Arc<dyn SharedStore>,
    instance_id: String,
    ttl: Duration,
}

impl LeaderElector {
    pub fn new(store: Arc<dyn SharedStore>, instance_id: String) -> Self {
        Self {
            store,
            instance_id,
            ttl: LEASE_TTL,
        }
    }

    #[cfg(test)]
    pub fn with_ttl(store: Arc<dyn SharedStore>, instance_id: String, ttl: Duration) -> Self {
        Self {
            store,
            instance_id,
            ttl,
        }
    }

    pub fn instance_id(&self) -> &str {
        &self.instance_id
    }

    /// Claim leadership of the room. True when this instance now holds the
    /// lease; false when someone else does.
    pub async fn try_acquire(&self, room_id: &str) -> Result<bool> {
        self.store
            .set_nx_ex(&keys::leader(room_id), &self.instance_id, self.ttl)
            .await
    }

    /// Extend our lease, or re-acquire it when it lapsed. False means another
    /// instance holds the key and we must stop authoritative work.
    pub async fn renew(&self, room_id: &str) -> Result<bool> {
        match self.store.get(&keys::leader(room_id)).await? {
            Some(holder) if holder == self.instance_id => {
                self.store.expire(&keys::leader(room_id), self.ttl).await
            }
            Some(_) => Ok(false),
            None => self.try_acquire(room_id).await,
        }
    }

    /// Instance currently holding the lease, if any.
    pub async fn current_leader(&self, room_id: &str) -> Result<Option<String>> {
        self.store.get(&keys::leader(room_id)).await
    }

    /// Drop our lease so a successor can take over immediately. A lease held
    /// by another instance is left alone.
    pub async fn release(&self, room_id: &str) -> Result<()> {
        if let Some(holder) = self.store.get(&keys::leader(room_id)).await? {
            if holder == self.instance_id {
                self.store.del(&keys::leader(room_id)).await?;
            }
        }
        Ok(())
    }
}
