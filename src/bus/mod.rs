//! Publish/subscribe channel carrying tagged control messages between
//! instances, plus the lease-based leader election keyed per room.
//!
//! Every instance subscribes to the single `messages` topic at startup and
//! never unsubscribes while running; the dispatch task lives in the gateway.

pub mod leadership;
pub mod memory;

use anyhow::Result;
use async_trait::async_trait;
use futures_util::stream::BoxStream;
use futures_util::StreamExt;

use crate::protocol::{Envelope, RoomId};

pub use leadership::LeaderElector;
pub use memory::MemoryBus;

/// Name of the single pub/sub topic.
pub const TOPIC: &str = "messages";

/// A live subscription yielding decoded envelopes in FIFO order.
pub struct BusSubscription {
    inner: BoxStream<'static, Envelope>,
}

impl BusSubscription {
    pub fn new(inner: BoxStream<'static, Envelope>) -> Self {
        Self { inner }
    }

    pub async fn next(&mut self) -> Option<Envelope> {
        self.inner.next().await
    }
}

/// The pub/sub transport. Publication must be non-blocking enough to run
/// under the per-match lock; subscribers receive every frame published after
/// they subscribed, FIFO within the topic.
#[async_trait]
pub trait MessageBus: Send + Sync {
    async fn publish(&self, envelope: &Envelope) -> Result<()>;

    async fn subscribe(&self) -> Result<BusSubscription>;
}

/// Narrow capability handed to the bus dispatcher so it can trigger leader
/// contention without holding the whole game service API.
#[async_trait]
pub trait LeadershipHook: Send + Sync {
    /// Contend for leadership of `room_id`, taking over the match on success.
    /// Runs until leadership is won or the room stops playing.
    async fn attempt_leadership(&self, room_id: RoomId);
}
