use anyhow::Result;
use async_trait::async_trait;
use futures_util::StreamExt;
use tokio::sync::broadcast;
use tokio_stream::wrappers::BroadcastStream;

use crate::protocol::Envelope;

use super::{BusSubscription, MessageBus};

/// In-process pub/sub backend. Frames travel as serialized JSON exactly as
/// they would over a remote broker, so subscribers exercise the real wire
/// format. One `MemoryBus` shared by several server instances behaves as a
/// common topic, which is how the failover tests simulate a cluster.
pub struct MemoryBus {
    sender: broadcast::Sender<String>,
}

impl MemoryBus {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(1024);
        Self { sender }
    }
}

impl Default for MemoryBus {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl MessageBus for MemoryBus {
    async fn publish(&self, envelope: &Envelope) -> Result<()> {
        let frame = serde_json::to_string(envelope)?;
        // No subscribers is fine; the topic simply drops the frame.
        let _ = self.sender.send(frame);
        Ok(())
    }

    async fn subscribe(&self) -> Result<BusSubscription> {
        let receiver = self.sender.subscribe();
        let stream = BroadcastStream::new(receiver).filter_map(|item| async move {
            match item {
                Ok(frame) => match serde_json::from_str::<Envelope>(&frame) {
                    Ok(envelope) => Some(envelope),
                    Err(err) => {
                        tracing::warn!(error = %err, "discarding undecodable bus frame");
                        None
                    }
                },
                Err(err) => {
                    tracing::warn!(error = %err, "bus subscriber lagged; frames dropped");
                    None
                }
            }
        });
        Ok(BusSubscription::new(Box::pin(stream)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::BusMessage;

    #[tokio::test]
    async fn published_envelopes_reach_every_subscriber_in_order() {
        let bus = MemoryBus::new();
        let mut first = bus.subscribe().await.unwrap();
        let mut second = bus.subscribe().await.unwrap();

        for health in [80, 60, 40] {
            bus.publish(&Envelope::targeted(
                BusMessage::PlayerHit {
                    player_id: "3".into(),
                    health,
                },
                vec!["1".into()],
            ))
            .await
            .unwrap();
        }

        for subscription in [&mut first, &mut second] {
            for expected in [80, 60, 40] {
                let envelope = subscription.next().await.unwrap();
                match envelope.message {
                    BusMessage::PlayerHit { health, .. } => assert_eq!(health, expected),
                    other => panic!("unexpected message: {other:?}"),
                }
            }
        }
    }

    #[tokio::test]
    async fn subscribers_only_see_frames_after_subscribing() {
        let bus = MemoryBus::new();
        bus.publish(&Envelope::untargeted(BusMessage::GameOver { team1: true }))
            .await
            .unwrap();

        let mut late = bus.subscribe().await.unwrap();
        bus.publish(&Envelope::untargeted(BusMessage::GameOver { team1: false }))
            .await
            .unwrap();

        let envelope = late.next().await.unwrap();
        assert_eq!(envelope.message, BusMessage::GameOver { team1: false });
    }
}
