//! In-process event publication between the session and the UI layer.

use async_trait::async_trait;
use futures::{stream::BoxStream, StreamExt};
use sightline_types::{events::SystemEvent, Result};
use tokio::sync::broadcast;
use tokio_stream::wrappers::BroadcastStream;
use tracing::trace;

#[async_trait]
pub trait EventBus: Send + Sync {
    async fn publish(&self, event: SystemEvent) -> Result<()>;
    fn subscribe(&self) -> BoxStream<'static, SystemEvent>;
}

/// Broadcast-channel bus; slow subscribers lose the oldest events.
#[derive(Clone)]
pub struct LocalBus {
    tx: broadcast::Sender<SystemEvent>,
}

impl LocalBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }
}

impl Default for LocalBus {
    fn default() -> Self {
        Self::new(64)
    }
}

#[async_trait]
impl EventBus for LocalBus {
    async fn publish(&self, event: SystemEvent) -> Result<()> {
        // No subscribers is fine.
        if self.tx.send(event).is_err() {
            trace!("event dropped: no subscribers");
        }
        Ok(())
    }

    fn subscribe(&self) -> BoxStream<'static, SystemEvent> {
        BroadcastStream::new(self.tx.subscribe())
            .filter_map(|event| async move { event.ok() })
            .boxed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sightline_types::{events::EventKind, session::SessionPhase};

    #[tokio::test]
    async fn subscribers_receive_published_events() {
        let bus = LocalBus::new(8);
        let mut stream = bus.subscribe();
        bus.publish(SystemEvent::lifecycle(SessionPhase::CameraActive, "camera started"))
            .await
            .expect("publish");
        let event = stream.next().await.expect("event");
        assert_eq!(event.kind, EventKind::Lifecycle);
    }

    #[tokio::test]
    async fn publishing_without_subscribers_succeeds() {
        let bus = LocalBus::default();
        assert!(bus
            .publish(SystemEvent::lifecycle(SessionPhase::Idle, "noop"))
            .await
            .is_ok());
    }
}
