//! Publishing events onto the bus.

use crate::error::{PublishError, StageError};
use crate::tracker::CompletionTracker;
use crate::workers::StageHandler;
use credflow_core::bus::MessageBus;
use credflow_core::event::CredentialEvent;
use credflow_core::routing::{RoutingKey, SubscriptionMode};
use std::sync::Arc;

/// Serializes events and hands them to the bus.
///
/// The routing key follows the subscription mode the consumers run in:
/// `{topic}.{id}` for queue-group consumption, bare `{topic}` for broadcast.
/// Publishing is fire-and-forget. Success means the bus accepted the message,
/// not that anything downstream has seen it.
#[derive(Clone)]
pub struct Publisher {
    bus: Arc<dyn MessageBus>,
    topic: String,
    mode: SubscriptionMode,
}

impl Publisher {
    /// Publish under `topic` for consumers running in `mode`.
    #[must_use]
    pub fn new(bus: Arc<dyn MessageBus>, topic: impl Into<String>, mode: SubscriptionMode) -> Self {
        Self {
            bus,
            topic: topic.into(),
            mode,
        }
    }

    /// Routing key `event` is published under.
    #[must_use]
    pub fn routing_key(&self, event: &CredentialEvent) -> RoutingKey {
        self.mode.routing_key(&self.topic, event.id())
    }

    /// Encode `event` and publish it once.
    ///
    /// # Errors
    ///
    /// Returns [`PublishError::Serialization`] if encoding fails and
    /// [`PublishError::Bus`] if the bus refuses the message. Neither is
    /// retried.
    pub async fn publish(&self, event: &CredentialEvent) -> Result<(), PublishError> {
        let payload = event.to_wire()?;
        let key = self.routing_key(event);
        self.bus.publish(key.as_str(), payload).await?;
        tracing::trace!(subject = %key, event_id = %event.id(), "Event published");
        Ok(())
    }
}

/// Publisher worker stage: publish, then count the event as routed.
pub struct PublishStage {
    publisher: Publisher,
    tracker: Arc<CompletionTracker>,
}

impl PublishStage {
    /// Publish with `publisher`, reporting to `tracker`.
    #[must_use]
    pub const fn new(publisher: Publisher, tracker: Arc<CompletionTracker>) -> Self {
        Self { publisher, tracker }
    }
}

impl StageHandler for PublishStage {
    fn stage(&self) -> &'static str {
        "publish"
    }

    async fn handle(&self, event: &CredentialEvent) -> Result<(), StageError> {
        self.publisher.publish(event).await?;
        self.tracker.record_routed();
        Ok(())
    }
}
