//! In-memory message bus.
//!
//! [`InMemoryBus`] implements [`MessageBus`] inside one process. Clones share
//! the same bus, so each worker can hold its own handle the way it would hold
//! its own broker connection.
//!
//! - Broadcast subscriptions receive every message whose subject matches.
//! - Group subscriptions sharing a `(pattern, group)` pair receive each
//!   matching message exactly once between them, assigned round-robin.
//! - Messages published while nobody listens are dropped (at-most-once).

#![allow(clippy::unwrap_used)] // Test infrastructure uses unwrap on poisoned locks

use credflow_core::bus::{BusError, BusFuture, BusMessage, MessageBus, MessageStream};
use credflow_core::routing::subject_matches;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;

type Delivery = mpsc::UnboundedSender<Result<BusMessage, BusError>>;

#[derive(Default)]
struct Group {
    members: Vec<Delivery>,
    next: usize,
}

impl Group {
    /// Deliver to the next live member. Returns `false` if none is left.
    fn deliver(&mut self, message: &BusMessage) -> bool {
        self.members.retain(|member| !member.is_closed());
        while !self.members.is_empty() {
            let index = self.next % self.members.len();
            self.next = self.next.wrapping_add(1);
            if self.members[index].send(Ok(message.clone())).is_ok() {
                return true;
            }
            self.members.remove(index);
        }
        false
    }
}

#[derive(Default)]
struct BusState {
    broadcast: Vec<(String, Delivery)>,
    groups: HashMap<(String, String), Group>,
    published: Vec<BusMessage>,
    publish_failure: Option<String>,
}

/// In-process [`MessageBus`] for tests.
#[derive(Clone, Default)]
pub struct InMemoryBus {
    state: Arc<Mutex<BusState>>,
}

impl InMemoryBus {
    /// Create an empty bus.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent publish fail with `reason`.
    pub fn fail_publishes(&self, reason: impl Into<String>) {
        self.state.lock().unwrap().publish_failure = Some(reason.into());
    }

    /// Undo [`InMemoryBus::fail_publishes`].
    pub fn heal(&self) {
        self.state.lock().unwrap().publish_failure = None;
    }

    /// Every message accepted so far, in publish order.
    #[must_use]
    pub fn published(&self) -> Vec<BusMessage> {
        self.state.lock().unwrap().published.clone()
    }

    /// Number of messages accepted so far.
    #[must_use]
    pub fn published_count(&self) -> usize {
        self.state.lock().unwrap().published.len()
    }

    /// Number of live subscriptions, broadcast and group members combined.
    #[must_use]
    pub fn subscription_count(&self) -> usize {
        let state = self.state.lock().unwrap();
        let broadcast = state
            .broadcast
            .iter()
            .filter(|(_, tx)| !tx.is_closed())
            .count();
        let grouped: usize = state
            .groups
            .values()
            .map(|group| group.members.iter().filter(|tx| !tx.is_closed()).count())
            .sum();
        broadcast + grouped
    }

    /// Wait until at least `count` subscriptions are registered.
    ///
    /// Dispatchers subscribe from their own tasks; tests call this before
    /// publishing so that no message is dropped for lack of listeners.
    pub async fn wait_for_subscriptions(&self, count: usize) {
        while self.subscription_count() < count {
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
    }

    /// Push a raw payload to matching subscribers, bypassing the publish path.
    ///
    /// Useful for feeding malformed payloads to a dispatcher.
    pub fn inject_raw(&self, subject: &str, payload: Vec<u8>) {
        let message = BusMessage::new(subject, payload);
        let mut state = self.state.lock().unwrap();
        Self::route(&mut state, &message);
    }

    fn route(state: &mut BusState, message: &BusMessage) {
        state.broadcast.retain(|(_, tx)| !tx.is_closed());
        for (pattern, tx) in &state.broadcast {
            if subject_matches(pattern, &message.subject) {
                let _ = tx.send(Ok(message.clone()));
            }
        }

        for ((pattern, _), group) in &mut state.groups {
            if subject_matches(pattern, &message.subject) {
                group.deliver(message);
            }
        }
    }

    fn stream(rx: mpsc::UnboundedReceiver<Result<BusMessage, BusError>>) -> MessageStream {
        let stream = async_stream::stream! {
            let mut rx = rx;
            while let Some(result) = rx.recv().await {
                yield result;
            }
        };
        Box::pin(stream)
    }
}

impl MessageBus for InMemoryBus {
    fn publish(&self, subject: &str, payload: Vec<u8>) -> BusFuture<'_, ()> {
        let subject = subject.to_string();
        Box::pin(async move {
            let mut state = self.state.lock().unwrap();
            if let Some(reason) = &state.publish_failure {
                return Err(BusError::PublishFailed {
                    subject,
                    reason: reason.clone(),
                });
            }
            let message = BusMessage::new(subject, payload);
            Self::route(&mut state, &message);
            state.published.push(message);
            Ok(())
        })
    }

    fn subscribe(&self, pattern: &str) -> BusFuture<'_, MessageStream> {
        let pattern = pattern.to_string();
        Box::pin(async move {
            let (tx, rx) = mpsc::unbounded_channel();
            self.state.lock().unwrap().broadcast.push((pattern, tx));
            Ok(Self::stream(rx))
        })
    }

    fn subscribe_group(&self, pattern: &str, group: &str) -> BusFuture<'_, MessageStream> {
        let key = (pattern.to_string(), group.to_string());
        Box::pin(async move {
            let (tx, rx) = mpsc::unbounded_channel();
            self.state
                .lock()
                .unwrap()
                .groups
                .entry(key)
                .or_default()
                .members
                .push(tx);
            Ok(Self::stream(rx))
        })
    }
}

#[cfg(test)]
#[allow(clippy::expect_used)]
mod tests {
    use super::*;
    use futures::StreamExt;

    async fn next_subject(stream: &mut MessageStream) -> String {
        stream
            .next()
            .await
            .expect("stream ended")
            .expect("delivery error")
            .subject
    }

    #[tokio::test]
    async fn broadcast_reaches_every_subscriber() {
        let bus = InMemoryBus::new();
        let mut first = bus.subscribe("t").await.unwrap();
        let mut second = bus.subscribe("t").await.unwrap();

        bus.publish("t", vec![1]).await.unwrap();

        assert_eq!(next_subject(&mut first).await, "t");
        assert_eq!(next_subject(&mut second).await, "t");
    }

    #[tokio::test]
    async fn group_members_split_messages() {
        let bus = InMemoryBus::new();
        let mut first = bus.subscribe_group("t.*", "g").await.unwrap();
        let mut second = bus.subscribe_group("t.*", "g").await.unwrap();

        bus.publish("t.1", vec![]).await.unwrap();
        bus.publish("t.2", vec![]).await.unwrap();

        assert_eq!(next_subject(&mut first).await, "t.1");
        assert_eq!(next_subject(&mut second).await, "t.2");
    }

    #[tokio::test]
    async fn non_matching_subjects_are_not_delivered() {
        let bus = InMemoryBus::new();
        let mut stream = bus.subscribe("t.*").await.unwrap();

        bus.publish("other.1", vec![]).await.unwrap();
        bus.publish("t.2", vec![]).await.unwrap();

        assert_eq!(next_subject(&mut stream).await, "t.2");
    }

    #[tokio::test]
    async fn dropped_group_member_is_skipped() {
        let bus = InMemoryBus::new();
        let first = bus.subscribe_group("t.*", "g").await.unwrap();
        let mut second = bus.subscribe_group("t.*", "g").await.unwrap();
        drop(first);

        bus.publish("t.1", vec![]).await.unwrap();
        bus.publish("t.2", vec![]).await.unwrap();

        assert_eq!(next_subject(&mut second).await, "t.1");
        assert_eq!(next_subject(&mut second).await, "t.2");
        assert_eq!(bus.subscription_count(), 1);
    }

    #[tokio::test]
    async fn publish_failure_is_reported_and_not_recorded() {
        let bus = InMemoryBus::new();
        bus.fail_publishes("broker down");

        let err = bus.publish("t", vec![]).await.unwrap_err();
        assert!(matches!(err, BusError::PublishFailed { .. }));
        assert_eq!(bus.published_count(), 0);

        bus.heal();
        bus.publish("t", vec![]).await.unwrap();
        assert_eq!(bus.published_count(), 1);
    }
}
