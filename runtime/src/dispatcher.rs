//! Bus consumption and fan-out into stage queues.
//!
//! A [`Dispatcher`] owns one subscription. Depending on the
//! [`SubscriptionMode`] it either sees every message on the topic (broadcast)
//! or competes with the other members of its group for each message
//! (queue-group). Either way, every event it decodes goes into its own stage
//! queues: digest first, then cache, then store. Pushes wait while a queue is
//! full.
//!
//! Undecodable payloads are logged and dropped. They are never retried.

use crate::metrics::PipelineMetrics;
use crate::queue::{QueueClosed, QueueReceiver, QueueSender};
use crate::stages::{Stage, StageSet};
use credflow_core::bus::{BusError, MessageBus, MessageStream};
use credflow_core::event::CredentialEvent;
use credflow_core::routing::SubscriptionMode;
use futures::StreamExt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::broadcast;

/// Senders for the active stage queues.
#[derive(Clone, Default)]
pub struct StageSenders {
    digest: Option<QueueSender<CredentialEvent>>,
    cache: Option<QueueSender<CredentialEvent>>,
    store: Option<QueueSender<CredentialEvent>>,
}

impl StageSenders {
    /// No active stages.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Route events for `stage` into `sender`.
    #[must_use]
    pub fn with_stage(mut self, stage: Stage, sender: QueueSender<CredentialEvent>) -> Self {
        match stage {
            Stage::Digest => self.digest = Some(sender),
            Stage::Cache => self.cache = Some(sender),
            Stage::Store => self.store = Some(sender),
        }
        self
    }

    /// Stages that have a queue.
    #[must_use]
    pub fn active(&self) -> StageSet {
        let mut set = StageSet::only(&[]);
        for (stage, sender) in self.ordered() {
            if sender.is_some() {
                set = set.with(stage);
            }
        }
        set
    }

    /// Items waiting across all stage queues.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.ordered()
            .into_iter()
            .filter_map(|(_, sender)| sender.map(QueueSender::pending))
            .sum()
    }

    /// Push `event` into every active queue in dispatch order.
    ///
    /// Returns how many queues accepted it. A queue whose workers have all
    /// terminated is skipped with a warning.
    pub async fn route(&self, event: CredentialEvent) -> usize {
        let mut accepted = 0;
        for (stage, sender) in self.ordered() {
            let Some(sender) = sender else {
                continue;
            };
            match sender.push(event.clone()).await {
                Ok(()) => accepted += 1,
                Err(QueueClosed) => tracing::warn!(
                    stage = %stage,
                    event_id = %event.id(),
                    "Stage queue closed, no worker left to take the event"
                ),
            }
        }
        accepted
    }

    fn ordered(&self) -> [(Stage, Option<&QueueSender<CredentialEvent>>); 3] {
        [
            (Stage::Digest, self.digest.as_ref()),
            (Stage::Cache, self.cache.as_ref()),
            (Stage::Store, self.store.as_ref()),
        ]
    }
}

/// Live counters of one dispatcher.
#[derive(Debug, Default)]
pub struct DispatchStats {
    received: AtomicU64,
    routed: AtomicU64,
    dropped: AtomicU64,
}

impl DispatchStats {
    /// Read the counters.
    #[must_use]
    pub fn snapshot(&self) -> DispatchSnapshot {
        DispatchSnapshot {
            received: self.received.load(Ordering::SeqCst),
            routed: self.routed.load(Ordering::SeqCst),
            dropped: self.dropped.load(Ordering::SeqCst),
        }
    }
}

/// Point-in-time view of [`DispatchStats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchSnapshot {
    /// Bus messages and injected events taken in.
    pub received: u64,
    /// Events pushed into at least one stage queue.
    pub routed: u64,
    /// Messages dropped (decode failure or no live stage).
    pub dropped: u64,
}

/// One bus subscription feeding one set of stage queues.
pub struct Dispatcher {
    id: usize,
    topic: String,
    mode: SubscriptionMode,
    senders: StageSenders,
    stats: Arc<DispatchStats>,
}

impl Dispatcher {
    /// Create dispatcher `id` for `topic` in `mode`.
    #[must_use]
    pub fn new(id: usize, topic: impl Into<String>, mode: SubscriptionMode, senders: StageSenders) -> Self {
        Self {
            id,
            topic: topic.into(),
            mode,
            senders,
            stats: Arc::new(DispatchStats::default()),
        }
    }

    /// Shared handle on this dispatcher's counters.
    #[must_use]
    pub fn stats(&self) -> Arc<DispatchStats> {
        Arc::clone(&self.stats)
    }

    /// Register this dispatcher's subscription on `bus`.
    ///
    /// # Errors
    ///
    /// Returns the bus error if the subscription cannot be registered.
    pub async fn subscribe(&self, bus: &dyn MessageBus) -> Result<MessageStream, BusError> {
        let pattern = self.mode.subscription_pattern(&self.topic);
        let stream = match &self.mode {
            SubscriptionMode::Broadcast => bus.subscribe(&pattern).await?,
            SubscriptionMode::QueueGroup { group } => bus.subscribe_group(&pattern, group).await?,
        };
        tracing::info!(
            dispatcher = self.id,
            mode = self.mode.name(),
            pattern = %pattern,
            "Dispatcher subscribed"
        );
        Ok(stream)
    }

    /// Decode one bus payload and route it.
    ///
    /// Returns `false` if the payload was dropped.
    pub async fn handle_payload(&self, subject: &str, payload: &[u8]) -> bool {
        match CredentialEvent::from_wire(payload) {
            Ok(event) => self.forward(event).await,
            Err(error) => {
                self.stats.received.fetch_add(1, Ordering::SeqCst);
                self.stats.dropped.fetch_add(1, Ordering::SeqCst);
                PipelineMetrics::record_decode_failure();
                tracing::warn!(
                    dispatcher = self.id,
                    subject,
                    error = %error,
                    "Dropping undecodable message"
                );
                false
            },
        }
    }

    /// Route an already decoded event.
    ///
    /// Returns `false` if no stage queue accepted it.
    pub async fn forward(&self, event: CredentialEvent) -> bool {
        self.stats.received.fetch_add(1, Ordering::SeqCst);
        if self.senders.route(event).await == 0 {
            self.stats.dropped.fetch_add(1, Ordering::SeqCst);
            return false;
        }
        self.stats.routed.fetch_add(1, Ordering::SeqCst);
        PipelineMetrics::record_dispatched();
        true
    }

    /// Consume `stream` and `injections` until shutdown or until the
    /// subscription ends.
    ///
    /// Dropping the dispatcher on return releases its stage senders; once
    /// every dispatcher has returned the stage queues close.
    pub async fn run(
        self,
        mut stream: MessageStream,
        injections: Option<QueueReceiver<CredentialEvent>>,
        mut shutdown: broadcast::Receiver<()>,
    ) -> DispatchSnapshot {
        let mut injection_open = injections.is_some();

        loop {
            tokio::select! {
                _ = shutdown.recv() => {
                    tracing::debug!(dispatcher = self.id, "Shutdown requested");
                    break;
                }
                message = stream.next() => match message {
                    Some(Ok(message)) => {
                        self.handle_payload(&message.subject, &message.payload).await;
                    },
                    Some(Err(error)) => {
                        tracing::warn!(dispatcher = self.id, error = %error, "Bus delivery error");
                    },
                    None => {
                        tracing::info!(dispatcher = self.id, "Subscription ended");
                        break;
                    },
                },
                injected = next_injection(injections.as_ref()), if injection_open => match injected {
                    Some(event) => {
                        self.forward(event).await;
                    },
                    None => injection_open = false,
                },
            }
        }

        let snapshot = self.stats.snapshot();
        tracing::info!(
            dispatcher = self.id,
            received = snapshot.received,
            routed = snapshot.routed,
            dropped = snapshot.dropped,
            "Dispatcher stopped"
        );
        snapshot
    }
}

async fn next_injection(queue: Option<&QueueReceiver<CredentialEvent>>) -> Option<CredentialEvent> {
    match queue {
        Some(queue) => queue.recv().await,
        None => std::future::pending().await,
    }
}
