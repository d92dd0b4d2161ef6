//! The producer side: generate, publish, wait for completion, shut down.
//!
//! A run feeds events through one bounded input queue into a pool of
//! [`PublishStage`] workers. Each event bumps `generated` as it is handed to
//! the queue; each publisher bumps `routed` once the bus accepts it. After the
//! last event is handed over the producer polls the counters, closes the input
//! queue as soon as they agree, and waits for the publishers to drain.

use crate::error::PipelineError;
use crate::generator::EventGenerator;
use crate::publisher::{PublishStage, Publisher};
use crate::queue::stage_queue;
use crate::tracker::{CompletionTracker, await_convergence};
use crate::workers::{WorkerExit, WorkerPool};
use credflow_core::bus::MessageBus;
use credflow_core::event::CredentialEvent;
use credflow_core::routing::SubscriptionMode;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

/// Default `{topic}` shared by producers and consumers.
pub const DEFAULT_TOPIC: &str = "credflow.logins";

/// Producer run settings.
#[derive(Debug, Clone)]
pub struct ProducerConfig {
    /// `{topic}` to publish under.
    pub topic: String,
    /// Consumer mode, which decides the routing key.
    pub mode: SubscriptionMode,
    /// Publisher workers.
    pub publishers: usize,
    /// Events per generated batch.
    pub batch_size: i64,
    /// Batches per run.
    pub batches: usize,
    /// Capacity of the publisher input queue.
    pub queue_capacity: usize,
    /// Completion poll interval.
    pub poll_interval: Duration,
    /// Give up waiting for convergence after this long. `None` waits forever.
    pub deadline: Option<Duration>,
}

impl Default for ProducerConfig {
    fn default() -> Self {
        Self {
            topic: DEFAULT_TOPIC.to_string(),
            mode: SubscriptionMode::queue_group(credflow_core::routing::DEFAULT_QUEUE_GROUP),
            publishers: 2,
            batch_size: 1000,
            batches: 4,
            queue_capacity: 2,
            poll_interval: Duration::from_millis(100),
            deadline: None,
        }
    }
}

impl ProducerConfig {
    /// Set the topic.
    #[must_use]
    pub fn with_topic(mut self, topic: impl Into<String>) -> Self {
        self.topic = topic.into();
        self
    }

    /// Set the consumer mode.
    #[must_use]
    pub fn with_mode(mut self, mode: SubscriptionMode) -> Self {
        self.mode = mode;
        self
    }

    /// Set the number of publisher workers.
    #[must_use]
    pub const fn with_publishers(mut self, publishers: usize) -> Self {
        self.publishers = publishers;
        self
    }

    /// Set batch size and batch count.
    #[must_use]
    pub const fn with_batches(mut self, batches: usize, batch_size: i64) -> Self {
        self.batches = batches;
        self.batch_size = batch_size;
        self
    }

    /// Set the input queue capacity.
    #[must_use]
    pub const fn with_queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = capacity;
        self
    }

    /// Set the completion poll interval.
    #[must_use]
    pub const fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Set or clear the convergence deadline.
    #[must_use]
    pub const fn with_deadline(mut self, deadline: Option<Duration>) -> Self {
        self.deadline = deadline;
        self
    }
}

/// Outcome of a completed producer run.
#[derive(Debug, Clone)]
pub struct ProducerReport {
    /// Events handed to publishers.
    pub generated: u64,
    /// Events accepted by the bus.
    pub routed: u64,
    /// How each publisher worker ended.
    pub workers: Vec<WorkerExit>,
    /// Time from start of the run until the input queue was closed.
    pub elapsed: Duration,
}

/// Generates events and publishes them through a worker pool.
pub struct Producer {
    bus: Arc<dyn MessageBus>,
    generator: EventGenerator,
    config: ProducerConfig,
    tracker: Arc<CompletionTracker>,
}

impl Producer {
    /// Create a producer publishing to `bus`.
    #[must_use]
    pub fn new(bus: Arc<dyn MessageBus>, config: ProducerConfig) -> Self {
        Self {
            bus,
            generator: EventGenerator::default(),
            config,
            tracker: Arc::new(CompletionTracker::new()),
        }
    }

    /// Use a specific generator, e.g. one with a fixed clock.
    #[must_use]
    pub fn with_generator(mut self, generator: EventGenerator) -> Self {
        self.generator = generator;
        self
    }

    /// Counters for this producer's runs.
    #[must_use]
    pub fn tracker(&self) -> Arc<CompletionTracker> {
        Arc::clone(&self.tracker)
    }

    /// Generate `batches × batch_size` events and publish them all.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::ConvergenceTimeout`] if a deadline is set and
    /// the counters do not converge in time.
    pub async fn run(&self) -> Result<ProducerReport, PipelineError> {
        let batch_size = self.config.batch_size;
        let events = (0..self.config.batches).flat_map(|_| self.generator.generate(batch_size));
        self.run_events(events).await
    }

    /// Publish the given events.
    ///
    /// # Errors
    ///
    /// See [`Producer::run`].
    pub async fn run_events<I>(&self, events: I) -> Result<ProducerReport, PipelineError>
    where
        I: IntoIterator<Item = CredentialEvent>,
    {
        let started = Instant::now();
        let (input, queue) = stage_queue(self.config.queue_capacity);
        let publisher = Publisher::new(
            Arc::clone(&self.bus),
            self.config.topic.clone(),
            self.config.mode.clone(),
        );
        let pool = WorkerPool::spawn(
            self.config.publishers,
            Arc::new(PublishStage::new(publisher, Arc::clone(&self.tracker))),
            queue,
        );

        for event in events {
            self.tracker.record_generated();
            if input.push(event).await.is_err() {
                tracing::error!("Every publisher has stopped, no further events can be handed over");
                break;
            }
        }

        let converged = await_convergence(
            &self.tracker,
            self.config.poll_interval,
            self.config.deadline,
        )
        .await;

        drop(input);
        let elapsed = started.elapsed();
        tracing::debug!("Publisher input queue closed");

        let snapshot = match converged {
            Ok(snapshot) => snapshot,
            Err(error) => {
                pool.abort();
                return Err(error);
            },
        };

        let workers = pool.join().await;
        tracing::info!(
            generated = snapshot.generated,
            routed = snapshot.routed,
            elapsed_ms = u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX),
            "Producer run complete"
        );

        Ok(ProducerReport {
            generated: snapshot.generated,
            routed: snapshot.routed,
            workers,
            elapsed,
        })
    }
}
