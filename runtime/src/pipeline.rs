//! The consumer side, assembled.
//!
//! [`ConsumerPipeline`] wires dispatchers, stage queues and worker pools from
//! one [`PipelineConfig`]. Collaborators are passed in as explicit handles;
//! nothing in the pipeline reaches for global state.
//!
//! Startup order matters: every dispatcher subscribes before any task is
//! spawned, so a bus that cannot be reached stops the pipeline before a single
//! worker starts.
//!
//! # Example
//!
//! ```
//! use credflow_core::digest::DigestAlgorithm;
//! use credflow_runtime::pipeline::{ConsumerPipeline, PipelineConfig};
//! use credflow_testing::{InMemoryBus, RecordingCache, RecordingStore};
//! use std::sync::Arc;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let running = ConsumerPipeline::new(PipelineConfig::default())
//!     .with_bus(Arc::new(InMemoryBus::new()))
//!     .with_digester(Arc::new(DigestAlgorithm::Sha256))
//!     .with_cache(Arc::new(RecordingCache::new()))
//!     .with_store(Arc::new(RecordingStore::new()))
//!     .start()
//!     .await?;
//!
//! let report = running.shutdown().await;
//! assert!(report.workers.iter().all(|exit| !exit.is_failure()));
//! # Ok(())
//! # }
//! ```

use crate::dispatcher::{DispatchSnapshot, DispatchStats, Dispatcher, StageSenders};
use crate::error::PipelineError;
use crate::producer::DEFAULT_TOPIC;
use crate::queue::{QueueClosed, QueueSender, stage_queue};
use crate::stages::{Stage, StageSet};
use crate::workers::{CacheStage, DigestStage, StoreStage, WorkerExit, WorkerPool, WorkerState};
use credflow_core::bus::MessageBus;
use credflow_core::cache::{CacheStore, DEFAULT_CACHE_TTL};
use credflow_core::digest::Digester;
use credflow_core::environment::{Clock, SystemClock};
use credflow_core::event::CredentialEvent;
use credflow_core::routing::{DEFAULT_QUEUE_GROUP, SubscriptionMode};
use credflow_core::store::DurableStore;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

/// Consumer pipeline settings.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// `{topic}` to consume.
    pub topic: String,
    /// Delivery mode, fixed for the life of the pipeline.
    pub mode: SubscriptionMode,
    /// Active stages.
    pub stages: StageSet,
    /// Capacity of each stage queue and of the injection queue.
    pub queue_capacity: usize,
    /// Dispatcher instances.
    pub dispatchers: usize,
    /// Digest workers.
    pub digest_workers: usize,
    /// Cache workers.
    pub cache_workers: usize,
    /// Store workers.
    pub store_workers: usize,
    /// TTL of cache entries.
    pub cache_ttl: Duration,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            topic: DEFAULT_TOPIC.to_string(),
            mode: SubscriptionMode::queue_group(DEFAULT_QUEUE_GROUP),
            stages: StageSet::all(),
            queue_capacity: 2,
            dispatchers: 2,
            digest_workers: 2,
            cache_workers: 4,
            store_workers: 4,
            cache_ttl: DEFAULT_CACHE_TTL,
        }
    }
}

impl PipelineConfig {
    /// Set the topic.
    #[must_use]
    pub fn with_topic(mut self, topic: impl Into<String>) -> Self {
        self.topic = topic.into();
        self
    }

    /// Set the delivery mode.
    #[must_use]
    pub fn with_mode(mut self, mode: SubscriptionMode) -> Self {
        self.mode = mode;
        self
    }

    /// Set the active stages.
    #[must_use]
    pub const fn with_stages(mut self, stages: StageSet) -> Self {
        self.stages = stages;
        self
    }

    /// Set the stage queue capacity.
    #[must_use]
    pub const fn with_queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = capacity;
        self
    }

    /// Set the number of dispatchers.
    #[must_use]
    pub const fn with_dispatchers(mut self, dispatchers: usize) -> Self {
        self.dispatchers = dispatchers;
        self
    }

    /// Set the pool size of one stage.
    #[must_use]
    pub const fn with_workers(mut self, stage: Stage, workers: usize) -> Self {
        match stage {
            Stage::Digest => self.digest_workers = workers,
            Stage::Cache => self.cache_workers = workers,
            Stage::Store => self.store_workers = workers,
        }
        self
    }

    /// Set the cache TTL.
    #[must_use]
    pub const fn with_cache_ttl(mut self, ttl: Duration) -> Self {
        self.cache_ttl = ttl;
        self
    }

    /// Pool size configured for `stage`.
    #[must_use]
    pub const fn workers(&self, stage: Stage) -> usize {
        match stage {
            Stage::Digest => self.digest_workers,
            Stage::Cache => self.cache_workers,
            Stage::Store => self.store_workers,
        }
    }
}

/// Builder for a consumer pipeline.
pub struct ConsumerPipeline {
    config: PipelineConfig,
    bus: Option<Arc<dyn MessageBus>>,
    digester: Option<Arc<dyn Digester>>,
    cache: Option<Arc<dyn CacheStore>>,
    store: Option<Arc<dyn DurableStore>>,
    clock: Arc<dyn Clock>,
}

impl ConsumerPipeline {
    /// Start building a pipeline from `config`.
    #[must_use]
    pub fn new(config: PipelineConfig) -> Self {
        Self {
            config,
            bus: None,
            digester: None,
            cache: None,
            store: None,
            clock: Arc::new(SystemClock),
        }
    }

    /// Bus to consume from. Required.
    #[must_use]
    pub fn with_bus(mut self, bus: Arc<dyn MessageBus>) -> Self {
        self.bus = Some(bus);
        self
    }

    /// Digest primitive. Required when the digest stage is active.
    #[must_use]
    pub fn with_digester(mut self, digester: Arc<dyn Digester>) -> Self {
        self.digester = Some(digester);
        self
    }

    /// Cache store. Required when the cache stage is active.
    #[must_use]
    pub fn with_cache(mut self, cache: Arc<dyn CacheStore>) -> Self {
        self.cache = Some(cache);
        self
    }

    /// Durable store. Required when the store stage is active.
    #[must_use]
    pub fn with_store(mut self, store: Arc<dyn DurableStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Clock used for latency observation.
    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Subscribe every dispatcher, then spawn pools and dispatchers.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::MissingCollaborator`] if the bus or a
    /// collaborator of an active stage is missing,
    /// [`PipelineError::Connection`] if the bus is unreachable, and
    /// [`PipelineError::Subscription`] if a dispatcher cannot subscribe. No
    /// task has been spawned when any of these is returned.
    pub async fn start(self) -> Result<RunningPipeline, PipelineError> {
        let Self {
            config,
            bus,
            digester,
            cache,
            store,
            clock,
        } = self;

        let bus = bus.ok_or(PipelineError::MissingCollaborator("bus"))?;
        let stages = config.stages;
        let digester = required(stages, Stage::Digest, digester, "digest stage (digester)")?;
        let cache = required(stages, Stage::Cache, cache, "cache stage (cache store)")?;
        let store = required(stages, Stage::Store, store, "store stage (durable store)")?;

        let mut senders = StageSenders::new();
        let mut receivers = Vec::new();
        for stage in stages.iter() {
            let (tx, rx) = stage_queue(config.queue_capacity);
            senders = senders.with_stage(stage, tx);
            receivers.push((stage, rx));
        }

        let mut subscribed = Vec::with_capacity(config.dispatchers);
        for id in 0..config.dispatchers {
            let dispatcher = Dispatcher::new(id, config.topic.clone(), config.mode.clone(), senders.clone());
            let stream = dispatcher.subscribe(bus.as_ref()).await?;
            subscribed.push((dispatcher, stream));
        }
        drop(senders);

        let mut pools = Vec::with_capacity(receivers.len());
        for (stage, rx) in receivers {
            let size = config.workers(stage);
            let pool = match stage {
                Stage::Digest => digester.as_ref().map(|digester| {
                    WorkerPool::spawn(
                        size,
                        Arc::new(DigestStage::new(Arc::clone(digester), Arc::clone(&clock))),
                        rx,
                    )
                }),
                Stage::Cache => cache.as_ref().map(|cache| {
                    WorkerPool::spawn(
                        size,
                        Arc::new(CacheStage::with_ttl(Arc::clone(cache), config.cache_ttl)),
                        rx,
                    )
                }),
                Stage::Store => store
                    .as_ref()
                    .map(|store| WorkerPool::spawn(size, Arc::new(StoreStage::new(Arc::clone(store))), rx)),
            };
            pools.extend(pool);
        }

        let (injection_tx, injection_rx) = stage_queue(config.queue_capacity);
        let (shutdown, _) = broadcast::channel(1);
        let dispatchers = subscribed
            .into_iter()
            .map(|(dispatcher, stream)| {
                let stats = dispatcher.stats();
                let handle = tokio::spawn(dispatcher.run(
                    stream,
                    Some(injection_rx.clone()),
                    shutdown.subscribe(),
                ));
                (stats, handle)
            })
            .collect();

        tracing::info!(
            topic = %config.topic,
            mode = config.mode.name(),
            stages = %stages,
            dispatchers = config.dispatchers,
            "Consumer pipeline started"
        );

        Ok(RunningPipeline {
            shutdown,
            dispatchers,
            pools,
            injector: Injector {
                sender: injection_tx,
            },
        })
    }
}

fn required<T: ?Sized>(
    stages: StageSet,
    stage: Stage,
    collaborator: Option<Arc<T>>,
    name: &'static str,
) -> Result<Option<Arc<T>>, PipelineError> {
    match (stages.contains(stage), collaborator) {
        (false, _) => Ok(None),
        (true, Some(collaborator)) => Ok(Some(collaborator)),
        (true, None) => Err(PipelineError::MissingCollaborator(name)),
    }
}

/// Handle for submitting events from outside the bus.
///
/// Submitted events are routed exactly like decoded bus messages.
#[derive(Clone)]
pub struct Injector {
    sender: QueueSender<CredentialEvent>,
}

impl Injector {
    /// Enqueue `event`, waiting while the injection queue is full.
    ///
    /// # Errors
    ///
    /// Returns [`QueueClosed`] once the pipeline has shut down.
    pub async fn submit(&self, event: CredentialEvent) -> Result<(), QueueClosed> {
        self.sender.push(event).await
    }
}

/// Final state of a pipeline after shutdown.
#[derive(Debug, Clone)]
pub struct PipelineReport {
    /// Counters of each dispatcher, by dispatcher id.
    pub dispatchers: Vec<DispatchSnapshot>,
    /// How every stage worker ended.
    pub workers: Vec<WorkerExit>,
}

/// A started consumer pipeline.
pub struct RunningPipeline {
    shutdown: broadcast::Sender<()>,
    dispatchers: Vec<(Arc<DispatchStats>, JoinHandle<DispatchSnapshot>)>,
    pools: Vec<WorkerPool>,
    injector: Injector,
}

impl RunningPipeline {
    /// Injection point for externally submitted events.
    #[must_use]
    pub fn injector(&self) -> Injector {
        self.injector.clone()
    }

    /// Current counters of each dispatcher.
    #[must_use]
    pub fn dispatch_stats(&self) -> Vec<DispatchSnapshot> {
        self.dispatchers
            .iter()
            .map(|(stats, _)| stats.snapshot())
            .collect()
    }

    /// Events received across all dispatchers, decoded or not.
    #[must_use]
    pub fn received(&self) -> u64 {
        self.dispatch_stats().iter().map(|stats| stats.received).sum()
    }

    /// Worker states per stage pool.
    #[must_use]
    pub fn pool_states(&self) -> Vec<(&'static str, Vec<WorkerState>)> {
        self.pools
            .iter()
            .map(|pool| (pool.stage(), pool.states()))
            .collect()
    }

    /// Stop consuming, close the stage queues and wait for workers to drain.
    ///
    /// Events already in a stage queue are still processed. A worker blocked
    /// on an external call delays this until the call returns.
    pub async fn shutdown(self) -> PipelineReport {
        let Self {
            shutdown,
            dispatchers,
            pools,
            injector,
        } = self;

        drop(injector);
        // Err only means every dispatcher has already stopped.
        let _ = shutdown.send(());

        let mut snapshots = Vec::with_capacity(dispatchers.len());
        for (stats, handle) in dispatchers {
            match handle.await {
                Ok(snapshot) => snapshots.push(snapshot),
                Err(error) => {
                    tracing::error!(error = %error, "Dispatcher task failed");
                    snapshots.push(stats.snapshot());
                },
            }
        }
        tracing::info!("Dispatchers stopped, stage queues closed");

        let mut workers = Vec::new();
        for pool in pools {
            workers.extend(pool.join().await);
        }
        tracing::info!(workers = workers.len(), "Consumer pipeline drained");

        PipelineReport {
            dispatchers: snapshots,
            workers,
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use credflow_core::digest::DigestAlgorithm;
    use credflow_testing::{InMemoryBus, RecordingStore};

    #[tokio::test]
    async fn missing_bus_is_rejected() {
        let result = ConsumerPipeline::new(PipelineConfig::default()).start().await;
        assert!(matches!(result, Err(PipelineError::MissingCollaborator("bus"))));
    }

    #[tokio::test]
    async fn missing_collaborator_of_active_stage_is_rejected() {
        let result = ConsumerPipeline::new(PipelineConfig::default())
            .with_bus(Arc::new(InMemoryBus::new()))
            .with_digester(Arc::new(DigestAlgorithm::Md5))
            .start()
            .await;
        assert!(matches!(result, Err(PipelineError::MissingCollaborator(_))));
    }

    #[tokio::test]
    async fn inactive_stage_needs_no_collaborator() {
        let bus = InMemoryBus::new();
        let running = ConsumerPipeline::new(
            PipelineConfig::default()
                .with_stages(StageSet::only(&[Stage::Store]))
                .with_dispatchers(1)
                .with_workers(Stage::Store, 1),
        )
        .with_bus(Arc::new(bus.clone()))
        .with_store(Arc::new(RecordingStore::new()))
        .start()
        .await
        .unwrap();

        assert_eq!(bus.subscription_count(), 1);
        let states = running.pool_states();
        assert_eq!(states.len(), 1);
        assert_eq!(states[0].0, "store");

        let report = running.shutdown().await;
        assert_eq!(report.workers.len(), 1);
    }

    #[tokio::test]
    async fn subscription_failure_spawns_nothing() {
        struct Unreachable(credflow_core::bus::BusError);
        impl MessageBus for Unreachable {
            fn publish(&self, _: &str, _: Vec<u8>) -> credflow_core::bus::BusFuture<'_, ()> {
                Box::pin(async { Err(credflow_core::bus::BusError::ConnectionFailed("down".into())) })
            }
            fn subscribe(&self, _: &str) -> credflow_core::bus::BusFuture<'_, credflow_core::bus::MessageStream> {
                let error = self.0.clone();
                Box::pin(async move { Err(error) })
            }
            fn subscribe_group(
                &self,
                pattern: &str,
                _: &str,
            ) -> credflow_core::bus::BusFuture<'_, credflow_core::bus::MessageStream> {
                self.subscribe(pattern)
            }
        }

        async fn start_with(error: credflow_core::bus::BusError) -> Result<RunningPipeline, PipelineError> {
            ConsumerPipeline::new(PipelineConfig::default().with_stages(StageSet::only(&[Stage::Store])))
                .with_bus(Arc::new(Unreachable(error)))
                .with_store(Arc::new(RecordingStore::new()))
                .start()
                .await
        }

        let refused = start_with(credflow_core::bus::BusError::SubscriptionFailed {
            pattern: "logins.>".into(),
            reason: "denied".into(),
        })
        .await;
        assert!(matches!(refused, Err(PipelineError::Subscription(_))));

        let unreachable =
            start_with(credflow_core::bus::BusError::ConnectionFailed("down".into())).await;
        assert!(matches!(
            unreachable,
            Err(PipelineError::Connection { collaborator: "bus", .. })
        ));
    }
}
