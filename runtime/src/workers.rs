//! Stage workers and worker pools.
//!
//! Every pool in the pipeline (publishers, digest, cache, store) runs the same
//! loop:
//!
//! ```text
//! running ──recv──► handle ──Ok──► running
//!    │                 └──Err──► terminated (Failed)
//!    └──queue closed & drained──► terminated (Drained)
//! ```
//!
//! A failed call is never retried and the event is not requeued. The worker
//! exits and its share of the queue is picked up by the remaining workers.
//! Restarting workers is left to whoever supervises the pool.

use crate::error::StageError;
use crate::metrics::PipelineMetrics;
use crate::queue::QueueReceiver;
use credflow_core::cache::{CacheRecord, CacheStore, DEFAULT_CACHE_TTL};
use credflow_core::digest::Digester;
use credflow_core::environment::Clock;
use credflow_core::event::CredentialEvent;
use credflow_core::store::{DurableStore, StoreRecord};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;

/// One unit of stage work, applied to each event a worker receives.
pub trait StageHandler: Send + Sync + 'static {
    /// Stage name used in logs and metric labels.
    fn stage(&self) -> &'static str;

    /// Process one event.
    ///
    /// # Errors
    ///
    /// Any error terminates the calling worker.
    fn handle(&self, event: &CredentialEvent)
    -> impl Future<Output = Result<(), StageError>> + Send;
}

/// Computes the credential digest and observes end-to-end latency.
pub struct DigestStage {
    digester: Arc<dyn Digester>,
    clock: Arc<dyn Clock>,
}

impl DigestStage {
    /// Digest with `digester`, measuring latency against `clock`.
    #[must_use]
    pub fn new(digester: Arc<dyn Digester>, clock: Arc<dyn Clock>) -> Self {
        Self { digester, clock }
    }
}

impl StageHandler for DigestStage {
    fn stage(&self) -> &'static str {
        "digest"
    }

    async fn handle(&self, event: &CredentialEvent) -> Result<(), StageError> {
        let digest = self.digester.digest(event.credential_string().as_bytes());
        let latency_ms = event.latency_millis(self.clock.now_millis());
        PipelineMetrics::record_latency(Duration::from_millis(
            u64::try_from(latency_ms).unwrap_or(0),
        ));

        tracing::debug!(
            event_id = %event.id(),
            latency_ms,
            digest = %digest,
            "Digest computed"
        );
        Ok(())
    }
}

/// Writes a [`CacheRecord`] per event.
pub struct CacheStage {
    cache: Arc<dyn CacheStore>,
    ttl: Duration,
}

impl CacheStage {
    /// Write to `cache` with the default TTL of 120 minutes.
    #[must_use]
    pub fn new(cache: Arc<dyn CacheStore>) -> Self {
        Self::with_ttl(cache, DEFAULT_CACHE_TTL)
    }

    /// Write to `cache` with a custom TTL.
    #[must_use]
    pub fn with_ttl(cache: Arc<dyn CacheStore>, ttl: Duration) -> Self {
        Self { cache, ttl }
    }
}

impl StageHandler for CacheStage {
    fn stage(&self) -> &'static str {
        "cache"
    }

    async fn handle(&self, event: &CredentialEvent) -> Result<(), StageError> {
        let record = CacheRecord::from_event(event, self.ttl);
        self.cache
            .set(&record)
            .await
            .map_err(|source| StageError::Write {
                stage: "cache",
                source,
            })
    }
}

/// Inserts a [`StoreRecord`] per event.
pub struct StoreStage {
    store: Arc<dyn DurableStore>,
}

impl StoreStage {
    /// Insert into `store`.
    #[must_use]
    pub fn new(store: Arc<dyn DurableStore>) -> Self {
        Self { store }
    }
}

impl StageHandler for StoreStage {
    fn stage(&self) -> &'static str {
        "store"
    }

    async fn handle(&self, event: &CredentialEvent) -> Result<(), StageError> {
        self.store
            .insert(&StoreRecord::from_event(event))
            .await
            .map_err(|source| StageError::Write {
                stage: "store",
                source,
            })
    }
}

/// How a worker task ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkerExit {
    /// The queue closed and the worker consumed everything left in it.
    Drained {
        /// Stage the worker belonged to.
        stage: &'static str,
        /// Index within its pool.
        worker_id: usize,
        /// Events handled successfully.
        processed: u64,
    },
    /// A stage call failed; the worker stopped consuming.
    Failed {
        /// Stage the worker belonged to.
        stage: &'static str,
        /// Index within its pool.
        worker_id: usize,
        /// Events handled successfully before the failure.
        processed: u64,
        /// The failure.
        error: StageError,
    },
    /// The task panicked or was cancelled.
    Aborted {
        /// Stage the worker belonged to.
        stage: &'static str,
        /// Index within its pool.
        worker_id: usize,
        /// Join error description.
        reason: String,
    },
}

impl WorkerExit {
    /// Whether the worker ended abnormally.
    #[must_use]
    pub const fn is_failure(&self) -> bool {
        !matches!(self, Self::Drained { .. })
    }

    /// Events handled successfully.
    #[must_use]
    pub const fn processed(&self) -> u64 {
        match self {
            Self::Drained { processed, .. } | Self::Failed { processed, .. } => *processed,
            Self::Aborted { .. } => 0,
        }
    }
}

/// Observable state of a worker task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
    /// Still consuming its queue.
    Running,
    /// Exited, normally or not.
    Terminated,
}

/// Drain `queue` with `handler` until the queue closes or a call fails.
pub async fn run_worker<H: StageHandler>(
    worker_id: usize,
    handler: Arc<H>,
    queue: QueueReceiver<CredentialEvent>,
) -> WorkerExit {
    let stage = handler.stage();
    let mut processed = 0u64;
    tracing::debug!(stage, worker_id, "Worker started");

    while let Some(event) = queue.recv().await {
        match handler.handle(&event).await {
            Ok(()) => {
                processed += 1;
                PipelineMetrics::record_processed(stage);
            },
            Err(error) => {
                PipelineMetrics::record_failure(stage);
                tracing::error!(
                    stage,
                    worker_id,
                    event_id = %event.id(),
                    processed,
                    error = %error,
                    "Stage call failed, worker terminating"
                );
                return WorkerExit::Failed {
                    stage,
                    worker_id,
                    processed,
                    error,
                };
            },
        }
    }

    tracing::info!(stage, worker_id, processed, "Queue closed, worker drained");
    WorkerExit::Drained {
        stage,
        worker_id,
        processed,
    }
}

/// Fixed-size pool of worker tasks sharing one queue.
pub struct WorkerPool {
    stage: &'static str,
    handles: Vec<JoinHandle<WorkerExit>>,
}

impl WorkerPool {
    /// Spawn `size` workers draining `queue` with `handler`.
    ///
    /// Must be called from within a Tokio runtime. A pool of size zero holds
    /// no receiver, which closes the queue for its senders.
    #[must_use]
    pub fn spawn<H: StageHandler>(
        size: usize,
        handler: Arc<H>,
        queue: QueueReceiver<CredentialEvent>,
    ) -> Self {
        let stage = handler.stage();
        let handles = (0..size)
            .map(|worker_id| {
                tokio::spawn(run_worker(worker_id, Arc::clone(&handler), queue.clone()))
            })
            .collect();
        tracing::info!(stage, size, "Worker pool started");
        Self { stage, handles }
    }

    /// Stage this pool serves.
    #[must_use]
    pub const fn stage(&self) -> &'static str {
        self.stage
    }

    /// Number of workers spawned.
    #[must_use]
    pub fn size(&self) -> usize {
        self.handles.len()
    }

    /// Current state of each worker, by worker id.
    #[must_use]
    pub fn states(&self) -> Vec<WorkerState> {
        self.handles
            .iter()
            .map(|handle| {
                if handle.is_finished() {
                    WorkerState::Terminated
                } else {
                    WorkerState::Running
                }
            })
            .collect()
    }

    /// Number of workers still running.
    #[must_use]
    pub fn running(&self) -> usize {
        self.states()
            .into_iter()
            .filter(|state| *state == WorkerState::Running)
            .count()
    }

    /// Cancel every worker.
    pub fn abort(&self) {
        for handle in &self.handles {
            handle.abort();
        }
    }

    /// Wait for every worker to exit.
    ///
    /// Workers only exit normally once their queue is closed, so close it
    /// (drop every sender) before awaiting this.
    pub async fn join(self) -> Vec<WorkerExit> {
        let mut exits = Vec::with_capacity(self.handles.len());
        for (worker_id, handle) in self.handles.into_iter().enumerate() {
            let exit = match handle.await {
                Ok(exit) => exit,
                Err(join_error) => WorkerExit::Aborted {
                    stage: self.stage,
                    worker_id,
                    reason: join_error.to_string(),
                },
            };
            exits.push(exit);
        }
        exits
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::queue::stage_queue;
    use credflow_core::digest::DigestAlgorithm;
    use credflow_testing::{RecordingCache, RecordingDigester, RecordingStore, test_clock};

    fn event(id: &str) -> CredentialEvent {
        CredentialEvent::new(id, "user", "secret", 1_735_689_599_000, 0)
    }

    #[tokio::test]
    async fn digest_stage_digests_username_and_secret() {
        let digester = RecordingDigester::new(DigestAlgorithm::Md5);
        let stage = DigestStage::new(Arc::new(digester.clone()), Arc::new(test_clock()));

        stage.handle(&event("a")).await.unwrap();

        assert_eq!(digester.inputs(), vec!["user:secret"]);
    }

    #[tokio::test]
    async fn cache_stage_writes_formatted_record() {
        let cache = RecordingCache::new();
        let stage = CacheStage::with_ttl(Arc::new(cache.clone()), Duration::from_secs(60));

        stage.handle(&event("a")).await.unwrap();

        let sets = cache.sets();
        assert_eq!(sets.len(), 1);
        assert_eq!(sets[0].key, "a");
        assert_eq!(sets[0].value, "Username user Password secret");
        assert_eq!(sets[0].ttl, Duration::from_secs(60));
    }

    #[tokio::test]
    async fn store_stage_inserts_with_empty_hash() {
        let store = RecordingStore::new();
        let stage = StoreStage::new(Arc::new(store.clone()));

        stage.handle(&event("a")).await.unwrap();

        let inserts = store.inserts();
        assert_eq!(inserts[0].id, "a");
        assert!(inserts[0].hash.is_empty());
    }

    #[tokio::test]
    async fn worker_drains_then_exits() {
        let store = RecordingStore::new();
        let (tx, rx) = stage_queue(2);
        let worker = tokio::spawn(run_worker(
            0,
            Arc::new(StoreStage::new(Arc::new(store.clone()))),
            rx,
        ));

        for id in ["a", "b", "c"] {
            tx.push(event(id)).await.unwrap();
        }
        drop(tx);

        let exit = worker.await.unwrap();
        assert_eq!(
            exit,
            WorkerExit::Drained {
                stage: "store",
                worker_id: 0,
                processed: 3
            }
        );
        assert_eq!(store.inserted_ids(), vec!["a", "b", "c"]);
    }

    #[tokio::test]
    async fn write_failure_terminates_worker_without_retry() {
        let cache = RecordingCache::new();
        cache.fail_after(1, "connection reset");
        let (tx, rx) = stage_queue(4);
        let pool = WorkerPool::spawn(1, Arc::new(CacheStage::new(Arc::new(cache.clone()))), rx);

        tx.push(event("a")).await.unwrap();
        tx.push(event("b")).await.unwrap();

        let exits = pool.join().await;
        assert!(exits[0].is_failure());
        assert_eq!(exits[0].processed(), 1);
        assert_eq!(cache.keys(), vec!["a"]);
        // The only receiver is gone, so the queue is closed to producers.
        assert!(tx.is_closed());
    }

    #[tokio::test]
    async fn pool_reports_states() {
        let (tx, rx) = stage_queue(1);
        let pool = WorkerPool::spawn(
            3,
            Arc::new(StoreStage::new(Arc::new(RecordingStore::new()))),
            rx,
        );
        assert_eq!(pool.size(), 3);
        assert_eq!(pool.stage(), "store");
        assert_eq!(pool.running(), 3);

        drop(tx);
        let exits = pool.join().await;
        assert_eq!(exits.len(), 3);
        assert!(exits.iter().all(|exit| !exit.is_failure()));
    }
}
