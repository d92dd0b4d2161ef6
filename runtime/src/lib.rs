//! # Credflow Runtime
//!
//! Runtime for the credflow producer/consumer fan-out pipeline.
//!
//! ## Core Components
//!
//! - **Producer**: generates event batches and publishes them through a pool of
//!   publisher workers, then waits for the completion counters to converge
//! - **Dispatcher**: consumes the bus in broadcast or queue-group mode and
//!   pushes each decoded event into the digest, cache and store queues
//! - **Stage workers**: fixed pools draining bounded queues; a failed external
//!   call terminates the worker that made it
//! - **Completion tracker**: atomic `generated` / `routed` counters and the
//!   polling convergence loop
//!
//! ## Example
//!
//! ```
//! use credflow_runtime::producer::{Producer, ProducerConfig};
//! use credflow_testing::InMemoryBus;
//! use std::sync::Arc;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let bus = InMemoryBus::new();
//! let producer = Producer::new(Arc::new(bus.clone()), ProducerConfig::default().with_batches(1, 10));
//!
//! let report = producer.run().await?;
//! assert_eq!(report.generated, report.routed);
//! # Ok(())
//! # }
//! ```

pub mod dispatcher;
pub mod error;
pub mod generator;
/// Prometheus metrics for observability
pub mod metrics;
pub mod pipeline;
pub mod producer;
pub mod publisher;
pub mod queue;
pub mod stages;
pub mod tracker;
pub mod workers;

pub use dispatcher::{DispatchSnapshot, Dispatcher, StageSenders};
pub use error::{PipelineError, PublishError, StageError};
pub use generator::{EventGenerator, generate};
pub use pipeline::{ConsumerPipeline, Injector, PipelineConfig, PipelineReport, RunningPipeline};
pub use producer::{Producer, ProducerConfig, ProducerReport};
pub use publisher::Publisher;
pub use stages::{Stage, StageSet};
pub use tracker::{CompletionTracker, CounterSnapshot, await_convergence};
pub use workers::{StageHandler, WorkerExit, WorkerPool, WorkerState};
