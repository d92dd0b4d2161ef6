//! Credflow producer.
//!
//! Generates `PRODUCER_BATCHES` batches of synthetic credential events,
//! publishes them to the bus and exits once every generated event has been
//! accepted by the bus.

use credflow_redpanda::RedpandaBus;
use credflow_runtime::{PipelineError, Producer};
use credflow_service::{Config, start_metrics, telemetry};
use std::sync::Arc;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::from_env()?;
    telemetry::init();

    let _metrics = start_metrics(config.metrics_addr)?;

    tracing::info!(
        brokers = %config.bus.brokers,
        topic = %config.producer.topic,
        mode = config.producer.mode.name(),
        publishers = config.producer.publishers,
        batches = config.producer.batches,
        batch_size = config.producer.batch_size,
        "Starting producer"
    );

    let bus = RedpandaBus::builder()
        .brokers(&config.bus.brokers)
        .stream(&config.bus.stream)
        .build()
        .map_err(PipelineError::from)?;

    let producer = Producer::new(Arc::new(bus), config.producer);
    let report = producer.run().await?;

    let failed = report.workers.iter().filter(|exit| exit.is_failure()).count();
    tracing::info!(
        generated = report.generated,
        routed = report.routed,
        failed_publishers = failed,
        elapsed_ms = u64::try_from(report.elapsed.as_millis()).unwrap_or(u64::MAX),
        "Producer finished"
    );

    Ok(())
}
