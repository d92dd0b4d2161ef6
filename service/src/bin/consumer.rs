//! Credflow consumer.
//!
//! Subscribes to the bus and fans every credential event out to the digest,
//! cache and store stages until SIGINT or SIGTERM, then drains the stage
//! queues and exits.

use credflow_postgres::PostgresCredentialStore;
use credflow_redis::RedisCacheStore;
use credflow_redpanda::RedpandaBus;
use credflow_runtime::{ConsumerPipeline, PipelineError, Stage};
use credflow_service::{Config, shutdown_signal, start_metrics, telemetry};
use std::sync::Arc;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::from_env()?;
    telemetry::init();

    let _metrics = start_metrics(config.metrics_addr)?;

    tracing::info!(
        brokers = %config.bus.brokers,
        topic = %config.pipeline.topic,
        mode = config.pipeline.mode.name(),
        stages = %config.pipeline.stages,
        algorithm = %config.algorithm,
        "Starting consumer"
    );

    let bus = RedpandaBus::builder()
        .brokers(&config.bus.brokers)
        .stream(&config.bus.stream)
        .build()
        .map_err(PipelineError::from)?;

    let stages = config.pipeline.stages;
    let mut pipeline = ConsumerPipeline::new(config.pipeline)
        .with_bus(Arc::new(bus))
        .with_digester(Arc::new(config.algorithm));

    if stages.contains(Stage::Cache) {
        let cache = RedisCacheStore::new(&config.cache.url)
            .await
            .map_err(|e| PipelineError::connection("cache", e))?;
        pipeline = pipeline.with_cache(Arc::new(cache));
    }

    if stages.contains(Stage::Store) {
        let store = PostgresCredentialStore::connect(
            &config.database.url,
            config.database.min_connections,
            config.database.max_connections,
        )
        .await
        .map_err(|e| PipelineError::connection("store", e))?;
        store.migrate().await?;
        pipeline = pipeline.with_store(Arc::new(store));
    }

    let running = pipeline.start().await?;
    tracing::info!("Consumer running, press Ctrl+C to stop");

    shutdown_signal().await;

    let report = running.shutdown().await;
    let received: u64 = report.dispatchers.iter().map(|stats| stats.received).sum();
    let processed: u64 = report.workers.iter().map(|exit| exit.processed()).sum();
    let failed = report.workers.iter().filter(|exit| exit.is_failure()).count();
    tracing::info!(received, processed, failed_workers = failed, "Consumer stopped");

    Ok(())
}
