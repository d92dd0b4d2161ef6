//! Prometheus metrics for the credential pipeline.
//!
//! Recording goes through the `metrics` facade and is unconditional: when no
//! recorder is installed every call is a no-op, so tests and library users pay
//! nothing. Binaries install the Prometheus exporter through [`MetricsServer`].
//!
//! # Example
//!
//! ```rust,no_run
//! use credflow_runtime::metrics::MetricsServer;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let mut server = MetricsServer::new("0.0.0.0:9090".parse()?);
//! server.start()?;
//!
//! // Metrics available at http://localhost:9090/metrics
//! # Ok(())
//! # }
//! ```

use metrics::{counter, describe_counter, describe_histogram, histogram};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder, PrometheusHandle};
use std::net::SocketAddr;
use std::time::Duration;
use thiserror::Error;

/// Errors from metrics operations.
#[derive(Error, Debug)]
pub enum MetricsError {
    /// Failed to build metrics exporter
    #[error("Failed to build metrics exporter: {0}")]
    Build(String),
    /// Failed to install metrics exporter
    #[error("Failed to install metrics exporter: {0}")]
    Install(String),
}

/// Prometheus metrics server.
///
/// Exposes metrics on an HTTP endpoint for Prometheus scraping.
pub struct MetricsServer {
    addr: SocketAddr,
    handle: Option<PrometheusHandle>,
}

impl MetricsServer {
    /// Create a new metrics server.
    ///
    /// # Arguments
    ///
    /// * `addr` - Socket address to bind to (e.g., `0.0.0.0:9090`)
    #[must_use]
    pub const fn new(addr: SocketAddr) -> Self {
        Self { addr, handle: None }
    }

    /// Install the global recorder and start serving `/metrics`.
    ///
    /// Must be called from within a Tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns [`MetricsError::Build`] if the exporter cannot be built or its
    /// listener cannot bind, and [`MetricsError::Install`] if a global recorder
    /// is already installed.
    pub fn start(&mut self) -> Result<(), MetricsError> {
        let (recorder, exporter) = PrometheusBuilder::new()
            .with_http_listener(self.addr)
            .set_buckets_for_metric(
                Matcher::Suffix("latency_seconds".to_string()),
                &[
                    0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0,
                ],
            )
            .map_err(|e| MetricsError::Build(e.to_string()))?
            .build()
            .map_err(|e| MetricsError::Build(e.to_string()))?;

        let handle = recorder.handle();
        metrics::set_global_recorder(recorder).map_err(|e| MetricsError::Install(e.to_string()))?;
        register_metrics();

        tokio::spawn(async move {
            // ExporterError implements neither Debug nor Display.
            if exporter.await.is_err() {
                tracing::error!("Metrics exporter stopped");
            }
        });

        self.handle = Some(handle);
        tracing::info!(
            addr = %self.addr,
            "Metrics server started - available at http://{}/metrics",
            self.addr
        );
        Ok(())
    }

    /// Get the metrics handle for rendering.
    #[must_use]
    pub const fn handle(&self) -> Option<&PrometheusHandle> {
        self.handle.as_ref()
    }

    /// Render current metrics in Prometheus format.
    ///
    /// Returns `None` if server hasn't been started.
    #[must_use]
    pub fn render(&self) -> Option<String> {
        self.handle.as_ref().map(PrometheusHandle::render)
    }
}

/// Register all metric descriptions.
fn register_metrics() {
    // Producer
    describe_counter!(
        "credflow_events_generated_total",
        "Events handed to publisher input queues"
    );
    describe_counter!(
        "credflow_events_published_total",
        "Events accepted by the message bus"
    );

    // Dispatcher
    describe_counter!(
        "credflow_messages_dispatched_total",
        "Decoded events pushed into stage queues"
    );
    describe_counter!(
        "credflow_decode_failures_total",
        "Bus payloads dropped because they failed to decode"
    );

    // Stage workers
    describe_counter!(
        "credflow_stage_processed_total",
        "Events processed by a stage worker, labelled by stage"
    );
    describe_counter!(
        "credflow_stage_failures_total",
        "Stage calls that failed and terminated their worker, labelled by stage"
    );
    describe_histogram!(
        "credflow_end_to_end_latency_seconds",
        "Time from event generation to digest computation"
    );
}

/// Pipeline metrics recorder.
pub struct PipelineMetrics;

impl PipelineMetrics {
    /// Record an event handed to a publisher.
    pub fn record_generated() {
        counter!("credflow_events_generated_total").increment(1);
    }

    /// Record an event accepted by the bus.
    pub fn record_published() {
        counter!("credflow_events_published_total").increment(1);
    }

    /// Record an event pushed into the stage queues.
    pub fn record_dispatched() {
        counter!("credflow_messages_dispatched_total").increment(1);
    }

    /// Record a payload dropped on decode.
    pub fn record_decode_failure() {
        counter!("credflow_decode_failures_total").increment(1);
    }

    /// Record one successful stage call.
    pub fn record_processed(stage: &'static str) {
        counter!("credflow_stage_processed_total", "stage" => stage).increment(1);
    }

    /// Record a stage call that ended its worker.
    pub fn record_failure(stage: &'static str) {
        counter!("credflow_stage_failures_total", "stage" => stage).increment(1);
    }

    /// Record generation-to-digest latency.
    pub fn record_latency(latency: Duration) {
        histogram!("credflow_end_to_end_latency_seconds").record(latency.as_secs_f64());
    }
}
