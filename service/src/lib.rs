//! Shared wiring for the credflow `producer` and `consumer` binaries.
//!
//! # Usage
//!
//! ```bash
//! # Start Redpanda, Redis and PostgreSQL, then:
//! cargo run -p credflow-service --bin consumer
//! cargo run -p credflow-service --bin producer
//! ```

pub mod config;
pub mod telemetry;

pub use config::{Config, ConfigError};

use credflow_runtime::metrics::{MetricsError, MetricsServer};
use std::net::SocketAddr;
use tokio::signal;

/// Start the Prometheus exporter when an address is configured.
///
/// # Errors
///
/// Returns [`MetricsError`] if the exporter cannot bind or a recorder is
/// already installed.
pub fn start_metrics(addr: Option<SocketAddr>) -> Result<Option<MetricsServer>, MetricsError> {
    addr.map(|addr| {
        let mut server = MetricsServer::new(addr);
        server.start().map(|()| server)
    })
    .transpose()
}

/// Resolve once SIGINT or SIGTERM is received.
///
/// A handler that cannot be installed is logged and never fires.
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(error) = signal::ctrl_c().await {
            tracing::error!(%error, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            },
            Err(error) => {
                tracing::error!(%error, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            },
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => tracing::info!("Received Ctrl+C, shutting down"),
        () = terminate => tracing::info!("Received SIGTERM, shutting down"),
    }
}
