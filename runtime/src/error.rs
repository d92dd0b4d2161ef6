//! Error types for the pipeline runtime.
//!
//! Errors are grouped by how far they reach:
//!
//! - [`PublishError`] and the decode half of
//!   [`CodecError`](credflow_core::event::CodecError) concern one event.
//! - [`StageError`] ends the worker that hit it (see
//!   [`WorkerExit::Failed`](crate::workers::WorkerExit::Failed)).
//! - [`PipelineError`] stops a pipeline or producer run as a whole.

use crate::tracker::CounterSnapshot;
use credflow_core::bus::BusError;
use credflow_core::event::CodecError;
use credflow_core::store::StoreError;
use std::time::Duration;
use thiserror::Error;

/// Failure to hand an event to the bus.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PublishError {
    /// The event could not be encoded.
    #[error("Failed to serialize event: {0}")]
    Serialization(#[from] CodecError),

    /// The bus refused the hand-off or is unreachable.
    #[error("Bus rejected publish: {0}")]
    Bus(#[from] BusError),
}

/// Failure of a single stage call. Fatal to the worker that made it.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StageError {
    /// A cache or durable-store write failed.
    #[error("{stage} write failed: {source}")]
    Write {
        /// Stage that issued the write.
        stage: &'static str,
        /// Underlying store error.
        source: StoreError,
    },

    /// A publisher worker could not publish.
    #[error(transparent)]
    Publish(#[from] PublishError),
}

/// Errors that stop a pipeline or producer run.
#[derive(Error, Debug)]
pub enum PipelineError {
    /// A collaborator was unreachable at startup.
    #[error("Failed to connect to {collaborator}: {reason}")]
    Connection {
        /// Which collaborator (bus, cache, store).
        collaborator: &'static str,
        /// Reason reported by the client.
        reason: String,
    },

    /// A dispatcher could not register its subscription at startup.
    #[error("Subscription failed: {0}")]
    Subscription(BusError),

    /// A required collaborator was not supplied for an active stage.
    #[error("Missing collaborator for {0}")]
    MissingCollaborator(&'static str),

    /// Generated and routed counters did not converge before the deadline.
    #[error(
        "Counters did not converge within {deadline:?} (generated {}, routed {})",
        .snapshot.generated,
        .snapshot.routed
    )]
    ConvergenceTimeout {
        /// Counter values at the last poll.
        snapshot: CounterSnapshot,
        /// Configured deadline.
        deadline: Duration,
    },
}

impl PipelineError {
    /// Connection failure of `collaborator`.
    #[must_use]
    pub fn connection(collaborator: &'static str, reason: impl std::fmt::Display) -> Self {
        Self::Connection {
            collaborator,
            reason: reason.to_string(),
        }
    }
}

impl From<BusError> for PipelineError {
    fn from(error: BusError) -> Self {
        match error {
            BusError::ConnectionFailed(reason) => Self::Connection {
                collaborator: "bus",
                reason,
            },
            other => Self::Subscription(other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn write_error_names_stage() {
        let err = StageError::Write {
            stage: "cache",
            source: StoreError::WriteFailed("timeout".to_string()),
        };
        assert!(err.to_string().starts_with("cache write failed"));
    }

    #[test]
    fn timeout_reports_counters() {
        let err = PipelineError::ConvergenceTimeout {
            snapshot: CounterSnapshot {
                generated: 10,
                routed: 7,
            },
            deadline: Duration::from_secs(1),
        };
        let message = err.to_string();
        assert!(message.contains("generated 10"));
        assert!(message.contains("routed 7"));
    }

    #[test]
    fn bus_connection_failure_is_a_connection_error() {
        let err = PipelineError::from(BusError::ConnectionFailed("refused".to_string()));
        assert!(matches!(
            err,
            PipelineError::Connection { collaborator: "bus", ref reason } if reason == "refused"
        ));

        let err = PipelineError::from(BusError::SubscriptionFailed {
            pattern: "t.>".to_string(),
            reason: "denied".to_string(),
        });
        assert!(matches!(err, PipelineError::Subscription(_)));
    }

    #[test]
    fn store_connection_failure_names_collaborator() {
        let err = PipelineError::connection("store", StoreError::ConnectionFailed("down".to_string()));
        assert_eq!(err.to_string(), "Failed to connect to store: Connection failed: down");
    }
}
