//! Completion tracking for the producer side.
//!
//! Two monotonically increasing counters decide when a producer run is done:
//! `generated` counts events handed to the publisher input queue and `routed`
//! counts events the bus accepted. Both only ever move by one, atomically.
//! [`await_convergence`] polls them on a fixed interval until they agree.

use crate::error::PipelineError;
use crate::metrics::PipelineMetrics;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::time::{Instant, MissedTickBehavior};

/// Shared `generated` / `routed` counters for one producer run.
#[derive(Debug, Default)]
pub struct CompletionTracker {
    generated: AtomicU64,
    routed: AtomicU64,
}

impl CompletionTracker {
    /// Both counters start at zero.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            generated: AtomicU64::new(0),
            routed: AtomicU64::new(0),
        }
    }

    /// Count one event handed to a publisher's input queue.
    pub fn record_generated(&self) {
        self.generated.fetch_add(1, Ordering::SeqCst);
        PipelineMetrics::record_generated();
    }

    /// Count one event accepted by the bus.
    pub fn record_routed(&self) {
        self.routed.fetch_add(1, Ordering::SeqCst);
        PipelineMetrics::record_published();
    }

    /// Read both counters.
    ///
    /// `routed` is read before `generated`. Since an event is always counted
    /// as generated before it can be routed, equal values in the snapshot mean
    /// every event generated at read time had been routed.
    #[must_use]
    pub fn snapshot(&self) -> CounterSnapshot {
        let routed = self.routed.load(Ordering::SeqCst);
        let generated = self.generated.load(Ordering::SeqCst);
        CounterSnapshot { generated, routed }
    }
}

/// Point-in-time view of the completion counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CounterSnapshot {
    /// Events handed to publishers.
    pub generated: u64,
    /// Events accepted by the bus.
    pub routed: u64,
}

impl CounterSnapshot {
    /// `generated == routed`.
    #[must_use]
    pub const fn is_converged(&self) -> bool {
        self.generated == self.routed
    }

    /// Events handed over but not yet routed.
    #[must_use]
    pub const fn in_flight(&self) -> u64 {
        self.generated.saturating_sub(self.routed)
    }
}

/// Poll `tracker` every `poll_interval` until `generated == routed`.
///
/// The first check happens immediately. With `deadline == None` this polls
/// forever if `routed` never catches up (for example after every publisher
/// crashed).
///
/// # Errors
///
/// Returns [`PipelineError::ConvergenceTimeout`] once `deadline` has elapsed
/// without convergence.
pub async fn await_convergence(
    tracker: &CompletionTracker,
    poll_interval: Duration,
    deadline: Option<Duration>,
) -> Result<CounterSnapshot, PipelineError> {
    let started = Instant::now();
    let mut ticker = tokio::time::interval(poll_interval.max(Duration::from_millis(1)));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        ticker.tick().await;

        let snapshot = tracker.snapshot();
        if snapshot.is_converged() {
            tracing::debug!(
                generated = snapshot.generated,
                routed = snapshot.routed,
                "Completion counters converged"
            );
            return Ok(snapshot);
        }

        if let Some(deadline) = deadline {
            if started.elapsed() >= deadline {
                return Err(PipelineError::ConvergenceTimeout { snapshot, deadline });
            }
        }

        tracing::trace!(in_flight = snapshot.in_flight(), "Waiting for routed to catch up");
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::panic)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn counters_start_converged() {
        let tracker = CompletionTracker::new();
        assert_eq!(tracker.snapshot(), CounterSnapshot::default());
        assert!(tracker.snapshot().is_converged());
    }

    #[test]
    fn in_flight_is_the_difference() {
        let tracker = CompletionTracker::new();
        tracker.record_generated();
        tracker.record_generated();
        tracker.record_routed();
        let snapshot = tracker.snapshot();
        assert_eq!(snapshot.in_flight(), 1);
        assert!(!snapshot.is_converged());
    }

    #[tokio::test]
    async fn concurrent_increments_are_not_lost() {
        let tracker = Arc::new(CompletionTracker::new());
        let mut handles = Vec::new();
        for _ in 0..8 {
            let tracker = Arc::clone(&tracker);
            handles.push(tokio::spawn(async move {
                for _ in 0..500 {
                    tracker.record_generated();
                    tracker.record_routed();
                }
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }
        assert_eq!(
            tracker.snapshot(),
            CounterSnapshot {
                generated: 4000,
                routed: 4000
            }
        );
    }

    #[tokio::test]
    async fn convergence_waits_for_routed() {
        let tracker = Arc::new(CompletionTracker::new());
        for _ in 0..3 {
            tracker.record_generated();
        }

        let background = Arc::clone(&tracker);
        tokio::spawn(async move {
            for _ in 0..3 {
                tokio::time::sleep(Duration::from_millis(5)).await;
                background.record_routed();
            }
        });

        let snapshot = await_convergence(&tracker, Duration::from_millis(2), None)
            .await
            .unwrap();
        assert_eq!(snapshot.routed, 3);
    }

    #[tokio::test]
    async fn deadline_turns_a_stall_into_an_error() {
        let tracker = CompletionTracker::new();
        tracker.record_generated();

        let result = await_convergence(
            &tracker,
            Duration::from_millis(5),
            Some(Duration::from_millis(30)),
        )
        .await;

        match result {
            Err(PipelineError::ConvergenceTimeout { snapshot, .. }) => {
                assert_eq!(snapshot.in_flight(), 1);
            },
            other => panic!("expected timeout, got {other:?}"),
        }
    }
}
