//! # Credflow Core
//!
//! Core types and collaborator traits for the credflow credential pipeline.
//!
//! The pipeline ingests synthetic credential events, publishes them onto a
//! message bus and fans each event out to three independent stages:
//!
//! ```text
//! Generator ─► Publisher ─► Message Bus ─► Dispatcher ─┬─► Digest queue ─► Digest workers
//!                                                      ├─► Cache queue  ─► Cache workers
//!                                                      └─► Store queue  ─► Store workers
//! ```
//!
//! This crate holds everything the stages agree on:
//!
//! - [`event::CredentialEvent`]: the immutable unit of work and its JSON wire format
//! - [`routing`]: routing keys and the two subscription modes (broadcast, queue-group)
//! - [`bus::MessageBus`], [`cache::CacheStore`], [`store::DurableStore`]: the
//!   external collaborators the pipeline calls
//! - [`digest`]: the digest primitive used by the digest stage
//! - [`environment::Clock`]: time abstraction for deterministic tests
//!
//! Concrete collaborators live in sibling crates (`credflow-redpanda`,
//! `credflow-redis`, `credflow-postgres`) and in-memory doubles live in
//! `credflow-testing`.

pub mod bus;
pub mod cache;
pub mod digest;
pub mod event;
pub mod routing;
pub mod store;

// Re-export commonly used types
pub use chrono::{DateTime, Utc};

/// Environment module - Dependency injection traits
///
/// External dependencies that tests need to control are abstracted behind
/// traits and handed to the components that use them.
pub mod environment {
    use chrono::{DateTime, Utc};

    /// Clock trait - abstracts time operations for testability
    ///
    /// # Examples
    ///
    /// ```
    /// use credflow_core::environment::{Clock, SystemClock};
    ///
    /// let clock = SystemClock;
    /// assert!(clock.now_millis() > 0);
    /// ```
    pub trait Clock: Send + Sync {
        /// Get the current time
        fn now(&self) -> DateTime<Utc>;

        /// Current time as Unix milliseconds, the unit used on the wire.
        fn now_millis(&self) -> i64 {
            self.now().timestamp_millis()
        }
    }

    /// Production clock backed by the system time.
    #[derive(Debug, Clone, Copy, Default)]
    pub struct SystemClock;

    impl Clock for SystemClock {
        fn now(&self) -> DateTime<Utc> {
            Utc::now()
        }
    }
}
