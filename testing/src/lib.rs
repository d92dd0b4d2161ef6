//! # Credflow Testing
//!
//! In-memory collaborators for exercising the credflow pipeline without a
//! broker, a cache server or a database.
//!
//! This crate provides:
//! - [`InMemoryBus`]: broadcast and queue-group delivery over subject patterns
//! - [`RecordingCache`], [`RecordingStore`], [`RecordingDigester`]: collaborators
//!   that log every call and can be told to fail
//! - [`FixedClock`]: deterministic time
//!
//! ## Example
//!
//! ```
//! use credflow_core::bus::MessageBus;
//! use credflow_testing::InMemoryBus;
//! use futures::StreamExt;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let bus = InMemoryBus::new();
//! let mut stream = bus.subscribe("logins.*").await?;
//!
//! bus.publish("logins.a", b"{}".to_vec()).await?;
//!
//! let msg = stream.next().await.unwrap()?;
//! assert_eq!(msg.subject, "logins.a");
//! # Ok(())
//! # }
//! ```

pub mod bus;
pub mod recording;

pub use bus::InMemoryBus;
pub use recording::{RecordingCache, RecordingDigester, RecordingStore};

use chrono::{DateTime, Utc};
use credflow_core::environment::Clock;

/// Mock implementations of Environment traits
pub mod mocks {
    use super::{Clock, DateTime, Utc};

    /// Fixed clock for deterministic tests
    ///
    /// Always returns the same time, making tests reproducible.
    ///
    /// # Example
    ///
    /// ```
    /// use credflow_testing::mocks::FixedClock;
    /// use credflow_core::environment::Clock;
    /// use chrono::Utc;
    ///
    /// let clock = FixedClock::new(Utc::now());
    /// let time1 = clock.now();
    /// let time2 = clock.now();
    /// assert_eq!(time1, time2); // Always the same!
    /// ```
    #[derive(Debug, Clone)]
    pub struct FixedClock {
        time: DateTime<Utc>,
    }

    impl FixedClock {
        /// Create a new fixed clock with the given time
        #[must_use]
        pub const fn new(time: DateTime<Utc>) -> Self {
            Self { time }
        }
    }

    impl Clock for FixedClock {
        fn now(&self) -> DateTime<Utc> {
            self.time
        }
    }

    /// Create a default fixed clock for tests (2025-01-01 00:00:00 UTC)
    ///
    /// # Panics
    ///
    /// This function will panic if the hardcoded timestamp fails to parse,
    /// which should never happen in practice.
    #[must_use]
    #[allow(clippy::expect_used)]
    pub fn test_clock() -> FixedClock {
        FixedClock::new(
            DateTime::parse_from_rfc3339("2025-01-01T00:00:00Z")
                .expect("hardcoded timestamp should always parse")
                .with_timezone(&Utc),
        )
    }
}

// Re-export commonly used items
pub use mocks::{FixedClock, test_clock};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fixed_clock() {
        let clock = test_clock();
        let time1 = clock.now();
        let time2 = clock.now();
        assert_eq!(time1, time2);
        assert_eq!(clock.now_millis(), 1_735_689_600_000);
    }
}
