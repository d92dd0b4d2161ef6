//! Message bus abstraction.
//!
//! The bus is the transport between publishers and dispatchers. It carries
//! opaque payloads under dot-separated subjects and supports two consumption
//! models:
//!
//! - [`MessageBus::subscribe`]: broadcast. Every subscription receives every
//!   matching message.
//! - [`MessageBus::subscribe_group`]: competing consumers. Each matching message
//!   is delivered to exactly one subscription sharing the same group name.
//!
//! Delivery is at-most-once. A publish acknowledges hand-off to the transport,
//! not downstream processing.
//!
//! # Implementations
//!
//! - `InMemoryBus` (`credflow-testing`): in-process, used by tests
//! - `RedpandaBus` (`credflow-redpanda`): Kafka-compatible, used in production
//!
//! # Example
//!
//! ```rust,ignore
//! use credflow_core::bus::MessageBus;
//! use futures::StreamExt;
//!
//! async fn example(bus: impl MessageBus) -> Result<(), Box<dyn std::error::Error>> {
//!     bus.publish("logins.1234", b"{}".to_vec()).await?;
//!
//!     let mut stream = bus.subscribe_group("logins.>", "login_workers").await?;
//!     while let Some(result) = stream.next().await {
//!         match result {
//!             Ok(msg) => println!("{} ({} bytes)", msg.subject, msg.payload.len()),
//!             Err(e) => eprintln!("Error: {e}"),
//!         }
//!     }
//!     Ok(())
//! }
//! ```

use futures::Stream;
use std::future::Future;
use std::pin::Pin;
use thiserror::Error;

/// Errors that can occur during bus operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BusError {
    /// Failed to connect to the bus
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// Failed to publish a message
    #[error("Publish failed for subject '{subject}': {reason}")]
    PublishFailed {
        /// The subject that failed
        subject: String,
        /// The reason for failure
        reason: String,
    },

    /// Failed to register a subscription
    #[error("Subscription failed for pattern '{pattern}': {reason}")]
    SubscriptionFailed {
        /// The pattern that failed
        pattern: String,
        /// The reason for failure
        reason: String,
    },

    /// Network or transport error while receiving
    #[error("Transport error: {0}")]
    Transport(String),
}

/// A message received from the bus.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BusMessage {
    /// Subject the message was published under.
    pub subject: String,
    /// Raw payload bytes.
    pub payload: Vec<u8>,
}

impl BusMessage {
    /// Create a message.
    #[must_use]
    pub fn new(subject: impl Into<String>, payload: Vec<u8>) -> Self {
        Self {
            subject: subject.into(),
            payload,
        }
    }
}

/// Stream of messages from a subscription.
pub type MessageStream = Pin<Box<dyn Stream<Item = Result<BusMessage, BusError>> + Send>>;

/// Boxed future returned by [`MessageBus`] methods.
pub type BusFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, BusError>> + Send + 'a>>;

/// Trait for message bus implementations.
///
/// # Thread Safety
///
/// Implementations must be `Send + Sync`: a single handle may be shared by
/// every publisher worker and every dispatcher instance of a pool.
///
/// # Dyn Compatibility
///
/// Methods return boxed futures so that the bus can be used as
/// `Arc<dyn MessageBus>`.
pub trait MessageBus: Send + Sync {
    /// Publish `payload` under `subject`.
    ///
    /// # Errors
    ///
    /// Returns [`BusError::PublishFailed`] if the transport rejects the message
    /// or [`BusError::ConnectionFailed`] if the connection is gone.
    fn publish(&self, subject: &str, payload: Vec<u8>) -> BusFuture<'_, ()>;

    /// Subscribe to `pattern` with broadcast semantics.
    ///
    /// # Errors
    ///
    /// Returns [`BusError::SubscriptionFailed`] if the subscription cannot be
    /// registered.
    fn subscribe(&self, pattern: &str) -> BusFuture<'_, MessageStream>;

    /// Subscribe to `pattern` as a member of queue group `group`.
    ///
    /// # Errors
    ///
    /// Returns [`BusError::SubscriptionFailed`] if the subscription cannot be
    /// registered.
    fn subscribe_group(&self, pattern: &str, group: &str) -> BusFuture<'_, MessageStream>;
}
