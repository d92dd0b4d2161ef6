//! Redpanda message bus for credflow.
//!
//! [`RedpandaBus`] implements [`MessageBus`] on top of rdkafka, so it works
//! against Redpanda or any other Kafka-compatible broker.
//!
//! # Subject mapping
//!
//! Kafka has no subject hierarchy, so every credflow subject travels through a
//! single Kafka topic (the bus *stream*, default [`DEFAULT_STREAM`]):
//!
//! - the record key carries the subject (`credflow.logins.<id>`)
//! - the record payload carries the JSON wire bytes untouched
//! - subscribers filter records by key with [`subject_matches`]
//!
//! Per-event keys spread queue-group traffic over every partition of the
//! stream. Broadcast traffic uses the bare topic as key and lands on one
//! partition.
//!
//! # Delivery Semantics
//!
//! **At-most-once**. Offsets are committed when a record is read, before it is
//! handed to the subscriber. A crash between commit and processing loses the
//! record; nothing is ever redelivered.
//!
//! - [`MessageBus::subscribe`] joins a fresh consumer group per call, so every
//!   subscription sees every record.
//! - [`MessageBus::subscribe_group`] uses the queue-group name as the Kafka
//!   `group.id`; partitions are balanced across the group's members.
//!
//! # Example
//!
//! ```no_run
//! use credflow_core::bus::MessageBus;
//! use credflow_redpanda::RedpandaBus;
//! use futures::StreamExt;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let bus = RedpandaBus::new("localhost:9092")?;
//!
//! let mut stream = bus.subscribe_group("credflow.logins.>", "login_workers").await?;
//! bus.publish("credflow.logins.1234", b"{}".to_vec()).await?;
//!
//! while let Some(result) = stream.next().await {
//!     match result {
//!         Ok(msg) => println!("{}: {} bytes", msg.subject, msg.payload.len()),
//!         Err(e) => eprintln!("Error: {e}"),
//!     }
//! }
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

use credflow_core::bus::{BusError, BusFuture, BusMessage, MessageBus, MessageStream};
use credflow_core::routing::subject_matches;
use rdkafka::config::ClientConfig;
use rdkafka::consumer::{CommitMode, Consumer, StreamConsumer};
use rdkafka::message::{BorrowedMessage, Message};
use rdkafka::producer::{FutureProducer, FutureRecord};
use rdkafka::util::Timeout;
use std::time::Duration;

/// Kafka topic used when none is configured.
pub const DEFAULT_STREAM: &str = "credflow";

const DEFAULT_BUFFER_SIZE: usize = 1000;
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

/// [`MessageBus`] backed by a Kafka-compatible broker.
///
/// One producer is shared by every publisher. Each subscription owns its own
/// consumer, running on a spawned task that forwards matching records through
/// a bounded channel.
///
/// # Example
///
/// ```no_run
/// use credflow_redpanda::RedpandaBus;
/// use std::time::Duration;
///
/// # fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let bus = RedpandaBus::builder()
///     .brokers("localhost:9092,localhost:9093")
///     .stream("credflow-logins")
///     .producer_acks("all")
///     .compression("lz4")
///     .timeout(Duration::from_secs(10))
///     .build()?;
/// # Ok(())
/// # }
/// ```
pub struct RedpandaBus {
    /// Producer shared by all publishes
    producer: FutureProducer,
    /// Broker addresses (for creating consumers)
    brokers: String,
    /// Kafka topic carrying every subject
    stream: String,
    /// Producer send timeout
    timeout: Duration,
    /// Records buffered per subscription
    buffer_size: usize,
    /// Where fresh consumer groups start reading
    auto_offset_reset: String,
}

impl RedpandaBus {
    /// Create a bus with default configuration.
    ///
    /// # Errors
    ///
    /// Returns [`BusError::ConnectionFailed`] if the producer cannot be created.
    pub fn new(brokers: &str) -> Result<Self, BusError> {
        Self::builder().brokers(brokers).build()
    }

    /// Create a builder for configuring the bus.
    #[must_use]
    pub fn builder() -> RedpandaBusBuilder {
        RedpandaBusBuilder::default()
    }

    /// Broker addresses this bus talks to.
    #[must_use]
    pub fn brokers(&self) -> &str {
        &self.brokers
    }

    /// Kafka topic carrying every subject.
    #[must_use]
    pub fn stream(&self) -> &str {
        &self.stream
    }

    fn open_consumer(
        &self,
        pattern: &str,
        group_id: &str,
    ) -> Result<StreamConsumer, BusError> {
        let failed = |reason: String| BusError::SubscriptionFailed {
            pattern: pattern.to_string(),
            reason,
        };

        let consumer: StreamConsumer = ClientConfig::new()
            .set("bootstrap.servers", &self.brokers)
            .set("group.id", group_id)
            .set("enable.auto.commit", "false")
            .set("auto.offset.reset", &self.auto_offset_reset)
            .set("session.timeout.ms", "6000")
            .set("enable.partition.eof", "false")
            .create()
            .map_err(|e| failed(format!("Failed to create consumer: {e}")))?;

        consumer
            .subscribe(&[self.stream.as_str()])
            .map_err(|e| failed(format!("Failed to subscribe to {}: {e}", self.stream)))?;

        Ok(consumer)
    }

    fn open_stream(&self, pattern: &str, group_id: String) -> BusFuture<'_, MessageStream> {
        let pattern = pattern.to_string();

        Box::pin(async move {
            let consumer = self.open_consumer(&pattern, &group_id)?;

            tracing::info!(
                stream = %self.stream,
                pattern = %pattern,
                consumer_group = %group_id,
                buffer_size = self.buffer_size,
                "Subscribed"
            );

            let (tx, rx) = tokio::sync::mpsc::channel(self.buffer_size);
            tokio::spawn(forward_records(consumer, pattern, tx));

            let stream = async_stream::stream! {
                let mut rx = rx;
                while let Some(result) = rx.recv().await {
                    yield result;
                }
            };

            Ok(Box::pin(stream) as MessageStream)
        })
    }
}

/// Builder for configuring a [`RedpandaBus`].
#[derive(Default)]
pub struct RedpandaBusBuilder {
    brokers: Option<String>,
    stream: Option<String>,
    producer_acks: Option<String>,
    compression: Option<String>,
    timeout: Option<Duration>,
    buffer_size: Option<usize>,
    auto_offset_reset: Option<String>,
}

impl RedpandaBusBuilder {
    /// Set the broker addresses.
    ///
    /// # Parameters
    ///
    /// - `brokers`: Comma-separated list of broker addresses (e.g., "localhost:9092")
    #[must_use]
    pub fn brokers(mut self, brokers: impl Into<String>) -> Self {
        self.brokers = Some(brokers.into());
        self
    }

    /// Set the Kafka topic that carries every subject.
    ///
    /// Default: [`DEFAULT_STREAM`]
    #[must_use]
    pub fn stream(mut self, stream: impl Into<String>) -> Self {
        self.stream = Some(stream.into());
        self
    }

    /// Set the producer acknowledgment mode.
    ///
    /// - `acks`: "0" (no acks), "1" (leader ack), "all" (all replicas ack)
    ///
    /// Default: "1"
    #[must_use]
    pub fn producer_acks(mut self, acks: impl Into<String>) -> Self {
        self.producer_acks = Some(acks.into());
        self
    }

    /// Set the compression codec.
    ///
    /// - `compression`: "none", "gzip", "snappy", "lz4", "zstd"
    ///
    /// Default: "none"
    #[must_use]
    pub fn compression(mut self, compression: impl Into<String>) -> Self {
        self.compression = Some(compression.into());
        self
    }

    /// Set the producer send timeout.
    ///
    /// Default: 5 seconds
    #[must_use]
    pub const fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Set how many records each subscription buffers ahead of its reader.
    ///
    /// Zero is treated as one. Default: 1000
    #[must_use]
    pub const fn buffer_size(mut self, buffer_size: usize) -> Self {
        self.buffer_size = Some(buffer_size);
        self
    }

    /// Set where a consumer group without committed offsets starts reading.
    ///
    /// - `"earliest"`: from the beginning of the stream
    /// - `"latest"`: only records published after subscribing
    ///
    /// Default: "latest"
    #[must_use]
    pub fn auto_offset_reset(mut self, policy: impl Into<String>) -> Self {
        self.auto_offset_reset = Some(policy.into());
        self
    }

    /// Build the [`RedpandaBus`].
    ///
    /// # Errors
    ///
    /// Returns [`BusError::ConnectionFailed`] if brokers are not set or the
    /// producer cannot be created.
    pub fn build(self) -> Result<RedpandaBus, BusError> {
        let brokers = self
            .brokers
            .ok_or_else(|| BusError::ConnectionFailed("Brokers not configured".to_string()))?;
        let timeout = self.timeout.unwrap_or(DEFAULT_TIMEOUT);
        let acks = self.producer_acks.as_deref().unwrap_or("1");
        let compression = self.compression.as_deref().unwrap_or("none");

        let producer: FutureProducer = ClientConfig::new()
            .set("bootstrap.servers", &brokers)
            .set("message.timeout.ms", timeout.as_millis().to_string())
            .set("acks", acks)
            .set("compression.type", compression)
            .create()
            .map_err(|e| BusError::ConnectionFailed(format!("Failed to create producer: {e}")))?;

        let bus = RedpandaBus {
            producer,
            brokers,
            stream: self.stream.unwrap_or_else(|| DEFAULT_STREAM.to_string()),
            timeout,
            buffer_size: self.buffer_size.unwrap_or(DEFAULT_BUFFER_SIZE).max(1),
            auto_offset_reset: self.auto_offset_reset.unwrap_or_else(|| "latest".to_string()),
        };

        tracing::info!(
            brokers = %bus.brokers,
            stream = %bus.stream,
            acks,
            compression,
            buffer_size = bus.buffer_size,
            auto_offset_reset = %bus.auto_offset_reset,
            "RedpandaBus created"
        );

        Ok(bus)
    }
}

impl MessageBus for RedpandaBus {
    fn publish(&self, subject: &str, payload: Vec<u8>) -> BusFuture<'_, ()> {
        let subject = subject.to_string();

        Box::pin(async move {
            let record = FutureRecord::to(&self.stream).key(&subject).payload(&payload);

            match self.producer.send(record, Timeout::After(self.timeout)).await {
                Ok((partition, offset)) => {
                    tracing::trace!(
                        subject = %subject,
                        partition,
                        offset,
                        "Published"
                    );
                    Ok(())
                },
                Err((kafka_error, _)) => {
                    tracing::error!(
                        subject = %subject,
                        error = %kafka_error,
                        "Failed to publish"
                    );
                    Err(BusError::PublishFailed {
                        subject,
                        reason: kafka_error.to_string(),
                    })
                },
            }
        })
    }

    fn subscribe(&self, pattern: &str) -> BusFuture<'_, MessageStream> {
        let group_id = format!("credflow-broadcast-{}", uuid::Uuid::new_v4());
        self.open_stream(pattern, group_id)
    }

    fn subscribe_group(&self, pattern: &str, group: &str) -> BusFuture<'_, MessageStream> {
        self.open_stream(pattern, group.to_string())
    }
}

/// Subject carried by a record, if its key is UTF-8.
fn record_subject<'a>(message: &'a BorrowedMessage<'_>) -> Option<&'a str> {
    message.key().and_then(|key| std::str::from_utf8(key).ok())
}

/// Own `consumer`, forwarding records whose subject matches `pattern`.
///
/// Exits when the receiving side of `tx` is dropped.
async fn forward_records(
    consumer: StreamConsumer,
    pattern: String,
    tx: tokio::sync::mpsc::Sender<Result<BusMessage, BusError>>,
) {
    use futures::StreamExt;

    let mut stream = consumer.stream();

    while let Some(msg_result) = stream.next().await {
        let forwarded = match msg_result {
            Ok(message) => {
                // Commit on read: a record is never delivered twice.
                if let Err(e) = consumer.commit_message(&message, CommitMode::Async) {
                    tracing::warn!(
                        partition = message.partition(),
                        offset = message.offset(),
                        error = %e,
                        "Failed to commit offset"
                    );
                }

                match record_subject(&message) {
                    Some(subject) if subject_matches(&pattern, subject) => {
                        let payload = message.payload().map(<[u8]>::to_vec).unwrap_or_default();
                        tracing::trace!(
                            subject,
                            partition = message.partition(),
                            offset = message.offset(),
                            "Received"
                        );
                        Some(Ok(BusMessage::new(subject, payload)))
                    },
                    _ => None,
                }
            },
            Err(e) => Some(Err(BusError::Transport(format!(
                "Failed to receive message: {e}"
            )))),
        };

        if let Some(item) = forwarded {
            if tx.send(item).await.is_err() {
                tracing::debug!(pattern = %pattern, "Subscriber dropped, closing consumer");
                break;
            }
        }
    }

    tracing::debug!(pattern = %pattern, "Consumer task exiting");
}
