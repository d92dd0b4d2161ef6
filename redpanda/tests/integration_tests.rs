//! Integration tests for [`RedpandaBus`] against a real Kafka broker.
//!
//! # Running These Tests
//!
//! These tests are marked `#[ignore]` because they need Docker and take
//! 15-60 seconds each to bring Kafka up.
//!
//! ```bash
//! cargo test -p credflow-redpanda --test integration_tests -- --ignored
//! ```

#![allow(clippy::expect_used)]
#![allow(clippy::panic)]

use credflow_core::bus::{BusMessage, MessageBus, MessageStream};
use credflow_redpanda::RedpandaBus;
use futures::StreamExt;
use std::collections::HashSet;
use std::time::Duration;
use testcontainers::runners::AsyncRunner;
use testcontainers::{ContainerAsync, ImageExt};
use testcontainers_modules::kafka::{KAFKA_PORT, Kafka};

const STREAM: &str = "credflow-test";

async fn start_kafka() -> (ContainerAsync<Kafka>, String) {
    let kafka = Kafka::default()
        .with_env_var("KAFKA_AUTO_CREATE_TOPICS_ENABLE", "true")
        .start()
        .await
        .expect("Failed to start Kafka container");

    let host = kafka.get_host().await.expect("Failed to get host");
    let port = kafka
        .get_host_port_ipv4(KAFKA_PORT)
        .await
        .expect("Failed to get port");

    (kafka, format!("{host}:{port}"))
}

fn bus(brokers: &str) -> RedpandaBus {
    RedpandaBus::builder()
        .brokers(brokers)
        .stream(STREAM)
        .auto_offset_reset("latest")
        .build()
        .expect("Failed to create bus")
}

/// Publish until the broker accepts, which also auto-creates the stream topic.
async fn wait_for_stream(bus: &RedpandaBus) {
    for attempt in 1..=60 {
        if bus.publish("warmup", vec![0]).await.is_ok() {
            tokio::time::sleep(Duration::from_secs(3)).await;
            return;
        }
        tokio::time::sleep(Duration::from_millis(500)).await;
        assert!(attempt != 60, "Kafka never accepted a publish");
    }
}

/// Collect `count` messages or give up after `limit`.
async fn collect(stream: &mut MessageStream, count: usize, limit: Duration) -> Vec<BusMessage> {
    let mut received = Vec::new();
    let _ = tokio::time::timeout(limit, async {
        while received.len() < count {
            match stream.next().await {
                Some(Ok(msg)) => received.push(msg),
                Some(Err(e)) => panic!("Stream error: {e}"),
                None => break,
            }
        }
    })
    .await;
    received
}

#[tokio::test]
#[ignore = "requires Docker"]
async fn subscription_receives_only_matching_subjects() {
    let (_kafka, brokers) = start_kafka().await;
    let bus = bus(&brokers);
    wait_for_stream(&bus).await;

    let mut stream = bus.subscribe("logins.*").await.expect("Failed to subscribe");
    // Let the consumer join and get its partitions.
    tokio::time::sleep(Duration::from_secs(5)).await;

    bus.publish("logins.a", b"first".to_vec()).await.expect("publish a");
    bus.publish("audits.b", b"ignored".to_vec()).await.expect("publish b");
    bus.publish("logins.c", b"second".to_vec()).await.expect("publish c");

    let received = collect(&mut stream, 2, Duration::from_secs(20)).await;

    assert_eq!(
        received,
        vec![
            BusMessage::new("logins.a", b"first".to_vec()),
            BusMessage::new("logins.c", b"second".to_vec()),
        ]
    );
}

#[tokio::test]
#[ignore = "requires Docker"]
async fn broadcast_subscriptions_each_receive_every_message() {
    let (_kafka, brokers) = start_kafka().await;
    let bus = bus(&brokers);
    wait_for_stream(&bus).await;

    let mut first = bus.subscribe("logins").await.expect("subscribe first");
    let mut second = bus.subscribe("logins").await.expect("subscribe second");
    tokio::time::sleep(Duration::from_secs(5)).await;

    for i in 0..5u8 {
        bus.publish("logins", vec![i]).await.expect("publish");
    }

    let a = collect(&mut first, 5, Duration::from_secs(20)).await;
    let b = collect(&mut second, 5, Duration::from_secs(20)).await;

    assert_eq!(a.len(), 5);
    assert_eq!(a, b);
}

#[tokio::test]
#[ignore = "requires Docker"]
async fn queue_group_members_split_messages_without_duplicates() {
    let (_kafka, brokers) = start_kafka().await;
    let bus = bus(&brokers);
    wait_for_stream(&bus).await;

    let mut first = bus
        .subscribe_group("logins.*", "workers")
        .await
        .expect("subscribe first");
    let mut second = bus
        .subscribe_group("logins.*", "workers")
        .await
        .expect("subscribe second");
    // Both members must finish the rebalance before anything is published.
    tokio::time::sleep(Duration::from_secs(10)).await;

    for i in 0..10 {
        bus.publish(&format!("logins.{i}"), vec![1]).await.expect("publish");
    }

    let mut subjects = Vec::new();
    for stream in [&mut first, &mut second] {
        let got = collect(stream, 10, Duration::from_secs(8)).await;
        subjects.extend(got.into_iter().map(|m| m.subject));
    }

    let unique: HashSet<_> = subjects.iter().cloned().collect();
    assert_eq!(subjects.len(), 10, "each message delivered exactly once");
    assert_eq!(unique.len(), 10);
}
