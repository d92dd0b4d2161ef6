//! Integration tests for `RedisCacheStore` using testcontainers.
//!
//! # Requirements
//!
//! Docker must be running to execute these tests.

#![allow(clippy::expect_used, clippy::unwrap_used)] // Test code uses expect for clear failure messages

use credflow_core::cache::{CacheRecord, CacheStore};
use credflow_core::event::CredentialEvent;
use credflow_redis::RedisCacheStore;
use std::time::Duration;
use testcontainers::{ContainerAsync, runners::AsyncRunner};
use testcontainers_modules::redis::{REDIS_PORT, Redis};

async fn setup_cache() -> (ContainerAsync<Redis>, RedisCacheStore) {
    let container = Redis::default()
        .start()
        .await
        .expect("Failed to start redis container");

    let port = container
        .get_host_port_ipv4(REDIS_PORT)
        .await
        .expect("Failed to get redis port");

    let cache = RedisCacheStore::new(&format!("redis://127.0.0.1:{port}"))
        .await
        .expect("Failed to connect to redis");
    (container, cache)
}

#[tokio::test]
#[ignore = "requires Docker"]
async fn set_then_get_returns_formatted_value() {
    let (_container, cache) = setup_cache().await;
    let event = CredentialEvent::new("k1", "alice", "hunter2", 0, 0);

    cache
        .set(&CacheRecord::from_event(&event, Duration::from_secs(60)))
        .await
        .unwrap();

    assert_eq!(
        cache.get("k1").await.unwrap().as_deref(),
        Some("Username alice Password hunter2")
    );
}

#[tokio::test]
#[ignore = "requires Docker"]
async fn entries_expire_after_ttl() {
    let (_container, cache) = setup_cache().await;
    let record = CacheRecord {
        key: "short".to_string(),
        value: "v".to_string(),
        ttl: Duration::from_secs(1),
    };

    cache.set(&record).await.unwrap();
    tokio::time::sleep(Duration::from_millis(2100)).await;

    assert_eq!(cache.get("short").await.unwrap(), None);
}

#[tokio::test]
#[ignore = "requires Docker"]
async fn delete_removes_entry() {
    let (_container, cache) = setup_cache().await;
    let record = CacheRecord {
        key: "gone".to_string(),
        value: "v".to_string(),
        ttl: Duration::from_secs(60),
    };

    cache.set(&record).await.unwrap();
    cache.delete("gone").await.unwrap();
    cache.delete("never-there").await.unwrap();

    assert_eq!(cache.get("gone").await.unwrap(), None);
}
