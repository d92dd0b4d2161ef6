//! Integration tests for the consumer pipeline
//!
//! Runs dispatchers and stage workers against the in-memory bus and recording
//! collaborators, covering both delivery modes, the drop-on-decode-failure
//! policy and the fatal-on-write-error policy.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)] // Test code can use unwrap/expect/panic

use credflow_core::digest::DigestAlgorithm;
use credflow_core::event::CredentialEvent;
use credflow_core::routing::SubscriptionMode;
use credflow_runtime::pipeline::{ConsumerPipeline, PipelineConfig, RunningPipeline};
use credflow_runtime::publisher::Publisher;
use credflow_runtime::stages::{Stage, StageSet};
use credflow_runtime::workers::{WorkerExit, WorkerState};
use credflow_testing::{InMemoryBus, RecordingCache, RecordingDigester, RecordingStore};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

const TOPIC: &str = "logins";

// ============================================================================
// Test Fixtures
// ============================================================================

struct Harness {
    bus: InMemoryBus,
    digester: RecordingDigester,
    cache: RecordingCache,
    store: RecordingStore,
}

impl Harness {
    fn new() -> Self {
        Self {
            bus: InMemoryBus::new(),
            digester: RecordingDigester::new(DigestAlgorithm::Sha256),
            cache: RecordingCache::new(),
            store: RecordingStore::new(),
        }
    }

    async fn start(&self, config: PipelineConfig) -> RunningPipeline {
        ConsumerPipeline::new(config.with_topic(TOPIC))
            .with_bus(Arc::new(self.bus.clone()))
            .with_digester(Arc::new(self.digester.clone()))
            .with_cache(Arc::new(self.cache.clone()))
            .with_store(Arc::new(self.store.clone()))
            .start()
            .await
            .expect("pipeline should start")
    }

    fn publisher(&self, mode: SubscriptionMode) -> Publisher {
        Publisher::new(Arc::new(self.bus.clone()), TOPIC, mode)
    }
}

fn single_worker_config(mode: SubscriptionMode) -> PipelineConfig {
    PipelineConfig::default()
        .with_mode(mode)
        .with_dispatchers(1)
        .with_workers(Stage::Digest, 1)
        .with_workers(Stage::Cache, 1)
        .with_workers(Stage::Store, 1)
}

fn event(id: &str) -> CredentialEvent {
    CredentialEvent::new(id, format!("user-{id}"), format!("pw-{id}"), 0, 0)
}

fn events(count: usize) -> Vec<CredentialEvent> {
    (0..count).map(|i| event(&format!("e{i}"))).collect()
}

/// Wait until the dispatchers of `running` have taken in `expected` items.
async fn wait_for_received(running: &RunningPipeline, expected: u64) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while running.received() < expected {
            tokio::time::sleep(Duration::from_millis(2)).await;
        }
    })
    .await
    .expect("dispatchers did not receive every message in time");
}

// ============================================================================
// Delivery modes
// ============================================================================

#[tokio::test]
async fn queue_group_partitions_events_across_dispatchers() {
    let harness = Harness::new();
    let mode = SubscriptionMode::queue_group("login_workers");
    let running = harness
        .start(
            PipelineConfig::default()
                .with_mode(mode.clone())
                .with_dispatchers(3),
        )
        .await;

    let publisher = harness.publisher(mode);
    for event in events(30) {
        publisher.publish(&event).await.unwrap();
    }
    wait_for_received(&running, 30).await;

    let report = running.shutdown().await;

    let received: u64 = report.dispatchers.iter().map(|d| d.received).sum();
    assert_eq!(received, 30);
    assert!(
        report.dispatchers.iter().all(|d| d.received < 30),
        "load should be split, not duplicated"
    );

    let ids = harness.store.inserted_ids();
    let unique: HashSet<_> = ids.iter().collect();
    assert_eq!(ids.len(), 30);
    assert_eq!(unique.len(), 30);
}

#[tokio::test]
async fn queue_group_delivers_ids_containing_dots() {
    let harness = Harness::new();
    let mode = SubscriptionMode::queue_group("login_workers");
    let running = harness.start(single_worker_config(mode.clone())).await;

    harness
        .publisher(mode)
        .publish(&event("a.b"))
        .await
        .unwrap();
    wait_for_received(&running, 1).await;

    let report = running.shutdown().await;
    assert_eq!(report.dispatchers[0].routed, 1);
    assert_eq!(harness.store.inserted_ids(), vec!["a.b".to_string()]);
}

#[tokio::test]
async fn broadcast_replicates_events_to_every_dispatcher() {
    let harness = Harness::new();
    let running = harness
        .start(
            PipelineConfig::default()
                .with_mode(SubscriptionMode::Broadcast)
                .with_dispatchers(3),
        )
        .await;

    let publisher = harness.publisher(SubscriptionMode::Broadcast);
    for event in events(10) {
        publisher.publish(&event).await.unwrap();
    }
    wait_for_received(&running, 30).await;

    let report = running.shutdown().await;

    assert!(report.dispatchers.iter().all(|d| d.received == 10));

    let mut per_id: HashMap<String, usize> = HashMap::new();
    for id in harness.store.inserted_ids() {
        *per_id.entry(id).or_default() += 1;
    }
    assert_eq!(per_id.len(), 10);
    assert!(per_id.values().all(|count| *count == 3));
}

// ============================================================================
// End to end
// ============================================================================

#[tokio::test]
async fn every_stage_sees_every_event() {
    let harness = Harness::new();
    let mode = SubscriptionMode::queue_group("login_workers");
    let running = harness.start(single_worker_config(mode.clone())).await;

    let publisher = harness.publisher(mode);
    for id in ["a", "b", "c"] {
        publisher.publish(&event(id)).await.unwrap();
    }
    wait_for_received(&running, 3).await;

    let report = running.shutdown().await;
    assert!(report.workers.iter().all(|exit| !exit.is_failure()));

    assert_eq!(harness.store.inserted_ids(), vec!["a", "b", "c"]);
    assert_eq!(harness.cache.keys(), vec!["a", "b", "c"]);
    assert_eq!(
        harness.digester.inputs(),
        vec!["user-a:pw-a", "user-b:pw-b", "user-c:pw-c"]
    );
    assert_eq!(harness.cache.sets()[0].value, "Username user-a Password pw-a");
}

#[tokio::test]
async fn shutdown_drains_queued_events() {
    let harness = Harness::new();
    let mode = SubscriptionMode::queue_group("login_workers");
    let running = harness
        .start(single_worker_config(mode.clone()).with_queue_capacity(16))
        .await;

    let publisher = harness.publisher(mode);
    for event in events(12) {
        publisher.publish(&event).await.unwrap();
    }
    wait_for_received(&running, 12).await;

    let report = running.shutdown().await;

    let processed: u64 = report.workers.iter().map(WorkerExit::processed).sum();
    assert_eq!(processed, 36);
    assert_eq!(harness.store.insert_count(), 12);
}

#[tokio::test]
async fn partial_topology_only_runs_active_stages() {
    let harness = Harness::new();
    let mode = SubscriptionMode::queue_group("login_workers");
    let running = harness
        .start(single_worker_config(mode.clone()).with_stages(StageSet::only(&[Stage::Digest])))
        .await;

    harness.publisher(mode).publish(&event("a")).await.unwrap();
    wait_for_received(&running, 1).await;
    running.shutdown().await;

    assert_eq!(harness.digester.call_count(), 1);
    assert_eq!(harness.cache.set_count(), 0);
    assert_eq!(harness.store.insert_count(), 0);
}

// ============================================================================
// Error policies
// ============================================================================

#[tokio::test]
async fn malformed_payload_is_dropped_without_reaching_stages() {
    let harness = Harness::new();
    let running = harness
        .start(single_worker_config(SubscriptionMode::Broadcast))
        .await;

    let missing_uuid = br#"{"username":"u","password":"p","timestamp":1,"sequence":0}"#;
    harness.bus.inject_raw(TOPIC, missing_uuid.to_vec());
    harness
        .publisher(SubscriptionMode::Broadcast)
        .publish(&event("ok"))
        .await
        .unwrap();
    wait_for_received(&running, 2).await;

    let report = running.shutdown().await;

    assert_eq!(report.dispatchers[0].dropped, 1);
    assert_eq!(report.dispatchers[0].routed, 1);
    assert_eq!(harness.store.inserted_ids(), vec!["ok"]);
    assert_eq!(harness.cache.keys(), vec!["ok"]);
    assert_eq!(harness.digester.call_count(), 1);
}

#[tokio::test]
async fn duplicate_publish_yields_duplicate_inserts() {
    let harness = Harness::new();
    let mode = SubscriptionMode::queue_group("login_workers");
    let running = harness.start(single_worker_config(mode.clone())).await;

    let publisher = harness.publisher(mode);
    let event = event("dup");
    publisher.publish(&event).await.unwrap();
    publisher.publish(&event).await.unwrap();
    wait_for_received(&running, 2).await;
    running.shutdown().await;

    assert_eq!(harness.store.inserted_ids(), vec!["dup", "dup"]);
}

#[tokio::test]
async fn cache_write_failure_terminates_only_the_cache_worker() {
    let harness = Harness::new();
    harness.cache.fail_after(1, "connection reset by peer");
    let mode = SubscriptionMode::queue_group("login_workers");
    let running = harness.start(single_worker_config(mode.clone())).await;

    let publisher = harness.publisher(mode);
    for id in ["a", "b", "c"] {
        publisher.publish(&event(id)).await.unwrap();
    }
    wait_for_received(&running, 3).await;

    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            let cache_terminated = running
                .pool_states()
                .iter()
                .any(|(stage, states)| *stage == "cache" && states == &[WorkerState::Terminated]);
            if cache_terminated {
                break;
            }
            tokio::time::sleep(Duration::from_millis(2)).await;
        }
    })
    .await
    .expect("cache worker should terminate");

    let report = running.shutdown().await;

    let failed: Vec<_> = report
        .workers
        .iter()
        .filter(|exit| exit.is_failure())
        .collect();
    assert_eq!(failed.len(), 1);
    assert!(matches!(
        failed[0],
        WorkerExit::Failed {
            stage: "cache",
            processed: 1,
            ..
        }
    ));

    assert_eq!(harness.cache.keys(), vec!["a"]);
    assert_eq!(harness.store.inserted_ids(), vec!["a", "b", "c"]);
    assert_eq!(harness.digester.call_count(), 3);
}

// ============================================================================
// Injection point
// ============================================================================

#[tokio::test]
async fn injected_events_are_routed_like_bus_events() {
    let harness = Harness::new();
    let running = harness
        .start(single_worker_config(SubscriptionMode::queue_group("login_workers")))
        .await;

    running.injector().submit(event("injected")).await.unwrap();
    wait_for_received(&running, 1).await;

    let injector = running.injector();
    running.shutdown().await;

    assert_eq!(harness.store.inserted_ids(), vec!["injected"]);
    assert_eq!(harness.cache.keys(), vec!["injected"]);
    assert!(injector.submit(event("late")).await.is_err());
}

#[tokio::test]
async fn bus_is_untouched_by_injection() {
    let harness = Harness::new();
    let running = harness
        .start(single_worker_config(SubscriptionMode::Broadcast))
        .await;

    running.injector().submit(event("x")).await.unwrap();
    wait_for_received(&running, 1).await;
    running.shutdown().await;

    assert_eq!(harness.bus.published_count(), 0);
    assert_eq!(harness.store.inserted_ids(), vec!["x"]);
}
