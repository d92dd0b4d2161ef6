//! Redis cache store for credflow.
//!
//! Each cache entry is a plain string written with `SET key value EX ttl`, so
//! Redis expires it on its own. The store holds a `ConnectionManager`, which
//! reconnects transparently and is cheap to clone; every cache worker uses a
//! clone of the same manager.
//!
//! # Example
//!
//! ```no_run
//! use credflow_core::cache::{CacheRecord, CacheStore};
//! use credflow_core::event::CredentialEvent;
//! use credflow_redis::RedisCacheStore;
//! use std::time::Duration;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let cache = RedisCacheStore::new("redis://127.0.0.1:6379").await?;
//!
//! let event = CredentialEvent::new("id-1", "alice", "hunter2", 0, 0);
//! cache.set(&CacheRecord::from_event(&event, Duration::from_secs(7200))).await?;
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

use credflow_core::cache::{CacheRecord, CacheStore};
use credflow_core::store::{StoreError, StoreFuture};
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Client};

/// [`CacheStore`] backed by Redis string keys with expiry.
#[derive(Clone)]
pub struct RedisCacheStore {
    /// Connection manager for connection pooling.
    conn_manager: ConnectionManager,
}

impl RedisCacheStore {
    /// Connect to Redis.
    ///
    /// # Arguments
    ///
    /// * `redis_url` - Redis connection URL (e.g., "redis://127.0.0.1:6379")
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::ConnectionFailed`] if the URL is invalid or the
    /// server is unreachable.
    pub async fn new(redis_url: &str) -> Result<Self, StoreError> {
        let client = Client::open(redis_url)
            .map_err(|e| StoreError::ConnectionFailed(format!("Failed to create Redis client: {e}")))?;

        let conn_manager = ConnectionManager::new(client).await.map_err(|e| {
            StoreError::ConnectionFailed(format!("Failed to create Redis connection manager: {e}"))
        })?;

        tracing::info!("Connected to Redis");
        Ok(Self { conn_manager })
    }
}

impl CacheStore for RedisCacheStore {
    fn set(&self, record: &CacheRecord) -> StoreFuture<'_, ()> {
        let record = record.clone();
        Box::pin(async move {
            let mut conn = self.conn_manager.clone();
            // Redis rejects EX 0.
            let ttl_seconds = record.ttl.as_secs().max(1);

            let (): () = conn
                .set_ex(&record.key, &record.value, ttl_seconds)
                .await
                .map_err(|e| StoreError::WriteFailed(format!("Failed to set {}: {e}", record.key)))?;

            tracing::trace!(key = %record.key, ttl_seconds, "Cache entry written");
            Ok(())
        })
    }

    fn get(&self, key: &str) -> StoreFuture<'_, Option<String>> {
        let key = key.to_string();
        Box::pin(async move {
            let mut conn = self.conn_manager.clone();
            let value: Option<String> = conn
                .get(&key)
                .await
                .map_err(|e| StoreError::ReadFailed(format!("Failed to get {key}: {e}")))?;
            Ok(value)
        })
    }

    fn delete(&self, key: &str) -> StoreFuture<'_, ()> {
        let key = key.to_string();
        Box::pin(async move {
            let mut conn = self.conn_manager.clone();
            let _: i64 = conn
                .del(&key)
                .await
                .map_err(|e| StoreError::WriteFailed(format!("Failed to delete {key}: {e}")))?;
            Ok(())
        })
    }
}
