//! Cache store abstraction.
//!
//! The cache worker writes one [`CacheRecord`] per event with a fixed TTL.
//! Once [`CacheStore::set`] returns, the record belongs to the cache; the
//! pipeline keeps no reference to it.

use crate::event::CredentialEvent;
use crate::store::StoreFuture;
use std::time::Duration;

/// Default cache TTL (120 minutes).
pub const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(120 * 60);

/// A cache entry derived from an event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheRecord {
    /// Cache key, the event id.
    pub key: String,
    /// Formatted username/secret summary.
    pub value: String,
    /// Time to live.
    pub ttl: Duration,
}

impl CacheRecord {
    /// Build the cache entry for an event.
    ///
    /// # Example
    ///
    /// ```
    /// use credflow_core::cache::CacheRecord;
    /// use credflow_core::event::CredentialEvent;
    /// use std::time::Duration;
    ///
    /// let event = CredentialEvent::new("k1", "erin", "pw", 0, 0);
    /// let record = CacheRecord::from_event(&event, Duration::from_secs(60));
    /// assert_eq!(record.key, "k1");
    /// assert_eq!(record.value, "Username erin Password pw");
    /// ```
    #[must_use]
    pub fn from_event(event: &CredentialEvent, ttl: Duration) -> Self {
        Self {
            key: event.id().to_string(),
            value: format!("Username {} Password {}", event.username(), event.secret()),
            ttl,
        }
    }
}

/// Key/value cache with per-entry expiry.
pub trait CacheStore: Send + Sync {
    /// Write `record.value` under `record.key`, expiring after `record.ttl`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::WriteFailed`](crate::store::StoreError::WriteFailed)
    /// if the write is rejected.
    fn set(&self, record: &CacheRecord) -> StoreFuture<'_, ()>;

    /// Read the value stored under `key`, if any.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::ReadFailed`](crate::store::StoreError::ReadFailed)
    /// if the read is rejected.
    fn get(&self, key: &str) -> StoreFuture<'_, Option<String>>;

    /// Remove `key`. Removing a missing key is not an error.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::WriteFailed`](crate::store::StoreError::WriteFailed)
    /// if the delete is rejected.
    fn delete(&self, key: &str) -> StoreFuture<'_, ()>;
}
