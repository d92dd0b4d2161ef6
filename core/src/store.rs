//! Durable store abstraction.
//!
//! The store worker persists one [`StoreRecord`] per event through
//! [`DurableStore::insert`]. Inserts are not idempotent: delivering the same
//! event twice produces two rows unless the backing table enforces a unique
//! key on `id`.
//!
//! The hash column is written empty by the pipeline. A separate update path
//! ([`DurableStore::update_hash`]) fills it in later.

use crate::event::CredentialEvent;
use std::future::Future;
use std::pin::Pin;
use thiserror::Error;

/// Errors from the cache and durable store collaborators.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// The backend is unreachable.
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// A write (insert, update, set) was rejected.
    #[error("Write failed: {0}")]
    WriteFailed(String),

    /// A read was rejected.
    #[error("Read failed: {0}")]
    ReadFailed(String),
}

/// Boxed future returned by store methods.
pub type StoreFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, StoreError>> + Send + 'a>>;

/// Row persisted for each event, keyed by `id`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreRecord {
    /// Event identifier.
    pub id: String,
    /// Username.
    pub username: String,
    /// Secret (plaintext or digest, depending on stage wiring).
    pub secret: String,
    /// Reserved hash column, empty on insert.
    pub hash: String,
}

impl StoreRecord {
    /// Build the row for an event, leaving the hash column empty.
    #[must_use]
    pub fn from_event(event: &CredentialEvent) -> Self {
        Self {
            id: event.id().to_string(),
            username: event.username().to_string(),
            secret: event.secret().to_string(),
            hash: String::new(),
        }
    }
}

/// Durable relational store used by the store stage.
pub trait DurableStore: Send + Sync {
    /// Insert one record.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::WriteFailed`] if the insert is rejected.
    fn insert(&self, record: &StoreRecord) -> StoreFuture<'_, ()>;

    /// Fill in the hash column of an existing record.
    ///
    /// Returns the number of rows touched.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::WriteFailed`] if the update is rejected.
    fn update_hash(&self, id: &str, hash: &str) -> StoreFuture<'_, u64>;
}
