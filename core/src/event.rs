//! The credential event and its wire format.
//!
//! A [`CredentialEvent`] is the unit of work that flows through the whole
//! pipeline. It is created once by the generator (or submitted through the
//! consumer's injection point) and never mutated afterwards: every stage
//! derives new values from it (a digest, a cache record, a store row).
//!
//! # Wire format
//!
//! Events travel over the bus as a JSON object with fixed field names:
//!
//! ```text
//! { "username": string, "password": string, "uuid": string, "timestamp": int64(ms), "sequence": int64 }
//! ```
//!
//! Every field is required. A payload missing any of them fails to decode with
//! [`CodecError::Decode`].
//!
//! # Example
//!
//! ```
//! use credflow_core::event::CredentialEvent;
//!
//! let event = CredentialEvent::new("a", "alice", "hunter2", 1_700_000_000_000, 0);
//! let bytes = event.to_wire().unwrap();
//! let decoded = CredentialEvent::from_wire(&bytes).unwrap();
//! assert_eq!(event, decoded);
//! ```

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors raised while encoding or decoding the wire format.
///
/// Codec failures are event-scoped: the offending event is dropped and the
/// component that hit the error keeps running.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CodecError {
    /// Failed to serialize an event to bytes.
    #[error("Failed to encode credential event: {0}")]
    Encode(String),

    /// Failed to deserialize bytes into an event.
    #[error("Failed to decode credential event: {0}")]
    Decode(String),
}

/// A synthetic user-credential event.
///
/// Fields are private so the value cannot change once built; use the
/// accessors to read them.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CredentialEvent {
    username: String,
    #[serde(rename = "password")]
    secret: String,
    #[serde(rename = "uuid")]
    id: String,
    #[serde(rename = "timestamp")]
    created_at_millis: i64,
    sequence: i64,
}

impl CredentialEvent {
    /// Build an event from its parts.
    #[must_use]
    pub fn new(
        id: impl Into<String>,
        username: impl Into<String>,
        secret: impl Into<String>,
        created_at_millis: i64,
        sequence: i64,
    ) -> Self {
        Self {
            username: username.into(),
            secret: secret.into(),
            id: id.into(),
            created_at_millis,
            sequence,
        }
    }

    /// Globally unique identifier. Used as routing key suffix and cache key.
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Username.
    #[must_use]
    pub fn username(&self) -> &str {
        &self.username
    }

    /// Plaintext secret, digested downstream.
    #[must_use]
    pub fn secret(&self) -> &str {
        &self.secret
    }

    /// Generation timestamp in Unix milliseconds.
    ///
    /// Only used for latency observation, never for ordering.
    #[must_use]
    pub const fn created_at_millis(&self) -> i64 {
        self.created_at_millis
    }

    /// Position within the batch that produced this event.
    #[must_use]
    pub const fn sequence(&self) -> i64 {
        self.sequence
    }

    /// The `username:secret` string fed to the digest primitive.
    #[must_use]
    pub fn credential_string(&self) -> String {
        format!("{}:{}", self.username, self.secret)
    }

    /// Milliseconds elapsed between generation and `now_millis`.
    #[must_use]
    pub const fn latency_millis(&self, now_millis: i64) -> i64 {
        now_millis.saturating_sub(self.created_at_millis)
    }

    /// Encode the event into its canonical JSON wire representation.
    ///
    /// # Errors
    ///
    /// Returns [`CodecError::Encode`] if serialization fails.
    pub fn to_wire(&self) -> Result<Vec<u8>, CodecError> {
        serde_json::to_vec(self).map_err(|e| CodecError::Encode(e.to_string()))
    }

    /// Decode an event from its JSON wire representation.
    ///
    /// # Errors
    ///
    /// Returns [`CodecError::Decode`] if the payload is not valid JSON or any
    /// required field is missing or has the wrong type.
    pub fn from_wire(bytes: &[u8]) -> Result<Self, CodecError> {
        serde_json::from_slice(bytes).map_err(|e| CodecError::Decode(e.to_string()))
    }
}
