//! Recording collaborators.
//!
//! Each type keeps a log of the calls it received and can be switched into a
//! failing mode, so tests can assert both the happy path and the
//! fatal-on-write-error behaviour of the stage workers.

#![allow(clippy::unwrap_used)] // Test infrastructure uses unwrap on poisoned locks

use credflow_core::cache::{CacheRecord, CacheStore};
use credflow_core::digest::{DigestAlgorithm, Digester};
use credflow_core::store::{DurableStore, StoreError, StoreFuture, StoreRecord};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

/// Failure switch shared by the recording collaborators.
///
/// `remaining_successes == None` means never fail.
#[derive(Debug, Default)]
struct FailurePlan {
    remaining_successes: Option<usize>,
    reason: String,
}

impl FailurePlan {
    /// Consume one call. Returns the error to report, if this call fails.
    fn next_call(&mut self) -> Option<StoreError> {
        match self.remaining_successes.as_mut() {
            None => None,
            Some(0) => Some(StoreError::WriteFailed(self.reason.clone())),
            Some(n) => {
                *n -= 1;
                None
            },
        }
    }

    fn fail_after(&mut self, successes: usize, reason: String) {
        self.remaining_successes = Some(successes);
        self.reason = reason;
    }
}

#[derive(Default)]
struct CacheState {
    sets: Vec<CacheRecord>,
    entries: HashMap<String, String>,
    failure: FailurePlan,
}

/// [`CacheStore`] that records every `set`.
///
/// # Example
///
/// ```
/// use credflow_core::cache::{CacheRecord, CacheStore};
/// use credflow_testing::RecordingCache;
/// use std::time::Duration;
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let cache = RecordingCache::new();
/// let record = CacheRecord { key: "a".into(), value: "v".into(), ttl: Duration::from_secs(1) };
/// cache.set(&record).await?;
/// assert_eq!(cache.keys(), vec!["a".to_string()]);
/// # Ok(())
/// # }
/// ```
#[derive(Clone, Default)]
pub struct RecordingCache {
    state: Arc<Mutex<CacheState>>,
}

impl RecordingCache {
    /// Create an empty cache.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Let `successes` more writes through, then fail every write with `reason`.
    pub fn fail_after(&self, successes: usize, reason: impl Into<String>) {
        self.state
            .lock()
            .unwrap()
            .failure
            .fail_after(successes, reason.into());
    }

    /// Every successful `set`, in call order.
    #[must_use]
    pub fn sets(&self) -> Vec<CacheRecord> {
        self.state.lock().unwrap().sets.clone()
    }

    /// Keys of every successful `set`, in call order.
    #[must_use]
    pub fn keys(&self) -> Vec<String> {
        self.sets().into_iter().map(|record| record.key).collect()
    }

    /// Number of successful `set` calls.
    #[must_use]
    pub fn set_count(&self) -> usize {
        self.state.lock().unwrap().sets.len()
    }
}

impl CacheStore for RecordingCache {
    fn set(&self, record: &CacheRecord) -> StoreFuture<'_, ()> {
        let record = record.clone();
        Box::pin(async move {
            let mut state = self.state.lock().unwrap();
            if let Some(err) = state.failure.next_call() {
                return Err(err);
            }
            state.entries.insert(record.key.clone(), record.value.clone());
            state.sets.push(record);
            Ok(())
        })
    }

    fn get(&self, key: &str) -> StoreFuture<'_, Option<String>> {
        let key = key.to_string();
        Box::pin(async move { Ok(self.state.lock().unwrap().entries.get(&key).cloned()) })
    }

    fn delete(&self, key: &str) -> StoreFuture<'_, ()> {
        let key = key.to_string();
        Box::pin(async move {
            self.state.lock().unwrap().entries.remove(&key);
            Ok(())
        })
    }
}

#[derive(Default)]
struct StoreState {
    inserts: Vec<StoreRecord>,
    hash_updates: Vec<(String, String)>,
    failure: FailurePlan,
}

/// [`DurableStore`] that records every insert. Duplicate ids are kept, like a
/// table without a unique key.
#[derive(Clone, Default)]
pub struct RecordingStore {
    state: Arc<Mutex<StoreState>>,
}

impl RecordingStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Let `successes` more inserts through, then fail every insert with `reason`.
    pub fn fail_after(&self, successes: usize, reason: impl Into<String>) {
        self.state
            .lock()
            .unwrap()
            .failure
            .fail_after(successes, reason.into());
    }

    /// Every successful insert, in call order.
    #[must_use]
    pub fn inserts(&self) -> Vec<StoreRecord> {
        self.state.lock().unwrap().inserts.clone()
    }

    /// Ids of every successful insert, in call order.
    #[must_use]
    pub fn inserted_ids(&self) -> Vec<String> {
        self.inserts().into_iter().map(|record| record.id).collect()
    }

    /// Number of successful inserts.
    #[must_use]
    pub fn insert_count(&self) -> usize {
        self.state.lock().unwrap().inserts.len()
    }

    /// Every `(id, hash)` update applied.
    #[must_use]
    pub fn hash_updates(&self) -> Vec<(String, String)> {
        self.state.lock().unwrap().hash_updates.clone()
    }
}

impl DurableStore for RecordingStore {
    fn insert(&self, record: &StoreRecord) -> StoreFuture<'_, ()> {
        let record = record.clone();
        Box::pin(async move {
            let mut state = self.state.lock().unwrap();
            if let Some(err) = state.failure.next_call() {
                return Err(err);
            }
            state.inserts.push(record);
            Ok(())
        })
    }

    fn update_hash(&self, id: &str, hash: &str) -> StoreFuture<'_, u64> {
        let id = id.to_string();
        let hash = hash.to_string();
        Box::pin(async move {
            let mut state = self.state.lock().unwrap();
            let mut touched = 0;
            for record in state.inserts.iter_mut().filter(|record| record.id == id) {
                record.hash.clone_from(&hash);
                touched += 1;
            }
            state.hash_updates.push((id, hash));
            Ok(touched)
        })
    }
}

/// [`Digester`] that records its inputs and delegates to a real algorithm.
#[derive(Clone)]
pub struct RecordingDigester {
    algorithm: DigestAlgorithm,
    inputs: Arc<Mutex<Vec<String>>>,
}

impl RecordingDigester {
    /// Record calls and digest with `algorithm`.
    #[must_use]
    pub fn new(algorithm: DigestAlgorithm) -> Self {
        Self {
            algorithm,
            inputs: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Inputs received so far, lossily decoded as UTF-8.
    #[must_use]
    pub fn inputs(&self) -> Vec<String> {
        self.inputs.lock().unwrap().clone()
    }

    /// Number of digests computed.
    #[must_use]
    pub fn call_count(&self) -> usize {
        self.inputs.lock().unwrap().len()
    }
}

impl Default for RecordingDigester {
    fn default() -> Self {
        Self::new(DigestAlgorithm::Sha256)
    }
}

impl Digester for RecordingDigester {
    fn digest(&self, data: &[u8]) -> String {
        self.inputs
            .lock()
            .unwrap()
            .push(String::from_utf8_lossy(data).into_owned());
        self.algorithm.digest(data)
    }
}
