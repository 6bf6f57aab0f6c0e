//! In-memory ObjectStore with scripted failures
//!
//! Backs the `memory` engine and every failure-path test: scripted failures
//! are consumed one per call in order, `set_offline` fails every call until
//! cleared, and the call history records what reached the backend.
//!
//! ```rust
//! use cachegate_storage::object_store::{MockFailure, MockObjectStore, ObjectStore};
//! use bytes::Bytes;
//!
//! # async fn example() -> cachegate_core::CoreResult<()> {
//! let mock = MockObjectStore::new_with_failures(vec![MockFailure::Unavailable("503")]);
//! assert!(mock.put("k", Bytes::from("1")).await.is_err());
//! assert!(mock.put("k", Bytes::from("1")).await.is_ok());
//! assert_eq!(mock.failed_calls("put"), 1);
//! # Ok(())
//! # }
//! ```

use async_trait::async_trait;
use bytes::Bytes;
use cachegate_core::{CoreError, CoreResult};
use parking_lot::RwLock;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use super::ObjectStore;

/// Scripted outcome for one backend call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MockFailure {
    /// Backend unreachable.
    Unavailable(&'static str),
    /// Call goes through.
    Ok,
}

impl MockFailure {
    fn to_error(&self) -> Option<CoreError> {
        match self {
            MockFailure::Unavailable(msg) => Some(CoreError::unavailable(format!("mock: {}", msg))),
            MockFailure::Ok => None,
        }
    }
}

/// One recorded backend call.
#[derive(Debug, Clone)]
pub struct CallHistoryEntry {
    /// "health_check", "put", "get", "exists", "delete"
    pub operation: &'static str,
    pub key: String,
    pub success: bool,
}

/// In-memory object store for tests and the `memory` engine.
#[derive(Default)]
pub struct MockObjectStore {
    storage: RwLock<HashMap<String, Bytes>>,
    failure_queue: RwLock<VecDeque<MockFailure>>,
    offline: AtomicBool,
    latency: Duration,
    call_history: RwLock<Vec<CallHistoryEntry>>,
}

impl MockObjectStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Failures are consumed in order; once the queue is empty every call succeeds.
    pub fn new_with_failures(pattern: Vec<MockFailure>) -> Self {
        let mock = Self::new();
        *mock.failure_queue.write() = pattern.into();
        mock
    }

    /// Adds a fixed delay to every call.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// Appends scripted outcomes to the queue.
    pub fn push_failures(&self, pattern: impl IntoIterator<Item = MockFailure>) {
        self.failure_queue.write().extend(pattern);
    }

    /// While offline every call fails with `Unavailable`.
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    pub fn get_call_history(&self) -> Vec<CallHistoryEntry> {
        self.call_history.read().clone()
    }

    pub fn successful_calls(&self, operation: &str) -> usize {
        self.count_calls(operation, true)
    }

    pub fn failed_calls(&self, operation: &str) -> usize {
        self.count_calls(operation, false)
    }

    /// Number of stored objects.
    pub fn storage_size(&self) -> usize {
        self.storage.read().len()
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.storage.read().contains_key(key)
    }

    /// Raw stored bytes, bypassing failure injection.
    pub fn raw(&self, key: &str) -> Option<Bytes> {
        self.storage.read().get(key).cloned()
    }

    /// Stores raw bytes, bypassing failure injection.
    pub fn insert_raw(&self, key: &str, data: Bytes) {
        self.storage.write().insert(key.to_string(), data);
    }

    fn count_calls(&self, operation: &str, success: bool) -> usize {
        self.call_history
            .read()
            .iter()
            .filter(|entry| entry.operation == operation && entry.success == success)
            .count()
    }

    async fn begin(&self, operation: &'static str, key: &str) -> CoreResult<()> {
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }

        let failure = if self.offline.load(Ordering::SeqCst) {
            Some(CoreError::unavailable("mock: offline"))
        } else {
            self.failure_queue
                .write()
                .pop_front()
                .and_then(|f| f.to_error())
        };

        match failure {
            Some(error) => {
                self.record(operation, key, false);
                Err(error)
            }
            None => Ok(()),
        }
    }

    fn record(&self, operation: &'static str, key: &str, success: bool) {
        self.call_history.write().push(CallHistoryEntry {
            operation,
            key: key.to_string(),
            success,
        });
    }
}

#[async_trait]
impl ObjectStore for MockObjectStore {
    async fn health_check(&self) -> CoreResult<()> {
        self.begin("health_check", "").await?;
        self.record("health_check", "", true);
        Ok(())
    }

    async fn put(&self, key: &str, data: Bytes) -> CoreResult<()> {
        self.begin("put", key).await?;
        self.storage.write().insert(key.to_string(), data);
        self.record("put", key, true);
        Ok(())
    }

    async fn get(&self, key: &str) -> CoreResult<Bytes> {
        self.begin("get", key).await?;
        let found = self.storage.read().get(key).cloned();
        self.record("get", key, found.is_some());
        found.ok_or_else(|| CoreError::not_found("object", key))
    }

    async fn exists(&self, key: &str) -> CoreResult<bool> {
        self.begin("exists", key).await?;
        self.record("exists", key, true);
        Ok(self.storage.read().contains_key(key))
    }

    async fn delete(&self, key: &str) -> CoreResult<()> {
        self.begin("delete", key).await?;
        self.storage.write().remove(key);
        self.record("delete", key, true);
        Ok(())
    }
}
