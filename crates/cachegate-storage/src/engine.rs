//! Storage engine plugin contract
//!
//! [`StorageEngine`] is the capability set the controller depends on. The one
//! implementation, [`ObjectStoreEngine`], layers key encoding, JSON
//! serialization, optional gzip and per-backend rate limiting over any
//! [`ObjectStore`], so a backend only has to move bytes.

use crate::compression::{self, CompressionConfig};
use crate::key_codec;
use crate::object_store::ObjectStore;
use crate::rate_limit::FixedWindowLimiter;
use async_trait::async_trait;
use bytes::Bytes;
use cachegate_core::{CoreError, CoreResult};
use serde_json::Value;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::Notify;

/// Cold-tier storage engine.
///
/// Obtained from [`crate::registry::connect`], which provisions the backend
/// and verifies it with a health check.
#[async_trait]
pub trait StorageEngine: Send + Sync {
    /// Registered engine name.
    fn name(&self) -> &str;

    /// Stop admitting calls and wait for in-flight calls to finish.
    async fn disconnect(&self) -> CoreResult<()>;

    /// Errors when the backend is unreachable.
    async fn health_check(&self) -> CoreResult<()>;

    /// Read a payload. Fails with `NotFound` when the object is absent.
    async fn get(&self, key: &str) -> CoreResult<Value>;

    /// Write a payload, overwriting any previous object.
    async fn set(&self, key: &str, data: &Value) -> CoreResult<()>;

    /// Remove a payload. Absent objects are not an error.
    async fn delete(&self, key: &str) -> CoreResult<()>;

    /// Whether an object exists for the key.
    async fn exists(&self, key: &str) -> CoreResult<bool>;
}

/// Counts in-flight calls so `disconnect` can drain them.
#[derive(Default)]
struct Drain {
    closed: AtomicBool,
    in_flight: AtomicUsize,
    idle: Notify,
}

struct InFlight<'a>(&'a Drain);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        if self.0.in_flight.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.0.idle.notify_waiters();
        }
    }
}

impl Drain {
    fn enter(&self) -> CoreResult<InFlight<'_>> {
        self.in_flight.fetch_add(1, Ordering::SeqCst);
        let guard = InFlight(self);
        if self.closed.load(Ordering::SeqCst) {
            return Err(CoreError::unavailable("storage engine is disconnected"));
        }
        Ok(guard)
    }

    async fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        loop {
            let idle = self.idle.notified();
            if self.in_flight.load(Ordering::SeqCst) == 0 {
                return;
            }
            idle.await;
        }
    }
}

/// [`StorageEngine`] over a byte-level [`ObjectStore`].
pub struct ObjectStoreEngine {
    name: String,
    store: Arc<dyn ObjectStore>,
    compression: CompressionConfig,
    limiter: Option<FixedWindowLimiter>,
    drain: Drain,
}

impl ObjectStoreEngine {
    pub fn new(
        name: impl Into<String>,
        store: Arc<dyn ObjectStore>,
        compression: CompressionConfig,
        rate_limit_per_sec: Option<u32>,
    ) -> CoreResult<Self> {
        compression
            .validate()
            .map_err(CoreError::invalid_argument)?;

        Ok(Self {
            name: name.into(),
            store,
            compression,
            limiter: rate_limit_per_sec.map(FixedWindowLimiter::per_second),
            drain: Drain::default(),
        })
    }

    pub fn rate_limit_per_sec(&self) -> Option<u32> {
        self.limiter.as_ref().map(FixedWindowLimiter::max_requests)
    }

    async fn throttle(&self) {
        if let Some(limiter) = &self.limiter {
            limiter.acquire().await;
        }
    }
}

#[async_trait]
impl StorageEngine for ObjectStoreEngine {
    fn name(&self) -> &str {
        &self.name
    }

    async fn disconnect(&self) -> CoreResult<()> {
        self.drain.close().await;
        tracing::info!(engine = %self.name, "Storage engine disconnected");
        Ok(())
    }

    async fn health_check(&self) -> CoreResult<()> {
        let _guard = self.drain.enter()?;
        self.throttle().await;
        self.store.health_check().await
    }

    async fn get(&self, key: &str) -> CoreResult<Value> {
        let _guard = self.drain.enter()?;
        let name = key_codec::encode(key);

        self.throttle().await;
        let stored = self.store.get(&name).await.map_err(|e| match e {
            CoreError::NotFound { .. } => CoreError::not_found("object", key),
            other => other,
        })?;

        let raw = compression::decompress(stored)?;
        let value = serde_json::from_slice(&raw)?;
        tracing::debug!(engine = %self.name, key = %key, bytes = raw.len(), "Read payload");
        Ok(value)
    }

    async fn set(&self, key: &str, data: &Value) -> CoreResult<()> {
        let _guard = self.drain.enter()?;
        let name = key_codec::encode(key);

        let raw = serde_json::to_vec(data)?;
        let stored: Bytes = compression::compress(&raw, self.compression)?;

        self.throttle().await;
        self.store.put(&name, stored).await?;
        tracing::debug!(engine = %self.name, key = %key, bytes = raw.len(), "Wrote payload");
        Ok(())
    }

    async fn delete(&self, key: &str) -> CoreResult<()> {
        let _guard = self.drain.enter()?;
        self.throttle().await;
        self.store.delete(&key_codec::encode(key)).await
    }

    async fn exists(&self, key: &str) -> CoreResult<bool> {
        let _guard = self.drain.enter()?;
        self.throttle().await;
        self.store.exists(&key_codec::encode(key)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::object_store::{MockFailure, MockObjectStore};
    use serde_json::json;
    use std::time::Duration;

    fn engine(store: Arc<MockObjectStore>, compression: CompressionConfig) -> ObjectStoreEngine {
        ObjectStoreEngine::new("memory", store, compression, None).unwrap()
    }

    #[tokio::test]
    async fn test_set_get_delete_with_encoded_keys() {
        let store = Arc::new(MockObjectStore::new());
        let engine = engine(store.clone(), CompressionConfig::default());

        engine.set("users/42", &json!({"x": 1})).await.unwrap();
        assert!(store.contains_key("users%2F42"));
        assert_eq!(engine.get("users/42").await.unwrap(), json!({"x": 1}));

        engine.delete("users/42").await.unwrap();
        assert!(!engine.exists("users/42").await.unwrap());
        engine.delete("users/42").await.unwrap();
    }

    #[tokio::test]
    async fn test_get_missing_reports_cache_key() {
        let store = Arc::new(MockObjectStore::new());
        let engine = engine(store, CompressionConfig::default());

        match engine.get("a/b").await {
            Err(CoreError::NotFound { id, .. }) => assert_eq!(id, "a/b"),
            other => panic!("expected NotFound, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_reads_both_compressed_and_plain_objects() {
        let store = Arc::new(MockObjectStore::new());
        let gzip = engine(store.clone(), CompressionConfig::default());
        let plain = engine(store.clone(), CompressionConfig::disabled());

        gzip.set("zipped", &json!([1, 2, 3])).await.unwrap();
        plain.set("plain", &json!("text")).await.unwrap();

        assert!(compression::is_gzip(&store.raw("zipped").unwrap()));
        assert!(!compression::is_gzip(&store.raw("plain").unwrap()));

        assert_eq!(plain.get("zipped").await.unwrap(), json!([1, 2, 3]));
        assert_eq!(gzip.get("plain").await.unwrap(), json!("text"));
    }

    #[tokio::test]
    async fn test_backend_errors_propagate() {
        let store = Arc::new(MockObjectStore::new_with_failures(vec![
            MockFailure::Unavailable("503"),
        ]));
        let engine = engine(store, CompressionConfig::default());

        assert!(matches!(
            engine.set("k", &json!(1)).await,
            Err(CoreError::Unavailable(_))
        ));
        engine.set("k", &json!(1)).await.unwrap();
    }

    #[tokio::test]
    async fn test_disconnect_drains_and_rejects_new_calls() {
        let store = Arc::new(MockObjectStore::new().with_latency(Duration::from_millis(50)));
        let engine = Arc::new(engine(store.clone(), CompressionConfig::default()));

        let writer = {
            let engine = engine.clone();
            tokio::spawn(async move { engine.set("slow", &json!(1)).await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;

        engine.disconnect().await.unwrap();
        // the in-flight write finished before disconnect returned
        assert!(store.contains_key("slow"));
        writer.await.unwrap().unwrap();

        assert!(matches!(
            engine.get("slow").await,
            Err(CoreError::Unavailable(_))
        ));
    }
}
