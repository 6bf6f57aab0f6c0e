//! Cache CRUD over the metadata store with lazy cold-tier hydration.

use crate::aggregation::Pipeline;
use crate::patch::{apply_patch, validate_patch};
use cachegate_core::{validate_key, CacheEntry, CoreError, CoreResult};
use cachegate_metadata::EntryRepository;
use cachegate_storage::StorageEngine;
use serde_json::Value;
use std::sync::Arc;

/// Attempts before a contended `update` gives up.
const MAX_WRITE_ATTEMPTS: usize = 16;

/// Point reads and writes against the hot tier.
///
/// Writes only ever touch the metadata store; the cold tier is read on a
/// miss and written later by the sync engine.
#[derive(Clone)]
pub struct CacheController {
    entries: EntryRepository,
    engine: Arc<dyn StorageEngine>,
}

impl CacheController {
    pub fn new(entries: EntryRepository, engine: Arc<dyn StorageEngine>) -> Self {
        Self { entries, engine }
    }

    pub fn entries(&self) -> &EntryRepository {
        &self.entries
    }

    pub fn engine(&self) -> &Arc<dyn StorageEngine> {
        &self.engine
    }

    /// Store `value` under `key` and mark it for flushing.
    pub async fn set(&self, key: &str, value: &Value) -> CoreResult<()> {
        validate_key(key)?;
        self.entries.upsert_dirty(key, value).await?;
        tracing::debug!(key = %key, "Set entry");
        Ok(())
    }

    /// Read `key`, optionally through an aggregation pipeline.
    ///
    /// Without a pipeline (or with an empty one) the result is `[payload]`.
    pub async fn get(&self, key: &str, aggregation: Option<&Value>) -> CoreResult<Vec<Value>> {
        validate_key(key)?;
        // reject bad pipelines before touching the store
        let pipeline = aggregation.map(Pipeline::parse).transpose()?;

        let entry = self.load_live(key).await?;
        let payload = payload_of(entry)?;

        match pipeline {
            Some(pipeline) if !pipeline.is_empty() => pipeline.run(payload),
            _ => Ok(vec![payload]),
        }
    }

    /// Apply an update-operator document to an existing entry.
    pub async fn update(&self, key: &str, patch: &Value) -> CoreResult<()> {
        validate_key(key)?;
        validate_patch(patch)?;

        for attempt in 1..=MAX_WRITE_ATTEMPTS {
            let entry = self.load_live(key).await?;
            let version = entry.version;
            let patched = apply_patch(&payload_of(entry)?, patch)?;

            if self.entries.write_patched(key, version, &patched).await? {
                tracing::debug!(key = %key, attempt, "Updated entry");
                return Ok(());
            }
            tracing::debug!(key = %key, attempt, "Update raced a concurrent write, retrying");
        }

        Err(CoreError::unavailable(format!(
            "update of `{}` kept conflicting with concurrent writes",
            key
        )))
    }

    /// Hide `key` from reads and queue its cold-tier deletion. Idempotent.
    pub async fn delete(&self, key: &str) -> CoreResult<()> {
        validate_key(key)?;
        let changed = self.entries.mark_deleted(key).await?;
        tracing::debug!(key = %key, changed, "Deleted entry");
        Ok(())
    }

    /// Fetch a readable entry, pulling its payload from the cold tier when
    /// only the record is cached.
    async fn load_live(&self, key: &str) -> CoreResult<CacheEntry> {
        for _ in 0..MAX_WRITE_ATTEMPTS {
            let entry = match self.entries.fetch(key).await? {
                Some(entry) if entry.is_live() => entry,
                _ => return Err(CoreError::not_found("entry", key)),
            };
            if entry.has_data {
                return Ok(entry);
            }

            let data = self.engine.get(key).await?;
            if self.entries.hydrate(key, &data).await? {
                tracing::debug!(key = %key, engine = self.engine.name(), "Hydrated entry from cold tier");
            }
            // re-read: either our hydration or a concurrent write is now visible
        }

        Err(CoreError::unavailable(format!(
            "entry `{}` kept changing while being loaded",
            key
        )))
    }
}

fn payload_of(entry: CacheEntry) -> CoreResult<Value> {
    entry.data.ok_or_else(|| {
        CoreError::internal(format!("entry `{}` is marked as cached but has no payload", entry.id))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use cachegate_core::SyncType;
    use cachegate_metadata::open_store;
    use cachegate_storage::{CompressionConfig, MockObjectStore, ObjectStoreEngine};
    use serde_json::json;

    async fn controller() -> (CacheController, Arc<MockObjectStore>) {
        let pool = open_store("sqlite::memory:", 1).await.unwrap();
        let store = Arc::new(MockObjectStore::new());
        let engine =
            ObjectStoreEngine::new("memory", store.clone(), CompressionConfig::default(), None)
                .unwrap();
        (
            CacheController::new(EntryRepository::new(pool), Arc::new(engine)),
            store,
        )
    }

    #[tokio::test]
    async fn test_set_then_get() {
        let (cache, _) = controller().await;
        cache.set("a", &json!({"x": 1})).await.unwrap();
        assert_eq!(cache.get("a", None).await.unwrap(), vec![json!({"x": 1})]);
        assert_eq!(
            cache.get("a", Some(&json!([]))).await.unwrap(),
            vec![json!({"x": 1})]
        );
    }

    #[tokio::test]
    async fn test_empty_key_rejected_everywhere() {
        let (cache, _) = controller().await;
        assert!(matches!(cache.set("", &json!(1)).await, Err(CoreError::InvalidArgument(_))));
        assert!(matches!(cache.get("", None).await, Err(CoreError::InvalidArgument(_))));
        assert!(matches!(
            cache.update("", &json!({"$set": {"a": 1}})).await,
            Err(CoreError::InvalidArgument(_))
        ));
        assert!(matches!(cache.delete("").await, Err(CoreError::InvalidArgument(_))));
    }

    #[tokio::test]
    async fn test_get_missing_is_not_found() {
        let (cache, _) = controller().await;
        assert!(cache.get("nope", None).await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn test_update_missing_writes_nothing() {
        let (cache, _) = controller().await;
        let err = cache.update("nope", &json!({"$set": {"x": 1}})).await.unwrap_err();
        assert!(err.is_not_found());
        assert!(cache.entries().fetch("nope").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_update_rejects_empty_patch() {
        let (cache, _) = controller().await;
        cache.set("a", &json!({"x": 1})).await.unwrap();
        assert!(matches!(
            cache.update("a", &json!({})).await,
            Err(CoreError::InvalidArgument(_))
        ));
    }

    #[tokio::test]
    async fn test_delete_hides_entry_and_is_idempotent() {
        let (cache, _) = controller().await;
        cache.set("a", &json!(1)).await.unwrap();
        cache.delete("a").await.unwrap();
        cache.delete("a").await.unwrap();
        cache.delete("never").await.unwrap();

        assert!(cache.get("a", None).await.unwrap_err().is_not_found());
        assert!(cache
            .update("a", &json!({"$set": {"x": 1}}))
            .await
            .unwrap_err()
            .is_not_found());
    }

    #[tokio::test]
    async fn test_redirecting_pipeline_rejected_before_lookup() {
        let (cache, _) = controller().await;
        // the key does not exist, so reaching the store would yield NotFound
        let err = cache
            .get("absent", Some(&json!([{"$out": "elsewhere"}])))
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::InvalidArgument(_)));
    }

    #[tokio::test]
    async fn test_get_hydrates_from_cold_tier() {
        let (cache, store) = controller().await;
        cache.set("a", &json!({"x": 1})).await.unwrap();

        // flush and strip by hand
        let data = cache.entries().claim_update("a").await.unwrap().unwrap();
        cache.engine().set("a", &data).await.unwrap();
        cache.entries().strip_oldest_clean(10).await.unwrap();
        assert!(!cache.entries().fetch("a").await.unwrap().unwrap().has_data);

        assert_eq!(cache.get("a", None).await.unwrap(), vec![json!({"x": 1})]);
        let entry = cache.entries().fetch("a").await.unwrap().unwrap();
        assert!(entry.has_data);
        assert_eq!(entry.sync_type, None);
        assert_eq!(store.successful_calls("get"), 1);

        // second read is served from the hot tier
        cache.get("a", None).await.unwrap();
        assert_eq!(store.successful_calls("get"), 1);
    }

    #[tokio::test]
    async fn test_update_hydrates_then_marks_dirty() {
        let (cache, _) = controller().await;
        cache.set("a", &json!({"x": 1, "y": 1})).await.unwrap();
        let data = cache.entries().claim_update("a").await.unwrap().unwrap();
        cache.engine().set("a", &data).await.unwrap();
        cache.entries().strip_oldest_clean(10).await.unwrap();

        cache.update("a", &json!({"$inc": {"x": 1}})).await.unwrap();
        let entry = cache.entries().fetch("a").await.unwrap().unwrap();
        assert_eq!(entry.sync_type, Some(SyncType::Update));
        assert_eq!(entry.data, Some(json!({"x": 2, "y": 1})));
    }

    #[tokio::test]
    async fn test_missing_cold_object_surfaces_not_found() {
        let (cache, _) = controller().await;
        cache.set("a", &json!(1)).await.unwrap();
        cache.entries().claim_update("a").await.unwrap();
        cache.entries().strip_oldest_clean(10).await.unwrap();

        assert!(cache.get("a", None).await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn test_get_with_pipeline() {
        let (cache, _) = controller().await;
        cache
            .set("o", &json!({"items": [{"n": 1}, {"n": 2}, {"n": 3}]}))
            .await
            .unwrap();
        let out = cache
            .get(
                "o",
                Some(&json!([{"$unwind": "$items"}, {"$match": {"items.n": {"$gte": 2}}}])),
            )
            .await
            .unwrap();
        assert_eq!(out.len(), 2);
    }

    #[tokio::test]
    async fn test_failed_patch_leaves_entry_untouched() {
        let (cache, _) = controller().await;
        cache.set("a", &json!({"s": "text"})).await.unwrap();
        let before = cache.entries().fetch("a").await.unwrap().unwrap();

        assert!(cache.update("a", &json!({"$inc": {"s": 1}})).await.is_err());
        let after = cache.entries().fetch("a").await.unwrap().unwrap();
        assert_eq!(before, after);
    }
}
