//! Local filesystem implementation of ObjectStore
//!
//! Objects are stored as flat files named by their encoded key. Encoded keys
//! never start with `.`, so dot-prefixed names are free for temp files and
//! the health probe.

use super::ObjectStore;
use async_trait::async_trait;
use bytes::Bytes;
use cachegate_core::{CoreError, CoreResult};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

const HEALTH_PROBE: &str = ".health-probe";

/// Local filesystem object store
///
/// # Example
///
/// ```rust,no_run
/// use cachegate_storage::object_store::{LocalObjectStore, ObjectStore};
/// use bytes::Bytes;
///
/// #[tokio::main]
/// async fn main() -> cachegate_core::CoreResult<()> {
///     let store = LocalObjectStore::new("./data/cold/cachegate").await?;
///     store.put("user%3A42", Bytes::from("{}")).await?;
///     assert!(store.exists("user%3A42").await?);
///     Ok(())
/// }
/// ```
pub struct LocalObjectStore {
    base_dir: PathBuf,
    tmp_seq: AtomicU64,
}

impl LocalObjectStore {
    /// Create a new local object store
    ///
    /// Creates the base directory if it doesn't exist.
    pub async fn new(base_dir: impl AsRef<Path>) -> CoreResult<Self> {
        let base_dir = base_dir.as_ref().to_path_buf();
        tokio::fs::create_dir_all(&base_dir).await?;
        Ok(Self {
            base_dir,
            tmp_seq: AtomicU64::new(0),
        })
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    fn full_path(&self, key: &str) -> CoreResult<PathBuf> {
        if key.is_empty() || key.starts_with('.') || key.contains('/') || key.contains('\\') {
            return Err(CoreError::invalid_argument(format!(
                "key `{}` is not a safe file name",
                key
            )));
        }
        Ok(self.base_dir.join(key))
    }
}

#[async_trait]
impl ObjectStore for LocalObjectStore {
    async fn health_check(&self) -> CoreResult<()> {
        let metadata = tokio::fs::metadata(&self.base_dir).await.map_err(|e| {
            CoreError::unavailable(format!(
                "local store {} unreachable: {}",
                self.base_dir.display(),
                e
            ))
        })?;
        if !metadata.is_dir() {
            return Err(CoreError::unavailable(format!(
                "local store {} is not a directory",
                self.base_dir.display()
            )));
        }

        let probe = self.base_dir.join(HEALTH_PROBE);
        tokio::fs::write(&probe, b"ok").await.map_err(|e| {
            CoreError::unavailable(format!(
                "local store {} is not writable: {}",
                self.base_dir.display(),
                e
            ))
        })?;
        tokio::fs::remove_file(&probe).await?;
        Ok(())
    }

    async fn put(&self, key: &str, data: Bytes) -> CoreResult<()> {
        let path = self.full_path(key)?;

        // write-then-rename so readers never observe a torn object; the
        // temp name is unique per write so concurrent puts of one key don't
        // rename each other's files
        let seq = self.tmp_seq.fetch_add(1, Ordering::Relaxed);
        let tmp = self
            .base_dir
            .join(format!(".tmp-{}-{}-{}", std::process::id(), seq, key));
        let written = match tokio::fs::write(&tmp, &data).await {
            Ok(()) => tokio::fs::rename(&tmp, &path).await,
            Err(e) => Err(e),
        };
        if let Err(e) = written {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(e.into());
        }

        Ok(())
    }

    async fn get(&self, key: &str) -> CoreResult<Bytes> {
        let path = self.full_path(key)?;

        let data = tokio::fs::read(&path).await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                CoreError::not_found("object", key)
            } else {
                CoreError::from(e)
            }
        })?;

        Ok(Bytes::from(data))
    }

    async fn exists(&self, key: &str) -> CoreResult<bool> {
        let path = self.full_path(key)?;
        Ok(tokio::fs::try_exists(&path).await?)
    }

    async fn delete(&self, key: &str) -> CoreResult<()> {
        let path = self.full_path(key)?;

        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}
