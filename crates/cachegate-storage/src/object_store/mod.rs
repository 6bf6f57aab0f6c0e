//! Byte-level cold-tier backends
//!
//! Every storage engine plugin is an [`ObjectStore`] wrapped by
//! [`crate::ObjectStoreEngine`]:
//! - Local filesystem (development, single host)
//! - S3-compatible services (AWS S3, DigitalOcean Spaces, Tencent COS)
//! - In-memory mock (tests, dry runs)

mod local;
mod mock;
mod s3;

pub use local::LocalObjectStore;
pub use mock::{CallHistoryEntry, MockFailure, MockObjectStore};
pub use s3::S3ObjectStore;

use async_trait::async_trait;
use bytes::Bytes;
use cachegate_core::CoreResult;

/// Object Store trait - S3-like interface for cloud/local storage
///
/// Keys reaching this trait are already encoded by [`crate::key_codec`], so
/// they contain no path separators and never start with `.`.
///
/// # Error Handling
///
/// - `CoreError::NotFound` - Object does not exist (`get` only)
/// - `CoreError::Unavailable` - Backend unreachable or request rejected
/// - `CoreError::Io` - Local filesystem failure
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Verify the backend is reachable. Must return an error on broken
    /// connectivity, never a silent success.
    async fn health_check(&self) -> CoreResult<()>;

    /// Put object (overwrites if exists)
    async fn put(&self, key: &str, data: Bytes) -> CoreResult<()>;

    /// Get object
    ///
    /// # Errors
    ///
    /// - `CoreError::NotFound` if object does not exist
    async fn get(&self, key: &str) -> CoreResult<Bytes>;

    /// Check if object exists
    async fn exists(&self, key: &str) -> CoreResult<bool>;

    /// Delete object (idempotent)
    ///
    /// Deleting an absent object is a no-op.
    async fn delete(&self, key: &str) -> CoreResult<()>;
}
