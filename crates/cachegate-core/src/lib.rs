//! Core domain types shared by every cachegate crate.

pub mod config;
pub mod entry;
pub mod error;

pub use config::{
    AuthConfig, CacheConfig, GatewayConfig, LocalStoreConfig, LoggingConfig, MetadataConfig,
    MigrationConfig, S3StoreConfig, ServerConfig, StorageConfig, SyncConfig, MIN_CACHE_SIZE_MB,
};
pub use entry::{validate_key, CacheEntry, SyncType};
pub use error::{CoreError, CoreResult};
