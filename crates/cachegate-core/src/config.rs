//! Gateway configuration
//!
//! One immutable [`GatewayConfig`] is built at startup and handed to each
//! component. Sources, lowest to highest priority:
//! - Hardcoded defaults
//! - Optional TOML file (`CACHEGATE_CONFIG`, else `./cachegate.toml`)
//! - Environment variables, e.g. `CACHEGATE_STORAGE__ENGINE=s3`

use config::{Config, ConfigError, Environment, File, FileFormat};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Smallest cache budget accepted, in MiB.
pub const MIN_CACHE_SIZE_MB: u64 = 128;

/// Root configuration structure
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct GatewayConfig {
    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub auth: AuthConfig,

    #[serde(default)]
    pub metadata: MetadataConfig,

    #[serde(default)]
    pub storage: StorageConfig,

    #[serde(default)]
    pub cache: CacheConfig,

    #[serde(default)]
    pub sync: SyncConfig,

    #[serde(default)]
    pub migration: MigrationConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

impl GatewayConfig {
    /// Load configuration from the default file location and the environment.
    pub fn load() -> Result<Self, ConfigError> {
        let path = std::env::var("CACHEGATE_CONFIG").unwrap_or_else(|_| "cachegate".to_string());

        let config: GatewayConfig = Config::builder()
            .add_source(File::with_name(&path).required(false))
            .add_source(
                Environment::with_prefix("CACHEGATE")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()?;

        config.validate()?;
        Ok(config)
    }

    /// Parse a TOML document on top of the defaults.
    pub fn from_toml_str(contents: &str) -> Result<Self, ConfigError> {
        let config: GatewayConfig = Config::builder()
            .add_source(File::from_str(contents, FileFormat::Toml))
            .build()?
            .try_deserialize()?;

        config.validate()?;
        Ok(config)
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.auth.token_rotation_secs == 0 {
            return Err(ConfigError::Message(
                "auth.token_rotation_secs must be > 0".to_string(),
            ));
        }

        if self.metadata.max_connections == 0 {
            return Err(ConfigError::Message(
                "metadata.max_connections must be > 0".to_string(),
            ));
        }

        if self.storage.gzip_level > 9 {
            return Err(ConfigError::Message(format!(
                "storage.gzip_level must be <= 9, got {}",
                self.storage.gzip_level
            )));
        }

        if self.storage.rate_limit_per_sec == Some(0) {
            return Err(ConfigError::Message(
                "storage.rate_limit_per_sec must be > 0 when set".to_string(),
            ));
        }

        if self.storage.uses_s3_protocol() && self.storage.s3.bucket.trim().is_empty() {
            return Err(ConfigError::Message(format!(
                "storage.s3.bucket is required for engine `{}`",
                self.storage.engine
            )));
        }

        if self.cache.eviction_interval_secs == 0 {
            return Err(ConfigError::Message(
                "cache.eviction_interval_secs must be > 0".to_string(),
            ));
        }

        if self.server.health_check_interval_secs == 0 {
            return Err(ConfigError::Message(
                "server.health_check_interval_secs must be > 0".to_string(),
            ));
        }

        if self.sync.interval_secs == 0 {
            return Err(ConfigError::Message(
                "sync.interval_secs must be > 0".to_string(),
            ));
        }

        if self.migration.workers == 0 {
            return Err(ConfigError::Message(
                "migration.workers must be > 0".to_string(),
            ));
        }

        Ok(())
    }
}

/// HTTP gateway configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Maximum accepted form body size in MiB
    pub body_limit_mb: usize,
    /// Period of the background storage and metadata connectivity check.
    pub health_check_interval_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
            body_limit_mb: 17,
            health_check_interval_secs: 30,
        }
    }
}

impl ServerConfig {
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn health_check_interval(&self) -> Duration {
        Duration::from_secs(self.health_check_interval_secs)
    }
}

/// Gateway authentication
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct AuthConfig {
    /// Password exchanged for a token at `/login`. The gateway refuses to
    /// start without one.
    pub password: Option<String>,
    pub token_rotation_secs: u64,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            password: None,
            token_rotation_secs: 300,
        }
    }
}

impl AuthConfig {
    pub fn token_rotation(&self) -> Duration {
        Duration::from_secs(self.token_rotation_secs)
    }
}

/// Metadata store (SQLite) configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct MetadataConfig {
    pub database_url: String,
    /// Logical database name; also namespaces the local cold-tier directory.
    pub database_name: String,
    pub max_connections: u32,
}

impl Default for MetadataConfig {
    fn default() -> Self {
        Self {
            database_url: "sqlite://./data/cachegate.db".to_string(),
            database_name: "cachegate".to_string(),
            max_connections: 8,
        }
    }
}

/// Cold-tier storage engine configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Registered engine name: `local`, `s3`, `spaces`, `cos`, `memory`.
    pub engine: String,
    pub enable_gzip: bool,
    pub gzip_level: u32,
    /// Overrides the engine's default request cap per second.
    pub rate_limit_per_sec: Option<u32>,
    pub local: LocalStoreConfig,
    pub s3: S3StoreConfig,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            engine: "local".to_string(),
            enable_gzip: true,
            gzip_level: 9,
            rate_limit_per_sec: None,
            local: LocalStoreConfig::default(),
            s3: S3StoreConfig::default(),
        }
    }
}

impl StorageConfig {
    /// Engines backed by the S3 protocol need bucket settings.
    pub fn uses_s3_protocol(&self) -> bool {
        matches!(self.engine.as_str(), "s3" | "spaces" | "cos")
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct LocalStoreConfig {
    pub root: PathBuf,
}

impl Default for LocalStoreConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from("./data/cold"),
        }
    }
}

/// S3-compatible endpoint settings shared by `s3`, `spaces` and `cos`
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct S3StoreConfig {
    pub bucket: String,
    pub region: String,
    /// Custom endpoint, e.g. `https://nyc3.digitaloceanspaces.com`
    pub endpoint: Option<String>,
    pub access_key: Option<String>,
    pub secret_key: Option<String>,
    pub prefix: Option<String>,
}

impl Default for S3StoreConfig {
    fn default() -> Self {
        Self {
            bucket: String::new(),
            region: "us-east-1".to_string(),
            endpoint: None,
            access_key: None,
            secret_key: None,
            prefix: None,
        }
    }
}

/// Cache budget and eviction
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Explicit budget in MiB, floored at [`MIN_CACHE_SIZE_MB`]. `None`
    /// derives the budget from disk capacity.
    pub max_size_mb: Option<u64>,
    pub eviction_interval_secs: u64,
    /// Upper bound on waiting for running sweeps at shutdown.
    pub shutdown_timeout_secs: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_size_mb: None,
            eviction_interval_secs: 60,
            shutdown_timeout_secs: 3600,
        }
    }
}

impl CacheConfig {
    pub fn eviction_interval(&self) -> Duration {
        Duration::from_secs(self.eviction_interval_secs)
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.shutdown_timeout_secs)
    }
}

/// Sync engine schedule and rollback policy
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct SyncConfig {
    pub interval_secs: u64,
    pub restore_retry_delay_ms: u64,
    pub restore_retry_attempts: u32,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            interval_secs: 600,
            restore_retry_delay_ms: 2000,
            restore_retry_attempts: 3,
        }
    }
}

impl SyncConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    pub fn restore_retry_delay(&self) -> Duration {
        Duration::from_millis(self.restore_retry_delay_ms)
    }
}

/// Cross-instance migration
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct MigrationConfig {
    pub enabled: bool,
    pub workers: usize,
    pub item_retry_delay_ms: u64,
    pub item_retry_attempts: u32,
    pub sync_wait_interval_ms: u64,
    pub sync_wait_attempts: u32,
}

impl Default for MigrationConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            workers: 10,
            item_retry_delay_ms: 10_000,
            item_retry_attempts: 3,
            sync_wait_interval_ms: 30_000,
            sync_wait_attempts: 50,
        }
    }
}

impl MigrationConfig {
    pub fn item_retry_delay(&self) -> Duration {
        Duration::from_millis(self.item_retry_delay_ms)
    }

    pub fn sync_wait_interval(&self) -> Duration {
        Duration::from_millis(self.sync_wait_interval_ms)
    }
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// trace, debug, info, warn, error
    pub level: String,
    /// pretty or json
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "pretty".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_configuration() {
        let config = GatewayConfig::default();

        assert_eq!(config.server.port, 8080);
        assert_eq!(config.server.health_check_interval_secs, 30);
        assert_eq!(config.auth.token_rotation_secs, 300);
        assert_eq!(config.storage.engine, "local");
        assert!(config.storage.enable_gzip);
        assert_eq!(config.cache.max_size_mb, None);
        assert_eq!(config.cache.eviction_interval_secs, 60);
        assert_eq!(config.sync.restore_retry_delay_ms, 2000);
        assert_eq!(config.sync.restore_retry_attempts, 3);
        assert!(!config.migration.enabled);
        assert_eq!(config.migration.workers, 10);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_toml_overrides_defaults() {
        let config = GatewayConfig::from_toml_str(
            r#"
            [storage]
            engine = "spaces"
            enable_gzip = false

            [storage.s3]
            bucket = "cold"
            endpoint = "https://nyc3.digitaloceanspaces.com"

            [cache]
            max_size_mb = 512

            [migration]
            enabled = true
            "#,
        )
        .unwrap();

        assert_eq!(config.storage.engine, "spaces");
        assert!(!config.storage.enable_gzip);
        assert_eq!(config.storage.s3.bucket, "cold");
        assert_eq!(config.cache.max_size_mb, Some(512));
        assert!(config.migration.enabled);
        // untouched sections keep their defaults
        assert_eq!(config.sync.interval_secs, 600);
    }

    #[test]
    fn test_validation_rejects_s3_without_bucket() {
        let mut config = GatewayConfig::default();
        config.storage.engine = "s3".to_string();
        assert!(config.validate().is_err());

        config.storage.s3.bucket = "b".to_string();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validation_rejects_zero_values() {
        let mut config = GatewayConfig::default();
        config.migration.workers = 0;
        assert!(config.validate().is_err());

        let mut config = GatewayConfig::default();
        config.server.health_check_interval_secs = 0;
        assert!(config.validate().is_err());

        let mut config = GatewayConfig::default();
        config.storage.gzip_level = 10;
        assert!(config.validate().is_err());

        let mut config = GatewayConfig::default();
        config.storage.rate_limit_per_sec = Some(0);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("gateway.toml");
        std::fs::write(&path, "[server]\nport = 9090\n").unwrap();

        let config: GatewayConfig = Config::builder()
            .add_source(File::from(path.as_path()))
            .build()
            .unwrap()
            .try_deserialize()
            .unwrap();
        assert_eq!(config.server.port, 9090);
    }
}
