//! Compile-time storage engine registry
//!
//! Maps a configured engine name to the constructor of its backend. Adding a
//! backend means adding one [`EngineDescriptor`] to [`ENGINES`].

use crate::compression::CompressionConfig;
use crate::engine::{ObjectStoreEngine, StorageEngine};
use crate::object_store::{LocalObjectStore, MockObjectStore, ObjectStore, S3ObjectStore};
use cachegate_core::{CoreError, CoreResult, StorageConfig};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

type OpenFuture<'a> = Pin<Box<dyn Future<Output = CoreResult<Arc<dyn ObjectStore>>> + Send + 'a>>;

/// A registered storage engine.
pub struct EngineDescriptor {
    pub name: &'static str,
    /// Requests per second the provider allows; `None` is unthrottled.
    pub default_rate_limit: Option<u32>,
    open: for<'a> fn(&'a StorageConfig, &'a str) -> OpenFuture<'a>,
}

/// Every engine this build can connect to.
pub static ENGINES: &[EngineDescriptor] = &[
    EngineDescriptor {
        name: "local",
        default_rate_limit: None,
        open: open_local,
    },
    EngineDescriptor {
        name: "s3",
        default_rate_limit: None,
        open: open_s3,
    },
    EngineDescriptor {
        name: "spaces",
        default_rate_limit: Some(200),
        open: open_s3_compatible,
    },
    EngineDescriptor {
        name: "cos",
        default_rate_limit: Some(1000),
        open: open_s3_compatible,
    },
    EngineDescriptor {
        name: "memory",
        default_rate_limit: None,
        open: open_memory,
    },
];

fn open_local<'a>(config: &'a StorageConfig, database_name: &'a str) -> OpenFuture<'a> {
    Box::pin(async move {
        tracing::warn!("Storage engine `local` is meant for development and single-host use");
        let store = LocalObjectStore::new(config.local.root.join(database_name)).await?;
        Ok(Arc::new(store) as Arc<dyn ObjectStore>)
    })
}

fn open_s3<'a>(config: &'a StorageConfig, _database_name: &'a str) -> OpenFuture<'a> {
    Box::pin(async move {
        let store = S3ObjectStore::new(&config.s3).await?;
        Ok(Arc::new(store) as Arc<dyn ObjectStore>)
    })
}

fn open_s3_compatible<'a>(config: &'a StorageConfig, database_name: &'a str) -> OpenFuture<'a> {
    Box::pin(async move {
        if config.s3.endpoint.is_none() {
            return Err(CoreError::invalid_argument(format!(
                "storage engine `{}` requires storage.s3.endpoint",
                config.engine
            )));
        }
        open_s3(config, database_name).await
    })
}

fn open_memory<'a>(_config: &'a StorageConfig, _database_name: &'a str) -> OpenFuture<'a> {
    Box::pin(async move { Ok(Arc::new(MockObjectStore::new()) as Arc<dyn ObjectStore>) })
}

/// Look up a registered engine by name.
pub fn lookup(name: &str) -> CoreResult<&'static EngineDescriptor> {
    ENGINES.iter().find(|d| d.name == name).ok_or_else(|| {
        let known: Vec<&str> = ENGINES.iter().map(|d| d.name).collect();
        CoreError::invalid_argument(format!(
            "unknown storage engine `{}` (registered: {})",
            name,
            known.join(", ")
        ))
    })
}

/// Build the configured engine and verify it with a health check.
pub async fn connect(
    config: &StorageConfig,
    database_name: &str,
) -> CoreResult<Arc<dyn StorageEngine>> {
    let descriptor = lookup(&config.engine)?;
    let store = (descriptor.open)(config, database_name).await?;

    let engine = ObjectStoreEngine::new(
        descriptor.name,
        store,
        CompressionConfig {
            level: config.gzip_level,
            enabled: config.enable_gzip,
        },
        config.rate_limit_per_sec.or(descriptor.default_rate_limit),
    )?;

    engine.health_check().await?;

    tracing::info!(
        engine = descriptor.name,
        gzip = config.enable_gzip,
        rate_limit = ?engine.rate_limit_per_sec(),
        "Storage engine connected"
    );

    Ok(Arc::new(engine))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    #[test]
    fn test_registered_names() {
        let names: Vec<&str> = ENGINES.iter().map(|d| d.name).collect();
        assert_eq!(names, vec!["local", "s3", "spaces", "cos", "memory"]);
        assert_eq!(lookup("spaces").unwrap().default_rate_limit, Some(200));
        assert_eq!(lookup("cos").unwrap().default_rate_limit, Some(1000));
    }

    #[tokio::test]
    async fn test_unknown_engine() {
        let config = StorageConfig {
            engine: "floppy".to_string(),
            ..StorageConfig::default()
        };
        match connect(&config, "db").await {
            Err(CoreError::InvalidArgument(msg)) => assert!(msg.contains("registered: local")),
            Err(other) => panic!("unexpected error {:?}", other),
            Ok(_) => panic!("unknown engine connected"),
        }
    }

    #[tokio::test]
    async fn test_connect_local_namespaces_by_database() {
        let dir = TempDir::new().unwrap();
        let mut config = StorageConfig::default();
        config.local.root = dir.path().to_path_buf();

        let engine = connect(&config, "cachegate").await.unwrap();
        assert_eq!(engine.name(), "local");

        engine.set("a", &json!({"x": 1})).await.unwrap();
        assert!(dir.path().join("cachegate").join("a").exists());
        assert_eq!(engine.get("a").await.unwrap(), json!({"x": 1}));
    }

    #[tokio::test]
    async fn test_spaces_requires_endpoint() {
        let mut config = StorageConfig {
            engine: "spaces".to_string(),
            ..StorageConfig::default()
        };
        config.s3.bucket = "cold".to_string();

        assert!(matches!(
            connect(&config, "db").await,
            Err(CoreError::InvalidArgument(_))
        ));
    }

    #[tokio::test]
    async fn test_memory_engine_round_trip() {
        let config = StorageConfig {
            engine: "memory".to_string(),
            rate_limit_per_sec: Some(7),
            ..StorageConfig::default()
        };
        let engine = connect(&config, "db").await.unwrap();
        assert_eq!(engine.name(), "memory");

        engine.set("k", &json!([1])).await.unwrap();
        assert_eq!(engine.get("k").await.unwrap(), json!([1]));
        engine.disconnect().await.unwrap();
    }
}
