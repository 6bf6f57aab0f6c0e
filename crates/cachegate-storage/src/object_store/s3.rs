//! S3-protocol implementation of ObjectStore
//!
//! Serves AWS S3 and the S3-compatible endpoints of DigitalOcean Spaces and
//! Tencent COS. Compressed payloads are tagged with `Content-Encoding: gzip`
//! in addition to the in-band gzip marker.

use super::ObjectStore;
use crate::compression::is_gzip;
use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_sdk_s3::{config::Credentials, primitives::ByteStream, Client, Config};
use bytes::Bytes;
use cachegate_core::{CoreError, CoreResult, S3StoreConfig};

/// S3-compatible object store
///
/// With `endpoint`, `access_key` and `secret_key` all set the client talks to
/// that endpoint with static credentials and path-style addressing;
/// otherwise the standard AWS credential chain is used.
pub struct S3ObjectStore {
    client: Client,
    bucket: String,
    prefix: Option<String>,
}

impl S3ObjectStore {
    /// Create a new S3 object store. Does not contact the endpoint; call
    /// [`ObjectStore::health_check`] for that.
    pub async fn new(config: &S3StoreConfig) -> CoreResult<Self> {
        if config.bucket.trim().is_empty() {
            return Err(CoreError::invalid_argument("S3 bucket must not be empty"));
        }

        let client = if let (Some(endpoint), Some(access), Some(secret)) =
            (&config.endpoint, &config.access_key, &config.secret_key)
        {
            let creds = Credentials::new(access, secret, None, None, "cachegate-static");

            let s3_config = Config::builder()
                .endpoint_url(endpoint)
                .credentials_provider(creds)
                .region(aws_sdk_s3::config::Region::new(config.region.clone()))
                .force_path_style(true)
                .behavior_version(BehaviorVersion::latest())
                .build();

            Client::from_conf(s3_config)
        } else {
            let mut loader = aws_config::defaults(BehaviorVersion::latest())
                .region(aws_config::Region::new(config.region.clone()));
            if let Some(endpoint) = &config.endpoint {
                loader = loader.endpoint_url(endpoint);
            }
            Client::new(&loader.load().await)
        };

        Ok(Self {
            client,
            bucket: config.bucket.clone(),
            prefix: config.prefix.clone(),
        })
    }

    fn full_key(&self, key: &str) -> String {
        match &self.prefix {
            Some(prefix) => format!("{}/{}", prefix.trim_end_matches('/'), key),
            None => key.to_string(),
        }
    }
}

#[async_trait]
impl ObjectStore for S3ObjectStore {
    async fn health_check(&self) -> CoreResult<()> {
        self.client
            .head_bucket()
            .bucket(&self.bucket)
            .send()
            .await
            .map_err(|e| {
                CoreError::unavailable(format!("bucket `{}` unreachable: {}", self.bucket, e))
            })?;
        Ok(())
    }

    async fn put(&self, key: &str, data: Bytes) -> CoreResult<()> {
        let encoding = is_gzip(&data).then(|| "gzip".to_string());

        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(self.full_key(key))
            .content_type("application/json")
            .set_content_encoding(encoding)
            .body(ByteStream::from(data))
            .send()
            .await
            .map_err(|e| CoreError::unavailable(format!("S3 put failed: {}", e)))?;

        Ok(())
    }

    async fn get(&self, key: &str) -> CoreResult<Bytes> {
        let resp = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(self.full_key(key))
            .send()
            .await
            .map_err(|e| {
                if e.as_service_error().map_or(false, |se| se.is_no_such_key()) {
                    CoreError::not_found("object", key)
                } else {
                    CoreError::unavailable(format!("S3 get failed: {}", e))
                }
            })?;

        let data = resp
            .body
            .collect()
            .await
            .map_err(|e| CoreError::unavailable(format!("S3 read failed: {}", e)))?
            .into_bytes();

        Ok(data)
    }

    async fn exists(&self, key: &str) -> CoreResult<bool> {
        match self
            .client
            .head_object()
            .bucket(&self.bucket)
            .key(self.full_key(key))
            .send()
            .await
        {
            Ok(_) => Ok(true),
            Err(e) if e.as_service_error().map_or(false, |se| se.is_not_found()) => Ok(false),
            Err(e) => Err(CoreError::unavailable(format!("S3 head failed: {}", e))),
        }
    }

    async fn delete(&self, key: &str) -> CoreResult<()> {
        // S3 DeleteObject succeeds for absent keys
        self.client
            .delete_object()
            .bucket(&self.bucket)
            .key(self.full_key(key))
            .send()
            .await
            .map_err(|e| CoreError::unavailable(format!("S3 delete failed: {}", e)))?;

        Ok(())
    }
}
