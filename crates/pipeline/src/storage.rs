//! Object storage for persisted inputs and generated results.
//!
//! The pipeline only needs "put bytes, get a URL back". [`ObjectStore`] is
//! that contract; [`S3ObjectStore`] implements it against any S3-compatible
//! endpoint (AWS, MinIO, GCS interoperability mode).

use std::time::Duration;

use async_trait::async_trait;
use aws_sdk_s3::presigning::PresigningConfig;
use aws_sdk_s3::primitives::ByteStream;
use serde::Serialize;

/// How the URL for a stored object should be issued.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UrlStyle {
    /// Time-limited presigned download URL.
    Signed { expires_in: Duration },
    /// Plain public URL; the bucket must allow anonymous reads.
    Public,
}

impl UrlStyle {
    /// Signed URL valid for `hours` (at least one).
    pub fn signed_for_hours(hours: u32) -> Self {
        UrlStyle::Signed {
            expires_in: Duration::from_secs(u64::from(hours.max(1)) * 3600),
        }
    }
}

/// A successfully stored object.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StoredObject {
    pub key: String,
    pub url: String,
}

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("Failed to upload object '{key}': {message}")]
    Upload { key: String, message: String },

    #[error("Failed to issue URL for '{key}': {message}")]
    Url { key: String, message: String },
}

/// Put-bytes-get-URL object store.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    async fn put(
        &self,
        key: &str,
        data: Vec<u8>,
        content_type: &str,
        url_style: UrlStyle,
    ) -> Result<StoredObject, StorageError>;
}

/// [`ObjectStore`] backed by an S3-compatible bucket.
pub struct S3ObjectStore {
    client: aws_sdk_s3::Client,
    bucket: String,
    public_base_url: String,
}

impl S3ObjectStore {
    /// Build a store from the default AWS credential chain.
    ///
    /// * `endpoint_url` - Custom endpoint for non-AWS providers; enables
    ///   path-style addressing.
    /// * `public_base_url` - Prefix for [`UrlStyle::Public`] URLs. Defaults to
    ///   the virtual-hosted AWS URL of the bucket.
    pub async fn from_env(
        bucket: String,
        endpoint_url: Option<String>,
        public_base_url: Option<String>,
    ) -> Self {
        let mut loader = aws_config::defaults(aws_config::BehaviorVersion::latest());
        if let Some(endpoint) = &endpoint_url {
            loader = loader.endpoint_url(endpoint);
        }
        let shared = loader.load().await;

        let s3_config = aws_sdk_s3::config::Builder::from(&shared)
            .force_path_style(endpoint_url.is_some())
            .build();

        Self::new(
            aws_sdk_s3::Client::from_conf(s3_config),
            bucket,
            public_base_url,
        )
    }

    pub fn new(client: aws_sdk_s3::Client, bucket: String, public_base_url: Option<String>) -> Self {
        let public_base_url = public_base_url
            .map(|url| url.trim_end_matches('/').to_string())
            .unwrap_or_else(|| format!("https://{bucket}.s3.amazonaws.com"));
        Self {
            client,
            bucket,
            public_base_url,
        }
    }

    pub fn bucket(&self) -> &str {
        &self.bucket
    }

    async fn presigned_url(&self, key: &str, expires_in: Duration) -> Result<String, StorageError> {
        let url_error = |message: String| StorageError::Url {
            key: key.to_string(),
            message,
        };

        let presigning = PresigningConfig::expires_in(expires_in).map_err(|e| url_error(e.to_string()))?;
        let request = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(key)
            .presigned(presigning)
            .await
            .map_err(|e| url_error(e.to_string()))?;

        Ok(request.uri().to_string())
    }
}

#[async_trait]
impl ObjectStore for S3ObjectStore {
    async fn put(
        &self,
        key: &str,
        data: Vec<u8>,
        content_type: &str,
        url_style: UrlStyle,
    ) -> Result<StoredObject, StorageError> {
        let size_bytes = data.len();
        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .content_type(content_type)
            .body(ByteStream::from(data))
            .send()
            .await
            .map_err(|e| StorageError::Upload {
                key: key.to_string(),
                message: e.to_string(),
            })?;

        let url = match url_style {
            UrlStyle::Signed { expires_in } => self.presigned_url(key, expires_in).await?,
            UrlStyle::Public => public_url(&self.public_base_url, key),
        };

        tracing::debug!(bucket = %self.bucket, key, size_bytes, "Stored object");
        Ok(StoredObject {
            key: key.to_string(),
            url,
        })
    }
}

fn public_url(base: &str, key: &str) -> String {
    format!("{base}/{key}")
}
