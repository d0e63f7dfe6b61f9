//! S3-compatible storage client
//!
//! The worker needs exactly two storage operations: mint a short-lived
//! presigned GET URL for a batch's storage path, and fetch that URL as a
//! byte stream. Uploaded files are consumed incrementally by the pipeline;
//! nothing here buffers a whole file.

use std::env;
use std::time::Duration;

use aws_sdk_s3::{
    config::{Credentials, Region},
    presigning::PresigningConfig,
    Client,
};
use futures::TryStreamExt;
use serde::{Deserialize, Serialize};
use tokio_util::io::StreamReader;
use tracing::debug;

use crate::error::{WorkerError, WorkerResult};

/// Default S3 region when not specified via environment variable.
pub const DEFAULT_S3_REGION: &str = "us-east-1";

/// Configuration for the S3-compatible storage backend
///
/// The endpoint and server-side credential are required: the worker talks to
/// a dedicated MinIO/S3-compatible deployment, never ambient AWS identity.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    pub endpoint: String,
    pub region: String,
    pub bucket: String,
    pub access_key: String,
    pub secret_key: String,
    pub path_style: bool,
}

impl StorageConfig {
    /// Load storage configuration from environment variables.
    ///
    /// Checked (in order of precedence):
    /// - `STORAGE_S3_ENDPOINT` / `S3_ENDPOINT`
    /// - `STORAGE_S3_REGION` / `S3_REGION`
    /// - `STORAGE_S3_BUCKET` / `S3_BUCKET`
    /// - `STORAGE_S3_ACCESS_KEY` / `S3_ACCESS_KEY` / `AWS_ACCESS_KEY_ID`
    /// - `STORAGE_S3_SECRET_KEY` / `S3_SECRET_KEY` / `AWS_SECRET_ACCESS_KEY`
    /// - `STORAGE_S3_PATH_STYLE` / `S3_PATH_STYLE`
    pub fn from_env() -> anyhow::Result<Self> {
        let config = Self {
            endpoint: env::var("STORAGE_S3_ENDPOINT")
                .or_else(|_| env::var("S3_ENDPOINT"))
                .map_err(|_| anyhow::anyhow!("STORAGE_S3_ENDPOINT must be set"))?,
            region: env::var("STORAGE_S3_REGION")
                .or_else(|_| env::var("S3_REGION"))
                .unwrap_or_else(|_| DEFAULT_S3_REGION.to_string()),
            bucket: env::var("STORAGE_S3_BUCKET")
                .or_else(|_| env::var("S3_BUCKET"))
                .map_err(|_| anyhow::anyhow!("STORAGE_S3_BUCKET must be set"))?,
            access_key: env::var("STORAGE_S3_ACCESS_KEY")
                .or_else(|_| env::var("S3_ACCESS_KEY"))
                .or_else(|_| env::var("AWS_ACCESS_KEY_ID"))
                .map_err(|_| anyhow::anyhow!("STORAGE_S3_ACCESS_KEY must be set"))?,
            secret_key: env::var("STORAGE_S3_SECRET_KEY")
                .or_else(|_| env::var("S3_SECRET_KEY"))
                .or_else(|_| env::var("AWS_SECRET_ACCESS_KEY"))
                .map_err(|_| anyhow::anyhow!("STORAGE_S3_SECRET_KEY must be set"))?,
            path_style: env::var("STORAGE_S3_PATH_STYLE")
                .or_else(|_| env::var("S3_PATH_STYLE"))
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(true),
        };

        config.validate()?;
        Ok(config)
    }

    /// Storage configuration for a local MinIO instance (development/tests).
    pub fn for_minio(endpoint: impl Into<String>, bucket: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            region: DEFAULT_S3_REGION.to_string(),
            bucket: bucket.into(),
            access_key: "minioadmin".to_string(),
            secret_key: "minioadmin".to_string(),
            path_style: true,
        }
    }

    /// Validate storage configuration
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.endpoint.is_empty() {
            anyhow::bail!("storage endpoint cannot be empty");
        }
        if self.bucket.is_empty() {
            anyhow::bail!("storage bucket cannot be empty");
        }
        if self.access_key.is_empty() || self.secret_key.is_empty() {
            anyhow::bail!("storage credentials cannot be empty");
        }
        Ok(())
    }
}

/// S3-compatible storage client
///
/// Thread-safe and clonable; stateless per call.
#[derive(Clone)]
pub struct Storage {
    client: Client,
    http: reqwest::Client,
    bucket: String,
}

impl Storage {
    /// Create a storage client from configuration.
    pub fn new(config: &StorageConfig) -> Self {
        let credentials = Credentials::new(
            &config.access_key,
            &config.secret_key,
            None,
            None,
            "pim-storage",
        );

        let s3_config = aws_sdk_s3::Config::builder()
            .credentials_provider(credentials)
            .region(Region::new(config.region.clone()))
            .endpoint_url(&config.endpoint)
            .force_path_style(config.path_style)
            .build();

        Self {
            client: Client::from_conf(s3_config),
            http: reqwest::Client::new(),
            bucket: config.bucket.clone(),
        }
    }

    /// Generate a short-lived presigned GET URL for a storage path.
    pub async fn signed_url(
        &self,
        storage_path: &str,
        expires_in: Duration,
    ) -> WorkerResult<String> {
        debug!(
            storage_path,
            expires_in_secs = expires_in.as_secs(),
            "generating presigned download URL"
        );

        let presigning = PresigningConfig::expires_in(expires_in)
            .map_err(|e| WorkerError::Storage(format!("invalid presigning config: {}", e)))?;

        let request = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(storage_path)
            .presigned(presigning)
            .await
            .map_err(|e| {
                WorkerError::Storage(format!("failed to presign {}: {}", storage_path, e))
            })?;

        Ok(request.uri().to_string())
    }

    /// Fetch a signed URL and return the response body as a byte stream.
    ///
    /// Fails on a non-success HTTP status or an empty body. The stream is
    /// consumed incrementally by the caller.
    pub async fn fetch_stream(
        &self,
        url: &str,
    ) -> WorkerResult<impl tokio::io::AsyncRead + Unpin + Send> {
        let response = self.http.get(url).send().await?;

        let status = response.status();
        if !status.is_success() {
            return Err(WorkerError::Storage(format!(
                "download failed with HTTP {}",
                status
            )));
        }
        if response.content_length() == Some(0) {
            return Err(WorkerError::Storage("download body is empty".to_string()));
        }

        let stream = response
            .bytes_stream()
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e));

        Ok(StreamReader::new(Box::pin(stream)))
    }
}
