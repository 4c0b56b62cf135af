//! Object storage client
//!
//! A thin client over an S3-compatible blob API: one `put` per artifact,
//! tagged with its content encoding so downstream consumers can decompress
//! transparently.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Mutex;

use async_trait::async_trait;
use tokio_util::io::ReaderStream;

use crate::error::StorageError;

/// Where recordings are uploaded
#[derive(Debug, Clone)]
pub struct ObjectStorageConfig {
    /// Base URL of the storage service
    pub endpoint: String,
    /// Bucket name
    pub bucket: String,
    /// Bearer token, if the store requires one
    pub auth_token: Option<String>,
}

/// Storage backend seam
///
/// The pipeline only needs `put`; swapping the HTTP client for an in-memory
/// store keeps the state machine testable without a network.
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Upload the file at `path` under `key`
    async fn put(
        &self,
        key: &str,
        path: &Path,
        content_encoding: &str,
    ) -> Result<(), StorageError>;
}

/// HTTP object storage backend
pub struct HttpObjectStorage {
    config: ObjectStorageConfig,
    client: reqwest::Client,
}

impl HttpObjectStorage {
    /// Create a client for the configured store
    pub fn new(config: ObjectStorageConfig) -> Self {
        Self {
            config,
            client: reqwest::Client::new(),
        }
    }

    fn object_url(&self, key: &str) -> String {
        format!(
            "{}/{}/{}",
            self.config.endpoint.trim_end_matches('/'),
            self.config.bucket,
            key
        )
    }
}

#[async_trait]
impl BlobStore for HttpObjectStorage {
    async fn put(
        &self,
        key: &str,
        path: &Path,
        content_encoding: &str,
    ) -> Result<(), StorageError> {
        let file = tokio::fs::File::open(path)
            .await
            .map_err(|e| StorageError::Request(format!("open {}: {e}", path.display())))?;
        let len = file
            .metadata()
            .await
            .map_err(|e| StorageError::Request(e.to_string()))?
            .len();

        let mut request = self
            .client
            .put(self.object_url(key))
            .header(reqwest::header::CONTENT_TYPE, "application/octet-stream")
            .header(reqwest::header::CONTENT_ENCODING, content_encoding)
            .header(reqwest::header::CONTENT_LENGTH, len)
            .body(reqwest::Body::wrap_stream(ReaderStream::new(file)));

        if let Some(token) = &self.config.auth_token {
            request = request.bearer_auth(token);
        }

        let response = request
            .send()
            .await
            .map_err(|e| StorageError::Request(e.to_string()))?;

        if !response.status().is_success() {
            return Err(StorageError::Rejected {
                key: key.to_owned(),
                status: response.status().as_u16(),
            });
        }

        tracing::info!(key = %key, bytes = len, "Recording uploaded");
        Ok(())
    }
}

/// In-memory store for tests and local development
#[derive(Debug, Default)]
pub struct MemoryBlobStore {
    objects: Mutex<HashMap<String, (Vec<u8>, String)>>,
}

impl MemoryBlobStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Stored object keys
    pub fn keys(&self) -> Vec<String> {
        self.objects.lock().unwrap().keys().cloned().collect()
    }

    /// Stored (bytes, content_encoding) for a key
    pub fn get(&self, key: &str) -> Option<(Vec<u8>, String)> {
        self.objects.lock().unwrap().get(key).cloned()
    }
}

#[async_trait]
impl BlobStore for MemoryBlobStore {
    async fn put(
        &self,
        key: &str,
        path: &Path,
        content_encoding: &str,
    ) -> Result<(), StorageError> {
        let bytes = tokio::fs::read(path)
            .await
            .map_err(|e| StorageError::Request(e.to_string()))?;
        self.objects
            .lock()
            .unwrap()
            .insert(key.to_owned(), (bytes, content_encoding.to_owned()));
        Ok(())
    }
}
