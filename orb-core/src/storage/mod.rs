//! Content-addressed blob backend for audio files and cover images.
mod local;
mod s3;

pub use local::LocalStorage;
pub use s3::{S3Config, S3Storage};

use crate::config::{StorageBackend, StoreConfig};
use async_trait::async_trait;
use std::sync::Arc;
use thiserror::Error;
use tokio::io::AsyncRead;
use uuid::Uuid;

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("object not found: {0}")]
    NotFound(String),
    #[error("invalid range: start ({start}) >= end ({end})")]
    InvalidRange { start: u64, end: u64 },
    #[error("invalid key: {0}")]
    InvalidKey(String),
    #[error("storage backend error: {0}")]
    Backend(String),
}

/// A readable byte stream for a ranged object read.
pub type RangeReader = Box<dyn AsyncRead + Send + Unpin>;

/// Object store operations the server and ingest engine need.
///
/// Writes are idempotent by key. Ranged reads use the [start, end) convention
/// and return a stream so callers copy through a fixed buffer instead of
/// holding whole files in memory.
#[async_trait]
pub trait ObjectStorage: Send + Sync {
    async fn put(&self, key: &str, data: &[u8]) -> Result<(), StorageError>;

    async fn get(&self, key: &str) -> Result<Vec<u8>, StorageError>;

    /// Open a streaming read of `[start, end)`.
    async fn open_range(&self, key: &str, start: u64, end: u64)
        -> Result<RangeReader, StorageError>;

    /// Size of the object in bytes.
    async fn size(&self, key: &str) -> Result<u64, StorageError>;

    async fn exists(&self, key: &str) -> Result<bool, StorageError>;

    async fn delete(&self, key: &str) -> Result<(), StorageError>;
}

/// Build the configured backend.
pub async fn from_config(config: &StoreConfig) -> Result<Arc<dyn ObjectStorage>, StorageError> {
    match config.backend {
        StorageBackend::Local => Ok(Arc::new(LocalStorage::new(config.root.clone()))),
        StorageBackend::S3 => {
            let s3_config = S3Config {
                bucket: config.bucket.clone().unwrap_or_default(),
                region: config
                    .s3_region
                    .clone()
                    .unwrap_or_else(|| "us-east-1".to_string()),
                endpoint_url: config.s3_endpoint.clone(),
                access_key_id: config.s3_access_key.clone().unwrap_or_default(),
                secret_access_key: config.s3_secret_key.clone().unwrap_or_default(),
            };
            Ok(Arc::new(S3Storage::new(s3_config).await?))
        }
    }
}

// ----------------------------------------------------------------------
// Key layout
// ----------------------------------------------------------------------

pub fn audio_key(artist_id: &str, album_id: &str, track_id: Uuid, ext: &str) -> String {
    format!("audio/{}/{}/{}.{}", artist_id, album_id, track_id, ext)
}

pub fn album_cover_key(album_id: &str) -> String {
    format!("covers/{}.jpg", album_id)
}

pub fn artist_image_key(artist_id: &str) -> String {
    format!("artists/{}.jpg", artist_id)
}

pub fn playlist_cover_key(playlist_id: Uuid) -> String {
    format!("covers/playlist/{}", playlist_id)
}
