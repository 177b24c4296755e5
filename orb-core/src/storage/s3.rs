use super::{ObjectStorage, RangeReader, StorageError};
use async_trait::async_trait;
use aws_config::{BehaviorVersion, Region};
use aws_credential_types::Credentials;
use aws_sdk_s3::Client;
use tracing::{debug, info};

/// S3 coordinates for the blob backend.
#[derive(Debug, Clone)]
pub struct S3Config {
    pub bucket: String,
    pub region: String,
    pub endpoint_url: Option<String>,
    pub access_key_id: String,
    pub secret_access_key: String,
}

impl S3Config {
    pub fn validate(&self) -> Result<(), StorageError> {
        if self.bucket.trim().is_empty() {
            return Err(StorageError::Backend("bucket name cannot be empty".into()));
        }
        if self.access_key_id.trim().is_empty() || self.secret_access_key.trim().is_empty() {
            return Err(StorageError::Backend("S3 credentials cannot be empty".into()));
        }
        Ok(())
    }
}

/// S3-compatible object store (AWS, MinIO, ...).
pub struct S3Storage {
    client: Client,
    bucket: String,
}

impl S3Storage {
    pub async fn new(config: S3Config) -> Result<Self, StorageError> {
        config.validate()?;

        let credentials = Credentials::new(
            config.access_key_id,
            config.secret_access_key,
            None,
            None,
            "orb-s3-config",
        );

        let mut builder = aws_config::defaults(BehaviorVersion::latest())
            .region(Region::new(config.region))
            .credentials_provider(credentials);

        if let Some(endpoint) = &config.endpoint_url {
            let normalized = endpoint.trim_end_matches('/').to_string();
            info!("Using custom S3 endpoint: {}", normalized);
            builder = builder.endpoint_url(normalized);
        }

        let aws_config = builder.load().await;
        let s3_config = aws_sdk_s3::config::Builder::from(&aws_config)
            .force_path_style(true)
            .build();

        Ok(Self {
            client: Client::from_conf(s3_config),
            bucket: config.bucket,
        })
    }

    fn not_found(key: &str, err: impl std::fmt::Debug) -> StorageError {
        let msg = format!("{:?}", err);
        if msg.contains("NoSuchKey") || msg.contains("NotFound") {
            StorageError::NotFound(key.to_string())
        } else {
            StorageError::Backend(msg)
        }
    }
}

#[async_trait]
impl ObjectStorage for S3Storage {
    async fn put(&self, key: &str, data: &[u8]) -> Result<(), StorageError> {
        debug!("Uploading {} ({} bytes)", key, data.len());
        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .body(data.to_vec().into())
            .content_type("application/octet-stream")
            .send()
            .await
            .map_err(|e| StorageError::Backend(format!("put object failed: {}", e)))?;
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Vec<u8>, StorageError> {
        let response = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| Self::not_found(key, e))?;
        let data = response
            .body
            .collect()
            .await
            .map_err(|e| StorageError::Backend(format!("byte stream error: {}", e)))?
            .into_bytes()
            .to_vec();
        Ok(data)
    }

    async fn open_range(
        &self,
        key: &str,
        start: u64,
        end: u64,
    ) -> Result<RangeReader, StorageError> {
        if start >= end {
            return Err(StorageError::InvalidRange { start, end });
        }

        // S3 ranges are inclusive on both ends; ours is [start, end).
        let range = format!("bytes={}-{}", start, end - 1);
        debug!("Ranged read {} from {}", range, key);

        let response = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(key)
            .range(range)
            .send()
            .await
            .map_err(|e| Self::not_found(key, e))?;

        Ok(Box::new(response.body.into_async_read()))
    }

    async fn size(&self, key: &str) -> Result<u64, StorageError> {
        let head = self
            .client
            .head_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| Self::not_found(key, e))?;
        Ok(head.content_length().unwrap_or(0) as u64)
    }

    async fn exists(&self, key: &str) -> Result<bool, StorageError> {
        match self
            .client
            .head_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
        {
            Ok(_) => Ok(true),
            Err(e) => match Self::not_found(key, e) {
                StorageError::NotFound(_) => Ok(false),
                other => Err(other),
            },
        }
    }

    async fn delete(&self, key: &str) -> Result<(), StorageError> {
        self.client
            .delete_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| StorageError::Backend(format!("delete object failed: {}", e)))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_validation() {
        let mut config = S3Config {
            bucket: "orb-audio".to_string(),
            region: "us-east-1".to_string(),
            endpoint_url: None,
            access_key_id: "ak".to_string(),
            secret_access_key: "sk".to_string(),
        };
        assert!(config.validate().is_ok());

        config.bucket = "  ".to_string();
        assert!(config.validate().is_err());

        config.bucket = "orb-audio".to_string();
        config.access_key_id = String::new();
        assert!(config.validate().is_err());
    }
}
