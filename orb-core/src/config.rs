use std::path::PathBuf;
use thiserror::Error;
use uuid::Uuid;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("music root does not exist: {0}")]
    MissingRoot(PathBuf),
    #[error("configuration error: {0}")]
    Invalid(String),
}

/// Which object-store backend holds audio and cover blobs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageBackend {
    Local,
    S3,
}

impl std::str::FromStr for StorageBackend {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "local" => Ok(Self::Local),
            "s3" => Ok(Self::S3),
            other => Err(ConfigError::Invalid(format!(
                "unknown storage backend '{}' (expected 'local' or 's3')",
                other
            ))),
        }
    }
}

/// Object-store coordinates shared by the server and the ingest CLI.
#[derive(Debug, Clone)]
pub struct StoreConfig {
    pub backend: StorageBackend,
    /// Root directory for the local backend.
    pub root: PathBuf,
    pub bucket: Option<String>,
    pub s3_region: Option<String>,
    pub s3_endpoint: Option<String>,
    pub s3_access_key: Option<String>,
    pub s3_secret_key: Option<String>,
}

impl StoreConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.backend == StorageBackend::S3 {
            if self.bucket.as_deref().map(str::trim).unwrap_or("").is_empty() {
                return Err(ConfigError::Invalid(
                    "s3 backend requires a bucket name".to_string(),
                ));
            }
            if self.s3_access_key.is_none() || self.s3_secret_key.is_none() {
                return Err(ConfigError::Invalid(
                    "s3 backend requires access and secret keys".to_string(),
                ));
            }
        }
        Ok(())
    }
}

/// Everything the ingest engine needs for one run.
///
/// An explicit record: every recognized key is a field, nothing is looked up
/// dynamically.
#[derive(Debug, Clone)]
pub struct IngestConfig {
    /// Root of the audio tree to scan.
    pub dir: PathBuf,
    /// Postgres DSN for the catalog.
    pub db_dsn: String,
    pub store: StoreConfig,
    /// Tracks are added to this user's library when set.
    pub owner_user_id: Option<Uuid>,
    pub recursive: bool,
    pub dry_run: bool,
    pub watch: bool,
    /// Worker pool size; defaults to the processor count.
    pub workers: usize,
}

impl IngestConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.dir.is_dir() {
            return Err(ConfigError::MissingRoot(self.dir.clone()));
        }
        if self.workers == 0 {
            return Err(ConfigError::Invalid("workers must be at least 1".to_string()));
        }
        self.store.validate()
    }
}

/// Default worker count: one per processor.
pub fn default_workers() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(4)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn local_store(root: &std::path::Path) -> StoreConfig {
        StoreConfig {
            backend: StorageBackend::Local,
            root: root.to_path_buf(),
            bucket: None,
            s3_region: None,
            s3_endpoint: None,
            s3_access_key: None,
            s3_secret_key: None,
        }
    }

    #[test]
    fn backend_parse() {
        assert_eq!("local".parse::<StorageBackend>().unwrap(), StorageBackend::Local);
        assert_eq!("S3".parse::<StorageBackend>().unwrap(), StorageBackend::S3);
        assert!("gcs".parse::<StorageBackend>().is_err());
    }

    #[test]
    fn s3_requires_bucket_and_keys() {
        let mut store = local_store(std::path::Path::new("/tmp"));
        store.backend = StorageBackend::S3;
        assert!(store.validate().is_err());

        store.bucket = Some("orb-audio".to_string());
        assert!(store.validate().is_err());

        store.s3_access_key = Some("key".to_string());
        store.s3_secret_key = Some("secret".to_string());
        assert!(store.validate().is_ok());
    }

    #[test]
    fn ingest_config_rejects_missing_root() {
        let tmp = tempfile::tempdir().unwrap();
        let config = IngestConfig {
            dir: tmp.path().join("nope"),
            db_dsn: "postgres://localhost/orb".to_string(),
            store: local_store(tmp.path()),
            owner_user_id: None,
            recursive: true,
            dry_run: false,
            watch: false,
            workers: 4,
        };
        assert!(matches!(config.validate(), Err(ConfigError::MissingRoot(_))));
    }
}
