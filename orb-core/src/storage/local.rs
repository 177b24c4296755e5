use super::{ObjectStorage, RangeReader, StorageError};
use async_trait::async_trait;
use std::path::{Component, Path, PathBuf};
use tokio::io::{AsyncReadExt, AsyncSeekExt};

/// Filesystem-backed object store rooted at a single directory.
pub struct LocalStorage {
    root: PathBuf,
}

impl LocalStorage {
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }

    /// Resolve a key under the root. Keys with parent-dir components are
    /// rejected so a crafted key can't escape the store.
    fn resolve(&self, key: &str) -> Result<PathBuf, StorageError> {
        let rel = Path::new(key);
        if rel.components().any(|c| {
            matches!(c, Component::ParentDir | Component::RootDir | Component::Prefix(_))
        }) {
            return Err(StorageError::InvalidKey(key.to_string()));
        }
        Ok(self.root.join(rel))
    }
}

#[async_trait]
impl ObjectStorage for LocalStorage {
    async fn put(&self, key: &str, data: &[u8]) -> Result<(), StorageError> {
        let path = self.resolve(key)?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&path, data).await?;
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Vec<u8>, StorageError> {
        let path = self.resolve(key)?;
        match tokio::fs::read(&path).await {
            Ok(data) => Ok(data),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(StorageError::NotFound(key.to_string()))
            }
            Err(e) => Err(e.into()),
        }
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
        let path = self.resolve(key)?;
        let mut file = match tokio::fs::File::open(&path).await {
            Ok(f) => f,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(StorageError::NotFound(key.to_string()))
            }
            Err(e) => return Err(e.into()),
        };
        file.seek(std::io::SeekFrom::Start(start)).await?;
        Ok(Box::new(file.take(end - start)))
    }

    async fn size(&self, key: &str) -> Result<u64, StorageError> {
        let path = self.resolve(key)?;
        match tokio::fs::metadata(&path).await {
            Ok(meta) => Ok(meta.len()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(StorageError::NotFound(key.to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn exists(&self, key: &str) -> Result<bool, StorageError> {
        let path = self.resolve(key)?;
        Ok(tokio::fs::try_exists(&path).await?)
    }

    async fn delete(&self, key: &str) -> Result<(), StorageError> {
        let path = self.resolve(key)?;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncReadExt;

    fn store() -> (tempfile::TempDir, LocalStorage) {
        let dir = tempfile::tempdir().unwrap();
        let storage = LocalStorage::new(dir.path().to_path_buf());
        (dir, storage)
    }

    #[tokio::test]
    async fn put_get_roundtrip() {
        let (_dir, storage) = store();
        storage.put("audio/a/b/t.flac", b"hello flac").await.unwrap();
        assert!(storage.exists("audio/a/b/t.flac").await.unwrap());
        assert_eq!(storage.get("audio/a/b/t.flac").await.unwrap(), b"hello flac");
        assert_eq!(storage.size("audio/a/b/t.flac").await.unwrap(), 10);
    }

    #[tokio::test]
    async fn ranged_read() {
        let (_dir, storage) = store();
        storage.put("blob", b"0123456789").await.unwrap();

        let mut reader = storage.open_range("blob", 2, 6).await.unwrap();
        let mut buf = Vec::new();
        reader.read_to_end(&mut buf).await.unwrap();
        assert_eq!(buf, b"2345");
    }

    #[tokio::test]
    async fn range_split_concatenation_equals_whole() {
        let (_dir, storage) = store();
        let data: Vec<u8> = (0..=255u8).cycle().take(10_000).collect();
        storage.put("blob", &data).await.unwrap();

        for split in [1u64, 137, 5_000, 9_999] {
            let mut first = Vec::new();
            storage
                .open_range("blob", 0, split)
                .await
                .unwrap()
                .read_to_end(&mut first)
                .await
                .unwrap();

            let mut second = Vec::new();
            storage
                .open_range("blob", split, data.len() as u64)
                .await
                .unwrap()
                .read_to_end(&mut second)
                .await
                .unwrap();

            first.extend_from_slice(&second);
            assert_eq!(first, data, "split at {} must reassemble the file", split);
        }
    }

    #[tokio::test]
    async fn missing_object_is_not_found() {
        let (_dir, storage) = store();
        assert!(matches!(
            storage.get("nope").await,
            Err(StorageError::NotFound(_))
        ));
        assert!(matches!(
            storage.size("nope").await,
            Err(StorageError::NotFound(_))
        ));
        assert!(!storage.exists("nope").await.unwrap());
    }

    #[tokio::test]
    async fn rejects_escaping_keys() {
        let (_dir, storage) = store();
        assert!(matches!(
            storage.get("../etc/passwd").await,
            Err(StorageError::InvalidKey(_))
        ));
        assert!(matches!(
            storage.put("/abs/path", b"x").await,
            Err(StorageError::InvalidKey(_))
        ));
    }

    #[tokio::test]
    async fn invalid_range_rejected() {
        let (_dir, storage) = store();
        storage.put("blob", b"abc").await.unwrap();
        assert!(matches!(
            storage.open_range("blob", 5, 5).await,
            Err(StorageError::InvalidRange { .. })
        ));
    }

    #[tokio::test]
    async fn delete_is_idempotent() {
        let (_dir, storage) = store();
        storage.put("blob", b"abc").await.unwrap();
        storage.delete("blob").await.unwrap();
        storage.delete("blob").await.unwrap();
        assert!(!storage.exists("blob").await.unwrap());
    }
}
