use async_trait::async_trait;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tracing::debug;

use super::{ArchiveStore, StoreError};

/// Bucket backed by a directory: objects live at `<path>/<bucket>/<key>`.
#[derive(Debug, Clone)]
pub struct LocalArchiveStore {
    bucket_path: PathBuf,
}

impl LocalArchiveStore {
    pub fn new(path: impl AsRef<Path>, bucket: &str) -> Self {
        Self {
            bucket_path: path.as_ref().join(bucket),
        }
    }

    pub fn object_path(&self, key: &str) -> Result<PathBuf, StoreError> {
        if key.is_empty() || key.contains('/') || key.contains('\\') || key.starts_with('.') {
            return Err(StoreError::Backend(format!("invalid object key {key:?}")));
        }
        Ok(self.bucket_path.join(key))
    }
}

#[async_trait]
impl ArchiveStore for LocalArchiveStore {
    async fn get(&self, key: &str) -> Result<Vec<u8>, StoreError> {
        let path = self.object_path(key)?;
        match tokio::fs::read(&path).await {
            Ok(body) => {
                debug!(key = %key, bytes = body.len(), "Read object");
                Ok(body)
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Err(StoreError::NotFound {
                key: key.to_string(),
            }),
            Err(e) => Err(e.into()),
        }
    }

    async fn put(&self, key: &str, body: Vec<u8>) -> Result<String, StoreError> {
        let path = self.object_path(key)?;
        tokio::fs::create_dir_all(&self.bucket_path).await?;

        // Write next to the target and rename so readers never see a partial object
        let staging = self.bucket_path.join(format!(".{key}.partial"));
        tokio::fs::write(&staging, &body).await?;
        tokio::fs::rename(&staging, &path).await?;

        debug!(key = %key, bytes = body.len(), "Wrote object");
        Ok(format!("file://{}", path.display()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn missing_object_is_not_found() {
        let tmp = TempDir::new().unwrap();
        let store = LocalArchiveStore::new(tmp.path(), "rhetor");

        let err = store.get("M220P-s1.tgz").await.unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn put_then_get() {
        let tmp = TempDir::new().unwrap();
        let store = LocalArchiveStore::new(tmp.path(), "rhetor");

        let location = store.put("M220P-s1.tgz", b"payload".to_vec()).await.unwrap();
        assert!(location.ends_with("rhetor/M220P-s1.tgz"));
        assert_eq!(store.get("M220P-s1.tgz").await.unwrap(), b"payload");

        store.put("M220P-s1.tgz", b"newer".to_vec()).await.unwrap();
        assert_eq!(store.get("M220P-s1.tgz").await.unwrap(), b"newer");
    }

    #[tokio::test]
    async fn keys_cannot_escape_bucket() {
        let tmp = TempDir::new().unwrap();
        let store = LocalArchiveStore::new(tmp.path(), "rhetor");

        assert!(store.get("../secret").await.is_err());
        assert!(!store.get("../secret").await.unwrap_err().is_not_found());
        assert!(store.put("a/b.tgz", vec![]).await.is_err());
    }
}
