//! Filesystem-backed blob store.

use std::path::{Path, PathBuf};

use async_trait::async_trait;

use crate::error::{StoreError, StoreResult};
use crate::BlobStore;

/// Blob store rooted at a directory, one file per key.
///
/// Keys may contain `/` separators; they map onto subdirectories under the
/// root. Path traversal components (`..`, absolute paths) are rejected.
#[derive(Debug, Clone)]
pub struct FsBlobStore {
    root: PathBuf,
}

impl FsBlobStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn blob_path(&self, key: &str) -> StoreResult<PathBuf> {
        if key.is_empty() {
            return Err(StoreError::InvalidKey {
                key: key.to_string(),
            });
        }

        let relative = Path::new(key);
        let traversal = relative.components().any(|c| {
            !matches!(c, std::path::Component::Normal(_))
        });

        if traversal {
            return Err(StoreError::InvalidKey {
                key: key.to_string(),
            });
        }

        Ok(self.root.join(relative))
    }
}

#[async_trait]
impl BlobStore for FsBlobStore {
    async fn exists(&self, key: &str) -> StoreResult<bool> {
        let path = self.blob_path(key)?;
        Ok(tokio::fs::try_exists(&path).await?)
    }

    async fn read(&self, key: &str) -> StoreResult<Vec<u8>> {
        let path = self.blob_path(key)?;

        match tokio::fs::read(&path).await {
            Ok(data) => Ok(data),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(StoreError::NotFound {
                key: key.to_string(),
            }),
            Err(e) => Err(StoreError::Io(e)),
        }
    }

    async fn write(&self, key: &str, data: &[u8]) -> StoreResult<()> {
        let path = self.blob_path(key)?;

        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        tokio::fs::write(&path, data).await?;
        Ok(())
    }
}
