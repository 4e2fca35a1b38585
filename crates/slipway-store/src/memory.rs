//! In-memory fake for the `BlobStore` trait (testing only)
//!
//! Satisfies the trait contract without touching the filesystem, so
//! orchestrator tests can assert on persisted state directly.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;

use crate::error::{StoreError, StoreResult};
use crate::BlobStore;

/// In-memory blob store backed by a `HashMap<key, bytes>`.
#[derive(Debug, Default)]
pub struct MemoryBlobStore {
    blobs: Mutex<HashMap<String, Vec<u8>>>,
}

impl MemoryBlobStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of all stored keys, for test assertions.
    pub fn keys(&self) -> Vec<String> {
        let blobs = self.blobs.lock().unwrap();
        blobs.keys().cloned().collect()
    }
}

#[async_trait]
impl BlobStore for MemoryBlobStore {
    async fn exists(&self, key: &str) -> StoreResult<bool> {
        let blobs = self.blobs.lock().unwrap();
        Ok(blobs.contains_key(key))
    }

    async fn read(&self, key: &str) -> StoreResult<Vec<u8>> {
        let blobs = self.blobs.lock().unwrap();
        blobs.get(key).cloned().ok_or_else(|| StoreError::NotFound {
            key: key.to_string(),
        })
    }

    async fn write(&self, key: &str, data: &[u8]) -> StoreResult<()> {
        let mut blobs = self.blobs.lock().unwrap();
        blobs.insert(key.to_string(), data.to_vec());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn memory_store_contract() {
        let store = MemoryBlobStore::new();

        assert!(!store.exists("a").await.unwrap());
        store.write("a", b"payload").await.unwrap();
        assert!(store.exists("a").await.unwrap());
        assert_eq!(store.read("a").await.unwrap(), b"payload");
        assert_eq!(store.keys(), vec!["a".to_string()]);
    }

    #[tokio::test]
    async fn missing_read_errors() {
        let store = MemoryBlobStore::new();
        assert!(matches!(
            store.read("nope").await.unwrap_err(),
            StoreError::NotFound { .. }
        ));
    }
}
