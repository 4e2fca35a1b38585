//! Slipway-Store: blob persistence for the slipway orchestrator
//!
//! This crate provides the storage abstraction the orchestrator uses for
//! state that survives across runs, most importantly the coverage manifest.
//!
//! ## Key Components
//!
//! - `BlobStore`: backend-agnostic key/value blob contract
//! - `FsBlobStore`: filesystem-backed implementation
//! - `MemoryBlobStore`: in-memory fake for tests

mod error;
mod fs;
pub mod memory;

use async_trait::async_trait;

pub use error::{StoreError, StoreResult};
pub use fs::FsBlobStore;
pub use memory::MemoryBlobStore;

/// Opaque key/value blob store.
///
/// Guarantees:
/// - `write(key, data)` replaces any previous value for `key`.
/// - `read(key)` returns the exact bytes last written for `key`.
/// - `exists(key)` is consistent with the outcome of `read(key)`.
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Whether a blob exists under `key`.
    async fn exists(&self, key: &str) -> StoreResult<bool>;

    /// Retrieve the blob stored under `key`. Returns `StoreError::NotFound`
    /// if absent.
    async fn read(&self, key: &str) -> StoreResult<Vec<u8>>;

    /// Store `data` under `key`, replacing any previous value.
    async fn write(&self, key: &str, data: &[u8]) -> StoreResult<()>;
}
