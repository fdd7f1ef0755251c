//! Blob store adapter.
//!
//! The rest of the crate only sees [`BlobStore`]: a flat key/value surface
//! with listing by prefix and no query, transaction or constraint support.
//! Conditional writes are the one concession, used where the underlying store
//! can enforce them.

mod object;
mod retry;

pub use object::ObjectBlobStore;
pub use retry::RetryingBlobStore;

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt, TryStreamExt};

use crate::error::Result;

/// Listing entry for one stored blob.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlobMeta {
    /// Full key.
    pub key: String,
    /// Size in bytes.
    pub size: u64,
    /// Last modification time reported by the store.
    pub last_modified: DateTime<Utc>,
}

/// Version token of a stored blob, used for compare-and-swap writes.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BlobVersion {
    /// Entity tag, if the store reports one.
    pub e_tag: Option<String>,
    /// Object version, if the store is versioned.
    pub version: Option<String>,
}

/// Blob contents together with the version they were read at.
#[derive(Debug, Clone)]
pub struct VersionedBlob {
    /// Raw bytes.
    pub data: Bytes,
    /// Version at read time.
    pub version: BlobVersion,
}

/// Flat key/value blob storage.
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// List every blob whose key starts with `prefix`, sorted by key.
    async fn list(&self, prefix: &str) -> Result<Vec<BlobMeta>>;

    /// Read a blob with its version; `None` if absent.
    async fn get_versioned(&self, key: &str) -> Result<Option<VersionedBlob>>;

    /// Read a blob; `None` if absent.
    async fn get(&self, key: &str) -> Result<Option<Bytes>> {
        Ok(self.get_versioned(key).await?.map(|blob| blob.data))
    }

    /// Unconditionally write a blob.
    async fn put(&self, key: &str, data: Bytes) -> Result<BlobVersion>;

    /// Write only if no blob exists at `key`.
    ///
    /// Returns `None` when the key is already taken.
    async fn put_if_absent(&self, key: &str, data: Bytes) -> Result<Option<BlobVersion>>;

    /// Write only if the stored blob is still at `expected`.
    ///
    /// Returns `None` when the blob changed or disappeared.
    async fn put_if_match(
        &self,
        key: &str,
        data: Bytes,
        expected: &BlobVersion,
    ) -> Result<Option<BlobVersion>>;

    /// Delete a blob. Deleting an absent key is not an error.
    async fn delete(&self, key: &str) -> Result<()>;

    /// Whether a blob exists at `key`.
    async fn exists(&self, key: &str) -> Result<bool>;
}

/// Concurrent reads issued while scanning a prefix.
const SCAN_CONCURRENCY: usize = 16;

/// Fetch every key, preserving order. Keys deleted since listing are
/// dropped.
pub async fn get_many(store: &dyn BlobStore, keys: Vec<String>) -> Result<Vec<(String, Bytes)>> {
    let fetched: Vec<(String, Option<Bytes>)> = stream::iter(keys)
        .map(|key| async move {
            let data = store.get(&key).await?;
            Ok::<_, crate::error::Error>((key, data))
        })
        .buffered(SCAN_CONCURRENCY)
        .try_collect()
        .await?;

    Ok(fetched
        .into_iter()
        .filter_map(|(key, data)| data.map(|data| (key, data)))
        .collect())
}
