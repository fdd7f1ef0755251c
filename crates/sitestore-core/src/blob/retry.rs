//! Bounded retry for idempotent blob reads.

use std::future::Future;

use async_trait::async_trait;
use bytes::Bytes;
use tracing::warn;

use super::{BlobMeta, BlobStore, BlobVersion, VersionedBlob};
use crate::config::RetryPolicy;
use crate::error::Result;

/// Retries `list`, `get` and `exists` on transient failures with exponential
/// backoff. Writes pass straight through: a retried write could commit
/// against an integrity snapshot that is no longer current.
pub struct RetryingBlobStore<S> {
    inner: S,
    policy: RetryPolicy,
}

impl<S: BlobStore> RetryingBlobStore<S> {
    /// Wrap `inner` with `policy`.
    pub fn new(inner: S, policy: RetryPolicy) -> Self {
        Self { inner, policy }
    }

    /// Borrow the wrapped store.
    pub fn inner(&self) -> &S {
        &self.inner
    }

    async fn read<T, F, Fut>(&self, operation: &'static str, key: &str, mut call: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut attempt = 0;
        loop {
            match call().await {
                Err(e) if e.is_retryable() && attempt < self.policy.max_retries => {
                    let delay = self.policy.delay_for(attempt);
                    warn!(
                        operation,
                        key,
                        attempt = attempt + 1,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "retrying blob read"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                result => return result,
            }
        }
    }
}

#[async_trait]
impl<S: BlobStore> BlobStore for RetryingBlobStore<S> {
    async fn list(&self, prefix: &str) -> Result<Vec<BlobMeta>> {
        self.read("list", prefix, || self.inner.list(prefix)).await
    }

    async fn get_versioned(&self, key: &str) -> Result<Option<VersionedBlob>> {
        self.read("get", key, || self.inner.get_versioned(key)).await
    }

    async fn get(&self, key: &str) -> Result<Option<Bytes>> {
        self.read("get", key, || self.inner.get(key)).await
    }

    async fn put(&self, key: &str, data: Bytes) -> Result<BlobVersion> {
        self.inner.put(key, data).await
    }

    async fn put_if_absent(&self, key: &str, data: Bytes) -> Result<Option<BlobVersion>> {
        self.inner.put_if_absent(key, data).await
    }

    async fn put_if_match(
        &self,
        key: &str,
        data: Bytes,
        expected: &BlobVersion,
    ) -> Result<Option<BlobVersion>> {
        self.inner.put_if_match(key, data, expected).await
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.inner.delete(key).await
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        self.read("exists", key, || self.inner.exists(key)).await
    }
}
