//! [`BlobStore`] backed by the `object_store` crate.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures::TryStreamExt;
use object_store::aws::AmazonS3Builder;
use object_store::local::LocalFileSystem;
use object_store::memory::InMemory;
use object_store::path::Path;
use object_store::prefix::PrefixStore;
use object_store::{ObjectStore, PutMode, PutPayload, PutResult, UpdateVersion};
use tracing::debug;

use super::{BlobMeta, BlobStore, BlobVersion, VersionedBlob};
use crate::config::{Backend, BackendConfig};
use crate::error::{Error, Result};

/// Blob store over any [`ObjectStore`] (memory, local filesystem, S3).
///
/// Every call is bounded by a timeout; expiry surfaces as a transient error.
pub struct ObjectBlobStore {
    store: Arc<dyn ObjectStore>,
    timeout: Duration,
}

impl ObjectBlobStore {
    /// Wrap an existing object store.
    pub fn new(store: Arc<dyn ObjectStore>, timeout: Duration) -> Self {
        Self { store, timeout }
    }

    /// Process-local in-memory store.
    pub fn in_memory(timeout: Duration) -> Self {
        Self::new(Arc::new(InMemory::new()), timeout)
    }

    /// Open the backend described by `config`.
    pub fn open(config: &BackendConfig, timeout: Duration) -> Result<Self> {
        let store: Arc<dyn ObjectStore> = match &config.backend {
            Backend::Memory => Arc::new(InMemory::new()),
            Backend::Local(path) => {
                std::fs::create_dir_all(path).map_err(|e| {
                    Error::Store(format!(
                        "failed to create data directory {}: {}",
                        path.display(),
                        e
                    ))
                })?;
                let local = LocalFileSystem::new_with_prefix(path).map_err(|e| {
                    Error::Store(format!("failed to open {}: {}", path.display(), e))
                })?;
                Arc::new(local)
            }
            Backend::S3 { bucket } => {
                let s3 = AmazonS3Builder::from_env()
                    .with_bucket_name(bucket)
                    .build()
                    .map_err(|e| Error::Store(format!("failed to configure bucket {bucket}: {e}")))?;
                Arc::new(s3)
            }
        };

        let store = match &config.namespace {
            Some(namespace) => {
                let prefixed = PrefixStore::new(store, Path::from(namespace.as_str()));
                Arc::new(prefixed) as Arc<dyn ObjectStore>
            }
            None => store,
        };

        Ok(Self::new(store, timeout))
    }

    async fn timed<T>(
        &self,
        operation: &'static str,
        key: &str,
        fut: impl Future<Output = object_store::Result<T>>,
    ) -> Result<object_store::Result<T>> {
        tokio::time::timeout(self.timeout, fut).await.map_err(|_| {
            Error::transient(operation, key, format!("timed out after {:?}", self.timeout))
        })
    }

    async fn current_version(&self, key: &str) -> Result<Option<BlobVersion>> {
        let path = Path::from(key);
        match self.timed("head", key, self.store.head(&path)).await? {
            Ok(meta) => Ok(Some(BlobVersion {
                e_tag: meta.e_tag,
                version: meta.version,
            })),
            Err(object_store::Error::NotFound { .. }) => Ok(None),
            Err(e) => Err(store_error("head", key, e)),
        }
    }
}

fn version_of(result: PutResult) -> BlobVersion {
    BlobVersion {
        e_tag: result.e_tag,
        version: result.version,
    }
}

/// Classify an object store failure. Permission, authentication and
/// configuration failures are permanent; everything else may pass on retry.
fn store_error(operation: &'static str, key: &str, err: object_store::Error) -> Error {
    match &err {
        object_store::Error::PermissionDenied { .. }
        | object_store::Error::Unauthenticated { .. }
        | object_store::Error::InvalidPath { .. }
        | object_store::Error::NotSupported { .. }
        | object_store::Error::NotImplemented
        | object_store::Error::UnknownConfigurationKey { .. } => {
            Error::Store(format!("{operation} on '{key}': {err}"))
        }
        _ => Error::transient(operation, key, err),
    }
}

#[async_trait]
impl BlobStore for ObjectBlobStore {
    async fn list(&self, prefix: &str) -> Result<Vec<BlobMeta>> {
        let path = Path::from(prefix);
        let listing = self
            .timed(
                "list",
                prefix,
                self.store.list(Some(&path)).try_collect::<Vec<_>>(),
            )
            .await?
            .map_err(|e| store_error("list", prefix, e))?;

        let mut blobs: Vec<BlobMeta> = listing
            .into_iter()
            .map(|meta| BlobMeta {
                key: meta.location.to_string(),
                size: meta.size as u64,
                last_modified: meta.last_modified,
            })
            .collect();
        blobs.sort_by(|a, b| a.key.cmp(&b.key));

        Ok(blobs)
    }

    async fn get_versioned(&self, key: &str) -> Result<Option<VersionedBlob>> {
        let path = Path::from(key);
        let fetch = async {
            let result = self.store.get(&path).await?;
            let version = BlobVersion {
                e_tag: result.meta.e_tag.clone(),
                version: result.meta.version.clone(),
            };
            let data = result.bytes().await?;
            Ok::<_, object_store::Error>(VersionedBlob { data, version })
        };

        match self.timed("get", key, fetch).await? {
            Ok(blob) => Ok(Some(blob)),
            Err(object_store::Error::NotFound { .. }) => Ok(None),
            Err(e) => Err(store_error("get", key, e)),
        }
    }

    async fn put(&self, key: &str, data: Bytes) -> Result<BlobVersion> {
        let path = Path::from(key);
        self.timed("put", key, self.store.put(&path, PutPayload::from(data)))
            .await?
            .map(version_of)
            .map_err(|e| store_error("put", key, e))
    }

    async fn put_if_absent(&self, key: &str, data: Bytes) -> Result<Option<BlobVersion>> {
        let path = Path::from(key);
        let attempt = self.store.put_opts(
            &path,
            PutPayload::from(data.clone()),
            PutMode::Create.into(),
        );

        match self.timed("put", key, attempt).await? {
            Ok(result) => Ok(Some(version_of(result))),
            Err(object_store::Error::AlreadyExists { .. }) => Ok(None),
            Err(object_store::Error::NotImplemented) => {
                debug!(key, "conditional create unsupported, falling back to check-then-put");
                if self.exists(key).await? {
                    return Ok(None);
                }
                self.put(key, data).await.map(Some)
            }
            Err(e) => Err(store_error("put", key, e)),
        }
    }

    async fn put_if_match(
        &self,
        key: &str,
        data: Bytes,
        expected: &BlobVersion,
    ) -> Result<Option<BlobVersion>> {
        let path = Path::from(key);
        let mode = PutMode::Update(UpdateVersion {
            e_tag: expected.e_tag.clone(),
            version: expected.version.clone(),
        });
        let attempt = self
            .store
            .put_opts(&path, PutPayload::from(data.clone()), mode.into());

        match self.timed("put", key, attempt).await? {
            Ok(result) => Ok(Some(version_of(result))),
            Err(object_store::Error::Precondition { .. })
            | Err(object_store::Error::NotFound { .. }) => Ok(None),
            Err(object_store::Error::NotImplemented) => {
                debug!(key, "conditional update unsupported, falling back to version check");
                match self.current_version(key).await? {
                    Some(current) if current.e_tag == expected.e_tag => {
                        self.put(key, data).await.map(Some)
                    }
                    _ => Ok(None),
                }
            }
            Err(e) => Err(store_error("put", key, e)),
        }
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let path = Path::from(key);
        match self.timed("delete", key, self.store.delete(&path)).await? {
            Ok(()) | Err(object_store::Error::NotFound { .. }) => Ok(()),
            Err(e) => Err(store_error("delete", key, e)),
        }
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        Ok(self.current_version(key).await?.is_some())
    }
}
