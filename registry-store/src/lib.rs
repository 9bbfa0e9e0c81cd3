//! # Registry storage backends
//!
//! Persistence for the registry engine: content-addressed blobs linked into
//! repositories, manifests with tag indirection, and upload sessions.
//!
//! The [`StoreDriver`] trait is the backend contract; [`Store`] wraps a
//! driver in an `Arc` so the engine can hold and clone it cheaply.
//! [`StoreConfig`] is the runtime configuration surface:
//!
//! ```no_run
//! use registry_store::StoreConfig;
//!
//! # async fn example() -> Result<(), registry_store::StoreError> {
//! let store = StoreConfig::Memory.build().await?;
//! assert!(!store.repository_exists("lib/app").await?);
//! # Ok(())
//! # }
//! ```

use std::sync::Arc;

use bytes::Bytes;
use camino::Utf8PathBuf;
use oci_digest::Digest;
use serde::Deserialize;
use uuid::Uuid;

mod driver;
mod local;
mod memory;

#[doc(inline)]
pub use driver::{
    CommitOutcome, ManifestRecord, StoreDriver, StoreError, StoreErrorKind, UploadSession,
};
#[doc(inline)]
pub use local::LocalStore;
#[doc(inline)]
pub use memory::MemoryStore;

/// Runtime configuration for the storage backend.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum StoreConfig {
    /// Everything in process memory; for tests and development.
    Memory,

    /// A local directory tree.
    Local { path: Utf8PathBuf },
}

impl StoreConfig {
    /// Build the configured backend.
    #[tracing::instrument]
    pub async fn build(self) -> Result<Store, StoreError> {
        let store = match self {
            StoreConfig::Memory => MemoryStore::new().into(),
            StoreConfig::Local { path } => {
                tokio::fs::create_dir_all(&path).await.map_err(|err| {
                    StoreError::with_source("local", StoreErrorKind::Io, err)
                        .path(path.to_string())
                })?;
                LocalStore::new(path).into()
            }
        };
        Ok(store)
    }
}

type ArcDriver = Arc<dyn StoreDriver + Send + Sync>;

/// A cheaply cloneable handle to a storage backend.
#[derive(Debug, Clone)]
pub struct Store {
    driver: ArcDriver,
}

impl<D> From<D> for Store
where
    D: StoreDriver + Send + Sync + 'static,
{
    fn from(driver: D) -> Self {
        Store::new(driver)
    }
}

impl Store {
    pub fn new<D: StoreDriver + Send + Sync + 'static>(driver: D) -> Self {
        Self {
            driver: Arc::new(driver),
        }
    }

    pub fn name(&self) -> &str {
        self.driver.name()
    }

    #[tracing::instrument(skip(self), fields(driver = self.driver.name()))]
    pub async fn repository_exists(&self, repo: &str) -> Result<bool, StoreError> {
        self.driver.repository_exists(repo).await
    }

    #[tracing::instrument(skip(self), fields(driver = self.driver.name()))]
    pub async fn list_repositories(&self) -> Result<Vec<String>, StoreError> {
        self.driver.list_repositories().await
    }

    #[tracing::instrument(skip(self), fields(driver = self.driver.name()))]
    pub async fn blob_size(&self, repo: &str, digest: &Digest) -> Result<Option<u64>, StoreError> {
        self.driver.blob_size(repo, digest).await
    }

    #[tracing::instrument(skip(self), fields(driver = self.driver.name()))]
    pub async fn get_blob(&self, repo: &str, digest: &Digest) -> Result<Bytes, StoreError> {
        tracing::trace!(%digest, "fetching blob from {repo}");
        self.driver.get_blob(repo, digest).await
    }

    #[tracing::instrument(skip(self), fields(driver = self.driver.name()))]
    pub async fn delete_blob(&self, repo: &str, digest: &Digest) -> Result<(), StoreError> {
        self.driver.delete_blob(repo, digest).await
    }

    #[tracing::instrument(skip(self), fields(driver = self.driver.name()))]
    pub async fn link_blob(
        &self,
        repo: &str,
        digest: &Digest,
        from_repo: &str,
    ) -> Result<(), StoreError> {
        tracing::trace!(%digest, "linking blob from {from_repo} into {repo}");
        self.driver.link_blob(repo, digest, from_repo).await
    }

    #[tracing::instrument(skip(self), fields(driver = self.driver.name()))]
    pub async fn create_upload(&self, repo: &str) -> Result<Uuid, StoreError> {
        self.driver.create_upload(repo).await
    }

    #[tracing::instrument(skip(self), fields(driver = self.driver.name()))]
    pub async fn upload_session(
        &self,
        repo: &str,
        id: &Uuid,
    ) -> Result<UploadSession, StoreError> {
        self.driver.upload_session(repo, id).await
    }

    #[tracing::instrument(skip(self, chunk), fields(driver = self.driver.name(), len = chunk.len()))]
    pub async fn append_upload(
        &self,
        repo: &str,
        id: &Uuid,
        chunk: &[u8],
        expected_offset: Option<u64>,
    ) -> Result<u64, StoreError> {
        self.driver
            .append_upload(repo, id, chunk, expected_offset)
            .await
    }

    #[tracing::instrument(skip(self), fields(driver = self.driver.name()))]
    pub async fn commit_upload(
        &self,
        repo: &str,
        id: &Uuid,
        expected: &Digest,
    ) -> Result<CommitOutcome, StoreError> {
        self.driver.commit_upload(repo, id, expected).await
    }

    #[tracing::instrument(skip(self), fields(driver = self.driver.name()))]
    pub async fn cancel_upload(&self, repo: &str, id: &Uuid) -> Result<(), StoreError> {
        self.driver.cancel_upload(repo, id).await
    }

    #[tracing::instrument(skip(self, bytes), fields(driver = self.driver.name(), len = bytes.len()))]
    pub async fn put_manifest(
        &self,
        repo: &str,
        digest: &Digest,
        media_type: &str,
        bytes: Bytes,
    ) -> Result<(), StoreError> {
        self.driver.put_manifest(repo, digest, media_type, bytes).await
    }

    #[tracing::instrument(skip(self), fields(driver = self.driver.name()))]
    pub async fn tag_manifest(
        &self,
        repo: &str,
        tag: &str,
        digest: &Digest,
    ) -> Result<(), StoreError> {
        self.driver.tag_manifest(repo, tag, digest).await
    }

    #[tracing::instrument(skip(self), fields(driver = self.driver.name()))]
    pub async fn get_manifest(
        &self,
        repo: &str,
        reference: &str,
    ) -> Result<ManifestRecord, StoreError> {
        self.driver.get_manifest(repo, reference).await
    }

    #[tracing::instrument(skip(self), fields(driver = self.driver.name()))]
    pub async fn manifest_exists(&self, repo: &str, digest: &Digest) -> Result<bool, StoreError> {
        self.driver.manifest_exists(repo, digest).await
    }

    #[tracing::instrument(skip(self), fields(driver = self.driver.name()))]
    pub async fn delete_manifest(&self, repo: &str, digest: &Digest) -> Result<(), StoreError> {
        self.driver.delete_manifest(repo, digest).await
    }

    #[tracing::instrument(skip(self), fields(driver = self.driver.name()))]
    pub async fn list_tags(&self, repo: &str) -> Result<Vec<String>, StoreError> {
        self.driver.list_tags(repo).await
    }
}
