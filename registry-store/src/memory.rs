use std::collections::{BTreeMap, HashMap, HashSet};

use bytes::Bytes;
use chrono::{DateTime, Utc};
use oci_digest::Digest;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::driver::{
    CommitOutcome, ManifestRecord, StoreDriver, StoreError, StoreErrorKind, UploadSession,
};

const ENGINE: &str = "memory";

fn not_found(repo: &str, path: impl Into<String>) -> StoreError {
    StoreError::new(ENGINE, StoreErrorKind::NotFound)
        .repo(repo)
        .path(path)
}

#[derive(Debug, Clone)]
struct ManifestItem {
    media_type: String,
    bytes: Bytes,
}

#[derive(Debug, Default)]
struct Repository {
    /// Links into the content-addressed blob map.
    blobs: HashSet<Digest>,
    manifests: HashMap<Digest, ManifestItem>,
    tags: BTreeMap<String, Digest>,
}

#[derive(Debug)]
struct UploadBuffer {
    repo: String,
    buffer: Vec<u8>,
    created_at: DateTime<Utc>,
}

#[derive(Debug, Default)]
struct State {
    /// Blob bytes stored once, content-addressed; repositories hold links.
    blobs: HashMap<Digest, Bytes>,
    repositories: BTreeMap<String, Repository>,
    uploads: HashMap<Uuid, UploadBuffer>,
}

impl State {
    fn repository(&self, repo: &str) -> Option<&Repository> {
        self.repositories.get(repo)
    }

    fn upload_mut(&mut self, repo: &str, id: &Uuid) -> Result<&mut UploadBuffer, StoreError> {
        match self.uploads.get_mut(id) {
            Some(upload) if upload.repo == repo => Ok(upload),
            _ => Err(not_found(repo, format!("uploads/{id}"))),
        }
    }
}

/// Store backend that keeps everything in memory.
///
/// Intended for tests and development servers; all mutation happens under a
/// single `RwLock`, which also provides the per-session single-writer
/// discipline the upload state machine requires.
#[derive(Debug, Default)]
pub struct MemoryStore {
    state: RwLock<State>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait::async_trait]
impl StoreDriver for MemoryStore {
    fn name(&self) -> &'static str {
        ENGINE
    }

    async fn repository_exists(&self, repo: &str) -> Result<bool, StoreError> {
        let state = self.state.read().await;
        Ok(state.repository(repo).is_some())
    }

    async fn list_repositories(&self) -> Result<Vec<String>, StoreError> {
        let state = self.state.read().await;
        Ok(state.repositories.keys().cloned().collect())
    }

    async fn blob_size(&self, repo: &str, digest: &Digest) -> Result<Option<u64>, StoreError> {
        let state = self.state.read().await;
        let linked = state
            .repository(repo)
            .map(|r| r.blobs.contains(digest))
            .unwrap_or(false);
        if !linked {
            return Ok(None);
        }
        Ok(state.blobs.get(digest).map(|bytes| bytes.len() as u64))
    }

    async fn get_blob(&self, repo: &str, digest: &Digest) -> Result<Bytes, StoreError> {
        let state = self.state.read().await;
        let linked = state
            .repository(repo)
            .map(|r| r.blobs.contains(digest))
            .unwrap_or(false);
        if !linked {
            return Err(not_found(repo, format!("blobs/{digest}")));
        }
        state
            .blobs
            .get(digest)
            .cloned()
            .ok_or_else(|| not_found(repo, format!("blobs/{digest}")))
    }

    async fn delete_blob(&self, repo: &str, digest: &Digest) -> Result<(), StoreError> {
        let mut state = self.state.write().await;
        let repository = state
            .repositories
            .get_mut(repo)
            .ok_or_else(|| not_found(repo, format!("blobs/{digest}")))?;
        if !repository.blobs.remove(digest) {
            return Err(not_found(repo, format!("blobs/{digest}")));
        }

        // Drop the bytes once the last repository link is gone.
        let still_linked = state
            .repositories
            .values()
            .any(|r| r.blobs.contains(digest));
        if !still_linked {
            state.blobs.remove(digest);
        }
        Ok(())
    }

    async fn link_blob(
        &self,
        repo: &str,
        digest: &Digest,
        from_repo: &str,
    ) -> Result<(), StoreError> {
        let mut state = self.state.write().await;
        let present = state
            .repository(from_repo)
            .map(|r| r.blobs.contains(digest))
            .unwrap_or(false);
        if !present {
            return Err(not_found(from_repo, format!("blobs/{digest}")));
        }
        state
            .repositories
            .entry(repo.to_string())
            .or_default()
            .blobs
            .insert(digest.clone());
        Ok(())
    }

    async fn create_upload(&self, repo: &str) -> Result<Uuid, StoreError> {
        let id = Uuid::new_v4();
        let mut state = self.state.write().await;
        state.uploads.insert(
            id,
            UploadBuffer {
                repo: repo.to_string(),
                buffer: Vec::new(),
                created_at: Utc::now(),
            },
        );
        tracing::debug!(%repo, session = %id, "created upload session");
        Ok(id)
    }

    async fn upload_session(&self, repo: &str, id: &Uuid) -> Result<UploadSession, StoreError> {
        let state = self.state.read().await;
        match state.uploads.get(id) {
            Some(upload) if upload.repo == repo => Ok(UploadSession {
                id: *id,
                offset: upload.buffer.len() as u64,
                created_at: upload.created_at,
            }),
            _ => Err(not_found(repo, format!("uploads/{id}"))),
        }
    }

    async fn append_upload(
        &self,
        repo: &str,
        id: &Uuid,
        chunk: &[u8],
        expected_offset: Option<u64>,
    ) -> Result<u64, StoreError> {
        let mut state = self.state.write().await;
        let upload = state.upload_mut(repo, id)?;

        let offset = upload.buffer.len() as u64;
        if let Some(expected) = expected_offset {
            if expected != offset {
                return Err(StoreError::new(ENGINE, StoreErrorKind::OutOfOrder)
                    .repo(repo)
                    .path(format!("uploads/{id}")));
            }
        }

        upload.buffer.extend_from_slice(chunk);
        Ok(upload.buffer.len() as u64)
    }

    async fn commit_upload(
        &self,
        repo: &str,
        id: &Uuid,
        expected: &Digest,
    ) -> Result<CommitOutcome, StoreError> {
        let mut state = self.state.write().await;
        let upload = state.upload_mut(repo, id)?;

        let actual = Digest::sha256_of(&upload.buffer);
        if actual != *expected {
            return Ok(CommitOutcome::DigestMismatch { actual });
        }

        // Holding the write lock makes verify-promote-delete atomic, so a
        // racing commit observes the session as already gone.
        let upload = state.uploads.remove(id).expect("session present");
        let size = upload.buffer.len() as u64;
        state
            .blobs
            .insert(expected.clone(), Bytes::from(upload.buffer));
        state
            .repositories
            .entry(repo.to_string())
            .or_default()
            .blobs
            .insert(expected.clone());
        tracing::debug!(%repo, session = %id, digest = %expected, size, "committed upload");
        Ok(CommitOutcome::Committed { size })
    }

    async fn cancel_upload(&self, repo: &str, id: &Uuid) -> Result<(), StoreError> {
        let mut state = self.state.write().await;
        state.upload_mut(repo, id)?;
        state.uploads.remove(id);
        Ok(())
    }

    async fn put_manifest(
        &self,
        repo: &str,
        digest: &Digest,
        media_type: &str,
        bytes: Bytes,
    ) -> Result<(), StoreError> {
        let mut state = self.state.write().await;
        state
            .repositories
            .entry(repo.to_string())
            .or_default()
            .manifests
            .insert(
                digest.clone(),
                ManifestItem {
                    media_type: media_type.to_string(),
                    bytes,
                },
            );
        Ok(())
    }

    async fn tag_manifest(
        &self,
        repo: &str,
        tag: &str,
        digest: &Digest,
    ) -> Result<(), StoreError> {
        let mut state = self.state.write().await;
        state
            .repositories
            .entry(repo.to_string())
            .or_default()
            .tags
            .insert(tag.to_string(), digest.clone());
        Ok(())
    }

    async fn get_manifest(
        &self,
        repo: &str,
        reference: &str,
    ) -> Result<ManifestRecord, StoreError> {
        let state = self.state.read().await;
        let repository = state
            .repository(repo)
            .ok_or_else(|| not_found(repo, format!("manifests/{reference}")))?;

        let digest = if oci_digest::looks_like_digest(reference) {
            Digest::parse(reference)
                .map_err(|_| not_found(repo, format!("manifests/{reference}")))?
        } else {
            repository
                .tags
                .get(reference)
                .cloned()
                .ok_or_else(|| not_found(repo, format!("tags/{reference}")))?
        };

        let item = repository
            .manifests
            .get(&digest)
            .ok_or_else(|| not_found(repo, format!("manifests/{digest}")))?;
        Ok(ManifestRecord {
            digest,
            media_type: item.media_type.clone(),
            bytes: item.bytes.clone(),
        })
    }

    async fn manifest_exists(&self, repo: &str, digest: &Digest) -> Result<bool, StoreError> {
        let state = self.state.read().await;
        Ok(state
            .repository(repo)
            .map(|r| r.manifests.contains_key(digest))
            .unwrap_or(false))
    }

    async fn delete_manifest(&self, repo: &str, digest: &Digest) -> Result<(), StoreError> {
        let mut state = self.state.write().await;
        let repository = state
            .repositories
            .get_mut(repo)
            .ok_or_else(|| not_found(repo, format!("manifests/{digest}")))?;
        if repository.manifests.remove(digest).is_none() {
            return Err(not_found(repo, format!("manifests/{digest}")));
        }
        repository.tags.retain(|_, target| target != digest);
        Ok(())
    }

    async fn list_tags(&self, repo: &str) -> Result<Vec<String>, StoreError> {
        let state = self.state.read().await;
        let repository = state
            .repository(repo)
            .ok_or_else(|| not_found(repo, "tags"))?;
        Ok(repository.tags.keys().cloned().collect())
    }
}
