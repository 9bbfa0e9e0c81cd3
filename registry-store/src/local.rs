use std::collections::HashMap;
use std::sync::{Arc, Mutex as StdMutex};

use bytes::Bytes;
use camino::{Utf8Path, Utf8PathBuf};
use oci_digest::Digest;
use sha2::{Digest as _, Sha256};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::driver::{
    CommitOutcome, ManifestRecord, StoreDriver, StoreError, StoreErrorKind, UploadSession,
};

const ENGINE: &str = "local";

/// Media type recorded when a manifest predates the sidecar file.
const DEFAULT_MANIFEST_TYPE: &str = "application/vnd.oci.image.manifest.v1+json";

fn io_error(err: std::io::Error) -> StoreError {
    let kind = match err.kind() {
        std::io::ErrorKind::NotFound => StoreErrorKind::NotFound,
        _ => StoreErrorKind::Io,
    };
    StoreError::with_source(ENGINE, kind, err)
}

/// Store backend that persists to a local directory tree.
///
/// ```text
/// <root>/blobs/<algorithm>/<hex>                       blob bytes (content-addressed)
/// <root>/repositories/<repo>/blobs/<algorithm>/<hex>   link markers
/// <root>/repositories/<repo>/manifests/<algorithm>/<hex>[.media]
/// <root>/repositories/<repo>/tags/<tag>                digest text
/// <root>/uploads/<repo>/<uuid>                         session append files
/// ```
///
/// Commit promotes the session file into `blobs/` with an atomic rename, so
/// of two racing commits exactly one wins. Mutation of a single session is
/// serialized through a per-session lock table; entries are evicted once
/// the session is finished or found missing, keeping the table bounded by
/// the number of live sessions.
#[derive(Debug)]
pub struct LocalStore {
    root: Utf8PathBuf,
    session_locks: StdMutex<HashMap<Uuid, Arc<Mutex<()>>>>,
}

impl LocalStore {
    pub fn new(root: Utf8PathBuf) -> Self {
        Self {
            root,
            session_locks: StdMutex::new(HashMap::new()),
        }
    }

    fn session_lock(&self, id: &Uuid) -> Arc<Mutex<()>> {
        let mut locks = self.session_locks.lock().expect("lock table poisoned");
        locks.entry(*id).or_default().clone()
    }

    fn drop_session_lock(&self, id: &Uuid) {
        let mut locks = self.session_locks.lock().expect("lock table poisoned");
        locks.remove(id);
    }

    /// Evict the lock entry when an operation found the session gone, so
    /// requests naming unknown or finished session ids cannot grow the
    /// lock table. Entries for live sessions are never evicted here.
    fn fail_session_gone(&self, id: &Uuid, err: StoreError) -> StoreError {
        if err.is_not_found() {
            self.drop_session_lock(id);
        }
        err
    }

    /// Reject repository or tag components that would escape the root.
    fn checked(&self, name: &str) -> Result<(), StoreError> {
        let suspicious = name.is_empty()
            || name.starts_with('/')
            || name
                .split('/')
                .any(|part| part.is_empty() || part == "." || part == "..");
        if suspicious {
            return Err(
                StoreError::new(ENGINE, StoreErrorKind::InvalidRequest).path(name.to_string())
            );
        }
        Ok(())
    }

    fn blob_path(&self, digest: &Digest) -> Utf8PathBuf {
        self.root
            .join("blobs")
            .join(digest.algorithm().as_str())
            .join(digest.encoded())
    }

    fn repo_dir(&self, repo: &str) -> Utf8PathBuf {
        self.root.join("repositories").join(repo)
    }

    fn blob_link_path(&self, repo: &str, digest: &Digest) -> Utf8PathBuf {
        self.repo_dir(repo)
            .join("blobs")
            .join(digest.algorithm().as_str())
            .join(digest.encoded())
    }

    fn manifest_path(&self, repo: &str, digest: &Digest) -> Utf8PathBuf {
        self.repo_dir(repo)
            .join("manifests")
            .join(digest.algorithm().as_str())
            .join(digest.encoded())
    }

    fn media_path(&self, repo: &str, digest: &Digest) -> Utf8PathBuf {
        let mut path = self.manifest_path(repo, digest);
        path.set_extension("media");
        path
    }

    fn tag_path(&self, repo: &str, tag: &str) -> Utf8PathBuf {
        self.repo_dir(repo).join("tags").join(tag)
    }

    fn upload_path(&self, repo: &str, id: &Uuid) -> Utf8PathBuf {
        self.root.join("uploads").join(repo).join(id.to_string())
    }

    /// Write a file atomically: to a sibling temp path, then rename over.
    async fn write_atomic(&self, path: &Utf8Path, bytes: &[u8]) -> Result<(), StoreError> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await.map_err(io_error)?;
        }
        let tmp = path.with_extension("tmp");
        tokio::fs::write(&tmp, bytes).await.map_err(io_error)?;
        tokio::fs::rename(&tmp, path).await.map_err(io_error)?;
        Ok(())
    }
}

#[async_trait::async_trait]
impl StoreDriver for LocalStore {
    fn name(&self) -> &'static str {
        ENGINE
    }

    async fn repository_exists(&self, repo: &str) -> Result<bool, StoreError> {
        self.checked(repo)?;
        Ok(tokio::fs::try_exists(self.repo_dir(repo))
            .await
            .map_err(io_error)?)
    }

    async fn list_repositories(&self) -> Result<Vec<String>, StoreError> {
        let base = self.root.join("repositories");
        if !tokio::fs::try_exists(&base).await.map_err(io_error)? {
            return Ok(Vec::new());
        }
        let mut repos =
            tokio::task::spawn_blocking(move || collect_repositories(&base, &base))
                .await
                .map_err(|err| StoreError::with_source(ENGINE, StoreErrorKind::Other, err))?
                .map_err(io_error)?;
        repos.sort();
        Ok(repos)
    }

    async fn blob_size(&self, repo: &str, digest: &Digest) -> Result<Option<u64>, StoreError> {
        self.checked(repo)?;
        let linked = tokio::fs::try_exists(self.blob_link_path(repo, digest))
            .await
            .map_err(io_error)?;
        if !linked {
            return Ok(None);
        }
        match tokio::fs::metadata(self.blob_path(digest)).await {
            Ok(meta) => Ok(Some(meta.len())),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(io_error(err)),
        }
    }

    async fn get_blob(&self, repo: &str, digest: &Digest) -> Result<Bytes, StoreError> {
        self.checked(repo)?;
        let linked = tokio::fs::try_exists(self.blob_link_path(repo, digest))
            .await
            .map_err(io_error)?;
        if !linked {
            return Err(StoreError::new(ENGINE, StoreErrorKind::NotFound)
                .repo(repo)
                .path(format!("blobs/{digest}")));
        }
        let bytes = tokio::fs::read(self.blob_path(digest))
            .await
            .map_err(io_error)?;
        Ok(Bytes::from(bytes))
    }

    async fn delete_blob(&self, repo: &str, digest: &Digest) -> Result<(), StoreError> {
        self.checked(repo)?;
        // Only the repository link is removed; the content-addressed bytes
        // stay behind for other repositories (garbage collection is out of
        // scope for this backend).
        tokio::fs::remove_file(self.blob_link_path(repo, digest))
            .await
            .map_err(|err| io_error(err).repo(repo).path(format!("blobs/{digest}")))
    }

    async fn link_blob(
        &self,
        repo: &str,
        digest: &Digest,
        from_repo: &str,
    ) -> Result<(), StoreError> {
        self.checked(repo)?;
        self.checked(from_repo)?;
        let present = tokio::fs::try_exists(self.blob_link_path(from_repo, digest))
            .await
            .map_err(io_error)?;
        if !present {
            return Err(StoreError::new(ENGINE, StoreErrorKind::NotFound)
                .repo(from_repo)
                .path(format!("blobs/{digest}")));
        }
        self.write_atomic(&self.blob_link_path(repo, digest), b"")
            .await
    }

    async fn create_upload(&self, repo: &str) -> Result<Uuid, StoreError> {
        self.checked(repo)?;
        let id = Uuid::new_v4();
        let path = self.upload_path(repo, &id);
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await.map_err(io_error)?;
        }
        tokio::fs::File::create(&path).await.map_err(io_error)?;
        tracing::debug!(%repo, session = %id, "created upload session");
        Ok(id)
    }

    async fn upload_session(&self, repo: &str, id: &Uuid) -> Result<UploadSession, StoreError> {
        self.checked(repo)?;
        let meta = tokio::fs::metadata(self.upload_path(repo, id))
            .await
            .map_err(|err| io_error(err).repo(repo).path(format!("uploads/{id}")))?;
        let created_at = meta
            .created()
            .or_else(|_| meta.modified())
            .map_err(io_error)?;
        Ok(UploadSession {
            id: *id,
            offset: meta.len(),
            created_at: created_at.into(),
        })
    }

    async fn append_upload(
        &self,
        repo: &str,
        id: &Uuid,
        chunk: &[u8],
        expected_offset: Option<u64>,
    ) -> Result<u64, StoreError> {
        self.checked(repo)?;
        let lock = self.session_lock(id);
        let _guard = lock.lock().await;

        let path = self.upload_path(repo, id);
        let mut file = tokio::fs::OpenOptions::new()
            .append(true)
            .open(&path)
            .await
            .map_err(|err| {
                let err = io_error(err).repo(repo).path(format!("uploads/{id}"));
                self.fail_session_gone(id, err)
            })?;

        let offset = file.metadata().await.map_err(io_error)?.len();
        if let Some(expected) = expected_offset {
            if expected != offset {
                return Err(StoreError::new(ENGINE, StoreErrorKind::OutOfOrder)
                    .repo(repo)
                    .path(format!("uploads/{id}")));
            }
        }

        file.write_all(chunk).await.map_err(io_error)?;
        file.flush().await.map_err(io_error)?;
        Ok(offset + chunk.len() as u64)
    }

    async fn commit_upload(
        &self,
        repo: &str,
        id: &Uuid,
        expected: &Digest,
    ) -> Result<CommitOutcome, StoreError> {
        self.checked(repo)?;
        let lock = self.session_lock(id);
        let _guard = lock.lock().await;

        let path = self.upload_path(repo, id);
        let mut file = tokio::fs::File::open(&path).await.map_err(|err| {
            let err = io_error(err).repo(repo).path(format!("uploads/{id}"));
            self.fail_session_gone(id, err)
        })?;

        let mut hasher = Sha256::new();
        let mut size = 0u64;
        let mut buf = vec![0u8; 64 * 1024];
        loop {
            let read = file.read(&mut buf).await.map_err(io_error)?;
            if read == 0 {
                break;
            }
            hasher.update(&buf[..read]);
            size += read as u64;
        }
        let actual = Digest::parse(&format!("sha256:{}", hex::encode(hasher.finalize())))
            .expect("sha256 output is a valid digest");
        if actual != *expected {
            return Ok(CommitOutcome::DigestMismatch { actual });
        }

        let blob = self.blob_path(expected);
        if let Some(parent) = blob.parent() {
            tokio::fs::create_dir_all(parent).await.map_err(io_error)?;
        }
        // The rename is the commit point: a racing commit finds the session
        // file gone and reports the session unknown.
        tokio::fs::rename(&path, &blob)
            .await
            .map_err(|err| io_error(err).repo(repo).path(format!("uploads/{id}")))?;
        self.write_atomic(&self.blob_link_path(repo, expected), b"")
            .await?;

        self.drop_session_lock(id);
        tracing::debug!(%repo, session = %id, digest = %expected, size, "committed upload");
        Ok(CommitOutcome::Committed { size })
    }

    async fn cancel_upload(&self, repo: &str, id: &Uuid) -> Result<(), StoreError> {
        self.checked(repo)?;
        let lock = self.session_lock(id);
        let _guard = lock.lock().await;
        let removed = tokio::fs::remove_file(self.upload_path(repo, id))
            .await
            .map_err(|err| io_error(err).repo(repo).path(format!("uploads/{id}")));
        drop(_guard);
        match removed {
            Ok(()) => {
                self.drop_session_lock(id);
                Ok(())
            }
            Err(err) => Err(self.fail_session_gone(id, err)),
        }
    }

    async fn put_manifest(
        &self,
        repo: &str,
        digest: &Digest,
        media_type: &str,
        bytes: Bytes,
    ) -> Result<(), StoreError> {
        self.checked(repo)?;
        self.write_atomic(&self.manifest_path(repo, digest), &bytes)
            .await?;
        self.write_atomic(&self.media_path(repo, digest), media_type.as_bytes())
            .await
    }

    async fn tag_manifest(
        &self,
        repo: &str,
        tag: &str,
        digest: &Digest,
    ) -> Result<(), StoreError> {
        self.checked(repo)?;
        self.checked(tag)?;
        self.write_atomic(&self.tag_path(repo, tag), digest.to_string().as_bytes())
            .await
    }

    async fn get_manifest(
        &self,
        repo: &str,
        reference: &str,
    ) -> Result<ManifestRecord, StoreError> {
        self.checked(repo)?;
        let not_found = || {
            StoreError::new(ENGINE, StoreErrorKind::NotFound)
                .repo(repo)
                .path(format!("manifests/{reference}"))
        };

        let digest = if oci_digest::looks_like_digest(reference) {
            Digest::parse(reference).map_err(|_| not_found())?
        } else {
            self.checked(reference)?;
            let text = tokio::fs::read_to_string(self.tag_path(repo, reference))
                .await
                .map_err(|err| io_error(err).repo(repo).path(format!("tags/{reference}")))?;
            Digest::parse(text.trim()).map_err(|err| {
                StoreError::with_source(ENGINE, StoreErrorKind::Other, err)
                    .repo(repo)
                    .path(format!("tags/{reference}"))
            })?
        };

        let bytes = tokio::fs::read(self.manifest_path(repo, &digest))
            .await
            .map_err(|err| io_error(err).repo(repo).path(format!("manifests/{digest}")))?;
        let media_type = match tokio::fs::read_to_string(self.media_path(repo, &digest)).await {
            Ok(text) => text,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                DEFAULT_MANIFEST_TYPE.to_string()
            }
            Err(err) => return Err(io_error(err)),
        };

        Ok(ManifestRecord {
            digest,
            media_type,
            bytes: Bytes::from(bytes),
        })
    }

    async fn manifest_exists(&self, repo: &str, digest: &Digest) -> Result<bool, StoreError> {
        self.checked(repo)?;
        Ok(tokio::fs::try_exists(self.manifest_path(repo, digest))
            .await
            .map_err(io_error)?)
    }

    async fn delete_manifest(&self, repo: &str, digest: &Digest) -> Result<(), StoreError> {
        self.checked(repo)?;
        tokio::fs::remove_file(self.manifest_path(repo, digest))
            .await
            .map_err(|err| io_error(err).repo(repo).path(format!("manifests/{digest}")))?;
        match tokio::fs::remove_file(self.media_path(repo, digest)).await {
            Ok(()) => {}
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
            Err(err) => return Err(io_error(err)),
        }

        // Prune tags that pointed at the deleted manifest.
        let tags_dir = self.repo_dir(repo).join("tags");
        let mut entries = match tokio::fs::read_dir(&tags_dir).await {
            Ok(entries) => entries,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(()),
            Err(err) => return Err(io_error(err)),
        };
        let target = digest.to_string();
        while let Some(entry) = entries.next_entry().await.map_err(io_error)? {
            let path = entry.path();
            if let Ok(text) = tokio::fs::read_to_string(&path).await {
                if text.trim() == target {
                    tokio::fs::remove_file(&path).await.map_err(io_error)?;
                }
            }
        }
        Ok(())
    }

    async fn list_tags(&self, repo: &str) -> Result<Vec<String>, StoreError> {
        self.checked(repo)?;
        if !self.repository_exists(repo).await? {
            return Err(StoreError::new(ENGINE, StoreErrorKind::NotFound)
                .repo(repo)
                .path("tags"));
        }
        let tags_dir = self.repo_dir(repo).join("tags");
        let mut entries = match tokio::fs::read_dir(&tags_dir).await {
            Ok(entries) => entries,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => return Err(io_error(err)),
        };

        let mut tags = Vec::new();
        while let Some(entry) = entries.next_entry().await.map_err(io_error)? {
            let name = entry.file_name();
            let name = name.to_string_lossy();
            // Skip half-written tag files.
            if name.ends_with(".tmp") {
                continue;
            }
            tags.push(name.into_owned());
        }
        tags.sort();
        Ok(tags)
    }
}

/// Walk `repositories/`, collecting the relative path of every directory
/// that holds registry content. Repository names nest (`a` and `a/b` may
/// both be repositories), so the walk continues past matches but never
/// descends into the content directories themselves.
fn collect_repositories(base: &Utf8Path, dir: &Utf8Path) -> std::io::Result<Vec<String>> {
    let mut repos = Vec::new();
    let mut has_content = false;

    for entry in dir.read_dir_utf8()? {
        let entry = entry?;
        if !entry.file_type()?.is_dir() {
            continue;
        }
        let name = entry.file_name();
        if matches!(name, "blobs" | "manifests" | "tags") {
            has_content = true;
            continue;
        }
        repos.extend(collect_repositories(base, entry.path())?);
    }

    if has_content && dir != base {
        if let Ok(rel) = dir.strip_prefix(base) {
            repos.push(rel.to_string());
        }
    }
    Ok(repos)
}
