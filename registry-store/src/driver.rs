use std::error::Error as StdError;
use std::fmt;

use bytes::Bytes;
use chrono::{DateTime, Utc};
use oci_digest::Digest;
use uuid::Uuid;

/// Categorizes store errors by their semantic meaning, independent of the
/// backend implementation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreErrorKind {
    /// The requested record (blob, manifest, tag, session, repository) does
    /// not exist.
    NotFound,

    /// An upload append arrived at an offset other than the session's
    /// current cumulative offset.
    OutOfOrder,

    /// The operation failed due to I/O errors (disk, permissions).
    Io,

    /// The request named a record the backend refuses to address (for
    /// example a repository path that escapes the store root).
    InvalidRequest,

    /// An unexpected or uncategorized backend error.
    Other,
}

impl fmt::Display for StoreErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StoreErrorKind::NotFound => write!(f, "not found"),
            StoreErrorKind::OutOfOrder => write!(f, "out of order"),
            StoreErrorKind::Io => write!(f, "I/O error"),
            StoreErrorKind::InvalidRequest => write!(f, "invalid request"),
            StoreErrorKind::Other => write!(f, "other error"),
        }
    }
}

/// Store error with the backend name and the record it concerns.
///
/// Callers dispatch on [`StoreError::kind`]; the remaining fields exist for
/// diagnostics only.
#[derive(Debug)]
pub struct StoreError {
    kind: StoreErrorKind,
    engine: &'static str,
    repo: Option<String>,
    path: Option<String>,
    source: Option<Box<dyn StdError + Send + Sync + 'static>>,
}

impl StoreError {
    /// Create a new store error without an underlying source.
    pub fn new(engine: &'static str, kind: StoreErrorKind) -> Self {
        Self {
            kind,
            engine,
            repo: None,
            path: None,
            source: None,
        }
    }

    /// Create a new store error wrapping an underlying source error.
    pub fn with_source<E>(engine: &'static str, kind: StoreErrorKind, source: E) -> Self
    where
        E: Into<Box<dyn StdError + Send + Sync + 'static>>,
    {
        Self {
            kind,
            engine,
            repo: None,
            path: None,
            source: Some(source.into()),
        }
    }

    /// Attach the repository the operation concerned.
    pub fn repo(mut self, repo: impl Into<String>) -> Self {
        self.repo = Some(repo.into());
        self
    }

    /// Attach the record path or identifier the operation concerned.
    pub fn path(mut self, path: impl Into<String>) -> Self {
        self.path = Some(path.into());
        self
    }

    /// The semantic category of this error.
    pub fn kind(&self) -> StoreErrorKind {
        self.kind
    }

    /// The name of the backend that produced this error.
    pub fn engine(&self) -> &'static str {
        self.engine
    }

    /// Whether the error means the record does not exist.
    pub fn is_not_found(&self) -> bool {
        self.kind == StoreErrorKind::NotFound
    }

    /// Whether the error means an append was misaligned.
    pub fn is_out_of_order(&self) -> bool {
        self.kind == StoreErrorKind::OutOfOrder
    }
}

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "store error [{}] from {}", self.kind, self.engine)?;
        if let Some(repo) = &self.repo {
            write!(f, " (repo: {repo})")?;
        }
        if let Some(path) = &self.path {
            write!(f, " (path: {path})")?;
        }
        if let Some(source) = &self.source {
            write!(f, ": {source}")?;
        }
        Ok(())
    }
}

impl StdError for StoreError {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        self.source
            .as_deref()
            .map(|s| s as &(dyn StdError + 'static))
    }
}

/// A stored manifest: the canonical bytes, the media type it was pushed
/// with, and the digest of those bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManifestRecord {
    pub digest: Digest,
    pub media_type: String,
    pub bytes: Bytes,
}

/// An in-progress upload session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadSession {
    pub id: Uuid,
    /// Cumulative bytes accumulated so far.
    pub offset: u64,
    pub created_at: DateTime<Utc>,
}

/// Result of attempting to commit an upload session.
///
/// A mismatch is not a [`StoreError`]: the session survives it so the
/// client can retry the commit, which is why it travels in the `Ok` arm.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommitOutcome {
    /// The accumulated bytes hashed to the expected digest and were
    /// promoted into the blob store; the session is gone.
    Committed { size: u64 },

    /// The accumulated bytes hashed to `actual`; the session is intact.
    DigestMismatch { actual: Digest },
}

/// A storage backend for the registry.
///
/// Implementations persist four kinds of record: content-addressed blobs
/// (linked into repositories), manifests, tags, and upload sessions. They
/// must be safe for concurrent use across different repositories and
/// different sessions; operations on the same session may be serialized by
/// the implementation.
///
/// Absent records are reported with [`StoreErrorKind::NotFound`] (or
/// `Ok(None)`/`Ok(false)` on the probe methods); misaligned appends with
/// [`StoreErrorKind::OutOfOrder`]. The policy layer maps those kinds onto
/// the protocol error taxonomy.
#[async_trait::async_trait]
pub trait StoreDriver: fmt::Debug {
    /// The name of the backend.
    fn name(&self) -> &'static str;

    /// Whether the repository has any content.
    ///
    /// Repositories come into existence implicitly on the first committed
    /// blob or stored manifest; an open upload session alone does not
    /// create one.
    async fn repository_exists(&self, repo: &str) -> Result<bool, StoreError>;

    /// All repositories with content, sorted lexicographically.
    async fn list_repositories(&self) -> Result<Vec<String>, StoreError>;

    /// Size in bytes of a blob linked into `repo`, or `None` when the
    /// repository has no such blob.
    async fn blob_size(&self, repo: &str, digest: &Digest) -> Result<Option<u64>, StoreError>;

    /// The bytes of a blob linked into `repo`.
    async fn get_blob(&self, repo: &str, digest: &Digest) -> Result<Bytes, StoreError>;

    /// Unlink a blob from `repo`.
    async fn delete_blob(&self, repo: &str, digest: &Digest) -> Result<(), StoreError>;

    /// Link a blob already present in `from_repo` into `repo` without
    /// retransmission.
    async fn link_blob(
        &self,
        repo: &str,
        digest: &Digest,
        from_repo: &str,
    ) -> Result<(), StoreError>;

    /// Create a fresh upload session scoped to `repo`.
    async fn create_upload(&self, repo: &str) -> Result<Uuid, StoreError>;

    /// Current state of an upload session.
    async fn upload_session(&self, repo: &str, id: &Uuid) -> Result<UploadSession, StoreError>;

    /// Append a chunk to an upload session, returning the new cumulative
    /// offset.
    ///
    /// When `expected_offset` is given, the append is a compare-and-append:
    /// it fails with [`StoreErrorKind::OutOfOrder`] unless the session's
    /// current offset equals it. The check and the append are atomic with
    /// respect to other operations on the same session.
    async fn append_upload(
        &self,
        repo: &str,
        id: &Uuid,
        chunk: &[u8],
        expected_offset: Option<u64>,
    ) -> Result<u64, StoreError>;

    /// Verify the accumulated bytes against `expected` and, on a match,
    /// atomically promote them into the blob store under that digest and
    /// delete the session.
    ///
    /// Exactly one of two concurrent commits on the same session can
    /// succeed; the loser observes [`StoreErrorKind::NotFound`].
    async fn commit_upload(
        &self,
        repo: &str,
        id: &Uuid,
        expected: &Digest,
    ) -> Result<CommitOutcome, StoreError>;

    /// Discard an upload session and its accumulated bytes.
    async fn cancel_upload(&self, repo: &str, id: &Uuid) -> Result<(), StoreError>;

    /// Store manifest bytes under their digest.
    async fn put_manifest(
        &self,
        repo: &str,
        digest: &Digest,
        media_type: &str,
        bytes: Bytes,
    ) -> Result<(), StoreError>;

    /// Point a tag at a manifest digest, replacing any previous target.
    async fn tag_manifest(&self, repo: &str, tag: &str, digest: &Digest)
        -> Result<(), StoreError>;

    /// Fetch a manifest by reference (tag or textual digest).
    async fn get_manifest(&self, repo: &str, reference: &str)
        -> Result<ManifestRecord, StoreError>;

    /// Whether a manifest with this digest exists in `repo`.
    async fn manifest_exists(&self, repo: &str, digest: &Digest) -> Result<bool, StoreError>;

    /// Delete a manifest by digest, pruning any tags that point at it.
    async fn delete_manifest(&self, repo: &str, digest: &Digest) -> Result<(), StoreError>;

    /// All tags in `repo`, sorted lexicographically.
    ///
    /// Fails with [`StoreErrorKind::NotFound`] when the repository does not
    /// exist; an existing repository with no tags yields an empty list.
    async fn list_tags(&self, repo: &str) -> Result<Vec<String>, StoreError>;
}
