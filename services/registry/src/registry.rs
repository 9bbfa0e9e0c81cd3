//! The registry policy layer
//!
//! [`Registry`] composes the storage and auth backends and enforces
//! everything that is policy rather than persistence: name validation,
//! size caps, deletion gates, digest verification, tag-delete refusal,
//! mount fallback, and pagination. The protocol handler calls these
//! operations and shapes their results into HTTP.

use bytes::Bytes;
use oci_digest::Digest;
use registry_auth::{Action, Auth, AuthError, Subject};
use registry_store::{ManifestRecord, Store};
use uuid::Uuid;

use crate::config::NamePattern;
use crate::error::{RegistryError, RegistryResult};
use crate::manifest::{self, ManifestReference};
use crate::upload::UploadCoordinator;

/// Policy knobs, split from the builder so the policy layer can be
/// constructed and tested without the HTTP surface.
#[derive(Debug, Clone)]
pub(crate) struct RegistryOptions {
    pub realm: String,
    pub max_manifest_size: u64,
    pub max_blob_upload_chunk_size: u64,
    pub enable_blob_deletion: bool,
    pub enable_manifest_deletion: bool,
    pub repo_name_pattern: NamePattern,
    pub protect_ping: bool,
    pub upload_ttl_seconds: Option<u64>,
}

impl Default for RegistryOptions {
    fn default() -> Self {
        Self {
            realm: "registry".to_string(),
            max_manifest_size: crate::config::DEFAULT_MAX_MANIFEST_SIZE,
            max_blob_upload_chunk_size: crate::config::DEFAULT_MAX_CHUNK_SIZE,
            enable_blob_deletion: false,
            enable_manifest_deletion: false,
            repo_name_pattern: NamePattern::default(),
            protect_ping: false,
            upload_ttl_seconds: None,
        }
    }
}

/// Result of a cross-repository mount attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MountOutcome {
    /// The blob was present in the source repository and is now available
    /// in the target.
    Mounted(Digest),

    /// The blob was not mountable; a fresh upload session was created so
    /// the client can push it.
    SessionCreated(Uuid),
}

/// Pagination query for tag and catalog listings.
#[derive(Debug, Clone, Default)]
pub struct Pagination {
    /// Maximum number of entries to return.
    pub n: Option<usize>,
    /// Exclusive lower bound; only entries strictly greater are returned.
    pub last: Option<String>,
}

/// One page of a listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Page {
    pub items: Vec<String>,
    /// Whether entries beyond this page exist.
    pub more: bool,
}

/// The registry engine: policy over a storage backend and an auth backend.
#[derive(Debug, Clone)]
pub struct Registry {
    store: Store,
    auth: Auth,
    uploads: UploadCoordinator,
    realm: String,
    max_manifest_size: u64,
    enable_blob_deletion: bool,
    enable_manifest_deletion: bool,
    repo_name_pattern: NamePattern,
    protect_ping: bool,
}

impl Registry {
    pub(crate) fn new(store: Store, auth: Auth, options: RegistryOptions) -> Self {
        let uploads = UploadCoordinator::new(
            store.clone(),
            options.max_blob_upload_chunk_size,
            options.upload_ttl_seconds,
        );
        Self {
            store,
            auth,
            uploads,
            realm: options.realm,
            max_manifest_size: options.max_manifest_size,
            enable_blob_deletion: options.enable_blob_deletion,
            enable_manifest_deletion: options.enable_manifest_deletion,
            repo_name_pattern: options.repo_name_pattern,
            protect_ping: options.protect_ping,
        }
    }

    /// Whether the availability probe requires authentication.
    pub fn protect_ping(&self) -> bool {
        self.protect_ping
    }

    // --- authentication -------------------------------------------------

    /// Authenticate the raw `Authorization` header into a subject.
    pub async fn authenticate(&self, authorization: Option<&str>) -> RegistryResult<Subject> {
        self.auth
            .authenticate(authorization)
            .await
            .map_err(|err| self.auth_error(err))
    }

    /// Authorize an action on a repository (`None` for registry-level
    /// operations such as the catalog).
    pub async fn authorize(
        &self,
        subject: &Subject,
        repo: Option<&str>,
        action: Action,
    ) -> RegistryResult<()> {
        self.auth
            .authorize(subject, repo, action)
            .await
            .map_err(|err| self.auth_error(err))
    }

    fn auth_error(&self, err: AuthError) -> RegistryError {
        match err {
            AuthError::Unauthorized { detail } => RegistryError::Unauthorized {
                challenge: self.auth.challenge(&self.realm).header_value(),
                detail,
            },
            AuthError::Denied { detail } => RegistryError::Denied { detail },
            AuthError::Unsupported { .. } => RegistryError::Unsupported,
        }
    }

    // --- names ----------------------------------------------------------

    /// Check a repository name against the configured pattern.
    pub fn validate_repository_name(&self, repo: &str) -> RegistryResult<()> {
        if self.repo_name_pattern.is_match(repo) {
            Ok(())
        } else {
            Err(RegistryError::NameInvalid {
                name: repo.to_string(),
            })
        }
    }

    fn parse_digest(&self, text: &str) -> RegistryResult<Digest> {
        Digest::parse(text).map_err(|err| RegistryError::DigestInvalid {
            reason: format!("{text:?}: {err}"),
        })
    }

    // --- blob uploads ---------------------------------------------------

    /// Start a new upload session in `repo`.
    pub async fn initiate_blob_upload(&self, repo: &str) -> RegistryResult<Uuid> {
        self.validate_repository_name(repo)?;
        self.uploads.create(repo).await
    }

    /// Append one chunk; `Content-Range` is required here.
    pub async fn upload_blob_chunk(
        &self,
        repo: &str,
        id: &Uuid,
        chunk: &[u8],
        content_range: Option<&str>,
    ) -> RegistryResult<u64> {
        self.validate_repository_name(repo)?;
        self.uploads.append(repo, id, chunk, content_range, true).await
    }

    /// Cumulative offset of an open session.
    pub async fn get_blob_upload_status(&self, repo: &str, id: &Uuid) -> RegistryResult<u64> {
        self.validate_repository_name(repo)?;
        self.uploads.status(repo, id).await
    }

    /// Commit a session under the digest the client claims.
    pub async fn complete_blob_upload(
        &self,
        repo: &str,
        id: &Uuid,
        final_chunk: &[u8],
        content_range: Option<&str>,
        claimed_digest: &str,
    ) -> RegistryResult<Digest> {
        self.validate_repository_name(repo)?;
        let digest = self.parse_digest(claimed_digest)?;
        self.uploads
            .commit(repo, id, final_chunk, content_range, &digest)
            .await?;
        Ok(digest)
    }

    /// Cancel an open session.
    pub async fn cancel_blob_upload(&self, repo: &str, id: &Uuid) -> RegistryResult<()> {
        self.validate_repository_name(repo)?;
        self.uploads.cancel(repo, id).await
    }

    /// Cross-repository mount: make a blob from `from_repo` available in
    /// `repo` without retransmission.
    ///
    /// Falls back to a fresh upload session when the blob is absent or the
    /// subject may not pull from the source repository.
    pub async fn mount_blob(
        &self,
        repo: &str,
        digest: &str,
        from_repo: &str,
        subject: &Subject,
    ) -> RegistryResult<MountOutcome> {
        self.validate_repository_name(repo)?;
        self.validate_repository_name(from_repo)?;
        let digest = self.parse_digest(digest)?;

        if !self.store.repository_exists(from_repo).await? {
            return Err(RegistryError::NameUnknown {
                name: from_repo.to_string(),
            });
        }

        let readable = self
            .auth
            .authorize(subject, Some(from_repo), Action::Pull)
            .await
            .is_ok();
        if readable {
            match self.store.link_blob(repo, &digest, from_repo).await {
                Ok(()) => return Ok(MountOutcome::Mounted(digest)),
                Err(err) if err.is_not_found() => {}
                Err(err) => return Err(err.into()),
            }
        }

        let id = self.uploads.create(repo).await?;
        Ok(MountOutcome::SessionCreated(id))
    }

    // --- blobs ----------------------------------------------------------

    /// Size of a blob, for HEAD requests.
    pub async fn blob_exists(&self, repo: &str, digest: &str) -> RegistryResult<(Digest, u64)> {
        self.validate_repository_name(repo)?;
        let digest = self.parse_digest(digest)?;
        match self.store.blob_size(repo, &digest).await? {
            Some(size) => Ok((digest, size)),
            None => Err(RegistryError::BlobUnknown {
                digest: digest.to_string(),
            }),
        }
    }

    /// Fetch blob bytes.
    pub async fn get_blob(&self, repo: &str, digest: &str) -> RegistryResult<(Digest, Bytes)> {
        self.validate_repository_name(repo)?;
        let digest = self.parse_digest(digest)?;
        match self.store.get_blob(repo, &digest).await {
            Ok(bytes) => Ok((digest, bytes)),
            Err(err) if err.is_not_found() => Err(RegistryError::BlobUnknown {
                digest: digest.to_string(),
            }),
            Err(err) => Err(err.into()),
        }
    }

    /// Remove a blob from the repository, when deletion is enabled.
    pub async fn delete_blob(&self, repo: &str, digest: &str) -> RegistryResult<()> {
        if !self.enable_blob_deletion {
            return Err(RegistryError::Unsupported);
        }
        self.validate_repository_name(repo)?;
        let digest = self.parse_digest(digest)?;
        match self.store.delete_blob(repo, &digest).await {
            Ok(()) => Ok(()),
            Err(err) if err.is_not_found() => Err(RegistryError::BlobUnknown {
                digest: digest.to_string(),
            }),
            Err(err) => Err(err.into()),
        }
    }

    // --- manifests ------------------------------------------------------

    /// Validate and store a manifest, tagging it when the reference is a
    /// tag.
    ///
    /// Every digest the manifest references must already exist in `repo`;
    /// the presence checks run here, inside the put, so a successful
    /// manifest PUT happens-after the commit of every referenced blob.
    pub async fn store_manifest(
        &self,
        repo: &str,
        reference: &str,
        bytes: Bytes,
        content_type: &str,
    ) -> RegistryResult<Digest> {
        self.validate_repository_name(repo)?;
        let reference = ManifestReference::parse(reference)?;
        let validated = manifest::validate(&reference, &bytes, self.max_manifest_size)?;

        let mut missing = Vec::new();
        for digest in &validated.blob_refs {
            if self.store.blob_size(repo, digest).await?.is_none() {
                missing.push(digest.to_string());
            }
        }
        for digest in &validated.manifest_refs {
            // Index entries point at child manifests; accept a stored
            // manifest or a blob under that digest.
            let as_manifest = self.store.manifest_exists(repo, digest).await?;
            if !as_manifest && self.store.blob_size(repo, digest).await?.is_none() {
                missing.push(digest.to_string());
            }
        }
        if !missing.is_empty() {
            return Err(RegistryError::ManifestBlobUnknown { digests: missing });
        }

        self.store
            .put_manifest(repo, &validated.digest, content_type, bytes)
            .await?;
        if let ManifestReference::Tag(tag) = &reference {
            self.store
                .tag_manifest(repo, tag, &validated.digest)
                .await?;
        }
        tracing::info!(%repo, digest = %validated.digest, "stored manifest");
        Ok(validated.digest)
    }

    /// Fetch a manifest by tag or digest.
    pub async fn get_manifest(
        &self,
        repo: &str,
        reference: &str,
    ) -> RegistryResult<ManifestRecord> {
        self.validate_repository_name(repo)?;
        ManifestReference::parse(reference)?;
        match self.store.get_manifest(repo, reference).await {
            Ok(record) => Ok(record),
            Err(err) if err.is_not_found() => Err(RegistryError::ManifestUnknown {
                reference: reference.to_string(),
            }),
            Err(err) => Err(err.into()),
        }
    }

    /// Manifest metadata for HEAD requests: media type, size, digest.
    pub async fn manifest_metadata(
        &self,
        repo: &str,
        reference: &str,
    ) -> RegistryResult<(String, u64, Digest)> {
        let record = self.get_manifest(repo, reference).await?;
        Ok((
            record.media_type,
            record.bytes.len() as u64,
            record.digest,
        ))
    }

    /// Delete a manifest, when deletion is enabled. Only digest references
    /// are accepted; deleting through a tag is refused.
    pub async fn delete_manifest(&self, repo: &str, reference: &str) -> RegistryResult<()> {
        if !self.enable_manifest_deletion {
            return Err(RegistryError::Unsupported);
        }
        self.validate_repository_name(repo)?;
        let digest = match ManifestReference::parse(reference)? {
            ManifestReference::Digest(digest) => digest,
            ManifestReference::Tag(_) => {
                return Err(RegistryError::ManifestInvalid {
                    reason: "manifest deletion requires a digest reference".to_string(),
                })
            }
        };
        match self.store.delete_manifest(repo, &digest).await {
            Ok(()) => Ok(()),
            Err(err) if err.is_not_found() => Err(RegistryError::ManifestUnknown {
                reference: reference.to_string(),
            }),
            Err(err) => Err(err.into()),
        }
    }

    // --- listings -------------------------------------------------------

    /// Tags in a repository, paginated.
    pub async fn list_tags(&self, repo: &str, pagination: &Pagination) -> RegistryResult<Page> {
        self.validate_repository_name(repo)?;
        match self.store.list_tags(repo).await {
            Ok(tags) => Ok(paginate(tags, pagination)),
            Err(err) if err.is_not_found() => Err(RegistryError::NameUnknown {
                name: repo.to_string(),
            }),
            Err(err) => Err(err.into()),
        }
    }

    /// Repositories in the registry, paginated.
    pub async fn list_repositories(&self, pagination: &Pagination) -> RegistryResult<Page> {
        let repos = self.store.list_repositories().await?;
        Ok(paginate(repos, pagination))
    }
}

/// Apply the `last`/`n` pagination contract to a sorted listing.
fn paginate(items: Vec<String>, pagination: &Pagination) -> Page {
    let mut items: Vec<String> = match &pagination.last {
        Some(last) => items.into_iter().filter(|item| item > last).collect(),
        None => items,
    };
    let more = pagination.n.map(|n| items.len() > n).unwrap_or(false);
    if let Some(n) = pagination.n {
        items.truncate(n);
    }
    Page { items, more }
}
