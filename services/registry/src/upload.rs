//! Blob upload state machine
//!
//! Sessions live in the store, keyed by `(repo, session id)`, so the
//! coordinator itself holds no state: restarts do not lose in-flight
//! uploads. The coordinator enforces the chunk ordering contract and the
//! commit protocol; the store provides the atomic compare-and-append and
//! the at-most-once promote.

use chrono::{Duration, Utc};
use oci_digest::Digest;
use registry_store::{CommitOutcome, Store, UploadSession};
use uuid::Uuid;

use crate::error::{RegistryError, RegistryResult};

/// Parse a `Content-Range: start-end` header into its inclusive bounds.
///
/// The `bytes=` and `bytes ` prefixes some clients send are tolerated.
pub(crate) fn parse_content_range(header: &str) -> RegistryResult<(u64, u64)> {
    let invalid = || RegistryError::BlobUploadInvalid {
        reason: format!("malformed Content-Range: {header:?}"),
    };

    let spec = header
        .trim()
        .trim_start_matches("bytes=")
        .trim_start_matches("bytes ");
    let (start, end) = spec.split_once('-').ok_or_else(invalid)?;
    let start: u64 = start.trim().parse().map_err(|_| invalid())?;
    let end: u64 = end.trim().parse().map_err(|_| invalid())?;
    if end < start {
        return Err(invalid());
    }
    Ok((start, end))
}

/// Coordinates the upload session lifecycle:
/// `Created → Appending* → Committed | Cancelled | Expired`.
#[derive(Debug, Clone)]
pub(crate) struct UploadCoordinator {
    store: Store,
    max_chunk_size: u64,
    ttl: Option<Duration>,
}

impl UploadCoordinator {
    pub(crate) fn new(store: Store, max_chunk_size: u64, ttl_seconds: Option<u64>) -> Self {
        Self {
            store,
            max_chunk_size,
            ttl: ttl_seconds.map(|s| Duration::seconds(s as i64)),
        }
    }

    /// Start a fresh session.
    pub(crate) async fn create(&self, repo: &str) -> RegistryResult<Uuid> {
        Ok(self.store.create_upload(repo).await?)
    }

    /// Current cumulative offset of a session.
    pub(crate) async fn status(&self, repo: &str, id: &Uuid) -> RegistryResult<u64> {
        Ok(self.live_session(repo, id).await?.offset)
    }

    /// Append a chunk, enforcing the ordering contract.
    ///
    /// PATCH requests set `range_required`; the final PUT body passes
    /// through with `range_required = false` and appends at the current
    /// offset when no header is given.
    pub(crate) async fn append(
        &self,
        repo: &str,
        id: &Uuid,
        chunk: &[u8],
        content_range: Option<&str>,
        range_required: bool,
    ) -> RegistryResult<u64> {
        let session = self.live_session(repo, id).await?;

        if chunk.len() as u64 > self.max_chunk_size {
            return Err(RegistryError::BlobUploadInvalid {
                reason: format!(
                    "chunk of {} bytes exceeds the {} byte limit",
                    chunk.len(),
                    self.max_chunk_size
                ),
            });
        }

        let expected_offset = match content_range {
            Some(header) => {
                let (start, end) = parse_content_range(header)?;
                if end - start + 1 != chunk.len() as u64 {
                    return Err(RegistryError::BlobUploadInvalid {
                        reason: format!(
                            "Content-Range {start}-{end} does not span {} body bytes",
                            chunk.len()
                        ),
                    });
                }
                if start != session.offset {
                    return Err(RegistryError::BlobUploadOutOfOrder {
                        expected_offset: session.offset,
                    });
                }
                Some(start)
            }
            None if range_required => {
                return Err(RegistryError::BlobUploadInvalid {
                    reason: "Content-Range header is required".to_string(),
                });
            }
            None => None,
        };

        match self
            .store
            .append_upload(repo, id, chunk, expected_offset)
            .await
        {
            Ok(offset) => Ok(offset),
            // Lost a race with another append on the same session.
            Err(err) if err.is_out_of_order() => Err(RegistryError::BlobUploadOutOfOrder {
                expected_offset: session.offset,
            }),
            Err(err) if err.is_not_found() => Err(RegistryError::BlobUploadUnknown),
            Err(err) => Err(err.into()),
        }
    }

    /// Commit a session: append any final bytes, verify the claimed
    /// digest, and promote the accumulated bytes into the blob store.
    ///
    /// On a digest mismatch the session stays in `Appending`, so the
    /// client may retry the commit.
    pub(crate) async fn commit(
        &self,
        repo: &str,
        id: &Uuid,
        final_chunk: &[u8],
        content_range: Option<&str>,
        expected: &Digest,
    ) -> RegistryResult<u64> {
        self.live_session(repo, id).await?;

        if !final_chunk.is_empty() {
            self.append(repo, id, final_chunk, content_range, false)
                .await?;
        }

        match self.store.commit_upload(repo, id, expected).await {
            Ok(CommitOutcome::Committed { size }) => Ok(size),
            Ok(CommitOutcome::DigestMismatch { actual }) => Err(RegistryError::DigestInvalid {
                reason: format!("uploaded content digests to {actual}, not {expected}"),
            }),
            Err(err) if err.is_not_found() => Err(RegistryError::BlobUploadUnknown),
            Err(err) => Err(err.into()),
        }
    }

    /// Cancel a session, discarding its accumulated bytes.
    pub(crate) async fn cancel(&self, repo: &str, id: &Uuid) -> RegistryResult<()> {
        match self.store.cancel_upload(repo, id).await {
            Ok(()) => Ok(()),
            Err(err) if err.is_not_found() => Err(RegistryError::BlobUploadUnknown),
            Err(err) => Err(err.into()),
        }
    }

    /// Fetch a session, treating one past its TTL as unknown and cleaning
    /// it up on discovery.
    async fn live_session(&self, repo: &str, id: &Uuid) -> RegistryResult<UploadSession> {
        let session = match self.store.upload_session(repo, id).await {
            Ok(session) => session,
            Err(err) if err.is_not_found() => return Err(RegistryError::BlobUploadUnknown),
            Err(err) => return Err(err.into()),
        };

        if let Some(ttl) = self.ttl {
            if Utc::now() - session.created_at > ttl {
                tracing::debug!(%repo, session = %id, "expiring idle upload session");
                if let Err(err) = self.store.cancel_upload(repo, id).await {
                    if !err.is_not_found() {
                        return Err(err.into());
                    }
                }
                return Err(RegistryError::BlobUploadUnknown);
            }
        }
        Ok(session)
    }
}
