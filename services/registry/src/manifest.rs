//! Manifest validation
//!
//! A manifest is stored by the digest of its canonical bytes, exactly as
//! received. Validation parses those bytes as JSON only far enough to find
//! the digests the document references; no media-type vocabulary is
//! enforced. The blob-presence checks happen in the policy layer, which
//! has the store handle.

use std::sync::OnceLock;

use oci_digest::{looks_like_digest, Digest};
use regex::Regex;
use serde::Deserialize;

use crate::error::{RegistryError, RegistryResult};

/// Tag grammar: `[A-Za-z0-9_][A-Za-z0-9._-]{0,127}`.
pub(crate) fn is_valid_tag(tag: &str) -> bool {
    static TAG: OnceLock<Regex> = OnceLock::new();
    TAG.get_or_init(|| Regex::new(r"^[A-Za-z0-9_][A-Za-z0-9._-]{0,127}$").expect("tag pattern"))
        .is_match(tag)
}

/// How the client addressed the manifest it pushed or deleted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum ManifestReference {
    Tag(String),
    Digest(Digest),
}

impl ManifestReference {
    /// Classify a reference as tag or digest, rejecting strings that are
    /// neither.
    pub(crate) fn parse(reference: &str) -> RegistryResult<Self> {
        if looks_like_digest(reference) {
            let digest = Digest::parse(reference).map_err(|err| RegistryError::DigestInvalid {
                reason: err.to_string(),
            })?;
            Ok(ManifestReference::Digest(digest))
        } else if is_valid_tag(reference) {
            Ok(ManifestReference::Tag(reference.to_string()))
        } else {
            Err(RegistryError::ManifestInvalid {
                reason: format!("reference {reference:?} is neither a tag nor a digest"),
            })
        }
    }
}

/// The slice of a manifest document the registry cares about: where the
/// referenced digests live. Everything else passes through untouched.
#[derive(Debug, Default, Deserialize)]
struct ManifestDocument {
    #[serde(default)]
    config: Option<DescriptorRef>,
    #[serde(default)]
    layers: Option<Vec<DescriptorRef>>,
    #[serde(default)]
    manifests: Option<Vec<DescriptorRef>>,
}

#[derive(Debug, Deserialize)]
struct DescriptorRef {
    #[serde(default)]
    digest: Option<String>,
}

/// A manifest that passed structural validation.
#[derive(Debug)]
pub(crate) struct ValidatedManifest {
    /// Digest of the canonical bytes as received.
    pub digest: Digest,
    /// Digests that must exist as blobs in the repository.
    pub blob_refs: Vec<Digest>,
    /// Digests referenced by an index document; satisfied by a manifest or
    /// a blob in the repository.
    pub manifest_refs: Vec<Digest>,
}

/// Validate manifest bytes against the size cap and the reference they
/// were pushed under.
///
/// The digest is computed over the received octets before JSON parsing, so
/// the stored artifact is always the client's canonical bytes.
pub(crate) fn validate(
    reference: &ManifestReference,
    bytes: &[u8],
    max_size: u64,
) -> RegistryResult<ValidatedManifest> {
    if bytes.len() as u64 > max_size {
        return Err(RegistryError::SizeInvalid {
            limit: max_size,
            actual: bytes.len() as u64,
        });
    }

    let digest = Digest::sha256_of(bytes);
    if let ManifestReference::Digest(claimed) = reference {
        if *claimed != digest {
            return Err(RegistryError::ManifestInvalid {
                reason: format!("content digests to {digest}, reference claims {claimed}"),
            });
        }
    }

    let document: ManifestDocument =
        serde_json::from_slice(bytes).map_err(|err| RegistryError::ManifestInvalid {
            reason: format!("manifest is not valid JSON: {err}"),
        })?;

    let mut blob_refs = Vec::new();
    if let Some(config) = &document.config {
        blob_refs.push(parse_referenced(config)?);
    }
    for layer in document.layers.iter().flatten() {
        blob_refs.push(parse_referenced(layer)?);
    }

    let mut manifest_refs = Vec::new();
    for child in document.manifests.iter().flatten() {
        manifest_refs.push(parse_referenced(child)?);
    }

    Ok(ValidatedManifest {
        digest,
        blob_refs,
        manifest_refs,
    })
}

fn parse_referenced(descriptor: &DescriptorRef) -> RegistryResult<Digest> {
    let text = descriptor
        .digest
        .as_deref()
        .ok_or_else(|| RegistryError::ManifestInvalid {
            reason: "descriptor is missing its digest".to_string(),
        })?;
    Digest::parse(text).map_err(|err| RegistryError::ManifestInvalid {
        reason: format!("descriptor digest {text:?}: {err}"),
    })
}
