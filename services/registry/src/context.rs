//! Request context extraction
//!
//! Repository names contain `/`, so the URL cannot be split with ordinary
//! path parameters. The path after the `/v2` mount point is parsed from the
//! tail instead: the last one or two segments select the endpoint, and
//! whatever precedes them is the repository name.

use axum::http::Method;
use registry_auth::{Action, Subject};

use crate::error::{RegistryError, RegistryResult};

/// The protocol endpoint a request addresses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Endpoint {
    /// `GET /v2/` availability probe
    Ping,
    /// `GET /v2/_catalog`
    Catalog,
    /// `GET /v2/<repo>/tags/list`
    TagsList,
    /// `/v2/<repo>/blobs/uploads/` and `/v2/<repo>/blobs/uploads/<uuid>`
    BlobUploads,
    /// `/v2/<repo>/blobs/<digest>`
    Blobs,
    /// `/v2/<repo>/manifests/<reference>`
    Manifests,
}

/// Request-scoped context, built from the URL and method before
/// authorization runs.
#[derive(Debug, Clone)]
pub struct Context {
    pub repo: Option<String>,
    pub endpoint: Endpoint,
    /// Upload session id, blob digest, or manifest reference.
    pub resource: Option<String>,
    pub method: Method,
    /// Filled in once authentication has run.
    pub subject: Option<Subject>,
}

impl Context {
    /// Parse the path tail after `/v2` into a context.
    pub fn parse(method: Method, path: &str) -> RegistryResult<Self> {
        let segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();

        let (endpoint, repo_len, resource) = match segments.as_slice() {
            [] => (Endpoint::Ping, 0, None),
            ["_catalog"] => (Endpoint::Catalog, 0, None),
            [.., "tags", "list"] => (Endpoint::TagsList, segments.len() - 2, None),
            [.., "blobs", "uploads"] => (Endpoint::BlobUploads, segments.len() - 2, None),
            [.., "blobs", "uploads", session] => (
                Endpoint::BlobUploads,
                segments.len() - 3,
                Some(session.to_string()),
            ),
            [.., "blobs", digest] => (
                Endpoint::Blobs,
                segments.len() - 2,
                Some(digest.to_string()),
            ),
            [.., "manifests", reference] => (
                Endpoint::Manifests,
                segments.len() - 2,
                Some(reference.to_string()),
            ),
            _ => {
                return Err(RegistryError::NameUnknown {
                    name: path.to_string(),
                })
            }
        };

        let repo = if repo_len == 0 {
            None
        } else {
            Some(segments[..repo_len].join("/"))
        };

        if repo.is_none() && !matches!(endpoint, Endpoint::Ping | Endpoint::Catalog) {
            return Err(RegistryError::NameInvalid {
                name: path.to_string(),
            });
        }

        Ok(Context {
            repo,
            endpoint,
            resource,
            method,
            subject: None,
        })
    }

    /// The action this request performs, derived from its method.
    pub fn action(&self) -> Action {
        match self.method {
            Method::GET | Method::HEAD => Action::Pull,
            _ => Action::Push,
        }
    }
}
