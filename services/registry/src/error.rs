//! Error types for the registry
//!
//! One enum carries the protocol error taxonomy. Every variant knows its
//! wire code and HTTP status, and renders into the JSON error envelope
//! `{"errors":[{"code","message","detail"}]}` via `IntoResponse`.

use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use registry_store::StoreError;
use serde_json::{json, Value};

/// Result type for registry operations
pub type RegistryResult<T> = Result<T, RegistryError>;

/// Error types for registry operations
#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    /// Blob not present in the repository
    #[error("blob unknown: {digest}")]
    BlobUnknown { digest: String },

    /// Upload session does not exist (or is no longer mutable)
    #[error("blob upload unknown")]
    BlobUploadUnknown,

    /// Upload request was malformed
    #[error("blob upload invalid: {reason}")]
    BlobUploadInvalid { reason: String },

    /// Chunk arrived at an offset other than the session's current offset
    #[error("blob upload chunk out of order")]
    BlobUploadOutOfOrder { expected_offset: u64 },

    /// Digest failed to parse, or did not match the uploaded content
    #[error("invalid digest: {reason}")]
    DigestInvalid { reason: String },

    /// Manifest not present in the repository
    #[error("manifest unknown: {reference}")]
    ManifestUnknown { reference: String },

    /// Manifest failed validation
    #[error("invalid manifest: {reason}")]
    ManifestInvalid { reason: String },

    /// Manifest references blobs the repository does not have
    #[error("manifest references unknown blobs")]
    ManifestBlobUnknown { digests: Vec<String> },

    /// Repository name failed the configured pattern
    #[error("invalid repository name: {name}")]
    NameInvalid { name: String },

    /// Repository not known to the registry
    #[error("repository name unknown: {name}")]
    NameUnknown { name: String },

    /// Content exceeds a configured size limit
    #[error("content exceeds size limit of {limit} bytes")]
    SizeInvalid { limit: u64, actual: u64 },

    /// Authentication required; carries the rendered challenge
    #[error("authentication required")]
    Unauthorized {
        challenge: String,
        detail: Option<String>,
    },

    /// Authenticated but not permitted
    #[error("access denied")]
    Denied { detail: Option<String> },

    /// The operation is not supported by this registry
    #[error("operation unsupported")]
    Unsupported,

    /// The client is being rate limited
    #[error("too many requests")]
    TooManyRequests,

    /// Storage backend failure surfaced as a server error
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl RegistryError {
    /// Get the error code for the error envelope
    pub fn code(&self) -> &'static str {
        match self {
            RegistryError::BlobUnknown { .. } => "BLOB_UNKNOWN",
            RegistryError::BlobUploadUnknown => "BLOB_UPLOAD_UNKNOWN",
            RegistryError::BlobUploadInvalid { .. } => "BLOB_UPLOAD_INVALID",
            RegistryError::BlobUploadOutOfOrder { .. } => "EXT_BLOB_UPLOAD_OUT_OF_ORDER",
            RegistryError::DigestInvalid { .. } => "DIGEST_INVALID",
            RegistryError::ManifestUnknown { .. } => "MANIFEST_UNKNOWN",
            RegistryError::ManifestInvalid { .. } => "MANIFEST_INVALID",
            RegistryError::ManifestBlobUnknown { .. } => "MANIFEST_BLOB_UNKNOWN",
            RegistryError::NameInvalid { .. } => "NAME_INVALID",
            RegistryError::NameUnknown { .. } => "NAME_UNKNOWN",
            RegistryError::SizeInvalid { .. } => "SIZE_INVALID",
            RegistryError::Unauthorized { .. } => "UNAUTHORIZED",
            RegistryError::Denied { .. } => "DENIED",
            RegistryError::Unsupported => "UNSUPPORTED",
            RegistryError::TooManyRequests => "TOOMANYREQUESTS",
            RegistryError::Store(_) => "UNKNOWN",
        }
    }

    /// Get the HTTP status code for this error
    pub fn status_code(&self) -> StatusCode {
        match self {
            RegistryError::BlobUnknown { .. }
            | RegistryError::BlobUploadUnknown
            | RegistryError::ManifestUnknown { .. }
            | RegistryError::NameUnknown { .. } => StatusCode::NOT_FOUND,
            RegistryError::BlobUploadInvalid { .. }
            | RegistryError::DigestInvalid { .. }
            | RegistryError::ManifestInvalid { .. }
            | RegistryError::ManifestBlobUnknown { .. }
            | RegistryError::NameInvalid { .. } => StatusCode::BAD_REQUEST,
            RegistryError::BlobUploadOutOfOrder { .. } => StatusCode::RANGE_NOT_SATISFIABLE,
            RegistryError::SizeInvalid { .. } => StatusCode::PAYLOAD_TOO_LARGE,
            RegistryError::Unauthorized { .. } => StatusCode::UNAUTHORIZED,
            RegistryError::Denied { .. } => StatusCode::FORBIDDEN,
            RegistryError::Unsupported => StatusCode::METHOD_NOT_ALLOWED,
            RegistryError::TooManyRequests => StatusCode::TOO_MANY_REQUESTS,
            RegistryError::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Structured detail payload carried verbatim in the envelope
    pub fn detail(&self) -> Option<Value> {
        match self {
            RegistryError::BlobUnknown { digest } => Some(json!({ "digest": digest })),
            RegistryError::BlobUploadOutOfOrder { expected_offset } => {
                Some(json!({ "expectedOffset": expected_offset }))
            }
            RegistryError::ManifestBlobUnknown { digests } => Some(json!({ "digests": digests })),
            RegistryError::SizeInvalid { limit, actual } => {
                Some(json!({ "limit": limit, "actual": actual }))
            }
            RegistryError::Unauthorized { detail, .. } | RegistryError::Denied { detail } => {
                detail.as_ref().map(|d| Value::String(d.clone()))
            }
            _ => None,
        }
    }
}

/// Error envelope wire format
#[derive(Debug, serde::Serialize)]
struct ErrorEnvelope {
    errors: Vec<ErrorBody>,
}

#[derive(Debug, serde::Serialize)]
struct ErrorBody {
    code: &'static str,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    detail: Option<Value>,
}

impl IntoResponse for RegistryError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            tracing::error!(error = %self, "internal registry error");
        }

        // Server faults get a generic message; client faults surface theirs.
        let message = if status.is_server_error() {
            "internal error".to_string()
        } else {
            self.to_string()
        };

        let body = ErrorEnvelope {
            errors: vec![ErrorBody {
                code: self.code(),
                message,
                detail: self.detail(),
            }],
        };

        let mut response = (status, axum::Json(body)).into_response();
        if let RegistryError::Unauthorized { challenge, .. } = &self {
            if let Ok(value) = challenge.parse() {
                response
                    .headers_mut()
                    .insert(header::WWW_AUTHENTICATE, value);
            }
        }
        response
    }
}
