//! Protocol dispatch and the service builder
//!
//! Repository names contain `/`, so apart from the `/v2/` probe the whole
//! surface hangs off one wildcard route. The handler tail-parses the path
//! into a [`Context`], authenticates, authorizes, and dispatches on
//! endpoint and method; the registry does the work and the response is
//! shaped here.

use axum::extract::{DefaultBodyLimit, Path, RawQuery, State};
use axum::http::{header, HeaderMap, HeaderName, Method, StatusCode};
use axum::response::{IntoResponse, Json, Response};
use axum::routing::any;
use axum::Router;
use bytes::Bytes;
use oci_digest::Digest;
use registry_auth::{Action, Anonymous, Auth, Subject};
use registry_store::Store;
use serde_json::json;
use uuid::Uuid;

use crate::config::NamePattern;
use crate::context::{Context, Endpoint};
use crate::error::{RegistryError, RegistryResult};
use crate::registry::{MountOutcome, Pagination, Registry, RegistryOptions};

static DOCKER_CONTENT_DIGEST: HeaderName = HeaderName::from_static("docker-content-digest");
static DOCKER_UPLOAD_UUID: HeaderName = HeaderName::from_static("docker-upload-uuid");
static DISTRIBUTION_API_VERSION: HeaderName =
    HeaderName::from_static("docker-distribution-api-version");

/// Registry builder for configuring and creating the registry service
///
/// ```no_run
/// use registry::RegistryBuilder;
/// use registry_store::MemoryStore;
///
/// let app = RegistryBuilder::new()
///     .store(MemoryStore::new().into())
///     .enable_blob_deletion(true)
///     .build();
/// // `app` is an axum Router; serve it with any tower-compatible server.
/// ```
#[derive(Debug)]
pub struct RegistryBuilder {
    store: Option<Store>,
    auth: Option<Auth>,
    options: RegistryOptions,
}

impl Default for RegistryBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl RegistryBuilder {
    /// Create a new registry builder
    pub fn new() -> Self {
        Self {
            store: None,
            auth: None,
            options: RegistryOptions::default(),
        }
    }

    /// Set the storage backend (required)
    pub fn store(mut self, store: Store) -> Self {
        self.store = Some(store);
        self
    }

    /// Set the auth backend; anonymous access when unset
    pub fn auth(mut self, auth: Auth) -> Self {
        self.auth = Some(auth);
        self
    }

    /// Realm named in authentication challenges
    pub fn realm(mut self, realm: impl Into<String>) -> Self {
        self.options.realm = realm.into();
        self
    }

    /// Largest accepted manifest payload, in bytes
    pub fn max_manifest_size(mut self, bytes: u64) -> Self {
        self.options.max_manifest_size = bytes;
        self
    }

    /// Largest accepted upload chunk, in bytes
    pub fn max_blob_upload_chunk_size(mut self, bytes: u64) -> Self {
        self.options.max_blob_upload_chunk_size = bytes;
        self
    }

    /// Allow blob DELETE
    pub fn enable_blob_deletion(mut self, enabled: bool) -> Self {
        self.options.enable_blob_deletion = enabled;
        self
    }

    /// Allow manifest DELETE
    pub fn enable_manifest_deletion(mut self, enabled: bool) -> Self {
        self.options.enable_manifest_deletion = enabled;
        self
    }

    /// Repository name grammar
    pub fn repo_name_pattern(mut self, pattern: NamePattern) -> Self {
        self.options.repo_name_pattern = pattern;
        self
    }

    /// Require authentication on the `/v2/` probe
    pub fn protect_ping(mut self, protected: bool) -> Self {
        self.options.protect_ping = protected;
        self
    }

    /// Expire idle upload sessions after this many seconds
    pub fn upload_ttl_seconds(mut self, seconds: u64) -> Self {
        self.options.upload_ttl_seconds = Some(seconds);
        self
    }

    /// Build the registry service
    ///
    /// Returns a Router that can be served with any tower-compatible server
    pub fn build(self) -> Router {
        let store = self.store.expect("storage backend must be configured");
        let auth = self.auth.unwrap_or_else(|| Auth::new(Anonymous));

        // Bound request body buffering by the larger of the two caps; the
        // per-kind limits are enforced by the policy layer.
        let body_limit = self
            .options
            .max_manifest_size
            .max(self.options.max_blob_upload_chunk_size) as usize;

        let registry = Registry::new(store, auth, self.options);

        Router::new()
            .route("/v2", any(ping))
            .route("/v2/", any(ping))
            .route("/v2/*path", any(dispatch))
            .layer(DefaultBodyLimit::max(body_limit))
            .with_state(registry)
    }
}

/// Query parameters across all endpoints. Parsed leniently: an
/// unparseable `n` is treated as absent.
#[derive(Debug, Default, serde::Deserialize)]
struct QueryParams {
    digest: Option<String>,
    mount: Option<String>,
    from: Option<String>,
    n: Option<String>,
    last: Option<String>,
}

impl QueryParams {
    fn parse(query: Option<&str>) -> Self {
        query
            .and_then(|q| serde_urlencoded::from_str(q).ok())
            .unwrap_or_default()
    }

    fn pagination(&self) -> Pagination {
        Pagination {
            n: self.n.as_deref().and_then(|n| n.parse().ok()),
            last: self.last.clone(),
        }
    }
}

fn authorization_header(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
}

/// Availability probe (GET /v2/)
async fn ping(
    State(registry): State<Registry>,
    method: Method,
    headers: HeaderMap,
) -> RegistryResult<Response> {
    if !matches!(method, Method::GET | Method::HEAD) {
        return Err(RegistryError::Unsupported);
    }
    if registry.protect_ping() {
        let subject = registry.authenticate(authorization_header(&headers)).await?;
        registry.authorize(&subject, None, Action::Pull).await?;
    }
    Ok((
        StatusCode::OK,
        [(&DISTRIBUTION_API_VERSION, "registry/2.0")],
        Json(json!({})),
    )
        .into_response())
}

/// Everything under `/v2/<path>`: parse, authenticate, authorize,
/// dispatch.
#[tracing::instrument(skip_all, fields(%method, %path))]
async fn dispatch(
    State(registry): State<Registry>,
    method: Method,
    Path(path): Path<String>,
    RawQuery(query): RawQuery,
    headers: HeaderMap,
    body: Bytes,
) -> RegistryResult<Response> {
    let mut context = Context::parse(method.clone(), &path)?;
    let params = QueryParams::parse(query.as_deref());

    if context.endpoint == Endpoint::Ping {
        return ping(State(registry), method, headers).await;
    }

    let subject = registry.authenticate(authorization_header(&headers)).await?;
    registry
        .authorize(&subject, context.repo.as_deref(), context.action())
        .await?;
    context.subject = Some(subject.clone());

    match context.endpoint {
        Endpoint::Ping => unreachable!("handled above"),
        Endpoint::Catalog => catalog(&registry, &context, &params).await,
        Endpoint::TagsList => tags_list(&registry, &context, &params).await,
        Endpoint::BlobUploads => {
            blob_uploads(&registry, &context, &subject, &params, &headers, body).await
        }
        Endpoint::Blobs => blobs(&registry, &context).await,
        Endpoint::Manifests => manifests(&registry, &context, &headers, body).await,
    }
}

fn repo_of(context: &Context) -> RegistryResult<&str> {
    context
        .repo
        .as_deref()
        .ok_or_else(|| RegistryError::NameInvalid {
            name: String::new(),
        })
}

fn resource_of(context: &Context) -> RegistryResult<&str> {
    context
        .resource
        .as_deref()
        .ok_or(RegistryError::Unsupported)
}

/// GET /v2/_catalog
async fn catalog(
    registry: &Registry,
    context: &Context,
    params: &QueryParams,
) -> RegistryResult<Response> {
    if context.method != Method::GET {
        return Err(RegistryError::Unsupported);
    }
    let pagination = params.pagination();
    let page = registry.list_repositories(&pagination).await?;

    #[derive(serde::Serialize)]
    struct Catalog {
        repositories: Vec<String>,
    }

    let link = next_page_link("/v2/_catalog", &pagination, page.more, page.items.last());
    let mut response = Json(Catalog {
        repositories: page.items,
    })
    .into_response();
    if let Some(link) = link {
        if let Ok(value) = link.parse() {
            response.headers_mut().insert(header::LINK, value);
        }
    }
    Ok(response)
}

/// GET /v2/<repo>/tags/list
async fn tags_list(
    registry: &Registry,
    context: &Context,
    params: &QueryParams,
) -> RegistryResult<Response> {
    if context.method != Method::GET {
        return Err(RegistryError::Unsupported);
    }
    let repo = repo_of(context)?;
    let pagination = params.pagination();
    let page = registry.list_tags(repo, &pagination).await?;

    #[derive(serde::Serialize)]
    struct TagList {
        name: String,
        tags: Vec<String>,
    }

    let link = next_page_link(
        &format!("/v2/{repo}/tags/list"),
        &pagination,
        page.more,
        page.items.last(),
    );
    let mut response = Json(TagList {
        name: repo.to_string(),
        tags: page.items,
    })
    .into_response();
    if let Some(link) = link {
        if let Ok(value) = link.parse() {
            response.headers_mut().insert(header::LINK, value);
        }
    }
    Ok(response)
}

/// RFC 5988 `Link: <...>; rel="next"` for truncated listings.
fn next_page_link(
    base: &str,
    pagination: &Pagination,
    more: bool,
    last: Option<&String>,
) -> Option<String> {
    let (n, last) = match (pagination.n, last) {
        (Some(n), Some(last)) if more => (n, last),
        _ => return None,
    };
    let query = serde_urlencoded::to_string([("n", n.to_string()), ("last", last.clone())])
        .unwrap_or_default();
    Some(format!("<{base}?{query}>; rel=\"next\""))
}

/// POST /v2/<repo>/blobs/uploads/ and the session operations beneath it
async fn blob_uploads(
    registry: &Registry,
    context: &Context,
    subject: &Subject,
    params: &QueryParams,
    headers: &HeaderMap,
    body: Bytes,
) -> RegistryResult<Response> {
    let repo = repo_of(context)?;

    let session = match &context.resource {
        None => {
            if context.method != Method::POST {
                return Err(RegistryError::Unsupported);
            }
            return start_upload(registry, subject, repo, params, body).await;
        }
        Some(session) => session,
    };
    let id = Uuid::parse_str(session).map_err(|_| RegistryError::BlobUploadInvalid {
        reason: format!("malformed upload session id: {session:?}"),
    })?;

    let content_range = headers
        .get(header::CONTENT_RANGE)
        .and_then(|value| value.to_str().ok());

    match context.method {
        Method::PATCH => {
            let offset = registry
                .upload_blob_chunk(repo, &id, &body, content_range)
                .await?;
            Ok(upload_status(repo, &id, offset, StatusCode::ACCEPTED))
        }
        Method::GET => {
            let offset = registry.get_blob_upload_status(repo, &id).await?;
            Ok(upload_status(repo, &id, offset, StatusCode::NO_CONTENT))
        }
        Method::PUT => {
            let claimed =
                params
                    .digest
                    .as_deref()
                    .ok_or_else(|| RegistryError::DigestInvalid {
                        reason: "missing digest query parameter".to_string(),
                    })?;
            let digest = registry
                .complete_blob_upload(repo, &id, &body, content_range, claimed)
                .await?;
            Ok(blob_created(repo, &digest))
        }
        Method::DELETE => {
            registry.cancel_blob_upload(repo, &id).await?;
            Ok(StatusCode::NO_CONTENT.into_response())
        }
        _ => Err(RegistryError::Unsupported),
    }
}

/// The three shapes of POST: mount, monolithic, session creation.
async fn start_upload(
    registry: &Registry,
    subject: &Subject,
    repo: &str,
    params: &QueryParams,
    body: Bytes,
) -> RegistryResult<Response> {
    if let (Some(mount), Some(from)) = (params.mount.as_deref(), params.from.as_deref()) {
        return match registry.mount_blob(repo, mount, from, subject).await? {
            MountOutcome::Mounted(digest) => Ok(blob_created(repo, &digest)),
            MountOutcome::SessionCreated(id) => {
                Ok(upload_status(repo, &id, 0, StatusCode::ACCEPTED))
            }
        };
    }

    if let Some(claimed) = params.digest.as_deref() {
        // Monolithic upload: session, body, and commit in one request.
        let id = registry.initiate_blob_upload(repo).await?;
        let digest = registry
            .complete_blob_upload(repo, &id, &body, None, claimed)
            .await?;
        return Ok(blob_created(repo, &digest));
    }

    let id = registry.initiate_blob_upload(repo).await?;
    Ok(upload_status(repo, &id, 0, StatusCode::ACCEPTED))
}

/// HEAD/GET/DELETE /v2/<repo>/blobs/<digest>
async fn blobs(registry: &Registry, context: &Context) -> RegistryResult<Response> {
    let repo = repo_of(context)?;
    let digest = resource_of(context)?;

    match context.method {
        Method::HEAD => {
            let (digest, size) = registry.blob_exists(repo, digest).await?;
            Ok((
                StatusCode::OK,
                [
                    (&header::CONTENT_TYPE, "application/octet-stream".to_string()),
                    (&header::CONTENT_LENGTH, size.to_string()),
                    (&DOCKER_CONTENT_DIGEST, digest.to_string()),
                ],
            )
                .into_response())
        }
        Method::GET => {
            let (digest, bytes) = registry.get_blob(repo, digest).await?;
            Ok((
                StatusCode::OK,
                [
                    (&header::CONTENT_TYPE, "application/octet-stream".to_string()),
                    (&DOCKER_CONTENT_DIGEST, digest.to_string()),
                ],
                bytes,
            )
                .into_response())
        }
        Method::DELETE => {
            registry.delete_blob(repo, digest).await?;
            Ok(StatusCode::ACCEPTED.into_response())
        }
        _ => Err(RegistryError::Unsupported),
    }
}

/// GET/HEAD/PUT/DELETE /v2/<repo>/manifests/<reference>
async fn manifests(
    registry: &Registry,
    context: &Context,
    headers: &HeaderMap,
    body: Bytes,
) -> RegistryResult<Response> {
    let repo = repo_of(context)?;
    let reference = resource_of(context)?;

    match context.method {
        Method::GET => {
            let record = registry.get_manifest(repo, reference).await?;
            Ok((
                StatusCode::OK,
                [
                    (&header::CONTENT_TYPE, record.media_type),
                    (&DOCKER_CONTENT_DIGEST, record.digest.to_string()),
                ],
                record.bytes,
            )
                .into_response())
        }
        Method::HEAD => {
            let (media_type, size, digest) =
                registry.manifest_metadata(repo, reference).await?;
            Ok((
                StatusCode::OK,
                [
                    (&header::CONTENT_TYPE, media_type),
                    (&header::CONTENT_LENGTH, size.to_string()),
                    (&DOCKER_CONTENT_DIGEST, digest.to_string()),
                ],
            )
                .into_response())
        }
        Method::PUT => {
            let content_type = headers
                .get(header::CONTENT_TYPE)
                .and_then(|value| value.to_str().ok())
                .ok_or_else(|| RegistryError::ManifestInvalid {
                    reason: "missing Content-Type header".to_string(),
                })?;
            let digest = registry
                .store_manifest(repo, reference, body, content_type)
                .await?;
            Ok((
                StatusCode::CREATED,
                [
                    (
                        &header::LOCATION,
                        format!("/v2/{repo}/manifests/{digest}"),
                    ),
                    (&DOCKER_CONTENT_DIGEST, digest.to_string()),
                ],
            )
                .into_response())
        }
        Method::DELETE => {
            registry.delete_manifest(repo, reference).await?;
            Ok(StatusCode::ACCEPTED.into_response())
        }
        _ => Err(RegistryError::Unsupported),
    }
}

/// `Range: 0-<offset-1>` for upload responses; sessions with no bytes
/// report `0-0`.
fn range_header(offset: u64) -> String {
    if offset == 0 {
        "0-0".to_string()
    } else {
        format!("0-{}", offset - 1)
    }
}

/// 202/204 response shared by upload create, append, and status.
fn upload_status(repo: &str, id: &Uuid, offset: u64, status: StatusCode) -> Response {
    (
        status,
        [
            (&header::LOCATION, format!("/v2/{repo}/blobs/uploads/{id}")),
            (&header::RANGE, range_header(offset)),
            (&DOCKER_UPLOAD_UUID, id.to_string()),
        ],
    )
        .into_response()
}

/// 201 response once a blob exists, from commit or mount.
fn blob_created(repo: &str, digest: &Digest) -> Response {
    (
        StatusCode::CREATED,
        [
            (&header::LOCATION, format!("/v2/{repo}/blobs/{digest}")),
            (&header::CONTENT_LENGTH, "0".to_string()),
            (&DOCKER_CONTENT_DIGEST, digest.to_string()),
        ],
    )
        .into_response()
}
