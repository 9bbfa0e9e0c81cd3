//! Integration tests for the OCI registry

use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use axum::Router;
use bytes::Bytes;
use oci_digest::Digest;
use registry::RegistryBuilder;
use registry_auth::{Auth, BasicAuth, Password};
use registry_store::MemoryStore;
use tower::ServiceExt;

/// sha256 of "hello", as given in the protocol examples.
const HELLO_DIGEST: &str =
    "sha256:2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824";

fn test_registry() -> Router {
    RegistryBuilder::new()
        .store(MemoryStore::new().into())
        .build()
}

fn test_registry_with_deletion() -> Router {
    RegistryBuilder::new()
        .store(MemoryStore::new().into())
        .enable_blob_deletion(true)
        .enable_manifest_deletion(true)
        .build()
}

async fn send(app: &Router, request: Request<Body>) -> axum::response::Response {
    app.clone().oneshot(request).await.unwrap()
}

async fn body_bytes(response: axum::response::Response) -> Bytes {
    axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap()
}

async fn body_json(response: axum::response::Response) -> serde_json::Value {
    serde_json::from_slice(&body_bytes(response).await).unwrap()
}

fn header_value(response: &axum::response::Response, name: &str) -> String {
    response
        .headers()
        .get(name)
        .unwrap_or_else(|| panic!("missing header {name}"))
        .to_str()
        .unwrap()
        .to_string()
}

async fn error_code(response: axum::response::Response) -> String {
    let body = body_json(response).await;
    body["errors"][0]["code"].as_str().unwrap().to_string()
}

/// Push a blob with a monolithic POST and return its digest.
async fn push_blob(app: &Router, repo: &str, data: &'static [u8]) -> Digest {
    let digest = Digest::sha256_of(data);
    let response = send(
        app,
        Request::builder()
            .method("POST")
            .uri(format!("/v2/{repo}/blobs/uploads/?digest={digest}"))
            .body(Body::from(Bytes::from_static(data)))
            .unwrap(),
    )
    .await;
    assert_eq!(response.status(), StatusCode::CREATED);
    digest
}

/// A minimal image manifest referencing one config blob.
fn manifest_for(config: &Digest) -> Vec<u8> {
    serde_json::to_vec(&serde_json::json!({
        "schemaVersion": 2,
        "mediaType": "application/vnd.oci.image.manifest.v1+json",
        "config": {
            "mediaType": "application/vnd.oci.image.config.v1+json",
            "size": 1,
            "digest": config.to_string(),
        },
        "layers": [],
    }))
    .unwrap()
}

async fn push_manifest(app: &Router, repo: &str, reference: &str, bytes: Vec<u8>) -> String {
    let response = send(
        app,
        Request::builder()
            .method("PUT")
            .uri(format!("/v2/{repo}/manifests/{reference}"))
            .header(
                header::CONTENT_TYPE,
                "application/vnd.oci.image.manifest.v1+json",
            )
            .body(Body::from(bytes))
            .unwrap(),
    )
    .await;
    assert_eq!(response.status(), StatusCode::CREATED);
    header_value(&response, "docker-content-digest")
}

#[tokio::test]
async fn api_version_check() {
    let app = test_registry();

    let response = send(
        &app,
        Request::builder().uri("/v2/").body(Body::empty()).unwrap(),
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        header_value(&response, "docker-distribution-api-version"),
        "registry/2.0"
    );
    assert_eq!(body_json(response).await, serde_json::json!({}));
}

// S1: monolithic upload in a single POST.
#[tokio::test]
async fn monolithic_upload_round_trip() {
    let app = test_registry();

    let response = send(
        &app,
        Request::builder()
            .method("POST")
            .uri(format!("/v2/lib/x/blobs/uploads/?digest={HELLO_DIGEST}"))
            .body(Body::from("hello"))
            .unwrap(),
    )
    .await;
    assert_eq!(response.status(), StatusCode::CREATED);
    let location = header_value(&response, "location");
    assert_eq!(location, format!("/v2/lib/x/blobs/{HELLO_DIGEST}"));

    let response = send(
        &app,
        Request::builder().uri(location.as_str()).body(Body::empty()).unwrap(),
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        header_value(&response, "docker-content-digest"),
        HELLO_DIGEST
    );
    assert_eq!(&body_bytes(response).await[..], b"hello");
}

// S2: chunked upload through POST / PATCH / PUT.
#[tokio::test]
async fn chunked_upload_round_trip() {
    let app = test_registry();

    let response = send(
        &app,
        Request::builder()
            .method("POST")
            .uri("/v2/lib/x/blobs/uploads/")
            .body(Body::empty())
            .unwrap(),
    )
    .await;
    assert_eq!(response.status(), StatusCode::ACCEPTED);
    assert_eq!(header_value(&response, "range"), "0-0");
    let upload_url = header_value(&response, "location");
    let uuid = header_value(&response, "docker-upload-uuid");
    assert!(upload_url.ends_with(&uuid));

    let response = send(
        &app,
        Request::builder()
            .method("PATCH")
            .uri(upload_url.as_str())
            .header(header::CONTENT_RANGE, "0-4")
            .body(Body::from("hello"))
            .unwrap(),
    )
    .await;
    assert_eq!(response.status(), StatusCode::ACCEPTED);
    assert_eq!(header_value(&response, "range"), "0-4");

    let response = send(
        &app,
        Request::builder()
            .method("PUT")
            .uri(format!("{upload_url}?digest={HELLO_DIGEST}"))
            .body(Body::empty())
            .unwrap(),
    )
    .await;
    assert_eq!(response.status(), StatusCode::CREATED);
    assert_eq!(
        header_value(&response, "location"),
        format!("/v2/lib/x/blobs/{HELLO_DIGEST}")
    );

    let response = send(
        &app,
        Request::builder()
            .method("HEAD")
            .uri(format!("/v2/lib/x/blobs/{HELLO_DIGEST}"))
            .body(Body::empty())
            .unwrap(),
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(header_value(&response, "content-length"), "5");
}

// S3: a chunk at the wrong offset is rejected and does not advance.
#[tokio::test]
async fn out_of_order_chunk() {
    let app = test_registry();

    let response = send(
        &app,
        Request::builder()
            .method("POST")
            .uri("/v2/lib/x/blobs/uploads/")
            .body(Body::empty())
            .unwrap(),
    )
    .await;
    let upload_url = header_value(&response, "location");

    let response = send(
        &app,
        Request::builder()
            .method("PATCH")
            .uri(upload_url.as_str())
            .header(header::CONTENT_RANGE, "5-9")
            .body(Body::from("hello"))
            .unwrap(),
    )
    .await;
    assert_eq!(response.status(), StatusCode::RANGE_NOT_SATISFIABLE);
    assert_eq!(error_code(response).await, "EXT_BLOB_UPLOAD_OUT_OF_ORDER");

    // Offset is still zero.
    let response = send(
        &app,
        Request::builder()
            .method("GET")
            .uri(upload_url.as_str())
            .body(Body::empty())
            .unwrap(),
    )
    .await;
    assert_eq!(response.status(), StatusCode::NO_CONTENT);
    assert_eq!(header_value(&response, "range"), "0-0");
}

// S4: a commit with the wrong digest fails and leaves the session usable.
#[tokio::test]
async fn digest_mismatch_keeps_session() {
    let app = test_registry();

    let response = send(
        &app,
        Request::builder()
            .method("POST")
            .uri("/v2/lib/x/blobs/uploads/")
            .body(Body::empty())
            .unwrap(),
    )
    .await;
    let upload_url = header_value(&response, "location");

    let response = send(
        &app,
        Request::builder()
            .method("PATCH")
            .uri(upload_url.as_str())
            .header(header::CONTENT_RANGE, "0-4")
            .body(Body::from("hello"))
            .unwrap(),
    )
    .await;
    assert_eq!(response.status(), StatusCode::ACCEPTED);

    let wrong = format!("sha256:{}", "deadbeef".repeat(8));
    let response = send(
        &app,
        Request::builder()
            .method("PUT")
            .uri(format!("{upload_url}?digest={wrong}"))
            .body(Body::empty())
            .unwrap(),
    )
    .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(error_code(response).await, "DIGEST_INVALID");

    // The session survived the failed commit.
    let response = send(
        &app,
        Request::builder()
            .method("PUT")
            .uri(format!("{upload_url}?digest={HELLO_DIGEST}"))
            .body(Body::empty())
            .unwrap(),
    )
    .await;
    assert_eq!(response.status(), StatusCode::CREATED);

    // Committing again finds the session gone.
    let response = send(
        &app,
        Request::builder()
            .method("PUT")
            .uri(format!("{upload_url}?digest={HELLO_DIGEST}"))
            .body(Body::empty())
            .unwrap(),
    )
    .await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    assert_eq!(error_code(response).await, "BLOB_UPLOAD_UNKNOWN");
}

// S5: a manifest referencing a blob the repository lacks is rejected.
#[tokio::test]
async fn manifest_with_missing_blob() {
    let app = test_registry();
    let absent = format!("sha256:{}", "a".repeat(64));

    let manifest = serde_json::to_vec(&serde_json::json!({
        "schemaVersion": 2,
        "config": { "digest": absent, "size": 1 },
        "layers": [],
    }))
    .unwrap();

    let response = send(
        &app,
        Request::builder()
            .method("PUT")
            .uri("/v2/lib/x/manifests/latest")
            .header(
                header::CONTENT_TYPE,
                "application/vnd.oci.image.manifest.v1+json",
            )
            .body(Body::from(manifest))
            .unwrap(),
    )
    .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = body_json(response).await;
    assert_eq!(body["errors"][0]["code"], "MANIFEST_BLOB_UNKNOWN");
    assert_eq!(body["errors"][0]["detail"]["digests"][0], absent);
}

// S6: cross-repository mount.
#[tokio::test]
async fn cross_repository_mount() {
    let app = test_registry();
    let digest = push_blob(&app, "src/a", b"layer data").await;

    let response = send(
        &app,
        Request::builder()
            .method("POST")
            .uri(format!(
                "/v2/dst/b/blobs/uploads/?mount={digest}&from=src/a"
            ))
            .body(Body::empty())
            .unwrap(),
    )
    .await;
    assert_eq!(response.status(), StatusCode::CREATED);
    assert_eq!(
        header_value(&response, "location"),
        format!("/v2/dst/b/blobs/{digest}")
    );

    let response = send(
        &app,
        Request::builder()
            .method("HEAD")
            .uri(format!("/v2/dst/b/blobs/{digest}"))
            .body(Body::empty())
            .unwrap(),
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn mount_of_absent_blob_falls_back_to_session() {
    let app = test_registry();
    push_blob(&app, "src/a", b"present").await;
    let absent = format!("sha256:{}", "b".repeat(64));

    let response = send(
        &app,
        Request::builder()
            .method("POST")
            .uri(format!(
                "/v2/dst/b/blobs/uploads/?mount={absent}&from=src/a"
            ))
            .body(Body::empty())
            .unwrap(),
    )
    .await;
    assert_eq!(response.status(), StatusCode::ACCEPTED);
    let location = header_value(&response, "location");
    assert!(location.starts_with("/v2/dst/b/blobs/uploads/"));
}

#[tokio::test]
async fn mount_from_unknown_repository() {
    let app = test_registry();
    let digest = format!("sha256:{}", "c".repeat(64));

    let response = send(
        &app,
        Request::builder()
            .method("POST")
            .uri(format!(
                "/v2/dst/b/blobs/uploads/?mount={digest}&from=ghost/repo"
            ))
            .body(Body::empty())
            .unwrap(),
    )
    .await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    assert_eq!(error_code(response).await, "NAME_UNKNOWN");
}

#[tokio::test]
async fn upload_cancellation() {
    let app = test_registry();

    let response = send(
        &app,
        Request::builder()
            .method("POST")
            .uri("/v2/lib/x/blobs/uploads/")
            .body(Body::empty())
            .unwrap(),
    )
    .await;
    let upload_url = header_value(&response, "location");

    let response = send(
        &app,
        Request::builder()
            .method("DELETE")
            .uri(upload_url.as_str())
            .body(Body::empty())
            .unwrap(),
    )
    .await;
    assert_eq!(response.status(), StatusCode::NO_CONTENT);

    let response = send(
        &app,
        Request::builder()
            .method("GET")
            .uri(upload_url.as_str())
            .body(Body::empty())
            .unwrap(),
    )
    .await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    assert_eq!(error_code(response).await, "BLOB_UPLOAD_UNKNOWN");
}

#[tokio::test]
async fn patch_without_content_range() {
    let app = test_registry();

    let response = send(
        &app,
        Request::builder()
            .method("POST")
            .uri("/v2/lib/x/blobs/uploads/")
            .body(Body::empty())
            .unwrap(),
    )
    .await;
    let upload_url = header_value(&response, "location");

    let response = send(
        &app,
        Request::builder()
            .method("PATCH")
            .uri(upload_url.as_str())
            .body(Body::from("hello"))
            .unwrap(),
    )
    .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(error_code(response).await, "BLOB_UPLOAD_INVALID");
}

#[tokio::test]
async fn manifest_round_trip_and_idempotent_put() {
    let app = test_registry();
    let config = push_blob(&app, "lib/x", b"config bytes").await;
    let manifest = manifest_for(&config);

    let digest = push_manifest(&app, "lib/x", "latest", manifest.clone()).await;
    assert_eq!(digest, Digest::sha256_of(&manifest).to_string());

    // Fetch by tag.
    let response = send(
        &app,
        Request::builder()
            .uri("/v2/lib/x/manifests/latest")
            .body(Body::empty())
            .unwrap(),
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        header_value(&response, "content-type"),
        "application/vnd.oci.image.manifest.v1+json"
    );
    assert_eq!(header_value(&response, "docker-content-digest"), digest);
    assert_eq!(&body_bytes(response).await[..], &manifest[..]);

    // Fetch by digest.
    let response = send(
        &app,
        Request::builder()
            .uri(format!("/v2/lib/x/manifests/{digest}"))
            .body(Body::empty())
            .unwrap(),
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);

    // HEAD reports metadata without a body.
    let response = send(
        &app,
        Request::builder()
            .method("HEAD")
            .uri("/v2/lib/x/manifests/latest")
            .body(Body::empty())
            .unwrap(),
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        header_value(&response, "content-length"),
        manifest.len().to_string()
    );

    // Re-putting the identical manifest yields the same digest.
    let again = push_manifest(&app, "lib/x", "latest", manifest).await;
    assert_eq!(again, digest);
}

#[tokio::test]
async fn manifest_not_found_and_invalid_reference() {
    let app = test_registry();

    let response = send(
        &app,
        Request::builder()
            .uri("/v2/lib/x/manifests/nope")
            .body(Body::empty())
            .unwrap(),
    )
    .await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    assert_eq!(error_code(response).await, "MANIFEST_UNKNOWN");

    // Digest-shaped but malformed.
    let response = send(
        &app,
        Request::builder()
            .uri("/v2/lib/x/manifests/sha256:short")
            .body(Body::empty())
            .unwrap(),
    )
    .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(error_code(response).await, "DIGEST_INVALID");
}

#[tokio::test]
async fn oversized_manifest_is_rejected() {
    let app = RegistryBuilder::new()
        .store(MemoryStore::new().into())
        .max_manifest_size(64)
        .build();

    let manifest = vec![b' '; 200];
    let response = send(
        &app,
        Request::builder()
            .method("PUT")
            .uri("/v2/lib/x/manifests/latest")
            .header(
                header::CONTENT_TYPE,
                "application/vnd.oci.image.manifest.v1+json",
            )
            .body(Body::from(manifest))
            .unwrap(),
    )
    .await;
    assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
    assert_eq!(error_code(response).await, "SIZE_INVALID");
}

#[tokio::test]
async fn deletion_disabled_by_default() {
    let app = test_registry();
    let digest = push_blob(&app, "lib/x", b"blob").await;

    let response = send(
        &app,
        Request::builder()
            .method("DELETE")
            .uri(format!("/v2/lib/x/blobs/{digest}"))
            .body(Body::empty())
            .unwrap(),
    )
    .await;
    assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED);
    assert_eq!(error_code(response).await, "UNSUPPORTED");
}

#[tokio::test]
async fn blob_deletion_semantics() {
    let app = test_registry_with_deletion();
    let digest = push_blob(&app, "lib/x", b"blob").await;

    let response = send(
        &app,
        Request::builder()
            .method("DELETE")
            .uri(format!("/v2/lib/x/blobs/{digest}"))
            .body(Body::empty())
            .unwrap(),
    )
    .await;
    assert_eq!(response.status(), StatusCode::ACCEPTED);

    let response = send(
        &app,
        Request::builder()
            .uri(format!("/v2/lib/x/blobs/{digest}"))
            .body(Body::empty())
            .unwrap(),
    )
    .await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    assert_eq!(error_code(response).await, "BLOB_UNKNOWN");
}

#[tokio::test]
async fn manifest_deletion_requires_digest() {
    let app = test_registry_with_deletion();
    let config = push_blob(&app, "lib/x", b"config").await;
    let digest = push_manifest(&app, "lib/x", "latest", manifest_for(&config)).await;

    // Deleting through a tag is refused.
    let response = send(
        &app,
        Request::builder()
            .method("DELETE")
            .uri("/v2/lib/x/manifests/latest")
            .body(Body::empty())
            .unwrap(),
    )
    .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(error_code(response).await, "MANIFEST_INVALID");

    // Deleting by digest works and takes the tag with it.
    let response = send(
        &app,
        Request::builder()
            .method("DELETE")
            .uri(format!("/v2/lib/x/manifests/{digest}"))
            .body(Body::empty())
            .unwrap(),
    )
    .await;
    assert_eq!(response.status(), StatusCode::ACCEPTED);

    let response = send(
        &app,
        Request::builder()
            .uri("/v2/lib/x/manifests/latest")
            .body(Body::empty())
            .unwrap(),
    )
    .await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn tags_list_pagination() {
    let app = test_registry();
    let config = push_blob(&app, "lib/x", b"config").await;
    for tag in ["alpha", "beta", "gamma"] {
        push_manifest(&app, "lib/x", tag, manifest_for(&config)).await;
    }

    let response = send(
        &app,
        Request::builder()
            .uri("/v2/lib/x/tags/list")
            .body(Body::empty())
            .unwrap(),
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["name"], "lib/x");
    assert_eq!(body["tags"], serde_json::json!(["alpha", "beta", "gamma"]));

    // First page of two, with a Link to the next.
    let response = send(
        &app,
        Request::builder()
            .uri("/v2/lib/x/tags/list?n=2")
            .body(Body::empty())
            .unwrap(),
    )
    .await;
    let link = header_value(&response, "link");
    assert_eq!(link, "</v2/lib/x/tags/list?n=2&last=beta>; rel=\"next\"");
    let body = body_json(response).await;
    assert_eq!(body["tags"], serde_json::json!(["alpha", "beta"]));

    // Follow the page boundary.
    let response = send(
        &app,
        Request::builder()
            .uri("/v2/lib/x/tags/list?n=2&last=beta")
            .body(Body::empty())
            .unwrap(),
    )
    .await;
    assert!(response.headers().get("link").is_none());
    let body = body_json(response).await;
    assert_eq!(body["tags"], serde_json::json!(["gamma"]));
}

#[tokio::test]
async fn tags_list_unknown_repository() {
    let app = test_registry();

    let response = send(
        &app,
        Request::builder()
            .uri("/v2/ghost/repo/tags/list")
            .body(Body::empty())
            .unwrap(),
    )
    .await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    assert_eq!(error_code(response).await, "NAME_UNKNOWN");
}

#[tokio::test]
async fn catalog_lists_repositories() {
    let app = test_registry();
    push_blob(&app, "zeta/app", b"z").await;
    push_blob(&app, "alpha/app", b"a").await;

    let response = send(
        &app,
        Request::builder()
            .uri("/v2/_catalog")
            .body(Body::empty())
            .unwrap(),
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(
        body["repositories"],
        serde_json::json!(["alpha/app", "zeta/app"])
    );
}

#[tokio::test]
async fn invalid_repository_name() {
    let app = test_registry();

    let response = send(
        &app,
        Request::builder()
            .method("POST")
            .uri("/v2/UPPER/blobs/uploads/")
            .body(Body::empty())
            .unwrap(),
    )
    .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(error_code(response).await, "NAME_INVALID");
}

#[tokio::test]
async fn invalid_blob_digest() {
    let app = test_registry();

    let response = send(
        &app,
        Request::builder()
            .uri("/v2/lib/x/blobs/not-a-digest")
            .body(Body::empty())
            .unwrap(),
    )
    .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(error_code(response).await, "DIGEST_INVALID");
}

#[tokio::test]
async fn wrong_method_is_unsupported() {
    let app = test_registry();

    let response = send(
        &app,
        Request::builder()
            .method("POST")
            .uri(format!("/v2/lib/x/blobs/{HELLO_DIGEST}"))
            .body(Body::empty())
            .unwrap(),
    )
    .await;
    assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED);
    assert_eq!(error_code(response).await, "UNSUPPORTED");
}

fn basic_registry(anonymous_pull: bool) -> Router {
    let mut accounts = std::collections::HashMap::new();
    accounts.insert("ada".to_string(), Password::new("s3cret"));
    RegistryBuilder::new()
        .store(MemoryStore::new().into())
        .auth(Auth::new(BasicAuth::new(accounts, anonymous_pull)))
        .realm("test-registry")
        .build()
}

fn basic_header(user: &str, password: &str) -> String {
    use base64::prelude::BASE64_STANDARD;
    use base64::Engine as _;
    format!(
        "Basic {}",
        BASE64_STANDARD.encode(format!("{user}:{password}"))
    )
}

#[tokio::test]
async fn missing_credentials_are_challenged() {
    let app = basic_registry(false);

    let response = send(
        &app,
        Request::builder()
            .uri("/v2/lib/x/tags/list")
            .body(Body::empty())
            .unwrap(),
    )
    .await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(
        header_value(&response, "www-authenticate"),
        "Basic realm=\"test-registry\""
    );
    assert_eq!(error_code(response).await, "UNAUTHORIZED");
}

#[tokio::test]
async fn bad_credentials_are_rejected() {
    let app = basic_registry(false);

    let response = send(
        &app,
        Request::builder()
            .uri("/v2/lib/x/tags/list")
            .header(header::AUTHORIZATION, basic_header("ada", "wrong"))
            .body(Body::empty())
            .unwrap(),
    )
    .await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn valid_credentials_admit_pushes() {
    let app = basic_registry(false);

    let response = send(
        &app,
        Request::builder()
            .method("POST")
            .uri(format!("/v2/lib/x/blobs/uploads/?digest={HELLO_DIGEST}"))
            .header(header::AUTHORIZATION, basic_header("ada", "s3cret"))
            .body(Body::from("hello"))
            .unwrap(),
    )
    .await;
    assert_eq!(response.status(), StatusCode::CREATED);
}

#[tokio::test]
async fn anonymous_pull_cannot_push() {
    let app = basic_registry(true);

    // Anonymous pull is admitted.
    let response = send(
        &app,
        Request::builder()
            .uri(format!("/v2/lib/x/blobs/{HELLO_DIGEST}"))
            .body(Body::empty())
            .unwrap(),
    )
    .await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    // Anonymous push is denied.
    let response = send(
        &app,
        Request::builder()
            .method("POST")
            .uri("/v2/lib/x/blobs/uploads/")
            .body(Body::empty())
            .unwrap(),
    )
    .await;
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
    assert_eq!(error_code(response).await, "DENIED");
}

#[tokio::test]
async fn error_envelope_shape() {
    let app = test_registry();

    let response = send(
        &app,
        Request::builder()
            .uri(format!("/v2/lib/x/blobs/{HELLO_DIGEST}"))
            .body(Body::empty())
            .unwrap(),
    )
    .await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    let body = body_json(response).await;
    let error = &body["errors"][0];
    assert_eq!(error["code"], "BLOB_UNKNOWN");
    assert!(error["message"].is_string());
    assert_eq!(error["detail"]["digest"], HELLO_DIGEST);
}
