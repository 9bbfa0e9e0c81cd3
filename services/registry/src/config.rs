//! Runtime configuration for the registry
//!
//! Loaded with serde (kebab-case keys) in the manner of the storage and
//! auth backend configs, so a whole registry can be described in one JSON
//! document:
//!
//! ```json
//! {
//!   "realm": "registry",
//!   "max-manifest-size": 4194304,
//!   "enable-blob-deletion": true,
//!   "store": { "local": { "path": "/var/lib/registry" } },
//!   "auth": { "basic": { "accounts": { "ada": "s3cret" } } }
//! }
//! ```

use std::fmt;

use regex::Regex;
use registry_auth::AuthConfig;
use registry_store::{StoreConfig, StoreError};
use serde::{Deserialize, Deserializer};

use crate::api::RegistryBuilder;

/// Default cap on manifest payloads: 4 MiB.
pub const DEFAULT_MAX_MANIFEST_SIZE: u64 = 4 * 1024 * 1024;

/// Default cap on a single upload chunk: 10 MiB.
pub const DEFAULT_MAX_CHUNK_SIZE: u64 = 10 * 1024 * 1024;

/// Default repository name grammar: one or more `/`-separated components,
/// each `[a-z0-9]+` with inner `.`/`_`/`-` separators.
pub const DEFAULT_REPO_NAME_PATTERN: &str =
    r"^[a-z0-9]+(?:[._-][a-z0-9]+)*(?:/[a-z0-9]+(?:[._-][a-z0-9]+)*)*$";

/// A compiled repository-name pattern.
///
/// Deserializes from the regex source text; the whole name must match.
#[derive(Clone)]
pub struct NamePattern(Regex);

impl NamePattern {
    pub fn new(pattern: &str) -> Result<Self, regex::Error> {
        Ok(NamePattern(Regex::new(pattern)?))
    }

    pub fn is_match(&self, name: &str) -> bool {
        self.0.is_match(name)
    }
}

impl Default for NamePattern {
    fn default() -> Self {
        NamePattern::new(DEFAULT_REPO_NAME_PATTERN).expect("default pattern compiles")
    }
}

impl fmt::Debug for NamePattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("NamePattern").field(&self.0.as_str()).finish()
    }
}

impl<'de> Deserialize<'de> for NamePattern {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let source = String::deserialize(deserializer)?;
        NamePattern::new(&source).map_err(serde::de::Error::custom)
    }
}

fn default_realm() -> String {
    "registry".to_string()
}

fn default_max_manifest_size() -> u64 {
    DEFAULT_MAX_MANIFEST_SIZE
}

fn default_max_chunk_size() -> u64 {
    DEFAULT_MAX_CHUNK_SIZE
}

/// Top-level runtime configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct RegistryConfig {
    /// Realm named in authentication challenges.
    #[serde(default = "default_realm")]
    pub realm: String,

    /// Largest accepted manifest payload, in bytes.
    #[serde(default = "default_max_manifest_size")]
    pub max_manifest_size: u64,

    /// Largest accepted upload chunk, in bytes.
    #[serde(default = "default_max_chunk_size")]
    pub max_blob_upload_chunk_size: u64,

    /// When false, blob DELETE answers `UNSUPPORTED`.
    #[serde(default)]
    pub enable_blob_deletion: bool,

    /// When false, manifest DELETE answers `UNSUPPORTED`.
    #[serde(default)]
    pub enable_manifest_deletion: bool,

    /// Repository name grammar.
    #[serde(default)]
    pub repo_name_pattern: NamePattern,

    /// When true, even the `/v2/` availability probe requires auth.
    #[serde(default)]
    pub protect_ping: bool,

    /// Idle upload sessions older than this are treated as unknown and
    /// cleaned up on discovery. No TTL when absent.
    #[serde(default)]
    pub upload_ttl_seconds: Option<u64>,

    pub store: StoreConfig,
    pub auth: AuthConfig,
}

impl RegistryConfig {
    /// Build the configured backends and assemble the service router.
    pub async fn build(self) -> Result<axum::Router, StoreError> {
        let store = self.store.build().await?;
        let auth = self.auth.build();

        let mut builder = RegistryBuilder::new()
            .store(store)
            .auth(auth)
            .realm(self.realm)
            .max_manifest_size(self.max_manifest_size)
            .max_blob_upload_chunk_size(self.max_blob_upload_chunk_size)
            .enable_blob_deletion(self.enable_blob_deletion)
            .enable_manifest_deletion(self.enable_manifest_deletion)
            .repo_name_pattern(self.repo_name_pattern)
            .protect_ping(self.protect_ping);
        if let Some(seconds) = self.upload_ttl_seconds {
            builder = builder.upload_ttl_seconds(seconds);
        }
        Ok(builder.build())
    }
}
