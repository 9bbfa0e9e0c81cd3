//! # OCI Container Registry
//!
//! This crate implements the engine of an OCI-compliant container registry
//! following the [OCI Distribution Specification](https://github.com/opencontainers/distribution-spec).
//!
//! ## Features
//!
//! - Full distribution API surface: blobs, chunked and monolithic uploads,
//!   cross-repository mounts, manifests with tag indirection, tag listing
//!   and catalog with pagination
//! - Pluggable storage backend via the `registry-store` crate
//! - Pluggable authentication backend via the `registry-auth` crate
//! - Builder pattern for configuration, plus a serde config surface
//!
//! ## Example
//!
//! ```no_run
//! use registry::RegistryBuilder;
//! use registry_store::MemoryStore;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let registry = RegistryBuilder::new()
//!     .store(MemoryStore::new().into())
//!     .realm("registry")
//!     .build();
//!
//! // Use the registry service with axum or any tower-compatible server
//! # Ok(())
//! # }
//! ```

mod api;
mod config;
mod context;
mod error;
mod manifest;
mod registry;
mod upload;

pub use api::RegistryBuilder;
pub use config::{NamePattern, RegistryConfig};
pub use context::{Context, Endpoint};
pub use error::{RegistryError, RegistryResult};
pub use registry::{MountOutcome, Page, Pagination, Registry};
