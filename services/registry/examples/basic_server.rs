//! Basic OCI registry server example
//!
//! Run with: cargo run -p registry --example basic_server [config.json]
//!
//! Without a config file the server uses in-memory storage and anonymous
//! access. A config file looks like:
//!
//! ```json
//! {
//!   "realm": "registry",
//!   "enable-blob-deletion": true,
//!   "store": { "local": { "path": "/tmp/registry-data" } },
//!   "auth": { "basic": { "accounts": { "ada": "s3cret" } } }
//! }
//! ```

use registry::RegistryConfig;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::fmt::init();

    let config: RegistryConfig = match std::env::args().nth(1) {
        Some(path) => serde_json::from_str(&std::fs::read_to_string(path)?)?,
        None => serde_json::from_str(r#"{ "store": "memory", "auth": "anonymous" }"#)?,
    };

    let app = config.build().await?;

    // Bind to address
    let addr = "127.0.0.1:5000";
    let listener = tokio::net::TcpListener::bind(addr).await?;

    tracing::info!("OCI Registry listening on http://{}", addr);
    tracing::info!("Try: curl http://{}/v2/", addr);

    // Serve until interrupted
    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("shutting down");
        })
        .await?;

    Ok(())
}
