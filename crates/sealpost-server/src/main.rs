//! # sealpost-server
//!
//! Encrypted messaging server. Accepts TCP clients speaking back-to-back JSON
//! objects, stores accounts and RSA key files under `DATA_DIR`, and keeps
//! every conversation as an append-only log of hybrid-encrypted entries.

use std::sync::Arc;

use tracing::info;
use tracing_subscriber::EnvFilter;

use sealpost_server::{Server, ServerConfig};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // -----------------------------------------------------------------------
    // 1. Initialize tracing (respects RUST_LOG env var)
    // -----------------------------------------------------------------------
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new("info,sealpost_server=debug,sealpost_net=info,sealpost_store=info")
        }))
        .init();

    info!("Starting Sealpost server v{}", env!("CARGO_PKG_VERSION"));

    // -----------------------------------------------------------------------
    // 2. Load configuration
    // -----------------------------------------------------------------------
    let config = ServerConfig::from_env();
    info!(?config, "Loaded configuration");

    // -----------------------------------------------------------------------
    // 3. Open storage and bind
    // -----------------------------------------------------------------------
    let server = Arc::new(Server::open(config)?);
    let listener = server.bind().await?;

    // -----------------------------------------------------------------------
    // 4. Serve until the listener fails or Ctrl+C
    // -----------------------------------------------------------------------
    tokio::select! {
        result = server.clone().serve(listener) => {
            if let Err(e) = result {
                tracing::error!(error = %e, "Server failed");
                return Err(e.into());
            }
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C, shutting down");
            server.shutdown();
        }
    }

    Ok(())
}
