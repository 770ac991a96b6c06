//! # parley-server
//!
//! Real-time chat backend.
//!
//! This binary provides:
//! - **Session auth** shared by the REST surface and the WebSocket
//!   handshake (ed25519-signed tokens)
//! - **Live delivery** of message, typing and presence events over
//!   per-user WebSocket connections (multi-device aware)
//! - **REST API** (axum) for accounts, friend requests, chats and paged
//!   message history
//! - **SQLite persistence** for users, chats, messages and attachments
//! - **Filesystem blob storage** for avatars and message attachments
//! - **Per-IP rate limiting** to protect against abuse

mod api;
mod auth;
mod blob_store;
mod config;
mod error;
mod fanout;
mod ingest;
mod presence;
mod rate_limit;
mod registry;
mod socket;
mod state;

use anyhow::Context;
use ed25519_dalek::SigningKey;
use rand::rngs::OsRng;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use parley_store::Database;

use crate::blob_store::BlobStore;
use crate::config::ServerConfig;
use crate::state::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // -----------------------------------------------------------------------
    // 1. Initialize tracing (respects RUST_LOG env var)
    // -----------------------------------------------------------------------
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,parley_server=debug")),
        )
        .init();

    info!("Starting Parley server v{}", env!("CARGO_PKG_VERSION"));

    // -----------------------------------------------------------------------
    // 2. Load configuration
    // -----------------------------------------------------------------------
    let config = ServerConfig::from_env();
    info!(
        instance = %config.instance_name,
        addr = %config.http_addr,
        "Loaded configuration"
    );

    // -----------------------------------------------------------------------
    // 3. Initialize subsystems
    // -----------------------------------------------------------------------

    // The process must not accept traffic without its database.
    let db = match &config.database_path {
        Some(path) => Database::open_at(path),
        None => Database::new(),
    }
    .context("failed to open database")?;
    if let Some(path) = db.path() {
        info!(path = %path.display(), "Database opened");
    }

    let blob_store = BlobStore::new(
        config.blob_storage_path.clone(),
        config.public_base_url.clone(),
        config.max_blob_size,
    )
    .await
    .map_err(|e| anyhow::anyhow!("failed to initialize blob store: {e}"))?;

    // Sessions signed with an ephemeral key do not survive a restart.
    let signing_key = match config.session_signing_key {
        Some(seed) => SigningKey::from_bytes(&seed),
        None => {
            warn!("SESSION_SIGNING_KEY not set; sessions will not survive a restart");
            SigningKey::generate(&mut OsRng)
        }
    };

    let http_addr = config.http_addr;
    let state = AppState::new(config, db, blob_store, signing_key);

    // -----------------------------------------------------------------------
    // 4. Spawn background tasks
    // -----------------------------------------------------------------------

    // Periodic rate limiter cleanup (every 5 minutes, evict buckets idle >10 min)
    let rl = state.rate_limiter.clone();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(std::time::Duration::from_secs(300));
        loop {
            interval.tick().await;
            rl.purge_stale(600.0).await;
        }
    });

    // -----------------------------------------------------------------------
    // 5. Run the HTTP server (blocks until shutdown)
    // -----------------------------------------------------------------------
    api::serve(state, http_addr).await
}
