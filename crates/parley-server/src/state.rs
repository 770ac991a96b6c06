//! Shared application state wired through axum handlers and the socket
//! layer.

use std::sync::{Arc, Mutex};

use ed25519_dalek::{SigningKey, VerifyingKey};

use parley_store::Database;

use crate::blob_store::BlobStore;
use crate::config::ServerConfig;
use crate::error::ApiError;
use crate::fanout::FanoutRouter;
use crate::ingest::MessageIngestPipeline;
use crate::presence::PresenceTracker;
use crate::rate_limit::RateLimiter;
use crate::registry::ConnectionRegistry;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<ServerConfig>,
    pub db: Arc<Mutex<Database>>,
    pub blob_store: Arc<BlobStore>,
    pub registry: Arc<ConnectionRegistry>,
    pub presence: Arc<PresenceTracker>,
    pub fanout: FanoutRouter,
    pub ingest: Arc<MessageIngestPipeline>,
    pub signing_key: Arc<SigningKey>,
    pub rate_limiter: RateLimiter,
}

impl AppState {
    pub fn new(
        config: ServerConfig,
        db: Database,
        blob_store: BlobStore,
        signing_key: SigningKey,
    ) -> Self {
        let db = Arc::new(Mutex::new(db));
        let registry = Arc::new(ConnectionRegistry::new());
        let presence = Arc::new(PresenceTracker::new());
        let fanout = FanoutRouter::new(registry.clone());
        let ingest = Arc::new(MessageIngestPipeline::new(fanout.clone(), db.clone()));

        Self {
            config: Arc::new(config),
            db,
            blob_store: Arc::new(blob_store),
            registry,
            presence,
            fanout,
            ingest,
            signing_key: Arc::new(signing_key),
            rate_limiter: RateLimiter::default(),
        }
    }

    /// Public half of the session signing key.
    pub fn verifying_key(&self) -> VerifyingKey {
        self.signing_key.verifying_key()
    }

    /// Run a closure against the database on the blocking pool, so store
    /// I/O never stalls the async workers.
    pub async fn with_db<T, F>(&self, f: F) -> Result<T, ApiError>
    where
        T: Send + 'static,
        F: FnOnce(&mut Database) -> Result<T, parley_store::StoreError> + Send + 'static,
    {
        let db = self.db.clone();
        let result = tokio::task::spawn_blocking(move || {
            // A poisoned lock only means another closure panicked; the
            // connection itself is still usable.
            let mut guard = db.lock().unwrap_or_else(|poison| poison.into_inner());
            f(&mut guard)
        })
        .await
        .map_err(|e| ApiError::Internal(format!("database task failed: {e}")))?;

        result.map_err(ApiError::from)
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use ed25519_dalek::SigningKey;
    use rand::rngs::OsRng;
    use tempfile::TempDir;

    /// Fully wired state over an in-memory database and a temp blob dir.
    /// The TempDir must outlive the state.
    pub(crate) async fn test_state() -> (AppState, TempDir) {
        let config = ServerConfig::default();
        let max_blob_size = config.max_blob_size;
        state_with_blob_limit(config, max_blob_size).await
    }

    /// Same as [`test_state`] but with a custom blob size cap.
    pub(crate) async fn test_state_with_blob_limit(max_blob_size: usize) -> (AppState, TempDir) {
        state_with_blob_limit(ServerConfig::default(), max_blob_size).await
    }

    async fn state_with_blob_limit(
        config: ServerConfig,
        max_blob_size: usize,
    ) -> (AppState, TempDir) {
        let dir = TempDir::new().unwrap();
        let db = Database::open_in_memory().unwrap();
        let blob_store = BlobStore::new(
            dir.path().to_path_buf(),
            config.public_base_url.clone(),
            max_blob_size,
        )
        .await
        .unwrap();
        let signing_key = SigningKey::generate(&mut OsRng);
        (AppState::new(config, db, blob_store, signing_key), dir)
    }
}
