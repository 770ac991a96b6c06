//! Server configuration loaded from environment variables.
//!
//! All settings have sensible defaults so the server can start with zero
//! configuration for local development.

use std::net::SocketAddr;
use std::path::PathBuf;

use parley_shared::constants::{DEFAULT_HTTP_PORT, SESSION_TTL_DAYS};

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Socket address for the HTTP/WebSocket server.
    /// Env: `HTTP_ADDR`
    /// Default: `0.0.0.0:3000`
    pub http_addr: SocketAddr,

    /// SQLite database file.  When unset, the platform data directory is
    /// used.
    /// Env: `DATABASE_PATH`
    pub database_path: Option<PathBuf>,

    /// Filesystem path where uploaded blobs are stored.
    /// Env: `BLOB_STORAGE_PATH`
    /// Default: `./blobs`
    pub blob_storage_path: PathBuf,

    /// Base URL clients reach this server at, used to build public blob
    /// URLs.
    /// Env: `PUBLIC_BASE_URL`
    /// Default: `http://localhost:3000`
    pub public_base_url: String,

    /// Ed25519 session signing key seed (hex-encoded, 64 chars).
    /// Env: `SESSION_SIGNING_KEY`
    /// Default: `None` -- an ephemeral key is generated at startup, which
    /// invalidates all sessions on restart (development only).
    pub session_signing_key: Option<[u8; 32]>,

    /// Session lifetime in days.
    /// Env: `SESSION_TTL_DAYS`
    /// Default: `15`
    pub session_ttl_days: i64,

    /// Maximum uploaded blob size in bytes.
    /// Env: `MAX_BLOB_SIZE`
    /// Default: 50 MiB
    pub max_blob_size: usize,

    /// Human-readable name for this server instance.
    /// Env: `INSTANCE_NAME`
    /// Default: `"Parley"`
    pub instance_name: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            http_addr: ([0, 0, 0, 0], DEFAULT_HTTP_PORT).into(),
            database_path: None,
            blob_storage_path: PathBuf::from("./blobs"),
            public_base_url: format!("http://localhost:{DEFAULT_HTTP_PORT}"),
            session_signing_key: None,
            session_ttl_days: SESSION_TTL_DAYS,
            max_blob_size: 50 * 1024 * 1024, // 50 MiB
            instance_name: "Parley".to_string(),
        }
    }
}

impl ServerConfig {
    /// Load configuration from environment variables, falling back to
    /// defaults.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(addr) = std::env::var("HTTP_ADDR") {
            if let Ok(parsed) = addr.parse::<SocketAddr>() {
                config.http_addr = parsed;
            } else {
                tracing::warn!(value = %addr, "Invalid HTTP_ADDR, using default");
            }
        }

        if let Ok(path) = std::env::var("DATABASE_PATH") {
            config.database_path = Some(PathBuf::from(path));
        }

        if let Ok(path) = std::env::var("BLOB_STORAGE_PATH") {
            config.blob_storage_path = PathBuf::from(path);
        }

        if let Ok(url) = std::env::var("PUBLIC_BASE_URL") {
            config.public_base_url = url.trim_end_matches('/').to_string();
        }

        if let Ok(hex_key) = std::env::var("SESSION_SIGNING_KEY") {
            match parse_hex_seed(&hex_key) {
                Ok(seed) => config.session_signing_key = Some(seed),
                Err(e) => {
                    tracing::warn!(
                        error = %e,
                        "Invalid SESSION_SIGNING_KEY, generating ephemeral key (dev-only)"
                    );
                }
            }
        }

        if let Ok(val) = std::env::var("SESSION_TTL_DAYS") {
            if let Ok(days) = val.parse::<i64>() {
                config.session_ttl_days = days;
            }
        }

        if let Ok(val) = std::env::var("MAX_BLOB_SIZE") {
            if let Ok(size) = val.parse::<usize>() {
                config.max_blob_size = size;
            }
        }

        if let Ok(name) = std::env::var("INSTANCE_NAME") {
            config.instance_name = name;
        }

        // RUST_LOG is handled directly by tracing-subscriber's EnvFilter,
        // so we do not store it here.

        config
    }
}

/// Parse a 64-character hex string into a 32-byte seed.
fn parse_hex_seed(hex_str: &str) -> Result<[u8; 32], String> {
    let hex_str = hex_str.trim();
    if hex_str.len() != 64 {
        return Err(format!("expected 64 hex chars, got {}", hex_str.len()));
    }

    let bytes = hex::decode(hex_str).map_err(|e| format!("invalid hex: {e}"))?;
    let mut seed = [0u8; 32];
    seed.copy_from_slice(&bytes);
    Ok(seed)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = ServerConfig::default();
        assert_eq!(config.http_addr, ([0, 0, 0, 0], 3000).into());
        assert!(config.session_signing_key.is_none());
        assert_eq!(config.session_ttl_days, 15);
    }

    #[test]
    fn test_parse_hex_seed() {
        let hex_str = "ab".repeat(32);
        let seed = parse_hex_seed(&hex_str).unwrap();
        assert_eq!(seed, [0xab; 32]);
    }

    #[test]
    fn test_parse_hex_seed_wrong_length() {
        assert!(parse_hex_seed("abcd").is_err());
    }
}
