/// Application name
pub const APP_NAME: &str = "Parley";

/// Cookie that carries the signed session token
pub const SESSION_COOKIE: &str = "parley-session";

/// Ed25519 signing key seed size in bytes
pub const SIGNING_KEY_SIZE: usize = 32;

/// Default session lifetime in days
pub const SESSION_TTL_DAYS: i64 = 15;

/// Maximum message content length in characters
pub const MAX_MESSAGE_LEN: usize = 4096;

/// Maximum user bio length in characters
pub const MAX_BIO_LEN: usize = 100;

/// Minimum password length at signup
pub const MIN_PASSWORD_LEN: usize = 8;

/// Maximum attachments per message
pub const MAX_ATTACHMENTS: usize = 5;

/// Maximum members in a group chat
pub const MAX_GROUP_MEMBERS: usize = 100;

/// Minimum members in a group chat (creator included)
pub const MIN_GROUP_MEMBERS: usize = 3;

/// Messages returned per history page
pub const MESSAGES_PER_PAGE: u32 = 20;

/// Default HTTP port
pub const DEFAULT_HTTP_PORT: u16 = 3000;
