//! v001 -- Initial schema creation.
//!
//! Creates the six core tables: `users`, `chats`, `chat_members`,
//! `messages`, `attachments`, and `friend_requests`.

use rusqlite::Connection;

/// SQL executed when upgrading from version 0 to version 1.
const UP_SQL: &str = r#"
-- ----------------------------------------------------------------
-- Users
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS users (
    id            TEXT PRIMARY KEY NOT NULL,  -- UUID v4
    name          TEXT NOT NULL,
    username      TEXT NOT NULL UNIQUE,
    bio           TEXT NOT NULL,
    password_hash TEXT NOT NULL,              -- argon2 PHC string
    avatar_ref    TEXT,                       -- blob store reference
    avatar_url    TEXT,
    created_at    TEXT NOT NULL               -- ISO-8601 / RFC-3339
);

-- ----------------------------------------------------------------
-- Chats (direct and group)
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS chats (
    id         TEXT PRIMARY KEY NOT NULL,     -- UUID v4
    name       TEXT NOT NULL,
    is_group   INTEGER NOT NULL DEFAULT 0,    -- boolean 0/1
    creator_id TEXT,                          -- nullable FK -> users(id)
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL,

    FOREIGN KEY (creator_id) REFERENCES users(id) ON DELETE SET NULL
);

-- ----------------------------------------------------------------
-- Chat membership (join table)
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS chat_members (
    chat_id TEXT NOT NULL,
    user_id TEXT NOT NULL,

    PRIMARY KEY (chat_id, user_id),
    FOREIGN KEY (chat_id) REFERENCES chats(id) ON DELETE CASCADE,
    FOREIGN KEY (user_id) REFERENCES users(id) ON DELETE CASCADE
);

CREATE INDEX IF NOT EXISTS idx_chat_members_user ON chat_members(user_id);

-- ----------------------------------------------------------------
-- Messages
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS messages (
    id         TEXT PRIMARY KEY NOT NULL,     -- UUID v4
    chat_id    TEXT NOT NULL,                 -- FK -> chats(id)
    sender_id  TEXT NOT NULL,                 -- FK -> users(id)
    content    TEXT NOT NULL DEFAULT '',
    created_at TEXT NOT NULL,

    FOREIGN KEY (chat_id) REFERENCES chats(id) ON DELETE CASCADE,
    FOREIGN KEY (sender_id) REFERENCES users(id) ON DELETE CASCADE
);

CREATE INDEX IF NOT EXISTS idx_messages_chat_ts
    ON messages(chat_id, created_at DESC);

-- ----------------------------------------------------------------
-- Attachments (blob references per message)
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS attachments (
    blob_ref   TEXT PRIMARY KEY NOT NULL,     -- stable blob store reference
    url        TEXT NOT NULL,
    message_id TEXT NOT NULL,                 -- FK -> messages(id)

    FOREIGN KEY (message_id) REFERENCES messages(id) ON DELETE CASCADE
);

CREATE INDEX IF NOT EXISTS idx_attachments_message ON attachments(message_id);

-- ----------------------------------------------------------------
-- Friend requests
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS friend_requests (
    id          TEXT PRIMARY KEY NOT NULL,    -- UUID v4
    sender_id   TEXT NOT NULL,                -- FK -> users(id)
    receiver_id TEXT NOT NULL,                -- FK -> users(id)
    status      TEXT NOT NULL DEFAULT 'pending',
    created_at  TEXT NOT NULL,

    FOREIGN KEY (sender_id) REFERENCES users(id) ON DELETE CASCADE,
    FOREIGN KEY (receiver_id) REFERENCES users(id) ON DELETE CASCADE
);

CREATE INDEX IF NOT EXISTS idx_requests_receiver ON friend_requests(receiver_id);
CREATE INDEX IF NOT EXISTS idx_requests_pair ON friend_requests(sender_id, receiver_id);
"#;

/// Apply the initial migration.
pub fn up(conn: &Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(UP_SQL)
}
