//! v001 -- Initial schema creation.
//!
//! Creates the core chat tables: `users`, `rooms`, `memberships`,
//! `messages` and `message_reads`.

use rusqlite::Connection;

/// SQL executed when upgrading from version 0 to version 1.
const UP_SQL: &str = r#"
-- ----------------------------------------------------------------
-- Users (mirrored from the auth service)
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS users (
    id         INTEGER PRIMARY KEY NOT NULL,
    username   TEXT NOT NULL,
    created_at TEXT NOT NULL                  -- RFC-3339, microseconds, UTC
);

-- ----------------------------------------------------------------
-- Rooms
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS rooms (
    id         TEXT PRIMARY KEY NOT NULL,     -- UUID v4
    name       TEXT,
    room_type  TEXT NOT NULL DEFAULT 'private'
               CHECK (room_type IN ('private', 'group')),
    created_by INTEGER,                       -- nullable FK -> users(id)
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL,

    FOREIGN KEY (created_by) REFERENCES users(id) ON DELETE SET NULL
);

-- ----------------------------------------------------------------
-- Memberships (presence + unread state per user per room)
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS memberships (
    room_id      TEXT NOT NULL,
    user_id      INTEGER NOT NULL,
    role         TEXT NOT NULL DEFAULT 'member'
                 CHECK (role IN ('admin', 'member')),
    is_online    INTEGER NOT NULL DEFAULT 0,  -- boolean 0/1
    last_seen    TEXT NOT NULL,
    joined_at    TEXT NOT NULL,
    unread_count INTEGER NOT NULL DEFAULT 0 CHECK (unread_count >= 0),

    PRIMARY KEY (room_id, user_id),
    FOREIGN KEY (room_id) REFERENCES rooms(id) ON DELETE CASCADE,
    FOREIGN KEY (user_id) REFERENCES users(id) ON DELETE CASCADE
);

CREATE INDEX IF NOT EXISTS idx_memberships_user ON memberships(user_id);

-- ----------------------------------------------------------------
-- Messages
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS messages (
    id           TEXT PRIMARY KEY NOT NULL,   -- UUID v4
    room_id      TEXT NOT NULL,
    sender_id    INTEGER NOT NULL,
    message_type TEXT NOT NULL DEFAULT 'text'
                 CHECK (message_type IN ('text', 'image', 'video', 'system')),
    content      TEXT NOT NULL DEFAULT '',
    media_ref    TEXT,                        -- opaque blob reference
    reply_to     TEXT,                        -- nullable self-reference
    is_edited    INTEGER NOT NULL DEFAULT 0,
    created_at   TEXT NOT NULL,
    updated_at   TEXT NOT NULL,

    FOREIGN KEY (room_id)   REFERENCES rooms(id)    ON DELETE CASCADE,
    FOREIGN KEY (sender_id) REFERENCES users(id)    ON DELETE CASCADE,
    FOREIGN KEY (reply_to)  REFERENCES messages(id) ON DELETE SET NULL
);

CREATE INDEX IF NOT EXISTS idx_messages_room_ts ON messages(room_id, created_at);
CREATE INDEX IF NOT EXISTS idx_messages_sender ON messages(sender_id);
CREATE INDEX IF NOT EXISTS idx_messages_reply_to ON messages(reply_to);

-- ----------------------------------------------------------------
-- Read receipts
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS message_reads (
    message_id TEXT NOT NULL,
    user_id    INTEGER NOT NULL,
    read_at    TEXT NOT NULL,

    PRIMARY KEY (message_id, user_id),
    FOREIGN KEY (message_id) REFERENCES messages(id) ON DELETE CASCADE,
    FOREIGN KEY (user_id)    REFERENCES users(id)    ON DELETE CASCADE
);
"#;

/// Apply the initial migration.
pub fn up(conn: &Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(UP_SQL)
}
