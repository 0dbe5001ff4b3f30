use rusqlite::Connection;

const UP_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS typing_indicators (
    room_id    TEXT NOT NULL,
    user_id    INTEGER NOT NULL,
    started_at TEXT NOT NULL,                 -- refreshed on every typing_start

    PRIMARY KEY (room_id, user_id),
    FOREIGN KEY (room_id) REFERENCES rooms(id) ON DELETE CASCADE,
    FOREIGN KEY (user_id) REFERENCES users(id) ON DELETE CASCADE
);

-- Subscription status as last reported by the billing service
CREATE TABLE IF NOT EXISTS subscriptions (
    user_id    INTEGER PRIMARY KEY NOT NULL,
    is_active  INTEGER NOT NULL DEFAULT 0,
    updated_at TEXT NOT NULL                  -- no FK: billing may know users first
);
"#;

pub fn up(conn: &Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(UP_SQL)
}
