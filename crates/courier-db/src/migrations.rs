use anyhow::Result;
use rusqlite::Connection;
use tracing::info;

pub fn run(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS users (
            id          INTEGER PRIMARY KEY AUTOINCREMENT,
            username    TEXT NOT NULL UNIQUE,
            email       TEXT NOT NULL UNIQUE,
            avatar_url  TEXT,
            created_at  TEXT NOT NULL,
            last_seen   TEXT
        );

        -- Symmetric pairs: external friend CRUD always writes both directions.
        CREATE TABLE IF NOT EXISTS friends (
            id          INTEGER PRIMARY KEY AUTOINCREMENT,
            user_id     INTEGER NOT NULL REFERENCES users(id),
            friend_id   INTEGER NOT NULL REFERENCES users(id),
            created_at  TEXT NOT NULL,
            UNIQUE(user_id, friend_id)
        );

        CREATE TABLE IF NOT EXISTS messages (
            id                INTEGER PRIMARY KEY AUTOINCREMENT,
            sender_id         INTEGER NOT NULL REFERENCES users(id),
            recipient_id      INTEGER NOT NULL REFERENCES users(id),
            content           TEXT NOT NULL DEFAULT '',
            image_url         TEXT,
            media_url         TEXT,
            media_type        TEXT,
            file_name         TEXT,
            file_size         INTEGER,
            duration_sec      REAL,
            waveform_json     TEXT,
            reply_to_id       INTEGER,
            forwarded_from_id INTEGER,
            status            TEXT NOT NULL DEFAULT 'sent',
            created_at        TEXT NOT NULL,
            edited_at         TEXT,
            deleted_at        TEXT
        );

        CREATE INDEX IF NOT EXISTS idx_messages_pair
            ON messages(sender_id, recipient_id, id);
        CREATE INDEX IF NOT EXISTS idx_messages_inbox_status
            ON messages(recipient_id, status);

        CREATE TABLE IF NOT EXISTS message_hidden (
            id          INTEGER PRIMARY KEY AUTOINCREMENT,
            message_id  INTEGER NOT NULL REFERENCES messages(id),
            user_id     INTEGER NOT NULL REFERENCES users(id),
            created_at  TEXT NOT NULL,
            UNIQUE(message_id, user_id)
        );

        -- One reaction per user per message; rowid order is display order.
        CREATE TABLE IF NOT EXISTS message_reactions (
            id          INTEGER PRIMARY KEY AUTOINCREMENT,
            message_id  INTEGER NOT NULL REFERENCES messages(id),
            user_id     INTEGER NOT NULL REFERENCES users(id),
            emoji       TEXT NOT NULL,
            created_at  TEXT NOT NULL,
            UNIQUE(message_id, user_id)
        );

        CREATE INDEX IF NOT EXISTS idx_reactions_message
            ON message_reactions(message_id);
        ",
    )?;

    info!("Database migrations complete");
    Ok(())
}
