//! Database row types — these map directly to SQLite rows.
//! Distinct from the courier-types API models so the store layer stays
//! stringly-typed; the feed assembler parses statuses, kinds, and timestamps.

pub struct UserRow {
    pub id: i64,
    pub username: String,
    pub email: String,
    pub avatar_url: Option<String>,
    pub created_at: String,
    pub last_seen: Option<String>,
}

/// Insert payload for a validated message. All clamping/truncation has
/// already happened by the time this reaches the store.
pub struct NewMessage {
    pub sender_id: i64,
    pub recipient_id: i64,
    pub content: String,
    pub image_url: Option<String>,
    pub media_url: Option<String>,
    pub media_type: Option<String>,
    pub file_name: Option<String>,
    pub file_size: Option<i64>,
    pub duration_sec: Option<f64>,
    pub waveform_json: Option<String>,
    pub reply_to_id: Option<i64>,
    pub forwarded_from_id: Option<i64>,
    pub status: String,
    pub created_at: String,
}

/// Full message row as selected for feed assembly, including the joined
/// sender name and reply-target columns.
pub struct MessageRow {
    pub id: i64,
    pub sender_id: i64,
    pub recipient_id: i64,
    pub content: String,
    pub image_url: Option<String>,
    pub media_url: Option<String>,
    pub media_type: Option<String>,
    pub file_name: Option<String>,
    pub file_size: Option<i64>,
    pub duration_sec: Option<f64>,
    pub waveform_json: Option<String>,
    pub reply_to_id: Option<i64>,
    pub forwarded_from_id: Option<i64>,
    pub status: String,
    pub created_at: String,
    pub edited_at: Option<String>,
    pub deleted_at: Option<String>,
    pub sender_name: String,
    pub reply_sender_name: Option<String>,
    pub reply_content: Option<String>,
    pub reply_image_url: Option<String>,
}

/// Cheap ownership/tombstone lookup used by edit, delete, and react checks.
pub struct MessageMeta {
    pub id: i64,
    pub sender_id: i64,
    pub recipient_id: i64,
    pub deleted_at: Option<String>,
}

pub struct ReactionRow {
    pub message_id: i64,
    pub user_id: i64,
    pub username: String,
    pub emoji: String,
}

pub struct ContactRow {
    pub id: i64,
    pub username: String,
    pub email: String,
    pub avatar_url: Option<String>,
    pub last_seen: Option<String>,
    pub last_message: Option<String>,
    pub last_message_time: Option<String>,
    pub unread_count: i64,
    pub friended_at: String,
}
