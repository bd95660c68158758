use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::models::{MediaKind, MessageStatus};

// -- JWT Claims --

/// JWT claims shared across courier-api (REST middleware) and courier-gateway
/// (WebSocket identify). Tokens are issued by the external auth service; the
/// core only verifies them.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: i64,
    pub username: String,
    pub exp: usize,
}

// -- Profile --

#[derive(Debug, Clone, Serialize)]
pub struct UserProfile {
    pub id: i64,
    pub username: String,
    pub email: String,
    pub avatar_url: Option<String>,
    pub last_seen: Option<DateTime<Utc>>,
}

// -- Contacts --

#[derive(Debug, Clone, Serialize)]
pub struct ContactSummary {
    pub id: i64,
    pub username: String,
    pub email: String,
    pub avatar_url: Option<String>,
    pub last_seen: Option<DateTime<Utc>>,
    pub last_message: Option<String>,
    pub last_message_time: Option<DateTime<Utc>>,
    pub unread_count: i64,
    pub is_online: bool,
    pub device_count: usize,
}

// -- Sending --

/// Payload of a `send` command. Everything except the recipient is optional;
/// auxiliary fields that fail validation are dropped or clamped rather than
/// failing the send. `media_type` stays a raw string here so an unknown kind
/// is reported as invalid input instead of a deserialize failure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SendRequest {
    pub recipient_id: i64,
    #[serde(default)]
    pub content: Option<String>,
    /// Legacy single-image field; implies `media_type = image` when no
    /// explicit media reference is present.
    #[serde(default)]
    pub image_url: Option<String>,
    #[serde(default)]
    pub media_url: Option<String>,
    #[serde(default)]
    pub media_type: Option<String>,
    #[serde(default)]
    pub file_name: Option<String>,
    #[serde(default)]
    pub file_size: Option<i64>,
    #[serde(default)]
    pub duration_sec: Option<f64>,
    /// Raw JSON so a non-list value degrades to an empty waveform.
    #[serde(default)]
    pub waveform: Option<serde_json::Value>,
    #[serde(default)]
    pub reply_to_id: Option<i64>,
    #[serde(default)]
    pub forwarded_from_id: Option<i64>,
}

// -- Feed views --

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReactionView {
    pub user_id: i64,
    pub username: String,
    pub emoji: String,
    pub is_me: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReplyPreview {
    pub id: i64,
    pub sender_name: Option<String>,
    pub content: Option<String>,
    pub image_url: Option<String>,
}

/// Fully denormalized message as served to clients, both in feed pages and
/// in `new_message` broadcasts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageView {
    pub id: i64,
    pub sender_id: i64,
    pub recipient_id: i64,
    pub sender_name: String,
    pub content: String,
    pub image_url: Option<String>,
    pub media_url: Option<String>,
    pub media_type: Option<MediaKind>,
    pub file_name: Option<String>,
    pub file_size: Option<i64>,
    pub duration_sec: Option<f64>,
    pub waveform: Vec<f32>,
    pub reply_to_id: Option<i64>,
    pub reply_preview: Option<ReplyPreview>,
    pub forwarded_from_id: Option<i64>,
    pub is_forwarded: bool,
    pub status: MessageStatus,
    pub reactions: Vec<ReactionView>,
    pub created_at: DateTime<Utc>,
    pub edited_at: Option<DateTime<Utc>>,
    pub deleted_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize)]
pub struct MessagePage {
    pub messages: Vec<MessageView>,
    pub has_more: bool,
}
