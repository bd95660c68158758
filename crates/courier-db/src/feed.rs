//! Conversation Feed Assembler: turns raw store rows into the denormalized
//! views served to clients — reaction aggregation, reply-preview stitching,
//! waveform decoding, and legacy media fallback.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use tracing::warn;

use courier_types::api::{ContactSummary, MessageView, ReactionView, ReplyPreview};
use courier_types::models::{MediaKind, MessageStatus};

use crate::models::{ContactRow, MessageRow, ReactionRow};

/// Assemble feed views for a page of rows plus their batch-fetched reactions.
/// Rows are expected in display (ascending id) order.
pub fn assemble(rows: Vec<MessageRow>, reactions: Vec<ReactionRow>, viewer: i64) -> Vec<MessageView> {
    let mut by_message: HashMap<i64, Vec<ReactionRow>> = HashMap::new();
    for r in reactions {
        by_message.entry(r.message_id).or_default().push(r);
    }

    rows.into_iter()
        .map(|row| {
            let message_reactions = by_message.remove(&row.id).unwrap_or_default();
            message_view(row, &message_reactions, viewer)
        })
        .collect()
}

/// Assemble a single row — the path used for `new_message` broadcasts.
pub fn message_view(row: MessageRow, reactions: &[ReactionRow], viewer: i64) -> MessageView {
    let reply_preview = row.reply_to_id.map(|id| ReplyPreview {
        id,
        sender_name: row.reply_sender_name.clone(),
        content: row.reply_content.clone(),
        image_url: row.reply_image_url.clone(),
    });

    // Legacy rows carry only image_url; synthesize the media fields.
    let (media_url, media_type_raw) = match (&row.media_type, &row.image_url) {
        (None, Some(image)) => (Some(image.clone()), Some("image".to_string())),
        _ => (row.media_url.clone(), row.media_type.clone()),
    };

    let media_type = media_type_raw.and_then(|raw| match raw.parse::<MediaKind>() {
        Ok(kind) => Some(kind),
        Err(_) => {
            warn!("Unrecognized media_type '{}' on message {}", raw, row.id);
            None
        }
    });

    let status = row.status.parse::<MessageStatus>().unwrap_or_else(|_| {
        warn!("Corrupt status '{}' on message {}", row.status, row.id);
        MessageStatus::Sent
    });

    let waveform = row
        .waveform_json
        .as_deref()
        .map(|json| serde_json::from_str::<Vec<f32>>(json).unwrap_or_default())
        .unwrap_or_default();

    MessageView {
        id: row.id,
        sender_id: row.sender_id,
        recipient_id: row.recipient_id,
        sender_name: row.sender_name,
        content: row.content,
        image_url: row.image_url,
        media_url,
        media_type,
        file_name: row.file_name,
        file_size: row.file_size,
        duration_sec: row.duration_sec,
        waveform,
        reply_to_id: row.reply_to_id,
        reply_preview,
        forwarded_from_id: row.forwarded_from_id,
        is_forwarded: row.forwarded_from_id.is_some(),
        status,
        reactions: reaction_views(reactions, viewer),
        created_at: parse_ts(&row.created_at).unwrap_or_else(|| {
            warn!("Corrupt created_at '{}' on message {}", row.created_at, row.id);
            DateTime::default()
        }),
        edited_at: row.edited_at.as_deref().and_then(parse_ts_str),
        deleted_at: row.deleted_at.as_deref().and_then(parse_ts_str),
    }
}

pub fn reaction_views(rows: &[ReactionRow], viewer: i64) -> Vec<ReactionView> {
    rows.iter()
        .map(|r| ReactionView {
            user_id: r.user_id,
            username: r.username.clone(),
            emoji: r.emoji.clone(),
            is_me: r.user_id == viewer,
        })
        .collect()
}

/// Merge presence into a contact row. Presence is ephemeral process state,
/// so it arrives from the registry rather than the store.
pub fn contact_view(row: ContactRow, is_online: bool, device_count: usize) -> ContactSummary {
    ContactSummary {
        id: row.id,
        username: row.username,
        email: row.email,
        avatar_url: row.avatar_url,
        last_seen: row.last_seen.as_deref().and_then(parse_ts_str),
        last_message: row.last_message,
        last_message_time: row.last_message_time.as_deref().and_then(parse_ts_str),
        unread_count: row.unread_count,
        is_online,
        device_count,
    }
}

/// Parse a persisted timestamp. Our own writes are RFC 3339; rows that came
/// in through SQLite's `datetime('now')` are naive UTC, so fall back to that.
pub fn parse_ts(raw: &str) -> Option<DateTime<Utc>> {
    raw.parse::<DateTime<Utc>>()
        .ok()
        .or_else(|| {
            chrono::NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S")
                .map(|ndt| ndt.and_utc())
                .ok()
        })
}

fn parse_ts_str(raw: &str) -> Option<DateTime<Utc>> {
    parse_ts(raw)
}
