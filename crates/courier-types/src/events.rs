use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::api::{MessageView, ReactionView, SendRequest};
use crate::models::{DeleteMode, MessageStatus};

/// Events pushed to clients over the WebSocket gateway.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum GatewayEvent {
    /// Server confirms successful identification
    Ready { user_id: i64, username: String },

    /// A user's online state or device count changed
    Presence {
        user_id: i64,
        is_online: bool,
        device_count: usize,
        last_seen: Option<DateTime<Utc>>,
    },

    /// A batch of messages advanced to a new delivery status
    MessageStatus {
        message_ids: Vec<i64>,
        status: MessageStatus,
    },

    /// A new message addressed to or sent by the receiving user
    NewMessage { message: MessageView },

    /// The sender rewrote a message's text
    MessageEdited {
        message_id: i64,
        content: String,
        edited_at: DateTime<Utc>,
    },

    /// The full recomputed reaction list for a message
    MessageReactions {
        message_id: i64,
        reactions: Vec<ReactionView>,
    },

    /// A message was hidden from the receiving user's own view
    MessageHidden { message_id: i64 },

    /// A message was tombstoned for both participants
    MessageDeleted { message_id: i64, mode: DeleteMode },

    /// The peer started or stopped typing
    Typing {
        from_user_id: i64,
        to_user_id: i64,
        is_typing: bool,
    },
}

/// Commands sent FROM client TO server over the WebSocket.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum GatewayCommand {
    /// Authenticate the connection; must be the first command
    Identify { token: String },

    /// Send a message to a contact
    Send(SendRequest),

    /// Rewrite one of the user's own messages
    Edit { message_id: i64, content: String },

    /// Toggle/replace/remove the user's reaction on a message
    React { message_id: i64, emoji: String },

    /// Hide a message for the user, or tombstone it for everyone
    Delete {
        message_id: i64,
        #[serde(default)]
        mode: DeleteMode,
    },

    /// Relay a typing indicator to a contact
    Typing { recipient_id: i64, is_typing: bool },

    /// Enter a conversation; flushes unseen messages from the peer to `seen`
    JoinConversation { peer_id: i64 },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn events_use_snake_case_tags() {
        let event = GatewayEvent::MessageStatus {
            message_ids: vec![3, 4],
            status: MessageStatus::Seen,
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "message_status");
        assert_eq!(json["data"]["status"], "seen");
        assert_eq!(json["data"]["message_ids"], serde_json::json!([3, 4]));
    }

    #[test]
    fn delete_command_mode_defaults_to_everyone() {
        let cmd: GatewayCommand =
            serde_json::from_str(r#"{"type":"delete","data":{"message_id":7}}"#).unwrap();
        match cmd {
            GatewayCommand::Delete { message_id, mode } => {
                assert_eq!(message_id, 7);
                assert_eq!(mode, DeleteMode::Everyone);
            }
            other => panic!("unexpected command: {:?}", other),
        }
    }

    #[test]
    fn send_command_tolerates_sparse_payloads() {
        let cmd: GatewayCommand = serde_json::from_str(
            r#"{"type":"send","data":{"recipient_id":2,"content":"hi","waveform":"oops"}}"#,
        )
        .unwrap();
        match cmd {
            GatewayCommand::Send(req) => {
                assert_eq!(req.recipient_id, 2);
                assert_eq!(req.content.as_deref(), Some("hi"));
                // non-list waveform survives parsing; validation downgrades it later
                assert!(req.waveform.is_some());
                assert!(req.reply_to_id.is_none());
            }
            other => panic!("unexpected command: {:?}", other),
        }
    }
}
