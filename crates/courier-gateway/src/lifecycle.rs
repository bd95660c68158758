use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;

use courier_db::models::NewMessage;
use courier_db::{Database, feed, format_ts};
use courier_types::api::{MessageView, SendRequest};
use courier_types::error::ChatError;
use courier_types::events::GatewayEvent;
use courier_types::models::{
    DeleteMode, MAX_CONTENT_CHARS, MAX_FILE_NAME_CHARS, MAX_WAVEFORM_SAMPLES, MediaKind,
    MessageStatus,
};

use crate::dispatcher::Dispatcher;
use crate::presence::PresenceRegistry;

/// Message Lifecycle Engine: validates and persists sends, advances delivery
/// status, applies edits/deletes/hides, and fans the resulting events out to
/// both participants' device groups.
#[derive(Clone)]
pub struct ChatService {
    pub db: Arc<Database>,
    pub dispatcher: Dispatcher,
    pub presence: PresenceRegistry,
}

impl ChatService {
    pub fn new(db: Arc<Database>, dispatcher: Dispatcher, presence: PresenceRegistry) -> Self {
        Self {
            db,
            dispatcher,
            presence,
        }
    }

    /// Validates and persists a new message, then broadcasts the assembled
    /// view to both parties. Auxiliary fields (reply/forward links, waveform,
    /// duration) degrade silently; a bad recipient or an empty body rejects
    /// the whole send.
    pub async fn send(&self, sender: i64, req: SendRequest) -> Result<MessageView, ChatError> {
        let recipient = req.recipient_id;
        if recipient == sender {
            return Err(ChatError::InvalidInput("cannot message yourself"));
        }

        let content = req.content.as_deref().unwrap_or("").trim().to_string();
        let image_url = normalize(req.image_url);
        let mut media_url = normalize(req.media_url);
        let mut media_type = normalize(req.media_type);

        if content.is_empty() && image_url.is_none() && media_url.is_none() {
            return Err(ChatError::InvalidInput("message has no content"));
        }

        if self.db.get_user(recipient)?.is_none() {
            return Err(ChatError::NotFound("recipient not found"));
        }
        if !self.db.are_friends(sender, recipient)? {
            return Err(ChatError::NotFound("recipient is not a contact"));
        }

        let content = truncate_chars(&content, MAX_CONTENT_CHARS);

        // Legacy single-image sends imply an image attachment.
        if image_url.is_some() && media_url.is_none() {
            media_url = image_url.clone();
            media_type = Some(MediaKind::Image.as_str().to_string());
        }
        let media_type = match &media_url {
            Some(_) => {
                let raw = media_type.unwrap_or_default();
                let kind = raw
                    .parse::<MediaKind>()
                    .map_err(|_| ChatError::InvalidInput("unsupported media type"))?;
                Some(kind.as_str().to_string())
            }
            None => None,
        };

        let file_name = normalize(req.file_name).map(|n| truncate_chars(&n, MAX_FILE_NAME_CHARS));
        let file_size = req.file_size.filter(|size| *size > 0);
        let duration_sec = req.duration_sec.filter(|d| *d > 0.0);
        let waveform = decode_waveform(req.waveform);
        let waveform_json = if waveform.is_empty() {
            None
        } else {
            Some(serde_json::to_string(&waveform).map_err(anyhow::Error::from)?)
        };

        // Dangling or foreign links are dropped, never fatal.
        let mut reply_to_id = None;
        if let Some(id) = req.reply_to_id {
            if self.db.message_between(id, sender, recipient)? {
                reply_to_id = Some(id);
            }
        }
        let mut forwarded_from_id = None;
        if let Some(id) = req.forwarded_from_id {
            if self.db.message_involving(id, sender)? {
                forwarded_from_id = Some(id);
            }
        }

        let status = if self.presence.is_online(recipient).await {
            MessageStatus::Delivered
        } else {
            MessageStatus::Sent
        };

        let row = self.db.insert_message(&NewMessage {
            sender_id: sender,
            recipient_id: recipient,
            content,
            image_url,
            media_url,
            media_type,
            file_name,
            file_size,
            duration_sec,
            waveform_json,
            reply_to_id,
            forwarded_from_id,
            status: status.as_str().to_string(),
            created_at: format_ts(Utc::now()),
        })?;

        let view = feed::message_view(row, &[], sender);
        let event = GatewayEvent::NewMessage {
            message: view.clone(),
        };
        self.dispatcher.send_to_user(sender, event.clone()).await;
        self.dispatcher.send_to_user(recipient, event).await;

        Ok(view)
    }

    /// Rewrites a message's text. Only the original sender may edit, and only
    /// while the message is not tombstoned.
    pub async fn edit(&self, actor: i64, message_id: i64, content: &str) -> Result<(), ChatError> {
        let content = content.trim();
        if content.is_empty() {
            return Err(ChatError::InvalidInput("edited content is empty"));
        }

        let meta = self
            .db
            .get_message_meta(message_id)?
            .ok_or(ChatError::NotFound("message not found"))?;
        if meta.sender_id != actor {
            return Err(ChatError::Forbidden("only the sender can edit"));
        }
        if meta.deleted_at.is_some() {
            return Err(ChatError::Conflict("message was deleted"));
        }

        let content = truncate_chars(content, MAX_CONTENT_CHARS);
        let edited_at = Utc::now();
        self.db
            .edit_message(message_id, &content, &format_ts(edited_at))?;

        let event = GatewayEvent::MessageEdited {
            message_id,
            content,
            edited_at,
        };
        self.dispatcher
            .send_to_user(meta.sender_id, event.clone())
            .await;
        self.dispatcher.send_to_user(meta.recipient_id, event).await;

        Ok(())
    }

    /// `Me` hides the message from the actor's own view only; `Everyone`
    /// tombstones the row for both participants and sweeps its reactions.
    pub async fn delete(
        &self,
        actor: i64,
        message_id: i64,
        mode: DeleteMode,
    ) -> Result<(), ChatError> {
        let meta = self
            .db
            .get_message_meta(message_id)?
            .ok_or(ChatError::NotFound("message not found"))?;

        match mode {
            DeleteMode::Me => {
                if actor != meta.sender_id && actor != meta.recipient_id {
                    return Err(ChatError::Forbidden("not a participant"));
                }
                self.db
                    .hide_message(message_id, actor, &format_ts(Utc::now()))?;
                // The other party's view is untouched.
                self.dispatcher
                    .send_to_user(actor, GatewayEvent::MessageHidden { message_id })
                    .await;
            }
            DeleteMode::Everyone => {
                if meta.sender_id != actor {
                    return Err(ChatError::Forbidden("only the sender can delete for everyone"));
                }
                if meta.deleted_at.is_some() {
                    return Err(ChatError::Conflict("message already deleted"));
                }
                self.db
                    .tombstone_message(message_id, &format_ts(Utc::now()))?;

                let event = GatewayEvent::MessageDeleted {
                    message_id,
                    mode: DeleteMode::Everyone,
                };
                self.dispatcher
                    .send_to_user(meta.sender_id, event.clone())
                    .await;
                self.dispatcher.send_to_user(meta.recipient_id, event).await;
            }
        }

        Ok(())
    }

    /// Advances every peer -> viewer message to `seen` and tells the peer
    /// which ids flipped. Triggered by joining a conversation and by feed
    /// page reads.
    pub async fn mark_seen_bulk(&self, viewer: i64, peer: i64) -> Result<(), ChatError> {
        let ids = self.db.mark_pair_seen(peer, viewer)?;
        if !ids.is_empty() {
            self.dispatcher
                .send_to_user(
                    peer,
                    GatewayEvent::MessageStatus {
                        message_ids: ids,
                        status: MessageStatus::Seen,
                    },
                )
                .await;
        }
        Ok(())
    }

    /// Connect-time flush: everything that was waiting for this user to have
    /// a device moves sent -> delivered, with one status event per sender.
    pub async fn flush_delivered(&self, user_id: i64) -> Result<(), ChatError> {
        let affected = self.db.advance_status_bulk(
            user_id,
            MessageStatus::Sent.as_str(),
            MessageStatus::Delivered.as_str(),
        )?;

        let mut by_sender: HashMap<i64, Vec<i64>> = HashMap::new();
        for (sender_id, message_id) in affected {
            by_sender.entry(sender_id).or_default().push(message_id);
        }
        for (sender_id, message_ids) in by_sender {
            self.dispatcher
                .send_to_user(
                    sender_id,
                    GatewayEvent::MessageStatus {
                        message_ids,
                        status: MessageStatus::Delivered,
                    },
                )
                .await;
        }
        Ok(())
    }

    /// Relays a typing indicator to all of the recipient's devices. Nothing
    /// is persisted.
    pub async fn typing(&self, sender: i64, recipient: i64, is_typing: bool) {
        self.dispatcher
            .send_to_user(
                recipient,
                GatewayEvent::Typing {
                    from_user_id: sender,
                    to_user_id: recipient,
                    is_typing,
                },
            )
            .await;
    }
}

fn normalize(value: Option<String>) -> Option<String> {
    value
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

fn truncate_chars(s: &str, max: usize) -> String {
    s.chars().take(max).collect()
}

fn decode_waveform(raw: Option<serde_json::Value>) -> Vec<f32> {
    match raw {
        Some(serde_json::Value::Array(samples)) => samples
            .iter()
            .filter_map(|v| v.as_f64())
            .map(|v| v as f32)
            .take(MAX_WAVEFORM_SAMPLES)
            .collect(),
        _ => Vec::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use uuid::Uuid;

    const T0: &str = "2025-01-01T00:00:00Z";

    async fn service() -> (ChatService, i64, i64, i64) {
        let db = Arc::new(Database::open_in_memory().unwrap());
        let alice = db.create_user("alice", "alice@example.com", None, T0).unwrap();
        let bob = db.create_user("bob", "bob@example.com", None, T0).unwrap();
        let carol = db.create_user("carol", "carol@example.com", None, T0).unwrap();
        db.add_friend_pair(alice, bob, T0).unwrap();
        db.add_friend_pair(alice, carol, T0).unwrap();
        db.add_friend_pair(bob, carol, T0).unwrap();

        let chat = ChatService::new(db, Dispatcher::new(), PresenceRegistry::new());
        (chat, alice, bob, carol)
    }

    fn text(recipient: i64, content: &str) -> SendRequest {
        SendRequest {
            recipient_id: recipient,
            content: Some(content.to_string()),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn send_rejects_self_unknown_and_strangers() {
        let (chat, alice, bob, _) = service().await;
        assert!(matches!(
            chat.send(alice, text(alice, "hi")).await,
            Err(ChatError::InvalidInput(_))
        ));
        assert!(matches!(
            chat.send(alice, text(9999, "hi")).await,
            Err(ChatError::NotFound(_))
        ));

        chat.db.remove_friend_pair(alice, bob).unwrap();
        assert!(matches!(
            chat.send(alice, text(bob, "hi")).await,
            Err(ChatError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn whitespace_only_send_is_rejected() {
        let (chat, alice, bob, _) = service().await;
        assert!(matches!(
            chat.send(alice, text(bob, "   \n\t ")).await,
            Err(ChatError::InvalidInput(_))
        ));
    }

    #[tokio::test]
    async fn long_content_is_truncated_not_rejected() {
        let (chat, alice, bob, _) = service().await;
        let long = "x".repeat(3000);
        let view = chat.send(alice, text(bob, &long)).await.unwrap();
        assert_eq!(view.content.chars().count(), MAX_CONTENT_CHARS);
    }

    #[tokio::test]
    async fn media_type_must_be_recognized() {
        let (chat, alice, bob, _) = service().await;
        let mut req = text(bob, "");
        req.media_url = Some("/uploads/blob.xyz".to_string());
        req.media_type = Some("sticker".to_string());
        assert!(matches!(
            chat.send(alice, req).await,
            Err(ChatError::InvalidInput(_))
        ));

        let mut req = text(bob, "");
        req.media_url = Some("/uploads/note.ogg".to_string());
        req.media_type = Some("voice".to_string());
        req.duration_sec = Some(-3.0);
        req.waveform = Some(serde_json::json!("not-a-list"));
        let view = chat.send(alice, req).await.unwrap();
        assert_eq!(view.media_type, Some(MediaKind::Voice));
        // negative duration clamped away, bad waveform degraded to empty
        assert!(view.duration_sec.is_none());
        assert!(view.waveform.is_empty());
    }

    #[tokio::test]
    async fn legacy_image_field_defaults_to_image_kind() {
        let (chat, alice, bob, _) = service().await;
        let mut req = text(bob, "");
        req.image_url = Some("/uploads/cat.png".to_string());
        let view = chat.send(alice, req).await.unwrap();
        assert_eq!(view.media_type, Some(MediaKind::Image));
        assert_eq!(view.media_url.as_deref(), Some("/uploads/cat.png"));
    }

    #[tokio::test]
    async fn waveform_is_capped_at_eighty_samples() {
        let (chat, alice, bob, _) = service().await;
        let mut req = text(bob, "");
        req.media_url = Some("/uploads/note.ogg".to_string());
        req.media_type = Some("voice".to_string());
        req.waveform = Some(serde_json::json!(vec![0.5f32; 200]));
        let view = chat.send(alice, req).await.unwrap();
        assert_eq!(view.waveform.len(), MAX_WAVEFORM_SAMPLES);
    }

    #[tokio::test]
    async fn foreign_reply_link_is_dropped_silently() {
        let (chat, alice, bob, carol) = service().await;
        let other_thread = chat.send(bob, text(carol, "between others")).await.unwrap();

        let mut req = text(bob, "replying across threads");
        req.reply_to_id = Some(other_thread.id);
        let view = chat.send(alice, req).await.unwrap();
        assert!(view.reply_to_id.is_none());
        assert!(view.reply_preview.is_none());

        // a link inside the pair is kept and stitched
        let target = chat.send(alice, text(bob, "original")).await.unwrap();
        let mut req = text(bob, "proper reply");
        req.reply_to_id = Some(target.id);
        let view = chat.send(alice, req).await.unwrap();
        assert_eq!(view.reply_to_id, Some(target.id));
        assert_eq!(
            view.reply_preview.unwrap().content.as_deref(),
            Some("original")
        );
    }

    #[tokio::test]
    async fn forward_link_requires_visibility_to_sender() {
        let (chat, alice, bob, carol) = service().await;
        let hidden_from_alice = chat.send(bob, text(carol, "private")).await.unwrap();

        let mut req = text(bob, "forwarding");
        req.forwarded_from_id = Some(hidden_from_alice.id);
        let view = chat.send(alice, req).await.unwrap();
        assert!(!view.is_forwarded);
        assert!(view.forwarded_from_id.is_none());

        let visible = chat.send(carol, text(alice, "sharable")).await.unwrap();
        let mut req = text(bob, "forwarding");
        req.forwarded_from_id = Some(visible.id);
        let view = chat.send(alice, req).await.unwrap();
        assert!(view.is_forwarded);
    }

    #[tokio::test]
    async fn initial_status_follows_recipient_presence() {
        let (chat, alice, bob, _) = service().await;
        let offline = chat.send(alice, text(bob, "anyone there?")).await.unwrap();
        assert_eq!(offline.status, MessageStatus::Sent);

        chat.presence.register(bob, Uuid::new_v4()).await;
        let online = chat.send(alice, text(bob, "now?")).await.unwrap();
        assert_eq!(online.status, MessageStatus::Delivered);
    }

    #[tokio::test]
    async fn send_broadcasts_to_both_parties() {
        let (chat, alice, bob, _) = service().await;
        let (_, mut alice_rx) = chat.dispatcher.register(alice).await;
        let (_, mut bob_rx) = chat.dispatcher.register(bob).await;

        chat.send(alice, text(bob, "hello")).await.unwrap();

        assert!(matches!(
            alice_rx.try_recv().unwrap(),
            GatewayEvent::NewMessage { .. }
        ));
        assert!(matches!(
            bob_rx.try_recv().unwrap(),
            GatewayEvent::NewMessage { .. }
        ));
    }

    #[tokio::test]
    async fn edit_is_sender_only_and_respects_tombstones() {
        let (chat, alice, bob, _) = service().await;
        let msg = chat.send(alice, text(bob, "tpyo")).await.unwrap();

        assert!(matches!(
            chat.edit(bob, msg.id, "hijacked").await,
            Err(ChatError::Forbidden(_))
        ));
        assert!(matches!(
            chat.edit(alice, msg.id, "  ").await,
            Err(ChatError::InvalidInput(_))
        ));
        assert!(matches!(
            chat.edit(alice, 424242, "typo").await,
            Err(ChatError::NotFound(_))
        ));

        chat.edit(alice, msg.id, "typo").await.unwrap();
        let page = chat.db.message_page(bob, alice, 10, None).unwrap();
        assert_eq!(page[0].content, "typo");
        assert!(page[0].edited_at.is_some());

        chat.delete(alice, msg.id, DeleteMode::Everyone).await.unwrap();
        assert!(matches!(
            chat.edit(alice, msg.id, "too late").await,
            Err(ChatError::Conflict(_))
        ));
    }

    #[tokio::test]
    async fn delete_for_me_leaves_the_peer_untouched() {
        let (chat, alice, bob, _) = service().await;
        let msg = chat.send(alice, text(bob, "keep this")).await.unwrap();
        let (_, mut alice_rx) = chat.dispatcher.register(alice).await;
        let (_, mut bob_rx) = chat.dispatcher.register(bob).await;

        chat.delete(alice, msg.id, DeleteMode::Me).await.unwrap();
        // repeating the hide is fine
        chat.delete(alice, msg.id, DeleteMode::Me).await.unwrap();

        assert!(chat.db.message_page(alice, bob, 10, None).unwrap().is_empty());
        let bobs = chat.db.message_page(bob, alice, 10, None).unwrap();
        assert_eq!(bobs[0].content, "keep this");

        assert!(matches!(
            alice_rx.try_recv().unwrap(),
            GatewayEvent::MessageHidden { .. }
        ));
        assert!(bob_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn delete_for_everyone_tombstones_once() {
        let (chat, alice, bob, _) = service().await;
        let msg = chat.send(alice, text(bob, "regret")).await.unwrap();

        assert!(matches!(
            chat.delete(bob, msg.id, DeleteMode::Everyone).await,
            Err(ChatError::Forbidden(_))
        ));

        chat.delete(alice, msg.id, DeleteMode::Everyone).await.unwrap();
        assert!(matches!(
            chat.delete(alice, msg.id, DeleteMode::Everyone).await,
            Err(ChatError::Conflict(_))
        ));

        let page = chat.db.message_page(bob, alice, 10, None).unwrap();
        assert_eq!(page[0].content, "");
        assert!(page[0].deleted_at.is_some());
    }

    #[tokio::test]
    async fn mark_seen_bulk_notifies_the_peer_once() {
        let (chat, alice, bob, _) = service().await;
        chat.send(bob, text(alice, "one")).await.unwrap();
        chat.send(bob, text(alice, "two")).await.unwrap();

        let unread = chat.db.contacts(alice).unwrap()[0].unread_count;
        assert_eq!(unread, 2);

        let (_, mut bob_rx) = chat.dispatcher.register(bob).await;
        chat.mark_seen_bulk(alice, bob).await.unwrap();

        assert_eq!(chat.db.contacts(alice).unwrap()[0].unread_count, 0);

        match bob_rx.try_recv().unwrap() {
            GatewayEvent::MessageStatus {
                message_ids,
                status,
            } => {
                assert_eq!(message_ids.len(), 2);
                assert_eq!(status, MessageStatus::Seen);
            }
            other => panic!("unexpected event: {:?}", other),
        }

        // nothing left to flush
        chat.mark_seen_bulk(alice, bob).await.unwrap();
        assert!(bob_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn flush_delivered_groups_events_per_sender() {
        let (chat, alice, bob, carol) = service().await;
        chat.send(bob, text(alice, "from bob")).await.unwrap();
        chat.send(carol, text(alice, "from carol 1")).await.unwrap();
        chat.send(carol, text(alice, "from carol 2")).await.unwrap();

        let (_, mut bob_rx) = chat.dispatcher.register(bob).await;
        let (_, mut carol_rx) = chat.dispatcher.register(carol).await;

        chat.flush_delivered(alice).await.unwrap();

        match bob_rx.try_recv().unwrap() {
            GatewayEvent::MessageStatus { message_ids, status } => {
                assert_eq!(message_ids.len(), 1);
                assert_eq!(status, MessageStatus::Delivered);
            }
            other => panic!("unexpected event: {:?}", other),
        }
        match carol_rx.try_recv().unwrap() {
            GatewayEvent::MessageStatus { message_ids, .. } => {
                assert_eq!(message_ids.len(), 2);
            }
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[tokio::test]
    async fn concurrent_sends_get_distinct_increasing_ids() {
        let (chat, alice, bob, _) = service().await;

        let sends = (0..10).map(|i| {
            let chat = chat.clone();
            tokio::spawn(async move { chat.send(alice, text(bob, &format!("m{i}"))).await })
        });
        let mut ids: Vec<i64> = futures_util::future::join_all(sends)
            .await
            .into_iter()
            .map(|joined| joined.unwrap().unwrap().id)
            .collect();

        ids.sort_unstable();
        ids.dedup();
        assert_eq!(ids.len(), 10);
        assert_eq!(ids.last().unwrap() - ids.first().unwrap(), 9);
    }

    #[tokio::test]
    async fn typing_reaches_only_the_recipient() {
        let (chat, alice, bob, carol) = service().await;
        let (_, mut bob_rx) = chat.dispatcher.register(bob).await;
        let (_, mut carol_rx) = chat.dispatcher.register(carol).await;

        chat.typing(alice, bob, true).await;

        assert!(matches!(
            bob_rx.try_recv().unwrap(),
            GatewayEvent::Typing { is_typing: true, .. }
        ));
        assert!(carol_rx.try_recv().is_err());
    }
}
