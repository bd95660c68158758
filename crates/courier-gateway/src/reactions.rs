use chrono::Utc;

use courier_db::{feed, format_ts};
use courier_types::api::ReactionView;
use courier_types::error::ChatError;
use courier_types::events::GatewayEvent;
use courier_types::models::MAX_EMOJI_CHARS;

use crate::lifecycle::ChatService;

impl ChatService {
    /// Toggles/replaces/removes the actor's reaction and broadcasts the
    /// recomputed, insertion-ordered reaction list to both participants.
    /// An empty emoji clears the actor's reaction.
    pub async fn react(
        &self,
        actor: i64,
        message_id: i64,
        emoji: &str,
    ) -> Result<Vec<ReactionView>, ChatError> {
        let emoji = emoji.trim();
        if emoji.chars().count() > MAX_EMOJI_CHARS {
            return Err(ChatError::InvalidInput("emoji too long"));
        }

        let meta = self
            .db
            .get_message_meta(message_id)?
            .ok_or(ChatError::NotFound("message not found"))?;
        if actor != meta.sender_id && actor != meta.recipient_id {
            return Err(ChatError::Forbidden("not a participant"));
        }

        let rows = self
            .db
            .set_reaction(message_id, actor, emoji, &format_ts(Utc::now()))?;
        let reactions = feed::reaction_views(&rows, actor);

        let event = GatewayEvent::MessageReactions {
            message_id,
            reactions: reactions.clone(),
        };
        self.dispatcher
            .send_to_user(meta.sender_id, event.clone())
            .await;
        self.dispatcher.send_to_user(meta.recipient_id, event).await;

        Ok(reactions)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use courier_db::Database;
    use courier_types::api::SendRequest;

    use super::*;
    use crate::dispatcher::Dispatcher;
    use crate::presence::PresenceRegistry;

    const T0: &str = "2025-01-01T00:00:00Z";

    async fn service_with_message() -> (ChatService, i64, i64, i64, i64) {
        let db = Arc::new(Database::open_in_memory().unwrap());
        let alice = db.create_user("alice", "alice@example.com", None, T0).unwrap();
        let bob = db.create_user("bob", "bob@example.com", None, T0).unwrap();
        let carol = db.create_user("carol", "carol@example.com", None, T0).unwrap();
        db.add_friend_pair(alice, bob, T0).unwrap();

        let chat = ChatService::new(db, Dispatcher::new(), PresenceRegistry::new());
        let msg = chat
            .send(
                alice,
                SendRequest {
                    recipient_id: bob,
                    content: Some("react to me".to_string()),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        (chat, alice, bob, carol, msg.id)
    }

    #[tokio::test]
    async fn double_react_toggles_off() {
        let (chat, _, bob, _, msg) = service_with_message().await;

        let first = chat.react(bob, msg, "👍").await.unwrap();
        assert_eq!(first.len(), 1);
        assert!(first[0].is_me);

        let second = chat.react(bob, msg, "👍").await.unwrap();
        assert!(second.is_empty());
    }

    #[tokio::test]
    async fn new_emoji_replaces_the_old_one() {
        let (chat, _, bob, _, msg) = service_with_message().await;
        chat.react(bob, msg, "👍").await.unwrap();
        let after = chat.react(bob, msg, "🔥").await.unwrap();
        assert_eq!(after.len(), 1);
        assert_eq!(after[0].emoji, "🔥");
    }

    #[tokio::test]
    async fn empty_emoji_clears_reaction() {
        let (chat, _, bob, _, msg) = service_with_message().await;
        chat.react(bob, msg, "👍").await.unwrap();
        assert!(chat.react(bob, msg, "").await.unwrap().is_empty());
        // clearing again is a no-op
        assert!(chat.react(bob, msg, "").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn outsiders_and_oversized_emoji_are_rejected() {
        let (chat, _, _, carol, msg) = service_with_message().await;
        assert!(matches!(
            chat.react(carol, msg, "👍").await,
            Err(ChatError::Forbidden(_))
        ));

        let (chat, _, bob, _, msg) = service_with_message().await;
        assert!(matches!(
            chat.react(bob, msg, "0123456789abcdef").await,
            Err(ChatError::InvalidInput(_))
        ));
        assert!(matches!(
            chat.react(bob, 424242, "👍").await,
            Err(ChatError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn reaction_updates_reach_both_parties() {
        let (chat, alice, bob, _, msg) = service_with_message().await;
        let (_, mut alice_rx) = chat.dispatcher.register(alice).await;
        let (_, mut bob_rx) = chat.dispatcher.register(bob).await;

        chat.react(bob, msg, "❤️").await.unwrap();

        for rx in [&mut alice_rx, &mut bob_rx] {
            match rx.try_recv().unwrap() {
                GatewayEvent::MessageReactions {
                    message_id,
                    reactions,
                } => {
                    assert_eq!(message_id, msg);
                    assert_eq!(reactions.len(), 1);
                }
                other => panic!("unexpected event: {:?}", other),
            }
        }
    }
}
