use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket};
use chrono::Utc;
use futures_util::{SinkExt, StreamExt};
use tracing::{info, warn};
use uuid::Uuid;

use courier_db::format_ts;
use courier_types::events::{GatewayCommand, GatewayEvent};

use crate::dispatcher::Group;
use crate::lifecycle::ChatService;

/// Heartbeat interval: server sends a Ping every 15 seconds.
/// If 2 consecutive Pongs are missed (~30s), the connection is dropped.
const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(15);

/// How long an unidentified socket may exist before being terminated.
const IDENTIFY_TIMEOUT: Duration = Duration::from_secs(10);

/// Handle a single WebSocket connection. The first command must be
/// `Identify` with a valid token; unauthenticated sockets are closed.
pub async fn handle_connection(socket: WebSocket, chat: ChatService, jwt_secret: String) {
    let (mut sender, mut receiver) = socket.split();

    let Some((user_id, username)) = wait_for_identify(&mut receiver, &jwt_secret).await else {
        warn!("WebSocket client failed to identify, closing");
        return;
    };

    info!("{} ({}) connected to gateway", username, user_id);

    let ready = GatewayEvent::Ready {
        user_id,
        username: username.clone(),
    };
    if sender
        .send(Message::Text(serde_json::to_string(&ready).unwrap().into()))
        .await
        .is_err()
    {
        return;
    }

    let (conn_id, mut event_rx) = chat.dispatcher.register(user_id).await;
    let device_count = chat.presence.register(user_id, conn_id).await;

    // Everything that was waiting for this user to have a device moves to
    // delivered before anyone is told they are online.
    if let Err(e) = chat.flush_delivered(user_id).await {
        warn!("{} ({}) delivered flush failed: {}", username, user_id, e);
    }

    chat.dispatcher
        .broadcast(GatewayEvent::Presence {
            user_id,
            is_online: true,
            device_count,
            last_seen: None,
        })
        .await;

    // Shared flag for heartbeat
    let pong_received = Arc::new(AtomicBool::new(true));
    let pong_flag_send = pong_received.clone();
    let pong_flag_recv = pong_received.clone();

    // Forward dispatched events -> client, with heartbeat
    let mut send_task = tokio::spawn(async move {
        let mut heartbeat = tokio::time::interval(HEARTBEAT_INTERVAL);
        heartbeat.tick().await;
        let mut missed_heartbeats: u8 = 0;

        loop {
            tokio::select! {
                result = event_rx.recv() => {
                    let event = match result {
                        Some(event) => event,
                        None => break,
                    };
                    let text = serde_json::to_string(&event).unwrap();
                    if sender.send(Message::Text(text.into())).await.is_err() {
                        break;
                    }
                }
                _ = heartbeat.tick() => {
                    if pong_flag_send.swap(false, Ordering::Acquire) {
                        missed_heartbeats = 0;
                    } else {
                        missed_heartbeats += 1;
                        if missed_heartbeats >= 2 {
                            warn!("Heartbeat timeout (missed {} pongs), dropping connection", missed_heartbeats);
                            break;
                        }
                    }
                    if sender.send(Message::Ping(vec![].into())).await.is_err() {
                        break;
                    }
                }
            }
        }
    });

    // Read commands from client
    let chat_recv = chat.clone();
    let username_recv = username.clone();
    let mut recv_task = tokio::spawn(async move {
        while let Some(Ok(msg)) = receiver.next().await {
            match msg {
                Message::Text(text) => match serde_json::from_str::<GatewayCommand>(&text) {
                    Ok(cmd) => {
                        handle_command(&chat_recv, user_id, conn_id, cmd).await;
                    }
                    Err(e) => {
                        warn!(
                            "{} ({}) bad command: {} -- raw: {}",
                            username_recv,
                            user_id,
                            e,
                            &text[..text.len().min(200)]
                        );
                    }
                },
                Message::Pong(_) => {
                    pong_flag_recv.store(true, Ordering::Release);
                }
                Message::Close(_) => break,
                _ => {}
            }
        }
    });

    // Wait for either task to finish
    tokio::select! {
        _ = &mut send_task => recv_task.abort(),
        _ = &mut recv_task => send_task.abort(),
    }

    teardown(&chat, user_id, conn_id).await;
    info!("{} ({}) disconnected from gateway", username, user_id);
}

/// Removes the connection from routing and presence. If this was the user's
/// last device, stamps last_seen and announces them offline; otherwise
/// announces the reduced device count.
async fn teardown(chat: &ChatService, user_id: i64, conn_id: Uuid) {
    chat.dispatcher.unregister(conn_id).await;

    let Some(departure) = chat.presence.unregister(conn_id).await else {
        return;
    };

    if departure.remaining > 0 {
        chat.dispatcher
            .broadcast(GatewayEvent::Presence {
                user_id,
                is_online: true,
                device_count: departure.remaining,
                last_seen: None,
            })
            .await;
        return;
    }

    let last_seen = Utc::now();
    if let Err(e) = chat.db.touch_last_seen(user_id, &format_ts(last_seen)) {
        warn!("failed to stamp last_seen for {}: {}", user_id, e);
    }

    chat.dispatcher
        .broadcast(GatewayEvent::Presence {
            user_id,
            is_online: false,
            device_count: 0,
            last_seen: Some(last_seen),
        })
        .await;
}

async fn wait_for_identify(
    receiver: &mut futures_util::stream::SplitStream<WebSocket>,
    jwt_secret: &str,
) -> Option<(i64, String)> {
    use courier_types::api::Claims;
    use jsonwebtoken::{DecodingKey, Validation, decode};

    let timeout = tokio::time::timeout(IDENTIFY_TIMEOUT, async {
        while let Some(Ok(msg)) = receiver.next().await {
            if let Message::Text(text) = msg {
                if let Ok(GatewayCommand::Identify { token }) =
                    serde_json::from_str::<GatewayCommand>(&text)
                {
                    let token_data = decode::<Claims>(
                        &token,
                        &DecodingKey::from_secret(jwt_secret.as_bytes()),
                        &Validation::default(),
                    )
                    .ok()?;

                    return Some((token_data.claims.sub, token_data.claims.username));
                }
            }
        }
        None
    });

    timeout.await.ok().flatten()
}

/// Dispatch one client command. These are event-driven paths with no reply
/// channel, so failures are logged and dropped.
async fn handle_command(chat: &ChatService, user_id: i64, conn_id: Uuid, cmd: GatewayCommand) {
    match cmd {
        GatewayCommand::Identify { .. } => {} // Already handled

        GatewayCommand::Send(req) => {
            if let Err(e) = chat.send(user_id, req).await {
                warn!("send from {} rejected: {}", user_id, e);
            }
        }

        GatewayCommand::Edit {
            message_id,
            content,
        } => {
            if let Err(e) = chat.edit(user_id, message_id, &content).await {
                warn!("edit of {} by {} rejected: {}", message_id, user_id, e);
            }
        }

        GatewayCommand::React { message_id, emoji } => {
            if let Err(e) = chat.react(user_id, message_id, &emoji).await {
                warn!("reaction on {} by {} rejected: {}", message_id, user_id, e);
            }
        }

        GatewayCommand::Delete { message_id, mode } => {
            if let Err(e) = chat.delete(user_id, message_id, mode).await {
                warn!("delete of {} by {} rejected: {}", message_id, user_id, e);
            }
        }

        GatewayCommand::Typing {
            recipient_id,
            is_typing,
        } => {
            chat.typing(user_id, recipient_id, is_typing).await;
        }

        GatewayCommand::JoinConversation { peer_id } => {
            chat.dispatcher
                .join(conn_id, Group::pair(user_id, peer_id))
                .await;
            if let Err(e) = chat.mark_seen_bulk(user_id, peer_id).await {
                warn!(
                    "seen flush for {} joining {} failed: {}",
                    user_id, peer_id, e
                );
            }
        }
    }
}
