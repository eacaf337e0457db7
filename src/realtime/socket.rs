use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::ws::{Message, WebSocket},
    extract::{Query, State, WebSocketUpgrade},
    response::Response,
};
use chrono::Utc;
use futures_util::{SinkExt, StreamExt};
use sea_orm::{ActiveModelTrait, Set};
use serde::Deserialize;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::entities::message;
use crate::error::AppResult;
use crate::realtime::events::{ChatBroadcast, ChatSend, ClientEvent, ServerEvent};
use crate::realtime::hub::Hub;
use crate::utils::jwt::{verify_token, Claims};
use crate::AppState;

/// Membership survives a disconnect this long before the reaper runs.
pub const DISCONNECT_GRACE: Duration = Duration::from_secs(2 * 60);

/// Server pings on this interval; two missed pongs drop the connection.
const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);

#[derive(Debug, Deserialize)]
pub struct WsQuery {
    pub token: String,
}

/// Upgrade handler for the socket channel. Authentication happens here, at
/// connection time; sensitive emissions re-check identity per event.
pub async fn ws_handler(
    State(state): State<AppState>,
    Query(query): Query<WsQuery>,
    ws: WebSocketUpgrade,
) -> AppResult<Response> {
    let claims = verify_token(&query.token, &state.config.jwt_secret)?;
    Ok(ws.on_upgrade(move |socket| handle_socket(socket, state, claims)))
}

async fn handle_socket(socket: WebSocket, state: AppState, claims: Claims) {
    let (mut sender, mut receiver) = socket.split();
    let conn_id = Uuid::new_v4();

    let (tx, mut rx) = mpsc::unbounded_channel();
    state.hub.register(conn_id, tx).await;

    info!(user = %claims.sub, conn = %conn_id, "Client connected");

    let pong_received = Arc::new(AtomicBool::new(true));
    let pong_flag_send = pong_received.clone();
    let pong_flag_recv = pong_received.clone();

    // Outbound: hub events -> socket, plus the heartbeat.
    let mut send_task = tokio::spawn(async move {
        let mut heartbeat = tokio::time::interval(HEARTBEAT_INTERVAL);
        heartbeat.tick().await;
        let mut missed_heartbeats: u8 = 0;

        loop {
            tokio::select! {
                event = rx.recv() => {
                    let Some(event) = event else { break };
                    let text = match serde_json::to_string(&event) {
                        Ok(text) => text,
                        Err(e) => {
                            warn!("Failed to encode event: {}", e);
                            continue;
                        }
                    };
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
                            warn!("Heartbeat timeout, dropping connection");
                            break;
                        }
                    }
                    if sender.send(Message::Ping(Vec::new().into())).await.is_err() {
                        break;
                    }
                }
            }
        }
    });

    // Inbound: client events.
    let recv_state = state.clone();
    let recv_claims = claims.clone();
    let mut recv_task = tokio::spawn(async move {
        while let Some(Ok(msg)) = receiver.next().await {
            match msg {
                Message::Text(text) => match serde_json::from_str::<ClientEvent>(&text) {
                    Ok(event) => {
                        handle_event(&recv_state, conn_id, &recv_claims, event).await;
                    }
                    Err(e) => {
                        warn!(user = %recv_claims.sub, "Bad socket event: {}", e);
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

    tokio::select! {
        _ = &mut send_task => recv_task.abort(),
        _ = &mut recv_task => send_task.abort(),
    }

    // Keep room membership alive through the grace window; a quick reconnect
    // re-joins idempotently, a real departure is reaped.
    state.hub.schedule_removal(conn_id, DISCONNECT_GRACE);
    info!(user = %claims.sub, conn = %conn_id, "Client disconnected");
}

async fn handle_event(state: &AppState, conn_id: Uuid, claims: &Claims, event: ClientEvent) {
    match event {
        ClientEvent::JoinRoom { room_id } => {
            state.hub.join(&room_id, conn_id).await;
            debug!(user = %claims.sub, room = %room_id, "Joined room");
        }

        ClientEvent::JoinDriverRoom { driver_id } => {
            if driver_id != claims.sub {
                warn!(user = %claims.sub, "Rejected join for another driver's room");
                let error = ServerEvent::MessageError {
                    error: "Cannot join another driver's room".to_string(),
                };
                state.hub.emit_to_connection(conn_id, error).await;
                return;
            }
            let room = Hub::driver_room(driver_id);
            state.hub.join(&room, conn_id).await;
            debug!(user = %claims.sub, room = %room, "Joined driver room");
        }

        ClientEvent::JoinPrivateChat {
            ride_id,
            user_id1,
            user_id2,
        } => {
            if claims.sub != user_id1 && claims.sub != user_id2 {
                warn!(user = %claims.sub, "Rejected join for someone else's private chat");
                let error = ServerEvent::MessageError {
                    error: "Not a participant of this conversation".to_string(),
                };
                state.hub.emit_to_connection(conn_id, error).await;
                return;
            }
            let room = Hub::private_chat_room(ride_id, user_id1, user_id2);
            state.hub.join(&room, conn_id).await;
            debug!(user = %claims.sub, room = %room, "Joined private chat");
        }

        ClientEvent::ChatMessage(send) => {
            let room = send.ride_id.to_string();
            persist_and_broadcast(state, conn_id, claims, send, room, false).await;
        }

        ClientEvent::PrivateMessage(send) => {
            let room = Hub::private_chat_room(send.ride_id, send.sender_id, send.receiver_id);
            persist_and_broadcast(state, conn_id, claims, send, room, true).await;
        }
    }
}

/// Write the message to the ledger, then fan the enriched payload out to the
/// target room. On a failed write nothing is broadcast; the sender alone gets
/// a message_error and can retry.
async fn persist_and_broadcast(
    state: &AppState,
    conn_id: Uuid,
    claims: &Claims,
    send: ChatSend,
    room: String,
    private: bool,
) {
    if send.sender_id != claims.sub {
        let error = ServerEvent::MessageError {
            error: "Sender does not match authenticated user".to_string(),
        };
        state.hub.emit_to_connection(conn_id, error).await;
        return;
    }

    let text = send.text.trim().to_string();
    if text.is_empty() {
        let error = ServerEvent::MessageError {
            error: "Message text must not be empty".to_string(),
        };
        state.hub.emit_to_connection(conn_id, error).await;
        return;
    }

    let message_id = Uuid::new_v4();
    let now = Utc::now().fixed_offset();

    let saved = message::ActiveModel {
        id: Set(message_id),
        ride_id: Set(send.ride_id),
        sender_id: Set(send.sender_id),
        receiver_id: Set(send.receiver_id),
        text: Set(text.clone()),
        created_at: Set(now),
    }
    .insert(&state.db)
    .await;

    if let Err(e) = saved {
        warn!(user = %claims.sub, ride = %send.ride_id, "Failed to save message: {}", e);
        let error = ServerEvent::MessageError {
            error: "Failed to save message".to_string(),
        };
        state.hub.emit_to_connection(conn_id, error).await;
        return;
    }

    let broadcast = ChatBroadcast {
        id: message_id,
        ride_id: send.ride_id,
        sender_id: send.sender_id,
        sender_name: claims.name.clone(),
        receiver_id: send.receiver_id,
        text,
        created_at: now,
    };

    let event = if private {
        ServerEvent::PrivateMessage(broadcast)
    } else {
        ServerEvent::ChatMessage(broadcast)
    };

    state.hub.emit_to_room(&room, event).await;
}
