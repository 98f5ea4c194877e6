use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::ws::{Message, WebSocket},
    extract::{Query, State, WebSocketUpgrade},
    response::IntoResponse,
};
use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use tokio::sync::mpsc;
use tracing::{info, warn};

use bus_protocol::chat::{ClientFrame, ServerFrame, MAX_HISTORY_LIMIT};

use crate::app::AppState;

/// Stream writes past this deadline tear the connection down rather than
/// stall other members (§5, "a slow consumer is disconnected rather than
/// allowed to stall other members").
const WRITE_TIMEOUT: Duration = Duration::from_secs(10);

/// Connection-level auth carried as WS upgrade query params. This
/// workspace does not model a separate per-user `token_hash` secret
/// (§3's `User.token_hash` is left as an opaque, unimplemented column —
/// see DESIGN.md); the chat stream reuses the same entity/master token
/// the memory surface validates (C9), under a dedicated `chat_connect`
/// operation name.
#[derive(Debug, Deserialize)]
pub struct ConnectQuery {
    pub user_id: String,
    pub username: String,
    pub display_name: String,
    #[serde(default)]
    pub is_bot: bool,
    pub token: Option<String>,
}

/// Axum handler — upgrades `GET /ws` to a WebSocket.
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
    Query(query): Query<ConnectQuery>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_connection(socket, state, query))
}

/// Per-connection task — lives for the entire WS session.
async fn handle_connection(socket: WebSocket, state: Arc<AppState>, query: ConnectQuery) {
    if let Err(e) = state.token_gate.validate(query.token.as_deref(), "chat_connect") {
        warn!(user_id = %query.user_id, error = %e, "WS connect auth rejected");
        return;
    }

    let Ok(user) = state.chat.ensure_user(&query.user_id, &query.username, &query.display_name, query.is_bot) else {
        warn!(user_id = %query.user_id, "failed to register chat user");
        return;
    };

    let (mut tx, mut rx) = socket.split();

    let rooms = match state.chat.list_rooms() {
        Ok(r) => r,
        Err(e) => {
            warn!(error = %e, "failed to list rooms for connected frame");
            return;
        }
    };
    let member_room_ids: Vec<String> =
        rooms.iter().filter(|r| state.chat.is_member(&r.id, &user.id).unwrap_or(false)).map(|r| r.id.clone()).collect();
    let users = state.chat.list_users().unwrap_or_default();

    let connected = ServerFrame::Connected {
        user: bus_protocol::chat::UserSummary {
            id: user.id.clone(),
            username: user.username.clone(),
            display_name: user.display_name.clone(),
            is_bot: user.is_bot,
        },
        rooms,
        users,
    };
    if send_frame(&mut tx, &connected).await.is_err() {
        return;
    }

    // One forwarding task per subscribed room plus one for presence,
    // funnelled into a single mpsc so the select loop below only needs
    // two branches regardless of how many rooms this user belongs to
    // (§9's task-and-channel concurrency model).
    let (forward_tx, mut forward_rx) = mpsc::unbounded_channel::<ServerFrame>();
    let mut forward_tasks = Vec::with_capacity(member_room_ids.len() + 1);
    for room_id in &member_room_ids {
        let mut room_rx = state.chat.subscribe(room_id);
        let tx = forward_tx.clone();
        forward_tasks.push(tokio::spawn(async move {
            while let Ok(frame) = room_rx.recv().await {
                if tx.send(frame).is_err() {
                    break;
                }
            }
        }));
    }
    {
        let mut presence_rx = state.chat.subscribe_presence();
        let tx = forward_tx.clone();
        forward_tasks.push(tokio::spawn(async move {
            while let Ok(frame) = presence_rx.recv().await {
                if tx.send(frame).is_err() {
                    break;
                }
            }
        }));
    }
    drop(forward_tx);

    if state.chat.connect_presence(&user.id) {
        state.chat.broadcast_presence(&user.id, &user.username, true);
    }
    info!(user_id = %user.id, rooms = member_room_ids.len(), "WS connection established");

    loop {
        tokio::select! {
            msg = rx.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        if let Err(e) = handle_client_frame(&state, &user, &text, &mut tx).await {
                            warn!(user_id = %user.id, error = %e, "failed to deliver response frame, closing");
                            break;
                        }
                    }
                    Some(Ok(Message::Ping(data))) => {
                        if tx.send(Message::Pong(data)).await.is_err() {
                            break;
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Err(e)) => {
                        warn!(user_id = %user.id, error = %e, "WS read error");
                        break;
                    }
                    _ => {}
                }
            }
            frame = forward_rx.recv() => {
                match frame {
                    Some(frame) => {
                        if send_frame(&mut tx, &frame).await.is_err() {
                            break;
                        }
                    }
                    None => break,
                }
            }
        }
    }

    for task in forward_tasks {
        task.abort();
    }
    if state.chat.disconnect_presence(&user.id) {
        state.chat.broadcast_presence(&user.id, &user.username, false);
    }
    info!(user_id = %user.id, "WS connection closed");
}

/// Handle one inbound client frame (§4.8: `message`, `history`, `typing`).
async fn handle_client_frame(
    state: &Arc<AppState>,
    user: &bus_chat::User,
    text: &str,
    tx: &mut SplitSink<WebSocket, Message>,
) -> Result<(), axum::Error> {
    let frame: ClientFrame = match serde_json::from_str(text) {
        Ok(f) => f,
        Err(e) => {
            let err = ServerFrame::Error { code: "bad_frame".to_string(), message: e.to_string() };
            return send_frame(tx, &err).await;
        }
    };

    match frame {
        ClientFrame::Message { room_id, content } => {
            match state.chat.post_message(&room_id, &user.id, &user.username, &content) {
                Ok(_) => {
                    if let Err(e) = state.dispatcher.handle_inbound(bus_dispatcher::IncomingMessage {
                        external_id: None,
                        channel: bus_core::ChannelId::new(format!("chat:{room_id}")),
                        author_id: crate::app::stable_author_id(&user.id),
                        author_name: user.username.clone(),
                        content,
                        is_bot: false,
                    }) {
                        warn!(error = %e, room_id, "failed to hand chat message to dispatcher");
                    }
                    Ok(())
                }
                Err(e) => {
                    let err = ServerFrame::Error { code: e.code().to_string(), message: e.to_string() };
                    send_frame(tx, &err).await
                }
            }
        }
        ClientFrame::History { room_id, before_id, limit } => {
            let limit = limit.min(MAX_HISTORY_LIMIT);
            match state.chat.history(&room_id, before_id, limit) {
                Ok((messages, has_more)) => {
                    let messages = messages.iter().map(bus_chat::to_view).collect();
                    send_frame(tx, &ServerFrame::History { room_id, messages, has_more }).await
                }
                Err(e) => {
                    let err = ServerFrame::Error { code: e.code().to_string(), message: e.to_string() };
                    send_frame(tx, &err).await
                }
            }
        }
        ClientFrame::Typing { room_id } => {
            state.chat.broadcast_typing(&room_id, &user.username);
            Ok(())
        }
    }
}

async fn send_frame(tx: &mut SplitSink<WebSocket, Message>, frame: &ServerFrame) -> Result<(), axum::Error> {
    let json = serde_json::to_string(frame).unwrap_or_default();
    match tokio::time::timeout(WRITE_TIMEOUT, tx.send(Message::Text(json.into()))).await {
        Ok(result) => result,
        Err(_) => Err(axum::Error::new(std::io::Error::new(std::io::ErrorKind::TimedOut, "write timeout"))),
    }
}
