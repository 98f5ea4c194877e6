use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use serde_json::{json, Value};

use bus_protocol::chat::{
    ChatMessageView, CreateRoomRequest, HistoryQuery, HistoryResponse, JoinRoomRequest,
    PostMessageRequest, RoomSummary, UserSummary,
};

use crate::app::AppState;

type ApiError = (StatusCode, Json<Value>);

const MAX_HISTORY_LIMIT: u32 = bus_protocol::chat::MAX_HISTORY_LIMIT;
const DEFAULT_HISTORY_LIMIT: u32 = 50;

fn chat_error(e: bus_chat::ChatError) -> ApiError {
    let status = match e {
        bus_chat::ChatError::NotMember(_) => StatusCode::FORBIDDEN,
        bus_chat::ChatError::RoomNotFound(_) | bus_chat::ChatError::UserNotFound(_) => StatusCode::NOT_FOUND,
        bus_chat::ChatError::Database(_) => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (status, Json(json!({ "error": e.code(), "message": e.to_string() })))
}

pub async fn list_rooms(State(state): State<Arc<AppState>>) -> Result<Json<Vec<RoomSummary>>, ApiError> {
    Ok(Json(state.chat.list_rooms().map_err(chat_error)?))
}

pub async fn list_users(State(state): State<Arc<AppState>>) -> Result<Json<Vec<UserSummary>>, ApiError> {
    Ok(Json(state.chat.list_users().map_err(chat_error)?))
}

pub async fn create_room(
    State(state): State<Arc<AppState>>,
    Json(req): Json<CreateRoomRequest>,
) -> Result<Json<RoomSummary>, ApiError> {
    state
        .chat
        .ensure_user(&req.user_id, &req.username, &req.display_name_for_user, req.is_bot)
        .map_err(chat_error)?;
    let room = state
        .chat
        .create_room(&req.slug, &req.display_name, req.is_dm, &req.user_id)
        .map_err(chat_error)?;
    Ok(Json(RoomSummary { id: room.id, slug: room.slug, display_name: room.display_name, is_dm: room.is_dm }))
}

pub async fn join_room(
    State(state): State<Arc<AppState>>,
    Path(room_id): Path<String>,
    Json(req): Json<JoinRoomRequest>,
) -> Result<Json<Value>, ApiError> {
    state
        .chat
        .ensure_user(&req.user_id, &req.username, &req.display_name, req.is_bot)
        .map_err(chat_error)?;
    state.chat.join_room(&room_id, &req.user_id).map_err(chat_error)?;
    Ok(Json(json!({ "ok": true })))
}

pub async fn history(
    State(state): State<Arc<AppState>>,
    Path(room_id): Path<String>,
    Query(query): Query<HistoryQuery>,
) -> Result<Json<HistoryResponse>, ApiError> {
    let limit = query.limit.unwrap_or(DEFAULT_HISTORY_LIMIT).min(MAX_HISTORY_LIMIT);
    let (messages, has_more) = state.chat.history(&room_id, query.before_id, limit).map_err(chat_error)?;
    let messages: Vec<ChatMessageView> = messages.iter().map(bus_chat::to_view).collect();
    Ok(Json(HistoryResponse { messages, has_more }))
}

pub async fn post_message(
    State(state): State<Arc<AppState>>,
    Path(room_id): Path<String>,
    Json(req): Json<PostMessageRequest>,
) -> Result<Json<ChatMessageView>, ApiError> {
    let message = state
        .chat
        .post_message(&room_id, &req.user_id, &req.username, &req.content)
        .map_err(chat_error)?;

    // Room history is the chat fabric's own concern; feeding the same
    // turn into the dispatcher (§4.7 Idle transitions) is what makes it
    // eligible for mention detection, active-mode continuation, and a
    // bot reply. `"chat:{room_id}"` is the channel family the gateway's
    // `ChatOutboundSink` strips back off before delivery.
    if let Err(e) = state.dispatcher.handle_inbound(bus_dispatcher::IncomingMessage {
        external_id: None,
        channel: bus_core::ChannelId::new(format!("chat:{room_id}")),
        author_id: crate::app::stable_author_id(&req.user_id),
        author_name: req.username.clone(),
        content: req.content.clone(),
        is_bot: false,
    }) {
        tracing::warn!(error = %e, room_id, "failed to hand chat message to dispatcher");
    }

    Ok(Json(bus_chat::to_view(&message)))
}
