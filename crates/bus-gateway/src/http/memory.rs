use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use serde::Deserialize;
use serde_json::{json, Value};

use bus_memory::MemoryLayer;
use bus_protocol::memory_api::{
    AmbientRecallRequest, AnchorSaveRequest, CrystallizeRequest, CrystallizeResponse,
    GetCrystalsRequest, OkResponse, SearchRequest, SearchResponse, StoreMessageRequest,
    StoreMessageResponse, TextureAddRequest, TextureAddTripletRequest, TextureAddTripletResponse,
};

use crate::app::AppState;

type ApiError = (StatusCode, Json<Value>);

const DEFAULT_SEARCH_LIMIT: usize = 5;
const DEFAULT_CRYSTALS_COUNT: usize = 5;

fn auth_error(e: bus_token_gate::TokenGateError) -> ApiError {
    (StatusCode::UNAUTHORIZED, Json(json!({ "error": e.code(), "message": e.to_string() })))
}

fn memory_error(e: bus_memory::MemoryError) -> ApiError {
    (StatusCode::INTERNAL_SERVER_ERROR, Json(json!({ "error": e.code(), "message": e.to_string() })))
}

pub async fn ambient_recall(
    State(state): State<Arc<AppState>>,
    Json(req): Json<AmbientRecallRequest>,
) -> Result<Json<Value>, ApiError> {
    state.token_gate.validate(req.token.as_deref(), "ambient_recall").map_err(auth_error)?;
    let bundle = state
        .memory
        .ambient_recall(&req.context, req.limit_per_layer.unwrap_or(DEFAULT_SEARCH_LIMIT))
        .await
        .map_err(memory_error)?;
    Ok(Json(serde_json::to_value(bundle).unwrap_or(Value::Null)))
}

pub async fn raw_search(
    State(state): State<Arc<AppState>>,
    Json(req): Json<SearchRequest>,
) -> Result<Json<SearchResponse>, ApiError> {
    state.token_gate.validate(req.token.as_deref(), "raw_search").map_err(auth_error)?;
    let hits = state
        .memory
        .raw()
        .search(&req.query, req.limit.unwrap_or(DEFAULT_SEARCH_LIMIT))
        .await
        .map_err(memory_error)?;
    Ok(Json(SearchResponse { results: hits.into_iter().map(|h| json!(h)).collect() }))
}

pub async fn anchor_search(
    State(state): State<Arc<AppState>>,
    Json(req): Json<SearchRequest>,
) -> Result<Json<SearchResponse>, ApiError> {
    state.token_gate.validate(req.token.as_deref(), "anchor_search").map_err(auth_error)?;
    let hits = state
        .memory
        .anchors()
        .search(&req.query, req.limit.unwrap_or(DEFAULT_SEARCH_LIMIT))
        .await
        .map_err(memory_error)?;
    Ok(Json(SearchResponse { results: hits.into_iter().map(|h| json!(h)).collect() }))
}

pub async fn anchor_save(
    State(state): State<Arc<AppState>>,
    Json(req): Json<AnchorSaveRequest>,
) -> Result<Json<OkResponse>, ApiError> {
    state.token_gate.validate(req.token.as_deref(), "anchor_save").map_err(auth_error)?;
    state.memory.anchors().write_anchor(&req.title, &req.content).await.map_err(memory_error)?;
    Ok(Json(OkResponse { ok: true }))
}

pub async fn texture_search(
    State(state): State<Arc<AppState>>,
    Json(req): Json<SearchRequest>,
) -> Result<Json<SearchResponse>, ApiError> {
    state.token_gate.validate(req.token.as_deref(), "texture_search").map_err(auth_error)?;
    let hits = state
        .memory
        .graph()
        .search(&req.query, req.limit.unwrap_or(DEFAULT_SEARCH_LIMIT))
        .await
        .map_err(memory_error)?;
    Ok(Json(SearchResponse { results: hits.into_iter().map(|h| json!(h)).collect() }))
}

pub async fn texture_add(
    State(state): State<Arc<AppState>>,
    Json(req): Json<TextureAddRequest>,
) -> Result<Json<OkResponse>, ApiError> {
    state.token_gate.validate(req.token.as_deref(), "texture_add").map_err(auth_error)?;
    let metadata = req.channel.map(|c| json!({ "channel": c })).unwrap_or(Value::Null);
    state.memory.graph().store(&req.content, metadata).await.map_err(memory_error)?;
    Ok(Json(OkResponse { ok: true }))
}

pub async fn texture_add_triplet(
    State(state): State<Arc<AppState>>,
    Json(req): Json<TextureAddTripletRequest>,
) -> Result<Json<TextureAddTripletResponse>, ApiError> {
    state.token_gate.validate(req.token.as_deref(), "texture_add_triplet").map_err(auth_error)?;
    let edge = state
        .memory
        .graph()
        .add_triplet(
            &req.source,
            &req.relationship,
            &req.target,
            req.fact.as_deref(),
            req.source_type.as_deref(),
            req.target_type.as_deref(),
            "default",
        )
        .await
        .map_err(memory_error)?;
    Ok(Json(TextureAddTripletResponse { ok: true, edge_uuid: edge.uuid }))
}

#[derive(Deserialize)]
pub struct TokenQuery {
    token: Option<String>,
}

/// `DELETE /tools/texture_delete/{uuid}` carries no body (§6); the token
/// travels as a `?token=` query parameter instead.
pub async fn texture_delete(
    State(state): State<Arc<AppState>>,
    Path(uuid): Path<String>,
    Query(query): Query<TokenQuery>,
) -> Result<Json<OkResponse>, ApiError> {
    state.token_gate.validate(query.token.as_deref(), "texture_delete").map_err(auth_error)?;
    state.memory.graph().delete_edge(&uuid).await.map_err(memory_error)?;
    Ok(Json(OkResponse { ok: true }))
}

pub async fn crystallize(
    State(state): State<Arc<AppState>>,
    Json(req): Json<CrystallizeRequest>,
) -> Result<Json<CrystallizeResponse>, ApiError> {
    state.token_gate.validate(req.token.as_deref(), "crystallize").map_err(auth_error)?;
    state.memory.crystals().store(&req.content, Value::Null).await.map_err(memory_error)?;
    // `store` doesn't report the allocated number; re-derive it from the
    // top of the current set (R3: crystallize then get_crystals(k) yields
    // the highest number first among that set).
    let latest = state
        .memory
        .crystals()
        .search("", 1)
        .await
        .map_err(memory_error)?
        .pop()
        .and_then(|r| r.metadata.get("number").and_then(|n| n.as_u64()))
        .unwrap_or(0);
    Ok(Json(CrystallizeResponse { id: latest }))
}

pub async fn get_crystals(
    State(state): State<Arc<AppState>>,
    Json(req): Json<GetCrystalsRequest>,
) -> Result<Json<SearchResponse>, ApiError> {
    state.token_gate.validate(req.token.as_deref(), "get_crystals").map_err(auth_error)?;
    let hits = state
        .memory
        .crystals()
        .search("", req.count.unwrap_or(DEFAULT_CRYSTALS_COUNT))
        .await
        .map_err(memory_error)?;
    Ok(Json(SearchResponse { results: hits.into_iter().map(|h| json!(h)).collect() }))
}

/// `POST /tools/store_message` carries no `token` field in the wire
/// shape (§6) — it is the ledger append path workers use directly, not
/// a gated read/write RAG tool, so no gate check applies here.
pub async fn store_message(
    State(state): State<Arc<AppState>>,
    Json(req): Json<StoreMessageRequest>,
) -> Result<Json<StoreMessageResponse>, ApiError> {
    // `session_id` scopes the channel for callers that share one logical
    // stream across many turns (e.g. a terminal session) — it is not a
    // dedup key. Folding it into `external_id` would make the ledger
    // treat every turn after the first as a duplicate and silently drop
    // it, so it's appended to the channel tag instead and `external_id`
    // stays `None`.
    let channel = match &req.session_id {
        Some(sid) => format!("{}:{sid}", req.channel),
        None => req.channel,
    };
    let outcome = state
        .ledger
        .append(bus_ledger::NewMessage {
            external_id: None,
            channel,
            author_id: 0,
            author_name: req.author_name,
            content: req.content,
            is_self: req.is_self,
            is_bot: req.is_self,
        })
        .map_err(|e| memory_error(bus_memory::MemoryError::Ledger(e)))?;
    Ok(Json(StoreMessageResponse { id: outcome.id() }))
}
