use std::sync::Arc;

use axum::{
    routing::{delete, get, post},
    Router,
};

use bus_active_mode::ActiveModeRegistry;
use bus_chat::ChatFabric;
use bus_claims::ClaimStore;
use bus_core::config::BusConfig;
use bus_core::InstanceId;
use bus_dispatcher::Dispatcher;
use bus_ledger::Ledger;
use bus_memory::MemoryRouter;
use bus_token_gate::TokenGate;

/// Central shared state, passed as `Arc<AppState>` to every Axum handler —
/// mirrors `skynet-gateway::app::AppState`'s role, narrowed to this
/// workspace's subsystems.
pub struct AppState {
    pub config: BusConfig,
    pub instance: InstanceId,
    pub ledger: Arc<Ledger>,
    pub memory: Arc<MemoryRouter>,
    pub chat: Arc<ChatFabric>,
    pub claims: Arc<ClaimStore>,
    pub active_mode: Arc<ActiveModeRegistry>,
    pub dispatcher: Arc<Dispatcher>,
    pub token_gate: Arc<TokenGate>,
}

/// Chat-fabric users carry a UUID `user_id`; the ledger's `author_id`
/// column is an i64 (§3). Rather than widen the ledger schema for one
/// caller, this derives a stable i64 from the UUID via its low 64 bits —
/// collisions are astronomically unlikely and the ledger never treats
/// `author_id` as anything but an opaque grouping key.
pub fn stable_author_id(user_id: &str) -> i64 {
    use std::hash::{Hash, Hasher};
    let mut hasher = std::collections::hash_map::DefaultHasher::new();
    user_id.hash(&mut hasher);
    (hasher.finish() & 0x7fff_ffff_ffff_ffff) as i64
}

/// Assemble the full Axum router: the §6 `/tools/*` memory surface, the
/// chat HTTP façade, the chat WebSocket stream, and a liveness probe.
pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/tools/ambient_recall", post(crate::http::memory::ambient_recall))
        .route("/tools/raw_search", post(crate::http::memory::raw_search))
        .route("/tools/anchor_search", post(crate::http::memory::anchor_search))
        .route("/tools/anchor_save", post(crate::http::memory::anchor_save))
        .route("/tools/texture_search", post(crate::http::memory::texture_search))
        .route("/tools/texture_add", post(crate::http::memory::texture_add))
        .route("/tools/texture_add_triplet", post(crate::http::memory::texture_add_triplet))
        .route("/tools/texture_delete/{uuid}", delete(crate::http::memory::texture_delete))
        .route("/tools/crystallize", post(crate::http::memory::crystallize))
        .route("/tools/get_crystals", post(crate::http::memory::get_crystals))
        .route("/tools/store_message", post(crate::http::memory::store_message))
        .route("/tools/pps_health", get(crate::http::health::pps_health))
        .route("/rooms", get(crate::http::chat::list_rooms).post(crate::http::chat::create_room))
        .route("/rooms/{id}/messages", get(crate::http::chat::history).post(crate::http::chat::post_message))
        .route("/rooms/{id}/join", post(crate::http::chat::join_room))
        .route("/users", get(crate::http::chat::list_users))
        .route("/ws", get(crate::ws::connection::ws_handler))
        .with_state(state)
        .layer(tower_http::trace::TraceLayer::new_for_http())
}
