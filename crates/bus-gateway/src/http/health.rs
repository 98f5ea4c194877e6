use std::sync::Arc;

use axum::{extract::State, Json};
use serde_json::{json, Value};

use bus_memory::MemoryLayer;

use crate::app::AppState;

/// `GET /tools/pps_health` — per-layer status (§6). Always exempt from
/// token validation (§4.9).
pub async fn pps_health(State(state): State<Arc<AppState>>) -> Json<Value> {
    let (raw, anchors, graph, crystals) = tokio::join!(
        state.memory.raw().health(),
        state.memory.anchors().health(),
        state.memory.graph().health(),
        state.memory.crystals().health(),
    );

    Json(json!({
        "status": "ok",
        "instance": state.instance.as_str(),
        "layers": {
            "raw": raw,
            "anchors": anchors,
            "graph": graph,
            "crystals": crystals,
        },
    }))
}
