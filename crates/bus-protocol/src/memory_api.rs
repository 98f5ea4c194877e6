use serde::{Deserialize, Serialize};
use serde_json::Value;

/// `POST /tools/ambient_recall` request body (§6).
#[derive(Debug, Clone, Deserialize)]
pub struct AmbientRecallRequest {
    pub context: String,
    #[serde(default)]
    pub limit_per_layer: Option<usize>,
    pub token: Option<String>,
}

/// `POST /tools/{raw,anchor,texture}_search` shared request shape.
#[derive(Debug, Clone, Deserialize)]
pub struct SearchRequest {
    pub query: String,
    #[serde(default)]
    pub limit: Option<usize>,
    pub token: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SearchResponse {
    pub results: Vec<Value>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AnchorSaveRequest {
    pub content: String,
    pub title: String,
    #[serde(default)]
    pub location: Option<String>,
    pub token: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TextureAddRequest {
    pub content: String,
    #[serde(default)]
    pub channel: Option<String>,
    pub token: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TextureAddTripletRequest {
    pub source: String,
    pub relationship: String,
    pub target: String,
    #[serde(default)]
    pub fact: Option<String>,
    #[serde(default)]
    pub source_type: Option<String>,
    #[serde(default)]
    pub target_type: Option<String>,
    pub token: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct TextureAddTripletResponse {
    pub ok: bool,
    pub edge_uuid: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CrystallizeRequest {
    pub content: String,
    pub token: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct CrystallizeResponse {
    pub id: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GetCrystalsRequest {
    #[serde(default)]
    pub count: Option<usize>,
    pub token: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StoreMessageRequest {
    pub content: String,
    pub author_name: String,
    pub channel: String,
    #[serde(default)]
    pub is_self: bool,
    #[serde(default)]
    pub session_id: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct StoreMessageResponse {
    pub id: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct OkResponse {
    pub ok: bool,
}

/// Envelope forwarded by the stdio↔HTTP bridge (§4.10): an external
/// tool-call protocol's request, carried as a JSON-RPC-ish line, mapped
/// 1:1 onto an internal HTTP route.
#[derive(Debug, Clone, Deserialize)]
pub struct StdioToolCall {
    pub id: String,
    pub tool: String,
    #[serde(default)]
    pub arguments: Value,
}

#[derive(Debug, Clone, Serialize)]
pub struct StdioToolResult {
    pub id: String,
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}
