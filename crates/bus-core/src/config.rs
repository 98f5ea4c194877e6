use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

use crate::error::{BusError, Result};

pub const DEFAULT_GATEWAY_PORT: u16 = 8790;
pub const DEFAULT_BIND: &str = "127.0.0.1";

/// Outbound chat chunking limit: replies longer than this are split
/// into sequential messages.
pub const CHUNK_LIMIT_CHARS: usize = 2000;
/// Boundary used when splitting an oversized reply.
pub const CHUNK_SPLIT_CHARS: usize = 1900;

/// Top-level configuration (`bus.toml` + `BUS_*`/canonical env overrides).
///
/// Modelled directly on `skynet_core::config::SkynetConfig`: nested
/// per-subsystem structs, `Default` impls carrying the spec's defaults,
/// loaded through `figment` so TOML and environment overrides compose.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BusConfig {
    #[serde(default)]
    pub gateway: GatewayConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub claims: ClaimConfig,
    #[serde(default)]
    pub active_mode: ActiveModeConfig,
    #[serde(default)]
    pub debounce: DebounceConfig,
    #[serde(default)]
    pub invoker: InvokerConfig,
    #[serde(default)]
    pub token_gate: TokenGateConfig,
    #[serde(default)]
    pub memory: MemoryConfig,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            gateway: GatewayConfig::default(),
            database: DatabaseConfig::default(),
            claims: ClaimConfig::default(),
            active_mode: ActiveModeConfig::default(),
            debounce: DebounceConfig::default(),
            invoker: InvokerConfig::default(),
            token_gate: TokenGateConfig::default(),
            memory: MemoryConfig::default(),
        }
    }
}

impl BusConfig {
    /// Load config from an explicit path, else `BUS_CONFIG` env var, else
    /// defaults — same precedence as `SkynetConfig::load`.
    pub fn load(explicit_path: Option<&str>) -> Result<Self> {
        let path = explicit_path
            .map(|s| s.to_string())
            .or_else(|| std::env::var("BUS_CONFIG").ok());

        let mut figment = Figment::from(figment::providers::Serialized::defaults(
            BusConfig::default(),
        ));

        if let Some(path) = path {
            figment = figment.merge(Toml::file(&path));
        }

        figment = figment
            .merge(Env::prefixed("BUS_GATEWAY_").map(|k| format!("gateway.{k}").into()))
            .merge(Env::prefixed("BUS_DB_").map(|k| format!("database.{k}").into()))
            .merge(Env::raw().only(&["LEDGER_DB_PATH"]).map(|_| "database.path".into()))
            .merge(Env::raw().only(&["CLAIMS_DB_PATH"]).map(|_| "database.claims_path".into()))
            .merge(Env::raw().only(&["ACTIVE_MODE_DB_PATH"]).map(|_| "database.active_mode_path".into()))
            .merge(Env::raw().only(&["CHAT_DB_PATH"]).map(|_| "database.chat_path".into()))
            .merge(Env::raw().only(&["ACTIVE_MODE_TIMEOUT_MINUTES"]).map(|_| {
                "active_mode.timeout_minutes".into()
            }))
            .merge(
                Env::raw()
                    .only(&["CRYSTALLIZATION_TURN_THRESHOLD"])
                    .map(|_| "invoker.crystallization_turn_threshold".into()),
            )
            .merge(
                Env::raw()
                    .only(&["CLAIM_TTL_SECONDS"])
                    .map(|_| "claims.ttl_seconds".into()),
            )
            .merge(Env::raw().only(&["PPS_STRICT_AUTH"]).map(|_| "token_gate.strict".into()))
            .merge(
                Env::raw()
                    .only(&["PPS_MASTER_TOKEN"])
                    .map(|_| "token_gate.master_token".into()),
            )
            .merge(Env::raw().only(&["ENTITY_PATH"]).map(|_| "token_gate.entity_path".into()))
            .merge(Env::raw().only(&["BUS_SELF_NAME"]).map(|_| "gateway.self_name".into()))
            .merge(Env::raw().only(&["GRAPH_URL"]).map(|_| "memory.graph_url".into()))
            .merge(Env::raw().only(&["VECTOR_URL"]).map(|_| "memory.vector_url".into()))
            .merge(Env::raw().only(&["ANCHORS_DIR"]).map(|_| "memory.anchors_dir".into()))
            .merge(Env::raw().only(&["CRYSTALS_DIR"]).map(|_| "memory.crystals_dir".into()))
            .merge(
                Env::raw()
                    .only(&["WORKER_BINARY"])
                    .map(|_| "invoker.worker_binary".into()),
            )
            .merge(Env::raw().only(&["WORKER_CWD"]).map(|_| "invoker.worker_cwd".into()))
            .merge(Env::raw().only(&["WORKER_MODEL"]).map(|_| "invoker.model".into()));

        figment
            .extract()
            .map_err(|e| BusError::Config(e.to_string()))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_bind")]
    pub bind: String,
    /// This instance's display name — used for mention detection (§4.7)
    /// and as the worker session pool's agent id (§4.6).
    #[serde(default = "default_self_name")]
    pub self_name: String,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            bind: default_bind(),
            self_name: default_self_name(),
        }
    }
}

fn default_port() -> u16 {
    DEFAULT_GATEWAY_PORT
}

fn default_bind() -> String {
    DEFAULT_BIND.to_string()
}

fn default_self_name() -> String {
    "bus".to_string()
}

/// One on-disk SQLite file per durable store (§6's "`*_DB_PATH` ... for
/// each persistent store"). All four default into the same `./data`
/// directory as distinct files — each subsystem opens its own
/// `rusqlite::Connection`, so a shared filename is not required, but
/// keeping them separate matches the canonical env var set exactly.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_db_path")]
    pub path: String,
    #[serde(default = "default_claims_db_path")]
    pub claims_path: String,
    #[serde(default = "default_active_mode_db_path")]
    pub active_mode_path: String,
    #[serde(default = "default_chat_db_path")]
    pub chat_path: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
            claims_path: default_claims_db_path(),
            active_mode_path: default_active_mode_db_path(),
            chat_path: default_chat_db_path(),
        }
    }
}

fn default_db_path() -> String {
    "./data/bus.sqlite3".to_string()
}

fn default_claims_db_path() -> String {
    "./data/claims.sqlite3".to_string()
}

fn default_active_mode_db_path() -> String {
    "./data/active_mode.sqlite3".to_string()
}

fn default_chat_db_path() -> String {
    "./data/chat.sqlite3".to_string()
}

/// Claim TTL: 30s, matching the original daemon's `CLAIM_TTL_SECONDS`
/// constant exactly.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClaimConfig {
    #[serde(default = "default_claim_ttl")]
    pub ttl_seconds: u64,
}

impl Default for ClaimConfig {
    fn default() -> Self {
        Self {
            ttl_seconds: default_claim_ttl(),
        }
    }
}

fn default_claim_ttl() -> u64 {
    30
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActiveModeConfig {
    #[serde(default = "default_active_mode_timeout")]
    pub timeout_minutes: u64,
}

impl Default for ActiveModeConfig {
    fn default() -> Self {
        Self {
            timeout_minutes: default_active_mode_timeout(),
        }
    }
}

fn default_active_mode_timeout() -> u64 {
    10
}

/// Debounce batcher tunables — every constant governing message
/// coalescing gets an overridable field here.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DebounceConfig {
    #[serde(default = "default_debounce_initial")]
    pub initial_seconds: f64,
    #[serde(default = "default_debounce_human_initial")]
    pub human_initial_seconds: f64,
    #[serde(default = "default_debounce_increment")]
    pub increment_seconds: f64,
    #[serde(default = "default_debounce_max")]
    pub max_seconds: f64,
    #[serde(default = "default_rapid_threshold")]
    pub rapid_threshold_seconds: f64,
    #[serde(default = "default_presence_window")]
    pub human_presence_window_seconds: f64,
}

impl Default for DebounceConfig {
    fn default() -> Self {
        Self {
            initial_seconds: default_debounce_initial(),
            human_initial_seconds: default_debounce_human_initial(),
            increment_seconds: default_debounce_increment(),
            max_seconds: default_debounce_max(),
            rapid_threshold_seconds: default_rapid_threshold(),
            human_presence_window_seconds: default_presence_window(),
        }
    }
}

fn default_debounce_initial() -> f64 {
    1.5
}
fn default_debounce_human_initial() -> f64 {
    5.0
}
fn default_debounce_increment() -> f64 {
    1.0
}
fn default_debounce_max() -> f64 {
    10.0
}
fn default_rapid_threshold() -> f64 {
    2.0
}
fn default_presence_window() -> f64 {
    300.0
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InvokerConfig {
    #[serde(default = "default_invoke_timeout")]
    pub timeout_seconds: u64,
    #[serde(default = "default_max_context_tokens")]
    pub max_context_tokens: u64,
    #[serde(default = "default_max_turns")]
    pub max_turns: u32,
    #[serde(default = "default_max_idle_seconds")]
    pub max_idle_seconds: u64,
    #[serde(default = "default_crystallization_turn_threshold")]
    pub crystallization_turn_threshold: u32,
    /// External worker binary invoked by the default `SubprocessWorkerBackend`.
    #[serde(default = "default_worker_binary")]
    pub worker_binary: String,
    #[serde(default = "default_worker_cwd")]
    pub worker_cwd: String,
    #[serde(default = "default_worker_model")]
    pub model: String,
}

impl Default for InvokerConfig {
    fn default() -> Self {
        Self {
            timeout_seconds: default_invoke_timeout(),
            max_context_tokens: default_max_context_tokens(),
            max_turns: default_max_turns(),
            max_idle_seconds: default_max_idle_seconds(),
            crystallization_turn_threshold: default_crystallization_turn_threshold(),
            worker_binary: default_worker_binary(),
            worker_cwd: default_worker_cwd(),
            model: default_worker_model(),
        }
    }
}

fn default_worker_binary() -> String {
    "claude".to_string()
}

fn default_worker_cwd() -> String {
    ".".to_string()
}

fn default_worker_model() -> String {
    "default".to_string()
}

fn default_invoke_timeout() -> u64 {
    180
}
fn default_max_context_tokens() -> u64 {
    100_000
}
fn default_max_turns() -> u32 {
    200
}
fn default_max_idle_seconds() -> u64 {
    3600
}
fn default_crystallization_turn_threshold() -> u32 {
    40
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenGateConfig {
    #[serde(default)]
    pub strict: bool,
    #[serde(default = "default_entity_path")]
    pub entity_path: String,
    pub master_token: Option<String>,
}

impl Default for TokenGateConfig {
    fn default() -> Self {
        Self {
            strict: false,
            entity_path: default_entity_path(),
            master_token: None,
        }
    }
}

fn default_entity_path() -> String {
    "./data/entity_token".to_string()
}

/// Layer router backend locations (§4.2). The graph and vector stores
/// are always addressed over HTTP — one real backend each, chosen at
/// construction, per the design note resolving the source's dual
/// graph-backend ambiguity.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryConfig {
    #[serde(default = "default_graph_url")]
    pub graph_url: String,
    #[serde(default = "default_vector_url")]
    pub vector_url: String,
    #[serde(default = "default_anchors_dir")]
    pub anchors_dir: String,
    #[serde(default = "default_crystals_dir")]
    pub crystals_dir: String,
    #[serde(default = "default_crystals_max_current")]
    pub crystals_max_current: usize,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            graph_url: default_graph_url(),
            vector_url: default_vector_url(),
            anchors_dir: default_anchors_dir(),
            crystals_dir: default_crystals_dir(),
            crystals_max_current: default_crystals_max_current(),
        }
    }
}

fn default_graph_url() -> String {
    "http://127.0.0.1:8000".to_string()
}

fn default_vector_url() -> String {
    "http://127.0.0.1:8001".to_string()
}

fn default_anchors_dir() -> String {
    "./data/anchors".to_string()
}

fn default_crystals_dir() -> String {
    "./data/crystals".to_string()
}

fn default_crystals_max_current() -> usize {
    4
}
