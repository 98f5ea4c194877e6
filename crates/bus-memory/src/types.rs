use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A single hit returned by any [`crate::layer::MemoryLayer::search`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LayerResult {
    pub content: String,
    pub source: String,
    pub relevance: f64,
    #[serde(default)]
    pub metadata: Value,
}

/// Health probe result for a single layer or back end.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthStatus {
    pub available: bool,
    pub message: String,
    #[serde(default)]
    pub details: Value,
}

impl HealthStatus {
    pub fn ok(message: impl Into<String>) -> Self {
        Self { available: true, message: message.into(), details: Value::Null }
    }

    pub fn unavailable(message: impl Into<String>) -> Self {
        Self { available: false, message: message.into(), details: Value::Null }
    }
}

/// Qualitative unsummarised-backlog tag attached to every ambient recall
/// bundle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MemoryHealth {
    Critical,
    Recommended,
    Healthy,
}

impl MemoryHealth {
    pub fn from_unsummarized_count(count: i64) -> Self {
        if count > 200 {
            MemoryHealth::Critical
        } else if count > 100 {
            MemoryHealth::Recommended
        } else {
            MemoryHealth::Healthy
        }
    }
}

impl std::fmt::Display for MemoryHealth {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MemoryHealth::Critical => write!(f, "critical"),
            MemoryHealth::Recommended => write!(f, "recommended"),
            MemoryHealth::Healthy => write!(f, "healthy"),
        }
    }
}

/// Synthesised wall-clock block attached to every ambient recall bundle.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClockBlock {
    pub utc: DateTime<Utc>,
    pub display: String,
    pub time_of_day_note: Option<String>,
}

impl ClockBlock {
    pub fn now() -> Self {
        let utc = Utc::now();
        let display = utc.format("%Y-%m-%d %H:%M:%S UTC").to_string();
        let hour = utc.format("%H").to_string().parse::<u32>().unwrap_or(12);
        let time_of_day_note = if hour >= 23 || hour < 5 {
            Some("late night / early morning hours".to_string())
        } else {
            None
        };
        Self { utc, display, time_of_day_note }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SummaryView {
    pub id: i64,
    pub text: String,
    pub time_span_start: String,
    pub time_span_end: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UnsummarizedTurn {
    pub id: i64,
    pub author: String,
    pub content: String,
    pub created_at: String,
}

/// The structured bundle returned by ambient recall.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AmbientRecallBundle {
    pub clock: ClockBlock,
    pub unsummarized_count: i64,
    pub memory_health: MemoryHealth,
    pub results: Vec<LayerResult>,
    pub summaries: Vec<SummaryView>,
    pub unsummarized_turns: Vec<UnsummarizedTurn>,
}

/// Returned by [`crate::anchors::AnchorsLayer::list`].
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AnchorListing {
    pub disk_files: Vec<String>,
    pub store_entries: Vec<String>,
    pub orphans: Vec<String>,
    pub missing: Vec<String>,
    pub synced: Vec<String>,
}

/// A graph entity, reused by `(name, group)` — see
/// [`crate::graph::GraphLayer::add_triplet`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GraphEntity {
    pub uuid: String,
    pub name: String,
    pub group: String,
    pub entity_type: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GraphEdge {
    pub uuid: String,
    pub source_uuid: String,
    pub relation: String,
    pub target_uuid: String,
    pub fact: Option<String>,
    pub created_at: DateTime<Utc>,
}
