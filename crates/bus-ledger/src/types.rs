use serde::{Deserialize, Serialize};

/// A single durable conversational turn (§3).
///
/// `id` is assigned by the ledger on append and is monotonically
/// increasing; ordering within a channel is `(created_at, id)` with `id`
/// breaking ties.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub id: i64,
    pub external_id: Option<String>,
    pub channel: String,
    pub author_id: i64,
    pub author_name: String,
    pub content: String,
    pub is_self: bool,
    pub is_bot: bool,
    pub created_at: String,
    pub summary_id: Option<i64>,
    pub batch_id: Option<String>,
}

/// Fields needed to append a new message; `id`/`created_at` are assigned
/// by the ledger.
#[derive(Debug, Clone)]
pub struct NewMessage {
    pub external_id: Option<String>,
    pub channel: String,
    pub author_id: i64,
    pub author_name: String,
    pub content: String,
    pub is_self: bool,
    pub is_bot: bool,
}

/// Outcome of [`crate::manager::Ledger::append`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppendOutcome {
    Inserted(i64),
    /// `external_id` already present — no-op per P2.
    DuplicateSkipped(i64),
}

impl AppendOutcome {
    pub fn id(self) -> i64 {
        match self {
            AppendOutcome::Inserted(id) => id,
            AppendOutcome::DuplicateSkipped(id) => id,
        }
    }

    pub fn is_new(self) -> bool {
        matches!(self, AppendOutcome::Inserted(_))
    }
}

/// A single ranked full-text search hit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchHit {
    pub message: Message,
    /// Relevance normalised to `[0, 1]`, higher is more relevant.
    pub relevance: f64,
}

/// A rolling conversation summary (§3 Summary).
///
/// `[start_message_id, end_message_id]` never overlaps another summary
/// for the same channel; every message in that range carries
/// `summary_id = this.id`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Summary {
    pub id: i64,
    pub text: String,
    pub start_message_id: i64,
    pub end_message_id: i64,
    pub message_count: i64,
    pub channels: Vec<String>,
    pub time_span_start: Option<String>,
    pub time_span_end: Option<String>,
    pub kind: String,
    pub created_at: String,
}

/// Half-open `[start, end]` inclusive id range used by the summariser and
/// knowledge-graph ingestion trackers.
#[derive(Debug, Clone, Copy)]
pub struct IdRange {
    pub start_id: i64,
    pub end_id: i64,
}

impl IdRange {
    pub fn len(&self) -> i64 {
        self.end_id - self.start_id + 1
    }

    pub fn is_empty(&self) -> bool {
        self.len() <= 0
    }
}
