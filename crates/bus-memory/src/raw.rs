use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};

use bus_ledger::Ledger;

use crate::error::Result;
use crate::layer::MemoryLayer;
use crate::types::{HealthStatus, LayerResult};

/// Layer L1: thin wrapper delegating straight to the ledger's FTS index
/// and append path.
pub struct RawLayer {
    ledger: Arc<Ledger>,
}

impl RawLayer {
    pub fn new(ledger: Arc<Ledger>) -> Self {
        Self { ledger }
    }
}

#[async_trait]
impl MemoryLayer for RawLayer {
    async fn search(&self, query: &str, limit: usize) -> Result<Vec<LayerResult>> {
        let hits = self.ledger.fts_search(query, limit)?;
        Ok(hits
            .into_iter()
            .map(|hit| LayerResult {
                content: hit.message.content.clone(),
                source: format!("raw:{}", hit.message.channel),
                relevance: hit.relevance,
                metadata: json!({ "message_id": hit.message.id, "author": hit.message.author_name }),
            })
            .collect())
    }

    async fn store(&self, content: &str, metadata: Value) -> Result<bool> {
        let channel = metadata.get("channel").and_then(|v| v.as_str()).unwrap_or("unknown").to_string();
        let author_id = metadata.get("author_id").and_then(|v| v.as_i64()).unwrap_or(0);
        let author_name = metadata
            .get("author_name")
            .and_then(|v| v.as_str())
            .unwrap_or("system")
            .to_string();
        let is_self = metadata.get("is_self").and_then(|v| v.as_bool()).unwrap_or(false);
        let is_bot = metadata.get("is_bot").and_then(|v| v.as_bool()).unwrap_or(false);

        let outcome = self.ledger.append(bus_ledger::NewMessage {
            external_id: None,
            channel,
            author_id,
            author_name,
            content: content.to_string(),
            is_self,
            is_bot,
        })?;
        Ok(outcome.is_new())
    }

    async fn health(&self) -> HealthStatus {
        HealthStatus::ok("raw layer delegates to the ledger, always available")
    }
}
