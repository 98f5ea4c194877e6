use async_trait::async_trait;
use serde_json::Value;

use crate::error::Result;
use crate::types::{HealthStatus, LayerResult};

/// Uniform contract shared by the four memory back ends. Modelled as a
/// trait over concrete layer types rather than a class hierarchy — each
/// layer's extra operations (graph `explore`, anchors `list`, …) live on
/// the concrete struct, not on this shared interface.
#[async_trait]
pub trait MemoryLayer: Send + Sync {
    async fn search(&self, query: &str, limit: usize) -> Result<Vec<LayerResult>>;
    async fn store(&self, content: &str, metadata: Value) -> Result<bool>;
    async fn health(&self) -> HealthStatus;
}
