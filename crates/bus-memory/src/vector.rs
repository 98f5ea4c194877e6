use async_trait::async_trait;

use crate::error::Result;
use crate::types::HealthStatus;

/// One vector-store hit, distance is in the back end's native units
/// (lower = closer); [`crate::anchors::AnchorsLayer`] converts this into
/// the `[0, 1]` relevance scale.
#[derive(Debug, Clone)]
pub struct VectorHit {
    pub key: String,
    pub distance: Option<f64>,
    pub rank: usize,
}

/// Thin client over an external vector-store service. No embedding model
/// or similarity algorithm lives in this crate — `store`/`query`/`delete`
/// are plain HTTP calls, matching the distilled spec's "vector-store
/// embedding model... out of scope" note.
#[async_trait]
pub trait VectorBackend: Send + Sync {
    async fn upsert(&self, key: &str, content: &str, content_hash: &str) -> Result<()>;
    async fn query_by_text(&self, query: &str, limit: usize) -> Result<Vec<VectorHit>>;
    async fn delete(&self, key: &str) -> Result<()>;
    /// All keys currently stored, used by `resync`/`list`.
    async fn list_keys(&self) -> Result<Vec<String>>;
    /// Content hash recorded for `key`, if present.
    async fn stored_hash(&self, key: &str) -> Result<Option<String>>;
    async fn health(&self) -> HealthStatus;
}

/// Default implementation: a JSON/HTTP vector-store service.
pub struct HttpVectorBackend {
    client: reqwest::Client,
    base_url: String,
}

impl HttpVectorBackend {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self { client: reqwest::Client::new(), base_url: base_url.into() }
    }
}

#[async_trait]
impl VectorBackend for HttpVectorBackend {
    async fn upsert(&self, key: &str, content: &str, content_hash: &str) -> Result<()> {
        self.client
            .post(format!("{}/collections/anchors/points", self.base_url))
            .json(&serde_json::json!({ "key": key, "content": content, "hash": content_hash }))
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }

    async fn query_by_text(&self, query: &str, limit: usize) -> Result<Vec<VectorHit>> {
        #[derive(serde::Deserialize)]
        struct Hit {
            key: String,
            distance: Option<f64>,
        }
        let resp: Vec<Hit> = self
            .client
            .post(format!("{}/collections/anchors/search", self.base_url))
            .json(&serde_json::json!({ "query": query, "limit": limit }))
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        Ok(resp
            .into_iter()
            .enumerate()
            .map(|(rank, hit)| VectorHit { key: hit.key, distance: hit.distance, rank })
            .collect())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.client
            .delete(format!("{}/collections/anchors/points/{key}", self.base_url))
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }

    async fn list_keys(&self) -> Result<Vec<String>> {
        let keys: Vec<String> = self
            .client
            .get(format!("{}/collections/anchors/keys", self.base_url))
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        Ok(keys)
    }

    async fn stored_hash(&self, key: &str) -> Result<Option<String>> {
        #[derive(serde::Deserialize)]
        struct Point {
            hash: String,
        }
        let resp = self
            .client
            .get(format!("{}/collections/anchors/points/{key}", self.base_url))
            .send()
            .await?;
        if resp.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let point: Point = resp.error_for_status()?.json().await?;
        Ok(Some(point.hash))
    }

    async fn health(&self) -> HealthStatus {
        match self.client.get(format!("{}/health", self.base_url)).send().await {
            Ok(resp) if resp.status().is_success() => HealthStatus::ok("vector store reachable"),
            Ok(resp) => HealthStatus::unavailable(format!("vector store returned {}", resp.status())),
            Err(e) => HealthStatus::unavailable(e.to_string()),
        }
    }
}
