use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::instrument;
use uuid::Uuid;

use crate::error::Result;
use crate::layer::MemoryLayer;
use crate::types::{GraphEdge, GraphEntity, HealthStatus, LayerResult};

/// Thin client over an external knowledge-graph engine. Entity/edge
/// extraction from free text is delegated entirely to that engine — this
/// crate only models the CRUD surface the distilled spec requires.
#[async_trait]
pub trait GraphBackend: Send + Sync {
    async fn ingest_episode(&self, content: &str) -> Result<()>;
    async fn search(&self, query: &str, limit: usize) -> Result<Vec<LayerResult>>;
    async fn find_entity(&self, name: &str, group: &str) -> Result<Option<GraphEntity>>;
    async fn create_entity(&self, name: &str, group: &str, entity_type: Option<&str>) -> Result<GraphEntity>;
    async fn find_edge(
        &self,
        source_uuid: &str,
        relation: &str,
        target_uuid: &str,
    ) -> Result<Option<GraphEdge>>;
    async fn create_edge(
        &self,
        source_uuid: &str,
        relation: &str,
        target_uuid: &str,
        fact: Option<&str>,
    ) -> Result<GraphEdge>;
    async fn explore(&self, entity: &str, depth: u32) -> Result<Vec<LayerResult>>;
    async fn timeline(&self, since: Option<DateTime<Utc>>, until: Option<DateTime<Utc>>, limit: usize)
        -> Result<Vec<GraphEdge>>;
    async fn delete_edge(&self, uuid: &str) -> Result<()>;
    async fn health(&self) -> Result<HealthStatus>;
}

/// Layer L3: free-text episode ingestion plus the entity/edge CRUD
/// surface. `add_triplet` is the one operation carrying a testable
/// invariant: it must never create a second entity for an existing
/// `(name, group)` pair, and a duplicate `(source, relation, target)`
/// edge returns the existing edge rather than creating another.
pub struct GraphLayer {
    backend: Arc<dyn GraphBackend>,
}

impl GraphLayer {
    /// Constructs the layer, failing fast if the backend's health probe
    /// does not succeed — a graph backend chosen but unreachable at boot
    /// is a fatal startup error, not a degraded layer.
    pub async fn connect(backend: Arc<dyn GraphBackend>) -> Result<Self> {
        let health = backend.health().await?;
        if !health.available {
            return Err(crate::error::MemoryError::BackendUnavailable(health.message));
        }
        Ok(Self { backend })
    }

    #[instrument(skip(self, fact))]
    pub async fn add_triplet(
        &self,
        source: &str,
        relation: &str,
        target: &str,
        fact: Option<&str>,
        source_type: Option<&str>,
        target_type: Option<&str>,
        group: &str,
    ) -> Result<GraphEdge> {
        let source_entity = match self.backend.find_entity(source, group).await? {
            Some(e) => e,
            None => self.backend.create_entity(source, group, source_type).await?,
        };
        let target_entity = match self.backend.find_entity(target, group).await? {
            Some(e) => e,
            None => self.backend.create_entity(target, group, target_type).await?,
        };

        if let Some(existing) =
            self.backend.find_edge(&source_entity.uuid, relation, &target_entity.uuid).await?
        {
            return Ok(existing);
        }
        self.backend.create_edge(&source_entity.uuid, relation, &target_entity.uuid, fact).await
    }

    pub async fn explore(&self, entity: &str, depth: u32) -> Result<Vec<LayerResult>> {
        self.backend.explore(entity, depth).await
    }

    pub async fn timeline(
        &self,
        since: Option<DateTime<Utc>>,
        until: Option<DateTime<Utc>>,
        limit: usize,
    ) -> Result<Vec<GraphEdge>> {
        self.backend.timeline(since, until, limit).await
    }

    pub async fn delete_edge(&self, uuid: &str) -> Result<()> {
        self.backend.delete_edge(uuid).await
    }
}

#[async_trait]
impl MemoryLayer for GraphLayer {
    async fn search(&self, query: &str, limit: usize) -> Result<Vec<LayerResult>> {
        self.backend.search(query, limit).await
    }

    async fn store(&self, content: &str, _metadata: Value) -> Result<bool> {
        self.backend.ingest_episode(content).await?;
        Ok(true)
    }

    async fn health(&self) -> HealthStatus {
        match self.backend.health().await {
            Ok(status) => status,
            Err(e) => HealthStatus::unavailable(e.to_string()),
        }
    }
}

/// Default implementation: an HTTP client over an external graph engine
/// service, chosen per the distilled spec's open question on graph back
/// end selection (this workspace already depends on `reqwest`
/// pervasively; no graph-library crate is in the dependency set).
pub struct HttpGraphBackend {
    client: reqwest::Client,
    base_url: String,
}

impl HttpGraphBackend {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self { client: reqwest::Client::new(), base_url: base_url.into() }
    }
}

#[async_trait]
impl GraphBackend for HttpGraphBackend {
    async fn ingest_episode(&self, content: &str) -> Result<()> {
        self.client
            .post(format!("{}/episodes", self.base_url))
            .json(&json!({ "content": content }))
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }

    async fn search(&self, query: &str, limit: usize) -> Result<Vec<LayerResult>> {
        #[derive(Deserialize)]
        struct Hit {
            content: String,
            source: String,
            relevance: f64,
            #[serde(default)]
            metadata: Value,
        }
        let hits: Vec<Hit> = self
            .client
            .get(format!("{}/search", self.base_url))
            .query(&[("q", query), ("limit", &limit.to_string())])
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        Ok(hits
            .into_iter()
            .map(|h| LayerResult { content: h.content, source: h.source, relevance: h.relevance, metadata: h.metadata })
            .collect())
    }

    async fn find_entity(&self, name: &str, group: &str) -> Result<Option<GraphEntity>> {
        let resp = self
            .client
            .get(format!("{}/entities", self.base_url))
            .query(&[("name", name), ("group", group)])
            .send()
            .await?;
        if resp.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        Ok(Some(resp.error_for_status()?.json().await?))
    }

    async fn create_entity(&self, name: &str, group: &str, entity_type: Option<&str>) -> Result<GraphEntity> {
        let uuid = Uuid::now_v7().to_string();
        let entity = GraphEntity {
            uuid: uuid.clone(),
            name: name.to_string(),
            group: group.to_string(),
            entity_type: entity_type.map(str::to_string),
        };
        self.client
            .post(format!("{}/entities", self.base_url))
            .json(&entity)
            .send()
            .await?
            .error_for_status()?;
        Ok(entity)
    }

    async fn find_edge(
        &self,
        source_uuid: &str,
        relation: &str,
        target_uuid: &str,
    ) -> Result<Option<GraphEdge>> {
        let resp = self
            .client
            .get(format!("{}/edges", self.base_url))
            .query(&[("source", source_uuid), ("relation", relation), ("target", target_uuid)])
            .send()
            .await?;
        if resp.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        Ok(Some(resp.error_for_status()?.json().await?))
    }

    async fn create_edge(
        &self,
        source_uuid: &str,
        relation: &str,
        target_uuid: &str,
        fact: Option<&str>,
    ) -> Result<GraphEdge> {
        let edge = GraphEdge {
            uuid: Uuid::now_v7().to_string(),
            source_uuid: source_uuid.to_string(),
            relation: relation.to_string(),
            target_uuid: target_uuid.to_string(),
            fact: fact.map(str::to_string),
            created_at: Utc::now(),
        };
        self.client
            .post(format!("{}/edges", self.base_url))
            .json(&edge)
            .send()
            .await?
            .error_for_status()?;
        Ok(edge)
    }

    async fn explore(&self, entity: &str, depth: u32) -> Result<Vec<LayerResult>> {
        #[derive(Deserialize)]
        struct Hit {
            content: String,
            source: String,
            relevance: f64,
            #[serde(default)]
            metadata: Value,
        }
        let hits: Vec<Hit> = self
            .client
            .get(format!("{}/explore", self.base_url))
            .query(&[("entity", entity), ("depth", &depth.to_string())])
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        Ok(hits
            .into_iter()
            .map(|h| LayerResult { content: h.content, source: h.source, relevance: h.relevance, metadata: h.metadata })
            .collect())
    }

    async fn timeline(
        &self,
        since: Option<DateTime<Utc>>,
        until: Option<DateTime<Utc>>,
        limit: usize,
    ) -> Result<Vec<GraphEdge>> {
        let since = since.map(|d| d.to_rfc3339()).unwrap_or_default();
        let until = until.map(|d| d.to_rfc3339()).unwrap_or_default();
        let edges: Vec<GraphEdge> = self
            .client
            .get(format!("{}/timeline", self.base_url))
            .query(&[("since", since.as_str()), ("until", until.as_str()), ("limit", &limit.to_string())])
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        Ok(edges)
    }

    async fn delete_edge(&self, uuid: &str) -> Result<()> {
        self.client
            .delete(format!("{}/edges/{uuid}", self.base_url))
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }

    async fn health(&self) -> Result<HealthStatus> {
        match self.client.get(format!("{}/health", self.base_url)).send().await {
            Ok(resp) if resp.status().is_success() => Ok(HealthStatus::ok("graph engine reachable")),
            Ok(resp) => Ok(HealthStatus::unavailable(format!("graph engine returned {}", resp.status()))),
            Err(e) => Ok(HealthStatus::unavailable(e.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    struct FakeGraphBackend {
        entities: Mutex<Vec<GraphEntity>>,
        edges: Mutex<Vec<GraphEdge>>,
    }

    impl FakeGraphBackend {
        fn new() -> Self {
            Self { entities: Mutex::new(Vec::new()), edges: Mutex::new(Vec::new()) }
        }
    }

    #[async_trait]
    impl GraphBackend for FakeGraphBackend {
        async fn ingest_episode(&self, _content: &str) -> Result<()> {
            Ok(())
        }
        async fn search(&self, _query: &str, _limit: usize) -> Result<Vec<LayerResult>> {
            Ok(Vec::new())
        }
        async fn find_entity(&self, name: &str, group: &str) -> Result<Option<GraphEntity>> {
            Ok(self.entities.lock().unwrap().iter().find(|e| e.name == name && e.group == group).cloned())
        }
        async fn create_entity(&self, name: &str, group: &str, entity_type: Option<&str>) -> Result<GraphEntity> {
            let entity = GraphEntity {
                uuid: Uuid::now_v7().to_string(),
                name: name.to_string(),
                group: group.to_string(),
                entity_type: entity_type.map(str::to_string),
            };
            self.entities.lock().unwrap().push(entity.clone());
            Ok(entity)
        }
        async fn find_edge(&self, source_uuid: &str, relation: &str, target_uuid: &str) -> Result<Option<GraphEdge>> {
            Ok(self
                .edges
                .lock()
                .unwrap()
                .iter()
                .find(|e| e.source_uuid == source_uuid && e.relation == relation && e.target_uuid == target_uuid)
                .cloned())
        }
        async fn create_edge(
            &self,
            source_uuid: &str,
            relation: &str,
            target_uuid: &str,
            fact: Option<&str>,
        ) -> Result<GraphEdge> {
            let edge = GraphEdge {
                uuid: Uuid::now_v7().to_string(),
                source_uuid: source_uuid.to_string(),
                relation: relation.to_string(),
                target_uuid: target_uuid.to_string(),
                fact: fact.map(str::to_string),
                created_at: Utc::now(),
            };
            self.edges.lock().unwrap().push(edge.clone());
            Ok(edge)
        }
        async fn explore(&self, _entity: &str, _depth: u32) -> Result<Vec<LayerResult>> {
            Ok(Vec::new())
        }
        async fn timeline(
            &self,
            _since: Option<DateTime<Utc>>,
            _until: Option<DateTime<Utc>>,
            _limit: usize,
        ) -> Result<Vec<GraphEdge>> {
            Ok(Vec::new())
        }
        async fn delete_edge(&self, uuid: &str) -> Result<()> {
            self.edges.lock().unwrap().retain(|e| e.uuid != uuid);
            Ok(())
        }
        async fn health(&self) -> Result<HealthStatus> {
            Ok(HealthStatus::ok("fake backend"))
        }
    }

    #[tokio::test]
    async fn add_triplet_reuses_entities_by_name_and_group() {
        let backend = Arc::new(FakeGraphBackend::new());
        let layer = GraphLayer::connect(backend.clone()).await.unwrap();

        layer.add_triplet("alice", "knows", "bob", None, None, None, "default").await.unwrap();
        layer.add_triplet("alice", "likes", "coffee", None, None, None, "default").await.unwrap();

        let entities = backend.entities.lock().unwrap();
        assert_eq!(entities.iter().filter(|e| e.name == "alice" && e.group == "default").count(), 1);
    }

    #[tokio::test]
    async fn add_triplet_returns_existing_edge_on_duplicate() {
        let backend = Arc::new(FakeGraphBackend::new());
        let layer = GraphLayer::connect(backend.clone()).await.unwrap();

        let first = layer.add_triplet("alice", "knows", "bob", None, None, None, "default").await.unwrap();
        let second = layer.add_triplet("alice", "knows", "bob", None, None, None, "default").await.unwrap();

        assert_eq!(first.uuid, second.uuid);
        assert_eq!(backend.edges.lock().unwrap().len(), 1);
    }
}
