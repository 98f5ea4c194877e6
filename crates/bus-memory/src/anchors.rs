use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use serde_json::{json, Value};
use sha2::{Digest, Sha256};
use tracing::{debug, instrument};

use crate::error::{MemoryError, Result};
use crate::layer::MemoryLayer;
use crate::types::{AnchorListing, HealthStatus, LayerResult};
use crate::vector::VectorBackend;

fn content_hash(content: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content.as_bytes());
    hex::encode(hasher.finalize())
}

fn file_stem(path: &Path) -> Option<String> {
    path.file_stem().and_then(|s| s.to_str()).map(|s| s.to_string())
}

/// Layer L2: named markdown anchors on disk, synchronised into a vector
/// collection keyed by filename stem. Every `search` call re-syncs
/// disk→store first (add-on-miss, update-on-hash-mismatch, skip-on-match)
/// so a search always reflects what's currently on disk.
pub struct AnchorsLayer {
    dir: PathBuf,
    vector: Arc<dyn VectorBackend>,
}

impl AnchorsLayer {
    pub fn new(dir: impl Into<PathBuf>, vector: Arc<dyn VectorBackend>) -> Self {
        Self { dir: dir.into(), vector }
    }

    fn disk_files(&self) -> Result<Vec<PathBuf>> {
        if !self.dir.exists() {
            return Ok(Vec::new());
        }
        let mut files = Vec::new();
        for entry in std::fs::read_dir(&self.dir)? {
            let entry = entry?;
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) == Some("md") {
                files.push(path);
            }
        }
        Ok(files)
    }

    /// Synchronise disk → vector store: add files missing from the
    /// store, update ones whose content hash changed, leave the rest.
    #[instrument(skip(self))]
    pub async fn synchronise(&self) -> Result<()> {
        for path in self.disk_files()? {
            let Some(stem) = file_stem(&path) else { continue };
            let content = std::fs::read_to_string(&path)?;
            let hash = content_hash(&content);

            match self.vector.stored_hash(&stem).await? {
                None => {
                    debug!(anchor = %stem, "adding missing anchor to vector store");
                    self.vector.upsert(&stem, &content, &hash).await?;
                }
                Some(existing) if existing != hash => {
                    debug!(anchor = %stem, "anchor changed, updating vector store");
                    self.vector.upsert(&stem, &content, &hash).await?;
                }
                Some(_) => {}
            }
        }
        Ok(())
    }

    /// Write a new anchor file, named from `title` with a date prefix,
    /// then trigger a resync.
    pub async fn write_anchor(&self, title: &str, content: &str) -> Result<String> {
        std::fs::create_dir_all(&self.dir)?;
        let slug: String = title
            .to_lowercase()
            .chars()
            .map(|c| if c.is_alphanumeric() { c } else { '-' })
            .collect();
        let name = format!("{}-{}", Utc::now().format("%Y-%m-%d"), slug);
        let path = self.dir.join(format!("{name}.md"));
        std::fs::write(&path, content)?;
        self.synchronise().await?;
        Ok(name)
    }

    pub async fn delete(&self, name: &str) -> Result<()> {
        let path = self.dir.join(format!("{name}.md"));
        if path.exists() {
            std::fs::remove_file(&path)?;
        }
        self.vector.delete(name).await?;
        Ok(())
    }

    /// Drop the vector collection's view of this layer and rebuild it
    /// from scratch.
    pub async fn resync(&self) -> Result<()> {
        for key in self.vector.list_keys().await? {
            self.vector.delete(&key).await?;
        }
        self.synchronise().await
    }

    /// Best-effort read of an anchor's body by filename stem, for
    /// attaching the actual text to a search hit (the vector backend
    /// only echoes back the key it was given).
    fn read_body(&self, stem: &str) -> Option<String> {
        std::fs::read_to_string(self.dir.join(format!("{stem}.md"))).ok()
    }

    pub async fn list(&self) -> Result<AnchorListing> {
        let disk_files: Vec<String> =
            self.disk_files()?.iter().filter_map(|p| file_stem(p)).collect();
        let store_entries = self.vector.list_keys().await?;

        let orphans: Vec<String> =
            store_entries.iter().filter(|s| !disk_files.contains(s)).cloned().collect();
        let missing: Vec<String> =
            disk_files.iter().filter(|s| !store_entries.contains(s)).cloned().collect();
        let synced: Vec<String> =
            disk_files.iter().filter(|s| store_entries.contains(s)).cloned().collect();

        Ok(AnchorListing { disk_files, store_entries, orphans, missing, synced })
    }
}

#[async_trait]
impl MemoryLayer for AnchorsLayer {
    async fn search(&self, query: &str, limit: usize) -> Result<Vec<LayerResult>> {
        self.synchronise().await?;
        let hits = self.vector.query_by_text(query, limit).await?;
        Ok(hits
            .into_iter()
            .map(|hit| {
                let relevance = match hit.distance {
                    Some(d) => (1.0 - d / 2.0).max(0.0),
                    None => 1.0 / (1.0 + hit.rank as f64),
                };
                let content = self
                    .read_body(&hit.key)
                    .unwrap_or_else(|| hit.key.clone());
                LayerResult {
                    content,
                    source: format!("anchors:{}", hit.key),
                    relevance,
                    metadata: json!({ "anchor": hit.key }),
                }
            })
            .collect())
    }

    async fn store(&self, content: &str, metadata: Value) -> Result<bool> {
        let title = metadata
            .get("title")
            .and_then(|v| v.as_str())
            .ok_or_else(|| MemoryError::NotFound("anchor store requires a 'title' field".to_string()))?;
        self.write_anchor(title, content).await?;
        Ok(true)
    }

    async fn health(&self) -> HealthStatus {
        self.vector.health().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex as StdMutex;
    use tempfile::TempDir;

    struct FakeVectorBackend {
        points: StdMutex<Vec<(String, String, String)>>, // (key, content, hash)
    }

    impl FakeVectorBackend {
        fn new() -> Self {
            Self { points: StdMutex::new(Vec::new()) }
        }
    }

    #[async_trait]
    impl VectorBackend for FakeVectorBackend {
        async fn upsert(&self, key: &str, content: &str, content_hash: &str) -> Result<()> {
            let mut points = self.points.lock().unwrap();
            points.retain(|(k, _, _)| k != key);
            points.push((key.to_string(), content.to_string(), content_hash.to_string()));
            Ok(())
        }

        async fn query_by_text(&self, _query: &str, limit: usize) -> Result<Vec<crate::vector::VectorHit>> {
            let points = self.points.lock().unwrap();
            Ok(points
                .iter()
                .take(limit)
                .enumerate()
                .map(|(rank, (key, _, _))| crate::vector::VectorHit { key: key.clone(), distance: None, rank })
                .collect())
        }

        async fn delete(&self, key: &str) -> Result<()> {
            self.points.lock().unwrap().retain(|(k, _, _)| k != key);
            Ok(())
        }

        async fn list_keys(&self) -> Result<Vec<String>> {
            Ok(self.points.lock().unwrap().iter().map(|(k, _, _)| k.clone()).collect())
        }

        async fn stored_hash(&self, key: &str) -> Result<Option<String>> {
            Ok(self.points.lock().unwrap().iter().find(|(k, _, _)| k == key).map(|(_, _, h)| h.clone()))
        }

        async fn health(&self) -> HealthStatus {
            HealthStatus::ok("fake vector backend")
        }
    }

    #[tokio::test]
    async fn search_after_save_returns_saved_anchor_with_content() {
        let dir = TempDir::new().unwrap();
        let vector = Arc::new(FakeVectorBackend::new());
        let layer = AnchorsLayer::new(dir.path(), vector);

        layer.store("the spec calls this an anchor", json!({ "title": "My Anchor" })).await.unwrap();

        let hits = layer.search("anything", 10).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].content, "the spec calls this an anchor");
    }

    #[tokio::test]
    async fn synchronise_is_idempotent_on_unchanged_content() {
        let dir = TempDir::new().unwrap();
        let vector = Arc::new(FakeVectorBackend::new());
        let layer = AnchorsLayer::new(dir.path(), vector.clone());

        layer.write_anchor("stable", "unchanged body").await.unwrap();
        let hash_before = vector.points.lock().unwrap()[0].2.clone();
        layer.synchronise().await.unwrap();
        let hash_after = vector.points.lock().unwrap()[0].2.clone();
        assert_eq!(hash_before, hash_after);
        assert_eq!(vector.points.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn list_reports_orphans_and_missing() {
        let dir = TempDir::new().unwrap();
        let vector = Arc::new(FakeVectorBackend::new());
        let layer = AnchorsLayer::new(dir.path(), vector.clone());

        layer.write_anchor("on-disk-only", "body").await.unwrap();
        vector.upsert("orphan-only", "body", "hash").await.unwrap();

        let listing = layer.list().await.unwrap();
        assert!(listing.orphans.contains(&"orphan-only".to_string()));
        assert!(listing.synced.iter().any(|s| s.ends_with("on-disk-only")));
        assert!(listing.missing.is_empty());
    }
}
