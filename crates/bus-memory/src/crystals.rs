use std::path::PathBuf;
use std::sync::Mutex;

use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::instrument;

use crate::error::{MemoryError, Result};
use crate::layer::MemoryLayer;
use crate::types::{HealthStatus, LayerResult};

/// Layer L4: numbered markdown documents. The current set is capped at
/// `max_current`; `store` archives the lowest-numbered file when the cap
/// is exceeded. Older crystals are append-only history — `delete_latest`
/// is the only deletion operation.
pub struct CrystalsLayer {
    dir: PathBuf,
    archive_dir: PathBuf,
    max_current: usize,
    next_number: Mutex<u64>,
}

fn crystal_number(path: &std::path::Path) -> Option<u64> {
    path.file_stem()?.to_str()?.parse().ok()
}

impl CrystalsLayer {
    pub fn new(dir: impl Into<PathBuf>, max_current: usize) -> Result<Self> {
        let dir = dir.into();
        let archive_dir = dir.join("archive");
        std::fs::create_dir_all(&dir)?;
        std::fs::create_dir_all(&archive_dir)?;

        let next_number = current_numbers(&dir)?.into_iter().max().map(|n| n + 1).unwrap_or(1);
        Ok(Self { dir, archive_dir, max_current, next_number: Mutex::new(next_number) })
    }

    fn current_sorted(&self) -> Result<Vec<(u64, PathBuf)>> {
        let mut entries: Vec<(u64, PathBuf)> = std::fs::read_dir(&self.dir)?
            .filter_map(|e| e.ok())
            .map(|e| e.path())
            .filter(|p| p.is_file())
            .filter_map(|p| crystal_number(&p).map(|n| (n, p)))
            .collect();
        entries.sort_by_key(|(n, _)| *n);
        Ok(entries)
    }

    #[instrument(skip(self, content))]
    pub fn write(&self, content: &str) -> Result<u64> {
        let number = {
            let mut next = self.next_number.lock().unwrap();
            let n = *next;
            *next += 1;
            n
        };
        let path = self.dir.join(format!("{number:06}.md"));
        std::fs::write(&path, content)?;

        let current = self.current_sorted()?;
        if current.len() > self.max_current {
            if let Some((_, oldest_path)) = current.first() {
                let dest = self.archive_dir.join(oldest_path.file_name().unwrap());
                std::fs::rename(oldest_path, dest)?;
            }
        }
        Ok(number)
    }

    /// Delete the highest-numbered current crystal. Any earlier crystal
    /// is append-only history and cannot be removed this way.
    pub fn delete_latest(&self) -> Result<()> {
        let current = self.current_sorted()?;
        let Some((_, path)) = current.last() else {
            return Err(MemoryError::NotFound("no current crystals to delete".to_string()));
        };
        std::fs::remove_file(path)?;
        Ok(())
    }
}

fn current_numbers(dir: &std::path::Path) -> Result<Vec<u64>> {
    if !dir.exists() {
        return Ok(Vec::new());
    }
    Ok(std::fs::read_dir(dir)?
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .filter(|p| p.is_file())
        .filter_map(|p| crystal_number(&p))
        .collect())
}

#[async_trait]
impl MemoryLayer for CrystalsLayer {
    /// Returns the `limit` highest-numbered current crystals in
    /// ascending order (chronological context); `query` is ignored —
    /// crystals are recency-ordered, not relevance-ranked.
    async fn search(&self, _query: &str, limit: usize) -> Result<Vec<LayerResult>> {
        let mut current = self.current_sorted()?;
        let total = current.len();
        if total > limit {
            current = current.split_off(total - limit);
        }
        current
            .into_iter()
            .map(|(number, path)| {
                let content = std::fs::read_to_string(&path)?;
                Ok(LayerResult {
                    content,
                    source: format!("crystal:{number}"),
                    relevance: 1.0,
                    metadata: json!({ "number": number }),
                })
            })
            .collect()
    }

    async fn store(&self, content: &str, _metadata: Value) -> Result<bool> {
        self.write(content)?;
        Ok(true)
    }

    async fn health(&self) -> HealthStatus {
        if self.dir.exists() {
            HealthStatus::ok("crystals directory present")
        } else {
            HealthStatus::unavailable("crystals directory missing")
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn store_allocates_increasing_numbers() {
        let dir = TempDir::new().unwrap();
        let layer = CrystalsLayer::new(dir.path(), 4).unwrap();
        let a = layer.write("first").unwrap();
        let b = layer.write("second").unwrap();
        assert!(b > a);
    }

    #[test]
    fn overflow_archives_lowest_numbered_file() {
        let dir = TempDir::new().unwrap();
        let layer = CrystalsLayer::new(dir.path(), 2).unwrap();
        layer.write("one").unwrap();
        layer.write("two").unwrap();
        layer.write("three").unwrap();

        let current = layer.current_sorted().unwrap();
        assert_eq!(current.len(), 2);
        assert!(std::fs::read_dir(dir.path().join("archive")).unwrap().count() == 1);
    }

    #[test]
    fn delete_latest_removes_highest_numbered_only() {
        let dir = TempDir::new().unwrap();
        let layer = CrystalsLayer::new(dir.path(), 4).unwrap();
        layer.write("one").unwrap();
        layer.write("two").unwrap();
        layer.delete_latest().unwrap();

        let current = layer.current_sorted().unwrap();
        assert_eq!(current.len(), 1);
    }
}
