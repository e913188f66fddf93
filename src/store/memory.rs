//! In-memory [`VectorIndex`] implementation.
//!
//! Models the backend contract precisely, including flush-gated
//! visibility: inserts and deletes are staged in pending buffers and only
//! become observable to `search` after [`flush`](VectorIndex::flush).
//! Search is a brute-force scored scan over all visible entries.
//!
//! Used by the test suite and for embedded, non-durable deployments.

use std::sync::RwLock;

use anyhow::{bail, Result};
use async_trait::async_trait;

use crate::models::{IndexEntry, RawHit};

use super::{CollectionSpec, Filter, VectorIndex};

#[derive(Default)]
struct State {
    spec: Option<CollectionSpec>,
    visible: Vec<IndexEntry>,
    pending_inserts: Vec<IndexEntry>,
    pending_deletes: Vec<(String, String)>,
}

/// In-memory vector index with staged write visibility.
pub struct MemoryIndex {
    state: RwLock<State>,
}

impl MemoryIndex {
    pub fn new() -> Self {
        Self {
            state: RwLock::new(State::default()),
        }
    }

    /// Number of entries currently visible to search.
    pub fn visible_len(&self) -> usize {
        self.state.read().unwrap().visible.len()
    }
}

impl Default for MemoryIndex {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl VectorIndex for MemoryIndex {
    async fn ensure_collection(&self, spec: &CollectionSpec) -> Result<()> {
        let mut state = self.state.write().unwrap();
        match &state.spec {
            // Existing collection is returned unchanged.
            Some(existing) if existing.name == spec.name => {}
            Some(existing) => bail!(
                "Index already holds collection '{}', cannot create '{}'",
                existing.name,
                spec.name
            ),
            None => state.spec = Some(spec.clone()),
        }
        Ok(())
    }

    async fn delete_by_file(&self, repo: &str, file_path: &str) -> Result<u64> {
        let mut state = self.state.write().unwrap();
        if state.spec.is_none() {
            bail!("Collection not initialized");
        }
        let retired = state
            .visible
            .iter()
            .filter(|e| e.chunk.repo == repo && e.chunk.file_path == file_path)
            .count() as u64;
        state
            .pending_deletes
            .push((repo.to_string(), file_path.to_string()));
        Ok(retired)
    }

    async fn insert_batch(&self, entries: &[IndexEntry]) -> Result<()> {
        if entries.is_empty() {
            return Ok(());
        }
        let mut state = self.state.write().unwrap();
        let dim = match &state.spec {
            Some(spec) => spec.dim,
            None => bail!("Collection not initialized"),
        };
        for entry in entries {
            if entry.embedding.len() != dim {
                bail!(
                    "Embedding dimension mismatch: expected {}, got {}",
                    dim,
                    entry.embedding.len()
                );
            }
        }
        state.pending_inserts.extend(entries.iter().cloned());
        Ok(())
    }

    async fn flush(&self) -> Result<()> {
        let mut state = self.state.write().unwrap();
        let deletes = std::mem::take(&mut state.pending_deletes);
        for (repo, file_path) in &deletes {
            state
                .visible
                .retain(|e| !(e.chunk.repo == *repo && e.chunk.file_path == *file_path));
        }
        let inserts = std::mem::take(&mut state.pending_inserts);
        state.visible.extend(inserts);
        Ok(())
    }

    async fn search(&self, query: &[f32], filter: &Filter, limit: usize) -> Result<Vec<RawHit>> {
        let state = self.state.read().unwrap();
        let metric = match &state.spec {
            Some(spec) => spec.metric,
            None => bail!("Collection not initialized"),
        };

        let mut hits: Vec<RawHit> = state
            .visible
            .iter()
            .filter(|e| filter.matches(&e.chunk))
            .map(|e| RawHit {
                chunk: e.chunk.clone(),
                distance: metric.distance(query, &e.embedding),
            })
            .collect();

        if metric.smaller_is_better() {
            hits.sort_by(|a, b| {
                a.distance
                    .partial_cmp(&b.distance)
                    .unwrap_or(std::cmp::Ordering::Equal)
            });
        } else {
            hits.sort_by(|a, b| {
                b.distance
                    .partial_cmp(&a.distance)
                    .unwrap_or(std::cmp::Ordering::Equal)
            });
        }
        hits.truncate(limit);
        Ok(hits)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Chunk;
    use crate::store::Metric;

    fn entry(repo: &str, file_path: &str, index: i64, vec: Vec<f32>) -> IndexEntry {
        let pk = format!("{}:{}:{}", repo, file_path, index);
        IndexEntry {
            chunk: Chunk {
                pk: pk.clone(),
                repo: repo.to_string(),
                branch: "main".to_string(),
                commit: "c1".to_string(),
                file_path: file_path.to_string(),
                language: "py".to_string(),
                chunk_index: index,
                chunk_hash: pk,
                text: format!("chunk {}", index),
            },
            embedding: vec,
        }
    }

    async fn index_with_collection(metric: Metric) -> MemoryIndex {
        let index = MemoryIndex::new();
        index
            .ensure_collection(&CollectionSpec::new("code_chunks", 2, metric))
            .await
            .unwrap();
        index
    }

    #[tokio::test]
    async fn test_ensure_collection_idempotent() {
        let index = index_with_collection(Metric::InnerProduct).await;
        let spec = CollectionSpec::new("code_chunks", 2, Metric::InnerProduct);
        index.ensure_collection(&spec).await.unwrap();
        index.ensure_collection(&spec).await.unwrap();
    }

    #[tokio::test]
    async fn test_writes_invisible_until_flush() {
        let index = index_with_collection(Metric::InnerProduct).await;
        index
            .insert_batch(&[entry("acme", "src/a.py", 0, vec![1.0, 0.0])])
            .await
            .unwrap();

        let before = index
            .search(&[1.0, 0.0], &Filter::default(), 10)
            .await
            .unwrap();
        assert!(before.is_empty(), "insert visible before flush");

        index.flush().await.unwrap();
        let after = index
            .search(&[1.0, 0.0], &Filter::default(), 10)
            .await
            .unwrap();
        assert_eq!(after.len(), 1);
    }

    #[tokio::test]
    async fn test_delete_by_file_exact_match_only() {
        let index = index_with_collection(Metric::InnerProduct).await;
        index
            .insert_batch(&[
                entry("acme", "src/a.py", 0, vec![1.0, 0.0]),
                entry("acme", "src/a.py", 1, vec![0.0, 1.0]),
                entry("acme", "src/b.py", 0, vec![1.0, 1.0]),
            ])
            .await
            .unwrap();
        index.flush().await.unwrap();

        index.delete_by_file("acme", "src/a.py").await.unwrap();
        index.flush().await.unwrap();

        let hits = index
            .search(&[1.0, 0.0], &Filter::default(), 10)
            .await
            .unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].chunk.file_path, "src/b.py");
    }

    #[tokio::test]
    async fn test_dimension_mismatch_rejected() {
        let index = index_with_collection(Metric::InnerProduct).await;
        let result = index
            .insert_batch(&[entry("acme", "src/a.py", 0, vec![1.0, 0.0, 0.5])])
            .await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_search_orders_by_metric_direction() {
        let index = index_with_collection(Metric::Euclidean).await;
        index
            .insert_batch(&[
                entry("acme", "src/a.py", 0, vec![0.0, 0.0]),
                entry("acme", "src/b.py", 0, vec![3.0, 4.0]),
            ])
            .await
            .unwrap();
        index.flush().await.unwrap();

        let hits = index
            .search(&[0.0, 0.0], &Filter::default(), 10)
            .await
            .unwrap();
        // Euclidean: nearest first.
        assert_eq!(hits[0].chunk.file_path, "src/a.py");
        assert!(hits[0].distance < hits[1].distance);
    }

    #[tokio::test]
    async fn test_search_applies_filter_pushdown() {
        let index = index_with_collection(Metric::InnerProduct).await;
        index
            .insert_batch(&[
                entry("acme", "src/a.py", 0, vec![1.0, 0.0]),
                entry("other", "src/a.py", 0, vec![1.0, 0.0]),
            ])
            .await
            .unwrap();
        index.flush().await.unwrap();

        let filter = Filter {
            repo: Some("acme".to_string()),
            ..Filter::default()
        };
        let hits = index.search(&[1.0, 0.0], &filter, 10).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].chunk.repo, "acme");
    }

    #[tokio::test]
    async fn test_empty_batch_is_noop() {
        let index = index_with_collection(Metric::InnerProduct).await;
        index.insert_batch(&[]).await.unwrap();
        index.flush().await.unwrap();
        assert_eq!(index.visible_len(), 0);
    }
}
