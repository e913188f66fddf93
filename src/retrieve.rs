//! Metric-aware retrieval over the vector index.
//!
//! Delegates candidate search to the [`VectorIndex`], then normalizes raw
//! distances into one score space (higher = more similar, for every
//! metric), discards hits below the caller's threshold, ranks by
//! descending score with stable tie order, and caps the result at
//! [`MAX_CONTEXT_HITS`] to protect the downstream context budget.

use anyhow::Result;

use crate::embedding::{embed_query, Embedder};
use crate::models::{RawHit, SearchHit};
use crate::store::{Filter, Metric, VectorIndex};

/// Hard cap on returned hits, independent of the caller's `top_k` (which
/// only sizes the ANN candidate pool). A widened filter can never blow the
/// downstream context budget.
pub const MAX_CONTEXT_HITS: usize = 5;

/// Retrieve ranked context chunks for an embedded query.
///
/// Empty candidate sets and all-below-threshold results yield an empty
/// vector, never an error.
pub async fn retrieve(
    store: &dyn VectorIndex,
    query: &[f32],
    filter: &Filter,
    threshold: f64,
    top_k: usize,
    metric: Metric,
) -> Result<Vec<SearchHit>> {
    let raw = store.search(query, filter, top_k).await?;
    Ok(rank_hits(raw, metric, threshold))
}

/// Retrieve ranked context chunks for a query string, embedding it first.
#[allow(clippy::too_many_arguments)]
pub async fn search_text(
    store: &dyn VectorIndex,
    embedder: &dyn Embedder,
    query_text: &str,
    filter: &Filter,
    threshold: f64,
    top_k: usize,
    metric: Metric,
) -> Result<Vec<SearchHit>> {
    let query = embed_query(embedder, query_text).await?;
    retrieve(store, &query, filter, threshold, top_k, metric).await
}

/// Degrading wrapper for latency-sensitive callers: a retrieval failure is
/// reported as a warning and becomes "no context" instead of failing the
/// caller's request.
pub async fn retrieve_or_empty(
    store: &dyn VectorIndex,
    query: &[f32],
    filter: &Filter,
    threshold: f64,
    top_k: usize,
    metric: Metric,
) -> Vec<SearchHit> {
    match retrieve(store, query, filter, threshold, top_k, metric).await {
        Ok(hits) => hits,
        Err(e) => {
            eprintln!("Warning: context retrieval failed: {}", e);
            Vec::new()
        }
    }
}

/// Normalize, threshold, rank, and cap raw hits.
fn rank_hits(raw: Vec<RawHit>, metric: Metric, threshold: f64) -> Vec<SearchHit> {
    let mut hits: Vec<SearchHit> = raw
        .into_iter()
        .map(|hit| {
            let score = metric.score(hit.distance);
            SearchHit::from_chunk(hit.chunk, score)
        })
        .filter(|hit| hit.score >= threshold)
        .collect();

    // sort_by is stable: ties keep original retrieval order.
    hits.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    hits.truncate(MAX_CONTEXT_HITS);
    hits
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Chunk, IndexEntry};
    use crate::store::CollectionSpec;
    use anyhow::bail;
    use async_trait::async_trait;

    /// A backend whose every operation fails, as when the vector store is
    /// unreachable.
    struct FailingIndex;

    #[async_trait]
    impl VectorIndex for FailingIndex {
        async fn ensure_collection(&self, _spec: &CollectionSpec) -> Result<()> {
            bail!("backend unreachable")
        }
        async fn delete_by_file(&self, _repo: &str, _file_path: &str) -> Result<u64> {
            bail!("backend unreachable")
        }
        async fn insert_batch(&self, _entries: &[IndexEntry]) -> Result<()> {
            bail!("backend unreachable")
        }
        async fn flush(&self) -> Result<()> {
            bail!("backend unreachable")
        }
        async fn search(
            &self,
            _query: &[f32],
            _filter: &Filter,
            _limit: usize,
        ) -> Result<Vec<RawHit>> {
            bail!("backend unreachable")
        }
    }

    fn raw_hit(pk: &str, distance: f64) -> RawHit {
        RawHit {
            chunk: Chunk {
                pk: pk.to_string(),
                repo: "acme".to_string(),
                branch: "main".to_string(),
                commit: "c1".to_string(),
                file_path: format!("src/{}.py", pk),
                language: "py".to_string(),
                chunk_index: 0,
                chunk_hash: pk.to_string(),
                text: format!("text {}", pk),
            },
            distance,
        }
    }

    #[test]
    fn test_threshold_keeps_and_orders_survivors() {
        // Scores [0.95, 0.8, 0.92], threshold 0.9 => [0.95, 0.92].
        let raw = vec![raw_hit("a", 0.95), raw_hit("b", 0.8), raw_hit("c", 0.92)];
        let hits = rank_hits(raw, Metric::InnerProduct, 0.9);
        let scores: Vec<f64> = hits.iter().map(|h| h.score).collect();
        assert_eq!(scores, vec![0.95, 0.92]);
        assert_eq!(hits[0].pk, "a");
        assert_eq!(hits[1].pk, "c");
    }

    #[test]
    fn test_below_threshold_never_appears() {
        let raw = vec![raw_hit("a", 0.89999), raw_hit("b", 0.9)];
        let hits = rank_hits(raw, Metric::InnerProduct, 0.9);
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].pk, "b");
    }

    #[test]
    fn test_euclidean_scores_negated_and_monotonic() {
        // Smaller raw distance must rank first with a higher score.
        let raw = vec![raw_hit("far", 2.0), raw_hit("near", 0.5)];
        let hits = rank_hits(raw, Metric::Euclidean, f64::NEG_INFINITY);
        assert_eq!(hits[0].pk, "near");
        assert_eq!(hits[0].score, -0.5);
        assert_eq!(hits[1].score, -2.0);
        assert!(hits[0].score > hits[1].score);
    }

    #[test]
    fn test_inner_product_score_unchanged() {
        let raw = vec![raw_hit("a", 0.42)];
        let hits = rank_hits(raw, Metric::InnerProduct, 0.0);
        assert_eq!(hits[0].score, 0.42);
    }

    #[test]
    fn test_cap_applies_regardless_of_candidate_count() {
        let raw: Vec<RawHit> = (0..20)
            .map(|i| raw_hit(&format!("h{}", i), 1.0 - (i as f64) * 0.01))
            .collect();
        let hits = rank_hits(raw, Metric::InnerProduct, 0.0);
        assert_eq!(hits.len(), MAX_CONTEXT_HITS);
        assert_eq!(hits[0].pk, "h0");
    }

    #[test]
    fn test_ties_keep_retrieval_order() {
        let raw = vec![raw_hit("first", 0.5), raw_hit("second", 0.5)];
        let hits = rank_hits(raw, Metric::InnerProduct, 0.0);
        assert_eq!(hits[0].pk, "first");
        assert_eq!(hits[1].pk, "second");
    }

    #[test]
    fn test_empty_input_yields_empty_output() {
        let hits = rank_hits(Vec::new(), Metric::Cosine, 0.9);
        assert!(hits.is_empty());
    }

    #[tokio::test]
    async fn test_failed_search_degrades_to_no_context() {
        let hits = retrieve_or_empty(
            &FailingIndex,
            &[1.0, 0.0],
            &Filter::default(),
            0.0,
            5,
            Metric::InnerProduct,
        )
        .await;
        assert!(hits.is_empty());
    }
}
