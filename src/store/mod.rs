//! Vector index abstraction for the codectx pipeline.
//!
//! The [`VectorIndex`] trait is the full contract the pipeline has with its
//! vector database backend: collection lifecycle, filtered delete, batched
//! insert, a flush visibility barrier, and filtered approximate search.
//! The crate bundles two implementations: a durable SQLite backend
//! ([`sqlite::SqliteIndex`]) and an in-memory backend
//! ([`memory::MemoryIndex`]) used by tests.
//!
//! # Operations
//!
//! | Method | Purpose |
//! |--------|---------|
//! | [`ensure_collection`](VectorIndex::ensure_collection) | Idempotent collection + index creation |
//! | [`delete_by_file`](VectorIndex::delete_by_file) | Retire a file's entire chunk set |
//! | [`insert_batch`](VectorIndex::insert_batch) | One batched write of entries + vectors |
//! | [`flush`](VectorIndex::flush) | Make prior writes visible to reads |
//! | [`search`](VectorIndex::search) | Filtered similarity search |

pub mod memory;
pub mod sqlite;

use anyhow::{bail, Result};
use async_trait::async_trait;

use crate::models::{Chunk, IndexEntry, RawHit};

/// Distance metric of a collection's embedding index.
///
/// Scoring is polymorphic over the metric kind: each variant knows how its
/// raw distance maps onto the uniform "higher = more similar" score space.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Metric {
    InnerProduct,
    Cosine,
    Euclidean,
}

impl Metric {
    pub fn parse(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "ip" => Ok(Metric::InnerProduct),
            "cosine" => Ok(Metric::Cosine),
            "l2" => Ok(Metric::Euclidean),
            other => bail!("Unknown metric: '{}'. Must be ip, cosine, or l2.", other),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Metric::InnerProduct => "ip",
            Metric::Cosine => "cosine",
            Metric::Euclidean => "l2",
        }
    }

    /// Whether a smaller raw distance means more similar.
    pub fn smaller_is_better(&self) -> bool {
        matches!(self, Metric::Euclidean)
    }

    /// Map a raw distance into the uniform score space where higher is
    /// always more similar: identity for similarity metrics, negation for
    /// Euclidean-style distance.
    pub fn score(&self, raw: f64) -> f64 {
        if self.smaller_is_better() {
            -raw
        } else {
            raw
        }
    }

    /// Raw distance between two vectors under this metric.
    pub fn distance(&self, a: &[f32], b: &[f32]) -> f64 {
        match self {
            Metric::InnerProduct => dot(a, b),
            Metric::Cosine => cosine_similarity(a, b),
            Metric::Euclidean => {
                if a.len() != b.len() {
                    return f64::INFINITY;
                }
                a.iter()
                    .zip(b.iter())
                    .map(|(x, y)| {
                        let d = (x - y) as f64;
                        d * d
                    })
                    .sum::<f64>()
                    .sqrt()
            }
        }
    }
}

fn dot(a: &[f32], b: &[f32]) -> f64 {
    if a.len() != b.len() {
        return 0.0;
    }
    a.iter().zip(b.iter()).map(|(x, y)| (x * y) as f64).sum()
}

/// Cosine similarity in `[-1, 1]`; `0.0` for empty or mismatched vectors.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f64 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let mut dot = 0.0f64;
    let mut norm_a = 0.0f64;
    let mut norm_b = 0.0f64;
    for (x, y) in a.iter().zip(b.iter()) {
        dot += (x * y) as f64;
        norm_a += (x * x) as f64;
        norm_b += (y * y) as f64;
    }
    let denom = norm_a.sqrt() * norm_b.sqrt();
    if denom < f64::EPSILON {
        return 0.0;
    }
    dot / denom
}

/// Fixed graph-ANN build parameters, recorded with the collection.
/// Not tunable per call: chosen once to balance build time against recall.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IndexParams {
    /// Bounded node degree of the ANN graph.
    pub m: u32,
    /// Bounded construction-time search width.
    pub ef_construction: u32,
}

impl Default for IndexParams {
    fn default() -> Self {
        Self {
            m: 16,
            ef_construction: 200,
        }
    }
}

/// Everything needed to create (or re-open) the logical collection.
#[derive(Debug, Clone)]
pub struct CollectionSpec {
    pub name: String,
    pub dim: usize,
    pub metric: Metric,
    pub index: IndexParams,
}

impl CollectionSpec {
    pub fn new(name: &str, dim: usize, metric: Metric) -> Self {
        Self {
            name: name.to_string(),
            dim,
            metric,
            index: IndexParams::default(),
        }
    }
}

/// Conjunctive filter built from optional predicates.
///
/// Represented as structured fields rather than an expression string so
/// backends can push predicates down safely (no injection) and filter
/// combinations stay testable. `include_file_paths` OR-combines internally
/// and AND-combines with the rest.
#[derive(Debug, Clone, Default)]
pub struct Filter {
    pub repo: Option<String>,
    pub branch: Option<String>,
    pub language: Option<String>,
    pub exclude_file_path: Option<String>,
    pub include_file_paths: Vec<String>,
}

impl Filter {
    pub fn is_empty(&self) -> bool {
        self.repo.is_none()
            && self.branch.is_none()
            && self.language.is_none()
            && self.exclude_file_path.is_none()
            && self.include_file_paths.is_empty()
    }

    /// Evaluate the filter against one chunk's metadata.
    pub fn matches(&self, chunk: &Chunk) -> bool {
        if let Some(ref repo) = self.repo {
            if &chunk.repo != repo {
                return false;
            }
        }
        if let Some(ref branch) = self.branch {
            if &chunk.branch != branch {
                return false;
            }
        }
        if let Some(ref language) = self.language {
            if &chunk.language != language {
                return false;
            }
        }
        if let Some(ref excluded) = self.exclude_file_path {
            if &chunk.file_path == excluded {
                return false;
            }
        }
        if !self.include_file_paths.is_empty()
            && !self.include_file_paths.iter().any(|p| p == &chunk.file_path)
        {
            return false;
        }
        true
    }
}

/// Abstract vector database backend.
///
/// Write contract: a failed batch insert aborts the remaining batches of
/// the call without rolling back already-committed batches (at-least-once).
/// Reads are only guaranteed to observe writes after a [`flush`](VectorIndex::flush).
#[async_trait]
pub trait VectorIndex: Send + Sync {
    /// Idempotent: creates the collection, its embedding index, and the
    /// scalar filter indexes if absent; otherwise a no-op handle re-open.
    /// Fatal (not retried) when the backend is unreachable.
    async fn ensure_collection(&self, spec: &CollectionSpec) -> Result<()>;

    /// Remove every entry whose `repo` and `file_path` match exactly.
    /// Returns the number of entries retired.
    async fn delete_by_file(&self, repo: &str, file_path: &str) -> Result<u64>;

    /// Insert a batch of entries with their vectors as one write.
    async fn insert_batch(&self, entries: &[IndexEntry]) -> Result<()>;

    /// Durability/visibility barrier: after this returns, prior deletes and
    /// inserts are visible to `search`.
    async fn flush(&self) -> Result<()>;

    /// Approximate similarity search constrained by `filter`, returning at
    /// most `limit` hits with raw metric-dependent distances, best first.
    async fn search(&self, query: &[f32], filter: &Filter, limit: usize) -> Result<Vec<RawHit>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chunk(repo: &str, branch: &str, language: &str, file_path: &str) -> Chunk {
        Chunk {
            pk: "pk".to_string(),
            repo: repo.to_string(),
            branch: branch.to_string(),
            commit: "c1".to_string(),
            file_path: file_path.to_string(),
            language: language.to_string(),
            chunk_index: 0,
            chunk_hash: "pk".to_string(),
            text: String::new(),
        }
    }

    #[test]
    fn test_metric_parse_roundtrip() {
        for s in ["ip", "cosine", "l2", "IP", "L2"] {
            let m = Metric::parse(s).unwrap();
            assert_eq!(Metric::parse(m.as_str()).unwrap(), m);
        }
        assert!(Metric::parse("hamming").is_err());
    }

    #[test]
    fn test_score_direction_uniform() {
        // Euclidean: smaller raw distance => higher score.
        assert!(Metric::Euclidean.score(0.2) > Metric::Euclidean.score(0.9));
        // Inner product: raw value is the score, unchanged.
        assert_eq!(Metric::InnerProduct.score(0.73), 0.73);
        assert_eq!(Metric::Cosine.score(-0.1), -0.1);
    }

    #[test]
    fn test_euclidean_distance() {
        let d = Metric::Euclidean.distance(&[0.0, 0.0], &[3.0, 4.0]);
        assert!((d - 5.0).abs() < 1e-9);
    }

    #[test]
    fn test_cosine_identical_and_orthogonal() {
        let v = [1.0f32, 2.0, 3.0];
        assert!((cosine_similarity(&v, &v) - 1.0).abs() < 1e-6);
        assert!(cosine_similarity(&[1.0, 0.0], &[0.0, 1.0]).abs() < 1e-6);
        assert_eq!(cosine_similarity(&[], &[]), 0.0);
    }

    #[test]
    fn test_filter_conjunction() {
        let filter = Filter {
            repo: Some("acme".to_string()),
            language: Some("py".to_string()),
            ..Filter::default()
        };
        assert!(filter.matches(&chunk("acme", "main", "py", "src/a.py")));
        assert!(!filter.matches(&chunk("other", "main", "py", "src/a.py")));
        assert!(!filter.matches(&chunk("acme", "main", "rs", "src/a.rs")));
    }

    #[test]
    fn test_filter_exclude_path() {
        let filter = Filter {
            exclude_file_path: Some("src/current.py".to_string()),
            ..Filter::default()
        };
        assert!(!filter.matches(&chunk("acme", "main", "py", "src/current.py")));
        assert!(filter.matches(&chunk("acme", "main", "py", "src/other.py")));
    }

    #[test]
    fn test_filter_include_set_or_combined() {
        let filter = Filter {
            include_file_paths: vec!["src/a.py".to_string(), "src/b.py".to_string()],
            ..Filter::default()
        };
        assert!(filter.matches(&chunk("acme", "main", "py", "src/a.py")));
        assert!(filter.matches(&chunk("acme", "main", "py", "src/b.py")));
        assert!(!filter.matches(&chunk("acme", "main", "py", "src/c.py")));
    }

    #[test]
    fn test_empty_filter_matches_everything() {
        let filter = Filter::default();
        assert!(filter.is_empty());
        assert!(filter.matches(&chunk("any", "b", "go", "x/y.go")));
    }
}
