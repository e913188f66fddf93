//! Core data models for the codectx pipeline.
//!
//! These types represent the source files, chunks, and search hits that flow
//! through the ingestion and retrieval pipeline.

use serde::Serialize;

/// One file's content at a point in time, as handed to the chunker.
/// Ephemeral; constructed per ingestion pass, never persisted directly.
#[derive(Debug, Clone)]
pub struct SourceUnit {
    pub repo: String,
    pub branch: String,
    pub commit: String,
    /// Path relative to the repository root, `/`-separated.
    pub rel_path: String,
    /// Lowercased file extension without the dot (e.g. `rs`, `py`).
    pub language: String,
    pub text: String,
}

/// A contiguous, possibly-overlapping slice of a source file's text.
///
/// `pk` equals `chunk_hash`: the SHA-256 of `"{repo}|{file_path}|{index}|{text}"`,
/// so identity is a pure function of content and position. Re-chunking
/// unchanged input always reproduces the same identities.
#[derive(Debug, Clone)]
pub struct Chunk {
    pub pk: String,
    pub repo: String,
    pub branch: String,
    pub commit: String,
    pub file_path: String,
    pub language: String,
    pub chunk_index: i64,
    pub chunk_hash: String,
    pub text: String,
}

/// The persisted form of a [`Chunk`] plus its embedding vector. Owned by the
/// vector index; never mutated in place — the pipeline deletes a file's
/// entries wholesale and re-inserts.
#[derive(Debug, Clone)]
pub struct IndexEntry {
    pub chunk: Chunk,
    pub embedding: Vec<f32>,
}

/// A raw search result from the index backend. `distance` follows the
/// collection's metric: higher-is-better for inner-product-style metrics,
/// lower-is-better for Euclidean.
#[derive(Debug, Clone)]
pub struct RawHit {
    pub chunk: Chunk,
    pub distance: f64,
}

/// A read-only projection of an index entry plus a normalized score.
/// `score` is always higher = more similar, regardless of metric.
#[derive(Debug, Clone, Serialize)]
pub struct SearchHit {
    pub pk: String,
    pub score: f64,
    pub repo: String,
    pub branch: String,
    pub commit: String,
    pub file_path: String,
    pub language: String,
    pub chunk_index: i64,
    pub chunk_hash: String,
    pub text: String,
}

impl SearchHit {
    pub fn from_chunk(chunk: Chunk, score: f64) -> Self {
        Self {
            pk: chunk.pk,
            score,
            repo: chunk.repo,
            branch: chunk.branch,
            commit: chunk.commit,
            file_path: chunk.file_path,
            language: chunk.language,
            chunk_index: chunk.chunk_index,
            chunk_hash: chunk.chunk_hash,
            text: chunk.text,
        }
    }
}

/// Counters reported by a completed sync run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SyncReport {
    pub files_touched: u64,
    pub chunks_written: u64,
}
