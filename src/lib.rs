//! # codectx
//!
//! A code-context retrieval pipeline for retrieval-augmented code
//! completion. codectx indexes source repositories into a searchable
//! vector collection and serves ranked, bounded context blocks to a
//! latency-sensitive completion generator.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐   ┌──────────────┐   ┌──────────────┐
//! │ Synchronizer │──▶│   Chunker    │──▶│ VectorIndex  │
//! │ scope+orders │   │ split+ident. │   │ del/ins/flush│
//! └──────────────┘   └──────────────┘   └──────┬───────┘
//!                                              │
//!                        ┌─────────────────────┤
//!                        ▼                     ▼
//!                  ┌───────────┐        ┌────────────┐
//!                  │ Retriever │───────▶│  Context   │
//!                  │ score+cap │        │ Assembler  │
//!                  └───────────┘        └────────────┘
//! ```
//!
//! Ingestion is delete-before-insert per file and keyed by
//! content-addressed chunk identity, so repeated partial re-ingestions
//! leave no duplicates and no orphans. Retrieval normalizes every
//! distance metric into one "higher = more similar" score space before
//! thresholding and ranking.
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`models`] | Core data types |
//! | [`chunk`] | Layered-boundary chunking with deterministic identity |
//! | [`store`] | Vector index contract + SQLite and in-memory backends |
//! | [`ingest`] | Scope resolution and the sync delete/insert cycle |
//! | [`embedding`] | Embedding collaborator abstraction |
//! | [`retrieve`] | Metric-aware scoring, thresholding, ranking |
//! | [`context`] | RAG context block assembly |
//! | [`generate`] | Generation collaborator contract (FIM prompts, stop strings) |
//! | [`db`] | Database connection |

pub mod chunk;
pub mod config;
pub mod context;
pub mod db;
pub mod embedding;
pub mod generate;
pub mod ingest;
pub mod models;
pub mod retrieve;
pub mod store;
