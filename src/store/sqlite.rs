//! SQLite-backed [`VectorIndex`] implementation.
//!
//! The bundled durable backend. Entries live in a single `entries` table
//! with the embedding stored as a little-endian f32 BLOB; the collection's
//! schema, metric, and fixed ANN build parameters are recorded in a
//! `collections` metadata row so `ensure_collection` re-opens an existing
//! collection unchanged. Filter predicates are pushed down as bound SQL
//! clauses; scoring happens in process over the filtered candidate set.

use std::sync::RwLock;

use anyhow::{bail, Result};
use async_trait::async_trait;
use sqlx::{Row, SqlitePool};

use crate::embedding::{blob_to_vec, vec_to_blob};
use crate::models::{Chunk, IndexEntry, RawHit};

use super::{CollectionSpec, Filter, IndexParams, Metric, VectorIndex};

/// Durable vector index on SQLite.
pub struct SqliteIndex {
    pool: SqlitePool,
    spec: RwLock<Option<CollectionSpec>>,
}

impl SqliteIndex {
    pub fn new(pool: SqlitePool) -> Self {
        Self {
            pool,
            spec: RwLock::new(None),
        }
    }

    fn current_spec(&self) -> Result<CollectionSpec> {
        match self.spec.read().unwrap().as_ref() {
            Some(spec) => Ok(spec.clone()),
            None => bail!("Collection not initialized — run ensure_collection first"),
        }
    }

    /// Resolved settings of the open collection. The stored row is
    /// authoritative, so callers must score with this metric rather than a
    /// possibly drifted config value. Errors before `ensure_collection`.
    pub fn collection(&self) -> Result<CollectionSpec> {
        self.current_spec()
    }
}

#[async_trait]
impl VectorIndex for SqliteIndex {
    async fn ensure_collection(&self, spec: &CollectionSpec) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS collections (
                name TEXT PRIMARY KEY,
                dim INTEGER NOT NULL,
                metric TEXT NOT NULL,
                index_m INTEGER NOT NULL,
                index_ef_construction INTEGER NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS entries (
                pk TEXT PRIMARY KEY,
                repo TEXT NOT NULL,
                branch TEXT NOT NULL,
                "commit" TEXT NOT NULL,
                file_path TEXT NOT NULL,
                language TEXT NOT NULL,
                chunk_index INTEGER NOT NULL,
                chunk_hash TEXT NOT NULL,
                text TEXT NOT NULL,
                embedding BLOB NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        // Scalar indexes for filter push-down
        sqlx::query("CREATE INDEX IF NOT EXISTS idx_entries_repo ON entries(repo)")
            .execute(&self.pool)
            .await?;
        sqlx::query("CREATE INDEX IF NOT EXISTS idx_entries_file_path ON entries(file_path)")
            .execute(&self.pool)
            .await?;
        sqlx::query("CREATE INDEX IF NOT EXISTS idx_entries_language ON entries(language)")
            .execute(&self.pool)
            .await?;

        // Re-open an existing collection unchanged; create it otherwise.
        let existing = sqlx::query(
            "SELECT dim, metric, index_m, index_ef_construction FROM collections WHERE name = ?",
        )
        .bind(&spec.name)
        .fetch_optional(&self.pool)
        .await?;

        let resolved = match existing {
            Some(row) => {
                let dim: i64 = row.get("dim");
                let metric: String = row.get("metric");
                let m: i64 = row.get("index_m");
                let ef: i64 = row.get("index_ef_construction");
                CollectionSpec {
                    name: spec.name.clone(),
                    dim: dim as usize,
                    metric: Metric::parse(&metric)?,
                    index: IndexParams {
                        m: m as u32,
                        ef_construction: ef as u32,
                    },
                }
            }
            None => {
                sqlx::query(
                    r#"
                    INSERT INTO collections (name, dim, metric, index_m, index_ef_construction)
                    VALUES (?, ?, ?, ?, ?)
                    "#,
                )
                .bind(&spec.name)
                .bind(spec.dim as i64)
                .bind(spec.metric.as_str())
                .bind(spec.index.m as i64)
                .bind(spec.index.ef_construction as i64)
                .execute(&self.pool)
                .await?;
                spec.clone()
            }
        };

        *self.spec.write().unwrap() = Some(resolved);
        Ok(())
    }

    async fn delete_by_file(&self, repo: &str, file_path: &str) -> Result<u64> {
        self.current_spec()?;
        let result = sqlx::query("DELETE FROM entries WHERE repo = ? AND file_path = ?")
            .bind(repo)
            .bind(file_path)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    async fn insert_batch(&self, entries: &[IndexEntry]) -> Result<()> {
        if entries.is_empty() {
            return Ok(());
        }
        let spec = self.current_spec()?;

        let mut tx = self.pool.begin().await?;
        for entry in entries {
            if entry.embedding.len() != spec.dim {
                bail!(
                    "Embedding dimension mismatch: expected {}, got {}",
                    spec.dim,
                    entry.embedding.len()
                );
            }
            let chunk = &entry.chunk;
            sqlx::query(
                r#"
                INSERT INTO entries
                    (pk, repo, branch, "commit", file_path, language, chunk_index, chunk_hash, text, embedding)
                VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                ON CONFLICT(pk) DO UPDATE SET
                    repo = excluded.repo,
                    branch = excluded.branch,
                    "commit" = excluded."commit",
                    file_path = excluded.file_path,
                    language = excluded.language,
                    chunk_index = excluded.chunk_index,
                    chunk_hash = excluded.chunk_hash,
                    text = excluded.text,
                    embedding = excluded.embedding
                "#,
            )
            .bind(&chunk.pk)
            .bind(&chunk.repo)
            .bind(&chunk.branch)
            .bind(&chunk.commit)
            .bind(&chunk.file_path)
            .bind(&chunk.language)
            .bind(chunk.chunk_index)
            .bind(&chunk.chunk_hash)
            .bind(&chunk.text)
            .bind(vec_to_blob(&entry.embedding))
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    async fn flush(&self) -> Result<()> {
        // WAL checkpoint so committed pages are durable in the main file.
        sqlx::query("PRAGMA wal_checkpoint(TRUNCATE)")
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn search(&self, query: &[f32], filter: &Filter, limit: usize) -> Result<Vec<RawHit>> {
        let spec = self.current_spec()?;

        let mut sql = String::from(
            r#"SELECT pk, repo, branch, "commit", file_path, language, chunk_index, chunk_hash, text, embedding FROM entries"#,
        );
        let mut clauses: Vec<String> = Vec::new();
        if filter.repo.is_some() {
            clauses.push("repo = ?".to_string());
        }
        if filter.branch.is_some() {
            clauses.push("branch = ?".to_string());
        }
        if filter.language.is_some() {
            clauses.push("language = ?".to_string());
        }
        if filter.exclude_file_path.is_some() {
            clauses.push("file_path != ?".to_string());
        }
        if !filter.include_file_paths.is_empty() {
            let placeholders = vec!["?"; filter.include_file_paths.len()].join(", ");
            clauses.push(format!("file_path IN ({})", placeholders));
        }
        if !clauses.is_empty() {
            sql.push_str(" WHERE ");
            sql.push_str(&clauses.join(" AND "));
        }

        let mut query_builder = sqlx::query(&sql);
        if let Some(ref repo) = filter.repo {
            query_builder = query_builder.bind(repo);
        }
        if let Some(ref branch) = filter.branch {
            query_builder = query_builder.bind(branch);
        }
        if let Some(ref language) = filter.language {
            query_builder = query_builder.bind(language);
        }
        if let Some(ref excluded) = filter.exclude_file_path {
            query_builder = query_builder.bind(excluded);
        }
        for path in &filter.include_file_paths {
            query_builder = query_builder.bind(path);
        }

        let rows = query_builder.fetch_all(&self.pool).await?;

        let mut hits: Vec<RawHit> = rows
            .iter()
            .map(|row| {
                let blob: Vec<u8> = row.get("embedding");
                let vec = blob_to_vec(&blob);
                RawHit {
                    chunk: Chunk {
                        pk: row.get("pk"),
                        repo: row.get("repo"),
                        branch: row.get("branch"),
                        commit: row.get("commit"),
                        file_path: row.get("file_path"),
                        language: row.get("language"),
                        chunk_index: row.get("chunk_index"),
                        chunk_hash: row.get("chunk_hash"),
                        text: row.get("text"),
                    },
                    distance: spec.metric.distance(query, &vec),
                }
            })
            .collect();

        if spec.metric.smaller_is_better() {
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
