//! Index synchronization.
//!
//! Orchestrates one ingestion run: resolve the file scope, chunk every
//! in-scope file, retire each touched file's prior chunk set, then batch
//! embed and insert the fresh chunks. The delete pass is flushed before
//! any insert begins, so a stale chunk never coexists with its
//! replacement; a second flush after the inserts makes the run's writes
//! visible before success is reported.
//!
//! Single-writer: one run owns the collection for its duration. Failures
//! abort the run; batches already committed stay committed
//! (at-least-once, documented on [`VectorIndex`]).

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use globset::{Glob, GlobSet, GlobSetBuilder};
use walkdir::WalkDir;

use crate::chunk;
use crate::config::Config;
use crate::embedding::Embedder;
use crate::models::{Chunk, IndexEntry, SyncReport};
use crate::store::VectorIndex;

/// Directory names never descended into during a full scan.
const EXCLUDE_DIRS: &[&str] = &[
    ".git",
    ".github",
    "node_modules",
    "dist",
    "build",
    "__pycache__",
    ".venv",
    "venv",
    ".idea",
    ".vscode",
    ".pytest_cache",
    "target",
    "out",
];

/// Extensions eligible for ingestion (source plus config/doc formats).
const INCLUDE_EXTS: &[&str] = &[
    "py", "js", "ts", "tsx", "java", "go", "rs", "cpp", "c", "cs", "md", "yaml", "yml", "json",
    "toml",
];

/// Newline-separated changed-file list, relative to the repo root.
/// Consulted when no explicit file list is given (typically set by CI).
const CHANGED_FILES_ENV: &str = "CHANGED_FILES";

/// Run one synchronization pass.
///
/// The collection must already exist (`ensure_collection`); backend
/// failures abort the run and are surfaced to the caller.
#[allow(clippy::too_many_arguments)]
pub async fn run_sync(
    store: &dyn VectorIndex,
    embedder: &dyn Embedder,
    config: &Config,
    repo_root: &Path,
    repo: &str,
    branch: &str,
    commit: &str,
    explicit_files: Option<&[String]>,
    full: bool,
) -> Result<SyncReport> {
    let repo_root = repo_root
        .canonicalize()
        .with_context(|| format!("Invalid repo_root: {}", repo_root.display()))?;
    let targets = resolve_scope(config, &repo_root, explicit_files, full)?;

    let mut all_chunks: Vec<Chunk> = Vec::new();
    let mut touched: BTreeSet<String> = BTreeSet::new();

    for path in &targets {
        let unit = chunk::source_unit_from_file(&repo_root, path, repo, branch, commit)?;
        // Every examined file is tracked for the delete pass, including
        // files that now produce zero chunks, so stale entries for
        // emptied files are retired.
        touched.insert(unit.rel_path.clone());
        all_chunks.extend(chunk::split_source_unit(&unit, &config.chunking));
    }

    // Delete-before-insert: retire prior chunk sets and flush so the old
    // entries are gone before any replacement lands.
    for rel in &touched {
        store
            .delete_by_file(repo, rel)
            .await
            .with_context(|| format!("Failed to retire prior chunks for {}", rel))?;
    }
    store.flush().await?;

    let mut chunks_written = 0u64;
    for batch in all_chunks.chunks(config.embedding.batch_size) {
        let texts: Vec<String> = batch.iter().map(|c| c.text.clone()).collect();
        let vectors = embedder
            .embed_batch(&texts)
            .await
            .with_context(|| format!("Embedding failed after {} chunks written", chunks_written))?;

        let entries: Vec<IndexEntry> = batch
            .iter()
            .cloned()
            .zip(vectors)
            .map(|(chunk, embedding)| IndexEntry { chunk, embedding })
            .collect();

        store.insert_batch(&entries).await.with_context(|| {
            format!("Batch insert failed after {} chunks written", chunks_written)
        })?;
        chunks_written += entries.len() as u64;
    }
    store.flush().await?;

    Ok(SyncReport {
        files_touched: touched.len() as u64,
        chunks_written,
    })
}

/// Resolve the set of files a sync run will (re)process.
///
/// Precedence, first non-empty wins: explicit caller list, then the
/// `CHANGED_FILES` environment variable, then a full recursive scan of the
/// configured include roots. `full` skips the first two sources.
pub fn resolve_scope(
    config: &Config,
    repo_root: &Path,
    explicit_files: Option<&[String]>,
    full: bool,
) -> Result<Vec<PathBuf>> {
    let include_roots = resolve_include_roots(config, repo_root)?;

    if !full {
        if let Some(rels) = explicit_files {
            let files = resolve_candidates(repo_root, &include_roots, rels);
            if !files.is_empty() {
                return Ok(files);
            }
        }
        if let Ok(raw) = std::env::var(CHANGED_FILES_ENV) {
            let rels: Vec<String> = raw
                .lines()
                .map(|l| l.trim().to_string())
                .filter(|l| !l.is_empty())
                .collect();
            let files = resolve_candidates(repo_root, &include_roots, &rels);
            if !files.is_empty() {
                return Ok(files);
            }
        }
    }

    scan_include_roots(config, repo_root, &include_roots)
}

/// Canonicalize and validate the configured include directories.
/// No valid roots is fatal: the run aborts before any backend call.
fn resolve_include_roots(config: &Config, repo_root: &Path) -> Result<Vec<PathBuf>> {
    let mut roots = Vec::new();
    for dir in &config.ingest.include_dirs {
        let candidate = repo_root.join(dir.trim_matches(['/', '\\']));
        if let Ok(resolved) = candidate.canonicalize() {
            if resolved.is_dir() {
                roots.push(resolved);
            }
        }
    }
    if roots.is_empty() {
        bail!(
            "No valid include_dirs found under repo_root={}",
            repo_root.display()
        );
    }
    Ok(roots)
}

/// Validate caller-provided relative paths; anything that does not resolve
/// to an allowed regular file under an include root is silently dropped.
fn resolve_candidates(repo_root: &Path, include_roots: &[PathBuf], rels: &[String]) -> Vec<PathBuf> {
    let mut files = Vec::new();
    for rel in rels {
        let resolved = match repo_root.join(rel).canonicalize() {
            Ok(p) => p,
            Err(_) => continue,
        };
        if !resolved.is_file() {
            continue;
        }
        if !has_allowed_extension(&resolved) {
            continue;
        }
        if !include_roots.iter().any(|r| resolved.starts_with(r)) {
            continue;
        }
        files.push(resolved);
    }
    files
}

/// Full recursive scan of the include roots.
fn scan_include_roots(
    config: &Config,
    repo_root: &Path,
    include_roots: &[PathBuf],
) -> Result<Vec<PathBuf>> {
    let exclude_set = build_globset(&config.ingest.exclude_globs)?;

    let mut files = Vec::new();
    for root in include_roots {
        for entry in WalkDir::new(root) {
            let entry = entry?;
            if !entry.file_type().is_file() {
                continue;
            }
            let path = entry.path();
            if path
                .components()
                .any(|c| EXCLUDE_DIRS.contains(&c.as_os_str().to_string_lossy().as_ref()))
            {
                continue;
            }
            if !has_allowed_extension(path) {
                continue;
            }
            let rel = path.strip_prefix(repo_root).unwrap_or(path);
            if exclude_set.is_match(rel.to_string_lossy().as_ref()) {
                continue;
            }
            files.push(path.to_path_buf());
        }
    }

    // Deterministic ordering
    files.sort();
    Ok(files)
}

fn has_allowed_extension(path: &Path) -> bool {
    path.extension()
        .map(|e| e.to_string_lossy().to_lowercase())
        .map(|ext| INCLUDE_EXTS.contains(&ext.as_str()))
        .unwrap_or(false)
}

fn build_globset(patterns: &[String]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        builder.add(Glob::new(pattern)?);
    }
    Ok(builder.build()?)
}
