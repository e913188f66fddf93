//! # codectx CLI
//!
//! The `codectx` binary drives the indexing pipeline: collection
//! initialization, incremental repository sync, and similarity search over
//! the indexed chunks.
//!
//! ## Usage
//!
//! ```bash
//! codectx --config ./codectx.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `codectx init` | Create the store and the chunk collection |
//! | `codectx sync <repo-root>` | Chunk, embed, and index a repository |
//! | `codectx search "<query>"` | Ranked similarity search over indexed chunks |
//!
//! ## Examples
//!
//! ```bash
//! # Create the collection
//! codectx init --config ./codectx.toml
//!
//! # Incremental sync of the working tree (CHANGED_FILES honored)
//! codectx sync . --repo acme/api --branch main --commit 4f2c91a
//!
//! # Re-index everything from scratch
//! codectx sync . --repo acme/api --full
//!
//! # Search, scoped to one repo and language
//! codectx search "retry with backoff" --repo acme/api --language py
//! ```

use anyhow::{bail, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;

use codectx::config::{self, Config};
use codectx::db;
use codectx::embedding::{create_embedder, embed_query};
use codectx::ingest;
use codectx::retrieve;
use codectx::store::sqlite::SqliteIndex;
use codectx::store::{CollectionSpec, Filter, Metric, VectorIndex};

/// codectx — chunk, embed, and index source repositories, then retrieve
/// ranked code context for retrieval-augmented generation.
#[derive(Parser)]
#[command(
    name = "codectx",
    about = "Incremental code indexing and context retrieval",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./codectx.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

/// Top-level CLI commands.
#[derive(Subcommand)]
enum Commands {
    /// Initialize the store and create the chunk collection.
    ///
    /// Idempotent — re-running against an existing store is a no-op and the
    /// stored collection settings win over the config file.
    Init,

    /// Chunk, embed, and index a repository.
    ///
    /// Scope resolution, first non-empty wins: `--changed-files`, the
    /// `CHANGED_FILES` environment variable, then a full scan of the
    /// configured include directories. Previously indexed chunks of every
    /// touched file are retired before their replacements land.
    Sync {
        /// Repository root directory.
        repo_root: PathBuf,

        /// Repository identity recorded with every chunk (e.g. `acme/api`).
        #[arg(long)]
        repo: String,

        /// Branch recorded with every chunk.
        #[arg(long, default_value = "main")]
        branch: String,

        /// Commit hash recorded with every chunk.
        #[arg(long, default_value = "")]
        commit: String,

        /// Comma-separated repo-relative paths to re-index, overriding the
        /// environment and the full scan.
        #[arg(long)]
        changed_files: Option<String>,

        /// Ignore the changed-file hints and re-index the full include set.
        #[arg(long)]
        full: bool,
    },

    /// Ranked similarity search over the indexed chunks.
    Search {
        /// The query text.
        query: String,

        /// Restrict hits to one repository.
        #[arg(long)]
        repo: Option<String>,

        /// Restrict hits to one branch.
        #[arg(long)]
        branch: Option<String>,

        /// Restrict hits to one language (file extension, e.g. `py`).
        #[arg(long)]
        language: Option<String>,

        /// Exclude one file path from the hits (typically the file being
        /// completed).
        #[arg(long)]
        exclude_file: Option<String>,

        /// Minimum normalized score; defaults to the configured threshold.
        #[arg(long)]
        threshold: Option<f64>,

        /// ANN candidate pool size; defaults to the configured top_k.
        #[arg(long)]
        top_k: Option<usize>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Init => {
            run_init(&cfg).await?;
        }
        Commands::Sync {
            repo_root,
            repo,
            branch,
            commit,
            changed_files,
            full,
        } => {
            run_sync(&cfg, &repo_root, &repo, &branch, &commit, changed_files, full).await?;
        }
        Commands::Search {
            query,
            repo,
            branch,
            language,
            exclude_file,
            threshold,
            top_k,
        } => {
            run_search(
                &cfg,
                &query,
                Filter {
                    repo,
                    branch,
                    language,
                    exclude_file_path: exclude_file,
                    include_file_paths: Vec::new(),
                },
                threshold,
                top_k,
            )
            .await?;
        }
    }

    Ok(())
}

fn collection_spec(cfg: &Config) -> Result<CollectionSpec> {
    let metric = Metric::parse(&cfg.collection.metric)?;
    Ok(CollectionSpec::new(
        &cfg.collection.name,
        cfg.embedding.dims,
        metric,
    ))
}

async fn open_store(cfg: &Config) -> Result<SqliteIndex> {
    let pool = db::connect(&cfg.store.path).await?;
    let store = SqliteIndex::new(pool);
    store.ensure_collection(&collection_spec(cfg)?).await?;
    Ok(store)
}

async fn run_init(cfg: &Config) -> Result<()> {
    let store = open_store(cfg).await?;
    // Report the resolved collection: for an existing store the stored
    // settings win over the config file.
    let spec = store.collection()?;
    println!("Store initialized: {}", cfg.store.path.display());
    println!(
        "  collection: {} (dim {}, metric {})",
        spec.name,
        spec.dim,
        spec.metric.as_str()
    );
    Ok(())
}

async fn run_sync(
    cfg: &Config,
    repo_root: &std::path::Path,
    repo: &str,
    branch: &str,
    commit: &str,
    changed_files: Option<String>,
    full: bool,
) -> Result<()> {
    if !cfg.embedding.is_enabled() {
        bail!("sync requires an embedding provider; set [embedding].provider in the config");
    }

    let store = open_store(cfg).await?;
    let embedder = create_embedder(&cfg.embedding)?;

    let explicit: Option<Vec<String>> = changed_files.map(|list| {
        list.split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect()
    });

    let report = ingest::run_sync(
        &store,
        embedder.as_ref(),
        cfg,
        repo_root,
        repo,
        branch,
        commit,
        explicit.as_deref(),
        full,
    )
    .await?;

    println!("Sync complete: {}@{}", repo, branch);
    println!("  files touched:  {}", report.files_touched);
    println!("  chunks written: {}", report.chunks_written);
    Ok(())
}

async fn run_search(
    cfg: &Config,
    query: &str,
    filter: Filter,
    threshold: Option<f64>,
    top_k: Option<usize>,
) -> Result<()> {
    if !cfg.embedding.is_enabled() {
        bail!("search requires an embedding provider; set [embedding].provider in the config");
    }

    let store = open_store(cfg).await?;
    let embedder = create_embedder(&cfg.embedding)?;
    // Score with the metric the collection was created with, not the
    // config value — the two can drift after a config edit.
    let metric = store.collection()?.metric;

    let vector = embed_query(embedder.as_ref(), query).await?;
    let hits = retrieve::retrieve(
        &store,
        &vector,
        &filter,
        threshold.unwrap_or(cfg.retrieval.threshold),
        top_k.unwrap_or(cfg.retrieval.top_k),
        metric,
    )
    .await?;

    if hits.is_empty() {
        println!("No results.");
        return Ok(());
    }

    println!("Found {} result(s):\n", hits.len());
    for (i, hit) in hits.iter().enumerate() {
        println!(
            "{}. [{:.3}] {} (chunk {}, {}@{})",
            i + 1,
            hit.score,
            hit.file_path,
            hit.chunk_index,
            hit.repo,
            hit.branch
        );
        let preview: String = hit.text.lines().take(3).collect::<Vec<_>>().join("\n   ");
        println!("   {}\n", preview);
    }
    Ok(())
}
