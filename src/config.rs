use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub store: StoreConfig,
    #[serde(default)]
    pub collection: CollectionConfig,
    #[serde(default)]
    pub chunking: ChunkingConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub ingest: IngestConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct StoreConfig {
    pub path: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct CollectionConfig {
    #[serde(default = "default_collection_name")]
    pub name: String,
    /// Distance metric for the ANN index: `ip`, `cosine`, or `l2`.
    #[serde(default = "default_metric")]
    pub metric: String,
}

impl Default for CollectionConfig {
    fn default() -> Self {
        Self {
            name: default_collection_name(),
            metric: default_metric(),
        }
    }
}

fn default_collection_name() -> String {
    "code_chunks".to_string()
}
fn default_metric() -> String {
    "ip".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct ChunkingConfig {
    #[serde(default = "default_max_chars")]
    pub max_chars: usize,
    #[serde(default = "default_overlap")]
    pub overlap: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            max_chars: default_max_chars(),
            overlap: default_overlap(),
        }
    }
}

fn default_max_chars() -> usize {
    1500
}
fn default_overlap() -> usize {
    200
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    /// `openai` (any OpenAI-compatible endpoint) or `disabled`.
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default = "default_dims")]
    pub dims: usize,
    #[serde(default = "default_endpoint")]
    pub endpoint: String,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: None,
            dims: default_dims(),
            endpoint: default_endpoint(),
            batch_size: default_batch_size(),
            max_retries: default_max_retries(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

impl EmbeddingConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }
}

fn default_provider() -> String {
    "disabled".to_string()
}
fn default_dims() -> usize {
    768
}
fn default_endpoint() -> String {
    "https://api.openai.com/v1/embeddings".to_string()
}
fn default_batch_size() -> usize {
    128
}
fn default_max_retries() -> u32 {
    5
}
fn default_timeout_secs() -> u64 {
    30
}

#[derive(Debug, Deserialize, Clone)]
pub struct IngestConfig {
    /// Directories (relative to the repo root) eligible for ingestion.
    #[serde(default = "default_include_dirs")]
    pub include_dirs: Vec<String>,
    /// Additional exclude patterns applied on top of the built-in
    /// directory denylist.
    #[serde(default)]
    pub exclude_globs: Vec<String>,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            include_dirs: default_include_dirs(),
            exclude_globs: Vec::new(),
        }
    }
}

fn default_include_dirs() -> Vec<String> {
    vec!["src".to_string()]
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetrievalConfig {
    /// Minimum normalized score for a hit to survive filtering.
    #[serde(default = "default_threshold")]
    pub threshold: f64,
    /// ANN candidate pool size per query. The final result count is capped
    /// separately (see `retrieve::MAX_CONTEXT_HITS`).
    #[serde(default = "default_top_k")]
    pub top_k: usize,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            threshold: default_threshold(),
            top_k: default_top_k(),
        }
    }
}

fn default_threshold() -> f64 {
    0.45
}
fn default_top_k() -> usize {
    5
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;

    // Validate chunking
    if config.chunking.max_chars == 0 {
        anyhow::bail!("chunking.max_chars must be > 0");
    }
    if config.chunking.overlap >= config.chunking.max_chars {
        anyhow::bail!("chunking.overlap must be smaller than chunking.max_chars");
    }

    // Validate collection
    match config.collection.metric.to_lowercase().as_str() {
        "ip" | "cosine" | "l2" => {}
        other => anyhow::bail!("Unknown metric: '{}'. Must be ip, cosine, or l2.", other),
    }

    // Validate embedding
    match config.embedding.provider.as_str() {
        "disabled" | "openai" => {}
        other => anyhow::bail!(
            "Unknown embedding provider: '{}'. Must be disabled or openai.",
            other
        ),
    }
    if config.embedding.is_enabled() {
        if config.embedding.dims == 0 {
            anyhow::bail!("embedding.dims must be > 0");
        }
        if config.embedding.model.is_none() {
            anyhow::bail!(
                "embedding.model must be specified when provider is '{}'",
                config.embedding.provider
            );
        }
    }

    // Validate retrieval
    if config.retrieval.top_k == 0 {
        anyhow::bail!("retrieval.top_k must be >= 1");
    }

    // Validate ingest
    if config.ingest.include_dirs.is_empty() {
        anyhow::bail!("ingest.include_dirs must not be empty");
    }

    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_config(body: &str) -> tempfile::NamedTempFile {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        f.write_all(body.as_bytes()).unwrap();
        f
    }

    #[test]
    fn test_defaults_applied() {
        let f = write_config("[store]\npath = \"data/test.sqlite\"\n");
        let cfg = load_config(f.path()).unwrap();
        assert_eq!(cfg.collection.name, "code_chunks");
        assert_eq!(cfg.collection.metric, "ip");
        assert_eq!(cfg.chunking.max_chars, 1500);
        assert_eq!(cfg.chunking.overlap, 200);
        assert_eq!(cfg.ingest.include_dirs, vec!["src".to_string()]);
        assert!((cfg.retrieval.threshold - 0.45).abs() < 1e-9);
        assert!(!cfg.embedding.is_enabled());
    }

    #[test]
    fn test_rejects_unknown_metric() {
        let f = write_config(
            "[store]\npath = \"x.sqlite\"\n\n[collection]\nmetric = \"hamming\"\n",
        );
        assert!(load_config(f.path()).is_err());
    }

    #[test]
    fn test_rejects_overlap_ge_max_chars() {
        let f = write_config(
            "[store]\npath = \"x.sqlite\"\n\n[chunking]\nmax_chars = 100\noverlap = 100\n",
        );
        assert!(load_config(f.path()).is_err());
    }

    #[test]
    fn test_enabled_embedding_requires_model() {
        let f = write_config(
            "[store]\npath = \"x.sqlite\"\n\n[embedding]\nprovider = \"openai\"\n",
        );
        assert!(load_config(f.path()).is_err());
    }
}
