// SPDX-License-Identifier: MIT OR Apache-2.0

//! Configuration file support for ctxgrep
//!
//! Loads configuration from .ctxgreprc.toml in the workspace root or
//! ~/.config/ctxgrep/config.toml. Credentials come from the environment
//! only (VOYAGE_API_KEY, OPENAI_API_KEY, OLLAMA_URL, COHERE_API_KEY).

use serde::Deserialize;
use std::path::{Path, PathBuf};

/// How blended search merges local and imported results
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BlendMode {
    /// Workspace index only
    Local,
    /// Imported evidence only
    Imported,
    /// Alternate local/imported picks in score order
    #[default]
    Interleave,
}

impl std::str::FromStr for BlendMode {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "local" => Ok(BlendMode::Local),
            "imported" => Ok(BlendMode::Imported),
            "interleave" | "blend" => Ok(BlendMode::Interleave),
            _ => Err(format!("Unknown blend mode: {}", s)),
        }
    }
}

/// Indexing configuration
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct IndexConfig {
    /// Paths/patterns to exclude from indexing
    pub exclude_paths: Vec<String>,
    /// Maximum file size in bytes to index
    pub max_file_size: Option<u64>,
    /// Seconds a quick run considers the index fresh
    pub ttl_secs: Option<u64>,
    /// Hard cap on changed files processed in one run
    pub max_files_per_run: Option<usize>,
    /// Smaller cap for quick mode; excess files are deferred
    pub quick_budget: Option<usize>,
}

impl IndexConfig {
    pub fn exclude_paths(&self) -> &[String] {
        &self.exclude_paths
    }

    /// Max file size (default: 1MB)
    pub fn max_file_size(&self) -> u64 {
        self.max_file_size.unwrap_or(1024 * 1024)
    }

    /// Index freshness TTL (default: 300s)
    pub fn ttl_secs(&self) -> u64 {
        self.ttl_secs.unwrap_or(300)
    }

    /// Per-run changed-file cap (default: 500)
    pub fn max_files_per_run(&self) -> usize {
        self.max_files_per_run.unwrap_or(500)
    }

    /// Quick-mode budget (default: 50)
    pub fn quick_budget(&self) -> usize {
        self.quick_budget.unwrap_or(50)
    }
}

/// Search configuration
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct SearchConfig {
    /// Number of lexical candidates fetched for reranking
    pub candidate_k: Option<usize>,
    /// Default number of results to return
    pub max_results: Option<usize>,
    /// Hard timeout for each half of a blended search
    pub timeout_secs: Option<u64>,
    /// Default blend mode for blended search
    pub blend_mode: Option<BlendMode>,
    /// Candidates handed to the optional cross-encoder re-rank pass
    pub rerank_window: Option<usize>,
}

impl SearchConfig {
    /// Candidate pool size (default: 200)
    pub fn candidate_k(&self) -> usize {
        self.candidate_k.unwrap_or(200)
    }

    /// Default result count (default: 10)
    pub fn max_results(&self) -> usize {
        self.max_results.unwrap_or(10)
    }

    /// Per-side blended-search timeout (default: 20s)
    pub fn timeout_secs(&self) -> u64 {
        self.timeout_secs.unwrap_or(20)
    }

    pub fn blend_mode(&self) -> BlendMode {
        self.blend_mode.unwrap_or_default()
    }

    /// Cross-encoder window (default: 50)
    pub fn rerank_window(&self) -> usize {
        self.rerank_window.unwrap_or(50)
    }
}

/// Embedding gateway configuration
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct EmbeddingConfig {
    /// Max texts per provider request
    pub batch_size: Option<usize>,
    /// Max in-flight embedding requests
    pub max_concurrency: Option<usize>,
    /// Dimensionality of the deterministic fallback embedding
    pub fallback_dims: Option<usize>,
    /// Retries on a rate-limited specialized-provider call
    pub rate_limit_retries: Option<usize>,
    /// Model served by the local provider
    pub ollama_model: Option<String>,
    /// Spawn `ollama serve` when the local provider is unreachable
    pub ollama_auto_start: Option<bool>,
    /// Overall bound on local-provider startup polling
    pub startup_timeout_secs: Option<u64>,
}

impl EmbeddingConfig {
    /// Provider batch size (default: 128)
    pub fn batch_size(&self) -> usize {
        self.batch_size.unwrap_or(128).clamp(1, 512)
    }

    /// In-flight request bound (default: 4)
    pub fn max_concurrency(&self) -> usize {
        self.max_concurrency.unwrap_or(4).max(1)
    }

    /// Fallback embedding dims (default: 384)
    pub fn fallback_dims(&self) -> usize {
        self.fallback_dims.unwrap_or(384)
    }

    /// 429 retry budget (default: 3)
    pub fn rate_limit_retries(&self) -> usize {
        self.rate_limit_retries.unwrap_or(3)
    }

    /// Local model id (default: "nomic-embed-text")
    pub fn ollama_model(&self) -> &str {
        self.ollama_model.as_deref().unwrap_or("nomic-embed-text")
    }

    pub fn ollama_auto_start(&self) -> bool {
        self.ollama_auto_start.unwrap_or(false)
    }

    /// Startup poll bound (default: 30s)
    pub fn startup_timeout_secs(&self) -> u64 {
        self.startup_timeout_secs.unwrap_or(30)
    }
}

/// Query cache configuration
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Whether query caching is enabled
    pub enabled: Option<bool>,
    /// Entry TTL in milliseconds
    pub ttl_ms: Option<u64>,
    /// Maximum number of cached queries
    pub capacity: Option<usize>,
}

impl CacheConfig {
    pub fn enabled(&self) -> bool {
        self.enabled.unwrap_or(true)
    }

    /// Entry TTL (default: 180000 = 3 minutes)
    pub fn ttl_ms(&self) -> u64 {
        self.ttl_ms.unwrap_or(180_000)
    }

    /// Capacity (default: 64)
    pub fn capacity(&self) -> usize {
        self.capacity.unwrap_or(64).max(1)
    }
}

/// Behavioral memory configuration
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct MemoryConfig {
    /// Learn style conventions after indexing runs
    pub learn_style: Option<bool>,
    /// Detect architectural patterns after indexing runs
    pub learn_architecture: Option<bool>,
    /// Max files sampled by the style learner
    pub style_sample_cap: Option<usize>,
}

impl MemoryConfig {
    pub fn learn_style(&self) -> bool {
        self.learn_style.unwrap_or(true)
    }

    pub fn learn_architecture(&self) -> bool {
        self.learn_architecture.unwrap_or(true)
    }

    /// Style sample cap (default: 40)
    pub fn style_sample_cap(&self) -> usize {
        self.style_sample_cap.unwrap_or(40)
    }
}

/// On-disk storage configuration
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Soft ceiling on the .ctxgrep directory size
    pub max_disk_usage_mb: Option<u64>,
    /// Prune the embedding cache when over budget
    pub auto_cleanup: Option<bool>,
    /// Store chunk vectors as compact binary instead of JSON arrays
    pub compression: Option<bool>,
}

impl StorageConfig {
    /// Disk budget (default: 512 MB)
    pub fn max_disk_usage_mb(&self) -> u64 {
        self.max_disk_usage_mb.unwrap_or(512)
    }

    pub fn auto_cleanup(&self) -> bool {
        self.auto_cleanup.unwrap_or(true)
    }

    pub fn compression(&self) -> bool {
        self.compression.unwrap_or(true)
    }
}

/// Configuration loaded from .ctxgreprc.toml or ~/.config/ctxgrep/config.toml
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    #[serde(default)]
    pub index: IndexConfig,

    #[serde(default)]
    pub search: SearchConfig,

    #[serde(default)]
    pub embedding: EmbeddingConfig,

    #[serde(default)]
    pub cache: CacheConfig,

    #[serde(default)]
    pub memory: MemoryConfig,

    #[serde(default)]
    pub storage: StorageConfig,
}

impl Config {
    /// Load configuration for a workspace directory.
    ///
    /// Precedence (highest to lowest):
    /// 1. .ctxgreprc.toml in the workspace root
    /// 2. ~/.config/ctxgrep/config.toml
    pub fn load_for_dir(root: &Path) -> Self {
        if let Some(config) = Self::load_from_path(&root.join(".ctxgreprc.toml")) {
            return config;
        }

        if let Some(home) = dirs::home_dir() {
            let config_path = home.join(".config").join("ctxgrep").join("config.toml");
            if let Some(config) = Self::load_from_path(&config_path) {
                return config;
            }
        }

        Self::default()
    }

    /// Load configuration relative to the current directory.
    pub fn load() -> Self {
        let cwd = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."));
        Self::load_for_dir(&cwd)
    }

    fn load_from_path(path: &Path) -> Option<Self> {
        let content = std::fs::read_to_string(path).ok()?;
        match toml::from_str(&content) {
            Ok(config) => Some(config),
            Err(e) => {
                tracing::warn!("failed to parse {}: {}", path.display(), e);
                None
            }
        }
    }

    /// Merge a CLI-provided result count with config (CLI wins)
    pub fn merge_max_results(&self, cli_value: Option<usize>) -> usize {
        cli_value.unwrap_or_else(|| self.search.max_results())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn defaults_without_file() {
        let dir = TempDir::new().unwrap();
        let config = Config::load_for_dir(dir.path());
        assert_eq!(config.index.ttl_secs(), 300);
        assert_eq!(config.index.quick_budget(), 50);
        assert_eq!(config.cache.ttl_ms(), 180_000);
        assert!(config.storage.auto_cleanup());
    }

    #[test]
    fn loads_workspace_file() {
        let dir = TempDir::new().unwrap();
        std::fs::write(
            dir.path().join(".ctxgreprc.toml"),
            r#"
[index]
ttl_secs = 7
quick_budget = 3

[storage]
max_disk_usage_mb = 9
compression = false
"#,
        )
        .unwrap();

        let config = Config::load_for_dir(dir.path());
        assert_eq!(config.index.ttl_secs(), 7);
        assert_eq!(config.index.quick_budget(), 3);
        assert_eq!(config.storage.max_disk_usage_mb(), 9);
        assert!(!config.storage.compression());
    }

    #[test]
    fn blend_mode_parsing() {
        assert_eq!("local".parse::<BlendMode>().unwrap(), BlendMode::Local);
        assert_eq!(
            "interleave".parse::<BlendMode>().unwrap(),
            BlendMode::Interleave
        );
        assert!("weighted".parse::<BlendMode>().is_err());
    }
}
