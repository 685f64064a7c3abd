//! Configuration parsing and validation.
//!
//! The engine is configured via a TOML file (default: `config/ragwatch.toml`).
//! `documents_dir` is the watched directory; `data_dir` holds both on-disk
//! stores (`meta.sqlite` and `vectors/vectors.sqlite`).
//!
//! Every option has a serde default so a minimal config only needs the two
//! directories:
//!
//! ```toml
//! documents_dir = "./docs"
//! data_dir = "./data"
//!
//! [embedding]
//! service = "transformers"
//! model = "all-minilm-l6-v2"
//! dimensions = 384
//! ```

use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::error::{EngineError, Result};

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    /// Directory watched for documents.
    pub documents_dir: PathBuf,
    /// Directory holding the metadata store and the vector store.
    pub data_dir: PathBuf,
    #[serde(default)]
    pub chunking: ChunkingConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub search: SearchConfig,
    #[serde(default)]
    pub sync: SyncConfig,
    #[serde(default)]
    pub ingest: IngestConfig,
    #[serde(default)]
    pub server: ServerConfig,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ChunkingConfig {
    /// Chunk budget in characters.
    pub chunk_size: usize,
    /// Characters carried over between adjacent chunks.
    pub chunk_overlap: usize,
    /// `normal` or `contextual`.
    pub strategy: ChunkingStrategy,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            chunk_size: 1000,
            chunk_overlap: 200,
            strategy: ChunkingStrategy::Normal,
        }
    }
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ChunkingStrategy {
    Normal,
    /// Prefix each chunk with a short document/section summary before
    /// embedding; the vector record keeps both strings.
    Contextual,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct EmbeddingConfig {
    /// `transformers` (local fastembed models) or `ollama`.
    pub service: String,
    pub model: String,
    pub dimensions: usize,
    pub batch_size: usize,
    /// Ollama base URL.
    pub url: Option<String>,
    pub timeout_secs: u64,
    pub max_retries: u32,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            service: "transformers".to_string(),
            model: "all-minilm-l6-v2".to_string(),
            dimensions: 384,
            batch_size: 32,
            url: None,
            timeout_secs: 30,
            max_retries: 3,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct SearchConfig {
    pub similarity_top_k: usize,
    /// Minimum semantic score for a hit to be returned.
    pub similarity_threshold: f64,
    pub hybrid_semantic_ratio: f64,
    pub hybrid_keyword_ratio: f64,
    /// Candidate budget split between the two hybrid legs.
    pub hybrid_total_results_for_reranking: usize,
    pub enable_llm_reranking: bool,
    pub pipeline_timeout_ms: u64,
    /// Query-embedding LRU cache capacity.
    pub max_cache_size: usize,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            similarity_top_k: 5,
            similarity_threshold: 0.0,
            hybrid_semantic_ratio: 0.6,
            hybrid_keyword_ratio: 0.4,
            hybrid_total_results_for_reranking: 20,
            enable_llm_reranking: false,
            pipeline_timeout_ms: 10_000,
            max_cache_size: 256,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct SyncConfig {
    /// Shallow reconciliation period in seconds.
    pub interval_secs: u64,
    /// Deep (hash-verifying) reconciliation period; disabled when absent.
    pub deep_interval_secs: Option<u64>,
    /// Apply repairs on scheduled runs.
    pub auto_fix: bool,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            interval_secs: 300,
            deep_interval_secs: Some(3600),
            auto_fix: false,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct IngestConfig {
    /// Bounded worker count for parallel file processing.
    pub max_concurrent_processing: usize,
    /// Retry budget for transient per-file failures.
    pub max_retries: u32,
    /// Extension allow-list; paths outside it are dropped silently.
    pub supported_extensions: Vec<String>,
    /// Watcher debounce window in milliseconds.
    pub debounce_ms: u64,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            max_concurrent_processing: 4,
            max_retries: 3,
            supported_extensions: default_extensions(),
            debounce_ms: 500,
        }
    }
}

fn default_extensions() -> Vec<String> {
    ["txt", "md", "pdf", "docx", "doc", "rtf", "csv", "json", "xml", "html"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ServerConfig {
    pub bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1:7431".to_string(),
        }
    }
}

impl Config {
    /// Programmatic construction with defaults for everything but the two
    /// directories. Used by tests and by embedding hosts.
    pub fn new(documents_dir: impl Into<PathBuf>, data_dir: impl Into<PathBuf>) -> Self {
        Self {
            documents_dir: documents_dir.into(),
            data_dir: data_dir.into(),
            chunking: ChunkingConfig::default(),
            embedding: EmbeddingConfig::default(),
            search: SearchConfig::default(),
            sync: SyncConfig::default(),
            ingest: IngestConfig::default(),
            server: ServerConfig::default(),
        }
    }

    pub fn load(path: &Path) -> Result<Config> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            EngineError::Config(format!("failed to read config file {}: {}", path.display(), e))
        })?;
        let config: Config = toml::from_str(&content)
            .map_err(|e| EngineError::Config(format!("failed to parse config file: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.chunking.chunk_size == 0 {
            return Err(EngineError::Config("chunking.chunk_size must be > 0".into()));
        }
        if self.chunking.chunk_overlap >= self.chunking.chunk_size {
            return Err(EngineError::Config(
                "chunking.chunk_overlap must be smaller than chunk_size".into(),
            ));
        }
        match self.embedding.service.as_str() {
            "transformers" | "ollama" => {}
            other => {
                return Err(EngineError::Config(format!(
                    "unknown embedding service '{}'; must be transformers or ollama",
                    other
                )))
            }
        }
        if self.embedding.dimensions == 0 {
            return Err(EngineError::Config("embedding.dimensions must be > 0".into()));
        }
        if self.embedding.batch_size == 0 {
            return Err(EngineError::Config("embedding.batch_size must be > 0".into()));
        }
        if self.search.similarity_top_k == 0 {
            return Err(EngineError::Config("search.similarity_top_k must be >= 1".into()));
        }
        if !(0.0..=1.0).contains(&self.search.similarity_threshold) {
            return Err(EngineError::Config(
                "search.similarity_threshold must be in [0.0, 1.0]".into(),
            ));
        }
        let ratio_sum = self.search.hybrid_semantic_ratio + self.search.hybrid_keyword_ratio;
        if self.search.hybrid_semantic_ratio < 0.0
            || self.search.hybrid_keyword_ratio < 0.0
            || (ratio_sum - 1.0).abs() > 1e-6
        {
            return Err(EngineError::Config(
                "hybrid_semantic_ratio and hybrid_keyword_ratio must be non-negative and sum to 1"
                    .into(),
            ));
        }
        if self.search.hybrid_total_results_for_reranking == 0 {
            return Err(EngineError::Config(
                "search.hybrid_total_results_for_reranking must be >= 1".into(),
            ));
        }
        if self.search.pipeline_timeout_ms == 0 {
            return Err(EngineError::Config("search.pipeline_timeout_ms must be > 0".into()));
        }
        if self.search.max_cache_size == 0 {
            return Err(EngineError::Config("search.max_cache_size must be > 0".into()));
        }
        if self.ingest.max_concurrent_processing == 0 {
            return Err(EngineError::Config(
                "ingest.max_concurrent_processing must be >= 1".into(),
            ));
        }
        if self.sync.interval_secs == 0 {
            return Err(EngineError::Config("sync.interval_secs must be > 0".into()));
        }
        Ok(())
    }

    /// Path of the metadata store database.
    pub fn meta_db_path(&self) -> PathBuf {
        self.data_dir.join("meta.sqlite")
    }

    /// Directory of the vector store (provider-specific layout).
    pub fn vector_dir(&self) -> PathBuf {
        self.data_dir.join("vectors")
    }

    pub fn vector_db_path(&self) -> PathBuf {
        self.vector_dir().join("vectors.sqlite")
    }

    /// Whether a path's extension is on the allow-list. Dotfiles never are.
    pub fn is_supported_path(&self, path: &Path) -> bool {
        if path
            .file_name()
            .map(|n| n.to_string_lossy().starts_with('.'))
            .unwrap_or(true)
        {
            return false;
        }
        match path.extension() {
            Some(ext) => {
                let ext = ext.to_string_lossy().to_lowercase();
                self.ingest.supported_extensions.iter().any(|s| s == &ext)
            }
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn minimal_toml_parses_with_defaults() {
        let config: Config = toml::from_str(
            r#"
            documents_dir = "./docs"
            data_dir = "./data"
            "#,
        )
        .unwrap();
        config.validate().unwrap();
        assert_eq!(config.chunking.chunk_size, 1000);
        assert_eq!(config.embedding.service, "transformers");
        assert_eq!(config.search.similarity_top_k, 5);
        assert!(config.ingest.supported_extensions.contains(&"md".to_string()));
    }

    #[test]
    fn overlap_must_be_smaller_than_chunk_size() {
        let mut config = Config::new("./docs", "./data");
        config.chunking.chunk_overlap = config.chunking.chunk_size;
        assert!(config.validate().is_err());
    }

    #[test]
    fn ratios_must_sum_to_one() {
        let mut config = Config::new("./docs", "./data");
        config.search.hybrid_semantic_ratio = 0.8;
        config.search.hybrid_keyword_ratio = 0.4;
        assert!(config.validate().is_err());
    }

    #[test]
    fn unknown_service_rejected() {
        let mut config = Config::new("./docs", "./data");
        config.embedding.service = "openai".into();
        assert!(config.validate().is_err());
    }

    #[test]
    fn dotfiles_and_unknown_extensions_unsupported() {
        let config = Config::new("./docs", "./data");
        assert!(config.is_supported_path(Path::new("notes/readme.md")));
        assert!(config.is_supported_path(Path::new("report.PDF")));
        assert!(!config.is_supported_path(Path::new(".hidden.md")));
        assert!(!config.is_supported_path(Path::new("binary.exe")));
        assert!(!config.is_supported_path(Path::new("no_extension")));
    }
}
