//! Embedding services and vector utilities.
//!
//! Defines the [`Embedder`] trait and two backends:
//! - **[`TransformersEmbedder`]** — local fastembed models (feature
//!   `local-embeddings`); no network calls after model download.
//! - **[`OllamaEmbedder`]** — calls a local Ollama instance's `/api/embed`
//!   endpoint with exponential-backoff retry.
//!
//! Every backend L2-normalizes exactly once, at the point a vector is
//! returned; no downstream step re-normalizes. Input text over the model's
//! character budget is truncated with a warning.
//!
//! [`CachingEmbedder`] decorates any backend with a query-text → vector LRU
//! cache. Only normalized vectors enter the cache.
//!
//! Also provides the vector helpers shared with the store:
//! [`l2_normalize`], [`cosine_similarity`], [`vec_to_blob`], [`blob_to_vec`].

use std::num::NonZeroUsize;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use lru::LruCache;
use sha2::{Digest, Sha256};
use tracing::warn;

use crate::config::EmbeddingConfig;
use crate::error::{EngineError, Result};

/// Approximate chars-per-token ratio used for the truncation budget.
const CHARS_PER_TOKEN: usize = 4;
/// Token budget assumed for local transformer models.
const LOCAL_TOKEN_BUDGET: usize = 512;
/// Token budget assumed for Ollama-served models.
const OLLAMA_TOKEN_BUDGET: usize = 2048;

/// Identity of the model behind an [`Embedder`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelInfo {
    pub name: String,
    pub service: String,
    pub dimensions: usize,
}

impl ModelInfo {
    /// Hash over everything that makes vectors incomparable across
    /// configurations. A change here rotates the embedding generation.
    pub fn config_hash(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.service.as_bytes());
        hasher.update(b"\x1f");
        hasher.update(self.name.as_bytes());
        hasher.update(b"\x1f");
        hasher.update(self.dimensions.to_le_bytes());
        format!("{:x}", hasher.finalize())
    }
}

/// Text → fixed-dimension unit vector.
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Embed a single query text. Returns a unit vector of length
    /// `model_info().dimensions`.
    async fn embed_query(&self, text: &str) -> Result<Vec<f32>>;

    /// Embed a batch of document texts, preserving order.
    async fn embed_documents(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;

    fn model_info(&self) -> ModelInfo;

    async fn health(&self) -> bool;
}

// ── Caching decorator ───────────────────────────────────────────────────

/// LRU query cache in front of any [`Embedder`]. Document embedding is
/// passed through uncached (documents rarely repeat; queries do).
pub struct CachingEmbedder {
    inner: Arc<dyn Embedder>,
    cache: Mutex<LruCache<String, Vec<f32>>>,
}

impl CachingEmbedder {
    pub fn new(inner: Arc<dyn Embedder>, capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity.max(1)).unwrap();
        Self {
            inner,
            cache: Mutex::new(LruCache::new(capacity)),
        }
    }
}

#[async_trait]
impl Embedder for CachingEmbedder {
    async fn embed_query(&self, text: &str) -> Result<Vec<f32>> {
        if let Some(hit) = self.cache.lock().unwrap().get(text).cloned() {
            return Ok(hit);
        }
        let vector = self.inner.embed_query(text).await?;
        self.cache
            .lock()
            .unwrap()
            .put(text.to_string(), vector.clone());
        Ok(vector)
    }

    async fn embed_documents(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        self.inner.embed_documents(texts).await
    }

    fn model_info(&self) -> ModelInfo {
        self.inner.model_info()
    }

    async fn health(&self) -> bool {
        self.inner.health().await
    }
}

// ── Transformers (fastembed) backend ────────────────────────────────────

/// Local embedding via fastembed. The model is loaded once at construction
/// and shared behind a mutex; a single embed call is the unit of mutual
/// exclusion.
#[cfg(feature = "local-embeddings")]
pub struct TransformersEmbedder {
    model: Arc<Mutex<fastembed::TextEmbedding>>,
    info: ModelInfo,
    batch_size: usize,
}

#[cfg(feature = "local-embeddings")]
impl TransformersEmbedder {
    pub fn new(config: &EmbeddingConfig) -> Result<Self> {
        let fastembed_model = fastembed_model_for(&config.model)?;
        let model = fastembed::TextEmbedding::try_new(
            fastembed::InitOptions::new(fastembed_model).with_show_download_progress(false),
        )
        .map_err(|e| EngineError::Embedding(format!("failed to load local model: {}", e)))?;

        Ok(Self {
            model: Arc::new(Mutex::new(model)),
            info: ModelInfo {
                name: config.model.clone(),
                service: "transformers".to_string(),
                dimensions: config.dimensions,
            },
            batch_size: config.batch_size,
        })
    }

    async fn embed_batch(&self, texts: Vec<String>) -> Result<Vec<Vec<f32>>> {
        let model = Arc::clone(&self.model);
        let batch_size = self.batch_size;
        let dims = self.info.dimensions;

        let vectors = tokio::task::spawn_blocking(move || {
            let mut model = model
                .lock()
                .map_err(|_| EngineError::Embedding("embedding model lock poisoned".into()))?;
            model
                .embed(texts, Some(batch_size))
                .map_err(|e| EngineError::Embedding(format!("local embedding failed: {}", e)))
        })
        .await
        .map_err(|e| EngineError::Embedding(format!("embedding task panicked: {}", e)))??;

        let mut out = Vec::with_capacity(vectors.len());
        for mut v in vectors {
            if v.len() != dims {
                return Err(EngineError::Embedding(format!(
                    "model returned {} dimensions, expected {}",
                    v.len(),
                    dims
                )));
            }
            l2_normalize(&mut v);
            out.push(v);
        }
        Ok(out)
    }
}

#[cfg(feature = "local-embeddings")]
#[async_trait]
impl Embedder for TransformersEmbedder {
    async fn embed_query(&self, text: &str) -> Result<Vec<f32>> {
        let budget = LOCAL_TOKEN_BUDGET * CHARS_PER_TOKEN;
        let text = truncate_for_model(text, budget, &self.info.name);
        let mut vectors = self.embed_batch(vec![text.into_owned()]).await?;
        vectors
            .pop()
            .ok_or_else(|| EngineError::Embedding("empty embedding response".into()))
    }

    async fn embed_documents(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let budget = LOCAL_TOKEN_BUDGET * CHARS_PER_TOKEN;
        let prepared: Vec<String> = texts
            .iter()
            .map(|t| truncate_for_model(t, budget, &self.info.name).into_owned())
            .collect();
        self.embed_batch(prepared).await
    }

    fn model_info(&self) -> ModelInfo {
        self.info.clone()
    }

    async fn health(&self) -> bool {
        // The model is loaded in the constructor; a live value is healthy.
        true
    }
}

#[cfg(feature = "local-embeddings")]
fn fastembed_model_for(name: &str) -> Result<fastembed::EmbeddingModel> {
    match name {
        "all-minilm-l6-v2" => Ok(fastembed::EmbeddingModel::AllMiniLML6V2),
        "bge-small-en-v1.5" => Ok(fastembed::EmbeddingModel::BGESmallENV15),
        "bge-base-en-v1.5" => Ok(fastembed::EmbeddingModel::BGEBaseENV15),
        "bge-large-en-v1.5" => Ok(fastembed::EmbeddingModel::BGELargeENV15),
        "nomic-embed-text-v1" => Ok(fastembed::EmbeddingModel::NomicEmbedTextV1),
        "nomic-embed-text-v1.5" => Ok(fastembed::EmbeddingModel::NomicEmbedTextV15),
        "multilingual-e5-small" => Ok(fastembed::EmbeddingModel::MultilingualE5Small),
        "multilingual-e5-base" => Ok(fastembed::EmbeddingModel::MultilingualE5Base),
        "multilingual-e5-large" => Ok(fastembed::EmbeddingModel::MultilingualE5Large),
        other => Err(EngineError::Config(format!(
            "unknown local embedding model: '{}'. Supported models: \
             all-minilm-l6-v2, bge-small-en-v1.5, bge-base-en-v1.5, bge-large-en-v1.5, \
             nomic-embed-text-v1, nomic-embed-text-v1.5, \
             multilingual-e5-small, multilingual-e5-base, multilingual-e5-large",
            other
        ))),
    }
}

// ── Ollama backend ──────────────────────────────────────────────────────

/// Embedding via a local Ollama instance (`POST /api/embed`). Requires an
/// embedding model pulled (e.g. `ollama pull nomic-embed-text`).
pub struct OllamaEmbedder {
    client: reqwest::Client,
    url: String,
    info: ModelInfo,
    max_retries: u32,
}

impl OllamaEmbedder {
    pub fn new(config: &EmbeddingConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| EngineError::Embedding(format!("failed to build HTTP client: {}", e)))?;
        let url = config
            .url
            .clone()
            .unwrap_or_else(|| "http://localhost:11434".to_string());

        Ok(Self {
            client,
            url,
            info: ModelInfo {
                name: config.model.clone(),
                service: "ollama".to_string(),
                dimensions: config.dimensions,
            },
            max_retries: config.max_retries,
        })
    }

    /// Call `/api/embed` with retry/backoff: 429 and 5xx retry, other 4xx
    /// fail immediately, network errors retry.
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let body = serde_json::json!({
            "model": self.info.name,
            "input": texts,
        });

        let mut last_err = None;

        for attempt in 0..=self.max_retries {
            if attempt > 0 {
                let delay = Duration::from_secs(1 << (attempt - 1).min(5));
                tokio::time::sleep(delay).await;
            }

            let resp = self
                .client
                .post(format!("{}/api/embed", self.url))
                .header("Content-Type", "application/json")
                .json(&body)
                .send()
                .await;

            match resp {
                Ok(response) => {
                    let status = response.status();

                    if status.is_success() {
                        let json: serde_json::Value = response.json().await.map_err(|e| {
                            EngineError::Embedding(format!("invalid Ollama response: {}", e))
                        })?;
                        return self.parse_response(&json);
                    }

                    if status.as_u16() == 429 || status.is_server_error() {
                        let body_text = response.text().await.unwrap_or_default();
                        last_err = Some(EngineError::Embedding(format!(
                            "Ollama API error {}: {}",
                            status, body_text
                        )));
                        continue;
                    }

                    let body_text = response.text().await.unwrap_or_default();
                    return Err(EngineError::Embedding(format!(
                        "Ollama API error {}: {}",
                        status, body_text
                    )));
                }
                Err(e) => {
                    last_err = Some(EngineError::Embedding(format!(
                        "Ollama connection error (is Ollama running at {}?): {}",
                        self.url, e
                    )));
                    continue;
                }
            }
        }

        Err(last_err
            .unwrap_or_else(|| EngineError::Embedding("embedding failed after retries".into())))
    }

    fn parse_response(&self, json: &serde_json::Value) -> Result<Vec<Vec<f32>>> {
        let embeddings = json
            .get("embeddings")
            .and_then(|e| e.as_array())
            .ok_or_else(|| {
                EngineError::Embedding("invalid Ollama response: missing embeddings array".into())
            })?;

        let mut result = Vec::with_capacity(embeddings.len());
        for embedding in embeddings {
            let mut v: Vec<f32> = embedding
                .as_array()
                .ok_or_else(|| {
                    EngineError::Embedding(
                        "invalid Ollama response: embedding is not an array".into(),
                    )
                })?
                .iter()
                .map(|x| x.as_f64().unwrap_or(0.0) as f32)
                .collect();

            if v.len() != self.info.dimensions {
                return Err(EngineError::Embedding(format!(
                    "model returned {} dimensions, expected {}",
                    v.len(),
                    self.info.dimensions
                )));
            }
            l2_normalize(&mut v);
            result.push(v);
        }
        Ok(result)
    }
}

#[async_trait]
impl Embedder for OllamaEmbedder {
    async fn embed_query(&self, text: &str) -> Result<Vec<f32>> {
        let budget = OLLAMA_TOKEN_BUDGET * CHARS_PER_TOKEN;
        let text = truncate_for_model(text, budget, &self.info.name).into_owned();
        let mut vectors = self.embed_batch(&[text]).await?;
        vectors
            .pop()
            .ok_or_else(|| EngineError::Embedding("empty embedding response".into()))
    }

    async fn embed_documents(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let budget = OLLAMA_TOKEN_BUDGET * CHARS_PER_TOKEN;
        let prepared: Vec<String> = texts
            .iter()
            .map(|t| truncate_for_model(t, budget, &self.info.name).into_owned())
            .collect();
        self.embed_batch(&prepared).await
    }

    fn model_info(&self) -> ModelInfo {
        self.info.clone()
    }

    async fn health(&self) -> bool {
        match self
            .client
            .get(format!("{}/api/tags", self.url))
            .send()
            .await
        {
            Ok(resp) => resp.status().is_success(),
            Err(_) => false,
        }
    }
}

/// Instantiate the configured embedding service.
pub fn create_embedder(config: &EmbeddingConfig) -> Result<Arc<dyn Embedder>> {
    match config.service.as_str() {
        #[cfg(feature = "local-embeddings")]
        "transformers" => Ok(Arc::new(TransformersEmbedder::new(config)?)),
        #[cfg(not(feature = "local-embeddings"))]
        "transformers" => Err(EngineError::Config(
            "the transformers service requires the local-embeddings feature".into(),
        )),
        "ollama" => Ok(Arc::new(OllamaEmbedder::new(config)?)),
        other => Err(EngineError::Config(format!(
            "unknown embedding service: {}",
            other
        ))),
    }
}

// ── Text preparation ────────────────────────────────────────────────────

/// Truncate `text` to the model's character budget at a char boundary,
/// warning when content is dropped.
fn truncate_for_model<'a>(
    text: &'a str,
    budget_chars: usize,
    model: &str,
) -> std::borrow::Cow<'a, str> {
    let char_count = text.chars().count();
    if char_count <= budget_chars {
        return std::borrow::Cow::Borrowed(text);
    }
    warn!(
        model,
        original_chars = char_count,
        budget_chars,
        "truncating embedding input to model budget"
    );
    std::borrow::Cow::Owned(text.chars().take(budget_chars).collect())
}

// ── Vector helpers ──────────────────────────────────────────────────────

/// Scale a vector to unit L2 norm in place. Zero vectors are left as-is.
pub fn l2_normalize(v: &mut [f32]) {
    let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > f32::EPSILON {
        for x in v.iter_mut() {
            *x /= norm;
        }
    }
}

/// Compute cosine similarity between two vectors.
///
/// Returns a value in `[-1.0, 1.0]`, or `0.0` for empty vectors or vectors
/// of different lengths.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;

    for (x, y) in a.iter().zip(b.iter()) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    let denom = norm_a.sqrt() * norm_b.sqrt();
    if denom < f32::EPSILON {
        return 0.0;
    }

    dot / denom
}

/// Encode a float vector as a BLOB (little-endian f32 bytes).
pub fn vec_to_blob(vec: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(vec.len() * 4);
    for &v in vec {
        bytes.extend_from_slice(&v.to_le_bytes());
    }
    bytes
}

/// Decode a BLOB back into a float vector.
pub fn blob_to_vec(blob: &[u8]) -> Vec<f32> {
    blob.chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_vec_blob_roundtrip() {
        let vec = vec![1.0f32, -2.5, 3.125, 0.0, -0.001];
        let blob = vec_to_blob(&vec);
        let restored = blob_to_vec(&blob);
        assert_eq!(vec, restored);
    }

    #[test]
    fn test_normalize_produces_unit_norm() {
        let mut v = vec![3.0f32, 4.0];
        l2_normalize(&mut v);
        let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() <= 1e-6);
        assert!((v[0] - 0.6).abs() < 1e-6);
        assert!((v[1] - 0.8).abs() < 1e-6);
    }

    #[test]
    fn test_normalize_leaves_zero_vector() {
        let mut v = vec![0.0f32, 0.0, 0.0];
        l2_normalize(&mut v);
        assert_eq!(v, vec![0.0, 0.0, 0.0]);
    }

    #[test]
    fn test_cosine_identical() {
        let v = vec![1.0, 2.0, 3.0];
        let sim = cosine_similarity(&v, &v);
        assert!((sim - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_cosine_orthogonal() {
        let a = vec![1.0, 0.0, 0.0];
        let b = vec![0.0, 1.0, 0.0];
        assert!(cosine_similarity(&a, &b).abs() < 1e-6);
    }

    #[test]
    fn test_cosine_opposite() {
        let a = vec![1.0, 0.0];
        let b = vec![-1.0, 0.0];
        assert!((cosine_similarity(&a, &b) + 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_cosine_different_lengths() {
        assert_eq!(cosine_similarity(&[1.0, 2.0], &[1.0]), 0.0);
    }

    #[test]
    fn truncation_respects_char_boundaries() {
        let text = "héllo wörld".repeat(100);
        let truncated = truncate_for_model(&text, 50, "test-model");
        assert_eq!(truncated.chars().count(), 50);

        let short = truncate_for_model("short", 50, "test-model");
        assert_eq!(short.as_ref(), "short");
    }

    #[test]
    fn config_hash_changes_with_dimensions() {
        let a = ModelInfo {
            name: "m".into(),
            service: "transformers".into(),
            dimensions: 384,
        };
        let b = ModelInfo {
            dimensions: 768,
            ..a.clone()
        };
        assert_ne!(a.config_hash(), b.config_hash());
        assert_eq!(a.config_hash(), a.config_hash());
    }

    struct FixedEmbedder {
        calls: std::sync::atomic::AtomicUsize,
    }

    #[async_trait]
    impl Embedder for FixedEmbedder {
        async fn embed_query(&self, _text: &str) -> Result<Vec<f32>> {
            self.calls
                .fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            let mut v = vec![1.0f32, 1.0, 0.0];
            l2_normalize(&mut v);
            Ok(v)
        }

        async fn embed_documents(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
            let mut out = Vec::new();
            for _ in texts {
                out.push(self.embed_query("").await?);
            }
            Ok(out)
        }

        fn model_info(&self) -> ModelInfo {
            ModelInfo {
                name: "fixed".into(),
                service: "transformers".into(),
                dimensions: 3,
            }
        }

        async fn health(&self) -> bool {
            true
        }
    }

    #[tokio::test]
    async fn cache_serves_repeat_queries_without_backend_calls() {
        let inner = Arc::new(FixedEmbedder {
            calls: std::sync::atomic::AtomicUsize::new(0),
        });
        let cached = CachingEmbedder::new(inner.clone(), 8);

        let a = cached.embed_query("hello").await.unwrap();
        let b = cached.embed_query("hello").await.unwrap();
        assert_eq!(a, b);
        assert_eq!(inner.calls.load(std::sync::atomic::Ordering::SeqCst), 1);

        // Cached entries are already normalized.
        let norm: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() <= 1e-6);
    }
}
