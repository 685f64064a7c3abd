//! Shared test scaffolding: a deterministic embedder and engine setup.
#![allow(dead_code)]

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use async_trait::async_trait;
use tempfile::TempDir;

use ragwatch::config::Config;
use ragwatch::embedding::{l2_normalize, Embedder, ModelInfo};
use ragwatch::engine::Engine;
use ragwatch::error::Result;

/// Deterministic bag-of-words embedder: each word hashes to a dimension.
/// Texts sharing words get high cosine similarity, so retrieval behaves
/// like the real thing without loading a model.
pub struct BagEmbedder {
    pub dims: usize,
}

impl BagEmbedder {
    pub fn new(dims: usize) -> Self {
        Self { dims }
    }

    fn embed(&self, text: &str) -> Vec<f32> {
        let mut v = vec![0.0f32; self.dims];
        let mut any = false;
        for word in text.to_lowercase().split_whitespace() {
            let word: String = word.chars().filter(|c| c.is_alphanumeric()).collect();
            if word.is_empty() {
                continue;
            }
            let mut hasher = DefaultHasher::new();
            word.hash(&mut hasher);
            v[(hasher.finish() as usize) % self.dims] += 1.0;
            any = true;
        }
        if !any {
            v[0] = 1.0;
        }
        l2_normalize(&mut v);
        v
    }
}

#[async_trait]
impl Embedder for BagEmbedder {
    async fn embed_query(&self, text: &str) -> Result<Vec<f32>> {
        Ok(self.embed(text))
    }

    async fn embed_documents(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        Ok(texts.iter().map(|t| self.embed(t)).collect())
    }

    fn model_info(&self) -> ModelInfo {
        ModelInfo {
            name: "bag-of-words".to_string(),
            service: "transformers".to_string(),
            dimensions: self.dims,
        }
    }

    async fn health(&self) -> bool {
        true
    }
}

pub const TEST_DIMS: usize = 64;

/// Scratch engine over temp directories with the fake embedder.
pub async fn test_engine() -> (TempDir, Arc<Engine>) {
    let tmp = TempDir::new().unwrap();
    let config = test_config(&tmp);
    let engine = Engine::with_embedder(config, Arc::new(BagEmbedder::new(TEST_DIMS)))
        .await
        .unwrap();
    (tmp, engine)
}

pub fn test_config(tmp: &TempDir) -> Config {
    let mut config = Config::new(tmp.path().join("docs"), tmp.path().join("data"));
    config.embedding.dimensions = TEST_DIMS;
    config.embedding.model = "bag-of-words".to_string();
    config
}

/// Write a document into the engine's watched directory.
pub fn write_doc(engine: &Engine, name: &str, content: &str) -> std::path::PathBuf {
    let path = engine.config.documents_dir.join(name);
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).unwrap();
    }
    std::fs::write(&path, content).unwrap();
    path
}
