//! Core data models.
//!
//! These types represent the files, chunks, embedding generations, and vector
//! records that flow through the ingestion and retrieval pipeline. The
//! metadata store owns [`FileRecord`], [`ChunkRecord`], and
//! [`GenerationRecord`]; the vector store owns [`VectorRecord`]. The two
//! stores cross-reference each other only through `(doc_id, chunk_id)`.

use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Durable record of one file under the watched directory.
#[derive(Debug, Clone)]
pub struct FileRecord {
    /// Stable identifier derived from the absolute path.
    pub file_id: String,
    pub path: String,
    pub name: String,
    pub size: i64,
    /// SHA-256 of the file bytes; the sole change-detection signal.
    pub content_hash: String,
    /// Modification time (unix seconds).
    pub mtime: i64,
    /// Lowercased extension.
    pub file_type: String,
    pub indexed_at: i64,
    pub created_at: i64,
}

/// One chunk of a file's text, regenerated as a set whenever the file is
/// (re)processed. `chunk_id` values form a contiguous range `[0, N)`.
#[derive(Debug, Clone)]
pub struct ChunkRecord {
    pub file_id: String,
    pub chunk_id: i64,
    pub content: String,
    pub embedding_id: Option<String>,
}

/// An embedding (model, config) pair. Vectors produced under one generation
/// are mutually comparable; across generations they are not. Exactly one
/// generation is active at a time.
#[derive(Debug, Clone)]
pub struct GenerationRecord {
    pub generation_id: String,
    pub model_name: String,
    pub service: String,
    pub dimensions: i64,
    pub config_hash: String,
    pub active: bool,
    pub vector_count: i64,
    pub created_at: i64,
    pub last_used_at: i64,
}

/// Fixed-core metadata bag carried by every vector record, serialized as a
/// single opaque JSON blob for portability across vector backends.
/// User-defined extensions live in `extra`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct VectorMetadata {
    pub filename: String,
    pub filepath: String,
    pub file_type: String,
    pub size: i64,
    pub content_hash: String,
    pub created_at: i64,
    pub modified_at: i64,
    pub indexed_at: i64,
    pub chunk_index: i64,
    pub total_chunks: i64,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default, flatten)]
    pub extra: BTreeMap<String, serde_json::Value>,
}

/// A vector store entry. `(doc_id, chunk_id)` uniquely identifies it;
/// `vector` is L2-normalized and matches the active generation's dimensions.
#[derive(Debug, Clone)]
pub struct VectorRecord {
    pub doc_id: String,
    pub chunk_id: i64,
    pub vector: Vec<f32>,
    /// Chunk content as stored and returned to callers.
    pub content: String,
    /// Text the embedding was computed from; differs from `content` only
    /// under contextual chunking.
    pub contextual_text: Option<String>,
    pub model_name: String,
    pub metadata: VectorMetadata,
}

/// A scored chunk returned by the vector store's search operations.
#[derive(Debug, Clone)]
pub struct ScoredChunk {
    pub doc_id: String,
    pub chunk_id: i64,
    pub content: String,
    pub score: f64,
    pub metadata: VectorMetadata,
}

/// Vector store statistics.
#[derive(Debug, Clone, Serialize)]
pub struct StoreStats {
    pub total_vectors: i64,
    pub dimensions: usize,
    /// Unix seconds of the most recent write, if any.
    pub last_updated: Option<i64>,
}

/// Search filter predicate. Filters compose with AND; `tags` compose
/// internally with OR.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SearchFilters {
    pub file_types: Option<Vec<String>>,
    pub doc_ids: Option<Vec<String>>,
    pub tags: Option<Vec<String>>,
    /// Inclusive unix-seconds range on `modified_at`.
    pub modified_after: Option<i64>,
    pub modified_before: Option<i64>,
}

impl SearchFilters {
    pub fn is_empty(&self) -> bool {
        self.file_types.is_none()
            && self.doc_ids.is_none()
            && self.tags.is_none()
            && self.modified_after.is_none()
            && self.modified_before.is_none()
    }
}

/// Stable file identifier: hex SHA-256 of the absolute path. Survives
/// restarts and is independent of file content.
pub fn file_id_for_path(path: &Path) -> String {
    let canonical = path.to_string_lossy();
    let mut hasher = Sha256::new();
    hasher.update(canonical.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Hex SHA-256 of raw bytes.
pub fn content_hash(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}
