//! Ingestion pipeline: file event → reader → chunker → embedder → stores.
//!
//! For every file event the pipeline brings the metadata store and vector
//! store into the state matching the file's current bytes, with at most one
//! concurrent build per path. A process-wide in-flight set deduplicates
//! concurrent calls (check-and-insert is atomic); a semaphore bounds the
//! number of files processed in parallel.
//!
//! Every step before the final commit is safe to abort: the stores are left
//! unchanged. A partially committed file (vectors written, metadata missing,
//! or the reverse) is repairable drift and is picked up by the sync manager.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::{DashMap, DashSet};
use tokio::sync::Semaphore;
use tracing::{debug, info, warn};

use crate::chunker::chunk_document;
use crate::config::Config;
use crate::embedding::Embedder;
use crate::error::{EngineError, Result};
use crate::meta::MetadataStore;
use crate::models::{
    content_hash, file_id_for_path, ChunkRecord, FileRecord, VectorMetadata, VectorRecord,
};
use crate::reader::read_document;
use crate::vector::VectorStore;

/// What `process` did with a path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessOutcome {
    /// Chunks were (re)built and committed.
    Indexed { chunks: usize },
    /// Content hash unchanged and vectors present; nothing to do.
    UpToDate,
    /// Another task is already processing this path.
    AlreadyInFlight,
    /// No reader for this extension; the file is ignored.
    Unsupported,
    /// The file produced no text after whitespace collapse.
    Empty,
    /// Extraction already failed for this exact content; the file stays
    /// excluded until its hash changes.
    PreviouslyFailed,
}

#[derive(Debug, Clone, Copy)]
pub struct RemoveOutcome {
    pub removed_vectors: usize,
    pub record_existed: bool,
}

/// The interface the sync manager repairs drift through. Kept separate from
/// the concrete pipeline so the two components reference each other in one
/// direction only.
#[async_trait]
pub trait Reingest: Send + Sync {
    async fn reingest(&self, path: &Path) -> Result<()>;
    async fn remove_path(&self, path: &Path) -> Result<()>;
}

pub struct IngestPipeline {
    config: Arc<Config>,
    meta: Arc<MetadataStore>,
    vectors: Arc<VectorStore>,
    embedder: Arc<dyn Embedder>,
    generation_id: String,
    in_flight: DashSet<PathBuf>,
    /// Content hash of the last permanent extraction failure per path.
    failed: DashMap<PathBuf, String>,
    workers: Arc<Semaphore>,
}

impl IngestPipeline {
    pub fn new(
        config: Arc<Config>,
        meta: Arc<MetadataStore>,
        vectors: Arc<VectorStore>,
        embedder: Arc<dyn Embedder>,
        generation_id: String,
    ) -> Self {
        let workers = Arc::new(Semaphore::new(config.ingest.max_concurrent_processing));
        Self {
            config,
            meta,
            vectors,
            embedder,
            generation_id,
            in_flight: DashSet::new(),
            failed: DashMap::new(),
            workers,
        }
    }

    /// Bring both stores up to date with the file at `path`.
    ///
    /// Idempotent: re-invocation with unchanged content is a no-op beyond a
    /// debug log. Returns immediately when the path is already being
    /// processed by another task.
    pub async fn process(&self, path: &Path) -> Result<ProcessOutcome> {
        if !self.in_flight.insert(path.to_path_buf()) {
            debug!(path = %path.display(), "path already in flight, skipping");
            return Ok(ProcessOutcome::AlreadyInFlight);
        }
        let _guard = InFlightGuard {
            set: &self.in_flight,
            path: path.to_path_buf(),
        };

        let _permit = self
            .workers
            .acquire()
            .await
            .map_err(|_| EngineError::Search("worker pool closed".into()))?;

        self.process_inner(path).await
    }

    async fn process_inner(&self, path: &Path) -> Result<ProcessOutcome> {
        let path_str = path.to_string_lossy().to_string();
        let file_id = file_id_for_path(path);

        let bytes = tokio::fs::read(path).await.map_err(|e| {
            EngineError::FileProcessing {
                path: path_str.clone(),
                reason: e.to_string(),
            }
        })?;
        let fs_meta = tokio::fs::metadata(path)
            .await
            .map_err(|e| EngineError::FileProcessing {
                path: path_str.clone(),
                reason: e.to_string(),
            })?;
        let mtime = fs_meta
            .modified()
            .ok()
            .and_then(|t| t.duration_since(std::time::SystemTime::UNIX_EPOCH).ok())
            .map(|d| d.as_secs() as i64)
            .unwrap_or(0);
        let hash = content_hash(&bytes);

        if self.failed.get(path).map(|h| *h == hash).unwrap_or(false) {
            debug!(path = %path.display(), "content previously failed extraction, skipping");
            return Ok(ProcessOutcome::PreviouslyFailed);
        }

        let existing = self.meta.get_file_by_path(&path_str).await?;
        if let Some(ref record) = existing {
            if record.content_hash == hash && self.vectors.has_vector(&file_id, 0).await? {
                debug!(path = %path.display(), "content unchanged, skipping");
                return Ok(ProcessOutcome::UpToDate);
            }
        }

        let doc = match read_document(path) {
            Ok(Some(doc)) => doc,
            Ok(None) => {
                warn!(path = %path.display(), "no reader for extension, ignoring file");
                return Ok(ProcessOutcome::Unsupported);
            }
            Err(e) => {
                // Corrupt content is excluded until the bytes change.
                self.failed.insert(path.to_path_buf(), hash);
                return Err(e);
            }
        };
        if doc.text.trim().is_empty() {
            warn!(path = %path.display(), "file is empty after extraction, skipping");
            return Ok(ProcessOutcome::Empty);
        }

        if !self.embedder.health().await {
            return Err(EngineError::Embedding(
                "embedding service is not available".into(),
            ));
        }

        let file_type = path
            .extension()
            .map(|e| e.to_string_lossy().to_lowercase())
            .unwrap_or_default();
        let chunks = chunk_document(&doc.text, &file_type, &self.config.chunking);
        if chunks.is_empty() {
            warn!(path = %path.display(), "no chunks produced, skipping");
            return Ok(ProcessOutcome::Empty);
        }

        // Embed what the strategy says to embed; store what the file says.
        let texts: Vec<String> = chunks
            .iter()
            .map(|c| c.contextual_text.clone().unwrap_or_else(|| c.content.clone()))
            .collect();
        let vectors = self.embed_with_retry(&texts).await?;
        if vectors.len() != chunks.len() {
            return Err(EngineError::Embedding(format!(
                "expected {} vectors, got {}",
                chunks.len(),
                vectors.len()
            )));
        }

        let now = chrono::Utc::now().timestamp();
        let created_at = existing.as_ref().map(|r| r.created_at).unwrap_or(now);
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();
        let model_name = self.embedder.model_info().name;
        let total_chunks = chunks.len() as i64;

        let records: Vec<VectorRecord> = chunks
            .iter()
            .zip(vectors.into_iter())
            .map(|(chunk, vector)| VectorRecord {
                doc_id: file_id.clone(),
                chunk_id: chunk.index,
                vector,
                content: chunk.content.clone(),
                contextual_text: chunk.contextual_text.clone(),
                model_name: model_name.clone(),
                metadata: VectorMetadata {
                    filename: name.clone(),
                    filepath: path_str.clone(),
                    file_type: file_type.clone(),
                    size: bytes.len() as i64,
                    content_hash: hash.clone(),
                    created_at,
                    modified_at: mtime,
                    indexed_at: now,
                    chunk_index: chunk.index,
                    total_chunks,
                    tags: Vec::new(),
                    extra: doc.metadata.clone().into_iter().collect(),
                },
            })
            .collect();

        let file_record = FileRecord {
            file_id: file_id.clone(),
            path: path_str.clone(),
            name,
            size: bytes.len() as i64,
            content_hash: hash,
            mtime,
            file_type,
            indexed_at: now,
            created_at,
        };
        let chunk_records: Vec<ChunkRecord> = chunks
            .iter()
            .map(|chunk| ChunkRecord {
                file_id: file_id.clone(),
                chunk_id: chunk.index,
                content: chunk.content.clone(),
                embedding_id: Some(self.generation_id.clone()),
            })
            .collect();

        // Commit. Replacing by doc_id first clears stale high-index chunks
        // from a previous, longer version of the file.
        self.meta.upsert_file(&file_record).await?;
        self.meta
            .replace_chunks_for_file(&file_id, &chunk_records)
            .await?;
        for (key, value) in &doc.metadata {
            self.meta
                .set_file_metadata(&file_id, key, &value.to_string())
                .await?;
        }
        let removed = self.vectors.delete_by_doc_id(&file_id).await?;
        let added = self.vectors.add(&records).await?;
        self.meta
            .touch_generation(&self.generation_id, added as i64 - removed as i64)
            .await?;

        self.failed.remove(path);
        info!(
            path = %path.display(),
            chunks = records.len(),
            "indexed file"
        );
        Ok(ProcessOutcome::Indexed {
            chunks: records.len(),
        })
    }

    /// Remove all state for a path. Idempotent.
    pub async fn remove(&self, path: &Path) -> Result<RemoveOutcome> {
        let path_str = path.to_string_lossy().to_string();
        let file_id = match self.meta.get_file_by_path(&path_str).await? {
            Some(record) => record.file_id,
            None => file_id_for_path(path),
        };

        let removed_vectors = self.vectors.delete_by_doc_id(&file_id).await?;
        let record_existed = self.meta.delete_file_cascading_chunks(&file_id).await?;
        if removed_vectors > 0 {
            self.meta
                .touch_generation(&self.generation_id, -(removed_vectors as i64))
                .await?;
        }

        if record_existed || removed_vectors > 0 {
            info!(
                path = %path.display(),
                removed_vectors,
                "removed file from index"
            );
        }
        Ok(RemoveOutcome {
            removed_vectors,
            record_existed,
        })
    }

    /// Embed in batches of `embedding_batch_size`, retrying transient
    /// failures with exponential backoff up to the configured budget.
    async fn embed_with_retry(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let batch_size = self.config.embedding.batch_size.max(1);
        let mut out = Vec::with_capacity(texts.len());
        for batch in texts.chunks(batch_size) {
            let mut attempt = 0u32;
            loop {
                match self.embedder.embed_documents(batch).await {
                    Ok(vectors) => {
                        out.extend(vectors);
                        break;
                    }
                    Err(e) if e.is_transient() && attempt < self.config.ingest.max_retries => {
                        attempt += 1;
                        let delay = Duration::from_millis(250 * (1 << attempt.min(6)) as u64);
                        warn!(
                            attempt,
                            delay_ms = delay.as_millis() as u64,
                            error = %e,
                            "embedding batch failed, retrying"
                        );
                        tokio::time::sleep(delay).await;
                    }
                    Err(e) => return Err(e),
                }
            }
        }
        Ok(out)
    }
}

#[async_trait]
impl Reingest for IngestPipeline {
    async fn reingest(&self, path: &Path) -> Result<()> {
        self.process(path).await.map(|_| ())
    }

    async fn remove_path(&self, path: &Path) -> Result<()> {
        self.remove(path).await.map(|_| ())
    }
}

struct InFlightGuard<'a> {
    set: &'a DashSet<PathBuf>,
    path: PathBuf,
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.set.remove(&self.path);
    }
}
