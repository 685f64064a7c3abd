//! Engine assembly: explicit construction of every sub-service.
//!
//! An [`Engine`] value owns the stores, embedder, pipeline, search service,
//! and sync manager. There are no process-wide singletons; tests construct
//! their own engine (with an injected embedder) against a scratch directory.

use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{error, info, warn};

use crate::config::Config;
use crate::db;
use crate::embedding::{create_embedder, CachingEmbedder, Embedder};
use crate::error::{EngineError, Result};
use crate::meta::MetadataStore;
use crate::migrate;
use crate::models::GenerationRecord;
use crate::pipeline::{IngestPipeline, ProcessOutcome};
use crate::search::SearchService;
use crate::sync::SyncManager;
use crate::vector::VectorStore;
use crate::watcher::{self, WatchEvent};

pub struct Engine {
    pub config: Arc<Config>,
    pub meta: Arc<MetadataStore>,
    pub vectors: Arc<VectorStore>,
    pub embedder: Arc<dyn Embedder>,
    pub pipeline: Arc<IngestPipeline>,
    pub search: Arc<SearchService>,
    pub sync: Arc<SyncManager>,
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine").finish_non_exhaustive()
    }
}

impl Engine {
    /// Build an engine with the embedding service named in the config.
    pub async fn new(config: Config) -> Result<Arc<Self>> {
        let embedder = create_embedder(&config.embedding)?;
        Self::with_embedder(config, embedder).await
    }

    /// Build an engine around an externally constructed embedder. This is
    /// the seam tests use to avoid loading a real model.
    pub async fn with_embedder(mut config: Config, embedder: Arc<dyn Embedder>) -> Result<Arc<Self>> {
        std::fs::create_dir_all(&config.documents_dir).map_err(|e| {
            EngineError::Config(format!(
                "cannot create documents directory {}: {}",
                config.documents_dir.display(),
                e
            ))
        })?;
        std::fs::create_dir_all(&config.data_dir).map_err(|e| {
            EngineError::Config(format!(
                "cannot create data directory {}: {}",
                config.data_dir.display(),
                e
            ))
        })?;
        // Canonical paths keep file ids stable across watcher, scans, and
        // tool calls regardless of how the directories were spelled.
        config.documents_dir = config.documents_dir.canonicalize().map_err(|e| {
            EngineError::Config(format!("cannot resolve documents directory: {}", e))
        })?;

        let config = Arc::new(config);

        let meta_pool = db::connect(&config.meta_db_path()).await?;
        migrate::migrate_meta(&meta_pool).await?;
        let vector_pool = db::connect(&config.vector_db_path()).await?;
        migrate::migrate_vectors(&vector_pool).await?;

        let meta = Arc::new(MetadataStore::new(meta_pool));

        let embedder: Arc<dyn Embedder> = Arc::new(CachingEmbedder::new(
            embedder,
            config.search.max_cache_size,
        ));
        let generation = ensure_generation(&meta, embedder.as_ref()).await?;

        let vectors = Arc::new(VectorStore::new(vector_pool, Arc::clone(&embedder)));
        let pipeline = Arc::new(IngestPipeline::new(
            Arc::clone(&config),
            Arc::clone(&meta),
            Arc::clone(&vectors),
            Arc::clone(&embedder),
            generation.generation_id.clone(),
        ));
        let search = Arc::new(SearchService::new(
            Arc::clone(&vectors),
            Arc::clone(&config),
        ));
        let sync = Arc::new(SyncManager::new(
            Arc::clone(&config),
            Arc::clone(&meta),
            Arc::clone(&vectors),
            pipeline.clone(),
            Arc::clone(&embedder),
        ));

        info!(
            model = %generation.model_name,
            service = %generation.service,
            dimensions = generation.dimensions,
            "engine ready"
        );
        Ok(Arc::new(Self {
            config,
            meta,
            vectors,
            embedder,
            pipeline,
            search,
            sync,
        }))
    }

    /// Run the startup reconciliation scan and process every resulting
    /// event. Returns the number of events handled.
    pub async fn ingest_existing(&self) -> Result<usize> {
        let events = watcher::startup_scan(&self.config, &self.meta).await?;
        let total = events.len();
        for event in events {
            self.handle_event(event).await;
        }
        Ok(total)
    }

    /// Drain watcher events until the channel closes. Distinct paths are
    /// processed in parallel up to the worker bound; the in-flight set keeps
    /// any single path to one build at a time.
    pub async fn run_watch_loop(self: Arc<Self>, mut rx: mpsc::Receiver<WatchEvent>) {
        while let Some(event) = rx.recv().await {
            let engine = Arc::clone(&self);
            tokio::spawn(async move {
                engine.handle_event(event).await;
            });
        }
        info!("watch channel closed, stopping event loop");
    }

    async fn handle_event(&self, event: WatchEvent) {
        let result = match &event {
            WatchEvent::Added(path) | WatchEvent::Changed(path) => {
                self.pipeline.process(path).await.map(|outcome| {
                    if let ProcessOutcome::Indexed { chunks } = outcome {
                        info!(path = %path.display(), chunks, "event processed");
                    }
                })
            }
            WatchEvent::Removed(path) => self.pipeline.remove(path).await.map(|_| ()),
        };
        if let Err(e) = result {
            match e {
                EngineError::FileProcessing { .. } => {
                    warn!(error = %e, "file skipped");
                }
                other => error!(error = %other, "event handling failed"),
            }
        }
    }
}

/// Resolve the active embedding generation against the configured model.
///
/// First run creates and activates a generation. A matching active
/// generation is reused. An active generation with different dimensions or
/// config hash is a fatal integrity error: the stored vectors are not
/// comparable to new ones, and only `force_sync` may rotate the generation.
async fn ensure_generation(
    meta: &MetadataStore,
    embedder: &dyn Embedder,
) -> Result<GenerationRecord> {
    let info = embedder.model_info();
    let config_hash = info.config_hash();
    let now = chrono::Utc::now().timestamp();

    match meta.get_active_generation().await? {
        Some(active) => {
            if active.dimensions as usize != info.dimensions || active.config_hash != config_hash {
                return Err(EngineError::dimension_mismatch(format!(
                    "active generation is {} ({}d, hash {}), configured model is {} ({}d, hash {})",
                    active.model_name,
                    active.dimensions,
                    &active.config_hash[..12.min(active.config_hash.len())],
                    info.name,
                    info.dimensions,
                    &config_hash[..12],
                )));
            }
            meta.touch_generation(&active.generation_id, 0).await?;
            Ok(active)
        }
        None => {
            let record = GenerationRecord {
                generation_id: uuid::Uuid::new_v4().to_string(),
                model_name: info.name.clone(),
                service: info.service.clone(),
                dimensions: info.dimensions as i64,
                config_hash,
                active: true,
                vector_count: 0,
                created_at: now,
                last_used_at: now,
            };
            meta.upsert_generation(&record).await?;
            Ok(record)
        }
    }
}
