//! Synchronization manager: detects and repairs drift between the
//! filesystem, the metadata store, and the vector store.
//!
//! Drift taxonomy:
//!
//! | issue                | definition                                             | severity |
//! |----------------------|--------------------------------------------------------|----------|
//! | `missing_file`       | file record exists, path gone from disk                | high     |
//! | `orphaned_vector`    | vectors whose `doc_id` has no file record              | high     |
//! | `hash_mismatch`      | record's `content_hash` differs from the on-disk hash  | medium   |
//! | `new_file`           | supported file on disk without a record                | low      |
//! | `missing_vectors`    | record with chunks but no vectors for its `doc_id`     | high     |
//! | `dimension_mismatch` | stored vector dims differ from the active generation   | fatal    |
//!
//! Repairs go through the [`Reingest`](crate::pipeline::Reingest) interface
//! rather than a back-reference to the pipeline. `dimension_mismatch` is
//! never auto-fixed; it requires an explicit `force_sync`.

use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde::Serialize;
use tracing::{error, info, warn};
use walkdir::WalkDir;

use crate::config::Config;
use crate::embedding::Embedder;
use crate::error::{EngineError, Result};
use crate::meta::MetadataStore;
use crate::models::{content_hash, GenerationRecord};
use crate::pipeline::Reingest;
use crate::vector::VectorStore;
use crate::watcher::has_hidden_component;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum IssueKind {
    MissingFile,
    OrphanedVector,
    HashMismatch,
    NewFile,
    MissingVectors,
    DimensionMismatch,
}

impl IssueKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            IssueKind::MissingFile => "missing_file",
            IssueKind::OrphanedVector => "orphaned_vector",
            IssueKind::HashMismatch => "hash_mismatch",
            IssueKind::NewFile => "new_file",
            IssueKind::MissingVectors => "missing_vectors",
            IssueKind::DimensionMismatch => "dimension_mismatch",
        }
    }

    pub fn severity(&self) -> &'static str {
        match self {
            IssueKind::MissingFile | IssueKind::OrphanedVector | IssueKind::MissingVectors => {
                "high"
            }
            IssueKind::HashMismatch => "medium",
            IssueKind::NewFile => "low",
            IssueKind::DimensionMismatch => "fatal",
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SyncIssue {
    pub kind: IssueKind,
    pub severity: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub doc_id: Option<String>,
    pub detail: String,
}

impl SyncIssue {
    fn new(kind: IssueKind, detail: impl Into<String>) -> Self {
        Self {
            kind,
            severity: kind.severity(),
            path: None,
            doc_id: None,
            detail: detail.into(),
        }
    }

    fn with_path(mut self, path: impl Into<String>) -> Self {
        self.path = Some(path.into());
        self
    }

    fn with_doc(mut self, doc_id: impl Into<String>) -> Self {
        self.doc_id = Some(doc_id.into());
        self
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SyncReport {
    pub generated_at: i64,
    pub deep: bool,
    pub scanned_files: usize,
    pub total_vectors: i64,
    pub issues: Vec<SyncIssue>,
    pub issue_counts: BTreeMap<&'static str, usize>,
    /// Populated when `auto_fix` ran.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fixes: Option<FixSummary>,
}

impl SyncReport {
    pub fn total_issues(&self) -> usize {
        self.issues.len()
    }

    pub fn has_fatal(&self) -> bool {
        self.issues
            .iter()
            .any(|i| i.kind == IssueKind::DimensionMismatch)
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct FixSummary {
    pub fixed: usize,
    pub failed: usize,
    /// Issues that need `force_sync` (dimension mismatches).
    pub skipped: usize,
}

/// Rolling scheduler state, recorded on every tick.
#[derive(Debug, Clone, Default, Serialize)]
pub struct SyncStatus {
    pub last_sync_time: Option<i64>,
    pub issue_counts: BTreeMap<&'static str, usize>,
    pub running: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct ForceSyncOutcome {
    pub deleted_vectors: usize,
    pub reingested_files: usize,
    pub failed_files: usize,
}

pub struct SyncManager {
    config: Arc<Config>,
    meta: Arc<MetadataStore>,
    vectors: Arc<VectorStore>,
    reingest: Arc<dyn Reingest>,
    embedder: Arc<dyn Embedder>,
    running: AtomicBool,
    status: Mutex<SyncStatus>,
}

impl SyncManager {
    pub fn new(
        config: Arc<Config>,
        meta: Arc<MetadataStore>,
        vectors: Arc<VectorStore>,
        reingest: Arc<dyn Reingest>,
        embedder: Arc<dyn Embedder>,
    ) -> Self {
        Self {
            config,
            meta,
            vectors,
            reingest,
            embedder,
            running: AtomicBool::new(false),
            status: Mutex::new(SyncStatus::default()),
        }
    }

    pub fn status(&self) -> SyncStatus {
        let mut status = self.status.lock().unwrap().clone();
        status.running = self.running.load(Ordering::SeqCst);
        status
    }

    /// Detect drift; optionally apply repairs in the same pass.
    ///
    /// Shallow reports skip per-file hash verification; deep reports
    /// recompute every on-disk hash. A sync that is already running
    /// suppresses a new one.
    pub async fn generate_sync_report(
        &self,
        deep: bool,
        include_new: bool,
        auto_fix: bool,
    ) -> Result<SyncReport> {
        if self
            .running
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(EngineError::Validation(
                "a sync run is already in progress".into(),
            ));
        }
        let result = self.generate_inner(deep, include_new, auto_fix).await;
        self.running.store(false, Ordering::SeqCst);

        if let Ok(ref report) = result {
            let mut status = self.status.lock().unwrap();
            status.last_sync_time = Some(report.generated_at);
            status.issue_counts = report.issue_counts.clone();
        }
        result
    }

    async fn generate_inner(
        &self,
        deep: bool,
        include_new: bool,
        auto_fix: bool,
    ) -> Result<SyncReport> {
        let disk_paths = self.scan_disk();
        let disk_set: HashSet<String> = disk_paths
            .iter()
            .map(|p| p.to_string_lossy().to_string())
            .collect();

        let files = self.meta.list_files().await?;
        let known_paths: HashSet<String> = files.iter().map(|f| f.path.clone()).collect();
        let known_ids: HashSet<String> = files.iter().map(|f| f.file_id.clone()).collect();

        let mut issues: Vec<SyncIssue> = Vec::new();

        // Records whose file vanished.
        for file in &files {
            if !disk_set.contains(&file.path) {
                issues.push(
                    SyncIssue::new(IssueKind::MissingFile, "file record has no file on disk")
                        .with_path(&file.path)
                        .with_doc(&file.file_id),
                );
            }
        }

        // Files on disk without a record.
        if include_new {
            for path in &disk_set {
                if !known_paths.contains(path) {
                    issues.push(
                        SyncIssue::new(IssueKind::NewFile, "file on disk has no record")
                            .with_path(path),
                    );
                }
            }
        }

        // Hash drift (deep scans only; shallow skips per-file hashing).
        if deep {
            for file in &files {
                if !disk_set.contains(&file.path) {
                    continue;
                }
                match std::fs::read(&file.path) {
                    Ok(bytes) => {
                        if content_hash(&bytes) != file.content_hash {
                            issues.push(
                                SyncIssue::new(
                                    IssueKind::HashMismatch,
                                    "on-disk content differs from recorded hash",
                                )
                                .with_path(&file.path)
                                .with_doc(&file.file_id),
                            );
                        }
                    }
                    Err(e) => {
                        warn!(path = %file.path, error = %e, "cannot hash file during deep sync");
                    }
                }
            }
        }

        // Vectors without a file record.
        let doc_ids = self.vectors.list_doc_ids().await?;
        for doc_id in &doc_ids {
            if !known_ids.contains(doc_id) {
                let count = self.vectors.count_for_doc(doc_id).await?;
                issues.push(
                    SyncIssue::new(
                        IssueKind::OrphanedVector,
                        format!("{} vectors reference an unknown document", count),
                    )
                    .with_doc(doc_id),
                );
            }
        }

        // Records with chunks but no vectors.
        let doc_id_set: HashSet<&String> = doc_ids.iter().collect();
        for file in &files {
            if !disk_set.contains(&file.path) {
                continue;
            }
            if !doc_id_set.contains(&file.file_id)
                && self.meta.count_chunks(&file.file_id).await? > 0
            {
                issues.push(
                    SyncIssue::new(IssueKind::MissingVectors, "chunks exist but no vectors")
                        .with_path(&file.path)
                        .with_doc(&file.file_id),
                );
            }
        }

        // Stored dimensionality vs the active generation.
        let expected_dims = self.vectors.dimensions();
        for (dims, count) in self.vectors.scan_dimensions().await? {
            if dims != expected_dims {
                issues.push(SyncIssue::new(
                    IssueKind::DimensionMismatch,
                    format!(
                        "{} vectors stored with {} dimensions, active generation expects {}",
                        count, dims, expected_dims
                    ),
                ));
            }
        }

        let fixes = if auto_fix && !issues.is_empty() {
            Some(self.apply_fixes(&issues).await)
        } else {
            None
        };

        let stats = self.vectors.stats().await?;
        let mut issue_counts: BTreeMap<&'static str, usize> = BTreeMap::new();
        for issue in &issues {
            *issue_counts.entry(issue.kind.as_str()).or_default() += 1;
        }

        let report = SyncReport {
            generated_at: chrono::Utc::now().timestamp(),
            deep,
            scanned_files: disk_paths.len(),
            total_vectors: stats.total_vectors,
            issues,
            issue_counts,
            fixes,
        };

        info!(
            deep,
            issues = report.total_issues(),
            fixed = report.fixes.as_ref().map(|f| f.fixed).unwrap_or(0),
            "sync report generated"
        );
        Ok(report)
    }

    /// Repair a set of issues. Dimension mismatches are skipped; they
    /// require `force_sync`.
    pub async fn apply_fixes(&self, issues: &[SyncIssue]) -> FixSummary {
        let mut summary = FixSummary::default();

        for issue in issues {
            let outcome = match issue.kind {
                IssueKind::OrphanedVector => match &issue.doc_id {
                    Some(doc_id) => self
                        .vectors
                        .delete_by_doc_id(doc_id)
                        .await
                        .map(|_| ()),
                    None => Err(EngineError::Validation("orphan issue without doc_id".into())),
                },
                IssueKind::MissingFile => match &issue.path {
                    Some(path) => self.reingest.remove_path(Path::new(path)).await,
                    None => Err(EngineError::Validation("issue without path".into())),
                },
                IssueKind::HashMismatch | IssueKind::MissingVectors | IssueKind::NewFile => {
                    match &issue.path {
                        Some(path) => self.reingest.reingest(Path::new(path)).await,
                        None => Err(EngineError::Validation("issue without path".into())),
                    }
                }
                IssueKind::DimensionMismatch => {
                    summary.skipped += 1;
                    continue;
                }
            };

            match outcome {
                Ok(()) => summary.fixed += 1,
                Err(e) => {
                    error!(kind = issue.kind.as_str(), error = %e, "failed to repair issue");
                    summary.failed += 1;
                }
            }
        }
        summary
    }

    /// Destructive full rebuild: drop every vector, rotate the embedding
    /// generation to the current model, and re-ingest every file on disk.
    /// Caller confirmation is enforced at the tool surface.
    pub async fn force_sync(&self) -> Result<ForceSyncOutcome> {
        if self
            .running
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(EngineError::Validation(
                "a sync run is already in progress".into(),
            ));
        }
        let result = self.force_sync_inner().await;
        self.running.store(false, Ordering::SeqCst);
        result
    }

    async fn force_sync_inner(&self) -> Result<ForceSyncOutcome> {
        let deleted_vectors = self.vectors.delete_all().await?;
        self.meta.deactivate_all_generations().await?;

        let info = self.embedder.model_info();
        let now = chrono::Utc::now().timestamp();
        self.meta
            .upsert_generation(&GenerationRecord {
                generation_id: uuid::Uuid::new_v4().to_string(),
                model_name: info.name.clone(),
                service: info.service.clone(),
                dimensions: info.dimensions as i64,
                config_hash: info.config_hash(),
                active: true,
                vector_count: 0,
                created_at: now,
                last_used_at: now,
            })
            .await?;

        let mut reingested = 0usize;
        let mut failed = 0usize;
        for path in self.scan_disk() {
            match self.reingest.reingest(&path).await {
                Ok(()) => reingested += 1,
                Err(e) => {
                    error!(path = %path.display(), error = %e, "force sync failed to reingest");
                    failed += 1;
                }
            }
        }

        info!(
            deleted_vectors,
            reingested, failed, "force sync complete"
        );
        Ok(ForceSyncOutcome {
            deleted_vectors,
            reingested_files: reingested,
            failed_files: failed,
        })
    }

    /// Supported, non-hidden files currently on disk.
    fn scan_disk(&self) -> Vec<PathBuf> {
        let root = &self.config.documents_dir;
        let mut paths = Vec::new();
        for entry in WalkDir::new(root).into_iter().flatten() {
            if !entry.file_type().is_file() {
                continue;
            }
            let path = entry.path();
            let relative = path.strip_prefix(root).unwrap_or(path);
            if has_hidden_component(relative)
                || !self.config.is_supported_path(path)
                || !crate::reader::has_reader(path)
            {
                continue;
            }
            // Zero-byte files never produce chunks; reporting them as
            // new_file would re-surface on every pass.
            if entry.metadata().map(|m| m.len() == 0).unwrap_or(false) {
                continue;
            }
            paths.push(path.to_path_buf());
        }
        paths.sort();
        paths
    }

    /// Run shallow syncs at `interval_secs` and deep syncs at
    /// `deep_interval_secs`, suppressing overlap with any running sync.
    pub fn spawn_scheduler(self: &Arc<Self>) -> tokio::task::JoinHandle<()> {
        let manager = Arc::clone(self);
        tokio::spawn(async move {
            let interval = Duration::from_secs(manager.config.sync.interval_secs);
            let deep_every = manager
                .config
                .sync
                .deep_interval_secs
                .map(|secs| (secs / manager.config.sync.interval_secs).max(1));
            let auto_fix = manager.config.sync.auto_fix;

            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            // The first tick fires immediately; skip it so startup ingestion
            // settles before the first reconciliation pass.
            ticker.tick().await;

            let mut tick_count: u64 = 0;
            loop {
                ticker.tick().await;
                tick_count += 1;
                let deep = deep_every.map(|n| tick_count % n == 0).unwrap_or(false);

                match manager.generate_sync_report(deep, true, auto_fix).await {
                    Ok(report) => {
                        if report.has_fatal() {
                            error!(
                                "sync found a dimension mismatch; run force_sync to rebuild"
                            );
                        }
                    }
                    Err(EngineError::Validation(_)) => {
                        // A manual sync is running; skip this tick.
                    }
                    Err(e) => warn!(error = %e, "scheduled sync failed"),
                }
            }
        })
    }
}
