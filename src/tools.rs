//! Tool surface: stateless dispatch from external tool requests to the
//! engine.
//!
//! Each tool validates its arguments, invokes one core operation, and
//! returns a structured envelope:
//!
//! ```json
//! { "ok": true,  "data": { ... } }
//! { "ok": false, "error_code": "validation_error", "message": "...", "suggestion": "..." }
//! ```
//!
//! The tool surface holds no state beyond the request; everything it needs
//! lives in the [`ToolContext`].

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::engine::Engine;
use crate::error::{EngineError, Result};
use crate::models::SearchFilters;
use crate::search::{MatchGroup, SearchHit, SearchMode};

/// Per-request context handed to every tool execution.
pub struct ToolContext {
    pub engine: Arc<Engine>,
}

impl ToolContext {
    pub fn new(engine: Arc<Engine>) -> Self {
        Self { engine }
    }
}

/// A callable tool exposed over the wire.
#[async_trait]
pub trait Tool: Send + Sync {
    /// Tool identifier as exposed to clients.
    fn name(&self) -> &str;

    /// One-line description for tool discovery.
    fn description(&self) -> &str;

    /// JSON Schema describing the accepted parameters.
    fn parameters_schema(&self) -> Value;

    /// Run the tool. Errors are mapped into the response envelope by the
    /// dispatcher.
    async fn execute(&self, params: Value, ctx: &ToolContext) -> Result<Value>;
}

/// Registry of all available tools.
pub struct ToolRegistry {
    tools: Vec<Box<dyn Tool>>,
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self { tools: Vec::new() }
    }

    /// All built-in tools.
    pub fn builtin() -> Self {
        let mut registry = Self::new();
        registry.register(Box::new(SearchTool));
        registry.register(Box::new(ListSourcesTool));
        registry.register(Box::new(ExtractInformationTool));
        registry.register(Box::new(SyncCheckTool));
        registry.register(Box::new(CleanupOrphanedTool));
        registry.register(Box::new(ForceSyncTool));
        registry.register(Box::new(IntegrityReportTool));
        registry.register(Box::new(VectordbInfoTool));
        registry
    }

    pub fn register(&mut self, tool: Box<dyn Tool>) {
        self.tools.push(tool);
    }

    pub fn find(&self, name: &str) -> Option<&dyn Tool> {
        self.tools
            .iter()
            .find(|t| t.name() == name)
            .map(|t| t.as_ref())
    }

    pub fn tools(&self) -> &[Box<dyn Tool>] {
        &self.tools
    }

    pub fn names(&self) -> Vec<&str> {
        self.tools.iter().map(|t| t.name()).collect()
    }

    /// Execute a tool by name and wrap the outcome in the response
    /// envelope. Never returns an error; failures become `ok: false`.
    pub async fn dispatch(&self, name: &str, params: Value, ctx: &ToolContext) -> Value {
        let Some(tool) = self.find(name) else {
            return error_envelope(&EngineError::Validation(format!(
                "unknown tool '{}'; available: {}",
                name,
                self.names().join(", ")
            )));
        };
        match tool.execute(params, ctx).await {
            Ok(data) => ok_envelope(data),
            Err(e) => error_envelope(&e),
        }
    }
}

pub fn ok_envelope(data: Value) -> Value {
    json!({ "ok": true, "data": data })
}

pub fn error_envelope(error: &EngineError) -> Value {
    json!({
        "ok": false,
        "error_code": error.code(),
        "message": error.to_string(),
        "suggestion": error.suggestion(),
    })
}

// ── Parameter helpers ───────────────────────────────────────────────────

fn require_str(params: &Value, key: &str) -> Result<String> {
    params
        .get(key)
        .and_then(|v| v.as_str())
        .map(|s| s.to_string())
        .filter(|s| !s.trim().is_empty())
        .ok_or_else(|| EngineError::Validation(format!("'{}' is required", key)))
}

fn opt_str(params: &Value, key: &str) -> Option<String> {
    params
        .get(key)
        .and_then(|v| v.as_str())
        .map(|s| s.to_string())
}

fn opt_u64(params: &Value, key: &str) -> Result<Option<u64>> {
    match params.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(value) => value
            .as_u64()
            .map(Some)
            .ok_or_else(|| EngineError::Validation(format!("'{}' must be a non-negative integer", key))),
    }
}

fn opt_f64(params: &Value, key: &str) -> Result<Option<f64>> {
    match params.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(value) => value
            .as_f64()
            .map(Some)
            .ok_or_else(|| EngineError::Validation(format!("'{}' must be a number", key))),
    }
}

fn opt_bool(params: &Value, key: &str) -> Result<Option<bool>> {
    match params.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(value) => value
            .as_bool()
            .map(Some)
            .ok_or_else(|| EngineError::Validation(format!("'{}' must be a boolean", key))),
    }
}

fn hit_to_json(rank: usize, hit: &SearchHit) -> Value {
    let mut entry = json!({
        "rank": rank,
        "content": hit.content,
        "vector_score": hit.vector_score,
        "match_group": hit.group,
        "source": {
            "filename": hit.metadata.filename,
            "filepath": hit.metadata.filepath,
            "file_type": hit.metadata.file_type,
            "chunk_index": hit.metadata.chunk_index,
        },
        "metadata": serde_json::to_value(&hit.metadata).unwrap_or(Value::Null),
    });
    if let Some(keyword_score) = hit.keyword_score {
        entry["keyword_score"] = json!(keyword_score);
    }
    entry
}

/// Present hits to the caller ranked best-first, regardless of the internal
/// reranker-input ordering.
fn ranked_desc(mut hits: Vec<SearchHit>) -> Vec<SearchHit> {
    hits.sort_by(|a, b| {
        b.rank_score
            .partial_cmp(&a.rank_score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| matches!(b.group, MatchGroup::Both).cmp(&matches!(a.group, MatchGroup::Both)))
    });
    hits
}

// ── search ──────────────────────────────────────────────────────────────

struct SearchTool;

#[async_trait]
impl Tool for SearchTool {
    fn name(&self) -> &str {
        "search"
    }

    fn description(&self) -> &str {
        "Search indexed documents (semantic, keyword, or hybrid)"
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "query": { "type": "string", "description": "Search query text" },
                "topK": { "type": "integer", "minimum": 1, "maximum": 50 },
                "scoreThreshold": { "type": "number", "minimum": 0.0, "maximum": 1.0 },
                "searchType": { "type": "string", "enum": ["semantic", "keyword", "hybrid"] }
            },
            "required": ["query"]
        })
    }

    async fn execute(&self, params: Value, ctx: &ToolContext) -> Result<Value> {
        let query = require_str(&params, "query")?;

        let top_k = match opt_u64(&params, "topK")? {
            Some(k) => {
                if !(1..=50).contains(&k) {
                    return Err(EngineError::Validation("'topK' must be in [1, 50]".into()));
                }
                Some(k as usize)
            }
            None => None,
        };

        let threshold = match opt_f64(&params, "scoreThreshold")? {
            Some(t) => {
                if !(0.0..=1.0).contains(&t) {
                    return Err(EngineError::Validation(
                        "'scoreThreshold' must be in [0.0, 1.0]".into(),
                    ));
                }
                Some(t)
            }
            None => None,
        };

        let mode = match opt_str(&params, "searchType") {
            Some(s) => SearchMode::parse(&s)?,
            None => SearchMode::Hybrid,
        };

        let hits = ctx
            .engine
            .search
            .search(&query, mode, top_k, threshold, &SearchFilters::default())
            .await?;

        let results: Vec<Value> = ranked_desc(hits)
            .iter()
            .enumerate()
            .map(|(i, hit)| hit_to_json(i + 1, hit))
            .collect();

        Ok(json!({
            "query": query,
            "search_type": mode.as_str(),
            "total": results.len(),
            "results": results,
        }))
    }
}

// ── list_sources ────────────────────────────────────────────────────────

struct ListSourcesTool;

#[async_trait]
impl Tool for ListSourcesTool {
    fn name(&self) -> &str {
        "list_sources"
    }

    fn description(&self) -> &str {
        "List indexed source files, optionally grouped and with chunk statistics"
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "include_stats": { "type": "boolean" },
                "source_type_filter": { "type": "string" },
                "group_by": { "type": "string", "enum": ["source_type", "file_type"] },
                "limit": { "type": "integer", "minimum": 1 }
            }
        })
    }

    async fn execute(&self, params: Value, ctx: &ToolContext) -> Result<Value> {
        let include_stats = opt_bool(&params, "include_stats")?.unwrap_or(false);
        let source_type_filter = opt_str(&params, "source_type_filter");
        let group_by = opt_str(&params, "group_by");
        if let Some(ref g) = group_by {
            if g != "source_type" && g != "file_type" {
                return Err(EngineError::Validation(
                    "'group_by' must be source_type or file_type".into(),
                ));
            }
        }
        let limit = opt_u64(&params, "limit")?.map(|n| n as usize);

        // Single watched directory: every source is of type "filesystem".
        if let Some(ref filter) = source_type_filter {
            if filter != "filesystem" {
                return Ok(json!({ "total_files": 0, "sources": [] }));
            }
        }

        let files = ctx.engine.meta.list_files().await?;
        let total_files = files.len();
        let limited: Vec<_> = match limit {
            Some(n) => files.into_iter().take(n).collect(),
            None => files,
        };

        let mut sources = Vec::with_capacity(limited.len());
        let mut groups: BTreeMap<String, usize> = BTreeMap::new();
        for file in &limited {
            let mut entry = json!({
                "filename": file.name,
                "filepath": file.path,
                "file_type": file.file_type,
                "source_type": "filesystem",
                "size": file.size,
                "content_hash": file.content_hash,
                "indexed_at": file.indexed_at,
            });
            if include_stats {
                entry["chunks"] = json!(ctx.engine.meta.count_chunks(&file.file_id).await?);
                entry["vectors"] = json!(ctx.engine.vectors.count_for_doc(&file.file_id).await?);
            }
            sources.push(entry);

            if let Some(ref g) = group_by {
                let key = if g == "file_type" {
                    file.file_type.clone()
                } else {
                    "filesystem".to_string()
                };
                *groups.entry(key).or_default() += 1;
            }
        }

        let mut data = json!({
            "total_files": total_files,
            "sources": sources,
        });
        if group_by.is_some() {
            data["groups"] = serde_json::to_value(&groups).unwrap_or(Value::Null);
        }
        Ok(data)
    }
}

// ── extract_information ─────────────────────────────────────────────────

struct ExtractInformationTool;

#[async_trait]
impl Tool for ExtractInformationTool {
    fn name(&self) -> &str {
        "extract_information"
    }

    fn description(&self) -> &str {
        "Retrieve context chunks for a question and extract candidate answer sentences"
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "question": { "type": "string" },
                "context_limit": { "type": "integer", "minimum": 1, "maximum": 50 },
                "sources": { "type": "array", "items": { "type": "string" } },
                "search_method": { "type": "string", "enum": ["semantic", "keyword", "hybrid"] }
            },
            "required": ["question"]
        })
    }

    async fn execute(&self, params: Value, ctx: &ToolContext) -> Result<Value> {
        let question = require_str(&params, "question")?;
        let context_limit = opt_u64(&params, "context_limit")?.unwrap_or(5) as usize;
        let mode = match opt_str(&params, "search_method") {
            Some(s) => SearchMode::parse(&s)?,
            None => SearchMode::Hybrid,
        };

        // Optional restriction to named source files.
        let mut filters = SearchFilters::default();
        if let Some(Value::Array(names)) = params.get("sources") {
            let wanted: Vec<String> = names
                .iter()
                .filter_map(|v| v.as_str())
                .map(|s| s.to_string())
                .collect();
            if !wanted.is_empty() {
                let mut doc_ids = Vec::new();
                for file in ctx.engine.meta.list_files().await? {
                    if wanted.iter().any(|w| w == &file.name || w == &file.path) {
                        doc_ids.push(file.file_id);
                    }
                }
                if doc_ids.is_empty() {
                    return Ok(json!({
                        "question": question,
                        "context": [],
                        "extractions": [],
                    }));
                }
                filters.doc_ids = Some(doc_ids);
            }
        }

        let hits = ctx
            .engine
            .search
            .search(&question, mode, Some(context_limit), None, &filters)
            .await?;
        let hits = ranked_desc(hits);

        let context: Vec<Value> = hits
            .iter()
            .enumerate()
            .map(|(i, hit)| hit_to_json(i + 1, hit))
            .collect();

        let extractions = extract_sentences(&question, &hits, 5);

        Ok(json!({
            "question": question,
            "search_method": mode.as_str(),
            "context": context,
            "extractions": extractions,
        }))
    }
}

/// Keyword-overlap heuristic: score each sentence in the context by the
/// fraction of question terms it contains.
fn extract_sentences(question: &str, hits: &[SearchHit], limit: usize) -> Vec<Value> {
    let terms: Vec<String> = question
        .to_lowercase()
        .split_whitespace()
        .filter(|w| w.len() > 2)
        .map(|w| w.trim_matches(|c: char| !c.is_alphanumeric()).to_string())
        .filter(|w| !w.is_empty())
        .collect();
    if terms.is_empty() {
        return Vec::new();
    }

    let mut scored: Vec<(f64, String, String)> = Vec::new();
    for hit in hits {
        for sentence in split_sentences(&hit.content) {
            let lower = sentence.to_lowercase();
            let matched = terms.iter().filter(|t| lower.contains(t.as_str())).count();
            if matched == 0 {
                continue;
            }
            let score = matched as f64 / terms.len() as f64;
            scored.push((score, sentence, hit.metadata.filename.clone()));
        }
    }

    scored.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(std::cmp::Ordering::Equal));
    scored.truncate(limit);
    scored
        .into_iter()
        .map(|(score, sentence, source)| {
            json!({ "sentence": sentence, "score": score, "source": source })
        })
        .collect()
}

fn split_sentences(text: &str) -> Vec<String> {
    let mut sentences = Vec::new();
    let mut current = String::new();
    for c in text.chars() {
        current.push(c);
        if matches!(c, '.' | '!' | '?') {
            let trimmed = current.trim();
            if !trimmed.is_empty() {
                sentences.push(trimmed.to_string());
            }
            current.clear();
        }
    }
    let trimmed = current.trim();
    if !trimmed.is_empty() {
        sentences.push(trimmed.to_string());
    }
    sentences
}

// ── vector_db_sync_check ────────────────────────────────────────────────

struct SyncCheckTool;

#[async_trait]
impl Tool for SyncCheckTool {
    fn name(&self) -> &str {
        "vector_db_sync_check"
    }

    fn description(&self) -> &str {
        "Check filesystem / metadata / vector store consistency, optionally repairing drift"
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "deepScan": { "type": "boolean" },
                "includeNewFiles": { "type": "boolean" },
                "autoFix": { "type": "boolean" }
            }
        })
    }

    async fn execute(&self, params: Value, ctx: &ToolContext) -> Result<Value> {
        let deep = opt_bool(&params, "deepScan")?.unwrap_or(false);
        let include_new = opt_bool(&params, "includeNewFiles")?.unwrap_or(true);
        let auto_fix = opt_bool(&params, "autoFix")?.unwrap_or(false);

        let report = ctx
            .engine
            .sync
            .generate_sync_report(deep, include_new, auto_fix)
            .await?;

        Ok(serde_json::to_value(&report)
            .map_err(|e| EngineError::Search(format!("report serialization: {}", e)))?)
    }
}

// ── vector_db_cleanup_orphaned ──────────────────────────────────────────

struct CleanupOrphanedTool;

#[async_trait]
impl Tool for CleanupOrphanedTool {
    fn name(&self) -> &str {
        "vector_db_cleanup_orphaned"
    }

    fn description(&self) -> &str {
        "Delete vectors whose document no longer has a file record"
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "dryRun": { "type": "boolean", "description": "Report without deleting (default true)" }
            }
        })
    }

    async fn execute(&self, params: Value, ctx: &ToolContext) -> Result<Value> {
        let dry_run = opt_bool(&params, "dryRun")?.unwrap_or(true);

        let known: std::collections::HashSet<String> = ctx
            .engine
            .meta
            .list_files()
            .await?
            .into_iter()
            .map(|f| f.file_id)
            .collect();

        let mut orphaned: Vec<(String, i64)> = Vec::new();
        for doc_id in ctx.engine.vectors.list_doc_ids().await? {
            if !known.contains(&doc_id) {
                let count = ctx.engine.vectors.count_for_doc(&doc_id).await?;
                orphaned.push((doc_id, count));
            }
        }

        let vectors_affected: i64 = orphaned.iter().map(|(_, n)| n).sum();
        let mut removed = 0usize;
        if !dry_run {
            for (doc_id, _) in &orphaned {
                removed += ctx.engine.vectors.delete_by_doc_id(doc_id).await?;
            }
        }

        Ok(json!({
            "dry_run": dry_run,
            "orphaned_documents": orphaned.len(),
            "vectors_affected": vectors_affected,
            "vectors_removed": removed,
            "doc_ids": orphaned.iter().map(|(id, _)| id.clone()).collect::<Vec<_>>(),
        }))
    }
}

// ── vector_db_force_sync ────────────────────────────────────────────────

struct ForceSyncTool;

#[async_trait]
impl Tool for ForceSyncTool {
    fn name(&self) -> &str {
        "vector_db_force_sync"
    }

    fn description(&self) -> &str {
        "Destructive full rebuild: delete all vectors, rotate the embedding generation, re-ingest everything"
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "confirm": { "type": "boolean", "description": "Must be true; this operation is destructive" }
            }
        })
    }

    async fn execute(&self, params: Value, ctx: &ToolContext) -> Result<Value> {
        if !opt_bool(&params, "confirm")?.unwrap_or(false) {
            return Ok(json!({
                "warning": "force sync deletes every stored vector and re-ingests all files; \
                            pass confirm: true to proceed",
                "executed": false,
            }));
        }

        let outcome = ctx.engine.sync.force_sync().await?;
        let stats = ctx.engine.vectors.stats().await?;

        Ok(json!({
            "executed": true,
            "deleted_vectors": outcome.deleted_vectors,
            "reingested_files": outcome.reingested_files,
            "failed_files": outcome.failed_files,
            "total_vectors": stats.total_vectors,
        }))
    }
}

// ── vector_db_integrity_report ──────────────────────────────────────────

struct IntegrityReportTool;

#[async_trait]
impl Tool for IntegrityReportTool {
    fn name(&self) -> &str {
        "vector_db_integrity_report"
    }

    fn description(&self) -> &str {
        "Produce a consistency report in summary, detailed, or json form"
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "format": { "type": "string", "enum": ["summary", "detailed", "json"] }
            }
        })
    }

    async fn execute(&self, params: Value, ctx: &ToolContext) -> Result<Value> {
        let format = opt_str(&params, "format").unwrap_or_else(|| "summary".to_string());
        if !matches!(format.as_str(), "summary" | "detailed" | "json") {
            return Err(EngineError::Validation(
                "'format' must be summary, detailed, or json".into(),
            ));
        }

        let report = ctx.engine.sync.generate_sync_report(false, true, false).await?;

        let data = match format.as_str() {
            "json" => serde_json::to_value(&report)
                .map_err(|e| EngineError::Search(format!("report serialization: {}", e)))?,
            "summary" => json!({
                "format": "summary",
                "healthy": report.total_issues() == 0,
                "total_issues": report.total_issues(),
                "issue_counts": report.issue_counts,
                "scanned_files": report.scanned_files,
                "total_vectors": report.total_vectors,
                "generated_at": report.generated_at,
            }),
            _ => json!({
                "format": "detailed",
                "healthy": report.total_issues() == 0,
                "total_issues": report.total_issues(),
                "issue_counts": report.issue_counts,
                "scanned_files": report.scanned_files,
                "total_vectors": report.total_vectors,
                "generated_at": report.generated_at,
                "issues": report.issues.iter().map(|i| json!({
                    "kind": i.kind.as_str(),
                    "severity": i.severity,
                    "path": i.path,
                    "doc_id": i.doc_id,
                    "detail": i.detail,
                })).collect::<Vec<_>>(),
            }),
        };
        Ok(data)
    }
}

// ── get_vectordb_info ───────────────────────────────────────────────────

struct VectordbInfoTool;

#[async_trait]
impl Tool for VectordbInfoTool {
    fn name(&self) -> &str {
        "get_vectordb_info"
    }

    fn description(&self) -> &str {
        "Index statistics: file count, vector count, dimensions, model, last update"
    }

    fn parameters_schema(&self) -> Value {
        json!({ "type": "object", "properties": {} })
    }

    async fn execute(&self, _params: Value, ctx: &ToolContext) -> Result<Value> {
        let stats = ctx.engine.vectors.stats().await?;
        let total_files = ctx.engine.meta.count_files().await?;
        let generation = ctx.engine.meta.get_active_generation().await?;

        Ok(json!({
            "total_files": total_files,
            "total_vectors": stats.total_vectors,
            "dimensions": stats.dimensions,
            "model_name": generation.as_ref().map(|g| g.model_name.clone()),
            "embedding_service": generation.as_ref().map(|g| g.service.clone()),
            "last_updated": stats.last_updated,
            "sync": serde_json::to_value(ctx.engine.sync.status()).unwrap_or(Value::Null),
        }))
    }
}
