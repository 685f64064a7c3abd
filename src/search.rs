//! Search service: semantic, keyword, and hybrid query execution.
//!
//! - **Semantic** — embed the query once, cosine-rank the vector store.
//! - **Keyword** — FTS5/BM25 over chunk text (bigram path for CJK queries).
//! - **Hybrid** — run both legs concurrently under a candidate budget split
//!   by the configured ratios, then merge with a positional-bias-aware
//!   ordering for downstream LLM reranking.
//!
//! # Hybrid merge
//!
//! The union of both result sets is partitioned by `(doc_id, chunk_id)`
//! into three disjoint groups: `keyword_only`, `semantic_only`, and `both`.
//! Each group is sorted **ascending** by its rank score and the groups are
//! concatenated `keyword_only ++ semantic_only ++ both`. When the list is
//! fed to an LLM reranker, later positions bias upward, so the items
//! confirmed by both signals sit where the reranker favors them.
//!
//! Every search invocation is wrapped in the configured pipeline timeout;
//! a timeout surfaces as an explicit error, never as partial results.
//! Hybrid failure of the keyword leg degrades to semantic-only with a
//! warning.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use tracing::warn;

use crate::config::Config;
use crate::error::{EngineError, Result};
use crate::models::{ScoredChunk, SearchFilters, VectorMetadata};
use crate::vector::VectorStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearchMode {
    Semantic,
    Keyword,
    Hybrid,
}

impl SearchMode {
    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "semantic" => Ok(SearchMode::Semantic),
            "keyword" => Ok(SearchMode::Keyword),
            "hybrid" => Ok(SearchMode::Hybrid),
            other => Err(EngineError::Validation(format!(
                "unknown search type '{}'; use semantic, keyword, or hybrid",
                other
            ))),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SearchMode::Semantic => "semantic",
            SearchMode::Keyword => "keyword",
            SearchMode::Hybrid => "hybrid",
        }
    }
}

/// Which retrieval legs surfaced a hit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchGroup {
    KeywordOnly,
    SemanticOnly,
    Both,
}

/// One search result.
#[derive(Debug, Clone)]
pub struct SearchHit {
    pub doc_id: String,
    pub chunk_id: i64,
    pub content: String,
    pub vector_score: Option<f64>,
    pub keyword_score: Option<f64>,
    /// The score this hit is ordered by within its group: the semantic
    /// score for `semantic_only`, the keyword score for `keyword_only`,
    /// and the mean of both for `both`.
    pub rank_score: f64,
    pub group: MatchGroup,
    pub metadata: VectorMetadata,
}

/// Post-retrieval reordering hook. The production reranker is an external
/// LLM; the default keeps the merge order.
#[async_trait]
pub trait Reranker: Send + Sync {
    async fn rerank(&self, query: &str, hits: Vec<SearchHit>) -> Result<Vec<SearchHit>>;
}

pub struct NoopReranker;

#[async_trait]
impl Reranker for NoopReranker {
    async fn rerank(&self, _query: &str, hits: Vec<SearchHit>) -> Result<Vec<SearchHit>> {
        Ok(hits)
    }
}

pub struct SearchService {
    vectors: Arc<VectorStore>,
    config: Arc<Config>,
    reranker: Arc<dyn Reranker>,
}

impl SearchService {
    pub fn new(vectors: Arc<VectorStore>, config: Arc<Config>) -> Self {
        Self {
            vectors,
            config,
            reranker: Arc::new(NoopReranker),
        }
    }

    pub fn with_reranker(mut self, reranker: Arc<dyn Reranker>) -> Self {
        self.reranker = reranker;
        self
    }

    /// Execute a query. `top_k` and `score_threshold` default from
    /// configuration when absent. Bounded by the pipeline timeout.
    pub async fn search(
        &self,
        query: &str,
        mode: SearchMode,
        top_k: Option<usize>,
        score_threshold: Option<f64>,
        filters: &SearchFilters,
    ) -> Result<Vec<SearchHit>> {
        if query.trim().is_empty() {
            return Ok(Vec::new());
        }

        let timeout = Duration::from_millis(self.config.search.pipeline_timeout_ms);
        let top_k = top_k.unwrap_or(self.config.search.similarity_top_k);
        let threshold = score_threshold.unwrap_or(self.config.search.similarity_threshold);

        tokio::time::timeout(timeout, self.search_inner(query, mode, top_k, threshold, filters))
            .await
            .map_err(|_| EngineError::Timeout(timeout))?
    }

    async fn search_inner(
        &self,
        query: &str,
        mode: SearchMode,
        top_k: usize,
        threshold: f64,
        filters: &SearchFilters,
    ) -> Result<Vec<SearchHit>> {
        match mode {
            SearchMode::Semantic => self.semantic(query, top_k, threshold, filters).await,
            SearchMode::Keyword => self.keyword(query, top_k, filters).await,
            SearchMode::Hybrid => self.hybrid(query, top_k, threshold, filters).await,
        }
    }

    async fn semantic(
        &self,
        query: &str,
        top_k: usize,
        threshold: f64,
        filters: &SearchFilters,
    ) -> Result<Vec<SearchHit>> {
        let chunks = self.vectors.semantic_search(query, top_k, filters).await?;
        Ok(chunks
            .into_iter()
            .filter(|c| c.score >= threshold)
            .map(|c| SearchHit {
                doc_id: c.doc_id,
                chunk_id: c.chunk_id,
                content: c.content,
                vector_score: Some(c.score),
                keyword_score: None,
                rank_score: c.score,
                group: MatchGroup::SemanticOnly,
                metadata: c.metadata,
            })
            .collect())
    }

    async fn keyword(
        &self,
        query: &str,
        top_k: usize,
        filters: &SearchFilters,
    ) -> Result<Vec<SearchHit>> {
        let chunks = self.vectors.keyword_search(query, top_k, filters).await?;
        Ok(chunks
            .into_iter()
            .map(|c| SearchHit {
                doc_id: c.doc_id,
                chunk_id: c.chunk_id,
                content: c.content,
                vector_score: None,
                keyword_score: Some(c.score),
                rank_score: c.score,
                group: MatchGroup::KeywordOnly,
                metadata: c.metadata,
            })
            .collect())
    }

    async fn hybrid(
        &self,
        query: &str,
        top_k: usize,
        threshold: f64,
        filters: &SearchFilters,
    ) -> Result<Vec<SearchHit>> {
        let (semantic_k, keyword_k) = split_budget(
            self.config.search.hybrid_total_results_for_reranking,
            self.config.search.hybrid_semantic_ratio,
        );

        let (semantic_result, keyword_result) = tokio::join!(
            self.vectors.semantic_search(query, semantic_k, filters),
            self.vectors.keyword_search(query, keyword_k, filters),
        );

        let semantic = semantic_result?;
        let keyword = match keyword_result {
            Ok(hits) => hits,
            Err(e) => {
                warn!(error = %e, "hybrid keyword leg failed, degrading to semantic-only");
                let semantic_only: Vec<ScoredChunk> = semantic
                    .into_iter()
                    .filter(|c| c.score >= threshold)
                    .collect();
                let mut hits = combine_hybrid(Vec::new(), semantic_only);
                hits.truncate(top_k);
                return Ok(hits);
            }
        };

        let semantic: Vec<ScoredChunk> = semantic
            .into_iter()
            .filter(|c| c.score >= threshold)
            .collect();

        let merged = combine_hybrid(keyword, semantic);
        let mut hits = if self.config.search.enable_llm_reranking {
            self.reranker.rerank(query, merged).await?
        } else {
            merged
        };
        hits.truncate(top_k);
        Ok(hits)
    }
}

/// Split the candidate budget between the semantic and keyword legs.
/// Both legs get at least one slot.
fn split_budget(total: usize, semantic_ratio: f64) -> (usize, usize) {
    let total = total.max(2);
    let semantic = ((total as f64) * semantic_ratio).round() as usize;
    let semantic = semantic.clamp(1, total - 1);
    (semantic, total - semantic)
}

/// Positional-bias-aware merge of the two result sets.
///
/// Partitions by `(doc_id, chunk_id)` into `keyword_only`, `semantic_only`,
/// and `both`; sorts each group ascending by rank score; concatenates
/// `keyword_only ++ semantic_only ++ both`.
pub fn combine_hybrid(keyword: Vec<ScoredChunk>, semantic: Vec<ScoredChunk>) -> Vec<SearchHit> {
    let keyword_scores: HashMap<(String, i64), f64> = keyword
        .iter()
        .map(|c| ((c.doc_id.clone(), c.chunk_id), c.score))
        .collect();
    let semantic_scores: HashMap<(String, i64), f64> = semantic
        .iter()
        .map(|c| ((c.doc_id.clone(), c.chunk_id), c.score))
        .collect();

    let mut keyword_only: Vec<SearchHit> = Vec::new();
    let mut semantic_only: Vec<SearchHit> = Vec::new();
    let mut both: Vec<SearchHit> = Vec::new();

    for chunk in keyword {
        let key = (chunk.doc_id.clone(), chunk.chunk_id);
        if let Some(&vector_score) = semantic_scores.get(&key) {
            both.push(SearchHit {
                doc_id: chunk.doc_id,
                chunk_id: chunk.chunk_id,
                content: chunk.content,
                vector_score: Some(vector_score),
                keyword_score: Some(chunk.score),
                rank_score: (vector_score + chunk.score) / 2.0,
                group: MatchGroup::Both,
                metadata: chunk.metadata,
            });
        } else {
            keyword_only.push(SearchHit {
                doc_id: chunk.doc_id,
                chunk_id: chunk.chunk_id,
                content: chunk.content,
                vector_score: None,
                keyword_score: Some(chunk.score),
                rank_score: chunk.score,
                group: MatchGroup::KeywordOnly,
                metadata: chunk.metadata,
            });
        }
    }

    for chunk in semantic {
        let key = (chunk.doc_id.clone(), chunk.chunk_id);
        if keyword_scores.contains_key(&key) {
            // Already emitted into `both` from the keyword pass.
            continue;
        }
        semantic_only.push(SearchHit {
            doc_id: chunk.doc_id,
            chunk_id: chunk.chunk_id,
            content: chunk.content,
            vector_score: Some(chunk.score),
            keyword_score: None,
            rank_score: chunk.score,
            group: MatchGroup::SemanticOnly,
            metadata: chunk.metadata,
        });
    }

    let ascending = |a: &SearchHit, b: &SearchHit| {
        a.rank_score
            .partial_cmp(&b.rank_score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.doc_id.cmp(&b.doc_id))
            .then_with(|| a.chunk_id.cmp(&b.chunk_id))
    };
    keyword_only.sort_by(ascending);
    semantic_only.sort_by(ascending);
    both.sort_by(ascending);

    let mut merged = keyword_only;
    merged.extend(semantic_only);
    merged.extend(both);
    merged
}
