//! Persistent vector store: `(doc_id, chunk_id)` → normalized vector, chunk
//! text, and an opaque metadata blob.
//!
//! Backed by its own SQLite database under `data_dir/vectors/`. Semantic
//! search is a brute-force cosine scan over filtered rows; keyword search
//! uses an FTS5 table with BM25 ranking. Queries in non-space-segmented
//! scripts (Korean/CJK) are matched against a character-bigram shadow column
//! instead of the raw text column.
//!
//! Invariants enforced here:
//! - every stored vector has the active generation's dimensions (violations
//!   are rejected with an integrity error);
//! - all records of one `add` batch become visible together;
//! - `add` is idempotent on `(doc_id, chunk_id)` — matching content is a
//!   no-op, differing content replaces the prior vector.

use std::collections::HashSet;
use std::sync::Arc;

use sqlx::{Row, SqlitePool};

use crate::embedding::{blob_to_vec, cosine_similarity, vec_to_blob, Embedder};
use crate::error::{EngineError, Result};
use crate::models::{ScoredChunk, SearchFilters, StoreStats, VectorMetadata, VectorRecord};

pub struct VectorStore {
    pool: SqlitePool,
    embedder: Arc<dyn Embedder>,
    dimensions: usize,
}

impl VectorStore {
    pub fn new(pool: SqlitePool, embedder: Arc<dyn Embedder>) -> Self {
        let dimensions = embedder.model_info().dimensions;
        Self {
            pool,
            embedder,
            dimensions,
        }
    }

    pub fn dimensions(&self) -> usize {
        self.dimensions
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    // ── Writes ──────────────────────────────────────────────────────────

    /// Insert a batch of vector records in one transaction.
    ///
    /// Returns the number of rows actually written (records whose id and
    /// content already match are skipped).
    pub async fn add(&self, records: &[VectorRecord]) -> Result<usize> {
        for record in records {
            if record.vector.len() != self.dimensions {
                return Err(EngineError::dimension_mismatch(format!(
                    "vector for ({}, {}) has {} dimensions, active generation expects {}",
                    record.doc_id,
                    record.chunk_id,
                    record.vector.len(),
                    self.dimensions
                )));
            }
        }

        let now = chrono::Utc::now().timestamp();
        let mut written = 0usize;
        let mut tx = self.pool.begin().await?;

        for record in records {
            let existing: Option<String> = sqlx::query_scalar(
                "SELECT content FROM vectors WHERE doc_id = ? AND chunk_id = ?",
            )
            .bind(&record.doc_id)
            .bind(record.chunk_id)
            .fetch_optional(&mut *tx)
            .await?;

            if existing.as_deref() == Some(record.content.as_str()) {
                continue;
            }

            let metadata_json = serde_json::to_string(&record.metadata)
                .map_err(|e| EngineError::Search(format!("metadata serialization: {}", e)))?;
            let tags_json = serde_json::to_string(&record.metadata.tags)
                .map_err(|e| EngineError::Search(format!("tags serialization: {}", e)))?;

            sqlx::query(
                r#"
                INSERT INTO vectors
                    (doc_id, chunk_id, embedding, content, contextual_text, model_name, file_type, modified_at, tags_json, metadata_json, created_at)
                VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                ON CONFLICT(doc_id, chunk_id) DO UPDATE SET
                    embedding = excluded.embedding,
                    content = excluded.content,
                    contextual_text = excluded.contextual_text,
                    model_name = excluded.model_name,
                    file_type = excluded.file_type,
                    modified_at = excluded.modified_at,
                    tags_json = excluded.tags_json,
                    metadata_json = excluded.metadata_json,
                    created_at = excluded.created_at
                "#,
            )
            .bind(&record.doc_id)
            .bind(record.chunk_id)
            .bind(vec_to_blob(&record.vector))
            .bind(&record.content)
            .bind(&record.contextual_text)
            .bind(&record.model_name)
            .bind(&record.metadata.file_type)
            .bind(record.metadata.modified_at)
            .bind(&tags_json)
            .bind(&metadata_json)
            .bind(now)
            .execute(&mut *tx)
            .await?;

            sqlx::query("DELETE FROM vectors_fts WHERE doc_id = ? AND chunk_id = ?")
                .bind(&record.doc_id)
                .bind(record.chunk_id)
                .execute(&mut *tx)
                .await?;
            sqlx::query(
                "INSERT INTO vectors_fts (doc_id, chunk_id, content, content_ngram) VALUES (?, ?, ?, ?)",
            )
            .bind(&record.doc_id)
            .bind(record.chunk_id)
            .bind(&record.content)
            .bind(ngram_text(&record.content))
            .execute(&mut *tx)
            .await?;

            written += 1;
        }

        tx.commit().await?;
        Ok(written)
    }

    /// Remove all vectors for a file. Returns the number removed.
    /// Idempotent: removing an unknown `doc_id` returns 0.
    pub async fn delete_by_doc_id(&self, doc_id: &str) -> Result<usize> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM vectors_fts WHERE doc_id = ?")
            .bind(doc_id)
            .execute(&mut *tx)
            .await?;
        let result = sqlx::query("DELETE FROM vectors WHERE doc_id = ?")
            .bind(doc_id)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(result.rows_affected() as usize)
    }

    /// Drop every vector. Used by `force_sync`.
    pub async fn delete_all(&self) -> Result<usize> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM vectors_fts").execute(&mut *tx).await?;
        let result = sqlx::query("DELETE FROM vectors").execute(&mut *tx).await?;
        tx.commit().await?;
        Ok(result.rows_affected() as usize)
    }

    // ── Searches ────────────────────────────────────────────────────────

    /// Embed the query, scan all vectors matching `filters`, and return the
    /// top `k` by cosine similarity with `score ∈ [0, 1]`.
    ///
    /// Cosine distance `d = 1 - cos ∈ [0, 2]` maps to
    /// `score = max(0, 1 - d/2)`.
    pub async fn semantic_search(
        &self,
        query_text: &str,
        k: usize,
        filters: &SearchFilters,
    ) -> Result<Vec<ScoredChunk>> {
        let query_vec = self.embedder.embed_query(query_text).await?;

        let rows = self.filtered_rows(filters).await?;

        let mut candidates: Vec<ScoredChunk> = rows
            .into_iter()
            .map(|row| {
                let vector = blob_to_vec(&row.embedding);
                let cos = cosine_similarity(&query_vec, &vector) as f64;
                let distance = 1.0 - cos;
                let score = (1.0 - distance / 2.0).max(0.0);
                ScoredChunk {
                    doc_id: row.doc_id,
                    chunk_id: row.chunk_id,
                    content: row.content,
                    score,
                    metadata: row.metadata,
                }
            })
            .collect();

        candidates.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        candidates.truncate(k);
        Ok(candidates)
    }

    /// Full-text match over chunk content with BM25 ranking. Scores are
    /// negated BM25 ranks (higher is better) and unbounded above.
    pub async fn keyword_search(
        &self,
        query_text: &str,
        k: usize,
        filters: &SearchFilters,
    ) -> Result<Vec<ScoredChunk>> {
        let match_query = if is_cjk_text(query_text) {
            fts_match_query("content_ngram", &ngram_text(query_text))
        } else {
            fts_match_query("content", query_text)
        };
        if match_query.is_empty() {
            return Ok(Vec::new());
        }

        let sql = r#"
            SELECT f.doc_id AS doc_id, f.chunk_id AS chunk_id, f.rank AS rank,
                   v.content AS content, v.metadata_json AS metadata_json,
                   v.file_type AS file_type, v.modified_at AS modified_at, v.tags_json AS tags_json
            FROM vectors_fts f
            JOIN vectors v ON v.doc_id = f.doc_id AND v.chunk_id = f.chunk_id
            WHERE vectors_fts MATCH ?
            ORDER BY f.rank
            LIMIT ?
            "#;

        let rows = sqlx::query(sql)
            .bind(&match_query)
            .bind((k * 4).max(k) as i64)
            .fetch_all(&self.pool)
            .await?;

        let mut candidates = Vec::new();
        for row in rows {
            let file_type: String = row.get("file_type");
            let modified_at: i64 = row.get("modified_at");
            let tags_json: String = row.get("tags_json");
            let tags: Vec<String> = serde_json::from_str(&tags_json).unwrap_or_default();
            if !filters_match(filters, &file_type, row.get("doc_id"), modified_at, &tags) {
                continue;
            }

            let rank: f64 = row.get("rank");
            let metadata_json: String = row.get("metadata_json");
            candidates.push(ScoredChunk {
                doc_id: row.get("doc_id"),
                chunk_id: row.get("chunk_id"),
                content: row.get("content"),
                score: -rank,
                metadata: serde_json::from_str(&metadata_json).unwrap_or_default(),
            });
            if candidates.len() >= k {
                break;
            }
        }
        Ok(candidates)
    }

    // ── Introspection ───────────────────────────────────────────────────

    pub async fn stats(&self) -> Result<StoreStats> {
        let total_vectors: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM vectors")
            .fetch_one(&self.pool)
            .await?;
        let last_updated: Option<i64> = sqlx::query_scalar("SELECT MAX(created_at) FROM vectors")
            .fetch_one(&self.pool)
            .await?;
        Ok(StoreStats {
            total_vectors,
            dimensions: self.dimensions,
            last_updated,
        })
    }

    /// Rebuild the full-text index and reclaim tombstoned space.
    pub async fn compact(&self) -> Result<()> {
        sqlx::query("INSERT INTO vectors_fts(vectors_fts) VALUES ('optimize')")
            .execute(&self.pool)
            .await?;
        sqlx::query("VACUUM").execute(&self.pool).await?;
        Ok(())
    }

    pub async fn list_doc_ids(&self) -> Result<Vec<String>> {
        let rows = sqlx::query_scalar("SELECT DISTINCT doc_id FROM vectors")
            .fetch_all(&self.pool)
            .await?;
        Ok(rows)
    }

    pub async fn count_for_doc(&self, doc_id: &str) -> Result<i64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM vectors WHERE doc_id = ?")
            .bind(doc_id)
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }

    pub async fn has_vector(&self, doc_id: &str, chunk_id: i64) -> Result<bool> {
        let count: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM vectors WHERE doc_id = ? AND chunk_id = ?")
                .bind(doc_id)
                .bind(chunk_id)
                .fetch_one(&self.pool)
                .await?;
        Ok(count > 0)
    }

    /// Distinct stored vector dimensionalities with row counts. A healthy
    /// store reports at most one entry, equal to the active generation.
    pub async fn scan_dimensions(&self) -> Result<Vec<(usize, i64)>> {
        let rows = sqlx::query(
            "SELECT LENGTH(embedding) / 4 AS dims, COUNT(*) AS n FROM vectors GROUP BY dims",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(rows
            .iter()
            .map(|r| (r.get::<i64, _>("dims") as usize, r.get::<i64, _>("n")))
            .collect())
    }

    // ── Internal ────────────────────────────────────────────────────────

    async fn filtered_rows(&self, filters: &SearchFilters) -> Result<Vec<VectorRow>> {
        enum Bind {
            Text(String),
            Int(i64),
        }

        let mut sql = String::from(
            "SELECT doc_id, chunk_id, embedding, content, metadata_json, file_type, modified_at, tags_json FROM vectors",
        );
        let mut clauses: Vec<String> = Vec::new();
        let mut binds: Vec<Bind> = Vec::new();

        if let Some(ref types) = filters.file_types {
            let placeholders = vec!["?"; types.len()].join(", ");
            clauses.push(format!("file_type IN ({})", placeholders));
            binds.extend(types.iter().map(|t| Bind::Text(t.to_lowercase())));
        }
        if let Some(ref ids) = filters.doc_ids {
            let placeholders = vec!["?"; ids.len()].join(", ");
            clauses.push(format!("doc_id IN ({})", placeholders));
            binds.extend(ids.iter().map(|id| Bind::Text(id.clone())));
        }
        if let Some(after) = filters.modified_after {
            clauses.push("modified_at >= ?".to_string());
            binds.push(Bind::Int(after));
        }
        if let Some(before) = filters.modified_before {
            clauses.push("modified_at <= ?".to_string());
            binds.push(Bind::Int(before));
        }
        if !clauses.is_empty() {
            sql.push_str(" WHERE ");
            sql.push_str(&clauses.join(" AND "));
        }

        let mut query = sqlx::query(&sql);
        for bind in &binds {
            query = match bind {
                Bind::Text(s) => query.bind(s),
                Bind::Int(n) => query.bind(n),
            };
        }
        let rows = query.fetch_all(&self.pool).await?;

        let wanted_tags: Option<HashSet<&str>> = filters
            .tags
            .as_ref()
            .map(|tags| tags.iter().map(|t| t.as_str()).collect());

        let mut out = Vec::with_capacity(rows.len());
        for row in rows {
            let tags_json: String = row.get("tags_json");
            let tags: Vec<String> = serde_json::from_str(&tags_json).unwrap_or_default();
            if let Some(ref wanted) = wanted_tags {
                // Tags compose with OR: at least one must match.
                if !tags.iter().any(|t| wanted.contains(t.as_str())) {
                    continue;
                }
            }
            let metadata_json: String = row.get("metadata_json");
            out.push(VectorRow {
                doc_id: row.get("doc_id"),
                chunk_id: row.get("chunk_id"),
                embedding: row.get("embedding"),
                content: row.get("content"),
                metadata: serde_json::from_str(&metadata_json).unwrap_or_default(),
            });
        }
        Ok(out)
    }
}

struct VectorRow {
    doc_id: String,
    chunk_id: i64,
    embedding: Vec<u8>,
    content: String,
    metadata: VectorMetadata,
}

fn filters_match(
    filters: &SearchFilters,
    file_type: &str,
    doc_id: String,
    modified_at: i64,
    tags: &[String],
) -> bool {
    if let Some(ref types) = filters.file_types {
        if !types.iter().any(|t| t.eq_ignore_ascii_case(file_type)) {
            return false;
        }
    }
    if let Some(ref ids) = filters.doc_ids {
        if !ids.contains(&doc_id) {
            return false;
        }
    }
    if let Some(after) = filters.modified_after {
        if modified_at < after {
            return false;
        }
    }
    if let Some(before) = filters.modified_before {
        if modified_at > before {
            return false;
        }
    }
    if let Some(ref wanted) = filters.tags {
        if !tags.iter().any(|t| wanted.contains(t)) {
            return false;
        }
    }
    true
}

// ── Language handling ───────────────────────────────────────────────────

/// Heuristic for non-space-segmented scripts: true when at least half of the
/// non-whitespace characters are Hangul, CJK ideographs, or kana.
pub fn is_cjk_text(text: &str) -> bool {
    let mut cjk = 0usize;
    let mut total = 0usize;
    for c in text.chars() {
        if c.is_whitespace() {
            continue;
        }
        total += 1;
        if is_cjk_char(c) {
            cjk += 1;
        }
    }
    total > 0 && cjk * 2 >= total
}

fn is_cjk_char(c: char) -> bool {
    matches!(c,
        '\u{1100}'..='\u{11FF}'   // Hangul Jamo
        | '\u{3040}'..='\u{30FF}' // Hiragana, Katakana
        | '\u{3400}'..='\u{4DBF}' // CJK Extension A
        | '\u{4E00}'..='\u{9FFF}' // CJK Unified Ideographs
        | '\u{AC00}'..='\u{D7AF}' // Hangul Syllables
    )
}

/// Render text as space-separated character bigrams for FTS indexing of
/// scripts without word separators. Non-CJK runs are kept as plain tokens.
pub fn ngram_text(text: &str) -> String {
    let mut tokens: Vec<String> = Vec::new();
    let mut plain = String::new();
    let mut cjk_run: Vec<char> = Vec::new();

    let flush_plain = |buf: &mut String, tokens: &mut Vec<String>| {
        if !buf.is_empty() {
            tokens.push(std::mem::take(buf));
        }
    };
    let flush_cjk = |run: &mut Vec<char>, tokens: &mut Vec<String>| {
        match run.len() {
            0 => {}
            1 => tokens.push(run[0].to_string()),
            _ => {
                for pair in run.windows(2) {
                    tokens.push(pair.iter().collect());
                }
            }
        }
        run.clear();
    };

    for c in text.chars() {
        if is_cjk_char(c) {
            flush_plain(&mut plain, &mut tokens);
            cjk_run.push(c);
        } else if c.is_alphanumeric() {
            flush_cjk(&mut cjk_run, &mut tokens);
            plain.push(c);
        } else {
            flush_plain(&mut plain, &mut tokens);
            flush_cjk(&mut cjk_run, &mut tokens);
        }
    }
    flush_plain(&mut plain, &mut tokens);
    flush_cjk(&mut cjk_run, &mut tokens);

    tokens.join(" ")
}

/// Build a safe FTS5 MATCH expression scoped to one column: each token is
/// double-quoted to neutralize FTS query syntax in user input, and tokens
/// are AND-joined.
fn fts_match_query(column: &str, text: &str) -> String {
    text.split_whitespace()
        .map(|token| format!("{}:\"{}\"", column, token.replace('"', "\"\"")))
        .collect::<Vec<_>>()
        .join(" AND ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cjk_detection() {
        assert!(is_cjk_text("한국어 검색"));
        assert!(is_cjk_text("機械学習"));
        assert!(!is_cjk_text("machine learning"));
        assert!(!is_cjk_text("mostly english 한"));
        assert!(!is_cjk_text(""));
    }

    #[test]
    fn ngram_produces_bigrams_for_cjk_runs() {
        assert_eq!(ngram_text("한국어"), "한국 국어");
        assert_eq!(ngram_text("한"), "한");
        // Mixed text keeps latin tokens whole.
        assert_eq!(ngram_text("ai 한국어"), "ai 한국 국어");
    }

    #[test]
    fn fts_query_neutralizes_operators() {
        assert_eq!(
            fts_match_query("content", "hello world"),
            "content:\"hello\" AND content:\"world\""
        );
        assert_eq!(fts_match_query("content", "a\"b"), "content:\"a\"\"b\"");
        assert_eq!(
            fts_match_query("content", "NOT OR"),
            "content:\"NOT\" AND content:\"OR\""
        );
    }

    #[test]
    fn filters_match_composes_with_and_tags_with_or() {
        let filters = SearchFilters {
            file_types: Some(vec!["md".into()]),
            tags: Some(vec!["a".into(), "b".into()]),
            ..Default::default()
        };
        assert!(filters_match(
            &filters,
            "md",
            "d1".into(),
            0,
            &["b".into()]
        ));
        assert!(!filters_match(
            &filters,
            "txt",
            "d1".into(),
            0,
            &["b".into()]
        ));
        assert!(!filters_match(&filters, "md", "d1".into(), 0, &[]));
    }
}
