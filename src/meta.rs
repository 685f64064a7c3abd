//! Metadata store: durable CRUD for file, chunk, and embedding-generation
//! records.
//!
//! All mutating operations are atomic with respect to readers (single SQLite
//! writer, WAL mode). The store never touches the vector database;
//! consistency between the two is the sync manager's job.

use sqlx::{Row, SqlitePool};

use crate::error::Result;
use crate::models::{ChunkRecord, FileRecord, GenerationRecord};

#[derive(Clone)]
pub struct MetadataStore {
    pool: SqlitePool,
}

impl MetadataStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    // ── Files ───────────────────────────────────────────────────────────

    pub async fn get_file_by_path(&self, path: &str) -> Result<Option<FileRecord>> {
        let row = sqlx::query("SELECT * FROM files WHERE path = ?")
            .bind(path)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(|r| file_from_row(&r)))
    }

    pub async fn get_file(&self, file_id: &str) -> Result<Option<FileRecord>> {
        let row = sqlx::query("SELECT * FROM files WHERE file_id = ?")
            .bind(file_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(|r| file_from_row(&r)))
    }

    /// Insert or update a file record, keyed by path. `created_at` is
    /// preserved across updates.
    pub async fn upsert_file(&self, record: &FileRecord) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO files (file_id, path, name, size, content_hash, mtime, file_type, indexed_at, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(path) DO UPDATE SET
                size = excluded.size,
                content_hash = excluded.content_hash,
                mtime = excluded.mtime,
                file_type = excluded.file_type,
                indexed_at = excluded.indexed_at
            "#,
        )
        .bind(&record.file_id)
        .bind(&record.path)
        .bind(&record.name)
        .bind(record.size)
        .bind(&record.content_hash)
        .bind(record.mtime)
        .bind(&record.file_type)
        .bind(record.indexed_at)
        .bind(record.created_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Delete a file record together with its chunks and side metadata.
    /// Idempotent: deleting an absent file is a no-op.
    pub async fn delete_file_cascading_chunks(&self, file_id: &str) -> Result<bool> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM document_chunks WHERE file_id = ?")
            .bind(file_id)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM file_metadata WHERE file_id = ?")
            .bind(file_id)
            .execute(&mut *tx)
            .await?;
        let result = sqlx::query("DELETE FROM files WHERE file_id = ?")
            .bind(file_id)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(result.rows_affected() > 0)
    }

    /// Files ordered by `created_at` descending.
    pub async fn list_files(&self) -> Result<Vec<FileRecord>> {
        let rows = sqlx::query("SELECT * FROM files ORDER BY created_at DESC, path ASC")
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.iter().map(file_from_row).collect())
    }

    pub async fn count_files(&self) -> Result<i64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM files")
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }

    // ── Chunks ──────────────────────────────────────────────────────────

    /// Atomically replace the chunk set for a file: all prior chunks are
    /// deleted and the new contiguous set inserted in one transaction.
    pub async fn replace_chunks_for_file(
        &self,
        file_id: &str,
        chunks: &[ChunkRecord],
    ) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM document_chunks WHERE file_id = ?")
            .bind(file_id)
            .execute(&mut *tx)
            .await?;
        for chunk in chunks {
            sqlx::query(
                "INSERT INTO document_chunks (file_id, chunk_id, content, embedding_id) VALUES (?, ?, ?, ?)",
            )
            .bind(file_id)
            .bind(chunk.chunk_id)
            .bind(&chunk.content)
            .bind(&chunk.embedding_id)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    pub async fn chunks_for_file(&self, file_id: &str) -> Result<Vec<ChunkRecord>> {
        let rows = sqlx::query(
            "SELECT file_id, chunk_id, content, embedding_id FROM document_chunks WHERE file_id = ? ORDER BY chunk_id",
        )
        .bind(file_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows
            .iter()
            .map(|r| ChunkRecord {
                file_id: r.get("file_id"),
                chunk_id: r.get("chunk_id"),
                content: r.get("content"),
                embedding_id: r.get("embedding_id"),
            })
            .collect())
    }

    pub async fn count_chunks(&self, file_id: &str) -> Result<i64> {
        let count: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM document_chunks WHERE file_id = ?")
                .bind(file_id)
                .fetch_one(&self.pool)
                .await?;
        Ok(count)
    }

    // ── File side metadata ──────────────────────────────────────────────

    pub async fn set_file_metadata(&self, file_id: &str, key: &str, value: &str) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO file_metadata (file_id, key, value) VALUES (?, ?, ?)
            ON CONFLICT(file_id, key) DO UPDATE SET value = excluded.value
            "#,
        )
        .bind(file_id)
        .bind(key)
        .bind(value)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn file_metadata(&self, file_id: &str) -> Result<Vec<(String, String)>> {
        let rows = sqlx::query("SELECT key, value FROM file_metadata WHERE file_id = ? ORDER BY key")
            .bind(file_id)
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.iter().map(|r| (r.get("key"), r.get("value"))).collect())
    }

    // ── Embedding generations ───────────────────────────────────────────

    /// Insert a generation record (no-op on an existing id) and mark it
    /// active, deactivating every other generation in the same transaction.
    pub async fn upsert_generation(&self, record: &GenerationRecord) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        sqlx::query(
            r#"
            INSERT INTO embedding_metadata
                (generation_id, model_name, service, dimensions, config_hash, active, vector_count, created_at, last_used_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(generation_id) DO UPDATE SET
                last_used_at = excluded.last_used_at
            "#,
        )
        .bind(&record.generation_id)
        .bind(&record.model_name)
        .bind(&record.service)
        .bind(record.dimensions)
        .bind(&record.config_hash)
        .bind(record.active)
        .bind(record.vector_count)
        .bind(record.created_at)
        .bind(record.last_used_at)
        .execute(&mut *tx)
        .await?;

        if record.active {
            sqlx::query("UPDATE embedding_metadata SET active = 0 WHERE generation_id != ?")
                .bind(&record.generation_id)
                .execute(&mut *tx)
                .await?;
            sqlx::query("UPDATE embedding_metadata SET active = 1 WHERE generation_id = ?")
                .bind(&record.generation_id)
                .execute(&mut *tx)
                .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    pub async fn deactivate_all_generations(&self) -> Result<()> {
        sqlx::query("UPDATE embedding_metadata SET active = 0")
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn get_active_generation(&self) -> Result<Option<GenerationRecord>> {
        let row = sqlx::query("SELECT * FROM embedding_metadata WHERE active = 1 LIMIT 1")
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(|r| generation_from_row(&r)))
    }

    pub async fn find_generation(&self, config_hash: &str) -> Result<Option<GenerationRecord>> {
        let row = sqlx::query("SELECT * FROM embedding_metadata WHERE config_hash = ? LIMIT 1")
            .bind(config_hash)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(|r| generation_from_row(&r)))
    }

    /// Bump usage counters after a batch of vector writes or deletes.
    pub async fn touch_generation(&self, generation_id: &str, vector_delta: i64) -> Result<()> {
        let now = chrono::Utc::now().timestamp();
        sqlx::query(
            "UPDATE embedding_metadata SET vector_count = MAX(0, vector_count + ?), last_used_at = ? WHERE generation_id = ?",
        )
        .bind(vector_delta)
        .bind(now)
        .bind(generation_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

fn file_from_row(row: &sqlx::sqlite::SqliteRow) -> FileRecord {
    FileRecord {
        file_id: row.get("file_id"),
        path: row.get("path"),
        name: row.get("name"),
        size: row.get("size"),
        content_hash: row.get("content_hash"),
        mtime: row.get("mtime"),
        file_type: row.get("file_type"),
        indexed_at: row.get("indexed_at"),
        created_at: row.get("created_at"),
    }
}

fn generation_from_row(row: &sqlx::sqlite::SqliteRow) -> GenerationRecord {
    GenerationRecord {
        generation_id: row.get("generation_id"),
        model_name: row.get("model_name"),
        service: row.get("service"),
        dimensions: row.get("dimensions"),
        config_hash: row.get("config_hash"),
        active: row.get::<i64, _>("active") != 0,
        vector_count: row.get("vector_count"),
        created_at: row.get("created_at"),
        last_used_at: row.get("last_used_at"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::migrate;
    use crate::models::file_id_for_path;
    use std::path::Path;

    async fn store() -> MetadataStore {
        let pool = sqlx::sqlite::SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        migrate::migrate_meta(&pool).await.unwrap();
        MetadataStore::new(pool)
    }

    fn record(path: &str, hash: &str) -> FileRecord {
        FileRecord {
            file_id: file_id_for_path(Path::new(path)),
            path: path.to_string(),
            name: Path::new(path)
                .file_name()
                .unwrap()
                .to_string_lossy()
                .to_string(),
            size: 10,
            content_hash: hash.to_string(),
            mtime: 100,
            file_type: "txt".to_string(),
            indexed_at: 100,
            created_at: 100,
        }
    }

    #[tokio::test]
    async fn upsert_is_keyed_by_path() {
        let store = store().await;
        store.upsert_file(&record("/d/a.txt", "h1")).await.unwrap();
        store.upsert_file(&record("/d/a.txt", "h2")).await.unwrap();

        assert_eq!(store.count_files().await.unwrap(), 1);
        let file = store.get_file_by_path("/d/a.txt").await.unwrap().unwrap();
        assert_eq!(file.content_hash, "h2");
    }

    #[tokio::test]
    async fn replace_chunks_is_atomic_and_complete() {
        let store = store().await;
        let rec = record("/d/a.txt", "h1");
        store.upsert_file(&rec).await.unwrap();

        let first: Vec<ChunkRecord> = (0..3)
            .map(|i| ChunkRecord {
                file_id: rec.file_id.clone(),
                chunk_id: i,
                content: format!("chunk {}", i),
                embedding_id: None,
            })
            .collect();
        store
            .replace_chunks_for_file(&rec.file_id, &first)
            .await
            .unwrap();
        assert_eq!(store.count_chunks(&rec.file_id).await.unwrap(), 3);

        let second: Vec<ChunkRecord> = (0..2)
            .map(|i| ChunkRecord {
                file_id: rec.file_id.clone(),
                chunk_id: i,
                content: format!("new {}", i),
                embedding_id: None,
            })
            .collect();
        store
            .replace_chunks_for_file(&rec.file_id, &second)
            .await
            .unwrap();

        let chunks = store.chunks_for_file(&rec.file_id).await.unwrap();
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0].content, "new 0");
        assert_eq!(chunks[1].chunk_id, 1);
    }

    #[tokio::test]
    async fn delete_cascades_to_chunks() {
        let store = store().await;
        let rec = record("/d/a.txt", "h1");
        store.upsert_file(&rec).await.unwrap();
        store
            .replace_chunks_for_file(
                &rec.file_id,
                &[ChunkRecord {
                    file_id: rec.file_id.clone(),
                    chunk_id: 0,
                    content: "c".into(),
                    embedding_id: None,
                }],
            )
            .await
            .unwrap();

        assert!(store
            .delete_file_cascading_chunks(&rec.file_id)
            .await
            .unwrap());
        assert_eq!(store.count_files().await.unwrap(), 0);
        assert_eq!(store.count_chunks(&rec.file_id).await.unwrap(), 0);
        // Second delete is a no-op.
        assert!(!store
            .delete_file_cascading_chunks(&rec.file_id)
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn exactly_one_generation_active() {
        let store = store().await;
        let gen1 = GenerationRecord {
            generation_id: "g1".into(),
            model_name: "m1".into(),
            service: "transformers".into(),
            dimensions: 384,
            config_hash: "c1".into(),
            active: true,
            vector_count: 0,
            created_at: 1,
            last_used_at: 1,
        };
        let gen2 = GenerationRecord {
            generation_id: "g2".into(),
            dimensions: 768,
            config_hash: "c2".into(),
            ..gen1.clone()
        };
        store.upsert_generation(&gen1).await.unwrap();
        store.upsert_generation(&gen2).await.unwrap();

        let active = store.get_active_generation().await.unwrap().unwrap();
        assert_eq!(active.generation_id, "g2");
        assert_eq!(active.dimensions, 768);

        store.deactivate_all_generations().await.unwrap();
        assert!(store.get_active_generation().await.unwrap().is_none());
    }
}
