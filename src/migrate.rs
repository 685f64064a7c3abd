//! Database schema migrations.
//!
//! Creates the metadata-store tables (`files`, `file_metadata`,
//! `document_chunks`, `embedding_metadata`) and the vector-store tables
//! (`vectors`, `vectors_fts`). Idempotent; designed to be run via
//! `ragwatch init` and again on every startup.

use sqlx::SqlitePool;

use crate::error::Result;

/// Create the metadata store schema.
pub async fn migrate_meta(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS files (
            file_id TEXT PRIMARY KEY,
            path TEXT NOT NULL UNIQUE,
            name TEXT NOT NULL,
            size INTEGER NOT NULL,
            content_hash TEXT NOT NULL,
            mtime INTEGER NOT NULL,
            file_type TEXT NOT NULL,
            indexed_at INTEGER NOT NULL,
            created_at INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS file_metadata (
            file_id TEXT NOT NULL,
            key TEXT NOT NULL,
            value TEXT NOT NULL,
            PRIMARY KEY (file_id, key),
            FOREIGN KEY (file_id) REFERENCES files(file_id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS document_chunks (
            file_id TEXT NOT NULL,
            chunk_id INTEGER NOT NULL,
            content TEXT NOT NULL,
            embedding_id TEXT,
            PRIMARY KEY (file_id, chunk_id),
            FOREIGN KEY (file_id) REFERENCES files(file_id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS embedding_metadata (
            generation_id TEXT PRIMARY KEY,
            model_name TEXT NOT NULL,
            service TEXT NOT NULL,
            dimensions INTEGER NOT NULL,
            config_hash TEXT NOT NULL,
            active INTEGER NOT NULL DEFAULT 0,
            vector_count INTEGER NOT NULL DEFAULT 0,
            created_at INTEGER NOT NULL,
            last_used_at INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_files_created_at ON files(created_at DESC)")
        .execute(pool)
        .await?;
    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_document_chunks_file_id ON document_chunks(file_id)",
    )
    .execute(pool)
    .await?;

    Ok(())
}

/// Create the vector store schema.
pub async fn migrate_vectors(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS vectors (
            doc_id TEXT NOT NULL,
            chunk_id INTEGER NOT NULL,
            embedding BLOB NOT NULL,
            content TEXT NOT NULL,
            contextual_text TEXT,
            model_name TEXT NOT NULL,
            file_type TEXT NOT NULL,
            modified_at INTEGER NOT NULL,
            tags_json TEXT NOT NULL DEFAULT '[]',
            metadata_json TEXT NOT NULL DEFAULT '{}',
            created_at INTEGER NOT NULL,
            PRIMARY KEY (doc_id, chunk_id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    // FTS5 virtual table over chunk content (not idempotent natively, check first).
    // `content_ngram` holds a bigram rendering for non-space-segmented scripts.
    let fts_exists: bool = sqlx::query_scalar(
        "SELECT COUNT(*) > 0 FROM sqlite_master WHERE type='table' AND name='vectors_fts'",
    )
    .fetch_one(pool)
    .await?;

    if !fts_exists {
        sqlx::query(
            r#"
            CREATE VIRTUAL TABLE vectors_fts USING fts5(
                doc_id UNINDEXED,
                chunk_id UNINDEXED,
                content,
                content_ngram
            )
            "#,
        )
        .execute(pool)
        .await?;
    }

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_vectors_doc_id ON vectors(doc_id)")
        .execute(pool)
        .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_vectors_file_type ON vectors(file_type)")
        .execute(pool)
        .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_vectors_modified_at ON vectors(modified_at)")
        .execute(pool)
        .await?;

    Ok(())
}
