//! Tool surface behavior: envelopes, validation, and the full tool set
//! against a live engine.

mod common;

use std::sync::Arc;

use serde_json::{json, Value};

use ragwatch::tools::{ToolContext, ToolRegistry};

use common::{test_engine, write_doc};

async fn call(ctx: &ToolContext, registry: &ToolRegistry, name: &str, params: Value) -> Value {
    registry.dispatch(name, params, ctx).await
}

#[tokio::test]
async fn search_tool_returns_ranked_envelope() {
    let (_tmp, engine) = test_engine().await;
    write_doc(&engine, "a.txt", "machine learning is powerful");
    write_doc(&engine, "b.md", "# Title\nneural networks are a subset");
    engine.ingest_existing().await.unwrap();

    let registry = ToolRegistry::builtin();
    let ctx = ToolContext::new(Arc::clone(&engine));

    let envelope = call(
        &ctx,
        &registry,
        "search",
        json!({ "query": "neural networks", "topK": 1, "searchType": "semantic" }),
    )
    .await;

    assert_eq!(envelope["ok"], json!(true));
    let results = envelope["data"]["results"].as_array().unwrap();
    assert_eq!(results.len(), 1);
    assert_eq!(results[0]["rank"], json!(1));
    assert_eq!(results[0]["source"]["filename"], json!("b.md"));
    assert!(results[0]["vector_score"].as_f64().unwrap() > 0.5);
    assert_eq!(results[0]["source"]["chunk_index"], json!(0));
}

#[tokio::test]
async fn search_tool_validates_arguments() {
    let (_tmp, engine) = test_engine().await;
    let registry = ToolRegistry::builtin();
    let ctx = ToolContext::new(Arc::clone(&engine));

    let missing_query = call(&ctx, &registry, "search", json!({})).await;
    assert_eq!(missing_query["ok"], json!(false));
    assert_eq!(missing_query["error_code"], json!("validation_error"));
    assert!(missing_query["suggestion"].as_str().is_some());

    let bad_top_k = call(
        &ctx,
        &registry,
        "search",
        json!({ "query": "x", "topK": 100 }),
    )
    .await;
    assert_eq!(bad_top_k["ok"], json!(false));
    assert!(bad_top_k["message"].as_str().unwrap().contains("topK"));

    let bad_threshold = call(
        &ctx,
        &registry,
        "search",
        json!({ "query": "x", "scoreThreshold": 1.5 }),
    )
    .await;
    assert_eq!(bad_threshold["ok"], json!(false));

    let bad_type = call(
        &ctx,
        &registry,
        "search",
        json!({ "query": "x", "searchType": "fuzzy" }),
    )
    .await;
    assert_eq!(bad_type["ok"], json!(false));

    let unknown_tool = call(&ctx, &registry, "does_not_exist", json!({})).await;
    assert_eq!(unknown_tool["ok"], json!(false));
    assert!(unknown_tool["message"]
        .as_str()
        .unwrap()
        .contains("unknown tool"));
}

#[tokio::test]
async fn list_sources_reports_inventory_and_groups() {
    let (_tmp, engine) = test_engine().await;
    write_doc(&engine, "a.md", "alpha document");
    write_doc(&engine, "b.md", "beta document");
    write_doc(&engine, "c.txt", "gamma document");
    engine.ingest_existing().await.unwrap();

    let registry = ToolRegistry::builtin();
    let ctx = ToolContext::new(Arc::clone(&engine));

    let envelope = call(
        &ctx,
        &registry,
        "list_sources",
        json!({ "include_stats": true, "group_by": "file_type" }),
    )
    .await;

    assert_eq!(envelope["ok"], json!(true));
    let data = &envelope["data"];
    assert_eq!(data["total_files"], json!(3));
    assert_eq!(data["groups"]["md"], json!(2));
    assert_eq!(data["groups"]["txt"], json!(1));
    for source in data["sources"].as_array().unwrap() {
        assert_eq!(source["source_type"], json!("filesystem"));
        assert!(source["chunks"].as_i64().unwrap() >= 1);
        assert!(source["vectors"].as_i64().unwrap() >= 1);
    }

    let limited = call(&ctx, &registry, "list_sources", json!({ "limit": 2 })).await;
    assert_eq!(limited["data"]["total_files"], json!(3));
    assert_eq!(limited["data"]["sources"].as_array().unwrap().len(), 2);

    let filtered = call(
        &ctx,
        &registry,
        "list_sources",
        json!({ "source_type_filter": "s3" }),
    )
    .await;
    assert_eq!(filtered["data"]["total_files"], json!(0));
}

#[tokio::test]
async fn extract_information_returns_context_and_sentences() {
    let (_tmp, engine) = test_engine().await;
    write_doc(
        &engine,
        "rust.md",
        "# Rust\nRust guarantees memory safety. It has no garbage collector.",
    );
    write_doc(&engine, "python.md", "# Python\nPython favors readability.");
    engine.ingest_existing().await.unwrap();

    let registry = ToolRegistry::builtin();
    let ctx = ToolContext::new(Arc::clone(&engine));

    let envelope = call(
        &ctx,
        &registry,
        "extract_information",
        json!({ "question": "how does rust handle memory safety", "context_limit": 2 }),
    )
    .await;

    assert_eq!(envelope["ok"], json!(true));
    let data = &envelope["data"];
    assert!(!data["context"].as_array().unwrap().is_empty());
    let extractions = data["extractions"].as_array().unwrap();
    assert!(!extractions.is_empty());
    assert!(extractions[0]["sentence"]
        .as_str()
        .unwrap()
        .to_lowercase()
        .contains("memory safety"));

    // Restricting to a source that does not mention the question.
    let restricted = call(
        &ctx,
        &registry,
        "extract_information",
        json!({ "question": "memory safety", "sources": ["missing.md"] }),
    )
    .await;
    assert_eq!(restricted["ok"], json!(true));
    assert!(restricted["data"]["context"].as_array().unwrap().is_empty());
}

#[tokio::test]
async fn sync_check_tool_reports_and_fixes() {
    let (_tmp, engine) = test_engine().await;
    write_doc(&engine, "tracked.txt", "indexed content");
    engine.ingest_existing().await.unwrap();
    write_doc(&engine, "untracked.txt", "never indexed");

    let registry = ToolRegistry::builtin();
    let ctx = ToolContext::new(Arc::clone(&engine));

    let report = call(
        &ctx,
        &registry,
        "vector_db_sync_check",
        json!({ "includeNewFiles": true }),
    )
    .await;
    assert_eq!(report["ok"], json!(true));
    assert_eq!(report["data"]["issue_counts"]["new_file"], json!(1));

    let fixed = call(
        &ctx,
        &registry,
        "vector_db_sync_check",
        json!({ "includeNewFiles": true, "autoFix": true }),
    )
    .await;
    assert_eq!(fixed["ok"], json!(true));
    assert_eq!(fixed["data"]["fixes"]["fixed"], json!(1));

    let clean = call(&ctx, &registry, "vector_db_sync_check", json!({})).await;
    assert_eq!(clean["data"]["issues"].as_array().unwrap().len(), 0);
}

#[tokio::test]
async fn cleanup_orphaned_honors_dry_run() {
    let (_tmp, engine) = test_engine().await;
    let ghost = ragwatch::models::VectorRecord {
        doc_id: "ghost".to_string(),
        chunk_id: 0,
        vector: {
            let mut v = vec![0.0f32; common::TEST_DIMS];
            v[1] = 1.0;
            v
        },
        content: "orphan".to_string(),
        contextual_text: None,
        model_name: "bag-of-words".to_string(),
        metadata: ragwatch::models::VectorMetadata::default(),
    };
    engine.vectors.add(&[ghost]).await.unwrap();

    let registry = ToolRegistry::builtin();
    let ctx = ToolContext::new(Arc::clone(&engine));

    let dry = call(&ctx, &registry, "vector_db_cleanup_orphaned", json!({})).await;
    assert_eq!(dry["data"]["dry_run"], json!(true));
    assert_eq!(dry["data"]["orphaned_documents"], json!(1));
    assert_eq!(dry["data"]["vectors_removed"], json!(0));
    assert_eq!(engine.vectors.count_for_doc("ghost").await.unwrap(), 1);

    let wet = call(
        &ctx,
        &registry,
        "vector_db_cleanup_orphaned",
        json!({ "dryRun": false }),
    )
    .await;
    assert_eq!(wet["data"]["vectors_removed"], json!(1));
    assert_eq!(engine.vectors.count_for_doc("ghost").await.unwrap(), 0);
}

#[tokio::test]
async fn force_sync_requires_confirmation() {
    let (_tmp, engine) = test_engine().await;
    write_doc(&engine, "a.txt", "some content");
    engine.ingest_existing().await.unwrap();

    let registry = ToolRegistry::builtin();
    let ctx = ToolContext::new(Arc::clone(&engine));

    let unconfirmed = call(&ctx, &registry, "vector_db_force_sync", json!({})).await;
    assert_eq!(unconfirmed["ok"], json!(true));
    assert_eq!(unconfirmed["data"]["executed"], json!(false));
    assert!(unconfirmed["data"]["warning"].as_str().is_some());
    assert_eq!(engine.vectors.stats().await.unwrap().total_vectors, 1);

    let confirmed = call(
        &ctx,
        &registry,
        "vector_db_force_sync",
        json!({ "confirm": true }),
    )
    .await;
    assert_eq!(confirmed["ok"], json!(true));
    assert_eq!(confirmed["data"]["executed"], json!(true));
    assert_eq!(confirmed["data"]["total_vectors"], json!(1));
}

#[tokio::test]
async fn integrity_report_formats() {
    let (_tmp, engine) = test_engine().await;
    write_doc(&engine, "a.txt", "content");
    engine.ingest_existing().await.unwrap();

    let registry = ToolRegistry::builtin();
    let ctx = ToolContext::new(Arc::clone(&engine));

    let summary = call(&ctx, &registry, "vector_db_integrity_report", json!({})).await;
    assert_eq!(summary["data"]["format"], json!("summary"));
    assert_eq!(summary["data"]["healthy"], json!(true));

    let detailed = call(
        &ctx,
        &registry,
        "vector_db_integrity_report",
        json!({ "format": "detailed" }),
    )
    .await;
    assert_eq!(detailed["data"]["issues"].as_array().unwrap().len(), 0);

    let raw = call(
        &ctx,
        &registry,
        "vector_db_integrity_report",
        json!({ "format": "json" }),
    )
    .await;
    assert!(raw["data"]["issue_counts"].is_object());

    let bad = call(
        &ctx,
        &registry,
        "vector_db_integrity_report",
        json!({ "format": "yaml" }),
    )
    .await;
    assert_eq!(bad["ok"], json!(false));
}

#[tokio::test]
async fn vectordb_info_reflects_index_state() {
    let (_tmp, engine) = test_engine().await;
    write_doc(&engine, "a.txt", "one file");
    write_doc(&engine, "b.txt", "two files");
    engine.ingest_existing().await.unwrap();

    let registry = ToolRegistry::builtin();
    let ctx = ToolContext::new(Arc::clone(&engine));

    let info = call(&ctx, &registry, "get_vectordb_info", Value::Null).await;
    assert_eq!(info["ok"], json!(true));
    let data = &info["data"];
    assert_eq!(data["total_files"], json!(2));
    assert_eq!(data["total_vectors"], json!(2));
    assert_eq!(data["dimensions"], json!(common::TEST_DIMS));
    assert_eq!(data["model_name"], json!("bag-of-words"));
    assert!(data["last_updated"].as_i64().is_some());
}
