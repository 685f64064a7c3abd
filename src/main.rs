use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use ragwatch::config::Config;
use ragwatch::db;
use ragwatch::engine::Engine;
use ragwatch::error::EngineError;
use ragwatch::migrate;
use ragwatch::search::SearchMode;
use ragwatch::server;
use ragwatch::tools::{ToolContext, ToolRegistry};
use ragwatch::watcher::FileWatcher;

#[derive(Parser)]
#[command(
    name = "ragwatch",
    about = "Local RAG engine: watch a documents directory, maintain a vector index, serve hybrid search",
    version
)]
struct Cli {
    /// Path to configuration file
    #[arg(long, global = true, default_value = "./config/ragwatch.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize both store schemas
    Init,

    /// Run the engine: watcher, sync scheduler, and tool server
    Serve,

    /// One-shot reconciliation: scan the documents directory and index drift
    Ingest,

    /// Search indexed documents
    Search {
        /// Search query
        query: String,

        /// Search mode: semantic, keyword, or hybrid
        #[arg(long, default_value = "hybrid")]
        mode: String,

        /// Maximum number of results
        #[arg(long)]
        limit: Option<usize>,
    },

    /// Generate a consistency report
    Sync {
        /// Recompute every file hash instead of the shallow check
        #[arg(long)]
        deep: bool,

        /// Report unindexed files on disk
        #[arg(long, default_value_t = true)]
        include_new: bool,

        /// Apply repairs in the same pass
        #[arg(long)]
        fix: bool,
    },

    /// Show index statistics
    Info,
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    match run(cli).await {
        Ok(()) => {}
        Err(e) => {
            error!("{}", e);
            std::process::exit(e.exit_code());
        }
    }
}

async fn run(cli: Cli) -> Result<(), EngineError> {
    let config = Config::load(&cli.config)?;

    match cli.command {
        Commands::Init => {
            let meta_pool = db::connect(&config.meta_db_path()).await?;
            migrate::migrate_meta(&meta_pool).await?;
            meta_pool.close().await;
            let vector_pool = db::connect(&config.vector_db_path()).await?;
            migrate::migrate_vectors(&vector_pool).await?;
            vector_pool.close().await;
            println!("Stores initialized under {}", config.data_dir.display());
        }

        Commands::Serve => {
            let engine = Engine::new(config).await?;

            let handled = engine.ingest_existing().await?;
            info!(events = handled, "startup ingestion complete");

            let (tx, rx) = tokio::sync::mpsc::channel(1024);
            let _watcher = FileWatcher::start(&engine.config, tx)?;
            let watch_loop = tokio::spawn(Arc::clone(&engine).run_watch_loop(rx));
            let _scheduler = engine.sync.spawn_scheduler();

            tokio::select! {
                result = server::run_server(Arc::clone(&engine)) => {
                    result?;
                }
                _ = tokio::signal::ctrl_c() => {
                    info!("interrupt received, shutting down");
                    std::process::exit(130);
                }
            }
            watch_loop.abort();
        }

        Commands::Ingest => {
            let engine = Engine::new(config).await?;
            let handled = engine.ingest_existing().await?;
            println!("ingest complete");
            println!("  events handled: {}", handled);
            let stats = engine.vectors.stats().await?;
            println!("  total vectors: {}", stats.total_vectors);
        }

        Commands::Search { query, mode, limit } => {
            let engine = Engine::new(config).await?;
            let mode = SearchMode::parse(&mode)?;
            let hits = engine
                .search
                .search(&query, mode, limit, None, &Default::default())
                .await?;

            if hits.is_empty() {
                println!("No results.");
                return Ok(());
            }
            for (i, hit) in hits.iter().enumerate() {
                println!(
                    "{}. [{:.3}] {} (chunk {})",
                    i + 1,
                    hit.rank_score,
                    hit.metadata.filename,
                    hit.chunk_id
                );
                let excerpt: String = hit.content.chars().take(160).collect();
                println!("    {}", excerpt.replace('\n', " "));
                println!();
            }
        }

        Commands::Sync {
            deep,
            include_new,
            fix,
        } => {
            let engine = Engine::new(config).await?;
            let report = engine
                .sync
                .generate_sync_report(deep, include_new, fix)
                .await?;

            println!("sync report ({})", if deep { "deep" } else { "shallow" });
            println!("  scanned files: {}", report.scanned_files);
            println!("  total vectors: {}", report.total_vectors);
            println!("  issues: {}", report.total_issues());
            for (kind, count) in &report.issue_counts {
                println!("    {}: {}", kind, count);
            }
            if let Some(fixes) = &report.fixes {
                println!(
                    "  fixes: {} applied, {} failed, {} need force sync",
                    fixes.fixed, fixes.failed, fixes.skipped
                );
            }
            if report.has_fatal() {
                return Err(EngineError::dimension_mismatch(
                    "stored vectors do not match the active generation; run vector_db_force_sync",
                ));
            }
        }

        Commands::Info => {
            let engine = Engine::new(config).await?;
            let registry = ToolRegistry::builtin();
            let ctx = ToolContext::new(Arc::clone(&engine));
            let envelope = registry
                .dispatch("get_vectordb_info", serde_json::Value::Null, &ctx)
                .await;
            println!("{}", serde_json::to_string_pretty(&envelope).unwrap_or_default());
        }
    }

    Ok(())
}
