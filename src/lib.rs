//! # ragwatch
//!
//! **A local RAG engine.**
//!
//! ragwatch watches a documents directory, keeps a persistent vector index
//! of its chunks, and answers semantic / keyword / hybrid similarity
//! queries through a tool-call surface. A sync manager continuously
//! reconciles the filesystem, the metadata store, and the vector store so
//! the index converges after crashes, concurrent edits, and model changes.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────┐   ┌───────────────────────────────┐   ┌───────────────┐
//! │ Watcher  │──▶│ Pipeline                      │──▶│ meta.sqlite    │
//! │ (notify) │   │ read → chunk → embed → commit │   │ vectors.sqlite │
//! └──────────┘   └───────────────────────────────┘   └──────┬────────┘
//!                       ▲                                   │
//!                ┌──────┴──────┐                     ┌──────▼──────┐
//!                │ Sync manager │◀───reconciles──────│ Search       │
//!                └─────────────┘                     │ (sem/kw/hyb) │
//!                                                    └──────┬──────┘
//!                                                    ┌──────▼──────┐
//!                                                    │ Tool surface │
//!                                                    │ (HTTP/CLI)   │
//!                                                    └─────────────┘
//! ```
//!
//! ## Data flow
//!
//! 1. The **watcher** ([`watcher`]) runs a startup reconciliation scan and
//!    then emits debounced `{added, changed, removed}` events.
//! 2. The **pipeline** ([`pipeline`]) reads ([`reader`]), chunks
//!    ([`chunker`]), embeds ([`embedding`]), and commits to the
//!    **metadata store** ([`meta`]) and **vector store** ([`vector`]),
//!    deduplicating by content hash with bounded concurrency.
//! 3. The **search service** ([`search`]) serves semantic, keyword, and
//!    hybrid queries with a positional-bias-aware hybrid merge.
//! 4. The **sync manager** ([`sync`]) periodically detects and repairs
//!    drift between the filesystem and both stores.
//! 5. The **tool surface** ([`tools`]) exposes everything as validated
//!    tool calls over HTTP ([`server`]) and the CLI.
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing and validation |
//! | [`error`] | Fixed error taxonomy |
//! | [`models`] | Record types shared across stores |
//! | [`db`] | SQLite connection management |
//! | [`migrate`] | Idempotent schema migrations for both stores |
//! | [`meta`] | Metadata store: files, chunks, embedding generations |
//! | [`vector`] | Vector store: similarity + full-text search |
//! | [`embedding`] | Embedder trait, transformers/ollama backends, query cache |
//! | [`reader`] | Per-extension document readers |
//! | [`chunker`] | Size-budget chunking with overlap |
//! | [`pipeline`] | Ingestion orchestration with dedup and retries |
//! | [`watcher`] | Startup scan + debounced filesystem events |
//! | [`search`] | Semantic / keyword / hybrid query execution |
//! | [`sync`] | Drift detection, repair, and scheduling |
//! | [`tools`] | Tool registry and response envelope |
//! | [`server`] | HTTP transport for the tool surface |
//! | [`engine`] | Explicit wiring of all sub-services |

pub mod chunker;
pub mod config;
pub mod db;
pub mod embedding;
pub mod engine;
pub mod error;
pub mod meta;
pub mod migrate;
pub mod models;
pub mod pipeline;
pub mod reader;
pub mod search;
pub mod server;
pub mod sync;
pub mod tools;
pub mod vector;
pub mod watcher;
