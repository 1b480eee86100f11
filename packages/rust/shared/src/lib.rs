//! Shared types, error model, and configuration for HandbookQA.
//!
//! This crate is the foundation depended on by all other HandbookQA crates.
//! It provides:
//! - [`HandbookQaError`] — the unified error type
//! - Domain types ([`Document`], [`Chunk`], [`VectorRecord`], [`Answer`])
//! - Configuration ([`AppConfig`], config loading)

pub mod config;
pub mod error;
pub mod types;

// Re-export public API at crate root for ergonomic imports.
pub use config::{
    AppConfig, ChunkingConfig, CorpusConfig, IngestConfig, OpenAiConfig, RetrievalConfig,
    config_dir, config_file_path, default_db_path, init_config, load_config, load_config_from,
    validate_api_key,
};
pub use error::{HandbookQaError, Result};
pub use types::{
    Answer, AnswerSource, Chunk, ChunkId, Document, IngestionReport, QueryResponse, QueryStatus,
    RetrievedChunk, StoreMeta, VectorRecord, corpus_fingerprint,
};
