//! Durable filing ingestion and adaptive retrieval core.
//!
//! ```text
//! ArchiveFetcher ──► staging::raw ──► extract ──► staging::extracted
//!                                         │
//!                                         ▼
//!                    chunking ──► staging::chunks.json
//!                                         │
//!                 EmbeddingProvider ──► staging::embeddings.json
//!                                         │
//!                                         ▼
//!                    store::SqliteVectorStore (hash-gated upsert)
//!
//! user message ──► retrieval::IntentClassifier ──► RetrievalStrategy
//!              ──► QueryPreprocessor + EmbeddingProvider
//!              ──► VectorStore KNN ⊕ referenced documents
//!              ──► ChatProvider ──► assistant message + sources
//! ```
//!
//! The [`pipeline`] module drives the top flow as five durable, individually
//! retryable stages with progress fanned out through [`progress::ProgressBus`];
//! the [`retrieval`] module implements the bottom flow. External collaborators
//! (archive, embeddings, chat, identity) sit behind the traits in
//! [`providers`].

pub mod chunking;
pub mod config;
pub mod db;
pub mod domain;
pub mod extract;
pub mod pipeline;
pub mod progress;
pub mod providers;
pub mod repository;
pub mod retrieval;
pub mod staging;
pub mod store;
pub mod types;

pub use config::{
    ChunkerSettings, PipelineSettings, RetrievalParams, RetrievalSettings, RetryPolicy,
    StagingSettings,
};
pub use db::Database;
pub use pipeline::{IngestionPipeline, IngestionRequest, IngestionStatus, PipelineError};
pub use progress::{ProcessingEvent, ProgressBus};
pub use retrieval::{AnswerError, AnswerOrchestrator, AnswerRequest, AssistantReply};
pub use types::{CancelSource, CancelToken, EmbeddingOwner, EmbeddingScope, QueryIntent};
