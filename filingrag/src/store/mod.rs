//! Vector store abstraction and row types.
//!
//! The store persists `(owner, scope, document, chunk-index, text, vector,
//! hash)` rows and answers cosine-distance KNN queries. Uniqueness over
//! `(owner, user_scope, conversation_scope, document_id, chunk_index)` is the
//! one shared-mutable invariant of the whole system; upserts are gated by the
//! chunk content hash so re-ingestion of unchanged text writes nothing.

pub mod sqlite;

pub use sqlite::SqliteVectorStore;

use async_trait::async_trait;
use miette::Diagnostic;
use thiserror::Error;

use crate::chunking::chunk_hash;
use crate::types::{DocumentId, EmbeddingOwner, EmbeddingScope};

#[derive(Debug, Error, Diagnostic)]
pub enum StoreError {
    #[error("vector store failure: {0}")]
    #[diagnostic(code(filingrag::store::storage))]
    Storage(String),

    #[error("failed to encode embedding vector: {0}")]
    #[diagnostic(code(filingrag::store::encode))]
    Encode(String),

    /// The `(owner, user_scope, conversation_scope, document_id,
    /// chunk_index)` constraint was violated. This indicates a logic bug
    /// rather than an environmental failure, so it fails the stage without
    /// retrying.
    #[error("vector store uniqueness violation: {0}")]
    #[diagnostic(
        code(filingrag::store::uniqueness),
        help("Concurrent writers to the same row bypassed the persist lock.")
    )]
    UniquenessViolation(String),
}

/// One row offered to the store's upsert.
#[derive(Clone, Debug, PartialEq)]
pub struct EmbeddingUpsert {
    pub owner: EmbeddingOwner,
    pub scope: EmbeddingScope,
    pub document_id: DocumentId,
    pub document_title: String,
    pub chunk_index: usize,
    pub text: String,
    pub vector: Vec<f32>,
    pub chunk_hash: String,
}

impl EmbeddingUpsert {
    /// Build a row, deriving the content hash from the text.
    pub fn new(
        owner: EmbeddingOwner,
        scope: EmbeddingScope,
        document_id: impl Into<DocumentId>,
        document_title: impl Into<String>,
        chunk_index: usize,
        text: impl Into<String>,
        vector: Vec<f32>,
    ) -> Self {
        let text = text.into();
        let chunk_hash = chunk_hash(&text);
        Self {
            owner,
            scope,
            document_id: document_id.into(),
            document_title: document_title.into(),
            chunk_index,
            text,
            vector,
            chunk_hash,
        }
    }
}

/// Write accounting for one upsert call. `unchanged` rows were hash-matched
/// and never touched.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct UpsertOutcome {
    pub inserted: usize,
    pub updated: usize,
    pub unchanged: usize,
}

impl UpsertOutcome {
    /// Rows actually written.
    #[must_use]
    pub fn writes(&self) -> usize {
        self.inserted + self.updated
    }
}

/// KNN result row: similarity is `1 − cosine distance`.
#[derive(Clone, Debug, PartialEq)]
pub struct ScoredChunk {
    pub text: String,
    pub document_id: DocumentId,
    pub document_title: String,
    pub similarity: f32,
}

/// A stored chunk with its vector, as returned for referenced documents.
#[derive(Clone, Debug, PartialEq)]
pub struct StoredEmbedding {
    pub document_id: DocumentId,
    pub document_title: String,
    pub chunk_index: usize,
    pub text: String,
    pub vector: Vec<f32>,
}

/// Persistence and KNN contract expected from the vector-capable store.
#[async_trait]
pub trait VectorStore: Send + Sync {
    /// Insert-or-update, grouped by `(owner, scope, document)`. Rows whose
    /// stored hash equals the incoming one are left untouched; everything is
    /// committed once at the end.
    async fn upsert_embeddings(&self, items: Vec<EmbeddingUpsert>)
        -> Result<UpsertOutcome, StoreError>;

    /// Bulk-load variant grouping only by document, for corpus-wide loads.
    async fn upsert_document_embeddings(
        &self,
        items: Vec<EmbeddingUpsert>,
    ) -> Result<UpsertOutcome, StoreError>;

    /// Top-K user-document rows across the whole corpus, no scope filter.
    async fn find_similar_all_system(
        &self,
        query: &[f32],
        top_k: usize,
    ) -> Result<Vec<ScoredChunk>, StoreError>;

    /// Top-K user-document rows restricted to the given user, and to the
    /// given conversation when the scope names one.
    async fn find_similar_in_conversation(
        &self,
        query: &[f32],
        scope: &EmbeddingScope,
        top_k: usize,
    ) -> Result<Vec<ScoredChunk>, StoreError>;

    /// Adaptive retrieval: rows with `cosine distance ≤ 1 − min_similarity`,
    /// ascending by distance, capped at `max_k` (`None` means uncapped). The
    /// owner filter is explicit at the call site.
    async fn find_similar_adaptive(
        &self,
        query: &[f32],
        owner: EmbeddingOwner,
        max_k: Option<usize>,
        min_similarity: f32,
        scope: Option<&EmbeddingScope>,
    ) -> Result<Vec<ScoredChunk>, StoreError>;

    /// All stored chunks of one document in chunk order, vectors included.
    async fn load_document_embeddings(
        &self,
        owner: EmbeddingOwner,
        scope: &EmbeddingScope,
        document_id: &str,
    ) -> Result<Vec<StoredEmbedding>, StoreError>;

    /// Remove every row bound to a user's conversation; returns the count.
    async fn delete_conversation_scope(
        &self,
        user: &str,
        conversation: &str,
    ) -> Result<usize, StoreError>;
}
