//! Durable staged ingestion pipeline.
//!
//! Five stages run in strict order per conversation, each persisting its
//! output to the staging area before returning:
//!
//! ```text
//! Download ─► raw/*  ─► Extract ─► extracted/*.txt ─► Chunk ─► chunks.json
//!          ─► Embed ─► embeddings.json ─► Persist ─► vector store rows
//! ```
//!
//! Every stage is wrapped in a retry harness with its own backoff schedule,
//! and every stage is idempotent against the artifacts already on disk, so a
//! crashed or cancelled run resumes from where it stopped at the next
//! enqueue.

mod lock;
mod orchestrator;
mod retry;
mod status;

pub use lock::{StageLockGuard, StageLocks};
pub use orchestrator::{IngestionPipeline, IngestionRequest};
pub use retry::run_with_retry;
pub use status::IngestionStatus;

use miette::Diagnostic;
use thiserror::Error;

use crate::extract::ExtractError;
use crate::providers::ProviderError;
use crate::repository::RepoError;
use crate::staging::state::InvalidTransition;
use crate::staging::StagingError;
use crate::store::StoreError;
use crate::types::Cancelled;

#[derive(Debug, Error, Diagnostic)]
pub enum PipelineError {
    #[error("validation failed: {0}")]
    #[diagnostic(code(filingrag::pipeline::validation))]
    Validation(String),

    /// The fetcher returned zero documents for the requested company.
    #[error("no filings found for {company}")]
    #[diagnostic(
        code(filingrag::pipeline::no_filings),
        help("Check the company identifier and the requested filing types.")
    )]
    NoFilingsFound { company: String },

    #[error(transparent)]
    Provider(#[from] ProviderError),

    #[error(transparent)]
    Staging(#[from] StagingError),

    /// `status.json` missing or unreadable mid-pipeline; requires operator
    /// intervention.
    #[error("pipeline state corrupt: {0}")]
    #[diagnostic(code(filingrag::pipeline::state_corrupt))]
    StateCorrupt(String),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Repository(#[from] RepoError),

    #[error(transparent)]
    Extract(#[from] ExtractError),

    #[error(transparent)]
    Transition(#[from] InvalidTransition),

    #[error("persist lock timed out for conversation {conversation_id}")]
    #[diagnostic(code(filingrag::pipeline::lock_timeout))]
    LockTimeout { conversation_id: String },

    #[error(transparent)]
    Cancelled(#[from] Cancelled),
}

impl PipelineError {
    /// Cooperative cancellation, in any of its wrappings. Never marks the
    /// batch as failed and never retries.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        matches!(
            self,
            PipelineError::Cancelled(_)
                | PipelineError::Provider(ProviderError::Cancelled(_))
                | PipelineError::Staging(StagingError::Cancelled(_))
        )
    }

    /// Whether the retry harness should attempt the stage again.
    ///
    /// Transient provider/storage/staging failures retry; logic errors
    /// (validation, illegal transitions, uniqueness violations), empty
    /// listings, corrupt state, and cancellation do not.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        if self.is_cancelled() {
            return false;
        }
        match self {
            // A uniqueness violation means a logic bug slipped past the
            // persist lock; retrying would just trip the constraint again.
            PipelineError::Store(StoreError::UniquenessViolation(_)) => false,
            PipelineError::Provider(_)
            | PipelineError::Staging(_)
            | PipelineError::Store(_)
            | PipelineError::Extract(_)
            | PipelineError::LockTimeout { .. } => true,
            PipelineError::Repository(RepoError::Storage(_)) => true,
            PipelineError::Validation(_)
            | PipelineError::NoFilingsFound { .. }
            | PipelineError::StateCorrupt(_)
            | PipelineError::Transition(_)
            | PipelineError::Repository(_)
            | PipelineError::Cancelled(_) => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn uniqueness_violation_fails_the_stage_without_retry() {
        let err = PipelineError::Store(StoreError::UniquenessViolation("duplicate row".into()));
        assert!(!err.is_retryable());
        assert!(!err.is_cancelled());
    }

    #[test]
    fn transient_store_failure_is_retryable() {
        let err = PipelineError::Store(StoreError::Storage("database is locked".into()));
        assert!(err.is_retryable());
    }

    #[test]
    fn cancellation_is_neither_retryable_nor_a_failure() {
        let err = PipelineError::Cancelled(Cancelled);
        assert!(err.is_cancelled());
        assert!(!err.is_retryable());
    }
}
