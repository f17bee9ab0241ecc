//! Conversation, message, and document persistence.

mod sqlite;

pub use sqlite::SqliteRepository;

use miette::Diagnostic;
use thiserror::Error;

#[derive(Debug, Error, Diagnostic)]
pub enum RepoError {
    /// Record absent, or present but owned by a different user.
    #[error("{what} not found: {id}")]
    #[diagnostic(code(filingrag::repository::not_found))]
    NotFound { what: &'static str, id: String },

    #[error("validation failed: {0}")]
    #[diagnostic(code(filingrag::repository::validation))]
    Validation(String),

    #[error("repository failure: {0}")]
    #[diagnostic(code(filingrag::repository::storage))]
    Storage(String),
}
