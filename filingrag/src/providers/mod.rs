//! Seams to the external collaborators: archive fetcher, embedding model,
//! chat model, and identity.
//!
//! The core only ever talks to the traits defined here. Production wiring
//! plugs in the rig-backed adapters (and `fr-edgar`'s archive client); tests
//! plug in the deterministic mocks.

pub mod chat;
pub mod embeddings;
pub mod identity;

pub use chat::{ChatProvider, MockChatProvider, RigChatProvider};
pub use embeddings::{EmbeddingProvider, MockEmbeddingProvider, RigEmbeddingProvider};
pub use identity::{IdentityProvider, StaticIdentity};

use chrono::NaiveDate;
use miette::Diagnostic;
use thiserror::Error;

use crate::types::{CancelToken, Cancelled};

/// Error surfaced by any external provider.
#[derive(Debug, Error, Diagnostic)]
pub enum ProviderError {
    /// The provider call itself failed (network, quota, malformed payload).
    #[error("provider error ({provider}): {message}")]
    #[diagnostic(code(filingrag::provider::failed))]
    Failed {
        provider: &'static str,
        message: String,
    },

    /// Cooperative cancellation observed before or during the call.
    #[error(transparent)]
    #[diagnostic(code(filingrag::provider::cancelled))]
    Cancelled(#[from] Cancelled),
}

impl ProviderError {
    pub fn failed(provider: &'static str, message: impl Into<String>) -> Self {
        Self::Failed {
            provider,
            message: message.into(),
        }
    }
}

/// One filing as fetched from the archive, prior to staging.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FilingDocument {
    pub content: Vec<u8>,
    pub file_name: String,
    pub filing_type: String,
    pub accession_number: String,
    pub filing_date: NaiveDate,
    pub company_identifier: String,
}

/// Downloads regulatory filings for a company from the remote archive.
///
/// An empty result is legal — the pipeline turns it into a
/// no-filings-found failure. Per-filing download errors are the fetcher's to
/// swallow (skip and continue); only whole-listing failures surface here.
#[async_trait::async_trait]
pub trait ArchiveFetcher: Send + Sync {
    async fn download_filings(
        &self,
        company_identifier: &str,
        filing_types: &[String],
        ct: &CancelToken,
    ) -> Result<Vec<FilingDocument>, ProviderError>;
}
