//! Durable per-conversation batch state (`status.json`).

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::pipeline::IngestionStatus;
use crate::providers::FilingDocument;

/// One filing recorded in the batch state after download.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchDocument {
    pub file_name: String,
    pub filing_type: String,
    pub accession_number: String,
    pub filing_date: NaiveDate,
}

impl BatchDocument {
    /// The opaque document id used for vector rows and citations:
    /// `{filing-type}-{accession}`.
    #[must_use]
    pub fn document_id(&self) -> String {
        format!("{}-{}", self.filing_type, self.accession_number)
    }
}

impl From<&FilingDocument> for BatchDocument {
    fn from(doc: &FilingDocument) -> Self {
        Self {
            file_name: doc.file_name.clone(),
            filing_type: doc.filing_type.clone(),
            accession_number: doc.accession_number.clone(),
            filing_date: doc.filing_date,
        }
    }
}

/// The canonical pipeline record. Everything else under the conversation's
/// staging directory is reconstructible; this file is not.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct BatchState {
    pub conversation_id: String,
    pub user_id: String,
    pub company_identifier: String,
    pub filing_types: Vec<String>,
    pub status: IngestionStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub job_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub documents: Vec<BatchDocument>,
}

impl BatchState {
    /// Fresh state at pipeline setup, status `Pending`.
    pub fn new(
        conversation_id: impl Into<String>,
        user_id: impl Into<String>,
        company_identifier: impl Into<String>,
        filing_types: Vec<String>,
    ) -> Self {
        Self {
            conversation_id: conversation_id.into(),
            user_id: user_id.into(),
            company_identifier: company_identifier.into(),
            filing_types,
            status: IngestionStatus::Pending,
            job_id: None,
            error_message: None,
            created_at: Utc::now(),
            completed_at: None,
            documents: Vec::new(),
        }
    }

    /// Move to `next`, enforcing the monotonic state machine.
    pub fn advance(&mut self, next: IngestionStatus) -> Result<(), InvalidTransition> {
        if !self.status.can_advance_to(next) {
            return Err(InvalidTransition {
                from: self.status,
                to: next,
            });
        }
        self.status = next;
        if next == IngestionStatus::Completed {
            self.completed_at = Some(Utc::now());
        }
        Ok(())
    }

    /// Terminal failure with the triggering message.
    pub fn mark_failed(&mut self, message: impl Into<String>) {
        self.status = IngestionStatus::Failed;
        self.error_message = Some(message.into());
        self.completed_at = Some(Utc::now());
    }
}

/// Rejected state-machine transition; indicates a scheduling bug rather than
/// an environmental failure.
#[derive(Clone, Copy, Debug, PartialEq, Eq, thiserror::Error)]
#[error("illegal pipeline transition: {from} -> {to}")]
pub struct InvalidTransition {
    pub from: IngestionStatus,
    pub to: IngestionStatus,
}
