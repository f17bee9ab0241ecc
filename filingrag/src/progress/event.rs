//! Processing events published per conversation.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::pipeline::IngestionStatus;

/// Channel name for stage updates.
pub const CHANNEL_UPDATE: &str = "ProcessingUpdate";
/// Channel name for the terminal completion event.
pub const CHANNEL_COMPLETE: &str = "ProcessingComplete";
/// Channel name for the terminal error event.
pub const CHANNEL_ERROR: &str = "ProcessingError";

/// Stage progress notification.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ProgressUpdate {
    pub stage: IngestionStatus,
    pub message: String,
    /// Percentage in `[0, 100]`.
    pub progress_percent: u8,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub documents_processed: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_documents: Option<usize>,
    pub timestamp: DateTime<Utc>,
}

/// Pipeline finished successfully.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ProcessingSummary {
    pub total_documents: usize,
    pub successful_documents: usize,
    pub failed_documents: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
    pub completed_at: DateTime<Utc>,
}

/// Pipeline failed.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ProcessingFailure {
    pub error_message: String,
    pub stage: IngestionStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub documents_processed: Option<usize>,
    pub timestamp: DateTime<Utc>,
}

/// Event delivered to subscribers of one conversation's progress group.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "type", content = "payload")]
pub enum ProcessingEvent {
    Update(ProgressUpdate),
    Completed(ProcessingSummary),
    Error(ProcessingFailure),
}

impl ProcessingEvent {
    pub fn update(
        stage: IngestionStatus,
        message: impl Into<String>,
        progress_percent: u8,
    ) -> Self {
        ProcessingEvent::Update(ProgressUpdate {
            stage,
            message: message.into(),
            progress_percent: progress_percent.min(100),
            documents_processed: None,
            total_documents: None,
            timestamp: Utc::now(),
        })
    }

    pub fn update_with_counts(
        stage: IngestionStatus,
        message: impl Into<String>,
        progress_percent: u8,
        documents_processed: usize,
        total_documents: usize,
    ) -> Self {
        ProcessingEvent::Update(ProgressUpdate {
            stage,
            message: message.into(),
            progress_percent: progress_percent.min(100),
            documents_processed: Some(documents_processed),
            total_documents: Some(total_documents),
            timestamp: Utc::now(),
        })
    }

    pub fn completed(total_documents: usize, duration_ms: Option<u64>) -> Self {
        ProcessingEvent::Completed(ProcessingSummary {
            total_documents,
            successful_documents: total_documents,
            failed_documents: 0,
            duration_ms,
            completed_at: Utc::now(),
        })
    }

    pub fn error(stage: IngestionStatus, error_message: impl Into<String>) -> Self {
        ProcessingEvent::Error(ProcessingFailure {
            error_message: error_message.into(),
            stage,
            documents_processed: None,
            timestamp: Utc::now(),
        })
    }

    /// The wire channel this event is delivered on.
    #[must_use]
    pub fn channel(&self) -> &'static str {
        match self {
            ProcessingEvent::Update(_) => CHANNEL_UPDATE,
            ProcessingEvent::Completed(_) => CHANNEL_COMPLETE,
            ProcessingEvent::Error(_) => CHANNEL_ERROR,
        }
    }

    /// The stage this event refers to, when it has one.
    #[must_use]
    pub fn stage(&self) -> Option<IngestionStatus> {
        match self {
            ProcessingEvent::Update(update) => Some(update.stage),
            ProcessingEvent::Error(failure) => Some(failure.stage),
            ProcessingEvent::Completed(_) => None,
        }
    }
}
