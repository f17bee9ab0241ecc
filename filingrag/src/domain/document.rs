use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::types::{ConversationId, DocumentId, UserId};

/// Who a document belongs to.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum DocumentScope {
    /// Upload or filing bound to one user's conversation.
    Conversation {
        user: UserId,
        conversation: ConversationId,
    },
    /// Corpus-wide system document.
    System,
}

/// Reference record for a document known to the system.
///
/// The identifier is opaque: a numeric key for user uploads, a
/// `{filing-type}-{accession}` composite for archive filings.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DocumentRef {
    pub id: DocumentId,
    pub title: String,
    pub scope: DocumentScope,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_type: Option<String>,
    /// Path to the raw blob in the staging area, when one exists.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub blob_path: Option<PathBuf>,
    /// Full-text snapshot, kept only for small documents.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub full_text: Option<String>,
}
