use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::pipeline::IngestionStatus;
use crate::types::{ConversationId, UserId};

/// A company associated with a conversation: display name plus the surrogate
/// key assigned by the repository.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompanyRef {
    pub id: i64,
    pub name: String,
}

/// A user's conversation. `ingestion_status` mirrors the pipeline's durable
/// state and is only written on terminal transitions, so a `None` or stale
/// value here just means "consult status.json".
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Conversation {
    pub id: ConversationId,
    pub title: String,
    pub user_id: UserId,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ingestion_status: Option<IngestionStatus>,
    /// Ordered list of associated companies.
    #[serde(default)]
    pub companies: Vec<CompanyRef>,
}
