use std::fmt;

use chrono::{DateTime, Utc};
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::types::{ConversationId, DocumentId};

/// Role of a message within a conversation.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageRole {
    User,
    Assistant,
    System,
}

impl MessageRole {
    #[must_use]
    pub fn encode(&self) -> &'static str {
        match self {
            MessageRole::User => "user",
            MessageRole::Assistant => "assistant",
            MessageRole::System => "system",
        }
    }

    pub fn decode(s: &str) -> Option<Self> {
        match s {
            "user" => Some(MessageRole::User),
            "assistant" => Some(MessageRole::Assistant),
            "system" => Some(MessageRole::System),
            _ => None,
        }
    }

    /// Uppercase transcript label (`USER`, `ASSISTANT`, `SYSTEM`).
    #[must_use]
    pub fn transcript_label(&self) -> &'static str {
        match self {
            MessageRole::User => "USER",
            MessageRole::Assistant => "ASSISTANT",
            MessageRole::System => "SYSTEM",
        }
    }
}

impl fmt::Display for MessageRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.encode())
    }
}

/// Citation attached to an assistant message.
///
/// `relevance_score` is the maximum chunk similarity contributing from the
/// document (raw cosine similarity, in `[-1, 1]`); `order` is the 0-based
/// rank by relevance, descending.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Source {
    pub document_id: DocumentId,
    pub document_title: String,
    pub relevance_score: f32,
    pub chunks_used: usize,
    pub order: usize,
}

impl Source {
    /// Score clipped to `[0, 1]` for presentation.
    #[must_use]
    pub fn presentation_score(&self) -> f32 {
        self.relevance_score.clamp(0.0, 1.0)
    }
}

/// One message in a conversation. Only assistant messages produced by the
/// answer path carry a non-empty `sources` list.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: String,
    pub conversation_id: ConversationId,
    pub role: MessageRole,
    pub content: String,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub metadata: FxHashMap<String, serde_json::Value>,
    #[serde(default)]
    pub sources: Vec<Source>,
}

impl Message {
    pub fn new(
        conversation_id: impl Into<ConversationId>,
        role: MessageRole,
        content: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            conversation_id: conversation_id.into(),
            role,
            content: content.into(),
            created_at: Utc::now(),
            metadata: FxHashMap::default(),
            sources: Vec::new(),
        }
    }

    pub fn user(conversation_id: impl Into<ConversationId>, content: impl Into<String>) -> Self {
        Self::new(conversation_id, MessageRole::User, content)
    }

    pub fn assistant(
        conversation_id: impl Into<ConversationId>,
        content: impl Into<String>,
    ) -> Self {
        Self::new(conversation_id, MessageRole::Assistant, content)
    }

    pub fn system(conversation_id: impl Into<ConversationId>, content: impl Into<String>) -> Self {
        Self::new(conversation_id, MessageRole::System, content)
    }

    #[must_use]
    pub fn with_sources(mut self, sources: Vec<Source>) -> Self {
        self.sources = sources;
        self
    }

    #[must_use]
    pub fn with_metadata(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }
}
