//! Core identifier, scope, and cancellation types shared across the crate.
//!
//! Identifiers are kept as plain strings: conversation and user ids come from
//! the surrounding service, and document ids are opaque — a numeric key for
//! user uploads or a `{filing-type}-{accession}` composite for archive
//! filings. Nothing in the core parses them.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::watch;

/// Conversation identifier, assigned by the conversation repository.
pub type ConversationId = String;

/// User identifier, supplied by the identity provider.
pub type UserId = String;

/// Opaque document identifier.
pub type DocumentId = String;

/// Which corpus an embedding row belongs to.
///
/// `UserDocument` rows are scoped to a user (and usually a conversation);
/// `SystemKnowledgeBase` rows are corpus-wide and unscoped.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EmbeddingOwner {
    UserDocument,
    SystemKnowledgeBase,
}

impl EmbeddingOwner {
    /// Encode into the persisted string form used by the vector store.
    #[must_use]
    pub fn encode(&self) -> &'static str {
        match self {
            EmbeddingOwner::UserDocument => "user_document",
            EmbeddingOwner::SystemKnowledgeBase => "system_knowledge_base",
        }
    }

    /// Decode a persisted string form; unknown values yield `None`.
    pub fn decode(s: &str) -> Option<Self> {
        match s {
            "user_document" => Some(EmbeddingOwner::UserDocument),
            "system_knowledge_base" => Some(EmbeddingOwner::SystemKnowledgeBase),
            _ => None,
        }
    }
}

impl fmt::Display for EmbeddingOwner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.encode())
    }
}

/// User/conversation scope attached to embedding rows and KNN queries.
///
/// Absent components mean "unscoped" and are stored as empty strings so the
/// store's uniqueness constraint covers them.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EmbeddingScope {
    pub user: Option<UserId>,
    pub conversation: Option<ConversationId>,
}

impl EmbeddingScope {
    /// Scope bound to a user's conversation — the shape used for filings
    /// ingested on behalf of one conversation.
    pub fn conversation(user: impl Into<UserId>, conversation: impl Into<ConversationId>) -> Self {
        Self {
            user: Some(user.into()),
            conversation: Some(conversation.into()),
        }
    }

    /// Scope bound to a user across all of their conversations.
    pub fn user(user: impl Into<UserId>) -> Self {
        Self {
            user: Some(user.into()),
            conversation: None,
        }
    }

    /// The corpus-wide scope with no user or conversation binding.
    #[must_use]
    pub fn system() -> Self {
        Self::default()
    }
}

/// Retrieval intent of a user query.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueryIntent {
    /// Balanced precision/recall lookup.
    Regular,
    /// Maximum-recall sweep ("list all …" style questions).
    Exhaustive,
}

impl fmt::Display for QueryIntent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            QueryIntent::Regular => write!(f, "regular"),
            QueryIntent::Exhaustive => write!(f, "exhaustive"),
        }
    }
}

/// Error returned when an operation observes a cancelled [`CancelToken`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Error)]
#[error("operation cancelled")]
pub struct Cancelled;

/// Source side of a cancellation pair. Cloning shares the same signal.
///
/// Built on a `watch` channel: every [`CancelToken`] handed out observes the
/// flip to `true`, and tokens keep the sender alive so a dropped source does
/// not read as a cancellation.
#[derive(Clone, Debug)]
pub struct CancelSource {
    tx: Arc<watch::Sender<bool>>,
}

impl CancelSource {
    #[allow(clippy::new_without_default)]
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self { tx: Arc::new(tx) }
    }

    /// Hand out a token observing this source.
    pub fn token(&self) -> CancelToken {
        CancelToken {
            rx: self.tx.subscribe(),
            _source: self.tx.clone(),
        }
    }

    /// Flip the signal. Idempotent.
    pub fn cancel(&self) {
        let _ = self.tx.send(true);
    }
}

/// Cooperative cancellation token checked between network calls and per-file
/// iterations.
#[derive(Clone, Debug)]
pub struct CancelToken {
    rx: watch::Receiver<bool>,
    _source: Arc<watch::Sender<bool>>,
}

impl CancelToken {
    /// A token that never fires, for call sites without a caller-supplied
    /// signal.
    #[must_use]
    pub fn never() -> Self {
        CancelSource::new().token()
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        *self.rx.borrow()
    }

    /// Checkpoint: `Err(Cancelled)` once the source has fired.
    pub fn check(&self) -> Result<(), Cancelled> {
        if self.is_cancelled() {
            Err(Cancelled)
        } else {
            Ok(())
        }
    }

    /// Resolve when the source fires (or immediately if it already has).
    pub async fn cancelled(&self) {
        let mut rx = self.rx.clone();
        loop {
            if *rx.borrow() {
                return;
            }
            if rx.changed().await.is_err() {
                return;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn owner_encoding_round_trips() {
        for owner in [EmbeddingOwner::UserDocument, EmbeddingOwner::SystemKnowledgeBase] {
            assert_eq!(EmbeddingOwner::decode(owner.encode()), Some(owner));
        }
        assert_eq!(EmbeddingOwner::decode("bogus"), None);
    }

    #[test]
    fn cancel_token_observes_source() {
        let source = CancelSource::new();
        let token = source.token();
        assert!(token.check().is_ok());
        source.cancel();
        assert!(token.is_cancelled());
        assert_eq!(token.check(), Err(Cancelled));
    }

    #[test]
    fn never_token_stays_live_without_source() {
        let token = CancelToken::never();
        assert!(!token.is_cancelled());
        let clone = token.clone();
        drop(token);
        assert!(!clone.is_cancelled());
    }

    #[tokio::test]
    async fn cancelled_future_resolves_after_fire() {
        let source = CancelSource::new();
        let token = source.token();
        let waiter = tokio::spawn(async move { token.cancelled().await });
        source.cancel();
        waiter.await.unwrap();
    }
}
