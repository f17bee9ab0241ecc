//! Search-oriented query rewriting.

use std::sync::Arc;

use crate::providers::{ChatProvider, ProviderError};

const REWRITE_PROMPT: &str = "\
Rewrite the user's message as a standalone search query over company filings.\n\
Resolve pronouns and references against the conversation when provided.\n\
Reply with the rewritten query only — no quotes, no commentary.";

/// Rewrites a conversational message into a retrieval-friendly query using
/// the chat provider. A blank reply falls back to the original message.
pub struct QueryPreprocessor {
    chat: Arc<dyn ChatProvider>,
}

impl QueryPreprocessor {
    pub fn new(chat: Arc<dyn ChatProvider>) -> Self {
        Self { chat }
    }

    /// History-aware form; pass `None` when the conversation is empty.
    pub async fn rewrite(
        &self,
        query: &str,
        history: Option<&str>,
    ) -> Result<String, ProviderError> {
        let context = match history {
            Some(history) if !history.trim().is_empty() => {
                format!("{REWRITE_PROMPT}\n\n{history}")
            }
            _ => REWRITE_PROMPT.to_string(),
        };
        let reply = self.chat.generate(query, Some(&context)).await?;
        let rewritten = reply.trim();
        if rewritten.is_empty() {
            Ok(query.to_string())
        } else {
            Ok(rewritten.to_string())
        }
    }
}
