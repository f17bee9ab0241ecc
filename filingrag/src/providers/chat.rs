//! Chat provider seam plus the rig-backed adapter and a scripted mock.

use std::collections::VecDeque;

use async_trait::async_trait;
use parking_lot::Mutex;
use rig::completion::{AssistantContent, CompletionModel};

use super::ProviderError;

/// Text generation against the configured language model.
///
/// `context` carries grounding material (transcript, retrieved chunks) and is
/// passed to the model as its preamble; `prompt` is the user-facing turn.
#[async_trait]
pub trait ChatProvider: Send + Sync {
    async fn generate(&self, prompt: &str, context: Option<&str>)
        -> Result<String, ProviderError>;
}

/// Adapter over any [`rig::completion::CompletionModel`].
#[derive(Clone)]
pub struct RigChatProvider<M> {
    model: M,
    temperature: Option<f64>,
}

impl<M> RigChatProvider<M>
where
    M: CompletionModel,
{
    pub fn new(model: M) -> Self {
        Self {
            model,
            temperature: None,
        }
    }

    #[must_use]
    pub fn with_temperature(mut self, temperature: f64) -> Self {
        self.temperature = Some(temperature);
        self
    }
}

#[async_trait]
impl<M> ChatProvider for RigChatProvider<M>
where
    M: CompletionModel + Sync,
{
    async fn generate(
        &self,
        prompt: &str,
        context: Option<&str>,
    ) -> Result<String, ProviderError> {
        let mut builder = self
            .model
            .completion_request(rig::completion::Message::user(prompt.to_string()));
        if let Some(context) = context {
            builder = builder.preamble(context.to_string());
        }
        if let Some(temperature) = self.temperature {
            builder = builder.temperature(temperature);
        }
        let request = builder.build();

        let response = self
            .model
            .completion(request)
            .await
            .map_err(|err| ProviderError::failed("chat", err.to_string()))?;

        let text = response
            .choice
            .into_iter()
            .filter_map(|content| match content {
                AssistantContent::Text(text) => Some(text.text),
                _ => None,
            })
            .collect::<Vec<_>>()
            .join("");
        Ok(text)
    }
}

/// A prompt/context pair captured by [`MockChatProvider`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RecordedPrompt {
    pub prompt: String,
    pub context: Option<String>,
}

/// Scripted chat provider for tests.
///
/// Replies are popped in FIFO order; once the script is exhausted the
/// default reply is returned. Every call is recorded so tests can assert on
/// exactly what reached the model.
#[derive(Debug, Default)]
pub struct MockChatProvider {
    replies: Mutex<VecDeque<String>>,
    calls: Mutex<Vec<RecordedPrompt>>,
    failures: Mutex<u32>,
    default_reply: String,
}

impl MockChatProvider {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_default_reply(mut self, reply: impl Into<String>) -> Self {
        self.default_reply = reply.into();
        self
    }

    #[must_use]
    pub fn with_reply(self, reply: impl Into<String>) -> Self {
        self.replies.lock().push_back(reply.into());
        self
    }

    /// Fail the next `count` calls before serving scripted replies.
    #[must_use]
    pub fn failing_first(self, count: u32) -> Self {
        *self.failures.lock() = count;
        self
    }

    pub fn push_reply(&self, reply: impl Into<String>) {
        self.replies.lock().push_back(reply.into());
    }

    /// Snapshot of every prompt seen so far.
    pub fn calls(&self) -> Vec<RecordedPrompt> {
        self.calls.lock().clone()
    }
}

#[async_trait]
impl ChatProvider for MockChatProvider {
    async fn generate(
        &self,
        prompt: &str,
        context: Option<&str>,
    ) -> Result<String, ProviderError> {
        self.calls.lock().push(RecordedPrompt {
            prompt: prompt.to_string(),
            context: context.map(str::to_string),
        });
        {
            let mut failures = self.failures.lock();
            if *failures > 0 {
                *failures -= 1;
                return Err(ProviderError::failed("mock-chat", "scripted failure"));
            }
        }
        let reply = self
            .replies
            .lock()
            .pop_front()
            .unwrap_or_else(|| self.default_reply.clone());
        Ok(reply)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn scripted_replies_pop_in_order() {
        let chat = MockChatProvider::new()
            .with_reply("first")
            .with_reply("second")
            .with_default_reply("done");
        assert_eq!(chat.generate("a", None).await.unwrap(), "first");
        assert_eq!(chat.generate("b", Some("ctx")).await.unwrap(), "second");
        assert_eq!(chat.generate("c", None).await.unwrap(), "done");

        let calls = chat.calls();
        assert_eq!(calls.len(), 3);
        assert_eq!(calls[1].context.as_deref(), Some("ctx"));
    }

    #[tokio::test]
    async fn scripted_failures_come_first() {
        let chat = MockChatProvider::new().failing_first(1).with_reply("ok");
        assert!(chat.generate("x", None).await.is_err());
        assert_eq!(chat.generate("y", None).await.unwrap(), "ok");
    }
}
