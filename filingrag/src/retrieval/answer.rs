//! The answer orchestrator: retrieval-grounded generation with citations.

use std::sync::Arc;

use miette::Diagnostic;
use rustc_hash::FxHashMap;
use thiserror::Error;
use tracing::{debug, error, instrument};

use super::intent::IntentClassifier;
use super::merge::{merge_chunks, RetrievedChunk};
use super::query::QueryPreprocessor;
use super::sources::aggregate_sources;
use super::strategy::RetrievalStrategy;
use super::cosine_similarity;
use crate::config::RetrievalSettings;
use crate::domain::{Message, Source};
use crate::providers::{ChatProvider, EmbeddingProvider, IdentityProvider, ProviderError};
use crate::repository::{RepoError, SqliteRepository};
use crate::store::{ScoredChunk, StoreError, VectorStore};
use crate::types::{
    CancelToken, Cancelled, ConversationId, DocumentId, EmbeddingOwner, EmbeddingScope,
    QueryIntent, UserId,
};

const HISTORY_OPEN: &str = "=== CONVERSATION HISTORY ===";
const HISTORY_CLOSE: &str = "=== END CONVERSATION HISTORY ===";
const KNOWLEDGE_HEADER: &str = "KNOWLEDGE BASE DOCUMENTS:";

/// A question to answer within a conversation. The user message itself is
/// expected to be persisted already.
#[derive(Clone, Debug)]
pub struct AnswerRequest {
    pub conversation_id: ConversationId,
    pub user_id: UserId,
    pub content: String,
    /// Documents the user explicitly attached; always cited, threshold-free.
    pub referenced_document_ids: Vec<DocumentId>,
}

impl AnswerRequest {
    /// Build a request scoped to the identity provider's current user.
    pub fn for_current_user(
        identity: &dyn IdentityProvider,
        conversation_id: impl Into<ConversationId>,
        content: impl Into<String>,
        referenced_document_ids: Vec<DocumentId>,
    ) -> Self {
        Self {
            conversation_id: conversation_id.into(),
            user_id: identity.current_user_id(),
            content: content.into(),
            referenced_document_ids,
        }
    }
}

/// The persisted assistant message plus the classification that shaped it.
#[derive(Clone, Debug)]
pub struct AssistantReply {
    pub message: Message,
    pub intent: QueryIntent,
    pub reasoning: String,
}

/// The single failure surface of the answer flow. Everything that goes wrong
/// inside retrieval or generation collapses to `QueryFailed`; the persisted
/// user message stays so the client can offer a retry.
#[derive(Debug, Error, Diagnostic)]
pub enum AnswerError {
    #[error("query failed: {message}")]
    #[diagnostic(code(filingrag::answer::query_failed))]
    QueryFailed { message: String },

    #[error(transparent)]
    Cancelled(#[from] Cancelled),
}

#[derive(Debug, Error)]
enum FlowError {
    #[error(transparent)]
    Provider(#[from] ProviderError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Repository(#[from] RepoError),
    #[error(transparent)]
    Cancelled(#[from] Cancelled),
}

impl FlowError {
    fn is_cancelled(&self) -> bool {
        matches!(
            self,
            FlowError::Cancelled(_) | FlowError::Provider(ProviderError::Cancelled(_))
        )
    }
}

pub struct AnswerOrchestrator {
    repository: SqliteRepository,
    store: Arc<dyn VectorStore>,
    embedder: Arc<dyn EmbeddingProvider>,
    chat: Arc<dyn ChatProvider>,
    classifier: IntentClassifier,
    preprocessor: QueryPreprocessor,
    strategy: RetrievalStrategy,
}

impl AnswerOrchestrator {
    pub fn new(
        repository: SqliteRepository,
        store: Arc<dyn VectorStore>,
        embedder: Arc<dyn EmbeddingProvider>,
        chat: Arc<dyn ChatProvider>,
        settings: RetrievalSettings,
    ) -> Self {
        Self {
            repository,
            store,
            embedder,
            classifier: IntentClassifier::new(chat.clone()),
            preprocessor: QueryPreprocessor::new(chat.clone()),
            chat,
            strategy: RetrievalStrategy::new(settings),
        }
    }

    /// Produce and persist the assistant message for `request`.
    #[instrument(skip(self, ct), fields(conversation = %request.conversation_id))]
    pub async fn answer(
        &self,
        request: &AnswerRequest,
        ct: &CancelToken,
    ) -> Result<AssistantReply, AnswerError> {
        match self.answer_inner(request, ct).await {
            Ok(reply) => Ok(reply),
            Err(err) if err.is_cancelled() => Err(AnswerError::Cancelled(Cancelled)),
            Err(err) => {
                error!(target: "filingrag::retrieval", error = %err, "answer flow failed");
                Err(AnswerError::QueryFailed {
                    message: err.to_string(),
                })
            }
        }
    }

    async fn answer_inner(
        &self,
        request: &AnswerRequest,
        ct: &CancelToken,
    ) -> Result<AssistantReply, FlowError> {
        // 1. History (includes the already-persisted user message).
        let history = self
            .repository
            .list_messages(&request.conversation_id)
            .await?;
        let transcript = render_transcript(&history);

        // 2–3. Intent and retrieval parameters.
        ct.check()?;
        let decision = self.classifier.classify(&request.content).await;
        let params = self.strategy.params_for(decision.intent);
        debug!(
            target: "filingrag::retrieval",
            intent = %decision.intent,
            max_k = ?params.max_k,
            min_similarity = params.min_similarity,
            "retrieval parameters selected"
        );

        // 4–5. Search-oriented rewrite, then embed it.
        let rewritten = self
            .preprocessor
            .rewrite(&request.content, transcript.as_deref())
            .await?;
        ct.check()?;
        let query_vector = self.embedder.embed(&rewritten).await?;

        let scope =
            EmbeddingScope::conversation(&request.user_id, &request.conversation_id);

        // 6. Referenced chunks bypass the similarity threshold.
        let mut referenced_chunks: Vec<ScoredChunk> = Vec::new();
        let mut referenced_titles: FxHashMap<String, String> = FxHashMap::default();
        for document_id in &request.referenced_document_ids {
            ct.check()?;
            let stored = self
                .store
                .load_document_embeddings(EmbeddingOwner::UserDocument, &scope, document_id)
                .await?;
            for embedding in stored {
                referenced_titles
                    .entry(embedding.document_id.clone())
                    .or_insert_with(|| embedding.document_title.clone());
                referenced_chunks.push(ScoredChunk {
                    similarity: cosine_similarity(&query_vector, &embedding.vector),
                    text: embedding.text,
                    document_id: embedding.document_id,
                    document_title: embedding.document_title,
                });
            }
        }
        // Titles for referenced documents that yielded no chunks.
        for document_id in &request.referenced_document_ids {
            if !referenced_titles.contains_key(document_id) {
                let title = self
                    .repository
                    .get_document(document_id)
                    .await?
                    .map(|doc| doc.title)
                    .unwrap_or_else(|| document_id.clone());
                referenced_titles.insert(document_id.clone(), title);
            }
        }

        // 7. Adaptive KNN over the user's conversation scope.
        let adaptive = self
            .store
            .find_similar_adaptive(
                &query_vector,
                EmbeddingOwner::UserDocument,
                params.max_k,
                params.min_similarity,
                Some(&scope),
            )
            .await?;

        // 8–9. Merge (referenced wins) and aggregate per document.
        let merged = merge_chunks(adaptive, referenced_chunks);
        let aggregates = aggregate_sources(
            &merged,
            &request.referenced_document_ids,
            |document_id| {
                referenced_titles
                    .get(document_id)
                    .cloned()
                    .unwrap_or_else(|| document_id.to_string())
            },
        );

        // 10. Grounded generation.
        ct.check()?;
        let reply_text = match decision.intent {
            QueryIntent::Regular => {
                let context = build_regular_context(transcript.as_deref(), &merged);
                self.chat
                    .generate(&request.content, Some(&context))
                    .await?
            }
            QueryIntent::Exhaustive => {
                let prompt = build_exhaustive_prompt(
                    transcript.as_deref(),
                    &request.content,
                    aggregates.len(),
                );
                self.chat.generate(&prompt, None).await?
            }
        };

        // 11. Persist with the aggregated sources in computed order.
        ct.check()?;
        let sources: Vec<Source> = aggregates.iter().map(Source::from).collect();
        let message = Message::assistant(request.conversation_id.clone(), reply_text)
            .with_sources(sources)
            .with_metadata("intent", serde_json::json!(decision.intent))
            .with_metadata("rewritten_query", serde_json::json!(rewritten));
        let message = self.repository.append_message(message).await?;

        Ok(AssistantReply {
            message,
            intent: decision.intent,
            reasoning: decision.reasoning,
        })
    }
}

/// Labeled transcript bracketed by explicit delimiters; `None` when the
/// conversation has no messages.
fn render_transcript(history: &[Message]) -> Option<String> {
    if history.is_empty() {
        return None;
    }
    let mut out = String::from(HISTORY_OPEN);
    for message in history {
        out.push('\n');
        out.push_str(message.role.transcript_label());
        out.push_str(": ");
        out.push_str(&message.content);
    }
    out.push('\n');
    out.push_str(HISTORY_CLOSE);
    Some(out)
}

fn build_regular_context(transcript: Option<&str>, merged: &[RetrievedChunk]) -> String {
    let mut context = String::new();
    if let Some(transcript) = transcript {
        context.push_str(transcript);
        context.push_str("\n\n");
    }
    context.push_str(KNOWLEDGE_HEADER);
    for chunk in merged {
        context.push_str(&format!(
            "\n[{} ({}) | similarity {:.3}]\n{}\n",
            chunk.document_title, chunk.document_id, chunk.similarity, chunk.text
        ));
    }
    context
}

fn build_exhaustive_prompt(
    transcript: Option<&str>,
    user_content: &str,
    distinct_documents: usize,
) -> String {
    let mut prompt = format!(
        "An exhaustive retrieval pass for the question {user_content:?} matched \
         {distinct_documents} distinct documents. Tell the user how many documents \
         matched and that each one is listed in the cited sources. Do not invent \
         document contents."
    );
    if let Some(transcript) = transcript {
        prompt.push_str("\n\n");
        prompt.push_str(transcript);
    }
    prompt
}
