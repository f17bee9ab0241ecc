//! The five-stage ingestion orchestrator.
//!
//! Each stage loads the durable state, transitions it to the stage's
//! in-progress value, emits a progress event, does its work, and persists its
//! artifact before returning. Unhandled stage errors flow to the retry
//! harness; once a stage's budget is spent the batch is marked `Failed`, the
//! conversation mirror is updated, and an error event is published.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use tokio::fs;
use tracing::{info, instrument, warn};

use super::{IngestionStatus, PipelineError, StageLocks};
use crate::chunking::{assign_offsets, ChunkEmbedding, DocumentChunk, TextChunker};
use crate::config::{ChunkerSettings, PipelineSettings};
use crate::domain::{DocumentRef, DocumentScope};
use crate::extract::extract_text;
use crate::pipeline::retry::run_with_retry;
use crate::progress::{ProcessingEvent, ProgressBus};
use crate::providers::{ArchiveFetcher, EmbeddingProvider, IdentityProvider, ProviderError};
use crate::repository::SqliteRepository;
use crate::staging::{sanitize_component, BatchDocument, BatchState, StagingArea, StagingError};
use crate::store::{EmbeddingUpsert, VectorStore};
use crate::types::{CancelToken, ConversationId, EmbeddingOwner, EmbeddingScope, UserId};

// Progress milestones per stage: emitted on entry and on completion.
const DOWNLOAD_PROGRESS: (u8, u8) = (10, 20);
const EXTRACT_PROGRESS: (u8, u8) = (30, 40);
const CHUNK_PROGRESS: (u8, u8) = (50, 60);
const EMBED_PROGRESS: (u8, u8) = (70, 80);
const PERSIST_PROGRESS: (u8, u8) = (90, 100);

/// One ingestion batch to run for a conversation.
#[derive(Clone, Debug)]
pub struct IngestionRequest {
    pub conversation_id: ConversationId,
    pub user_id: UserId,
    pub company_identifier: String,
    pub filing_types: Vec<String>,
    pub job_id: Option<String>,
}

impl IngestionRequest {
    /// Build a request scoped to the identity provider's current user — the
    /// shape the enqueueing layer uses.
    pub fn for_current_user(
        identity: &dyn IdentityProvider,
        conversation_id: impl Into<ConversationId>,
        company_identifier: impl Into<String>,
        filing_types: Vec<String>,
    ) -> Self {
        Self {
            conversation_id: conversation_id.into(),
            user_id: identity.current_user_id(),
            company_identifier: company_identifier.into(),
            filing_types,
            job_id: None,
        }
    }
}

/// Drives one conversation's batch through download → extract → chunk →
/// embed → persist.
pub struct IngestionPipeline {
    staging: StagingArea,
    fetcher: Arc<dyn ArchiveFetcher>,
    embedder: Arc<dyn EmbeddingProvider>,
    store: Arc<dyn VectorStore>,
    repository: SqliteRepository,
    bus: Arc<ProgressBus>,
    locks: StageLocks,
    chunker: TextChunker,
    settings: PipelineSettings,
}

impl IngestionPipeline {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        staging: StagingArea,
        fetcher: Arc<dyn ArchiveFetcher>,
        embedder: Arc<dyn EmbeddingProvider>,
        store: Arc<dyn VectorStore>,
        repository: SqliteRepository,
        bus: Arc<ProgressBus>,
        settings: PipelineSettings,
        chunker_settings: ChunkerSettings,
    ) -> Self {
        Self {
            staging,
            fetcher,
            embedder,
            store,
            repository,
            bus,
            locks: StageLocks::new(),
            chunker: TextChunker::new(chunker_settings),
            settings,
        }
    }

    /// Run the full batch. On success the batch state and the conversation
    /// mirror both read `Completed` and a completion event is published; on
    /// failure both read `Failed` and an error event is published.
    /// Cancellation leaves artifacts and state untouched for a later resume.
    #[instrument(skip(self, ct), fields(conversation = %request.conversation_id))]
    pub async fn run(
        &self,
        request: &IngestionRequest,
        ct: &CancelToken,
    ) -> Result<(), PipelineError> {
        validate(request)?;
        let started = Instant::now();
        self.setup(request).await?;

        let outcome = self.run_stages(request, ct).await;
        match outcome {
            Ok(()) => {
                let state = self.load_state(&request.conversation_id).await?;
                self.repository
                    .set_ingestion_status(
                        &request.conversation_id,
                        Some(IngestionStatus::Completed),
                    )
                    .await?;
                let duration_ms = started.elapsed().as_millis() as u64;
                self.bus.publish(
                    &request.conversation_id,
                    ProcessingEvent::completed(state.documents.len(), Some(duration_ms)),
                );
                info!(
                    target: "filingrag::pipeline",
                    documents = state.documents.len(),
                    duration_ms,
                    "ingestion completed"
                );
                Ok(())
            }
            Err(err) if err.is_cancelled() => {
                info!(target: "filingrag::pipeline", "ingestion cancelled; artifacts retained");
                Err(err)
            }
            Err(err) => {
                self.record_failure(request, &err).await;
                Err(err)
            }
        }
    }

    async fn run_stages(
        &self,
        request: &IngestionRequest,
        ct: &CancelToken,
    ) -> Result<(), PipelineError> {
        run_with_retry(&self.settings.download, "download", ct, || {
            self.stage_download(request, ct)
        })
        .await?;
        run_with_retry(&self.settings.extract, "extract", ct, || {
            self.stage_extract(request, ct)
        })
        .await?;
        run_with_retry(&self.settings.chunk, "chunk", ct, || {
            self.stage_chunk(request, ct)
        })
        .await?;
        run_with_retry(&self.settings.embed, "embed", ct, || {
            self.stage_embed(request, ct)
        })
        .await?;
        run_with_retry(&self.settings.persist, "persist", ct, || {
            self.stage_persist(request, ct)
        })
        .await
    }

    /// Create the staging layout and a fresh `Pending` state. Reruns reset
    /// the state; the stages' artifact checks are what make resume cheap.
    async fn setup(&self, request: &IngestionRequest) -> Result<(), PipelineError> {
        self.staging.ensure_layout(&request.conversation_id).await?;
        let mut state = BatchState::new(
            &request.conversation_id,
            &request.user_id,
            &request.company_identifier,
            request.filing_types.clone(),
        );
        state.job_id = request.job_id.clone();
        // Keep the documents list from a previous attempt so resumed runs
        // retain their download manifest even if the fetcher is skipped.
        if let Ok(previous) = self.staging.load_state(&request.conversation_id).await {
            state.documents = previous.documents;
        }
        self.staging.save_state(&state).await?;
        Ok(())
    }

    async fn load_state(&self, conversation_id: &str) -> Result<BatchState, PipelineError> {
        self.staging
            .load_state(conversation_id)
            .await
            .map_err(|err| match err {
                StagingError::StateMissing { path } => PipelineError::StateCorrupt(format!(
                    "state file missing at {}",
                    path.display()
                )),
                StagingError::Decode { path, source } => PipelineError::StateCorrupt(format!(
                    "state file unreadable at {}: {source}",
                    path.display()
                )),
                other => other.into(),
            })
    }

    async fn enter_stage(
        &self,
        conversation_id: &str,
        stage: IngestionStatus,
        message: &str,
        percent: u8,
    ) -> Result<BatchState, PipelineError> {
        let mut state = self.load_state(conversation_id).await?;
        state.advance(stage)?;
        self.staging.save_state(&state).await?;
        self.bus
            .publish(conversation_id, ProcessingEvent::update(stage, message, percent));
        Ok(state)
    }

    async fn stage_download(
        &self,
        request: &IngestionRequest,
        ct: &CancelToken,
    ) -> Result<(), PipelineError> {
        let cid = &request.conversation_id;
        let mut state = self
            .enter_stage(
                cid,
                IngestionStatus::Downloading,
                "downloading filings from the archive",
                DOWNLOAD_PROGRESS.0,
            )
            .await?;

        ct.check()?;
        let documents = self
            .fetcher
            .download_filings(&request.company_identifier, &request.filing_types, ct)
            .await?;
        if documents.is_empty() {
            return Err(PipelineError::NoFilingsFound {
                company: request.company_identifier.clone(),
            });
        }

        self.staging.persist_raw(cid, &documents, ct).await?;
        state.documents = documents.iter().map(BatchDocument::from).collect();
        self.staging.save_state(&state).await?;

        self.bus.publish(
            cid,
            ProcessingEvent::update_with_counts(
                IngestionStatus::Downloading,
                format!("downloaded {} filings", documents.len()),
                DOWNLOAD_PROGRESS.1,
                documents.len(),
                documents.len(),
            ),
        );
        Ok(())
    }

    async fn stage_extract(
        &self,
        request: &IngestionRequest,
        ct: &CancelToken,
    ) -> Result<(), PipelineError> {
        let cid = &request.conversation_id;
        let state = self
            .enter_stage(
                cid,
                IngestionStatus::Extracting,
                "extracting text from downloaded filings",
                EXTRACT_PROGRESS.0,
            )
            .await?;

        let raw_files = sorted_files(&self.staging.raw_dir(cid)).await?;
        let extracted_dir = self.staging.extracted_dir(cid);
        let mut processed = 0usize;
        for raw in &raw_files {
            ct.check()?;
            let target = extracted_dir.join(extracted_name(raw));
            if fs::try_exists(&target).await.unwrap_or(false) {
                processed += 1;
                continue;
            }
            let text = extract_text(raw).await?;
            crate::staging::write_atomic(&target, text.as_bytes()).await?;
            processed += 1;
        }

        self.bus.publish(
            cid,
            ProcessingEvent::update_with_counts(
                IngestionStatus::Extracting,
                format!("extracted {} documents", processed),
                EXTRACT_PROGRESS.1,
                processed,
                state.documents.len().max(raw_files.len()),
            ),
        );
        Ok(())
    }

    async fn stage_chunk(
        &self,
        request: &IngestionRequest,
        ct: &CancelToken,
    ) -> Result<(), PipelineError> {
        let cid = &request.conversation_id;
        let state = self
            .enter_stage(
                cid,
                IngestionStatus::Chunking,
                "splitting extracted text into chunks",
                CHUNK_PROGRESS.0,
            )
            .await?;

        let chunks_path = self.staging.chunks_path(cid);
        if !fs::try_exists(&chunks_path).await.unwrap_or(false) {
            let mut all_chunks: Vec<DocumentChunk> = Vec::new();
            for extracted in sorted_files(&self.staging.extracted_dir(cid)).await? {
                ct.check()?;
                let text = fs::read_to_string(&extracted).await.map_err(|source| {
                    StagingError::Io {
                        path: extracted.clone(),
                        source,
                    }
                })?;
                let document_id = document_id_for(&state, &extracted);
                let pieces = self.chunker.split(&text);
                all_chunks.extend(assign_offsets(&document_id, &text, pieces));
            }
            self.staging
                .write_json(&chunks_path, "chunks", &all_chunks)
                .await?;
            self.bus.publish(
                cid,
                ProcessingEvent::update(
                    IngestionStatus::Chunking,
                    format!("wrote {} chunks", all_chunks.len()),
                    CHUNK_PROGRESS.1,
                ),
            );
        } else {
            self.bus.publish(
                cid,
                ProcessingEvent::update(
                    IngestionStatus::Chunking,
                    "chunks artifact present, skipping",
                    CHUNK_PROGRESS.1,
                ),
            );
        }
        Ok(())
    }

    async fn stage_embed(
        &self,
        request: &IngestionRequest,
        ct: &CancelToken,
    ) -> Result<(), PipelineError> {
        let cid = &request.conversation_id;
        self.enter_stage(
            cid,
            IngestionStatus::GeneratingEmbeddings,
            "generating embeddings for chunks",
            EMBED_PROGRESS.0,
        )
        .await?;

        let embeddings_path = self.staging.embeddings_path(cid);
        if !fs::try_exists(&embeddings_path).await.unwrap_or(false) {
            let chunks: Vec<DocumentChunk> =
                self.staging.read_json(&self.staging.chunks_path(cid)).await?;
            ct.check()?;
            let texts: Vec<String> = chunks.iter().map(|c| c.text.clone()).collect();
            let vectors = self.embedder.embed_batch(&texts).await?;
            if vectors.len() != chunks.len() {
                return Err(ProviderError::failed(
                    "embedding",
                    format!(
                        "provider returned {} vectors for {} chunks",
                        vectors.len(),
                        chunks.len()
                    ),
                )
                .into());
            }
            let embedded: Vec<ChunkEmbedding> = chunks
                .into_iter()
                .zip(vectors)
                .map(|(chunk, embedding)| ChunkEmbedding { chunk, embedding })
                .collect();
            self.staging
                .write_json(&embeddings_path, "embeddings", &embedded)
                .await?;
            self.bus.publish(
                cid,
                ProcessingEvent::update(
                    IngestionStatus::GeneratingEmbeddings,
                    format!("embedded {} chunks", embedded.len()),
                    EMBED_PROGRESS.1,
                ),
            );
        } else {
            // The expensive artifact already exists; this skip is the
            // cost-correctness core of retrying this stage.
            self.bus.publish(
                cid,
                ProcessingEvent::update(
                    IngestionStatus::GeneratingEmbeddings,
                    "embeddings artifact present, skipping",
                    EMBED_PROGRESS.1,
                ),
            );
        }
        Ok(())
    }

    async fn stage_persist(
        &self,
        request: &IngestionRequest,
        ct: &CancelToken,
    ) -> Result<(), PipelineError> {
        let cid = &request.conversation_id;
        let mut state = self
            .enter_stage(
                cid,
                IngestionStatus::PersistingEmbeddings,
                "persisting embeddings to the vector store",
                PERSIST_PROGRESS.0,
            )
            .await?;

        let embedded: Vec<ChunkEmbedding> = self
            .staging
            .read_json(&self.staging.embeddings_path(cid))
            .await?;

        let _guard = self
            .locks
            .acquire(cid, self.settings.persist_lock_timeout)
            .await?;
        ct.check()?;

        let scope = EmbeddingScope::conversation(&request.user_id, cid.clone());
        let items: Vec<EmbeddingUpsert> = embedded
            .iter()
            .map(|entry| {
                EmbeddingUpsert::new(
                    EmbeddingOwner::UserDocument,
                    scope.clone(),
                    entry.chunk.source_document.clone(),
                    title_for(&state, &entry.chunk.source_document),
                    entry.chunk.chunk_index,
                    entry.chunk.text.clone(),
                    entry.embedding.clone(),
                )
            })
            .collect();
        let outcome = self.store.upsert_embeddings(items).await?;

        for document in &state.documents {
            let raw_path = self
                .staging
                .raw_dir(cid)
                .join(sanitize_component(&document.file_name));
            self.repository
                .upsert_document(DocumentRef {
                    id: document.document_id(),
                    title: document.file_name.clone(),
                    scope: DocumentScope::Conversation {
                        user: request.user_id.clone(),
                        conversation: cid.clone(),
                    },
                    content_type: content_type_for(&document.file_name),
                    blob_path: Some(raw_path),
                    full_text: None,
                })
                .await?;
        }

        state.advance(IngestionStatus::Completed)?;
        self.staging.save_state(&state).await?;

        self.bus.publish(
            cid,
            ProcessingEvent::update(
                IngestionStatus::PersistingEmbeddings,
                format!(
                    "persisted embeddings ({} inserted, {} updated, {} unchanged)",
                    outcome.inserted, outcome.updated, outcome.unchanged
                ),
                PERSIST_PROGRESS.1,
            ),
        );
        Ok(())
    }

    /// Terminal failure bookkeeping: durable state, conversation mirror, and
    /// error event. All best-effort — the original error is what propagates.
    async fn record_failure(&self, request: &IngestionRequest, err: &PipelineError) {
        let cid = &request.conversation_id;
        let stage = match self.staging.load_state(cid).await {
            Ok(mut state) => {
                let stage = state.status;
                state.mark_failed(err.to_string());
                if let Err(save_err) = self.staging.save_state(&state).await {
                    warn!(
                        target: "filingrag::pipeline",
                        error = %save_err,
                        "failed to persist failed state"
                    );
                }
                stage
            }
            Err(load_err) => {
                warn!(
                    target: "filingrag::pipeline",
                    error = %load_err,
                    "failed to load state while recording failure"
                );
                IngestionStatus::Failed
            }
        };

        if let Err(mirror_err) = self
            .repository
            .set_ingestion_status(cid, Some(IngestionStatus::Failed))
            .await
        {
            warn!(
                target: "filingrag::pipeline",
                error = %mirror_err,
                "failed to mirror failed status to conversation"
            );
        }

        self.bus
            .publish(cid, ProcessingEvent::error(stage, err.to_string()));
    }
}

fn validate(request: &IngestionRequest) -> Result<(), PipelineError> {
    if request.company_identifier.trim().is_empty() {
        return Err(PipelineError::Validation(
            "company identifier must not be empty".into(),
        ));
    }
    if request.filing_types.is_empty()
        || request.filing_types.iter().any(|t| t.trim().is_empty())
    {
        return Err(PipelineError::Validation(
            "at least one non-empty filing type is required".into(),
        ));
    }
    Ok(())
}

/// Regular files in `dir`, sorted by name for deterministic stage output.
/// Temp files from interrupted atomic writes are ignored.
async fn sorted_files(dir: &Path) -> Result<Vec<PathBuf>, PipelineError> {
    let mut entries = fs::read_dir(dir).await.map_err(|source| StagingError::Io {
        path: dir.to_path_buf(),
        source,
    })?;
    let mut files = Vec::new();
    while let Some(entry) = entries
        .next_entry()
        .await
        .map_err(|source| StagingError::Io {
            path: dir.to_path_buf(),
            source,
        })?
    {
        let path = entry.path();
        let is_file = entry
            .file_type()
            .await
            .map(|ft| ft.is_file())
            .unwrap_or(false);
        let is_tmp = path
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| ext == "tmp");
        if is_file && !is_tmp {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}

/// `aapl-20240928.htm` → `aapl-20240928.txt`
fn extracted_name(raw: &Path) -> String {
    let stem = raw
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("document");
    format!("{stem}.txt")
}

/// Map an extracted file back to its filing's opaque document id via the
/// download manifest; unknown files fall back to their stem.
fn document_id_for(state: &BatchState, extracted: &Path) -> String {
    let stem = extracted
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("document");
    state
        .documents
        .iter()
        .find(|doc| {
            Path::new(&sanitize_component(&doc.file_name))
                .file_stem()
                .and_then(|s| s.to_str())
                == Some(stem)
        })
        .map(BatchDocument::document_id)
        .unwrap_or_else(|| stem.to_string())
}

/// Display title for a document id, from the download manifest.
fn title_for(state: &BatchState, document_id: &str) -> String {
    state
        .documents
        .iter()
        .find(|doc| doc.document_id() == document_id)
        .map(|doc| doc.file_name.clone())
        .unwrap_or_else(|| document_id.to_string())
}

fn content_type_for(file_name: &str) -> Option<String> {
    let extension = Path::new(file_name)
        .extension()
        .and_then(|ext| ext.to_str())?
        .to_lowercase();
    let content_type = match extension.as_str() {
        "htm" | "html" => "text/html",
        "txt" => "text/plain",
        "pdf" => "application/pdf",
        _ => return None,
    };
    Some(content_type.to_string())
}
