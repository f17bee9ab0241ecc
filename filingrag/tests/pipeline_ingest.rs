//! End-to-end pipeline tests: fresh ingestion, idempotent reruns, retry
//! recovery, artifact reuse, and failure bookkeeping.

mod common;

use std::sync::Arc;

use common::{filing, request, sample_html_body, FlakyEmbedder, Harness, ScriptedFetcher};
use filingrag::chunking::{ChunkEmbedding, DocumentChunk};
use filingrag::pipeline::{IngestionStatus, PipelineError};
use filingrag::progress::ProcessingEvent;
use filingrag::providers::MockEmbeddingProvider;
use filingrag::types::{CancelSource, CancelToken};
use tokio::fs;

const ACCESSION: &str = "0000320193-24-000123";
const DOC_ID: &str = "10-K-0000320193-24-000123";

async fn conversation_id(harness: &Harness) -> String {
    harness
        .repo
        .create_conversation("user-1", "Apple filings", vec!["Apple Inc.".into()])
        .await
        .unwrap()
        .id
}

#[tokio::test]
async fn fresh_ingestion_walks_every_stage() {
    let harness = Harness::new().await;
    let cid = conversation_id(&harness).await;
    let fetcher = Arc::new(ScriptedFetcher::new(vec![filing(
        "aapl-20240928.htm",
        "10-K",
        ACCESSION,
        &sample_html_body(),
    )]));
    let pipeline = harness.pipeline(
        fetcher.clone(),
        Arc::new(MockEmbeddingProvider::new(common::EMBED_DIMS)),
    );

    let mut events = harness.bus.subscribe(&cid);
    pipeline
        .run(&request(&cid), &CancelToken::never())
        .await
        .unwrap();

    // Durable state reached the terminal success.
    let state = harness.staging.load_state(&cid).await.unwrap();
    assert_eq!(state.status, IngestionStatus::Completed);
    assert!(state.completed_at.is_some());
    assert_eq!(state.documents.len(), 1);
    assert_eq!(state.documents[0].accession_number, ACCESSION);

    // Artifacts for every stage.
    let raw = harness.staging.raw_dir(&cid).join("aapl-20240928.htm");
    let extracted = harness.staging.extracted_dir(&cid).join("aapl-20240928.txt");
    assert!(raw.exists());
    assert!(extracted.exists());

    let chunks: Vec<DocumentChunk> = serde_json::from_slice(
        &fs::read(harness.staging.chunks_path(&cid)).await.unwrap(),
    )
    .unwrap();
    assert!(!chunks.is_empty());
    assert!(chunks.iter().all(|c| c.source_document == DOC_ID));

    let embedded: Vec<ChunkEmbedding> = serde_json::from_slice(
        &fs::read(harness.staging.embeddings_path(&cid)).await.unwrap(),
    )
    .unwrap();
    assert_eq!(embedded.len(), chunks.len());

    // Vector rows match the chunk count.
    assert_eq!(harness.store.count().await.unwrap(), chunks.len());

    // Conversation mirror and document registration.
    let conversation = harness.repo.get_conversation(&cid, "user-1").await.unwrap();
    assert_eq!(conversation.ingestion_status, Some(IngestionStatus::Completed));
    let document = harness.repo.get_document(DOC_ID).await.unwrap().unwrap();
    assert_eq!(document.title, "aapl-20240928.htm");

    // Progress events arrive in stage order and end with completion.
    let events = events.drain();
    let stages: Vec<_> = events.iter().filter_map(|e| e.stage()).collect();
    let expected_order = [
        IngestionStatus::Downloading,
        IngestionStatus::Extracting,
        IngestionStatus::Chunking,
        IngestionStatus::GeneratingEmbeddings,
        IngestionStatus::PersistingEmbeddings,
    ];
    let mut cursor = 0;
    for stage in &stages {
        while cursor < expected_order.len() && expected_order[cursor] != *stage {
            cursor += 1;
        }
        assert!(
            cursor < expected_order.len(),
            "stage {stage} out of order in {stages:?}"
        );
    }
    assert!(matches!(events.last(), Some(ProcessingEvent::Completed(_))));
    assert_eq!(fetcher.calls(), 1);
}

#[tokio::test]
async fn rerunning_a_completed_batch_writes_nothing() {
    let harness = Harness::new().await;
    let cid = conversation_id(&harness).await;
    let fetcher = Arc::new(ScriptedFetcher::new(vec![filing(
        "aapl-20240928.htm",
        "10-K",
        ACCESSION,
        &sample_html_body(),
    )]));
    let pipeline = harness.pipeline(
        fetcher,
        Arc::new(MockEmbeddingProvider::new(common::EMBED_DIMS)),
    );

    pipeline
        .run(&request(&cid), &CancelToken::never())
        .await
        .unwrap();
    let first_rows = harness.store.chunk_revisions(DOC_ID).await.unwrap();
    let first_count = harness.store.count().await.unwrap();
    assert!(!first_rows.is_empty());

    pipeline
        .run(&request(&cid), &CancelToken::never())
        .await
        .unwrap();
    let second_rows = harness.store.chunk_revisions(DOC_ID).await.unwrap();

    // Same rows, same hashes, untouched updated_at stamps.
    assert_eq!(first_rows, second_rows);
    assert_eq!(harness.store.count().await.unwrap(), first_count);
}

#[tokio::test]
async fn embed_stage_retries_through_provider_failure() {
    let harness = Harness::new().await;
    let cid = conversation_id(&harness).await;
    let fetcher = Arc::new(ScriptedFetcher::new(vec![filing(
        "aapl-20240928.htm",
        "10-K",
        ACCESSION,
        &sample_html_body(),
    )]));
    let embedder = Arc::new(FlakyEmbedder::failing_first(1));
    let pipeline = harness.pipeline(fetcher, embedder.clone());

    pipeline
        .run(&request(&cid), &CancelToken::never())
        .await
        .unwrap();

    // First attempt failed, second succeeded; the stage writes only the
    // final artifact.
    assert_eq!(embedder.batch_calls(), 2);
    let state = harness.staging.load_state(&cid).await.unwrap();
    assert_eq!(state.status, IngestionStatus::Completed);
    assert!(harness.staging.embeddings_path(&cid).exists());
}

#[tokio::test]
async fn resume_reuses_existing_artifacts() {
    let harness = Harness::new().await;
    let cid = conversation_id(&harness).await;
    let fetcher = Arc::new(ScriptedFetcher::new(vec![filing(
        "aapl-20240928.htm",
        "10-K",
        ACCESSION,
        &sample_html_body(),
    )]));
    let pipeline = harness.pipeline(
        fetcher.clone(),
        Arc::new(MockEmbeddingProvider::new(common::EMBED_DIMS)),
    );

    pipeline
        .run(&request(&cid), &CancelToken::never())
        .await
        .unwrap();

    // Simulate a crash after chunking: downstream artifacts are gone, the
    // extracted text survives with recognizable content.
    let extracted = harness.staging.extracted_dir(&cid).join("aapl-20240928.txt");
    fs::write(&extracted, "replacement extracted text for resume")
        .await
        .unwrap();
    fs::remove_file(harness.staging.chunks_path(&cid)).await.unwrap();
    fs::remove_file(harness.staging.embeddings_path(&cid))
        .await
        .unwrap();

    pipeline
        .run(&request(&cid), &CancelToken::never())
        .await
        .unwrap();

    // The raw file was not re-downloaded over, and extraction skipped the
    // existing .txt, so the rebuilt chunks come from the surviving artifact.
    let chunks: Vec<DocumentChunk> = serde_json::from_slice(
        &fs::read(harness.staging.chunks_path(&cid)).await.unwrap(),
    )
    .unwrap();
    assert_eq!(chunks.len(), 1);
    assert_eq!(chunks[0].text, "replacement extracted text for resume");
    assert_eq!(fetcher.calls(), 2, "stage 0 runs again but skips raw rewrite");
}

#[tokio::test]
async fn empty_listing_fails_with_no_filings_found() {
    let harness = Harness::new().await;
    let cid = conversation_id(&harness).await;
    let pipeline = harness.pipeline(
        Arc::new(ScriptedFetcher::empty()),
        Arc::new(MockEmbeddingProvider::new(common::EMBED_DIMS)),
    );

    let mut events = harness.bus.subscribe(&cid);
    let err = pipeline
        .run(&request(&cid), &CancelToken::never())
        .await
        .unwrap_err();
    assert!(matches!(err, PipelineError::NoFilingsFound { .. }));

    let state = harness.staging.load_state(&cid).await.unwrap();
    assert_eq!(state.status, IngestionStatus::Failed);
    assert!(state
        .error_message
        .as_deref()
        .unwrap()
        .contains("no filings found"));

    let conversation = harness.repo.get_conversation(&cid, "user-1").await.unwrap();
    assert_eq!(conversation.ingestion_status, Some(IngestionStatus::Failed));

    let events = events.drain();
    let error_event = events
        .iter()
        .find(|e| matches!(e, ProcessingEvent::Error(_)))
        .expect("error event published");
    assert_eq!(error_event.stage(), Some(IngestionStatus::Downloading));
}

#[tokio::test]
async fn validation_rejects_blank_company() {
    let harness = Harness::new().await;
    let cid = conversation_id(&harness).await;
    let pipeline = harness.pipeline(
        Arc::new(ScriptedFetcher::empty()),
        Arc::new(MockEmbeddingProvider::new(common::EMBED_DIMS)),
    );
    let mut bad = request(&cid);
    bad.company_identifier = "   ".into();
    let err = pipeline.run(&bad, &CancelToken::never()).await.unwrap_err();
    assert!(matches!(err, PipelineError::Validation(_)));
}

#[tokio::test]
async fn cancellation_leaves_state_clean_for_resume() {
    let harness = Harness::new().await;
    let cid = conversation_id(&harness).await;
    let pipeline = harness.pipeline(
        Arc::new(ScriptedFetcher::new(vec![filing(
            "aapl-20240928.htm",
            "10-K",
            ACCESSION,
            &sample_html_body(),
        )])),
        Arc::new(MockEmbeddingProvider::new(common::EMBED_DIMS)),
    );

    let source = CancelSource::new();
    source.cancel();
    let err = pipeline
        .run(&request(&cid), &source.token())
        .await
        .unwrap_err();
    assert!(err.is_cancelled());

    // Cancellation is not a failure: no Failed state, no error message.
    let state = harness.staging.load_state(&cid).await.unwrap();
    assert_eq!(state.status, IngestionStatus::Pending);
    assert!(state.error_message.is_none());
}
