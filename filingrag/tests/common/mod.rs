//! Shared fixtures: scripted archive fetcher, failure-injecting embedder,
//! and a wired-up pipeline harness over temp dirs and an in-memory database.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::NaiveDate;
use tempfile::TempDir;

use filingrag::config::{ChunkerSettings, PipelineSettings, StagingSettings};
use filingrag::db::Database;
use filingrag::pipeline::{IngestionPipeline, IngestionRequest};
use filingrag::progress::ProgressBus;
use filingrag::providers::{
    ArchiveFetcher, EmbeddingProvider, FilingDocument, MockEmbeddingProvider, ProviderError,
    StaticIdentity,
};
use filingrag::repository::SqliteRepository;
use filingrag::staging::StagingArea;
use filingrag::store::SqliteVectorStore;
use filingrag::types::CancelToken;

pub const EMBED_DIMS: usize = 16;

/// Install a test-writer subscriber once per test binary so `RUST_LOG`
/// surfaces pipeline diagnostics during failing runs.
fn init_tracing() {
    static INIT: std::sync::Once = std::sync::Once::new();
    INIT.call_once(|| {
        let subscriber = tracing_subscriber::fmt()
            .with_env_filter(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
            )
            .with_test_writer()
            .finish();
        let _ = tracing::subscriber::set_global_default(subscriber);
    });
}

pub fn filing(file_name: &str, filing_type: &str, accession: &str, body: &str) -> FilingDocument {
    FilingDocument {
        content: body.as_bytes().to_vec(),
        file_name: file_name.to_string(),
        filing_type: filing_type.to_string(),
        accession_number: accession.to_string(),
        filing_date: NaiveDate::from_ymd_opt(2024, 11, 1).unwrap(),
        company_identifier: "AAPL".to_string(),
    }
}

/// Returns the same canned filings on every call and counts the calls.
pub struct ScriptedFetcher {
    documents: Vec<FilingDocument>,
    calls: AtomicUsize,
}

impl ScriptedFetcher {
    pub fn new(documents: Vec<FilingDocument>) -> Self {
        Self {
            documents,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn empty() -> Self {
        Self::new(Vec::new())
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ArchiveFetcher for ScriptedFetcher {
    async fn download_filings(
        &self,
        _company_identifier: &str,
        _filing_types: &[String],
        ct: &CancelToken,
    ) -> Result<Vec<FilingDocument>, ProviderError> {
        ct.check()?;
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.documents.clone())
    }
}

/// Deterministic embedder whose first `failures` batch calls fail.
pub struct FlakyEmbedder {
    inner: MockEmbeddingProvider,
    failures_remaining: AtomicU32,
    batch_calls: AtomicU32,
}

impl FlakyEmbedder {
    pub fn failing_first(failures: u32) -> Self {
        Self {
            inner: MockEmbeddingProvider::new(EMBED_DIMS),
            failures_remaining: AtomicU32::new(failures),
            batch_calls: AtomicU32::new(0),
        }
    }

    pub fn batch_calls(&self) -> u32 {
        self.batch_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl EmbeddingProvider for FlakyEmbedder {
    fn dimensions(&self) -> usize {
        self.inner.dimensions()
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>, ProviderError> {
        self.inner.embed(text).await
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, ProviderError> {
        self.batch_calls.fetch_add(1, Ordering::SeqCst);
        let remaining = self.failures_remaining.load(Ordering::SeqCst);
        if remaining > 0 {
            self.failures_remaining.store(remaining - 1, Ordering::SeqCst);
            return Err(ProviderError::failed("flaky-embedder", "injected failure"));
        }
        self.inner.embed_batch(texts).await
    }
}

/// Embedder that returns pinned vectors for known texts and deterministic
/// hash vectors otherwise, so retrieval tests can stage exact similarities.
pub struct KeyedEmbedder {
    pinned: HashMap<String, Vec<f32>>,
    fallback: MockEmbeddingProvider,
}

impl KeyedEmbedder {
    pub fn new() -> Self {
        Self {
            pinned: HashMap::new(),
            fallback: MockEmbeddingProvider::new(EMBED_DIMS),
        }
    }

    pub fn pin(mut self, text: &str, vector: Vec<f32>) -> Self {
        assert_eq!(vector.len(), EMBED_DIMS);
        self.pinned.insert(text.to_string(), vector);
        self
    }
}

#[async_trait]
impl EmbeddingProvider for KeyedEmbedder {
    fn dimensions(&self) -> usize {
        EMBED_DIMS
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>, ProviderError> {
        match self.pinned.get(text) {
            Some(vector) => Ok(vector.clone()),
            None => self.fallback.embed(text).await,
        }
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, ProviderError> {
        let mut out = Vec::with_capacity(texts.len());
        for text in texts {
            out.push(self.embed(text).await?);
        }
        Ok(out)
    }
}

/// A unit vector along the given axis.
pub fn axis(index: usize) -> Vec<f32> {
    let mut v = vec![0.0; EMBED_DIMS];
    v[index] = 1.0;
    v
}

/// A normalized blend of two axes, giving a known cosine against each.
pub fn blend(a: usize, b: usize, weight_a: f32) -> Vec<f32> {
    let weight_b = (1.0 - weight_a * weight_a).sqrt();
    let mut v = vec![0.0; EMBED_DIMS];
    v[a] = weight_a;
    v[b] = weight_b;
    v
}

pub struct Harness {
    pub _staging_dir: TempDir,
    pub staging: StagingArea,
    pub db: Database,
    pub repo: SqliteRepository,
    pub store: Arc<SqliteVectorStore>,
    pub bus: Arc<ProgressBus>,
}

impl Harness {
    pub async fn new() -> Self {
        init_tracing();
        let staging_dir = tempfile::tempdir().expect("tempdir");
        let staging = StagingArea::new(StagingSettings::new(staging_dir.path()));
        let db = Database::open_in_memory().await.expect("database");
        let repo = SqliteRepository::new(&db);
        let store = Arc::new(SqliteVectorStore::new(&db));
        let bus = ProgressBus::new();
        Self {
            _staging_dir: staging_dir,
            staging,
            db,
            repo,
            store,
            bus,
        }
    }

    pub fn pipeline(
        &self,
        fetcher: Arc<dyn ArchiveFetcher>,
        embedder: Arc<dyn EmbeddingProvider>,
    ) -> IngestionPipeline {
        IngestionPipeline::new(
            self.staging.clone(),
            fetcher,
            embedder,
            self.store.clone(),
            self.repo.clone(),
            self.bus.clone(),
            PipelineSettings::without_backoff(),
            ChunkerSettings {
                max_chars: 200,
                overlap_chars: 40,
            },
        )
    }
}

pub fn request(conversation_id: &str) -> IngestionRequest {
    let identity = StaticIdentity::new("user-1");
    let mut request = IngestionRequest::for_current_user(
        &identity,
        conversation_id,
        "AAPL",
        vec!["10-K".to_string()],
    );
    request.job_id = Some("job-1".to_string());
    request
}

/// A paragraph-y HTML body long enough to produce several chunks at the test
/// chunker size.
pub fn sample_html_body() -> String {
    let mut paragraphs = Vec::new();
    for i in 0..6 {
        paragraphs.push(format!(
            "<p>Section {i}: management discussed supply chain constraints, \
             component pricing, and logistics capacity during fiscal {year}. \
             The company expects continued variability in freight costs.</p>",
            year = 2020 + i
        ));
    }
    format!(
        "<html><head><title>10-K</title><style>p {{ margin: 0 }}</style></head>\
         <body><h1>Annual Report</h1>{}</body></html>",
        paragraphs.join("\n")
    )
}
