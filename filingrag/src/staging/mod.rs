//! Conversation-scoped staging area for pipeline artifacts.
//!
//! Layout under the configured base directory:
//!
//! ```text
//! {base}/{conversation_id}/
//!   raw/          downloaded filings, as fetched
//!   extracted/    one .txt per raw file
//!   chunks/       chunks.json
//!   embeddings/   embeddings.json
//!   status.json   durable batch state
//! ```
//!
//! Every write goes through tmp-then-rename so readers never observe a
//! partially written artifact, and raw persistence skips files that already
//! exist — together these carry the pipeline's resume guarantees.

pub mod state;

pub use state::{BatchDocument, BatchState};

use std::ffi::OsString;
use std::path::{Path, PathBuf};

use miette::Diagnostic;
use serde::de::DeserializeOwned;
use serde::Serialize;
use thiserror::Error;
use tokio::fs;
use tracing::debug;

use crate::config::StagingSettings;
use crate::providers::FilingDocument;
use crate::types::{CancelToken, Cancelled};

#[derive(Debug, Error, Diagnostic)]
pub enum StagingError {
    #[error("staging I/O failure at {path}: {source}")]
    #[diagnostic(code(filingrag::staging::io))]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to encode {what}: {source}")]
    #[diagnostic(code(filingrag::staging::encode))]
    Encode {
        what: &'static str,
        #[source]
        source: serde_json::Error,
    },

    #[error("failed to decode {path}: {source}")]
    #[diagnostic(
        code(filingrag::staging::decode),
        help("The artifact is corrupt; delete it to let the stage rebuild it.")
    )]
    Decode {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    /// `status.json` absent mid-pipeline. Fatal for every stage except setup.
    #[error("pipeline state missing at {path}")]
    #[diagnostic(
        code(filingrag::staging::state_missing),
        help("Only pipeline setup may run without an existing status.json.")
    )]
    StateMissing { path: PathBuf },

    #[error(transparent)]
    Cancelled(#[from] Cancelled),
}

fn io_err(path: impl Into<PathBuf>) -> impl FnOnce(std::io::Error) -> StagingError {
    let path = path.into();
    move |source| StagingError::Io { path, source }
}

/// Hierarchical, conversation-scoped staging directory.
#[derive(Clone, Debug)]
pub struct StagingArea {
    base: PathBuf,
}

impl StagingArea {
    pub fn new(settings: StagingSettings) -> Self {
        Self {
            base: settings.base_dir,
        }
    }

    pub fn base(&self) -> &Path {
        &self.base
    }

    pub fn conversation_root(&self, conversation_id: &str) -> PathBuf {
        self.base.join(sanitize_component(conversation_id))
    }

    pub fn raw_dir(&self, conversation_id: &str) -> PathBuf {
        self.conversation_root(conversation_id).join("raw")
    }

    pub fn extracted_dir(&self, conversation_id: &str) -> PathBuf {
        self.conversation_root(conversation_id).join("extracted")
    }

    pub fn chunks_path(&self, conversation_id: &str) -> PathBuf {
        self.conversation_root(conversation_id)
            .join("chunks")
            .join("chunks.json")
    }

    pub fn embeddings_path(&self, conversation_id: &str) -> PathBuf {
        self.conversation_root(conversation_id)
            .join("embeddings")
            .join("embeddings.json")
    }

    pub fn status_path(&self, conversation_id: &str) -> PathBuf {
        self.conversation_root(conversation_id).join("status.json")
    }

    /// Create the directory skeleton for a conversation. Idempotent.
    pub async fn ensure_layout(&self, conversation_id: &str) -> Result<(), StagingError> {
        for dir in [
            self.raw_dir(conversation_id),
            self.extracted_dir(conversation_id),
            self.conversation_root(conversation_id).join("chunks"),
            self.conversation_root(conversation_id).join("embeddings"),
        ] {
            fs::create_dir_all(&dir).await.map_err(io_err(&dir))?;
        }
        Ok(())
    }

    /// Write downloaded filings to `raw/`, skipping any that already exist.
    ///
    /// Returns the paths of all raw files for the given documents, whether
    /// freshly written or reused.
    pub async fn persist_raw(
        &self,
        conversation_id: &str,
        documents: &[FilingDocument],
        ct: &CancelToken,
    ) -> Result<Vec<PathBuf>, StagingError> {
        let raw = self.raw_dir(conversation_id);
        fs::create_dir_all(&raw).await.map_err(io_err(&raw))?;

        let mut paths = Vec::with_capacity(documents.len());
        for document in documents {
            ct.check()?;
            let path = raw.join(sanitize_component(&document.file_name));
            if fs::try_exists(&path).await.map_err(io_err(&path))? {
                debug!(target: "filingrag::staging", path = %path.display(), "raw file present, skipping");
            } else {
                write_atomic(&path, &document.content).await?;
            }
            paths.push(path);
        }
        Ok(paths)
    }

    pub async fn write_json<T: Serialize>(
        &self,
        path: &Path,
        what: &'static str,
        value: &T,
    ) -> Result<(), StagingError> {
        let bytes = serde_json::to_vec_pretty(value)
            .map_err(|source| StagingError::Encode { what, source })?;
        write_atomic(path, &bytes).await
    }

    pub async fn read_json<T: DeserializeOwned>(&self, path: &Path) -> Result<T, StagingError> {
        let bytes = fs::read(path).await.map_err(io_err(path))?;
        serde_json::from_slice(&bytes).map_err(|source| StagingError::Decode {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Load the durable batch state; missing file is [`StagingError::StateMissing`].
    pub async fn load_state(&self, conversation_id: &str) -> Result<BatchState, StagingError> {
        let path = self.status_path(conversation_id);
        if !fs::try_exists(&path).await.map_err(io_err(&path))? {
            return Err(StagingError::StateMissing { path });
        }
        self.read_json(&path).await
    }

    /// Atomically rewrite the durable batch state.
    pub async fn save_state(&self, state: &BatchState) -> Result<(), StagingError> {
        let path = self.status_path(&state.conversation_id);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await.map_err(io_err(parent))?;
        }
        self.write_json(&path, "batch state", state).await
    }
}

/// Write `{path}.tmp`, then rename into place. The temp file is removed
/// best-effort if either step fails.
pub async fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), StagingError> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent).await.map_err(io_err(parent))?;
        }
    }
    let mut tmp_name: OsString = path.as_os_str().to_owned();
    tmp_name.push(".tmp");
    let tmp = PathBuf::from(tmp_name);

    if let Err(source) = fs::write(&tmp, bytes).await {
        let _ = fs::remove_file(&tmp).await;
        return Err(StagingError::Io { path: tmp, source });
    }
    if let Err(source) = fs::rename(&tmp, path).await {
        let _ = fs::remove_file(&tmp).await;
        return Err(StagingError::Io {
            path: path.to_path_buf(),
            source,
        });
    }
    Ok(())
}

/// Normalize a file-name-ish component into something safe to join onto the
/// staging root.
pub(crate) fn sanitize_component(input: &str) -> String {
    let sanitized: String = input
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.') {
                c
            } else {
                '_'
            }
        })
        .collect();
    if sanitized.trim_matches(['.', '_']).is_empty() {
        "unnamed".to_string()
    } else {
        sanitized
    }
}
