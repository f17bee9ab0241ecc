//! PDF extraction, delegated to `pdf-extract`.
//!
//! The library call is CPU-bound and synchronous, so it runs on the blocking
//! pool rather than on a stage entry point.

use std::path::Path;

use tokio::fs;
use tokio::task;

use super::ExtractError;

pub(super) async fn extract(path: &Path) -> Result<String, ExtractError> {
    let bytes = fs::read(path).await.map_err(|source| ExtractError::Io {
        path: path.to_path_buf(),
        source,
    })?;

    let owned = path.to_path_buf();
    task::spawn_blocking(move || {
        pdf_extract::extract_text_from_mem(&bytes).map_err(|err| ExtractError::Pdf {
            path: owned,
            message: err.to_string(),
        })
    })
    .await
    .map_err(|join_err| ExtractError::Pdf {
        path: path.to_path_buf(),
        message: format!("extraction task failed: {join_err}"),
    })?
}
