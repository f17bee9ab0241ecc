//! Format-dispatched text extraction.
//!
//! Dispatch is by lowercased file extension: `.pdf`, `.txt`, `.html`/`.htm`.
//! Extractors read only the indicated file and reject paths that do not
//! exist; anything else is `UnsupportedFormat`.

mod html;
mod pdf;

pub use html::extract_html;

use std::path::{Path, PathBuf};

use miette::Diagnostic;
use thiserror::Error;
use tokio::fs;

#[derive(Debug, Error, Diagnostic)]
pub enum ExtractError {
    #[error("file does not exist: {0}")]
    #[diagnostic(code(filingrag::extract::missing))]
    Missing(PathBuf),

    #[error("unsupported document format: {extension:?} ({path})")]
    #[diagnostic(
        code(filingrag::extract::unsupported),
        help("Supported extensions are .pdf, .txt, .html and .htm.")
    )]
    UnsupportedFormat {
        path: PathBuf,
        extension: Option<String>,
    },

    #[error("failed to read {path}: {source}")]
    #[diagnostic(code(filingrag::extract::io))]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("PDF extraction failed for {path}: {message}")]
    #[diagnostic(code(filingrag::extract::pdf))]
    Pdf { path: PathBuf, message: String },
}

/// Extract normalized text from the file at `path`.
pub async fn extract_text(path: &Path) -> Result<String, ExtractError> {
    if !fs::try_exists(path).await.unwrap_or(false) {
        return Err(ExtractError::Missing(path.to_path_buf()));
    }

    let extension = path
        .extension()
        .and_then(|ext| ext.to_str())
        .map(str::to_lowercase);

    match extension.as_deref() {
        Some("pdf") => pdf::extract(path).await,
        Some("txt") => fs::read_to_string(path)
            .await
            .map_err(|source| ExtractError::Io {
                path: path.to_path_buf(),
                source,
            }),
        Some("html") | Some("htm") => {
            let raw = fs::read_to_string(path)
                .await
                .map_err(|source| ExtractError::Io {
                    path: path.to_path_buf(),
                    source,
                })?;
            Ok(extract_html(&raw))
        }
        _ => Err(ExtractError::UnsupportedFormat {
            path: path.to_path_buf(),
            extension,
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn missing_path_is_rejected() {
        let err = extract_text(Path::new("/definitely/not/here.txt"))
            .await
            .unwrap_err();
        assert!(matches!(err, ExtractError::Missing(_)));
    }

    #[tokio::test]
    async fn unknown_extension_is_unsupported() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("filing.docx");
        fs::write(&path, b"not supported").await.unwrap();
        let err = extract_text(&path).await.unwrap_err();
        assert!(matches!(
            err,
            ExtractError::UnsupportedFormat {
                extension: Some(ref ext),
                ..
            } if ext == "docx"
        ));
    }

    #[tokio::test]
    async fn plain_text_passes_through_verbatim() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("filing.txt");
        fs::write(&path, "line one\nline two\n").await.unwrap();
        let text = extract_text(&path).await.unwrap();
        assert_eq!(text, "line one\nline two\n");
    }

    #[tokio::test]
    async fn html_extension_dispatches_case_insensitively() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("filing.HTM");
        fs::write(&path, "<p>Annual &amp; quarterly report</p>")
            .await
            .unwrap();
        let text = extract_text(&path).await.unwrap();
        assert_eq!(text, "Annual & quarterly report");
    }
}
