//! The EDGAR HTTP client.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use miette::Diagnostic;
use serde::de::DeserializeOwned;
use thiserror::Error;
use tracing::{debug, warn};

use filingrag::providers::{ArchiveFetcher, FilingDocument, ProviderError};
use filingrag::types::{CancelToken, Cancelled};

use crate::rate_limit::RequestGate;
use crate::types::{archive_url, pad_key, resolve_identifier, select_filings, FilingEntry, SubmissionsIndex, TickerEntry};

#[derive(Debug, Error, Diagnostic)]
pub enum EdgarError {
    #[error("archive request failed: {0}")]
    #[diagnostic(code(fr_edgar::http))]
    Http(#[from] reqwest::Error),

    #[error("unexpected archive payload: {0}")]
    #[diagnostic(code(fr_edgar::payload))]
    UnexpectedPayload(String),

    #[error("invalid client configuration: {0}")]
    #[diagnostic(
        code(fr_edgar::config),
        help("EDGAR requires a contact-bearing User-Agent, e.g. \"product/1.0 (ops@example.com)\".")
    )]
    Config(String),

    #[error(transparent)]
    Cancelled(#[from] Cancelled),
}

/// Endpoints, etiquette, and limits for one EDGAR client.
#[derive(Clone, Debug)]
pub struct EdgarConfig {
    /// Root for the ticker index and the filings archive.
    pub base_url: String,
    /// Root for the submissions API.
    pub data_base_url: String,
    /// Contact-bearing identification, required by EDGAR policy.
    pub user_agent: String,
    /// Floor between consecutive outbound requests.
    pub min_request_interval: Duration,
    /// Cap on filings downloaded per request; `None` means no cap.
    pub max_filings: Option<usize>,
}

impl Default for EdgarConfig {
    fn default() -> Self {
        Self {
            base_url: "https://www.sec.gov".to_string(),
            data_base_url: "https://data.sec.gov".to_string(),
            user_agent: "filingrag/0.1 (contact@example.com)".to_string(),
            min_request_interval: Duration::from_millis(100),
            max_filings: None,
        }
    }
}

impl EdgarConfig {
    /// Interpret a raw configuration value: zero or negative means no cap.
    #[must_use]
    pub fn with_max_filings(mut self, limit: i64) -> Self {
        self.max_filings = if limit <= 0 { None } else { Some(limit as usize) };
        self
    }
}

/// Rate-limited EDGAR fetcher. One instance per process — the request gate
/// is what keeps the archive seeing ≤ 10 requests per second.
pub struct EdgarClient {
    http: reqwest::Client,
    config: EdgarConfig,
    gate: RequestGate,
}

impl EdgarClient {
    pub fn new(config: EdgarConfig) -> Result<Self, EdgarError> {
        if !config.user_agent.contains('@') {
            return Err(EdgarError::Config(
                "user agent must include a contact address".into(),
            ));
        }
        let http = reqwest::Client::builder()
            .user_agent(config.user_agent.clone())
            .use_rustls_tls()
            .timeout(Duration::from_secs(60))
            .build()?;
        let gate = RequestGate::new(config.min_request_interval);
        Ok(Self { http, config, gate })
    }

    fn ticker_index_url(&self) -> String {
        format!(
            "{}/files/company_tickers.json",
            self.config.base_url.trim_end_matches('/')
        )
    }

    fn submissions_url(&self, key10: &str) -> String {
        format!(
            "{}/submissions/CIK{key10}.json",
            self.config.data_base_url.trim_end_matches('/')
        )
    }

    fn archives_base(&self) -> String {
        format!(
            "{}/Archives/edgar/data",
            self.config.base_url.trim_end_matches('/')
        )
    }

    async fn get_json<T: DeserializeOwned>(&self, url: &str) -> Result<T, EdgarError> {
        self.gate.wait().await;
        let response = self.http.get(url).send().await?.error_for_status()?;
        response
            .json::<T>()
            .await
            .map_err(|err| EdgarError::UnexpectedPayload(format!("{url}: {err}")))
    }

    /// Resolve a company identifier to the 10-digit archive key. Numeric
    /// identifiers skip the index fetch entirely; unknown tickers yield
    /// `None`.
    pub async fn resolve_company_key(
        &self,
        identifier: &str,
        ct: &CancelToken,
    ) -> Result<Option<String>, EdgarError> {
        let trimmed = identifier.trim();
        if !trimmed.is_empty() && trimmed.chars().all(|c| c.is_ascii_digit()) {
            return Ok(Some(pad_key(trimmed)));
        }
        ct.check()?;
        let index: HashMap<String, TickerEntry> = self.get_json(&self.ticker_index_url()).await?;
        Ok(resolve_identifier(index.values(), trimmed))
    }

    /// List filings of the requested types for an archive key, newest first
    /// as EDGAR orders them, capped by the configured limit.
    pub async fn list_filings(
        &self,
        key10: &str,
        filing_types: &[String],
        ct: &CancelToken,
    ) -> Result<Vec<FilingEntry>, EdgarError> {
        ct.check()?;
        let submissions: SubmissionsIndex = self.get_json(&self.submissions_url(key10)).await?;
        Ok(select_filings(
            &submissions.filings.recent,
            filing_types,
            self.config.max_filings,
        ))
    }

    /// Download one filing's primary document. Non-success statuses return
    /// `Ok(None)` so the caller can skip and continue.
    pub async fn download_filing(
        &self,
        key10: &str,
        entry: &FilingEntry,
        company_identifier: &str,
    ) -> Result<Option<FilingDocument>, EdgarError> {
        let url = archive_url(
            &self.archives_base(),
            key10,
            &entry.accession_number,
            &entry.primary_document,
        );
        self.gate.wait().await;
        let response = self.http.get(&url).send().await?;
        if !response.status().is_success() {
            warn!(
                target: "fr_edgar",
                status = %response.status(),
                url,
                "filing download returned non-success; skipping"
            );
            return Ok(None);
        }
        let content = response.bytes().await?.to_vec();
        debug!(target: "fr_edgar", url, bytes = content.len(), "downloaded filing");
        Ok(Some(FilingDocument {
            content,
            file_name: entry.primary_document.clone(),
            filing_type: entry.form.clone(),
            accession_number: entry.accession_number.clone(),
            filing_date: entry.filing_date,
            company_identifier: company_identifier.to_string(),
        }))
    }

    /// Full fetch: resolve, list, download each filing with skip-and-continue
    /// failure handling. An unresolved identifier returns an empty list.
    pub async fn download_filings(
        &self,
        company_identifier: &str,
        filing_types: &[String],
        ct: &CancelToken,
    ) -> Result<Vec<FilingDocument>, EdgarError> {
        let Some(key10) = self.resolve_company_key(company_identifier, ct).await? else {
            warn!(
                target: "fr_edgar",
                company_identifier,
                "company identifier did not resolve to an archive key"
            );
            return Ok(Vec::new());
        };

        let entries = self.list_filings(&key10, filing_types, ct).await?;
        let mut documents = Vec::with_capacity(entries.len());
        for entry in &entries {
            ct.check()?;
            match self.download_filing(&key10, entry, company_identifier).await {
                Ok(Some(document)) => documents.push(document),
                Ok(None) => continue,
                Err(EdgarError::Cancelled(cancelled)) => return Err(cancelled.into()),
                Err(err) => {
                    warn!(
                        target: "fr_edgar",
                        accession = %entry.accession_number,
                        error = %err,
                        "filing download failed; skipping"
                    );
                    continue;
                }
            }
        }
        Ok(documents)
    }
}

#[async_trait]
impl ArchiveFetcher for EdgarClient {
    async fn download_filings(
        &self,
        company_identifier: &str,
        filing_types: &[String],
        ct: &CancelToken,
    ) -> Result<Vec<FilingDocument>, ProviderError> {
        EdgarClient::download_filings(self, company_identifier, filing_types, ct)
            .await
            .map_err(|err| match err {
                EdgarError::Cancelled(cancelled) => ProviderError::Cancelled(cancelled),
                other => ProviderError::failed("edgar", other.to_string()),
            })
    }
}
