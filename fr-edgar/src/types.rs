//! Raw EDGAR payload shapes and the pure selection logic over them.

use chrono::NaiveDate;
use serde::Deserialize;

/// One entry of `company_tickers.json` (keyed by array index in the raw
/// payload).
#[derive(Clone, Debug, Deserialize)]
pub struct TickerEntry {
    pub cik_str: u64,
    pub ticker: String,
    pub title: String,
}

/// `CIK{key10}.json`, reduced to the parts the fetcher walks.
#[derive(Clone, Debug, Default, Deserialize)]
pub struct SubmissionsIndex {
    #[serde(default)]
    pub filings: FilingsSection,
}

#[derive(Clone, Debug, Default, Deserialize)]
pub struct FilingsSection {
    #[serde(default)]
    pub recent: RecentFilings,
}

/// The parallel arrays of the submissions index. Positions line up across
/// all four vectors.
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RecentFilings {
    pub form: Vec<String>,
    pub accession_number: Vec<String>,
    pub filing_date: Vec<String>,
    pub primary_document: Vec<String>,
}

/// One filing selected from the submissions index.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FilingEntry {
    pub form: String,
    pub accession_number: String,
    pub filing_date: NaiveDate,
    pub primary_document: String,
}

/// Zero-pad an archive key to the canonical 10 digits.
#[must_use]
pub fn pad_key(key: &str) -> String {
    format!("{key:0>10}")
}

/// Resolve an identifier against the ticker index: numeric keys pass through
/// verbatim (padded), tickers match case-insensitively. `None` when nothing
/// matches.
pub fn resolve_identifier<'a>(
    entries: impl IntoIterator<Item = &'a TickerEntry>,
    identifier: &str,
) -> Option<String> {
    let identifier = identifier.trim();
    if !identifier.is_empty() && identifier.chars().all(|c| c.is_ascii_digit()) {
        return Some(pad_key(identifier));
    }
    entries
        .into_iter()
        .find(|entry| entry.ticker.eq_ignore_ascii_case(identifier))
        .map(|entry| pad_key(&entry.cik_str.to_string()))
}

/// Walk the parallel arrays in positional lockstep, keeping entries whose
/// form matches one of `filing_types` (case-insensitive) and whose date
/// parses as ISO; unparseable dates are dropped. `max` caps the result
/// (`None` means no cap).
pub fn select_filings(
    recent: &RecentFilings,
    filing_types: &[String],
    max: Option<usize>,
) -> Vec<FilingEntry> {
    let wanted: Vec<String> = filing_types.iter().map(|t| t.to_uppercase()).collect();
    let mut selected = Vec::new();

    for (index, form) in recent.form.iter().enumerate() {
        if let Some(limit) = max {
            if selected.len() >= limit {
                break;
            }
        }
        if !wanted.iter().any(|t| t == &form.to_uppercase()) {
            continue;
        }
        let (Some(accession), Some(date_raw), Some(primary)) = (
            recent.accession_number.get(index),
            recent.filing_date.get(index),
            recent.primary_document.get(index),
        ) else {
            continue;
        };
        let Ok(filing_date) = NaiveDate::parse_from_str(date_raw, "%Y-%m-%d") else {
            continue;
        };
        selected.push(FilingEntry {
            form: form.clone(),
            accession_number: accession.clone(),
            filing_date,
            primary_document: primary.clone(),
        });
    }
    selected
}

/// `{base}/{key-without-leading-zeros}/{accession-no-dashes}/{primary}`
#[must_use]
pub fn archive_url(base: &str, key10: &str, accession: &str, primary_document: &str) -> String {
    let key = key10.trim_start_matches('0');
    let key = if key.is_empty() { "0" } else { key };
    let accession = accession.replace('-', "");
    format!(
        "{}/{key}/{accession}/{primary_document}",
        base.trim_end_matches('/')
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entries() -> Vec<TickerEntry> {
        vec![
            TickerEntry {
                cik_str: 320193,
                ticker: "AAPL".into(),
                title: "Apple Inc.".into(),
            },
            TickerEntry {
                cik_str: 789019,
                ticker: "MSFT".into(),
                title: "Microsoft Corp".into(),
            },
        ]
    }

    #[test]
    fn numeric_identifier_is_padded_verbatim() {
        assert_eq!(
            resolve_identifier(&entries(), "320193").as_deref(),
            Some("0000320193")
        );
    }

    #[test]
    fn ticker_matches_case_insensitively() {
        assert_eq!(
            resolve_identifier(&entries(), "aapl").as_deref(),
            Some("0000320193")
        );
        assert_eq!(
            resolve_identifier(&entries(), "MsFt").as_deref(),
            Some("0000789019")
        );
    }

    #[test]
    fn unknown_ticker_resolves_to_none() {
        assert_eq!(resolve_identifier(&entries(), "ZZZZ"), None);
    }

    fn recent() -> RecentFilings {
        RecentFilings {
            form: vec!["10-K".into(), "8-K".into(), "10-Q".into(), "10-K".into()],
            accession_number: vec![
                "0000320193-24-000123".into(),
                "0000320193-24-000100".into(),
                "0000320193-24-000081".into(),
                "0000320193-23-000106".into(),
            ],
            filing_date: vec![
                "2024-11-01".into(),
                "2024-08-01".into(),
                "not-a-date".into(),
                "2023-11-03".into(),
            ],
            primary_document: vec![
                "aapl-20240928.htm".into(),
                "aapl-8k.htm".into(),
                "aapl-10q.htm".into(),
                "aapl-20230930.htm".into(),
            ],
        }
    }

    #[test]
    fn selection_filters_forms_case_insensitively() {
        let selected = select_filings(&recent(), &["10-k".to_string()], None);
        assert_eq!(selected.len(), 2);
        assert!(selected.iter().all(|f| f.form == "10-K"));
    }

    #[test]
    fn unparseable_dates_are_dropped() {
        let selected = select_filings(&recent(), &["10-Q".to_string()], None);
        assert!(selected.is_empty());
    }

    #[test]
    fn cap_limits_selection() {
        let selected = select_filings(&recent(), &["10-K".to_string()], Some(1));
        assert_eq!(selected.len(), 1);
        assert_eq!(selected[0].accession_number, "0000320193-24-000123");
    }

    #[test]
    fn archive_url_strips_zeros_and_dashes() {
        let url = archive_url(
            "https://www.sec.gov/Archives/edgar/data",
            "0000320193",
            "0000320193-24-000123",
            "aapl-20240928.htm",
        );
        assert_eq!(
            url,
            "https://www.sec.gov/Archives/edgar/data/320193/000032019324000123/aapl-20240928.htm"
        );
    }

    #[test]
    fn all_zero_key_degrades_to_single_zero() {
        let url = archive_url("https://x", "0000000000", "1-2-3", "d.htm");
        assert!(url.contains("/0/123/d.htm"));
    }
}
