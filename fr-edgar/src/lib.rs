//! Rate-limited SEC EDGAR archive fetcher.
//!
//! Resolves a company identifier (raw CIK or ticker) to a zero-padded
//! archive key, lists matching filings from the submissions index, and
//! downloads primary documents while honoring EDGAR's fair-access rules:
//! every request carries a contact-bearing `User-Agent` and outbound
//! requests are serialized with a 100 ms floor between them.
//!
//! [`EdgarClient`] implements [`filingrag::providers::ArchiveFetcher`], so it
//! plugs straight into the ingestion pipeline.

mod client;
mod rate_limit;
mod types;

pub use client::{EdgarClient, EdgarConfig, EdgarError};
pub use rate_limit::RequestGate;
pub use types::{FilingEntry, RecentFilings, SubmissionsIndex, TickerEntry};
