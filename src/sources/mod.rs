//! Source adapters: provider clients that emit provider-shaped JSON.
//!
//! The clients are process-scoped resources constructed once and passed
//! explicitly into the pipeline, so tests can substitute fakes through
//! the traits below.

use anyhow::Result as AnyResult;
use async_trait::async_trait;
use serde_json::Value;
use std::fmt;

use crate::error::Result;

pub mod extraction;
pub mod market_data;

pub use extraction::ExtractionClient;
pub use market_data::MarketDataClient;

/// Which kind of source a provider-shaped record came from. The
/// normalizer uses this tag for diagnostics and field-alias selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderKind {
    /// Structured time-series API.
    MarketData,
    /// Model-extracted JSON from a PDF filing.
    Extraction,
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProviderKind::MarketData => write!(f, "market-data"),
            ProviderKind::Extraction => write!(f, "extraction"),
        }
    }
}

/// Market-data provider queried by ticker. Best-effort: may return
/// partial or no data.
#[async_trait]
pub trait MarketDataProvider: Send + Sync {
    /// Company metadata (name, sector, market cap, ...).
    async fn company_overview(&self, ticker: &str) -> Result<Value>;

    /// All quarterly statements the provider has for a ticker,
    /// provider-shaped, newest or oldest first -- order is not relied on.
    async fn quarterly_statements(&self, ticker: &str) -> Result<Vec<Value>>;
}

/// Document-extraction service: given a document reference and a strict
/// instruction, returns one JSON object matching the target schema.
#[async_trait]
pub trait DocumentExtractor: Send + Sync {
    async fn extract_quarter(
        &self,
        ticker: &str,
        document_ref: &str,
        quarter: &str,
    ) -> Result<Value>;
}

/// Build a reqwest client the way every provider client does.
pub(crate) fn http_client() -> AnyResult<reqwest::Client> {
    Ok(reqwest::Client::builder()
        .timeout(std::time::Duration::from_secs(30))
        .user_agent("fintail/0.1")
        .build()?)
}
