use chrono::{DateTime, Utc};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;

/// Identity and static metadata for one ticker. Exactly one per ticker;
/// the ticker never changes after creation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompanyProfile {
    pub ticker: String,
    pub name: String,
    pub sector: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub industry: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub market_cap: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub employees: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub founded: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub headquarters: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub website: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub last_updated: DateTime<Utc>,
}

/// One fiscal quarter's reported figures for one company.
///
/// All monetary fields are raw currency units, never abbreviated.
/// Optional fields are omitted when the source did not report them; a
/// reported 0 stays 0.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuarterlyFinancials {
    pub ticker: String,
    /// Human label, e.g. "Q3 2025".
    pub quarter: String,
    /// Fiscal period end; the natural sort key within a company's series.
    pub report_date: NaiveDate,
    pub total_revenue: f64,
    pub net_income: f64,
    pub eps: f64,
    pub operating_income: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub free_cash_flow: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total_assets: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total_debt: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub shareholder_equity: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub shares_outstanding: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub segments: Option<BTreeMap<String, SegmentFigures>>,
}

/// Figures for one reporting segment within a quarter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SegmentFigures {
    pub revenue: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub operating_income: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub operating_margin: Option<f64>,
}

/// Denormalized projection of one segment for one (ticker, reportDate),
/// stored as its own item so segment-level reads skip the full quarter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SegmentRecord {
    pub ticker: String,
    pub report_date: NaiveDate,
    pub segment: String,
    pub revenue: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub operating_income: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub operating_margin: Option<f64>,
}

/// One search-token entry pointing at a company.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchIndexEntry {
    pub token: String,
    pub company_name: String,
    pub ticker: String,
    /// Ordinal specificity, not a continuous score. Higher is more
    /// specific: exact ticker > exact name > name word.
    pub relevance_score: i64,
}

/// Secondary-index projection for "list companies in sector X".
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SectorIndexEntry {
    pub sector: String,
    pub company_name: String,
    pub ticker: String,
}

/// Configuration for the application.
#[derive(Debug, Clone)]
pub struct Config {
    pub database_path: String,
    pub market_data_base_url: String,
    pub market_data_api_key: Option<String>,
    pub extractor_base_url: String,
    pub extractor_api_key: Option<String>,
    /// Fixed pause between batch work items, to respect upstream rate
    /// limits. A pacing policy, not a correctness requirement.
    pub ingest_delay: Duration,
    /// Attempts for the primary write before the item is reported failed.
    pub write_retry_attempts: u32,
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok(); // Load .env file if it exists

        Ok(Config {
            database_path: std::env::var("DATABASE_PATH")
                .unwrap_or_else(|_| "fintail.db".to_string()),
            market_data_base_url: std::env::var("MARKET_DATA_BASE_URL")
                .unwrap_or_else(|_| "http://localhost:8080".to_string()),
            market_data_api_key: std::env::var("MARKET_DATA_API_KEY").ok(),
            extractor_base_url: std::env::var("EXTRACTOR_BASE_URL")
                .unwrap_or_else(|_| "http://localhost:8081".to_string()),
            extractor_api_key: std::env::var("EXTRACTOR_API_KEY").ok(),
            ingest_delay: Duration::from_millis(
                std::env::var("INGEST_DELAY_MS")
                    .unwrap_or_else(|_| "2000".to_string())
                    .parse()
                    .unwrap_or(2000),
            ),
            write_retry_attempts: std::env::var("WRITE_RETRY_ATTEMPTS")
                .unwrap_or_else(|_| "3".to_string())
                .parse()
                .unwrap_or(3),
        })
    }
}
