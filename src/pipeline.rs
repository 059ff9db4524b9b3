//! Batch ingestion driver.
//!
//! Works through a finite list of work items sequentially with a fixed
//! pacing delay between external calls. A single item's failure never
//! aborts the batch; this is the only layer that decides "skip and
//! continue".

use chrono::Utc;
use serde::Deserialize;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

use crate::error::{IngestError, Result};
use crate::keys::normalize_ticker;
use crate::models::{CompanyProfile, Config};
use crate::normalize;
use crate::sources::{DocumentExtractor, MarketDataProvider, ProviderKind};
use crate::store::RecordStore;

/// One unit of ingestion work.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "mode", rename_all = "camelCase")]
pub enum WorkItem {
    /// Pull profile and quarterly series from the market-data API.
    Api { ticker: String },
    /// Extract one quarter from a PDF filing.
    Document {
        ticker: String,
        document: String,
        quarter: String,
    },
}

impl WorkItem {
    fn label(&self) -> String {
        match self {
            WorkItem::Api { ticker } => format!("{} (api)", ticker),
            WorkItem::Document {
                ticker, quarter, ..
            } => format!("{} {} (document)", ticker, quarter),
        }
    }
}

/// Outcome summary of one batch run.
#[derive(Debug, Default, Clone)]
pub struct IngestReport {
    pub processed: usize,
    /// Items that wrote at least one record.
    pub written: usize,
    /// Items the provider had no data for.
    pub skipped: usize,
    pub failed: usize,
    pub failures: Vec<(String, String)>,
}

pub struct Pipeline {
    market: Arc<dyn MarketDataProvider>,
    extractor: Arc<dyn DocumentExtractor>,
    store: Arc<dyn RecordStore>,
    delay: Duration,
    retry_attempts: u32,
}

impl Pipeline {
    pub fn new(
        market: Arc<dyn MarketDataProvider>,
        extractor: Arc<dyn DocumentExtractor>,
        store: Arc<dyn RecordStore>,
        config: &Config,
    ) -> Self {
        Self {
            market,
            extractor,
            store,
            delay: config.ingest_delay,
            retry_attempts: config.write_retry_attempts.max(1),
        }
    }

    /// Run the batch to completion. Already-written items stay durable
    /// whatever happens later; everything is idempotently re-ingestible.
    pub async fn run(&self, items: &[WorkItem]) -> IngestReport {
        let mut report = IngestReport::default();

        for (i, item) in items.iter().enumerate() {
            if i > 0 {
                tokio::time::sleep(self.delay).await;
            }
            report.processed += 1;
            let label = item.label();

            match self.process(item).await {
                Ok(records) => {
                    info!("{}: {} records written", label, records);
                    report.written += 1;
                }
                Err(IngestError::NoDataFound(what)) => {
                    info!("{}: no data found ({}), skipping", label, what);
                    report.skipped += 1;
                }
                Err(IngestError::MalformedExtraction { reason, raw }) => {
                    // Keep the raw payload in the log for manual
                    // inspection.
                    error!("{}: malformed extraction ({}): {}", label, reason, raw);
                    report.failed += 1;
                    report.failures.push((label, reason));
                }
                Err(e) => {
                    warn!("{}: {}", label, e);
                    report.failed += 1;
                    report.failures.push((label, e.to_string()));
                }
            }
        }

        info!(
            "batch complete: {} processed, {} written, {} skipped, {} failed",
            report.processed, report.written, report.skipped, report.failed
        );
        report
    }

    /// Refresh only the stored market cap (and lastUpdated) for a list
    /// of tickers, re-running index maintenance through the normal
    /// upsert path.
    pub async fn refresh_market_caps(&self, tickers: &[String]) -> IngestReport {
        let mut report = IngestReport::default();

        for (i, ticker) in tickers.iter().enumerate() {
            if i > 0 {
                tokio::time::sleep(self.delay).await;
            }
            report.processed += 1;
            let ticker = normalize_ticker(ticker);

            match self.refresh_market_cap(&ticker).await {
                Ok(market_cap) => {
                    info!("{}: market cap updated to {:.0}", ticker, market_cap);
                    report.written += 1;
                }
                Err(IngestError::NoDataFound(_)) => {
                    info!("{}: no market cap available, skipping", ticker);
                    report.skipped += 1;
                }
                Err(e) => {
                    warn!("{}: {}", ticker, e);
                    report.failed += 1;
                    report.failures.push((ticker, e.to_string()));
                }
            }
        }
        report
    }

    async fn process(&self, item: &WorkItem) -> Result<usize> {
        match item {
            WorkItem::Api { ticker } => self.ingest_from_api(ticker).await,
            WorkItem::Document {
                ticker,
                document,
                quarter,
            } => self.ingest_from_document(ticker, document, quarter).await,
        }
    }

    async fn ingest_from_api(&self, ticker: &str) -> Result<usize> {
        let ticker = normalize_ticker(ticker);
        let mut records = 0;

        let overview = self.market.company_overview(&ticker).await?;
        let profile = normalize::normalize_profile(&overview, &ticker, Utc::now())?;
        self.write_profile(&profile).await?;
        records += 1;

        let raw_quarters = match self.market.quarterly_statements(&ticker).await {
            Ok(raw) => raw,
            // Metadata without statements is still a successful profile
            // refresh.
            Err(IngestError::NoDataFound(_)) => return Ok(records),
            Err(e) => return Err(e),
        };

        for raw in &raw_quarters {
            match normalize::normalize_quarter(raw, ProviderKind::MarketData, &ticker) {
                Ok(quarter) => {
                    self.write_quarter(&quarter).await?;
                    records += 1;
                }
                Err(e) => warn!("{}: quarter dropped: {}", ticker, e),
            }
        }
        Ok(records)
    }

    async fn ingest_from_document(
        &self,
        ticker: &str,
        document: &str,
        quarter: &str,
    ) -> Result<usize> {
        let ticker = normalize_ticker(ticker);
        let raw = self
            .extractor
            .extract_quarter(&ticker, document, quarter)
            .await?;

        let normalized = normalize::normalize_quarter(&raw, ProviderKind::Extraction, &ticker)?;
        if !normalized.quarter.eq_ignore_ascii_case(quarter) {
            // An extraction that states a quarter label contradicting
            // the request answered for the wrong period. A mismatch in
            // the label derived from reportDate alone may just be a
            // fiscal calendar offset.
            if first_field_present(&raw, &["quarter", "fiscalQuarter"]) {
                return Err(IngestError::MalformedExtraction {
                    reason: format!(
                        "extraction answered for {} but {} was requested",
                        normalized.quarter, quarter
                    ),
                    raw: raw.to_string(),
                });
            }
            warn!(
                "{}: period ending {} labeled {}, requested {}",
                ticker, normalized.report_date, normalized.quarter, quarter
            );
        }
        self.ensure_profile(&ticker, &raw).await?;
        self.write_quarter(&normalized).await?;
        Ok(1)
    }

    async fn refresh_market_cap(&self, ticker: &str) -> Result<f64> {
        let mut profile = self
            .store
            .get_profile(ticker)
            .await?
            .ok_or_else(|| IngestError::NotFound(ticker.to_string()))?;

        let overview = self.market.company_overview(ticker).await?;
        let market_cap = overview
            .get("marketCap")
            .or_else(|| overview.get("MarketCapitalization"))
            .and_then(normalize::coerce_money)
            .ok_or_else(|| IngestError::NoDataFound(format!("{} marketCap", ticker)))?;

        profile.market_cap = Some(market_cap);
        profile.last_updated = Utc::now();
        self.write_profile(&profile).await?;
        Ok(market_cap)
    }

    /// A profile looked up from storage, or newly constructed from
    /// whatever the extraction carried when the company is unknown.
    async fn ensure_profile(&self, ticker: &str, raw: &Value) -> Result<CompanyProfile> {
        if let Some(profile) = self.store.get_profile(ticker).await? {
            return Ok(profile);
        }

        let profile = match normalize::normalize_profile(raw, ticker, Utc::now()) {
            Ok(profile) => profile,
            // Extractions rarely carry metadata; a stub profile keeps
            // the series queryable until an API refresh fills it in.
            Err(_) => CompanyProfile {
                ticker: ticker.to_string(),
                name: ticker.to_string(),
                sector: "Unknown".to_string(),
                industry: None,
                market_cap: None,
                employees: None,
                founded: None,
                headquarters: None,
                website: None,
                description: None,
                last_updated: Utc::now(),
            },
        };
        self.write_profile(&profile).await?;
        Ok(profile)
    }

    async fn write_profile(&self, profile: &CompanyProfile) -> Result<()> {
        let mut attempt = 0;
        loop {
            attempt += 1;
            match self.store.upsert_profile(profile).await {
                Ok(()) => return Ok(()),
                // Primary record is durable; stale indexes only degrade
                // browse and search.
                Err(IngestError::IndexWrite(e)) => {
                    warn!("{}: index maintenance failed: {}", profile.ticker, e);
                    return Ok(());
                }
                Err(e) if e.is_retryable_write() && attempt < self.retry_attempts => {
                    warn!(
                        "{}: write attempt {}/{} failed: {}",
                        profile.ticker, attempt, self.retry_attempts, e
                    );
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn write_quarter(&self, quarter: &crate::models::QuarterlyFinancials) -> Result<()> {
        let mut attempt = 0;
        loop {
            attempt += 1;
            match self.store.upsert_quarter(quarter).await {
                Ok(()) => return Ok(()),
                Err(IngestError::IndexWrite(e)) => {
                    warn!(
                        "{} {}: segment projection failed: {}",
                        quarter.ticker, quarter.quarter, e
                    );
                    return Ok(());
                }
                Err(e) if e.is_retryable_write() && attempt < self.retry_attempts => {
                    warn!(
                        "{} {}: write attempt {}/{} failed: {}",
                        quarter.ticker, quarter.quarter, attempt, self.retry_attempts, e
                    );
                }
                Err(e) => return Err(e),
            }
        }
    }
}

fn first_field_present(raw: &Value, names: &[&str]) -> bool {
    names
        .iter()
        .any(|name| raw.get(name).is_some_and(|v| !v.is_null()))
}
