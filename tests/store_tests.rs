//! Integration tests over the store, index maintainer and query layer,
//! plus end-to-end batch runs through the pipeline with fake providers.

use assert_matches::assert_matches;
use async_trait::async_trait;
use chrono::{NaiveDate, Utc};
use pretty_assertions::assert_eq;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use fintail::error::{IngestError, Result};
use fintail::models::{CompanyProfile, Config, QuarterlyFinancials};
use fintail::pipeline::{Pipeline, WorkItem};
use fintail::sources::extraction::parse_extraction_output;
use fintail::sources::{DocumentExtractor, MarketDataProvider};
use fintail::store::{RecordStore, SortField, SortOrder, Store};

fn test_config() -> Config {
    Config {
        database_path: ":memory:".to_string(),
        market_data_base_url: "http://localhost:0".to_string(),
        market_data_api_key: None,
        extractor_base_url: "http://localhost:0".to_string(),
        extractor_api_key: None,
        ingest_delay: Duration::ZERO,
        write_retry_attempts: 3,
    }
}

fn profile(ticker: &str, name: &str, sector: &str) -> CompanyProfile {
    CompanyProfile {
        ticker: ticker.to_string(),
        name: name.to_string(),
        sector: sector.to_string(),
        industry: None,
        market_cap: Some(1_000_000_000_000.0),
        employees: None,
        founded: None,
        headquarters: None,
        website: None,
        description: None,
        last_updated: Utc::now(),
    }
}

fn quarter(ticker: &str, date: (i32, u32, u32), revenue: f64) -> QuarterlyFinancials {
    let report_date = NaiveDate::from_ymd_opt(date.0, date.1, date.2).unwrap();
    QuarterlyFinancials {
        ticker: ticker.to_string(),
        quarter: fintail::normalize::quarter_label(report_date),
        report_date,
        total_revenue: revenue,
        net_income: revenue * 0.25,
        eps: 2.5,
        operating_income: revenue * 0.3,
        free_cash_flow: None,
        total_assets: None,
        total_debt: None,
        shareholder_equity: None,
        shares_outstanding: None,
        segments: None,
    }
}

#[derive(Default)]
struct FakeMarket {
    overviews: HashMap<String, Value>,
    quarters: HashMap<String, Vec<Value>>,
}

#[async_trait]
impl MarketDataProvider for FakeMarket {
    async fn company_overview(&self, ticker: &str) -> Result<Value> {
        self.overviews
            .get(ticker)
            .cloned()
            .ok_or_else(|| IngestError::NoDataFound(ticker.to_string()))
    }

    async fn quarterly_statements(&self, ticker: &str) -> Result<Vec<Value>> {
        self.quarters
            .get(ticker)
            .cloned()
            .ok_or_else(|| IngestError::NoDataFound(ticker.to_string()))
    }
}

/// Replays a canned model response through the real output parser.
struct FakeExtractor {
    output: String,
}

#[async_trait]
impl DocumentExtractor for FakeExtractor {
    async fn extract_quarter(&self, _: &str, _: &str, _: &str) -> Result<Value> {
        parse_extraction_output(&self.output)
    }
}

/// Wraps a real store, failing a configurable number of primary writes
/// up front and optionally every index-maintenance step.
struct FlakyStore {
    inner: Store,
    failures_left: AtomicU32,
    write_calls: AtomicU32,
    index_always_fails: bool,
}

impl FlakyStore {
    fn failing_writes(inner: Store, failures: u32) -> Self {
        Self {
            inner,
            failures_left: AtomicU32::new(failures),
            write_calls: AtomicU32::new(0),
            index_always_fails: false,
        }
    }

    fn failing_indexes(inner: Store) -> Self {
        Self {
            inner,
            failures_left: AtomicU32::new(0),
            write_calls: AtomicU32::new(0),
            index_always_fails: true,
        }
    }

    fn injected_failure(&self) -> Option<IngestError> {
        self.write_calls.fetch_add(1, Ordering::SeqCst);
        if self.failures_left.load(Ordering::SeqCst) > 0 {
            self.failures_left.fetch_sub(1, Ordering::SeqCst);
            Some(IngestError::StorageWrite(sqlx::Error::PoolTimedOut))
        } else {
            None
        }
    }
}

#[async_trait]
impl RecordStore for FlakyStore {
    async fn get_profile(&self, ticker: &str) -> Result<Option<CompanyProfile>> {
        self.inner.get_profile(ticker).await
    }

    async fn upsert_profile(&self, profile: &CompanyProfile) -> Result<()> {
        if let Some(err) = self.injected_failure() {
            return Err(err);
        }
        self.inner.upsert_profile(profile).await?;
        if self.index_always_fails {
            return Err(IngestError::IndexWrite(sqlx::Error::PoolTimedOut));
        }
        Ok(())
    }

    async fn upsert_quarter(&self, quarter: &QuarterlyFinancials) -> Result<()> {
        if let Some(err) = self.injected_failure() {
            return Err(err);
        }
        self.inner.upsert_quarter(quarter).await?;
        if self.index_always_fails {
            return Err(IngestError::IndexWrite(sqlx::Error::PoolTimedOut));
        }
        Ok(())
    }
}

fn meta_pipeline(store: Store) -> Pipeline {
    meta_pipeline_over(Arc::new(store))
}

fn meta_pipeline_over(store: Arc<dyn RecordStore>) -> Pipeline {
    let mut market = FakeMarket::default();
    market.overviews.insert(
        "META".to_string(),
        json!({"name": "Meta Platforms Inc.", "sector": "Technology", "marketCap": 1500000000000.0}),
    );
    market.quarters.insert(
        "META".to_string(),
        vec![json!({
            "reportDate": "2025-09-30",
            "totalRevenue": 40589000000.0,
            "netIncome": 15688000000.0,
            "eps": 6.20,
            "operatingIncome": 17351000000.0,
            "freeCashFlow": 17483000000.0
        })],
    );
    Pipeline::new(
        Arc::new(market),
        Arc::new(FakeExtractor {
            output: String::new(),
        }),
        store,
        &test_config(),
    )
}

#[tokio::test]
async fn reingestion_is_idempotent() {
    let store = Store::in_memory().await.unwrap();
    let q = quarter("META", (2025, 9, 30), 40_589_000_000.0);

    store.upsert_profile(&profile("META", "Meta Platforms Inc.", "Technology")).await.unwrap();
    store.upsert_quarter(&q).await.unwrap();
    store.upsert_quarter(&q).await.unwrap();

    let series = store.company_time_series("META").await.unwrap();
    assert_eq!(series.len(), 1);
    assert_eq!(series[0], q);
}

#[tokio::test]
async fn time_series_is_chronological_regardless_of_write_order() {
    let store = Store::in_memory().await.unwrap();
    store.upsert_profile(&profile("META", "Meta Platforms Inc.", "Technology")).await.unwrap();

    for date in [(2025, 9, 30), (2024, 12, 31), (2025, 3, 31), (2025, 6, 30)] {
        store.upsert_quarter(&quarter("META", date, 1e9)).await.unwrap();
    }

    let series = store.company_time_series("META").await.unwrap();
    let dates: Vec<_> = series.iter().map(|q| q.report_date).collect();
    let mut sorted = dates.clone();
    sorted.sort();
    assert_eq!(dates, sorted);
    assert_eq!(series.len(), 4);
}

#[tokio::test]
async fn zero_survives_storage_and_missing_stays_missing() {
    let store = Store::in_memory().await.unwrap();
    store.upsert_profile(&profile("META", "Meta Platforms Inc.", "Technology")).await.unwrap();

    let mut q = quarter("META", (2025, 9, 30), 40e9);
    q.free_cash_flow = Some(0.0);
    store.upsert_quarter(&q).await.unwrap();

    let series = store.company_time_series("META").await.unwrap();
    assert_eq!(series[0].free_cash_flow, Some(0.0));
    assert_eq!(series[0].total_assets, None);
}

#[tokio::test]
async fn sector_listing_sees_an_upserted_profile_exactly_once() {
    let store = Store::in_memory().await.unwrap();
    store.upsert_profile(&profile("META", "Meta Platforms Inc.", "Technology")).await.unwrap();
    store.upsert_profile(&profile("PLTR", "Palantir Technologies", "Technology")).await.unwrap();
    store.upsert_profile(&profile("XOM", "Exxon Mobil", "Energy")).await.unwrap();

    let tech = store
        .list_companies(Some("Technology"), SortField::Name, SortOrder::Asc, 1, 20)
        .await
        .unwrap();
    let meta_count = tech.iter().filter(|c| c.ticker == "META").count();
    assert_eq!(meta_count, 1);
    assert_eq!(tech.len(), 2);
}

#[tokio::test]
async fn sector_reassignment_leaves_no_orphan_index_entry() {
    let store = Store::in_memory().await.unwrap();
    store.upsert_profile(&profile("META", "Meta Platforms Inc.", "Technology")).await.unwrap();

    let mut moved = profile("META", "Meta Platforms Inc.", "Communication Services");
    moved.last_updated = Utc::now();
    store.upsert_profile(&moved).await.unwrap();

    let err = store
        .list_companies(Some("Technology"), SortField::Name, SortOrder::Asc, 1, 20)
        .await
        .unwrap_err();
    assert_matches!(err, IngestError::NotFound(_));

    let comms = store
        .list_companies(Some("Communication Services"), SortField::Name, SortOrder::Asc, 1, 20)
        .await
        .unwrap();
    assert_eq!(comms.len(), 1);
}

#[tokio::test]
async fn unknown_sector_and_ticker_are_not_found_but_empty_series_is_ok() {
    let store = Store::in_memory().await.unwrap();
    store.upsert_profile(&profile("META", "Meta Platforms Inc.", "Technology")).await.unwrap();

    assert_matches!(
        store.company_time_series("ZZZZ").await,
        Err(IngestError::NotFound(_))
    );
    assert_matches!(
        store
            .list_companies(Some("Utilities"), SortField::Name, SortOrder::Asc, 1, 20)
            .await,
        Err(IngestError::NotFound(_))
    );

    // A company with no quarters is success with zero items.
    let series = store.company_time_series("META").await.unwrap();
    assert!(series.is_empty());
}

#[tokio::test]
async fn exact_ticker_match_outranks_name_substring() {
    let store = Store::in_memory().await.unwrap();
    store.upsert_profile(&profile("AMZN", "Amazon.com Inc.", "Consumer Discretionary")).await.unwrap();
    store.upsert_profile(&profile("AAPL", "Apple Inc.", "Technology")).await.unwrap();

    let hits = store.search("AMZN", 10, 0).await.unwrap();
    assert_eq!(hits[0].ticker, "AMZN");
    for hit in &hits[1..] {
        assert!(hit.relevance < hits[0].relevance);
    }

    // Shared token: both companies carry "inc." entries; dedup keeps one
    // hit per ticker, name ascending on equal rank.
    let hits = store.search("inc.", 10, 0).await.unwrap();
    assert_eq!(hits.len(), 2);
    let tickers: Vec<_> = hits.iter().map(|h| h.ticker.as_str()).collect();
    assert_eq!(tickers, vec!["AMZN", "AAPL"]);
}

#[tokio::test]
async fn prefix_search_finds_companies() {
    let store = Store::in_memory().await.unwrap();
    store.upsert_profile(&profile("AMZN", "Amazon.com Inc.", "Consumer Discretionary")).await.unwrap();

    let hits = store.search("amaz", 10, 0).await.unwrap();
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].ticker, "AMZN");
}

#[tokio::test]
async fn substring_match_ranks_below_prefix_and_exact() {
    let store = Store::in_memory().await.unwrap();
    store.upsert_profile(&profile("AMZN", "Amazon", "Consumer Discretionary")).await.unwrap();

    let exact = store.search("amzn", 10, 0).await.unwrap();
    let by_prefix = store.search("amaz", 10, 0).await.unwrap();
    let by_substring = store.search("mazon", 10, 0).await.unwrap();

    assert_eq!(by_substring.len(), 1);
    assert_eq!(by_substring[0].ticker, "AMZN");
    assert!(exact[0].relevance > by_prefix[0].relevance);
    assert!(by_prefix[0].relevance > by_substring[0].relevance);
}

#[tokio::test]
async fn renaming_a_company_rebuilds_its_search_entries() {
    let store = Store::in_memory().await.unwrap();
    store.upsert_profile(&profile("FB", "Facebook Inc.", "Technology")).await.unwrap();
    store.upsert_profile(&profile("FB", "Meta Platforms Inc.", "Technology")).await.unwrap();

    assert!(store.search("facebook", 10, 0).await.unwrap().is_empty());
    let hits = store.search("meta", 10, 0).await.unwrap();
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].ticker, "FB");
}

#[tokio::test]
async fn pagination_is_stable_and_deterministic() {
    let store = Store::in_memory().await.unwrap();
    for i in 0..30 {
        let ticker = format!("T{:02}", i);
        store
            .upsert_profile(&profile(&ticker, &format!("Company {:02}", i), "Technology"))
            .await
            .unwrap();
    }

    let first = store
        .list_companies(None, SortField::Name, SortOrder::Asc, 1, 20)
        .await
        .unwrap();
    let again = store
        .list_companies(None, SortField::Name, SortOrder::Asc, 1, 20)
        .await
        .unwrap();
    assert_eq!(first, again);
    assert_eq!(first.len(), 20);

    let second_page = store
        .list_companies(None, SortField::Name, SortOrder::Asc, 2, 20)
        .await
        .unwrap();
    assert_eq!(second_page.len(), 10);
    assert!(first.iter().all(|c| !second_page.contains(c)));
}

#[tokio::test]
async fn segments_are_projected_and_regenerated() {
    let store = Store::in_memory().await.unwrap();
    store.upsert_profile(&profile("META", "Meta Platforms Inc.", "Technology")).await.unwrap();

    let mut q = quarter("META", (2025, 9, 30), 40e9);
    let mut segments = std::collections::BTreeMap::new();
    segments.insert(
        "Family of Apps".to_string(),
        fintail::models::SegmentFigures {
            revenue: 39e9,
            operating_income: None,
            operating_margin: None,
        },
    );
    segments.insert(
        "Reality Labs".to_string(),
        fintail::models::SegmentFigures {
            revenue: 0.3e9,
            operating_income: None,
            operating_margin: None,
        },
    );
    q.segments = Some(segments);
    store.upsert_quarter(&q).await.unwrap();
    assert_eq!(store.stats().await.unwrap().segments, 2);

    let records = store
        .segment_records("META", q.report_date)
        .await
        .unwrap();
    assert_eq!(records.len(), 2);
    assert_eq!(records[0].segment, "Family of Apps");
    assert_eq!(records[0].revenue, 39e9);

    // Re-ingestion with one segment gone shrinks the projection set.
    let mut q2 = q.clone();
    q2.segments.as_mut().unwrap().remove("Reality Labs");
    store.upsert_quarter(&q2).await.unwrap();
    assert_eq!(store.stats().await.unwrap().segments, 1);
}

#[tokio::test]
async fn end_to_end_meta_scenario() {
    let store = Store::in_memory().await.unwrap();
    let pipeline = meta_pipeline(store.clone());
    let items = vec![WorkItem::Api {
        ticker: "META".to_string(),
    }];

    let report = pipeline.run(&items).await;
    assert_eq!(report.written, 1);
    assert_eq!(report.failed, 0);

    let series = store.company_time_series("META").await.unwrap();
    assert_eq!(series.len(), 1);
    let q = &series[0];
    assert_eq!(q.report_date, NaiveDate::from_ymd_opt(2025, 9, 30).unwrap());
    assert_eq!(q.total_revenue, 40_589_000_000.0);
    assert_eq!(q.net_income, 15_688_000_000.0);
    assert_eq!(q.eps, 6.20);
    assert_eq!(q.operating_income, 17_351_000_000.0);
    assert_eq!(q.free_cash_flow, Some(17_483_000_000.0));

    // Re-running the same ingestion must not create a second entry.
    pipeline.run(&items).await;
    let series = store.company_time_series("META").await.unwrap();
    assert_eq!(series.len(), 1);
}

#[tokio::test]
async fn document_mode_ingests_a_fenced_extraction() {
    let store = Store::in_memory().await.unwrap();
    let extractor = FakeExtractor {
        output: "```json\n{\"ticker\": \"META\", \"reportDate\": \"2025-09-30\", \
                 \"totalRevenue\": \"40,589 million\", \"netIncome\": 15688000000, \
                 \"eps\": 6.2, \"operatingIncome\": 17351000000}\n```"
            .to_string(),
    };
    let pipeline = Pipeline::new(
        Arc::new(FakeMarket::default()),
        Arc::new(extractor),
        Arc::new(store.clone()),
        &test_config(),
    );

    let report = pipeline
        .run(&[WorkItem::Document {
            ticker: "META".to_string(),
            document: "filings/meta-10q-q3-2025.pdf".to_string(),
            quarter: "Q3 2025".to_string(),
        }])
        .await;
    assert_eq!(report.written, 1);

    let series = store.company_time_series("META").await.unwrap();
    assert_eq!(series.len(), 1);
    assert_eq!(series[0].total_revenue, 40_589_000_000.0);
    assert_eq!(series[0].quarter, "Q3 2025");
}

#[tokio::test]
async fn extraction_for_the_wrong_quarter_is_rejected() {
    let store = Store::in_memory().await.unwrap();
    let extractor = FakeExtractor {
        output: "{\"reportDate\": \"2025-06-30\", \"quarter\": \"Q2 2025\", \
                 \"totalRevenue\": 39000000000, \"netIncome\": 15000000000, \
                 \"eps\": 5.9, \"operatingIncome\": 16000000000}"
            .to_string(),
    };
    let pipeline = Pipeline::new(
        Arc::new(FakeMarket::default()),
        Arc::new(extractor),
        Arc::new(store.clone()),
        &test_config(),
    );

    let report = pipeline
        .run(&[WorkItem::Document {
            ticker: "META".to_string(),
            document: "filings/meta-10q.pdf".to_string(),
            quarter: "Q3 2025".to_string(),
        }])
        .await;

    assert_eq!(report.failed, 1);
    assert_eq!(report.written, 0);
    assert_matches!(
        store.company_time_series("META").await,
        Err(IngestError::NotFound(_))
    );
}

#[tokio::test]
async fn one_bad_item_does_not_abort_the_batch() {
    let store = Store::in_memory().await.unwrap();
    let pipeline = meta_pipeline(store.clone());

    let items = vec![
        // Unknown ticker: provider has nothing, item is skipped.
        WorkItem::Api {
            ticker: "ZZZZ".to_string(),
        },
        // Garbage extraction: malformed, item fails.
        WorkItem::Document {
            ticker: "PLTR".to_string(),
            document: "filings/pltr.pdf".to_string(),
            quarter: "Q2 2025".to_string(),
        },
        WorkItem::Api {
            ticker: "META".to_string(),
        },
    ];

    let report = pipeline.run(&items).await;
    assert_eq!(report.processed, 3);
    assert_eq!(report.skipped, 1);
    assert_eq!(report.failed, 1);
    assert_eq!(report.written, 1);

    // Partial progress survives.
    assert_eq!(store.company_time_series("META").await.unwrap().len(), 1);
}

#[tokio::test]
async fn transient_write_failures_are_retried_until_success() {
    let store = Store::in_memory().await.unwrap();
    // Two injected failures, three attempts allowed: the profile write
    // succeeds on the last one, then the quarter write goes through.
    let flaky = Arc::new(FlakyStore::failing_writes(store.clone(), 2));
    let pipeline = meta_pipeline_over(flaky.clone());

    let report = pipeline
        .run(&[WorkItem::Api {
            ticker: "META".to_string(),
        }])
        .await;

    assert_eq!(report.written, 1);
    assert_eq!(report.failed, 0);
    assert_eq!(flaky.write_calls.load(Ordering::SeqCst), 4);
    assert!(store.get_profile("META").await.unwrap().is_some());
    assert_eq!(store.company_time_series("META").await.unwrap().len(), 1);
}

#[tokio::test]
async fn persistent_write_failures_stop_after_the_attempt_budget() {
    let store = Store::in_memory().await.unwrap();
    let flaky = Arc::new(FlakyStore::failing_writes(store.clone(), u32::MAX));
    let pipeline = meta_pipeline_over(flaky.clone());

    let report = pipeline
        .run(&[WorkItem::Api {
            ticker: "META".to_string(),
        }])
        .await;

    assert_eq!(report.failed, 1);
    assert_eq!(report.written, 0);
    // write_retry_attempts bounds the attempts, no endless retrying.
    assert_eq!(flaky.write_calls.load(Ordering::SeqCst), 3);
    assert!(store.get_profile("META").await.unwrap().is_none());
}

#[tokio::test]
async fn index_failure_is_tolerated_once_the_primary_write_is_durable() {
    let store = Store::in_memory().await.unwrap();
    let flaky = Arc::new(FlakyStore::failing_indexes(store.clone()));
    let pipeline = meta_pipeline_over(flaky);

    let report = pipeline
        .run(&[WorkItem::Api {
            ticker: "META".to_string(),
        }])
        .await;

    // The item counts as written and the records are queryable even
    // though every index-maintenance step failed.
    assert_eq!(report.written, 1);
    assert_eq!(report.failed, 0);
    assert!(store.get_profile("META").await.unwrap().is_some());
    assert_eq!(store.company_time_series("META").await.unwrap().len(), 1);
}

#[tokio::test]
async fn market_cap_refresh_touches_only_the_market_cap() {
    let store = Store::in_memory().await.unwrap();
    let mut before = profile("META", "Meta Platforms Inc.", "Technology");
    before.market_cap = Some(1e12);
    before.description = Some("Social technology company".to_string());
    store.upsert_profile(&before).await.unwrap();

    let pipeline = meta_pipeline(store.clone());
    let report = pipeline.refresh_market_caps(&["META".to_string()]).await;
    assert_eq!(report.written, 1);

    let after = store.get_profile("META").await.unwrap().unwrap();
    assert_eq!(after.market_cap, Some(1_500_000_000_000.0));
    assert_eq!(after.description, before.description);
    assert_eq!(after.name, before.name);
    assert!(after.last_updated >= before.last_updated);
}

#[tokio::test]
async fn written_items_survive_a_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("fintail.db");
    let path = path.to_str().unwrap();

    {
        let store = Store::open(path).await.unwrap();
        store.upsert_profile(&profile("META", "Meta Platforms Inc.", "Technology")).await.unwrap();
        store.upsert_quarter(&quarter("META", (2025, 9, 30), 40e9)).await.unwrap();
    }

    let store = Store::open(path).await.unwrap();
    assert_eq!(store.company_time_series("META").await.unwrap().len(), 1);
    let hits = store.search("meta", 10, 0).await.unwrap();
    assert_eq!(hits[0].ticker, "META");
}

#[tokio::test]
async fn profile_updates_mutate_in_place() {
    let store = Store::in_memory().await.unwrap();
    store.upsert_profile(&profile("META", "Meta Platforms Inc.", "Technology")).await.unwrap();
    store.upsert_profile(&profile("META", "Meta Platforms Inc.", "Technology")).await.unwrap();

    let stats = store.stats().await.unwrap();
    assert_eq!(stats.profiles, 1);
    assert_eq!(stats.sector_entries, 1);
}
