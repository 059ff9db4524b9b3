//! Single-table key-value store over SQLite.
//!
//! Every item lives in one `records` table keyed by (pk, sk); the item
//! kind and owning ticker are carried alongside so derived index sets
//! can be overwritten in full. Writes are unconditional keyed upserts:
//! idempotent by construction, last-writer-wins.

use async_trait::async_trait;
use chrono::Utc;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Row, SqlitePool};
use tracing::info;

use crate::error::{IngestError, Result};
use crate::keys::{self, RecordKey, RecordKind};
use crate::models::{CompanyProfile, QuarterlyFinancials};

pub mod index;
pub mod query;

pub use query::{SearchHit, SortField, SortOrder};

#[derive(Clone)]
pub struct Store {
    pool: SqlitePool,
}

/// The write surface the ingestion pipeline depends on. `Store` is the
/// only production implementation; the seam exists so callers can
/// substitute a failing store in tests.
#[async_trait]
pub trait RecordStore: Send + Sync {
    async fn get_profile(&self, ticker: &str) -> Result<Option<CompanyProfile>>;
    async fn upsert_profile(&self, profile: &CompanyProfile) -> Result<()>;
    async fn upsert_quarter(&self, quarter: &QuarterlyFinancials) -> Result<()>;
}

#[async_trait]
impl RecordStore for Store {
    async fn get_profile(&self, ticker: &str) -> Result<Option<CompanyProfile>> {
        Store::get_profile(self, ticker).await
    }

    async fn upsert_profile(&self, profile: &CompanyProfile) -> Result<()> {
        Store::upsert_profile(self, profile).await
    }

    async fn upsert_quarter(&self, quarter: &QuarterlyFinancials) -> Result<()> {
        Store::upsert_quarter(self, quarter).await
    }
}

/// Row counts per item kind.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StoreStats {
    pub profiles: i64,
    pub quarters: i64,
    pub segments: i64,
    pub sector_entries: i64,
    pub search_entries: i64,
}

impl Store {
    /// Open (or create) the store at the given path.
    pub async fn open(database_path: &str) -> Result<Self> {
        let options = SqliteConnectOptions::new()
            .filename(database_path)
            .create_if_missing(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .acquire_timeout(std::time::Duration::from_secs(30))
            .connect_with(options)
            .await?;

        // WAL for concurrent readers during ingestion runs.
        sqlx::query("PRAGMA journal_mode = WAL").execute(&pool).await?;
        sqlx::query("PRAGMA synchronous = NORMAL").execute(&pool).await?;

        let store = Self { pool };
        store.create_schema().await?;
        info!("store initialized at {}", database_path);
        Ok(store)
    }

    /// In-memory store for tests and dry runs. Single connection: each
    /// SQLite in-memory connection is its own database.
    pub async fn in_memory() -> Result<Self> {
        let options = SqliteConnectOptions::new().in_memory(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await?;

        let store = Self { pool };
        store.create_schema().await?;
        Ok(store)
    }

    async fn create_schema(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS records (
                pk TEXT NOT NULL,
                sk TEXT NOT NULL,
                kind TEXT NOT NULL,
                ticker TEXT NOT NULL,
                body TEXT NOT NULL,
                updated_at DATETIME NOT NULL,
                PRIMARY KEY (pk, sk)
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_records_kind_ticker ON records(kind, ticker)",
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    pub(crate) fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Unconditional keyed overwrite of one item. No read-before-write.
    pub(crate) async fn put(
        &self,
        key: &RecordKey,
        kind: RecordKind,
        ticker: &str,
        body: &str,
    ) -> sqlx::Result<()> {
        sqlx::query(
            r#"
            INSERT INTO records (pk, sk, kind, ticker, body, updated_at)
            VALUES (?, ?, ?, ?, ?, ?)
            ON CONFLICT(pk, sk) DO UPDATE SET
                kind = excluded.kind,
                ticker = excluded.ticker,
                body = excluded.body,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(&key.pk)
        .bind(&key.sk)
        .bind(kind.as_str())
        .bind(ticker)
        .bind(body)
        .bind(Utc::now().naive_utc())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Upsert a company profile, then synchronously rebuild its derived
    /// sector and search entries. The primary write is durable before
    /// index maintenance starts; an index failure surfaces as
    /// `IndexWriteFailure` with the profile already stored.
    pub async fn upsert_profile(&self, profile: &CompanyProfile) -> Result<()> {
        let key = keys::profile_key(&profile.ticker);
        let body = serde_json::to_string(profile)?;
        self.put(&key, RecordKind::Profile, &profile.ticker, &body)
            .await?;

        index::reindex_sector(self, profile)
            .await
            .map_err(IngestError::IndexWrite)?;
        index::reindex_search(self, profile)
            .await
            .map_err(IngestError::IndexWrite)?;
        Ok(())
    }

    /// Upsert one quarter, then regenerate its segment projections.
    /// Idempotent under (ticker, reportDate): re-ingestion overwrites.
    pub async fn upsert_quarter(&self, quarter: &QuarterlyFinancials) -> Result<()> {
        let key = keys::quarter_key(&quarter.ticker, quarter.report_date);
        let body = serde_json::to_string(quarter)?;
        self.put(&key, RecordKind::Quarter, &quarter.ticker, &body)
            .await?;

        index::reindex_segments(self, quarter)
            .await
            .map_err(IngestError::IndexWrite)?;
        Ok(())
    }

    pub async fn get_profile(&self, ticker: &str) -> Result<Option<CompanyProfile>> {
        let key = keys::profile_key(ticker);
        let row = sqlx::query("SELECT body FROM records WHERE pk = ? AND sk = ?")
            .bind(&key.pk)
            .bind(&key.sk)
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(r) => Ok(Some(serde_json::from_str(&r.get::<String, _>("body"))?)),
            None => Ok(None),
        }
    }

    pub async fn stats(&self) -> Result<StoreStats> {
        let rows = sqlx::query("SELECT kind, COUNT(*) as count FROM records GROUP BY kind")
            .fetch_all(&self.pool)
            .await?;

        let mut stats = StoreStats::default();
        for row in rows {
            let count = row.get::<i64, _>("count");
            match row.get::<String, _>("kind").as_str() {
                "profile" => stats.profiles = count,
                "quarter" => stats.quarters = count,
                "segment" => stats.segments = count,
                "sector" => stats.sector_entries = count,
                "search" => stats.search_entries = count,
                _ => {}
            }
        }
        Ok(stats)
    }
}
