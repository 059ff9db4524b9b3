//! Query layer: the three read patterns the table layout is built for.

use serde_json::from_str;
use sqlx::Row;
use std::cmp::Ordering;
use std::collections::HashMap;

use super::index::{RANK_TOKEN_PREFIX, RANK_TOKEN_SUBSTRING};
use super::Store;
use crate::error::{IngestError, Result};
use crate::keys;
use crate::models::{CompanyProfile, QuarterlyFinancials, SearchIndexEntry};

#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum SortField {
    Name,
    Ticker,
    Sector,
    MarketCap,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum SortOrder {
    Asc,
    Desc,
}

/// One search result, deduplicated by ticker.
#[derive(Debug, Clone, PartialEq)]
pub struct SearchHit {
    pub ticker: String,
    pub company_name: String,
    /// Ordinal rank of the best match for this company.
    pub relevance: i64,
}

impl Store {
    /// Paginated company listing, optionally filtered to one sector.
    ///
    /// Ordering is deterministic: the requested field first, ties broken
    /// by ticker ascending, so repeated calls over unchanged data return
    /// identical pages. `page` is 1-based. A sector with no companies at
    /// all is `NotFound`.
    pub async fn list_companies(
        &self,
        sector: Option<&str>,
        sort_by: SortField,
        sort_order: SortOrder,
        page: u32,
        limit: u32,
    ) -> Result<Vec<CompanyProfile>> {
        let rows = match sector {
            Some(sector) => {
                sqlx::query(
                    r#"
                    SELECT body FROM records
                    WHERE kind = 'profile'
                      AND ticker IN (SELECT ticker FROM records WHERE kind = 'sector' AND pk = ?)
                    "#,
                )
                .bind(format!("SECTOR#{}", sector))
                .fetch_all(self.pool())
                .await?
            }
            None => {
                sqlx::query("SELECT body FROM records WHERE kind = 'profile'")
                    .fetch_all(self.pool())
                    .await?
            }
        };

        if rows.is_empty() {
            if let Some(sector) = sector {
                return Err(IngestError::NotFound(format!("sector {}", sector)));
            }
        }

        let mut companies = rows
            .into_iter()
            .map(|r| Ok(from_str(&r.get::<String, _>("body"))?))
            .collect::<Result<Vec<CompanyProfile>>>()?;

        companies.sort_by(|a, b| {
            let ordering = match sort_by {
                SortField::Name => a.name.cmp(&b.name),
                SortField::Ticker => a.ticker.cmp(&b.ticker),
                SortField::Sector => a.sector.cmp(&b.sector),
                SortField::MarketCap => a
                    .market_cap
                    .unwrap_or(f64::NEG_INFINITY)
                    .total_cmp(&b.market_cap.unwrap_or(f64::NEG_INFINITY)),
            };
            let ordering = match sort_order {
                SortOrder::Asc => ordering,
                SortOrder::Desc => ordering.reverse(),
            };
            // Ticker tiebreak keeps pagination stable.
            ordering.then_with(|| a.ticker.cmp(&b.ticker))
        });

        let start = (page.max(1) as usize - 1) * limit as usize;
        Ok(companies
            .into_iter()
            .skip(start)
            .take(limit as usize)
            .collect())
    }

    /// All quarters for a ticker, ascending by report date. An existing
    /// company with no quarters is an empty success; an unknown ticker
    /// is `NotFound`.
    pub async fn company_time_series(&self, ticker: &str) -> Result<Vec<QuarterlyFinancials>> {
        let ticker = keys::normalize_ticker(ticker);
        if self.get_profile(&ticker).await?.is_none() {
            return Err(IngestError::NotFound(ticker));
        }

        // Sort keys are QUARTER#YYYY-MM-DD: lexicographic equals
        // chronological within the partition.
        let rows = sqlx::query(
            "SELECT body FROM records WHERE pk = ? AND kind = 'quarter' ORDER BY sk ASC",
        )
        .bind(keys::company_partition(&ticker))
        .fetch_all(self.pool())
        .await?;

        rows.into_iter()
            .map(|r| Ok(from_str(&r.get::<String, _>("body"))?))
            .collect()
    }

    /// Segment projections for one (ticker, reportDate), without
    /// loading the full quarterly record.
    pub async fn segment_records(
        &self,
        ticker: &str,
        report_date: chrono::NaiveDate,
    ) -> Result<Vec<crate::models::SegmentRecord>> {
        let ticker = keys::normalize_ticker(ticker);
        let rows = sqlx::query(
            "SELECT body FROM records WHERE pk = ? AND kind = 'segment' AND sk LIKE ? ORDER BY sk",
        )
        .bind(keys::company_partition(&ticker))
        .bind(format!("SEGMENT#%#{}", report_date.format("%Y-%m-%d")))
        .fetch_all(self.pool())
        .await?;

        rows.into_iter()
            .map(|r| Ok(from_str(&r.get::<String, _>("body"))?))
            .collect()
    }

    /// Free-text company search over the token index.
    ///
    /// The query is tokenized exactly like indexing; matching entry sets
    /// are unioned, deduplicated by ticker keeping the highest rank, and
    /// sorted by rank descending then name ascending.
    pub async fn search(&self, query: &str, limit: u32, offset: u32) -> Result<Vec<SearchHit>> {
        let mut tokens: Vec<String> = query
            .split_whitespace()
            .map(str::to_lowercase)
            .collect();
        let full = query.trim().to_lowercase();
        if !full.is_empty() && !tokens.contains(&full) {
            tokens.push(full);
        }
        if tokens.is_empty() {
            return Ok(Vec::new());
        }

        let mut best: HashMap<String, SearchHit> = HashMap::new();
        for token in &tokens {
            for (entry, rank) in self.match_token(token).await? {
                best.entry(entry.ticker.clone())
                    .and_modify(|hit| hit.relevance = hit.relevance.max(rank))
                    .or_insert(SearchHit {
                        ticker: entry.ticker,
                        company_name: entry.company_name,
                        relevance: rank,
                    });
            }
        }

        let mut hits: Vec<SearchHit> = best.into_values().collect();
        hits.sort_by(|a, b| match b.relevance.cmp(&a.relevance) {
            Ordering::Equal => a.company_name.cmp(&b.company_name),
            other => other,
        });

        Ok(hits
            .into_iter()
            .skip(offset as usize)
            .take(limit as usize)
            .collect())
    }

    /// Fetch entries matching one query token and compute their ordinal
    /// rank: an exact token match uses the entry's stored specificity
    /// (exact ticker beats exact name beats name word), a prefix match
    /// ranks below any exact match, a substring match below that.
    async fn match_token(&self, token: &str) -> Result<Vec<(SearchIndexEntry, i64)>> {
        let escaped = escape_like(token);
        let rows = sqlx::query(
            r#"
            SELECT body FROM records
            WHERE kind = 'search'
              AND (pk = ? OR pk LIKE ? ESCAPE '\')
            "#,
        )
        .bind(format!("SEARCH#{}", token))
        .bind(format!("SEARCH#%{}%", escaped))
        .fetch_all(self.pool())
        .await?;

        let mut matches = Vec::new();
        for row in rows {
            let entry: SearchIndexEntry = from_str(&row.get::<String, _>("body"))?;
            let rank = if entry.token == token {
                entry.relevance_score
            } else if entry.token.starts_with(token) {
                RANK_TOKEN_PREFIX.min(entry.relevance_score)
            } else {
                RANK_TOKEN_SUBSTRING
            };
            matches.push((entry, rank));
        }
        Ok(matches)
    }
}

fn escape_like(token: &str) -> String {
    token
        .replace('\\', "\\\\")
        .replace('%', "\\%")
        .replace('_', "\\_")
}
