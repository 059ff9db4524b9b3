//! Derived-index maintenance.
//!
//! On every profile or quarter write the full derived set is recomputed
//! and overwritten, never diffed. That costs extra writes but cannot
//! drift: a renamed company or reassigned sector leaves no orphan
//! entries behind.

use serde_json::to_string;
use tracing::debug;

use super::Store;
use crate::keys::{self, RecordKind};
use crate::models::{
    CompanyProfile, QuarterlyFinancials, SearchIndexEntry, SectorIndexEntry, SegmentRecord,
};

/// Ordinal specificity stored with each search entry. Any monotonic
/// scheme satisfying exact-ticker > exact-name > partial works; these
/// values are ranks, not scores.
pub const RANK_TICKER_EXACT: i64 = 4;
pub const RANK_NAME_EXACT: i64 = 3;
pub const RANK_TOKEN_PREFIX: i64 = 2;
pub const RANK_TOKEN_SUBSTRING: i64 = 1;

/// Rebuild the sector entry for one company.
pub(crate) async fn reindex_sector(store: &Store, profile: &CompanyProfile) -> sqlx::Result<()> {
    delete_kind(store, RecordKind::SectorIndex, &profile.ticker).await?;

    let entry = SectorIndexEntry {
        sector: profile.sector.clone(),
        company_name: profile.name.clone(),
        ticker: profile.ticker.clone(),
    };
    let body = to_string(&entry).map_err(|e| sqlx::Error::Encode(Box::new(e)))?;

    let key = keys::sector_key(&profile.sector, &profile.name);
    store
        .put(&key, RecordKind::SectorIndex, &profile.ticker, &body)
        .await
}

/// Rebuild the search-token entries for one company.
pub(crate) async fn reindex_search(store: &Store, profile: &CompanyProfile) -> sqlx::Result<()> {
    delete_kind(store, RecordKind::SearchIndex, &profile.ticker).await?;

    let tokens = search_tokens(&profile.name, &profile.ticker);
    debug!(ticker = %profile.ticker, count = tokens.len(), "rebuilding search entries");

    for (token, rank) in tokens {
        let entry = SearchIndexEntry {
            token: token.clone(),
            company_name: profile.name.clone(),
            ticker: profile.ticker.clone(),
            relevance_score: rank,
        };
        let body = to_string(&entry).map_err(|e| sqlx::Error::Encode(Box::new(e)))?;

        let key = keys::search_key(&token, &profile.ticker);
        store
            .put(&key, RecordKind::SearchIndex, &profile.ticker, &body)
            .await?;
    }
    Ok(())
}

/// Regenerate the segment projections owned by one quarter.
pub(crate) async fn reindex_segments(
    store: &Store,
    quarter: &QuarterlyFinancials,
) -> sqlx::Result<()> {
    // Only this quarter's segment rows; other quarters own theirs.
    sqlx::query("DELETE FROM records WHERE kind = 'segment' AND ticker = ? AND sk LIKE ?")
        .bind(&quarter.ticker)
        .bind(format!("SEGMENT#%#{}", quarter.report_date.format("%Y-%m-%d")))
        .execute(store.pool())
        .await?;

    let Some(segments) = &quarter.segments else {
        return Ok(());
    };

    for (name, figures) in segments {
        let record = SegmentRecord {
            ticker: quarter.ticker.clone(),
            report_date: quarter.report_date,
            segment: name.clone(),
            revenue: figures.revenue,
            operating_income: figures.operating_income,
            operating_margin: figures.operating_margin,
        };
        let body = to_string(&record).map_err(|e| sqlx::Error::Encode(Box::new(e)))?;

        let key = keys::segment_key(&quarter.ticker, name, quarter.report_date);
        store
            .put(&key, RecordKind::Segment, &quarter.ticker, &body)
            .await?;
    }
    Ok(())
}

async fn delete_kind(store: &Store, kind: RecordKind, ticker: &str) -> sqlx::Result<()> {
    sqlx::query("DELETE FROM records WHERE kind = ? AND ticker = ?")
        .bind(kind.as_str())
        .bind(ticker)
        .execute(store.pool())
        .await?;
    Ok(())
}

/// Tokenize a company for indexing: the full lowercase ticker, the full
/// lowercase name, and each whitespace-split word of the name, deduped
/// keeping the most specific rank.
pub fn search_tokens(name: &str, ticker: &str) -> Vec<(String, i64)> {
    let mut tokens: Vec<(String, i64)> = Vec::new();
    let mut push = |token: String, rank: i64| {
        if token.is_empty() {
            return;
        }
        match tokens.iter_mut().find(|(t, _)| *t == token) {
            Some((_, existing)) => *existing = (*existing).max(rank),
            None => tokens.push((token, rank)),
        }
    };

    push(ticker.trim().to_lowercase(), RANK_TICKER_EXACT);
    push(name.trim().to_lowercase(), RANK_NAME_EXACT);
    for word in name.split_whitespace() {
        push(word.to_lowercase(), RANK_TOKEN_PREFIX);
    }
    tokens
}
