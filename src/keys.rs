//! Storage-key computation for the single-table layout.
//!
//! Every item lives at a (partition key, sort key) pair. A company's
//! partition holds its profile, quarters and segment projections, so
//! "all data for ticker X" is one range read; report dates are kept in
//! `YYYY-MM-DD` form so lexicographic sort-key order is chronological
//! order.

use chrono::NaiveDate;

pub const METADATA_SK: &str = "METADATA";

/// The two-part key of one stored item.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordKey {
    pub pk: String,
    pub sk: String,
}

/// Item kinds stored in the single table, distinguished by sort-key
/// prefix within a partition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordKind {
    Profile,
    Quarter,
    Segment,
    SectorIndex,
    SearchIndex,
}

impl RecordKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            RecordKind::Profile => "profile",
            RecordKind::Quarter => "quarter",
            RecordKind::Segment => "segment",
            RecordKind::SectorIndex => "sector",
            RecordKind::SearchIndex => "search",
        }
    }
}

/// Uppercase and trim a ticker symbol.
pub fn normalize_ticker(ticker: &str) -> String {
    ticker.trim().to_uppercase()
}

/// A ticker is non-empty uppercase alphanumeric (plus the '.' and '-'
/// used by share classes, e.g. BRK.B).
pub fn is_valid_ticker(ticker: &str) -> bool {
    !ticker.is_empty()
        && ticker
            .chars()
            .all(|c| c.is_ascii_uppercase() || c.is_ascii_digit() || c == '.' || c == '-')
}

pub fn company_partition(ticker: &str) -> String {
    format!("COMPANY#{}", ticker)
}

pub fn profile_key(ticker: &str) -> RecordKey {
    RecordKey {
        pk: company_partition(ticker),
        sk: METADATA_SK.to_string(),
    }
}

pub fn quarter_key(ticker: &str, report_date: NaiveDate) -> RecordKey {
    RecordKey {
        pk: company_partition(ticker),
        sk: format!("QUARTER#{}", report_date.format("%Y-%m-%d")),
    }
}

pub fn segment_key(ticker: &str, segment: &str, report_date: NaiveDate) -> RecordKey {
    RecordKey {
        pk: company_partition(ticker),
        sk: format!(
            "SEGMENT#{}#{}",
            segment_label(segment),
            report_date.format("%Y-%m-%d")
        ),
    }
}

pub fn sector_key(sector: &str, company_name: &str) -> RecordKey {
    RecordKey {
        pk: format!("SECTOR#{}", sector),
        sk: format!("COMPANY#{}", company_name),
    }
}

pub fn search_key(token: &str, ticker: &str) -> RecordKey {
    RecordKey {
        pk: format!("SEARCH#{}", token),
        sk: format!("COMPANY#{}", ticker),
    }
}

/// Canonical form of a segment name inside a sort key: uppercase, with
/// whitespace collapsed to underscores and the key separator dropped.
pub fn segment_label(segment: &str) -> String {
    segment
        .trim()
        .to_uppercase()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join("_")
        .replace('#', "")
}
