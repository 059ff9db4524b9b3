//! Field normalization: provider-shaped JSON in, canonical records out.
//!
//! Pure functions; all I/O stays in the source adapters. Monetary fields
//! are coerced to raw numeric dollars regardless of how the source
//! annotates scale, and a field the source never sent stays absent -- a
//! reported 0 is still a 0.

use chrono::{DateTime, NaiveDate, Utc};
use serde_json::Value;
use std::collections::BTreeMap;
use tracing::debug;

use crate::error::{IngestError, Result};
use crate::keys::{is_valid_ticker, normalize_ticker};
use crate::models::{CompanyProfile, QuarterlyFinancials, SegmentFigures};
use crate::sources::ProviderKind;

const REPORT_DATE_FIELDS: &[&str] = &["reportDate", "fiscalDateEnding", "periodEnd", "date"];
const REVENUE_FIELDS: &[&str] = &["totalRevenue", "revenue", "totalRevenues"];
const NET_INCOME_FIELDS: &[&str] = &["netIncome", "net_income"];
const EPS_FIELDS: &[&str] = &["eps", "reportedEPS", "dilutedEPS", "earningsPerShare"];
const OPERATING_INCOME_FIELDS: &[&str] = &["operatingIncome", "ebit", "operating_income"];
const FCF_FIELDS: &[&str] = &["freeCashFlow", "free_cash_flow"];
const TOTAL_ASSETS_FIELDS: &[&str] = &["totalAssets"];
const TOTAL_DEBT_FIELDS: &[&str] = &["totalDebt", "shortLongTermDebtTotal"];
const EQUITY_FIELDS: &[&str] = &["shareholderEquity", "totalShareholderEquity"];
const SHARES_FIELDS: &[&str] = &["sharesOutstanding", "commonSharesOutstanding"];

/// Map one provider-shaped quarterly statement onto the canonical shape.
///
/// Fails with `NormalizationError` when any mandatory field
/// (totalRevenue, netIncome, eps, operatingIncome, reportDate) cannot be
/// determined. `eps` is derived from netIncome / sharesOutstanding when
/// the source omits it but reports both inputs.
pub fn normalize_quarter(
    raw: &Value,
    provider: ProviderKind,
    ticker: &str,
) -> Result<QuarterlyFinancials> {
    let ticker = checked_ticker(ticker)?;

    if !raw.is_object() {
        return Err(IngestError::Normalization(format!(
            "{}: {} record is not a JSON object",
            ticker, provider
        )));
    }

    let report_date = first_field(raw, REPORT_DATE_FIELDS)
        .and_then(coerce_date)
        .ok_or_else(|| missing(&ticker, "reportDate"))?;

    let total_revenue =
        money(raw, REVENUE_FIELDS).ok_or_else(|| missing(&ticker, "totalRevenue"))?;
    let net_income = money(raw, NET_INCOME_FIELDS).ok_or_else(|| missing(&ticker, "netIncome"))?;
    let operating_income =
        money(raw, OPERATING_INCOME_FIELDS).ok_or_else(|| missing(&ticker, "operatingIncome"))?;

    let shares_outstanding = money(raw, SHARES_FIELDS).filter(|s| *s > 0.0);

    // Per-share metrics are filled at normalization time, not query time.
    let eps = match money(raw, EPS_FIELDS) {
        Some(eps) => eps,
        None => match shares_outstanding {
            Some(shares) => {
                debug!(%ticker, "deriving eps from netIncome / sharesOutstanding");
                net_income / shares
            }
            None => return Err(missing(&ticker, "eps")),
        },
    };

    let quarter = first_field(raw, &["quarter", "fiscalQuarter"])
        .and_then(Value::as_str)
        .map(str::to_string)
        .unwrap_or_else(|| quarter_label(report_date));

    Ok(QuarterlyFinancials {
        ticker,
        quarter,
        report_date,
        total_revenue,
        net_income,
        eps,
        operating_income,
        free_cash_flow: money(raw, FCF_FIELDS),
        total_assets: money(raw, TOTAL_ASSETS_FIELDS),
        total_debt: money(raw, TOTAL_DEBT_FIELDS),
        shareholder_equity: money(raw, EQUITY_FIELDS),
        shares_outstanding,
        segments: normalize_segments(raw),
    })
}

/// Map provider company metadata onto a `CompanyProfile`.
pub fn normalize_profile(
    raw: &Value,
    ticker: &str,
    now: DateTime<Utc>,
) -> Result<CompanyProfile> {
    let ticker = checked_ticker(ticker)?;

    let name = first_field(raw, &["name", "companyName", "Name"])
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .ok_or_else(|| missing(&ticker, "name"))?
        .to_string();

    let sector = first_field(raw, &["sector", "Sector"])
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .unwrap_or("Unknown")
        .to_string();

    Ok(CompanyProfile {
        ticker,
        name,
        sector,
        industry: string_field(raw, &["industry", "Industry"]),
        market_cap: money(raw, &["marketCap", "MarketCapitalization"]),
        employees: int_field(raw, &["employees", "fullTimeEmployees"]),
        founded: int_field(raw, &["founded", "foundedYear"]),
        headquarters: string_field(raw, &["headquarters", "Address"]),
        website: string_field(raw, &["website", "OfficialSite"]),
        description: string_field(raw, &["description", "Description"]),
        last_updated: now,
    })
}

/// Coerce one monetary value to raw numeric dollars.
///
/// Accepts plain numbers, strings with separators and magnitude
/// suffixes ("$40.5B", "40,589 million"), and {value, unit} objects.
/// Returns None only when the value is absent or unparseable; a literal
/// 0 comes back as Some(0.0).
pub fn coerce_money(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => parse_money_string(s),
        Value::Object(map) => {
            let base = map
                .get("value")
                .or_else(|| map.get("amount"))
                .and_then(coerce_money)?;
            let scale = map
                .get("unit")
                .or_else(|| map.get("scale"))
                .map(unit_scale)
                .unwrap_or(Some(1.0))?;
            Some(base * scale)
        }
        _ => None,
    }
}

/// Derive the human quarter label from a fiscal period end.
pub fn quarter_label(report_date: NaiveDate) -> String {
    use chrono::Datelike;
    let quarter = (report_date.month0() / 3) + 1;
    format!("Q{} {}", quarter, report_date.year())
}

fn checked_ticker(ticker: &str) -> Result<String> {
    let ticker = normalize_ticker(ticker);
    if !is_valid_ticker(&ticker) {
        return Err(IngestError::Normalization(format!(
            "invalid ticker {:?}",
            ticker
        )));
    }
    Ok(ticker)
}

fn missing(ticker: &str, field: &str) -> IngestError {
    IngestError::Normalization(format!("{}: mandatory field {} missing", ticker, field))
}

fn first_field<'a>(raw: &'a Value, names: &[&str]) -> Option<&'a Value> {
    names
        .iter()
        .filter_map(|name| raw.get(name))
        .find(|v| !v.is_null())
}

fn money(raw: &Value, names: &[&str]) -> Option<f64> {
    first_field(raw, names).and_then(coerce_money)
}

fn string_field(raw: &Value, names: &[&str]) -> Option<String> {
    first_field(raw, names)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty() && *s != "None")
        .map(str::to_string)
}

fn int_field(raw: &Value, names: &[&str]) -> Option<i64> {
    let value = first_field(raw, names)?;
    match value {
        Value::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f.round() as i64)),
        Value::String(s) => s.trim().replace(',', "").parse().ok(),
        _ => None,
    }
}

fn coerce_date(value: &Value) -> Option<NaiveDate> {
    let s = value.as_str()?.trim();
    NaiveDate::parse_from_str(s, "%Y-%m-%d").ok()
}

fn parse_money_string(s: &str) -> Option<f64> {
    let cleaned = s.trim().trim_start_matches('$').replace(',', "");
    if cleaned.is_empty() || cleaned.eq_ignore_ascii_case("none") || cleaned == "-" {
        return None;
    }

    // Split a trailing magnitude word or suffix off the numeric part.
    let lower = cleaned.to_lowercase();
    for (suffix, scale) in [
        ("trillion", 1e12),
        ("billion", 1e9),
        ("million", 1e6),
        ("thousand", 1e3),
        ("t", 1e12),
        ("b", 1e9),
        ("m", 1e6),
        ("k", 1e3),
    ] {
        if let Some(numeric) = lower.strip_suffix(suffix) {
            return numeric.trim().parse::<f64>().ok().map(|n| n * scale);
        }
    }

    cleaned.parse().ok()
}

fn unit_scale(unit: &Value) -> Option<f64> {
    match unit {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => match s.trim().to_lowercase().as_str() {
            "" | "units" | "dollars" | "usd" | "raw" => Some(1.0),
            "thousand" | "thousands" | "k" => Some(1e3),
            "million" | "millions" | "m" => Some(1e6),
            "billion" | "billions" | "b" => Some(1e9),
            "trillion" | "trillions" | "t" => Some(1e12),
            _ => None,
        },
        _ => None,
    }
}

fn normalize_segments(raw: &Value) -> Option<BTreeMap<String, SegmentFigures>> {
    let segments = raw.get("segments")?.as_object()?;
    let mut out = BTreeMap::new();

    for (name, figures) in segments {
        let Some(revenue) = money(figures, REVENUE_FIELDS) else {
            debug!(segment = %name, "segment dropped: no revenue reported");
            continue;
        };
        out.insert(
            name.trim().to_string(),
            SegmentFigures {
                revenue,
                operating_income: money(figures, OPERATING_INCOME_FIELDS),
                operating_margin: figures.get("operatingMargin").and_then(coerce_money),
            },
        );
    }

    if out.is_empty() {
        None
    } else {
        Some(out)
    }
}
