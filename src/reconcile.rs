//! Merges the realtime, history and trend responses into one [`NormalizedRecord`].
//!
//! Only the realtime fetch is allowed to fail the whole record. History and
//! trend failures are logged and replaced by zeroed summaries, and malformed
//! numbers or dates degrade to `0.0` / [`NO_DATA`] where they are read.

use crate::api::{RawHistoryEntry, RawRealtimeReading, RawTrendYear, VendorValue, WaterMeterApi};
use crate::error::FetchError;
use crate::identity::MeterIdentity;
use serde_derive::Serialize;
use tracing::{debug, info, warn};

/// Placeholder published for text readings the vendor gave no data for
pub const NO_DATA: &str = "无数据";
/// Most recent months kept in the monthly series
pub const MAX_MONTHS: usize = 24;

const CURRENCY_MARKER: char = '元';
const UNKNOWN_OWNER: &str = "未知用户";
const UNKNOWN_ADDRESS: &str = "未知地址";

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MonthlyUsage {
    /// `YYYYMM`, so plain string order is chronological order
    pub month: String,
    pub usage: f64,
}

/// The record published after every successful refresh.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NormalizedRecord {
    pub owner_no: String,
    pub address: String,
    pub balance: f64,
    pub arrears: f64,
    pub current_usage: f64,
    pub current_bill: f64,
    pub current_year_total_usage: f64,
    pub annual_bill: f64,
    pub latest_reading_value: String,
    pub latest_reading_time: String,
    pub last_year_total_usage: f64,
    pub monthly_usage: Vec<MonthlyUsage>,
}

/// What one year of bill history boils down to.
#[derive(Debug, Clone, PartialEq)]
pub struct HistorySummary {
    /// Year the figures come from, `None` when no year had data
    pub year: Option<i32>,
    pub current_usage: f64,
    pub current_bill: f64,
    pub annual_usage: f64,
    pub annual_bill: f64,
    pub latest_reading_value: String,
    pub latest_reading_time: String,
}

impl Default for HistorySummary {
    fn default() -> Self {
        Self {
            year: None,
            current_usage: 0.0,
            current_bill: 0.0,
            annual_usage: 0.0,
            annual_bill: 0.0,
            latest_reading_value: NO_DATA.to_string(),
            latest_reading_time: NO_DATA.to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct TrendSummary {
    pub monthly_usage: Vec<MonthlyUsage>,
    pub last_year_total_usage: f64,
}

/// Fetches everything for one meter and builds its record.
///
/// Fails only when the realtime reading cannot be obtained.
pub async fn reconcile(
    api: &WaterMeterApi,
    identity: &MeterIdentity,
    current_year: i32,
) -> Result<NormalizedRecord, FetchError> {
    let realtime = api.fetch_realtime(identity).await?;
    let history = collect_history(api, identity, current_year).await;
    let trends = collect_trends(api, identity, current_year).await;
    Ok(build_record(identity, &realtime, history, trends))
}

/// Tries the current year, then the one before. Fetch failures count as "no data".
pub async fn collect_history(
    api: &WaterMeterApi,
    identity: &MeterIdentity,
    current_year: i32,
) -> HistorySummary {
    for year in [current_year, current_year - 1] {
        match api.fetch_annual_history(identity, year).await {
            Ok(entries) => {
                if let Some(summary) = summarize_history(&entries, year) {
                    return summary;
                }
                info!(meter = %identity.meter_no, year, "no bill history for year");
            }
            Err(e) => {
                warn!(meter = %identity.meter_no, year, error = %e, "bill history fetch failed");
            }
        }
    }
    HistorySummary::default()
}

pub async fn collect_trends(
    api: &WaterMeterApi,
    identity: &MeterIdentity,
    current_year: i32,
) -> TrendSummary {
    match api.fetch_trends(identity).await {
        Ok(years) => summarize_trends(&years, current_year),
        Err(e) => {
            warn!(meter = %identity.meter_no, error = %e, "usage trend fetch failed");
            TrendSummary::default()
        }
    }
}

pub fn build_record(
    identity: &MeterIdentity,
    realtime: &RawRealtimeReading,
    history: HistorySummary,
    trends: TrendSummary,
) -> NormalizedRecord {
    let owner = non_empty(realtime.owner.as_deref()).unwrap_or(UNKNOWN_OWNER);
    let address = non_empty(realtime.address.as_deref()).unwrap_or(UNKNOWN_ADDRESS);

    NormalizedRecord {
        owner_no: format!("{} {}", identity.meter_no, owner),
        address: address.to_string(),
        balance: clean_amount(realtime.balance.as_ref()),
        arrears: clean_amount(realtime.arrears.as_ref()),
        current_usage: history.current_usage,
        current_bill: history.current_bill,
        current_year_total_usage: history.annual_usage,
        annual_bill: history.annual_bill,
        latest_reading_value: history.latest_reading_value,
        latest_reading_time: history.latest_reading_time,
        last_year_total_usage: trends.last_year_total_usage,
        monthly_usage: trends.monthly_usage,
    }
}

/// Parses a vendor amount such as `"128.50元"`. Anything unparseable is `0.0`.
pub fn clean_balance(raw: &str) -> f64 {
    raw.trim()
        .trim_end_matches(CURRENCY_MARKER)
        .trim()
        .parse::<f64>()
        .ok()
        .filter(|v| v.is_finite())
        .unwrap_or(0.0)
}

pub fn clean_amount(value: Option<&VendorValue>) -> f64 {
    match value {
        Some(VendorValue::Number(n)) if n.is_finite() => *n,
        Some(VendorValue::Text(s)) => clean_balance(s),
        _ => 0.0,
    }
}

/// `2024年02月01日` becomes `2024-02-01`. Digits are kept as given, so
/// `2024年2月1日` becomes `2024-2-1`.
pub fn canonical_date(raw: &str) -> String {
    raw.trim()
        .split(['年', '月', '日'])
        .filter(|part| !part.is_empty())
        .collect::<Vec<_>>()
        .join("-")
}

/// Summary of one year's bill entries, `None` if the year has none.
///
/// The latest entry is the one with the greatest read date as a plain string;
/// the vendor always zero-pads its dates.
pub fn summarize_history(entries: &[RawHistoryEntry], year: i32) -> Option<HistorySummary> {
    let latest = entries
        .iter()
        .max_by(|a, b| read_date(a).cmp(read_date(b)))?;

    let annual_usage = total(entries.iter().map(|e| clean_amount(e.waterquantity.as_ref())));
    let annual_bill = total(entries.iter().map(|e| clean_amount(e.arrears.as_ref())));

    let latest_reading_value = latest
        .currentperiod
        .as_ref()
        .map(VendorValue::as_text)
        .filter(|v| !v.trim().is_empty())
        .unwrap_or_else(|| NO_DATA.to_string());
    let latest_reading_time = non_empty(latest.lastreaddate.as_deref())
        .map(canonical_date)
        .unwrap_or_else(|| NO_DATA.to_string());

    debug!(year, entries = entries.len(), annual_usage, annual_bill, "bill history summarized");

    Some(HistorySummary {
        year: Some(year),
        current_usage: clean_amount(latest.waterquantity.as_ref()),
        current_bill: clean_amount(latest.arrears.as_ref()),
        annual_usage,
        annual_bill,
        latest_reading_value,
        latest_reading_time,
    })
}

/// Monthly series over the current and previous year, newest first, capped at
/// [`MAX_MONTHS`], plus the previous year's total.
pub fn summarize_trends(years: &[RawTrendYear], current_year: i32) -> TrendSummary {
    let previous_year = current_year - 1;

    let mut monthly_usage: Vec<MonthlyUsage> = years
        .iter()
        .filter_map(|y| {
            let label = y.year.as_ref().and_then(year_label)?;
            (label == current_year || label == previous_year).then_some((label, y))
        })
        .flat_map(|(label, y)| {
            y.list.iter().filter_map(move |m| {
                let month = month_key(m.billdate.as_deref()?, label)?;
                Some(MonthlyUsage {
                    month,
                    usage: clean_amount(m.waterquantity.as_ref()),
                })
            })
        })
        .collect();

    monthly_usage.sort_by(|a, b| b.month.cmp(&a.month));
    monthly_usage.truncate(MAX_MONTHS);

    let previous_prefix = format!("{previous_year:04}");
    let last_year_total_usage = total(
        monthly_usage
            .iter()
            .filter(|m| m.month.starts_with(&previous_prefix))
            .map(|m| m.usage),
    );

    TrendSummary {
        monthly_usage,
        last_year_total_usage,
    }
}

/// Builds the `YYYYMM` key of a billing period.
///
/// Accepts `2024年03月`, `2024-3`, `202403` or a bare month such as `3月`, in
/// which case the year comes from the entry's year label.
fn month_key(billdate: &str, label_year: i32) -> Option<String> {
    let runs: Vec<&str> = billdate
        .split(|c: char| !c.is_ascii_digit())
        .filter(|r| !r.is_empty())
        .collect();

    let (year, month): (i32, u32) = match runs.as_slice() {
        [year, month, ..] => (year.parse().ok()?, month.parse().ok()?),
        [run] if run.len() == 6 || run.len() == 8 => (run[..4].parse().ok()?, run[4..6].parse().ok()?),
        [run] if run.len() <= 2 => (label_year, run.parse().ok()?),
        _ => return None,
    };

    if !(1000..=9999).contains(&year) || !(1..=12).contains(&month) {
        return None;
    }
    Some(format!("{year:04}{month:02}"))
}

fn year_label(value: &VendorValue) -> Option<i32> {
    match value {
        VendorValue::Number(n) if n.fract() == 0.0 => Some(*n as i32),
        VendorValue::Number(_) => None,
        VendorValue::Text(s) => {
            let digits: String = s.trim().chars().take_while(|c| c.is_ascii_digit()).collect();
            digits.parse().ok()
        }
    }
}

fn read_date(entry: &RawHistoryEntry) -> &str {
    entry.lastreaddate.as_deref().unwrap_or("")
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

/// Rounded sum, never below zero even when refunds outweigh charges.
fn total(values: impl Iterator<Item = f64>) -> f64 {
    round2(values.sum::<f64>()).max(0.0)
}
