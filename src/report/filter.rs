use chrono::{Days, Local, NaiveDate, NaiveDateTime, NaiveTime, TimeZone};
use serde::{Deserialize, Serialize};

use crate::error::AuditError;
use crate::types::Condition;

pub const DATE_FORMAT: &str = "%Y-%m-%d";

/// Inclusive calendar-day range as supplied by the caller (`YYYY-MM-DD`).
/// The strings are kept verbatim; they are parsed where they are used.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DateRange {
    pub start: String,
    pub end: String,
}

/// Resolves the caller's optional pair into a concrete range. Empty strings
/// count as absent; no dates at all means the `lookback_days` ending `today`.
pub fn resolve_date_range(
    start: Option<&str>,
    end: Option<&str>,
    today: NaiveDate,
    lookback_days: u32,
) -> Result<DateRange, AuditError> {
    match (present(start), present(end)) {
        (Some(start), Some(end)) => Ok(DateRange {
            start: start.to_string(),
            end: end.to_string(),
        }),
        (None, None) => {
            let from = today
                .checked_sub_days(Days::new(u64::from(lookback_days)))
                .ok_or_else(|| {
                    AuditError::InvalidDateRange(format!(
                        "a {lookback_days}-day lookback from {today} is out of range"
                    ))
                })?;
            Ok(DateRange {
                start: from.format(DATE_FORMAT).to_string(),
                end: today.format(DATE_FORMAT).to_string(),
            })
        }
        _ => Err(AuditError::InvalidDatePairing),
    }
}

/// Trims the value and treats a blank one as absent.
pub fn present(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}

/// True when neither bound was supplied, so the lookback window applies.
pub fn uses_default_window(start: Option<&str>, end: Option<&str>) -> bool {
    present(start).is_none() && present(end).is_none()
}

pub fn parse_day(raw: &str) -> Result<NaiveDate, AuditError> {
    NaiveDate::parse_from_str(raw.trim(), DATE_FORMAT).map_err(|e| {
        AuditError::InvalidDateRange(format!("{raw:?} is not a YYYY-MM-DD date: {e}"))
    })
}

/// `[start 00:00:00, end 23:59:59]` in local time, as epoch milliseconds.
pub fn range_bounds_ms(range: &DateRange) -> Result<(i64, i64), AuditError> {
    let start = parse_day(&range.start)?;
    let end = parse_day(&range.end)?;
    let start_ms = local_epoch_ms(start.and_time(NaiveTime::MIN))?;
    let end_time = NaiveTime::from_hms_opt(23, 59, 59).unwrap_or(NaiveTime::MIN);
    let end_ms = local_epoch_ms(end.and_time(end_time))?;
    Ok((start_ms, end_ms))
}

fn local_epoch_ms(naive: NaiveDateTime) -> Result<i64, AuditError> {
    Local
        .from_local_datetime(&naive)
        .earliest()
        .map(|dt| dt.timestamp_millis())
        .ok_or_else(|| AuditError::InvalidDateRange(format!("{naive} does not exist locally")))
}

/// Keeps conditions whose `updatedAt` falls inside the range, both ends
/// inclusive. Conditions without a timestamp never match. A malformed date
/// fails closed with `InvalidDateRange`.
pub fn filter_conditions_by_date(
    conditions: &[Condition],
    range: &DateRange,
) -> Result<Vec<Condition>, AuditError> {
    let (start_ms, end_ms) = range_bounds_ms(range)?;
    Ok(conditions
        .iter()
        .filter(|c| matches!(c.updated_at, Some(ts) if start_ms <= ts && ts <= end_ms))
        .cloned()
        .collect())
}
