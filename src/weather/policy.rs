use chrono::{Duration, NaiveDate};

use crate::error::{Error, Result};

/// The archive lags real time; anything newer than this many days ago has
/// to come from the forecast endpoint.
pub const HISTORICAL_EMBARGO_DAYS: i64 = 5;
pub const MAX_FORECAST_DAYS: u32 = 16;
pub const MAX_AGRICULTURAL_DAYS: u32 = 7;
pub const DEFAULT_DAYS: u32 = 7;
pub const MAX_HISTORICAL_RANGE_DAYS: i64 = 365;

pub fn clamp_forecast_days(days: i64) -> u32 {
    days.clamp(1, MAX_FORECAST_DAYS as i64) as u32
}

pub fn clamp_agricultural_days(days: i64) -> u32 {
    days.clamp(1, MAX_AGRICULTURAL_DAYS as i64) as u32
}

/// Most recent date the archive is expected to cover.
pub fn latest_historical_date(today: NaiveDate) -> NaiveDate {
    today - Duration::days(HISTORICAL_EMBARGO_DAYS)
}

pub fn parse_date(value: &str) -> Result<NaiveDate> {
    NaiveDate::parse_from_str(value.trim(), "%Y-%m-%d")
        .map_err(|_| Error::Validation(format!("Invalid date '{value}'. Use YYYY-MM-DD.")))
}

/// Reject inverted or overlong ranges and ranges ending inside the embargo
/// window.
pub fn check_historical_range(start: NaiveDate, end: NaiveDate, today: NaiveDate) -> Result<()> {
    if end < start {
        return Err(Error::Validation(
            "End date must not be before start date.".into(),
        ));
    }
    let span = (end - start).num_days();
    if span > MAX_HISTORICAL_RANGE_DAYS {
        return Err(Error::Validation(format!(
            "Date range too large ({span} days). Maximum {MAX_HISTORICAL_RANGE_DAYS} days."
        )));
    }
    let latest = latest_historical_date(today);
    if end > latest {
        return Err(Error::DateOutOfPolicy { latest });
    }
    Ok(())
}
