//! Timestamp text conversion and date-part extraction
//!
//! Timestamps are stored as microseconds since the Unix epoch (UTC).

use crate::error::{Error, Result};
use chrono::{DateTime, Datelike, NaiveDate, NaiveDateTime, Timelike, Utc};
use serde::{Deserialize, Serialize};

const MICROS_PER_SECOND: u64 = 1_000_000;

/// Render a timestamp as `YYYY-MM-DD HH:MM:SS.ffffff+00`
pub fn format(micros: u64) -> String {
    match to_datetime(micros) {
        Some(dt) => dt.format("%Y-%m-%d %H:%M:%S%.6f+00").to_string(),
        None => micros.to_string(),
    }
}

/// Parse a timestamp or date literal
///
/// Accepts `YYYY-MM-DD`, `YYYY-MM-DD HH:MM:SS` and an optional fractional
/// second part, with an optional `+00` suffix.
pub fn parse(text: &str) -> Result<u64> {
    let trimmed = text.trim();
    let body = trimmed.strip_suffix("+00").unwrap_or(trimmed);

    let parsed = match NaiveDateTime::parse_from_str(body, "%Y-%m-%d %H:%M:%S%.f")
        .or_else(|_| NaiveDateTime::parse_from_str(body, "%Y-%m-%d %H:%M:%S"))
    {
        Ok(dt) => Some(dt),
        Err(_) => NaiveDate::parse_from_str(body, "%Y-%m-%d")
            .ok()
            .and_then(|d| d.and_hms_opt(0, 0, 0)),
    };
    let parsed =
        parsed.ok_or_else(|| Error::invalid_input(format!("invalid timestamp '{text}'")))?;

    let micros = parsed.and_utc().timestamp_micros();
    u64::try_from(micros)
        .map_err(|_| Error::out_of_range(format!("timestamp '{text}' precedes the epoch")))
}

fn to_datetime(micros: u64) -> Option<DateTime<Utc>> {
    let secs = i64::try_from(micros / MICROS_PER_SECOND).ok()?;
    let nanos = ((micros % MICROS_PER_SECOND) * 1_000) as u32;
    DateTime::from_timestamp(secs, nanos)
}

/// Field extracted by `EXTRACT` / `date_part`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DatePart {
    /// Century (1-based)
    Century,
    /// Decade
    Decade,
    /// Year
    Year,
    /// Quarter of the year (1-4)
    Quarter,
    /// Month (1-12)
    Month,
    /// ISO week of the year
    Week,
    /// Day of the month
    Day,
    /// Day of the week (Sunday = 0)
    DayOfWeek,
    /// Day of the year (1-366)
    DayOfYear,
    /// Hour (0-23)
    Hour,
    /// Minute (0-59)
    Minute,
    /// Seconds including the fractional part
    Second,
    /// Seconds in milliseconds including the fraction
    Millisecond,
    /// Seconds in microseconds
    Microsecond,
    /// Millennium
    Millennium,
    /// Seconds since the epoch
    Epoch,
}

impl DatePart {
    /// Parse a date-part keyword (case-insensitive, singular or plural)
    pub fn parse(name: &str) -> Result<Self> {
        let lowered = name.trim().to_ascii_lowercase();
        let part = match lowered.trim_end_matches('s') {
            "century" | "centurie" => DatePart::Century,
            "decade" => DatePart::Decade,
            "year" => DatePart::Year,
            "quarter" => DatePart::Quarter,
            "month" => DatePart::Month,
            "week" => DatePart::Week,
            "day" => DatePart::Day,
            "dow" => DatePart::DayOfWeek,
            "doy" => DatePart::DayOfYear,
            "hour" => DatePart::Hour,
            "minute" => DatePart::Minute,
            "second" => DatePart::Second,
            "millisecond" => DatePart::Millisecond,
            "microsecond" => DatePart::Microsecond,
            "millennium" | "millennia" => DatePart::Millennium,
            "epoch" => DatePart::Epoch,
            _ => return Err(Error::invalid_input(format!("unknown date part '{name}'"))),
        };
        Ok(part)
    }
}

/// Extract a date part from a timestamp
pub fn extract(part: DatePart, micros: u64) -> Result<f64> {
    let dt = to_datetime(micros)
        .ok_or_else(|| Error::out_of_range(format!("timestamp {micros} cannot be decoded")))?;
    let year = dt.year();
    let frac_micros = (micros % MICROS_PER_SECOND) as f64;
    let value = match part {
        DatePart::Century => ((year + 99) / 100) as f64,
        DatePart::Decade => (year / 10) as f64,
        DatePart::Millennium => ((year + 999) / 1000) as f64,
        DatePart::Year => year as f64,
        DatePart::Quarter => ((dt.month() - 1) / 3 + 1) as f64,
        DatePart::Month => dt.month() as f64,
        DatePart::Week => dt.iso_week().week() as f64,
        DatePart::Day => dt.day() as f64,
        DatePart::DayOfWeek => dt.weekday().num_days_from_sunday() as f64,
        DatePart::DayOfYear => dt.ordinal() as f64,
        DatePart::Hour => dt.hour() as f64,
        DatePart::Minute => dt.minute() as f64,
        DatePart::Second => dt.second() as f64 + frac_micros / 1_000_000.0,
        DatePart::Millisecond => dt.second() as f64 * 1_000.0 + frac_micros / 1_000.0,
        DatePart::Microsecond => dt.second() as f64 * 1_000_000.0 + frac_micros,
        DatePart::Epoch => micros as f64 / 1_000_000.0,
    };
    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_format_and_parse() {
        let micros = parse("2017-05-31 12:34:56.250000+00").unwrap();
        assert_eq!(format(micros), "2017-05-31 12:34:56.250000+00");
        assert_eq!(parse("1970-01-01").unwrap(), 0);
        assert_eq!(parse("1970-01-01 00:00:01").unwrap(), 1_000_000);
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!(matches!(parse("yesterday"), Err(Error::InvalidInput(_))));
        assert!(matches!(parse("1960-01-01"), Err(Error::OutOfRange(_))));
    }

    #[test]
    fn test_extract_parts() {
        let micros = parse("2016-02-29 23:59:58.5").unwrap();
        assert_eq!(extract(DatePart::Year, micros).unwrap(), 2016.0);
        assert_eq!(extract(DatePart::Month, micros).unwrap(), 2.0);
        assert_eq!(extract(DatePart::Day, micros).unwrap(), 29.0);
        assert_eq!(extract(DatePart::Quarter, micros).unwrap(), 1.0);
        assert_eq!(extract(DatePart::DayOfYear, micros).unwrap(), 60.0);
        assert_eq!(extract(DatePart::Century, micros).unwrap(), 21.0);
        assert_relative_eq!(extract(DatePart::Second, micros).unwrap(), 58.5);
        assert_relative_eq!(extract(DatePart::Millisecond, micros).unwrap(), 58_500.0);
    }

    #[test]
    fn test_date_part_keywords() {
        assert_eq!(DatePart::parse("YEARS").unwrap(), DatePart::Year);
        assert_eq!(DatePart::parse("dow").unwrap(), DatePart::DayOfWeek);
        assert!(DatePart::parse("fortnight").is_err());
    }
}
