//! Numeric safety utilities shared by every recovery model
//!
//! These helpers are total: they never panic and never return `NaN`. Every model
//! routes nullable inputs through [`safe_number`], bounds them with [`clamp`],
//! and measures elapsed time with [`hours_between`], so a malformed row degrades
//! to a neutral default instead of poisoning a score.
//!
//! Dates arrive from storage as strings (`YYYY-MM-DD`, `YYYY-MM-DDTHH:MM:SS` or
//! RFC 3339). [`parse_timestamp`] is the single place they are interpreted.

use chrono::{DateTime, Duration, NaiveDate, NaiveDateTime};

/// Bound `value` to `[min, max]`, returning `min` for `NaN`.
pub fn clamp(value: f64, min: f64, max: f64) -> f64 {
    if value.is_nan() {
        return min;
    }
    value.max(min).min(max)
}

/// Resolve a nullable numeric field, falling back for `None` and `NaN`.
pub fn safe_number<T>(value: Option<T>, fallback: f64) -> f64
where
    T: Into<f64>,
{
    match value.map(Into::into) {
        Some(v) if !v.is_nan() => v,
        _ => fallback,
    }
}

/// Parse a storage date or timestamp into a naive UTC timestamp.
///
/// Date-only values resolve to midnight. Returns `None` for anything unparsable.
pub fn parse_timestamp(value: &str) -> Option<NaiveDateTime> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return None;
    }

    if let Ok(dt) = DateTime::parse_from_rfc3339(trimmed) {
        return Some(dt.naive_utc());
    }

    for format in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M"] {
        if let Ok(dt) = NaiveDateTime::parse_from_str(trimmed, format) {
            return Some(dt);
        }
    }

    parse_date(trimmed).and_then(|d| d.and_hms_opt(0, 0, 0))
}

/// Latest instant that still belongs to `value` when it marks an as-of point.
///
/// A date-only value covers its whole calendar day, so sessions logged later
/// that day are not future-dated. Timestamps are used as given.
pub fn as_of_horizon(value: &str) -> Option<NaiveDateTime> {
    let trimmed = value.trim();
    if let Ok(day) = NaiveDate::parse_from_str(trimmed, "%Y-%m-%d") {
        return day.and_hms_milli_opt(23, 59, 59, 999);
    }
    parse_timestamp(trimmed)
}

/// Parse the calendar-date part of a storage value.
pub fn parse_date(value: &str) -> Option<NaiveDate> {
    let trimmed = value.trim();
    let date_part = trimmed.get(..10).unwrap_or(trimmed);
    NaiveDate::parse_from_str(date_part, "%Y-%m-%d").ok()
}

/// Elapsed hours from `from` to `to`; zero when either side is unparsable or
/// `to` precedes `from`.
pub fn hours_between(from: &str, to: &str) -> f64 {
    match (parse_timestamp(from), parse_timestamp(to)) {
        (Some(a), Some(b)) => elapsed_hours(a, b),
        _ => 0.0,
    }
}

/// Elapsed hours between two parsed timestamps, never negative.
pub fn elapsed_hours(from: NaiveDateTime, to: NaiveDateTime) -> f64 {
    let millis = (to - from).num_milliseconds() as f64;
    let hours = millis / 3_600_000.0;
    if hours.is_nan() || hours < 0.0 {
        0.0
    } else {
        hours
    }
}

/// Express `value` as a percentage of `max_possible`, bounded to `[0, 100]`.
pub fn normalize_to_100(value: f64, max_possible: f64) -> f64 {
    if !value.is_finite() || !max_possible.is_finite() || max_possible <= 0.0 {
        return 0.0;
    }
    clamp(value / max_possible * 100.0, 0.0, 100.0)
}

/// Round and clamp a real-valued score into the `0..=100` integer range.
pub fn to_score(value: f64) -> u8 {
    clamp(value.round(), 0.0, 100.0) as u8
}

/// Subtract whole days from a timestamp, saturating at the earliest representable time.
pub fn days_before(ts: NaiveDateTime, days: i64) -> NaiveDateTime {
    ts.checked_sub_signed(Duration::days(days)).unwrap_or(NaiveDateTime::MIN)
}

/// Mean of a slice, zero when empty.
pub fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().sum::<f64>() / values.len() as f64
}
