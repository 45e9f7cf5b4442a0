//! Normalization of the date shapes found in extracted records.

use chrono::{DateTime, Duration, Month, NaiveDate, NaiveDateTime, NaiveTime};
use serde::{Deserialize, Serialize};
use tracing::debug;

const DATETIME_FORMATS: [&str; 3] = [
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M",
];

const DATE_FORMATS: [&str; 9] = [
    "%Y-%m-%d",
    "%Y/%m/%d",
    "%m/%d/%Y",
    "%B %d, %Y",
    "%b %d, %Y",
    "%B %d %Y",
    "%d %B %Y",
    "%d %b %Y",
    "%d-%b-%Y",
];

/// A date as it arrives from upstream: free text or epoch milliseconds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RawDate {
    Millis(i64),
    Text(String),
}

impl RawDate {
    pub fn is_ongoing(&self) -> bool {
        matches!(self, RawDate::Text(text) if text.trim().eq_ignore_ascii_case("ongoing"))
    }

    pub fn is_blank(&self) -> bool {
        matches!(self, RawDate::Text(text) if text.trim().is_empty())
    }
}

impl From<&str> for RawDate {
    fn from(value: &str) -> Self {
        RawDate::Text(value.to_string())
    }
}

impl From<String> for RawDate {
    fn from(value: String) -> Self {
        RawDate::Text(value)
    }
}

/// Comparable position of a date on the timeline.
///
/// Ordering is `Unparsed < At(_) < Now`, so malformed dates sink to the bottom
/// and "current" entries float to the top.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum DateOrdinal {
    /// Epoch sentinel for anything that could not be read.
    Unparsed,
    At(NaiveDateTime),
    Now,
}

impl DateOrdinal {
    pub fn is_parsed(self) -> bool {
        !matches!(self, DateOrdinal::Unparsed)
    }

    /// Concrete instant, resolving `Now` against `reference`.
    pub fn instant(self, reference: NaiveDateTime) -> Option<NaiveDateTime> {
        match self {
            DateOrdinal::Unparsed => None,
            DateOrdinal::At(instant) => Some(instant),
            DateOrdinal::Now => Some(reference),
        }
    }

    /// Absolute distance between two ordinals, if both are placed in time.
    pub fn distance(self, other: DateOrdinal, reference: NaiveDateTime) -> Option<Duration> {
        let delta = self.instant(reference)? - other.instant(reference)?;
        Some(delta.abs())
    }

    pub fn date(self) -> Option<NaiveDate> {
        match self {
            DateOrdinal::At(instant) => Some(instant.date()),
            _ => None,
        }
    }
}

impl From<NaiveDate> for DateOrdinal {
    fn from(date: NaiveDate) -> Self {
        DateOrdinal::At(date.and_time(NaiveTime::MIN))
    }
}

pub fn normalize(raw: &RawDate) -> DateOrdinal {
    match raw {
        RawDate::Text(text) => normalize_str(text),
        RawDate::Millis(millis) => match DateTime::from_timestamp_millis(*millis) {
            Some(instant) => DateOrdinal::At(instant.naive_utc()),
            None => {
                debug!(millis, "timestamp out of range, using epoch sentinel");
                DateOrdinal::Unparsed
            }
        },
    }
}

/// Reads "current" markers, "Month YYYY" labels and common calendar formats.
///
/// Never fails: anything unrecognised becomes [`DateOrdinal::Unparsed`].
pub fn normalize_str(raw: &str) -> DateOrdinal {
    let text = raw.trim();

    if text.to_lowercase().contains("current") {
        return DateOrdinal::Now;
    }

    if let Some(month_start) = parse_month_year(text) {
        return DateOrdinal::At(month_start);
    }

    if let Some(instant) = parse_calendar(text) {
        return DateOrdinal::At(instant);
    }

    debug!(raw, "unparseable date, using epoch sentinel");
    DateOrdinal::Unparsed
}

fn parse_month_year(text: &str) -> Option<NaiveDateTime> {
    let mut parts = text.split_whitespace();
    let (month, year) = (parts.next()?, parts.next()?);
    if parts.next().is_some() || !is_year(year) {
        return None;
    }
    let month: Month = month.trim_end_matches(',').parse().ok()?;
    let year: i32 = year.parse().ok()?;
    NaiveDate::from_ymd_opt(year, month.number_from_month(), 1).map(midnight)
}

fn parse_calendar(text: &str) -> Option<NaiveDateTime> {
    if let Ok(instant) = DateTime::parse_from_rfc3339(text) {
        return Some(instant.naive_utc());
    }

    for format in DATETIME_FORMATS {
        if let Ok(instant) = NaiveDateTime::parse_from_str(text, format) {
            return Some(instant);
        }
    }

    for format in DATE_FORMATS {
        if let Ok(date) = NaiveDate::parse_from_str(text, format) {
            return Some(midnight(date));
        }
    }

    parse_partial(text).map(midnight)
}

// "YYYY-MM" and bare "YYYY".
fn parse_partial(text: &str) -> Option<NaiveDate> {
    if is_year(text) {
        return NaiveDate::from_ymd_opt(text.parse().ok()?, 1, 1);
    }
    let (year, month) = text.split_once('-')?;
    if !is_year(year) || month.is_empty() || month.len() > 2 {
        return None;
    }
    if !month.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    NaiveDate::from_ymd_opt(year.parse().ok()?, month.parse().ok()?, 1)
}

fn is_year(text: &str) -> bool {
    text.len() == 4 && text.bytes().all(|b| b.is_ascii_digit())
}

fn midnight(date: NaiveDate) -> NaiveDateTime {
    date.and_time(NaiveTime::MIN)
}
