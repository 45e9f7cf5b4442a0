//! Biomarker trend series built from per-document lab extractions.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::{normalize, RawDate};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
pub enum LabStatus {
    Normal,
    Low,
    High,
    Elevated,
    Critical,
    #[default]
    Unknown,
}

impl LabStatus {
    /// Low, High or Critical; `Elevated` is not counted.
    pub fn is_abnormal(self) -> bool {
        matches!(self, LabStatus::Low | LabStatus::High | LabStatus::Critical)
    }
}

impl From<&str> for LabStatus {
    fn from(text: &str) -> Self {
        match text.trim().to_lowercase().as_str() {
            "normal" => LabStatus::Normal,
            "low" => LabStatus::Low,
            "high" => LabStatus::High,
            "elevated" => LabStatus::Elevated,
            "critical" => LabStatus::Critical,
            _ => LabStatus::Unknown,
        }
    }
}

/// One biomarker reading on a known calendar day.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LabMeasurement {
    pub date: NaiveDate,
    pub value: f64,
    pub status: LabStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_context: Option<String>,
}

/// Measurements sorted by ascending date.
///
/// The ordering is established on construction and on deserialization, so
/// holders of a `TrendSeries` never see an unsorted series.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(from = "Vec<LabMeasurement>", into = "Vec<LabMeasurement>")]
pub struct TrendSeries {
    points: Vec<LabMeasurement>,
}

impl TrendSeries {
    pub fn new(mut points: Vec<LabMeasurement>) -> Self {
        points.sort_by_key(|point| point.date);
        Self { points }
    }

    pub fn points(&self) -> &[LabMeasurement] {
        &self.points
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    /// Most recent measurement.
    pub fn latest(&self) -> Option<&LabMeasurement> {
        self.points.last()
    }
}

impl From<Vec<LabMeasurement>> for TrendSeries {
    fn from(points: Vec<LabMeasurement>) -> Self {
        TrendSeries::new(points)
    }
}

impl From<TrendSeries> for Vec<LabMeasurement> {
    fn from(series: TrendSeries) -> Self {
        series.points
    }
}

/// Numeric reading as extracted: a JSON number or text such as "5.2 ng/mL".
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum LabValue {
    Number(f64),
    Text(String),
}

impl LabValue {
    /// Numeric reading, if there is an unambiguous one.
    ///
    /// Text is read from its first token with `,` thousands separators removed
    /// and a trailing unit allowed ("250,000/uL"). Qualified or ranged text
    /// such as "<0.5" or "5-10" yields `None` rather than a guess.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            LabValue::Number(value) => Some(*value).filter(|value| value.is_finite()),
            LabValue::Text(text) => {
                let parsed = parse_reading(text);
                if parsed.is_none() {
                    debug!(text = %text, "lab value is not a plain number");
                }
                parsed
            }
        }
    }
}

fn parse_reading(text: &str) -> Option<f64> {
    let token = text.split_whitespace().next()?;
    let end = token
        .find(|c: char| !(c.is_ascii_digit() || matches!(c, '.' | '-' | ',')))
        .unwrap_or(token.len());
    let digits = strip_thousands(&token[..end])?;
    digits.parse::<f64>().ok().filter(|value| value.is_finite())
}

// "1,200.5" -> "1200.5"; any other comma placement is rejected.
fn strip_thousands(number: &str) -> Option<String> {
    let Some((head, tail)) = number.split_once(',') else {
        return Some(number.to_string());
    };
    let (groups, fraction) = match tail.split_once('.') {
        Some((groups, fraction)) => (groups, Some(fraction)),
        None => (tail, None),
    };
    let head_digits = head.trim_start_matches('-');
    let valid_head = (1..=3).contains(&head_digits.len())
        && head_digits.bytes().all(|b| b.is_ascii_digit());
    let valid_groups = groups
        .split(',')
        .all(|group| group.len() == 3 && group.bytes().all(|b| b.is_ascii_digit()));
    if !valid_head || !valid_groups {
        return None;
    }

    let mut digits = format!("{head}{}", groups.replace(',', ""));
    if let Some(fraction) = fraction {
        digits.push('.');
        digits.push_str(fraction);
    }
    Some(digits)
}

/// Unvalidated reading as it comes out of one document.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LabEntry {
    pub date: Option<RawDate>,
    pub value: Option<LabValue>,
    pub status: Option<String>,
    pub source_context: Option<String>,
}

impl LabEntry {
    fn to_measurement(&self) -> Option<LabMeasurement> {
        let date = normalize(self.date.as_ref()?).date()?;
        let value = self.value.as_ref()?.as_f64()?;
        Some(LabMeasurement {
            date,
            value,
            status: self
                .status
                .as_deref()
                .map(LabStatus::from)
                .unwrap_or_default(),
            source_context: self.source_context.clone(),
        })
    }
}

/// Builds a sorted series from per-document readings.
///
/// Readings without a calendar date or a numeric value are skipped. Duplicate
/// `(date, value)` pairs collapse to the one with the longest source context.
pub fn build_trend(entries: &[LabEntry]) -> TrendSeries {
    let mut kept: Vec<LabMeasurement> = Vec::new();

    for entry in entries {
        let Some(measurement) = entry.to_measurement() else {
            debug!(
                date = ?entry.date,
                value = ?entry.value,
                "skipping lab reading without date or value"
            );
            continue;
        };

        let duplicate = kept.iter_mut().find(|existing| {
            existing.date == measurement.date && existing.value == measurement.value
        });
        match duplicate {
            Some(existing) => {
                if context_len(&measurement) > context_len(existing) {
                    *existing = measurement;
                }
            }
            None => kept.push(measurement),
        }
    }

    TrendSeries::new(kept)
}

fn context_len(measurement: &LabMeasurement) -> usize {
    measurement.source_context.as_deref().map_or(0, str::len)
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum TrendDirection {
    Increasing,
    Decreasing,
    Stable,
    InsufficientData,
}

/// Direction of the last step of the series, by percentage change.
pub fn trend_direction(series: &TrendSeries, threshold_percent: f64) -> TrendDirection {
    let [.., previous, last] = series.points() else {
        return TrendDirection::InsufficientData;
    };
    if previous.value == 0.0 {
        return TrendDirection::InsufficientData;
    }

    let change = (last.value - previous.value) / previous.value * 100.0;
    if change > threshold_percent {
        TrendDirection::Increasing
    } else if change < -threshold_percent {
        TrendDirection::Decreasing
    } else {
        TrendDirection::Stable
    }
}
