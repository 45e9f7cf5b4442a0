//! Core reconciliation logic for oncology treatment lines, lab trends and staging.
//!
//! Everything in this crate is a pure function over already-fetched data. The
//! reconciliation steps never fail: degraded paths are reported through
//! explicit enum variants and `tracing` diagnostics instead of errors, so a
//! dashboard always has something to draw.

pub mod current;
pub mod date;
pub mod nesting;
pub mod overlay;
pub mod pipeline;
pub mod staging;
pub mod trend;

pub use current::{resolve_current, CurrentTreatment, ResolutionStrategy, ResolvedTreatment};
pub use date::{normalize, normalize_str, DateOrdinal, RawDate};
pub use nesting::{nest_adjuvants, AdjuvantPlacement, NestedTreatments};
pub use overlay::{
    map_overlays, Overlay, OverlayPlan, SkipReason, SkippedStage, Tick, TickKind, TreatmentStage,
};
pub use pipeline::{reconcile, BiomarkerInput, PatientRecords};
pub use staging::{
    resolve_current_staging, ResolvedStaging, StageEvent, Staging, StagingStrategy,
};
pub use trend::{
    build_trend, trend_direction, LabEntry, LabMeasurement, LabStatus, LabValue, TrendDirection,
    TrendSeries,
};

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};

/// Tunables for reconciliation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ReconcileConfig {
    /// Case-insensitive label substring that marks a record as adjuvant therapy.
    pub adjuvant_keyword: String,
    /// What happens to adjuvant therapies when no main line exists.
    pub orphan_policy: OrphanPolicy,
    /// Percentage change between the last two samples that counts as movement.
    pub trend_change_percent: f64,
    /// Instant used for "current" dates when a distance is needed. Wall clock when unset.
    #[serde(default)]
    pub as_of: Option<NaiveDateTime>,
}

impl Default for ReconcileConfig {
    fn default() -> Self {
        Self {
            adjuvant_keyword: "adjuvant".to_string(),
            orphan_policy: OrphanPolicy::Surface,
            trend_change_percent: 5.0,
            as_of: None,
        }
    }
}

impl ReconcileConfig {
    pub fn reference_instant(&self) -> NaiveDateTime {
        self.as_of.unwrap_or_else(|| Utc::now().naive_utc())
    }
}

/// Handling of adjuvant therapies that have no main line to attach to.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum OrphanPolicy {
    /// Keep them in a separate bucket so the UI can show them.
    #[default]
    Surface,
    Drop,
}

/// Main line of therapy versus an adjuvant course nested under one.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "snake_case")]
pub enum TherapyKind {
    #[default]
    Main,
    Adjuvant,
}

impl TherapyKind {
    /// Classifies a free-text line label. This is the only place the label is inspected.
    pub fn classify(label: &str, keyword: &str) -> Self {
        let keyword = keyword.trim();
        if !keyword.is_empty() && label.to_lowercase().contains(&keyword.to_lowercase()) {
            TherapyKind::Adjuvant
        } else {
            TherapyKind::Main
        }
    }
}

/// Upper bound of a treatment's date range.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndBound {
    /// No end date or "Ongoing".
    Open,
    At(DateOrdinal),
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct CycleProgress {
    pub completed: Option<u32>,
    pub planned: Option<u32>,
    pub display_text: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Toxicity {
    pub grade: Option<String>,
    pub name: Option<String>,
    pub display_tag: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct TreatmentOutcome {
    pub response_tag: Option<String>,
    pub details: Option<String>,
}

/// One line of therapy or one adjuvant course.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct TreatmentRecord {
    pub line_label: String,
    pub line_number: Option<String>,
    #[serde(default)]
    pub kind: TherapyKind,
    pub primary_drug_name: Option<String>,
    #[serde(default)]
    pub status_badge: String,
    pub start_date: Option<RawDate>,
    pub end_date: Option<RawDate>,
    pub regimen: Option<String>,
    pub cycles: Option<CycleProgress>,
    #[serde(default)]
    pub toxicities: Vec<Toxicity>,
    pub outcome: Option<TreatmentOutcome>,
    pub discontinuation_reason: Option<String>,
    /// Populated on main lines only.
    #[serde(default)]
    pub adjuvant_therapies: Vec<TreatmentRecord>,
    /// How a nested adjuvant was attached to its parent line.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub placement: Option<AdjuvantPlacement>,
}

impl TreatmentRecord {
    pub fn start(&self) -> DateOrdinal {
        self.start_date
            .as_ref()
            .map(normalize)
            .unwrap_or(DateOrdinal::Unparsed)
    }

    pub fn end(&self) -> EndBound {
        match &self.end_date {
            None => EndBound::Open,
            Some(raw) if raw.is_blank() || raw.is_ongoing() => EndBound::Open,
            Some(raw) => EndBound::At(normalize(raw)),
        }
    }

    /// True when the end date is literally "Ongoing".
    pub fn is_ongoing(&self) -> bool {
        self.end_date.as_ref().is_some_and(RawDate::is_ongoing)
    }

    /// Line number when it is made only of digits ("2", not "Adjuvant" or "2b").
    pub fn numeric_line(&self) -> Option<u64> {
        let line = self.line_number.as_deref()?.trim();
        if line.is_empty() || !line.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }
        line.parse().ok()
    }

    /// Whether `instant` lies in `[start, end]`, with an open end unbounded above.
    ///
    /// A record without a parseable start never covers anything.
    pub fn covers(&self, instant: DateOrdinal) -> bool {
        let start = self.start();
        if !start.is_parsed() || !instant.is_parsed() || instant < start {
            return false;
        }
        match self.end() {
            EndBound::Open => true,
            EndBound::At(end) => end.is_parsed() && instant <= end,
        }
    }
}

/// Trend, direction and chart overlays for one biomarker.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BiomarkerTimeline {
    pub panel: String,
    pub name: String,
    pub unit: Option<String>,
    pub reference_range: Option<String>,
    pub series: TrendSeries,
    pub latest: Option<LabMeasurement>,
    pub direction: TrendDirection,
    pub overlays: OverlayPlan,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct LabSummary {
    /// Biomarkers whose most recent reading is outside the normal range.
    pub total_abnormal: usize,
    pub last_updated: Option<NaiveDate>,
}

impl LabSummary {
    pub fn from_biomarkers(biomarkers: &[BiomarkerTimeline]) -> Self {
        let total_abnormal = biomarkers
            .iter()
            .filter_map(|biomarker| biomarker.latest.as_ref())
            .filter(|latest| latest.status.is_abnormal())
            .count();
        let last_updated = biomarkers
            .iter()
            .filter_map(|biomarker| biomarker.latest.as_ref())
            .map(|latest| latest.date)
            .max();
        Self {
            total_abnormal,
            last_updated,
        }
    }
}

/// Render-ready result for one patient.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PatientTimeline {
    pub generated_at: DateTime<Utc>,
    pub mrn: Option<String>,
    pub treatment_lines: Vec<TreatmentRecord>,
    #[serde(default)]
    pub orphaned_adjuvants: Vec<TreatmentRecord>,
    pub current_treatment: Option<CurrentTreatment>,
    pub current_staging: Option<ResolvedStaging>,
    pub biomarkers: Vec<BiomarkerTimeline>,
    pub summary: LabSummary,
}

impl PatientTimeline {
    pub fn treatment_lines(&self) -> &[TreatmentRecord] {
        &self.treatment_lines
    }

    pub fn biomarker(&self, name: &str) -> Option<&BiomarkerTimeline> {
        self.biomarkers
            .iter()
            .find(|biomarker| biomarker.name.eq_ignore_ascii_case(name))
    }
}

/// Errors raised at the ingestion boundary. Reconciliation itself never fails.
#[derive(Debug, thiserror::Error)]
pub enum TimelineError {
    #[error("input is missing the minimum required data")]
    MissingData,
    #[error("could not read input: {0}")]
    Parse(String),
    #[error("other error: {0}")]
    Other(String),
}
