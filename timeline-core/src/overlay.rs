//! Snaps treatment-stage date ranges onto the sample points of a lab trend.
//!
//! Trend charts use the sample dates as categorical x positions, so a shaded
//! region can only start and end on a real sample. Each stage range is mapped
//! to the nearest samples inside it, widened to at least two samples when the
//! series allows it.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::{normalize, DateOrdinal, RawDate, TrendSeries};

/// Display-only date range painted behind a trend chart.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct TreatmentStage {
    pub label: String,
    pub start_date: Option<RawDate>,
    pub end_date: Option<RawDate>,
    pub color: Option<String>,
    pub border_color: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Overlay {
    pub label: String,
    pub color: Option<String>,
    pub border_color: Option<String>,
    /// Sample date where the region starts.
    pub x1: NaiveDate,
    /// Sample date where the region ends.
    pub x2: NaiveDate,
    pub start_index: usize,
    pub end_index: usize,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum TickKind {
    Start,
    End,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Tick {
    pub date: NaiveDate,
    pub label: String,
    pub color: Option<String>,
    pub kind: TickKind,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    MissingDate,
    UnparseableDate,
    OutsideSeries,
    EmptySeries,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SkippedStage {
    pub label: String,
    pub reason: SkipReason,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct OverlayPlan {
    pub overlays: Vec<Overlay>,
    pub ticks: Vec<Tick>,
    /// Stages that produced nothing, kept for diagnostics.
    pub skipped: Vec<SkippedStage>,
}

pub fn map_overlays(series: &TrendSeries, stages: &[TreatmentStage]) -> OverlayPlan {
    let mut plan = OverlayPlan::default();

    for stage in stages {
        match snap_stage(series, stage) {
            Ok(overlay) => {
                plan.ticks.push(Tick {
                    date: overlay.x1,
                    label: overlay.label.clone(),
                    color: overlay.color.clone(),
                    kind: TickKind::Start,
                });
                if overlay.start_index != overlay.end_index {
                    plan.ticks.push(Tick {
                        date: overlay.x2,
                        label: overlay.label.clone(),
                        color: overlay.color.clone(),
                        kind: TickKind::End,
                    });
                }
                plan.overlays.push(overlay);
            }
            Err(reason) => {
                debug!(label = %stage.label, ?reason, "treatment stage not drawn");
                plan.skipped.push(SkippedStage {
                    label: stage.label.clone(),
                    reason,
                });
            }
        }
    }

    plan
}

fn snap_stage(series: &TrendSeries, stage: &TreatmentStage) -> Result<Overlay, SkipReason> {
    let points = series.points();
    let (Some(first), Some(last)) = (points.first(), points.last()) else {
        return Err(SkipReason::EmptySeries);
    };

    let (start, end) = stage_bounds(stage)?;
    if end < DateOrdinal::from(first.date) || start > DateOrdinal::from(last.date) {
        return Err(SkipReason::OutsideSeries);
    }

    let last_index = points.len() - 1;
    let mut x1 = points
        .iter()
        .position(|point| DateOrdinal::from(point.date) >= start)
        .unwrap_or(last_index);
    let mut x2 = points
        .iter()
        .rposition(|point| DateOrdinal::from(point.date) <= end)
        .unwrap_or(0);

    // Zero-width regions are not rendered; widen forward when possible.
    if x1 == x2 && points.len() > 1 {
        if x2 < last_index {
            x2 += 1;
        } else {
            x1 -= 1;
        }
    }

    if x1 > x2 {
        std::mem::swap(&mut x1, &mut x2);
    }

    Ok(Overlay {
        label: stage.label.clone(),
        color: stage.color.clone(),
        border_color: stage.border_color.clone(),
        x1: points[x1].date,
        x2: points[x2].date,
        start_index: x1,
        end_index: x2,
    })
}

// An "Ongoing" stage end runs up to now.
fn stage_bounds(stage: &TreatmentStage) -> Result<(DateOrdinal, DateOrdinal), SkipReason> {
    let (Some(start), Some(end)) = (&stage.start_date, &stage.end_date) else {
        return Err(SkipReason::MissingDate);
    };

    let start = normalize(start);
    let end = if end.is_ongoing() {
        DateOrdinal::Now
    } else {
        normalize(end)
    };

    if start.is_parsed() && end.is_parsed() {
        Ok((start, end))
    } else {
        Err(SkipReason::UnparseableDate)
    }
}
