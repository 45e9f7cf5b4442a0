//! End-to-end reconciliation of one patient's records into a [`PatientTimeline`].

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::{
    build_trend, map_overlays, nest_adjuvants, resolve_current, resolve_current_staging,
    trend_direction, BiomarkerTimeline, LabEntry, LabSummary, PatientTimeline, ReconcileConfig,
    StageEvent, Staging, TherapyKind, TreatmentRecord, TreatmentStage,
};

/// Lab readings for one biomarker, gathered across documents.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct BiomarkerInput {
    pub panel: String,
    pub name: String,
    pub unit: Option<String>,
    pub reference_range: Option<String>,
    #[serde(default)]
    pub entries: Vec<LabEntry>,
}

/// Everything extracted for one patient, before reconciliation.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct PatientRecords {
    pub mrn: Option<String>,
    #[serde(default)]
    pub treatments: Vec<TreatmentRecord>,
    /// Line number the source document flags as current, if any.
    pub current_line_number: Option<String>,
    #[serde(default)]
    pub stages: Vec<TreatmentStage>,
    #[serde(default)]
    pub stage_events: Vec<StageEvent>,
    pub header_staging: Option<Staging>,
    #[serde(default)]
    pub biomarkers: Vec<BiomarkerInput>,
}

/// Runs every reconciliation step. Never fails; see the strategy and skip
/// variants on the result for how each piece was derived.
pub fn reconcile(records: &PatientRecords, config: &ReconcileConfig) -> PatientTimeline {
    let nested = nest_adjuvants(&records.treatments, config);
    let main_lines: Vec<TreatmentRecord> = records
        .treatments
        .iter()
        .filter(|record| record.kind == TherapyKind::Main)
        .cloned()
        .collect();
    let current_treatment = resolve_current(&main_lines, records.current_line_number.as_deref())
        .map(|resolved| {
            let mut current = resolved.to_current();
            if let Some(line) = nested
                .lines
                .iter()
                .find(|line| same_line(line, resolved.record))
            {
                current.record = line.clone();
            }
            current
        });
    let current_staging =
        resolve_current_staging(&records.stage_events, records.header_staging.as_ref());

    let biomarkers: Vec<BiomarkerTimeline> = records
        .biomarkers
        .iter()
        .map(|input| {
            let series = build_trend(&input.entries);
            BiomarkerTimeline {
                panel: input.panel.clone(),
                name: input.name.clone(),
                unit: input.unit.clone(),
                reference_range: input.reference_range.clone(),
                latest: series.latest().cloned(),
                direction: trend_direction(&series, config.trend_change_percent),
                overlays: map_overlays(&series, &records.stages),
                series,
            }
        })
        .collect();
    let summary = LabSummary::from_biomarkers(&biomarkers);

    info!(
        mrn = records.mrn.as_deref().unwrap_or("unknown"),
        lines = nested.lines.len(),
        orphans = nested.orphans.len(),
        biomarkers = biomarkers.len(),
        abnormal = summary.total_abnormal,
        "reconciled patient timeline"
    );

    PatientTimeline {
        generated_at: Utc::now(),
        mrn: records.mrn.clone(),
        treatment_lines: nested.lines,
        orphaned_adjuvants: nested.orphans,
        current_treatment,
        current_staging,
        biomarkers,
        summary,
    }
}

// Equal apart from the adjuvants nesting attached.
fn same_line(nested: &TreatmentRecord, original: &TreatmentRecord) -> bool {
    let strip = |record: &TreatmentRecord| TreatmentRecord {
        adjuvant_therapies: Vec::new(),
        ..record.clone()
    };
    strip(nested) == strip(original)
}
