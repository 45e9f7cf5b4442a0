//! Framework-neutral WASM <-> JavaScript bridge.

use serde::Deserialize;
use serde_wasm_bindgen::{from_value, to_value};
use wasm_bindgen::prelude::*;

use onco_timeline_core::{
    map_overlays, nest_adjuvants, normalize_str, DateOrdinal, LabMeasurement, NestedTreatments,
    OrphanPolicy, ReconcileConfig, TherapyKind, TimelineError, TreatmentRecord, TreatmentStage,
    TrendSeries,
};

/// Partial config from JavaScript; absent fields keep their defaults.
#[derive(Debug, Default, Deserialize)]
struct JsReconcileConfig {
    #[serde(default)]
    adjuvant_keyword: Option<String>,
    #[serde(default)]
    orphan_policy: Option<OrphanPolicy>,
    #[serde(default)]
    trend_change_percent: Option<f64>,
    #[serde(default)]
    as_of: Option<String>,
}

impl TryFrom<JsReconcileConfig> for ReconcileConfig {
    type Error = String;

    fn try_from(cfg: JsReconcileConfig) -> Result<Self, Self::Error> {
        let mut base = ReconcileConfig::default();
        if let Some(keyword) = cfg.adjuvant_keyword {
            base.adjuvant_keyword = keyword;
        }
        if let Some(policy) = cfg.orphan_policy {
            base.orphan_policy = policy;
        }
        if let Some(percent) = cfg.trend_change_percent {
            base.trend_change_percent = percent;
        }
        if let Some(as_of) = cfg.as_of {
            match normalize_str(&as_of) {
                DateOrdinal::At(instant) => base.as_of = Some(instant),
                _ => return Err(format!("as_of is not a calendar date: {as_of}")),
            }
        }
        Ok(base)
    }
}

fn read_config(config: Option<JsValue>) -> Result<ReconcileConfig, JsValue> {
    let Some(js_cfg) = config.filter(|value| !value.is_undefined() && !value.is_null()) else {
        return Ok(ReconcileConfig::default());
    };
    let cfg: JsReconcileConfig = from_value(js_cfg)
        .map_err(|err| JsValue::from_str(&format!("Could not read config: {err}")))?;
    ReconcileConfig::try_from(cfg).map_err(|err| JsValue::from_str(&err))
}

/// Full pipeline: patient-data JSON in, `PatientTimeline` out.
#[wasm_bindgen]
pub fn summarize_patient(
    patient_data: JsValue,
    config: Option<JsValue>,
) -> Result<JsValue, JsValue> {
    #[cfg(target_arch = "wasm32")]
    console_error_panic_hook::set_once();

    let patient_value = from_value::<serde_json::Value>(patient_data)
        .map_err(|err| JsValue::from_str(&format!("Could not read patient JSON: {err}")))?;
    let cfg = read_config(config)?;

    let timeline = onco_timeline_ingest::summarize_patient_value(&patient_value, &cfg)
        .map_err(|err| JsValue::from_str(&format_timeline_error(err)))?;

    to_value(&timeline)
        .map_err(|err| JsValue::from_str(&format!("Could not serialize timeline: {err}")))
}

/// Nests adjuvant courses under main lines for an already-flattened list.
#[wasm_bindgen]
pub fn nest_treatments(records: JsValue, config: Option<JsValue>) -> Result<JsValue, JsValue> {
    #[cfg(target_arch = "wasm32")]
    console_error_panic_hook::set_once();

    let records: Vec<TreatmentRecord> = from_value(records)
        .map_err(|err| JsValue::from_str(&format!("Could not read treatments: {err}")))?;
    let cfg = read_config(config)?;

    let nested = nest_classified(records, &cfg);
    to_value(&nested)
        .map_err(|err| JsValue::from_str(&format!("Could not serialize treatments: {err}")))
}

/// Snaps treatment stages onto the sample dates of one trend series.
#[wasm_bindgen]
pub fn map_trend_overlays(series: JsValue, stages: JsValue) -> Result<JsValue, JsValue> {
    #[cfg(target_arch = "wasm32")]
    console_error_panic_hook::set_once();

    let points: Vec<LabMeasurement> = from_value(series)
        .map_err(|err| JsValue::from_str(&format!("Could not read trend series: {err}")))?;
    let stages: Vec<TreatmentStage> = from_value(stages)
        .map_err(|err| JsValue::from_str(&format!("Could not read treatment stages: {err}")))?;

    let plan = map_overlays(&TrendSeries::new(points), &stages);
    to_value(&plan)
        .map_err(|err| JsValue::from_str(&format!("Could not serialize overlays: {err}")))
}

// Callers from JS only send labels, so the kind is always re-derived here.
fn nest_classified(mut records: Vec<TreatmentRecord>, cfg: &ReconcileConfig) -> NestedTreatments {
    for record in &mut records {
        record.kind = TherapyKind::classify(&record.line_label, &cfg.adjuvant_keyword);
    }
    nest_adjuvants(&records, cfg)
}

fn format_timeline_error(err: TimelineError) -> String {
    format!("Timeline error: {err}")
}
