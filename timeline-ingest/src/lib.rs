//! Patient-data JSON to `PatientTimeline` converter.
//!
//! The input is the document produced by the extraction backend: one object
//! per patient with a treatment tab, lab panels, treatment stages and the
//! diagnosis staging history. Every section is optional, but at least one must
//! be present. Malformed entries inside a section are skipped, not fatal.

use serde_json::{Map, Value};
use tracing::{debug, info};

use onco_timeline_core::{
    reconcile, BiomarkerInput, CycleProgress, LabEntry, LabValue, PatientRecords,
    PatientTimeline, RawDate, ReconcileConfig, StageEvent, Staging, TherapyKind, TimelineError,
    Toxicity, TreatmentOutcome, TreatmentRecord, TreatmentStage,
};

const SECTIONS: [&str; 5] = [
    "treatment_tab_info_LOT",
    "lab_info",
    "treatment_stages",
    "diagnosis_evolution_timeline",
    "diagnosis_header",
];

/// Summarize patient data from a JSON string.
pub fn summarize_patient_str(
    patient_json: &str,
    config: &ReconcileConfig,
) -> Result<PatientTimeline, TimelineError> {
    let value: Value =
        serde_json::from_str(patient_json).map_err(|err| TimelineError::Parse(err.to_string()))?;
    summarize_patient_value(&value, config)
}

/// Summarize patient data from a `serde_json::Value`.
pub fn summarize_patient_value(
    patient: &Value,
    config: &ReconcileConfig,
) -> Result<PatientTimeline, TimelineError> {
    let records = patient_records_from_value(patient, config)?;
    Ok(reconcile(&records, config))
}

/// Extracts domain records without reconciling them.
pub fn patient_records_from_value(
    patient: &Value,
    config: &ReconcileConfig,
) -> Result<PatientRecords, TimelineError> {
    let Some(document) = patient.as_object() else {
        return Err(TimelineError::Parse(format!(
            "Expected a patient object, received {}",
            json_kind(patient)
        )));
    };

    if !SECTIONS.iter().any(|key| has_content(document.get(*key))) {
        return Err(TimelineError::MissingData);
    }

    let mut aggregate = AggregateData::new(&config.adjuvant_keyword);
    aggregate.records.mrn = text(document.get("mrn"));

    if let Some(lot) = document.get("treatment_tab_info_LOT") {
        aggregate.handle_treatment_tab(lot);
    }
    if let Some(current) = text(document.get("current_line_number")) {
        aggregate.records.current_line_number = Some(current);
    }
    if let Some(stages) = document.get("treatment_stages") {
        aggregate.handle_stages(stages);
    }
    if let Some(labs) = document.get("lab_info").and_then(Value::as_object) {
        aggregate.handle_lab_info(labs);
    }
    if let Some(evolution) = document.get("diagnosis_evolution_timeline") {
        aggregate.handle_stage_evolution(evolution);
    }
    if let Some(header) = document.get("diagnosis_header") {
        aggregate.handle_diagnosis_header(header);
    }

    Ok(aggregate.finalize())
}

struct AggregateData<'a> {
    adjuvant_keyword: &'a str,
    records: PatientRecords,
}

impl<'a> AggregateData<'a> {
    fn new(adjuvant_keyword: &'a str) -> Self {
        Self {
            adjuvant_keyword,
            records: PatientRecords::default(),
        }
    }

    fn handle_treatment_tab(&mut self, lot: &Value) {
        self.records.current_line_number = text(lot.get("current_line_number"));

        let Some(history) = lot.get("treatment_history").and_then(Value::as_array) else {
            debug!("treatment tab has no treatment_history array");
            return;
        };

        for entry in history {
            match self.treatment_from(entry) {
                Some(record) => self.records.treatments.push(record),
                None => debug!("skipping treatment entry that is not an object"),
            }
        }
    }

    fn treatment_from(&self, entry: &Value) -> Option<TreatmentRecord> {
        entry.as_object()?;
        let header = entry.get("header");
        let dates = entry.get("dates");

        let line_number = text(field(header, "line_number"));
        let primary_drug_name = text(field(header, "primary_drug_name"));
        let line_label = text(field(header, "line_title"))
            .or_else(|| text(entry.get("line_title")))
            .unwrap_or_else(|| {
                compose_line_label(line_number.as_deref(), primary_drug_name.as_deref())
            });

        Some(TreatmentRecord {
            kind: TherapyKind::classify(&line_label, self.adjuvant_keyword),
            line_label,
            line_number,
            primary_drug_name,
            status_badge: text(field(header, "status_badge")).unwrap_or_default(),
            start_date: raw_date(field(dates, "start_date")),
            end_date: raw_date(field(dates, "end_date")),
            regimen: text(field(entry.get("regimen_details"), "display_name")),
            cycles: entry.get("cycles_data").and_then(cycles_from),
            toxicities: entry
                .get("toxicities")
                .and_then(Value::as_array)
                .map(|items| items.iter().filter_map(toxicity_from).collect())
                .unwrap_or_default(),
            outcome: entry.get("outcome").and_then(outcome_from),
            discontinuation_reason: text(entry.get("reason_for_discontinuation")),
            ..TreatmentRecord::default()
        })
    }

    fn handle_lab_info(&mut self, labs: &Map<String, Value>) {
        for (panel, biomarkers) in labs {
            if panel == "treatment_stages" {
                if self.records.stages.is_empty() {
                    self.handle_stages(biomarkers);
                }
                continue;
            }
            // Narrative fields such as clinical_interpretation are not panels.
            let Some(biomarkers) = biomarkers.as_object() else {
                continue;
            };
            for (name, data) in biomarkers {
                match biomarker_from(panel, name, data) {
                    Some(input) => self.records.biomarkers.push(input),
                    None => debug!(panel = %panel, biomarker = %name, "no readings for biomarker"),
                }
            }
        }
    }

    fn handle_stages(&mut self, stages: &Value) {
        let Some(stages) = stages.as_array() else {
            return;
        };
        self.records.stages = stages.iter().filter_map(stage_from).collect();
    }

    fn handle_stage_evolution(&mut self, evolution: &Value) {
        let events = evolution
            .get("stage_evolution_timeline")
            .or(Some(evolution))
            .and_then(Value::as_array);
        let Some(events) = events else {
            return;
        };
        self.records.stage_events = events.iter().filter_map(stage_event_from).collect();
    }

    fn handle_diagnosis_header(&mut self, header: &Value) {
        let Some(current) = header.get("current_staging") else {
            return;
        };
        let staging = Staging {
            tnm: text(current.get("tnm")),
            ajcc_stage: text(current.get("ajcc_stage")),
        };
        if !staging.is_empty() {
            self.records.header_staging = Some(staging);
        }
    }

    fn finalize(self) -> PatientRecords {
        let records = self.records;
        info!(
            treatments = records.treatments.len(),
            biomarkers = records.biomarkers.len(),
            stages = records.stages.len(),
            stage_events = records.stage_events.len(),
            "ingested patient data"
        );
        records
    }
}

fn compose_line_label(line_number: Option<&str>, drug: Option<&str>) -> String {
    let prefix = match line_number {
        Some(line) if line.bytes().all(|b| b.is_ascii_digit()) => format!("Line {line}"),
        Some(line) => line.to_string(),
        None => "Treatment".to_string(),
    };
    match drug {
        Some(drug) => format!("{prefix} - {drug}"),
        None => prefix,
    }
}

fn cycles_from(value: &Value) -> Option<CycleProgress> {
    let cycles = CycleProgress {
        completed: count(value.get("completed")),
        planned: count(value.get("planned")),
        display_text: text(value.get("display_text")),
    };
    (cycles != CycleProgress::default()).then_some(cycles)
}

fn toxicity_from(value: &Value) -> Option<Toxicity> {
    let grade = text(value.get("grade"));
    let name = text(value.get("name")).or_else(|| text(value.get("effect")));
    let display_tag = text(value.get("display_tag")).or_else(|| match (&grade, &name) {
        (Some(grade), Some(name)) => Some(format!("{grade}: {name}")),
        _ => None,
    });
    if grade.is_none() && name.is_none() && display_tag.is_none() {
        return None;
    }
    Some(Toxicity {
        grade,
        name,
        display_tag,
    })
}

fn outcome_from(value: &Value) -> Option<TreatmentOutcome> {
    let outcome = TreatmentOutcome {
        response_tag: text(value.get("response_tag")),
        details: text(value.get("details")),
    };
    (outcome != TreatmentOutcome::default()).then_some(outcome)
}

fn biomarker_from(panel: &str, name: &str, data: &Value) -> Option<BiomarkerInput> {
    data.as_object()?;
    let current = data.get("current");
    let mut entries: Vec<LabEntry> = data
        .get("trend")
        .and_then(Value::as_array)
        .map(|trend| trend.iter().filter_map(lab_entry_from).collect())
        .unwrap_or_default();

    match current {
        Some(current) => entries.extend(lab_entry_from(current)),
        // Flat shape: the biomarker object is itself a single reading.
        None if data.get("value").is_some() => entries.extend(lab_entry_from(data)),
        None => {}
    }

    if entries.is_empty() {
        return None;
    }

    Some(BiomarkerInput {
        panel: panel.to_string(),
        name: name.to_string(),
        unit: text(field(current, "unit")).or_else(|| text(data.get("unit"))),
        reference_range: text(field(current, "reference_range"))
            .or_else(|| text(data.get("reference_range"))),
        entries,
    })
}

// A reading with neither a date nor a value is an empty template slot.
fn lab_entry_from(value: &Value) -> Option<LabEntry> {
    value.as_object()?;
    let entry = LabEntry {
        date: raw_date(value.get("date")),
        value: lab_value(value.get("value")),
        status: text(value.get("status")),
        source_context: text(value.get("source_context")),
    };
    (entry.date.is_some() || entry.value.is_some()).then_some(entry)
}

fn lab_value(value: Option<&Value>) -> Option<LabValue> {
    match value? {
        Value::Number(number) => number.as_f64().map(LabValue::Number),
        Value::String(_) => text(value).map(LabValue::Text),
        _ => None,
    }
}

fn stage_from(value: &Value) -> Option<TreatmentStage> {
    value.as_object()?;
    Some(TreatmentStage {
        label: text(value.get("label")).unwrap_or_else(|| "Treatment".to_string()),
        start_date: raw_date(value.get("start_date")),
        end_date: raw_date(value.get("end_date")),
        color: text(value.get("color")),
        border_color: text(value.get("border_color")).or_else(|| text(value.get("borderColor"))),
    })
}

fn stage_event_from(value: &Value) -> Option<StageEvent> {
    value.as_object()?;
    let prefixed = |key: &str| {
        text(value.get(format!("timeline_{key}").as_str())).or_else(|| text(value.get(key)))
    };
    Some(StageEvent {
        event_date: raw_date(value.get("timeline_event_date"))
            .or_else(|| raw_date(value.get("event_date"))),
        stage_group: prefixed("stage_group"),
        tnm_status: prefixed("tnm_status"),
        description: prefixed("description"),
        regimen: text(value.get("regimen")),
    })
}

fn field<'v>(parent: Option<&'v Value>, key: &str) -> Option<&'v Value> {
    parent?.get(key)
}

/// Trimmed text, with placeholders such as "NA" treated as absent. Numbers are
/// rendered as text since extractors are inconsistent about line numbers.
fn text(value: Option<&Value>) -> Option<String> {
    match value? {
        Value::String(raw) => {
            let trimmed = raw.trim();
            (!is_placeholder(trimmed)).then(|| trimmed.to_string())
        }
        Value::Number(number) => Some(number.to_string()),
        _ => None,
    }
}

fn raw_date(value: Option<&Value>) -> Option<RawDate> {
    match value? {
        Value::Number(number) => number.as_i64().map(RawDate::Millis),
        other => text(Some(other)).map(RawDate::Text),
    }
}

fn count(value: Option<&Value>) -> Option<u32> {
    match value? {
        Value::Number(number) => number.as_u64().and_then(|n| u32::try_from(n).ok()),
        Value::String(raw) => raw.trim().parse().ok(),
        _ => None,
    }
}

fn is_placeholder(text: &str) -> bool {
    text.is_empty()
        || text.eq_ignore_ascii_case("na")
        || text.eq_ignore_ascii_case("n/a")
        || text.eq_ignore_ascii_case("null")
}

fn has_content(value: Option<&Value>) -> bool {
    match value {
        Some(Value::Object(map)) => !map.is_empty(),
        Some(Value::Array(items)) => !items.is_empty(),
        _ => false,
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use rstest::rstest;
    use serde_json::json;

    #[rstest]
    #[case(Some("1"), Some("Carboplatin"), "Line 1 - Carboplatin")]
    #[case(Some("Adjuvant"), Some("Radiation"), "Adjuvant - Radiation")]
    #[case(Some("2"), None, "Line 2")]
    #[case(None, Some("Osimertinib"), "Treatment - Osimertinib")]
    fn composes_line_labels(
        #[case] line: Option<&str>,
        #[case] drug: Option<&str>,
        #[case] expected: &str,
    ) {
        assert_eq!(compose_line_label(line, drug), expected);
    }

    #[rstest]
    #[case(json!("  Osimertinib "), Some("Osimertinib"))]
    #[case(json!("NA"), None)]
    #[case(json!("n/a"), None)]
    #[case(json!("null"), None)]
    #[case(json!(""), None)]
    #[case(json!(2), Some("2"))]
    #[case(json!(null), None)]
    #[case(json!(["x"]), None)]
    fn reads_text_fields(#[case] value: Value, #[case] expected: Option<&str>) {
        assert_eq!(text(Some(&value)).as_deref(), expected);
    }

    #[test]
    fn treatment_kind_is_decided_from_the_label() {
        let document = json!({
            "treatment_tab_info_LOT": {
                "treatment_history": [
                    {"header": {"line_number": 1, "primary_drug_name": "Carboplatin"}},
                    {"header": {"line_number": "Adjuvant", "primary_drug_name": "Radiation"}},
                    "not a treatment"
                ]
            }
        });

        let records =
            patient_records_from_value(&document, &ReconcileConfig::default()).unwrap();

        let kinds: Vec<(&str, TherapyKind)> = records
            .treatments
            .iter()
            .map(|record| (record.line_label.as_str(), record.kind))
            .collect();
        assert_eq!(
            kinds,
            vec![
                ("Line 1 - Carboplatin", TherapyKind::Main),
                ("Adjuvant - Radiation", TherapyKind::Adjuvant),
            ]
        );
        assert_eq!(records.treatments[0].line_number.as_deref(), Some("1"));
    }

    #[test]
    fn current_reading_joins_the_trend() {
        let data = json!({
            "current": {
                "value": "Pending",
                "unit": "ng/mL",
                "date": "2024-03-01",
                "status": "High",
                "reference_range": "0-3"
            },
            "trend": [
                {"date": "2024-01-01", "value": 4.1, "status": "High"},
                {"date": "NA", "value": 3.0}
            ]
        });

        let input = biomarker_from("tumor_markers", "CEA", &data).unwrap();

        assert_eq!(input.unit.as_deref(), Some("ng/mL"));
        assert_eq!(input.reference_range.as_deref(), Some("0-3"));
        assert_eq!(input.entries.len(), 3);
        assert_eq!(input.entries[1].date, None);
        assert_eq!(
            input.entries[2].value,
            Some(LabValue::Text("Pending".to_string()))
        );
    }

    #[test]
    fn flat_biomarker_is_a_single_reading() {
        let data = json!({"value": 11.2, "date": "2024-02-02", "unit": "g/dL"});

        let input = biomarker_from("complete_blood_count", "Hemoglobin", &data).unwrap();

        assert_eq!(input.entries.len(), 1);
        assert_eq!(input.unit.as_deref(), Some("g/dL"));
        assert!(biomarker_from("metabolic_panel", "ALT", &json!({})).is_none());
    }

    #[test]
    fn stage_events_accept_both_key_styles() {
        let prefixed = json!({
            "timeline_event_date": "March 2023",
            "timeline_stage_group": "Stage IIB",
            "timeline_tnm_status": "T2aN1M0",
            "timeline_description": "Initial diagnosis"
        });
        let plain = json!({"event_date": "Current Status", "stage_group": "Stage IVA"});

        let first = stage_event_from(&prefixed).unwrap();
        let second = stage_event_from(&plain).unwrap();

        assert_eq!(first.event_date, Some(RawDate::from("March 2023")));
        assert_eq!(first.tnm_status.as_deref(), Some("T2aN1M0"));
        assert_eq!(first.description.as_deref(), Some("Initial diagnosis"));
        assert_eq!(second.stage_group.as_deref(), Some("Stage IVA"));
    }

    #[test]
    fn millisecond_dates_stay_numeric() {
        assert_eq!(
            raw_date(Some(&json!(1_682_899_200_000_i64))),
            Some(RawDate::Millis(1_682_899_200_000))
        );
        assert_eq!(
            raw_date(Some(&json!("Ongoing"))),
            Some(RawDate::from("Ongoing"))
        );
    }

    #[rstest]
    #[case(json!({"mrn": "A1"}))]
    #[case(json!({"lab_info": ""}))]
    #[case(json!({"treatment_stages": []}))]
    fn documents_without_sections_are_missing_data(#[case] document: Value) {
        let err = patient_records_from_value(&document, &ReconcileConfig::default()).unwrap_err();
        assert!(matches!(err, TimelineError::MissingData));
    }

    #[test]
    fn non_object_documents_are_parse_errors() {
        let err =
            patient_records_from_value(&json!([1, 2]), &ReconcileConfig::default()).unwrap_err();
        assert!(matches!(err, TimelineError::Parse(message) if message.contains("an array")));

        let err = summarize_patient_str("{not json", &ReconcileConfig::default()).unwrap_err();
        assert!(matches!(err, TimelineError::Parse(_)));
    }
}
