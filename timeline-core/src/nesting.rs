//! Attaches adjuvant courses to the line of therapy they belong to.

use std::cmp::Reverse;

use chrono::{Duration, NaiveDateTime};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::{DateOrdinal, EndBound, OrphanPolicy, ReconcileConfig, TherapyKind, TreatmentRecord};

/// How a nested adjuvant found its parent line.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum AdjuvantPlacement {
    /// Its start date falls inside the parent's date range.
    Contained,
    /// No range contained it; the parent has the closest start date.
    NearestStart,
    /// Its start date could not be read; attached to the first line.
    FirstLineFallback,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct NestedTreatments {
    /// Main lines, most recent start first, each owning its adjuvants.
    pub lines: Vec<TreatmentRecord>,
    /// Adjuvants with no main line to attach to (empty under `OrphanPolicy::Drop`).
    pub orphans: Vec<TreatmentRecord>,
}

/// Splits `records` into main lines and adjuvants, nesting each adjuvant under
/// one main line.
///
/// Main lines are ordered by start date, newest first; lines whose start cannot
/// be read go last. An adjuvant goes to the first line whose range contains its
/// start date, otherwise to the line with the nearest start date, otherwise (no
/// readable start) to the first line. The input is never modified.
pub fn nest_adjuvants(records: &[TreatmentRecord], config: &ReconcileConfig) -> NestedTreatments {
    let mut lines = Vec::new();
    let mut adjuvants = Vec::new();
    for record in records {
        match record.kind {
            TherapyKind::Main => lines.push(record.clone()),
            TherapyKind::Adjuvant => adjuvants.push(record),
        }
    }

    lines.sort_by_cached_key(|line| Reverse(line.start()));
    for line in &lines {
        warn_on_inverted_range(line);
    }

    let reference = config.reference_instant();
    let mut orphans = Vec::new();

    for adjuvant in adjuvants {
        let Some((index, placement)) = place_adjuvant(adjuvant, &lines, reference) else {
            match config.orphan_policy {
                OrphanPolicy::Surface => {
                    warn!(
                        label = %adjuvant.line_label,
                        "adjuvant therapy has no main line, keeping it as orphaned"
                    );
                    orphans.push(adjuvant.clone());
                }
                OrphanPolicy::Drop => {
                    warn!(
                        label = %adjuvant.line_label,
                        "adjuvant therapy has no main line, dropping it"
                    );
                }
            }
            continue;
        };

        let mut nested = adjuvant.clone();
        nested.placement = Some(placement);
        lines[index].adjuvant_therapies.push(nested);
    }

    NestedTreatments { lines, orphans }
}

fn place_adjuvant(
    adjuvant: &TreatmentRecord,
    lines: &[TreatmentRecord],
    reference: NaiveDateTime,
) -> Option<(usize, AdjuvantPlacement)> {
    if lines.is_empty() {
        return None;
    }

    let start = adjuvant.start();
    if let Some(index) = lines.iter().position(|line| line.covers(start)) {
        return Some((index, AdjuvantPlacement::Contained));
    }

    if !start.is_parsed() {
        debug!(
            label = %adjuvant.line_label,
            "adjuvant start date unreadable, attaching to first line"
        );
        return Some((0, AdjuvantPlacement::FirstLineFallback));
    }

    match nearest_start(lines, start, reference) {
        Some(index) => {
            debug!(
                label = %adjuvant.line_label,
                parent = %lines[index].line_label,
                "no line contains adjuvant start, using nearest start date"
            );
            Some((index, AdjuvantPlacement::NearestStart))
        }
        None => {
            debug!(
                label = %adjuvant.line_label,
                "no line has a readable start date, attaching to first line"
            );
            Some((0, AdjuvantPlacement::FirstLineFallback))
        }
    }
}

// Ties keep the earlier line.
fn nearest_start(
    lines: &[TreatmentRecord],
    start: DateOrdinal,
    reference: NaiveDateTime,
) -> Option<usize> {
    let mut best: Option<(usize, Duration)> = None;
    for (index, line) in lines.iter().enumerate() {
        let Some(distance) = line.start().distance(start, reference) else {
            continue;
        };
        match best {
            Some((_, best_distance)) if best_distance <= distance => {}
            _ => best = Some((index, distance)),
        }
    }
    best.map(|(index, _)| index)
}

fn warn_on_inverted_range(line: &TreatmentRecord) {
    let start = line.start();
    if let EndBound::At(end) = line.end() {
        if start.is_parsed() && end.is_parsed() && end < start {
            warn!(
                label = %line.line_label,
                "treatment line ends before it starts"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::RawDate;
    use chrono::NaiveDate;
    use pretty_assertions::assert_eq;
    use rstest::{fixture, rstest};

    fn record(label: &str, start: Option<&str>, end: Option<&str>) -> TreatmentRecord {
        TreatmentRecord {
            line_label: label.to_string(),
            kind: TherapyKind::classify(label, "adjuvant"),
            start_date: start.map(RawDate::from),
            end_date: end.map(RawDate::from),
            ..TreatmentRecord::default()
        }
    }

    #[fixture]
    fn config() -> ReconcileConfig {
        ReconcileConfig {
            as_of: NaiveDate::from_ymd_opt(2025, 1, 1)
                .unwrap()
                .and_hms_opt(0, 0, 0),
            ..ReconcileConfig::default()
        }
    }

    fn labels(records: &[TreatmentRecord]) -> Vec<&str> {
        records.iter().map(|r| r.line_label.as_str()).collect()
    }

    #[rstest]
    fn nests_adjuvant_inside_containing_line(config: ReconcileConfig) {
        let records = vec![
            record("Line 1 - Carboplatin", Some("2023-04-05"), Some("2024-06-20")),
            record("Adjuvant - Radiation", Some("2023-05-01"), Some("2023-06-15")),
        ];

        let nested = nest_adjuvants(&records, &config);

        assert_eq!(labels(&nested.lines), vec!["Line 1 - Carboplatin"]);
        let children = &nested.lines[0].adjuvant_therapies;
        assert_eq!(labels(children), vec!["Adjuvant - Radiation"]);
        assert_eq!(children[0].placement, Some(AdjuvantPlacement::Contained));
        assert!(nested.orphans.is_empty());
    }

    #[rstest]
    fn orders_lines_newest_first_with_unreadable_last(config: ReconcileConfig) {
        let records = vec![
            record("Line 1", Some("2022-01-10"), Some("2022-08-01")),
            record("Line ?", Some("unknown"), None),
            record("Line 3", Some("Current"), None),
            record("Line 2", Some("2023-02-01"), Some("2023-12-01")),
        ];

        let nested = nest_adjuvants(&records, &config);

        assert_eq!(
            labels(&nested.lines),
            vec!["Line 3", "Line 2", "Line 1", "Line ?"]
        );
    }

    #[rstest]
    fn first_containing_line_wins(config: ReconcileConfig) {
        let records = vec![
            record("Line 1", Some("2023-01-01"), Some("Ongoing")),
            record("Line 2", Some("2023-04-01"), Some("2023-12-31")),
            record("Adjuvant - Denosumab", Some("2023-05-01"), None),
        ];

        let nested = nest_adjuvants(&records, &config);

        // Line 2 starts later, so it is first after ordering and both contain the start.
        assert_eq!(labels(&nested.lines), vec!["Line 2", "Line 1"]);
        assert_eq!(nested.lines[0].adjuvant_therapies.len(), 1);
        assert!(nested.lines[1].adjuvant_therapies.is_empty());
    }

    #[rstest]
    fn ongoing_end_is_unbounded(config: ReconcileConfig) {
        let records = vec![
            record("Line 1", Some("2020-01-01"), Some("2020-06-01")),
            record("Line 2", Some("2021-01-01"), Some("Ongoing")),
            record("Adjuvant - Radiation", Some("2030-05-01"), None),
        ];

        let nested = nest_adjuvants(&records, &config);

        let child = &nested.lines[0].adjuvant_therapies[0];
        assert_eq!(nested.lines[0].line_label, "Line 2");
        assert_eq!(child.placement, Some(AdjuvantPlacement::Contained));
    }

    #[rstest]
    fn falls_back_to_nearest_start(config: ReconcileConfig) {
        let records = vec![
            record("Line 1", Some("2022-01-01"), Some("2022-06-01")),
            record("Line 2", Some("2023-01-01"), Some("2023-03-01")),
            record("Adjuvant - Radiation", Some("2023-06-01"), None),
        ];

        let nested = nest_adjuvants(&records, &config);

        assert_eq!(nested.lines[0].line_label, "Line 2");
        let child = &nested.lines[0].adjuvant_therapies[0];
        assert_eq!(child.placement, Some(AdjuvantPlacement::NearestStart));
        assert!(nested.lines[1].adjuvant_therapies.is_empty());
    }

    #[rstest]
    fn nearest_start_can_pick_an_older_line(config: ReconcileConfig) {
        let records = vec![
            record("Line 1", Some("2022-01-01"), Some("2022-02-01")),
            record("Line 2", Some("2023-06-01"), Some("2023-07-01")),
            record("Adjuvant - Radiation", Some("2021-12-01"), None),
        ];

        let nested = nest_adjuvants(&records, &config);

        assert_eq!(nested.lines[1].line_label, "Line 1");
        assert_eq!(nested.lines[1].adjuvant_therapies.len(), 1);
        assert!(nested.lines[0].adjuvant_therapies.is_empty());
    }

    #[rstest]
    fn equal_distance_keeps_first_line(config: ReconcileConfig) {
        let tie = vec![
            record("Line 1", Some("2023-01-01"), Some("2023-01-10")),
            record("Line 2", Some("2023-01-21"), Some("2023-01-25")),
            record("Adjuvant - Radiation", Some("2023-01-11"), None),
        ];
        let nested = nest_adjuvants(&tie, &config);
        // Both starts are 10 days away; Line 2 is newest so it comes first.
        assert_eq!(nested.lines[0].line_label, "Line 2");
        assert_eq!(nested.lines[0].adjuvant_therapies.len(), 1);
        assert_eq!(
            nested.lines[0].adjuvant_therapies[0].placement,
            Some(AdjuvantPlacement::NearestStart)
        );
    }

    #[rstest]
    #[case(None)]
    #[case(Some("not a date"))]
    fn unreadable_adjuvant_start_goes_to_first_line(
        config: ReconcileConfig,
        #[case] start: Option<&str>,
    ) {
        let records = vec![
            record("Line 1", Some("2022-01-01"), Some("2022-06-01")),
            record("Line 2", Some("2023-01-01"), None),
            record("Adjuvant - Radiation", start, None),
        ];

        let nested = nest_adjuvants(&records, &config);

        assert_eq!(nested.lines[0].line_label, "Line 2");
        assert_eq!(
            nested.lines[0].adjuvant_therapies[0].placement,
            Some(AdjuvantPlacement::FirstLineFallback)
        );
    }

    #[rstest]
    fn surfaces_orphans_by_default(config: ReconcileConfig) {
        let records = vec![record("Adjuvant - Radiation", Some("2023-05-01"), None)];

        let nested = nest_adjuvants(&records, &config);

        assert!(nested.lines.is_empty());
        assert_eq!(labels(&nested.orphans), vec!["Adjuvant - Radiation"]);
        assert_eq!(nested.orphans[0].placement, None);
    }

    #[rstest]
    fn drops_orphans_when_configured(config: ReconcileConfig) {
        let config = ReconcileConfig {
            orphan_policy: OrphanPolicy::Drop,
            ..config
        };
        let records = vec![record("Adjuvant - Radiation", Some("2023-05-01"), None)];

        let nested = nest_adjuvants(&records, &config);

        assert!(nested.lines.is_empty());
        assert!(nested.orphans.is_empty());
    }

    #[rstest]
    fn every_adjuvant_lands_exactly_once(config: ReconcileConfig) {
        let records = vec![
            record("Line 1", Some("2021-03-01"), Some("2021-09-01")),
            record("Adjuvant - A", Some("2021-04-01"), None),
            record("Line 2", Some("2022-01-01"), Some("2022-12-01")),
            record("Adjuvant - B", Some("2020-01-01"), None),
            record("Adjuvant - C", Some("??"), None),
            record("Line 3", Some("Current"), None),
            record("Adjuvant - D", Some("2022-05-05"), None),
        ];

        let nested = nest_adjuvants(&records, &config);

        let mut attached: Vec<&str> = nested
            .lines
            .iter()
            .flat_map(|line| labels(&line.adjuvant_therapies))
            .collect();
        attached.sort_unstable();
        assert_eq!(
            attached,
            vec!["Adjuvant - A", "Adjuvant - B", "Adjuvant - C", "Adjuvant - D"]
        );
        assert!(nested.orphans.is_empty());
    }

    #[rstest]
    fn is_idempotent_and_leaves_input_untouched(config: ReconcileConfig) {
        let records = vec![
            record("Line 1", Some("2023-04-05"), Some("2024-06-20")),
            record("Adjuvant - Radiation", Some("2023-05-01"), None),
            record("Line 2", Some("2024-07-01"), Some("Ongoing")),
        ];
        let snapshot = records.clone();

        let first = nest_adjuvants(&records, &config);
        let second = nest_adjuvants(&records, &config);

        assert_eq!(first, second);
        assert_eq!(records, snapshot);
    }
}
