//! Picks the treatment a patient is on right now.

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::TreatmentRecord;

/// Which rule identified the current treatment, in priority order.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ResolutionStrategy {
    ExplicitLine,
    StatusBadge,
    OngoingHighestLine,
    HighestNumericLine,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ResolvedTreatment<'a> {
    pub record: &'a TreatmentRecord,
    pub strategy: ResolutionStrategy,
}

impl ResolvedTreatment<'_> {
    pub fn to_current(&self) -> CurrentTreatment {
        CurrentTreatment {
            record: self.record.clone(),
            strategy: self.strategy,
        }
    }
}

/// Owned form of [`ResolvedTreatment`] for snapshots.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CurrentTreatment {
    pub record: TreatmentRecord,
    pub strategy: ResolutionStrategy,
}

/// Resolves the active treatment by trying, in order: the explicitly named line
/// number, a "Current" status badge, the highest-numbered ongoing line, and the
/// highest numeric line. `None` means no active treatment, which is not an error.
pub fn resolve_current<'a>(
    records: &'a [TreatmentRecord],
    explicit_line_number: Option<&str>,
) -> Option<ResolvedTreatment<'a>> {
    let resolved = by_explicit_line(records, explicit_line_number)
        .map(|record| (record, ResolutionStrategy::ExplicitLine))
        .or_else(|| {
            by_status_badge(records).map(|record| (record, ResolutionStrategy::StatusBadge))
        })
        .or_else(|| {
            first_highest_line(records.iter().filter(|record| record.is_ongoing()))
                .map(|record| (record, ResolutionStrategy::OngoingHighestLine))
        })
        .or_else(|| {
            first_highest_line(
                records
                    .iter()
                    .filter(|record| record.numeric_line().is_some()),
            )
            .map(|record| (record, ResolutionStrategy::HighestNumericLine))
        });

    match resolved {
        Some((record, strategy)) => {
            debug!(label = %record.line_label, ?strategy, "resolved current treatment");
            Some(ResolvedTreatment { record, strategy })
        }
        None => {
            debug!(candidates = records.len(), "no current treatment identified");
            None
        }
    }
}

fn by_explicit_line<'a>(
    records: &'a [TreatmentRecord],
    explicit: Option<&str>,
) -> Option<&'a TreatmentRecord> {
    let wanted = explicit.map(str::trim).filter(|line| !is_placeholder(line))?;
    let found = records
        .iter()
        .find(|record| record.line_number.as_deref().map(str::trim) == Some(wanted));
    if found.is_none() {
        debug!(line = wanted, "explicit line number matches no treatment");
    }
    found
}

fn by_status_badge(records: &[TreatmentRecord]) -> Option<&TreatmentRecord> {
    records
        .iter()
        .find(|record| record.status_badge.to_lowercase().contains("current"))
}

// Non-numeric line numbers rank below any number; ties keep the earlier record.
fn first_highest_line<'a>(
    candidates: impl Iterator<Item = &'a TreatmentRecord>,
) -> Option<&'a TreatmentRecord> {
    let mut best: Option<(&TreatmentRecord, Option<u64>)> = None;
    for record in candidates {
        let rank = record.numeric_line();
        match best {
            Some((_, best_rank)) if rank <= best_rank => {}
            _ => best = Some((record, rank)),
        }
    }
    best.map(|(record, _)| record)
}

fn is_placeholder(line: &str) -> bool {
    line.is_empty() || line.eq_ignore_ascii_case("na") || line.eq_ignore_ascii_case("null")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::RawDate;
    use rstest::rstest;

    fn record(line: &str, status: &str, end: &str) -> TreatmentRecord {
        TreatmentRecord {
            line_label: format!("Line {line}"),
            line_number: Some(line.to_string()),
            status_badge: status.to_string(),
            end_date: Some(RawDate::from(end)),
            ..TreatmentRecord::default()
        }
    }

    fn resolved_line(resolved: Option<ResolvedTreatment<'_>>) -> Option<(&str, ResolutionStrategy)> {
        resolved.map(|r| (r.record.line_number.as_deref().unwrap_or(""), r.strategy))
    }

    #[test]
    fn current_badge_beats_completed_line() {
        let records = vec![
            record("1", "Completed", "2024-06-20"),
            record("2", "Current", "Ongoing"),
        ];

        assert_eq!(
            resolved_line(resolve_current(&records, None)),
            Some(("2", ResolutionStrategy::StatusBadge))
        );
    }

    #[test]
    fn current_badge_beats_highest_numeric_line() {
        let records = vec![
            record("1", "current therapy", "2023-01-01"),
            record("3", "Past", "2024-01-01"),
        ];

        assert_eq!(
            resolved_line(resolve_current(&records, None)),
            Some(("1", ResolutionStrategy::StatusBadge))
        );
    }

    #[test]
    fn explicit_line_number_wins() {
        let records = vec![
            record("1", "Past", "2022-01-01"),
            record("2", "Current", "Ongoing"),
        ];

        assert_eq!(
            resolved_line(resolve_current(&records, Some(" 1 "))),
            Some(("1", ResolutionStrategy::ExplicitLine))
        );
    }

    #[rstest]
    #[case(Some("NA"))]
    #[case(Some("null"))]
    #[case(Some(""))]
    #[case(Some("7"))]
    #[case(None)]
    fn unusable_explicit_line_falls_through(#[case] explicit: Option<&str>) {
        let records = vec![
            record("1", "Past", "2022-01-01"),
            record("2", "Current", "Ongoing"),
        ];

        assert_eq!(
            resolved_line(resolve_current(&records, explicit)),
            Some(("2", ResolutionStrategy::StatusBadge))
        );
    }

    #[test]
    fn highest_ongoing_line_when_no_badge() {
        let records = vec![
            record("1", "Past", "2022-01-01"),
            record("2", "", "Ongoing"),
            record("Adjuvant", "", "ongoing"),
            record("3", "", "Ongoing"),
            record("4", "Planned", "2026-01-01"),
        ];

        assert_eq!(
            resolved_line(resolve_current(&records, None)),
            Some(("3", ResolutionStrategy::OngoingHighestLine))
        );
    }

    #[test]
    fn ongoing_ties_keep_first() {
        let mut first = record("2", "", "Ongoing");
        first.line_label = "first".to_string();
        let mut second = record("2", "", "Ongoing");
        second.line_label = "second".to_string();
        let records = vec![first, second];

        let resolved = resolve_current(&records, None).unwrap();
        assert_eq!(resolved.record.line_label, "first");
    }

    #[test]
    fn ongoing_without_numbers_still_resolves() {
        let records = vec![record("Adjuvant", "", "Ongoing")];

        assert_eq!(
            resolved_line(resolve_current(&records, None)),
            Some(("Adjuvant", ResolutionStrategy::OngoingHighestLine))
        );
    }

    #[test]
    fn highest_numeric_line_as_last_resort() {
        let records = vec![
            record("2", "Past", "2022-01-01"),
            record("10", "Past", "2024-01-01"),
            record("Adjuvant", "Past", "2023-01-01"),
            record("9", "Past", "2023-06-01"),
        ];

        assert_eq!(
            resolved_line(resolve_current(&records, None)),
            Some(("10", ResolutionStrategy::HighestNumericLine))
        );
    }

    #[test]
    fn nothing_resolvable_is_none() {
        let records = vec![record("Adjuvant", "Past", "2023-01-01")];
        assert!(resolve_current(&records, None).is_none());
        assert!(resolve_current(&[], Some("1")).is_none());
    }

    #[test]
    fn owned_copy_keeps_strategy() {
        let records = vec![record("2", "Current", "Ongoing")];
        let current = resolve_current(&records, None).unwrap().to_current();
        assert_eq!(current.record, records[0]);
        assert_eq!(current.strategy, ResolutionStrategy::StatusBadge);
    }
}
