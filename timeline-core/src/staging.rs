//! Current disease staging from the stage-evolution timeline.

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::{normalize, DateOrdinal, RawDate};

/// TNM classification and AJCC stage group at one point in time.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Staging {
    pub tnm: Option<String>,
    pub ajcc_stage: Option<String>,
}

impl Staging {
    pub fn is_empty(&self) -> bool {
        self.tnm.is_none() && self.ajcc_stage.is_none()
    }
}

/// One entry of the stage-evolution timeline.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct StageEvent {
    pub event_date: Option<RawDate>,
    pub stage_group: Option<String>,
    pub tnm_status: Option<String>,
    pub description: Option<String>,
    pub regimen: Option<String>,
}

impl StageEvent {
    pub fn staging(&self) -> Staging {
        Staging {
            tnm: self.tnm_status.clone(),
            ajcc_stage: self.stage_group.clone(),
        }
    }

    fn ordinal(&self) -> DateOrdinal {
        self.event_date
            .as_ref()
            .map(normalize)
            .unwrap_or(DateOrdinal::Unparsed)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum StagingStrategy {
    /// An event dated "Current Status" or similar.
    ExplicitCurrent,
    LatestDated,
    /// The diagnosis header's own current staging.
    HeaderFallback,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ResolvedStaging {
    pub staging: Staging,
    pub description: Option<String>,
    pub strategy: StagingStrategy,
}

pub fn resolve_current_staging(
    events: &[StageEvent],
    header: Option<&Staging>,
) -> Option<ResolvedStaging> {
    let staged: Vec<(&StageEvent, DateOrdinal)> = events
        .iter()
        .filter(|event| !event.staging().is_empty())
        .map(|event| (event, event.ordinal()))
        .collect();

    if let Some((event, _)) = staged
        .iter()
        .find(|(_, ordinal)| *ordinal == DateOrdinal::Now)
    {
        return Some(from_event(event, StagingStrategy::ExplicitCurrent));
    }

    let mut latest: Option<(&StageEvent, DateOrdinal)> = None;
    for &(event, ordinal) in &staged {
        if !ordinal.is_parsed() {
            continue;
        }
        match latest {
            Some((_, best)) if ordinal <= best => {}
            _ => latest = Some((event, ordinal)),
        }
    }
    if let Some((event, _)) = latest {
        return Some(from_event(event, StagingStrategy::LatestDated));
    }

    let fallback = header.filter(|staging| !staging.is_empty()).map(|staging| {
        ResolvedStaging {
            staging: staging.clone(),
            description: None,
            strategy: StagingStrategy::HeaderFallback,
        }
    });
    if fallback.is_none() {
        debug!(events = events.len(), "no current staging identified");
    }
    fallback
}

fn from_event(event: &StageEvent, strategy: StagingStrategy) -> ResolvedStaging {
    ResolvedStaging {
        staging: event.staging(),
        description: event.description.clone(),
        strategy,
    }
}
