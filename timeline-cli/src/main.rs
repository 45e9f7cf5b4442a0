use std::fmt::{self, Write as _};
use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, ValueEnum};
use onco_timeline_core::{OrphanPolicy, PatientTimeline, ReconcileConfig};
use onco_timeline_ingest::summarize_patient_str;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(
    name = "onco-timeline",
    about = "Reconcile an oncology patient record into a treatment and lab timeline."
)]
struct Args {
    /// Path to the patient-data JSON file.
    #[arg(short, long)]
    input: PathBuf,

    /// Print the full timeline as JSON instead of a summary.
    #[arg(long)]
    json: bool,

    /// What to do with adjuvant therapies when there is no main line.
    #[arg(long, value_enum, default_value_t = OrphanArg::Surface)]
    orphans: OrphanArg,

    /// Percentage change between the last two lab values that counts as a trend.
    #[arg(long, default_value_t = 5.0)]
    trend_threshold: f64,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum OrphanArg {
    Surface,
    Drop,
}

impl From<OrphanArg> for OrphanPolicy {
    fn from(arg: OrphanArg) -> Self {
        match arg {
            OrphanArg::Surface => OrphanPolicy::Surface,
            OrphanArg::Drop => OrphanPolicy::Drop,
        }
    }
}

impl Args {
    fn config(&self) -> ReconcileConfig {
        ReconcileConfig {
            orphan_policy: self.orphans.into(),
            trend_change_percent: self.trend_threshold,
            ..ReconcileConfig::default()
        }
    }
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    let data = std::fs::read_to_string(&args.input)
        .with_context(|| format!("Could not read file {:?}", args.input))?;

    let timeline = summarize_patient_str(&data, &args.config())
        .with_context(|| format!("Could not build a timeline from {:?}", args.input))?;

    if args.json {
        let json =
            serde_json::to_string_pretty(&timeline).context("Could not serialize timeline")?;
        println!("{json}");
    } else {
        print!("{}", render_summary(&timeline).context("Could not format summary")?);
    }

    Ok(())
}

fn render_summary(timeline: &PatientTimeline) -> Result<String, fmt::Error> {
    let mut out = String::new();
    writeln!(out, "Generated at: {}", timeline.generated_at)?;
    writeln!(
        out,
        "Patient: {}",
        timeline.mrn.as_deref().unwrap_or("unknown")
    )?;

    writeln!(out, "Treatment lines: {}", timeline.treatment_lines.len())?;
    for line in &timeline.treatment_lines {
        writeln!(out, "  {} [{}]", line.line_label, line.status_badge)?;
        for adjuvant in &line.adjuvant_therapies {
            writeln!(out, "    + {}", adjuvant.line_label)?;
        }
    }
    if !timeline.orphaned_adjuvants.is_empty() {
        writeln!(
            out,
            "Unattached adjuvant therapies: {}",
            timeline.orphaned_adjuvants.len()
        )?;
    }

    match &timeline.current_treatment {
        Some(current) => writeln!(
            out,
            "Current treatment: {} ({:?})",
            current.record.line_label, current.strategy
        )?,
        None => writeln!(out, "Current treatment: none")?,
    }

    if let Some(resolved) = &timeline.current_staging {
        writeln!(
            out,
            "Current staging: {} {} ({:?})",
            resolved.staging.ajcc_stage.as_deref().unwrap_or("-"),
            resolved.staging.tnm.as_deref().unwrap_or("-"),
            resolved.strategy
        )?;
    }

    writeln!(
        out,
        "Biomarkers: {} ({} abnormal)",
        timeline.biomarkers.len(),
        timeline.summary.total_abnormal
    )?;
    if let Some(updated) = timeline.summary.last_updated {
        writeln!(out, "Labs last updated: {updated}")?;
    }

    Ok(out)
}
