//! The `analyze` subcommand: full pipeline run plus capacity projection.

use anyhow::{Context, Result};
use ct_core::{AnalysisReport, Pipeline, capacity_units};
use serde::Serialize;

use crate::cli::{EngineArgs, InputArgs};
use crate::commands::ingest;
use crate::config::Config;

/// Capacity projection attached to the report. Shift length and efficiency
/// are configuration, never inferred from the data.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct CapacityProjection {
    /// Available shift minutes.
    pub shift_minutes: f64,
    /// Target efficiency fraction.
    pub target_efficiency: f64,
    /// Units per shift at the real cycle time.
    pub real_units: f64,
    /// Units per shift at the theoretical cycle time.
    pub theoretical_units: f64,
}

impl CapacityProjection {
    fn from_report(config: &Config, report: &AnalysisReport) -> Self {
        Self {
            shift_minutes: config.shift_minutes,
            target_efficiency: config.target_efficiency,
            real_units: capacity_units(
                config.shift_minutes,
                config.target_efficiency,
                report.estimate.real_seconds,
            ),
            theoretical_units: capacity_units(
                config.shift_minutes,
                config.target_efficiency,
                report.estimate.theoretical_seconds,
            ),
        }
    }
}

/// JSON output envelope: the full report plus the capacity projection.
#[derive(Debug, Serialize)]
struct JsonOutput<'a> {
    #[serde(flatten)]
    report: &'a AnalysisReport,
    capacity: CapacityProjection,
}

/// Runs the analyze subcommand.
pub fn run(input: &InputArgs, engine: &EngineArgs, json: bool, config: Config) -> Result<()> {
    let config = config.merged(engine);
    let records = ingest::read_records(input)?;

    let pipeline = Pipeline::new(config.pipeline_config());
    let report = pipeline
        .analyze(&records)
        .with_context(|| format!("cannot analyze {}", input.file.display()))?;

    let capacity = CapacityProjection::from_report(&config, &report);

    if json {
        let output = JsonOutput {
            report: &report,
            capacity,
        };
        println!("{}", serde_json::to_string_pretty(&output)?);
    } else {
        print!("{}", render_text(&report, &capacity));
    }

    Ok(())
}

/// Human-readable report rendering.
fn render_text(report: &AnalysisReport, capacity: &CapacityProjection) -> String {
    let estimate = &report.estimate;
    let counts = &report.counts;

    let mut out = String::new();
    out.push_str(&format!(
        "cycle time (real):        {:.1} s/unit\n",
        estimate.real_seconds
    ));
    out.push_str(&format!(
        "cycle time (theoretical): {:.1} s/unit\n",
        estimate.theoretical_seconds
    ));
    out.push_str(&format!(
        "method:                   {} (n={})\n",
        estimate.method, estimate.sample_count
    ));
    out.push_str(&format!(
        "work band:                {:.1}..{:.1} s\n",
        report.thresholds.lower_seconds, report.thresholds.upper_seconds
    ));
    out.push_str(&format!(
        "shift capacity:           {:.0} units real, {:.0} theoretical \
         ({:.0} min at {:.0}% efficiency)\n",
        capacity.real_units,
        capacity.theoretical_units,
        capacity.shift_minutes,
        capacity.target_efficiency * 100.0
    ));
    out.push_str(&format!(
        "rows:                     {} in, {} unparseable, {} duplicates\n",
        counts.rows_in, counts.parse_failures, counts.duplicates_dropped
    ));
    out.push_str(&format!(
        "gaps:                     {} total ({} noise / {} work / {} idle)\n",
        counts.gaps, counts.burst_noise, counts.work, counts.idle
    ));
    out
}
