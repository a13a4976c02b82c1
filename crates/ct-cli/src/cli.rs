//! Command-line argument definitions.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};
use ct_core::Strategy;

/// Cycle-time analysis for shop-floor traceability exports.
///
/// Ingests a time-ordered scan log, estimates the seconds-per-unit cycle
/// time, and derives shift capacity from it.
#[derive(Debug, Parser)]
#[command(name = "ct", version, about, long_about = None)]
pub struct Cli {
    /// Enable verbose output.
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Path to config file.
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

/// Available subcommands.
#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Analyze a traceability export and report cycle time and capacity.
    Analyze {
        #[command(flatten)]
        input: InputArgs,

        #[command(flatten)]
        engine: EngineArgs,

        /// Emit the full report as JSON instead of human-readable text.
        #[arg(long)]
        json: bool,
    },

    /// Write the work-classified clean record subset as CSV to stdout.
    Export {
        #[command(flatten)]
        input: InputArgs,

        #[command(flatten)]
        engine: EngineArgs,
    },
}

/// Input file and column resolution.
///
/// Which raw column carries which semantic role is decided here, by the
/// caller; the engine never guesses column names.
#[derive(Debug, Args)]
pub struct InputArgs {
    /// The export file to analyze.
    pub file: PathBuf,

    /// Name of the column holding the scan timestamp.
    #[arg(long)]
    pub timestamp_col: String,

    /// Name of the column holding the unit identifier (enables dedup).
    #[arg(long)]
    pub unit_col: Option<String>,

    /// Name of the column holding the grouping key (station/operation).
    #[arg(long)]
    pub group_col: Option<String>,

    /// Name of the column holding the operator key (reporting only).
    #[arg(long)]
    pub actor_col: Option<String>,

    /// Input file format.
    #[arg(long, value_enum, default_value_t = InputFormat::Delimited)]
    pub format: InputFormat,

    /// Field delimiter for delimited input.
    #[arg(long, default_value_t = '\t')]
    pub delimiter: char,
}

/// Supported input encodings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum InputFormat {
    /// Header row plus delimiter-separated fields (TSV/CSV).
    Delimited,
    /// One JSON object per line, keyed by column name.
    Jsonl,
}

/// Engine parameter overrides. Anything not given falls back to the loaded
/// configuration.
#[derive(Debug, Args)]
pub struct EngineArgs {
    /// Lower work-band bound in seconds (gaps below are burst noise).
    #[arg(long)]
    pub lower: Option<f64>,

    /// Upper work-band bound in seconds (gaps above are idle).
    #[arg(long)]
    pub upper: Option<f64>,

    /// Derive the upper bound statistically as Q3 + <IQR> * IQR instead of
    /// using --upper.
    #[arg(long, value_name = "MULTIPLIER")]
    pub iqr: Option<f64>,

    /// Minimum work-classified gaps before estimation is attempted.
    #[arg(long)]
    pub min_work_samples: Option<usize>,

    /// Estimator strategy.
    #[arg(long)]
    pub strategy: Option<Strategy>,

    /// Percentile for the theoretical (best-case) rate.
    #[arg(long)]
    pub percentile: Option<f64>,

    /// Window length in seconds for the windowed-throughput strategy.
    #[arg(long)]
    pub window: Option<f64>,

    /// Available shift minutes for the capacity projection.
    #[arg(long)]
    pub shift_minutes: Option<f64>,

    /// Target efficiency fraction for the capacity projection.
    #[arg(long)]
    pub efficiency: Option<f64>,
}
