//! CLI argument definitions for the registry indicator engine.

use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};
use clap_verbosity_flag::{Verbosity, WarnLevel};
use colorchoice_clap::Color;

#[derive(Parser)]
#[command(
    name = "registry",
    version,
    about = "Mental health registry indicators - stratify cohorts, serve cached series",
    long_about = "Compute population mental-health indicators from raw registry extracts.\n\n\
                  A rebuild ingests the demographics, pharma and intervention relations\n\
                  into a content-addressed store; queries stratify the disorder cohorts\n\
                  by age and demographics and serve one indicator's year series, cached\n\
                  under its canonical call signature."
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Adjust log verbosity (-v for info, -vv for debug, -q for errors only).
    #[command(flatten)]
    pub verbosity: Verbosity<WarnLevel>,

    /// Control ANSI color output (auto, always, never).
    #[command(flatten)]
    pub color: Color,

    /// Explicit log level (overrides -v/-q flags).
    #[arg(long = "log-level", value_enum, global = true)]
    pub log_level: Option<LogLevelArg>,

    /// Log output format (pretty for human, json for machine parsing).
    #[arg(
        long = "log-format",
        value_enum,
        default_value = "pretty",
        global = true
    )]
    pub log_format: LogFormatArg,

    /// Write logs to a file instead of stderr.
    #[arg(long = "log-file", value_name = "PATH", global = true)]
    pub log_file: Option<PathBuf>,

    /// Allow subject identifiers in trace output (redacted by default).
    #[arg(long = "log-data", global = true)]
    pub log_data: bool,
}

#[derive(Subcommand)]
pub enum Command {
    /// Rebuild the snapshot, cohort and age indexes from raw extracts.
    Rebuild(RebuildArgs),

    /// Serve one indicator's year series from a store.
    Query(QueryArgs),

    /// Show a store's manifest and cached series.
    Status(StatusArgs),

    /// List the registered indicators.
    Indicators,
}

#[derive(Parser)]
pub struct RebuildArgs {
    /// Folder containing the raw CSV extracts.
    #[arg(value_name = "RAW_DIR")]
    pub raw_dir: PathBuf,

    /// Store directory to build (default: <RAW_DIR>/store).
    #[arg(long = "store", value_name = "DIR")]
    pub store_dir: Option<PathBuf>,

    /// Rerun every stage even when content hashes match.
    #[arg(long = "force")]
    pub force: bool,
}

#[derive(Parser)]
pub struct QueryArgs {
    /// Store directory produced by `rebuild`.
    #[arg(value_name = "STORE_DIR")]
    pub store_dir: PathBuf,

    /// Indicator id, e.g. `ma1` (see the `indicators` command).
    #[arg(value_name = "INDICATOR")]
    pub indicator: String,

    /// Disorder cohort to report on.
    #[arg(long = "disorder", value_enum, default_value = "schizophrenia")]
    pub disorder: DisorderArg,

    /// Cohort membership rule consulted by the evaluation indicators.
    #[arg(long = "cohort", value_enum, default_value = "prevalent")]
    pub cohort: CohortArg,

    /// Age bucket to include (repeatable; default: every indexed bucket).
    #[arg(long = "bucket", value_name = "BUCKET")]
    pub buckets: Vec<String>,

    /// Gender selector (`A`, `A-U`, or a code such as `F`).
    #[arg(long = "gender", value_name = "TOKEN", default_value = "A")]
    pub gender: String,

    /// Civil status selector (`All`, `All-Other`, or a code).
    #[arg(long = "civil-status", value_name = "TOKEN", default_value = "All")]
    pub civil_status: String,

    /// Job condition selector (`All`, `All-Unknown`, or a code).
    #[arg(long = "job-condition", value_name = "TOKEN", default_value = "All")]
    pub job_condition: String,

    /// Education level selector (`All`, `All-Unknown`, or a code).
    #[arg(long = "education", value_name = "TOKEN", default_value = "All")]
    pub education: String,

    /// Restrict the printed years, e.g. `2015-2020` or `2018`.
    #[arg(long = "years", value_name = "SPAN")]
    pub years: Option<String>,

    /// Recompute the series even when a cached one exists.
    #[arg(long = "no-cache")]
    pub no_cache: bool,
}

#[derive(Parser)]
pub struct StatusArgs {
    /// Store directory produced by `rebuild`.
    #[arg(value_name = "STORE_DIR")]
    pub store_dir: PathBuf,
}

/// CLI disorder choices.
#[derive(Clone, Copy, ValueEnum)]
pub enum DisorderArg {
    Schizophrenia,
    Depression,
    Bipolar,
}

/// CLI cohort rule choices.
#[derive(Clone, Copy, ValueEnum)]
pub enum CohortArg {
    Prevalent,
    Incident,
    IncidentYoungAdult,
}

/// CLI log level choices.
#[derive(Clone, Copy, ValueEnum)]
pub enum LogLevelArg {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

/// CLI log format choices.
#[derive(Clone, Copy, ValueEnum)]
pub enum LogFormatArg {
    Pretty,
    Compact,
    Json,
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn argument_definitions_are_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn query_arguments_parse() {
        let cli = Cli::try_parse_from([
            "registry",
            "query",
            "store",
            "ea1",
            "--disorder",
            "depression",
            "--cohort",
            "incident-young-adult",
            "--bucket",
            "15-25",
            "--bucket",
            "41-64",
            "--gender",
            "F",
            "--years",
            "2015-2020",
            "--no-cache",
        ])
        .unwrap();
        let Command::Query(args) = cli.command else {
            panic!("expected a query command");
        };
        assert_eq!(args.indicator, "ea1");
        assert_eq!(args.buckets, vec!["15-25", "41-64"]);
        assert_eq!(args.gender, "F");
        assert_eq!(args.years.as_deref(), Some("2015-2020"));
        assert!(args.no_cache);
        assert!(matches!(args.cohort, CohortArg::IncidentYoungAdult));
        assert!(matches!(args.disorder, DisorderArg::Depression));
    }

    #[test]
    fn rebuild_defaults_leave_the_store_unset() {
        let cli = Cli::try_parse_from(["registry", "rebuild", "raw"]).unwrap();
        let Command::Rebuild(args) = cli.command else {
            panic!("expected a rebuild command");
        };
        assert_eq!(args.raw_dir, PathBuf::from("raw"));
        assert!(args.store_dir.is_none());
        assert!(!args.force);
    }
}
