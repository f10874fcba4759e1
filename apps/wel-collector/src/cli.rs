use crate::backfill::LogMonth;
use chrono::{DateTime, Utc};
use clap::{Args as ClapArgs, Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug, Clone)]
#[command(
    name = "wel-collector",
    version,
    about = "Geothermal telemetry collector",
    args_conflicts_with_subcommands = true
)]
pub struct Args {
    #[command(subcommand)]
    pub command: Option<Command>,
    #[command(flatten)]
    pub collect: CollectArgs,
}

impl Args {
    /// `collect` is the default when no subcommand is given.
    pub fn into_command(self) -> Command {
        self.command.unwrap_or(Command::Collect(self.collect))
    }
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Poll the sources and store one record per interval.
    Collect(CollectArgs),
    /// Summarize stored history with batch metrics.
    Report(ReportArgs),
    /// Load a monthly logger log into the store.
    Backfill(BackfillArgs),
}

#[derive(ClapArgs, Debug, Clone, Default)]
pub struct CollectArgs {
    /// Keep records in memory instead of writing to the database.
    #[arg(long, default_value_t = false)]
    pub dry_run: bool,
    /// Run a single cycle and exit.
    #[arg(long, default_value_t = false)]
    pub once: bool,
}

#[derive(ClapArgs, Debug, Clone)]
pub struct ReportArgs {
    /// Trailing window in hours.
    #[arg(long, conflicts_with_all = ["start", "end"])]
    pub hours: Option<f64>,
    /// RFC 3339 start of the range.
    #[arg(long, requires = "end")]
    pub start: Option<DateTime<Utc>>,
    /// RFC 3339 end of the range, exclusive.
    #[arg(long, requires = "start")]
    pub end: Option<DateTime<Utc>>,
}

#[derive(ClapArgs, Debug, Clone)]
pub struct BackfillArgs {
    /// Download the log for this month (YYYY-MM) from the log server.
    #[arg(long, required_unless_present = "file", conflicts_with = "file")]
    pub month: Option<LogMonth>,
    /// Read a log that was already downloaded.
    #[arg(long)]
    pub file: Option<PathBuf>,
    /// Parse and derive without writing to the database.
    #[arg(long, default_value_t = false)]
    pub dry_run: bool,
}

#[derive(Parser, Debug, Clone)]
#[command(
    name = "rtl-bridge",
    version,
    about = "Average rtl_433 readings and publish them to the shared cache"
)]
pub struct BridgeArgs {
    /// Averaging window in seconds.
    #[arg(long, default_value_t = 29)]
    pub window_secs: u64,
    /// Decoder command line.
    #[arg(
        long,
        num_args = 1..,
        allow_hyphen_values = true,
        default_values = ["rtl_433", "-R", "40", "-R", "55", "-R", "74", "-C", "si", "-F", "json"]
    )]
    pub command: Vec<String>,
}
