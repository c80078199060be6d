//! CLI command definitions and subcommands

use clap::{ArgGroup, Args, Parser, Subcommand};
use std::path::PathBuf;
use tracing::debug;

use crate::events::Phase;
use crate::wait::Condition;

/// phasewatch - lifecycle phase recorder and loop detector
#[derive(Parser)]
#[command(
    name = "pw",
    about = "Inspect recorded render phase histories: detect update loops, show stats, replay waits",
    version
)]
pub struct Cli {
    /// Path to config file
    #[arg(short, long, global = true, help = "Path to config file")]
    pub config: Option<PathBuf>,

    /// Log level (TRACE, DEBUG, INFO, WARN, ERROR)
    #[arg(
        short = 'l',
        long = "log-level",
        global = true,
        help = "Log level (TRACE, DEBUG, INFO, WARN, ERROR)"
    )]
    pub log_level: Option<String>,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Command,
}

/// CLI subcommands
#[derive(Debug, Subcommand)]
pub enum Command {
    /// Scan a recorded history for runaway update loops
    Detect {
        /// History file (.jsonl of entries, events, or phase names)
        file: PathBuf,

        /// Longest allowed run of updates
        #[arg(long = "max-update")]
        max_update: Option<usize>,

        /// Longest allowed run of nested updates
        #[arg(long = "max-nested")]
        max_nested: Option<usize>,

        /// Non-initial events to skip before counting
        #[arg(short, long)]
        ignore: Option<usize>,

        /// Component label for the report
        #[arg(long)]
        label: Option<String>,

        /// Include the full phase history in the report
        #[arg(long)]
        full_history: bool,

        /// Output format
        #[arg(short, long, default_value = "text")]
        format: OutputFormat,
    },

    /// Show per-phase counts and duration metrics
    Stats {
        /// History file
        file: PathBuf,

        /// Output format
        #[arg(short, long, default_value = "text")]
        format: OutputFormat,
    },

    /// Replay a recording through a live monitor while a wait observes it
    Replay(ReplayArgs),

    /// List recordings in the runs directory
    Runs,
}

/// Arguments for `pw replay`
#[derive(Debug, Args)]
#[command(group(ArgGroup::new("condition").required(true)))]
pub struct ReplayArgs {
    /// History file
    pub file: PathBuf,

    /// Wait for exactly N events
    #[arg(long, group = "condition", value_name = "N")]
    pub count: Option<usize>,

    /// Wait for at least N events
    #[arg(long, group = "condition", value_name = "N")]
    pub min: Option<usize>,

    /// Wait for the latest event to have this phase
    #[arg(long, group = "condition", value_name = "PHASE")]
    pub phase: Option<Phase>,

    /// Wait for exactly N events after the first BASE events
    #[arg(long, group = "condition", value_name = "N", requires = "baseline")]
    pub rerenders: Option<usize>,

    /// Events to replay before marking the rerender baseline
    #[arg(long, value_name = "BASE")]
    pub baseline: Option<usize>,

    /// Expect the condition NOT to happen before the timeout
    #[arg(long = "not")]
    pub negate: bool,

    /// Wait timeout in milliseconds (defaults to config)
    #[arg(short, long = "timeout-ms")]
    pub timeout_ms: Option<f64>,

    /// Delay between replayed events in milliseconds
    #[arg(long = "interval-ms", default_value = "0")]
    pub interval_ms: u64,

    /// Also write the replay to the runs directory
    #[arg(long)]
    pub record: bool,
}

impl ReplayArgs {
    /// The condition selected on the command line
    pub fn condition(&self) -> Option<Condition> {
        debug!(count = ?self.count, min = ?self.min, phase = ?self.phase, rerenders = ?self.rerenders, "ReplayArgs::condition: called");
        self.count
            .map(Condition::ExactCount)
            .or(self.min.map(Condition::MinCount))
            .or(self.phase.map(Condition::PhaseReached))
            .or(self.rerenders.map(Condition::Rerenders))
    }
}

/// Get the log file path
pub fn get_log_path() -> PathBuf {
    debug!("get_log_path: called");
    let path = dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("phasewatch")
        .join("logs")
        .join("phasewatch.log");
    debug!(?path, "get_log_path: returning path");
    path
}

/// Generate the after_help text with config and log locations
pub fn generate_after_help() -> String {
    debug!("generate_after_help: called");
    let log_path = get_log_path();
    let user_config = dirs::config_dir()
        .map(|d| d.join("phasewatch").join("phasewatch.yml"))
        .unwrap_or_else(|| PathBuf::from("phasewatch.yml"));

    let mut help = String::new();
    help.push_str("Config search order:\n");
    help.push_str("  --config PATH\n");
    help.push_str(&format!("  ./{}\n", crate::config::LOCAL_CONFIG));
    help.push_str(&format!("  {}\n", user_config.display()));
    help.push('\n');
    help.push_str(&format!("Logs are written to: {}", log_path.display()));
    help
}

/// Output format for detect/stats commands
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub enum OutputFormat {
    #[default]
    Text,
    Json,
}

impl std::str::FromStr for OutputFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        debug!(%s, "OutputFormat::from_str: called");
        match s.to_lowercase().as_str() {
            "text" | "plain" => {
                debug!("OutputFormat::from_str: matched Text");
                Ok(Self::Text)
            }
            "json" => {
                debug!("OutputFormat::from_str: matched Json");
                Ok(Self::Json)
            }
            _ => {
                debug!(%s, "OutputFormat::from_str: unknown format");
                Err(format!("Unknown format: {}. Use: text or json", s))
            }
        }
    }
}
