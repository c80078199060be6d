//! pw - phasewatch command line
//!
//! Inspects recorded phase histories: loop detection, stats, and wait replay.

use std::fs;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use clap::{CommandFactory, FromArgMatches};
use colored::*;
use eyre::{Context, Result};
use tracing::{debug, info, warn};

use phasewatch::cli::{Cli, Command, OutputFormat, ReplayArgs, generate_after_help, get_log_path};
use phasewatch::config::Config;
use phasewatch::detect::{LoopReport, MaxRuns, detect_loops};
use phasewatch::events::{EventLog, HISTORY_FILE, HistoryRecorder, Phase, PhaseEvent, read_history};
use phasewatch::monitor::Monitor;
use phasewatch::wait::{WaitError, WaitOptions, WaitResult};

fn parse_level(s: &str) -> tracing::Level {
    match s.to_uppercase().as_str() {
        "TRACE" => tracing::Level::TRACE,
        "DEBUG" => tracing::Level::DEBUG,
        "INFO" => tracing::Level::INFO,
        "WARN" | "WARNING" => tracing::Level::WARN,
        "ERROR" => tracing::Level::ERROR,
        _ => {
            eprintln!("Warning: Unknown log-level '{}', defaulting to INFO", s);
            tracing::Level::INFO
        }
    }
}

fn setup_logging(cli_log_level: Option<&str>, config_log_level: Option<&str>) -> Result<()> {
    // Note: Can't log params here since logging isn't initialized yet
    let log_path = get_log_path();
    if let Some(log_dir) = log_path.parent() {
        fs::create_dir_all(log_dir).context("Failed to create log directory")?;
    }

    // Determine log level with priority: CLI --log-level > config file > default (INFO)
    let level = cli_log_level
        .or(config_log_level)
        .map(parse_level)
        .unwrap_or(tracing::Level::INFO);

    let log_file = fs::File::create(&log_path).context("Failed to create log file")?;

    tracing_subscriber::fmt()
        .with_writer(log_file)
        .with_ansi(false)
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env().add_directive(level.into()))
        .init();

    info!("Logging initialized (level: {:?})", level);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    // Build command with dynamic after_help that shows config and log locations
    let cmd = Cli::command().after_help(generate_after_help());
    let cli = Cli::from_arg_matches(&cmd.get_matches())?;

    // Load log level from config file early (before full config load)
    let config_log_level = Config::load_log_level(cli.config.as_ref());

    // Setup logging with priority: CLI > config > INFO default
    setup_logging(cli.log_level.as_deref(), config_log_level.as_deref()).context("Failed to setup logging")?;

    let config = Config::load(cli.config.as_ref()).context("Failed to load configuration")?;
    config.validate()?;

    debug!(command = ?cli.command, "main: dispatching command");
    match cli.command {
        Command::Detect {
            file,
            max_update,
            max_nested,
            ignore,
            label,
            full_history,
            format,
        } => {
            debug!(?file, "main: matched Detect command");
            let overrides = DetectOverrides {
                max_update,
                max_nested,
                ignore,
                label,
                full_history,
            };
            cmd_detect(&config, &file, overrides, format)
        }
        Command::Stats { file, format } => {
            debug!(?file, "main: matched Stats command");
            cmd_stats(&file, format)
        }
        Command::Replay(args) => {
            debug!(?args, "main: matched Replay command");
            cmd_replay(&config, args).await
        }
        Command::Runs => {
            debug!("main: matched Runs command");
            cmd_runs(&config)
        }
    }
}

/// Command-line values that take priority over the config file
struct DetectOverrides {
    max_update: Option<usize>,
    max_nested: Option<usize>,
    ignore: Option<usize>,
    label: Option<String>,
    full_history: bool,
}

/// Label for a history file: its parent directory for recorder output, else its stem
fn label_for(file: &Path) -> Option<String> {
    let is_recording = file.file_name().is_some_and(|n| n == HISTORY_FILE);
    let source = if is_recording { file.parent() } else { Some(file) };
    source
        .and_then(|p| p.file_stem())
        .map(|s| s.to_string_lossy().into_owned())
}

fn format_max_runs(max: &MaxRuns) -> String {
    format!(
        "longest {} run {}, longest {} run {}",
        Phase::Update,
        max.update,
        Phase::NestedUpdate,
        max.nested_update
    )
}

fn cmd_detect(config: &Config, file: &Path, overrides: DetectOverrides, format: OutputFormat) -> Result<ExitCode> {
    debug!(?file, ?format, "cmd_detect: called");
    let events = read_history(file)?;

    let mut options = config.to_loop_options(overrides.label.or_else(|| label_for(file)));
    if let Some(max) = overrides.max_update {
        options.max_consecutive_update = max;
    }
    if let Some(max) = overrides.max_nested {
        options.max_consecutive_nested_update = Some(max);
    }
    if let Some(ignore) = overrides.ignore {
        options.ignore_initial_count = ignore;
    }
    options.show_full_history |= overrides.full_history;

    let report = detect_loops(&events, &options)?;

    match format {
        OutputFormat::Json => {
            debug!("cmd_detect: outputting JSON");
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        OutputFormat::Text => {
            debug!("cmd_detect: outputting text");
            print_report(&report, options.component_label.as_deref());
        }
    }

    Ok(if report.is_clean() {
        ExitCode::SUCCESS
    } else {
        ExitCode::from(1)
    })
}

fn print_report(report: &LoopReport, label: Option<&str>) {
    let name = label.unwrap_or("component");
    match report {
        LoopReport::Clean {
            max_runs_observed,
            events_scanned,
        } => {
            println!(
                "{} No update loop in {} ({} events; {})",
                "✓".green(),
                name.cyan(),
                events_scanned,
                format_max_runs(max_runs_observed)
            );
        }
        LoopReport::Violation(v) => {
            println!(
                "{} Update loop detected in {}: {} repeated {} times in a row (threshold {})",
                "✗".red(),
                name.cyan(),
                v.phase.to_string().yellow(),
                v.run_length,
                v.threshold
            );
            println!("  positions: {}", v.positions_summary());
            println!("  {}", format_max_runs(&v.max_runs_observed).dimmed());
            if let Some(history) = &v.history {
                let phases: Vec<&str> = history.iter().map(Phase::as_str).collect();
                println!("  history: {}", phases.join(" → "));
            }
        }
    }
}

fn cmd_stats(file: &Path, format: OutputFormat) -> Result<ExitCode> {
    debug!(?file, ?format, "cmd_stats: called");
    let events = read_history(file)?;

    let log = EventLog::new();
    for event in &events {
        log.append_timed(event.phase, event.duration_ms);
    }
    let counts = log.phase_counts();
    let average = log.average_duration_ms();
    let total = log.total_duration_ms();
    let timed = log.aggregate("timed_events", |events| {
        events.iter().filter(|e| e.duration_ms.is_some()).count()
    });

    match format {
        OutputFormat::Json => {
            debug!("cmd_stats: outputting JSON");
            let stats = serde_json::json!({
                "events": counts.total(),
                "phases": counts,
                "timed-events": timed,
                "average-duration-ms": average,
                "total-duration-ms": total,
            });
            println!("{}", serde_json::to_string_pretty(&stats)?);
        }
        OutputFormat::Text => {
            debug!("cmd_stats: outputting text");
            let name = label_for(file).unwrap_or_else(|| file.display().to_string());
            println!("Phase stats for {}", name.cyan());
            println!("-----------------");
            println!("Total events: {}", counts.total());
            for phase in Phase::ALL {
                println!("  {:<14} {}", phase.as_str(), counts.get(phase));
            }
            println!();
            if timed > 0 {
                println!("Timed events:     {}", timed);
                println!("Average duration: {:.2} ms", average);
                println!("Total duration:   {:.2} ms", total);
            } else {
                println!("{}", "No render durations recorded".dimmed());
            }
        }
    }
    Ok(ExitCode::SUCCESS)
}

fn record(monitor: &Monitor, event: &PhaseEvent) {
    if let Err(e) = monitor.record_timed(event.phase, event.duration_ms) {
        warn!(error = %e, seq = event.sequence_index, "cmd_replay: listener failed");
    }
}

async fn cmd_replay(config: &Config, args: ReplayArgs) -> Result<ExitCode> {
    debug!(?args, "cmd_replay: called");
    let condition = args
        .condition()
        .ok_or_else(|| eyre::eyre!("replay needs one of --count, --min, --phase, --rerenders"))?;
    let options = match args.timeout_ms {
        Some(ms) => WaitOptions::from_millis(ms)?,
        None => config.wait_options()?,
    };

    let events = read_history(&args.file)?;
    let monitor = Arc::new(Monitor::new(label_for(&args.file)));

    let recorder = if args.record {
        let recorder = Arc::new(HistoryRecorder::new(config.runs_dir()?));
        recorder.attach(&monitor);
        Some(recorder)
    } else {
        None
    };

    // Events before the baseline are replayed ahead of arming the wait
    let split = args.baseline.unwrap_or(0).min(events.len());
    let (before, after) = events.split_at(split);
    for event in before {
        record(&monitor, event);
    }
    if args.baseline.is_some() {
        monitor.mark_baseline();
    }

    let waiter = monitor.waiter();
    let pending = if args.negate {
        tokio::spawn(waiter.wait_for_absence(condition, options))
    } else {
        tokio::spawn(waiter.wait(condition, options))
    };

    let interval = Duration::from_millis(args.interval_ms);
    for event in after {
        if !interval.is_zero() {
            tokio::time::sleep(interval).await;
        }
        record(&monitor, event);
    }
    info!(replayed = events.len(), "cmd_replay: replay finished");

    let result: WaitResult = pending.await.context("Wait task failed")?;

    if let Some(recorder) = &recorder {
        recorder.close_instance(&monitor.id().to_string());
        println!(
            "Recorded to {}",
            recorder.history_path(&monitor.id().to_string()).display()
        );
    }

    let name = monitor.display_name();
    match result {
        Ok(outcome) => {
            let verb = if args.negate { "never saw" } else { "saw" };
            println!(
                "{} {} {} {} ({} events, {:?}{})",
                "✓".green(),
                name.cyan(),
                verb,
                outcome.condition,
                outcome.observed.count,
                outcome.elapsed,
                if outcome.immediate { ", immediate" } else { "" }
            );
            Ok(ExitCode::SUCCESS)
        }
        Err(e) => {
            println!("{} {}: {}", "✗".red(), name.cyan(), e);
            if let Some(observed) = e.observed() {
                let phases: Vec<&str> = observed.history.iter().map(|e| e.phase.as_str()).collect();
                println!("  observed: {}", phases.join(" → ").dimmed());
            }
            if matches!(e, WaitError::InvalidArgument(_)) {
                return Err(e.into());
            }
            Ok(ExitCode::from(1))
        }
    }
}

fn cmd_runs(config: &Config) -> Result<ExitCode> {
    debug!("cmd_runs: called");
    let runs_dir: PathBuf = config.runs_dir()?;
    if !runs_dir.exists() {
        println!("No recordings found in {}", runs_dir.display());
        return Ok(ExitCode::SUCCESS);
    }

    let mut runs = Vec::new();
    for entry in fs::read_dir(&runs_dir).context(format!("Failed to read {}", runs_dir.display()))? {
        let entry = entry?;
        let path = entry.path().join(HISTORY_FILE);
        if path.exists() {
            let modified = entry.metadata().and_then(|m| m.modified()).ok();
            runs.push((entry.file_name().to_string_lossy().into_owned(), path, modified));
        }
    }
    runs.sort_by(|a, b| b.2.cmp(&a.2));

    if runs.is_empty() {
        println!("No recordings found in {}", runs_dir.display());
        return Ok(ExitCode::SUCCESS);
    }
    for (instance, path, _) in runs {
        let count = match read_history(&path) {
            Ok(events) => events.len(),
            Err(e) => {
                warn!(?path, error = %e, "cmd_runs: unreadable recording");
                0
            }
        };
        println!("{}  {:>6} events  {}", instance.cyan(), count, path.display().to_string().dimmed());
    }
    Ok(ExitCode::SUCCESS)
}
