//! Skyrun CLI: drive a smart telescope from the command line.
//!
//! `run-target` observes one target, `sequence` walks a schedule file
//! through the night, `shutdown` powers the device down.

// CLI-specific lint allowances (CLI binary, not library)
#![allow(missing_docs)]
#![allow(clippy::print_stdout)] // CLI must print to stdout
#![allow(clippy::print_stderr)] // CLI must print to stderr
#![allow(clippy::exit)] // CLI uses exit codes
#![allow(clippy::fn_params_excessive_bools)] // CLI flags are naturally bools

use clap::{Args, CommandFactory, Parser, Subcommand, ValueEnum};
use clap_complete::{generate, Shell};
use miette::{IntoDiagnostic, Result};
use serde_json::Value;
use skyrun::config::{load_config_file, SessionConfig};
use skyrun::device::{run_target, EmulatedRunner, SessionRunner};
use skyrun::model::target::parse_coordinate;
use skyrun::schedule::load_schedule_file;
use skyrun::sequencer::{GateMode, Sequencer, SequencerOptions, DEFAULT_WINDOW_POLL};
use skyrun::session::DeviceSession;
use skyrun::twilight::SystemClock;
use skyrun::{RawTarget, ScopeError, SequenceReport};
use std::fs::OpenOptions;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

mod progress;

/// Color output mode
#[derive(Copy, Clone, Debug, Default, ValueEnum)]
enum ColorMode {
    /// Auto-detect based on terminal and `NO_COLOR` env
    #[default]
    Auto,
    /// Always use colors
    Always,
    /// Never use colors
    Never,
}

#[derive(Debug, Parser)]
#[command(name = "skyrun", version, about = "Smart telescope session controller and target sequencer")]
struct Cli {
    /// Control color output
    #[arg(long, value_enum, default_value = "auto", global = true)]
    color: ColorMode,

    /// Write logs to this file instead of stderr
    #[arg(long, global = true)]
    log_file: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

/// Where the device is and how to talk to it.
#[derive(Debug, Args)]
struct DeviceArgs {
    /// Session config file (JSON or YAML)
    #[arg(long)]
    config: Option<PathBuf>,
    /// Device host name or address
    #[arg(long)]
    host: Option<String>,
    /// Device TCP port
    #[arg(long)]
    port: Option<u16>,
    /// Log every command and frame
    #[arg(long)]
    debug: bool,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Observe one target: goto, wait, stack for the total time, stop
    RunTarget {
        /// Target name
        name: String,
        /// Right ascension (decimal, or h:m:s)
        #[arg(allow_hyphen_values = true)]
        ra: String,
        /// Declination (decimal, or d:m:s)
        #[arg(allow_hyphen_values = true)]
        dec: String,
        /// Sub-exposure time in seconds
        exposure: String,
        /// Total stacking time in seconds
        total: String,
        #[command(flatten)]
        device: DeviceArgs,
        #[arg(long, help = "Power the device down afterwards")]
        shutdown: bool,
    },
    /// Run a schedule file inside the twilight window
    Sequence {
        #[arg(long, help = "Schedule file (JSON or YAML)")]
        schedule: PathBuf,
        #[command(flatten)]
        device: DeviceArgs,
        #[arg(long, help = "Ignore the twilight window")]
        test_mode: bool,
        #[arg(long, help = "Use the emulator instead of the device")]
        dry_run: bool,
        #[arg(long, default_value_t = 0.1, help = "Emulator fault probability")]
        fault_fraction: f64,
        #[arg(long, help = "Repeat mode: stop after this many passes")]
        max_passes: Option<u32>,
        #[arg(long, short = 'v', help = "Show target-by-target progress on stderr")]
        verbose: bool,
        #[arg(long, help = "Print the report as JSON on stdout")]
        json: bool,
    },
    /// Power the device down
    Shutdown {
        #[command(flatten)]
        device: DeviceArgs,
    },
    /// Generate shell completions for bash, zsh, or fish
    Completions {
        #[arg(value_enum, help = "Shell to generate completions for")]
        shell: Shell,
    },
}

/// Configure color output based on CLI flag and environment
fn configure_colors(mode: ColorMode) -> bool {
    let use_color = match mode {
        ColorMode::Always => true,
        ColorMode::Never => false,
        ColorMode::Auto => {
            // Respect NO_COLOR environment variable
            if std::env::var("NO_COLOR").is_ok() {
                false
            } else {
                supports_color::on(supports_color::Stream::Stderr).is_some()
            }
        }
    };

    miette::set_hook(Box::new(move |_| {
        Box::new(
            miette::MietteHandlerOpts::new()
                .color(use_color)
                .unicode(use_color)
                .build(),
        )
    }))
    .ok(); // Ignore error if hook already set
    use_color
}

/// Install the tracing subscriber: `RUST_LOG` wins, else `info` (`debug` with `--debug`).
fn init_logging(debug: bool, log_file: Option<&Path>, ansi: bool) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(if debug { "debug" } else { "info" }));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false);
    let installed = match log_file {
        Some(path) => {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .into_diagnostic()?;
            builder.with_ansi(false).with_writer(Mutex::new(file)).try_init()
        }
        None => builder.with_ansi(ansi).with_writer(io::stderr).try_init(),
    };
    installed.map_err(|err| miette::miette!("failed to install logger: {err}"))
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let color = configure_colors(cli.color);
    let debug = match &cli.command {
        Commands::RunTarget { device, .. }
        | Commands::Sequence { device, .. }
        | Commands::Shutdown { device } => device.debug,
        Commands::Completions { .. } => false,
    };
    if !matches!(cli.command, Commands::Completions { .. }) {
        init_logging(debug, cli.log_file.as_deref(), color)?;
    }

    match cli.command {
        Commands::RunTarget {
            name,
            ra,
            dec,
            exposure,
            total,
            device,
            shutdown,
        } => cmd_run_target(name, &ra, &dec, &exposure, &total, &device, shutdown),
        Commands::Sequence {
            schedule,
            device,
            test_mode,
            dry_run,
            fault_fraction,
            max_passes,
            verbose,
            json,
        } => cmd_sequence(
            &schedule,
            &device,
            test_mode,
            dry_run,
            fault_fraction,
            max_passes,
            verbose,
            json,
        ),
        Commands::Shutdown { device } => cmd_shutdown(&device),
        Commands::Completions { shell } => cmd_completions(shell),
    }
}

// =============================================================================
// Command Handlers
// =============================================================================

/// Handle the run-target command. Exits 0 on success, non-zero otherwise.
#[allow(clippy::unnecessary_wraps)] // Consistent with other command handlers
fn cmd_run_target(
    name: String,
    ra: &str,
    dec: &str,
    exposure: &str,
    total: &str,
    device: &DeviceArgs,
    shutdown: bool,
) -> Result<()> {
    let raw = RawTarget {
        name: Value::String(name),
        coords: Value::Array(vec![coordinate_arg(ra), coordinate_arg(dec)]),
        exposure: number_arg(exposure),
        total: number_arg(total),
    };
    let config = match resolve_config(device) {
        Ok(config) => config,
        Err(err) => {
            eprintln!("error: {err}");
            std::process::exit(1);
        }
    };
    let mut runner = SessionRunner::new(config).shutdown_after(shutdown);
    std::process::exit(run_target(&mut runner, raw));
}

/// Handle the sequence command.
#[allow(clippy::too_many_arguments)]
fn cmd_sequence(
    schedule_path: &Path,
    device: &DeviceArgs,
    test_mode: bool,
    dry_run: bool,
    fault_fraction: f64,
    max_passes: Option<u32>,
    verbose: bool,
    json: bool,
) -> Result<()> {
    let schedule =
        load_schedule_file(schedule_path).unwrap_or_else(|err| exit_with_error(json, &err));
    let twilight = schedule
        .observatory
        .twilight()
        .unwrap_or_else(|err| exit_with_error(json, &err));
    let options = SequencerOptions {
        mode: schedule.mode,
        failure_policy: schedule.failure_policy,
        gate: if test_mode { GateMode::Bypass } else { GateMode::Enforce },
        window_poll: DEFAULT_WINDOW_POLL,
        max_passes,
    };

    let cancel = Arc::new(AtomicBool::new(false));
    let flag = Arc::clone(&cancel);
    ctrlc::set_handler(move || flag.store(true, Ordering::SeqCst)).into_diagnostic()?;

    let mut sequencer = Sequencer::new(
        options,
        Arc::new(SystemClock::new(twilight.offset())),
        Arc::new(twilight),
    )
    .with_cancel_flag(cancel);
    if verbose {
        sequencer = sequencer.with_progress(Box::new(progress::VerboseProgress::new()));
    }

    let result = if dry_run {
        // Keep stdout clean for the JSON report.
        let echo: Box<dyn io::Write + Send> = if json {
            Box::new(io::stderr())
        } else {
            Box::new(io::stdout())
        };
        let mut runner = EmulatedRunner::new(fault_fraction).echo_to(echo);
        sequencer.run(&schedule.targets, &mut runner)
    } else {
        let config = resolve_config(device).unwrap_or_else(|err| exit_with_error(json, &err));
        let mut runner = SessionRunner::new(config);
        sequencer.run(&schedule.targets, &mut runner)
    };

    let report = result.unwrap_or_else(|err| exit_with_error(json, &err));
    info!(run_id = %report.run_id, status = ?report.status, "sequence finished");
    emit_report(json, &report)?;
    std::process::exit(report.exit_code());
}

/// Handle the shutdown command.
fn cmd_shutdown(device: &DeviceArgs) -> Result<()> {
    let config = resolve_config(device)?;
    let session = DeviceSession::connect(config)?;
    session.shutdown()?;
    if !session.close() {
        warn!("event listener did not stop in time");
    }
    eprintln!("shutdown sent");
    Ok(())
}

/// Handle the completions command.
#[allow(clippy::unnecessary_wraps)] // Consistent with other command handlers
fn cmd_completions(shell: Shell) -> Result<()> {
    let mut cmd = Cli::command();
    let name = cmd.get_name().to_string();
    generate(shell, &mut cmd, name, &mut io::stdout());
    Ok(())
}

// =============================================================================
// Helpers
// =============================================================================

/// Config file (if any) with `--host`, `--port` and `--debug` applied on top.
fn resolve_config(device: &DeviceArgs) -> Result<SessionConfig, ScopeError> {
    let mut config = match &device.config {
        Some(path) => load_config_file(path)?,
        None => SessionConfig::default(),
    };
    if let Some(host) = &device.host {
        config.host.clone_from(host);
    }
    if let Some(port) = device.port {
        config.port = port;
    }
    config.debug |= device.debug;
    config.validate()?;
    Ok(config)
}

/// Text argument to JSON: a number when it parses as one, else the raw text.
fn number_arg(text: &str) -> Value {
    text.trim()
        .parse::<f64>()
        .ok()
        .filter(|value| value.is_finite())
        .map_or_else(|| Value::String(text.to_string()), Value::from)
}

fn coordinate_arg(text: &str) -> Value {
    parse_coordinate(text).map_or_else(|| Value::String(text.to_string()), Value::from)
}

fn emit_report(json: bool, report: &SequenceReport) -> Result<()> {
    if json {
        let payload = serde_json::to_string_pretty(report).into_diagnostic()?;
        println!("{payload}");
        return Ok(());
    }
    for target in &report.targets {
        let detail = target
            .error
            .as_ref()
            .map(|err| format!(" [{}: {}]", err.code, err.message))
            .unwrap_or_default();
        eprintln!(
            "{} (pass {}): {:?}, {} attempt(s){detail}",
            target.name, target.pass, target.status, target.attempts
        );
    }
    eprintln!(
        "sequence {:?}: {:?} after {} pass(es)",
        report.status, report.stop_reason, report.passes_completed
    );
    Ok(())
}

fn exit_with_error(json: bool, err: &ScopeError) -> ! {
    if json {
        let payload =
            serde_json::to_string(&err.to_error_info()).unwrap_or_else(|_| err.to_string());
        println!("{payload}");
    } else {
        eprintln!("error: {err}");
        if let Some(context) = &err.context {
            eprintln!("  {context}");
        }
    }
    std::process::exit(err.exit_code());
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn numeric_arguments_become_numbers() {
        assert_eq!(number_arg("10"), Value::from(10.0));
        assert_eq!(number_arg("ten"), Value::String("ten".into()));
        assert_eq!(coordinate_arg("-05:30:00"), Value::from(-5.5));
        assert_eq!(coordinate_arg("abc"), Value::String("abc".into()));
    }

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }
}
