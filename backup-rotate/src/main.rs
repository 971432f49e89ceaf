//! backup-rotate - Main entry point
//!
//! Generational backups over rsync, one named configuration per invocation.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use backup_rotate::config::{self, Config, DEFAULT_CONFIG_DIR};
use backup_rotate::executor::{BackupRun, RunOptions};
use backup_rotate::lock::DirLock;
use backup_rotate::report::{mail, CaptureBuffer, RunReport};
use backup_rotate::retention::{self, Period};
use backup_rotate::signals::Signals;
use backup_rotate::{status, utils, RotateError};
use chrono::{Local, NaiveDate};
use clap::{Parser, Subcommand};
use tracing::{error, info};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Directory holding named configurations
    #[arg(long, value_name = "DIR", default_value = DEFAULT_CONFIG_DIR)]
    config_dir: PathBuf,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Rotate and back up the periods due today
    Run {
        /// Configuration name or path
        config: String,

        /// Evaluate the schedule for this date instead of today
        #[arg(long, value_name = "YYYY-MM-DD")]
        date: Option<NaiveDate>,

        /// Run this period regardless of the schedule (repeatable)
        #[arg(long, value_parser = parse_period)]
        period: Vec<Period>,

        /// Show what would be done without changing anything
        #[arg(long)]
        dry_run: bool,

        /// Do not mail the report
        #[arg(long)]
        no_mail: bool,
    },

    /// Show the periods due on a date
    Plan {
        config: String,

        #[arg(long, value_name = "YYYY-MM-DD")]
        date: Option<NaiveDate>,
    },

    /// Show the lock and the generations present
    Status {
        config: String,

        /// Print JSON instead of text
        #[arg(long)]
        json: bool,
    },

    /// Remove a stale lock
    Unlock {
        config: String,

        /// Also remove a lock held by a running process
        #[arg(long)]
        force: bool,
    },

    /// Print the effective configuration
    Config { config: String },
}

fn parse_period(value: &str) -> std::result::Result<Period, String> {
    value.parse().map_err(|_| {
        format!("unknown period '{value}' (expected daily, weekly, monthly or yearly)")
    })
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let code = match dispatch(cli).await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("Error: {e:#}");
            e.downcast_ref::<RotateError>()
                .map(RotateError::exit_code)
                .unwrap_or(1)
        }
    };

    std::process::exit(code);
}

async fn dispatch(cli: Cli) -> Result<i32> {
    let load = |name: &str| Config::from_file(&config::resolve_path(name, &cli.config_dir));
    let log_level = |config: &Config| {
        cli.log_level
            .clone()
            .unwrap_or_else(|| config.log.level.clone())
    };

    match &cli.command {
        Command::Run {
            config,
            date,
            period,
            dry_run,
            no_mail,
        } => {
            let config = load(config.as_str())?;
            let capture = CaptureBuffer::new();
            utils::logger::init(&log_level(&config), Some(capture.clone()))?;

            let options = RunOptions {
                date: date.unwrap_or_else(|| Local::now().date_naive()),
                periods: period.clone(),
                dry_run: *dry_run,
            };
            let code =
                run_backup(Arc::new(config), options, capture, *no_mail || *dry_run).await?;
            Ok(code)
        }

        Command::Plan { config, date } => {
            let config = load(config.as_str())?;
            utils::logger::init(&log_level(&config), None)?;

            let date = date.unwrap_or_else(|| Local::now().date_naive());
            let periods = retention::plan_for_date(date, &config.retention, &config.schedule);
            println!("{} on {date}:", config.name);
            if periods.is_empty() {
                println!("  nothing due");
            }
            for period in periods {
                println!("  {period} (keep {})", config.retention.keep(period));
            }
            Ok(0)
        }

        Command::Status { config, json } => {
            let config = load(config.as_str())?;
            utils::logger::init(&log_level(&config), None)?;

            let status = status::collect(&config)?;
            if *json {
                println!("{}", serde_json::to_string_pretty(&status)?);
            } else {
                print!("{}", status.render());
            }
            Ok(0)
        }

        Command::Unlock { config, force } => {
            let config = load(config.as_str())?;
            utils::logger::init(&log_level(&config), None)?;

            let lock = DirLock::new(config.lock_path());
            if lock.clear(*force)? {
                println!("Removed lock {}", lock.path().display());
            } else {
                println!("No lock at {}", lock.path().display());
            }
            Ok(0)
        }

        Command::Config { config } => {
            let config = load(config.as_str())?;
            print!("{}", config.to_toml()?);
            Ok(0)
        }
    }
}

/// Run one backup, racing it against termination signals, then mail the
/// report. Returns the process exit code.
async fn run_backup(
    config: Arc<Config>,
    options: RunOptions,
    capture: CaptureBuffer,
    no_mail: bool,
) -> Result<i32> {
    let mut signals = Signals::install()?;
    let host = hostname::get()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|_| "localhost".to_string());
    let started = Local::now();

    info!(
        "Starting backup-rotate v{} for {} on {host}",
        env!("CARGO_PKG_VERSION"),
        config.name
    );

    let mut run = BackupRun::new(Arc::clone(&config), options);
    let outcome = tokio::select! {
        result = run.execute() => result,
        interrupted = signals.recv() => Err(interrupted),
    };

    if let Err(e @ RotateError::Interrupted { .. }) = &outcome {
        run.abort(e).await;
    }

    let (error, exit_code, exit_reason) = match &outcome {
        Ok(()) => (None, 0, "success"),
        Err(e) => {
            error!("{e}");
            (Some(e.to_string()), e.exit_code(), e.describe())
        }
    };
    info!("Exit code {exit_code}: {exit_reason}");

    let report = RunReport {
        name: config.name.clone(),
        host,
        destination: run.store().describe(),
        started,
        finished: Local::now(),
        periods: run.results().to_vec(),
        error,
        exit_code,
        exit_reason,
        log: capture.contents(),
    };

    if !no_mail {
        mail::deliver(&config.mail, &report).await;
    }

    Ok(exit_code)
}
