//! KudoMan CLI
//!
//! Operator commands for the Kudos balance poller.
//!
//! # Usage
//!
//! ```bash
//! kudoman --help
//! kudoman report --output kudos.svg
//! kudoman status --json
//! kudoman check
//! ```

#![deny(unsafe_code)]

use anyhow::Context;
use clap::builder::RangedU64ValueParser;
use clap::{Args, Parser, Subcommand};
use poller::config::DEFAULT_LOG_PATH;
use poller::{BalanceFetcher, HordeClient};
use serde::Serialize;
use shared::config::ReportConfig;
use shared::lock::{LockState, LockStatus};
use shared::models::Reading;
use shared::report::generate_report;
use shared::storage::read_log;
use std::path::{Path, PathBuf};

/// KudoMan CLI - reports, lock status and credential checks
#[derive(Parser)]
#[command(name = "kudoman")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Reading log written by the poller
    #[arg(
        short,
        long,
        env = "LOG_PATH",
        default_value = DEFAULT_LOG_PATH,
        value_parser = parse_log_path
    )]
    log_path: PathBuf,

    #[command(subcommand)]
    command: Option<Commands>,
}

/// Blank values count as unset, as they do for the poller.
fn parse_log_path(value: &str) -> Result<PathBuf, std::convert::Infallible> {
    let value = value.trim();
    if value.is_empty() {
        Ok(PathBuf::from(DEFAULT_LOG_PATH))
    } else {
        Ok(PathBuf::from(value))
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Render the reading log as an SVG chart
    Report(ReportArgs),
    /// Show the lock holder and the state of the log
    Status {
        /// Print machine-readable JSON
        #[arg(long)]
        json: bool,
    },
    /// Fetch the balance once to verify API_KEY
    Check,
}

#[derive(Args, Debug, Default)]
struct ReportArgs {
    /// Chart output path (overrides REPORT_PATH)
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Moving average window in samples (overrides MA_WINDOW)
    #[arg(long, value_parser = RangedU64ValueParser::<usize>::new().range(1..))]
    ma_window: Option<usize>,

    /// Do not plot the moving average
    #[arg(long)]
    no_ma: bool,

    /// Do not plot the first difference
    #[arg(long)]
    no_d1: bool,

    /// Do not plot the moving average of the first difference
    #[arg(long)]
    no_mad1: bool,
}

impl ReportArgs {
    /// Applies the flags on top of the environment-derived options.
    fn apply(&self, mut config: ReportConfig) -> ReportConfig {
        if let Some(output) = &self.output {
            config.output.clone_from(output);
        }
        if let Some(window) = self.ma_window {
            config.ma_window = window;
        }
        config.show_ma &= !self.no_ma;
        config.show_d1 &= !self.no_d1;
        config.show_mad1 &= !self.no_mad1;
        config
    }
}

/// What `kudoman status` reports.
#[derive(Debug, Serialize)]
struct StatusReport {
    log_path: PathBuf,
    lock_path: PathBuf,
    lock: Option<LockStatus>,
    log_exists: bool,
    readings: usize,
    skipped_rows: usize,
    last: Option<Reading>,
}

fn collect_status(log_path: &Path) -> anyhow::Result<StatusReport> {
    let lock_path = poller::config::lock_path_for(log_path);
    let lock = shared::lock::inspect(&lock_path)
        .with_context(|| format!("Failed to inspect lock {}", lock_path.display()))?;

    let log_exists = log_path.exists();
    let (readings, skipped_rows, last) = if log_exists {
        let contents = read_log(log_path)
            .with_context(|| format!("Failed to read log {}", log_path.display()))?;
        (
            contents.readings.len(),
            contents.skipped_rows,
            contents.readings.last().copied(),
        )
    } else {
        (0, 0, None)
    };

    Ok(StatusReport {
        log_path: log_path.to_path_buf(),
        lock_path,
        lock,
        log_exists,
        readings,
        skipped_rows,
        last,
    })
}

fn render_status(status: &StatusReport) -> String {
    let log = if status.log_exists {
        let mut line = format!("{} ({} readings", status.log_path.display(), status.readings);
        if status.skipped_rows > 0 {
            line.push_str(&format!(", {} malformed rows", status.skipped_rows));
        }
        line.push(')');
        line
    } else {
        format!("{} (missing)", status.log_path.display())
    };

    let last = match &status.last {
        Some(reading) => format!("{} Kudos at {}", reading.value, reading.timestamp),
        None => "none".to_string(),
    };

    let lock = match &status.lock {
        None => "not held".to_string(),
        Some(LockStatus { record, state }) => {
            let holder = match record {
                Some(record) => format!("pid {} since {}", record.pid, record.acquired_at),
                None => "unknown holder".to_string(),
            };
            match state {
                LockState::Live => format!("held by {holder}, running"),
                LockState::Stale(reason) => format!("stale, {holder} ({reason})"),
            }
        }
    };

    format!(
        "Log:     {log}\nLast:    {last}\nLock:    {lock}\n         {}",
        status.lock_path.display()
    )
}

async fn check_balance() -> anyhow::Result<u64> {
    let config = poller::Config::from_env().context("Invalid configuration")?;
    let mut client =
        HordeClient::new(&config.api_url, &config.api_key, config.request_timeout())
            .context("Failed to build HTTP client")?;
    let balance = client
        .fetch_balance()
        .await
        .with_context(|| format!("Balance check against {} failed", client.url()))?;
    Ok(balance)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Before parsing, so .env can supply LOG_PATH
    let dotenv = dotenvy::dotenv();
    let cli = Cli::parse();
    poller::logging::init_tracing();
    if let Err(e) = dotenv {
        if !e.not_found() {
            tracing::warn!(error = %e, "Failed to load .env file");
        }
    }

    match cli.command {
        Some(Commands::Report(args)) => {
            let config = args.apply(ReportConfig::from_env().context("Invalid report options")?);
            let summary = generate_report(&cli.log_path, &config)?;
            println!(
                "Wrote {} ({} readings, {} to {} Kudos)",
                summary.output.display(),
                summary.readings,
                summary.first.value,
                summary.last.value
            );
        }
        Some(Commands::Status { json }) => {
            let status = collect_status(&cli.log_path)?;
            if json {
                println!("{}", serde_json::to_string_pretty(&status)?);
            } else {
                println!("{}", render_status(&status));
            }
        }
        Some(Commands::Check) => {
            let balance = check_balance().await?;
            println!("API key accepted, current balance: {balance} Kudos");
        }
        None => {
            println!("KudoMan CLI v{}", env!("CARGO_PKG_VERSION"));
            println!("Use --help for usage information");
        }
    }

    Ok(())
}
