//! KudoMan Poller
//!
//! This crate provides the long-running poller that records a Kudos balance
//! into an append-only CSV log at a fixed interval.
//!
//! # Architecture
//!
//! A run of the poller is:
//! - Acquire the single-instance lock next to the log
//! - Open the log, rotating it aside if its header is invalid
//! - Snapshot the log into the backup directory and prune old snapshots
//! - Sample until a shutdown signal or an unrecoverable error
//! - Release the lock, whatever ended the run
//!
//! # Example
//!
//! ```no_run
//! use poller::run_poller;
//!
//! #[tokio::main]
//! async fn main() {
//!     if let Err(e) = run_poller().await {
//!         std::process::exit(i32::from(e.exit_code()));
//!     }
//! }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod config;
pub mod fetch;
pub mod logging;
pub mod sampler;

pub use config::Config;
pub use fetch::{BalanceFetcher, FetchError, HordeClient};
pub use sampler::{Sampler, SamplerConfig, SamplerError, SamplerState, SamplerStats};

use chrono::Utc;
use shared::config::ConfigError;
use shared::lock::{LockError, ReleaseOutcome};
use shared::storage::{prune_snapshots, write_snapshot, CsvLogStore, LogStoreError, OpenOutcome};
use std::future::Future;
use thiserror::Error;
use tokio::sync::watch;

/// Exit code for a fatal error.
pub const EXIT_FATAL: u8 = 1;
/// Exit code for invalid configuration.
pub const EXIT_CONFIG: u8 = 2;
/// Exit code when another instance holds the lock.
pub const EXIT_ALREADY_RUNNING: u8 = 3;

/// Errors that end a poller run.
#[derive(Debug, Error)]
pub enum PollerError {
    /// The configuration could not be resolved.
    #[error("Invalid configuration")]
    Config(#[from] ConfigError),

    /// The lock could not be acquired or released.
    #[error(transparent)]
    Lock(#[from] LockError),

    /// The log could not be opened.
    #[error(transparent)]
    LogStore(#[from] LogStoreError),

    /// The HTTP client could not be built.
    #[error("Failed to build HTTP client")]
    Client(#[from] reqwest::Error),

    /// The sampler stopped on an unrecoverable error.
    #[error("Sampler stopped")]
    Sampler(#[from] SamplerError),
}

impl PollerError {
    /// The process exit code for this error.
    #[must_use]
    pub fn exit_code(&self) -> u8 {
        match self {
            Self::Config(_) => EXIT_CONFIG,
            Self::Lock(LockError::AlreadyRunning { .. }) => EXIT_ALREADY_RUNNING,
            _ => EXIT_FATAL,
        }
    }
}

/// Runs the poller with configuration from environment variables.
///
/// Stops on SIGTERM/SIGINT.
///
/// # Errors
///
/// Returns an error if:
/// - Configuration cannot be loaded from environment
/// - Another instance holds the lock
/// - The log cannot be opened
/// - The sampler stops on a fatal fetch or repeated write failures
pub async fn run_poller() -> Result<SamplerStats, PollerError> {
    let config = Config::from_env()?;
    run_poller_with_config(&config, shutdown_signal()).await
}

/// Runs the poller against the AI Horde endpoint in `config`.
///
/// The run stops cleanly once `shutdown` completes.
///
/// # Errors
///
/// See [`run_poller`].
pub async fn run_poller_with_config<S>(
    config: &Config,
    shutdown: S,
) -> Result<SamplerStats, PollerError>
where
    S: Future<Output = ()> + Send + 'static,
{
    let fetcher = HordeClient::new(&config.api_url, &config.api_key, config.request_timeout())?;
    run_poller_with_fetcher(config, fetcher, shutdown).await
}

/// Runs the poller with the given fetcher.
///
/// The lock is released before returning, whatever ended the run.
///
/// # Errors
///
/// See [`run_poller`].
pub async fn run_poller_with_fetcher<F, S>(
    config: &Config,
    fetcher: F,
    shutdown: S,
) -> Result<SamplerStats, PollerError>
where
    F: BalanceFetcher,
    S: Future<Output = ()> + Send + 'static,
{
    tracing::info!(
        log = %config.log_path.display(),
        lock = %config.lock_path.display(),
        interval_secs = config.poll_interval_secs,
        "KudoMan poller starting"
    );

    let lock = shared::lock::acquire(&config.lock_path)?;
    let result = sample_while_locked(config, fetcher, shutdown).await;

    match lock.release() {
        Ok(ReleaseOutcome::Removed) => tracing::debug!("Lock released"),
        Ok(outcome) => tracing::warn!(?outcome, "Lock file was not ours to remove"),
        Err(e) => {
            tracing::error!(error = %e, "Failed to release lock");
            if result.is_ok() {
                return Err(e.into());
            }
        }
    }
    result
}

async fn sample_while_locked<F, S>(
    config: &Config,
    fetcher: F,
    shutdown: S,
) -> Result<SamplerStats, PollerError>
where
    F: BalanceFetcher,
    S: Future<Output = ()> + Send + 'static,
{
    let store = CsvLogStore::open_or_rotate(&config.log_path)?;
    match store.outcome() {
        OpenOutcome::Created => tracing::info!(log = %store.path().display(), "Created new log"),
        OpenOutcome::Opened => tracing::info!(log = %store.path().display(), "Appending to existing log"),
        OpenOutcome::Rotated { backup } => tracing::warn!(
            log = %store.path().display(),
            backup = %backup.display(),
            "Log header was invalid, moved it aside and started a new log"
        ),
    }
    snapshot_log(config);

    let (tx, rx) = watch::channel(false);
    let signal = tokio::spawn(async move {
        shutdown.await;
        let _ = tx.send(true);
    });

    let mut sampler = Sampler::new(SamplerConfig::new(config.poll_interval()), fetcher, store);
    let result = sampler.run(rx).await;
    signal.abort();

    Ok(result?)
}

/// Copies the log into the backup directory and prunes old copies.
///
/// Failures are logged and never stop the poller.
fn snapshot_log(config: &Config) {
    match write_snapshot(&config.log_path, &config.backup_dir, Utc::now()) {
        Ok(path) => tracing::info!(snapshot = %path.display(), "Log snapshot written"),
        Err(e) => {
            tracing::warn!(error = %e, "Failed to snapshot log");
            return;
        }
    }

    match prune_snapshots(&config.log_path, &config.backup_dir, config.num_backups) {
        Ok(removed) => {
            for path in removed {
                tracing::debug!(snapshot = %path.display(), "Pruned old snapshot");
            }
        }
        Err(e) => tracing::warn!(error = %e, "Failed to prune snapshots"),
    }
}

/// Waits for a shutdown signal (SIGTERM or SIGINT).
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("Received Ctrl+C, shutting down");
        }
        () = terminate => {
            tracing::info!("Received SIGTERM, shutting down");
        }
    }
}
