//! The scheduling loop.
//!
//! Every interval the sampler asks its [`BalanceFetcher`] for the balance,
//! timestamps it and appends it to its [`ReadingStore`]. Intervals are
//! measured from the start of each cycle, and the sleep between cycles ends
//! early when shutdown is requested.

use crate::fetch::{BalanceFetcher, FetchError};
use shared::models::Reading;
use shared::storage::{LogWriteError, ReadingStore};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::watch;
use tokio::time::{sleep_until, Instant};

/// Consecutive failed appends tolerated before the sampler gives up.
pub const MAX_CONSECUTIVE_WRITE_FAILURES: u32 = 3;

/// Sampler settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SamplerConfig {
    /// Time between the starts of consecutive cycles.
    pub interval: Duration,
    /// Consecutive failed appends that escalate to a fatal error.
    pub max_consecutive_write_failures: u32,
}

impl SamplerConfig {
    /// Creates a configuration with the given interval.
    #[must_use]
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            max_consecutive_write_failures: MAX_CONSECUTIVE_WRITE_FAILURES,
        }
    }
}

/// Where the sampler is in its cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SamplerState {
    /// Not started yet.
    Idle,
    /// Waiting on the fetcher.
    Fetching,
    /// Appending a reading.
    Recording,
    /// Waiting for the next cycle.
    Sleeping,
    /// Stopped by a shutdown request.
    Cancelled,
    /// Stopped by an unrecoverable error.
    Fatal,
}

impl SamplerState {
    /// Returns true for the states the sampler never leaves.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Cancelled | Self::Fatal)
    }
}

/// Result of a single cycle that did not stop the sampler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CycleOutcome {
    /// The reading was appended.
    Recorded(Reading),
    /// The fetch failed transiently; nothing was recorded.
    Skipped(FetchError),
    /// The append failed; `consecutive` failures so far.
    WriteFailed {
        /// Failed appends in a row, including this one.
        consecutive: u32,
    },
}

/// Why the sampler stopped on its own.
#[derive(Debug, Error)]
pub enum SamplerError {
    /// The fetcher reported a failure retrying cannot fix.
    #[error("{0}")]
    Fetch(FetchError),

    /// Too many appends failed in a row.
    #[error("{failures} consecutive log writes failed, last error: {source}")]
    LogWrite {
        /// Failed appends in a row.
        failures: u32,
        /// The last append error.
        #[source]
        source: LogWriteError,
    },
}

/// Counters kept across cycles.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SamplerStats {
    /// Cycles started.
    pub cycles: u64,
    /// Readings appended.
    pub recorded: u64,
    /// Cycles skipped on transient fetch failures.
    pub skipped: u64,
    /// Failed appends.
    pub write_failures: u64,
}

/// Periodic balance sampler.
///
/// Owns its fetcher and store for its whole lifetime.
pub struct Sampler<F, S> {
    config: SamplerConfig,
    fetcher: F,
    store: S,
    state: SamplerState,
    consecutive_write_failures: u32,
    stats: SamplerStats,
}

impl<F, S> Sampler<F, S>
where
    F: BalanceFetcher,
    S: ReadingStore,
{
    /// Creates an idle sampler.
    #[must_use]
    pub fn new(config: SamplerConfig, fetcher: F, store: S) -> Self {
        Self {
            config,
            fetcher,
            store,
            state: SamplerState::Idle,
            consecutive_write_failures: 0,
            stats: SamplerStats::default(),
        }
    }

    /// Current state.
    #[must_use]
    pub fn state(&self) -> SamplerState {
        self.state
    }

    /// Counters so far.
    #[must_use]
    pub fn stats(&self) -> SamplerStats {
        self.stats
    }

    /// The store readings are appended to.
    #[must_use]
    pub fn store(&self) -> &S {
        &self.store
    }

    /// Consumes the sampler, returning its fetcher and store.
    pub fn into_parts(self) -> (F, S) {
        (self.fetcher, self.store)
    }

    fn transition(&mut self, next: SamplerState) {
        if self.state != next {
            tracing::debug!(from = ?self.state, to = ?next, "Sampler state change");
            self.state = next;
        }
    }

    /// Runs one fetch-and-record cycle, without sleeping.
    ///
    /// # Errors
    ///
    /// Returns an error, leaving the sampler in [`SamplerState::Fatal`], if
    /// the fetch fails fatally or too many appends have failed in a row.
    pub async fn run_cycle(&mut self) -> Result<CycleOutcome, SamplerError> {
        self.stats.cycles += 1;
        self.transition(SamplerState::Fetching);

        let value = match self.fetcher.fetch_balance().await {
            Ok(value) => value,
            Err(error @ FetchError::Transient(_)) => {
                tracing::warn!(cycle = self.stats.cycles, error = %error, "Fetch failed, skipping this cycle");
                self.stats.skipped += 1;
                return Ok(CycleOutcome::Skipped(error));
            }
            Err(error @ FetchError::Fatal(_)) => {
                tracing::error!(cycle = self.stats.cycles, error = %error, "Fetch failed fatally");
                self.transition(SamplerState::Fatal);
                return Err(SamplerError::Fetch(error));
            }
        };

        self.transition(SamplerState::Recording);
        let reading = Reading::now(value);
        match self.store.append(&reading) {
            Ok(()) => {
                self.consecutive_write_failures = 0;
                self.stats.recorded += 1;
                tracing::info!(kudos = value, timestamp = %reading.timestamp, "Recorded reading");
                Ok(CycleOutcome::Recorded(reading))
            }
            Err(source) => {
                self.consecutive_write_failures += 1;
                self.stats.write_failures += 1;
                let failures = self.consecutive_write_failures;
                if failures >= self.config.max_consecutive_write_failures {
                    tracing::error!(failures, error = %source, "Log writes keep failing, giving up");
                    self.transition(SamplerState::Fatal);
                    return Err(SamplerError::LogWrite { failures, source });
                }
                tracing::warn!(failures, error = %source, "Failed to append reading");
                Ok(CycleOutcome::WriteFailed {
                    consecutive: failures,
                })
            }
        }
    }

    /// Runs cycles until `shutdown` turns true or an unrecoverable error occurs.
    ///
    /// A shutdown request interrupts the sleep between cycles but never an
    /// in-flight fetch. If a cycle overruns the interval the next one starts
    /// immediately; missed cycles are not made up.
    ///
    /// # Errors
    ///
    /// Returns the [`SamplerError`] that stopped the loop.
    pub async fn run(
        &mut self,
        mut shutdown: watch::Receiver<bool>,
    ) -> Result<SamplerStats, SamplerError> {
        tracing::info!(interval_secs = self.config.interval.as_secs(), "Sampler started");

        loop {
            if *shutdown.borrow_and_update() {
                break;
            }

            let cycle_start = Instant::now();
            self.run_cycle().await?;

            self.transition(SamplerState::Sleeping);
            let deadline = cycle_start
                .checked_add(self.config.interval)
                .unwrap_or_else(far_future);
            if Instant::now() >= deadline {
                tracing::warn!(
                    elapsed_secs = cycle_start.elapsed().as_secs(),
                    "Cycle overran the interval, starting the next one immediately"
                );
            }
            if sleep_or_shutdown(deadline, &mut shutdown).await {
                break;
            }
        }

        self.transition(SamplerState::Cancelled);
        tracing::info!(
            recorded = self.stats.recorded,
            skipped = self.stats.skipped,
            "Sampler stopped"
        );
        Ok(self.stats)
    }
}

/// Deadline for intervals too long for [`Instant`] to represent.
fn far_future() -> Instant {
    Instant::now() + Duration::from_secs(86_400 * 365 * 30)
}

/// Sleeps until `deadline`; returns true if shutdown was requested first.
async fn sleep_or_shutdown(deadline: Instant, shutdown: &mut watch::Receiver<bool>) -> bool {
    loop {
        if *shutdown.borrow_and_update() {
            return true;
        }
        tokio::select! {
            () = sleep_until(deadline) => return false,
            changed = shutdown.changed() => {
                if changed.is_err() {
                    // Sender gone: no shutdown can arrive anymore.
                    sleep_until(deadline).await;
                    return false;
                }
            }
        }
    }
}
