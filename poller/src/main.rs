//! KudoMan Poller Binary
//!
//! Entry point for the long-running Kudos balance poller.

#![deny(unsafe_code)]

use std::process::ExitCode;

#[tokio::main]
async fn main() -> ExitCode {
    // Load .env before tracing so LOGLEVEL from the file applies
    let dotenv = dotenvy::dotenv();
    poller::logging::init_tracing();
    if let Err(e) = dotenv {
        if !e.not_found() {
            tracing::warn!(error = %e, "Failed to load .env file");
        }
    }

    match poller::run_poller().await {
        Ok(stats) => {
            tracing::info!(
                cycles = stats.cycles,
                recorded = stats.recorded,
                skipped = stats.skipped,
                "KudoMan poller shut down cleanly"
            );
            ExitCode::SUCCESS
        }
        Err(e) => {
            let code = e.exit_code();
            let report = anyhow::Error::new(e);
            tracing::error!(exit_code = code, "KudoMan poller stopped: {report:#}");
            ExitCode::from(code)
        }
    }
}
