//! Kudos report generation.
//!
//! Reads the reading log read-only, derives the chart series and writes an
//! SVG chart. Runs on operator demand, independently of the poller.

pub mod chart;
pub mod stats;

pub use chart::render_svg;
pub use stats::KudosSeries;

use crate::config::ReportConfig;
use crate::models::Reading;
use crate::storage::{read_log, LogStoreError};
use std::io::Write;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Errors that can occur while generating a report.
#[derive(Debug, Error)]
pub enum ReportError {
    /// The log could not be read.
    #[error(transparent)]
    Log(#[from] LogStoreError),

    /// The log holds no readings to plot.
    #[error("No readings in {}", .0.display())]
    NoData(PathBuf),

    /// The chart could not be written.
    #[error("Failed to write chart to {}: {source}", .path.display())]
    Write {
        /// Chart output path.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },
}

/// Summary of a generated report.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReportSummary {
    /// Where the chart was written.
    pub output: PathBuf,
    /// Number of readings plotted.
    pub readings: usize,
    /// Number of malformed rows skipped.
    pub skipped_rows: usize,
    /// The first plotted reading.
    pub first: Reading,
    /// The last plotted reading.
    pub last: Reading,
}

/// Renders the chart for the log at `log_path` to `config.output`.
///
/// The chart is staged next to its destination and moved into place, so a
/// viewer never sees a half-written file.
///
/// # Errors
///
/// Returns an error if the log cannot be read, holds no readings, or the
/// chart cannot be written.
pub fn generate_report(
    log_path: impl AsRef<Path>,
    config: &ReportConfig,
) -> Result<ReportSummary, ReportError> {
    let log_path = log_path.as_ref();
    let contents = read_log(log_path)?;
    let (Some(first), Some(last)) = (
        contents.readings.first().copied(),
        contents.readings.last().copied(),
    ) else {
        return Err(ReportError::NoData(log_path.to_path_buf()));
    };

    let series = KudosSeries::compute(&contents.readings, config.ma_window);
    let svg = render_svg(&series, config);
    write_atomically(&config.output, svg.as_bytes()).map_err(|source| ReportError::Write {
        path: config.output.clone(),
        source,
    })?;

    tracing::info!(
        output = %config.output.display(),
        readings = series.len(),
        skipped_rows = contents.skipped_rows,
        "Report written"
    );

    Ok(ReportSummary {
        output: config.output.clone(),
        readings: series.len(),
        skipped_rows: contents.skipped_rows,
        first,
        last,
    })
}

fn write_atomically(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    std::fs::create_dir_all(dir)?;
    let mut staged = tempfile::NamedTempFile::new_in(dir)?;
    staged.write_all(bytes)?;
    staged.as_file().sync_all()?;
    staged.persist(path).map_err(|e| e.error)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{CsvLogStore, ReadingStore};
    use chrono::{Duration, TimeZone, Utc};

    #[test]
    fn test_generate_report_writes_svg() {
        let dir = tempfile::tempdir().unwrap();
        let log = dir.path().join("out.csv");
        let start = Utc.with_ymd_and_hms(2024, 3, 9, 8, 0, 0).unwrap();
        let mut store = CsvLogStore::open_or_rotate(&log).unwrap();
        for i in 0..10_u32 {
            let reading = Reading::new(start + Duration::minutes(i64::from(i)), u64::from(100 + i * 3));
            store.append(&reading).unwrap();
        }
        let config = ReportConfig {
            output: dir.path().join("charts").join("out.svg"),
            ..ReportConfig::default()
        };

        let summary = generate_report(&log, &config).unwrap();

        assert_eq!(summary.readings, 10);
        assert_eq!(summary.first.value, 100);
        assert_eq!(summary.last.value, 127);
        let svg = std::fs::read_to_string(&config.output).unwrap();
        assert!(svg.starts_with("<svg"));
    }

    #[test]
    fn test_generate_report_leaves_log_untouched() {
        let dir = tempfile::tempdir().unwrap();
        let log = dir.path().join("out.csv");
        let mut store = CsvLogStore::open_or_rotate(&log).unwrap();
        store.append(&Reading::now(5)).unwrap();
        let before = std::fs::read(&log).unwrap();
        let config = ReportConfig {
            output: dir.path().join("out.svg"),
            ..ReportConfig::default()
        };

        generate_report(&log, &config).unwrap();

        assert_eq!(std::fs::read(&log).unwrap(), before);
    }

    #[test]
    fn test_generate_report_empty_log() {
        let dir = tempfile::tempdir().unwrap();
        let log = dir.path().join("out.csv");
        CsvLogStore::open_or_rotate(&log).unwrap();
        let config = ReportConfig {
            output: dir.path().join("out.svg"),
            ..ReportConfig::default()
        };

        let result = generate_report(&log, &config);

        assert!(matches!(result, Err(ReportError::NoData(_))));
        assert!(!config.output.exists());
    }

    #[test]
    fn test_generate_report_missing_log() {
        let dir = tempfile::tempdir().unwrap();
        let config = ReportConfig {
            output: dir.path().join("out.svg"),
            ..ReportConfig::default()
        };

        let result = generate_report(dir.path().join("out.csv"), &config);

        assert!(matches!(result, Err(ReportError::Log(_))));
    }
}
