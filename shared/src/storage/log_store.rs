//! Reading storage trait and implementations.
//!
//! Provides the `ReadingStore` trait for appending readings, the file-backed
//! `CsvLogStore` used by the poller, and an `InMemoryReadingStore` for
//! development and testing.

use crate::models::{Reading, LOG_HEADER};
use crate::storage::backup::{self, BackupError};
use chrono::{DateTime, Utc};
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use thiserror::Error;

/// Errors that can occur while opening or reading a log file.
#[derive(Debug, Error)]
pub enum LogStoreError {
    /// Filesystem failure.
    #[error("Log file I/O failed at {}: {source}", .path.display())]
    Io {
        /// Path of the log file.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// The incompatible log could not be moved aside.
    #[error("Failed to rotate log file: {0}")]
    Rotation(#[from] BackupError),
}

impl LogStoreError {
    fn io(path: &Path, source: std::io::Error) -> Self {
        Self::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}

/// A single failed append.
///
/// Recoverable for the cycle it happened in; the caller decides when repeated
/// failures become fatal.
#[derive(Debug, Error)]
#[error("Failed to append reading to {}: {source}", .path.display())]
pub struct LogWriteError {
    /// Path of the log file.
    pub path: PathBuf,
    /// Underlying I/O error.
    #[source]
    pub source: std::io::Error,
}

/// Trait for reading sinks.
///
/// Appends are the only mutation: rows are never edited or deleted.
pub trait ReadingStore: Send {
    /// Appends one reading durably.
    ///
    /// # Errors
    ///
    /// Returns an error if the reading could not be persisted.
    fn append(&mut self, reading: &Reading) -> Result<(), LogWriteError>;

    /// Returns the timestamp of the most recently appended reading.
    fn last_timestamp(&self) -> Option<DateTime<Utc>>;
}

/// What `open_or_rotate` found at the log path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OpenOutcome {
    /// No file existed; a fresh one was created.
    Created,
    /// A compatible file was opened for appending.
    Opened,
    /// An incompatible file was moved to `backup` and a fresh one created.
    Rotated {
        /// Where the previous file now lives.
        backup: PathBuf,
    },
}

/// Header check result for an existing file.
enum HeaderCheck {
    Missing,
    Valid,
    Invalid(String),
}

/// Append-only CSV log of readings.
///
/// The file starts with [`LOG_HEADER`] followed by one row per reading. Each
/// append is flushed and synced before returning, so a crash loses at most the
/// reading being written.
///
/// # Example
///
/// ```
/// use shared::models::Reading;
/// use shared::storage::{CsvLogStore, ReadingStore, read_log};
///
/// let dir = tempfile::tempdir().unwrap();
/// let path = dir.path().join("out.csv");
///
/// let mut store = CsvLogStore::open_or_rotate(&path).unwrap();
/// store.append(&Reading::now(100)).unwrap();
///
/// let contents = read_log(&path).unwrap();
/// assert_eq!(contents.readings.len(), 1);
/// ```
#[derive(Debug)]
pub struct CsvLogStore {
    path: PathBuf,
    file: File,
    outcome: OpenOutcome,
    last_timestamp: Option<DateTime<Utc>>,
    /// Set when a write failed and may have left a partial row behind.
    torn_tail: bool,
}

impl CsvLogStore {
    /// Opens the log at `path`, rotating it aside first if its header is not
    /// the expected one.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be inspected, moved or created.
    pub fn open_or_rotate(path: impl AsRef<Path>) -> Result<Self, LogStoreError> {
        Self::open_or_rotate_at(path, Utc::now())
    }

    /// Like [`CsvLogStore::open_or_rotate`], naming any backup after `now`.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be inspected, moved or created.
    pub fn open_or_rotate_at(
        path: impl AsRef<Path>,
        now: DateTime<Utc>,
    ) -> Result<Self, LogStoreError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| LogStoreError::io(path, e))?;
        }

        match check_header(path) {
            HeaderCheck::Missing => {
                tracing::info!(path = %path.display(), "No log file, creating one");
                let file = create_fresh(path)?;
                Ok(Self::new(path, file, OpenOutcome::Created, None))
            }
            HeaderCheck::Valid => {
                let last_timestamp = last_reading_timestamp(path);
                let file = open_append(path)?;
                tracing::debug!(path = %path.display(), "Opened existing log file");
                Ok(Self::new(path, file, OpenOutcome::Opened, last_timestamp))
            }
            HeaderCheck::Invalid(reason) => {
                let backup = backup::rotate_aside(path, now)?;
                tracing::warn!(
                    path = %path.display(),
                    backup = %backup.display(),
                    %reason,
                    "Log file is incompatible, rotated to backup"
                );
                let file = create_fresh(path)?;
                Ok(Self::new(path, file, OpenOutcome::Rotated { backup }, None))
            }
        }
    }

    fn new(
        path: &Path,
        file: File,
        outcome: OpenOutcome,
        last_timestamp: Option<DateTime<Utc>>,
    ) -> Self {
        Self {
            path: path.to_path_buf(),
            file,
            outcome,
            last_timestamp,
            torn_tail: false,
        }
    }

    /// Path of the log file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// What was found when the log was opened.
    #[must_use]
    pub fn outcome(&self) -> &OpenOutcome {
        &self.outcome
    }
}

impl ReadingStore for CsvLogStore {
    fn append(&mut self, reading: &Reading) -> Result<(), LogWriteError> {
        if let Some(previous) = self.last_timestamp {
            if reading.timestamp <= previous {
                tracing::warn!(
                    previous = %previous,
                    current = %reading.timestamp,
                    "Reading timestamp is not after the previous one, clock may have moved backwards"
                );
            }
        }

        if self.torn_tail {
            let terminated =
                terminate_torn_row(&mut self.file).map_err(|source| LogWriteError {
                    path: self.path.clone(),
                    source,
                })?;
            if terminated {
                tracing::warn!(
                    path = %self.path.display(),
                    "Previous write left a partial row, terminated it"
                );
            }
            self.torn_tail = false;
        }

        let mut line = reading.to_row();
        line.push('\n');
        let written = self
            .file
            .write_all(line.as_bytes())
            .and_then(|()| self.file.flush())
            .and_then(|()| self.file.sync_data());
        if let Err(source) = written {
            self.torn_tail = true;
            return Err(LogWriteError {
                path: self.path.clone(),
                source,
            });
        }

        self.last_timestamp = Some(reading.timestamp);
        Ok(())
    }

    fn last_timestamp(&self) -> Option<DateTime<Utc>> {
        self.last_timestamp
    }
}

fn check_header(path: &Path) -> HeaderCheck {
    let file = match File::open(path) {
        Ok(file) => file,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return HeaderCheck::Missing,
        Err(e) => return HeaderCheck::Invalid(format!("unreadable: {e}")),
    };

    let mut first_line = String::new();
    match BufReader::new(file).read_line(&mut first_line) {
        Ok(0) => HeaderCheck::Invalid("empty file".to_string()),
        Ok(_) if first_line.trim_end_matches(['\r', '\n']) == LOG_HEADER => HeaderCheck::Valid,
        Ok(_) => HeaderCheck::Invalid(format!(
            "unexpected header {:?}",
            first_line.trim_end_matches(['\r', '\n'])
        )),
        Err(e) => HeaderCheck::Invalid(format!("unreadable: {e}")),
    }
}

/// Creates a new log containing only the header. Fails if the file exists.
fn create_fresh(path: &Path) -> Result<File, LogStoreError> {
    let mut file = OpenOptions::new()
        .read(true)
        .append(true)
        .create_new(true)
        .open(path)
        .map_err(|e| LogStoreError::io(path, e))?;
    file.write_all(format!("{LOG_HEADER}\n").as_bytes())
        .and_then(|()| file.sync_all())
        .map_err(|e| LogStoreError::io(path, e))?;
    Ok(file)
}

/// Opens an existing log for appending, terminating a torn last line first.
fn open_append(path: &Path) -> Result<File, LogStoreError> {
    let mut file = OpenOptions::new()
        .read(true)
        .append(true)
        .open(path)
        .map_err(|e| LogStoreError::io(path, e))?;

    if terminate_torn_row(&mut file).map_err(|e| LogStoreError::io(path, e))? {
        tracing::warn!(path = %path.display(), "Log file ended mid-row, terminated it");
    }
    Ok(file)
}

/// Appends a newline if the file does not end with one.
///
/// Returns whether a newline was written. The partial row stays in the file
/// and is skipped as malformed when the log is read.
fn terminate_torn_row(file: &mut File) -> std::io::Result<bool> {
    if file.metadata()?.len() == 0 {
        return Ok(false);
    }
    let mut last = [0_u8; 1];
    file.seek(SeekFrom::End(-1))?;
    file.read_exact(&mut last)?;
    if last[0] == b'\n' {
        return Ok(false);
    }
    file.write_all(b"\n")?;
    file.sync_data()?;
    Ok(true)
}

fn last_reading_timestamp(path: &Path) -> Option<DateTime<Utc>> {
    let contents = read_log(path).ok()?;
    contents.readings.last().map(|r| r.timestamp)
}

/// Readings decoded from a log file.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LogContents {
    /// Readings in file order.
    pub readings: Vec<Reading>,
    /// Number of rows that could not be decoded and were skipped.
    pub skipped_rows: usize,
}

/// Reads every reading in the log at `path`, read-only.
///
/// The header line and blank lines are ignored; malformed rows are skipped
/// and counted.
///
/// # Errors
///
/// Returns an error if the file cannot be opened or read.
pub fn read_log(path: impl AsRef<Path>) -> Result<LogContents, LogStoreError> {
    let path = path.as_ref();
    let file = File::open(path).map_err(|e| LogStoreError::io(path, e))?;

    let mut contents = LogContents::default();
    for (index, line) in BufReader::new(file).lines().enumerate() {
        let line = line.map_err(|e| LogStoreError::io(path, e))?;
        if line.trim().is_empty() || (index == 0 && line.trim_end() == LOG_HEADER) {
            continue;
        }
        match Reading::from_row(&line) {
            Ok(reading) => contents.readings.push(reading),
            Err(e) => {
                tracing::warn!(line = index + 1, error = %e, "Skipping malformed log row");
                contents.skipped_rows += 1;
            }
        }
    }
    Ok(contents)
}

/// In-memory reading store.
///
/// Clones share the same readings, so a test can hand one clone to a sampler
/// and inspect the other.
///
/// **Note:** Data is not persisted across restarts.
#[derive(Debug, Clone, Default)]
pub struct InMemoryReadingStore {
    readings: Arc<Mutex<Vec<Reading>>>,
}

impl InMemoryReadingStore {
    /// Creates a new empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a copy of all stored readings in append order.
    #[must_use]
    pub fn readings(&self) -> Vec<Reading> {
        self.readings
            .lock()
            .map(|guard| guard.clone())
            .unwrap_or_default()
    }

    /// Returns the number of stored readings.
    #[must_use]
    pub fn len(&self) -> usize {
        self.readings.lock().map(|guard| guard.len()).unwrap_or(0)
    }

    /// Returns true if nothing has been appended.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl ReadingStore for InMemoryReadingStore {
    fn append(&mut self, reading: &Reading) -> Result<(), LogWriteError> {
        let mut guard = self.readings.lock().map_err(|_| LogWriteError {
            path: PathBuf::from("<memory>"),
            source: std::io::Error::other("reading store mutex poisoned"),
        })?;
        guard.push(*reading);
        Ok(())
    }

    fn last_timestamp(&self) -> Option<DateTime<Utc>> {
        self.readings
            .lock()
            .ok()
            .and_then(|guard| guard.last().map(|r| r.timestamp))
    }
}
