//! Single-instance lockfile protocol.
//!
//! A lock is a small text file `"<pid>,<acquired_at>"` at a well-known path.
//! It is created with an exclusive create-if-absent primitive: the record is
//! written to a temporary file in the same directory and then linked into
//! place without clobbering, so the lock file never exists without content.
//!
//! A lock whose owner is no longer running, or which was taken before the
//! machine last booted, is stale and may be reclaimed by a new acquirer.
//! Reclaims are serialized through a [`guard::ReclaimGuard`] so that at most
//! one contender replaces a given stale lock.

pub mod guard;
pub mod process;

use chrono::{DateTime, SecondsFormat, SubsecRound, Utc};
use serde::{Deserialize, Serialize};
use std::io::Write;
use std::path::{Path, PathBuf};
use thiserror::Error;

pub use process::{boot_time, check_process_liveness, ProcessLiveness};

/// Errors that can occur while acquiring or releasing the lock.
#[derive(Debug, Error)]
pub enum LockError {
    /// A live instance holds the lock. Startup must abort, not retry.
    #[error("Another instance is already running{}", describe_holder(.holder.as_ref()))]
    AlreadyRunning {
        /// The record of the instance holding the lock, if it could be read.
        holder: Option<LockRecord>,
    },

    /// Filesystem failure while touching the lock file.
    #[error("Lock file I/O failed at {}: {source}", .path.display())]
    Io {
        /// Path of the lock file.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },
}

fn describe_holder(holder: Option<&LockRecord>) -> String {
    match holder {
        Some(record) => format!(
            " (pid {}, started at {})",
            record.pid,
            record.acquired_at.to_rfc3339_opts(SecondsFormat::Secs, true)
        ),
        None => String::new(),
    }
}

impl LockError {
    fn io(path: &Path, source: std::io::Error) -> Self {
        Self::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}

/// Contents of a lock file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockRecord {
    /// Identifier of the owning process.
    pub pid: u32,
    /// When the owner acquired the lock.
    pub acquired_at: DateTime<Utc>,
}

impl LockRecord {
    /// Creates a record owned by the current process, stamped now.
    ///
    /// The timestamp is truncated to the microsecond precision of the encoding.
    #[must_use]
    pub fn for_current_process() -> Self {
        Self {
            pid: std::process::id(),
            acquired_at: Utc::now().trunc_subsecs(6),
        }
    }

    /// Encodes the record as lock file content.
    #[must_use]
    pub fn encode(&self) -> String {
        format!(
            "{},{}",
            self.pid,
            self.acquired_at.to_rfc3339_opts(SecondsFormat::Micros, true)
        )
    }

    /// Decodes lock file content.
    ///
    /// Accepts the RFC 3339 form written by [`LockRecord::encode`] as well as
    /// fractional Unix seconds, which older lock files carry.
    #[must_use]
    pub fn decode(content: &str) -> Option<Self> {
        let (raw_pid, raw_time) = content.trim().split_once(',')?;
        let pid = raw_pid.trim().parse::<u32>().ok()?;
        let raw_time = raw_time.trim();

        let acquired_at = match DateTime::parse_from_rfc3339(raw_time) {
            Ok(parsed) => parsed.with_timezone(&Utc),
            Err(_) => {
                let secs = raw_time.parse::<f64>().ok()?;
                if !secs.is_finite() || secs < 0.0 {
                    return None;
                }
                // Truncation to whole microseconds is intended.
                #[allow(clippy::cast_possible_truncation)]
                DateTime::from_timestamp_micros((secs * 1_000_000.0) as i64)?
            }
        };

        Some(Self { pid, acquired_at })
    }

    /// Judges whether this record still guards a live instance.
    #[must_use]
    pub fn assess(&self) -> LockState {
        if let Some(booted) = boot_time() {
            if self.acquired_at < booted {
                return LockState::Stale(StaleReason::PredatesBoot);
            }
        }
        if check_process_liveness(self.pid).may_be_running() {
            LockState::Live
        } else {
            LockState::Stale(StaleReason::OwnerGone)
        }
    }
}

/// Why a lock is considered stale.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StaleReason {
    /// No process with the recorded identifier is running.
    OwnerGone,
    /// The lock was taken before the last boot.
    PredatesBoot,
    /// The lock file content could not be decoded.
    Unreadable,
}

impl std::fmt::Display for StaleReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::OwnerGone => write!(f, "owning process is gone"),
            Self::PredatesBoot => write!(f, "lock predates last boot"),
            Self::Unreadable => write!(f, "lock content is unreadable"),
        }
    }
}

/// Liveness of an existing lock.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LockState {
    /// The owner is running; the lock must be respected.
    Live,
    /// The lock may be reclaimed.
    Stale(StaleReason),
}

/// Snapshot of an existing lock file, as seen by an observer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LockStatus {
    /// The decoded record, if the content was readable.
    pub record: Option<LockRecord>,
    /// Whether the lock is live or stale.
    pub state: LockState,
}

/// Outcome of releasing a lock.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReleaseOutcome {
    /// The lock file was ours and has been removed.
    Removed,
    /// The lock file now belongs to someone else and was left in place.
    NotOwner,
    /// The lock file had already disappeared.
    Missing,
}

/// Proof of lock ownership.
///
/// The lock is released when the handle is passed to [`LockHandle::release`]
/// or, failing that, when it is dropped.
#[derive(Debug)]
pub struct LockHandle {
    path: PathBuf,
    record: LockRecord,
    released: bool,
}

impl LockHandle {
    /// Path of the lock file this handle guards.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// The record written when the lock was acquired.
    #[must_use]
    pub fn record(&self) -> &LockRecord {
        &self.record
    }

    /// Releases the lock.
    ///
    /// The file is deleted only if it still holds this handle's record. If it
    /// does not, the lock was reclaimed by someone else; that is logged and
    /// the file is left alone.
    ///
    /// # Errors
    ///
    /// Returns [`LockError::Io`] if the lock file cannot be read or removed.
    pub fn release(mut self) -> Result<ReleaseOutcome, LockError> {
        self.released = true;
        release_record(&self.path, &self.record)
    }
}

impl Drop for LockHandle {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        if let Err(e) = release_record(&self.path, &self.record) {
            tracing::error!(error = %e, "Failed to release lock on drop");
        }
    }
}

fn release_record(path: &Path, record: &LockRecord) -> Result<ReleaseOutcome, LockError> {
    let content = match std::fs::read_to_string(path) {
        Ok(content) => content,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            tracing::warn!(path = %path.display(), "Lock file vanished before release");
            return Ok(ReleaseOutcome::Missing);
        }
        Err(e) => return Err(LockError::io(path, e)),
    };

    if LockRecord::decode(&content).as_ref() != Some(record) {
        tracing::warn!(
            path = %path.display(),
            found = %content.trim(),
            "Lock file is held by another owner, leaving it in place"
        );
        return Ok(ReleaseOutcome::NotOwner);
    }

    match std::fs::remove_file(path) {
        Ok(()) => {
            tracing::debug!(path = %path.display(), pid = record.pid, "Lock released");
            Ok(ReleaseOutcome::Removed)
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(ReleaseOutcome::Missing),
        Err(e) => Err(LockError::io(path, e)),
    }
}

/// Acquires the lock at `path` for the current process.
///
/// A stale lock is replaced under the reclaim guard, and only if it still
/// holds the content judged stale. Losing the reclaim to another acquirer
/// reports [`LockError::AlreadyRunning`].
///
/// # Errors
///
/// - [`LockError::AlreadyRunning`] if a live instance holds the lock
/// - [`LockError::Io`] on any filesystem failure
pub fn acquire(path: impl AsRef<Path>) -> Result<LockHandle, LockError> {
    let path = path.as_ref();

    if let Some(handle) = try_create(path)? {
        return Ok(handle);
    }

    let Some((content, status)) = read_status(path)? else {
        // Released between our create attempt and the read.
        return try_create(path)?.ok_or(LockError::AlreadyRunning { holder: None });
    };

    if let LockState::Stale(reason) = status.state {
        tracing::warn!(
            path = %path.display(),
            pid = status.record.map(|r| r.pid),
            %reason,
            "Reclaiming stale lock"
        );
        if let Some(handle) = reclaim(path, &content)? {
            return Ok(handle);
        }
        let holder = inspect(path)?.and_then(|s| s.record);
        return Err(LockError::AlreadyRunning { holder });
    }

    Err(LockError::AlreadyRunning {
        holder: status.record,
    })
}

/// Replaces the lock at `path` if it still contains `stale_content`.
fn reclaim(path: &Path, stale_content: &str) -> Result<Option<LockHandle>, LockError> {
    let _guard = guard::ReclaimGuard::lock(path).map_err(|e| LockError::io(path, e))?;

    match std::fs::read_to_string(path) {
        Ok(current) if current == stale_content => {}
        Ok(_) => {
            tracing::debug!(path = %path.display(), "Stale lock already replaced");
            return Ok(None);
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return try_create(path),
        Err(e) => return Err(LockError::io(path, e)),
    }

    match std::fs::remove_file(path) {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => return Err(LockError::io(path, e)),
    }
    try_create(path)
}

/// Reads and assesses the lock at `path` without modifying it.
///
/// Returns `None` if no lock file exists.
///
/// # Errors
///
/// Returns [`LockError::Io`] if the file exists but cannot be read.
pub fn inspect(path: impl AsRef<Path>) -> Result<Option<LockStatus>, LockError> {
    Ok(read_status(path.as_ref())?.map(|(_, status)| status))
}

/// Like [`inspect`], also returning the raw content that was assessed.
fn read_status(path: &Path) -> Result<Option<(String, LockStatus)>, LockError> {
    let content = match std::fs::read_to_string(path) {
        Ok(content) => content,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(LockError::io(path, e)),
    };

    let status = match LockRecord::decode(&content) {
        Some(record) => LockStatus {
            record: Some(record),
            state: record.assess(),
        },
        None => LockStatus {
            record: None,
            state: LockState::Stale(StaleReason::Unreadable),
        },
    };
    Ok(Some((content, status)))
}

/// Atomically creates the lock file, returning `None` if one already exists.
fn try_create(path: &Path) -> Result<Option<LockHandle>, LockError> {
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    };
    std::fs::create_dir_all(&dir).map_err(|e| LockError::io(path, e))?;

    let record = LockRecord::for_current_process();
    let mut staged = tempfile::NamedTempFile::new_in(&dir).map_err(|e| LockError::io(path, e))?;
    staged
        .write_all(record.encode().as_bytes())
        .and_then(|()| staged.as_file().sync_all())
        .map_err(|e| LockError::io(path, e))?;

    match staged.persist_noclobber(path) {
        Ok(_) => {
            tracing::info!(path = %path.display(), pid = record.pid, "Lock acquired");
            Ok(Some(LockHandle {
                path: path.to_path_buf(),
                record,
                released: false,
            }))
        }
        Err(e) if e.error.kind() == std::io::ErrorKind::AlreadyExists => Ok(None),
        Err(e) => Err(LockError::io(path, e.error)),
    }
}
