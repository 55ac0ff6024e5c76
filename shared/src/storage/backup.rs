//! Backup files for the reading log.
//!
//! Two kinds of backup exist:
//! - rotation backups, created when an incompatible log is moved aside; they
//!   live next to the log and are never pruned
//! - startup snapshots, gzip copies written to a backup directory each time
//!   the poller starts; only the newest few are kept

use chrono::{DateTime, NaiveDateTime, Utc};
use flate2::write::GzEncoder;
use flate2::Compression;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Timestamp encoding embedded in backup file names.
pub const BACKUP_TIMESTAMP_FORMAT: &str = "%Y%m%dT%H%M%SZ";

/// Upper bound on disambiguating suffixes tried for one timestamp.
const MAX_SUFFIX: u32 = 10_000;

/// Errors that can occur while writing or pruning backups.
#[derive(Debug, Error)]
pub enum BackupError {
    /// Filesystem failure.
    #[error("Backup I/O failed at {}: {source}", .path.display())]
    Io {
        /// Path being written, moved or removed.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// Every candidate name for this timestamp is taken.
    #[error("No free backup name for {}", .path.display())]
    NamesExhausted {
        /// The source file being backed up.
        path: PathBuf,
    },
}

impl BackupError {
    fn io(path: &Path, source: std::io::Error) -> Self {
        Self::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}

/// Splits a file name into stem and extension, e.g. `out.csv` into `("out", "csv")`.
fn split_name(path: &Path) -> (String, Option<String>) {
    let stem = path
        .file_stem()
        .map_or_else(|| "log".to_string(), |s| s.to_string_lossy().into_owned());
    let ext = path.extension().map(|e| e.to_string_lossy().into_owned());
    (stem, ext)
}

/// Builds the backup file name for `source` at `now` with an optional suffix.
///
/// `out.csv` becomes `out-20240309T080501Z.csv`, or `out-20240309T080501Z-2.csv`
/// for suffix 2. `extra_ext` is appended after the original extension.
#[must_use]
pub fn backup_file_name(
    source: &Path,
    now: DateTime<Utc>,
    suffix: u32,
    extra_ext: Option<&str>,
) -> String {
    let (stem, ext) = split_name(source);
    let mut name = format!("{stem}-{}", now.format(BACKUP_TIMESTAMP_FORMAT));
    if suffix > 0 {
        name.push_str(&format!("-{suffix}"));
    }
    if let Some(ext) = ext {
        name.push('.');
        name.push_str(&ext);
    }
    if let Some(extra) = extra_ext {
        name.push('.');
        name.push_str(extra);
    }
    name
}

/// Moves `log_path` aside to a timestamped backup in the same directory.
///
/// Never overwrites an existing backup: if the name for `now` is taken a
/// numeric suffix is added.
///
/// # Errors
///
/// Returns an error if the file cannot be moved or all names are taken.
pub fn rotate_aside(log_path: &Path, now: DateTime<Utc>) -> Result<PathBuf, BackupError> {
    let dir = log_path.parent().unwrap_or_else(|| Path::new(""));

    for suffix in 0..MAX_SUFFIX {
        let candidate = dir.join(backup_file_name(log_path, now, suffix, None));
        match std::fs::hard_link(log_path, &candidate) {
            Ok(()) => {
                std::fs::remove_file(log_path).map_err(|e| BackupError::io(log_path, e))?;
                return Ok(candidate);
            }
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(BackupError::io(log_path, e));
            }
            // Filesystems without hard links fall back to check-then-rename.
            Err(_) => {
                if candidate.exists() {
                    continue;
                }
                std::fs::rename(log_path, &candidate).map_err(|e| BackupError::io(log_path, e))?;
                return Ok(candidate);
            }
        }
    }

    Err(BackupError::NamesExhausted {
        path: log_path.to_path_buf(),
    })
}

/// Writes a gzip-compressed copy of `log_path` into `backup_dir`.
///
/// The directory is created if needed. The snapshot is staged in a temporary
/// file and moved into place without clobbering an existing snapshot.
///
/// # Errors
///
/// Returns an error if the log cannot be read or the snapshot cannot be written.
pub fn write_snapshot(
    log_path: &Path,
    backup_dir: &Path,
    now: DateTime<Utc>,
) -> Result<PathBuf, BackupError> {
    std::fs::create_dir_all(backup_dir).map_err(|e| BackupError::io(backup_dir, e))?;

    let mut source = std::fs::File::open(log_path).map_err(|e| BackupError::io(log_path, e))?;
    let staged =
        tempfile::NamedTempFile::new_in(backup_dir).map_err(|e| BackupError::io(backup_dir, e))?;
    let mut encoder = GzEncoder::new(staged, Compression::default());
    std::io::copy(&mut source, &mut encoder).map_err(|e| BackupError::io(log_path, e))?;
    let mut staged = encoder
        .finish()
        .map_err(|e| BackupError::io(backup_dir, e))?;
    staged
        .as_file()
        .sync_all()
        .map_err(|e| BackupError::io(backup_dir, e))?;

    for suffix in 0..MAX_SUFFIX {
        let candidate = backup_dir.join(backup_file_name(log_path, now, suffix, Some("gz")));
        match staged.persist_noclobber(&candidate) {
            Ok(_) => return Ok(candidate),
            Err(e) if e.error.kind() == std::io::ErrorKind::AlreadyExists => staged = e.file,
            Err(e) => return Err(BackupError::io(&candidate, e.error)),
        }
    }

    Err(BackupError::NamesExhausted {
        path: log_path.to_path_buf(),
    })
}

/// Sort key of a snapshot file name: `(timestamp, suffix)`.
fn snapshot_key(name: &str, prefix: &str, tail: &str) -> Option<(String, u32)> {
    let middle = name.strip_prefix(prefix)?.strip_suffix(tail)?;
    let (stamp, suffix) = match middle.split_once('-') {
        Some((stamp, suffix)) => (stamp, suffix.parse::<u32>().ok()?),
        None => (middle, 0),
    };
    NaiveDateTime::parse_from_str(stamp, BACKUP_TIMESTAMP_FORMAT).ok()?;
    Some((stamp.to_string(), suffix))
}

/// Deletes all but the newest `keep` snapshots of `log_path` in `backup_dir`.
///
/// Files whose names do not follow the snapshot pattern are never touched.
/// Returns the removed paths, oldest last.
///
/// # Errors
///
/// Returns an error if the directory cannot be listed or a file cannot be removed.
pub fn prune_snapshots(
    log_path: &Path,
    backup_dir: &Path,
    keep: usize,
) -> Result<Vec<PathBuf>, BackupError> {
    let (stem, ext) = split_name(log_path);
    let prefix = format!("{stem}-");
    let tail = match ext {
        Some(ext) => format!(".{ext}.gz"),
        None => ".gz".to_string(),
    };

    let entries = match std::fs::read_dir(backup_dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(BackupError::io(backup_dir, e)),
    };

    let mut snapshots = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|e| BackupError::io(backup_dir, e))?;
        let name = entry.file_name().to_string_lossy().into_owned();
        if let Some(key) = snapshot_key(&name, &prefix, &tail) {
            snapshots.push((key, entry.path()));
        }
    }

    // Newest first.
    snapshots.sort_by(|a, b| b.0.cmp(&a.0));

    let mut removed = Vec::new();
    for (_, path) in snapshots.into_iter().skip(keep) {
        tracing::info!(path = %path.display(), "Removing old backup");
        std::fs::remove_file(&path).map_err(|e| BackupError::io(&path, e))?;
        removed.push(path);
    }
    Ok(removed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use flate2::read::GzDecoder;
    use std::io::Read;

    fn at(secs: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 9, 8, 5, secs).unwrap()
    }

    #[test]
    fn test_backup_file_name() {
        let path = Path::new("/data/out.csv");

        assert_eq!(backup_file_name(path, at(1), 0, None), "out-20240309T080501Z.csv");
        assert_eq!(backup_file_name(path, at(1), 2, None), "out-20240309T080501Z-2.csv");
        assert_eq!(
            backup_file_name(path, at(1), 0, Some("gz")),
            "out-20240309T080501Z.csv.gz"
        );
        assert_eq!(
            backup_file_name(Path::new("kudos"), at(1), 0, None),
            "kudos-20240309T080501Z"
        );
    }

    #[test]
    fn test_rotate_aside_moves_file() {
        let dir = tempfile::tempdir().unwrap();
        let log = dir.path().join("out.csv");
        std::fs::write(&log, "garbage").unwrap();

        let backup = rotate_aside(&log, at(1)).unwrap();

        assert!(!log.exists());
        assert_eq!(backup, dir.path().join("out-20240309T080501Z.csv"));
        assert_eq!(std::fs::read_to_string(backup).unwrap(), "garbage");
    }

    #[test]
    fn test_rotate_aside_never_overwrites() {
        let dir = tempfile::tempdir().unwrap();
        let log = dir.path().join("out.csv");
        let existing = dir.path().join("out-20240309T080501Z.csv");
        std::fs::write(&existing, "older").unwrap();
        std::fs::write(&log, "newer").unwrap();

        let backup = rotate_aside(&log, at(1)).unwrap();

        assert_eq!(backup, dir.path().join("out-20240309T080501Z-1.csv"));
        assert_eq!(std::fs::read_to_string(existing).unwrap(), "older");
        assert_eq!(std::fs::read_to_string(backup).unwrap(), "newer");
    }

    #[test]
    fn test_rotate_aside_missing_source() {
        let dir = tempfile::tempdir().unwrap();
        let result = rotate_aside(&dir.path().join("out.csv"), at(1));
        assert!(matches!(result, Err(BackupError::Io { .. })));
    }

    #[test]
    fn test_write_snapshot_is_gzip_copy() {
        let dir = tempfile::tempdir().unwrap();
        let log = dir.path().join("out.csv");
        std::fs::write(&log, "timestamp,kudos\n2024-03-09T08:05:01.000Z,5\n").unwrap();
        let backups = dir.path().join("bak.d");

        let snapshot = write_snapshot(&log, &backups, at(1)).unwrap();

        assert_eq!(snapshot, backups.join("out-20240309T080501Z.csv.gz"));
        let mut decoded = String::new();
        GzDecoder::new(std::fs::File::open(&snapshot).unwrap())
            .read_to_string(&mut decoded)
            .unwrap();
        assert_eq!(decoded, "timestamp,kudos\n2024-03-09T08:05:01.000Z,5\n");
    }

    #[test]
    fn test_write_snapshot_same_second_gets_suffix() {
        let dir = tempfile::tempdir().unwrap();
        let log = dir.path().join("out.csv");
        std::fs::write(&log, "timestamp,kudos\n").unwrap();
        let backups = dir.path().join("bak.d");

        let first = write_snapshot(&log, &backups, at(1)).unwrap();
        let second = write_snapshot(&log, &backups, at(1)).unwrap();

        assert_ne!(first, second);
        assert_eq!(second, backups.join("out-20240309T080501Z-1.csv.gz"));
    }

    #[test]
    fn test_prune_keeps_newest() {
        let dir = tempfile::tempdir().unwrap();
        let log = dir.path().join("out.csv");
        std::fs::write(&log, "timestamp,kudos\n").unwrap();
        let backups = dir.path().join("bak.d");

        for secs in [3, 1, 4, 2] {
            write_snapshot(&log, &backups, at(secs)).unwrap();
        }
        std::fs::write(backups.join("notes.txt"), "keep me").unwrap();

        let removed = prune_snapshots(&log, &backups, 2).unwrap();

        assert_eq!(removed.len(), 2);
        assert!(backups.join("out-20240309T080504Z.csv.gz").exists());
        assert!(backups.join("out-20240309T080503Z.csv.gz").exists());
        assert!(!backups.join("out-20240309T080502Z.csv.gz").exists());
        assert!(!backups.join("out-20240309T080501Z.csv.gz").exists());
        assert!(backups.join("notes.txt").exists());
    }

    #[test]
    fn test_prune_orders_suffixes_after_base() {
        let dir = tempfile::tempdir().unwrap();
        let log = dir.path().join("out.csv");
        std::fs::write(&log, "timestamp,kudos\n").unwrap();
        let backups = dir.path().join("bak.d");

        write_snapshot(&log, &backups, at(1)).unwrap();
        write_snapshot(&log, &backups, at(1)).unwrap();

        prune_snapshots(&log, &backups, 1).unwrap();

        assert!(backups.join("out-20240309T080501Z-1.csv.gz").exists());
        assert!(!backups.join("out-20240309T080501Z.csv.gz").exists());
    }

    #[test]
    fn test_prune_missing_directory_is_noop() {
        let dir = tempfile::tempdir().unwrap();
        let removed =
            prune_snapshots(&dir.path().join("out.csv"), &dir.path().join("bak.d"), 3).unwrap();
        assert!(removed.is_empty());
    }

    #[test]
    fn test_prune_keep_zero_removes_all_snapshots() {
        let dir = tempfile::tempdir().unwrap();
        let log = dir.path().join("out.csv");
        std::fs::write(&log, "timestamp,kudos\n").unwrap();
        let backups = dir.path().join("bak.d");
        write_snapshot(&log, &backups, at(1)).unwrap();

        let removed = prune_snapshots(&log, &backups, 0).unwrap();

        assert_eq!(removed.len(), 1);
    }
}
