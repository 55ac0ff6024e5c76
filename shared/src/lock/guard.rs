//! Advisory mutex serializing stale-lock reclaims.
//!
//! Deleting a stale lock and creating a fresh one are two steps. Without
//! serialization, a slow reclaimer can delete the lock a faster one just
//! created. The guard is an OS advisory lock on a sibling file, so it is
//! dropped by the kernel if its holder dies.

use std::fs::{File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};

/// Suffix appended to the lock file name to form the guard file name.
pub const RECLAIM_SUFFIX: &str = ".reclaim";

/// Exclusive hold on the reclaim guard of one lock file.
///
/// Released when dropped. The guard file itself is left in place.
#[derive(Debug)]
pub struct ReclaimGuard {
    _guard_file: File,
}

impl ReclaimGuard {
    /// Blocks until the reclaim guard for `lock_path` is held.
    ///
    /// # Errors
    ///
    /// Returns an error if the guard file cannot be opened or locked.
    pub fn lock(lock_path: &Path) -> io::Result<Self> {
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(false)
            .open(guard_path(lock_path))?;
        flock_exclusive(&file)?;
        Ok(Self { _guard_file: file })
    }
}

/// The guard file serializing reclaims of `lock_path`.
#[must_use]
pub fn guard_path(lock_path: &Path) -> PathBuf {
    let mut name = lock_path
        .file_name()
        .map(std::ffi::OsStr::to_os_string)
        .unwrap_or_default();
    name.push(RECLAIM_SUFFIX);
    lock_path.with_file_name(name)
}

#[cfg(unix)]
#[allow(unsafe_code)]
fn flock_exclusive(file: &File) -> io::Result<()> {
    use std::os::unix::io::AsRawFd;

    let fd = file.as_raw_fd();
    loop {
        // SAFETY: `fd` is a valid descriptor owned by `file`, which outlives
        // this call. flock(2) touches no memory.
        let result = unsafe { libc::flock(fd, libc::LOCK_EX) };
        if result == 0 {
            return Ok(());
        }
        let err = io::Error::last_os_error();
        if err.kind() != io::ErrorKind::Interrupted {
            return Err(err);
        }
    }
}

#[cfg(not(unix))]
fn flock_exclusive(file: &File) -> io::Result<()> {
    let _ = file;
    Ok(())
}
