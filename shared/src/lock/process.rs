//! Process liveness and boot time probes used to judge lock staleness.

use chrono::{DateTime, Utc};

/// Result of probing whether a process identifier refers to a running process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessLiveness {
    /// A process with this identifier exists.
    Alive,
    /// No process with this identifier exists.
    Dead,
    /// The process exists but belongs to another user. Treated as alive.
    PermissionDenied,
}

impl ProcessLiveness {
    /// Returns true unless the process is known not to exist.
    #[must_use]
    pub fn may_be_running(self) -> bool {
        !matches!(self, Self::Dead)
    }
}

/// Probes whether `pid` refers to an existing process.
///
/// Uses `kill(pid, 0)`, which delivers no signal. Only `ESRCH` maps to
/// [`ProcessLiveness::Dead`]; any other failure is reported as existing.
#[cfg(unix)]
#[allow(unsafe_code)]
#[must_use]
pub fn check_process_liveness(pid: u32) -> ProcessLiveness {
    // pid 0 and negative pid_t values address process groups.
    let Ok(raw_pid) = libc::pid_t::try_from(pid) else {
        return ProcessLiveness::Dead;
    };
    if raw_pid <= 0 {
        return ProcessLiveness::Dead;
    }

    // SAFETY: signal 0 performs only the existence and permission check of
    // kill(2); no memory is touched and no signal is delivered.
    let ret = unsafe { libc::kill(raw_pid, 0) };
    if ret == 0 {
        return ProcessLiveness::Alive;
    }

    match std::io::Error::last_os_error().raw_os_error() {
        Some(libc::ESRCH) => ProcessLiveness::Dead,
        _ => ProcessLiveness::PermissionDenied,
    }
}

/// Probes whether `pid` refers to an existing process.
#[cfg(not(unix))]
#[must_use]
pub fn check_process_liveness(pid: u32) -> ProcessLiveness {
    use sysinfo::{Pid, ProcessesToUpdate, System};

    if pid == 0 {
        return ProcessLiveness::Dead;
    }
    let target = Pid::from_u32(pid);
    let mut system = System::new();
    system.refresh_processes(ProcessesToUpdate::Some(&[target]), true);
    if system.process(target).is_some() {
        ProcessLiveness::Alive
    } else {
        ProcessLiveness::Dead
    }
}

/// Returns the instant the machine last booted, if the platform reports it.
#[must_use]
pub fn boot_time() -> Option<DateTime<Utc>> {
    let secs = sysinfo::System::boot_time();
    if secs == 0 {
        return None;
    }
    DateTime::from_timestamp(i64::try_from(secs).ok()?, 0)
}
