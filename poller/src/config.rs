//! Poller configuration module.
//!
//! Handles loading configuration from environment variables with sensible
//! defaults. Resolved once at startup and passed to the components that need it.

use shared::config::{lookup_var, parse_var, ConfigError};
use std::path::{Path, PathBuf};
use std::time::Duration;
use validator::Validate;

/// Default balance endpoint.
pub const DEFAULT_API_URL: &str = "https://aihorde.net/api/v2/find_user";

/// Default seconds between polls.
pub const DEFAULT_POLL_INTERVAL_SECS: u64 = 60;

/// Polls faster than this are clamped; the balance does not update more often.
pub const MIN_POLL_INTERVAL_SECS: u64 = 30;

/// Longest accepted poll interval, one day.
pub const MAX_POLL_INTERVAL_SECS: u64 = 86_400;

/// Default log location, relative to the working directory.
pub const DEFAULT_LOG_PATH: &str = "out.csv";

/// Lock file name, placed next to the log it guards.
pub const LOCK_FILE_NAME: &str = ".kudolock";

/// Default snapshot directory name, placed next to the log.
pub const DEFAULT_BACKUP_DIR_NAME: &str = "bak.d";

/// Default number of startup snapshots kept.
pub const DEFAULT_NUM_BACKUPS: usize = 10;

/// Default HTTP request timeout in seconds.
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;

/// Placeholder key shipped in example `.env` files.
const PLACEHOLDER_API_KEY: &str = "foo";

/// Poller configuration.
///
/// Configuration values can be set via environment variables:
/// - `API_KEY`: The AI Horde API key (required)
/// - `POLL_INTERVAL_SECONDS`: Seconds between polls (default: 60, minimum: 30, maximum: 86400)
/// - `LOG_PATH`: The reading log (default: `out.csv`)
/// - `API_URL`: The balance endpoint (default: the AI Horde `find_user` endpoint)
/// - `REQUEST_TIMEOUT_SECONDS`: HTTP timeout (default: 30)
/// - `BACKUP_DIR`: Startup snapshot directory (default: `bak.d` next to the log)
/// - `NUM_BACKUPS`: Startup snapshots kept (default: 10)
///
/// The lock file is always `.kudolock` in the log's directory.
#[derive(Clone, Validate)]
pub struct Config {
    /// API key sent with every balance request.
    pub api_key: String,
    /// Balance endpoint URL.
    pub api_url: String,
    /// Seconds between the starts of consecutive polls.
    #[validate(range(min = 1, max = 86400))]
    pub poll_interval_secs: u64,
    /// HTTP request timeout in seconds.
    #[validate(range(min = 1, max = 3600))]
    pub request_timeout_secs: u64,
    /// The reading log.
    pub log_path: PathBuf,
    /// The single-instance lock file.
    pub lock_path: PathBuf,
    /// Where startup snapshots are written.
    pub backup_dir: PathBuf,
    /// How many startup snapshots to keep.
    pub num_backups: usize,
}

impl std::fmt::Debug for Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Config")
            .field("api_key", &"<redacted>")
            .field("api_url", &self.api_url)
            .field("poll_interval_secs", &self.poll_interval_secs)
            .field("request_timeout_secs", &self.request_timeout_secs)
            .field("log_path", &self.log_path)
            .field("lock_path", &self.lock_path)
            .field("backup_dir", &self.backup_dir)
            .field("num_backups", &self.num_backups)
            .finish()
    }
}

impl Config {
    /// Creates a new configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - `API_KEY` is unset, empty or the `foo` placeholder
    /// - A numeric variable is set but cannot be parsed
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Creates a new configuration through `lookup`.
    ///
    /// # Errors
    ///
    /// See [`Config::from_env`].
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let api_key = lookup_var(&lookup, "API_KEY").ok_or(ConfigError::Missing("API_KEY"))?;
        if api_key.eq_ignore_ascii_case(PLACEHOLDER_API_KEY) {
            return Err(ConfigError::Invalid {
                key: "API_KEY",
                value: api_key,
                reason: "the example placeholder is not a real key".to_string(),
            });
        }

        let mut poll_interval_secs =
            parse_var(&lookup, "POLL_INTERVAL_SECONDS")?.unwrap_or(DEFAULT_POLL_INTERVAL_SECS);
        if poll_interval_secs < MIN_POLL_INTERVAL_SECS {
            tracing::warn!(
                requested = poll_interval_secs,
                minimum = MIN_POLL_INTERVAL_SECS,
                "POLL_INTERVAL_SECONDS is below the minimum, the balance does not update that fast; clamping"
            );
            poll_interval_secs = MIN_POLL_INTERVAL_SECS;
        }

        let log_path =
            lookup_var(&lookup, "LOG_PATH").map_or_else(|| PathBuf::from(DEFAULT_LOG_PATH), PathBuf::from);
        let log_dir = log_dir(&log_path);
        let backup_dir = lookup_var(&lookup, "BACKUP_DIR")
            .map_or_else(|| log_dir.join(DEFAULT_BACKUP_DIR_NAME), PathBuf::from);

        let config = Self {
            api_key,
            api_url: lookup_var(&lookup, "API_URL").unwrap_or_else(|| DEFAULT_API_URL.to_string()),
            poll_interval_secs,
            request_timeout_secs: parse_var(&lookup, "REQUEST_TIMEOUT_SECONDS")?
                .unwrap_or(DEFAULT_REQUEST_TIMEOUT_SECS),
            lock_path: lock_path_for(&log_path),
            log_path,
            backup_dir,
            num_backups: parse_var(&lookup, "NUM_BACKUPS")?.unwrap_or(DEFAULT_NUM_BACKUPS),
        };
        config.validate()?;
        Ok(config)
    }

    /// Creates a configuration with defaults for every path under `dir`.
    ///
    /// Useful for tests and for embedding the poller programmatically.
    #[must_use]
    pub fn in_dir(dir: &Path, api_key: impl Into<String>, api_url: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            api_url: api_url.into(),
            poll_interval_secs: DEFAULT_POLL_INTERVAL_SECS,
            request_timeout_secs: DEFAULT_REQUEST_TIMEOUT_SECS,
            log_path: dir.join(DEFAULT_LOG_PATH),
            lock_path: dir.join(LOCK_FILE_NAME),
            backup_dir: dir.join(DEFAULT_BACKUP_DIR_NAME),
            num_backups: DEFAULT_NUM_BACKUPS,
        }
    }

    /// Time between the starts of consecutive polls.
    #[must_use]
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    /// HTTP request timeout.
    #[must_use]
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

/// The lock file guarding the log at `log_path`.
#[must_use]
pub fn lock_path_for(log_path: &Path) -> PathBuf {
    log_dir(log_path).join(LOCK_FILE_NAME)
}

fn log_dir(log_path: &Path) -> PathBuf {
    match log_path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::new(),
    }
}
