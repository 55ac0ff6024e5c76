//! Report configuration.
//!
//! Controls which derived series the chart shows and where it is written.

use super::{lookup_var, parse_flag, parse_var, ConfigError};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use validator::Validate;

/// Default moving-average window: two days of samples at one per minute.
pub const DEFAULT_MA_WINDOW: usize = 24 * 60 * 2;

/// Window of the moving average applied to the first difference.
pub const DIFF_MA_WINDOW: usize = 15;

/// Default chart output path.
pub const DEFAULT_REPORT_PATH: &str = "out.svg";

/// Report rendering options.
///
/// Values can be set via environment variables:
/// - `SHOW_MA`: plot the moving average (default: true)
/// - `SHOW_D1`: plot the first difference (default: true)
/// - `SHOW_MAD1`: plot the moving average of the first difference (default: true)
/// - `MA_WINDOW`: moving-average window in samples (default: 2880)
/// - `REPORT_PATH`: chart output path (default: `out.svg`)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Validate)]
pub struct ReportConfig {
    /// Plot the moving average of the balance.
    pub show_ma: bool,
    /// Plot the first difference of the balance.
    pub show_d1: bool,
    /// Plot the moving average of the first difference.
    pub show_mad1: bool,
    /// Moving-average window in samples.
    #[validate(range(min = 1, message = "MA_WINDOW must be at least 1"))]
    pub ma_window: usize,
    /// Where the chart is written.
    pub output: PathBuf,
}

impl Default for ReportConfig {
    fn default() -> Self {
        Self {
            show_ma: true,
            show_d1: true,
            show_mad1: true,
            ma_window: DEFAULT_MA_WINDOW,
            output: PathBuf::from(DEFAULT_REPORT_PATH),
        }
    }
}

impl ReportConfig {
    /// Resolves the report options from the process environment.
    ///
    /// # Errors
    ///
    /// Returns an error if a variable is set to an unusable value.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Resolves the report options through `lookup`.
    ///
    /// # Errors
    ///
    /// Returns an error if a variable is set to an unusable value.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let config = Self {
            show_ma: parse_flag(&lookup, "SHOW_MA")?.unwrap_or(defaults.show_ma),
            show_d1: parse_flag(&lookup, "SHOW_D1")?.unwrap_or(defaults.show_d1),
            show_mad1: parse_flag(&lookup, "SHOW_MAD1")?.unwrap_or(defaults.show_mad1),
            ma_window: parse_var(&lookup, "MA_WINDOW")?.unwrap_or(defaults.ma_window),
            output: lookup_var(&lookup, "REPORT_PATH").map_or(defaults.output, PathBuf::from),
        };
        config.validate()?;
        Ok(config)
    }

    /// Returns true if any difference series is plotted.
    #[must_use]
    pub fn shows_differences(&self) -> bool {
        self.show_d1 || self.show_mad1
    }
}
