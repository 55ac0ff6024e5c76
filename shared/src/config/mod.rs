//! Configuration module for KudoMan.
//!
//! Configuration is resolved once at startup from environment-style key/value
//! lookups. Parsing goes through a lookup function rather than the process
//! environment so callers and tests can supply their own source.

pub mod report;

pub use report::ReportConfig;

use std::str::FromStr;
use thiserror::Error;

/// Errors that can occur while resolving configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A required variable is not set.
    #[error("{0} must be set, e.g. in .env")]
    Missing(&'static str),

    /// A variable is set to a value that cannot be used.
    #[error("{key} has invalid value {value:?}: {reason}")]
    Invalid {
        /// Variable name.
        key: &'static str,
        /// The rejected value.
        value: String,
        /// Why it was rejected.
        reason: String,
    },

    /// A resolved value violates a range constraint.
    #[error("Configuration validation failed: {0}")]
    Validation(#[from] validator::ValidationErrors),
}

/// Reads `key` through `lookup`, treating blank values as unset.
pub fn lookup_var<F>(lookup: &F, key: &'static str) -> Option<String>
where
    F: Fn(&str) -> Option<String>,
{
    lookup(key)
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// Reads and parses `key`, returning `None` if unset.
///
/// # Errors
///
/// Returns [`ConfigError::Invalid`] if the value does not parse as `T`.
pub fn parse_var<T, F>(lookup: &F, key: &'static str) -> Result<Option<T>, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
    F: Fn(&str) -> Option<String>,
{
    lookup_var(lookup, key)
        .map(|value| {
            value.parse::<T>().map_err(|e| ConfigError::Invalid {
                key,
                reason: e.to_string(),
                value,
            })
        })
        .transpose()
}

/// Reads a boolean flag, accepting `true/false`, `yes/no`, `on/off` and `1/0`.
///
/// # Errors
///
/// Returns [`ConfigError::Invalid`] for any other value.
pub fn parse_flag<F>(lookup: &F, key: &'static str) -> Result<Option<bool>, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    lookup_var(lookup, key)
        .map(|value| match value.to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => Ok(true),
            "0" | "false" | "no" | "off" => Ok(false),
            _ => Err(ConfigError::Invalid {
                key,
                value,
                reason: "expected a boolean".to_string(),
            }),
        })
        .transpose()
}
