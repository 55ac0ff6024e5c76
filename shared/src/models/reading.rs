//! Reading data model.
//!
//! Defines the `Reading` structure, one timestamped Kudos balance sample, and
//! its textual row encoding in the log file.

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Header row written at the top of every log file.
pub const LOG_HEADER: &str = "timestamp,kudos";

/// Timestamp encoding used in log rows.
///
/// Fixed width UTC with millisecond precision, so rows sort lexically in time order.
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.3fZ";

/// Field delimiter of a log row.
const DELIMITER: char = ',';

/// A single timestamped balance sample.
///
/// # Example
///
/// ```
/// use shared::models::Reading;
///
/// let reading = Reading::now(1_250);
/// let row = reading.to_row();
/// let parsed = Reading::from_row(&row).unwrap();
/// assert_eq!(parsed.value, 1_250);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reading {
    /// Wall-clock instant the balance was observed.
    pub timestamp: DateTime<Utc>,

    /// The Kudos balance.
    pub value: u64,
}

/// Errors that can occur while decoding a log row.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ReadingParseError {
    /// The row does not have exactly two fields.
    #[error("Expected 2 fields, found {0}")]
    FieldCount(usize),

    /// The timestamp field is not in the log timestamp format.
    #[error("Invalid timestamp: {0}")]
    InvalidTimestamp(String),

    /// The value field is not a non-negative integer.
    #[error("Invalid value: {0}")]
    InvalidValue(String),
}

impl Reading {
    /// Creates a reading for the given instant.
    #[must_use]
    pub fn new(timestamp: DateTime<Utc>, value: u64) -> Self {
        Self { timestamp, value }
    }

    /// Creates a reading stamped with the current time.
    #[must_use]
    pub fn now(value: u64) -> Self {
        Self::new(Utc::now(), value)
    }

    /// Encodes the reading as a log row, without the line terminator.
    #[must_use]
    pub fn to_row(&self) -> String {
        format!(
            "{}{DELIMITER}{}",
            self.timestamp.format(TIMESTAMP_FORMAT),
            self.value
        )
    }

    /// Decodes a log row produced by [`Reading::to_row`].
    ///
    /// Surrounding whitespace on either field is ignored.
    ///
    /// # Errors
    ///
    /// Returns an error if the row is not `timestamp,value` with a valid
    /// timestamp and a non-negative integer value.
    pub fn from_row(row: &str) -> Result<Self, ReadingParseError> {
        let fields: Vec<&str> = row.trim_end_matches(['\r', '\n']).split(DELIMITER).collect();
        if fields.len() != 2 {
            return Err(ReadingParseError::FieldCount(fields.len()));
        }

        let raw_timestamp = fields[0].trim();
        let timestamp = NaiveDateTime::parse_from_str(raw_timestamp, TIMESTAMP_FORMAT)
            .map_err(|_| ReadingParseError::InvalidTimestamp(raw_timestamp.to_string()))?
            .and_utc();

        let raw_value = fields[1].trim();
        let value = raw_value
            .parse::<u64>()
            .map_err(|_| ReadingParseError::InvalidValue(raw_value.to_string()))?;

        Ok(Self { timestamp, value })
    }
}

impl std::fmt::Display for Reading {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} Kudos at {}", self.value, self.timestamp.to_rfc3339())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_row_format_is_fixed_width_and_sortable() {
        let early = Reading::new(Utc.with_ymd_and_hms(2024, 3, 9, 8, 5, 1).unwrap(), 7);
        let late = Reading::new(Utc.with_ymd_and_hms(2024, 11, 20, 17, 45, 0).unwrap(), 7);

        assert_eq!(early.to_row(), "2024-03-09T08:05:01.000Z,7");
        assert_eq!(early.to_row().len(), late.to_row().len());
        assert!(early.to_row() < late.to_row());
    }

    #[test]
    fn test_from_row_preserves_milliseconds() {
        let reading = Reading::from_row("2024-03-09T08:05:01.250Z,42").unwrap();

        assert_eq!(reading.value, 42);
        assert_eq!(reading.timestamp.timestamp_subsec_millis(), 250);
    }

    #[test]
    fn test_from_row_tolerates_whitespace_and_crlf() {
        let reading = Reading::from_row("2024-03-09T08:05:01.000Z, 42\r\n").unwrap();
        assert_eq!(reading.value, 42);
    }

    #[test]
    fn test_from_row_rejects_wrong_field_count() {
        assert_eq!(
            Reading::from_row("2024-03-09T08:05:01.000Z"),
            Err(ReadingParseError::FieldCount(1))
        );
        assert_eq!(
            Reading::from_row("2024-03-09T08:05:01.000Z,1,2"),
            Err(ReadingParseError::FieldCount(3))
        );
    }

    #[test]
    fn test_from_row_rejects_negative_value() {
        let result = Reading::from_row("2024-03-09T08:05:01.000Z,-5");
        assert!(matches!(result, Err(ReadingParseError::InvalidValue(_))));
    }

    #[test]
    fn test_from_row_rejects_legacy_epoch_timestamp() {
        let result = Reading::from_row("1710000000.25,100");
        assert!(matches!(result, Err(ReadingParseError::InvalidTimestamp(_))));
    }

    #[test]
    fn test_header_is_not_a_reading() {
        assert!(Reading::from_row(LOG_HEADER).is_err());
    }
}
