//! Data models for KudoMan.
//!
//! This module contains the `Reading` sample and its log row encoding.

pub mod reading;

pub use reading::{Reading, ReadingParseError, LOG_HEADER, TIMESTAMP_FORMAT};
