//! KudoMan Shared Library
//!
//! This crate contains the types and storage used by the KudoMan poller and
//! command-line tools.
//!
//! # Modules
//!
//! - [`models`] - The `Reading` sample and its log row encoding
//! - [`lock`] - Single-instance lockfile protocol
//! - [`storage`] - Append-only reading log, rotation and backups
//! - [`config`] - Environment-driven configuration helpers and report options
//! - [`report`] - Chart series and SVG rendering
//!
//! # Example
//!
//! ```
//! use shared::models::Reading;
//! use shared::storage::{CsvLogStore, ReadingStore};
//!
//! let dir = tempfile::tempdir().unwrap();
//! let lock = shared::lock::acquire(dir.path().join(".kudolock")).unwrap();
//!
//! let mut log = CsvLogStore::open_or_rotate(dir.path().join("out.csv")).unwrap();
//! log.append(&Reading::now(1_000)).unwrap();
//!
//! lock.release().unwrap();
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod config;
pub mod lock;
pub mod models;
pub mod report;
pub mod storage;

/// Re-export common dependencies for convenience.
pub use chrono;
pub use serde;
pub use serde_json;
pub use validator;
