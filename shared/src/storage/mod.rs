//! Storage for readings.
//!
//! This module provides the append-only reading log and its backups.
//! The `ReadingStore` trait defines the interface the sampler appends through,
//! allowing the file-backed log to be swapped for an in-memory store in tests.

pub mod backup;
pub mod log_store;

pub use backup::{prune_snapshots, rotate_aside, write_snapshot, BackupError};
pub use log_store::{
    read_log, CsvLogStore, InMemoryReadingStore, LogContents, LogStoreError, LogWriteError,
    OpenOutcome, ReadingStore,
};
