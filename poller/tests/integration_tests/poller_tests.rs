//! Integration tests for complete poller runs.
//!
//! Tests cover:
//! - Recording readings and releasing the lock on shutdown
//! - Fatal fetch errors
//! - Refusing to start while another instance holds the lock
//! - Rotation of a corrupt log and snapshot pruning

use poller::{run_poller_with_config, FetchError, PollerError, SamplerError};
use shared::lock::LockError;
use shared::models::LOG_HEADER;
use shared::storage::read_log;
use std::future::pending;

use super::common::{spawn_stub, test_config, StubReply};

fn dir_entries(dir: &std::path::Path) -> Vec<String> {
    let mut names: Vec<String> = std::fs::read_dir(dir)
        .unwrap()
        .map(|entry| entry.unwrap().file_name().to_string_lossy().into_owned())
        .collect();
    names.sort();
    names
}

#[tokio::test]
async fn test_poller_records_readings_until_shutdown() {
    let dir = tempfile::tempdir().unwrap();
    let stub = spawn_stub(vec![StubReply::kudos(100.0), StubReply::kudos(105.0)]).await;
    let config = test_config(dir.path(), &stub.url);

    let stats = run_poller_with_config(&config, stub.after_hits(2))
        .await
        .unwrap();

    assert_eq!(stats.recorded, 2);
    let contents = read_log(&config.log_path).unwrap();
    let values: Vec<u64> = contents.readings.iter().map(|r| r.value).collect();
    assert_eq!(values, vec![100, 105]);
    assert!(contents.readings[0].timestamp <= contents.readings[1].timestamp);
    assert!(std::fs::read_to_string(&config.log_path)
        .unwrap()
        .starts_with(LOG_HEADER));
    assert!(!config.lock_path.exists());
}

#[tokio::test]
async fn test_poller_writes_startup_snapshot() {
    let dir = tempfile::tempdir().unwrap();
    let stub = spawn_stub(vec![StubReply::kudos(1.0)]).await;
    let config = test_config(dir.path(), &stub.url);

    run_poller_with_config(&config, stub.after_hits(1))
        .await
        .unwrap();

    let snapshots = dir_entries(&config.backup_dir);
    assert_eq!(snapshots.len(), 1);
    assert!(snapshots[0].starts_with("out-"));
    assert!(snapshots[0].ends_with(".csv.gz"));
}

#[tokio::test]
async fn test_poller_prunes_old_snapshots() {
    let dir = tempfile::tempdir().unwrap();
    let stub = spawn_stub(vec![StubReply::kudos(1.0)]).await;
    let mut config = test_config(dir.path(), &stub.url);
    config.num_backups = 2;
    std::fs::create_dir_all(&config.backup_dir).unwrap();
    for second in 0..3 {
        let name = format!("out-20200101T00000{second}Z.csv.gz");
        std::fs::write(config.backup_dir.join(name), b"old").unwrap();
    }

    run_poller_with_config(&config, stub.after_hits(1))
        .await
        .unwrap();

    let snapshots = dir_entries(&config.backup_dir);
    assert_eq!(snapshots.len(), 2);
    assert_eq!(snapshots[0], "out-20200101T000002Z.csv.gz");
    assert!(!snapshots[1].starts_with("out-2020"));
}

#[tokio::test]
async fn test_poller_fatal_fetch_releases_lock() {
    let dir = tempfile::tempdir().unwrap();
    let stub = spawn_stub(vec![StubReply::kudos(1.0)]).await;
    let mut config = test_config(dir.path(), &stub.url);
    config.api_key = "revoked-key".to_string();

    let error = run_poller_with_config(&config, pending())
        .await
        .unwrap_err();

    assert!(matches!(
        error,
        PollerError::Sampler(SamplerError::Fetch(FetchError::Fatal(_)))
    ));
    assert_eq!(error.exit_code(), poller::EXIT_FATAL);
    assert!(read_log(&config.log_path).unwrap().readings.is_empty());
    assert!(!config.lock_path.exists());
    assert_eq!(stub.hits(), 1);
}

#[tokio::test]
async fn test_poller_refuses_to_start_when_locked() {
    let dir = tempfile::tempdir().unwrap();
    let stub = spawn_stub(vec![StubReply::kudos(1.0)]).await;
    let config = test_config(dir.path(), &stub.url);
    let held = shared::lock::acquire(&config.lock_path).unwrap();

    let error = run_poller_with_config(&config, pending())
        .await
        .unwrap_err();

    assert!(matches!(
        error,
        PollerError::Lock(LockError::AlreadyRunning { .. })
    ));
    assert_eq!(error.exit_code(), poller::EXIT_ALREADY_RUNNING);
    assert!(!config.log_path.exists());
    assert_eq!(stub.hits(), 0);
    assert!(config.lock_path.exists());
    held.release().unwrap();
}

#[tokio::test]
async fn test_poller_rotates_corrupt_log() {
    let dir = tempfile::tempdir().unwrap();
    let stub = spawn_stub(vec![StubReply::kudos(7.0)]).await;
    let config = test_config(dir.path(), &stub.url);
    std::fs::write(&config.log_path, "this is not a kudos log\n1,2,3\n").unwrap();

    run_poller_with_config(&config, stub.after_hits(1))
        .await
        .unwrap();

    let rotated: Vec<String> = dir_entries(dir.path())
        .into_iter()
        .filter(|name| name.starts_with("out-") && name.ends_with(".csv"))
        .collect();
    assert_eq!(rotated.len(), 1);
    let backup = std::fs::read_to_string(dir.path().join(&rotated[0])).unwrap();
    assert_eq!(backup, "this is not a kudos log\n1,2,3\n");

    let values: Vec<u64> = read_log(&config.log_path)
        .unwrap()
        .readings
        .iter()
        .map(|r| r.value)
        .collect();
    assert_eq!(values, vec![7]);
}
