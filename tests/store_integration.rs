//! Persistence-store tests against a file-backed database.
//!
//! The unit tests in `store` cover the operation contracts on an in-memory
//! database; these verify that state actually survives the database handle
//! being dropped and reopened, which is what a resume after process restart
//! depends on.

use surge::{Database, DownloadRecord, DownloadStatus, StateStore, TaskRecord, url_hash};

fn paused_record(url: &str, downloaded: u64) -> DownloadRecord {
    let mut record = DownloadRecord::new(
        "aaaaaaaa-bbbb-cccc-dddd-eeeeeeeeeeee".to_string(),
        url.to_string(),
        "/downloads/restart.bin".to_string(),
        "restart.bin".to_string(),
    );
    record.total_size = 1_000_000;
    record.downloaded = downloaded;
    record.status = DownloadStatus::Paused;
    record.tasks = vec![TaskRecord {
        chunk_index: 0,
        offset: downloaded,
        length: 1_000_000 - downloaded,
        written: downloaded,
    }];
    record
}

#[tokio::test]
async fn test_state_survives_database_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let db_path = dir.path().join("surge.db");
    let url = "https://example.com/restart.bin";

    {
        let store = StateStore::new(Database::new(&db_path).await.unwrap());
        store.save(&paused_record(url, 250_000)).await.unwrap();
    }

    // Fresh handle over the same file: the paused state must be intact.
    let store = StateStore::new(Database::new(&db_path).await.unwrap());
    let loaded = store.load_by_url(url).await.unwrap().unwrap();
    assert_eq!(loaded.status, DownloadStatus::Paused);
    assert_eq!(loaded.downloaded, 250_000);
    assert_eq!(loaded.tasks.len(), 1);
    assert_eq!(loaded.tasks[0].offset, 250_000);
    assert_eq!(loaded.tasks[0].length, 750_000);
}

#[tokio::test]
async fn test_checkpoint_overwrites_survive_reopen() {
    // Pause at 30%, checkpoint at 80%, restart: the 80% snapshot wins.
    let dir = tempfile::tempdir().unwrap();
    let db_path = dir.path().join("surge.db");
    let url = "https://example.com/checkpointed.bin";

    {
        let store = StateStore::new(Database::new(&db_path).await.unwrap());
        store.save(&paused_record(url, 300_000)).await.unwrap();
        store.save(&paused_record(url, 800_000)).await.unwrap();
    }

    let store = StateStore::new(Database::new(&db_path).await.unwrap());
    let loaded = store.load_by_hash(&url_hash(url)).await.unwrap().unwrap();
    assert_eq!(loaded.downloaded, 800_000);
    assert_eq!(loaded.tasks[0].offset, 800_000);

    let paused = store.load_paused().await.unwrap();
    assert_eq!(paused.len(), 1);
}

#[tokio::test]
async fn test_dest_path_is_independent_of_download_dir_config() {
    // The record stores an absolute dest_path, so a changed default
    // download directory cannot re-point an existing resume.
    let dir = tempfile::tempdir().unwrap();
    let db_path = dir.path().join("surge.db");
    let url = "https://example.com/absolute.bin";

    let store = StateStore::new(Database::new(&db_path).await.unwrap());
    store.save(&paused_record(url, 1)).await.unwrap();

    let loaded = store.load_by_url(url).await.unwrap().unwrap();
    assert!(std::path::Path::new(&loaded.dest_path).is_absolute());
}
