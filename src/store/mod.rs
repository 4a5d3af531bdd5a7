//! Resume/persistence store.
//!
//! Durable record of in-flight, paused, and completed downloads plus their
//! remaining byte ranges, keyed by the URL fingerprint. All writes funnel
//! through one [`StateStore`] over a single SQLite handle; each save is one
//! transaction, and callers coalesce progress checkpoints to at most one
//! write per ~500 ms per download.
//!
//! Save semantics are overwrite, not merge: a second pause at 80% fully
//! supersedes a first pause at 30%.

mod error;
mod record;
mod repository;

use std::collections::HashMap;

use sqlx::Row;
use tracing::{debug, instrument};

pub use error::{Result, StoreError};
pub use record::{
    DownloadRecord, DownloadStatus, HistoryEntry, MirrorRecord, TaskRecord, url_hash,
};
pub use repository::StateRepository;

use crate::db::Database;

/// Single-writer persistence store over the shared database handle.
#[derive(Debug, Clone)]
pub struct StateStore {
    db: Database,
}

impl StateStore {
    #[must_use]
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Upserts a download record and replaces its task and mirror rows.
    ///
    /// Idempotent on `url_hash`; `created_at` of an existing row is
    /// preserved, `paused_at`/`completed_at` are stamped when the status
    /// transitions to `paused`/`completed`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] on SQL failure.
    #[instrument(skip(self, record), fields(url_hash = %record.url_hash, status = %record.status))]
    pub async fn save(&self, record: &DownloadRecord) -> Result<()> {
        let headers_json = serde_json::to_string(&record.headers)?;
        let mut tx = self.db.pool().begin().await?;

        sqlx::query(
            "INSERT INTO downloads \
                (url_hash, id, url, dest_path, filename, total_size, downloaded, status, headers, last_error, paused_at, completed_at) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, \
                CASE WHEN ? = 'paused' THEN datetime('now') END, \
                CASE WHEN ? = 'completed' THEN datetime('now') END) \
             ON CONFLICT(url_hash) DO UPDATE SET \
                id = excluded.id, \
                url = excluded.url, \
                dest_path = excluded.dest_path, \
                filename = excluded.filename, \
                total_size = excluded.total_size, \
                downloaded = excluded.downloaded, \
                status = excluded.status, \
                headers = excluded.headers, \
                last_error = excluded.last_error, \
                paused_at = CASE WHEN excluded.status = 'paused' THEN datetime('now') ELSE downloads.paused_at END, \
                completed_at = CASE WHEN excluded.status = 'completed' THEN datetime('now') ELSE downloads.completed_at END",
        )
        .bind(&record.url_hash)
        .bind(&record.id)
        .bind(&record.url)
        .bind(&record.dest_path)
        .bind(&record.filename)
        .bind(to_i64(record.total_size))
        .bind(to_i64(record.downloaded))
        .bind(record.status.as_str())
        .bind(&headers_json)
        .bind(&record.last_error)
        .bind(record.status.as_str())
        .bind(record.status.as_str())
        .execute(&mut *tx)
        .await?;

        sqlx::query("DELETE FROM tasks WHERE url_hash = ?")
            .bind(&record.url_hash)
            .execute(&mut *tx)
            .await?;
        for task in &record.tasks {
            sqlx::query(
                "INSERT INTO tasks (url_hash, chunk_index, offset, length, written) \
                 VALUES (?, ?, ?, ?, ?)",
            )
            .bind(&record.url_hash)
            .bind(to_i64(task.chunk_index as u64))
            .bind(to_i64(task.offset))
            .bind(to_i64(task.length))
            .bind(to_i64(task.written))
            .execute(&mut *tx)
            .await?;
        }

        sqlx::query("DELETE FROM mirrors WHERE url_hash = ?")
            .bind(&record.url_hash)
            .execute(&mut *tx)
            .await?;
        for mirror in &record.mirrors {
            sqlx::query(
                "INSERT INTO mirrors (url_hash, url, quarantined) VALUES (?, ?, ?)",
            )
            .bind(&record.url_hash)
            .bind(&mirror.url)
            .bind(i64::from(mirror.quarantined))
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        debug!("state saved");
        Ok(())
    }

    /// Loads one record with its tasks and mirrors.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] on SQL failure and
    /// [`StoreError::InvalidStatus`]/[`StoreError::Corrupt`] for unreadable
    /// persisted rows.
    pub async fn load_by_hash(&self, hash: &str) -> Result<Option<DownloadRecord>> {
        let row = sqlx::query(
            "SELECT url_hash, id, url, dest_path, filename, total_size, downloaded, status, \
                    headers, last_error, created_at, paused_at, completed_at \
             FROM downloads WHERE url_hash = ?",
        )
        .bind(hash)
        .fetch_optional(self.db.pool())
        .await?;

        let Some(row) = row else { return Ok(None) };
        let mut record = record_from_row(&row)?;
        record.tasks = self.load_tasks(hash).await?;
        record.mirrors = self.load_mirrors(hash).await?;
        Ok(Some(record))
    }

    /// Loads the record for `url`, if any.
    ///
    /// # Errors
    ///
    /// Same as [`load_by_hash`](Self::load_by_hash).
    pub async fn load_by_url(&self, url: &str) -> Result<Option<DownloadRecord>> {
        self.load_by_hash(&url_hash(url)).await
    }

    /// All paused records, tasks included.
    ///
    /// # Errors
    ///
    /// Same as [`load_by_hash`](Self::load_by_hash).
    pub async fn load_paused(&self) -> Result<Vec<DownloadRecord>> {
        self.load_by_status(DownloadStatus::Paused).await
    }

    /// All completed records.
    ///
    /// # Errors
    ///
    /// Same as [`load_by_hash`](Self::load_by_hash).
    pub async fn load_completed(&self) -> Result<Vec<DownloadRecord>> {
        self.load_by_status(DownloadStatus::Completed).await
    }

    /// Every persisted record, newest first.
    ///
    /// # Errors
    ///
    /// Same as [`load_by_hash`](Self::load_by_hash).
    pub async fn load_all(&self) -> Result<Vec<DownloadRecord>> {
        let rows = sqlx::query(
            "SELECT url_hash, id, url, dest_path, filename, total_size, downloaded, status, \
                    headers, last_error, created_at, paused_at, completed_at \
             FROM downloads ORDER BY created_at DESC, url_hash",
        )
        .fetch_all(self.db.pool())
        .await?;
        self.attach_children(rows).await
    }

    async fn load_by_status(&self, status: DownloadStatus) -> Result<Vec<DownloadRecord>> {
        let rows = sqlx::query(
            "SELECT url_hash, id, url, dest_path, filename, total_size, downloaded, status, \
                    headers, last_error, created_at, paused_at, completed_at \
             FROM downloads WHERE status = ? ORDER BY created_at DESC, url_hash",
        )
        .bind(status.as_str())
        .fetch_all(self.db.pool())
        .await?;
        self.attach_children(rows).await
    }

    async fn attach_children(
        &self,
        rows: Vec<sqlx::sqlite::SqliteRow>,
    ) -> Result<Vec<DownloadRecord>> {
        let mut records = Vec::with_capacity(rows.len());
        for row in rows {
            let mut record = record_from_row(&row)?;
            record.tasks = self.load_tasks(&record.url_hash).await?;
            record.mirrors = self.load_mirrors(&record.url_hash).await?;
            records.push(record);
        }
        Ok(records)
    }

    async fn load_tasks(&self, hash: &str) -> Result<Vec<TaskRecord>> {
        let rows = sqlx::query(
            "SELECT chunk_index, offset, length, written FROM tasks \
             WHERE url_hash = ? ORDER BY chunk_index",
        )
        .bind(hash)
        .fetch_all(self.db.pool())
        .await?;

        rows.iter()
            .map(|row| {
                Ok(TaskRecord {
                    chunk_index: to_u64(row.try_get::<i64, _>("chunk_index")?) as usize,
                    offset: to_u64(row.try_get::<i64, _>("offset")?),
                    length: to_u64(row.try_get::<i64, _>("length")?),
                    written: to_u64(row.try_get::<i64, _>("written")?),
                })
            })
            .collect()
    }

    async fn load_mirrors(&self, hash: &str) -> Result<Vec<MirrorRecord>> {
        let rows = sqlx::query(
            "SELECT url, quarantined FROM mirrors WHERE url_hash = ? ORDER BY rowid",
        )
        .bind(hash)
        .fetch_all(self.db.pool())
        .await?;

        rows.iter()
            .map(|row| {
                Ok(MirrorRecord {
                    url: row.try_get("url")?,
                    quarantined: row.try_get::<i64, _>("quarantined")? != 0,
                })
            })
            .collect()
    }

    /// Deletes the record for `url`; task and mirror rows cascade.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] on SQL failure.
    #[instrument(skip(self))]
    pub async fn delete_by_url(&self, url: &str) -> Result<()> {
        sqlx::query("DELETE FROM downloads WHERE url_hash = ?")
            .bind(url_hash(url))
            .execute(self.db.pool())
            .await?;
        Ok(())
    }

    /// Upserts a history entry for a finished download.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] on SQL failure.
    pub async fn add_to_history(&self, entry: &HistoryEntry) -> Result<()> {
        sqlx::query(
            "INSERT INTO history (url_hash, url, filename, dest_path, total_size) \
             VALUES (?, ?, ?, ?, ?) \
             ON CONFLICT(url_hash) DO UPDATE SET \
                url = excluded.url, \
                filename = excluded.filename, \
                dest_path = excluded.dest_path, \
                total_size = excluded.total_size, \
                completed_at = datetime('now')",
        )
        .bind(&entry.url_hash)
        .bind(&entry.url)
        .bind(&entry.filename)
        .bind(&entry.dest_path)
        .bind(to_i64(entry.total_size))
        .execute(self.db.pool())
        .await?;
        Ok(())
    }

    /// All history entries, newest first.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] on SQL failure.
    pub async fn history(&self) -> Result<Vec<HistoryEntry>> {
        let rows = sqlx::query(
            "SELECT url_hash, url, filename, dest_path, total_size, completed_at \
             FROM history ORDER BY completed_at DESC, url_hash",
        )
        .fetch_all(self.db.pool())
        .await?;

        rows.iter()
            .map(|row| {
                Ok(HistoryEntry {
                    url_hash: row.try_get("url_hash")?,
                    url: row.try_get("url")?,
                    filename: row.try_get("filename")?,
                    dest_path: row.try_get("dest_path")?,
                    total_size: to_u64(row.try_get::<i64, _>("total_size")?),
                    completed_at: row.try_get("completed_at")?,
                })
            })
            .collect()
    }

    /// Removes one history entry by fingerprint.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] on SQL failure.
    pub async fn remove_from_history(&self, hash: &str) -> Result<()> {
        sqlx::query("DELETE FROM history WHERE url_hash = ?")
            .bind(hash)
            .execute(self.db.pool())
            .await?;
        Ok(())
    }
}

fn record_from_row(row: &sqlx::sqlite::SqliteRow) -> Result<DownloadRecord> {
    let status_str: String = row.try_get("status")?;
    let status = status_str
        .parse()
        .map_err(|_| StoreError::InvalidStatus(status_str))?;
    let headers_json: Option<String> = row.try_get("headers")?;
    let headers: HashMap<String, String> = match headers_json {
        Some(json) if !json.is_empty() => serde_json::from_str(&json)?,
        _ => HashMap::new(),
    };

    Ok(DownloadRecord {
        url_hash: row.try_get("url_hash")?,
        id: row.try_get("id")?,
        url: row.try_get("url")?,
        dest_path: row.try_get("dest_path")?,
        filename: row.try_get("filename")?,
        total_size: to_u64(row.try_get::<i64, _>("total_size")?),
        downloaded: to_u64(row.try_get::<i64, _>("downloaded")?),
        status,
        headers,
        last_error: row.try_get("last_error")?,
        created_at: row.try_get("created_at")?,
        paused_at: row.try_get("paused_at")?,
        completed_at: row.try_get("completed_at")?,
        tasks: Vec::new(),
        mirrors: Vec::new(),
    })
}

fn to_i64(value: u64) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}

fn to_u64(value: i64) -> u64 {
    u64::try_from(value).unwrap_or(0)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    async fn test_store() -> StateStore {
        let db = Database::new_in_memory().await.unwrap();
        StateStore::new(db)
    }

    fn sample_record(url: &str) -> DownloadRecord {
        let mut record = DownloadRecord::new(
            "11111111-2222-3333-4444-555555555555".to_string(),
            url.to_string(),
            "/downloads/sample.bin".to_string(),
            "sample.bin".to_string(),
        );
        record.total_size = 1_000_000;
        record.downloaded = 300_000;
        record.status = DownloadStatus::Paused;
        record.headers.insert("Cookie".to_string(), "k=v".to_string());
        record.tasks = vec![
            TaskRecord {
                chunk_index: 1,
                offset: 300_000,
                length: 350_000,
                written: 50_000,
            },
            TaskRecord {
                chunk_index: 2,
                offset: 650_000,
                length: 350_000,
                written: 0,
            },
        ];
        record.mirrors = vec![MirrorRecord {
            url: "https://mirror.example.com/sample.bin".to_string(),
            quarantined: false,
        }];
        record
    }

    #[tokio::test]
    async fn test_save_then_load_is_structurally_equal() {
        let store = test_store().await;
        let record = sample_record("https://example.com/sample.bin");
        store.save(&record).await.unwrap();

        let loaded = store
            .load_by_hash(&record.url_hash)
            .await
            .unwrap()
            .unwrap();

        assert_eq!(loaded.url, record.url);
        assert_eq!(loaded.url_hash, record.url_hash);
        assert_eq!(loaded.dest_path, record.dest_path);
        assert_eq!(loaded.filename, record.filename);
        assert_eq!(loaded.total_size, record.total_size);
        assert_eq!(loaded.downloaded, record.downloaded);
        assert_eq!(loaded.status, record.status);
        assert_eq!(loaded.headers, record.headers);
        assert_eq!(loaded.tasks, record.tasks);
        assert_eq!(loaded.mirrors, record.mirrors);
        assert!(!loaded.created_at.is_empty());
        assert!(loaded.paused_at.is_some(), "paused save stamps paused_at");
    }

    #[tokio::test]
    async fn test_second_save_fully_supersedes_first() {
        // Pause at 30%, then pause again at 80%: the later snapshot wins
        // outright (overwrite, not merge).
        let store = test_store().await;
        let url = "https://example.com/overwrite.bin";

        let mut first = sample_record(url);
        first.downloaded = 300_000;
        first.tasks = vec![TaskRecord {
            chunk_index: 0,
            offset: 300_000,
            length: 700_000,
            written: 0,
        }];
        store.save(&first).await.unwrap();

        let mut second = sample_record(url);
        second.downloaded = 800_000;
        second.tasks = vec![TaskRecord {
            chunk_index: 0,
            offset: 800_000,
            length: 200_000,
            written: 0,
        }];
        store.save(&second).await.unwrap();

        let loaded = store.load_by_url(url).await.unwrap().unwrap();
        assert_eq!(loaded.downloaded, 800_000);
        assert_eq!(loaded.tasks.len(), 1);
        assert_eq!(loaded.tasks[0].offset, 800_000);
    }

    #[tokio::test]
    async fn test_load_paused_filters_by_status() {
        let store = test_store().await;

        let mut paused = sample_record("https://example.com/paused.bin");
        paused.status = DownloadStatus::Paused;
        store.save(&paused).await.unwrap();

        let mut active = sample_record("https://example.com/active.bin");
        active.status = DownloadStatus::Active;
        store.save(&active).await.unwrap();

        let loaded = store.load_paused().await.unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].url, "https://example.com/paused.bin");
        assert_eq!(loaded[0].tasks.len(), 2, "tasks come along");
    }

    #[tokio::test]
    async fn test_delete_by_url_cascades() {
        let store = test_store().await;
        let record = sample_record("https://example.com/delete-me.bin");
        store.save(&record).await.unwrap();

        store.delete_by_url(&record.url).await.unwrap();

        assert!(store.load_by_hash(&record.url_hash).await.unwrap().is_none());
        let (tasks,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM tasks")
            .fetch_one(store.db.pool())
            .await
            .unwrap();
        assert_eq!(tasks, 0);
        let (mirrors,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM mirrors")
            .fetch_one(store.db.pool())
            .await
            .unwrap();
        assert_eq!(mirrors, 0);
    }

    #[tokio::test]
    async fn test_completed_save_clears_tasks_and_stamps_time() {
        let store = test_store().await;
        let url = "https://example.com/finish.bin";
        store.save(&sample_record(url)).await.unwrap();

        let mut done = sample_record(url);
        done.status = DownloadStatus::Completed;
        done.downloaded = done.total_size;
        done.tasks.clear();
        store.save(&done).await.unwrap();

        let loaded = store.load_by_url(url).await.unwrap().unwrap();
        assert_eq!(loaded.status, DownloadStatus::Completed);
        assert!(loaded.tasks.is_empty());
        assert!(loaded.completed_at.is_some());
    }

    #[tokio::test]
    async fn test_history_round_trip_and_removal() {
        let store = test_store().await;
        let entry = HistoryEntry {
            url_hash: url_hash("https://example.com/done.bin"),
            url: "https://example.com/done.bin".to_string(),
            filename: "done.bin".to_string(),
            dest_path: "/downloads/done.bin".to_string(),
            total_size: 42,
            completed_at: String::new(),
        };
        store.add_to_history(&entry).await.unwrap();

        let history = store.history().await.unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].url, entry.url);
        assert!(!history[0].completed_at.is_empty());

        store.remove_from_history(&entry.url_hash).await.unwrap();
        assert!(store.history().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_load_missing_returns_none() {
        let store = test_store().await;
        assert!(store.load_by_hash("0000000000000000").await.unwrap().is_none());
    }
}
