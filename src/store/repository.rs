//! Repository seam for the persistence store.
//!
//! The orchestrator depends on this trait rather than on [`StateStore`]
//! directly, keeping the data-access boundary mockable for higher-level
//! tests.

use async_trait::async_trait;

use super::{DownloadRecord, HistoryEntry, Result, StateStore};

/// Data-access contract for download state and history.
#[async_trait]
pub trait StateRepository: Send + Sync {
    /// Upserts a record, replacing its task and mirror rows.
    async fn save(&self, record: &DownloadRecord) -> Result<()>;

    /// Loads one record by URL fingerprint.
    async fn load_by_hash(&self, hash: &str) -> Result<Option<DownloadRecord>>;

    /// All paused records.
    async fn load_paused(&self) -> Result<Vec<DownloadRecord>>;

    /// All completed records.
    async fn load_completed(&self) -> Result<Vec<DownloadRecord>>;

    /// Every persisted record.
    async fn load_all(&self) -> Result<Vec<DownloadRecord>>;

    /// Deletes a record (tasks and mirrors cascade).
    async fn delete_by_url(&self, url: &str) -> Result<()>;

    /// Upserts a history entry.
    async fn add_to_history(&self, entry: &HistoryEntry) -> Result<()>;

    /// All history entries, newest first.
    async fn history(&self) -> Result<Vec<HistoryEntry>>;

    /// Removes one history entry.
    async fn remove_from_history(&self, hash: &str) -> Result<()>;
}

#[async_trait]
impl StateRepository for StateStore {
    async fn save(&self, record: &DownloadRecord) -> Result<()> {
        StateStore::save(self, record).await
    }

    async fn load_by_hash(&self, hash: &str) -> Result<Option<DownloadRecord>> {
        StateStore::load_by_hash(self, hash).await
    }

    async fn load_paused(&self) -> Result<Vec<DownloadRecord>> {
        StateStore::load_paused(self).await
    }

    async fn load_completed(&self) -> Result<Vec<DownloadRecord>> {
        StateStore::load_completed(self).await
    }

    async fn load_all(&self) -> Result<Vec<DownloadRecord>> {
        StateStore::load_all(self).await
    }

    async fn delete_by_url(&self, url: &str) -> Result<()> {
        StateStore::delete_by_url(self, url).await
    }

    async fn add_to_history(&self, entry: &HistoryEntry) -> Result<()> {
        StateStore::add_to_history(self, entry).await
    }

    async fn history(&self) -> Result<Vec<HistoryEntry>> {
        StateStore::history(self).await
    }

    async fn remove_from_history(&self, hash: &str) -> Result<()> {
        StateStore::remove_from_history(self, hash).await
    }
}
