//! Persisted record types and download status definitions.

use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Status of a persisted download.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DownloadStatus {
    /// Accepted but not yet started.
    Queued,
    /// Probe succeeded and workers are running.
    Active,
    /// Drained on user request; resumable.
    Paused,
    /// Verified, renamed, terminal.
    Completed,
    /// Surfaced an unrecoverable failure; resumable after `update_url`.
    Error,
}

impl DownloadStatus {
    /// Database string representation.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::Active => "active",
            Self::Paused => "paused",
            Self::Completed => "completed",
            Self::Error => "error",
        }
    }
}

impl fmt::Display for DownloadStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for DownloadStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "queued" => Ok(Self::Queued),
            "active" => Ok(Self::Active),
            "paused" => Ok(Self::Paused),
            "completed" => Ok(Self::Completed),
            "error" => Ok(Self::Error),
            _ => Err(format!("invalid download status: {s}")),
        }
    }
}

/// Stable 16-hex-character fingerprint of a URL (truncated SHA-256).
///
/// Persistence is keyed by this fingerprint so identical URLs resolve to
/// the same on-disk record regardless of the user-visible ID.
#[must_use]
pub fn url_hash(url: &str) -> String {
    let digest = Sha256::digest(url.as_bytes());
    digest[..8].iter().fold(String::with_capacity(16), |mut out, byte| {
        use fmt::Write;
        let _ = write!(out, "{byte:02x}");
        out
    })
}

/// One remaining byte range of a persisted download.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskRecord {
    /// Index into the chunk plan.
    pub chunk_index: usize,
    /// Absolute start offset of the remaining range.
    pub offset: u64,
    /// Bytes still to fetch.
    pub length: u64,
    /// Bytes of the original chunk already written.
    pub written: u64,
}

/// A mirror associated with a persisted download.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MirrorRecord {
    pub url: String,
    pub quarantined: bool,
}

/// Durable state of one download, keyed by [`url_hash`].
///
/// `dest_path` is absolute so a later resume is invariant under changes to
/// the configured default download directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DownloadRecord {
    /// User-visible opaque ID.
    pub id: String,
    pub url: String,
    pub url_hash: String,
    pub dest_path: String,
    pub filename: String,
    pub total_size: u64,
    pub downloaded: u64,
    pub status: DownloadStatus,
    /// Custom request headers carried through probe and workers.
    pub headers: HashMap<String, String>,
    pub last_error: Option<String>,
    pub created_at: String,
    pub paused_at: Option<String>,
    pub completed_at: Option<String>,
    /// Remaining ranges only; empty once completed.
    pub tasks: Vec<TaskRecord>,
    pub mirrors: Vec<MirrorRecord>,
}

impl DownloadRecord {
    /// A fresh record for a newly accepted URL.
    #[must_use]
    pub fn new(id: String, url: String, dest_path: String, filename: String) -> Self {
        let url_hash = url_hash(&url);
        Self {
            id,
            url,
            url_hash,
            dest_path,
            filename,
            total_size: 0,
            downloaded: 0,
            status: DownloadStatus::Queued,
            headers: HashMap::new(),
            last_error: None,
            created_at: String::new(),
            paused_at: None,
            completed_at: None,
            tasks: Vec::new(),
            mirrors: Vec::new(),
        }
    }
}

/// A finished download in the history surface.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub url_hash: String,
    pub url: String,
    pub filename: String,
    pub dest_path: String,
    pub total_size: u64,
    pub completed_at: String,
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_url_hash_is_16_hex_chars() {
        for url in [
            "https://example.com/file.zip",
            "https://example.com/path/to/file.zip",
            "https://example.com/file.zip?token=abc",
            "https://other.org/download",
        ] {
            let hash = url_hash(url);
            assert_eq!(hash.len(), 16, "hash of {url}");
            assert!(hash.chars().all(|c| c.is_ascii_hexdigit()));
        }
    }

    #[test]
    fn test_url_hash_stable_and_distinct() {
        assert_eq!(
            url_hash("https://example.com/consistent.zip"),
            url_hash("https://example.com/consistent.zip")
        );
        assert_ne!(
            url_hash("https://example.com/file1.zip"),
            url_hash("https://example.com/file2.zip")
        );
    }

    #[test]
    fn test_status_round_trips_through_str() {
        for status in [
            DownloadStatus::Queued,
            DownloadStatus::Active,
            DownloadStatus::Paused,
            DownloadStatus::Completed,
            DownloadStatus::Error,
        ] {
            let parsed: DownloadStatus = status.as_str().parse().unwrap();
            assert_eq!(parsed, status);
        }
        assert!("bogus".parse::<DownloadStatus>().is_err());
    }

    #[test]
    fn test_new_record_derives_hash_from_url() {
        let record = DownloadRecord::new(
            "id-1".to_string(),
            "https://example.com/a.bin".to_string(),
            "/downloads/a.bin".to_string(),
            "a.bin".to_string(),
        );
        assert_eq!(record.url_hash, url_hash("https://example.com/a.bin"));
        assert_eq!(record.status, DownloadStatus::Queued);
        assert!(record.tasks.is_empty());
    }
}
