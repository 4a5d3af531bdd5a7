//! Lifecycle events emitted to the outer UI / API layer.
//!
//! Every download publishes a causally ordered stream of events on the
//! manager's broadcast channel. Payloads are serde-serializable so the
//! embedding layer can forward them verbatim (e.g. as SSE frames).

use serde::{Deserialize, Serialize};

/// Buffered events per subscriber before the oldest are dropped.
pub const EVENT_CHANNEL_CAPACITY: usize = 1024;

/// One lifecycle event for one download.
///
/// The `id` is the user-visible download ID. Progress events may be
/// coalesced; all other events are delivered exactly once per transition.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum DownloadEvent {
    /// The orchestrator accepted the URL.
    Queued {
        id: String,
        url: String,
        filename: String,
        dest_path: String,
    },
    /// Probe succeeded and workers are starting.
    Started {
        id: String,
        filename: String,
        total: u64,
        dest_path: String,
    },
    /// Periodic counter snapshot.
    Progress {
        id: String,
        downloaded: u64,
        total: u64,
        /// Bytes per second over the reporter's sampling window.
        speed: f64,
        active_connections: usize,
        chunk_progress: Vec<u64>,
    },
    /// The download drained and persisted its remaining work.
    Paused { id: String, downloaded: u64 },
    /// A paused download is running again.
    Resumed { id: String },
    /// Final rename done; counters are terminal.
    Complete {
        id: String,
        filename: String,
        total: u64,
        elapsed_ms: u64,
        avg_speed: f64,
    },
    /// Unrecoverable failure, already persisted as `status=error`.
    Error { id: String, error: String },
    /// The download and its state were removed.
    Removed { id: String },
}

impl DownloadEvent {
    /// The download this event belongs to.
    #[must_use]
    pub fn download_id(&self) -> &str {
        match self {
            Self::Queued { id, .. }
            | Self::Started { id, .. }
            | Self::Progress { id, .. }
            | Self::Paused { id, .. }
            | Self::Resumed { id }
            | Self::Complete { id, .. }
            | Self::Error { id, .. }
            | Self::Removed { id } => id,
        }
    }

    /// Event-type name as used on the wire (`progress`, `started`, ...).
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Queued { .. } => "queued",
            Self::Started { .. } => "started",
            Self::Progress { .. } => "progress",
            Self::Paused { .. } => "paused",
            Self::Resumed { .. } => "resumed",
            Self::Complete { .. } => "complete",
            Self::Error { .. } => "error",
            Self::Removed { .. } => "removed",
        }
    }
}
