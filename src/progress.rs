//! Shared per-download progress counters.
//!
//! One [`ProgressState`] is shared by every worker of a download plus the
//! progress reporter. Counters are plain atomics so workers can publish
//! batched updates without locking; the reporter reads a consistent-enough
//! snapshot for UI purposes.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};

use serde::{Deserialize, Serialize};

/// Atomic counters for one active download.
///
/// Invariants maintained by the fetchers:
/// `0 <= verified_progress <= downloaded <= total_size`, and at quiescent
/// points `sum(chunk_progress) == downloaded`.
#[derive(Debug)]
pub struct ProgressState {
    /// Bytes written to disk. Monotonic non-decreasing.
    downloaded: AtomicU64,
    /// Bytes confirmed durable: positionally written and accounted for in
    /// the chunk-progress record. Never exceeds `downloaded`.
    verified: AtomicU64,
    /// Live worker count.
    active_connections: AtomicUsize,
    /// Immutable after probe.
    total_size: AtomicU64,
    /// Per-chunk written bytes, parallel to the chunk plan.
    chunk_progress: Vec<AtomicU64>,
    /// Monotonic flags: once set they stay set until a fresh start.
    paused: AtomicBool,
    cancelled: AtomicBool,
}

impl ProgressState {
    /// Creates state for a plan of `chunks` chunks covering `total_size`.
    #[must_use]
    pub fn new(total_size: u64, chunks: usize) -> Arc<Self> {
        Arc::new(Self {
            downloaded: AtomicU64::new(0),
            verified: AtomicU64::new(0),
            active_connections: AtomicUsize::new(0),
            total_size: AtomicU64::new(total_size),
            chunk_progress: (0..chunks).map(|_| AtomicU64::new(0)).collect(),
            paused: AtomicBool::new(false),
            cancelled: AtomicBool::new(false),
        })
    }

    /// Seeds counters from a resumed run: `downloaded` bytes already on
    /// disk, with `per_chunk` the prior written bytes for each chunk.
    pub fn seed_resumed(&self, downloaded: u64, per_chunk: &[(usize, u64)]) {
        self.downloaded.store(downloaded, Ordering::Relaxed);
        self.verified.store(downloaded, Ordering::Relaxed);
        for &(index, written) in per_chunk {
            if let Some(slot) = self.chunk_progress.get(index) {
                slot.store(written, Ordering::Relaxed);
            }
        }
    }

    /// Adds freshly written bytes to the running total.
    pub fn add_downloaded(&self, bytes: u64) {
        self.downloaded.fetch_add(bytes, Ordering::Relaxed);
    }

    /// Adds bytes to one chunk's progress slot.
    pub fn add_chunk_progress(&self, index: usize, bytes: u64) {
        if let Some(slot) = self.chunk_progress.get(index) {
            slot.fetch_add(bytes, Ordering::Release);
        }
    }

    /// Marks `bytes` as verified (durable and recorded).
    pub fn add_verified(&self, bytes: u64) {
        self.verified.fetch_add(bytes, Ordering::Relaxed);
    }

    /// Sets both written totals to the same value. Used by the
    /// single-connection fetcher, where every flushed byte is verified.
    pub fn store_written(&self, bytes: u64) {
        self.downloaded.store(bytes, Ordering::Relaxed);
        self.verified.store(bytes, Ordering::Relaxed);
        if let Some(slot) = self.chunk_progress.first() {
            slot.store(bytes, Ordering::Release);
        }
    }

    #[must_use]
    pub fn downloaded(&self) -> u64 {
        self.downloaded.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn verified_progress(&self) -> u64 {
        self.verified.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn total_size(&self) -> u64 {
        self.total_size.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn chunk_progress(&self, index: usize) -> u64 {
        self.chunk_progress
            .get(index)
            .map_or(0, |slot| slot.load(Ordering::Acquire))
    }

    /// Snapshot of all chunk slots, parallel to the plan.
    #[must_use]
    pub fn chunk_progress_vec(&self) -> Vec<u64> {
        self.chunk_progress
            .iter()
            .map(|slot| slot.load(Ordering::Acquire))
            .collect()
    }

    #[must_use]
    pub fn chunk_count(&self) -> usize {
        self.chunk_progress.len()
    }

    pub fn worker_started(&self) {
        self.active_connections.fetch_add(1, Ordering::Relaxed);
    }

    pub fn worker_stopped(&self) {
        self.active_connections.fetch_sub(1, Ordering::Relaxed);
    }

    #[must_use]
    pub fn active_connections(&self) -> usize {
        self.active_connections.load(Ordering::Relaxed)
    }

    pub fn set_paused(&self) {
        self.paused.store(true, Ordering::Release);
    }

    #[must_use]
    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::Acquire)
    }

    pub fn set_cancelled(&self) {
        self.cancelled.store(true, Ordering::Release);
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }

    /// Point-in-time copy of the counters for event emission.
    #[must_use]
    pub fn snapshot(&self) -> ProgressSnapshot {
        ProgressSnapshot {
            downloaded: self.downloaded(),
            verified_progress: self.verified_progress(),
            total_size: self.total_size(),
            active_connections: self.active_connections(),
            chunk_progress: self.chunk_progress_vec(),
        }
    }
}

/// Plain-data copy of [`ProgressState`] counters.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ProgressSnapshot {
    pub downloaded: u64,
    pub verified_progress: u64,
    pub total_size: u64,
    pub active_connections: usize,
    pub chunk_progress: Vec<u64>,
}
