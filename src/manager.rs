//! Orchestrator: probe, plan, dispatch, finalize, persist.
//!
//! [`DownloadManager`] is the crate's public control surface. It accepts
//! URLs, runs each download through probe → plan → fetch → finalize, caps
//! how many run at once, persists state on every transition plus coalesced
//! progress checkpoints, and broadcasts lifecycle events to subscribers.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Instant;

use thiserror::Error;
use tokio::sync::{Semaphore, broadcast};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};
use url::Url;
use uuid::Uuid;

use crate::config::RuntimeConfig;
use crate::download::concurrent::{ConcurrentFetcher, FetchResult, remaining_tasks};
use crate::download::constants::{CHECKPOINT_INTERVAL, SMALL_FILE_FALLBACK_MAX};
use crate::download::single::{download_single, working_path_for};
use crate::download::{
    ChunkPlan, DownloadError, HttpClient, ProbeResult, Task, plan_chunks, probe_server,
    sanitize_filename, tasks_for_plan,
};
use crate::events::{DownloadEvent, EVENT_CHANNEL_CAPACITY};
use crate::progress::ProgressState;
use crate::store::{
    DownloadRecord, DownloadStatus, HistoryEntry, MirrorRecord, StateRepository, StoreError,
    TaskRecord, url_hash,
};

/// Errors surfaced by manager operations.
#[derive(Debug, Error)]
pub enum ManagerError {
    /// No download with the given ID is known.
    #[error("unknown download: {0}")]
    UnknownId(String),

    /// The operation is not valid in the download's current state.
    #[error("invalid state: {0}")]
    InvalidState(String),

    /// Engine failure.
    #[error(transparent)]
    Download(#[from] DownloadError),

    /// Persistence failure.
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Everything needed to accept a new download.
#[derive(Debug, Clone)]
pub struct DownloadRequest {
    pub url: String,
    /// Directory the final file lands in. Stored absolute.
    pub dest_dir: PathBuf,
    /// Optional filename override, consulted after response headers and the
    /// URL path.
    pub filename: Option<String>,
    /// Custom request headers (cookies, auth) sent on every request.
    pub headers: HashMap<String, String>,
    /// Alternative URLs believed to serve the same bytes.
    pub mirrors: Vec<String>,
    /// Expected SHA-256 of the finished file, verified after completion.
    pub sha256: Option<String>,
}

impl DownloadRequest {
    /// A plain request for `url` into `dest_dir`.
    #[must_use]
    pub fn new(url: impl Into<String>, dest_dir: impl Into<PathBuf>) -> Self {
        Self {
            url: url.into(),
            dest_dir: dest_dir.into(),
            filename: None,
            headers: HashMap::new(),
            mirrors: Vec::new(),
            sha256: None,
        }
    }
}

/// Result of [`DownloadManager::add`].
#[derive(Debug)]
pub enum AddOutcome {
    /// Accepted; the download was queued under this ID.
    Added { id: String },
    /// A non-completed record for the same URL already exists. The outer
    /// layer decides whether to resume it or force a fresh start.
    Duplicate { existing: DownloadRecord },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FetchKind {
    /// Probe still running.
    Pending,
    Concurrent,
    Single,
}

/// What the user asked of an active download.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Requested {
    Pause,
    Cancel,
}

struct ActiveDownload {
    url_hash: String,
    cancel: CancellationToken,
    kind: Mutex<FetchKind>,
    requested: Mutex<Option<Requested>>,
    progress: Mutex<Option<Arc<ProgressState>>>,
}

impl ActiveDownload {
    fn requested(&self) -> Option<Requested> {
        *lock(&self.requested)
    }
}

/// The download orchestrator.
pub struct DownloadManager {
    config: RuntimeConfig,
    store: Arc<dyn StateRepository>,
    client: HttpClient,
    events: broadcast::Sender<DownloadEvent>,
    active: Mutex<HashMap<String, Arc<ActiveDownload>>>,
    slots: Arc<Semaphore>,
    shutdown: CancellationToken,
}

impl DownloadManager {
    /// Creates a manager over a persistence store.
    ///
    /// # Errors
    ///
    /// Returns `DownloadError` when the shared HTTP client cannot be built
    /// (e.g. a bad proxy URL).
    pub fn new(
        config: RuntimeConfig,
        store: Arc<dyn StateRepository>,
    ) -> Result<Arc<Self>, ManagerError> {
        let client = HttpClient::shared(&config)?;
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let slots = Arc::new(Semaphore::new(config.active_download_cap.max(1)));
        Ok(Arc::new(Self {
            config,
            store,
            client,
            events,
            active: Mutex::new(HashMap::new()),
            slots,
            shutdown: CancellationToken::new(),
        }))
    }

    /// Subscribes to lifecycle events. Events for one download arrive in
    /// causal order; slow subscribers may lose coalesced progress events.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<DownloadEvent> {
        self.events.subscribe()
    }

    /// Accepts a URL for download.
    ///
    /// A non-completed persisted record for the same URL is surfaced as
    /// [`AddOutcome::Duplicate`] instead of silently starting a second run.
    ///
    /// # Errors
    ///
    /// Returns `DownloadError::InvalidUrl` for unparsable URLs and store
    /// errors from the initial persist.
    #[instrument(skip(self, request), fields(url = %request.url))]
    pub async fn add(self: &Arc<Self>, request: DownloadRequest) -> Result<AddOutcome, ManagerError> {
        let parsed = Url::parse(&request.url)
            .map_err(|_| ManagerError::Download(DownloadError::invalid_url(request.url.clone())))?;

        if let Some(existing) = self.store.load_by_hash(&url_hash(&request.url)).await? {
            if existing.status != DownloadStatus::Completed {
                debug!(url_hash = %existing.url_hash, "duplicate add");
                return Ok(AddOutcome::Duplicate { existing });
            }
        }

        let id = Uuid::new_v4().to_string();
        let filename = provisional_filename(&parsed, request.filename.as_deref());
        let dest_path = absolute_dest(&request.dest_dir, &filename);

        let mut record = DownloadRecord::new(
            id.clone(),
            request.url.clone(),
            dest_path.to_string_lossy().into_owned(),
            filename.clone(),
        );
        record.headers.clone_from(&request.headers);
        record.mirrors = request
            .mirrors
            .iter()
            .map(|url| MirrorRecord {
                url: url.clone(),
                quarantined: false,
            })
            .collect();
        self.store.save(&record).await?;

        self.emit(DownloadEvent::Queued {
            id: id.clone(),
            url: request.url.clone(),
            filename,
            dest_path: record.dest_path.clone(),
        });

        self.spawn_run(id.clone(), record, request.sha256, false);
        Ok(AddOutcome::Added { id })
    }

    /// Pauses an active concurrent download: cancels in-flight requests,
    /// drains the queue, persists the remaining ranges, and transitions to
    /// `paused`.
    ///
    /// # Errors
    ///
    /// `UnknownId` when the download is not active; `InvalidState` for
    /// single-connection downloads, which cannot pause.
    #[instrument(skip(self))]
    pub fn pause(&self, id: &str) -> Result<(), ManagerError> {
        let entry = self.active_entry(id)?;
        let kind = *lock(&entry.kind);
        if kind == FetchKind::Single {
            return Err(ManagerError::InvalidState(
                "single-connection downloads cannot pause; cancel and restart".to_string(),
            ));
        }
        *lock(&entry.requested) = Some(Requested::Pause);
        if let Some(progress) = lock(&entry.progress).as_ref() {
            progress.set_paused();
        }
        entry.cancel.cancel();
        Ok(())
    }

    /// Resumes a paused (or errored) download from its persisted state.
    ///
    /// The origin is re-probed; a probe whose `total_size` disagrees with
    /// the stored size fails the resume rather than corrupting the file.
    ///
    /// # Errors
    ///
    /// `UnknownId` for unknown IDs, `InvalidState` when the record is not
    /// `paused` or `error`.
    #[instrument(skip(self))]
    pub async fn resume(self: &Arc<Self>, id: &str) -> Result<(), ManagerError> {
        let record = self
            .record_by_id(id)
            .await?
            .ok_or_else(|| ManagerError::UnknownId(id.to_string()))?;
        if !matches!(record.status, DownloadStatus::Paused | DownloadStatus::Error) {
            return Err(ManagerError::InvalidState(format!(
                "cannot resume a download in status {}",
                record.status
            )));
        }
        if lock(&self.active).contains_key(id) {
            return Err(ManagerError::InvalidState("already running".to_string()));
        }

        self.emit(DownloadEvent::Resumed { id: id.to_string() });
        self.spawn_run(id.to_string(), record, None, true);
        Ok(())
    }

    /// Cancels a download and removes its state and partial file.
    ///
    /// # Errors
    ///
    /// `UnknownId` when neither an active run nor a persisted record
    /// exists.
    #[instrument(skip(self))]
    pub async fn cancel(&self, id: &str) -> Result<(), ManagerError> {
        let entry = lock(&self.active).get(id).cloned();
        if let Some(entry) = entry {
            *lock(&entry.requested) = Some(Requested::Cancel);
            if let Some(progress) = lock(&entry.progress).as_ref() {
                progress.set_cancelled();
            }
            entry.cancel.cancel();
            return Ok(());
        }

        // Not running: remove the persisted record and working file.
        let record = self
            .record_by_id(id)
            .await?
            .ok_or_else(|| ManagerError::UnknownId(id.to_string()))?;
        let working = working_path_for(Path::new(&record.dest_path));
        let _ = tokio::fs::remove_file(&working).await;
        self.store.delete_by_url(&record.url).await?;
        self.emit(DownloadEvent::Removed { id: id.to_string() });
        Ok(())
    }

    /// Replaces the URL of a paused or errored download.
    ///
    /// Mirror quarantine is cleared and the new URL is re-probed on the
    /// next [`resume`](Self::resume); the resume only proceeds if the new
    /// origin agrees on `total_size`.
    ///
    /// # Errors
    ///
    /// `UnknownId`/`InvalidState` as for resume, plus store errors from the
    /// rekeyed save.
    #[instrument(skip(self))]
    pub async fn update_url(&self, id: &str, new_url: &str) -> Result<(), ManagerError> {
        Url::parse(new_url)
            .map_err(|_| ManagerError::Download(DownloadError::invalid_url(new_url.to_string())))?;
        let mut record = self
            .record_by_id(id)
            .await?
            .ok_or_else(|| ManagerError::UnknownId(id.to_string()))?;
        if !matches!(record.status, DownloadStatus::Paused | DownloadStatus::Error) {
            return Err(ManagerError::InvalidState(format!(
                "cannot update the URL of a download in status {}",
                record.status
            )));
        }

        let old_url = record.url.clone();
        record.url = new_url.to_string();
        record.url_hash = url_hash(new_url);
        record.status = DownloadStatus::Paused;
        record.last_error = None;
        for mirror in &mut record.mirrors {
            mirror.quarantined = false;
        }

        // Rekey: the fingerprint is the primary key.
        self.store.delete_by_url(&old_url).await?;
        self.store.save(&record).await?;
        info!(id, new_url, "download URL updated");
        Ok(())
    }

    /// Every persisted download, newest first.
    ///
    /// # Errors
    ///
    /// Store errors only.
    pub async fn list(&self) -> Result<Vec<DownloadRecord>, ManagerError> {
        Ok(self.store.load_all().await?)
    }

    /// Completed-download history, newest first.
    ///
    /// # Errors
    ///
    /// Store errors only.
    pub async fn history(&self) -> Result<Vec<HistoryEntry>, ManagerError> {
        Ok(self.store.history().await?)
    }

    /// Removes one entry from the history surface.
    ///
    /// # Errors
    ///
    /// Store errors only.
    pub async fn remove_from_history(&self, hash: &str) -> Result<(), ManagerError> {
        Ok(self.store.remove_from_history(hash).await?)
    }

    /// Live progress snapshot for an active download, if any.
    #[must_use]
    pub fn progress_of(&self, id: &str) -> Option<crate::progress::ProgressSnapshot> {
        let entry = lock(&self.active).get(id).cloned()?;
        let progress = lock(&entry.progress).clone()?;
        Some(progress.snapshot())
    }

    /// Cancels every active download and stops background tasks. In-flight
    /// state is persisted by the running tasks as they unwind.
    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }

    fn emit(&self, event: DownloadEvent) {
        let _ = self.events.send(event);
    }

    fn active_entry(&self, id: &str) -> Result<Arc<ActiveDownload>, ManagerError> {
        lock(&self.active)
            .get(id)
            .cloned()
            .ok_or_else(|| ManagerError::UnknownId(id.to_string()))
    }

    async fn record_by_id(&self, id: &str) -> Result<Option<DownloadRecord>, ManagerError> {
        Ok(self
            .store
            .load_all()
            .await?
            .into_iter()
            .find(|record| record.id == id))
    }

    fn spawn_run(
        self: &Arc<Self>,
        id: String,
        record: DownloadRecord,
        sha256: Option<String>,
        resumed: bool,
    ) {
        let entry = Arc::new(ActiveDownload {
            url_hash: record.url_hash.clone(),
            cancel: self.shutdown.child_token(),
            kind: Mutex::new(FetchKind::Pending),
            requested: Mutex::new(None),
            progress: Mutex::new(None),
        });
        lock(&self.active).insert(id.clone(), Arc::clone(&entry));

        let manager = Arc::clone(self);
        tokio::spawn(async move {
            manager
                .run_download(id.clone(), record, sha256, resumed, Arc::clone(&entry))
                .await;
            lock(&manager.active).remove(&id);
        });
    }

    #[instrument(skip_all, fields(id = %id, url_hash = %entry.url_hash))]
    async fn run_download(
        self: &Arc<Self>,
        id: String,
        mut record: DownloadRecord,
        sha256: Option<String>,
        resumed: bool,
        entry: Arc<ActiveDownload>,
    ) {
        // Global active-download cap.
        let _slot = tokio::select! {
            () = entry.cancel.cancelled() => {
                self.settle_early_cancel(&id, &mut record, &entry).await;
                return;
            }
            permit = Arc::clone(&self.slots).acquire_owned() => match permit {
                Ok(permit) => permit,
                Err(_) => return,
            },
        };

        let mirror_urls: Vec<String> = record
            .mirrors
            .iter()
            .filter(|m| !m.quarantined)
            .map(|m| m.url.clone())
            .collect();
        let probe = tokio::select! {
            () = entry.cancel.cancelled() => {
                self.settle_early_cancel(&id, &mut record, &entry).await;
                return;
            }
            probe = probe_server(&self.client, &record.url, &record.headers, &mirror_urls, Some(record.filename.as_str())) => probe,
        };
        let probe = match probe {
            Ok(probe) => probe,
            Err(error) => {
                self.fail(&id, &mut record, Vec::new(), error).await;
                return;
            }
        };

        // A resumed record's size is authoritative: a disagreeing origin
        // (e.g. after update_url) must not corrupt the partial file.
        if resumed && record.total_size > 0 && probe.total_size != record.total_size {
            let error = DownloadError::SizeMismatch {
                path: PathBuf::from(&record.dest_path),
                expected: record.total_size,
                actual: probe.total_size,
            };
            let tasks = tasks_from_records(&record.tasks);
            self.fail(&id, &mut record, tasks, error)
                .await;
            return;
        }

        if !resumed {
            record.filename = probe.filename.clone();
            let dest_dir = Path::new(&record.dest_path)
                .parent()
                .map_or_else(|| PathBuf::from("."), Path::to_path_buf);
            record.dest_path = dest_dir.join(&probe.filename).to_string_lossy().into_owned();
        }
        record.total_size = probe.total_size;
        record.status = DownloadStatus::Active;

        let viable_mirrors: Vec<String> = probe
            .mirror_results
            .iter()
            .filter(|m| m.viable)
            .map(|m| m.url.clone())
            .collect();

        if let Err(error) = self.store.save(&record).await {
            warn!(%error, "could not persist active state");
        }

        if probe.supports_range && probe.total_size > 0 {
            self.run_concurrent(&id, &mut record, &probe, viable_mirrors, sha256, resumed, &entry)
                .await;
        } else {
            self.run_single(&id, &mut record, sha256, &entry).await;
        }
    }

    #[allow(clippy::too_many_arguments)]
    async fn run_concurrent(
        self: &Arc<Self>,
        id: &str,
        record: &mut DownloadRecord,
        probe: &ProbeResult,
        mirrors: Vec<String>,
        sha256: Option<String>,
        resumed: bool,
        entry: &Arc<ActiveDownload>,
    ) {
        let plan = plan_chunks(record.total_size);
        let dest_path = PathBuf::from(&record.dest_path);
        let working_path = working_path_for(&dest_path);

        let (tasks, dest) = if resumed && tokio::fs::try_exists(&working_path).await.unwrap_or(false)
        {
            let dest = match crate::download::DestFile::open_existing(&working_path).await {
                Ok(dest) => dest,
                Err(error) => {
                    self.fail(id, record, tasks_from_records(&record.tasks), error)
                        .await;
                    return;
                }
            };
            (tasks_from_records(&record.tasks), dest)
        } else {
            let dest = match crate::download::DestFile::create(&working_path, record.total_size).await
            {
                Ok(dest) => dest,
                Err(error) => {
                    self.fail(id, record, Vec::new(), error).await;
                    return;
                }
            };
            (tasks_for_plan(&plan), dest)
        };

        let progress = ProgressState::new(record.total_size, plan.len());
        seed_progress(&progress, &plan, &tasks);
        *lock(&entry.progress) = Some(Arc::clone(&progress));
        *lock(&entry.kind) = FetchKind::Concurrent;

        self.emit(DownloadEvent::Started {
            id: id.to_string(),
            filename: record.filename.clone(),
            total: record.total_size,
            dest_path: record.dest_path.clone(),
        });

        let reporter_cancel = CancellationToken::new();
        let reporter = self.spawn_reporter(
            id.to_string(),
            record.clone(),
            Arc::clone(&progress),
            plan.clone(),
            reporter_cancel.clone(),
        );

        let started = Instant::now();
        let fetcher = ConcurrentFetcher::new(
            self.client.clone(),
            probe.resolved_url.clone(),
            mirrors,
            record.headers.clone(),
            dest.clone(),
            plan.clone(),
            tasks,
            Arc::clone(&progress),
            &self.config,
            &entry.cancel,
        );
        let sources = fetcher.sources();
        let result = fetcher.run().await;
        // Stop the reporter and wait it out so a late checkpoint cannot
        // overwrite the terminal state written below.
        reporter_cancel.cancel();
        let _ = reporter.await;

        // Persist any quarantine decisions made during the run.
        let quarantined = sources.quarantined_urls();
        for mirror in &mut record.mirrors {
            if quarantined.contains(&mirror.url) {
                mirror.quarantined = true;
            }
        }

        match result {
            FetchResult::Completed => {
                self.complete_concurrent(id, record, &dest, &dest_path, &progress, sha256, started)
                    .await;
            }
            FetchResult::Interrupted { remaining } => {
                if progress.is_cancelled() {
                    self.remove_cancelled(id, record, &working_path).await;
                } else {
                    record.downloaded = progress.downloaded();
                    record.status = DownloadStatus::Paused;
                    record.tasks = task_records(&plan, &remaining);
                    if let Err(error) = self.store.save(record).await {
                        warn!(%error, "could not persist paused state");
                    }
                    self.emit(DownloadEvent::Paused {
                        id: id.to_string(),
                        downloaded: progress.downloaded(),
                    });
                    info!(downloaded = progress.downloaded(), "download paused");
                }
            }
            FetchResult::Failed { error, remaining } => {
                // A range contract violation before any byte landed falls
                // back to one connection for small files.
                if matches!(error, DownloadError::RangeViolation { .. })
                    && progress.downloaded() == 0
                    && record.total_size <= SMALL_FILE_FALLBACK_MAX
                {
                    warn!(%error, "range contract violated on first task; falling back to single connection");
                    let _ = tokio::fs::remove_file(&working_path).await;
                    self.run_single(id, record, sha256, entry).await;
                    return;
                }
                self.fail(id, record, remaining, error).await;
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    async fn complete_concurrent(
        self: &Arc<Self>,
        id: &str,
        record: &mut DownloadRecord,
        dest: &crate::download::DestFile,
        dest_path: &Path,
        progress: &Arc<ProgressState>,
        sha256: Option<String>,
        started: Instant,
    ) {
        let downloaded = progress.downloaded();
        if downloaded != record.total_size {
            let error = DownloadError::SizeMismatch {
                path: dest_path.to_path_buf(),
                expected: record.total_size,
                actual: downloaded,
            };
            self.fail(id, record, Vec::new(), error).await;
            return;
        }
        if let Err(error) = dest.sync().await {
            self.fail(id, record, Vec::new(), error).await;
            return;
        }
        if let Err(error) = crate::download::dest_file::finalize(dest.path(), dest_path).await {
            self.fail(id, record, Vec::new(), error).await;
            return;
        }
        if let Some(expected) = sha256 {
            if let Err(error) = crate::checksum::verify_sha256(dest_path, &expected).await {
                self.fail(id, record, Vec::new(), error).await;
                return;
            }
        }

        self.finish(id, record, started).await;
    }

    async fn run_single(
        self: &Arc<Self>,
        id: &str,
        record: &mut DownloadRecord,
        sha256: Option<String>,
        entry: &Arc<ActiveDownload>,
    ) {
        let progress = ProgressState::new(record.total_size, 1);
        *lock(&entry.progress) = Some(Arc::clone(&progress));
        *lock(&entry.kind) = FetchKind::Single;

        self.emit(DownloadEvent::Started {
            id: id.to_string(),
            filename: record.filename.clone(),
            total: record.total_size,
            dest_path: record.dest_path.clone(),
        });

        let dest_path = PathBuf::from(&record.dest_path);
        let reporter_cancel = CancellationToken::new();
        let reporter = self.spawn_reporter(
            id.to_string(),
            record.clone(),
            Arc::clone(&progress),
            Vec::new(),
            reporter_cancel.clone(),
        );

        let started = Instant::now();
        let result = download_single(
            &self.client,
            &record.url,
            &record.headers,
            &dest_path,
            record.total_size,
            &progress,
            &entry.cancel,
        )
        .await;
        reporter_cancel.cancel();
        let _ = reporter.await;

        match result {
            Ok(written) => {
                record.total_size = written;
                if let Some(expected) = sha256 {
                    if let Err(error) = crate::checksum::verify_sha256(&dest_path, &expected).await
                    {
                        self.fail(id, record, Vec::new(), error).await;
                        return;
                    }
                }
                self.finish(id, record, started).await;
            }
            Err(error) if error.is_cancelled() => {
                // No pause for single connections: the partial file is
                // already gone, so the record goes with it.
                self.remove_cancelled(id, record, &working_path_for(&dest_path))
                    .await;
            }
            Err(error) => {
                self.fail(id, record, Vec::new(), error).await;
            }
        }
    }

    async fn finish(self: &Arc<Self>, id: &str, record: &mut DownloadRecord, started: Instant) {
        record.status = DownloadStatus::Completed;
        record.downloaded = record.total_size;
        record.tasks.clear();
        if let Err(error) = self.store.save(record).await {
            warn!(%error, "could not persist completed state");
        }
        let entry = HistoryEntry {
            url_hash: record.url_hash.clone(),
            url: record.url.clone(),
            filename: record.filename.clone(),
            dest_path: record.dest_path.clone(),
            total_size: record.total_size,
            completed_at: String::new(),
        };
        if let Err(error) = self.store.add_to_history(&entry).await {
            warn!(%error, "could not record history entry");
        }

        let elapsed = started.elapsed();
        let avg_speed = if elapsed.as_secs_f64() > 0.0 {
            record.total_size as f64 / elapsed.as_secs_f64()
        } else {
            0.0
        };
        info!(
            bytes = record.total_size,
            elapsed_ms = elapsed.as_millis() as u64,
            "download complete"
        );
        self.emit(DownloadEvent::Complete {
            id: id.to_string(),
            filename: record.filename.clone(),
            total: record.total_size,
            elapsed_ms: elapsed.as_millis() as u64,
            avg_speed,
        });
    }

    async fn fail(
        self: &Arc<Self>,
        id: &str,
        record: &mut DownloadRecord,
        remaining: Vec<Task>,
        error: DownloadError,
    ) {
        if error.is_cancelled() {
            return;
        }
        warn!(%error, "download failed");
        record.status = DownloadStatus::Error;
        record.last_error = Some(error.to_string());
        if !remaining.is_empty() {
            let plan = plan_chunks(record.total_size);
            record.tasks = task_records(&plan, &remaining);
            record.downloaded = record
                .total_size
                .saturating_sub(remaining.iter().map(|t| t.length).sum());
        }
        if let Err(store_error) = self.store.save(record).await {
            warn!(%store_error, "could not persist error state");
        }
        self.emit(DownloadEvent::Error {
            id: id.to_string(),
            error: error.to_string(),
        });
    }

    /// Settles a download interrupted before any fetch started: a cancel
    /// removes the record, anything else leaves it paused and resumable.
    async fn settle_early_cancel(
        &self,
        id: &str,
        record: &mut DownloadRecord,
        entry: &Arc<ActiveDownload>,
    ) {
        if entry.requested() == Some(Requested::Cancel) {
            self.remove_cancelled(id, record, &working_path_for(Path::new(&record.dest_path)))
                .await;
        } else {
            record.status = DownloadStatus::Paused;
            if let Err(error) = self.store.save(record).await {
                warn!(%error, "could not persist state after early interruption");
            }
            self.emit(DownloadEvent::Paused {
                id: id.to_string(),
                downloaded: record.downloaded,
            });
        }
    }

    async fn remove_cancelled(&self, id: &str, record: &DownloadRecord, working_path: &Path) {
        let _ = tokio::fs::remove_file(working_path).await;
        if let Err(error) = self.store.delete_by_url(&record.url).await {
            warn!(%error, "could not delete cancelled state");
        }
        self.emit(DownloadEvent::Removed { id: id.to_string() });
        info!("download cancelled and removed");
    }

    /// Emits coalesced progress events and writes a persistence checkpoint
    /// at most once per [`CHECKPOINT_INTERVAL`].
    fn spawn_reporter(
        self: &Arc<Self>,
        id: String,
        record: DownloadRecord,
        progress: Arc<ProgressState>,
        plan: ChunkPlan,
        cancel: CancellationToken,
    ) -> tokio::task::JoinHandle<()> {
        let manager = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(CHECKPOINT_INTERVAL);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            let mut last_downloaded = progress.downloaded();
            let mut last_tick = Instant::now();
            loop {
                tokio::select! {
                    () = cancel.cancelled() => return,
                    _ = ticker.tick() => {}
                }
                let snapshot = progress.snapshot();
                let elapsed = last_tick.elapsed().as_secs_f64();
                let speed = if elapsed > 0.0 {
                    snapshot.downloaded.saturating_sub(last_downloaded) as f64 / elapsed
                } else {
                    0.0
                };
                last_tick = Instant::now();
                last_downloaded = snapshot.downloaded;

                manager.emit(DownloadEvent::Progress {
                    id: id.clone(),
                    downloaded: snapshot.downloaded,
                    total: snapshot.total_size,
                    speed,
                    active_connections: snapshot.active_connections,
                    chunk_progress: snapshot.chunk_progress.clone(),
                });

                // Checkpoint: remaining work derived from the chunk
                // counters, the same reconstruction the pause path uses.
                if !plan.is_empty() {
                    let mut checkpoint = record.clone();
                    checkpoint.status = DownloadStatus::Active;
                    checkpoint.downloaded = snapshot.downloaded;
                    checkpoint.tasks =
                        task_records(&plan, &remaining_tasks(&plan, &progress));
                    if let Err(error) = manager.store.save(&checkpoint).await {
                        debug!(%error, "checkpoint write failed");
                    }
                }
            }
        })
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
}

fn provisional_filename(url: &Url, override_name: Option<&str>) -> String {
    if let Some(name) = override_name {
        let sanitized = sanitize_filename(name);
        if !sanitized.is_empty() {
            return sanitized;
        }
    }
    crate::download::resolve_filename(None, url, override_name)
}

fn absolute_dest(dest_dir: &Path, filename: &str) -> PathBuf {
    let dir = if dest_dir.is_absolute() {
        dest_dir.to_path_buf()
    } else {
        std::env::current_dir()
            .map(|cwd| cwd.join(dest_dir))
            .unwrap_or_else(|_| dest_dir.to_path_buf())
    };
    dir.join(filename)
}

/// Converts persisted task rows into queue tasks.
fn tasks_from_records(records: &[TaskRecord]) -> Vec<Task> {
    records
        .iter()
        .map(|record| Task::new(record.chunk_index, record.offset, record.length))
        .collect()
}

/// Converts live tasks back into persisted rows, carrying each chunk's
/// written prefix.
fn task_records(plan: &ChunkPlan, tasks: &[Task]) -> Vec<TaskRecord> {
    tasks
        .iter()
        .map(|task| {
            let chunk_length = plan
                .get(task.chunk_index)
                .map_or(task.length, |&(_, length)| length);
            TaskRecord {
                chunk_index: task.chunk_index,
                offset: task.offset,
                length: task.length,
                written: chunk_length.saturating_sub(task.length),
            }
        })
        .collect()
}

/// Seeds resumed counters: chunks absent from the task list are complete;
/// present chunks carry their written prefix.
fn seed_progress(progress: &Arc<ProgressState>, plan: &ChunkPlan, tasks: &[Task]) {
    let mut per_chunk: Vec<(usize, u64)> = Vec::with_capacity(plan.len());
    let mut downloaded = 0u64;
    for (index, &(_, length)) in plan.iter().enumerate() {
        let written = match tasks.iter().find(|task| task.chunk_index == index) {
            Some(task) => length.saturating_sub(task.length),
            None => length,
        };
        downloaded += written;
        per_chunk.push((index, written));
    }
    progress.seed_resumed(downloaded, &per_chunk);
}
