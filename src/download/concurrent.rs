//! Concurrent fetcher: a bounded worker pool streaming ranged responses
//! into one preallocated destination file.
//!
//! Each worker pops a [`Task`] from the shared queue, opens a ranged `GET`,
//! and streams the body into the destination at the task's offset using
//! positional writes and a 512 KiB buffer. Progress counters are updated
//! only after a positional write succeeds, so `verified_progress` never
//! runs ahead of the bytes that are actually durable.
//!
//! Failure handling per task: transient errors retry in place with
//! full-jitter backoff; `429` additionally sheds one worker slot (restored
//! after a clean window); a task that exhausts its local retries fails over
//! to the next size-agreeing mirror; repeated mirror failures quarantine the
//! mirror for the rest of the download.
//!
//! A per-download health monitor watches bytes-received timestamps — not
//! disk flushes — and aborts any worker that has gone
//! [`stall_threshold`](crate::config::RuntimeConfig::stall_threshold)
//! without receiving from the socket. The aborted range re-enters the queue
//! as its unfinished remainder.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use futures_util::StreamExt;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use super::client::HttpClient;
use super::constants::{
    CONCURRENCY_RESTORE_WINDOW, MIRROR_QUARANTINE_FAILURES, MIRROR_QUARANTINE_WINDOW,
    PER_HOST_MAX, PROGRESS_BATCH_INTERVAL, WORKER_BUFFER,
};
use super::dest_file::DestFile;
use super::error::DownloadError;
use super::plan::{ChunkPlan, Task};
use super::probe::content_range_start;
use super::retry::{FailureType, RetryDecision, RetryPolicy, classify_error, parse_retry_after};
use super::task_queue::TaskQueue;
use crate::config::RuntimeConfig;
use crate::progress::ProgressState;

/// How one concurrent run ended.
#[derive(Debug)]
pub enum FetchResult {
    /// Every chunk landed; the file still needs fsync + rename.
    Completed,
    /// The shared cancellation fired (pause or cancel). `remaining` is the
    /// unfinished work reconstructed from the chunk-progress snapshot.
    Interrupted { remaining: Vec<Task> },
    /// A task surfaced a fatal error. `remaining` allows the state to be
    /// persisted for a later `update_url` + resume.
    Failed {
        error: DownloadError,
        remaining: Vec<Task>,
    },
}

/// The primary URL plus size-agreeing mirrors, with failure quarantine.
#[derive(Debug)]
pub struct SourcePool {
    sources: Vec<SourceState>,
}

#[derive(Debug)]
struct SourceState {
    url: String,
    quarantined: AtomicBool,
    failures: Mutex<Vec<Instant>>,
}

impl SourcePool {
    /// Source 0 is the primary; it is never quarantined.
    #[must_use]
    pub fn new(primary: String, mirrors: Vec<String>) -> Self {
        let sources = std::iter::once(primary)
            .chain(mirrors)
            .map(|url| SourceState {
                url,
                quarantined: AtomicBool::new(false),
                failures: Mutex::new(Vec::new()),
            })
            .collect();
        Self { sources }
    }

    /// Resolves a task's source: a valid, non-quarantined hint, else the
    /// primary.
    #[must_use]
    pub fn resolve(&self, hint: Option<usize>) -> (usize, String) {
        let index = hint
            .filter(|&i| {
                self.sources
                    .get(i)
                    .is_some_and(|s| !s.quarantined.load(Ordering::Acquire))
            })
            .unwrap_or(0);
        (index, self.sources[index].url.clone())
    }

    /// Records a task failure against a source. Three failures within the
    /// quarantine window remove a mirror for the rest of the download.
    pub fn record_failure(&self, index: usize) {
        if index == 0 {
            return;
        }
        let Some(source) = self.sources.get(index) else {
            return;
        };
        let mut failures = source
            .failures
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        let now = Instant::now();
        failures.push(now);
        failures.retain(|at| now.duration_since(*at) <= MIRROR_QUARANTINE_WINDOW);
        if failures.len() >= MIRROR_QUARANTINE_FAILURES {
            warn!(url = %source.url, "mirror quarantined after repeated failures");
            source.quarantined.store(true, Ordering::Release);
        }
    }

    /// The next non-quarantined source after `current`, wrapping around and
    /// ending at the primary. `None` when no alternative exists.
    #[must_use]
    pub fn next_after(&self, current: usize) -> Option<usize> {
        let len = self.sources.len();
        (1..len)
            .map(|step| (current + step) % len)
            .find(|&i| !self.sources[i].quarantined.load(Ordering::Acquire))
    }

    #[must_use]
    pub fn is_quarantined(&self, index: usize) -> bool {
        self.sources
            .get(index)
            .is_some_and(|s| s.quarantined.load(Ordering::Acquire))
    }

    /// URLs quarantined during this run.
    #[must_use]
    pub fn quarantined_urls(&self) -> Vec<String> {
        self.sources
            .iter()
            .filter(|s| s.quarantined.load(Ordering::Acquire))
            .map(|s| s.url.clone())
            .collect()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.sources.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.sources.is_empty()
    }
}

/// Adaptive worker-slot limiter.
///
/// Workers acquire a slot per task. On `429` or a connection reset the pool
/// sheds one slot (floor 1); after a clean window with no failures one slot
/// is restored, up to the original width.
#[derive(Debug)]
pub struct ConcurrencyLimiter {
    semaphore: Arc<Semaphore>,
    current: AtomicUsize,
    original: usize,
    started: Instant,
    last_failure_ms: AtomicU64,
    last_change_ms: AtomicU64,
}

impl ConcurrencyLimiter {
    #[must_use]
    pub fn new(slots: usize) -> Arc<Self> {
        let slots = slots.max(1);
        Arc::new(Self {
            semaphore: Arc::new(Semaphore::new(slots)),
            current: AtomicUsize::new(slots),
            original: slots,
            started: Instant::now(),
            last_failure_ms: AtomicU64::new(0),
            last_change_ms: AtomicU64::new(0),
        })
    }

    fn now_ms(&self) -> u64 {
        u64::try_from(self.started.elapsed().as_millis()).unwrap_or(u64::MAX)
    }

    /// Waits for a worker slot.
    #[allow(clippy::expect_used)]
    pub async fn acquire(self: &Arc<Self>) -> tokio::sync::OwnedSemaphorePermit {
        Arc::clone(&self.semaphore)
            .acquire_owned()
            .await
            .expect("limiter semaphore is never closed")
    }

    /// Notes a transient failure for the clean-window clock.
    pub fn note_failure(&self) {
        self.last_failure_ms.store(self.now_ms(), Ordering::Relaxed);
    }

    /// Sheds one slot (floor 1). The slot is reclaimed asynchronously so an
    /// in-flight holder finishes its task first.
    pub fn shed(self: &Arc<Self>) {
        let mut current = self.current.load(Ordering::Acquire);
        loop {
            if current <= 1 {
                return;
            }
            match self.current.compare_exchange(
                current,
                current - 1,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => break,
                Err(observed) => current = observed,
            }
        }
        self.last_change_ms.store(self.now_ms(), Ordering::Relaxed);
        debug!(slots = current - 1, "shedding one worker slot");
        let semaphore = Arc::clone(&self.semaphore);
        tokio::spawn(async move {
            if let Ok(permit) = semaphore.acquire_owned().await {
                permit.forget();
            }
        });
    }

    /// Restores one slot when the clean window has elapsed since the last
    /// failure or change.
    pub fn maybe_restore(&self) {
        let current = self.current.load(Ordering::Acquire);
        if current >= self.original {
            return;
        }
        let now = self.now_ms();
        let quiet_since = self
            .last_failure_ms
            .load(Ordering::Relaxed)
            .max(self.last_change_ms.load(Ordering::Relaxed));
        if now.saturating_sub(quiet_since) < CONCURRENCY_RESTORE_WINDOW.as_millis() as u64 {
            return;
        }
        if self
            .current
            .compare_exchange(current, current + 1, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
        {
            self.last_change_ms.store(now, Ordering::Relaxed);
            self.semaphore.add_permits(1);
            debug!(slots = current + 1, "restored one worker slot");
        }
    }

    /// Current slot count.
    #[must_use]
    pub fn current(&self) -> usize {
        self.current.load(Ordering::Acquire)
    }
}

/// Per-worker liveness record for the health monitor.
///
/// `last_rx` moves on every successful socket read. Disk-flush time never
/// touches it, so a slow fsync cannot masquerade as a network stall.
#[derive(Debug)]
struct WorkerHealth {
    busy: AtomicBool,
    last_rx_ms: AtomicU64,
    /// Cancels only the in-flight request, not the worker.
    armed: Mutex<Option<CancellationToken>>,
}

impl WorkerHealth {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            busy: AtomicBool::new(false),
            last_rx_ms: AtomicU64::new(0),
            armed: Mutex::new(None),
        })
    }

    fn arm(&self, started: Instant, epoch: Instant, token: CancellationToken) {
        self.last_rx_ms
            .store(elapsed_ms(epoch, started), Ordering::Release);
        *self
            .armed
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner) = Some(token);
        self.busy.store(true, Ordering::Release);
    }

    fn touch(&self, epoch: Instant) {
        self.last_rx_ms
            .store(elapsed_ms(epoch, Instant::now()), Ordering::Release);
    }

    fn disarm(&self) {
        self.busy.store(false, Ordering::Release);
        *self
            .armed
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner) = None;
    }

    /// Aborts the in-flight request if no bytes arrived for `threshold`.
    /// Returns true when an abort was issued.
    fn abort_if_stalled(&self, epoch: Instant, threshold: Duration) -> bool {
        if !self.busy.load(Ordering::Acquire) {
            return false;
        }
        let now = elapsed_ms(epoch, Instant::now());
        let last = self.last_rx_ms.load(Ordering::Acquire);
        if now.saturating_sub(last) < threshold.as_millis() as u64 {
            return false;
        }
        let armed = self
            .armed
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        if let Some(token) = armed.as_ref() {
            token.cancel();
            return true;
        }
        false
    }
}

fn elapsed_ms(epoch: Instant, at: Instant) -> u64 {
    u64::try_from(at.duration_since(epoch).as_millis()).unwrap_or(u64::MAX)
}

struct WorkerCtx {
    client: HttpClient,
    headers: HashMap<String, String>,
    queue: Arc<TaskQueue>,
    dest: DestFile,
    progress: Arc<ProgressState>,
    sources: Arc<SourcePool>,
    retry: RetryPolicy,
    limiter: Arc<ConcurrencyLimiter>,
    /// Child of the download token; also fired on fatal errors.
    cancel: CancellationToken,
    chunks_left: AtomicUsize,
    chunk_lengths: Vec<u64>,
    fatal: Mutex<Option<DownloadError>>,
    epoch: Instant,
}

impl WorkerCtx {
    fn record_fatal(&self, error: DownloadError) {
        let mut slot = self
            .fatal
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        if slot.is_none() {
            *slot = Some(error);
        }
        drop(slot);
        self.cancel.cancel();
    }

    fn take_fatal(&self) -> Option<DownloadError> {
        self.fatal
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .take()
    }
}

/// Concurrent fetcher for one download.
pub struct ConcurrentFetcher {
    ctx: Arc<WorkerCtx>,
    plan: ChunkPlan,
    workers: usize,
    stall_threshold: Duration,
}

impl ConcurrentFetcher {
    /// Builds a fetcher over `plan` with `initial_tasks` still to fetch.
    ///
    /// The worker count is `min(per_host_max, task count, configured
    /// connections)`, at least 1.
    #[must_use]
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        client: HttpClient,
        url: String,
        mirrors: Vec<String>,
        headers: HashMap<String, String>,
        dest: DestFile,
        plan: ChunkPlan,
        initial_tasks: Vec<Task>,
        progress: Arc<ProgressState>,
        config: &RuntimeConfig,
        cancel: &CancellationToken,
    ) -> Self {
        let workers = config
            .requested_connections()
            .min(PER_HOST_MAX)
            .min(initial_tasks.len().max(1));

        let queue = Arc::new(TaskQueue::new());
        let chunks_left = initial_tasks
            .iter()
            .filter(|task| task.length > 0)
            .count();
        queue.push_many(initial_tasks.into_iter().filter(|task| task.length > 0));

        let ctx = Arc::new(WorkerCtx {
            client,
            headers,
            queue,
            dest,
            progress,
            sources: Arc::new(SourcePool::new(url, mirrors)),
            retry: RetryPolicy::default(),
            limiter: ConcurrencyLimiter::new(workers),
            cancel: cancel.child_token(),
            chunks_left: AtomicUsize::new(chunks_left),
            chunk_lengths: plan.iter().map(|&(_, length)| length).collect(),
            fatal: Mutex::new(None),
            epoch: Instant::now(),
        });

        Self {
            ctx,
            plan,
            workers,
            stall_threshold: config.stall_threshold,
        }
    }

    /// Shares the mirror pool for quarantine inspection.
    #[must_use]
    pub fn sources(&self) -> Arc<SourcePool> {
        Arc::clone(&self.ctx.sources)
    }

    /// Runs workers until the plan completes, the download is interrupted,
    /// or a task fails fatally.
    #[instrument(skip(self), fields(workers = self.workers, chunks = self.plan.len()))]
    pub async fn run(self) -> FetchResult {
        if self.ctx.chunks_left.load(Ordering::Acquire) == 0 {
            return FetchResult::Completed;
        }

        let mut workers = JoinSet::new();
        let mut health_slots = Vec::with_capacity(self.workers);
        for worker_id in 0..self.workers {
            let health = WorkerHealth::new();
            health_slots.push(Arc::clone(&health));
            let ctx = Arc::clone(&self.ctx);
            workers.spawn(worker_loop(worker_id, ctx, health));
        }

        let monitor = spawn_health_monitor(
            health_slots,
            self.ctx.epoch,
            self.stall_threshold,
            Arc::clone(&self.ctx.limiter),
            self.ctx.cancel.clone(),
        );

        while workers.join_next().await.is_some() {}
        monitor.abort();

        if let Some(error) = self.ctx.take_fatal() {
            return FetchResult::Failed {
                error,
                remaining: self.collect_remaining(),
            };
        }
        if self.ctx.cancel.is_cancelled() {
            return FetchResult::Interrupted {
                remaining: self.collect_remaining(),
            };
        }

        info!(bytes = self.ctx.progress.downloaded(), "all chunks complete");
        FetchResult::Completed
    }

    /// Drains the queue and reconstructs every unfinished range from the
    /// chunk-progress snapshot. In-flight tasks at interruption time are
    /// recovered as `(offset + written, length - written)` — the on-disk
    /// truth, not whatever a worker held locally.
    fn collect_remaining(&self) -> Vec<Task> {
        let _ = self.ctx.queue.drain_remaining();
        remaining_tasks(&self.plan, &self.ctx.progress)
    }
}

/// Unfinished ranges of `plan` according to the chunk-progress counters.
#[must_use]
pub fn remaining_tasks(plan: &ChunkPlan, progress: &ProgressState) -> Vec<Task> {
    plan.iter()
        .enumerate()
        .filter_map(|(index, &(offset, length))| {
            let written = progress.chunk_progress(index).min(length);
            if written < length {
                Some(Task::new(index, offset + written, length - written))
            } else {
                None
            }
        })
        .collect()
}

fn spawn_health_monitor(
    slots: Vec<Arc<WorkerHealth>>,
    epoch: Instant,
    threshold: Duration,
    limiter: Arc<ConcurrencyLimiter>,
    cancel: CancellationToken,
) -> tokio::task::JoinHandle<()> {
    let poll = (threshold / 5).clamp(Duration::from_millis(50), Duration::from_millis(500));
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(poll);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                () = cancel.cancelled() => return,
                _ = ticker.tick() => {}
            }
            for slot in &slots {
                if slot.abort_if_stalled(epoch, threshold) {
                    warn!("stalled worker aborted: no bytes received within threshold");
                }
            }
            limiter.maybe_restore();
        }
    })
}

async fn worker_loop(worker_id: usize, ctx: Arc<WorkerCtx>, health: Arc<WorkerHealth>) {
    ctx.progress.worker_started();
    debug!(worker_id, "worker started");

    loop {
        let permit = tokio::select! {
            () = ctx.cancel.cancelled() => break,
            permit = ctx.limiter.acquire() => permit,
        };
        let task = tokio::select! {
            () = ctx.cancel.cancelled() => break,
            task = ctx.queue.pop() => task,
        };
        let Some(task) = task else { break };

        let outcome = run_task(&ctx, &health, &task).await;
        drop(permit);

        match outcome {
            Ok(()) => {
                let chunk_length = ctx.chunk_lengths.get(task.chunk_index).copied().unwrap_or(0);
                if ctx.progress.chunk_progress(task.chunk_index) >= chunk_length
                    && ctx.chunks_left.fetch_sub(1, Ordering::AcqRel) == 1
                {
                    ctx.queue.close();
                }
            }
            Err(error) if error.is_cancelled() => break,
            Err(error) => handle_task_failure(&ctx, &task, error).await,
        }
    }

    health.disarm();
    ctx.progress.worker_stopped();
    debug!(worker_id, "worker exited");
}

async fn handle_task_failure(ctx: &Arc<WorkerCtx>, task: &Task, error: DownloadError) {
    let written = ctx
        .progress
        .chunk_progress(task.chunk_index)
        .saturating_sub(chunk_written_before(ctx, task));
    let remainder = task.remainder_after(written);
    let (source_index, _) = ctx.sources.resolve(task.mirror_hint);
    let failure = classify_error(&error);

    let retry_after = match &error {
        DownloadError::HttpStatus {
            retry_after: Some(value),
            ..
        } => parse_retry_after(value),
        _ => None,
    };

    if failure == FailureType::Fatal {
        warn!(chunk = task.chunk_index, %error, "fatal task failure");
        ctx.record_fatal(error);
        return;
    }

    ctx.limiter.note_failure();
    ctx.sources.record_failure(source_index);
    if failure == FailureType::RateLimited || is_connection_reset(&error) {
        ctx.limiter.shed();
    }

    match ctx
        .retry
        .should_retry(failure, remainder.attempt, retry_after)
    {
        RetryDecision::Retry { delay, .. } => {
            debug!(
                chunk = task.chunk_index,
                attempt = remainder.attempt,
                delay_ms = delay.as_millis(),
                %error,
                "retrying task"
            );
            tokio::select! {
                () = ctx.cancel.cancelled() => return,
                () = tokio::time::sleep(delay) => {}
            }
            ctx.queue.push(remainder);
        }
        RetryDecision::GiveUp { reason } => {
            if let Some(next) = ctx.sources.next_after(source_index) {
                info!(
                    chunk = task.chunk_index,
                    mirror = next,
                    %error,
                    "failing over to mirror"
                );
                let mut failover = Task::new(remainder.chunk_index, remainder.offset, remainder.length);
                failover.mirror_hint = Some(next);
                ctx.queue.push(failover);
            } else {
                warn!(chunk = task.chunk_index, reason, %error, "task failed with no mirror left");
                ctx.record_fatal(error);
            }
        }
    }
}

/// Bytes of this chunk that were already on disk before `task` started
/// (a retried remainder starts past the chunk origin).
fn chunk_written_before(ctx: &WorkerCtx, task: &Task) -> u64 {
    let chunk_length = ctx.chunk_lengths.get(task.chunk_index).copied().unwrap_or(0);
    chunk_length.saturating_sub(task.length)
}

async fn run_task(
    ctx: &Arc<WorkerCtx>,
    health: &Arc<WorkerHealth>,
    task: &Task,
) -> Result<(), DownloadError> {
    let (_, url) = ctx.sources.resolve(task.mirror_hint);
    let stall_url = url.clone();
    let request_token = ctx.cancel.child_token();
    health.arm(Instant::now(), ctx.epoch, request_token.clone());

    let result = tokio::select! {
        () = request_token.cancelled() => {
            if ctx.cancel.is_cancelled() {
                Err(DownloadError::Cancelled)
            } else {
                // Only the monitor cancels the request token alone.
                Err(DownloadError::stalled(stall_url, task.offset))
            }
        }
        result = fetch_range(ctx, health, task, &url) => result,
    };

    health.disarm();
    result
}

async fn fetch_range(
    ctx: &Arc<WorkerCtx>,
    health: &Arc<WorkerHealth>,
    task: &Task,
    url: &str,
) -> Result<(), DownloadError> {
    let range = task.range_header();
    let response = ctx.client.get(url, &ctx.headers, Some(&range)).await?;
    let status = response.status().as_u16();

    match status {
        206 => {}
        200 => {
            // The server honored ranges at probe time and broke the
            // contract mid-download.
            return Err(DownloadError::range_violation(
                url,
                format!("200 response to {range}"),
            ));
        }
        status => {
            let retry_after = response
                .headers()
                .get(reqwest::header::RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .map(str::to_string);
            return Err(DownloadError::http_status_with_retry_after(
                url,
                status,
                retry_after,
            ));
        }
    }

    let range_start = response
        .headers()
        .get(reqwest::header::CONTENT_RANGE)
        .and_then(|v| v.to_str().ok())
        .and_then(content_range_start);
    if range_start != Some(task.offset) {
        return Err(DownloadError::range_violation(
            url,
            format!(
                "Content-Range starts at {range_start:?}, requested offset {}",
                task.offset
            ),
        ));
    }

    let mut stream = response.bytes_stream();
    let mut buffer: Vec<u8> = Vec::with_capacity(WORKER_BUFFER.min(task.length as usize));
    let mut write_offset = task.offset;
    let mut received: u64 = 0;
    let mut last_publish = Instant::now();

    while let Some(chunk) = stream.next().await {
        let chunk = chunk.map_err(|e| {
            if e.is_timeout() {
                DownloadError::timeout(url)
            } else {
                DownloadError::network(url, e)
            }
        })?;
        health.touch(ctx.epoch);

        received += chunk.len() as u64;
        if received > task.length {
            return Err(DownloadError::range_violation(
                url,
                format!("body exceeds requested length {}", task.length),
            ));
        }
        buffer.extend_from_slice(&chunk);

        // Flush when the worker buffer fills or the batch interval lapses,
        // so counter updates stay coalesced on fast links but fresh on
        // slow ones.
        if buffer.len() >= WORKER_BUFFER || last_publish.elapsed() >= PROGRESS_BATCH_INTERVAL {
            write_offset = flush_buffer(ctx, task, &mut buffer, write_offset).await?;
            last_publish = Instant::now();
        }
    }

    if !buffer.is_empty() {
        write_offset = flush_buffer(ctx, task, &mut buffer, write_offset).await?;
    }
    debug_assert_eq!(write_offset, task.offset + received);

    if received < task.length {
        // The connection closed early; the written prefix is durable and
        // the remainder will be re-enqueued.
        return Err(DownloadError::stalled(url, task.offset + received));
    }

    Ok(())
}

async fn flush_buffer(
    ctx: &Arc<WorkerCtx>,
    task: &Task,
    buffer: &mut Vec<u8>,
    write_offset: u64,
) -> Result<u64, DownloadError> {
    let bytes = std::mem::take(buffer);
    let len = bytes.len() as u64;
    if len == 0 {
        return Ok(write_offset);
    }
    ctx.dest.write_at(write_offset, bytes).await?;
    // Counters move only after the positional write succeeded.
    ctx.progress.add_chunk_progress(task.chunk_index, len);
    ctx.progress.add_downloaded(len);
    ctx.progress.add_verified(len);
    Ok(write_offset + len)
}

fn is_connection_reset(error: &DownloadError) -> bool {
    match error {
        DownloadError::Network { source, .. } => {
            let text = source.to_string().to_lowercase();
            text.contains("reset") || text.contains("broken pipe")
        }
        _ => false,
    }
}
