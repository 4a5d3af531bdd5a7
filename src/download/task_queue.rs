//! Concurrent FIFO of pending byte ranges.
//!
//! Workers block on [`TaskQueue::pop`] until a task arrives or the queue
//! closes. Pause support drains the remaining tasks without closing, so the
//! same queue type serves both the steady state and the drain-for-pause
//! protocol. The backing storage is a vector with a consumed-prefix head
//! index, compacted once the prefix exceeds half the buffer.

use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

use tokio::sync::Notify;

use super::plan::Task;

#[derive(Debug, Default)]
struct Inner {
    tasks: Vec<Task>,
    head: usize,
    closed: bool,
}

/// Thread-safe work queue feeding a download's workers.
#[derive(Debug, Default)]
pub struct TaskQueue {
    inner: Mutex<Inner>,
    notify: Notify,
    /// Approximate size readable without the lock.
    size: AtomicUsize,
    /// Workers currently parked in `pop`.
    idle_workers: AtomicUsize,
}

impl TaskQueue {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends one task and wakes one waiter.
    pub fn push(&self, task: Task) {
        {
            let mut inner = self.lock();
            inner.tasks.push(task);
            self.size.fetch_add(1, Ordering::Relaxed);
        }
        self.notify.notify_one();
    }

    /// Appends many tasks, waking at most one waiter per task.
    pub fn push_many(&self, tasks: impl IntoIterator<Item = Task>) {
        let added = {
            let mut inner = self.lock();
            let before = inner.tasks.len();
            inner.tasks.extend(tasks);
            let added = inner.tasks.len() - before;
            self.size.fetch_add(added, Ordering::Relaxed);
            added
        };
        for _ in 0..added {
            self.notify.notify_one();
        }
    }

    /// Removes and returns the oldest task, waiting until one is available.
    ///
    /// Returns `None` once the queue is closed and empty.
    pub async fn pop(&self) -> Option<Task> {
        loop {
            // Register interest before re-checking so a push between the
            // check and the await cannot be missed.
            let notified = self.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if let Some(outcome) = self.try_pop() {
                return outcome;
            }

            self.idle_workers.fetch_add(1, Ordering::Relaxed);
            notified.await;
            self.idle_workers.fetch_sub(1, Ordering::Relaxed);
        }
    }

    /// `Some(Some(task))` when a task was taken, `Some(None)` when closed
    /// and empty, `None` when the caller should wait.
    fn try_pop(&self) -> Option<Option<Task>> {
        let mut inner = self.lock();
        if inner.head < inner.tasks.len() {
            let task = inner.tasks[inner.head].clone();
            inner.head += 1;
            self.size.fetch_sub(1, Ordering::Relaxed);
            if inner.head > inner.tasks.len() / 2 {
                let head = inner.head;
                inner.tasks.drain(..head);
                inner.head = 0;
            }
            return Some(Some(task));
        }
        if inner.closed {
            return Some(None);
        }
        None
    }

    /// Marks the queue done and releases every waiter.
    pub fn close(&self) {
        {
            let mut inner = self.lock();
            inner.closed = true;
        }
        self.notify.notify_waiters();
    }

    /// Atomically extracts all pending tasks without closing the queue.
    ///
    /// Used on pause: the orchestrator merges the drained tasks with the
    /// reconstructed in-flight remainders before persisting.
    #[must_use]
    pub fn drain_remaining(&self) -> Vec<Task> {
        let mut inner = self.lock();
        let head = inner.head;
        let remaining = inner.tasks.split_off(head);
        inner.tasks.clear();
        inner.head = 0;
        self.size.store(0, Ordering::Relaxed);
        remaining
    }

    /// Approximate number of pending tasks (lock-free).
    #[must_use]
    pub fn len(&self) -> usize {
        self.size.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Workers currently blocked in [`pop`](Self::pop).
    #[must_use]
    pub fn idle_workers(&self) -> usize {
        self.idle_workers.load(Ordering::Relaxed)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.inner
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}
