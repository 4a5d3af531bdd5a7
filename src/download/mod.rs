//! The download engine: probe, plan, queue, and the two fetchers.
//!
//! A download flows through this module as:
//!
//! 1. [`probe_server`] classifies the origin (range support, size,
//!    filename, mirror viability).
//! 2. [`plan_chunks`] partitions the byte space into aligned chunks.
//! 3. A [`TaskQueue`] is loaded with the remaining ranges and the
//!    [`concurrent::ConcurrentFetcher`] streams them into a preallocated
//!    destination file — or, when the origin refuses ranges,
//!    [`single::SingleFetcher`] streams the whole body over one connection.
//!
//! The orchestrator in [`crate::manager`] glues these together and owns
//! persistence and events.

pub mod client;
pub mod concurrent;
pub mod constants;
pub mod dest_file;
mod error;
mod filename;
mod plan;
mod probe;
mod retry;
pub mod single;
mod task_queue;

pub use client::HttpClient;
pub use dest_file::DestFile;
pub use error::DownloadError;
pub use filename::{FALLBACK_FILENAME, resolve_filename, sanitize_filename};
pub use plan::{ChunkPlan, Task, plan_chunks, tasks_for_plan};
pub use probe::{MirrorProbe, ProbeResult, probe_mirrors, probe_server};
pub use retry::{FailureType, RetryDecision, RetryPolicy, classify_error, parse_retry_after};
pub use task_queue::TaskQueue;
