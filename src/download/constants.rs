//! Constants for the download engine (chunking, buffers, timeouts).

use std::time::Duration;

/// Bytes per kibibyte.
pub const KIB: u64 = 1024;
/// Bytes per mebibyte.
pub const MIB: u64 = 1024 * KIB;

/// Minimum chunk length for a concurrent plan (2 MiB).
pub const MIN_CHUNK: u64 = 2 * MIB;
/// Maximum chunk length for a concurrent plan (16 MiB).
pub const MAX_CHUNK: u64 = 16 * MIB;
/// Target chunk length the planner aims for (8 MiB).
pub const TARGET_CHUNK: u64 = 8 * MIB;
/// Chunk offsets are aligned to this boundary (4 KiB).
pub const ALIGN: u64 = 4 * KIB;

/// Worker streaming buffer: bytes accumulated before a positional write.
pub const WORKER_BUFFER: usize = 512 * KIB as usize;
/// Single-connection streaming buffer.
pub const SINGLE_BUFFER: usize = 32 * KIB as usize;

/// Bytes a worker may accumulate before it must publish progress counters.
pub const PROGRESS_BATCH_BYTES: u64 = 256 * KIB;
/// Wall-clock bound on how stale published progress counters may go.
pub const PROGRESS_BATCH_INTERVAL: Duration = Duration::from_millis(150);

/// Max concurrent connections to one host.
pub const PER_HOST_MAX: usize = 16;
/// Default worker connections per download when the config does not say.
pub const DEFAULT_CONNECTIONS: usize = 8;

/// HTTP client tuning.
pub const DIAL_TIMEOUT: Duration = Duration::from_secs(10);
pub const TLS_HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);
pub const RESPONSE_HEADER_TIMEOUT: Duration = Duration::from_secs(15);
pub const IDLE_CONN_TIMEOUT: Duration = Duration::from_secs(90);
pub const KEEPALIVE_INTERVAL: Duration = Duration::from_secs(30);
pub const PROBE_TIMEOUT: Duration = Duration::from_secs(30);

/// Redirect hop cap, applied to the probe and every ranged fetch.
pub const MAX_REDIRECTS: usize = 10;

/// No bytes from the socket for this long means the worker is stalled.
pub const STALL_THRESHOLD: Duration = Duration::from_secs(5);

/// Retry schedule: base delay, cap, and attempt limit (full jitter).
pub const RETRY_BASE_DELAY: Duration = Duration::from_millis(500);
pub const RETRY_MAX_DELAY: Duration = Duration::from_secs(15);
pub const RETRY_MAX_ATTEMPTS: u32 = 5;
/// Upper bound honored for a server-sent Retry-After value.
pub const MAX_RETRY_AFTER: Duration = Duration::from_secs(3600);

/// Clean window without failures before the adaptive limiter restores one
/// worker slot.
pub const CONCURRENCY_RESTORE_WINDOW: Duration = Duration::from_secs(30);

/// Mirror quarantine: this many task failures within the window removes the
/// mirror for the remainder of the download.
pub const MIRROR_QUARANTINE_FAILURES: usize = 3;
pub const MIRROR_QUARANTINE_WINDOW: Duration = Duration::from_secs(60);

/// Parallel mirror probes in flight at once.
pub const MIRROR_PROBE_CONCURRENCY: usize = 4;

/// Largest file that falls back to single-connection mode after a range
/// contract violation on the first task. Larger downloads surface the error.
pub const SMALL_FILE_FALLBACK_MAX: u64 = 32 * MIB;

/// Suffix appended to the destination path while a download is in flight.
pub const INCOMPLETE_SUFFIX: &str = ".surge";

/// Minimum spacing between persisted progress checkpoints per download.
pub const CHECKPOINT_INTERVAL: Duration = Duration::from_millis(500);
