//! Failure classification and retry backoff for chunk fetches.
//!
//! When a task fails, the error is classified into a [`FailureType`]:
//! - [`FailureType::Transient`] - retried in place with backoff
//! - [`FailureType::RateLimited`] - retried, and the adaptive limiter sheds
//!   one worker; a parsable `Retry-After` overrides the backoff delay
//! - [`FailureType::Fatal`] - surfaced immediately (auth, not-found, disk)
//!
//! The schedule is exponential with **full jitter**: the delay for attempt
//! `n` is drawn uniformly from `[0, min(base * 2^(n-1), cap)]`.

use std::time::Duration;

use rand::Rng;
use tracing::debug;

use super::DownloadError;
use super::constants::{MAX_RETRY_AFTER, RETRY_BASE_DELAY, RETRY_MAX_ATTEMPTS, RETRY_MAX_DELAY};

/// Classification of a task failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureType {
    /// Temporary failure that may succeed on retry.
    ///
    /// DNS failure, connection reset, read timeout, 5xx, 408, worker stall.
    Transient,

    /// HTTP 429. Retryable, but also sheds a worker from the pool.
    RateLimited,

    /// Failure that retrying the same URL cannot fix.
    ///
    /// 401/403/404/410, other 4xx, disk errors, invalid URL, range
    /// contract violations.
    Fatal,
}

/// Decision on whether to retry a failed task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryDecision {
    /// Retry after the given delay.
    Retry {
        /// How long to wait before retrying.
        delay: Duration,
        /// The attempt number the retry will carry (1-indexed).
        attempt: u32,
    },

    /// Give up on this task locally. The fetcher may still fail over to a
    /// mirror before surfacing.
    GiveUp {
        /// Human-readable reason.
        reason: String,
    },
}

/// Exponential backoff schedule with full jitter.
///
/// Defaults per the engine contract: base 500 ms, cap 15 s, 5 attempts.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    max_attempts: u32,
    base_delay: Duration,
    max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: RETRY_MAX_ATTEMPTS,
            base_delay: RETRY_BASE_DELAY,
            max_delay: RETRY_MAX_DELAY,
        }
    }
}

impl RetryPolicy {
    /// Creates a policy with custom settings. `max_attempts` is clamped to
    /// at least 1.
    #[must_use]
    pub fn new(max_attempts: u32, base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay,
            max_delay,
        }
    }

    /// Maximum attempts, including the initial one.
    #[must_use]
    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Decides whether attempt `attempt` (1-indexed, just failed) should be
    /// retried, honoring a server-sent `Retry-After` when present.
    pub fn should_retry(
        &self,
        failure_type: FailureType,
        attempt: u32,
        retry_after: Option<Duration>,
    ) -> RetryDecision {
        if failure_type == FailureType::Fatal {
            return RetryDecision::GiveUp {
                reason: "fatal failure".to_string(),
            };
        }

        if attempt >= self.max_attempts {
            debug!(attempt, max = self.max_attempts, "attempts exhausted");
            return RetryDecision::GiveUp {
                reason: format!("max attempts ({}) exhausted", self.max_attempts),
            };
        }

        let delay = retry_after
            .map(|ra| ra.min(MAX_RETRY_AFTER))
            .unwrap_or_else(|| self.backoff_delay(attempt));

        debug!(
            attempt,
            next_attempt = attempt + 1,
            delay_ms = delay.as_millis(),
            "will retry"
        );

        RetryDecision::Retry {
            delay,
            attempt: attempt + 1,
        }
    }

    /// Full-jitter delay: uniform over `[0, min(base * 2^(attempt-1), cap)]`.
    fn backoff_delay(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(20);
        let ceiling_ms = self
            .base_delay
            .as_millis()
            .saturating_mul(1u128 << exponent)
            .min(self.max_delay.as_millis());
        let jittered = rand::thread_rng().gen_range(0..=ceiling_ms as u64);
        Duration::from_millis(jittered)
    }
}

/// Classifies a download error into a failure type for retry decisions.
///
/// | Error | Type |
/// |-------|------|
/// | 408, 429* , 5xx | Transient (* 429 is RateLimited) |
/// | 401, 403 | Fatal (authorization) |
/// | 404, 410, other 4xx | Fatal |
/// | Timeout, network, stall | Transient |
/// | IO, invalid URL, range violation, size/checksum mismatch | Fatal |
/// | Cancelled | Fatal (never retried; propagated silently upstream) |
#[must_use]
pub fn classify_error(error: &DownloadError) -> FailureType {
    match error {
        DownloadError::HttpStatus { status, .. } => classify_http_status(*status),
        DownloadError::Timeout { .. }
        | DownloadError::Network { .. }
        | DownloadError::Stalled { .. } => FailureType::Transient,
        DownloadError::RangeViolation { .. }
        | DownloadError::TooManyRedirects { .. }
        | DownloadError::SizeMismatch { .. }
        | DownloadError::ChecksumMismatch { .. }
        | DownloadError::Io { .. }
        | DownloadError::InvalidUrl { .. }
        | DownloadError::Cancelled => FailureType::Fatal,
    }
}

/// Classifies an HTTP status code into a failure type.
fn classify_http_status(status: u16) -> FailureType {
    match status {
        408 => FailureType::Transient,
        429 => FailureType::RateLimited,
        status if (500..600).contains(&status) => FailureType::Transient,
        // 401/403/404/410 and every other 4xx: retrying the same URL
        // cannot help.
        _ => FailureType::Fatal,
    }
}

/// Parses a `Retry-After` header value in delay-seconds form.
///
/// The HTTP-date form is not supported; callers fall back to the backoff
/// schedule when this returns `None`. Values are capped at
/// [`MAX_RETRY_AFTER`].
#[must_use]
pub fn parse_retry_after(value: &str) -> Option<Duration> {
    let seconds: u64 = value.trim().parse().ok()?;
    Some(Duration::from_secs(seconds).min(MAX_RETRY_AFTER))
}
