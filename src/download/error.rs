//! Error types for the download engine.
//!
//! Structured errors for probing and fetching, carrying enough context
//! (URL, path, offsets) for retry classification and user feedback.

use std::path::PathBuf;

use thiserror::Error;

/// Errors that can occur while probing or downloading.
#[derive(Debug, Error)]
pub enum DownloadError {
    /// Network-level error (DNS resolution, connection refused/reset, TLS).
    #[error("network error downloading {url}: {source}")]
    Network {
        /// The URL that failed.
        url: String,
        /// The underlying network error.
        #[source]
        source: reqwest::Error,
    },

    /// Request timed out before completion.
    #[error("timeout downloading {url}")]
    Timeout {
        /// The URL that timed out.
        url: String,
    },

    /// HTTP error response (4xx client errors, 5xx server errors).
    #[error("HTTP {status} downloading {url}")]
    HttpStatus {
        /// The URL that returned an error status.
        url: String,
        /// The HTTP status code.
        status: u16,
        /// The Retry-After header value, if present (for 429 responses).
        retry_after: Option<String>,
    },

    /// The server broke the range contract: a `200` to a ranged request
    /// mid-download, or a `Content-Range` that does not match the request.
    #[error("range contract violation from {url}: {detail}")]
    RangeViolation {
        /// The URL that misbehaved.
        url: String,
        /// What exactly did not match.
        detail: String,
    },

    /// Too many redirect hops.
    #[error("stopped after {limit} redirects from {url}")]
    TooManyRedirects {
        /// The original URL.
        url: String,
        /// The hop cap that was exceeded.
        limit: usize,
    },

    /// Final byte count disagrees with the expected size.
    #[error("size mismatch for {path}: expected {expected} bytes, wrote {actual}")]
    SizeMismatch {
        /// Destination path.
        path: PathBuf,
        /// Expected total bytes.
        expected: u64,
        /// Bytes actually written.
        actual: u64,
    },

    /// Checksum of the finished file does not match the expected digest.
    #[error("checksum mismatch for {path}: expected {expected}, computed {actual}")]
    ChecksumMismatch {
        /// Destination path.
        path: PathBuf,
        /// Expected hex digest.
        expected: String,
        /// Computed hex digest.
        actual: String,
    },

    /// File system error (create, preallocate, positional write, rename).
    #[error("IO error writing to {path}: {source}")]
    Io {
        /// The file path where the error occurred.
        path: PathBuf,
        /// The underlying IO error.
        #[source]
        source: std::io::Error,
    },

    /// The provided URL is malformed or invalid.
    #[error("invalid URL: {url}")]
    InvalidUrl {
        /// The invalid URL string.
        url: String,
    },

    /// No bytes arrived from the socket within the stall threshold.
    #[error("worker stalled fetching {url} at offset {offset}")]
    Stalled {
        /// The URL being fetched.
        url: String,
        /// Byte offset of the stalled range.
        offset: u64,
    },

    /// The download was paused or cancelled. Not a failure; propagated
    /// silently.
    #[error("download cancelled")]
    Cancelled,
}

impl DownloadError {
    /// Creates a network error from a reqwest error.
    pub fn network(url: impl Into<String>, source: reqwest::Error) -> Self {
        Self::Network {
            url: url.into(),
            source,
        }
    }

    /// Creates a timeout error.
    pub fn timeout(url: impl Into<String>) -> Self {
        Self::Timeout { url: url.into() }
    }

    /// Creates an HTTP status error.
    pub fn http_status(url: impl Into<String>, status: u16) -> Self {
        Self::HttpStatus {
            url: url.into(),
            status,
            retry_after: None,
        }
    }

    /// Creates an HTTP status error with a Retry-After header value.
    pub fn http_status_with_retry_after(
        url: impl Into<String>,
        status: u16,
        retry_after: Option<String>,
    ) -> Self {
        Self::HttpStatus {
            url: url.into(),
            status,
            retry_after,
        }
    }

    /// Creates a range contract violation error.
    pub fn range_violation(url: impl Into<String>, detail: impl Into<String>) -> Self {
        Self::RangeViolation {
            url: url.into(),
            detail: detail.into(),
        }
    }

    /// Creates an IO error.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Creates an invalid URL error.
    pub fn invalid_url(url: impl Into<String>) -> Self {
        Self::InvalidUrl { url: url.into() }
    }

    /// Creates a stalled-worker error.
    pub fn stalled(url: impl Into<String>, offset: u64) -> Self {
        Self::Stalled {
            url: url.into(),
            offset,
        }
    }

    /// True for pause/cancel propagation, which is not a failure.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}

// The variants require context (url, path) the source errors don't provide,
// so there are no blanket `From<reqwest::Error>` / `From<std::io::Error>`
// impls; callers use the constructor helpers.

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_http_status_display() {
        let error = DownloadError::http_status("https://example.com/file.bin", 404);
        let msg = error.to_string();
        assert!(msg.contains("404"), "Expected '404' in: {msg}");
        assert!(msg.contains("https://example.com/file.bin"));
    }

    #[test]
    fn test_range_violation_display() {
        let error =
            DownloadError::range_violation("https://example.com/f", "got 200 for bytes=0-99");
        let msg = error.to_string();
        assert!(msg.contains("range contract violation"), "got: {msg}");
        assert!(msg.contains("got 200"));
    }

    #[test]
    fn test_size_mismatch_display() {
        let error = DownloadError::SizeMismatch {
            path: PathBuf::from("/tmp/out.bin"),
            expected: 100,
            actual: 90,
        };
        let msg = error.to_string();
        assert!(msg.contains("expected 100"));
        assert!(msg.contains("wrote 90"));
    }

    #[test]
    fn test_io_error_display_contains_path() {
        let io_error = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "access denied");
        let error = DownloadError::io(PathBuf::from("/tmp/test.bin"), io_error);
        assert!(error.to_string().contains("/tmp/test.bin"));
    }

    #[test]
    fn test_cancelled_is_not_a_failure() {
        assert!(DownloadError::Cancelled.is_cancelled());
        assert!(!DownloadError::timeout("https://example.com").is_cancelled());
    }

    #[test]
    fn test_stalled_display_carries_offset() {
        let error = DownloadError::stalled("https://example.com/f", 8192);
        assert!(error.to_string().contains("8192"));
    }
}
