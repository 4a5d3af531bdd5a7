//! Streaming checksum verification for finished downloads.

use std::path::Path;

use sha2::{Digest, Sha256};
use tokio::io::AsyncReadExt;

use crate::download::DownloadError;

/// Streaming read buffer for hashing.
const HASH_BUFFER: usize = 64 * 1024;

/// Computes the SHA-256 of a file as a lowercase hex string.
///
/// # Errors
///
/// Returns `DownloadError::Io` when the file cannot be read.
pub async fn sha256_file(path: &Path) -> Result<String, DownloadError> {
    let mut file = tokio::fs::File::open(path)
        .await
        .map_err(|e| DownloadError::io(path, e))?;
    let mut hasher = Sha256::new();
    let mut buffer = vec![0u8; HASH_BUFFER];

    loop {
        let read = file
            .read(&mut buffer)
            .await
            .map_err(|e| DownloadError::io(path, e))?;
        if read == 0 {
            break;
        }
        hasher.update(&buffer[..read]);
    }

    Ok(hasher
        .finalize()
        .iter()
        .fold(String::with_capacity(64), |mut out, byte| {
            use std::fmt::Write;
            let _ = write!(out, "{byte:02x}");
            out
        }))
}

/// Verifies a finished file against an expected SHA-256 digest
/// (case-insensitive). A mismatch is fatal for the download.
///
/// # Errors
///
/// Returns `DownloadError::ChecksumMismatch` when digests differ, or
/// `DownloadError::Io` when the file cannot be read.
pub async fn verify_sha256(path: &Path, expected: &str) -> Result<(), DownloadError> {
    let actual = sha256_file(path).await?;
    if actual.eq_ignore_ascii_case(expected.trim()) {
        Ok(())
    } else {
        Err(DownloadError::ChecksumMismatch {
            path: path.to_path_buf(),
            expected: expected.trim().to_lowercase(),
            actual,
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    // SHA-256 of the ASCII string "abc".
    const ABC_SHA256: &str = "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad";

    #[tokio::test]
    async fn test_sha256_known_vector() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("abc.txt");
        std::fs::write(&path, b"abc").unwrap();

        assert_eq!(sha256_file(&path).await.unwrap(), ABC_SHA256);
    }

    #[tokio::test]
    async fn test_verify_accepts_uppercase_digest() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("abc.txt");
        std::fs::write(&path, b"abc").unwrap();

        verify_sha256(&path, &ABC_SHA256.to_uppercase())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_verify_mismatch_is_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("other.txt");
        std::fs::write(&path, b"not abc").unwrap();

        let result = verify_sha256(&path, ABC_SHA256).await;
        assert!(matches!(
            result,
            Err(DownloadError::ChecksumMismatch { .. })
        ));
    }

    #[tokio::test]
    async fn test_missing_file_is_io_error() {
        let result = sha256_file(Path::new("/nonexistent/file.bin")).await;
        assert!(matches!(result, Err(DownloadError::Io { .. })));
    }
}
