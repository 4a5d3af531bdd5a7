//! The shared destination file: preallocation and positional writes.
//!
//! All workers of one download write into a single file handle through
//! `pwrite`-style positional writes, so no worker ever seeks shared state.
//! The file is preallocated to the total size up front (via `fallocate`
//! where available, logical truncation elsewhere) so positional writes
//! never extend the file.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{debug, warn};

use super::error::DownloadError;

/// Shared handle to the working (`.surge`) file.
#[derive(Debug, Clone)]
pub struct DestFile {
    file: Arc<std::fs::File>,
    path: PathBuf,
}

impl DestFile {
    /// Creates (or truncates) the working file and preallocates `size`
    /// bytes when `size > 0`.
    ///
    /// # Errors
    ///
    /// Returns `DownloadError::Io` when creation or preallocation fails.
    pub async fn create(path: &Path, size: u64) -> Result<Self, DownloadError> {
        let path_owned = path.to_path_buf();
        let file = tokio::task::spawn_blocking(move || -> std::io::Result<std::fs::File> {
            let file = std::fs::OpenOptions::new()
                .create(true)
                .write(true)
                .read(true)
                .truncate(true)
                .open(&path_owned)?;
            if size > 0 {
                preallocate(&file, size)?;
            }
            Ok(file)
        })
        .await
        .map_err(|e| DownloadError::io(path, std::io::Error::other(e)))?
        .map_err(|e| DownloadError::io(path, e))?;

        Ok(Self {
            file: Arc::new(file),
            path: path.to_path_buf(),
        })
    }

    /// Reopens an existing working file for a resumed download.
    ///
    /// # Errors
    ///
    /// Returns `DownloadError::Io` when the file cannot be opened.
    pub async fn open_existing(path: &Path) -> Result<Self, DownloadError> {
        let path_owned = path.to_path_buf();
        let file = tokio::task::spawn_blocking(move || {
            std::fs::OpenOptions::new()
                .write(true)
                .read(true)
                .open(&path_owned)
        })
        .await
        .map_err(|e| DownloadError::io(path, std::io::Error::other(e)))?
        .map_err(|e| DownloadError::io(path, e))?;

        Ok(Self {
            file: Arc::new(file),
            path: path.to_path_buf(),
        })
    }

    /// Writes `buf` at `offset` without moving any shared cursor.
    ///
    /// # Errors
    ///
    /// Returns `DownloadError::Io` on a short or failed write.
    pub async fn write_at(&self, offset: u64, buf: Vec<u8>) -> Result<(), DownloadError> {
        let file = Arc::clone(&self.file);
        let path = self.path.clone();
        tokio::task::spawn_blocking(move || write_all_at(&file, &buf, offset))
            .await
            .map_err(|e| DownloadError::io(&path, std::io::Error::other(e)))?
            .map_err(|e| DownloadError::io(&path, e))
    }

    /// Shrinks the file to `len` bytes. Used when preallocation overshot.
    ///
    /// # Errors
    ///
    /// Returns `DownloadError::Io` when truncation fails.
    pub async fn truncate(&self, len: u64) -> Result<(), DownloadError> {
        let file = Arc::clone(&self.file);
        let path = self.path.clone();
        tokio::task::spawn_blocking(move || file.set_len(len))
            .await
            .map_err(|e| DownloadError::io(&path, std::io::Error::other(e)))?
            .map_err(|e| DownloadError::io(&path, e))
    }

    /// Flushes file data and metadata to stable storage.
    ///
    /// # Errors
    ///
    /// Returns `DownloadError::Io` when the sync fails.
    pub async fn sync(&self) -> Result<(), DownloadError> {
        let file = Arc::clone(&self.file);
        let path = self.path.clone();
        tokio::task::spawn_blocking(move || file.sync_all())
            .await
            .map_err(|e| DownloadError::io(&path, std::io::Error::other(e)))?
            .map_err(|e| DownloadError::io(&path, e))
    }

    /// Path of the working file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Atomically renames the working file onto `final_path`, falling back to
/// copy-then-delete when rename fails (e.g. across devices).
///
/// # Errors
///
/// Returns `DownloadError::Io` when both rename and copy fail.
pub async fn finalize(working_path: &Path, final_path: &Path) -> Result<(), DownloadError> {
    match tokio::fs::rename(working_path, final_path).await {
        Ok(()) => Ok(()),
        Err(rename_err) => {
            warn!(
                from = %working_path.display(),
                to = %final_path.display(),
                error = %rename_err,
                "rename failed, copying instead"
            );
            tokio::fs::copy(working_path, final_path)
                .await
                .map_err(|e| DownloadError::io(final_path, e))?;
            if let Err(remove_err) = tokio::fs::remove_file(working_path).await {
                debug!(
                    path = %working_path.display(),
                    error = %remove_err,
                    "could not remove working file after copy"
                );
            }
            Ok(())
        }
    }
}

/// Preallocates `size` bytes for a plain file handle. Shared with the
/// single-connection fetcher.
pub(crate) fn preallocate_std(file: &std::fs::File, size: u64) -> std::io::Result<()> {
    preallocate(file, size)
}

#[cfg(target_os = "linux")]
fn preallocate(file: &std::fs::File, size: u64) -> std::io::Result<()> {
    use std::os::fd::AsRawFd;

    use nix::fcntl::{FallocateFlags, fallocate};

    match fallocate(
        file.as_raw_fd(),
        FallocateFlags::empty(),
        0,
        libc_off_t(size)?,
    ) {
        Ok(()) => Ok(()),
        // Filesystems without fallocate support fall back to a logical size.
        Err(nix::errno::Errno::EOPNOTSUPP) | Err(nix::errno::Errno::ENOSYS) => file.set_len(size),
        Err(errno) => Err(std::io::Error::from_raw_os_error(errno as i32)),
    }
}

#[cfg(target_os = "linux")]
fn libc_off_t(size: u64) -> std::io::Result<i64> {
    i64::try_from(size).map_err(|_| {
        std::io::Error::new(std::io::ErrorKind::InvalidInput, "file too large to preallocate")
    })
}

#[cfg(not(target_os = "linux"))]
fn preallocate(file: &std::fs::File, size: u64) -> std::io::Result<()> {
    file.set_len(size)
}

#[cfg(unix)]
fn write_all_at(file: &std::fs::File, buf: &[u8], offset: u64) -> std::io::Result<()> {
    use std::os::unix::fs::FileExt;
    file.write_all_at(buf, offset)
}

#[cfg(windows)]
fn write_all_at(file: &std::fs::File, buf: &[u8], offset: u64) -> std::io::Result<()> {
    use std::os::windows::fs::FileExt;
    let mut written = 0usize;
    while written < buf.len() {
        let n = file.seek_write(&buf[written..], offset + written as u64)?;
        if n == 0 {
            return Err(std::io::Error::new(
                std::io::ErrorKind::WriteZero,
                "seek_write returned zero",
            ));
        }
        written += n;
    }
    Ok(())
}
