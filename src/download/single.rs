//! Single-connection fallback fetcher.
//!
//! Used when the probe reports no range support. Streams the whole body
//! into the preallocated working file through a reusable buffer, publishing
//! batched progress so counter updates do not dominate CPU on fast links.
//!
//! Pause/resume is NOT supported here: without ranges an interrupted
//! download cannot continue, so cancellation deletes the partial file and
//! the caller must restart.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

use futures_util::StreamExt;
use tokio::fs::File;
use tokio::io::{AsyncWriteExt, BufWriter};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument};

use super::client::HttpClient;
use super::constants::{
    INCOMPLETE_SUFFIX, PROGRESS_BATCH_BYTES, PROGRESS_BATCH_INTERVAL, SINGLE_BUFFER,
};
use super::dest_file::{finalize, preallocate_std};
use super::error::DownloadError;
use crate::progress::ProgressState;

/// Streams `url` over one connection into `dest_path` (via its `.surge`
/// working file), returning the byte count written.
///
/// `total_size` of zero means the size is unknown; the file is not
/// preallocated and no final size check is made.
///
/// # Errors
///
/// Returns `DownloadError::Cancelled` when `cancel` fires (the partial file
/// is removed), `HttpStatus` for a non-200 response, and `Io`/`Network` for
/// stream failures. On any error the partial file is deleted.
#[instrument(skip(client, headers, progress, cancel), fields(url = %url, dest = %dest_path.display()))]
pub async fn download_single(
    client: &HttpClient,
    url: &str,
    headers: &HashMap<String, String>,
    dest_path: &Path,
    total_size: u64,
    progress: &Arc<ProgressState>,
    cancel: &CancellationToken,
) -> Result<u64, DownloadError> {
    let working_path = working_path_for(dest_path);

    let result = stream_body(
        client,
        url,
        headers,
        &working_path,
        total_size,
        progress,
        cancel,
    )
    .await;

    match result {
        Ok(written) => {
            finalize(&working_path, dest_path).await?;
            info!(bytes = written, path = %dest_path.display(), "single-connection download complete");
            Ok(written)
        }
        Err(error) => {
            debug!(path = %working_path.display(), "removing partial file after failure");
            let _ = tokio::fs::remove_file(&working_path).await;
            Err(error)
        }
    }
}

/// The `.surge`-suffixed working path for a destination.
#[must_use]
pub fn working_path_for(dest_path: &Path) -> std::path::PathBuf {
    let mut name = dest_path.as_os_str().to_os_string();
    name.push(INCOMPLETE_SUFFIX);
    std::path::PathBuf::from(name)
}

async fn stream_body(
    client: &HttpClient,
    url: &str,
    headers: &HashMap<String, String>,
    working_path: &Path,
    total_size: u64,
    progress: &Arc<ProgressState>,
    cancel: &CancellationToken,
) -> Result<u64, DownloadError> {
    let response = client.get(url, headers, None).await?;
    let status = response.status().as_u16();
    if status != 200 {
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

    let file = File::create(working_path)
        .await
        .map_err(|e| DownloadError::io(working_path, e))?;

    let preallocated = total_size > 0;
    let file = if preallocated {
        let std_file = file.into_std().await;
        let std_file = tokio::task::spawn_blocking(move || {
            preallocate_std(&std_file, total_size).map(|()| std_file)
        })
        .await
        .map_err(|e| DownloadError::io(working_path, std::io::Error::other(e)))?
        .map_err(|e| DownloadError::io(working_path, e))?;
        File::from_std(std_file)
    } else {
        file
    };

    let mut writer = BufWriter::with_capacity(SINGLE_BUFFER, file);
    let mut stream = response.bytes_stream();
    let mut written: u64 = 0;
    let mut pending: u64 = 0;
    let mut last_flush = Instant::now();

    loop {
        let chunk = tokio::select! {
            () = cancel.cancelled() => return Err(DownloadError::Cancelled),
            chunk = stream.next() => chunk,
        };
        let Some(chunk) = chunk else { break };
        let chunk = chunk.map_err(|e| {
            if e.is_timeout() {
                DownloadError::timeout(url)
            } else {
                DownloadError::network(url, e)
            }
        })?;

        writer
            .write_all(&chunk)
            .await
            .map_err(|e| DownloadError::io(working_path, e))?;

        written += chunk.len() as u64;
        pending += chunk.len() as u64;
        if pending >= PROGRESS_BATCH_BYTES || last_flush.elapsed() >= PROGRESS_BATCH_INTERVAL {
            // Every flushed byte is verified here; the counters never
            // diverge on the single-connection path.
            progress.store_written(written);
            pending = 0;
            last_flush = Instant::now();
        }
    }

    writer
        .flush()
        .await
        .map_err(|e| DownloadError::io(working_path, e))?;

    let file = writer.into_inner();
    if preallocated && written != total_size {
        file.set_len(written)
            .await
            .map_err(|e| DownloadError::io(working_path, e))?;
    }
    file.sync_all()
        .await
        .map_err(|e| DownloadError::io(working_path, e))?;

    progress.store_written(written);
    Ok(written)
}
