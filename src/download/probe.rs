//! Server probe: classify an origin before downloading from it.
//!
//! The probe issues a `GET` with `Range: bytes=0-0` and interprets the
//! response:
//!
//! - `206 Partial Content` with a valid `Content-Range` — ranges supported;
//!   total size parsed from the `Content-Range` total.
//! - `200 OK` with `Content-Length` — ranges not supported; the download
//!   falls back to the single-connection fetcher.
//! - `416` with `Content-Range: */N` — ranges supported (empty-body edge
//!   case), total `N`.
//! - Any other 4xx or 5xx — probe failure, status propagated.
//!
//! Redirects are followed by [`HttpClient`] with the `Range` header
//! re-applied on every hop, so a CDN bouncing to an object store still
//! reports range support correctly.

use std::collections::HashMap;

use futures_util::StreamExt;
use tracing::{debug, instrument, warn};

use super::client::HttpClient;
use super::constants::{MIRROR_PROBE_CONCURRENCY, PROBE_TIMEOUT};
use super::error::DownloadError;
use super::filename::resolve_filename;

/// What the probe learned about an origin.
#[derive(Debug, Clone)]
pub struct ProbeResult {
    /// Whether ranged requests are honored.
    pub supports_range: bool,
    /// Total object size in bytes.
    pub total_size: u64,
    /// Resolved destination filename (sanitized).
    pub filename: String,
    /// Final URL after redirects.
    pub resolved_url: String,
    /// Whether the response arrived without a content transformation.
    pub identity_encoding: bool,
    /// Outcome per probed mirror, in input order.
    pub mirror_results: Vec<MirrorProbe>,
}

/// Probe outcome for a single mirror.
#[derive(Debug, Clone)]
pub struct MirrorProbe {
    /// The mirror URL as supplied.
    pub url: String,
    /// Whether the mirror honors ranged requests.
    pub supports_range: bool,
    /// Total size the mirror reports.
    pub total_size: u64,
    /// Whether the mirror agrees with the primary's size and is usable for
    /// failover.
    pub viable: bool,
}

/// Probes `url` and, when `mirrors` is non-empty, probes each mirror with
/// bounded parallelism, rejecting mirrors whose size disagrees with the
/// primary.
///
/// # Errors
///
/// Propagates transport errors and non-416 HTTP failures from the primary.
/// Mirror failures never fail the probe; they mark the mirror non-viable.
#[instrument(skip(client, headers, mirrors), fields(url = %url))]
pub async fn probe_server(
    client: &HttpClient,
    url: &str,
    headers: &HashMap<String, String>,
    mirrors: &[String],
    filename_override: Option<&str>,
) -> Result<ProbeResult, DownloadError> {
    let mut result = probe_one(client, url, headers, filename_override).await?;

    if !mirrors.is_empty() {
        result.mirror_results =
            probe_mirrors(client, mirrors, headers, result.total_size).await;
    }

    debug!(
        supports_range = result.supports_range,
        total_size = result.total_size,
        filename = %result.filename,
        mirrors = result.mirror_results.len(),
        "probe complete"
    );
    Ok(result)
}

/// Probes every mirror with at most [`MIRROR_PROBE_CONCURRENCY`] requests in
/// flight. A mirror is viable only if it supports ranges and reports the
/// primary's size.
pub async fn probe_mirrors(
    client: &HttpClient,
    mirrors: &[String],
    headers: &HashMap<String, String>,
    primary_size: u64,
) -> Vec<MirrorProbe> {
    let mut results: Vec<(usize, MirrorProbe)> = futures_util::stream::iter(
        mirrors.iter().cloned().enumerate().map(|(index, mirror)| {
            let client = client.clone();
            let headers = headers.clone();
            async move {
                let outcome = probe_one(&client, &mirror, &headers, None).await;
                let probe = match outcome {
                    Ok(probed) => {
                        let viable = probed.supports_range && probed.total_size == primary_size;
                        if !viable {
                            warn!(
                                mirror = %mirror,
                                size = probed.total_size,
                                primary = primary_size,
                                "mirror rejected: size disagreement or no range support"
                            );
                        }
                        MirrorProbe {
                            url: mirror.clone(),
                            supports_range: probed.supports_range,
                            total_size: probed.total_size,
                            viable,
                        }
                    }
                    Err(error) => {
                        warn!(mirror = %mirror, %error, "mirror probe failed");
                        MirrorProbe {
                            url: mirror.clone(),
                            supports_range: false,
                            total_size: 0,
                            viable: false,
                        }
                    }
                };
                (index, probe)
            }
        }),
    )
    .buffer_unordered(MIRROR_PROBE_CONCURRENCY)
    .collect()
    .await;

    results.sort_by_key(|(index, _)| *index);
    results.into_iter().map(|(_, probe)| probe).collect()
}

async fn probe_one(
    client: &HttpClient,
    url: &str,
    headers: &HashMap<String, String>,
    filename_override: Option<&str>,
) -> Result<ProbeResult, DownloadError> {
    let response = tokio::time::timeout(
        PROBE_TIMEOUT,
        client.get(url, headers, Some("bytes=0-0")),
    )
    .await
    .map_err(|_| DownloadError::timeout(url))??;

    let status = response.status().as_u16();
    let identity_encoding = HttpClient::is_identity_encoding(&response);
    let resolved_url = response.url().clone();
    let content_range = header_string(&response, "content-range");
    let content_length = header_string(&response, "content-length")
        .and_then(|v| v.parse::<u64>().ok());
    let content_disposition = header_string(&response, "content-disposition");

    let (supports_range, total_size) = match status {
        206 => {
            let total = content_range
                .as_deref()
                .and_then(parse_content_range_total)
                .ok_or_else(|| {
                    DownloadError::range_violation(url, "206 without a parsable Content-Range")
                })?;
            (true, total)
        }
        200 => (false, content_length.unwrap_or(0)),
        416 => {
            // Empty-body edge case: the origin rejects bytes=0-0 but still
            // reports the total.
            let total = content_range
                .as_deref()
                .and_then(parse_content_range_total)
                .ok_or_else(|| {
                    DownloadError::range_violation(url, "416 without a parsable Content-Range")
                })?;
            (true, total)
        }
        status if status >= 400 => {
            let retry_after = header_string(&response, "retry-after");
            return Err(DownloadError::http_status_with_retry_after(
                url,
                status,
                retry_after,
            ));
        }
        other => {
            return Err(DownloadError::range_violation(
                url,
                format!("unexpected probe status {other}"),
            ));
        }
    };

    let filename = resolve_filename(
        content_disposition.as_deref(),
        &resolved_url,
        filename_override,
    );

    Ok(ProbeResult {
        supports_range,
        total_size,
        filename,
        resolved_url: resolved_url.into(),
        identity_encoding,
        mirror_results: Vec::new(),
    })
}

fn header_string(response: &reqwest::Response, name: &str) -> Option<String> {
    response
        .headers()
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
}

/// Parses the total from a `Content-Range` value.
///
/// Accepts `bytes 0-0/1234` and the unsatisfied form `bytes */1234`.
/// Returns `None` for `bytes 0-0/*` (unknown total) and malformed values.
pub(crate) fn parse_content_range_total(value: &str) -> Option<u64> {
    let rest = value.trim().strip_prefix("bytes")?.trim_start();
    let (_, total) = rest.rsplit_once('/')?;
    total.trim().parse().ok()
}

/// Validates that a 206 response's `Content-Range` starts where the request
/// asked. Used by workers to catch off-by-origin responses.
pub(crate) fn content_range_start(value: &str) -> Option<u64> {
    let rest = value.trim().strip_prefix("bytes")?.trim_start();
    let (span, _) = rest.rsplit_once('/')?;
    let (start, _) = span.split_once('-')?;
    start.trim().parse().ok()
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::config::RuntimeConfig;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn test_client() -> HttpClient {
        HttpClient::shared(&RuntimeConfig::default()).unwrap()
    }

    #[test]
    fn test_parse_content_range_total_forms() {
        assert_eq!(parse_content_range_total("bytes 0-0/1234"), Some(1234));
        assert_eq!(parse_content_range_total("bytes */5000"), Some(5000));
        assert_eq!(parse_content_range_total("bytes 0-0/*"), None);
        assert_eq!(parse_content_range_total("items 0-0/10"), None);
        assert_eq!(parse_content_range_total("garbage"), None);
    }

    #[test]
    fn test_content_range_start_parsed() {
        assert_eq!(content_range_start("bytes 4096-8191/100000"), Some(4096));
        assert_eq!(content_range_start("bytes */100"), None);
    }

    #[tokio::test]
    async fn test_probe_206_reports_range_support() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/file.bin"))
            .and(header("Range", "bytes=0-0"))
            .respond_with(
                ResponseTemplate::new(206)
                    .insert_header("Content-Range", "bytes 0-0/4096")
                    .set_body_bytes(vec![0u8]),
            )
            .mount(&server)
            .await;

        let result = probe_server(
            &test_client(),
            &format!("{}/file.bin", server.uri()),
            &HashMap::new(),
            &[],
            None,
        )
        .await
        .unwrap();

        assert!(result.supports_range);
        assert_eq!(result.total_size, 4096);
        assert_eq!(result.filename, "file.bin");
        assert!(result.identity_encoding);
    }

    #[tokio::test]
    async fn test_probe_200_means_no_range_support() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/plain"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("Content-Length", "2048")
                    .set_body_bytes(vec![0u8; 2048]),
            )
            .mount(&server)
            .await;

        let result = probe_server(
            &test_client(),
            &format!("{}/plain", server.uri()),
            &HashMap::new(),
            &[],
            None,
        )
        .await
        .unwrap();

        assert!(!result.supports_range);
        assert_eq!(result.total_size, 2048);
    }

    #[tokio::test]
    async fn test_probe_416_empty_body_edge_case() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/empty"))
            .respond_with(
                ResponseTemplate::new(416).insert_header("Content-Range", "bytes */0"),
            )
            .mount(&server)
            .await;

        let result = probe_server(
            &test_client(),
            &format!("{}/empty", server.uri()),
            &HashMap::new(),
            &[],
            None,
        )
        .await
        .unwrap();

        assert!(result.supports_range);
        assert_eq!(result.total_size, 0);
    }

    #[tokio::test]
    async fn test_probe_propagates_failure_status() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/missing"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let result = probe_server(
            &test_client(),
            &format!("{}/missing", server.uri()),
            &HashMap::new(),
            &[],
            None,
        )
        .await;

        assert!(matches!(
            result,
            Err(DownloadError::HttpStatus { status: 404, .. })
        ));
    }

    #[tokio::test]
    async fn test_probe_survives_cross_server_redirect() {
        // Server A redirects to server B; B honors the forwarded Range.
        let target = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/real.bin"))
            .and(header("Range", "bytes=0-0"))
            .respond_with(
                ResponseTemplate::new(206)
                    .insert_header("Content-Range", "bytes 0-0/777")
                    .set_body_bytes(vec![0u8]),
            )
            .expect(1)
            .mount(&target)
            .await;

        let front = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/file.bin"))
            .respond_with(
                ResponseTemplate::new(302)
                    .insert_header("Location", format!("{}/real.bin", target.uri())),
            )
            .mount(&front)
            .await;

        let result = probe_server(
            &test_client(),
            &format!("{}/file.bin", front.uri()),
            &HashMap::new(),
            &[],
            None,
        )
        .await
        .unwrap();

        assert!(result.supports_range, "Range header must survive redirects");
        assert_eq!(result.total_size, 777);
        assert_eq!(result.filename, "real.bin");
        assert!(result.resolved_url.contains("/real.bin"));
    }

    #[tokio::test]
    async fn test_probe_filename_from_content_disposition() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/dl"))
            .respond_with(
                ResponseTemplate::new(206)
                    .insert_header("Content-Range", "bytes 0-0/10")
                    .insert_header(
                        "Content-Disposition",
                        r#"attachment; filename="named.tar.gz""#,
                    )
                    .set_body_bytes(vec![0u8]),
            )
            .mount(&server)
            .await;

        let result = probe_server(
            &test_client(),
            &format!("{}/dl", server.uri()),
            &HashMap::new(),
            &[],
            None,
        )
        .await
        .unwrap();
        assert_eq!(result.filename, "named.tar.gz");
    }

    #[tokio::test]
    async fn test_mirror_probe_rejects_size_disagreement() {
        let good = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(
                ResponseTemplate::new(206)
                    .insert_header("Content-Range", "bytes 0-0/1000")
                    .set_body_bytes(vec![0u8]),
            )
            .mount(&good)
            .await;

        let bad = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(
                ResponseTemplate::new(206)
                    .insert_header("Content-Range", "bytes 0-0/999")
                    .set_body_bytes(vec![0u8]),
            )
            .mount(&bad)
            .await;

        let mirrors = vec![
            format!("{}/a", good.uri()),
            format!("{}/b", bad.uri()),
        ];
        let results = probe_mirrors(&test_client(), &mirrors, &HashMap::new(), 1000).await;

        assert_eq!(results.len(), 2);
        assert!(results[0].viable);
        assert!(!results[1].viable);
        assert_eq!(results[0].url, mirrors[0]);
    }

    #[tokio::test]
    async fn test_mirror_probe_failure_is_non_viable_not_fatal() {
        let mirrors = vec!["http://127.0.0.1:1/unreachable".to_string()];
        let results = probe_mirrors(&test_client(), &mirrors, &HashMap::new(), 1000).await;
        assert_eq!(results.len(), 1);
        assert!(!results[0].viable);
    }
}
