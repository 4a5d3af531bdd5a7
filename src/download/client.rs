//! HTTP client with an explicit redirect policy.
//!
//! Automatic redirects are disabled and followed by hand so that every hop
//! re-applies the original request's headers — `Range` included. Default
//! client policies drop exactly those headers on cross-origin redirects,
//! which silently breaks chunking against CDNs that redirect to an object
//! store.
//!
//! Compression is disabled (`Accept-Encoding: identity`) so `Content-Length`
//! and byte ranges are exact.
//!
//! Clients are shared across downloads through a process-wide cache keyed by
//! `(proxy_url, max_connections_per_host)`, reusing pooled connections.

use std::collections::HashMap;
use std::sync::LazyLock;

use dashmap::DashMap;
use reqwest::header::{ACCEPT_ENCODING, HeaderMap, HeaderName, HeaderValue, LOCATION, RANGE};
use reqwest::redirect::Policy;
use reqwest::{Client, Proxy, StatusCode};
use tracing::{debug, warn};
use url::Url;

use super::constants::{DIAL_TIMEOUT, IDLE_CONN_TIMEOUT, KEEPALIVE_INTERVAL, MAX_REDIRECTS,
    RESPONSE_HEADER_TIMEOUT};
use super::error::DownloadError;
use crate::config::RuntimeConfig;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct ClientKey {
    proxy_url: String,
    max_conns_per_host: usize,
}

static CLIENT_CACHE: LazyLock<DashMap<ClientKey, Client>> = LazyLock::new(DashMap::new);

/// HTTP client wrapper shared by the probe and both fetchers.
#[derive(Debug, Clone)]
pub struct HttpClient {
    client: Client,
    user_agent: String,
}

impl HttpClient {
    /// Returns a client for `config`, reusing the pooled transport for the
    /// same `(proxy, per-host cap)` pair.
    ///
    /// # Errors
    ///
    /// Returns `DownloadError::InvalidUrl` when the configured proxy URL
    /// cannot be parsed, or `DownloadError::Network` when the client cannot
    /// be built.
    pub fn shared(config: &RuntimeConfig) -> Result<Self, DownloadError> {
        let key = ClientKey {
            proxy_url: config.proxy_url.clone(),
            max_conns_per_host: config.per_host_limit(),
        };

        if let Some(cached) = CLIENT_CACHE.get(&key) {
            return Ok(Self {
                client: cached.clone(),
                user_agent: config.user_agent.clone(),
            });
        }

        let client = build_client(config)?;
        let client = CLIENT_CACHE
            .entry(key)
            .or_insert(client)
            .value()
            .clone();
        Ok(Self {
            client,
            user_agent: config.user_agent.clone(),
        })
    }

    /// Issues a `GET`, following up to [`MAX_REDIRECTS`] redirects while
    /// copying `headers` and the `Range` header onto every hop.
    ///
    /// Returns the final response without inspecting its status; callers
    /// own the status contract (the probe and fetchers interpret 200 / 206 /
    /// 416 differently).
    ///
    /// # Errors
    ///
    /// `InvalidUrl` for unparsable URLs (initial or `Location`),
    /// `Timeout`/`Network` for transport failures, `TooManyRedirects` past
    /// the hop cap.
    pub async fn get(
        &self,
        url: &str,
        headers: &HashMap<String, String>,
        range: Option<&str>,
    ) -> Result<reqwest::Response, DownloadError> {
        let original_url = url;
        let mut current =
            Url::parse(url).map_err(|_| DownloadError::invalid_url(url.to_string()))?;
        let header_map = build_header_map(headers, range, &self.user_agent)?;

        for hop in 0..=MAX_REDIRECTS {
            let response = self
                .client
                .get(current.clone())
                .headers(header_map.clone())
                .send()
                .await
                .map_err(|e| {
                    if e.is_timeout() {
                        DownloadError::timeout(current.as_str())
                    } else {
                        DownloadError::network(current.as_str(), e)
                    }
                })?;

            if !response.status().is_redirection() {
                return Ok(response);
            }

            let location = response
                .headers()
                .get(LOCATION)
                .and_then(|v| v.to_str().ok())
                .ok_or_else(|| {
                    DownloadError::http_status(current.as_str(), response.status().as_u16())
                })?;
            let next = current
                .join(location)
                .map_err(|_| DownloadError::invalid_url(location.to_string()))?;

            debug!(hop, from = %current, to = %next, "following redirect");
            current = next;
        }

        warn!(url = original_url, limit = MAX_REDIRECTS, "redirect cap exceeded");
        Err(DownloadError::TooManyRedirects {
            url: original_url.to_string(),
            limit: MAX_REDIRECTS,
        })
    }

    /// True when the response was served without a content transformation,
    /// so byte ranges line up with `Content-Length`.
    #[must_use]
    pub fn is_identity_encoding(response: &reqwest::Response) -> bool {
        response
            .headers()
            .get(reqwest::header::CONTENT_ENCODING)
            .and_then(|v| v.to_str().ok())
            .is_none_or(|v| v.eq_ignore_ascii_case("identity"))
    }
}

/// Treated as a redirect for the manual follow loop.
#[must_use]
pub fn is_redirect(status: StatusCode) -> bool {
    status.is_redirection()
}

fn build_client(config: &RuntimeConfig) -> Result<Client, DownloadError> {
    let mut builder = Client::builder()
        .redirect(Policy::none())
        .connect_timeout(DIAL_TIMEOUT)
        .read_timeout(RESPONSE_HEADER_TIMEOUT)
        .pool_idle_timeout(IDLE_CONN_TIMEOUT)
        .pool_max_idle_per_host(config.per_host_limit())
        .tcp_keepalive(KEEPALIVE_INTERVAL);

    if !config.proxy_url.is_empty() {
        let proxy = Proxy::all(&config.proxy_url)
            .map_err(|_| DownloadError::invalid_url(config.proxy_url.clone()))?;
        builder = builder.proxy(proxy);
    }

    builder
        .build()
        .map_err(|e| DownloadError::network("client builder", e))
}

fn build_header_map(
    headers: &HashMap<String, String>,
    range: Option<&str>,
    user_agent: &str,
) -> Result<HeaderMap, DownloadError> {
    let mut map = HeaderMap::new();
    map.insert(ACCEPT_ENCODING, HeaderValue::from_static("identity"));
    if let Ok(ua) = HeaderValue::from_str(user_agent) {
        map.insert(reqwest::header::USER_AGENT, ua);
    }
    for (name, value) in headers {
        let name = HeaderName::from_bytes(name.as_bytes())
            .map_err(|_| DownloadError::invalid_url(format!("invalid header name: {name}")))?;
        let value = HeaderValue::from_str(value)
            .map_err(|_| DownloadError::invalid_url(format!("invalid header value for {name}")))?;
        map.insert(name, value);
    }
    if let Some(range) = range {
        let value = HeaderValue::from_str(range)
            .map_err(|_| DownloadError::invalid_url(format!("invalid range: {range}")))?;
        map.insert(RANGE, value);
    }
    Ok(map)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn test_client() -> HttpClient {
        HttpClient::shared(&RuntimeConfig::default()).unwrap()
    }

    #[tokio::test]
    async fn test_get_sends_identity_encoding_and_user_agent() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/file"))
            .and(header("Accept-Encoding", "identity"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(b"ok"))
            .expect(1)
            .mount(&server)
            .await;

        let client = test_client();
        let response = client
            .get(&format!("{}/file", server.uri()), &HashMap::new(), None)
            .await
            .unwrap();
        assert_eq!(response.status().as_u16(), 200);
    }

    #[tokio::test]
    async fn test_get_forwards_range_across_redirect() {
        let target = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/object"))
            .and(header("Range", "bytes=0-0"))
            .respond_with(
                ResponseTemplate::new(206).insert_header("Content-Range", "bytes 0-0/100"),
            )
            .expect(1)
            .mount(&target)
            .await;

        let front = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/file"))
            .respond_with(
                ResponseTemplate::new(302)
                    .insert_header("Location", format!("{}/object", target.uri())),
            )
            .mount(&front)
            .await;

        let client = test_client();
        let response = client
            .get(
                &format!("{}/file", front.uri()),
                &HashMap::new(),
                Some("bytes=0-0"),
            )
            .await
            .unwrap();
        assert_eq!(response.status().as_u16(), 206);
    }

    #[tokio::test]
    async fn test_get_forwards_custom_headers_across_redirect() {
        let target = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/object"))
            .and(header("Authorization", "Bearer token-1"))
            .and(header("Cookie", "session=abc"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(b"ok"))
            .expect(1)
            .mount(&target)
            .await;

        let front = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/file"))
            .respond_with(
                ResponseTemplate::new(307)
                    .insert_header("Location", format!("{}/object", target.uri())),
            )
            .mount(&front)
            .await;

        let mut headers = HashMap::new();
        headers.insert("Authorization".to_string(), "Bearer token-1".to_string());
        headers.insert("Cookie".to_string(), "session=abc".to_string());

        let client = test_client();
        let response = client
            .get(&format!("{}/file", front.uri()), &headers, None)
            .await
            .unwrap();
        assert_eq!(response.status().as_u16(), 200);
    }

    #[tokio::test]
    async fn test_get_relative_redirect_resolved() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/start"))
            .respond_with(ResponseTemplate::new(302).insert_header("Location", "/end"))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/end"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(b"done"))
            .mount(&server)
            .await;

        let client = test_client();
        let response = client
            .get(&format!("{}/start", server.uri()), &HashMap::new(), None)
            .await
            .unwrap();
        assert_eq!(response.status().as_u16(), 200);
    }

    #[tokio::test]
    async fn test_get_redirect_loop_capped() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/loop"))
            .respond_with(ResponseTemplate::new(302).insert_header("Location", "/loop"))
            .mount(&server)
            .await;

        let client = test_client();
        let result = client
            .get(&format!("{}/loop", server.uri()), &HashMap::new(), None)
            .await;
        assert!(matches!(
            result,
            Err(DownloadError::TooManyRedirects { limit, .. }) if limit == MAX_REDIRECTS
        ));
    }

    #[tokio::test]
    async fn test_get_invalid_url() {
        let client = test_client();
        let result = client.get("not-a-valid-url", &HashMap::new(), None).await;
        assert!(matches!(result, Err(DownloadError::InvalidUrl { .. })));
    }

    #[test]
    fn test_shared_clients_cached_by_key() {
        let config = RuntimeConfig {
            max_connections_per_host: 3,
            ..RuntimeConfig::default()
        };
        let _a = HttpClient::shared(&config).unwrap();
        let _b = HttpClient::shared(&config).unwrap();
        let key = ClientKey {
            proxy_url: config.proxy_url.clone(),
            max_conns_per_host: 3,
        };
        assert!(CLIENT_CACHE.contains_key(&key));
    }

    #[test]
    fn test_shared_rejects_bad_proxy_url() {
        let config = RuntimeConfig {
            proxy_url: "::not a proxy::".to_string(),
            ..RuntimeConfig::default()
        };
        assert!(matches!(
            HttpClient::shared(&config),
            Err(DownloadError::InvalidUrl { .. })
        ));
    }

    #[test]
    fn test_is_redirect_statuses() {
        assert!(is_redirect(StatusCode::MOVED_PERMANENTLY));
        assert!(is_redirect(StatusCode::FOUND));
        assert!(is_redirect(StatusCode::TEMPORARY_REDIRECT));
        assert!(!is_redirect(StatusCode::OK));
        assert!(!is_redirect(StatusCode::PARTIAL_CONTENT));
    }
}
