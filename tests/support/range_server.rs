//! A wiremock responder that honors HTTP Range requests.
//!
//! Serves slices of an in-memory payload with correct `206` /
//! `Content-Range` semantics, so the engine's chunked fetch paths can be
//! exercised against realistic origin behavior. Optional knobs inject
//! per-response delay and periodic `429` rejections.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use wiremock::{Request, Respond, ResponseTemplate};

/// Range-aware responder over a fixed payload.
pub struct RangeResponder {
    payload: Arc<Vec<u8>>,
    delay: Option<Duration>,
    /// Every `n`th ranged request returns `429 Retry-After: 1` when set.
    reject_every: Option<u64>,
    request_counter: AtomicU64,
    /// Sum of requested range lengths, ignoring probe-sized (≤ 1 byte)
    /// ranges. Lets tests assert how much the network was asked for.
    served_range_bytes: Arc<AtomicU64>,
}

impl RangeResponder {
    pub fn new(payload: Vec<u8>) -> Self {
        Self {
            payload: Arc::new(payload),
            delay: None,
            reject_every: None,
            request_counter: AtomicU64::new(0),
            served_range_bytes: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Delays every response by `delay`.
    #[must_use]
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Returns `429` for every `n`th ranged request.
    #[must_use]
    pub fn with_rate_limit_every(mut self, n: u64) -> Self {
        self.reject_every = Some(n.max(1));
        self
    }

    /// Shared counter of requested (non-probe) range bytes.
    pub fn served_counter(&self) -> Arc<AtomicU64> {
        Arc::clone(&self.served_range_bytes)
    }
}

impl Respond for RangeResponder {
    fn respond(&self, request: &Request) -> ResponseTemplate {
        let total = self.payload.len() as u64;
        let range = request
            .headers
            .get("range")
            .and_then(|v| v.to_str().ok())
            .and_then(parse_range);

        let template = match range {
            None => ResponseTemplate::new(200)
                .insert_header("Content-Length", total.to_string())
                .set_body_bytes(self.payload.as_slice().to_vec()),
            Some((start, _)) if start >= total => ResponseTemplate::new(416)
                .insert_header("Content-Range", format!("bytes */{total}")),
            Some((start, end)) => {
                let end = end.min(total - 1);
                let length = end - start + 1;
                if length > 1 {
                    let count = self.request_counter.fetch_add(1, Ordering::SeqCst) + 1;
                    if let Some(every) = self.reject_every {
                        if count % every == 0 {
                            return ResponseTemplate::new(429).insert_header("Retry-After", "1");
                        }
                    }
                    self.served_range_bytes.fetch_add(length, Ordering::SeqCst);
                }
                let body = self.payload[start as usize..=end as usize].to_vec();
                ResponseTemplate::new(206)
                    .insert_header("Content-Range", format!("bytes {start}-{end}/{total}"))
                    .insert_header("Content-Length", length.to_string())
                    .set_body_bytes(body)
            }
        };

        match self.delay {
            Some(delay) => template.set_delay(delay),
            None => template,
        }
    }
}

/// Parses `bytes=a-b` (the only form the engine sends).
fn parse_range(value: &str) -> Option<(u64, u64)> {
    let raw = value.trim().strip_prefix("bytes=")?;
    let (start, end) = raw.split_once('-')?;
    Some((start.trim().parse().ok()?, end.trim().parse().ok()?))
}

/// Deterministic pseudo-random payload so corruption shows up in a hash
/// comparison.
pub fn deterministic_payload(len: usize, seed: u64) -> Vec<u8> {
    let mut state = seed | 1;
    (0..len)
        .map(|_| {
            // xorshift64
            state ^= state << 13;
            state ^= state >> 7;
            state ^= state << 17;
            (state & 0xff) as u8
        })
        .collect()
}
