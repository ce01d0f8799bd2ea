//! # Timing Probe
//!
//! Executes one streaming HTTP request and turns its lifecycle into a
//! [`RequestMetric`]. The probe observes four instants:
//!
//! 1. `start_time`: just before the request is handed to the transport
//! 2. `response_headers_time`: status line and headers received
//! 3. `first_chunk_time`: first non-empty body fragment
//! 4. `end_time`: stream finished, timed out or failed
//!
//! The body is treated as an opaque byte stream. Fragment sizes and
//! boundaries are whatever the transport delivers.
//!
//! A probe never fails past its own boundary: every invocation returns a
//! metric, with failures recorded in [`RequestMetric::error`].

use crate::error::{FailureKind, RequestError};
use crate::source::RequestSpec;
use async_trait::async_trait;
use bytes::Bytes;
use futures_util::StreamExt;
use reqwest::{Client, Response, StatusCode};
use std::time::Duration;
use tokio::time::{timeout_at, Instant};
use tracing::{debug, info, warn};

/// Maximum number of characters kept from an error response body.
const ERROR_EXCERPT_CHARS: usize = 200;

/// Record of one completed (or failed) request.
#[derive(Debug, Clone)]
pub struct RequestMetric {
    /// Sequence position, 1-based, assigned by the dispatcher
    pub request_id: u64,
    /// Request handed to the transport
    pub start_time: Instant,
    /// Status line and headers fully received
    pub response_headers_time: Option<Instant>,
    /// First non-empty body fragment observed
    pub first_chunk_time: Option<Instant>,
    /// Stream finished (gracefully or not)
    pub end_time: Instant,
    /// Number of non-empty fragments
    pub chunk_count: u64,
    /// Total bytes across all fragments
    pub byte_count: u64,
    /// Whether the configured end-of-stream marker appeared in the body.
    /// Advisory only, never used for timing.
    pub end_marker_seen: bool,
    pub error: Option<RequestError>,
}

impl RequestMetric {
    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }

    pub fn failure_kind(&self) -> Option<FailureKind> {
        self.error.as_ref().map(|e| e.kind)
    }

    /// Time to first token
    pub fn ttft(&self) -> Option<Duration> {
        self.first_chunk_time
            .map(|t| t.saturating_duration_since(self.start_time))
    }

    /// Time until the response headers arrived
    pub fn time_to_headers(&self) -> Option<Duration> {
        self.response_headers_time
            .map(|t| t.saturating_duration_since(self.start_time))
    }

    pub fn total_time(&self) -> Duration {
        self.end_time.saturating_duration_since(self.start_time)
    }

    /// Fragments per second over the whole request; `None` when the total
    /// time is zero.
    pub fn chunks_per_second(&self) -> Option<f64> {
        let secs = self.total_time().as_secs_f64();
        if secs > 0.0 {
            Some(self.chunk_count as f64 / secs)
        } else {
            None
        }
    }
}

/// Executes a single request and reports its timing.
#[async_trait]
pub trait Probe: Send + Sync + 'static {
    async fn execute(&self, request_id: u64, spec: RequestSpec) -> RequestMetric;
}

/// Mutable state of an in-progress probe invocation.
///
/// Only this type writes timestamps, which keeps the ordering invariant
/// `start <= headers <= first chunk <= end` in one place.
#[derive(Debug)]
pub struct ProbeState {
    request_id: u64,
    start_time: Instant,
    response_headers_time: Option<Instant>,
    first_chunk_time: Option<Instant>,
    chunk_count: u64,
    byte_count: u64,
    marker: Option<EndMarkerScanner>,
}

impl ProbeState {
    pub fn new(request_id: u64, start_time: Instant) -> Self {
        Self {
            request_id,
            start_time,
            response_headers_time: None,
            first_chunk_time: None,
            chunk_count: 0,
            byte_count: 0,
            marker: None,
        }
    }

    /// Watch the body for an advisory end-of-stream marker.
    pub fn with_end_marker(mut self, marker: Option<Bytes>) -> Self {
        self.marker = marker.map(EndMarkerScanner::new);
        self
    }

    pub fn headers_received(&mut self, at: Instant) {
        self.response_headers_time = Some(at.max(self.start_time));
    }

    /// Record one body fragment. Empty fragments are ignored.
    pub fn record_fragment(&mut self, fragment: &[u8], at: Instant) {
        if fragment.is_empty() {
            return;
        }
        if self.first_chunk_time.is_none() {
            let floor = self.response_headers_time.unwrap_or(self.start_time);
            let first = at.max(floor);
            self.first_chunk_time = Some(first);
            debug!(
                "[{:03}] first chunk after {:.3}s",
                self.request_id,
                first.saturating_duration_since(self.start_time).as_secs_f64()
            );
        }
        self.chunk_count += 1;
        self.byte_count += fragment.len() as u64;
        if let Some(scanner) = self.marker.as_mut() {
            scanner.feed(fragment);
        }
    }

    pub fn succeed(self, at: Instant) -> RequestMetric {
        self.finish(at, None)
    }

    pub fn fail(self, at: Instant, error: RequestError) -> RequestMetric {
        self.finish(at, Some(error))
    }

    fn finish(self, at: Instant, error: Option<RequestError>) -> RequestMetric {
        let floor = self
            .first_chunk_time
            .or(self.response_headers_time)
            .unwrap_or(self.start_time);
        RequestMetric {
            request_id: self.request_id,
            start_time: self.start_time,
            response_headers_time: self.response_headers_time,
            first_chunk_time: self.first_chunk_time,
            end_time: at.max(floor),
            chunk_count: self.chunk_count,
            byte_count: self.byte_count,
            end_marker_seen: self.marker.map(|m| m.seen()).unwrap_or(false),
            error,
        }
    }
}

/// Finds a byte marker anywhere in a fragmented stream, including matches
/// that straddle fragment boundaries, while holding at most
/// `marker.len() - 1` bytes of history.
#[derive(Debug, Clone)]
pub struct EndMarkerScanner {
    marker: Bytes,
    tail: Vec<u8>,
    seen: bool,
}

impl EndMarkerScanner {
    pub fn new(marker: Bytes) -> Self {
        Self {
            marker,
            tail: Vec::new(),
            seen: false,
        }
    }

    pub fn feed(&mut self, fragment: &[u8]) {
        if self.seen || self.marker.is_empty() {
            return;
        }
        let needle = self.marker.as_ref();
        self.tail.extend_from_slice(fragment);
        if self.tail.windows(needle.len()).any(|w| w == needle) {
            self.seen = true;
            self.tail.clear();
            return;
        }
        let keep = needle.len() - 1;
        if self.tail.len() > keep {
            self.tail.drain(..self.tail.len() - keep);
        }
    }

    pub fn seen(&self) -> bool {
        self.seen
    }
}

/// Production probe backed by a shared `reqwest::Client`.
#[derive(Debug, Clone)]
pub struct HttpProbe {
    client: Client,
    expected_status: StatusCode,
    end_marker: Option<Bytes>,
}

impl HttpProbe {
    pub fn new(client: Client) -> Self {
        Self {
            client,
            expected_status: StatusCode::OK,
            end_marker: None,
        }
    }

    pub fn expected_status(mut self, status: StatusCode) -> Self {
        self.expected_status = status;
        self
    }

    /// Advisory end-of-stream marker; empty disables detection.
    pub fn end_marker(mut self, marker: impl Into<Bytes>) -> Self {
        let marker = marker.into();
        self.end_marker = if marker.is_empty() { None } else { Some(marker) };
        self
    }

    fn build_request(&self, spec: &RequestSpec) -> Result<reqwest::Request, RequestError> {
        self.client
            .request(spec.method.clone(), spec.url.clone())
            .headers(spec.headers.clone())
            .body(spec.body.clone())
            .build()
            .map_err(|e| RequestError::transport(format!("invalid request: {}", e)))
    }
}

#[async_trait]
impl Probe for HttpProbe {
    async fn execute(&self, request_id: u64, spec: RequestSpec) -> RequestMetric {
        let request = self.build_request(&spec);

        let start_time = Instant::now();
        let deadline = start_time + spec.timeout;
        let mut state =
            ProbeState::new(request_id, start_time).with_end_marker(self.end_marker.clone());

        let request = match request {
            Ok(request) => request,
            Err(error) => return report(state.fail(Instant::now(), error)),
        };

        let response = match timeout_at(deadline, self.client.execute(request)).await {
            Ok(Ok(response)) => response,
            Ok(Err(e)) => return report(state.fail(Instant::now(), RequestError::from(&e))),
            Err(_) => {
                let error = RequestError::timeout(format!(
                    "no response headers within {:.3}s",
                    spec.timeout.as_secs_f64()
                ));
                return report(state.fail(Instant::now(), error));
            }
        };

        let status = response.status();
        if status != self.expected_status {
            let metric = state.fail(Instant::now(), RequestError::http_status(""));
            let excerpt = read_error_excerpt(response, deadline).await;
            let message = match excerpt {
                Some(text) => format!("HTTP {}: {}", status.as_u16(), text),
                None => format!("HTTP {}", status.as_u16()),
            };
            return report(RequestMetric {
                error: Some(RequestError::http_status(message)),
                ..metric
            });
        }
        state.headers_received(Instant::now());

        let mut body = std::pin::pin!(response.bytes_stream());
        loop {
            match timeout_at(deadline, body.next()).await {
                Ok(Some(Ok(fragment))) => state.record_fragment(&fragment, Instant::now()),
                Ok(Some(Err(e))) => {
                    return report(state.fail(Instant::now(), RequestError::from(&e)))
                }
                Ok(None) => break,
                Err(_) => {
                    let error = RequestError::timeout(format!(
                        "stream not finished within {:.3}s",
                        spec.timeout.as_secs_f64()
                    ));
                    return report(state.fail(Instant::now(), error));
                }
            }
        }

        report(state.succeed(Instant::now()))
    }
}

/// Log the outcome of a finished probe and hand the metric back.
fn report(metric: RequestMetric) -> RequestMetric {
    let total = metric.total_time().as_secs_f64();
    match &metric.error {
        None => {
            if metric.end_marker_seen {
                debug!("[{:03}] end-of-stream marker detected", metric.request_id);
            }
            info!(
                "[{:03}] done: {:.3}s | {} chunks | {:.2} chunks/s | {:.2} KB",
                metric.request_id,
                total,
                metric.chunk_count,
                metric.chunks_per_second().unwrap_or(0.0),
                metric.byte_count as f64 / 1024.0
            );
        }
        Some(error) if error.kind == FailureKind::Timeout => {
            warn!(
                "[{:03}] timed out after {:.2}s: {}",
                metric.request_id, total, error.message
            );
        }
        Some(error) => {
            warn!("[{:03}] failed after {:.3}s: {}", metric.request_id, total, error);
        }
    }
    metric
}

/// Best-effort excerpt of an error body, bounded by the request deadline.
///
/// Prefers the `message` field of a JSON object body.
async fn read_error_excerpt(response: Response, deadline: Instant) -> Option<String> {
    let text = timeout_at(deadline, response.text()).await.ok()?.ok()?;
    let text = text.trim();
    if text.is_empty() {
        return None;
    }
    let message = serde_json::from_str::<serde_json::Value>(text)
        .ok()
        .and_then(|value| {
            value
                .get("message")
                .and_then(|m| m.as_str())
                .map(str::to_string)
        })
        .unwrap_or_else(|| text.to_string());
    Some(message.chars().take(ERROR_EXCERPT_CHARS).collect())
}
