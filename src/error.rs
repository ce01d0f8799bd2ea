//! # Error Types
//!
//! Two distinct kinds of failure live in this crate:
//!
//! - [`LoadTestError`] is fatal and only ever raised while preparing a run
//!   (bad configuration, unreadable CSV, client construction).
//! - [`RequestError`] is per-request *data*. It is stored on a
//!   [`RequestMetric`](crate::probe::RequestMetric) and never propagated
//!   across the dispatcher or aggregator.

use crate::core::http_client::HttpClientError;
use serde::{Deserialize, Serialize};
use std::error::Error as StdError;
use std::fmt;
use thiserror::Error;

/// Fatal errors raised before any request is dispatched.
#[derive(Debug, Error)]
pub enum LoadTestError {
    #[error("Configuration error: {0}")]
    Config(String),
    #[error("Data source error: {0}")]
    DataSource(String),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
    #[error("Invalid URL: {0}")]
    Url(#[from] url::ParseError),
    #[error(transparent)]
    HttpClient(#[from] HttpClientError),
}

/// Failure taxonomy for a single request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// Response arrived with a status other than the expected one.
    HttpStatus,
    /// The per-request budget ran out at some lifecycle stage.
    Timeout,
    /// Connection failure, protocol violation or other I/O fault.
    Transport,
}

impl FailureKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureKind::HttpStatus => "http_status",
            FailureKind::Timeout => "timeout",
            FailureKind::Transport => "transport",
        }
    }
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A recorded per-request failure: its kind plus a human-readable message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestError {
    pub kind: FailureKind,
    pub message: String,
}

impl RequestError {
    pub fn new(kind: FailureKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn http_status(message: impl Into<String>) -> Self {
        Self::new(FailureKind::HttpStatus, message)
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(FailureKind::Timeout, message)
    }

    pub fn transport(message: impl Into<String>) -> Self {
        Self::new(FailureKind::Transport, message)
    }
}

impl fmt::Display for RequestError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)
    }
}

impl From<&reqwest::Error> for RequestError {
    /// Classify a transport-level reqwest error.
    ///
    /// Only the probe's own deadline produces [`FailureKind::Timeout`]. A
    /// connect timeout is a connection failure, not an exhausted budget.
    fn from(err: &reqwest::Error) -> Self {
        if err.is_connect() {
            RequestError::transport(format!("connection failed: {}", err))
        } else if err.is_timeout() {
            RequestError::timeout(format!("transport timed out: {}", err))
        } else if err.is_body() || err.is_decode() {
            RequestError::transport(format!("response body error: {}", err))
        } else if io_source(err).is_some() {
            RequestError::transport(format!("connection failed: {}", err))
        } else {
            RequestError::transport(format!("request failed: {}", err))
        }
    }
}

/// First `io::Error` in the source chain of `err`, if any.
fn io_source<'a>(err: &'a (dyn StdError + 'static)) -> Option<&'a std::io::Error> {
    let mut current = err.source();
    while let Some(source) = current {
        if let Some(io) = source.downcast_ref::<std::io::Error>() {
            return Some(io);
        }
        current = source.source();
    }
    None
}
