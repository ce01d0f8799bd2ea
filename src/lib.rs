//! # streamload - Load Testing for Streaming HTTP APIs
//!
//! Fires a fixed number of requests at a streaming endpoint (SSE / chunked
//! LLM completions) with exactly `N` in flight, measures per-request
//! latency at chunk granularity, and aggregates the results into
//! percentile summaries.
//!
//! ## Measurements
//!
//! - **TTFT**: time from request start to the first non-empty body fragment
//! - **Total time**: request start to end of stream (or failure)
//! - **Chunk rate**: non-empty fragments per second of total time
//!
//! Summaries (min, max, mean, median, population std dev, P50/P90/P95/P99)
//! cover successful requests only. Failures are counted by kind
//! (`http_status`, `timeout`, `transport`).
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use streamload::{
//!     Dispatcher, DispatcherConfig, HttpClientBuilder, HttpProbe, MetricsAggregator,
//!     RequestTemplate,
//! };
//! use streamload::source::TemplateSource;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let template = RequestTemplate::parse(
//!         "http://localhost:8000/v1/chat/completions",
//!         "POST",
//!         &Default::default(),
//!         serde_json::json!({"stream": true}),
//!         std::time::Duration::from_secs(60),
//!     )?;
//!
//!     let client = HttpClientBuilder::new().concurrency(8).build()?;
//!     let aggregator = Arc::new(MetricsAggregator::new());
//!     let dispatcher = Dispatcher::new(
//!         HttpProbe::new(client),
//!         aggregator.clone(),
//!         DispatcherConfig::new(8, 100),
//!     );
//!
//!     let outcome = dispatcher.run(TemplateSource::new(template)).await;
//!     println!("{}", streamload::report::render_text(&aggregator.report(outcome.elapsed)));
//!     Ok(())
//! }
//! ```
//!
//! ## Architecture
//!
//! - [`config`] - CLI / environment configuration and JSON run definitions
//! - [`source`] - Request specs, templates and CSV data rows
//! - [`probe`] - Single streaming request measurement
//! - [`dispatcher`] - Fixed-concurrency scheduling with cancellation
//! - [`aggregator`] - Thread-safe metric collection
//! - [`stats`] - Distribution summaries
//! - [`report`] - Text and JSON output
//! - [`graceful_shutdown`] - Signal handling
//! - [`error`] - Error types

pub mod core;
pub mod config;
pub mod error;
pub mod graceful_shutdown;

pub mod aggregator;
pub mod dispatcher;
pub mod probe;
pub mod report;
pub mod source;
pub mod stats;

pub use aggregator::{MetricsAggregator, RunReport};
pub use config::{Config, RunPlan};
pub use core::http_client::{HttpClientBuilder, HttpClientConfig};
pub use dispatcher::{Dispatcher, DispatcherConfig, LogProgress, Progress, ProgressHook, RunOutcome};
pub use error::{FailureKind, LoadTestError, RequestError};
pub use graceful_shutdown::{setup_shutdown_handler, GracefulShutdown};
pub use probe::{HttpProbe, Probe, ProbeState, RequestMetric};
pub use source::{RequestSource, RequestSpec, RequestTemplate};
pub use stats::{MetricField, StatsSummary};

/// Result type alias for fatal errors
pub type Result<T> = std::result::Result<T, LoadTestError>;
