//! # Concurrency Dispatcher
//!
//! Drives a [`RequestSource`] through a [`Probe`] with exactly `N` requests
//! in flight. The design is an admission gate in front of a single
//! sequential producer:
//!
//! 1. acquire one permit from a `Semaphore` of capacity `N`
//! 2. pull the next `RequestSpec` and assign the next `request_id`
//! 3. spawn the probe; the permit moves into the task and is released when
//!    the task ends, whatever the outcome
//!
//! Ids are therefore assigned in source order while completions arrive in
//! any order. Cancellation only stops admission: probes already running
//! finish (or time out) and their metrics are still recorded.

use crate::aggregator::MetricsAggregator;
use crate::error::RequestError;
use crate::probe::{Probe, ProbeState};
use crate::source::RequestSource;
use futures_util::FutureExt;
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Dispatcher settings
#[derive(Debug, Clone)]
pub struct DispatcherConfig {
    /// Requests held in flight (at least 1)
    pub concurrency: usize,
    /// Requests to dispatch in total
    pub total_requests: u64,
}

impl DispatcherConfig {
    pub fn new(concurrency: usize, total_requests: u64) -> Self {
        Self {
            concurrency,
            total_requests,
        }
    }
}

/// Snapshot handed to the progress hook after every completion.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Progress {
    pub completed: u64,
    pub total: u64,
    pub elapsed: Duration,
}

/// Receives progress after every probe completion.
///
/// Called from the completing task, so implementations must be cheap and
/// must not block.
pub trait ProgressHook: Send + Sync {
    fn on_progress(&self, progress: &Progress);
}

impl<F> ProgressHook for F
where
    F: Fn(&Progress) + Send + Sync,
{
    fn on_progress(&self, progress: &Progress) {
        self(progress)
    }
}

/// Logs progress through `tracing`.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogProgress;

impl ProgressHook for LogProgress {
    fn on_progress(&self, progress: &Progress) {
        info!(
            "Progress: {}/{} | elapsed: {:.1}s",
            progress.completed,
            progress.total,
            progress.elapsed.as_secs_f64()
        );
    }
}

/// Ignores progress.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoProgress;

impl ProgressHook for NoProgress {
    fn on_progress(&self, _progress: &Progress) {}
}

/// How a run ended.
#[derive(Debug, Clone, PartialEq)]
pub struct RunOutcome {
    /// Probes started (ids `1..=dispatched`)
    pub dispatched: u64,
    /// Probes finished and recorded
    pub completed: u64,
    pub elapsed: Duration,
    /// Admission stopped by the cancellation token
    pub cancelled: bool,
    /// The source ran dry before `total_requests`
    pub source_exhausted: bool,
}

/// Fixed-concurrency scheduler.
pub struct Dispatcher<P: Probe> {
    probe: Arc<P>,
    aggregator: Arc<MetricsAggregator>,
    config: DispatcherConfig,
    progress: Arc<dyn ProgressHook>,
    cancel: CancellationToken,
}

impl<P: Probe> Dispatcher<P> {
    /// Create a dispatcher. A concurrency of 0 is raised to 1.
    pub fn new(probe: P, aggregator: Arc<MetricsAggregator>, config: DispatcherConfig) -> Self {
        let config = DispatcherConfig {
            concurrency: config.concurrency.max(1),
            ..config
        };
        Self {
            probe: Arc::new(probe),
            aggregator,
            config,
            progress: Arc::new(NoProgress),
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_progress(mut self, hook: impl ProgressHook + 'static) -> Self {
        self.progress = Arc::new(hook);
        self
    }

    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    pub fn config(&self) -> &DispatcherConfig {
        &self.config
    }

    /// Execute the run to completion (or cancellation).
    pub async fn run<S: RequestSource>(&self, mut source: S) -> RunOutcome {
        let started = Instant::now();
        let total = self.config.total_requests;
        let concurrency = self.config.concurrency;
        let gate = Arc::new(Semaphore::new(concurrency));
        let completed = Arc::new(AtomicU64::new(0));
        let mut tasks = JoinSet::new();
        let mut dispatched = 0u64;
        let mut cancelled = false;
        let mut source_exhausted = false;

        info!(
            "Dispatching {} requests with concurrency {}",
            total, concurrency
        );

        while dispatched < total {
            // Reap finished tasks so the set does not grow with the run.
            while let Some(joined) = tasks.try_join_next() {
                log_join_failure(joined);
            }

            let permit = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => {
                    cancelled = true;
                    break;
                }
                permit = gate.clone().acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => break,
                },
            };
            if self.cancel.is_cancelled() {
                cancelled = true;
                break;
            }

            let spec = match source.next_request() {
                Some(spec) => spec,
                None => {
                    warn!(
                        "Request source exhausted after {} of {} requests",
                        dispatched, total
                    );
                    source_exhausted = true;
                    break;
                }
            };

            dispatched += 1;
            let request_id = dispatched;
            debug!(
                "[{:03}] start (active: {}/{})",
                request_id,
                concurrency - gate.available_permits(),
                concurrency
            );

            let probe = self.probe.clone();
            let aggregator = self.aggregator.clone();
            let progress = self.progress.clone();
            let completed = completed.clone();
            tasks.spawn(async move {
                let _permit = permit;
                let start = Instant::now();
                let metric = match AssertUnwindSafe(probe.execute(request_id, spec))
                    .catch_unwind()
                    .await
                {
                    Ok(metric) => metric,
                    Err(payload) => {
                        let message = panic_message(payload.as_ref());
                        error!("[{:03}] request task panicked: {}", request_id, message);
                        ProbeState::new(request_id, start).fail(
                            Instant::now(),
                            RequestError::transport(format!("request task panicked: {}", message)),
                        )
                    }
                };
                aggregator.add(metric);
                let done = completed.fetch_add(1, Ordering::SeqCst) + 1;
                progress.on_progress(&Progress {
                    completed: done,
                    total,
                    elapsed: started.elapsed(),
                });
            });
        }

        if cancelled {
            warn!(
                "Run cancelled: {} requests admitted, waiting for in-flight requests",
                dispatched
            );
        }

        while let Some(joined) = tasks.join_next().await {
            log_join_failure(joined);
        }

        let outcome = RunOutcome {
            dispatched,
            completed: completed.load(Ordering::SeqCst),
            elapsed: started.elapsed(),
            cancelled,
            source_exhausted,
        };
        info!(
            "Run finished: {}/{} completed in {:.2}s",
            outcome.completed,
            total,
            outcome.elapsed.as_secs_f64()
        );
        outcome
    }
}

fn log_join_failure(joined: Result<(), tokio::task::JoinError>) {
    if let Err(e) = joined {
        error!("Request task did not complete: {}", e);
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.as_str()
    } else {
        "unknown panic"
    }
}
