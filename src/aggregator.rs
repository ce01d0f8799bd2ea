//! # Metrics Aggregator
//!
//! Single shared sink for completed [`RequestMetric`] values. Appends are
//! serialized through one mutex; every query works on a snapshot copied
//! under that lock, so summaries can be computed while probes keep adding.

use crate::error::FailureKind;
use crate::probe::RequestMetric;
use crate::stats::{MetricField, StatsSummary};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

/// Collects metrics from concurrently completing probes.
#[derive(Debug, Default)]
pub struct MetricsAggregator {
    records: Mutex<Vec<RequestMetric>>,
}

impl MetricsAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            records: Mutex::new(Vec::with_capacity(capacity)),
        }
    }

    fn records(&self) -> MutexGuard<'_, Vec<RequestMetric>> {
        // A panic while holding the lock cannot leave a half-pushed Vec
        // behind, so a poisoned lock is still safe to read.
        self.records.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Append one completed metric.
    pub fn add(&self, metric: RequestMetric) {
        self.records().push(metric);
    }

    /// Copy of everything recorded so far, in insertion order.
    pub fn snapshot(&self) -> Vec<RequestMetric> {
        self.records().clone()
    }

    pub fn len(&self) -> usize {
        self.records().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records().is_empty()
    }

    pub fn success_count(&self) -> usize {
        self.records().iter().filter(|m| m.is_success()).count()
    }

    pub fn failure_count(&self) -> usize {
        self.records().iter().filter(|m| !m.is_success()).count()
    }

    pub fn failures_by_kind(&self) -> BTreeMap<FailureKind, usize> {
        count_failures_by_kind(&self.records())
    }

    /// Distribution of `field` over successful metrics; `None` when no
    /// successful metric defines the field.
    pub fn summary_for(&self, field: MetricField) -> Option<StatsSummary> {
        let snapshot = self.snapshot();
        StatsSummary::for_field(field, &snapshot)
    }

    /// Final (or live) report over the current contents.
    pub fn report(&self, elapsed: Duration) -> RunReport {
        RunReport::from_metrics(&self.snapshot(), elapsed)
    }
}

fn count_failures_by_kind(records: &[RequestMetric]) -> BTreeMap<FailureKind, usize> {
    let mut counts = BTreeMap::new();
    for kind in records.iter().filter_map(|m| m.failure_kind()) {
        *counts.entry(kind).or_insert(0) += 1;
    }
    counts
}

/// Aggregated outcome of a run, ready for rendering or serialization.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunReport {
    pub total_requests: usize,
    pub success_count: usize,
    pub failure_count: usize,
    pub failures_by_kind: BTreeMap<FailureKind, usize>,
    /// Failure messages grouped verbatim
    pub failures_by_message: BTreeMap<String, usize>,
    pub elapsed_secs: f64,
    pub requests_per_second: f64,
    pub total_bytes: u64,
    /// Set by the caller when the run was aborted before completion
    pub cancelled: bool,
    pub ttft: Option<StatsSummary>,
    pub total_time: Option<StatsSummary>,
    pub chunks_per_second: Option<StatsSummary>,
}

impl RunReport {
    pub fn from_metrics(metrics: &[RequestMetric], elapsed: Duration) -> Self {
        let success_count = metrics.iter().filter(|m| m.is_success()).count();
        let mut failures_by_message = BTreeMap::new();
        for error in metrics.iter().filter_map(|m| m.error.as_ref()) {
            *failures_by_message.entry(error.message.clone()).or_insert(0) += 1;
        }
        let elapsed_secs = elapsed.as_secs_f64();

        Self {
            total_requests: metrics.len(),
            success_count,
            failure_count: metrics.len() - success_count,
            failures_by_kind: count_failures_by_kind(metrics),
            failures_by_message,
            elapsed_secs,
            requests_per_second: if elapsed_secs > 0.0 {
                metrics.len() as f64 / elapsed_secs
            } else {
                0.0
            },
            total_bytes: metrics.iter().map(|m| m.byte_count).sum(),
            cancelled: false,
            ttft: StatsSummary::for_field(MetricField::Ttft, metrics),
            total_time: StatsSummary::for_field(MetricField::TotalTime, metrics),
            chunks_per_second: StatsSummary::for_field(MetricField::ChunksPerSecond, metrics),
        }
    }

    pub fn summary(&self, field: MetricField) -> Option<&StatsSummary> {
        match field {
            MetricField::Ttft => self.ttft.as_ref(),
            MetricField::TotalTime => self.total_time.as_ref(),
            MetricField::ChunksPerSecond => self.chunks_per_second.as_ref(),
        }
    }

    pub fn success_rate(&self) -> f64 {
        if self.total_requests == 0 {
            0.0
        } else {
            self.success_count as f64 / self.total_requests as f64
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::RequestError;
    use crate::probe::ProbeState;
    use std::sync::Arc;
    use tokio::time::Instant;

    fn success(id: u64, ttft_ms: u64, total_ms: u64, chunks: u64) -> RequestMetric {
        let t0 = Instant::now();
        let mut state = ProbeState::new(id, t0);
        state.headers_received(t0);
        for i in 0..chunks {
            state.record_fragment(b"chunk", t0 + Duration::from_millis(ttft_ms + i));
        }
        state.succeed(t0 + Duration::from_millis(total_ms))
    }

    fn failure(id: u64, error: RequestError) -> RequestMetric {
        let t0 = Instant::now();
        ProbeState::new(id, t0).fail(t0 + Duration::from_millis(5), error)
    }

    #[test]
    fn test_empty_aggregator() {
        let aggregator = MetricsAggregator::new();
        assert!(aggregator.is_empty());
        for field in MetricField::ALL {
            assert_eq!(aggregator.summary_for(field), None);
        }
        assert!(aggregator.failures_by_kind().is_empty());
    }

    #[test]
    fn test_summaries_ignore_failures() {
        let aggregator = MetricsAggregator::new();
        aggregator.add(success(1, 100, 500, 5));
        aggregator.add(failure(2, RequestError::http_status("HTTP 500")));
        aggregator.add(success(3, 200, 1000, 10));
        aggregator.add(failure(4, RequestError::timeout("stalled")));

        assert_eq!(aggregator.success_count(), 2);
        assert_eq!(aggregator.failure_count(), 2);
        let ttft = aggregator.summary_for(MetricField::Ttft).unwrap();
        assert_eq!(ttft.count, 2);
        assert!((ttft.min - 0.1).abs() < 1e-9);
        assert!((ttft.max - 0.2).abs() < 1e-9);

        let kinds = aggregator.failures_by_kind();
        assert_eq!(kinds.get(&FailureKind::HttpStatus), Some(&1));
        assert_eq!(kinds.get(&FailureKind::Timeout), Some(&1));
        assert_eq!(kinds.get(&FailureKind::Transport), None);
    }

    #[test]
    fn test_only_failures_gives_no_summary() {
        let aggregator = MetricsAggregator::new();
        aggregator.add(failure(1, RequestError::transport("connection refused")));
        assert_eq!(aggregator.summary_for(MetricField::TotalTime), None);
        assert_eq!(aggregator.failure_count(), 1);
    }

    #[test]
    fn test_summary_idempotent() {
        let aggregator = MetricsAggregator::new();
        for id in 1..=20 {
            aggregator.add(success(id, 10 * id, 100 * id, 3));
        }
        let first = aggregator.summary_for(MetricField::TotalTime);
        let second = aggregator.summary_for(MetricField::TotalTime);
        assert_eq!(first, second);
    }

    #[test]
    fn test_report_groups_failure_messages() {
        let aggregator = MetricsAggregator::new();
        aggregator.add(success(1, 100, 500, 2));
        aggregator.add(failure(2, RequestError::http_status("HTTP 500")));
        aggregator.add(failure(3, RequestError::http_status("HTTP 500")));

        let report = aggregator.report(Duration::from_secs(2));
        assert_eq!(report.total_requests, 3);
        assert_eq!(report.failures_by_message.get("HTTP 500"), Some(&2));
        assert!((report.requests_per_second - 1.5).abs() < 1e-9);
        assert_eq!(report.total_bytes, 10);
        assert!(report.ttft.is_some());
        assert!(!report.cancelled);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_adds_all_recorded() {
        let aggregator = Arc::new(MetricsAggregator::new());
        let mut handles = Vec::new();
        for id in 1..=200u64 {
            let aggregator = aggregator.clone();
            handles.push(tokio::spawn(async move {
                aggregator.add(success(id, 1, 2, 1));
                aggregator.summary_for(MetricField::TotalTime)
            }));
        }
        for handle in handles {
            assert!(handle.await.unwrap().is_some());
        }

        let mut ids: Vec<u64> = aggregator.snapshot().iter().map(|m| m.request_id).collect();
        ids.sort_unstable();
        assert_eq!(ids, (1..=200).collect::<Vec<_>>());
    }
}
