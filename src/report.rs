//! # Report Generation
//!
//! Renders a [`RunReport`] for humans and persists the full result set as
//! JSON for later analysis.

use crate::aggregator::RunReport;
use crate::probe::RequestMetric;
use crate::stats::{MetricField, StatsSummary};
use crate::Result;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;
use std::path::Path;
use tracing::info;
use uuid::Uuid;

const RULE: &str = "======================================================================";

/// Run parameters echoed into the report.
#[derive(Debug, Clone, Serialize)]
pub struct RunInfo {
    pub run_id: Uuid,
    pub url: String,
    pub concurrency: usize,
    pub total_requests: u64,
    pub data_rows: usize,
    pub started_at: DateTime<Utc>,
}

impl RunInfo {
    pub fn new(url: impl Into<String>, concurrency: usize, total_requests: u64) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            url: url.into(),
            concurrency,
            total_requests,
            data_rows: 0,
            started_at: Utc::now(),
        }
    }

    pub fn with_data_rows(mut self, rows: usize) -> Self {
        self.data_rows = rows;
        self
    }
}

/// One row of the per-request section of the JSON output.
#[derive(Debug, Clone, Serialize)]
pub struct MetricRecord {
    pub request_id: u64,
    pub ttft: Option<f64>,
    pub time_to_headers: Option<f64>,
    pub total_time: f64,
    pub chunks: u64,
    pub bytes: u64,
    pub chunks_per_second: Option<f64>,
    pub end_marker_seen: bool,
    pub error_kind: Option<String>,
    pub error: Option<String>,
}

impl From<&RequestMetric> for MetricRecord {
    fn from(metric: &RequestMetric) -> Self {
        Self {
            request_id: metric.request_id,
            ttft: metric.ttft().map(|d| d.as_secs_f64()),
            time_to_headers: metric.time_to_headers().map(|d| d.as_secs_f64()),
            total_time: metric.total_time().as_secs_f64(),
            chunks: metric.chunk_count,
            bytes: metric.byte_count,
            chunks_per_second: metric.chunks_per_second(),
            end_marker_seen: metric.end_marker_seen,
            error_kind: metric.error.as_ref().map(|e| e.kind.to_string()),
            error: metric.error.as_ref().map(|e| e.message.clone()),
        }
    }
}

#[derive(Debug, Serialize)]
struct ResultsFile<'a> {
    config: &'a RunInfo,
    timestamp: DateTime<Utc>,
    summary: SummaryCounts,
    report: &'a RunReport,
    metrics: Vec<MetricRecord>,
}

#[derive(Debug, Serialize)]
struct SummaryCounts {
    success_count: usize,
    failed_count: usize,
}

impl fmt::Display for RunInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{}", RULE)?;
        writeln!(f, "Streaming endpoint load test")?;
        writeln!(f, "{}", RULE)?;
        writeln!(f, "URL:            {}", self.url)?;
        writeln!(f, "Concurrency:    {}", self.concurrency)?;
        writeln!(f, "Total requests: {}", self.total_requests)?;
        if self.data_rows > 0 {
            writeln!(f, "Data source:    CSV ({} rows, cycled)", self.data_rows)?;
        }
        writeln!(f, "Started:        {}", self.started_at.format("%Y-%m-%d %H:%M:%S"))?;
        write!(f, "{}", RULE)
    }
}

impl fmt::Display for RunReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let success_pct = self.success_rate() * 100.0;
        let failure_pct = if self.total_requests == 0 {
            0.0
        } else {
            100.0 - success_pct
        };

        writeln!(f, "\n{}", RULE)?;
        writeln!(f, "Test report")?;
        writeln!(f, "{}", RULE)?;

        writeln!(f, "\n[Overall]")?;
        writeln!(f, "  Requests:     {}", self.total_requests)?;
        writeln!(f, "  Succeeded:    {} ({:.1}%)", self.success_count, success_pct)?;
        writeln!(f, "  Failed:       {} ({:.1}%)", self.failure_count, failure_pct)?;
        writeln!(f, "  Elapsed:      {:.2}s", self.elapsed_secs)?;
        writeln!(f, "  Throughput:   {:.2} req/s", self.requests_per_second)?;
        writeln!(f, "  Received:     {:.2} KB", self.total_bytes as f64 / 1024.0)?;
        if self.cancelled {
            writeln!(f, "  Status:       cancelled before completion")?;
        }

        for (title, field) in [
            ("Time to first token (TTFT)", MetricField::Ttft),
            ("Total time", MetricField::TotalTime),
            ("Chunk rate", MetricField::ChunksPerSecond),
        ] {
            writeln!(f, "\n[{}]", title)?;
            match self.summary(field) {
                Some(summary) => write_summary(f, summary, field)?,
                None => writeln!(f, "  no successful samples")?,
            }
        }

        if !self.failures_by_kind.is_empty() {
            writeln!(f, "\n[Failures]")?;
            for (kind, count) in &self.failures_by_kind {
                writeln!(f, "  {}: {}", kind, count)?;
            }
            for (message, count) in &self.failures_by_message {
                writeln!(f, "    {} x{}", message, count)?;
            }
        }

        write!(f, "\n{}", RULE)
    }
}

fn write_summary(f: &mut fmt::Formatter<'_>, summary: &StatsSummary, field: MetricField) -> fmt::Result {
    let precision = match field {
        MetricField::ChunksPerSecond => 2,
        _ => 3,
    };
    let rows = [
        ("Min", summary.min),
        ("Max", summary.max),
        ("Mean", summary.mean),
        ("Median", summary.median),
        ("Std dev", summary.std_dev),
        ("P50", summary.p50),
        ("P90", summary.p90),
        ("P95", summary.p95),
        ("P99", summary.p99),
    ];
    for (label, value) in rows {
        let label = format!("{}:", label);
        writeln!(f, "  {:<12}{:.*} {}", label, precision, value, field.unit())?;
    }
    writeln!(f, "  {:<12}{}", "Samples:", summary.count)
}

/// Banner logged before the run starts.
pub fn render_banner(info: &RunInfo) -> String {
    info.to_string()
}

/// Human-readable report.
pub fn render_text(report: &RunReport) -> String {
    report.to_string()
}

/// Write `{config, timestamp, summary, report, metrics}` as pretty JSON.
///
/// Metrics are written in `request_id` order.
pub fn save_json(
    path: &Path,
    info: &RunInfo,
    report: &RunReport,
    metrics: &[RequestMetric],
) -> Result<()> {
    let mut records: Vec<MetricRecord> = metrics.iter().map(MetricRecord::from).collect();
    records.sort_by_key(|r| r.request_id);

    let file = ResultsFile {
        config: info,
        timestamp: Utc::now(),
        summary: SummaryCounts {
            success_count: report.success_count,
            failed_count: report.failure_count,
        },
        report,
        metrics: records,
    };
    let json = serde_json::to_string_pretty(&file)?;
    std::fs::write(path, json)?;
    info!("Detailed results saved: {}", path.display());
    Ok(())
}
