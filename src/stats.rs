//! # Distribution Statistics
//!
//! Summaries over one numeric field of the successful request metrics.
//! Percentiles use the nearest-rank method on the ascending sample:
//!
//! ```text
//! index = ceil(p / 100 * n) - 1, clamped to [0, n - 1]
//! ```
//!
//! The median is P50 under the same rule. An empty sample has no summary at
//! all; callers get `None` rather than a zero-filled record.

use crate::probe::RequestMetric;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Field of a [`RequestMetric`] that can be summarized.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MetricField {
    /// Time to first token, in seconds
    Ttft,
    /// Start to end of stream, in seconds
    TotalTime,
    /// Non-empty fragments per second
    ChunksPerSecond,
}

impl MetricField {
    pub const ALL: [MetricField; 3] = [
        MetricField::Ttft,
        MetricField::TotalTime,
        MetricField::ChunksPerSecond,
    ];

    /// Extract the field's value, or `None` where it is undefined for this
    /// metric (no first chunk, zero duration).
    pub fn extract(&self, metric: &RequestMetric) -> Option<f64> {
        match self {
            MetricField::Ttft => metric.ttft().map(|d| d.as_secs_f64()),
            MetricField::TotalTime => Some(metric.total_time().as_secs_f64()),
            MetricField::ChunksPerSecond => metric.chunks_per_second(),
        }
    }

    pub fn unit(&self) -> &'static str {
        match self {
            MetricField::Ttft | MetricField::TotalTime => "s",
            MetricField::ChunksPerSecond => "chunks/s",
        }
    }
}

impl fmt::Display for MetricField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            MetricField::Ttft => "ttft",
            MetricField::TotalTime => "total_time",
            MetricField::ChunksPerSecond => "chunks_per_second",
        };
        f.write_str(name)
    }
}

/// Read-only distribution snapshot for one field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatsSummary {
    pub count: usize,
    pub min: f64,
    pub max: f64,
    pub mean: f64,
    pub median: f64,
    /// Population standard deviation
    pub std_dev: f64,
    pub p50: f64,
    pub p90: f64,
    pub p95: f64,
    pub p99: f64,
}

impl StatsSummary {
    /// Summarize a sample. Non-finite values are discarded; an empty sample
    /// yields `None`.
    pub fn from_values(values: impl IntoIterator<Item = f64>) -> Option<Self> {
        let mut sorted: Vec<f64> = values.into_iter().filter(|v| v.is_finite()).collect();
        if sorted.is_empty() {
            return None;
        }
        sorted.sort_by(f64::total_cmp);

        let n = sorted.len() as f64;
        let mean = sorted.iter().sum::<f64>() / n;
        let variance = sorted.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;
        let p50 = nearest_rank(&sorted, 50.0)?;

        Some(Self {
            count: sorted.len(),
            min: sorted[0],
            max: sorted[sorted.len() - 1],
            mean,
            median: p50,
            std_dev: variance.sqrt(),
            p50,
            p90: nearest_rank(&sorted, 90.0)?,
            p95: nearest_rank(&sorted, 95.0)?,
            p99: nearest_rank(&sorted, 99.0)?,
        })
    }

    /// Summarize `field` over the successful metrics in `metrics`.
    pub fn for_field<'a>(
        field: MetricField,
        metrics: impl IntoIterator<Item = &'a RequestMetric>,
    ) -> Option<Self> {
        Self::from_values(
            metrics
                .into_iter()
                .filter(|m| m.is_success())
                .filter_map(|m| field.extract(m)),
        )
    }
}

/// Nearest-rank percentile of an ascending sample; `p` is clamped to
/// `[0, 100]`.
pub fn nearest_rank(sorted: &[f64], p: f64) -> Option<f64> {
    if sorted.is_empty() {
        return None;
    }
    let n = sorted.len();
    let p = p.clamp(0.0, 100.0);
    let rank = (p / 100.0 * n as f64).ceil() as usize;
    let index = rank.saturating_sub(1).min(n - 1);
    Some(sorted[index])
}
