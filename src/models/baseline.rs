use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Statistical summary of one metric over a baseline window.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricStats {
    pub mean: f64,
    /// Population standard deviation
    pub std_dev: f64,
    pub p50: f64,
    pub p95: f64,
    pub p99: f64,
}

impl MetricStats {
    pub fn zero() -> Self {
        Self { mean: 0.0, std_dev: 0.0, p50: 0.0, p95: 0.0, p99: 0.0 }
    }
}

/// The per-metric stats bundle stored as one JSON column.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BaselineStats {
    /// Average CPU per execution, microseconds
    pub cpu_us: MetricStats,
    /// Average wall duration per execution, microseconds
    pub elapsed_us: MetricStats,
    /// Average logical reads per execution
    pub logical_reads: MetricStats,
}

/// Per-fingerprint baseline over a trailing window, content-addressed by
/// (fingerprint, window_end_day). Recomputing for the same day replaces the
/// prior value.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QueryBaseline {
    pub fingerprint_id: i64,
    pub window_start: DateTime<Utc>,
    pub window_end: DateTime<Utc>,
    pub sample_count: i64,
    /// n >= n_min and observed coverage >= w_min
    pub valid: bool,
    pub stats: BaselineStats,
}
