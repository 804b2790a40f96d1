use serde::{Deserialize, Serialize};
use std::fmt;

/// Metric a hotspot ranking is ordered by.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RankMetric {
    TotalCpuTime,
    TotalElapsedTime,
    TotalLogicalReads,
    ExecutionCount,
    AvgElapsedTime,
}

impl RankMetric {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::TotalCpuTime => "total_cpu_time",
            Self::TotalElapsedTime => "total_elapsed_time",
            Self::TotalLogicalReads => "total_logical_reads",
            Self::ExecutionCount => "execution_count",
            Self::AvgElapsedTime => "avg_elapsed_time",
        }
    }

    /// Extract the ranking value from an aggregated candidate.
    pub fn value_of(&self, candidate: &HotspotCandidate) -> f64 {
        match self {
            Self::TotalCpuTime => candidate.total_cpu_us as f64,
            Self::TotalElapsedTime => candidate.total_elapsed_us as f64,
            Self::TotalLogicalReads => candidate.total_logical_reads as f64,
            Self::ExecutionCount => candidate.execution_count as f64,
            Self::AvgElapsedTime => candidate.avg_elapsed_us as f64,
        }
    }
}

impl Default for RankMetric {
    fn default() -> Self {
        Self::TotalCpuTime
    }
}

impl fmt::Display for RankMetric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One fingerprint's aggregated resource usage over the analysis window,
/// joined with identity metadata. Input to the hotspot ranking.
#[derive(Debug, Clone)]
pub struct HotspotCandidate {
    pub fingerprint_id: i64,
    pub fingerprint_hash: String,
    pub instance_name: String,
    pub database_name: String,
    pub execution_count: i64,
    pub total_cpu_us: i64,
    pub total_elapsed_us: i64,
    pub total_logical_reads: i64,
    /// total_elapsed / executions over the window
    pub avg_elapsed_us: i64,
    pub has_open_regression: bool,
}

/// Ephemeral ranking record for the last analysis cycle. Not persisted.
#[derive(Debug, Clone, Serialize)]
pub struct Hotspot {
    pub rank: usize,
    pub fingerprint_id: i64,
    pub instance_name: String,
    pub database_name: String,
    pub metric: RankMetric,
    pub value: f64,
    /// Share of the filtered set's total for the ranking metric
    pub percent_of_total: f64,
    pub also_regressed: bool,
}
