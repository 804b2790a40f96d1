use chrono::{DateTime, Utc};
use serde::Serialize;

/// Half-open wall-clock window `[from, to]` used for provider lookbacks and
/// store queries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeWindow {
    pub from: DateTime<Utc>,
    pub to: DateTime<Utc>,
}

impl TimeWindow {
    pub fn new(from: DateTime<Utc>, to: DateTime<Utc>) -> Self {
        Self { from, to }
    }

    /// The trailing window of `duration` ending at `to`.
    pub fn trailing(to: DateTime<Utc>, duration: chrono::Duration) -> Self {
        Self { from: to - duration, to }
    }
}

/// One row from the statistics provider, in the provider's native units
/// (durations in milliseconds). Converted to microseconds at the
/// orchestrator boundary.
#[derive(Debug, Clone, Default)]
pub struct QueryStat {
    /// Engine-supplied digest, when the engine computes one
    pub query_hash: Option<Vec<u8>>,
    pub sql_text: String,
    pub execution_count: i64,
    pub total_cpu_ms: f64,
    pub avg_cpu_ms: f64,
    pub total_elapsed_ms: f64,
    pub avg_elapsed_ms: f64,
    pub total_logical_reads: i64,
    pub avg_logical_reads: f64,
    pub total_logical_writes: i64,
    pub total_physical_reads: i64,
    pub plan_handle: Option<String>,
}

/// One persisted observation for one fingerprint at one instant.
/// All durations in integer microseconds.
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct MetricSample {
    pub id: i64,
    pub fingerprint_id: i64,
    pub instance_name: String,
    pub database_name: String,
    pub sampled_at: DateTime<Utc>,
    pub execution_count: i64,
    pub total_cpu_us: i64,
    pub avg_cpu_us: i64,
    pub total_elapsed_us: i64,
    pub avg_elapsed_us: i64,
    pub total_logical_reads: i64,
    pub avg_logical_reads: f64,
    pub total_logical_writes: i64,
    pub total_physical_reads: i64,
    pub plan_handle: Option<String>,
    /// Server-side counters decreased since the previous sample; the row is
    /// kept but skipped by regression eligibility until the next sample
    pub counter_reset: bool,
}

/// A sample before insertion; the store assigns the id.
#[derive(Debug, Clone)]
pub struct NewMetricSample {
    pub fingerprint_id: i64,
    pub instance_name: String,
    pub database_name: String,
    pub sampled_at: DateTime<Utc>,
    pub execution_count: i64,
    pub total_cpu_us: i64,
    pub avg_cpu_us: i64,
    pub total_elapsed_us: i64,
    pub avg_elapsed_us: i64,
    pub total_logical_reads: i64,
    pub avg_logical_reads: f64,
    pub total_logical_writes: i64,
    pub total_physical_reads: i64,
    pub plan_handle: Option<String>,
    pub counter_reset: bool,
}

/// Millisecond → microsecond conversion, truncating. Storage is integer
/// microseconds; the fractional part below 1 µs is dropped.
pub fn ms_to_us(ms: f64) -> i64 {
    if ms <= 0.0 { 0 } else { (ms * 1000.0) as i64 }
}

impl NewMetricSample {
    pub fn from_stat(
        fingerprint_id: i64,
        instance_name: &str,
        database_name: &str,
        sampled_at: DateTime<Utc>,
        stat: &QueryStat,
        counter_reset: bool,
    ) -> Self {
        let execs = stat.execution_count.max(0);
        Self {
            fingerprint_id,
            instance_name: instance_name.to_string(),
            database_name: database_name.to_string(),
            sampled_at,
            execution_count: execs,
            total_cpu_us: ms_to_us(stat.total_cpu_ms),
            avg_cpu_us: ms_to_us(stat.avg_cpu_ms),
            total_elapsed_us: ms_to_us(stat.total_elapsed_ms),
            avg_elapsed_us: ms_to_us(stat.avg_elapsed_ms),
            total_logical_reads: stat.total_logical_reads.max(0),
            avg_logical_reads: stat.avg_logical_reads.max(0.0),
            total_logical_writes: stat.total_logical_writes.max(0),
            total_physical_reads: stat.total_physical_reads.max(0),
            plan_handle: stat.plan_handle.clone(),
            counter_reset,
        }
    }
}
